//! Core interfaces and types for a document-database migration engine:
//! the operation vocabulary, the fluent builder migrations are authored
//! with, the linear chain of compiled migrations, the two appliers
//! (in-memory simulation and live database), the composable validators,
//! the execution runner, and the concurrency primitives (bounded-priority
//! task queue and conflict-retry policy) backend crates and callers share.
//!
//! A concrete database is supplied by implementing [`database::Driver`]
//! (see the `migrant-mongo` crate for a MongoDB implementation) and handing
//! a [`database::DatabaseApplier`] wrapping it to a [`runner::Runner`].

pub mod applier;
pub mod builder;
pub mod chain;
pub mod database;
pub mod error;
pub mod operation;
pub mod queue;
pub mod retry;
pub mod runner;
pub mod schema;
pub mod simulate;
pub mod state;
pub mod validate;

pub use applier::Applier;
pub use builder::Builder;
pub use chain::{
    Chain, ChainMetadata, ChainValidationResult, ChainValidator, ChainValidatorConfig,
    MigrationDefinition,
};
pub use database::{DatabaseApplier, Driver, DEFAULT_MIGRATION_STATE_CONTAINER};
pub use error::{Error, MigrantResult};
pub use operation::{Document, Identifier, Operation, OperationKind};
pub use queue::{Priority, QueueConfig, QueueStats, TaskPermit, TaskQueue};
pub use retry::{RetryConfig, RetryPolicy};
pub use runner::{BatchOutcome, MigrationOutcome, Progress, Runner, RunnerConfig};
pub use schema::{SchemaBundle, Validator as SchemaValidator, ValidationError};
pub use simulate::{MissingTargetMode, SimulationApplier};
pub use state::{DatabaseState, HistoryEntry, MigrationState};
pub use validate::{CompositeValidator, IntegrityValidator, SimulationValidator, ValidationReport};
