//! `migrant` is a schema-migration engine for document databases.
//!
//! A caller declares a linear chain of versioned [`MigrationDefinition`]s,
//! each compiling to an [`Operation`] list via the fluent [`Builder`]. The
//! same operation vocabulary is interpreted by two interchangeable
//! appliers: a pure in-memory [`SimulationApplier`] used for dry runs and
//! validation, and a [`DatabaseApplier`] that drives a real database
//! through a backend-specific [`Driver`] (see the `mongo` feature and the
//! `migrant-mongo` crate for a MongoDB implementation).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use migrant::{Builder, Chain, MigrationDefinition, Runner, RunnerConfig};
//! use migrant::core::schema::SchemaBundle;
//! use std::sync::Arc;
//!
//! # async fn run(applier: Box<dyn migrant::Applier>) -> migrant::MigrantResult<()> {
//! let root = Arc::new(MigrationDefinition {
//!     id: "2026_01_01_0000_create_books".into(),
//!     name: "create books container".into(),
//!     parent: None,
//!     schemas: SchemaBundle::new(),
//!     compile: Box::new(|| {
//!         Builder::new()
//!             .container("books")
//!             .create()
//!             .compile()
//!     }),
//! });
//!
//! let mut chain = Chain::new();
//! chain.push(root)?;
//!
//! let mut runner = Runner::new(applier, RunnerConfig::default());
//! let outcome = runner.run_chain(&chain, |_progress| {}).await;
//! assert!(outcome.all_succeeded());
//! # Ok(())
//! # }
//! ```
//!
//! This crate is a thin re-export facade over `migrant-core`; the real
//! engine - operation vocabulary, builder, chain model, appliers,
//! validators, runner, and concurrency primitives - lives there so that
//! `migrant-core` can be depended on directly by backend crates (like
//! `migrant-mongo`) without pulling in this crate's own dependency set.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use migrant_core as core;

pub use migrant_core::{
    Applier, BatchOutcome, Builder, Chain, ChainMetadata, ChainValidationResult, ChainValidator,
    ChainValidatorConfig, CompositeValidator, DatabaseApplier, DatabaseState, Document, Driver,
    Error, HistoryEntry, Identifier, IntegrityValidator, MigrantResult, MigrationDefinition,
    MigrationOutcome, MigrationState, MissingTargetMode, Operation, OperationKind, Priority,
    Progress, QueueConfig, QueueStats, RetryConfig, RetryPolicy, Runner, RunnerConfig,
    SchemaBundle, SchemaValidator, SimulationApplier, SimulationValidator, TaskPermit, TaskQueue,
    ValidationError, ValidationReport, DEFAULT_MIGRATION_STATE_CONTAINER,
};

#[cfg(feature = "mongo")]
#[cfg_attr(docsrs, doc(cfg(feature = "mongo")))]
pub use migrant_mongo::{MongoDriver, MongoDriverError};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn facade_reexports_compose_end_to_end() {
        let root = Arc::new(MigrationDefinition {
            id: "m1".into(),
            name: "create books".into(),
            parent: None,
            schemas: SchemaBundle::new(),
            compile: Box::new(|| Builder::new().container("books").create().compile()),
        });

        let mut chain = Chain::new();
        chain.push(root).unwrap();

        let applier = SimulationApplier::new(DatabaseState::new(), MissingTargetMode::Strict);
        let mut runner = Runner::new(Box::new(applier), RunnerConfig::default());
        let outcome = runner.run_chain(&chain, |_| {}).await;
        assert!(outcome.all_succeeded());
    }
}
