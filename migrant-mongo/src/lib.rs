//! MongoDB [`migrant_core::Driver`] implementation for the `migrant`
//! migration engine.
//!
//! This crate is thin by design: it translates the engine's document/
//! container/index vocabulary into calls against the official `mongodb`
//! driver and nothing else. Retry, schema diffing, and fan-out logic all
//! live in `migrant-core`'s [`migrant_core::DatabaseApplier`], which this
//! crate's [`MongoDriver`] is handed to.

mod driver;
mod error;

pub use driver::MongoDriver;
pub use error::{MongoDriverError, MongoResult};
