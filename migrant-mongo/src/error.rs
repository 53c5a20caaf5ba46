//! Error type for the MongoDB `Driver` implementation.

use thiserror::Error;

/// Result type for this crate's own operations, before they're folded into
/// [`migrant_core::Error`] at the `Driver` trait boundary.
pub type MongoResult<T> = Result<T, MongoDriverError>;

#[derive(Debug, Error)]
pub enum MongoDriverError {
    #[error("mongodb error: {0}")]
    Driver(#[from] mongodb::error::Error),

    #[error("bson serialization error: {0}")]
    BsonSer(#[from] bson::ser::Error),

    #[error("bson deserialization error: {0}")]
    BsonDe(#[from] bson::de::Error),

    #[error("document is not a JSON object: {0}")]
    NotAnObject(String),

    #[error("container '{0}' does not exist")]
    MissingContainer(String),
}

impl MongoDriverError {
    /// Whether the underlying driver error is MongoDB's `WriteConflict`
    /// (code 112) or a transient transaction error, the family this
    /// engine's retry policy recovers from.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Driver(err) => migrant_core::error::is_conflict_message(&err.to_string()),
            _ => false,
        }
    }
}

impl From<MongoDriverError> for migrant_core::Error {
    fn from(err: MongoDriverError) -> Self {
        migrant_core::Error::driver(err)
    }
}
