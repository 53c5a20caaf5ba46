//! Error type for the migration engine.

use std::error::Error as StdError;

/// Alias for a result whose error type is [`Error`].
pub type MigrantResult<T> = Result<T, Error>;

type BoxDynError = Box<dyn StdError + Send + Sync + 'static>;

/// All the ways a chain, a migration, or an operation can fail.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The chain of migration definitions is structurally invalid: a
    /// duplicate id, a broken parent link, a cycle, or a malformed id.
    #[error("chain is invalid: {0}")]
    ChainInvalid(String),

    /// The chain exceeds a configured maximum depth.
    #[error("chain depth {depth} exceeds configured maximum {max}")]
    ChainTooDeep {
        /// The observed depth.
        depth: usize,
        /// The configured ceiling.
        max: usize,
    },

    /// Pre- or post-execution validation rejected a migration.
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    /// An operation exceeded its configured deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The run was cancelled before completion.
    #[error("run was cancelled")]
    Cancelled,

    /// An error surfaced by the underlying database driver.
    #[error("driver error: {0}")]
    Driver(#[source] BoxDynError),

    /// An operation referenced a container or instance that does not exist
    /// and strict mode required it to.
    #[error("missing target '{target}' for operation {operation}")]
    MissingTarget {
        /// The container or instance name that was missing.
        target: String,
        /// The operation tag that referenced it.
        operation: String,
    },

    /// The reverse side of a user-supplied transform raised an error.
    #[error("irreversible transform on container '{container}': {source}")]
    IrreversibleTransform {
        /// The container or template the transform targeted.
        container: String,
        /// The underlying failure.
        #[source]
        source: BoxDynError,
    },

    /// A retriable error was classified as such on every attempt until the
    /// retry budget was exhausted.
    #[error("conflict retries exhausted after {attempts} attempts: {source}")]
    ConflictExhausted {
        /// Number of attempts made, including the first.
        attempts: u32,
        /// The last underlying error observed.
        #[source]
        source: BoxDynError,
    },

    /// A queue was cleared while tasks were still pending.
    #[error("queue was cleared with {pending} task(s) still pending")]
    QueueCleared {
        /// Number of tasks rejected by the clear.
        pending: usize,
    },

    /// A user-supplied `up`/`down` closure raised an error.
    #[error("transform raised an error: {0}")]
    Transform(#[source] BoxDynError),

    /// Catch-all for conditions not covered by a more specific variant.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a foreign error as a [`Error::Driver`].
    pub fn driver<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Driver(Box::new(err))
    }

    /// Wrap a foreign error as a [`Error::Transform`].
    pub fn transform<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Transform(Box::new(err))
    }

    /// Build a [`Error::MissingTarget`].
    pub fn missing_target(target: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::MissingTarget {
            target: target.into(),
            operation: operation.into(),
        }
    }

    /// Build a [`Error::ChainInvalid`].
    pub fn chain_invalid(msg: impl Into<String>) -> Self {
        Self::ChainInvalid(msg.into())
    }

    /// Build a [`Error::ValidationFailed`].
    pub fn validation_failed(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    /// Whether this error belongs to the write-conflict family that the
    /// retry policy recovers from. Centralized here so backend crates can
    /// extend classification without duplicating the taxonomy.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Driver(source) if is_conflict_message(&source.to_string()))
    }
}

/// Message-substring classification shared by the retry policy and any
/// `Driver` implementation that wants to pre-classify its own errors before
/// wrapping them as [`Error::Driver`].
pub fn is_conflict_message(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    ["write conflict", "conflict", "WriteConflict", "112"]
        .iter()
        .any(|needle| lower.contains(&needle.to_lowercase()))
        && !lower.contains("no such element")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_matches_write_conflict_family() {
        assert!(is_conflict_message("WriteConflict: transient transaction"));
        assert!(is_conflict_message("operation failed: conflict detected"));
        assert!(!is_conflict_message("no such element found"));
        assert!(!is_conflict_message("connection refused"));
    }

    #[test]
    fn missing_target_display_includes_both_fields() {
        let err = Error::missing_target("users", "seed_container");
        let msg = err.to_string();
        assert!(msg.contains("users"));
        assert!(msg.contains("seed_container"));
    }
}
