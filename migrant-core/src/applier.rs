//! The `Applier` contract both the simulation applier and the database
//! applier implement, so a [`crate::runner::Runner`] can run the same
//! operation list against either without caring which it holds.

use async_trait::async_trait;

use crate::error::MigrantResult;
use crate::operation::Operation;
use crate::schema::SchemaBundle;

/// Applies operations to a database (real or simulated) one at a time.
///
/// `&mut self` because both implementations hold mutable state (the
/// simulator its [`crate::state::DatabaseState`] mirror, the database
/// applier its shadow copy and its retry bookkeeping); `async_trait` is
/// used here specifically so this can be stored as `Box<dyn Applier>` in
/// [`crate::runner::Runner`] - a plain `async fn` in a trait isn't
/// dyn-safe.
#[async_trait]
pub trait Applier: Send + Sync {
    /// Apply one operation forward.
    async fn apply_operation(&mut self, operation: &Operation) -> MigrantResult<()>;

    /// Apply one operation's reverse. Callers only invoke this for
    /// operations where [`Operation::has_down`] holds, or where the
    /// operation kind has a well-defined no-op/structural reverse
    /// (`create_container`, `create_instance`, `update_indexes`).
    async fn apply_reverse_operation(&mut self, operation: &Operation) -> MigrantResult<()>;

    /// Reconcile live server-side validators with `schemas`, called before
    /// the first operation of a migration and before the first reverse
    /// operation of a rollback (spec.md §4.5's schema-sync rule).
    async fn synchronize_schemas(&mut self, schemas: &SchemaBundle) -> MigrantResult<()>;

    /// Record which migration is in flight, for history bookkeeping and
    /// for diagnostic logging.
    fn set_current_migration_id(&mut self, id: &str);

    /// Persist a `{id, name, appliedAt}` bookkeeping record once a migration
    /// has fully succeeded (spec.md §6.4's `migration_state` container).
    /// Default no-op: the in-memory simulator has no persisted bookkeeping
    /// container to write to, since its whole point is that it never
    /// outlives the process that built it.
    async fn record_migration_applied(&mut self, _id: &str, _name: &str) -> MigrantResult<()> {
        Ok(())
    }

    /// Mark a previously-applied migration's bookkeeping record as reverted
    /// (spec.md §6.4: "on revert it updates `revertedAt`").
    async fn record_migration_reverted(&mut self, _id: &str) -> MigrantResult<()> {
        Ok(())
    }
}
