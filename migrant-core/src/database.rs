//! The abstract `Driver` contract a backend crate implements, and the
//! generic [`DatabaseApplier`] that drives any `Driver` through the same
//! retry, index-diffing, and schema-sync logic regardless of which
//! document database sits underneath.
//!
//! This generalizes `tern_core::context::Executor`'s SQL-specific
//! migration contract (`execute`, `fetch_history`) to document-database
//! primitives: inserting/deleting documents, enumerating containers and
//! instances, and reconciling indexes and validators.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;

use crate::applier::Applier;
use crate::error::{Error, MigrantResult};
use crate::operation::{
    Document, Identifier, IndexSpec, Operation, DISCRIMINATOR_FIELD, INFORMATION_TYPE,
    MIGRATIONS_TYPE,
};
use crate::queue::{Priority, QueueConfig, TaskQueue};
use crate::retry::RetryPolicy;
use crate::schema::{SchemaBundle, Validator};
use crate::state::{information_document, DatabaseState};

/// Default name of the reserved bookkeeping container holding one record
/// per applied migration (spec.md §6.4; configurable via
/// [`DatabaseApplier::with_migration_state_container`]).
pub const DEFAULT_MIGRATION_STATE_CONTAINER: &str = "migration_state";

/// The primitive operations a concrete document database must expose.
///
/// Every method that can race with a concurrent writer returns an `Error`
/// classified by [`crate::error::is_conflict_message`] so [`RetryPolicy`]
/// can recover from it; `DatabaseApplier` never inspects driver-specific
/// error types directly.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn create_container(&self, name: &str) -> MigrantResult<()>;
    async fn drop_container(&self, name: &str) -> MigrantResult<()>;
    async fn list_containers(&self) -> MigrantResult<Vec<String>>;

    async fn insert_documents(&self, container: &str, docs: Vec<(Identifier, Document)>) -> MigrantResult<()>;
    async fn delete_documents_by_id(&self, container: &str, ids: &[Identifier]) -> MigrantResult<()>;
    async fn read_all_documents(&self, container: &str) -> MigrantResult<Vec<(Identifier, Document)>>;
    async fn write_all_documents(&self, container: &str, docs: Vec<(Identifier, Document)>) -> MigrantResult<()>;

    async fn list_instances_of_template(&self, template: &str) -> MigrantResult<Vec<String>>;

    async fn get_validator(&self, container: &str) -> MigrantResult<Option<Validator>>;
    async fn set_validator(&self, container: &str, validator: Option<&Validator>) -> MigrantResult<()>;

    async fn list_indexes(&self, container: &str) -> MigrantResult<Vec<IndexSpec>>;
    async fn create_index(&self, container: &str, spec: &IndexSpec) -> MigrantResult<()>;
    async fn drop_index(&self, container: &str, name: &str) -> MigrantResult<()>;
}

/// The instance-container naming convention this applier imposes on top of
/// a `Driver`'s flat containers: a template/instance pair is stored as the
/// container named `"{template}__{instance}"`.
fn instance_container_name(template: &str, instance: &str) -> String {
    format!("{template}__{instance}")
}

/// Drives any [`Driver`] through the shared operation semantics, wrapping
/// conflict-prone calls in [`RetryPolicy`] and maintaining a
/// [`DatabaseState`] shadow so index/schema diffing can compare against
/// what was last observed rather than re-reading the database on every
/// call.
pub struct DatabaseApplier<D: Driver> {
    driver: D,
    retry: RetryPolicy,
    shadow: DatabaseState,
    current_migration_id: String,
    index_concurrency: usize,
    index_task_timeout: Option<Duration>,
    index_retry_attempts: usize,
    index_retry_delay: Duration,
    migration_state_container: String,
}

/// Default ceiling on concurrent index creates/drops per
/// [`DatabaseApplier::synchronize_indexes`] call (spec.md §4.5).
const DEFAULT_INDEX_CONCURRENCY: usize = 3;

impl<D: Driver> DatabaseApplier<D> {
    pub fn new(driver: D, retry: RetryPolicy) -> Self {
        Self {
            driver,
            retry,
            shadow: DatabaseState::new(),
            current_migration_id: String::new(),
            index_concurrency: DEFAULT_INDEX_CONCURRENCY,
            index_task_timeout: None,
            index_retry_attempts: 0,
            index_retry_delay: Duration::ZERO,
            migration_state_container: DEFAULT_MIGRATION_STATE_CONTAINER.to_string(),
        }
    }

    /// Override the bounded-concurrency ceiling used when reconciling
    /// indexes. Spec default is 3; callers driving a database with its own
    /// connection-pool limits may want to tune this.
    pub fn with_index_concurrency(mut self, ceiling: usize) -> Self {
        self.index_concurrency = ceiling.max(1);
        self
    }

    /// Race each index create/drop against a per-task wall-clock timeout
    /// (spec.md §4.8); `None` (the default) never times one out.
    pub fn with_index_task_timeout(mut self, timeout: Duration) -> Self {
        self.index_task_timeout = Some(timeout);
        self
    }

    /// Enable the queue's optional retry-and-requeue for index creates/drops
    /// that fail without timing out (spec.md §4.8): up to `attempts` extra
    /// tries, `delay` apart. `attempts = 0` (the default) disables it, same
    /// as never calling this.
    pub fn with_index_retry(mut self, attempts: usize, delay: Duration) -> Self {
        self.index_retry_attempts = attempts;
        self.index_retry_delay = delay;
        self
    }

    /// Override the name of the reserved bookkeeping container used by
    /// [`Applier::record_migration_applied`]/[`Applier::record_migration_reverted`].
    pub fn with_migration_state_container(mut self, name: impl Into<String>) -> Self {
        self.migration_state_container = name.into();
        self
    }

    /// Read back an instance's `createdByMigration` stamp, if present, so
    /// fan-out transforms can skip instances created at or after the
    /// migration under consideration (spec.md §4.5).
    async fn instance_created_by(&self, container: &str) -> MigrantResult<Option<String>> {
        let docs = self.driver.read_all_documents(container).await?;
        Ok(docs.iter().find_map(|(_, doc)| {
            if doc.get(DISCRIMINATOR_FIELD).and_then(|v| v.as_str()) == Some(INFORMATION_TYPE) {
                doc.get("createdByMigration")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            } else {
                None
            }
        }))
    }

    /// Exclude instances created by a migration that comes strictly after
    /// the one currently in flight (spec.md §4.5's fan-out filter) - an
    /// instance created earlier in the *same* migration is kept, since
    /// operations within a migration run in order and it already exists by
    /// the time a later operation in that migration fans out to it. An
    /// instance with no recorded stamp is treated as pre-existing and
    /// always included.
    async fn filter_instances_created_before_current(
        &self,
        template: &str,
        instances: Vec<String>,
    ) -> MigrantResult<Vec<String>> {
        if self.current_migration_id.is_empty() {
            return Ok(instances);
        }
        let mut kept = Vec::with_capacity(instances.len());
        for instance in instances {
            let container = instance_container_name(template, &instance);
            let created_by = self.instance_created_by(&container).await?;
            let keep = match created_by {
                Some(id) => id.as_str() <= self.current_migration_id.as_str(),
                None => true,
            };
            if keep {
                kept.push(instance);
            }
        }
        Ok(kept)
    }

    /// Append `{id, appliedAt}` to an instance container's `_migrations`
    /// log (spec.md §4.5/§6.4).
    async fn append_migration_log_entry(&self, container: &str) -> MigrantResult<()> {
        if self.current_migration_id.is_empty() {
            return Ok(());
        }
        let mut docs = self.driver.read_all_documents(container).await?;
        let mut touched = false;
        for (_, doc) in docs.iter_mut() {
            if doc.get(DISCRIMINATOR_FIELD).and_then(|v| v.as_str()) == Some(MIGRATIONS_TYPE) {
                let entry = serde_json::json!({
                    "id": self.current_migration_id,
                    "appliedAt": Utc::now().to_rfc3339(),
                });
                match doc.get_mut("appliedMigrations").and_then(|v| v.as_array_mut()) {
                    Some(arr) => arr.push(entry),
                    None => doc["appliedMigrations"] = serde_json::json!([entry]),
                }
                touched = true;
            }
        }
        if touched {
            self.with_retry(|| self.driver.write_all_documents(container, docs.clone()))
                .await?;
        }
        Ok(())
    }

    /// Wrap a data-plane call in the write-conflict retry policy. DDL-class
    /// calls (`create_container`, `drop_container`, index creation/drop)
    /// call the `Driver` directly instead, per spec.md §4.5: "DDL-class
    /// calls are not retried by this wrapper" - most databases disallow
    /// retrying schema changes transactionally the way a document write can
    /// be retried.
    async fn with_retry<F, Fut, T>(&self, op: F) -> MigrantResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = MigrantResult<T>>,
    {
        self.retry
            .run(
                |attempt, err| {
                    log::warn!(attempt = attempt, error:% = err; "retrying after write conflict");
                },
                op,
            )
            .await
    }

    /// Reconcile `container`'s live indexes with `spec`, creating missing
    /// ones and dropping ones no longer declared. Comparison is by
    /// [`IndexSpec::normalized`] value, not name alone, so renaming a field
    /// within an otherwise-identical index is detected as a real change
    /// (spec.md §4.5).
    ///
    /// Submitted through [`TaskQueue`] bounded by
    /// [`Self::with_index_concurrency`] (default
    /// [`DEFAULT_INDEX_CONCURRENCY`]) rather than awaited directly, per
    /// spec.md §4.5/§4.8: "index creation is submitted through the
    /// bounded-concurrency queue". The operation only returns once every
    /// submitted drop/create has drained.
    async fn synchronize_indexes(&self, container: &str, spec: &[IndexSpec]) -> MigrantResult<()> {
        let existing = self.driver.list_indexes(container).await?;
        let existing_norm: Vec<_> = existing.iter().map(IndexSpec::normalized).collect();
        let desired_norm: Vec<_> = spec.iter().map(IndexSpec::normalized).collect();

        let to_drop: Vec<String> = existing
            .iter()
            .filter(|idx| !desired_norm.contains(&idx.normalized()))
            .map(|idx| idx.name.clone())
            .collect();
        let to_create: Vec<IndexSpec> = spec
            .iter()
            .filter(|idx| !existing_norm.contains(&idx.normalized()))
            .cloned()
            .collect();

        if to_drop.is_empty() && to_create.is_empty() {
            return Ok(());
        }

        let queue: TaskQueue<IndexTask> = TaskQueue::new(QueueConfig {
            max_concurrency: self.index_concurrency,
            retry_attempts: self.index_retry_attempts,
            retry_delay: self.index_retry_delay,
        });
        // Drops run ahead of creates (higher priority) so a rename backed
        // by the same index name never collides mid-reconciliation.
        for name in to_drop {
            queue
                .push_timed(IndexTask::Drop(name), Priority(1), self.index_task_timeout)
                .await;
        }
        for idx in to_create {
            queue
                .push_timed(IndexTask::Create(idx), Priority(0), self.index_task_timeout)
                .await;
        }

        let workers = (0..self.index_concurrency).map(|_| async {
            let mut first_err: Option<Error> = None;
            while let Some((task, timeout, permit)) = queue.acquire_timed().await {
                let priority = task.priority();
                let op = async {
                    match &task {
                        IndexTask::Drop(name) => self.driver.drop_index(container, name).await,
                        IndexTask::Create(idx) => self.driver.create_index(container, idx).await,
                    }
                };
                let (result, timed_out) = match timeout {
                    Some(d) => match tokio::time::timeout(d, op).await {
                        Ok(r) => (r, false),
                        Err(_) => (Err(Error::Timeout(d)), true),
                    },
                    None => (op.await, false),
                };
                match result {
                    Ok(()) => permit.finish(false).await,
                    Err(err) => {
                        let requeued = permit.retry_or_finish(task, priority, timeout, timed_out).await;
                        if !requeued && first_err.is_none() {
                            first_err = Some(err);
                        }
                    }
                }
            }
            first_err
        });

        for result in join_all(workers).await {
            if let Some(err) = result {
                return Err(err);
            }
        }
        Ok(())
    }
}

/// One unit of work submitted to the index-synchronization [`TaskQueue`].
enum IndexTask {
    Drop(String),
    Create(IndexSpec),
}

impl IndexTask {
    /// Same ordering used on first submission: drops ahead of creates, so a
    /// requeued retry does not jump a still-pending drop of the same name.
    fn priority(&self) -> Priority {
        match self {
            IndexTask::Drop(_) => Priority(1),
            IndexTask::Create(_) => Priority(0),
        }
    }
}

#[async_trait]
impl<D: Driver> Applier for DatabaseApplier<D> {
    async fn apply_operation(&mut self, operation: &Operation) -> MigrantResult<()> {
        match operation {
            Operation::CreateContainer(op) => {
                self.driver.create_container(&op.container).await?;
                self.shadow.containers.entry(op.container.clone()).or_default();
                Ok(())
            }
            Operation::SeedContainer(op) => {
                let docs: Vec<_> = op
                    .documents
                    .iter()
                    .map(|d| {
                        let id = crate::operation::explicit_document_id(d)
                            .unwrap_or_else(|| Identifier::generate(&op.container));
                        (id, d.clone())
                    })
                    .collect();
                self.with_retry(|| self.driver.insert_documents(&op.container, docs.clone()))
                    .await?;
                let set = self.shadow.containers.entry(op.container.clone()).or_default();
                for (id, doc) in docs {
                    set.insert(id, doc);
                }
                Ok(())
            }
            Operation::TransformContainer(op) => {
                let existing = self.driver.read_all_documents(&op.container).await?;
                let mut transformed = Vec::with_capacity(existing.len());
                for (id, doc) in existing {
                    transformed.push((id, (op.up)(&doc)?));
                }
                self.with_retry(|| self.driver.write_all_documents(&op.container, transformed.clone()))
                    .await?;
                Ok(())
            }
            Operation::CreateInstance(op) => {
                let container = instance_container_name(&op.template, &op.instance);
                self.driver.create_container(&container).await?;
                let info = information_document(
                    &op.template,
                    &op.instance,
                    Utc::now(),
                    &self.current_migration_id,
                );
                let migrations_log = serde_json::json!({
                    DISCRIMINATOR_FIELD: MIGRATIONS_TYPE,
                    "appliedMigrations": [],
                });
                let docs = vec![
                    (Identifier::generate(INFORMATION_TYPE), info),
                    (Identifier::generate(MIGRATIONS_TYPE), migrations_log),
                ];
                self.with_retry(|| self.driver.insert_documents(&container, docs.clone()))
                    .await?;
                Ok(())
            }
            Operation::SeedInstance(op) => {
                let container = instance_container_name(&op.template, &op.instance);
                let docs: Vec<_> = op
                    .documents
                    .iter()
                    .map(|d| {
                        let mut d = d.clone();
                        if d.get(DISCRIMINATOR_FIELD).is_none() {
                            d[DISCRIMINATOR_FIELD] = serde_json::Value::String(op.type_name.clone());
                        }
                        let id = crate::operation::explicit_document_id(&d)
                            .unwrap_or_else(|| Identifier::generate(&op.type_name));
                        (id, d)
                    })
                    .collect();
                self.with_retry(|| self.driver.insert_documents(&container, docs.clone()))
                    .await?;
                self.append_migration_log_entry(&container).await?;
                Ok(())
            }
            Operation::TransformInstanceType(op) => {
                let instances = self.driver.list_instances_of_template(&op.template).await?;
                let instances = self
                    .filter_instances_created_before_current(&op.template, instances)
                    .await?;
                for instance in instances {
                    let container = instance_container_name(&op.template, &instance);
                    let existing = self.driver.read_all_documents(&container).await?;
                    let mut transformed = Vec::new();
                    let mut any_matched = false;
                    for (id, doc) in existing {
                        let matches = doc.get(DISCRIMINATOR_FIELD).and_then(|v| v.as_str())
                            == Some(op.type_name.as_str());
                        if matches {
                            any_matched = true;
                            transformed.push((id, (op.up)(&doc)?));
                        } else {
                            transformed.push((id, doc));
                        }
                    }
                    self.with_retry(|| self.driver.write_all_documents(&container, transformed.clone()))
                        .await?;
                    if any_matched {
                        self.append_migration_log_entry(&container).await?;
                    }
                }
                Ok(())
            }
            Operation::UpdateIndexes(op) => {
                self.synchronize_indexes(&op.container, &op.index_spec).await
            }
        }
    }

    async fn apply_reverse_operation(&mut self, operation: &Operation) -> MigrantResult<()> {
        match operation {
            Operation::CreateContainer(op) => {
                self.driver.drop_container(&op.container).await
            }
            Operation::SeedContainer(op) => {
                let ids: Vec<Identifier> = op
                    .documents
                    .iter()
                    .filter_map(crate::operation::explicit_document_id)
                    .collect();
                if ids.is_empty() {
                    return Ok(());
                }
                self.with_retry(|| self.driver.delete_documents_by_id(&op.container, &ids))
                    .await?;
                if let Some(set) = self.shadow.containers.get_mut(&op.container) {
                    for id in &ids {
                        set.remove(id);
                    }
                }
                Ok(())
            }
            Operation::TransformContainer(op) => {
                let Some(down) = &op.down else {
                    return Err(Error::IrreversibleTransform {
                        container: op.container.clone(),
                        source: Box::new(Error::Other("no down transform supplied".into())),
                    });
                };
                let existing = self.driver.read_all_documents(&op.container).await?;
                let mut transformed = Vec::with_capacity(existing.len());
                for (id, doc) in existing {
                    transformed.push((id, down(&doc)?));
                }
                self.with_retry(|| self.driver.write_all_documents(&op.container, transformed.clone()))
                    .await
            }
            Operation::CreateInstance(op) => {
                let container = instance_container_name(&op.template, &op.instance);
                self.driver.drop_container(&container).await
            }
            Operation::SeedInstance(op) => {
                let ids: Vec<Identifier> = op
                    .documents
                    .iter()
                    .filter_map(crate::operation::explicit_document_id)
                    .collect();
                if ids.is_empty() {
                    return Ok(());
                }
                let container = instance_container_name(&op.template, &op.instance);
                self.with_retry(|| self.driver.delete_documents_by_id(&container, &ids))
                    .await
            }
            Operation::TransformInstanceType(op) => {
                let Some(down) = &op.down else {
                    return Err(Error::IrreversibleTransform {
                        container: op.template.clone(),
                        source: Box::new(Error::Other("no down transform supplied".into())),
                    });
                };
                let instances = self.driver.list_instances_of_template(&op.template).await?;
                let instances = self
                    .filter_instances_created_before_current(&op.template, instances)
                    .await?;
                for instance in instances {
                    let container = instance_container_name(&op.template, &instance);
                    let existing = self.driver.read_all_documents(&container).await?;
                    let mut transformed = Vec::new();
                    for (id, doc) in existing {
                        let matches = doc.get(DISCRIMINATOR_FIELD).and_then(|v| v.as_str())
                            == Some(op.type_name.as_str());
                        if matches {
                            transformed.push((id, down(&doc)?));
                        } else {
                            transformed.push((id, doc));
                        }
                    }
                    self.with_retry(|| self.driver.write_all_documents(&container, transformed.clone()))
                        .await?;
                }
                Ok(())
            }
            Operation::UpdateIndexes(_) => Ok(()),
        }
    }

    async fn synchronize_schemas(&mut self, schemas: &SchemaBundle) -> MigrantResult<()> {
        for (container, validator) in &schemas.containers {
            self.driver.set_validator(container, Some(validator)).await?;
        }
        for (template, by_type) in &schemas.templates {
            for (type_name, _validator) in by_type {
                log::debug!(template = template, type_name = type_name; "schema sync for instance type left to caller's per-type convention");
            }
        }
        Ok(())
    }

    fn set_current_migration_id(&mut self, id: &str) {
        self.current_migration_id = id.to_string();
    }

    async fn record_migration_applied(&mut self, id: &str, name: &str) -> MigrantResult<()> {
        let container = self.migration_state_container.clone();
        self.driver.create_container(&container).await?;
        let record = serde_json::json!({
            "id": id,
            "name": name,
            "appliedAt": Utc::now().to_rfc3339(),
        });
        self.with_retry(|| {
            self.driver
                .insert_documents(&container, vec![(Identifier::from(id), record.clone())])
        })
        .await
    }

    async fn record_migration_reverted(&mut self, id: &str) -> MigrantResult<()> {
        let container = self.migration_state_container.clone();
        let mut docs = self.driver.read_all_documents(&container).await?;
        let mut touched = false;
        for (doc_id, doc) in docs.iter_mut() {
            if doc_id.as_str() == id {
                doc["revertedAt"] = serde_json::Value::String(Utc::now().to_rfc3339());
                touched = true;
            }
        }
        if touched {
            self.with_retry(|| self.driver.write_all_documents(&container, docs.clone()))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockDriver {
        containers: Mutex<Vec<String>>,
        documents: Mutex<std::collections::HashMap<String, Vec<(Identifier, Document)>>>,
        indexes: Mutex<std::collections::HashMap<String, Vec<IndexSpec>>>,
        index_creates: std::sync::atomic::AtomicU32,
        index_drops: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Driver for MockDriver {
        async fn create_container(&self, name: &str) -> MigrantResult<()> {
            self.containers.lock().unwrap().push(name.to_string());
            Ok(())
        }
        async fn drop_container(&self, name: &str) -> MigrantResult<()> {
            self.containers.lock().unwrap().retain(|c| c != name);
            Ok(())
        }
        async fn list_containers(&self) -> MigrantResult<Vec<String>> {
            Ok(self.containers.lock().unwrap().clone())
        }
        async fn insert_documents(&self, container: &str, docs: Vec<(Identifier, Document)>) -> MigrantResult<()> {
            self.documents
                .lock()
                .unwrap()
                .entry(container.to_string())
                .or_default()
                .extend(docs);
            Ok(())
        }
        async fn delete_documents_by_id(&self, container: &str, ids: &[Identifier]) -> MigrantResult<()> {
            if let Some(docs) = self.documents.lock().unwrap().get_mut(container) {
                docs.retain(|(id, _)| !ids.contains(id));
            }
            Ok(())
        }
        async fn read_all_documents(&self, container: &str) -> MigrantResult<Vec<(Identifier, Document)>> {
            Ok(self
                .documents
                .lock()
                .unwrap()
                .get(container)
                .cloned()
                .unwrap_or_default())
        }
        async fn write_all_documents(&self, container: &str, docs: Vec<(Identifier, Document)>) -> MigrantResult<()> {
            self.documents.lock().unwrap().insert(container.to_string(), docs);
            Ok(())
        }
        async fn list_instances_of_template(&self, template: &str) -> MigrantResult<Vec<String>> {
            let prefix = format!("{template}__");
            Ok(self
                .containers
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
                .collect())
        }
        async fn get_validator(&self, _container: &str) -> MigrantResult<Option<Validator>> {
            Ok(None)
        }
        async fn set_validator(&self, _container: &str, _validator: Option<&Validator>) -> MigrantResult<()> {
            Ok(())
        }
        async fn list_indexes(&self, container: &str) -> MigrantResult<Vec<IndexSpec>> {
            Ok(self.indexes.lock().unwrap().get(container).cloned().unwrap_or_default())
        }
        async fn create_index(&self, container: &str, spec: &IndexSpec) -> MigrantResult<()> {
            self.index_creates.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.indexes
                .lock()
                .unwrap()
                .entry(container.to_string())
                .or_default()
                .push(spec.clone());
            Ok(())
        }
        async fn drop_index(&self, container: &str, name: &str) -> MigrantResult<()> {
            self.index_drops.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if let Some(indexes) = self.indexes.lock().unwrap().get_mut(container) {
                indexes.retain(|idx| idx.name != name);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn create_and_seed_container_roundtrip() {
        let mut applier = DatabaseApplier::new(MockDriver::default(), RetryPolicy::new(Default::default()));
        applier
            .apply_operation(&Operation::CreateContainer(crate::operation::CreateContainer {
                container: "books".into(),
            }))
            .await
            .unwrap();
        applier
            .apply_operation(&Operation::SeedContainer(crate::operation::SeedContainer {
                container: "books".into(),
                documents: vec![serde_json::json!({"title": "Dune"})],
            }))
            .await
            .unwrap();
        let docs = applier.driver.read_all_documents("books").await.unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn reverse_of_transform_without_down_errors() {
        let mut applier = DatabaseApplier::new(MockDriver::default(), RetryPolicy::new(Default::default()));
        let op = Operation::TransformContainer(crate::operation::TransformContainer {
            container: "books".into(),
            up: std::sync::Arc::new(|d| Ok(d.clone())),
            down: None,
        });
        let result = applier.apply_reverse_operation(&op).await;
        assert!(matches!(result, Err(Error::IrreversibleTransform { .. })));
    }

    #[tokio::test]
    async fn seed_container_reverse_deletes_by_explicit_id() {
        let mut applier = DatabaseApplier::new(MockDriver::default(), RetryPolicy::new(Default::default()));
        applier
            .apply_operation(&Operation::CreateContainer(crate::operation::CreateContainer {
                container: "users".into(),
            }))
            .await
            .unwrap();
        let seed = Operation::SeedContainer(crate::operation::SeedContainer {
            container: "users".into(),
            documents: vec![serde_json::json!({"_id": "a"}), serde_json::json!({"_id": "b"})],
        });
        applier.apply_operation(&seed).await.unwrap();
        assert_eq!(applier.driver.read_all_documents("users").await.unwrap().len(), 2);

        applier.apply_reverse_operation(&seed).await.unwrap();
        assert_eq!(applier.driver.read_all_documents("users").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn record_migration_applied_then_reverted() {
        let mut applier = DatabaseApplier::new(MockDriver::default(), RetryPolicy::new(Default::default()));
        applier.record_migration_applied("m1", "create books").await.unwrap();
        let recorded = applier
            .driver
            .read_all_documents(DEFAULT_MIGRATION_STATE_CONTAINER)
            .await
            .unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].1.get("revertedAt").is_none());

        applier.record_migration_reverted("m1").await.unwrap();
        let recorded = applier
            .driver
            .read_all_documents(DEFAULT_MIGRATION_STATE_CONTAINER)
            .await
            .unwrap();
        assert!(recorded[0].1.get("revertedAt").is_some());
    }

    #[tokio::test]
    async fn transform_instance_type_skips_instances_created_at_or_after_current_migration() {
        let mut applier = DatabaseApplier::new(MockDriver::default(), RetryPolicy::new(Default::default()));

        applier.set_current_migration_id("m1");
        applier
            .apply_operation(&Operation::CreateInstance(crate::operation::CreateInstance {
                template: "catalog".into(),
                instance: "early".into(),
            }))
            .await
            .unwrap();

        applier.set_current_migration_id("m2");
        applier
            .apply_operation(&Operation::CreateInstance(crate::operation::CreateInstance {
                template: "catalog".into(),
                instance: "late".into(),
            }))
            .await
            .unwrap();

        let seed_type = "book".to_string();
        for instance in ["early", "late"] {
            applier
                .apply_operation(&Operation::SeedInstance(crate::operation::SeedInstance {
                    template: "catalog".into(),
                    instance: instance.into(),
                    type_name: seed_type.clone(),
                    documents: vec![serde_json::json!({"title": "Dune"})],
                }))
                .await
                .unwrap();
        }

        // m1's own transform must not touch the "late" instance, which was
        // created by a migration that comes after it.
        applier.set_current_migration_id("m1");
        applier
            .apply_operation(&Operation::TransformInstanceType(crate::operation::TransformInstanceType {
                template: "catalog".into(),
                type_name: seed_type.clone(),
                up: std::sync::Arc::new(|d| {
                    let mut d = d.clone();
                    d["isbn"] = serde_json::Value::String("000-0000000000".into());
                    Ok(d)
                }),
                down: None,
            }))
            .await
            .unwrap();

        let early_docs = applier
            .driver
            .read_all_documents(&instance_container_name("catalog", "early"))
            .await
            .unwrap();
        let late_docs = applier
            .driver
            .read_all_documents(&instance_container_name("catalog", "late"))
            .await
            .unwrap();

        assert!(early_docs.iter().any(|(_, d)| d.get("isbn").is_some()));
        assert!(late_docs.iter().all(|(_, d)| d.get("isbn").is_none()));
    }

    #[tokio::test]
    async fn update_indexes_is_idempotent_on_second_run() {
        use std::sync::atomic::Ordering;

        let applier = DatabaseApplier::new(MockDriver::default(), RetryPolicy::new(Default::default()));
        let spec = vec![IndexSpec::new(
            "by_email",
            vec![crate::operation::IndexKeyField {
                field: "email".into(),
                descending: false,
            }],
        )
        .unique()];

        applier.synchronize_indexes("users", &spec).await.unwrap();
        assert_eq!(applier.driver.index_creates.load(Ordering::SeqCst), 1);
        assert_eq!(applier.driver.index_drops.load(Ordering::SeqCst), 0);

        applier.synchronize_indexes("users", &spec).await.unwrap();
        assert_eq!(applier.driver.index_creates.load(Ordering::SeqCst), 1);
        assert_eq!(applier.driver.index_drops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_indexes_drops_stale_and_creates_new() {
        use std::sync::atomic::Ordering;

        let applier = DatabaseApplier::new(MockDriver::default(), RetryPolicy::new(Default::default()));
        let old_spec = vec![IndexSpec::new(
            "by_email",
            vec![crate::operation::IndexKeyField {
                field: "email".into(),
                descending: false,
            }],
        )];
        applier.synchronize_indexes("users", &old_spec).await.unwrap();

        let new_spec = vec![IndexSpec::new(
            "by_name",
            vec![crate::operation::IndexKeyField {
                field: "name".into(),
                descending: false,
            }],
        )];
        applier.synchronize_indexes("users", &new_spec).await.unwrap();

        assert_eq!(applier.driver.index_creates.load(Ordering::SeqCst), 2);
        assert_eq!(applier.driver.index_drops.load(Ordering::SeqCst), 1);
        let remaining = applier.driver.list_indexes("users").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "by_name");
    }
}
