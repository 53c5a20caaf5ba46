//! A pure, in-memory mirror applier used for dry runs and for the
//! [`crate::validate::SimulationValidator`]'s ancestor replay.

use async_trait::async_trait;
use chrono::Utc;

use crate::applier::Applier;
use crate::error::{Error, MigrantResult};
use crate::operation::{
    Document, FABRICATED_INSTANCE_SUFFIX, Identifier, MIGRATIONS_TYPE, Operation,
};
use crate::schema::SchemaBundle;
use crate::state::{DatabaseState, HistoryEntry, information_document};

/// Whether missing targets are an error or silently skipped.
///
/// Lenient mode exists for the simulation validator's own bookkeeping
/// (spec.md §4.4 permits a dry run over a migration whose container
/// doesn't exist yet in the *simulated* state, provided an earlier
/// operation in the same migration created it); strict mode is what a
/// bare dry run against a caller-supplied initial state uses, and what
/// [`crate::database::DatabaseApplier`] always uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingTargetMode {
    Strict,
    Lenient,
}

/// A pure interpreter of [`Operation`]s over a [`DatabaseState`] mirror.
///
/// No I/O, no retries, no timeouts - every call either mutates `state`
/// immediately and returns `Ok(())`, or returns `Err` without touching
/// `state` at all.
pub struct SimulationApplier {
    pub state: DatabaseState,
    mode: MissingTargetMode,
    current_migration_id: String,
}

impl SimulationApplier {
    pub fn new(state: DatabaseState, mode: MissingTargetMode) -> Self {
        Self {
            state,
            mode,
            current_migration_id: String::new(),
        }
    }

    fn missing(&self, target: &str, op: &str) -> MigrantResult<()> {
        match self.mode {
            MissingTargetMode::Strict => Err(Error::missing_target(target, op)),
            MissingTargetMode::Lenient => Ok(()),
        }
    }

    /// Fabricate a transient instance carrying only the discriminator, so a
    /// `transform_instance_type` can be validated even when the template
    /// has no real instances yet. The fabricated instance's name never
    /// collides with a real one thanks to [`FABRICATED_INSTANCE_SUFFIX`],
    /// and [`DatabaseState::states_equal`] ignores it entirely.
    fn fabricate_probe_instance(&mut self, template: &str, type_name: &str) -> String {
        let name = format!("{type_name}{FABRICATED_INSTANCE_SUFFIX}");
        let mut docs = crate::state::DocumentSet::new();
        docs.insert(
            Identifier::generate(type_name),
            crate::schema::SchemaBundle::mock_document(type_name),
        );
        self.state
            .instances
            .entry(template.to_string())
            .or_default()
            .insert(name.clone(), docs);
        name
    }

    fn apply_transform_to_set(
        docs: &mut crate::state::DocumentSet,
        type_filter: Option<&str>,
        transform: &crate::operation::Transform,
    ) -> MigrantResult<()> {
        let ids: Vec<Identifier> = docs.documents.keys().cloned().collect();
        for id in ids {
            let current = docs.documents.get(&id).cloned().unwrap_or(Document::Null);
            if let Some(type_name) = type_filter {
                let matches = current
                    .get(crate::operation::DISCRIMINATOR_FIELD)
                    .and_then(|v| v.as_str())
                    == Some(type_name);
                if !matches {
                    continue;
                }
            }
            let transformed = transform(&current)?;
            docs.documents.insert(id, transformed);
        }
        Ok(())
    }
}

#[async_trait]
impl Applier for SimulationApplier {
    async fn apply_operation(&mut self, operation: &Operation) -> MigrantResult<()> {
        match operation {
            Operation::CreateContainer(op) => {
                self.state
                    .containers
                    .entry(op.container.clone())
                    .or_default();
                Ok(())
            }
            Operation::SeedContainer(op) => {
                let Some(docs) = self.state.container_mut(&op.container) else {
                    return self.missing(&op.container, "seed_container");
                };
                for doc in &op.documents {
                    let id = crate::operation::explicit_document_id(doc)
                        .unwrap_or_else(|| Identifier::generate(&op.container));
                    docs.insert(id, doc.clone());
                }
                Ok(())
            }
            Operation::TransformContainer(op) => {
                let Some(docs) = self.state.container_mut(&op.container) else {
                    return self.missing(&op.container, "transform_container");
                };
                Self::apply_transform_to_set(docs, None, &op.up)
            }
            Operation::CreateInstance(op) => {
                let instances = self
                    .state
                    .instances
                    .entry(op.template.clone())
                    .or_default();
                let mut docs = crate::state::DocumentSet::new();
                docs.insert(
                    Identifier::generate("_information"),
                    information_document(
                        &op.template,
                        &op.instance,
                        Utc::now(),
                        &self.current_migration_id,
                    ),
                );
                docs.insert(
                    Identifier::generate(MIGRATIONS_TYPE),
                    serde_json::json!({
                        crate::operation::DISCRIMINATOR_FIELD: MIGRATIONS_TYPE,
                        "appliedMigrations": [],
                    }),
                );
                instances.insert(op.instance.clone(), docs);
                Ok(())
            }
            Operation::SeedInstance(op) => {
                let Some(docs) = self.state.instance_mut(&op.template, &op.instance) else {
                    return self.missing(&op.instance, "seed_instance");
                };
                for doc in &op.documents {
                    let mut doc = doc.clone();
                    if doc.get(crate::operation::DISCRIMINATOR_FIELD).is_none() {
                        doc[crate::operation::DISCRIMINATOR_FIELD] =
                            serde_json::Value::String(op.type_name.clone());
                    }
                    let id = crate::operation::explicit_document_id(&doc)
                        .unwrap_or_else(|| Identifier::generate(&op.type_name));
                    docs.insert(id, doc);
                }
                Ok(())
            }
            Operation::TransformInstanceType(op) => {
                let have_any = !self.state.instances_of(&op.template).is_empty();
                if !have_any {
                    self.fabricate_probe_instance(&op.template, &op.type_name);
                }
                let names: Vec<String> = self
                    .state
                    .instances_of(&op.template)
                    .into_iter()
                    .map(String::from)
                    .collect();
                for name in names {
                    if let Some(docs) = self.state.instance_mut(&op.template, &name) {
                        Self::apply_transform_to_set(docs, Some(&op.type_name), &op.up)?;
                    }
                }
                Ok(())
            }
            Operation::UpdateIndexes(op) => {
                if self.state.container(&op.container).is_none() {
                    return self.missing(&op.container, "update_indexes");
                }
                Ok(())
            }
        }
    }

    async fn apply_reverse_operation(&mut self, operation: &Operation) -> MigrantResult<()> {
        match operation {
            Operation::CreateContainer(op) => {
                self.state.containers.remove(&op.container);
                Ok(())
            }
            Operation::SeedContainer(op) => {
                let ids: Vec<Identifier> = op
                    .documents
                    .iter()
                    .filter_map(crate::operation::explicit_document_id)
                    .collect();
                if let Some(docs) = self.state.container_mut(&op.container) {
                    for id in &ids {
                        docs.remove(id);
                    }
                    Ok(())
                } else {
                    self.missing(&op.container, "seed_container (reverse)")
                }
            }
            Operation::TransformContainer(op) => match &op.down {
                Some(down) => {
                    let Some(docs) = self.state.container_mut(&op.container) else {
                        return self.missing(&op.container, "transform_container (reverse)");
                    };
                    Self::apply_transform_to_set(docs, None, down)
                }
                None => Err(Error::IrreversibleTransform {
                    container: op.container.clone(),
                    source: Box::new(Error::Other("no down transform supplied".into())),
                }),
            },
            Operation::CreateInstance(op) => {
                if let Some(m) = self.state.instances.get_mut(&op.template) {
                    m.remove(&op.instance);
                }
                Ok(())
            }
            Operation::SeedInstance(op) => {
                let ids: Vec<Identifier> = op
                    .documents
                    .iter()
                    .filter_map(crate::operation::explicit_document_id)
                    .collect();
                if let Some(docs) = self.state.instance_mut(&op.template, &op.instance) {
                    for id in &ids {
                        docs.remove(id);
                    }
                    Ok(())
                } else {
                    self.missing(&op.instance, "seed_instance (reverse)")
                }
            }
            Operation::TransformInstanceType(op) => match &op.down {
                Some(down) => {
                    let names: Vec<String> = self
                        .state
                        .instances_of(&op.template)
                        .into_iter()
                        .map(String::from)
                        .collect();
                    for name in names {
                        if let Some(docs) = self.state.instance_mut(&op.template, &name) {
                            Self::apply_transform_to_set(docs, Some(&op.type_name), down)?;
                        }
                    }
                    Ok(())
                }
                None => Err(Error::IrreversibleTransform {
                    container: op.template.clone(),
                    source: Box::new(Error::Other("no down transform supplied".into())),
                }),
            },
            Operation::UpdateIndexes(_) => Ok(()),
        }
    }

    async fn synchronize_schemas(&mut self, _schemas: &SchemaBundle) -> MigrantResult<()> {
        // The in-memory mirror has no server-side validator concept to
        // reconcile; schema synchronization only matters for a live
        // database applier.
        Ok(())
    }

    fn set_current_migration_id(&mut self, id: &str) {
        self.current_migration_id = id.to_string();
    }
}
