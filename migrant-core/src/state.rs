//! The in-memory database mirror and the compiled operation list a
//! [`crate::builder::Builder`] produces.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::operation::{
    Document, FABRICATED_INSTANCE_SUFFIX, INFORMATION_TYPE, Identifier, Operation,
};

/// The set of documents making up one container or one instance.
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    pub documents: HashMap<Identifier, Document>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: Identifier, doc: Document) {
        self.documents.insert(id, doc);
    }

    pub fn remove(&mut self, id: &Identifier) -> Option<Document> {
        self.documents.remove(id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// One entry in an instance's applied-migrations log (spec.md §4's
/// `_migrations` instance metadata document).
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub migration_id: String,
    pub applied_at: DateTime<Utc>,
}

/// A pure, clonable mirror of everything the migration engine can touch:
/// containers, template instances, and per-instance applied-migration
/// history.
///
/// [`crate::simulate::SimulationApplier`] operates directly on this type;
/// [`crate::database::DatabaseApplier`] keeps one as a shadow copy so it can
/// diff the live database's response against what the simulator predicted.
#[derive(Debug, Clone, Default)]
pub struct DatabaseState {
    /// Container name -> documents.
    pub containers: HashMap<String, DocumentSet>,
    /// Template name -> instance name -> documents (including the
    /// reserved `_information`/`_migrations` metadata documents).
    pub instances: HashMap<String, HashMap<String, DocumentSet>>,
    /// Template name -> instance name -> applied-migration history.
    pub history: HashMap<String, HashMap<String, Vec<HistoryEntry>>>,
}

impl DatabaseState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn container(&self, name: &str) -> Option<&DocumentSet> {
        self.containers.get(name)
    }

    pub fn container_mut(&mut self, name: &str) -> Option<&mut DocumentSet> {
        self.containers.get_mut(name)
    }

    pub fn instance(&self, template: &str, instance: &str) -> Option<&DocumentSet> {
        self.instances.get(template).and_then(|m| m.get(instance))
    }

    pub fn instance_mut(&mut self, template: &str, instance: &str) -> Option<&mut DocumentSet> {
        self.instances
            .get_mut(template)
            .and_then(|m| m.get_mut(instance))
    }

    pub fn instances_of(&self, template: &str) -> Vec<&str> {
        self.instances
            .get(template)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn record_history(&mut self, template: &str, instance: &str, entry: HistoryEntry) {
        self.history
            .entry(template.to_string())
            .or_default()
            .entry(instance.to_string())
            .or_default()
            .push(entry);
    }

    /// Structural equality ignoring history entries and any instance whose
    /// name carries [`FABRICATED_INSTANCE_SUFFIX`] - the simulator fabricates
    /// such instances purely to exercise a transform closure when no real
    /// instance exists yet, and they must not count toward drift detection
    /// (spec.md §4.4).
    pub fn states_equal(a: &DatabaseState, b: &DatabaseState) -> bool {
        fn strip_fabricated(
            instances: &HashMap<String, HashMap<String, DocumentSet>>,
        ) -> HashMap<String, Vec<&str>> {
            instances
                .iter()
                .filter_map(|(template, insts)| {
                    let mut names: Vec<&str> = insts
                        .keys()
                        .filter(|name| !name.ends_with(FABRICATED_INSTANCE_SUFFIX))
                        .map(String::as_str)
                        .collect();
                    if names.is_empty() {
                        // A template whose only instances are fabricated
                        // probes must compare equal to a template that is
                        // absent entirely - drop it rather than keep an
                        // empty entry that would make the two maps differ.
                        return None;
                    }
                    names.sort_unstable();
                    Some((template.clone(), names))
                })
                .collect()
        }

        if a.containers.len() != b.containers.len() {
            return false;
        }
        for (name, docs) in &a.containers {
            match b.containers.get(name) {
                Some(other) if documents_equal(docs, other) => {}
                _ => return false,
            }
        }

        let a_names = strip_fabricated(&a.instances);
        let b_names = strip_fabricated(&b.instances);
        if a_names != b_names {
            return false;
        }

        for (template, names) in &a_names {
            for name in names {
                let a_docs = a.instances.get(template).and_then(|m| m.get(*name));
                let b_docs = b.instances.get(template).and_then(|m| m.get(*name));
                match (a_docs, b_docs) {
                    (Some(x), Some(y)) if documents_equal(x, y) => {}
                    (None, None) => {}
                    _ => return false,
                }
            }
        }

        true
    }
}

fn documents_equal(a: &DocumentSet, b: &DocumentSet) -> bool {
    a.documents == b.documents
}

/// The ordered list of operations a [`crate::builder::Builder`] compiles
/// to, plus the migration-level `irreversible` flag spec.md §3 models as
/// `flags: Set<"irreversible">` - this engine has exactly one flag in that
/// set, so a `bool` stands in for it rather than a one-element `HashSet`.
#[derive(Clone)]
pub struct MigrationState {
    pub operations: Vec<Operation>,
    pub initial_state: DatabaseState,
    pub irreversible: bool,
}

impl MigrationState {
    pub fn new(initial_state: DatabaseState) -> Self {
        Self {
            operations: Vec::new(),
            initial_state,
            irreversible: false,
        }
    }

    pub fn with_operations(initial_state: DatabaseState, operations: Vec<Operation>) -> Self {
        Self {
            operations,
            initial_state,
            irreversible: false,
        }
    }

    /// Set by [`crate::builder::Builder`] when any transform in this
    /// migration is flagged irreversible; once set it never clears.
    pub fn mark_irreversible(&mut self) {
        self.irreversible = true;
    }

    pub fn push(&mut self, op: Operation) {
        self.operations.push(op);
    }
}

/// Build the standard `_information` metadata document for a freshly
/// created instance (spec.md §6.4: `{type, createdAt, createdByMigration,
/// schemas?}`).
pub fn information_document(
    template: &str,
    instance: &str,
    created_at: DateTime<Utc>,
    created_by_migration: &str,
) -> Document {
    serde_json::json!({
        crate::operation::DISCRIMINATOR_FIELD: INFORMATION_TYPE,
        "template": template,
        "instance": instance,
        "createdAt": created_at.to_rfc3339(),
        "createdByMigration": created_by_migration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_equal_ignores_fabricated_instances() {
        let mut a = DatabaseState::new();
        let mut b = DatabaseState::new();

        let mut a_insts = HashMap::new();
        a_insts.insert(
            format!("probe{FABRICATED_INSTANCE_SUFFIX}"),
            DocumentSet::new(),
        );
        a.instances.insert("book".into(), a_insts);

        assert!(DatabaseState::states_equal(&a, &b));

        b.instances.insert("book".into(), HashMap::new());
        assert!(DatabaseState::states_equal(&a, &b));
    }

    #[test]
    fn states_equal_detects_container_drift() {
        let mut a = DatabaseState::new();
        let mut b = DatabaseState::new();
        let mut docs = DocumentSet::new();
        docs.insert(Identifier::from("1"), serde_json::json!({"a": 1}));
        a.containers.insert("users".into(), docs);
        b.containers.insert("users".into(), DocumentSet::new());
        assert!(!DatabaseState::states_equal(&a, &b));
    }
}
