//! The operation vocabulary (spec.md §3, §4.1).
//!
//! All seven operations are plain data with a `kind()` discriminator that
//! appliers dispatch on via an exhaustive match - the type system proves
//! completeness for us since [`OperationKind`] and the `match` in
//! [`crate::simulate::SimulationApplier`] and
//! [`crate::database::DatabaseApplier`] are both exhaustive.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Error;

/// A document is a JSON object. Enforced at construction boundaries by
/// [`Identifier::ensure_object`] and by the `seed_*` builder methods.
pub type Document = Value;

/// The reserved field every instance document carries to identify its type
/// within a template (spec.md Glossary: "Discriminator").
pub const DISCRIMINATOR_FIELD: &str = "_type";

/// Discriminator value reserved for an instance's type-descriptor metadata
/// document.
pub const INFORMATION_TYPE: &str = "_information";

/// Discriminator value reserved for an instance's applied-migrations log.
pub const MIGRATIONS_TYPE: &str = "_migrations";

/// Suffix marking a simulator-fabricated instance used only to validate a
/// transform when no real instance exists yet (spec.md §4.4's
/// `statesEqual` exclusion).
pub const FABRICATED_INSTANCE_SUFFIX: &str = "_test_simulation";

/// A document identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(pub String);

impl Identifier {
    /// Generate a synthetic identifier of the form `{type_name}:{uuid}`,
    /// paralleling the shape a live database would assign (spec.md §9's
    /// open question on seeded-instance-document identifiers; this engine
    /// resolves it with a real UUID rather than a bespoke random source).
    pub fn generate(type_name: &str) -> Self {
        Self(format!("{type_name}:{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The reserved field a document's identifier is read from and, for
/// auto-generated identifiers, written back into.
pub const ID_FIELD: &str = "_id";

/// Read a document's own identifier, if it carries one in [`ID_FIELD`].
///
/// `seed_container`'s reverse (spec.md §3/§4.4: "removes documents whose
/// identifier matches any in `documents`") only has the original
/// `documents` payload to work from, not a record of whatever identifier
/// the forward apply generated - so an identifier only round-trips through
/// reverse when the caller supplied one explicitly. A document seeded
/// without `_id` is logically un-reversible by identity; callers that need
/// symmetric seed/un-seed should always supply `_id`.
pub fn explicit_document_id(doc: &Document) -> Option<Identifier> {
    doc.get(ID_FIELD)
        .and_then(|v| v.as_str())
        .map(Identifier::from)
}

/// A user-supplied document transform. Exceptions the closure raises are
/// caught at the call site and converted into [`Error::Transform`]; the
/// closure itself returns a `Result` so "exceptions" are ordinary Rust
/// errors here, not panics.
pub type Transform = Arc<dyn Fn(&Document) -> Result<Document, Error> + Send + Sync>;

/// Fieldless discriminator for the seven operation tags, used for exhaustive
/// dispatch tables and for the `is_create`/`is_seed`/`is_transform`
/// predicates spec.md §4.2 asks the builder to expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    CreateContainer,
    SeedContainer,
    TransformContainer,
    CreateInstance,
    SeedInstance,
    TransformInstanceType,
    UpdateIndexes,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CreateContainer => "create_container",
            Self::SeedContainer => "seed_container",
            Self::TransformContainer => "transform_container",
            Self::CreateInstance => "create_instance",
            Self::SeedInstance => "seed_instance",
            Self::TransformInstanceType => "transform_instance_type",
            Self::UpdateIndexes => "update_indexes",
        };
        f.write_str(s)
    }
}

/// One field/value pair of an index key, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeyField {
    pub field: String,
    pub descending: bool,
}

/// An index to reconcile a container's index set against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Vec<IndexKeyField>,
    pub unique: bool,
    pub collation: Option<String>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, keys: Vec<IndexKeyField>) -> Self {
        Self {
            name: name.into(),
            keys,
            unique: false,
            collation: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn collation(mut self, collation: impl Into<String>) -> Self {
        self.collation = Some(collation.into());
        self
    }

    /// A normalized, order-independent-within-key, value-comparable
    /// representation used by index diffing (spec.md §4.5's requirement
    /// that index comparison be value-based, not textual).
    pub fn normalized(&self) -> (String, Vec<(String, bool)>, bool, Option<String>) {
        let keys = self
            .keys
            .iter()
            .map(|k| (k.field.clone(), k.descending))
            .collect();
        (
            self.name.clone(),
            keys,
            self.unique,
            self.collation.as_ref().map(|c| c.to_lowercase()),
        )
    }
}

#[derive(Clone)]
pub struct CreateContainer {
    pub container: String,
}

#[derive(Clone)]
pub struct SeedContainer {
    pub container: String,
    pub documents: Vec<Document>,
}

#[derive(Clone)]
pub struct TransformContainer {
    pub container: String,
    pub up: Transform,
    pub down: Option<Transform>,
}

#[derive(Clone)]
pub struct CreateInstance {
    pub template: String,
    pub instance: String,
}

#[derive(Clone)]
pub struct SeedInstance {
    pub template: String,
    pub instance: String,
    pub type_name: String,
    pub documents: Vec<Document>,
}

#[derive(Clone)]
pub struct TransformInstanceType {
    pub template: String,
    pub type_name: String,
    pub up: Transform,
    pub down: Option<Transform>,
}

#[derive(Clone)]
pub struct UpdateIndexes {
    pub container: String,
    pub index_spec: Vec<IndexSpec>,
}

/// A single migration operation (spec.md §3's "Operation" table).
#[derive(Clone)]
pub enum Operation {
    CreateContainer(CreateContainer),
    SeedContainer(SeedContainer),
    TransformContainer(TransformContainer),
    CreateInstance(CreateInstance),
    SeedInstance(SeedInstance),
    TransformInstanceType(TransformInstanceType),
    UpdateIndexes(UpdateIndexes),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::CreateContainer(_) => OperationKind::CreateContainer,
            Self::SeedContainer(_) => OperationKind::SeedContainer,
            Self::TransformContainer(_) => OperationKind::TransformContainer,
            Self::CreateInstance(_) => OperationKind::CreateInstance,
            Self::SeedInstance(_) => OperationKind::SeedInstance,
            Self::TransformInstanceType(_) => OperationKind::TransformInstanceType,
            Self::UpdateIndexes(_) => OperationKind::UpdateIndexes,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self.kind(),
            OperationKind::CreateContainer | OperationKind::CreateInstance
        )
    }

    pub fn is_seed(&self) -> bool {
        matches!(
            self.kind(),
            OperationKind::SeedContainer | OperationKind::SeedInstance
        )
    }

    pub fn is_transform(&self) -> bool {
        matches!(
            self.kind(),
            OperationKind::TransformContainer | OperationKind::TransformInstanceType
        )
    }

    /// The container or template name this operation targets, for logging
    /// and for [`crate::validate::IntegrityValidator`]'s name-format check.
    pub fn target_name(&self) -> &str {
        match self {
            Self::CreateContainer(op) => &op.container,
            Self::SeedContainer(op) => &op.container,
            Self::TransformContainer(op) => &op.container,
            Self::CreateInstance(op) => &op.template,
            Self::SeedInstance(op) => &op.template,
            Self::TransformInstanceType(op) => &op.template,
            Self::UpdateIndexes(op) => &op.container,
        }
    }

    /// Whether the reverse side of this operation is statically known to be
    /// absent (a `transform_*` with no `down` and not flagged irreversible
    /// is still technically reversible-as-a-no-op by spec.md's table, but a
    /// `down: None` paired with `irreversible` unset is treated as "caller
    /// forgot `down`", which [`crate::validate::IntegrityValidator`] flags).
    pub fn has_down(&self) -> bool {
        match self {
            Self::TransformContainer(op) => op.down.is_some(),
            Self::TransformInstanceType(op) => op.down.is_some(),
            _ => true,
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("kind", &self.kind())
            .field("target", &self.target_name())
            .finish()
    }
}
