//! Opaque schema validators handed to migrations.
//!
//! The engine never interprets a validator's internals (spec.md explicitly
//! leaves schema-language design out of scope); it only invokes one against
//! a document, or hands the bundle to a [`crate::applier::Applier`] so it can
//! be synchronized with a live database's server-side validators.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// Raised by a [`Validator`] when a document does not conform.
#[derive(Debug, Clone, thiserror::Error)]
#[error("document failed validation: {0}")]
pub struct ValidationError(pub String);

/// A document-shape check, opaque to the engine.
///
/// Cloning is cheap (an `Arc` clone) so a [`SchemaBundle`] can be shared
/// across the ancestor replay the [`crate::validate::SimulationValidator`]
/// performs without re-parsing or re-compiling anything.
#[derive(Clone)]
pub struct Validator(Arc<dyn Fn(&Value) -> Result<(), ValidationError> + Send + Sync>);

impl Validator {
    /// Wrap a closure as a [`Validator`].
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<(), ValidationError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// A validator that accepts every document.
    pub fn permissive() -> Self {
        Self::new(|_| Ok(()))
    }

    /// Run the validator against a document.
    pub fn validate(&self, doc: &Value) -> Result<(), ValidationError> {
        (self.0)(doc)
    }
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator(..)")
    }
}

/// `{containers: {name -> validator}, templates: {template -> {type -> validator}}}`
/// as spec.md §3 defines it.
#[derive(Debug, Clone, Default)]
pub struct SchemaBundle {
    /// Validators keyed by container name.
    pub containers: HashMap<String, Validator>,
    /// Validators keyed by template, then by discriminator type name.
    pub templates: HashMap<String, HashMap<String, Validator>>,
}

impl SchemaBundle {
    /// An empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a container-level validator.
    pub fn with_container(mut self, name: impl Into<String>, validator: Validator) -> Self {
        self.containers.insert(name.into(), validator);
        self
    }

    /// Register a template/type-level validator.
    pub fn with_type(
        mut self,
        template: impl Into<String>,
        type_name: impl Into<String>,
        validator: Validator,
    ) -> Self {
        self.templates
            .entry(template.into())
            .or_default()
            .insert(type_name.into(), validator);
        self
    }

    /// Synthesize a mock document for a template/type pair so a transform can
    /// be validated even when no instance of the template yet exists
    /// (spec.md §4.4's `transform_instance_type` fabrication rule).
    ///
    /// The mock carries only the reserved discriminator field; a validator
    /// that requires more of its documents than that will reject it, which
    /// is reported as a warning by [`crate::validate::IntegrityValidator`],
    /// not as a hard failure - the mock exists to exercise the transform
    /// closures, not to prove full schema conformance.
    pub fn mock_document(type_name: &str) -> Value {
        serde_json::json!({ crate::operation::DISCRIMINATOR_FIELD: type_name })
    }
}
