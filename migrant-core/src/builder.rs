//! The fluent builder migrations are authored with.
//!
//! Staged into three scopes - container, template, and type - so that an
//! operation only restricted to one scope (e.g. `update_indexes` is
//! container-only) is simply absent from the other scopes' method sets,
//! catching scope mistakes at compile time rather than at validation time.

use std::sync::Arc;

use crate::operation::{
    CreateContainer, CreateInstance, Document, IndexSpec, Operation, SeedContainer, SeedInstance,
    Transform, TransformContainer, TransformInstanceType, UpdateIndexes,
};
use crate::state::{DatabaseState, MigrationState};

/// Entry point for authoring one migration's operations.
pub struct Builder {
    state: MigrationState,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            state: MigrationState::new(DatabaseState::new()),
        }
    }

    /// Seed the builder's notion of the starting database state, used only
    /// by the simulation validator's replay - a live run ignores this and
    /// takes whatever the database actually holds.
    pub fn from_state(initial_state: DatabaseState) -> Self {
        Self {
            state: MigrationState::new(initial_state),
        }
    }

    /// Enter container scope: `create_container`, `seed_container`,
    /// `transform_container`, and `update_indexes`.
    pub fn container(self, name: impl Into<String>) -> ContainerBuilder {
        ContainerBuilder {
            builder: self,
            container: name.into(),
        }
    }

    /// Enter template scope: `create_instance`.
    pub fn template(self, name: impl Into<String>) -> TemplateBuilder {
        TemplateBuilder {
            builder: self,
            template: name.into(),
        }
    }

    /// Finish authoring and produce the compiled [`MigrationState`].
    pub fn compile(self) -> MigrationState {
        self.state
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Operations scoped to one container.
pub struct ContainerBuilder {
    builder: Builder,
    container: String,
}

impl ContainerBuilder {
    pub fn create(mut self) -> Self {
        self.builder.state.push(Operation::CreateContainer(CreateContainer {
            container: self.container.clone(),
        }));
        self
    }

    pub fn seed(mut self, documents: Vec<Document>) -> Self {
        self.builder.state.push(Operation::SeedContainer(SeedContainer {
            container: self.container.clone(),
            documents,
        }));
        self
    }

    /// Register a reversible transform. `down` should invert `up`
    /// document-for-document; omit it only when the transform genuinely
    /// cannot be undone.
    pub fn transform(mut self, up: Transform, down: Option<Transform>) -> Self {
        self.builder
            .state
            .push(Operation::TransformContainer(TransformContainer {
                container: self.container.clone(),
                up,
                down,
            }));
        self
    }

    /// Register a transform explicitly flagged irreversible - `down` is
    /// still accepted (a caller may supply a best-effort inverse purely for
    /// diagnostics) but the migration-level `irreversible` flag is set
    /// regardless, per spec.md §4.2.
    pub fn transform_irreversible(mut self, up: Transform, down: Option<Transform>) -> Self {
        self.builder
            .state
            .push(Operation::TransformContainer(TransformContainer {
                container: self.container.clone(),
                up,
                down,
            }));
        self.builder.state.mark_irreversible();
        self
    }

    pub fn update_indexes(mut self, index_spec: Vec<IndexSpec>) -> Self {
        self.builder.state.push(Operation::UpdateIndexes(UpdateIndexes {
            container: self.container.clone(),
            index_spec,
        }));
        self
    }

    /// Leave container scope and continue authoring.
    pub fn done(self) -> Builder {
        self.builder
    }

    pub fn compile(self) -> MigrationState {
        self.builder.compile()
    }
}

/// Operations scoped to one template.
pub struct TemplateBuilder {
    builder: Builder,
    template: String,
}

impl TemplateBuilder {
    pub fn create_instance(mut self, instance: impl Into<String>) -> Self {
        self.builder.state.push(Operation::CreateInstance(CreateInstance {
            template: self.template.clone(),
            instance: instance.into(),
        }));
        self
    }

    /// Enter type scope within this template: `seed_instance` and
    /// `transform_instance_type`.
    pub fn r#type(self, type_name: impl Into<String>) -> TypeBuilder {
        TypeBuilder {
            template: self.template,
            builder: self.builder,
            type_name: type_name.into(),
        }
    }

    pub fn done(self) -> Builder {
        self.builder
    }

    pub fn compile(self) -> MigrationState {
        self.builder.compile()
    }
}

/// Operations scoped to one type within one template.
pub struct TypeBuilder {
    builder: Builder,
    template: String,
    type_name: String,
}

impl TypeBuilder {
    pub fn seed(mut self, instance: impl Into<String>, documents: Vec<Document>) -> Self {
        self.builder.state.push(Operation::SeedInstance(SeedInstance {
            template: self.template.clone(),
            instance: instance.into(),
            type_name: self.type_name.clone(),
            documents,
        }));
        self
    }

    pub fn transform(mut self, up: Transform, down: Option<Transform>) -> Self {
        self.builder
            .state
            .push(Operation::TransformInstanceType(TransformInstanceType {
                template: self.template.clone(),
                type_name: self.type_name.clone(),
                up,
                down,
            }));
        self
    }

    /// Register an instance-type transform explicitly flagged irreversible,
    /// mirroring [`ContainerBuilder::transform_irreversible`].
    pub fn transform_irreversible(mut self, up: Transform, down: Option<Transform>) -> Self {
        self.builder
            .state
            .push(Operation::TransformInstanceType(TransformInstanceType {
                template: self.template.clone(),
                type_name: self.type_name.clone(),
                up,
                down,
            }));
        self.builder.state.mark_irreversible();
        self
    }

    pub fn done(self) -> TemplateBuilder {
        TemplateBuilder {
            builder: self.builder,
            template: self.template,
        }
    }

    pub fn compile(self) -> MigrationState {
        self.builder.compile()
    }
}

/// Convenience wrapper producing an `up`/`down` [`Transform`] pair from two
/// ordinary closures, for callers who don't need `Arc` sharing themselves.
pub fn transform_pair<U, Dn>(up: U, down: Dn) -> (Transform, Transform)
where
    U: Fn(&Document) -> Result<Document, crate::error::Error> + Send + Sync + 'static,
    Dn: Fn(&Document) -> Result<Document, crate::error::Error> + Send + Sync + 'static,
{
    (Arc::new(up), Arc::new(down))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_scope_compiles_three_operations() {
        let state = Builder::new()
            .container("books")
            .create()
            .seed(vec![serde_json::json!({"title": "Dune"})])
            .transform(Arc::new(|d| Ok(d.clone())), None)
            .compile();
        assert_eq!(state.operations.len(), 3);
    }

    #[test]
    fn template_and_type_scopes_compose() {
        let state = Builder::new()
            .template("library")
            .create_instance("main")
            .r#type("book")
            .seed("main", vec![serde_json::json!({"title": "Dune"})])
            .compile();
        assert_eq!(state.operations.len(), 2);
        assert!(state.operations[0].is_create());
        assert!(state.operations[1].is_seed());
    }
}
