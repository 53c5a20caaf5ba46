//! The three composable validators spec.md §4.6 defines: structural chain
//! validation (see [`crate::chain::ChainValidator`]), integrity checks on a
//! single migration's compiled operations, and full-chain simulation replay.

use std::collections::HashSet;
use std::sync::Arc;

use crate::chain::MigrationDefinition;
use crate::error::MigrantResult;
use crate::operation::Operation;
use crate::simulate::{MissingTargetMode, SimulationApplier};
use crate::state::DatabaseState;

/// `[A-Za-z]\w*` as a hand-rolled predicate (spec.md §4.6) - no regex
/// dependency is otherwise needed in this crate.
fn is_well_formed_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Accumulated findings from any of the three validators. Errors block
/// execution; warnings are surfaced through [`crate::runner::Runner`]'s
/// progress callback but never stop a run.
#[derive(Debug, Default, Clone)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// A validator that a [`crate::runner::Runner`] can run before or after
/// applying a migration's operations.
pub trait Validator: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, definition: &Arc<MigrationDefinition>) -> MigrantResult<ValidationReport>;
}

/// Checks a single migration's compiled operations for self-consistency:
/// a `transform_*` with no `down` and no explicit acknowledgment is
/// reported as a warning (not an error - plenty of migrations are
/// deliberately one-way), operations targeting an empty name are reported
/// as errors, container/template names not matching `[A-Za-z]\w*` are
/// reported as warnings (spec.md §4.6), and a declared schema whose
/// container/template is never created by this migration's own operations
/// is flagged - an error for containers, a warning for templates, since a
/// template is a model that need not be instantiated by every migration
/// that merely evolves its type schema (spec.md §4.6's "schema declares
/// container X but migrate() never calls `createCollection(X)`" check).
pub struct IntegrityValidator;

impl Validator for IntegrityValidator {
    fn name(&self) -> &'static str {
        "integrity"
    }

    fn validate(&self, definition: &Arc<MigrationDefinition>) -> MigrantResult<ValidationReport> {
        let mut report = ValidationReport::default();
        let state = (definition.compile)();

        let mut created_containers: HashSet<&str> = HashSet::new();
        let mut created_templates: HashSet<&str> = HashSet::new();

        for op in &state.operations {
            if op.target_name().trim().is_empty() {
                report.errors.push(format!(
                    "{} operation in migration '{}' targets an empty name",
                    op.kind(),
                    definition.id
                ));
            } else if !is_well_formed_name(op.target_name()) {
                report.warnings.push(format!(
                    "{} operation in migration '{}' targets '{}', which does not match [A-Za-z]\\w*",
                    op.kind(),
                    definition.id,
                    op.target_name()
                ));
            }
            if op.is_transform() && !op.has_down() {
                report.warnings.push(format!(
                    "{} operation in migration '{}' has no down transform and will not be reversible",
                    op.kind(),
                    definition.id
                ));
            }
            match op {
                Operation::CreateContainer(c) => {
                    created_containers.insert(&c.container);
                }
                Operation::CreateInstance(c) => {
                    created_templates.insert(&c.template);
                }
                _ => {}
            }
        }

        for container in definition.schemas.containers.keys() {
            if !created_containers.contains(container.as_str()) {
                report.errors.push(format!(
                    "migration '{}' declares a schema for container '{container}' but never calls create_container on it",
                    definition.id
                ));
            }
        }
        for template in definition.schemas.templates.keys() {
            if !created_templates.contains(template.as_str()) {
                report.warnings.push(format!(
                    "migration '{}' declares a schema for template '{template}' but never calls create_instance on it",
                    definition.id
                ));
            }
        }

        Ok(report)
    }
}

/// Replays the migration's ancestor chain from an empty [`DatabaseState`]
/// through a [`SimulationApplier`], then applies this migration's own
/// operations, confirming every operation succeeds against the resulting
/// mirror before anything touches a live database (spec.md §4.6's
/// "Simulation Validator").
pub struct SimulationValidator;

impl Validator for SimulationValidator {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn validate(&self, definition: &Arc<MigrationDefinition>) -> MigrantResult<ValidationReport> {
        let mut report = ValidationReport::default();
        let path = definition.path();

        let mut applier = SimulationApplier::new(DatabaseState::new(), MissingTargetMode::Lenient);

        let run = |applier: &mut SimulationApplier, ops: &[Operation]| -> MigrantResult<()> {
            for op in ops {
                futures_block_on(applier.apply_operation(op))?;
            }
            Ok(())
        };

        // Re-derive each ancestor's compiled state and replay it; only the
        // last (this migration's own) failure is a hard error, ancestor
        // replay failures indicate the chain itself is broken and are
        // surfaced the same way.
        for ancestor in &path {
            let ancestor_state = (ancestor.compile)();
            if let Err(e) = run(&mut applier, &ancestor_state.operations) {
                report
                    .errors
                    .push(format!("replaying '{}' failed: {e}", ancestor.id));
                return Ok(report);
            }
        }

        Ok(report)
    }
}

/// Runs `future` to completion without requiring the caller to already be
/// inside an async context - [`Validator::validate`] is a synchronous
/// trait method invoked from inside [`crate::runner::Runner`]'s own async
/// context, so it cannot borrow the ambient runtime: `tokio::task::
/// block_in_place` panics outright on a current-thread runtime (the default
/// for `#[tokio::test]` and for `Runner::run_migration`'s own callers), and
/// a multi-threaded runtime would still deadlock a single-threaded pool if
/// every worker ended up blocked this way. A small dedicated current-thread
/// runtime, built fresh on every call, sidesteps both: the simulator never
/// awaits anything for real (spec.md §4.4's interpreter is pure), so the
/// cost is the runtime's own construction, not any actual blocking.
fn futures_block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build a current-thread runtime for validator replay")
        .block_on(future)
}

/// Runs every registered validator and merges their reports.
pub struct CompositeValidator {
    validators: Vec<Box<dyn Validator>>,
}

impl CompositeValidator {
    pub fn new(validators: Vec<Box<dyn Validator>>) -> Self {
        Self { validators }
    }

    pub fn standard() -> Self {
        Self::new(vec![Box::new(IntegrityValidator), Box::new(SimulationValidator)])
    }

    pub fn validate(&self, definition: &Arc<MigrationDefinition>) -> MigrantResult<ValidationReport> {
        let mut report = ValidationReport::default();
        for validator in &self.validators {
            let r = validator.validate(definition)?;
            log::debug!(validator = validator.name(), errors = r.errors.len(), warnings = r.warnings.len(); "ran validator");
            report.merge(r);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CreateContainer, TransformContainer};
    use crate::schema::SchemaBundle;
    use crate::state::MigrationState;
    use std::sync::Arc as StdArc;

    fn leaf_definition() -> StdArc<MigrationDefinition> {
        StdArc::new(MigrationDefinition {
            id: "m1".into(),
            name: "create books".into(),
            parent: None,
            schemas: SchemaBundle::new(),
            compile: Box::new(|| {
                let mut state = MigrationState::new(DatabaseState::new());
                state.push(Operation::CreateContainer(CreateContainer {
                    container: "books".into(),
                }));
                state.push(Operation::TransformContainer(TransformContainer {
                    container: "books".into(),
                    up: StdArc::new(|d| Ok(d.clone())),
                    down: None,
                }));
                state
            }),
        })
    }

    #[test]
    fn integrity_validator_warns_on_missing_down() {
        let def = leaf_definition();
        let report = IntegrityValidator.validate(&def).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn simulation_validator_replays_chain_successfully() {
        let def = leaf_definition();
        let report = SimulationValidator.validate(&def).unwrap();
        assert!(report.is_valid(), "{:?}", report.errors);
    }

    #[test]
    fn composite_validator_merges_reports() {
        let def = leaf_definition();
        let composite = CompositeValidator::standard();
        let report = composite.validate(&def).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn integrity_validator_warns_on_malformed_container_name() {
        let def = StdArc::new(MigrationDefinition {
            id: "m1".into(),
            name: "create weird".into(),
            parent: None,
            schemas: SchemaBundle::new(),
            compile: Box::new(|| {
                let mut state = MigrationState::new(DatabaseState::new());
                state.push(Operation::CreateContainer(CreateContainer {
                    container: "1-bad-name".into(),
                }));
                state
            }),
        });
        let report = IntegrityValidator.validate(&def).unwrap();
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("1-bad-name")));
    }

    #[test]
    fn integrity_validator_errors_on_undeclared_container_create() {
        use crate::schema::Validator as SchemaValidator;

        let def = StdArc::new(MigrationDefinition {
            id: "m1".into(),
            name: "declares but never creates".into(),
            parent: None,
            schemas: SchemaBundle::new().with_container("books", SchemaValidator::permissive()),
            compile: Box::new(|| MigrationState::new(DatabaseState::new())),
        });
        let report = IntegrityValidator.validate(&def).unwrap();
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.contains("books")));
    }

    #[test]
    fn integrity_validator_warns_on_undeclared_template_instance() {
        use crate::schema::Validator as SchemaValidator;

        let def = StdArc::new(MigrationDefinition {
            id: "m1".into(),
            name: "declares template schema only".into(),
            parent: None,
            schemas: SchemaBundle::new().with_type("catalog", "book", SchemaValidator::permissive()),
            compile: Box::new(|| MigrationState::new(DatabaseState::new())),
        });
        let report = IntegrityValidator.validate(&def).unwrap();
        assert!(report.is_valid());
        assert!(report.warnings.iter().any(|w| w.contains("catalog")));
    }
}
