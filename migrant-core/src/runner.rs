//! Drives a [`Chain`] of migrations against an [`Applier`], with
//! validation, retry, timeout, dry-run, and rollback semantics.

use std::sync::Arc;
use std::time::Duration;

use crate::applier::Applier;
use crate::chain::{Chain, ChainValidator, ChainValidatorConfig, MigrationDefinition};
use crate::error::{Error, MigrantResult};
use crate::operation::Operation;
use crate::retry::RetryConfig;
use crate::validate::CompositeValidator;

/// What phase of a single operation's lifecycle a progress callback is
/// being told about.
#[derive(Debug, Clone)]
pub enum Progress {
    /// Pre-execution validation is about to run for a migration.
    Validating { id: String },
    /// A migration is about to run.
    MigrationStarted { id: String },
    /// One operation within the current migration is about to apply.
    OperationStarted { id: String, operation: String },
    /// One operation completed successfully.
    OperationCompleted { id: String, operation: String },
    /// One operation is being retried after a transient failure.
    OperationRetrying { id: String, operation: String, attempt: u32 },
    /// A migration finished applying all of its operations.
    MigrationCompleted { id: String },
    /// A migration's operations are being reverse-applied.
    RollingBack { id: String },
}

/// Tunables for [`Runner`], spec.md §4.7's full default set.
#[derive(Clone)]
pub struct RunnerConfig {
    /// Run [`CompositeValidator`] before applying each migration.
    pub validate: bool,
    /// Retry policy applied to every operation.
    pub retry: RetryConfig,
    /// Per-operation deadline; `None` disables the timeout race.
    pub timeout: Option<Duration>,
    /// Apply against a [`crate::simulate::SimulationApplier`]-style pure
    /// mirror instead of mutating anything for real. The runner itself is
    /// agnostic to which kind of `Applier` it was handed; this flag only
    /// affects which structural checks are skipped (spec.md clarifies a
    /// dry run still runs validation).
    pub dry_run: bool,
    /// On first operation failure within a migration, reverse everything
    /// already applied in that migration before returning the error.
    pub rollback_on_failure: bool,
    /// When running a whole chain, continue past a failed migration
    /// instead of aborting the batch.
    pub continue_on_errors: bool,
    pub chain_validator: ChainValidatorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            validate: true,
            retry: RetryConfig::default(),
            timeout: Some(Duration::from_secs(30)),
            dry_run: false,
            rollback_on_failure: true,
            continue_on_errors: false,
            chain_validator: ChainValidatorConfig::default(),
        }
    }
}

/// The outcome of running a single migration.
#[derive(Debug)]
pub struct MigrationOutcome {
    pub id: String,
    pub result: MigrantResult<()>,
    pub rolled_back: bool,
}

/// The outcome of running a batch of migrations.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub outcomes: Vec<MigrationOutcome>,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Executes migrations against a boxed [`Applier`] - boxed because a
/// single `Runner` should work unchanged whether it's driving a
/// [`crate::simulate::SimulationApplier`] for a dry run or a
/// [`crate::database::DatabaseApplier`] for a real one, and the two have
/// unrelated concrete types.
pub struct Runner {
    applier: Box<dyn Applier>,
    config: RunnerConfig,
    validator: CompositeValidator,
}

impl Runner {
    pub fn new(applier: Box<dyn Applier>, config: RunnerConfig) -> Self {
        Self {
            applier,
            config,
            validator: CompositeValidator::standard(),
        }
    }

    /// Apply (or reverse-apply) a single operation, retrying on write
    /// conflicts and racing each attempt against [`RunnerConfig::timeout`].
    ///
    /// Written as a hand-rolled loop rather than delegating to
    /// [`RetryPolicy::run`]: that helper takes a `FnMut() -> Fut` closure,
    /// which here would have to reborrow `self.applier` fresh on every
    /// attempt alongside the `self.config`/`on_progress` borrows this
    /// method already juggles - more ceremony than the loop it would save.
    async fn run_operation_with_timeout(
        &mut self,
        definition: &Arc<MigrationDefinition>,
        op: &Operation,
        mut on_progress: impl FnMut(Progress),
        reverse: bool,
    ) -> MigrantResult<()> {
        on_progress(Progress::OperationStarted {
            id: definition.id.clone(),
            operation: op.kind().to_string(),
        });

        if self.config.dry_run {
            on_progress(Progress::OperationCompleted {
                id: definition.id.clone(),
                operation: op.kind().to_string(),
            });
            return Ok(());
        }

        let retry_config = self.config.retry.clone();
        let timeout = self.config.timeout;
        let mut attempt = 1u32;

        let result = loop {
            let attempt_result = match timeout {
                Some(d) => {
                    let fut = if reverse {
                        self.applier.apply_reverse_operation(op)
                    } else {
                        self.applier.apply_operation(op)
                    };
                    match tokio::time::timeout(d, fut).await {
                        Ok(r) => r,
                        Err(_) => Err(Error::Timeout(d)),
                    }
                }
                None => {
                    if reverse {
                        self.applier.apply_reverse_operation(op).await
                    } else {
                        self.applier.apply_operation(op).await
                    }
                }
            };

            match attempt_result {
                Ok(()) => break Ok(()),
                Err(err) if attempt < retry_config.max_attempts && err.is_conflict() => {
                    on_progress(Progress::OperationRetrying {
                        id: definition.id.clone(),
                        operation: op.kind().to_string(),
                        attempt,
                    });
                    tokio::time::sleep(retry_config.delay_for_attempt(attempt)).await;
                    attempt += 1;
                }
                Err(err) if err.is_conflict() => {
                    break Err(Error::ConflictExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => break Err(err),
            }
        };

        if result.is_ok() {
            on_progress(Progress::OperationCompleted {
                id: definition.id.clone(),
                operation: op.kind().to_string(),
            });
        }

        result
    }

    /// Run a single migration: optional validation, schema sync, each
    /// operation in order, and - on failure, if configured - a reverse
    /// replay of everything already applied.
    pub async fn run_migration(
        &mut self,
        definition: &Arc<MigrationDefinition>,
        mut on_progress: impl FnMut(Progress),
    ) -> MigrationOutcome {
        on_progress(Progress::Validating {
            id: definition.id.clone(),
        });

        if self.config.validate {
            match self.validator.validate(definition) {
                Ok(report) if !report.is_valid() => {
                    return MigrationOutcome {
                        id: definition.id.clone(),
                        result: Err(Error::validation_failed(report.errors.join("; "))),
                        rolled_back: false,
                    };
                }
                Err(e) => {
                    return MigrationOutcome {
                        id: definition.id.clone(),
                        result: Err(e),
                        rolled_back: false,
                    };
                }
                Ok(_) => {}
            }
        }

        self.applier.set_current_migration_id(&definition.id);
        if !self.config.dry_run {
            if let Err(e) = self.applier.synchronize_schemas(&definition.schemas).await {
                return MigrationOutcome {
                    id: definition.id.clone(),
                    result: Err(e),
                    rolled_back: false,
                };
            }
        }

        on_progress(Progress::MigrationStarted {
            id: definition.id.clone(),
        });

        let state = (definition.compile)();
        let mut applied = Vec::new();

        for op in &state.operations {
            match self
                .run_operation_with_timeout(definition, op, &mut on_progress, false)
                .await
            {
                Ok(()) => applied.push(op.clone()),
                Err(e) => {
                    let mut rolled_back = false;
                    if self.config.rollback_on_failure {
                        rolled_back = true;
                        on_progress(Progress::RollingBack {
                            id: definition.id.clone(),
                        });
                        for op in applied.iter().rev() {
                            if op.has_down() {
                                let _ = self
                                    .run_operation_with_timeout(definition, op, &mut on_progress, true)
                                    .await;
                            }
                        }
                    }
                    return MigrationOutcome {
                        id: definition.id.clone(),
                        result: Err(e),
                        rolled_back,
                    };
                }
            }
        }

        if !self.config.dry_run {
            if let Err(e) = self
                .applier
                .record_migration_applied(&definition.id, &definition.name)
                .await
            {
                return MigrationOutcome {
                    id: definition.id.clone(),
                    result: Err(e),
                    rolled_back: false,
                };
            }
        }

        on_progress(Progress::MigrationCompleted {
            id: definition.id.clone(),
        });

        MigrationOutcome {
            id: definition.id.clone(),
            result: Ok(()),
            rolled_back: false,
        }
    }

    /// Run every migration in `chain`, root to tail, stopping at the first
    /// failure unless [`RunnerConfig::continue_on_errors`] is set.
    pub async fn run_chain(&mut self, chain: &Chain, mut on_progress: impl FnMut(Progress)) -> BatchOutcome {
        if self.config.validate {
            let chain_validator = ChainValidator::new(self.config.chain_validator.clone());
            if let Err(e) = chain_validator.validate_strict(chain) {
                return BatchOutcome {
                    outcomes: vec![MigrationOutcome {
                        id: String::new(),
                        result: Err(e),
                        rolled_back: false,
                    }],
                };
            }
        }

        let mut outcomes = Vec::new();
        for definition in chain.in_order() {
            let outcome = self.run_migration(definition, &mut on_progress).await;
            let failed = outcome.result.is_err();
            outcomes.push(outcome);
            if failed && !self.config.continue_on_errors {
                break;
            }
        }
        BatchOutcome { outcomes }
    }

    /// Reverse-apply a single already-applied migration: synchronize
    /// schemas back to the parent's bundle first (spec.md §4.7's rollback
    /// rule), then replay every operation's `down` in reverse order.
    pub async fn rollback_migration(
        &mut self,
        definition: &Arc<MigrationDefinition>,
        mut on_progress: impl FnMut(Progress),
    ) -> MigrantResult<()> {
        let parent_schemas = definition
            .parent
            .as_ref()
            .map(|p| p.schemas.clone())
            .unwrap_or_default();
        self.applier.synchronize_schemas(&parent_schemas).await?;

        on_progress(Progress::RollingBack {
            id: definition.id.clone(),
        });

        let state = (definition.compile)();
        for op in state.operations.iter().rev() {
            self.run_operation_with_timeout(definition, op, &mut on_progress, true)
                .await?;
        }
        self.applier.record_migration_reverted(&definition.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{CreateContainer, SeedContainer};
    use crate::schema::SchemaBundle;
    use crate::simulate::{MissingTargetMode, SimulationApplier};
    use crate::state::{DatabaseState, MigrationState};

    fn migration(id: &str, parent: Option<Arc<MigrationDefinition>>) -> Arc<MigrationDefinition> {
        let id_owned = id.to_string();
        Arc::new(MigrationDefinition {
            id: id_owned.clone(),
            name: format!("migration {id}"),
            parent,
            schemas: SchemaBundle::new(),
            compile: Box::new(move || {
                let mut state = MigrationState::new(DatabaseState::new());
                state.push(Operation::CreateContainer(CreateContainer {
                    container: "books".into(),
                }));
                state.push(Operation::SeedContainer(SeedContainer {
                    container: "books".into(),
                    documents: vec![serde_json::json!({"title": "Dune"})],
                }));
                state
            }),
        })
    }

    #[tokio::test]
    async fn run_migration_applies_all_operations() {
        let applier = SimulationApplier::new(DatabaseState::new(), MissingTargetMode::Lenient);
        let mut runner = Runner::new(Box::new(applier), RunnerConfig::default());
        let def = migration("m1", None);
        let outcome = runner.run_migration(&def, |_| {}).await;
        assert!(outcome.result.is_ok());
    }

    #[tokio::test]
    async fn dry_run_leaves_the_mirror_untouched() {
        let applier = SimulationApplier::new(DatabaseState::new(), MissingTargetMode::Strict);
        let mut config = RunnerConfig::default();
        config.dry_run = true;
        let mut runner = Runner::new(Box::new(applier), config);
        let def = migration("m1", None);

        let mut events = Vec::new();
        let outcome = runner
            .run_migration(&def, |p| events.push(format!("{p:?}")))
            .await;

        assert!(outcome.result.is_ok());
        assert!(events.iter().any(|e| e.contains("OperationStarted")));
        assert!(events.iter().any(|e| e.contains("OperationCompleted")));
    }

    #[tokio::test]
    async fn run_chain_stops_on_first_failure_by_default() {
        let applier = SimulationApplier::new(DatabaseState::new(), MissingTargetMode::Strict);
        let mut config = RunnerConfig::default();
        config.validate = false;
        config.rollback_on_failure = false;
        let mut runner = Runner::new(Box::new(applier), config);

        let root = migration("m1", None);
        let bad = Arc::new(MigrationDefinition {
            id: "m2".into(),
            name: "bad".into(),
            parent: Some(root.clone()),
            schemas: SchemaBundle::new(),
            compile: Box::new(|| {
                let mut state = MigrationState::new(DatabaseState::new());
                state.push(Operation::SeedContainer(SeedContainer {
                    container: "ghost".into(),
                    documents: vec![],
                }));
                state
            }),
        });
        let good_after = Arc::new(MigrationDefinition {
            id: "m3".into(),
            name: "after".into(),
            parent: Some(bad.clone()),
            schemas: SchemaBundle::new(),
            compile: Box::new(|| MigrationState::new(DatabaseState::new())),
        });

        let mut chain = Chain::new();
        chain.push(root).unwrap();
        chain.push(bad).unwrap();
        chain.push(good_after).unwrap();

        let batch = runner.run_chain(&chain, |_| {}).await;
        assert_eq!(batch.outcomes.len(), 2);
        assert!(!batch.all_succeeded());
    }
}
