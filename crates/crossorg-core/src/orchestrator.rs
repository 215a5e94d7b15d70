//! Migration orchestrator
//!
//! Drives one [`MigrationRequest`] through its states:
//!
//! ```text
//! create/update: Init -> Export -> ParseResourcePath -> Annotate -> ApplyTargets -> Done
//! delete:        Init -> ApplyTargets -> Done
//! ```
//!
//! Targets are processed one at a time in declaration order. The first hard
//! failure ends the run in `Failed`; targets already migrated stay migrated.

use crate::annotator::{annotate, build_output_key};
use crate::collaborators::{ApplyEngine, ApplyMode, ApplyRequest, ConfigStorage, DeleteOutcome, ExportSystem};
use crate::credentials::{CredentialContext, CredentialEnvVars, CredentialMode, CredentialSwitcher, TargetOrg};
use crate::document::{ExportedConfig, ResourcePath};
use crate::error::{Diagnostic, MigrationError};
use crate::resolver::{ReferenceExtractor, ReferenceResolver, ResolverStrategy};
use crate::types::{
    DeletePolicy, MigrationReport, MigrationRequest, MigrationState, Operation, TargetOutcome, TargetResult,
};
use crossorg_store::MappingStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::Instrument;

/// External systems the orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    /// Source-side schema lookup and export
    pub exporter: Arc<dyn ExportSystem>,
    /// Declarative apply engine
    pub engine: Arc<dyn ApplyEngine>,
    /// Target-side configuration storage
    pub storage: Arc<dyn ConfigStorage>,
    /// Identity mapping store
    pub store: Arc<dyn MappingStore>,
}

/// Orchestrator behaviour switches
#[derive(Debug, Clone, Default)]
pub struct OrchestratorOptions {
    /// Reference extraction strategy
    pub resolver_strategy: ResolverStrategy,
    /// Mapping update on delete
    pub delete_policy: DeletePolicy,
    /// How credentials reach the engine
    pub credential_mode: CredentialMode,
    /// Credential variable names
    pub credential_vars: CredentialEnvVars,
}

/// Per-request work fixed before the target loop
enum Plan {
    Delete,
    Apply(ApplyPlan),
}

struct ApplyPlan {
    path: ResourcePath,
    annotated: ExportedConfig,
    extractor: Box<dyn ReferenceExtractor>,
}

/// Result of one target iteration
///
/// Warnings are kept whether or not the target succeeded.
struct TargetRun {
    outcome: Result<TargetOutcome, MigrationError>,
    warnings: Vec<Diagnostic>,
}

/// Removes a source id's lock entry once no request holds or awaits it
///
/// Declared before the lock it cleans up, so it also runs when `migrate`
/// is cancelled.
struct InFlightSlot<'a> {
    in_flight: &'a DashMap<String, Arc<Mutex<()>>>,
    source_id: &'a str,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.in_flight
            .remove_if(self.source_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Cross-org migration orchestrator
pub struct Orchestrator {
    collaborators: Collaborators,
    options: OrchestratorOptions,
    resolver: ReferenceResolver,
    credentials: CredentialSwitcher,
    /// Single writer per source entity id
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl Orchestrator {
    /// Create orchestrator
    #[must_use]
    pub fn new(collaborators: Collaborators, options: OrchestratorOptions) -> Self {
        let resolver = ReferenceResolver::new(Arc::clone(&collaborators.store));
        let credentials = CredentialSwitcher::new(options.credential_mode, options.credential_vars.clone());
        Self {
            collaborators,
            options,
            resolver,
            credentials,
            in_flight: DashMap::new(),
        }
    }

    /// Active options
    #[inline]
    #[must_use]
    pub fn options(&self) -> &OrchestratorOptions {
        &self.options
    }

    /// Number of source ids currently being migrated
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Run one migration against `targets`, in order
    ///
    /// Never fails outright: hard failures are error diagnostics in the
    /// report and leave it in [`MigrationState::Failed`]. Requests for the
    /// same source id are serialized.
    pub async fn migrate(&self, request: &MigrationRequest, targets: &[TargetOrg]) -> MigrationReport {
        let span = tracing::info_span!(
            "migration",
            resource_type = %request.resource_type,
            source_id = %request.source_entity_id,
            operation = %request.operation,
        );

        async {
            let _slot = InFlightSlot {
                in_flight: &self.in_flight,
                source_id: &request.source_entity_id,
            };
            let lock = self
                .in_flight
                .entry(request.source_entity_id.clone())
                .or_default()
                .clone();
            let guard = lock.lock().await;

            let mut report = MigrationReport::new(request.clone());
            match self.run(request, targets, &mut report).await {
                Ok(()) => {
                    report.advance(MigrationState::Done);
                    tracing::info!(targets = report.targets.len(), "migration complete");
                }
                Err(err) => {
                    tracing::error!(error = %err, "migration failed");
                    report.diagnostics.push(Diagnostic::from_error(&err));
                    report.advance(MigrationState::Failed);
                }
            }

            drop(guard);
            report
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &MigrationRequest,
        targets: &[TargetOrg],
        report: &mut MigrationReport,
    ) -> Result<(), MigrationError> {
        let schema = self
            .collaborators
            .exporter
            .resolve_schema(&request.resource_type)
            .ok_or_else(|| MigrationError::UnknownResourceType(request.resource_type.clone()))?;

        let plan = match request.operation {
            Operation::Delete => Plan::Delete,
            Operation::CreateOrUpdate => {
                report.advance(MigrationState::Export);
                let exported = self
                    .collaborators
                    .exporter
                    .export_entity(&request.resource_type, &request.source_entity_id)
                    .await
                    .map_err(|source| MigrationError::ExportFailed {
                        resource_type: request.resource_type.clone(),
                        source_entity_id: request.source_entity_id.clone(),
                        source,
                    })?;

                report.advance(MigrationState::ParseResourcePath);
                let path = exported
                    .resource_path(&request.resource_type)
                    .map_err(MigrationError::ResourcePathNotFound)?;

                report.advance(MigrationState::Annotate);
                let annotated = annotate(&exported, &path, &request.source_entity_id);
                let extractor = self.options.resolver_strategy.extractor_for(&schema);
                Plan::Apply(ApplyPlan {
                    path,
                    annotated,
                    extractor,
                })
            }
        };

        report.advance(MigrationState::ApplyTargets);
        if targets.is_empty() {
            tracing::warn!("no target orgs given");
            report.diagnostics.push(Diagnostic::warning("no target orgs given; nothing migrated"));
        }

        for target in targets {
            let span = tracing::info_span!("target", org = %target.id);
            let run = self.process_target(request, &plan, target).instrument(span).await;
            for warning in &run.warnings {
                tracing::warn!(org = %target.id, "{}", warning.summary);
            }
            report.diagnostics.extend(run.warnings);
            match run.outcome {
                Ok(outcome) => report.targets.push(TargetResult {
                    target_org: target.id.clone(),
                    outcome,
                }),
                Err(err) => {
                    report.targets.push(TargetResult::failed(&target.id, &err));
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// One target under its credential scope
    async fn process_target(
        &self,
        request: &MigrationRequest,
        plan: &Plan,
        target: &TargetOrg,
    ) -> TargetRun {
        let scoped = match self
            .credentials
            .with_target_credentials(target, |ctx| self.apply_in_context(request, plan, target, ctx))
            .await
        {
            Ok(scoped) => scoped,
            Err(source) => {
                return TargetRun {
                    outcome: Err(MigrationError::CredentialAcquireFailed {
                        target_org: target.id.clone(),
                        source,
                    }),
                    warnings: Vec::new(),
                }
            }
        };

        let mut run = scoped.value;
        if let Some(source) = scoped.restore_error {
            let err = MigrationError::CredentialRestoreFailed {
                target_org: target.id.clone(),
                source,
            };
            run.warnings.push(Diagnostic::from_error(&err).into_warning());
        }
        run
    }

    async fn apply_in_context(
        &self,
        request: &MigrationRequest,
        plan: &Plan,
        target: &TargetOrg,
        credentials: CredentialContext,
    ) -> TargetRun {
        let mut warnings = Vec::new();
        let outcome = match plan {
            Plan::Delete => {
                self.delete_in_target(request, target, &credentials, &mut warnings)
                    .await
            }
            Plan::Apply(apply) => {
                self.apply_in_target(request, target, &credentials, apply, &mut warnings)
                    .await
            }
        };
        TargetRun { outcome, warnings }
    }

    async fn apply_in_target(
        &self,
        request: &MigrationRequest,
        target: &TargetOrg,
        credentials: &CredentialContext,
        plan: &ApplyPlan,
        warnings: &mut Vec<Diagnostic>,
    ) -> Result<TargetOutcome, MigrationError> {
        let c = &self.collaborators;
        let source_id = request.source_entity_id.as_str();
        let org = target.id.as_str();
        let config_err = |source| MigrationError::ConfigWriteFailed {
            target_org: org.to_string(),
            source,
        };
        let engine_err = |source| MigrationError::ApplyEngineFailed {
            target_org: org.to_string(),
            source,
        };

        let resolution = self
            .resolver
            .resolve(&plan.annotated, &plan.path, source_id, org, plan.extractor.as_ref())
            .await?;
        tracing::info!(rewritten = resolution.rewritten.len(), "references resolved");
        warnings.extend(resolution.warnings);

        if c.storage.exists(org, source_id).await.map_err(config_err)? {
            tracing::info!("updating existing target configuration");
        }
        c.storage
            .write(org, source_id, &resolution.config)
            .await
            .map_err(config_err)?;

        let working_dir = c.storage.working_dir(org);
        let mode = ApplyMode::Targeted(plan.path.clone());
        c.engine
            .apply(ApplyRequest {
                working_dir: &working_dir,
                mode: &mode,
                credentials,
            })
            .await
            .map_err(engine_err)?;

        let key = build_output_key(source_id);
        let outputs = c.engine.outputs(&working_dir, credentials).await.map_err(engine_err)?;
        let target_entity_id = outputs
            .get(&key)
            .and_then(serde_json::Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| MigrationError::OutputNotFound {
                target_org: org.to_string(),
                key: key.clone(),
            })?
            .to_string();

        c.store
            .upsert(&request.resource_type, source_id, org, &target_entity_id)
            .await
            .map_err(|source| MigrationError::MappingStoreWriteFailed {
                target_org: org.to_string(),
                source,
            })?;
        tracing::info!(target_id = %target_entity_id, "target migrated");

        Ok(TargetOutcome::Migrated { target_entity_id })
    }

    async fn delete_in_target(
        &self,
        request: &MigrationRequest,
        target: &TargetOrg,
        credentials: &CredentialContext,
        warnings: &mut Vec<Diagnostic>,
    ) -> Result<TargetOutcome, MigrationError> {
        let c = &self.collaborators;
        let source_id = request.source_entity_id.as_str();
        let org = target.id.as_str();

        let removed = c
            .storage
            .delete(org, source_id)
            .await
            .map_err(|source| MigrationError::ConfigWriteFailed {
                target_org: org.to_string(),
                source,
            })?;
        if removed == DeleteOutcome::AlreadyAbsent {
            warnings.push(
                Diagnostic::warning(format!(
                    "configuration for {source_id} did not exist before delete; nothing removed"
                ))
                .with_target(org),
            );
        }

        let working_dir = c.storage.working_dir(org);
        c.engine
            .apply(ApplyRequest {
                working_dir: &working_dir,
                mode: &ApplyMode::Reconcile,
                credentials,
            })
            .await
            .map_err(|source| MigrationError::ApplyEngineFailed {
                target_org: org.to_string(),
                source,
            })?;

        let removal = match self.options.delete_policy {
            DeletePolicy::WholeRecord => c.store.remove(source_id).await,
            DeletePolicy::PerTarget => c.store.remove_target(source_id, org).await,
        };
        let existed = removal.map_err(|source| MigrationError::MappingStoreWriteFailed {
            target_org: org.to_string(),
            source,
        })?;
        tracing::info!(mapping_removed = existed, "target deleted");

        Ok(TargetOutcome::Deleted)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("options", &self.options)
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}
