//! The template application pipeline.
//!
//! `Validate → Inspect → Diff → {DryRun | ConflictGate} → Checkpoint → Apply
//! → RecordHistory`, one instance per call.

use crate::apply::{ApplyEngine, ApplyFailure, ApplyResult, CategoryReport};
use crate::checkpoint::CheckpointSummary;
use crate::diff::{TemplateDiff, calculate_diff};
use crate::error::{CheckpointError, EngineError, Result};
use crate::history;
use crate::inspector::InstanceInspector;
use crate::rollback::{RollbackManager, RollbackReport};
use crate::store::CheckpointStore;
use crate::template::Template;
use crate::types::{AppliedTemplate, InstanceState, PackageManagerKind};
use chrono::Utc;
use remote::{Context, SharedExecutor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One request to bring an instance to a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyRequest {
    pub instance_name: String,
    pub template: Option<Template>,
    /// Move the template's default packages under this manager
    #[serde(default)]
    pub package_manager: Option<PackageManagerKind>,
    #[serde(default)]
    pub dry_run: bool,
    /// Apply despite conflicts
    #[serde(default)]
    pub force: bool,
}

impl ApplyRequest {
    pub fn new(instance_name: impl Into<String>, template: Template) -> Self {
        Self {
            instance_name: instance_name.into(),
            template: Some(template),
            package_manager: None,
            dry_run: false,
            force: false,
        }
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn with_package_manager(mut self, kind: PackageManagerKind) -> Self {
        self.package_manager = Some(kind);
        self
    }
}

/// What an apply (or dry run) did.
///
/// `success == false` with a `failure` means the apply stopped part way;
/// `rollback_checkpoint` then names the checkpoint to restore.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyResponse {
    pub instance_name: String,
    pub template_name: String,
    pub success: bool,
    pub dry_run: bool,
    pub message: String,
    pub packages_installed: usize,
    pub packages_upgraded: usize,
    pub packages_removed: usize,
    pub services_configured: usize,
    pub users_created: usize,
    pub users_modified: usize,
    pub intended_ports: Vec<u16>,
    pub rollback_checkpoint: Option<String>,
    pub categories: Vec<CategoryReport>,
    pub failure: Option<ApplyFailure>,
    pub warnings: Vec<String>,
    pub execution_time: Duration,
    /// The computed diff, for dry runs
    pub diff: Option<TemplateDiff>,
}

impl ApplyResponse {
    fn counts_from_diff(&mut self, diff: &TemplateDiff) {
        self.packages_installed = diff.packages_to_install.len();
        self.packages_upgraded = diff.packages_to_upgrade.len();
        self.packages_removed = diff.packages_to_remove.len();
        self.services_configured = diff.services_to_configure.len();
        self.users_created = diff.users_to_create.len();
        self.users_modified = diff.users_to_modify.len();
        self.intended_ports = diff.ports_to_open.clone();
    }

    fn counts_from_result(&mut self, result: &ApplyResult) {
        self.packages_installed = result.packages_installed;
        self.packages_upgraded = result.packages_upgraded;
        self.packages_removed = result.packages_removed;
        self.services_configured = result.services_configured;
        self.users_created = result.users_created;
        self.users_modified = result.users_modified;
        self.intended_ports = result.ports_intended.clone();
    }
}

/// Reject malformed requests before touching the instance. Returns the
/// template to apply, retargeted when the request overrides the manager.
fn validate(request: &ApplyRequest) -> Result<Template> {
    if request.instance_name.trim().is_empty() {
        return Err(EngineError::Validation("instance name is empty".into()));
    }
    let Some(template) = &request.template else {
        return Err(EngineError::Validation("no template given".into()));
    };
    if template.name.trim().is_empty() {
        return Err(EngineError::Validation("template name is empty".into()));
    }
    match request.package_manager {
        Some(PackageManagerKind::Unknown) => Err(EngineError::Validation(
            "package manager override must name a concrete manager".into(),
        )),
        Some(kind) => Ok(template.retarget(kind)),
        None => Ok(template.clone()),
    }
}

/// Orchestrates inspection, diffing, checkpointing, applying, and rollback
/// for single instances.
#[derive(Clone)]
pub struct TemplateEngine {
    executor: SharedExecutor,
    inspector: InstanceInspector,
    applier: ApplyEngine,
    rollback: RollbackManager,
}

impl TemplateEngine {
    pub fn new(executor: SharedExecutor, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            inspector: InstanceInspector::new(executor.clone()),
            applier: ApplyEngine::new(executor.clone()),
            rollback: RollbackManager::new(executor.clone(), store),
            executor,
        }
    }

    /// The rollback manager backing this engine.
    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    /// Run the full pipeline for one request.
    pub fn apply_template(&self, ctx: &Context, request: ApplyRequest) -> Result<ApplyResponse> {
        let started = Instant::now();
        let template = validate(&request)?;
        let instance = request.instance_name.as_str();
        log::info!(
            "Applying template '{}' to {}{}",
            template.name,
            instance,
            if request.dry_run { " (dry run)" } else { "" }
        );

        let state = self.inspect(ctx, instance)?;
        let diff = calculate_diff(&state, &template).map_err(|source| EngineError::Diff {
            template: template.name.clone(),
            source,
        })?;
        log::info!("Diff for {}: {}", instance, diff.summary());

        let mut response = ApplyResponse {
            instance_name: instance.to_string(),
            template_name: template.name.clone(),
            dry_run: request.dry_run,
            ..Default::default()
        };
        let conflict_warnings: Vec<String> =
            diff.conflicts_found.iter().map(ToString::to_string).collect();

        if request.dry_run {
            response.success = true;
            response.counts_from_diff(&diff);
            response.warnings = conflict_warnings;
            response.message = format!("Dry run for '{}' on {}: {}", template.name, instance, diff.summary());
            response.diff = Some(diff);
            response.execution_time = started.elapsed();
            return Ok(response);
        }

        if diff.has_conflicts() {
            if !request.force {
                return Err(EngineError::Conflict {
                    instance: instance.to_string(),
                    template: template.name.clone(),
                    conflicts: diff.conflicts_found,
                });
            }
            for warning in &conflict_warnings {
                log::warn!("Forcing past conflict on {}: {}", instance, warning);
            }
            response.warnings = conflict_warnings;
        }

        if !diff.has_changes() {
            response.success = true;
            response.message = format!(
                "{} already conforms to template '{}'",
                instance, template.name
            );
            response.execution_time = started.elapsed();
            return Ok(response);
        }

        let history = state.applied_templates.clone();
        let checkpoint_id = self
            .rollback
            .create_from_state(
                ctx,
                instance,
                &format!("before applying template '{}'", template.name),
                state,
            )
            .map_err(|source| EngineError::Checkpoint {
                instance: instance.to_string(),
                source,
            })?;
        response.rollback_checkpoint = Some(checkpoint_id.clone());

        let result = self
            .applier
            .apply_changes(ctx, instance, &diff, &template)
            .map_err(|e| EngineError::ApplyTransport {
                instance: instance.to_string(),
                category: e.category,
                checkpoint_id: checkpoint_id.clone(),
                source: e.source,
            })?;

        response.counts_from_result(&result);
        response.success = result.success;
        response.categories = result.categories;
        response.warnings.extend(result.warnings);

        if let Some(failure) = result.failure {
            response.message = format!(
                "Template '{}' partially applied to {}: {} (rollback with checkpoint {})",
                template.name, instance, failure, checkpoint_id
            );
            response.failure = Some(failure);
        } else {
            let entry = AppliedTemplate {
                name: template.name.clone(),
                version: template.version.clone(),
                applied_at: Utc::now(),
                package_manager: template.target_manager(),
                checkpoint_id: Some(checkpoint_id),
                packages: result.installed,
                services: template.services.iter().map(|s| s.name.clone()).collect(),
                users: template.users.iter().map(|u| u.name.clone()).collect(),
            };
            if let Err(warning) = self.record_history(ctx, instance, history, entry) {
                log::warn!("{}", warning);
                response.warnings.push(warning);
            }
            response.message = format!("Applied template '{}' to {}", template.name, instance);
        }

        response.execution_time = started.elapsed();
        log::info!("{}", response.message);
        Ok(response)
    }

    /// Append `entry` to the instance's history marker file.
    fn record_history(
        &self,
        ctx: &Context,
        instance: &str,
        mut history: Vec<AppliedTemplate>,
        entry: AppliedTemplate,
    ) -> std::result::Result<(), String> {
        history.push(entry);
        let script = history::write_script(&history)
            .map_err(|e| format!("could not encode template history: {}", e))?;
        match self.executor.execute_script(ctx, instance, &script) {
            Ok(result) if result.success() => Ok(()),
            Ok(result) => Err(format!(
                "could not record template history on {} (exit {}): {}",
                instance,
                result.exit_code,
                result.stderr_trimmed()
            )),
            Err(e) => Err(format!("could not record template history on {}: {}", instance, e)),
        }
    }

    /// Diff without applying.
    pub fn diff_template(
        &self,
        ctx: &Context,
        instance: &str,
        template: &Template,
    ) -> Result<TemplateDiff> {
        let state = self.inspect(ctx, instance)?;
        calculate_diff(&state, template).map_err(|source| EngineError::Diff {
            template: template.name.clone(),
            source,
        })
    }

    /// Snapshot an instance's current state.
    pub fn inspect(&self, ctx: &Context, instance: &str) -> Result<InstanceState> {
        self.inspector
            .inspect_instance(ctx, instance)
            .map_err(|source| EngineError::InspectionTransport {
                instance: instance.to_string(),
                source,
            })
    }

    pub fn list_checkpoints(&self, instance: &str) -> Result<Vec<CheckpointSummary>> {
        self.rollback
            .list_checkpoints(instance)
            .map_err(|e| EngineError::Checkpoint {
                instance: instance.to_string(),
                source: CheckpointError::Store(e),
            })
    }

    pub fn rollback_to_checkpoint(
        &self,
        ctx: &Context,
        instance: &str,
        checkpoint_id: &str,
    ) -> Result<RollbackReport> {
        Ok(self.rollback.rollback_to_checkpoint(ctx, instance, checkpoint_id)?)
    }

    /// Keep the newest `keep` checkpoints. Returns the deleted ids.
    pub fn prune_checkpoints(&self, instance: &str, keep: usize) -> Result<Vec<String>> {
        self.rollback
            .prune_checkpoints(instance, keep)
            .map_err(|e| EngineError::Checkpoint {
                instance: instance.to_string(),
                source: CheckpointError::Store(e),
            })
    }
}
