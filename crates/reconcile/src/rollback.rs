//! Checkpoints and rollback.
//!
//! [`RollbackManager::create_checkpoint`] snapshots an instance before a
//! mutating apply: observed state, copies of a few critical files, and a
//! handful of environment variables. [`RollbackManager::rollback_to_checkpoint`]
//! walks the instance back to that snapshot under the [`BestEffort`] policy.

use crate::checkpoint::{
    BackedUpFile, Checkpoint, CheckpointSummary, checkpoint_id, next_timestamp,
};
use crate::diff::{PackageAction, PackageDiff, ServiceAction};
use crate::error::{CheckpointError, RollbackError, StoreError};
use crate::history;
use crate::inspector::InstanceInspector;
use crate::managers::{self, shell_quote};
use crate::store::CheckpointStore;
use crate::template::VersionConstraint;
use crate::types::{InstanceState, PackageManagerKind, RunningService};
use chrono::Utc;
use remote::{Context, ExecutionResult, SharedExecutor};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::sync::Arc;

/// Files copied into every checkpoint.
pub const CRITICAL_FILES: [&str; 9] = [
    "/etc/passwd",
    "/etc/group",
    "/etc/shadow",
    "/etc/gshadow",
    "/etc/sudoers",
    "/etc/environment",
    "/etc/hosts",
    "/etc/apt/sources.list",
    history::HISTORY_PATH,
];

/// Environment variables recorded in every checkpoint.
pub const CAPTURED_ENV: [&str; 7] = [
    "PATH",
    "LD_LIBRARY_PATH",
    "PYTHONPATH",
    "CONDA_DEFAULT_ENV",
    "VIRTUAL_ENV",
    "JAVA_HOME",
    "SPACK_ROOT",
];

pub const ENV_COMMAND: &str = "env";

/// A rollback step that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStep {
    pub step: String,
    pub message: String,
}

impl fmt::Display for FailedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// What a completed rollback did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub checkpoint_id: String,
    pub instance_name: String,
    pub files_restored: usize,
    pub files_removed: usize,
    pub service_actions: usize,
    pub packages_removed: usize,
    pub warnings: Vec<String>,
}

/// Best-effort policy: attempt every step, collect the failures.
///
/// Transport errors still abort, since nothing after them can succeed.
#[derive(Debug, Default)]
pub struct BestEffort {
    failed: Vec<FailedStep>,
}

impl BestEffort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steps that failed so far.
    pub fn failed(&self) -> &[FailedStep] {
        &self.failed
    }

    /// Run one step. `Ok(false)` when it failed without a transport error.
    fn run<F>(&mut self, step: String, f: F) -> remote::Result<bool>
    where
        F: FnOnce() -> remote::Result<Result<(), String>>,
    {
        match f()? {
            Ok(()) => Ok(true),
            Err(message) => {
                log::warn!("Rollback step '{}' failed: {}", step, message);
                self.failed.push(FailedStep { step, message });
                Ok(false)
            }
        }
    }

    fn finish(self) -> Vec<FailedStep> {
        self.failed
    }
}

/// Turn an exit status into a step outcome.
fn exit_outcome(result: ExecutionResult) -> Result<(), String> {
    if result.success() {
        Ok(())
    } else if result.stderr_trimmed().is_empty() {
        Err(format!("exit code {}", result.exit_code))
    } else {
        Err(format!(
            "exit code {}: {}",
            result.exit_code,
            result.stderr_trimmed()
        ))
    }
}

/// Keep transport errors as `Err`, demote the rest to a step failure.
fn transfer_outcome(result: remote::Result<()>) -> remote::Result<Result<(), String>> {
    match result {
        Ok(()) => Ok(Ok(())),
        Err(e) if e.is_transport() => Err(e),
        Err(e) => Ok(Err(e.to_string())),
    }
}

/// Pick the captured variables out of `env` output.
pub fn parse_environment(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| CAPTURED_ENV.contains(key))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// systemctl actions that move `current` back to `saved`.
fn restore_actions(saved: &RunningService, current: Option<&RunningService>) -> Vec<ServiceAction> {
    let running = current.is_some_and(RunningService::is_running);
    let enabled = current.is_some_and(|c| c.enabled);
    let mut actions = Vec::new();
    match (saved.is_running(), running) {
        (true, false) => actions.push(ServiceAction::Start),
        (false, true) => actions.push(ServiceAction::Stop),
        _ => {}
    }
    match (saved.enabled, enabled) {
        (true, false) => actions.push(ServiceAction::Enable),
        (false, true) => actions.push(ServiceAction::Disable),
        _ => {}
    }
    actions
}

/// Creates, lists, prunes, and restores checkpoints.
#[derive(Clone)]
pub struct RollbackManager {
    executor: SharedExecutor,
    inspector: InstanceInspector,
    store: Arc<dyn CheckpointStore>,
}

impl RollbackManager {
    pub fn new(executor: SharedExecutor, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            inspector: InstanceInspector::new(executor.clone()),
            executor,
            store,
        }
    }

    /// Snapshot `instance` and store it. Returns the checkpoint id.
    pub fn create_checkpoint(
        &self,
        ctx: &Context,
        instance: &str,
        description: &str,
    ) -> Result<String, CheckpointError> {
        let state = self.inspector.inspect_instance(ctx, instance)?;
        self.create_from_state(ctx, instance, description, state)
    }

    /// Snapshot using an inspection the caller already ran.
    pub(crate) fn create_from_state(
        &self,
        ctx: &Context,
        instance: &str,
        description: &str,
        state: InstanceState,
    ) -> Result<String, CheckpointError> {
        let scratch = tempfile::tempdir()?;
        let mut files = Vec::new();
        let mut absent_files = Vec::new();
        let mut unreadable_files = Vec::new();

        for (index, path) in CRITICAL_FILES.iter().enumerate() {
            let local = scratch.path().join(index.to_string());
            match self.executor.get_file(ctx, instance, path, &local) {
                Ok(()) => files.push(BackedUpFile::new(*path, fs::read(&local)?)),
                Err(remote::Error::NotFound { .. }) => absent_files.push(path.to_string()),
                Err(e) if e.is_transport() => return Err(e.into()),
                Err(e) => {
                    log::warn!("Cannot back up {} on {}: {}", path, instance, e);
                    unreadable_files.push(path.to_string());
                }
            }
        }

        let env = self.executor.execute(ctx, instance, ENV_COMMAND)?;
        let environment = if env.success() {
            parse_environment(&env.stdout)
        } else {
            log::warn!("Could not read environment on {}", instance);
            BTreeMap::new()
        };

        let latest = self.store.latest(instance)?.map(|s| s.created_at);
        let created_at = next_timestamp(Utc::now(), latest);
        let checkpoint = Checkpoint {
            id: checkpoint_id(instance, created_at),
            instance_name: instance.to_string(),
            created_at,
            description: description.to_string(),
            packages: state.packages,
            managers: state.available_managers,
            services: state.services,
            users: state.users,
            files,
            absent_files,
            unreadable_files,
            environment,
        };
        self.store.save(&checkpoint)?;
        log::info!(
            "Created checkpoint {} ({} files, {} packages)",
            checkpoint.id,
            checkpoint.files.len(),
            checkpoint.packages.len()
        );
        Ok(checkpoint.id)
    }

    /// Checkpoints for `instance`, oldest first.
    pub fn list_checkpoints(&self, instance: &str) -> Result<Vec<CheckpointSummary>, StoreError> {
        self.store.list(instance)
    }

    pub fn get_checkpoint(&self, id: &str) -> Result<Option<Checkpoint>, StoreError> {
        self.store.get(id)
    }

    /// Delete all but the newest `keep` checkpoints. Returns the deleted ids.
    pub fn prune_checkpoints(&self, instance: &str, keep: usize) -> Result<Vec<String>, StoreError> {
        let listed = self.store.list(instance)?;
        let excess = listed.len().saturating_sub(keep);
        let mut deleted = Vec::new();
        for summary in listed.into_iter().take(excess) {
            if self.store.delete(&summary.id)? {
                deleted.push(summary.id);
            }
        }
        if !deleted.is_empty() {
            log::info!("Pruned {} checkpoint(s) for {}", deleted.len(), instance);
        }
        Ok(deleted)
    }

    /// Restore `instance` to checkpoint `id`.
    ///
    /// Every step is attempted. If any file or service step fails the
    /// checkpoint is kept and [`RollbackError::Incomplete`] lists the
    /// failures; on full success the checkpoint is deleted.
    pub fn rollback_to_checkpoint(
        &self,
        ctx: &Context,
        instance: &str,
        id: &str,
    ) -> Result<RollbackReport, RollbackError> {
        let checkpoint = self
            .store
            .get(id)?
            .ok_or_else(|| RollbackError::NotFound { id: id.to_string() })?;
        if checkpoint.instance_name != instance {
            return Err(RollbackError::WrongInstance {
                id: id.to_string(),
                instance: instance.to_string(),
                owner: checkpoint.instance_name,
            });
        }

        log::info!("Rolling back {} to {}", instance, id);
        let abort = |source| RollbackError::Transport {
            id: id.to_string(),
            source,
        };

        let current = self.inspector.inspect_instance(ctx, instance).map_err(abort)?;
        let mut report = RollbackReport {
            checkpoint_id: id.to_string(),
            instance_name: instance.to_string(),
            ..Default::default()
        };
        let mut policy = BestEffort::new();

        self.restore_files(ctx, instance, &checkpoint, &mut policy, &mut report)
            .map_err(abort)?;
        self.restore_services(ctx, instance, &checkpoint, &current, &mut policy, &mut report)
            .map_err(abort)?;
        self.remove_new_packages(ctx, instance, &checkpoint, &current, &mut report)
            .map_err(abort)?;
        self.report_environment_drift(ctx, instance, &checkpoint, &mut report)
            .map_err(abort)?;

        let failed = policy.finish();
        if !failed.is_empty() {
            return Err(RollbackError::Incomplete {
                id: id.to_string(),
                failed,
            });
        }

        self.store.delete(id)?;
        log::info!("Rolled back {} to {}", instance, id);
        Ok(report)
    }

    fn restore_files(
        &self,
        ctx: &Context,
        instance: &str,
        checkpoint: &Checkpoint,
        policy: &mut BestEffort,
        report: &mut RollbackReport,
    ) -> remote::Result<()> {
        let scratch = tempfile::tempdir()?;
        for (index, file) in checkpoint.files.iter().enumerate() {
            let step = format!("restore {}", file.path);
            let local = scratch.path().join(index.to_string());
            let restored = policy.run(step, || {
                if !file.verify() {
                    return Ok(Err("checksum mismatch in stored copy".to_string()));
                }
                fs::write(&local, &file.contents)?;
                transfer_outcome(self.executor.copy_file(ctx, instance, &local, &file.path))
            })?;
            if restored {
                report.files_restored += 1;
            }
        }

        for path in &checkpoint.absent_files {
            let command = format!("rm -f {}", shell_quote(path));
            let removed = policy.run(format!("remove {}", path), || {
                self.executor.execute(ctx, instance, &command).map(exit_outcome)
            })?;
            if removed {
                report.files_removed += 1;
            }
        }
        Ok(())
    }

    fn restore_services(
        &self,
        ctx: &Context,
        instance: &str,
        checkpoint: &Checkpoint,
        current: &InstanceState,
        policy: &mut BestEffort,
        report: &mut RollbackReport,
    ) -> remote::Result<()> {
        let mut plan: Vec<(&str, ServiceAction)> = Vec::new();
        for saved in &checkpoint.services {
            for action in restore_actions(saved, current.service(&saved.name)) {
                plan.push((saved.name.as_str(), action));
            }
        }

        let known: BTreeSet<&str> = checkpoint.services.iter().map(|s| s.name.as_str()).collect();
        for service in &current.services {
            if known.contains(service.name.as_str()) {
                continue;
            }
            if service.is_running() {
                plan.push((service.name.as_str(), ServiceAction::Stop));
            }
            if service.enabled {
                plan.push((service.name.as_str(), ServiceAction::Disable));
            }
        }

        for (name, action) in plan {
            let command = format!("systemctl {} {}", action.verb(), shell_quote(name));
            let done = policy.run(format!("{} {}", action.verb(), name), || {
                self.executor.execute(ctx, instance, &command).map(exit_outcome)
            })?;
            if done {
                report.service_actions += 1;
            }
        }
        Ok(())
    }

    /// Remove packages that appeared after the checkpoint. Failures are
    /// warnings, never failed steps.
    fn remove_new_packages(
        &self,
        ctx: &Context,
        instance: &str,
        checkpoint: &Checkpoint,
        current: &InstanceState,
        report: &mut RollbackReport,
    ) -> remote::Result<()> {
        let saved: BTreeSet<(PackageManagerKind, &str)> = checkpoint
            .packages
            .iter()
            .map(|p| (p.manager, p.name.as_str()))
            .collect();

        let mut by_manager: BTreeMap<PackageManagerKind, Vec<PackageDiff>> = BTreeMap::new();
        for package in &current.packages {
            if !checkpoint.managers.contains(&package.manager)
                || saved.contains(&(package.manager, package.name.as_str()))
            {
                continue;
            }
            by_manager.entry(package.manager).or_default().push(PackageDiff {
                name: package.name.clone(),
                manager: package.manager,
                current_version: Some(package.version.clone()),
                target_version: None,
                constraint: VersionConstraint::Any,
                action: PackageAction::Remove,
            });
        }

        for (kind, packages) in by_manager {
            let Some(manager) = managers::for_kind(kind) else {
                continue;
            };
            let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
            let result = self
                .executor
                .execute_script(ctx, instance, &manager.remove_script(&packages))?;
            if result.success() {
                report.packages_removed += packages.len();
            } else {
                report.warnings.push(format!(
                    "could not remove {} package(s) {}: {}",
                    kind,
                    names.join(", "),
                    result.stderr_trimmed()
                ));
            }
        }
        Ok(())
    }

    fn report_environment_drift(
        &self,
        ctx: &Context,
        instance: &str,
        checkpoint: &Checkpoint,
        report: &mut RollbackReport,
    ) -> remote::Result<()> {
        let result = self.executor.execute(ctx, instance, ENV_COMMAND)?;
        if !result.success() {
            report
                .warnings
                .push("could not read environment to check for drift".to_string());
            return Ok(());
        }

        let now = parse_environment(&result.stdout);
        for key in CAPTURED_ENV {
            let before = checkpoint.environment.get(key);
            let after = now.get(key);
            if before != after {
                report.warnings.push(format!(
                    "{} changed since checkpoint: {} -> {}",
                    key,
                    before.map_or("<unset>", String::as_str),
                    after.map_or("<unset>", String::as_str)
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::{SERVICE_FILES_COMMAND, SERVICE_UNITS_COMMAND};
    use crate::managers::pip;
    use crate::store::MemoryCheckpointStore;
    use remote::{CallKind, Fault, ScriptedExecutor};

    const UNITS_BEFORE: &str = "ssh.service loaded active running OpenSSH server\n";
    const FILES_BEFORE: &str = "ssh.service enabled enabled\n";

    fn setup() -> (Arc<ScriptedExecutor>, Arc<MemoryCheckpointStore>, RollbackManager) {
        let executor = Arc::new(ScriptedExecutor::new());
        executor.put_file("/etc/passwd", "root:x:0:0:root:/root:/bin/bash\n");
        executor.put_file("/etc/hosts", "127.0.0.1 localhost\n");
        executor.respond(SERVICE_UNITS_COMMAND, ExecutionResult::ok(UNITS_BEFORE));
        executor.respond(SERVICE_FILES_COMMAND, ExecutionResult::ok(FILES_BEFORE));
        executor.respond(pip::LIST_COMMAND, ExecutionResult::ok(r#"[{"name": "pip", "version": "24.0"}]"#));
        executor.respond(ENV_COMMAND, ExecutionResult::ok("HOME=/root\nPATH=/usr/bin:/bin\n"));

        let store = Arc::new(MemoryCheckpointStore::new());
        let manager = RollbackManager::new(executor.clone(), store.clone());
        (executor, store, manager)
    }

    #[test]
    fn test_parse_environment_keeps_captured_keys() {
        let env = parse_environment("HOME=/root\nPATH=/usr/bin\nJAVA_HOME=/opt/jdk\nweird line\n");
        assert_eq!(env.len(), 2);
        assert_eq!(env["PATH"], "/usr/bin");
        assert_eq!(env["JAVA_HOME"], "/opt/jdk");
    }

    #[test]
    fn test_restore_actions() {
        let saved = RunningService {
            name: "nginx".into(),
            status: crate::types::ServiceStatus::Running,
            enabled: true,
        };
        assert_eq!(
            restore_actions(&saved, None),
            vec![ServiceAction::Start, ServiceAction::Enable]
        );
        assert!(restore_actions(&saved, Some(&saved)).is_empty());
    }

    #[test]
    fn test_checkpoint_records_files_and_absences() {
        let (executor, store, manager) = setup();
        let ctx = Context::background();
        let id = manager.create_checkpoint(&ctx, "ws1", "manual").unwrap();
        assert!(id.starts_with("ws1-"));
        assert!(id.ends_with('Z'));

        let checkpoint = store.get(&id).unwrap().unwrap();
        let backed_up: Vec<_> = checkpoint.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(backed_up, ["/etc/passwd", "/etc/hosts"]);
        assert_eq!(checkpoint.absent_files.len(), CRITICAL_FILES.len() - 2);
        assert_eq!(checkpoint.environment["PATH"], "/usr/bin:/bin");
        assert!(!checkpoint.environment.contains_key("HOME"));
        assert_eq!(checkpoint.services.len(), 1);

        let env_calls = executor
            .calls()
            .iter()
            .filter(|c| c.kind == CallKind::Execute && c.payload == ENV_COMMAND)
            .count();
        assert_eq!(env_calls, 1);
    }

    #[test]
    fn test_checkpoint_ids_increase() {
        let (_executor, _store, manager) = setup();
        let ctx = Context::background();
        let ids: Vec<String> = (0..5)
            .map(|_| manager.create_checkpoint(&ctx, "ws1", "loop").unwrap())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, ids);
    }

    #[test]
    fn test_checkpoint_aborts_on_transport_failure() {
        let (executor, store, manager) = setup();
        executor.fail_on(ENV_COMMAND, Fault::Timeout);
        let err = manager
            .create_checkpoint(&Context::background(), "ws1", "manual")
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Transport(remote::Error::Timeout)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_rollback_restores_and_consumes_checkpoint() {
        let (executor, store, manager) = setup();
        let ctx = Context::background();
        let id = manager.create_checkpoint(&ctx, "ws1", "before jupyter").unwrap();

        // the apply: new user, new service, new package, history written
        executor.put_file("/etc/passwd", "root:x:0:0:root:/root:/bin/bash\nresearcher:x:1001:1001::/home/researcher:/bin/bash\n");
        executor.put_file(history::HISTORY_PATH, "[]");
        executor.respond(
            SERVICE_UNITS_COMMAND,
            ExecutionResult::ok(format!("{UNITS_BEFORE}jupyter.service loaded active running Jupyter\n")),
        );
        executor.respond(
            SERVICE_FILES_COMMAND,
            ExecutionResult::ok(format!("{FILES_BEFORE}jupyter.service enabled enabled\n")),
        );
        executor.respond(
            pip::LIST_COMMAND,
            ExecutionResult::ok(r#"[{"name": "pip", "version": "24.0"}, {"name": "numpy", "version": "1.26.4"}]"#),
        );
        executor.clear_calls();

        let report = manager.rollback_to_checkpoint(&ctx, "ws1", &id).unwrap();
        assert_eq!(
            executor.file("/etc/passwd").unwrap(),
            b"root:x:0:0:root:/root:/bin/bash\n".to_vec()
        );
        assert_eq!(report.files_restored, 2);
        assert_eq!(report.service_actions, 2);
        assert_eq!(report.packages_removed, 1);

        let commands = executor.commands();
        assert!(commands.contains(&"systemctl stop jupyter".to_string()));
        assert!(commands.contains(&"systemctl disable jupyter".to_string()));
        assert!(commands.contains(&format!("rm -f {}", history::HISTORY_PATH)));
        assert!(commands.iter().any(|c| c.contains("pip uninstall -y numpy")));
        assert!(!commands.iter().any(|c| c.contains("uninstall -y pip")));

        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_failed_service_step_keeps_checkpoint() {
        let (executor, store, manager) = setup();
        let ctx = Context::background();
        let id = manager.create_checkpoint(&ctx, "ws1", "manual").unwrap();

        executor.respond(SERVICE_UNITS_COMMAND, ExecutionResult::ok("ssh.service loaded inactive dead OpenSSH\n"));
        executor.respond("systemctl start ssh", ExecutionResult::failed(1, "Job failed"));

        let err = manager.rollback_to_checkpoint(&ctx, "ws1", &id).unwrap_err();
        match err {
            RollbackError::Incomplete { failed, .. } => {
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].step, "start ssh");
                assert!(failed[0].message.contains("Job failed"));
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
        assert!(store.get(&id).unwrap().is_some());
    }

    #[test]
    fn test_package_removal_failure_is_a_warning() {
        let (executor, store, manager) = setup();
        let ctx = Context::background();
        let id = manager.create_checkpoint(&ctx, "ws1", "manual").unwrap();

        executor.respond(
            pip::LIST_COMMAND,
            ExecutionResult::ok(r#"[{"name": "pip", "version": "24.0"}, {"name": "numpy", "version": "1.26.4"}]"#),
        );
        executor.respond_contains("pip uninstall", ExecutionResult::failed(1, "permission denied"));

        let report = manager.rollback_to_checkpoint(&ctx, "ws1", &id).unwrap();
        assert_eq!(report.packages_removed, 0);
        assert!(report.warnings.iter().any(|w| w.contains("numpy")));
        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_environment_drift_is_reported() {
        let (executor, _store, manager) = setup();
        let ctx = Context::background();
        let id = manager.create_checkpoint(&ctx, "ws1", "manual").unwrap();

        executor.respond(ENV_COMMAND, ExecutionResult::ok("PATH=/opt/conda/bin:/usr/bin:/bin\n"));
        let report = manager.rollback_to_checkpoint(&ctx, "ws1", &id).unwrap();
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("PATH changed"));
    }

    #[test]
    fn test_rollback_errors() {
        let (executor, _store, manager) = setup();
        let ctx = Context::background();
        assert!(matches!(
            manager.rollback_to_checkpoint(&ctx, "ws1", "nope"),
            Err(RollbackError::NotFound { .. })
        ));

        let id = manager.create_checkpoint(&ctx, "ws1", "manual").unwrap();
        assert!(matches!(
            manager.rollback_to_checkpoint(&ctx, "ws2", &id),
            Err(RollbackError::WrongInstance { .. })
        ));

        executor.set_unreachable(true);
        assert!(matches!(
            manager.rollback_to_checkpoint(&ctx, "ws1", &id),
            Err(RollbackError::Transport { .. })
        ));
    }

    #[test]
    fn test_prune_keeps_newest() {
        let (_executor, _store, manager) = setup();
        let ctx = Context::background();
        let ids: Vec<String> = (0..4)
            .map(|_| manager.create_checkpoint(&ctx, "ws1", "loop").unwrap())
            .collect();

        let deleted = manager.prune_checkpoints("ws1", 1).unwrap();
        assert_eq!(deleted, ids[..3]);
        let left = manager.list_checkpoints("ws1").unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, ids[3]);
        assert!(manager.prune_checkpoints("ws1", 5).unwrap().is_empty());
    }
}
