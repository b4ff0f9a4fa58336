//! Incremental apply: turns a [`TemplateDiff`] into remote scripts.
//!
//! Categories run in a fixed order (install, upgrade, remove, services,
//! users, ports) under the [`FailFast`] policy: the first non-zero exit
//! stops the run and every later category is reported as not attempted.

use crate::diff::{PackageDiff, TemplateDiff, UserAction};
use crate::error::ApplyError;
use crate::managers::{self, command_line, shell_quote};
use crate::template::Template;
use crate::types::{PackageManagerKind, RecordedPackage};
use remote::{Context, SharedExecutor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// `useradd` exit status for an existing login.
const USERADD_EXISTS: i32 = 9;

/// One step of an apply, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyCategory {
    Install,
    Upgrade,
    Remove,
    Services,
    Users,
    Ports,
}

impl ApplyCategory {
    pub const ORDER: [Self; 6] = [
        Self::Install,
        Self::Upgrade,
        Self::Remove,
        Self::Services,
        Self::Users,
        Self::Ports,
    ];
}

impl fmt::Display for ApplyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Remove => "remove",
            Self::Services => "services",
            Self::Users => "users",
            Self::Ports => "ports",
        })
    }
}

/// How far a category got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Applied,
    Failed,
    NotAttempted,
}

/// Outcome of one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub category: ApplyCategory,
    pub status: CategoryStatus,
    /// Changes completed in this category
    pub changes: usize,
}

/// The command that stopped an apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyFailure {
    pub category: ApplyCategory,
    pub exit_code: i32,
    pub stderr: String,
}

impl fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed with exit code {}: {}",
            self.category,
            self.exit_code,
            self.stderr.trim()
        )
    }
}

/// Result of [`ApplyEngine::apply_changes`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub success: bool,
    pub packages_installed: usize,
    pub packages_upgraded: usize,
    pub packages_removed: usize,
    pub services_configured: usize,
    pub users_created: usize,
    pub users_modified: usize,
    /// Ports the caller's firewall layer should open
    pub ports_intended: Vec<u16>,
    pub categories: Vec<CategoryReport>,
    pub failure: Option<ApplyFailure>,
    pub warnings: Vec<String>,
    /// Packages this run installed, for the history record
    pub installed: Vec<RecordedPackage>,
}

/// What a category step did.
enum StepOutcome {
    Done(usize),
    Failed {
        changes: usize,
        exit_code: i32,
        stderr: String,
    },
}

/// Fail-fast policy: run categories until the first failure, then mark the
/// rest not attempted.
#[derive(Debug, Default)]
pub struct FailFast {
    categories: Vec<CategoryReport>,
    failure: Option<ApplyFailure>,
}

impl FailFast {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a category has failed.
    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Run `step` for `category` unless an earlier category failed.
    ///
    /// Returns the number of changes made. Transport errors propagate.
    fn run<F>(&mut self, category: ApplyCategory, step: F) -> Result<usize, ApplyError>
    where
        F: FnOnce() -> remote::Result<StepOutcome>,
    {
        if self.has_failed() {
            self.categories.push(CategoryReport {
                category,
                status: CategoryStatus::NotAttempted,
                changes: 0,
            });
            return Ok(0);
        }

        let outcome = step().map_err(|source| {
            log::warn!("Transport failure during {}: {}", category, source);
            ApplyError { category, source }
        })?;

        match outcome {
            StepOutcome::Done(changes) => {
                self.categories.push(CategoryReport {
                    category,
                    status: CategoryStatus::Applied,
                    changes,
                });
                Ok(changes)
            }
            StepOutcome::Failed {
                changes,
                exit_code,
                stderr,
            } => {
                log::warn!("{} failed with exit code {}", category, exit_code);
                self.categories.push(CategoryReport {
                    category,
                    status: CategoryStatus::Failed,
                    changes,
                });
                self.failure = Some(ApplyFailure {
                    category,
                    exit_code,
                    stderr,
                });
                Ok(changes)
            }
        }
    }

    fn finish(self) -> (Vec<CategoryReport>, Option<ApplyFailure>) {
        (self.categories, self.failure)
    }
}

/// Users actually created, and existing users given new groups.
#[derive(Debug, Default)]
struct UserCounts {
    created: usize,
    modified: usize,
}

/// Executes diffs on an instance.
#[derive(Clone)]
pub struct ApplyEngine {
    executor: SharedExecutor,
}

impl ApplyEngine {
    pub fn new(executor: SharedExecutor) -> Self {
        Self { executor }
    }

    /// Apply `diff` to `instance`. `template` supplies user shells.
    ///
    /// A non-zero exit yields `Ok` with `success == false`; only transport
    /// failures are `Err`.
    pub fn apply_changes(
        &self,
        ctx: &Context,
        instance: &str,
        diff: &TemplateDiff,
        template: &Template,
    ) -> Result<ApplyResult, ApplyError> {
        let mut result = ApplyResult::default();
        let mut policy = FailFast::new();
        let mut installed = Vec::new();

        result.packages_installed = policy.run(ApplyCategory::Install, || {
            self.package_step(ctx, instance, &diff.packages_to_install, false, &mut installed)
        })?;
        result.packages_upgraded = policy.run(ApplyCategory::Upgrade, || {
            self.package_step(ctx, instance, &diff.packages_to_upgrade, false, &mut Vec::new())
        })?;
        result.packages_removed = policy.run(ApplyCategory::Remove, || {
            self.package_step(ctx, instance, &diff.packages_to_remove, true, &mut Vec::new())
        })?;
        result.services_configured =
            policy.run(ApplyCategory::Services, || self.service_step(ctx, instance, diff))?;

        let mut users = UserCounts::default();
        policy.run(ApplyCategory::Users, || {
            self.user_step(ctx, instance, diff, template, &mut users, &mut result.warnings)
        })?;
        result.users_created = users.created;
        result.users_modified = users.modified;

        let ports = diff.ports_to_open.len();
        policy.run(ApplyCategory::Ports, || Ok(StepOutcome::Done(ports)))?;
        if !policy.has_failed() {
            result.ports_intended = diff.ports_to_open.clone();
        }

        let (categories, failure) = policy.finish();
        result.success = failure.is_none();
        result.categories = categories;
        result.failure = failure;
        result.installed = installed;
        Ok(result)
    }

    /// Install, upgrade, or remove packages, one script per manager.
    fn package_step(
        &self,
        ctx: &Context,
        instance: &str,
        packages: &[PackageDiff],
        remove: bool,
        done: &mut Vec<RecordedPackage>,
    ) -> remote::Result<StepOutcome> {
        let mut by_manager: BTreeMap<PackageManagerKind, Vec<PackageDiff>> = BTreeMap::new();
        for package in packages {
            by_manager
                .entry(package.manager)
                .or_default()
                .push(package.clone());
        }

        let mut changes = 0;
        for (kind, group) in by_manager {
            let Some(manager) = managers::for_kind(kind) else {
                return Ok(StepOutcome::Failed {
                    changes,
                    exit_code: -1,
                    stderr: format!("no package manager for {}", kind),
                });
            };
            let script = if remove {
                manager.remove_script(&group)
            } else {
                manager.install_script(&group)
            };

            log::info!(
                "{} {} {} package(s) on {}",
                if remove { "Removing" } else { "Installing" },
                group.len(),
                kind,
                instance
            );
            let result = self.executor.execute_script(ctx, instance, &script)?;
            if !result.success() {
                return Ok(StepOutcome::Failed {
                    changes,
                    exit_code: result.exit_code,
                    stderr: result.stderr,
                });
            }
            changes += group.len();
            done.extend(group.into_iter().map(|p| RecordedPackage {
                name: p.name,
                manager: p.manager,
            }));
        }
        Ok(StepOutcome::Done(changes))
    }

    /// One script covering every service action.
    fn service_step(
        &self,
        ctx: &Context,
        instance: &str,
        diff: &TemplateDiff,
    ) -> remote::Result<StepOutcome> {
        if diff.services_to_configure.is_empty() {
            return Ok(StepOutcome::Done(0));
        }
        let script = service_script(diff);
        let result = self.executor.execute_script(ctx, instance, &script)?;
        if result.success() {
            Ok(StepOutcome::Done(diff.services_to_configure.len()))
        } else {
            Ok(StepOutcome::Failed {
                changes: 0,
                exit_code: result.exit_code,
                stderr: result.stderr,
            })
        }
    }

    /// `useradd` per new user, then one `usermod -aG` per missing group.
    ///
    /// Returns users touched; `created` counts new accounts.
    fn user_step(
        &self,
        ctx: &Context,
        instance: &str,
        diff: &TemplateDiff,
        template: &Template,
        counts: &mut UserCounts,
        warnings: &mut Vec<String>,
    ) -> remote::Result<StepOutcome> {
        let mut touched = 0;
        for user in diff.users_to_create.iter().chain(&diff.users_to_modify) {
            if user.action == UserAction::Create {
                let shell = template
                    .user(&user.name)
                    .map_or("/bin/bash", |spec| spec.shell_or_default());
                let command = command_line(
                    "useradd -m -s",
                    [shell.to_string(), user.name.clone()],
                );
                let result = self.executor.execute(ctx, instance, &command)?;
                match result.exit_code {
                    0 => counts.created += 1,
                    USERADD_EXISTS => {
                        warnings.push(format!("user {} already exists; skipped creation", user.name));
                    }
                    code => {
                        return Ok(StepOutcome::Failed {
                            changes: touched,
                            exit_code: code,
                            stderr: result.stderr,
                        });
                    }
                }
            }

            for group in &user.groups {
                let command = format!("usermod -aG {} {}", shell_quote(group), shell_quote(&user.name));
                let result = self.executor.execute(ctx, instance, &command)?;
                if !result.success() {
                    return Ok(StepOutcome::Failed {
                        changes: touched,
                        exit_code: result.exit_code,
                        stderr: result.stderr,
                    });
                }
            }
            if user.action == UserAction::AddGroups {
                counts.modified += 1;
            }
            touched += 1;
        }
        Ok(StepOutcome::Done(touched))
    }
}

/// systemctl commands for every service change, in diff order.
pub fn service_script(diff: &TemplateDiff) -> String {
    let mut script = String::from("set -e\n");
    for service in &diff.services_to_configure {
        for action in &service.actions {
            script.push_str(&format!(
                "systemctl {} {}\n",
                action.verb(),
                shell_quote(&service.name)
            ));
        }
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{PackageAction, ServiceAction, ServiceDiff, UserDiff};
    use crate::template::VersionConstraint;
    use remote::{ExecutionResult, Fault, ScriptedExecutor};
    use std::sync::Arc;

    fn package(name: &str, manager: PackageManagerKind, action: PackageAction) -> PackageDiff {
        PackageDiff {
            name: name.into(),
            manager,
            current_version: None,
            target_version: None,
            constraint: VersionConstraint::Any,
            action,
        }
    }

    fn full_diff() -> TemplateDiff {
        TemplateDiff {
            packages_to_install: vec![
                package("git", PackageManagerKind::Apt, PackageAction::Install),
                package("numpy", PackageManagerKind::Pip, PackageAction::Install),
            ],
            packages_to_remove: vec![package("htop", PackageManagerKind::Apt, PackageAction::Remove)],
            services_to_configure: vec![ServiceDiff {
                name: "jupyter".into(),
                current_status: None,
                actions: vec![ServiceAction::Start, ServiceAction::Enable],
            }],
            users_to_create: vec![UserDiff {
                name: "researcher".into(),
                groups: vec!["sudo".into()],
                action: UserAction::Create,
            }],
            ports_to_open: vec![8888],
            ..Default::default()
        }
    }

    fn template() -> Template {
        Template::new("jupyter").with_user("researcher", ["sudo"])
    }

    #[test]
    fn test_full_apply_order_and_counts() {
        let exec = Arc::new(ScriptedExecutor::new());
        let engine = ApplyEngine::new(exec.clone());
        let result = engine
            .apply_changes(&Context::background(), "ws1", &full_diff(), &template())
            .unwrap();

        assert!(result.success);
        assert_eq!(result.packages_installed, 2);
        assert_eq!(result.packages_removed, 1);
        assert_eq!(result.services_configured, 1);
        assert_eq!(result.users_created, 1);
        assert_eq!(result.users_modified, 0);
        assert_eq!(result.ports_intended, [8888]);
        assert_eq!(result.installed.len(), 2);
        assert!(
            result
                .categories
                .iter()
                .all(|c| c.status == CategoryStatus::Applied)
        );

        let commands = exec.commands();
        assert!(commands[0].contains("apt-get install -y git"));
        assert!(commands[1].contains("pip install numpy"));
        assert!(commands[2].contains("apt-get remove -y htop"));
        assert_eq!(commands[3], "set -e\nsystemctl start jupyter\nsystemctl enable jupyter\n");
        assert_eq!(commands[4], "useradd -m -s /bin/bash researcher");
        assert_eq!(commands[5], "usermod -aG sudo researcher");
        assert_eq!(commands.len(), 6);
    }

    #[test]
    fn test_fail_fast_stops_at_first_failure() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_contains("apt-get remove", ExecutionResult::failed(100, "E: dpkg was interrupted"));
        let engine = ApplyEngine::new(exec.clone());
        let result = engine
            .apply_changes(&Context::background(), "ws1", &full_diff(), &template())
            .unwrap();

        assert!(!result.success);
        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.category, ApplyCategory::Remove);
        assert_eq!(failure.exit_code, 100);
        assert!(failure.stderr.contains("dpkg was interrupted"));

        let statuses: Vec<_> = result.categories.iter().map(|c| (c.category, c.status)).collect();
        assert_eq!(
            statuses,
            [
                (ApplyCategory::Install, CategoryStatus::Applied),
                (ApplyCategory::Upgrade, CategoryStatus::Applied),
                (ApplyCategory::Remove, CategoryStatus::Failed),
                (ApplyCategory::Services, CategoryStatus::NotAttempted),
                (ApplyCategory::Users, CategoryStatus::NotAttempted),
                (ApplyCategory::Ports, CategoryStatus::NotAttempted),
            ]
        );
        assert!(result.ports_intended.is_empty());
        assert!(!exec.commands().iter().any(|c| c.contains("systemctl")));
    }

    #[test]
    fn test_existing_user_is_warning() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.respond_prefix("useradd", ExecutionResult::failed(9, "useradd: user 'researcher' already exists"));
        let engine = ApplyEngine::new(exec.clone());
        let result = engine
            .apply_changes(&Context::background(), "ws1", &full_diff(), &template())
            .unwrap();

        assert!(result.success);
        assert_eq!(result.users_created, 0);
        assert_eq!(result.users_modified, 0);
        assert_eq!(result.warnings.len(), 1);
        assert!(exec.commands().contains(&"usermod -aG sudo researcher".to_string()));
    }

    #[test]
    fn test_group_additions_count_as_modified() {
        let exec = Arc::new(ScriptedExecutor::new());
        let mut diff = full_diff();
        diff.users_to_modify.push(UserDiff {
            name: "ubuntu".into(),
            groups: vec!["docker".into()],
            action: UserAction::AddGroups,
        });
        let engine = ApplyEngine::new(exec.clone());
        let result = engine
            .apply_changes(&Context::background(), "ws1", &diff, &template())
            .unwrap();

        assert_eq!(result.users_created, 1);
        assert_eq!(result.users_modified, 1);
        assert!(exec.commands().contains(&"usermod -aG docker ubuntu".to_string()));
    }

    #[test]
    fn test_transport_failure_is_error() {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.fail_on("systemctl", Fault::Timeout);
        let engine = ApplyEngine::new(exec);
        let err = engine
            .apply_changes(&Context::background(), "ws1", &full_diff(), &template())
            .unwrap_err();
        assert_eq!(err.category, ApplyCategory::Services);
        assert!(matches!(err.source, remote::Error::Timeout));
    }

    #[test]
    fn test_empty_diff_runs_nothing() {
        let exec = Arc::new(ScriptedExecutor::new());
        let engine = ApplyEngine::new(exec.clone());
        let result = engine
            .apply_changes(&Context::background(), "ws1", &TemplateDiff::default(), &template())
            .unwrap();
        assert!(result.success);
        assert!(exec.calls().is_empty());
        assert_eq!(result.categories.len(), ApplyCategory::ORDER.len());
    }
}
