//! Diff calculation between an observed instance and a template.
//!
//! [`calculate_diff`] is pure: the same state and template always give the
//! same diff, with every list sorted.

use crate::error::DiffError;
use crate::template::{DesiredServiceState, PackageSpec, Template, VersionConstraint};
use crate::types::{InstanceState, PackageManagerKind, RecordedPackage, ServiceStatus};
use crate::version::is_older;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// What to do with a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageAction {
    Install,
    Upgrade,
    Remove,
}

/// One package change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDiff {
    pub name: String,
    pub manager: PackageManagerKind,
    pub current_version: Option<String>,
    pub target_version: Option<String>,
    #[serde(default)]
    pub constraint: VersionConstraint,
    pub action: PackageAction,
}

/// A systemd operation on a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceAction {
    Start,
    Stop,
    Enable,
    Disable,
}

impl ServiceAction {
    /// systemctl verb.
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

/// Service changes, applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDiff {
    pub name: String,
    /// `None` when the unit is not known to the instance
    pub current_status: Option<ServiceStatus>,
    pub actions: Vec<ServiceAction>,
}

/// What to do with a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    Create,
    AddGroups,
}

/// One user change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDiff {
    pub name: String,
    /// All desired groups for `create`; only the missing ones for `add_groups`
    pub groups: Vec<String>,
    pub action: UserAction,
}

/// Kind of conflict between template and instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    PackageManagerMismatch,
    PortCollision,
    UserDefinitionConflict,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PackageManagerMismatch => "package manager mismatch",
            Self::PortCollision => "port collision",
            Self::UserDefinitionConflict => "user definition conflict",
        })
    }
}

/// A reason the template cannot be applied safely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictDiff {
    pub kind: ConflictKind,
    /// Manager, port, or user the conflict is about
    pub subject: String,
    pub description: String,
}

impl fmt::Display for ConflictDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

/// Everything needed to move an instance to a template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDiff {
    pub packages_to_install: Vec<PackageDiff>,
    pub packages_to_upgrade: Vec<PackageDiff>,
    pub packages_to_remove: Vec<PackageDiff>,
    pub services_to_configure: Vec<ServiceDiff>,
    pub users_to_create: Vec<UserDiff>,
    pub users_to_modify: Vec<UserDiff>,
    pub ports_to_open: Vec<u16>,
    pub conflicts_found: Vec<ConflictDiff>,
}

impl TemplateDiff {
    /// Whether applying would change anything.
    pub fn has_changes(&self) -> bool {
        self.change_count() > 0
    }

    /// Number of individual changes.
    pub fn change_count(&self) -> usize {
        self.packages_to_install.len()
            + self.packages_to_upgrade.len()
            + self.packages_to_remove.len()
            + self.services_to_configure.len()
            + self.users_to_create.len()
            + self.users_to_modify.len()
            + self.ports_to_open.len()
    }

    /// Whether any conflicts were found.
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts_found.is_empty()
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        if !self.has_changes() && !self.has_conflicts() {
            return "no changes".to_string();
        }

        let parts = [
            (self.packages_to_install.len(), "to install"),
            (self.packages_to_upgrade.len(), "to upgrade"),
            (self.packages_to_remove.len(), "to remove"),
            (self.services_to_configure.len(), "services to configure"),
            (self.users_to_create.len(), "users to create"),
            (self.users_to_modify.len(), "users to modify"),
            (self.ports_to_open.len(), "ports to open"),
            (self.conflicts_found.len(), "conflicts"),
        ];
        parts
            .iter()
            .filter(|(n, _)| *n > 0)
            .map(|(n, label)| format!("{} {}", n, label))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Compute the diff that brings `state` to `template`.
pub fn calculate_diff(state: &InstanceState, template: &Template) -> Result<TemplateDiff, DiffError> {
    let declared = parse_packages(template)?;

    let mut diff = TemplateDiff::default();
    diff_packages(state, &declared, &mut diff);
    diff_removals(state, template, &declared, &mut diff);
    diff_services(state, template, &mut diff);
    diff_users(state, template, &mut diff);

    diff.ports_to_open = template
        .desired_ports()
        .into_iter()
        .filter(|p| !state.ports.contains(p))
        .collect();

    diff.conflicts_found = find_conflicts(state, template);
    Ok(diff)
}

/// Parse every package spec, rejecting `unknown` as a key.
fn parse_packages(
    template: &Template,
) -> Result<BTreeMap<PackageManagerKind, Vec<PackageSpec>>, DiffError> {
    let mut declared = BTreeMap::new();
    for (manager, specs) in &template.packages {
        if specs.is_empty() {
            continue;
        }
        if !manager.is_known() {
            return Err(DiffError::UnsupportedManager {
                packages: specs.clone(),
            });
        }
        let parsed = specs
            .iter()
            .map(|s| PackageSpec::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        declared.insert(*manager, parsed);
    }
    Ok(declared)
}

fn diff_packages(
    state: &InstanceState,
    declared: &BTreeMap<PackageManagerKind, Vec<PackageSpec>>,
    diff: &mut TemplateDiff,
) {
    for (manager, specs) in declared {
        for spec in specs {
            match state.package(&spec.name, *manager) {
                None => diff.packages_to_install.push(PackageDiff {
                    name: spec.name.clone(),
                    manager: *manager,
                    current_version: None,
                    target_version: spec.version.clone(),
                    constraint: spec.constraint,
                    action: PackageAction::Install,
                }),
                Some(installed) => {
                    let outdated = spec
                        .version
                        .as_deref()
                        .is_some_and(|wanted| is_older(&installed.version, wanted));
                    if outdated {
                        diff.packages_to_upgrade.push(PackageDiff {
                            name: spec.name.clone(),
                            manager: *manager,
                            current_version: Some(installed.version.clone()),
                            target_version: spec.version.clone(),
                            constraint: spec.constraint,
                            action: PackageAction::Upgrade,
                        });
                    }
                }
            }
        }
    }

    sort_packages(&mut diff.packages_to_install);
    sort_packages(&mut diff.packages_to_upgrade);
}

/// Only packages this template's own history installed are removable, and
/// only when no other template recorded them too.
fn diff_removals(
    state: &InstanceState,
    template: &Template,
    declared: &BTreeMap<PackageManagerKind, Vec<PackageSpec>>,
    diff: &mut TemplateDiff,
) {
    let mut ours: BTreeSet<&RecordedPackage> = BTreeSet::new();
    let mut others: BTreeSet<&RecordedPackage> = BTreeSet::new();
    for entry in &state.applied_templates {
        let bucket = if entry.name == template.name {
            &mut ours
        } else {
            &mut others
        };
        bucket.extend(entry.packages.iter());
    }

    for recorded in ours {
        if others.contains(recorded) {
            continue;
        }
        let still_declared = declared
            .get(&recorded.manager)
            .is_some_and(|specs| specs.iter().any(|s| s.name == recorded.name));
        if still_declared {
            continue;
        }
        if let Some(installed) = state.package(&recorded.name, recorded.manager) {
            diff.packages_to_remove.push(PackageDiff {
                name: recorded.name.clone(),
                manager: recorded.manager,
                current_version: Some(installed.version.clone()),
                target_version: None,
                constraint: VersionConstraint::Any,
                action: PackageAction::Remove,
            });
        }
    }

    sort_packages(&mut diff.packages_to_remove);
}

fn sort_packages(packages: &mut [PackageDiff]) {
    packages.sort_by(|a, b| (a.manager, &a.name).cmp(&(b.manager, &b.name)));
}

fn diff_services(state: &InstanceState, template: &Template, diff: &mut TemplateDiff) {
    for spec in &template.services {
        let observed = state.service(&spec.name);
        let actions = match (spec.state, observed) {
            (DesiredServiceState::Running, None) => vec![ServiceAction::Start, ServiceAction::Enable],
            (DesiredServiceState::Running, Some(svc)) if !svc.is_running() => {
                vec![ServiceAction::Start, ServiceAction::Enable]
            }
            (DesiredServiceState::Running, Some(svc)) if !svc.enabled => vec![ServiceAction::Enable],
            (DesiredServiceState::Absent, Some(svc)) if svc.is_running() => {
                vec![ServiceAction::Stop, ServiceAction::Disable]
            }
            (DesiredServiceState::Absent, Some(svc)) if svc.enabled => vec![ServiceAction::Disable],
            _ => continue,
        };
        diff.services_to_configure.push(ServiceDiff {
            name: spec.name.clone(),
            current_status: observed.map(|s| s.status),
            actions,
        });
    }
    diff.services_to_configure.sort_by(|a, b| a.name.cmp(&b.name));
}

fn diff_users(state: &InstanceState, template: &Template, diff: &mut TemplateDiff) {
    for spec in &template.users {
        let wanted: BTreeSet<&str> = spec.groups.iter().map(String::as_str).collect();
        match state.user(&spec.name) {
            None => diff.users_to_create.push(UserDiff {
                name: spec.name.clone(),
                groups: wanted.into_iter().map(str::to_string).collect(),
                action: UserAction::Create,
            }),
            Some(existing) => {
                let missing: Vec<String> = wanted
                    .into_iter()
                    .filter(|g| !existing.groups.iter().any(|have| have == g))
                    .map(str::to_string)
                    .collect();
                if !missing.is_empty() {
                    diff.users_to_modify.push(UserDiff {
                        name: spec.name.clone(),
                        groups: missing,
                        action: UserAction::AddGroups,
                    });
                }
            }
        }
    }
    diff.users_to_create.sort_by(|a, b| a.name.cmp(&b.name));
    diff.users_to_modify.sort_by(|a, b| a.name.cmp(&b.name));
}

fn find_conflicts(state: &InstanceState, template: &Template) -> Vec<ConflictDiff> {
    let mut conflicts = Vec::new();

    let target = template.target_manager();
    let primary = state.package_manager;
    if target.is_known() && primary.is_known() && target != primary && !state.has_manager(target) {
        conflicts.push(ConflictDiff {
            kind: ConflictKind::PackageManagerMismatch,
            subject: target.to_string(),
            description: format!(
                "template targets {} but the instance uses {} and has no {}",
                target, primary, target
            ),
        });
    }

    let mut service_ports: Vec<(u16, &str)> = template
        .services
        .iter()
        .filter(|s| s.state == DesiredServiceState::Running)
        .filter_map(|s| s.port.map(|p| (p, s.name.as_str())))
        .collect();
    service_ports.sort_unstable();
    service_ports.dedup_by_key(|(port, _)| *port);

    for (port, service) in service_ports {
        if !state.ports.contains(&port) {
            continue;
        }
        // the template's own service already holds it
        if state.service(service).is_some_and(|s| s.is_running()) {
            continue;
        }
        let holder = match state.port_owners.get(&port) {
            Some(owner) if owned_by_declared_service(owner, template) => continue,
            Some(owner) => owner.as_str(),
            None => "an unknown process",
        };
        conflicts.push(ConflictDiff {
            kind: ConflictKind::PortCollision,
            subject: port.to_string(),
            description: format!(
                "port {} for service {} is already bound by {}",
                port, service, holder
            ),
        });
    }

    for spec in &template.users {
        if let Some(existing) = state.user(&spec.name) {
            let expected = expected_home(&spec.name);
            if existing.home != expected {
                conflicts.push(ConflictDiff {
                    kind: ConflictKind::UserDefinitionConflict,
                    subject: spec.name.clone(),
                    description: format!(
                        "user {} exists with home {} (expected {})",
                        spec.name, existing.home, expected
                    ),
                });
            }
        }
    }

    conflicts.sort_by(|a, b| (a.kind as u8, &a.subject).cmp(&(b.kind as u8, &b.subject)));
    conflicts
}

/// Whether a socket owner process looks like one of the template's services.
fn owned_by_declared_service(owner: &str, template: &Template) -> bool {
    let owner = owner.strip_suffix(".service").unwrap_or(owner);
    template.services.iter().any(|s| {
        let name = s.name.strip_suffix(".service").unwrap_or(&s.name);
        owner == name || owner.starts_with(name) || name.starts_with(owner)
    })
}

fn expected_home(user: &str) -> String {
    if user == "root" {
        "/root".to_string()
    } else {
        format!("/home/{}", user)
    }
}
