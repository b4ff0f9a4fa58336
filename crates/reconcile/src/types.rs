//! Observed instance state and applied-template history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Package-manager ecosystem.
///
/// Declaration order is probe priority: the first manager with a non-empty
/// listing becomes an instance's primary manager.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PackageManagerKind {
    Apt,
    Dnf,
    Conda,
    Pip,
    Spack,
    #[default]
    Unknown,
}

impl PackageManagerKind {
    /// Known managers in probe priority order.
    pub const PROBE_ORDER: [Self; 5] = [Self::Apt, Self::Dnf, Self::Conda, Self::Pip, Self::Spack];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Dnf => "dnf",
            Self::Conda => "conda",
            Self::Pip => "pip",
            Self::Spack => "spack",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this is a concrete manager.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for PackageManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no package manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown package manager '{0}' (expected apt, dnf, conda, pip, spack)")]
pub struct ParseManagerError(pub String);

impl FromStr for PackageManagerKind {
    type Err = ParseManagerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "apt" => Ok(Self::Apt),
            "dnf" => Ok(Self::Dnf),
            "conda" => Ok(Self::Conda),
            "pip" => Ok(Self::Pip),
            "spack" => Ok(Self::Spack),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseManagerError(s.to_string())),
        }
    }
}

/// A package present on the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub manager: PackageManagerKind,
}

/// Observed run state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

/// A systemd service known to the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningService {
    /// Unit name without the `.service` suffix
    pub name: String,
    pub status: ServiceStatus,
    /// Starts at boot
    pub enabled: bool,
}

impl RunningService {
    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }
}

/// A user account on the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingUser {
    pub name: String,
    pub uid: u32,
    /// Group names, primary group included, sorted
    pub groups: Vec<String>,
    pub home: String,
    pub shell: String,
}

impl ExistingUser {
    /// Login account rather than a system account.
    pub fn is_regular(&self) -> bool {
        self.uid == 0 || (self.uid >= MIN_REGULAR_UID && self.name != "nobody")
    }
}

/// First regular uid on Linux distributions.
const MIN_REGULAR_UID: u32 = 1000;

/// A package installed by one template application.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordedPackage {
    pub name: String,
    pub manager: PackageManagerKind,
}

/// One successful template application, as recorded on the instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedTemplate {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub applied_at: DateTime<Utc>,
    #[serde(default)]
    pub package_manager: PackageManagerKind,
    #[serde(default)]
    pub checkpoint_id: Option<String>,
    /// Packages this application installed
    #[serde(default)]
    pub packages: Vec<RecordedPackage>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
}

/// Point-in-time snapshot of one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub packages: Vec<InstalledPackage>,
    pub services: Vec<RunningService>,
    pub users: Vec<ExistingUser>,
    /// Listening TCP ports
    pub ports: BTreeSet<u16>,
    /// Process name bound to a port, when the socket listing shows it
    pub port_owners: BTreeMap<u16, String>,
    /// Primary package manager
    pub package_manager: PackageManagerKind,
    /// Every manager whose listing probe succeeded
    pub available_managers: Vec<PackageManagerKind>,
    pub applied_templates: Vec<AppliedTemplate>,
    pub last_inspected: DateTime<Utc>,
}

impl InstanceState {
    /// Installed package by name under a manager.
    pub fn package(&self, name: &str, manager: PackageManagerKind) -> Option<&InstalledPackage> {
        self.packages
            .iter()
            .find(|p| p.manager == manager && p.name == name)
    }

    /// Service by unit name (with or without `.service`).
    pub fn service(&self, name: &str) -> Option<&RunningService> {
        let name = name.strip_suffix(".service").unwrap_or(name);
        self.services.iter().find(|s| s.name == name)
    }

    /// User account by login name.
    pub fn user(&self, name: &str) -> Option<&ExistingUser> {
        self.users.iter().find(|u| u.name == name)
    }

    /// Whether the manager's listing probe succeeded.
    pub fn has_manager(&self, kind: PackageManagerKind) -> bool {
        self.available_managers.contains(&kind)
    }

    /// Packages installed under `manager`.
    pub fn packages_for(
        &self,
        manager: PackageManagerKind,
    ) -> impl Iterator<Item = &InstalledPackage> + '_ {
        self.packages.iter().filter(move |p| p.manager == manager)
    }
}
