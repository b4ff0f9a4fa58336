//! Desired-state templates and package specs.
//!
//! A [`Template`] arrives already parsed; the engine never resolves
//! inheritance or looks templates up by name.

use crate::error::DiffError;
use crate::types::PackageManagerKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Desired run state of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredServiceState {
    #[default]
    Running,
    Absent,
}

/// A service the template wants running (or gone).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub state: DesiredServiceState,
}

/// A user account the template wants present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSpec {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub shell: Option<String>,
}

impl UserSpec {
    /// Login shell, defaulting to bash.
    pub fn shell_or_default(&self) -> &str {
        self.shell.as_deref().unwrap_or("/bin/bash")
    }
}

/// A declarative software template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Default manager for this template
    #[serde(default)]
    pub package_manager: Option<PackageManagerKind>,
    /// Package specs keyed by manager
    #[serde(default)]
    pub packages: BTreeMap<PackageManagerKind, Vec<String>>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub users: Vec<UserSpec>,
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl Template {
    /// An empty template with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            package_manager: None,
            packages: BTreeMap::new(),
            services: Vec::new(),
            users: Vec::new(),
            ports: Vec::new(),
        }
    }

    /// Manager the template targets: explicit default, else the first
    /// declared package key, else `unknown`.
    pub fn target_manager(&self) -> PackageManagerKind {
        self.package_manager
            .or_else(|| self.packages.keys().next().copied())
            .unwrap_or_default()
    }

    /// Copy of this template with the default manager's packages moved
    /// under `kind`.
    pub fn retarget(&self, kind: PackageManagerKind) -> Self {
        let mut copy = self.clone();
        let current = self.target_manager();
        if current != kind
            && let Some(specs) = copy.packages.remove(&current)
        {
            copy.packages.entry(kind).or_default().extend(specs);
        }
        copy.package_manager = Some(kind);
        copy
    }

    /// Every port the template wants reachable: explicit ports plus the
    /// ports of services it wants running.
    pub fn desired_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self
            .ports
            .iter()
            .copied()
            .chain(
                self.services
                    .iter()
                    .filter(|s| s.state == DesiredServiceState::Running)
                    .filter_map(|s| s.port),
            )
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    /// Whether a service with this name is declared.
    pub fn declares_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name == name)
    }

    /// User spec by name.
    pub fn user(&self, name: &str) -> Option<&UserSpec> {
        self.users.iter().find(|u| u.name == name)
    }

    // Builder helpers, mostly for tests and programmatic callers.

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_package_manager(mut self, kind: PackageManagerKind) -> Self {
        self.package_manager = Some(kind);
        self
    }

    pub fn with_packages<I, S>(mut self, kind: PackageManagerKind, specs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages
            .entry(kind)
            .or_default()
            .extend(specs.into_iter().map(Into::into));
        self
    }

    pub fn with_service(mut self, name: impl Into<String>, port: Option<u16>) -> Self {
        self.services.push(ServiceSpec {
            name: name.into(),
            port,
            state: DesiredServiceState::Running,
        });
        self
    }

    pub fn without_service(mut self, name: impl Into<String>) -> Self {
        self.services.push(ServiceSpec {
            name: name.into(),
            port: None,
            state: DesiredServiceState::Absent,
        });
        self
    }

    pub fn with_user<I, S>(mut self, name: impl Into<String>, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users.push(UserSpec {
            name: name.into(),
            groups: groups.into_iter().map(Into::into).collect(),
            shell: None,
        });
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }
}

/// How a package spec constrains the version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionConstraint {
    /// Any installed version satisfies
    #[default]
    Any,
    /// `name=ver`, `name==ver`, `name@ver`
    Exact,
    /// `name>=ver`
    AtLeast,
}

/// A parsed package spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    pub name: String,
    pub version: Option<String>,
    pub constraint: VersionConstraint,
}

impl PackageSpec {
    /// Parse `name`, `name=ver`, `name==ver`, `name@ver` or `name>=ver`.
    pub fn parse(spec: &str) -> Result<Self, DiffError> {
        let invalid = |reason: &str| DiffError::InvalidPackageSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty spec"));
        }

        // Longest operators first so `==` is not read as `=`.
        let (name, version, constraint) = if let Some((n, v)) = trimmed.split_once(">=") {
            (n, Some(v), VersionConstraint::AtLeast)
        } else if let Some((n, v)) = trimmed.split_once("==") {
            (n, Some(v), VersionConstraint::Exact)
        } else if let Some((n, v)) = trimmed.split_once('=') {
            (n, Some(v), VersionConstraint::Exact)
        } else if let Some((n, v)) = trimmed.split_once('@') {
            (n, Some(v), VersionConstraint::Exact)
        } else {
            (trimmed, None, VersionConstraint::Any)
        };

        let name = name.trim();
        if name.is_empty() {
            return Err(invalid("missing package name"));
        }
        if !name.chars().all(is_name_char) {
            return Err(invalid("package name contains invalid characters"));
        }

        let version = match version.map(str::trim) {
            Some("") => return Err(invalid("missing version after operator")),
            Some(v) if v.contains(['=', '@', '<', '>']) || v.contains(char::is_whitespace) => {
                return Err(invalid("malformed version"));
            }
            other => other.map(str::to_string),
        };

        Ok(Self {
            name: name.to_string(),
            version,
            constraint,
        })
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | ':' | '/')
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.version, self.constraint) {
            (Some(v), VersionConstraint::AtLeast) => write!(f, "{}>={}", self.name, v),
            (Some(v), _) => write!(f, "{}={}", self.name, v),
            (None, _) => f.write_str(&self.name),
        }
    }
}
