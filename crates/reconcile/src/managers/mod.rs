//! Package-manager capabilities.
//!
//! The [`PackageManager`] trait is everything the engine needs from an
//! ecosystem: how to list what is installed, and how to install or remove
//! packages. Each manager lives in its own module:
//! - [`apt::Apt`] for Debian and Ubuntu
//! - [`dnf::Dnf`] for Fedora, RHEL and Amazon Linux
//! - [`conda::Conda`] for the active conda environment
//! - [`pip::Pip`] for the system Python
//! - [`spack::Spack`] for HPC software stacks

pub mod apt;
pub mod conda;
pub mod dnf;
pub mod pip;
pub mod spack;

use crate::diff::PackageDiff;
use crate::template::VersionConstraint;
use crate::types::{InstalledPackage, PackageManagerKind};

/// Capability set of one package-manager ecosystem.
pub trait PackageManager: Send + Sync {
    /// Which ecosystem this is.
    fn kind(&self) -> PackageManagerKind;

    /// Read-only command listing installed packages.
    fn list_command(&self) -> &'static str;

    /// Parse the output of [`list_command`](Self::list_command).
    ///
    /// Unparsable lines or documents yield fewer (or no) packages, never an error.
    fn parse_installed(&self, output: &str) -> Vec<InstalledPackage>;

    /// Render one package as a command-line argument, pinned when exact.
    fn requirement(&self, package: &PackageDiff) -> String;

    /// Script installing (or upgrading) `packages`.
    fn install_script(&self, packages: &[PackageDiff]) -> String;

    /// Script removing `packages`.
    fn remove_script(&self, packages: &[PackageDiff]) -> String;
}

static APT: apt::Apt = apt::Apt;
static DNF: dnf::Dnf = dnf::Dnf;
static CONDA: conda::Conda = conda::Conda;
static PIP: pip::Pip = pip::Pip;
static SPACK: spack::Spack = spack::Spack;

/// The manager for `kind`, or `None` for `unknown`.
pub fn for_kind(kind: PackageManagerKind) -> Option<&'static dyn PackageManager> {
    match kind {
        PackageManagerKind::Apt => Some(&APT),
        PackageManagerKind::Dnf => Some(&DNF),
        PackageManagerKind::Conda => Some(&CONDA),
        PackageManagerKind::Pip => Some(&PIP),
        PackageManagerKind::Spack => Some(&SPACK),
        PackageManagerKind::Unknown => None,
    }
}

/// Every manager, in probe priority order.
pub fn all() -> [&'static dyn PackageManager; 5] {
    [&APT, &DNF, &CONDA, &PIP, &SPACK]
}

/// `name<sep>version` when the diff pins an exact version, else `name`.
pub(crate) fn pinned(package: &PackageDiff, sep: &str) -> String {
    match (&package.target_version, package.constraint) {
        (Some(version), VersionConstraint::Exact) => format!("{}{}{}", package.name, sep, version),
        _ => package.name.clone(),
    }
}

/// Quote a word for a POSIX shell unless it only holds safe characters.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.+:=@/,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// `<command> arg arg ...` with every argument quoted.
pub(crate) fn command_line(command: &str, args: impl IntoIterator<Item = String>) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&shell_quote(&arg));
    }
    line
}

/// Parse `name<TAB>version` lines.
pub(crate) fn parse_tab_lines(output: &str, manager: PackageManagerKind) -> Vec<InstalledPackage> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.trim();
            let version = fields.next()?.trim();
            (!name.is_empty() && !version.is_empty()).then(|| InstalledPackage {
                name: name.to_string(),
                version: version.to_string(),
                manager,
            })
        })
        .collect()
}

/// Parse a JSON array of objects carrying `name` and `version` strings.
pub(crate) fn parse_json_listing(output: &str, manager: PackageManagerKind) -> Vec<InstalledPackage> {
    let json: serde_json::Value = match serde_json::from_str(output.trim()) {
        Ok(v) => v,
        Err(e) => {
            log::debug!("{} listing is not JSON: {}", manager, e);
            return Vec::new();
        }
    };

    let empty = Vec::new();
    json.as_array()
        .unwrap_or(&empty)
        .iter()
        .filter_map(|entry| {
            let name = entry["name"].as_str()?;
            let version = entry["version"].as_str()?;
            Some(InstalledPackage {
                name: name.to_string(),
                version: version.to_string(),
                manager,
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::diff::PackageAction;

    pub fn install(
        name: &str,
        version: Option<&str>,
        constraint: VersionConstraint,
        manager: PackageManagerKind,
    ) -> PackageDiff {
        PackageDiff {
            name: name.into(),
            manager,
            current_version: None,
            target_version: version.map(str::to_string),
            constraint,
            action: PackageAction::Install,
        }
    }
}
