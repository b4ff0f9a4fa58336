//! pip for the instance's default Python.

use super::{PackageManager, command_line, parse_json_listing, pinned};
use crate::diff::PackageDiff;
use crate::template::VersionConstraint;
use crate::types::{InstalledPackage, PackageManagerKind};

/// Python package installer.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pip;

pub const LIST_COMMAND: &str = "pip list --format=json";

impl PackageManager for Pip {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Pip
    }

    fn list_command(&self) -> &'static str {
        LIST_COMMAND
    }

    fn parse_installed(&self, output: &str) -> Vec<InstalledPackage> {
        parse_json_listing(output, PackageManagerKind::Pip)
    }

    fn requirement(&self, package: &PackageDiff) -> String {
        // pip understands minimum versions natively.
        match (&package.target_version, package.constraint) {
            (Some(version), VersionConstraint::AtLeast) => format!("{}>={}", package.name, version),
            _ => pinned(package, "=="),
        }
    }

    fn install_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\n{}\n",
            command_line("pip install", packages.iter().map(|p| self.requirement(p)))
        )
    }

    fn remove_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\n{}\n",
            command_line("pip uninstall -y", packages.iter().map(|p| p.name.clone()))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::test_support::install;

    #[test]
    fn test_parse_pip_json() {
        let packages =
            Pip.parse_installed(r#"[{"name": "numpy", "version": "1.26.4"}, {"name": "pip", "version": "22.0.2"}]"#);
        assert_eq!(packages.len(), 2);
        assert!(packages.iter().all(|p| p.manager == PackageManagerKind::Pip));
    }

    #[test]
    fn test_requirements() {
        let exact = install("numpy", Some("1.26.4"), VersionConstraint::Exact, PackageManagerKind::Pip);
        let minimum = install("pandas", Some("2.0"), VersionConstraint::AtLeast, PackageManagerKind::Pip);
        let script = Pip.install_script(&[exact, minimum]);
        assert!(script.contains("pip install numpy==1.26.4 'pandas>=2.0'"));
    }
}
