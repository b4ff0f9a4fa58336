//! spack.

use super::{PackageManager, command_line, parse_json_listing, pinned};
use crate::diff::PackageDiff;
use crate::types::{InstalledPackage, PackageManagerKind};

/// Spack package manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct Spack;

pub const LIST_COMMAND: &str = "spack find --json";

impl PackageManager for Spack {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Spack
    }

    fn list_command(&self) -> &'static str {
        LIST_COMMAND
    }

    fn parse_installed(&self, output: &str) -> Vec<InstalledPackage> {
        let mut packages = parse_json_listing(output, PackageManagerKind::Spack);
        // The same spec can be installed for several compilers.
        packages.dedup_by(|a, b| a.name == b.name && a.version == b.version);
        packages
    }

    fn requirement(&self, package: &PackageDiff) -> String {
        pinned(package, "@")
    }

    fn install_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\n{}\n",
            command_line("spack install", packages.iter().map(|p| self.requirement(p)))
        )
    }

    fn remove_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\n{}\n",
            command_line("spack uninstall -y", packages.iter().map(|p| p.name.clone()))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managers::test_support::install;
    use crate::template::VersionConstraint;

    #[test]
    fn test_parse_spack_json_dedups_variants() {
        let output = r#"[
            {"name": "hdf5", "version": "1.14.3", "compiler": {"name": "gcc"}},
            {"name": "hdf5", "version": "1.14.3", "compiler": {"name": "clang"}},
            {"name": "openmpi", "version": "4.1.6"}
        ]"#;
        assert_eq!(Spack.parse_installed(output).len(), 2);
    }

    #[test]
    fn test_install_uses_at_pin() {
        let script = Spack.install_script(&[install(
            "hdf5",
            Some("1.14.3"),
            VersionConstraint::Exact,
            PackageManagerKind::Spack,
        )]);
        assert!(script.contains("spack install hdf5@1.14.3"));
    }
}
