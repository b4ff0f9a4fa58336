//! dnf / rpm.

use super::{PackageManager, command_line, parse_tab_lines, pinned};
use crate::diff::PackageDiff;
use crate::types::{InstalledPackage, PackageManagerKind};

/// Red Hat-family package manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dnf;

pub const LIST_COMMAND: &str = r"rpm -qa --queryformat '%{NAME}\t%{VERSION}-%{RELEASE}\n'";

impl PackageManager for Dnf {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Dnf
    }

    fn list_command(&self) -> &'static str {
        LIST_COMMAND
    }

    fn parse_installed(&self, output: &str) -> Vec<InstalledPackage> {
        parse_tab_lines(output, PackageManagerKind::Dnf)
    }

    fn requirement(&self, package: &PackageDiff) -> String {
        pinned(package, "-")
    }

    fn install_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\n{}\n",
            command_line("dnf install -y", packages.iter().map(|p| self.requirement(p)))
        )
    }

    fn remove_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\n{}\n",
            command_line("dnf remove -y", packages.iter().map(|p| p.name.clone()))
        )
    }
}
