//! apt / dpkg.

use super::{PackageManager, command_line, pinned};
use crate::diff::PackageDiff;
use crate::types::{InstalledPackage, PackageManagerKind};

/// Debian-family package manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct Apt;

pub const LIST_COMMAND: &str =
    r"dpkg-query -W -f='${Package}\t${Version}\t${db:Status-Status}\n'";

impl PackageManager for Apt {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Apt
    }

    fn list_command(&self) -> &'static str {
        LIST_COMMAND
    }

    fn parse_installed(&self, output: &str) -> Vec<InstalledPackage> {
        output
            .lines()
            .filter_map(|line| {
                let mut fields = line.split('\t');
                let name = fields.next()?.trim();
                let version = fields.next()?.trim();
                // Removed-but-configured packages keep a dpkg record.
                if let Some(status) = fields.next()
                    && status.trim() != "installed"
                {
                    return None;
                }
                (!name.is_empty() && !version.is_empty()).then(|| InstalledPackage {
                    name: name.to_string(),
                    version: version.to_string(),
                    manager: PackageManagerKind::Apt,
                })
            })
            .collect()
    }

    fn requirement(&self, package: &PackageDiff) -> String {
        pinned(package, "=")
    }

    fn install_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\nexport DEBIAN_FRONTEND=noninteractive\napt-get update -qq\n{}\n",
            command_line(
                "apt-get install -y",
                packages.iter().map(|p| self.requirement(p))
            )
        )
    }

    fn remove_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\nexport DEBIAN_FRONTEND=noninteractive\n{}\n",
            command_line("apt-get remove -y", packages.iter().map(|p| p.name.clone()))
        )
    }
}
