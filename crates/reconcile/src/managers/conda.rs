//! conda, against whichever environment is active on the instance.

use super::{PackageManager, command_line, parse_json_listing, pinned};
use crate::diff::PackageDiff;
use crate::types::{InstalledPackage, PackageManagerKind};

/// Conda package manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct Conda;

pub const LIST_COMMAND: &str = "conda list --json";

/// Environment argument resolved by the remote shell.
const ENV_ARG: &str = r#"-n "${CONDA_DEFAULT_ENV:-base}""#;

impl PackageManager for Conda {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Conda
    }

    fn list_command(&self) -> &'static str {
        LIST_COMMAND
    }

    fn parse_installed(&self, output: &str) -> Vec<InstalledPackage> {
        parse_json_listing(output, PackageManagerKind::Conda)
    }

    fn requirement(&self, package: &PackageDiff) -> String {
        pinned(package, "=")
    }

    fn install_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\n{}\n",
            command_line(
                &format!("conda install -y {}", ENV_ARG),
                packages.iter().map(|p| self.requirement(p))
            )
        )
    }

    fn remove_script(&self, packages: &[PackageDiff]) -> String {
        format!(
            "set -e\n{}\n",
            command_line(
                &format!("conda remove -y {}", ENV_ARG),
                packages.iter().map(|p| p.name.clone())
            )
        )
    }
}
