//! Instance state inspection.
//!
//! Runs a fixed battery of read-only commands and parses each into one
//! dimension of [`InstanceState`]. Probes are best-effort: a failing or
//! unparsable probe leaves its dimension empty. Only transport failures
//! abort an inspection.

use crate::history;
use crate::managers::{self, apt, conda, dnf, pip, spack};
use crate::types::{
    ExistingUser, InstanceState, PackageManagerKind, RunningService, ServiceStatus,
};
use chrono::Utc;
use regex::Regex;
use remote::{Context, ExecutionResult, SharedExecutor};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

pub const SERVICE_UNITS_COMMAND: &str =
    "systemctl list-units --type=service --all --no-legend --no-pager --plain";
pub const SERVICE_FILES_COMMAND: &str =
    "systemctl list-unit-files --type=service --no-legend --no-pager";
pub const PASSWD_COMMAND: &str = "getent passwd";
pub const GROUP_COMMAND: &str = "getent group";
pub const SOCKETS_COMMAND: &str = "ss -Htlnp";
pub const NETSTAT_COMMAND: &str = "netstat -tlnp";

/// Every command an inspection may run. None of them change the instance.
pub const PROBE_COMMANDS: [&str; 12] = [
    apt::LIST_COMMAND,
    dnf::LIST_COMMAND,
    conda::LIST_COMMAND,
    pip::LIST_COMMAND,
    spack::LIST_COMMAND,
    SERVICE_UNITS_COMMAND,
    SERVICE_FILES_COMMAND,
    PASSWD_COMMAND,
    GROUP_COMMAND,
    SOCKETS_COMMAND,
    NETSTAT_COMMAND,
    history::READ_COMMAND,
];

static SS_OWNER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"users:\(\("([^"]+)""#).expect("valid regex"));

/// Builds [`InstanceState`] snapshots through a remote executor.
#[derive(Clone)]
pub struct InstanceInspector {
    executor: SharedExecutor,
}

impl InstanceInspector {
    pub fn new(executor: SharedExecutor) -> Self {
        Self { executor }
    }

    /// Snapshot `instance`.
    pub fn inspect_instance(&self, ctx: &Context, instance: &str) -> remote::Result<InstanceState> {
        log::info!("Inspecting {}", instance);
        let mut state = InstanceState::default();

        for manager in managers::all() {
            let Some(result) = self.probe(ctx, instance, manager.list_command())? else {
                continue;
            };
            state.available_managers.push(manager.kind());
            let packages = manager.parse_installed(&result.stdout);
            if state.package_manager == PackageManagerKind::Unknown && !packages.is_empty() {
                state.package_manager = manager.kind();
            }
            log::debug!("{}: {} packages on {}", manager.kind(), packages.len(), instance);
            state.packages.extend(packages);
        }

        let units = self.probe(ctx, instance, SERVICE_UNITS_COMMAND)?;
        let unit_files = self.probe(ctx, instance, SERVICE_FILES_COMMAND)?;
        state.services = parse_services(
            units.as_ref().map_or("", |r| r.stdout.as_str()),
            unit_files.as_ref().map_or("", |r| r.stdout.as_str()),
        );

        if let Some(passwd) = self.probe(ctx, instance, PASSWD_COMMAND)? {
            let groups = self.probe(ctx, instance, GROUP_COMMAND)?;
            state.users = parse_users(
                &passwd.stdout,
                groups.as_ref().map_or("", |r| r.stdout.as_str()),
            );
        }

        let sockets = match self.probe(ctx, instance, SOCKETS_COMMAND)? {
            Some(result) => parse_ss(&result.stdout),
            None => self
                .probe(ctx, instance, NETSTAT_COMMAND)?
                .map(|r| parse_netstat(&r.stdout))
                .unwrap_or_default(),
        };
        state.ports = sockets.ports;
        state.port_owners = sockets.owners;

        if let Some(result) = self.probe(ctx, instance, history::READ_COMMAND)? {
            state.applied_templates = history::parse_history(&result.stdout);
        }

        state.last_inspected = Utc::now();
        log::info!(
            "Inspected {}: {} packages ({}), {} services, {} users, {} ports",
            instance,
            state.packages.len(),
            state.package_manager,
            state.services.len(),
            state.users.len(),
            state.ports.len()
        );
        Ok(state)
    }

    /// Run one probe. `Ok(None)` for a non-zero exit; `Err` only for transport.
    fn probe(
        &self,
        ctx: &Context,
        instance: &str,
        command: &str,
    ) -> remote::Result<Option<ExecutionResult>> {
        let result = self.executor.execute(ctx, instance, command)?;
        if result.success() {
            Ok(Some(result))
        } else {
            log::debug!(
                "Probe '{}' on {} exited {}: {}",
                command,
                instance,
                result.exit_code,
                result.stderr_trimmed()
            );
            Ok(None)
        }
    }
}

/// Merge `list-units` (run state) with `list-unit-files` (enablement).
pub fn parse_services(units: &str, unit_files: &str) -> Vec<RunningService> {
    let mut services: BTreeMap<String, RunningService> = BTreeMap::new();

    for line in units.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [unit, _load, active, sub, ..] = fields.as_slice() else {
            continue;
        };
        let Some(name) = unit.strip_suffix(".service") else {
            continue;
        };
        let status = match (*active, *sub) {
            (_, "running") => ServiceStatus::Running,
            ("failed", _) => ServiceStatus::Failed,
            _ => ServiceStatus::Stopped,
        };
        services.insert(
            name.to_string(),
            RunningService {
                name: name.to_string(),
                status,
                enabled: false,
            },
        );
    }

    for line in unit_files.lines() {
        let mut fields = line.split_whitespace();
        let (Some(unit), Some(state)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Some(name) = unit.strip_suffix(".service") else {
            continue;
        };
        // Template units (foo@.service) are not services themselves.
        if name.ends_with('@') {
            continue;
        }
        let enabled = matches!(state, "enabled" | "enabled-runtime");
        services
            .entry(name.to_string())
            .or_insert_with(|| RunningService {
                name: name.to_string(),
                status: ServiceStatus::Stopped,
                enabled,
            })
            .enabled = enabled;
    }

    services.into_values().collect()
}

/// Parse `getent passwd` and `getent group` into every account, system ones included.
pub fn parse_users(passwd: &str, group: &str) -> Vec<ExistingUser> {
    let mut members: HashMap<&str, BTreeSet<String>> = HashMap::new();
    let mut group_names: HashMap<u32, &str> = HashMap::new();
    for line in group.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        let [name, _, gid, list, ..] = fields.as_slice() else {
            continue;
        };
        if let Ok(gid) = gid.parse() {
            group_names.insert(gid, *name);
        }
        for member in list.split(',').map(str::trim).filter(|m| !m.is_empty()) {
            members.entry(member).or_default().insert((*name).to_string());
        }
    }

    let mut users = Vec::new();
    for line in passwd.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        let [name, _, uid, gid, _gecos, home, shell, ..] = fields.as_slice() else {
            continue;
        };
        let Ok(uid) = uid.parse::<u32>() else {
            continue;
        };
        let mut groups = members.get(name).cloned().unwrap_or_default();
        if let Some(primary) = gid.parse().ok().and_then(|g: u32| group_names.get(&g)) {
            groups.insert((*primary).to_string());
        }

        users.push(ExistingUser {
            name: (*name).to_string(),
            uid,
            groups: groups.into_iter().collect(),
            home: (*home).to_string(),
            shell: (*shell).to_string(),
        });
    }
    users.sort_by(|a, b| a.name.cmp(&b.name));
    users
}

/// Listening ports and their owners.
#[derive(Debug, Default)]
pub struct Sockets {
    pub ports: BTreeSet<u16>,
    pub owners: BTreeMap<u16, String>,
}

impl Sockets {
    fn add(&mut self, local: &str, owner: Option<String>) {
        let Some(port) = local.rsplit(':').next().and_then(|p| p.parse().ok()) else {
            return;
        };
        self.ports.insert(port);
        if let Some(owner) = owner {
            self.owners.entry(port).or_insert(owner);
        }
    }
}

/// Parse `ss -Htlnp`: `State Recv-Q Send-Q Local Peer Process`.
pub fn parse_ss(output: &str) -> Sockets {
    let mut sockets = Sockets::default();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(local) = fields.get(3) else {
            continue;
        };
        let owner = SS_OWNER
            .captures(line)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        sockets.add(local, owner);
    }
    sockets
}

/// Parse `netstat -tlnp`: `Proto Recv-Q Send-Q Local Foreign State PID/Program`.
pub fn parse_netstat(output: &str) -> Sockets {
    let mut sockets = Sockets::default();
    for line in output.lines().filter(|l| l.starts_with("tcp")) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(local) = fields.get(3) else {
            continue;
        };
        let owner = fields
            .get(6)
            .and_then(|p| p.split_once('/'))
            .map(|(_, program)| program.trim().trim_end_matches(':').to_string())
            .filter(|p| !p.is_empty());
        sockets.add(local, owner);
    }
    sockets
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::{Fault, ScriptedExecutor};
    use std::sync::Arc;

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
        daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
        ubuntu:x:1000:1000:Ubuntu:/home/ubuntu:/bin/bash\n\
        nobody:x:65534:65534:nobody:/nonexistent:/usr/sbin/nologin\n";
    const GROUP: &str = "root:x:0:\nsudo:x:27:ubuntu\nubuntu:x:1000:\ndocker:x:998:ubuntu,ci\n";

    #[test]
    fn test_parse_services_merges_enablement() {
        let units = "cron.service loaded active running Regular background program processing daemon\n\
                     nginx.service loaded failed failed A high performance web server\n\
                     ssh.service loaded active running OpenBSD Secure Shell server\n";
        let files = "cron.service enabled enabled\n\
                     nginx.service disabled enabled\n\
                     getty@.service enabled enabled\n\
                     docker.service enabled enabled\n";
        let services = parse_services(units, files);
        let names: Vec<_> = services.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["cron", "docker", "nginx", "ssh"]);

        assert!(services[0].is_running() && services[0].enabled);
        assert_eq!(services[1].status, ServiceStatus::Stopped);
        assert!(services[1].enabled);
        assert_eq!(services[2].status, ServiceStatus::Failed);
        assert!(!services[3].enabled);
    }

    #[test]
    fn test_parse_users_keeps_system_accounts() {
        let users = parse_users(PASSWD, GROUP);
        let names: Vec<_> = users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["daemon", "nobody", "root", "ubuntu"]);
        assert_eq!(users[3].groups, ["docker", "sudo", "ubuntu"]);
        assert_eq!(users[2].home, "/root");
        assert_eq!(users[0].uid, 1);
        assert!(users[3].is_regular());
        assert!(!users[0].is_regular());
    }

    #[test]
    fn test_parse_ss() {
        let output = "LISTEN 0 4096 0.0.0.0:22 0.0.0.0:* users:((\"sshd\",pid=812,fd=3))\n\
                      LISTEN 0 4096 [::]:22 [::]:* users:((\"sshd\",pid=812,fd=4))\n\
                      LISTEN 0 511 127.0.0.1:8888 0.0.0.0:* users:((\"jupyter-lab\",pid=1201,fd=5))\n\
                      LISTEN 0 128 127.0.0.53%lo:53 0.0.0.0:*\n";
        let sockets = parse_ss(output);
        assert_eq!(sockets.ports, [22, 53, 8888].into());
        assert_eq!(sockets.owners[&8888], "jupyter-lab");
        assert!(!sockets.owners.contains_key(&53));
    }

    #[test]
    fn test_parse_netstat() {
        let output = "Active Internet connections (only servers)\n\
                      Proto Recv-Q Send-Q Local Address Foreign Address State PID/Program name\n\
                      tcp 0 0 0.0.0.0:22 0.0.0.0:* LISTEN 812/sshd: /usr/sbin\n\
                      tcp6 0 0 :::80 :::* LISTEN -\n";
        let sockets = parse_netstat(output);
        assert_eq!(sockets.ports, [22, 80].into());
        assert_eq!(sockets.owners[&22], "sshd");
        assert!(!sockets.owners.contains_key(&80));
    }

    fn ubuntu_executor() -> Arc<ScriptedExecutor> {
        let exec = Arc::new(ScriptedExecutor::new());
        exec.set_default(ExecutionResult::failed(127, "command not found"));
        exec.respond(apt::LIST_COMMAND, ExecutionResult::ok("curl\t7.81.0\tinstalled\n"));
        exec.respond(pip::LIST_COMMAND, ExecutionResult::ok("[]"));
        exec.respond(PASSWD_COMMAND, ExecutionResult::ok(PASSWD));
        exec.respond(GROUP_COMMAND, ExecutionResult::ok(GROUP));
        exec.respond(
            NETSTAT_COMMAND,
            ExecutionResult::ok("tcp 0 0 0.0.0.0:22 0.0.0.0:* LISTEN 812/sshd\n"),
        );
        exec
    }

    #[test]
    fn test_inspect_best_effort() {
        let exec = ubuntu_executor();
        let inspector = InstanceInspector::new(exec.clone());
        let state = inspector
            .inspect_instance(&Context::background(), "ws1")
            .unwrap();

        assert_eq!(state.package_manager, PackageManagerKind::Apt);
        assert_eq!(
            state.available_managers,
            [PackageManagerKind::Apt, PackageManagerKind::Pip]
        );
        assert_eq!(state.packages.len(), 1);
        assert!(state.services.is_empty());
        assert_eq!(state.users.len(), 4);
        // ss failed, netstat fallback used
        assert_eq!(state.ports, [22].into());
        assert!(state.applied_templates.is_empty());

        assert!(exec.mutating_calls(&PROBE_COMMANDS).is_empty());
    }

    #[test]
    fn test_inspect_fails_only_on_transport() {
        let exec = ubuntu_executor();
        exec.fail_on("getent passwd", Fault::Unreachable);
        let inspector = InstanceInspector::new(exec);
        let err = inspector
            .inspect_instance(&Context::background(), "ws1")
            .unwrap_err();
        assert!(err.is_transport());
    }
}
