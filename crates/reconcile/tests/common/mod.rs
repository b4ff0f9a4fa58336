//! A simulated Ubuntu instance for end-to-end tests.
//!
//! Wraps a `ScriptedExecutor` with responders that keep package, service,
//! and account state, so applies and rollbacks change what later probes see.

#![allow(dead_code)]

use reconcile::history::{HISTORY_PATH, READ_COMMAND};
use reconcile::inspector::{
    GROUP_COMMAND, PASSWD_COMMAND, SERVICE_FILES_COMMAND, SERVICE_UNITS_COMMAND, SOCKETS_COMMAND,
};
use reconcile::managers::{apt, conda, dnf, pip, spack};
use reconcile::rollback::ENV_COMMAND;
use remote::{ExecutionResult, ScriptedExecutor};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

pub const PASSWD: &str = "root:x:0:0:root:/root:/bin/bash\n\
    daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin\n\
    ubuntu:x:1000:1000:Ubuntu:/home/ubuntu:/bin/bash\n";
pub const GROUP: &str = "root:x:0:\nsudo:x:27:ubuntu\nubuntu:x:1000:\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub running: bool,
    pub enabled: bool,
}

#[derive(Debug, Default)]
pub struct HostState {
    pub apt: BTreeMap<String, String>,
    pub pip: BTreeMap<String, String>,
    pub services: BTreeMap<String, Service>,
    /// Port a service listens on while running
    pub service_ports: BTreeMap<String, u16>,
    /// Ports held by processes that are not managed services
    pub foreign_ports: BTreeMap<u16, String>,
    pub env: BTreeMap<String, String>,
}

pub struct FakeHost {
    pub executor: Arc<ScriptedExecutor>,
    state: Arc<Mutex<HostState>>,
}

fn words(line: &str) -> Vec<String> {
    line.split_whitespace()
        .map(|w| w.trim_matches('\'').to_string())
        .collect()
}

/// Arguments following `command` on any line of `script`.
fn args_after(script: &str, command: &str) -> Vec<String> {
    script
        .lines()
        .filter_map(|line| line.trim().strip_prefix(command))
        .flat_map(words)
        .filter(|w| !w.starts_with('-'))
        .collect()
}

impl FakeHost {
    /// Ubuntu 22.04 with apt and the system pip, ssh and cron running.
    pub fn fresh_ubuntu() -> Self {
        let mut state = HostState::default();
        for (name, version) in [("curl", "7.81.0-1ubuntu1.15"), ("python3", "3.10.6-1~22.04")] {
            state.apt.insert(name.into(), version.into());
        }
        for (name, version) in [("pip", "22.0.2"), ("setuptools", "59.6.0")] {
            state.pip.insert(name.into(), version.into());
        }
        for name in ["ssh", "cron"] {
            state.services.insert(
                name.into(),
                Service {
                    running: true,
                    enabled: true,
                },
            );
        }
        state.service_ports.insert("ssh".into(), 22);
        state.service_ports.insert("jupyter".into(), 8888);
        state
            .env
            .insert("PATH".into(), "/usr/local/bin:/usr/bin:/bin".into());

        let host = Self {
            executor: Arc::new(ScriptedExecutor::new()),
            state: Arc::new(Mutex::new(state)),
        };
        host.executor.put_file("/etc/passwd", PASSWD);
        host.executor.put_file("/etc/group", GROUP);
        host.executor.put_file("/etc/hosts", "127.0.0.1 localhost\n");
        host.executor
            .put_file("/etc/apt/sources.list", "deb http://archive.ubuntu.com/ubuntu jammy main\n");
        host.executor
            .put_file("/etc/environment", "PATH=\"/usr/local/bin:/usr/bin:/bin\"\n");
        host.install_responders();
        host
    }

    pub fn state(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    /// A non-service process holding `port`.
    pub fn bind_foreign_port(&self, port: u16, owner: &str) {
        self.state().foreign_ports.insert(port, owner.to_string());
    }

    pub fn passwd(&self) -> String {
        String::from_utf8(self.executor.file("/etc/passwd").unwrap()).unwrap()
    }

    fn install_responders(&self) {
        let exec = &self.executor;
        let weak: Weak<ScriptedExecutor> = Arc::downgrade(exec);

        // Anything else mentioning "env" falls through to here, so it goes first.
        let state = self.state.clone();
        exec.respond_with(ENV_COMMAND, move |command| {
            if command.trim() != ENV_COMMAND {
                return ExecutionResult::failed(127, "unexpected command");
            }
            let state = state.lock().unwrap();
            let listing: String = state
                .env
                .iter()
                .map(|(key, value)| format!("{key}={value}\n"))
                .collect();
            ExecutionResult::ok(format!("HOME=/root\n{listing}"))
        });

        // Mutations. Registered early so the more specific probes win.
        let state = self.state.clone();
        exec.respond_with("systemctl ", move |script| {
            let mut state = state.lock().unwrap();
            for line in script.lines() {
                let w = words(line);
                let [cmd, verb, name] = w.as_slice() else {
                    continue;
                };
                if cmd != "systemctl" {
                    continue;
                }
                let service = state.services.entry(name.clone()).or_insert(Service {
                    running: false,
                    enabled: false,
                });
                match verb.as_str() {
                    "start" => service.running = true,
                    "stop" => service.running = false,
                    "enable" => service.enabled = true,
                    "disable" => service.enabled = false,
                    _ => return ExecutionResult::failed(1, format!("Unknown command verb {verb}")),
                }
            }
            ExecutionResult::ok("")
        });

        let state = self.state.clone();
        exec.respond_with("apt-get install", move |script| {
            let mut state = state.lock().unwrap();
            for arg in args_after(script, "apt-get install") {
                let (name, version) = arg.split_once('=').unwrap_or((arg.as_str(), "1.0-1"));
                state.apt.insert(name.to_string(), version.to_string());
            }
            ExecutionResult::ok("")
        });

        let state = self.state.clone();
        exec.respond_with("apt-get remove", move |script| {
            let mut state = state.lock().unwrap();
            for name in args_after(script, "apt-get remove") {
                state.apt.remove(&name);
            }
            ExecutionResult::ok("")
        });

        let state = self.state.clone();
        exec.respond_with("pip install", move |script| {
            let mut state = state.lock().unwrap();
            for arg in args_after(script, "pip install") {
                let (name, version) = arg
                    .split_once("==")
                    .or_else(|| arg.split_once(">="))
                    .unwrap_or((arg.as_str(), "1.0.0"));
                state.pip.insert(name.to_string(), version.to_string());
            }
            ExecutionResult::ok("")
        });

        let state = self.state.clone();
        exec.respond_with("pip uninstall", move |script| {
            let mut state = state.lock().unwrap();
            for name in args_after(script, "pip uninstall") {
                state.pip.remove(&name);
            }
            ExecutionResult::ok("")
        });

        let files = weak.clone();
        exec.respond_with("useradd", move |command| {
            let exec = files.upgrade().unwrap();
            let name = words(command).pop().unwrap();
            let shell = words(command)[3].clone();
            let passwd = String::from_utf8(exec.file("/etc/passwd").unwrap()).unwrap();
            if passwd.lines().any(|l| l.starts_with(&format!("{name}:"))) {
                return ExecutionResult::failed(9, format!("useradd: user '{name}' already exists"));
            }
            let uid = passwd
                .lines()
                .filter_map(|l| l.split(':').nth(2)?.parse::<u32>().ok())
                .filter(|uid| (1000..65534).contains(uid))
                .max()
                .unwrap_or(999)
                + 1;
            exec.put_file(
                "/etc/passwd",
                format!("{passwd}{name}:x:{uid}:{uid}::/home/{name}:{shell}\n"),
            );
            let group = String::from_utf8(exec.file("/etc/group").unwrap()).unwrap();
            exec.put_file("/etc/group", format!("{group}{name}:x:{uid}:\n"));
            ExecutionResult::ok("")
        });

        let files = weak.clone();
        exec.respond_with("usermod -aG", move |command| {
            let exec = files.upgrade().unwrap();
            let w = words(command);
            let (group_name, user) = (&w[2], &w[3]);
            let group = String::from_utf8(exec.file("/etc/group").unwrap()).unwrap();
            if !group.lines().any(|l| l.starts_with(&format!("{group_name}:"))) {
                return ExecutionResult::failed(6, format!("usermod: group '{group_name}' does not exist"));
            }
            let updated: String = group
                .lines()
                .map(|line| {
                    if !line.starts_with(&format!("{group_name}:")) {
                        return format!("{line}\n");
                    }
                    if line.ends_with(':') {
                        format!("{line}{user}\n")
                    } else {
                        format!("{line},{user}\n")
                    }
                })
                .collect();
            exec.put_file("/etc/group", updated);
            ExecutionResult::ok("")
        });

        let files = weak.clone();
        exec.respond_with("rm -f", move |command| {
            let exec = files.upgrade().unwrap();
            if let Some(path) = words(command).last() {
                exec.remove_file(path);
            }
            ExecutionResult::ok("")
        });

        // Probes.
        let state = self.state.clone();
        exec.respond_with(apt::LIST_COMMAND, move |_| {
            let state = state.lock().unwrap();
            let listing: String = state
                .apt
                .iter()
                .map(|(name, version)| format!("{name}\t{version}\tinstalled\n"))
                .collect();
            ExecutionResult::ok(listing)
        });

        let state = self.state.clone();
        exec.respond_with(pip::LIST_COMMAND, move |_| {
            let state = state.lock().unwrap();
            let listing: Vec<_> = state
                .pip
                .iter()
                .map(|(name, version)| serde_json::json!({"name": name, "version": version}))
                .collect();
            ExecutionResult::ok(serde_json::Value::Array(listing).to_string())
        });

        for missing in [dnf::LIST_COMMAND, conda::LIST_COMMAND, spack::LIST_COMMAND] {
            exec.respond(missing, ExecutionResult::failed(127, "command not found"));
        }

        let state = self.state.clone();
        exec.respond_with(SERVICE_UNITS_COMMAND, move |_| {
            let state = state.lock().unwrap();
            let listing: String = state
                .services
                .iter()
                .map(|(name, svc)| {
                    let (active, sub) = if svc.running {
                        ("active", "running")
                    } else {
                        ("inactive", "dead")
                    };
                    format!("{name}.service loaded {active} {sub} {name} daemon\n")
                })
                .collect();
            ExecutionResult::ok(listing)
        });

        let state = self.state.clone();
        exec.respond_with(SERVICE_FILES_COMMAND, move |_| {
            let state = state.lock().unwrap();
            let listing: String = state
                .services
                .iter()
                .map(|(name, svc)| {
                    let enabled = if svc.enabled { "enabled" } else { "disabled" };
                    format!("{name}.service {enabled} enabled\n")
                })
                .collect();
            ExecutionResult::ok(listing)
        });

        let state = self.state.clone();
        exec.respond_with(SOCKETS_COMMAND, move |_| {
            let state = state.lock().unwrap();
            let mut owners: BTreeMap<u16, String> = state.foreign_ports.clone();
            for (name, svc) in &state.services {
                if let (true, Some(port)) = (svc.running, state.service_ports.get(name)) {
                    owners.insert(*port, name.clone());
                }
            }
            let listing: String = owners
                .iter()
                .map(|(port, owner)| {
                    format!("LISTEN 0 4096 0.0.0.0:{port} 0.0.0.0:* users:((\"{owner}\",pid=100,fd=3))\n")
                })
                .collect();
            ExecutionResult::ok(listing)
        });

        for (command, path) in [(PASSWD_COMMAND, "/etc/passwd"), (GROUP_COMMAND, "/etc/group")] {
            let files = weak.clone();
            exec.respond_with(command, move |_| {
                let exec = files.upgrade().unwrap();
                ExecutionResult::ok(String::from_utf8(exec.file(path).unwrap_or_default()).unwrap())
            });
        }

        let files = weak.clone();
        exec.respond_with(READ_COMMAND, move |_| {
            let exec = files.upgrade().unwrap();
            match exec.file(HISTORY_PATH) {
                Some(body) => ExecutionResult::ok(String::from_utf8(body).unwrap()),
                None => ExecutionResult::failed(1, format!("cat: {HISTORY_PATH}: No such file or directory")),
            }
        });

        let files = weak;
        exec.respond_with("TESSERA_HISTORY_EOF", move |script| {
            let exec = files.upgrade().unwrap();
            let body: Vec<&str> = script
                .lines()
                .skip_while(|l| !l.contains("<<'TESSERA_HISTORY_EOF'"))
                .skip(1)
                .take_while(|l| *l != "TESSERA_HISTORY_EOF")
                .collect();
            exec.put_file(HISTORY_PATH, body.join("\n"));
            ExecutionResult::ok("")
        });
    }
}
