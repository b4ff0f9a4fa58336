//! Direct-connection executor using the system `ssh` and `scp` binaries.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::RemoteExecutor;
use crate::process::{self, ProcessOutput};
use crate::resolver::InstanceResolver;
use crate::types::{Endpoint, ExecutionResult};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// ssh reserves 255 for its own failures.
const SSH_TRANSPORT_EXIT: i32 = 255;

/// Options for [`SshExecutor`].
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Login user when the endpoint does not name one
    pub default_user: String,
    /// Private key passed with `-i`
    pub identity_file: Option<PathBuf>,
    /// `ConnectTimeout` handed to ssh
    pub connect_timeout: Duration,
    /// Accept unknown host keys on first contact (`StrictHostKeyChecking=accept-new`)
    pub accept_new_host_keys: bool,
    /// ssh binary name or path
    pub ssh_binary: String,
    /// scp binary name or path
    pub scp_binary: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            default_user: "ubuntu".to_string(),
            identity_file: None,
            connect_timeout: Duration::from_secs(10),
            accept_new_host_keys: true,
            ssh_binary: "ssh".to_string(),
            scp_binary: "scp".to_string(),
        }
    }
}

/// Executor that shells out to `ssh`/`scp`.
pub struct SshExecutor {
    resolver: Arc<dyn InstanceResolver>,
    options: SshOptions,
}

impl SshExecutor {
    /// Create an executor resolving instances through `resolver`.
    pub fn new(resolver: Arc<dyn InstanceResolver>, options: SshOptions) -> Self {
        Self { resolver, options }
    }

    /// The options this executor was built with.
    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    fn destination(&self, endpoint: &Endpoint) -> String {
        let user = endpoint
            .user
            .as_deref()
            .unwrap_or(&self.options.default_user);
        format!("{}@{}", user, endpoint.host)
    }

    /// Options common to ssh and scp.
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            if self.options.accept_new_host_keys {
                "StrictHostKeyChecking=accept-new".to_string()
            } else {
                "StrictHostKeyChecking=yes".to_string()
            },
        ];
        if let Some(key) = &self.options.identity_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }

    fn ssh_command(&self, endpoint: &Endpoint, remote: &str) -> Command {
        let mut cmd = Command::new(&self.options.ssh_binary);
        cmd.args(self.common_args())
            .arg("-p")
            .arg(endpoint.port.unwrap_or(22).to_string())
            .arg(self.destination(endpoint))
            .arg("--")
            .arg(remote);
        cmd
    }

    fn scp_command(&self, endpoint: &Endpoint, from: &str, to: &str) -> Command {
        let mut cmd = Command::new(&self.options.scp_binary);
        cmd.args(self.common_args())
            .arg("-P")
            .arg(endpoint.port.unwrap_or(22).to_string())
            .arg(from)
            .arg(to);
        cmd
    }

    fn run_ssh(
        &self,
        ctx: &Context,
        instance: &str,
        remote: &str,
        stdin: Option<&[u8]>,
    ) -> Result<ExecutionResult> {
        let endpoint = self.resolver.resolve(instance)?;
        let started = Instant::now();
        log::debug!("ssh {} -> {}", instance, remote);

        let output = process::run(ctx, self.ssh_command(&endpoint, remote), stdin)?;
        into_result(instance, output, started.elapsed())
    }

    fn remote_spec(&self, endpoint: &Endpoint, path: &str) -> String {
        format!("{}:{}", self.destination(endpoint), path)
    }
}

impl RemoteExecutor for SshExecutor {
    fn execute(&self, ctx: &Context, instance: &str, command: &str) -> Result<ExecutionResult> {
        self.run_ssh(ctx, instance, command, None)
    }

    fn execute_script(
        &self,
        ctx: &Context,
        instance: &str,
        script: &str,
    ) -> Result<ExecutionResult> {
        self.run_ssh(ctx, instance, "bash -s", Some(script.as_bytes()))
    }

    fn copy_file(
        &self,
        ctx: &Context,
        instance: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        let endpoint = self.resolver.resolve(instance)?;
        let from = local_path.display().to_string();
        let to = self.remote_spec(&endpoint, remote_path);
        log::debug!("scp {} -> {}:{}", from, instance, remote_path);

        let output = process::run(ctx, self.scp_command(&endpoint, &from, &to), None)?;
        check_transfer(instance, remote_path, &output)
    }

    fn get_file(
        &self,
        ctx: &Context,
        instance: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        let endpoint = self.resolver.resolve(instance)?;
        let from = self.remote_spec(&endpoint, remote_path);
        let to = local_path.display().to_string();
        log::debug!("scp {}:{} -> {}", instance, remote_path, to);

        let output = process::run(ctx, self.scp_command(&endpoint, &from, &to), None)?;
        check_transfer(instance, remote_path, &output)
    }
}

/// Turn raw ssh output into an [`ExecutionResult`] or a transport error.
fn into_result(instance: &str, output: ProcessOutput, duration: Duration) -> Result<ExecutionResult> {
    match output.code {
        None => Err(Error::unreachable(instance, "ssh terminated by signal")),
        Some(SSH_TRANSPORT_EXIT) if is_connection_failure(&output.stderr) => {
            Err(Error::unreachable(instance, output.stderr.trim()))
        }
        Some(code) => Ok(ExecutionResult {
            exit_code: code,
            stdout: output.stdout,
            stderr: output.stderr,
            duration,
        }),
    }
}

fn check_transfer(instance: &str, path: &str, output: &ProcessOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }

    let stderr = output.stderr.trim();
    let lower = stderr.to_lowercase();
    if lower.contains("no such file") {
        return Err(Error::NotFound {
            instance: instance.to_string(),
            path: path.to_string(),
        });
    }
    if output.code.is_none() || is_connection_failure(stderr) {
        return Err(Error::unreachable(instance, stderr));
    }
    Err(Error::TransferFailed {
        instance: instance.to_string(),
        path: path.to_string(),
        message: stderr.to_string(),
    })
}

/// Whether ssh stderr describes a failure to reach or authenticate with the host.
fn is_connection_failure(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("could not resolve")
        || lower.contains("no route to host")
        || lower.contains("network is unreachable")
        || lower.contains("connection closed")
        || lower.contains("connection reset")
        || lower.contains("host key verification failed")
        || lower.contains("permission denied (publickey")
        || lower.contains("operation timed out")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::StaticInventory;

    fn executor() -> SshExecutor {
        let inventory = StaticInventory::new().with(
            "ws1",
            Endpoint::host("10.0.0.7").with_user("researcher").with_port(2222),
        );
        SshExecutor::new(
            Arc::new(inventory),
            SshOptions {
                identity_file: Some(PathBuf::from("/keys/id_ed25519")),
                ..Default::default()
            },
        )
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_ssh_command_shape() {
        let exec = executor();
        let endpoint = exec.resolver.resolve("ws1").unwrap();
        let args = args_of(&exec.ssh_command(&endpoint, "uname -a"));

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"/keys/id_ed25519".to_string()));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert_eq!(&args[args.len() - 3..], ["researcher@10.0.0.7", "--", "uname -a"]);
    }

    #[test]
    fn test_default_user_applies() {
        let exec = SshExecutor::new(
            Arc::new(StaticInventory::new().with("ws2", Endpoint::host("host.example"))),
            SshOptions::default(),
        );
        let endpoint = exec.resolver.resolve("ws2").unwrap();
        assert_eq!(exec.destination(&endpoint), "ubuntu@host.example");
    }

    #[test]
    fn test_unknown_instance_is_configuration_error() {
        let exec = executor();
        let err = exec
            .execute(&Context::background(), "nope", "true")
            .unwrap_err();
        assert!(matches!(err, Error::UnknownInstance(_)));
    }

    #[test]
    fn test_exit_255_with_connection_failure_is_transport() {
        let output = ProcessOutput {
            code: Some(255),
            stdout: String::new(),
            stderr: "ssh: connect to host 10.0.0.7 port 22: Connection refused".into(),
        };
        let err = into_result("ws1", output, Duration::ZERO).unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_remote_nonzero_exit_is_result() {
        let output = ProcessOutput {
            code: Some(100),
            stdout: String::new(),
            stderr: "E: Unable to locate package nope".into(),
        };
        let result = into_result("ws1", output, Duration::ZERO).unwrap();
        assert_eq!(result.exit_code, 100);
    }

    #[test]
    fn test_transfer_classification() {
        let missing = ProcessOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "scp: /etc/nope: No such file or directory".into(),
        };
        assert!(matches!(
            check_transfer("ws1", "/etc/nope", &missing),
            Err(Error::NotFound { .. })
        ));

        let denied = ProcessOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "scp: /etc/shadow: Permission denied".into(),
        };
        assert!(matches!(
            check_transfer("ws1", "/etc/shadow", &denied),
            Err(Error::TransferFailed { .. })
        ));
    }
}
