//! Command-broker executor for instances with no inbound network path.
//!
//! The broker is an HTTP service with an agent on each instance. A command is
//! submitted, then polled until it reaches a terminal status:
//!
//! ```text
//! POST /v1/commands                     {instance_id, script, timeout_seconds} -> {command_id}
//! GET  /v1/commands/{id}                -> {status, exit_code, stdout, stderr}
//! POST /v1/commands/{id}/cancel
//! PUT  /v1/instances/{id}/files?path=   (raw bytes)
//! GET  /v1/instances/{id}/files?path=   -> raw bytes, 404 when absent
//! ```

use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::RemoteExecutor;
use crate::resolver::InstanceResolver;
use crate::types::ExecutionResult;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound on a downloaded file.
const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Timeout handed to the broker when the context has no deadline.
const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3600);

/// Cap on the best-effort cancel request.
const CANCEL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    instance_id: &'a str,
    script: &'a str,
    timeout_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    command_id: String,
}

/// Broker-side lifecycle of a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum CommandStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
    TimedOut,
}

impl CommandStatus {
    fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }
}

#[derive(Debug, Deserialize)]
struct CommandInvocation {
    status: CommandStatus,
    #[serde(default)]
    exit_code: Option<i32>,
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
}

/// Executor that relays commands through an HTTP command broker.
pub struct BrokerExecutor {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
    resolver: Arc<dyn InstanceResolver>,
    poll_interval: Duration,
}

impl BrokerExecutor {
    /// Create an executor for the broker at `base_url`.
    pub fn new(base_url: impl Into<String>, resolver: Arc<dyn InstanceResolver>) -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            resolver,
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// How often to poll a running command.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// The broker base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Broker-side id for `instance`, falling back to the instance name.
    fn instance_id(&self, instance: &str) -> Result<String> {
        let endpoint = self.resolver.resolve(instance)?;
        Ok(endpoint.instance_id.unwrap_or_else(|| instance.to_string()))
    }

    fn auth(&self) -> Option<String> {
        self.token.as_ref().map(|t| format!("Bearer {}", t))
    }

    fn submit(&self, ctx: &Context, instance: &str, instance_id: &str, script: &str) -> Result<String> {
        let url = format!("{}/v1/commands", self.base_url);
        let timeout = ctx.remaining().unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        let body = SubmitRequest {
            instance_id,
            script,
            timeout_seconds: timeout.as_secs().max(1),
        };

        let mut request = self
            .agent
            .post(&url)
            .config()
            .timeout_global(request_timeout(ctx)?)
            .build()
            .header("User-Agent", "tessera");
        if let Some(auth) = self.auth() {
            request = request.header("Authorization", &auth);
        }
        let response: SubmitResponse = request
            .send_json(&body)
            .map_err(|e| broker_error(instance, e))?
            .body_mut()
            .read_json()
            .map_err(|e| broker_error(instance, e))?;

        log::debug!("broker accepted command {} for {}", response.command_id, instance);
        Ok(response.command_id)
    }

    fn poll(&self, ctx: &Context, instance: &str, command_id: &str) -> Result<CommandInvocation> {
        let url = format!("{}/v1/commands/{}", self.base_url, command_id);
        let mut request = self
            .agent
            .get(&url)
            .config()
            .timeout_global(request_timeout(ctx)?)
            .build()
            .header("User-Agent", "tessera");
        if let Some(auth) = self.auth() {
            request = request.header("Authorization", &auth);
        }
        request
            .call()
            .map_err(|e| broker_error(instance, e))?
            .body_mut()
            .read_json()
            .map_err(|e| broker_error(instance, e))
    }

    /// Ask the broker to stop a command. Failures are only logged.
    fn cancel(&self, command_id: &str) {
        let url = format!("{}/v1/commands/{}/cancel", self.base_url, command_id);
        let mut request = self
            .agent
            .post(&url)
            .config()
            .timeout_global(Some(CANCEL_TIMEOUT))
            .build()
            .header("User-Agent", "tessera");
        if let Some(auth) = self.auth() {
            request = request.header("Authorization", &auth);
        }
        if let Err(err) = request.send_empty() {
            log::warn!("Failed to cancel broker command {}: {}", command_id, err);
        }
    }

    fn run(&self, ctx: &Context, instance: &str, script: &str) -> Result<ExecutionResult> {
        ctx.check()?;
        let instance_id = self.instance_id(instance)?;
        let started = Instant::now();
        let command_id = self.submit(ctx, instance, &instance_id, script)?;

        loop {
            if let Err(err) = ctx.check() {
                self.cancel(&command_id);
                return Err(err);
            }

            let invocation = match self.poll(ctx, instance, &command_id) {
                Ok(invocation) => invocation,
                Err(err @ (Error::Timeout | Error::Cancelled)) => {
                    self.cancel(&command_id);
                    return Err(err);
                }
                Err(err) => return Err(err),
            };
            if invocation.status.is_terminal() {
                return finish(instance, invocation, started.elapsed());
            }

            let wait = match ctx.remaining() {
                Some(left) => left.min(self.poll_interval),
                None => self.poll_interval,
            };
            thread::sleep(wait);
        }
    }

    fn files_url(&self, instance_id: &str) -> String {
        format!("{}/v1/instances/{}/files", self.base_url, instance_id)
    }
}

impl RemoteExecutor for BrokerExecutor {
    fn execute(&self, ctx: &Context, instance: &str, command: &str) -> Result<ExecutionResult> {
        self.run(ctx, instance, command)
    }

    fn execute_script(
        &self,
        ctx: &Context,
        instance: &str,
        script: &str,
    ) -> Result<ExecutionResult> {
        self.run(ctx, instance, script)
    }

    fn copy_file(
        &self,
        ctx: &Context,
        instance: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        ctx.check()?;
        let instance_id = self.instance_id(instance)?;
        let data = fs::read(local_path)?;

        let mut request = self
            .agent
            .put(&self.files_url(&instance_id))
            .config()
            .timeout_global(request_timeout(ctx)?)
            .build()
            .query("path", remote_path)
            .header("User-Agent", "tessera");
        if let Some(auth) = self.auth() {
            request = request.header("Authorization", &auth);
        }
        request
            .send(&data[..])
            .map_err(|e| transfer_error(instance, remote_path, e))?;
        Ok(())
    }

    fn get_file(
        &self,
        ctx: &Context,
        instance: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        ctx.check()?;
        let instance_id = self.instance_id(instance)?;

        let mut request = self
            .agent
            .get(&self.files_url(&instance_id))
            .config()
            .timeout_global(request_timeout(ctx)?)
            .build()
            .query("path", remote_path)
            .header("User-Agent", "tessera");
        if let Some(auth) = self.auth() {
            request = request.header("Authorization", &auth);
        }
        let bytes = request
            .call()
            .map_err(|e| transfer_error(instance, remote_path, e))?
            .body_mut()
            .with_config()
            .limit(MAX_FILE_SIZE)
            .read_to_vec()
            .map_err(|e| transfer_error(instance, remote_path, e))?;

        fs::write(local_path, bytes)?;
        Ok(())
    }
}

/// Map a terminal invocation onto the executor contract.
fn finish(instance: &str, invocation: CommandInvocation, duration: Duration) -> Result<ExecutionResult> {
    match invocation.status {
        CommandStatus::TimedOut => Err(Error::Timeout),
        CommandStatus::Cancelled => Err(Error::Cancelled),
        CommandStatus::Success | CommandStatus::Failed => Ok(ExecutionResult {
            exit_code: invocation.exit_code.unwrap_or(match invocation.status {
                CommandStatus::Success => 0,
                _ => 1,
            }),
            stdout: invocation.stdout,
            stderr: invocation.stderr,
            duration,
        }),
        CommandStatus::Pending | CommandStatus::InProgress => Err(Error::Broker {
            message: format!("command for '{}' has not finished", instance),
            status: None,
        }),
    }
}

/// Per-request timeout: whatever is left of the context deadline.
fn request_timeout(ctx: &Context) -> Result<Option<Duration>> {
    ctx.check()?;
    Ok(ctx.remaining())
}

/// Failures to reach the broker at all, as opposed to a bad reply.
fn is_connection_error(err: &ureq::Error) -> bool {
    matches!(
        err,
        ureq::Error::Io(_) | ureq::Error::HostNotFound | ureq::Error::ConnectionFailed
    )
}

fn broker_error(instance: &str, err: ureq::Error) -> Error {
    match err {
        ureq::Error::Timeout(_) => Error::Timeout,
        ureq::Error::StatusCode(code) => Error::Broker {
            message: format!("broker returned HTTP {} for '{}'", code, instance),
            status: Some(code),
        },
        other if is_connection_error(&other) => Error::unreachable(instance, other.to_string()),
        other => Error::Broker {
            message: format!("bad broker response for '{}': {}", instance, other),
            status: None,
        },
    }
}

fn transfer_error(instance: &str, path: &str, err: ureq::Error) -> Error {
    match err {
        ureq::Error::StatusCode(404) => Error::NotFound {
            instance: instance.to_string(),
            path: path.to_string(),
        },
        ureq::Error::StatusCode(code) => Error::TransferFailed {
            instance: instance.to_string(),
            path: path.to_string(),
            message: format!("HTTP {}", code),
        },
        ureq::Error::Timeout(_) => Error::Timeout,
        other if is_connection_error(&other) => Error::unreachable(instance, other.to_string()),
        other => Error::TransferFailed {
            instance: instance.to_string(),
            path: path.to_string(),
            message: other.to_string(),
        },
    }
}
