//! Core types shared by every executor.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of a command that actually ran on the instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Process exit code (0 on success)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Wall-clock time the call took
    #[serde(default)]
    pub duration: Duration,
}

impl ExecutionResult {
    /// A successful result with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// A failed result with the given exit code and stderr.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    /// Whether the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout with surrounding whitespace removed.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// Stderr with surrounding whitespace removed.
    pub fn stderr_trimmed(&self) -> &str {
        self.stderr.trim()
    }
}

/// How to reach an instance, as supplied by the resource lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP address for direct connections
    pub host: String,
    /// Login user; executors fall back to their configured default
    #[serde(default)]
    pub user: Option<String>,
    /// SSH port; defaults to 22
    #[serde(default)]
    pub port: Option<u16>,
    /// Provider-side instance identifier used by the command broker
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl Endpoint {
    /// Endpoint with only a host.
    pub fn host(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            instance_id: None,
        }
    }

    /// Set the login user.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the broker instance id.
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors() {
        let ok = ExecutionResult::ok("hello\n");
        assert!(ok.success());
        assert_eq!(ok.stdout_trimmed(), "hello");

        let failed = ExecutionResult::failed(100, "E: Unable to locate package\n");
        assert!(!failed.success());
        assert_eq!(failed.exit_code, 100);
        assert_eq!(failed.stderr_trimmed(), "E: Unable to locate package");
    }

    #[test]
    fn test_endpoint_builder() {
        let ep = Endpoint::host("10.0.0.5")
            .with_user("ubuntu")
            .with_port(2222)
            .with_instance_id("i-0abc");
        assert_eq!(ep.user.as_deref(), Some("ubuntu"));
        assert_eq!(ep.port, Some(2222));
        assert_eq!(ep.instance_id.as_deref(), Some("i-0abc"));
    }
}
