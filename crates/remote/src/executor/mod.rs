//! Executor abstraction for remote instances.
//!
//! The [`RemoteExecutor`] trait is the only way the engine touches an
//! instance, allowing for different implementations:
//! - [`ssh::SshExecutor`] for instances with a reachable network endpoint
//! - [`broker::BrokerExecutor`] for instances reachable only through an agent
//! - [`scripted::ScriptedExecutor`] for deterministic tests

pub mod broker;
pub mod scripted;
pub mod ssh;

use crate::context::Context;
use crate::error::Result;
use crate::types::ExecutionResult;
use std::path::Path;
use std::sync::Arc;

/// Run commands and move files on a named instance.
///
/// A non-zero exit code comes back as `Ok(ExecutionResult)`; only transport
/// failures (unreachable, timed out, cancelled) are `Err`.
pub trait RemoteExecutor: Send + Sync {
    /// Run a single shell command.
    fn execute(&self, ctx: &Context, instance: &str, command: &str) -> Result<ExecutionResult>;

    /// Run a multi-line script with bash.
    fn execute_script(&self, ctx: &Context, instance: &str, script: &str)
    -> Result<ExecutionResult>;

    /// Upload `local_path` to `remote_path`.
    fn copy_file(
        &self,
        ctx: &Context,
        instance: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()>;

    /// Download `remote_path` into `local_path`.
    ///
    /// A missing remote file is [`Error::NotFound`](crate::Error::NotFound).
    fn get_file(
        &self,
        ctx: &Context,
        instance: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()>;
}

/// Shared, type-erased executor.
pub type SharedExecutor = Arc<dyn RemoteExecutor>;

impl<E: RemoteExecutor + ?Sized> RemoteExecutor for Arc<E> {
    fn execute(&self, ctx: &Context, instance: &str, command: &str) -> Result<ExecutionResult> {
        (**self).execute(ctx, instance, command)
    }

    fn execute_script(
        &self,
        ctx: &Context,
        instance: &str,
        script: &str,
    ) -> Result<ExecutionResult> {
        (**self).execute_script(ctx, instance, script)
    }

    fn copy_file(
        &self,
        ctx: &Context,
        instance: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        (**self).copy_file(ctx, instance, local_path, remote_path)
    }

    fn get_file(
        &self,
        ctx: &Context,
        instance: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        (**self).get_file(ctx, instance, remote_path, local_path)
    }
}
