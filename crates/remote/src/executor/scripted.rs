//! In-memory executor with canned responses and a call log.
//!
//! Used by tests across the workspace to drive the engine deterministically
//! and to assert exactly which commands reached an instance.

use crate::context::Context;
use crate::error::{Error, Result};
use crate::executor::RemoteExecutor;
use crate::types::ExecutionResult;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Kind of executor call recorded in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Execute,
    Script,
    CopyFile,
    GetFile,
}

/// One recorded executor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub instance: String,
    /// Command text, script text, or remote path for file transfers
    pub payload: String,
}

/// Simulated transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Unreachable,
    Timeout,
}

type Responder = Arc<dyn Fn(&str) -> ExecutionResult + Send + Sync>;

#[derive(Clone)]
enum Matcher {
    Exact(String),
    Prefix(String),
    Contains(String),
}

impl Matcher {
    fn matches(&self, text: &str) -> bool {
        match self {
            Self::Exact(s) => text.trim() == s,
            Self::Prefix(s) => text.trim_start().starts_with(s.as_str()),
            Self::Contains(s) => text.contains(s.as_str()),
        }
    }
}

#[derive(Clone)]
enum Reply {
    Fixed(ExecutionResult),
    Dynamic(Responder),
    Fault(Fault),
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(r) => f.debug_tuple("Fixed").field(r).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
            Self::Fault(fault) => f.debug_tuple("Fault").field(fault).finish(),
        }
    }
}

#[derive(Default)]
struct Inner {
    rules: Vec<(Matcher, Reply)>,
    default: ExecutionResult,
    files: HashMap<String, Vec<u8>>,
    unreachable: bool,
    calls: Vec<RecordedCall>,
}

/// Executor that answers from rules instead of touching a machine.
///
/// Rules are checked newest first, so a later `respond*` call overrides an
/// earlier one for the same command. Unmatched commands get the default
/// result (exit 0, empty output unless changed with [`set_default`]).
///
/// [`set_default`]: ScriptedExecutor::set_default
#[derive(Default)]
pub struct ScriptedExecutor {
    inner: Mutex<Inner>,
}

impl ScriptedExecutor {
    /// Create an executor that answers everything with exit 0.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the log from other assertions.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn push_rule(&self, matcher: Matcher, reply: Reply) {
        self.lock().rules.push((matcher, reply));
    }

    /// Answer commands equal to `command` (ignoring surrounding whitespace).
    pub fn respond(&self, command: &str, result: ExecutionResult) {
        self.push_rule(Matcher::Exact(command.trim().to_string()), Reply::Fixed(result));
    }

    /// Answer commands starting with `prefix`.
    pub fn respond_prefix(&self, prefix: &str, result: ExecutionResult) {
        self.push_rule(Matcher::Prefix(prefix.to_string()), Reply::Fixed(result));
    }

    /// Answer commands or scripts containing `needle`.
    pub fn respond_contains(&self, needle: &str, result: ExecutionResult) {
        self.push_rule(Matcher::Contains(needle.to_string()), Reply::Fixed(result));
    }

    /// Answer commands containing `needle` by calling `responder` with the full text.
    pub fn respond_with<F>(&self, needle: &str, responder: F)
    where
        F: Fn(&str) -> ExecutionResult + Send + Sync + 'static,
    {
        self.push_rule(
            Matcher::Contains(needle.to_string()),
            Reply::Dynamic(Arc::new(responder)),
        );
    }

    /// Fail commands containing `needle` with a transport fault.
    pub fn fail_on(&self, needle: &str, fault: Fault) {
        self.push_rule(Matcher::Contains(needle.to_string()), Reply::Fault(fault));
    }

    /// Result for commands no rule matches.
    pub fn set_default(&self, result: ExecutionResult) {
        self.lock().default = result;
    }

    /// Seed a remote file served by `get_file`.
    pub fn put_file(&self, remote_path: &str, contents: impl Into<Vec<u8>>) {
        self.lock().files.insert(remote_path.to_string(), contents.into());
    }

    /// Current contents of a remote file, including uploads.
    pub fn file(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(remote_path).cloned()
    }

    /// Drop a remote file. Returns whether it existed.
    pub fn remove_file(&self, remote_path: &str) -> bool {
        self.lock().files.remove(remote_path).is_some()
    }

    /// Make every call fail as unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// Every call so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Text of every `execute` and `execute_script` call, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c.kind, CallKind::Execute | CallKind::Script))
            .map(|c| c.payload.clone())
            .collect()
    }

    /// Calls that are not reads: uploads, plus commands and scripts whose
    /// text does not start with one of `read_only`.
    pub fn mutating_calls(&self, read_only: &[&str]) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| match c.kind {
                CallKind::GetFile => false,
                CallKind::CopyFile => true,
                CallKind::Execute | CallKind::Script => {
                    let text = c.payload.trim_start();
                    !read_only.iter().any(|prefix| text.starts_with(prefix))
                }
            })
            .cloned()
            .collect()
    }

    /// Forget recorded calls, keeping rules and files.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn record(&self, kind: CallKind, instance: &str, payload: &str) {
        self.lock().calls.push(RecordedCall {
            kind,
            instance: instance.to_string(),
            payload: payload.to_string(),
        });
    }

    fn preflight(&self, ctx: &Context, instance: &str) -> Result<()> {
        ctx.check()?;
        if self.lock().unreachable {
            return Err(Error::unreachable(instance, "scripted executor marked unreachable"));
        }
        Ok(())
    }

    fn answer(&self, instance: &str, text: &str) -> Result<ExecutionResult> {
        let reply = {
            let inner = self.lock();
            inner
                .rules
                .iter()
                .rev()
                .find(|(matcher, _)| matcher.matches(text))
                .map(|(_, reply)| reply.clone())
                .unwrap_or_else(|| Reply::Fixed(inner.default.clone()))
        };

        match reply {
            Reply::Fixed(result) => Ok(result),
            Reply::Dynamic(responder) => Ok(responder(text)),
            Reply::Fault(Fault::Unreachable) => {
                Err(Error::unreachable(instance, "scripted transport fault"))
            }
            Reply::Fault(Fault::Timeout) => Err(Error::Timeout),
        }
    }
}

impl RemoteExecutor for ScriptedExecutor {
    fn execute(&self, ctx: &Context, instance: &str, command: &str) -> Result<ExecutionResult> {
        self.preflight(ctx, instance)?;
        self.record(CallKind::Execute, instance, command);
        self.answer(instance, command)
    }

    fn execute_script(
        &self,
        ctx: &Context,
        instance: &str,
        script: &str,
    ) -> Result<ExecutionResult> {
        self.preflight(ctx, instance)?;
        self.record(CallKind::Script, instance, script);
        self.answer(instance, script)
    }

    fn copy_file(
        &self,
        ctx: &Context,
        instance: &str,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<()> {
        self.preflight(ctx, instance)?;
        self.record(CallKind::CopyFile, instance, remote_path);
        let data = fs::read(local_path)?;
        self.lock().files.insert(remote_path.to_string(), data);
        Ok(())
    }

    fn get_file(
        &self,
        ctx: &Context,
        instance: &str,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<()> {
        self.preflight(ctx, instance)?;
        self.record(CallKind::GetFile, instance, remote_path);
        let data = self
            .lock()
            .files
            .get(remote_path)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                instance: instance.to_string(),
                path: remote_path.to_string(),
            })?;
        fs::write(local_path, data)?;
        Ok(())
    }
}
