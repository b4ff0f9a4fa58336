//! Local child-process runner that honours a [`Context`].
//!
//! `ssh` and `scp` are ordinary child processes; this module polls them so a
//! deadline or cancellation kills the child instead of waiting forever.

use crate::context::Context;
use crate::error::Result;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Captured output of a finished child process.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProcessOutput {
    /// Exit code; `None` when the child was killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Spawn `command`, optionally feed `stdin`, and wait while the context is
/// live. On timeout or cancellation the child is killed and the context
/// error is returned.
pub(crate) fn run(ctx: &Context, mut command: Command, stdin: Option<&[u8]>) -> Result<ProcessOutput> {
    ctx.check()?;

    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn()?;

    if let Some(input) = stdin
        && let Some(mut pipe) = child.stdin.take()
    {
        let data = input.to_vec();
        thread::spawn(move || {
            // Closing the pipe on drop signals EOF to `bash -s`.
            let _ = pipe.write_all(&data);
        });
    }

    let stdout_reader = spawn_reader(child.stdout.take());
    let stderr_reader = spawn_reader(child.stderr.take());

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if let Err(err) = ctx.check() {
            log::debug!("Killing child process: {}", err);
            let _ = child.kill();
            let _ = child.wait();
            return Err(err);
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    Ok(ProcessOutput {
        code: status.code(),
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
    })
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut source) = source {
            let _ = source.read_to_end(&mut buf);
        }
        buf
    })
}
