//! Child processes behind command backends.
//!
//! The prompt is written on a scoped thread while two more threads drain
//! stdout and stderr, so neither side can stall on a full pipe.

use std::io::{ErrorKind, Read, Write};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, ScopedJoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Bytes kept per stream; anything past it is drained and counted.
    pub output_limit_bytes: usize,
}

/// One captured output stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

/// Run `cmd` with `prompt` on stdin. A process still running at the timeout is killed.
#[instrument(skip_all, fields(prompt_bytes = prompt.len(), timeout_secs = limits.timeout.as_secs()))]
pub fn run_with_prompt(
    mut cmd: Command,
    prompt: &[u8],
    limits: ProcessLimits,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn model process {:?}", cmd.get_program()))?;
    debug!(pid = child.id(), "model process started");

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| anyhow!("stdin was not piped"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let limit = limits.output_limit_bytes;

    thread::scope(|scope| -> Result<ProcessOutput> {
        let writer = scope.spawn(move || feed_prompt(stdin, prompt));
        let out = scope.spawn(move || capture(stdout, limit));
        let err = scope.spawn(move || capture(stderr, limit));

        let (status, timed_out) = match child
            .wait_timeout(limits.timeout)
            .context("wait for model process")?
        {
            Some(status) => (status, false),
            None => {
                warn!(
                    timeout_secs = limits.timeout.as_secs(),
                    "model process timed out, killing"
                );
                child.kill().context("kill model process")?;
                (child.wait().context("reap model process")?, true)
            }
        };

        joined(writer, "prompt writer")?;
        let stdout = joined(out, "stdout reader")?;
        let stderr = joined(err, "stderr reader")?;
        if stdout.dropped > 0 || stderr.dropped > 0 {
            warn!(
                stdout_dropped = stdout.dropped,
                stderr_dropped = stderr.dropped,
                "model output over limit"
            );
        }
        debug!(exit_code = ?status.code(), timed_out, "model process finished");
        Ok(ProcessOutput {
            status,
            stdout,
            stderr,
            timed_out,
        })
    })
}

fn joined<T>(handle: ScopedJoinHandle<'_, Result<T>>, role: &str) -> Result<T> {
    handle
        .join()
        .map_err(|_| anyhow!("{role} thread panicked"))?
}

fn feed_prompt(mut stdin: ChildStdin, prompt: &[u8]) -> Result<()> {
    // The command may answer without reading the whole prompt.
    match stdin.write_all(prompt) {
        Err(err) if err.kind() == ErrorKind::BrokenPipe => Ok(()),
        other => other.context("write prompt to stdin"),
    }
}

fn capture<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read model output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn limits(timeout: Duration, output_limit_bytes: usize) -> ProcessLimits {
        ProcessLimits {
            timeout,
            output_limit_bytes,
        }
    }

    #[test]
    fn prompt_reaches_stdin() {
        let out = run_with_prompt(
            sh("tr a-z A-Z"),
            b"hello",
            limits(Duration::from_secs(10), 1024),
        )
        .expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout.text(), "HELLO");
        assert!(!out.timed_out);
    }

    #[test]
    fn output_past_the_limit_is_counted_not_kept() {
        let out = run_with_prompt(
            sh("cat >/dev/null; printf 0123456789"),
            b"",
            limits(Duration::from_secs(10), 4),
        )
        .expect("run");
        assert_eq!(out.stdout.text(), "0123");
        assert_eq!(out.stdout.dropped, 6);
    }

    #[test]
    fn slow_process_is_killed() {
        let out = run_with_prompt(
            sh("exec sleep 5"),
            b"prompt",
            limits(Duration::from_millis(100), 64),
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
    }

    #[test]
    fn unread_prompt_is_not_an_error() {
        let big = vec![b'x'; 1 << 20];
        let out = run_with_prompt(sh("printf done"), &big, limits(Duration::from_secs(10), 64))
            .expect("run");
        assert_eq!(out.stdout.text(), "done");
        assert_eq!(out.stderr, Captured::default());
    }
}
