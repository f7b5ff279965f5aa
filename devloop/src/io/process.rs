//! Bounded child processes: a wall-clock limit and a cap on retained output.
//!
//! Both the reasoner command and the local `run_command` tool go through
//! [`run_bounded`].

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Limits applied to one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is drained and counted.
    pub output_limit_bytes: usize,
}

/// One captured stream plus how many bytes were dropped past the limit.
#[derive(Debug, Default)]
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
pub struct Finished {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl Finished {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    /// Stdout then stderr as one string, with a note for each truncated stream.
    pub fn transcript(&self) -> String {
        let mut text = self.stdout.text();
        push_dropped_note(&mut text, "stdout", self.stdout.dropped);
        if !self.stderr.bytes.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr.text());
        }
        push_dropped_note(&mut text, "stderr", self.stderr.dropped);
        text
    }
}

fn push_dropped_note(text: &mut String, stream: &str, dropped: usize) {
    if dropped > 0 {
        text.push_str(&format!("\n[{stream} truncated: {dropped} bytes omitted]\n"));
    }
}

/// Spawn `cmd`, optionally feed `stdin`, and wait at most `bounds.timeout`.
///
/// Streams are drained on their own threads while the child runs, so a
/// chatty child cannot block on a full pipe. A child that outlives the
/// timeout is killed and reported with `timed_out` set.
#[instrument(skip_all, fields(timeout_secs = bounds.timeout.as_secs()))]
pub fn run_bounded(mut cmd: Command, stdin: Option<&[u8]>, bounds: Bounds) -> Result<Finished> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().context("spawn command")?;
    debug!(pid = child.id(), "child spawned");

    let writer = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || pipe.write_all(&input)))
        }
        None => None,
    };
    let stdout = drain(child.stdout.take(), bounds.output_limit_bytes)?;
    let stderr = drain(child.stderr.take(), bounds.output_limit_bytes)?;

    let (status, timed_out) = match child.wait_timeout(bounds.timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = bounds.timeout.as_secs(), "command timed out, killing");
            child.kill().context("kill command")?;
            (child.wait().context("reap killed command")?, true)
        }
    };

    if let Some(writer) = writer {
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {
                debug!("child stopped reading stdin");
            }
            Ok(Err(err)) => return Err(err).context("write stdin"),
            Err(_) => return Err(anyhow!("stdin writer panicked")),
        }
    }
    let stdout = collect(stdout).context("collect stdout")?;
    let stderr = collect(stderr).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(Finished {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn drain<R>(pipe: Option<R>, limit: usize) -> Result<JoinHandle<Result<Captured>>>
where
    R: Read + Send + 'static,
{
    let mut pipe = pipe.ok_or_else(|| anyhow!("output was not piped"))?;
    Ok(thread::spawn(move || {
        let mut captured = Captured::default();
        let mut chunk = [0u8; 8192];
        loop {
            let n = pipe.read(&mut chunk).context("read output")?;
            if n == 0 {
                return Ok(captured);
            }
            let keep = n.min(limit.saturating_sub(captured.bytes.len()));
            captured.bytes.extend_from_slice(&chunk[..keep]);
            captured.dropped += n - keep;
        }
    }))
}

fn collect(handle: JoinHandle<Result<Captured>>) -> Result<Captured> {
    handle
        .join()
        .unwrap_or_else(|_| Err(anyhow!("output reader panicked")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn bounds(timeout: Duration, limit: usize) -> Bounds {
        Bounds {
            timeout,
            output_limit_bytes: limit,
        }
    }

    #[test]
    fn stdin_is_fed_and_both_streams_captured() {
        let out = run_bounded(
            sh("cat; echo err >&2"),
            Some(b"hello\n"),
            bounds(Duration::from_secs(10), 1_000),
        )
        .expect("run");
        assert!(out.succeeded());
        assert_eq!(out.transcript(), "hello\nerr\n");
    }

    #[test]
    fn output_past_the_limit_is_counted_not_kept() {
        let out = run_bounded(
            sh("printf 'abcdefghij'"),
            None,
            bounds(Duration::from_secs(10), 4),
        )
        .expect("run");
        assert_eq!(out.stdout.bytes, b"abcd");
        assert_eq!(out.stdout.dropped, 6);
        assert!(out.transcript().contains("[stdout truncated: 6 bytes omitted]"));
    }

    #[test]
    fn nonzero_exit_is_not_success() {
        let out = run_bounded(sh("exit 3"), None, bounds(Duration::from_secs(10), 100))
            .expect("run");
        assert!(!out.succeeded());
        assert_eq!(out.status.code(), Some(3));
    }

    #[test]
    fn slow_command_is_killed() {
        let out = run_bounded(sh("sleep 5"), None, bounds(Duration::from_millis(200), 100))
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.succeeded());
    }
}
