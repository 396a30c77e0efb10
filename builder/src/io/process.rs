//! Child process execution with a timeout and bounded output, used for the
//! oracle bridge.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long reader threads may keep draining once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Last `max_chars` characters of stderr, lossily decoded.
    pub fn stderr_tail(&self, max_chars: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let text = text.trim();
        let count = text.chars().count();
        if count <= max_chars {
            return text.to_string();
        }
        let skip = count - max_chars;
        let tail: String = text.chars().skip(skip).collect();
        format!("...{tail}")
    }
}

/// Run `cmd`, feed it `stdin`, and wait at most `timeout`.
///
/// Stdin is written and stdout/stderr are drained on their own threads so a
/// large request cannot deadlock against a child that is already writing.
/// The child is killed on timeout. Bytes beyond `output_limit_bytes` are
/// drained and discarded.
///
/// A grandchild the command left behind can hold the pipes open after the
/// child exits. The i/o threads are only waited on until `timeout` (or a short
/// grace period after a kill); threads still blocked then are detached and
/// their output is dropped.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    stdin: Vec<u8>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    debug!(stdin_bytes = stdin.len(), "spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let mut child_stdin = child
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

    let stdin_handle = thread::spawn(move || -> Result<()> {
        // A child that exits without reading its input closes the pipe early.
        match child_stdin.write_all(&stdin) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
            Err(e) => Err(e).context("write stdin"),
        }
    });
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let started = Instant::now();
    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let drain_deadline = (started + timeout).max(Instant::now() + DRAIN_GRACE);
    join_until(stdin_handle, drain_deadline, "stdin")
        .transpose()
        .context("join stdin")?;
    let (stdout, stdout_truncated) = join_until(stdout_handle, drain_deadline, "stdout")
        .transpose()
        .context("join stdout")?
        .unwrap_or_default();
    let (stderr, stderr_truncated) = join_until(stderr_handle, drain_deadline, "stderr")
        .transpose()
        .context("join stderr")?
        .unwrap_or_default();

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        timed_out,
    })
}

fn join_thread<T>(handle: thread::JoinHandle<Result<T>>) -> Result<T> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("i/o thread panicked")),
    }
}

/// Join `handle` if it finishes before `deadline`, otherwise detach it.
fn join_until<T>(
    handle: thread::JoinHandle<Result<T>>,
    deadline: Instant,
    stream: &str,
) -> Option<Result<T>> {
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(stream, "pipe still held open after exit, detaching reader");
            return None;
        }
        thread::sleep(Duration::from_millis(10));
    }
    Some(join_thread(handle))
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
