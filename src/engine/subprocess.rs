//! Subprocess execution with pre-populated stdin.
//!
//! The one discipline every engine call follows: the payload is written to
//! a rewound temp file and assigned as the child's stdin *before* the
//! process is started. No pipe is written after spawn and no writer thread
//! exists, so the child can never observe EOF-before-payload. Stdout and
//! stderr also go through temp files, which removes the pipe-capacity
//! deadlock a polling wait would otherwise invite.

use crate::error::{NarrateError, Result};
use std::ffi::OsStr;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a child gets between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Poll interval for `try_wait`.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct SubprocessOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Run `program` to completion with `payload` as its entire stdin.
///
/// Enforces `timeout` (SIGTERM, then SIGKILL after a grace period), honors
/// `cancel` at poll granularity, and kills the child early if it writes
/// more than `max_output_bytes` to stdout. Blocks the calling thread; run
/// it under `spawn_blocking` from async code.
pub fn run_with_stdin(
    program: &Path,
    args: &[&OsStr],
    payload: &[u8],
    timeout: Duration,
    max_output_bytes: usize,
    cancel: &CancellationToken,
) -> Result<SubprocessOutput> {
    let mut stdin_file = tempfile::tempfile()?;
    stdin_file.write_all(payload)?;
    stdin_file.seek(SeekFrom::Start(0))?;

    let mut stdout_read = tempfile::tempfile()?;
    let stdout_write = stdout_read.try_clone()?;
    let mut stderr_read = tempfile::tempfile()?;
    let stderr_write = stderr_read.try_clone()?;

    let start = Instant::now();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::from(stdin_file))
        .stdout(Stdio::from(stdout_write))
        .stderr(Stdio::from(stderr_write))
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                NarrateError::EngineUnavailable(format!("{} not found", program.display()))
            }
            _ => NarrateError::Io(e),
        })?;

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if cancel.is_cancelled() {
                    terminate(&mut child);
                    return Err(NarrateError::Cancelled);
                }
                if start.elapsed() > timeout {
                    warn!("{} exceeded {timeout:?}, terminating", program.display());
                    terminate(&mut child);
                    return Err(NarrateError::Timeout(timeout));
                }
                if let Ok(meta) = stdout_read.metadata()
                    && meta.len() > max_output_bytes as u64
                {
                    terminate(&mut child);
                    return Err(NarrateError::Rejected(format!(
                        "output exceeded {max_output_bytes} byte cap"
                    )));
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                terminate(&mut child);
                return Err(NarrateError::Io(e));
            }
        }
    };

    let mut stdout = Vec::new();
    stdout_read.seek(SeekFrom::Start(0))?;
    stdout_read.read_to_end(&mut stdout)?;

    let mut stderr_bytes = Vec::new();
    stderr_read.seek(SeekFrom::Start(0))?;
    stderr_read.read_to_end(&mut stderr_bytes)?;
    let stderr = String::from_utf8_lossy(&stderr_bytes).into_owned();

    if !status.success() {
        let code = status.code().unwrap_or(-1);
        return Err(NarrateError::ProcessFailed(format!(
            "{} exited with code {code}: {}",
            program.display(),
            stderr.trim()
        )));
    }
    if stdout.len() > max_output_bytes {
        return Err(NarrateError::Rejected(format!(
            "output of {} bytes exceeds {max_output_bytes} byte cap",
            stdout.len()
        )));
    }

    debug!(
        "{} finished in {:?} ({} bytes out)",
        program.display(),
        start.elapsed(),
        stdout.len()
    );
    Ok(SubprocessOutput { stdout, stderr })
}

/// Graceful stop: SIGTERM, a short grace window, then SIGKILL.
fn terminate(child: &mut Child) {
    let pid = child.id() as i32;
    // SAFETY: pid comes from a child we spawned and still own.
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    let deadline = Instant::now() + KILL_GRACE;
    while Instant::now() < deadline {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    fn os<'a>(args: &'a [&'a str]) -> Vec<&'a OsStr> {
        args.iter().map(OsStr::new).collect()
    }

    #[test]
    fn stdin_is_fully_visible_to_the_child() {
        // cat must see the whole payload even though it reads stdin
        // immediately on startup.
        let payload = "the quick brown fox\n".repeat(500);
        let out = run_with_stdin(
            Path::new("/bin/cat"),
            &[],
            payload.as_bytes(),
            Duration::from_secs(5),
            1024 * 1024,
            &CancellationToken::new(),
        );
        let out = match out {
            Ok(o) => o,
            Err(e) => unreachable!("cat failed: {e}"),
        };
        assert_eq!(out.stdout, payload.as_bytes());
    }

    #[test]
    fn nonzero_exit_carries_stderr() {
        let binding = os(&["-c", "echo synthesis exploded >&2; exit 3"]);
        let result = run_with_stdin(
            &sh(),
            &binding,
            b"",
            Duration::from_secs(5),
            1024,
            &CancellationToken::new(),
        );
        match result {
            Err(NarrateError::ProcessFailed(msg)) => {
                assert!(msg.contains("code 3"));
                assert!(msg.contains("synthesis exploded"));
            }
            other => unreachable!("expected ProcessFailed, got {other:?}"),
        }
    }

    #[test]
    fn timeout_kills_the_child() {
        let binding = os(&["-c", "sleep 30"]);
        let start = Instant::now();
        let result = run_with_stdin(
            &sh(),
            &binding,
            b"",
            Duration::from_millis(100),
            1024,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(NarrateError::Timeout(_))));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn runaway_output_is_rejected() {
        let binding = os(&["-c", "while :; do echo xxxxxxxxxxxxxxxx; done"]);
        let result = run_with_stdin(
            &sh(),
            &binding,
            b"",
            Duration::from_secs(10),
            256,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(NarrateError::Rejected(_))));
    }

    #[test]
    fn missing_binary_is_engine_unavailable() {
        let result = run_with_stdin(
            Path::new("/nonexistent/voice-engine"),
            &[],
            b"",
            Duration::from_secs(1),
            1024,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(NarrateError::EngineUnavailable(_))));
    }

    #[test]
    fn cancellation_stops_the_wait() {
        let token = CancellationToken::new();
        token.cancel();
        let binding = os(&["-c", "sleep 30"]);
        let start = Instant::now();
        let result = run_with_stdin(
            &sh(),
            &binding,
            b"",
            Duration::from_secs(30),
            1024,
            &token,
        );
        assert!(matches!(result, Err(NarrateError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
