//! Bounded external process execution.
//!
//! Encoders and command-line matte backends run as child processes. Every
//! child gets a deadline: the runner polls for exit, and kills the child when
//! the deadline passes or the run is cancelled. Standard output and standard
//! error are drained on helper threads so a chatty child never blocks on a
//! full pipe.
//!
//! Killing the child does not close pipes inherited by its own children (a
//! shell wrapper's `sleep`, a segmentation tool's workers). Drained output is
//! therefore collected with a deadline, and readers still blocked after it
//! are detached.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::progress::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for pipe readers once a child has been killed.
const KILL_GRACE: Duration = Duration::from_millis(250);

/// Why a child process produced no exit status.
#[derive(Debug, Error)]
pub enum ProcessFailure {
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` timed out after {timeout:?}")]
    TimedOut {
        program: String,
        timeout: Duration,
        /// Whatever the child wrote to stderr before it was killed.
        stderr: String,
    },

    #[error("`{program}` was cancelled")]
    Cancelled { program: String },

    #[error("failed waiting for `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of a child that exited on its own.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }
}

/// Run `command` to completion within `timeout`.
///
/// When `stdin` is given it is written to the child on a helper thread and
/// the pipe is closed afterwards; otherwise stdin is `/dev/null`.
pub fn run_bounded(
    command: &mut Command,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
    cancellation: Option<&CancellationToken>,
) -> Result<ProcessOutput, ProcessFailure> {
    let program = command.get_program().to_string_lossy().into_owned();

    command
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| ProcessFailure::Spawn {
        program: program.clone(),
        source,
    })?;
    log::debug!("Started `{program}` (pid {})", child.id());

    // The writer is never joined: a child that exits early closes the pipe,
    // and its exit status says why.
    if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
        thread::spawn(move || {
            let _ = pipe.write_all(&bytes);
        });
    }
    let stdout_reader = drain(child.stdout.take());
    let stderr_reader = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let outcome = wait_until(&mut child, deadline, cancellation);

    let collect_until = match outcome {
        Ok(Some(_)) => deadline.max(Instant::now() + KILL_GRACE),
        _ => Instant::now() + KILL_GRACE,
    };
    let stdout = collect(stdout_reader, collect_until);
    let stderr = String::from_utf8_lossy(&collect(stderr_reader, collect_until)).into_owned();

    match outcome {
        Ok(Some(status)) => Ok(ProcessOutput {
            status,
            stdout,
            stderr,
        }),
        Ok(None) if cancellation.is_some_and(CancellationToken::is_cancelled) => {
            Err(ProcessFailure::Cancelled { program })
        }
        Ok(None) => Err(ProcessFailure::TimedOut {
            program,
            timeout,
            stderr,
        }),
        Err(source) => Err(ProcessFailure::Wait { program, source }),
    }
}

/// Poll `child` until it exits, the deadline passes, or cancellation fires.
/// Returns `Ok(None)` if the child had to be killed.
fn wait_until(
    child: &mut Child,
    deadline: Instant,
    cancellation: Option<&CancellationToken>,
) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let cancelled = cancellation.is_some_and(CancellationToken::is_cancelled);
        if cancelled || Instant::now() >= deadline {
            log::debug!("Killing pid {} (cancelled: {cancelled})", child.id());
            // The child may have exited between try_wait and kill.
            let _ = child.kill();
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<Receiver<Vec<u8>>> {
    pipe.map(|mut pipe| {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            let _ = sender.send(buffer);
        });
        receiver
    })
}

/// Wait for a reader until `until`; a reader still blocked then is detached
/// and its output dropped.
fn collect(reader: Option<Receiver<Vec<u8>>>, until: Instant) -> Vec<u8> {
    reader
        .and_then(|receiver| {
            receiver
                .recv_timeout(until.saturating_duration_since(Instant::now()))
                .ok()
        })
        .unwrap_or_default()
}

/// Keep the last `max_bytes` of `text`, trimmed, on a char boundary.
///
/// Encoders print the actual failure at the end of their stderr, so the tail
/// is the useful part.
pub fn truncate_diagnostic(text: &str, max_bytes: usize) -> String {
    let text = text.trim();
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_diagnostics_are_kept_whole() {
        assert_eq!(truncate_diagnostic("  Unknown encoder 'prores_ks'\n", 200), "Unknown encoder 'prores_ks'");
    }

    #[test]
    fn long_diagnostics_keep_the_tail() {
        let text = format!("{}final error line", "x".repeat(500));
        let truncated = truncate_diagnostic(&text, 16);
        assert_eq!(truncated, "...final error line");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "ééééé";
        let truncated = truncate_diagnostic(text, 3);
        assert!(truncated.starts_with("..."));
        assert!(truncated.ends_with('é'));
    }

    #[cfg(unix)]
    #[test]
    fn captures_exit_status_and_stderr() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo boom >&2; exit 3"]);
        let output = run_bounded(&mut command, None, Duration::from_secs(10), None).unwrap();
        assert!(!output.success());
        assert_eq!(output.status.code(), Some(3));
        assert_eq!(output.stderr.trim(), "boom");
    }

    #[cfg(unix)]
    #[test]
    fn pipes_stdin_to_stdout() {
        let mut command = Command::new("cat");
        let output =
            run_bounded(&mut command, Some(b"frame".to_vec()), Duration::from_secs(10), None).unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, b"frame");
    }

    #[cfg(unix)]
    #[test]
    fn kills_on_timeout() {
        let mut command = Command::new("sleep");
        command.arg("5");
        let started = Instant::now();
        let result = run_bounded(&mut command, None, Duration::from_millis(100), None);
        assert!(matches!(result, Err(ProcessFailure::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_is_not_held_up_by_grandchildren() {
        // `sleep` outlives the killed shell and keeps stdout and stderr open.
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 4; :"]);
        let started = Instant::now();
        let result = run_bounded(&mut command, None, Duration::from_millis(200), None);
        assert!(matches!(result, Err(ProcessFailure::TimedOut { .. })));
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[test]
    fn cancellation_is_not_held_up_by_grandchildren() {
        let token = CancellationToken::new();
        let cancel = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            cancel.cancel();
        });
        let mut command = Command::new("sh");
        command.args(["-c", "sleep 4; :"]);
        let started = Instant::now();
        let result = run_bounded(&mut command, Some(b"frame".to_vec()), Duration::from_secs(30), Some(&token));
        assert!(matches!(result, Err(ProcessFailure::Cancelled { .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn kills_on_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let mut command = Command::new("sleep");
        command.arg("5");
        let result = run_bounded(&mut command, None, Duration::from_secs(30), Some(&token));
        assert!(matches!(result, Err(ProcessFailure::Cancelled { .. })));
    }

    #[test]
    fn missing_program_is_a_spawn_failure() {
        let mut command = Command::new("alphacut-definitely-not-a-program");
        let result = run_bounded(&mut command, None, Duration::from_secs(1), None);
        assert!(matches!(result, Err(ProcessFailure::Spawn { .. })));
    }
}
