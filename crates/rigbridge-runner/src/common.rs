//! Common subprocess plumbing shared by the resolver and the stage runner:
//! cancellation, bounded waiting, output capture and process-group teardown.

use std::io::Read;
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// ============================================================
// Time Budgets (Single Source of Truth)
// ============================================================

/// Default timeout for one pipeline stage in seconds
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 1800;

/// Default timeout for the startup import smoke test in seconds
pub const DEFAULT_SMOKE_TIMEOUT_SECS: u64 = 30;

/// Default timeout for the one-time host setup script in seconds
pub const DEFAULT_SETUP_TIMEOUT_SECS: u64 = 1800;

/// Child status poll interval in milliseconds
pub const POLL_INTERVAL_MS: u64 = 100;

/// Cooperative cancellation flag threaded through every blocking wait.
///
/// Clones share the same flag. Cancelling kills whatever child is currently
/// being waited on (and its process group).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// How a waited-on child came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The child exited on its own (any exit code)
    Exited,
    /// The time budget elapsed and the child was killed
    TimedOut,
    /// The cancel token fired and the child was killed
    Cancelled,
}

/// Outcome of one subprocess invocation.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, or -1 when killed by a signal / by us
    pub exit_code: i32,
    pub termination: Termination,
    pub elapsed: Duration,
}

impl StageResult {
    /// Exit code is authoritative: success means the child exited with 0.
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == 0
    }
}

/// Start the child in its own process group so teardown reaches grandchildren.
pub fn isolate_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(not(unix))]
    let _ = cmd;
}

/// SIGKILL every process left in the group led by `pgid`.
///
/// Returns false when the group no longer exists (or on non-unix targets).
fn kill_group(pgid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(pgid, error = %e, "killpg failed");
                false
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        false
    }
}

/// Kill the child's process group (unix) and the child itself, then reap it.
pub fn kill_process_group(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

/// Wait for a child with a time budget and a cancel token.
///
/// Reads stdout/stderr in background threads while the process runs. Without
/// this, a child writing more than the pipe buffer (~64KB) would block on
/// write and we'd deadlock waiting for it to exit.
///
/// On timeout or cancellation the process group is killed and whatever output
/// was captured so far is returned with `exit_code == -1`. When the child
/// exits on its own, processes it left behind in its group are killed too, so
/// a background worker holding the pipes open can't hold up the return.
///
/// * `stream_stderr` - If true, forward child stderr to our stderr in real time
pub fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
    cancel: &CancelToken,
    stream_stderr: bool,
) -> std::io::Result<StageResult> {
    let start = Instant::now();
    let check_interval = Duration::from_millis(POLL_INTERVAL_MS);

    let stdout_handle = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    });
    let stderr_handle = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            use std::io::Write;
            let mut collected = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                match err.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        collected.extend_from_slice(&buf[..n]);
                        if stream_stderr {
                            let _ = std::io::stderr().write_all(&buf[..n]);
                            let _ = std::io::stderr().flush();
                        }
                    }
                    Err(_) => break,
                }
            }
            String::from_utf8_lossy(&collected).into_owned()
        })
    });

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if kill_group(child.id()) {
                    tracing::debug!(pid = child.id(), "Killed processes left behind in child's group");
                }
                let stdout = stdout_handle
                    .map(|h| h.join().unwrap_or_default())
                    .unwrap_or_default();
                let stderr = stderr_handle
                    .map(|h| h.join().unwrap_or_default())
                    .unwrap_or_default();
                return Ok(StageResult {
                    stdout,
                    stderr,
                    exit_code: status.code().unwrap_or(-1),
                    termination: Termination::Exited,
                    elapsed: start.elapsed(),
                });
            }
            Ok(None) => {}
            Err(e) => {
                kill_process_group(child);
                let _ = stdout_handle.map(|h| h.join());
                let _ = stderr_handle.map(|h| h.join());
                return Err(e);
            }
        }

        let termination = if cancel.is_cancelled() {
            Some(Termination::Cancelled)
        } else if start.elapsed() >= timeout {
            Some(Termination::TimedOut)
        } else {
            None
        };

        if let Some(termination) = termination {
            kill_process_group(child);
            let stdout = stdout_handle
                .map(|h| h.join().unwrap_or_default())
                .unwrap_or_default();
            let stderr = stderr_handle
                .map(|h| h.join().unwrap_or_default())
                .unwrap_or_default();
            return Ok(StageResult {
                stdout,
                stderr,
                exit_code: -1,
                termination,
                elapsed: start.elapsed(),
            });
        }

        thread::sleep(check_interval);
    }
}

/// Last `max_chars` characters of `s` (char-boundary safe).
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// First `max_chars` characters of `s`, with an ellipsis marker when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;

    #[test]
    fn test_poll_interval() {
        assert_eq!(POLL_INTERVAL_MS, 100);
    }

    #[test]
    fn test_tail_chars_multibyte() {
        assert_eq!(tail_chars("héllo wörld", 5), "wörld");
        assert_eq!(tail_chars("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
        assert_eq!(truncate_chars("abc", 3), "abc");
    }

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_captures_output_and_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let result =
            wait_with_timeout(&mut child, Duration::from_secs(10), &CancelToken::new(), false)
                .unwrap();
        assert_eq!(result.termination, Termination::Exited);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout.trim(), "out");
        assert_eq!(result.stderr.trim(), "err");
        assert!(!result.success());
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_times_out_and_kills_child() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let result = wait_with_timeout(
            &mut child,
            Duration::from_millis(300),
            &CancelToken::new(),
            false,
        )
        .unwrap();
        assert_eq!(result.termination, Termination::TimedOut);
        assert_eq!(result.exit_code, -1);
        assert!(result.elapsed < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_returns_when_background_worker_holds_pipes() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & echo started; exit 0"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let result =
            wait_with_timeout(&mut child, Duration::from_secs(2), &CancelToken::new(), false)
                .unwrap();
        assert_eq!(result.termination, Termination::Exited);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout.trim(), "started");
        assert!(result.elapsed < Duration::from_secs(5), "{:?}", result.elapsed);
    }

    #[cfg(unix)]
    #[test]
    fn test_wait_honours_cancel_token() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        isolate_process_group(&mut cmd);
        let mut child = cmd.spawn().unwrap();
        let token = CancelToken::new();
        let trigger = token.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(200));
            trigger.cancel();
        });
        let result =
            wait_with_timeout(&mut child, Duration::from_secs(60), &token, false).unwrap();
        t.join().unwrap();
        assert_eq!(result.termination, Termination::Cancelled);
        assert!(result.elapsed < Duration::from_secs(10));
    }
}
