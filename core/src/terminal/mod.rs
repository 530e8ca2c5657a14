//! Terminal process manager
//!
//! Supervises shell subprocesses in two modes. Short-running commands block
//! the caller until completion or timeout and are never tracked. Long-running
//! commands are registered under a fresh id with reader tasks that drain
//! stdout and stderr into a shared bounded ring buffer; they stay tracked
//! until explicitly stopped.

pub mod safety;

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

/// Lines retained per long-running process before eviction.
const OUTPUT_RING_CAP: usize = 1000;
/// Lines served by `status`.
const STATUS_TAIL_LINES: usize = 50;
/// Default blocking timeout for short-running commands.
const SHORT_RUN_TIMEOUT: Duration = Duration::from_secs(120);

/// Result of `run`.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// Short-running command finished (or timed out / failed).
    Completed {
        success: bool,
        output: String,
        exit_code: Option<i32>,
        error: Option<String>,
    },
    /// Long-running command registered; the caller was not blocked.
    Started { id: String },
}

/// Snapshot of one tracked terminal.
#[derive(Debug, Clone)]
pub struct TerminalStatus {
    pub id: String,
    pub command: String,
    pub is_running: bool,
    pub exit_code: Option<i32>,
    /// Last `STATUS_TAIL_LINES` buffered lines.
    pub output: String,
}

/// Listing entry for a tracked long-running terminal.
#[derive(Debug, Clone)]
pub struct TerminalSummary {
    pub id: String,
    pub command: String,
    pub uptime: Duration,
    pub is_running: bool,
}

#[derive(Debug)]
struct ProcState {
    running: bool,
    exit_code: Option<i32>,
    ring: VecDeque<String>,
}

#[derive(Debug)]
struct TerminalEntry {
    id: String,
    command: String,
    pid: Option<u32>,
    started: Instant,
    state: Mutex<ProcState>,
}

impl TerminalEntry {
    fn new(id: String, command: String, pid: Option<u32>) -> Self {
        Self {
            id,
            command,
            pid,
            started: Instant::now(),
            state: Mutex::new(ProcState {
                running: true,
                exit_code: None,
                ring: VecDeque::new(),
            }),
        }
    }

    fn push_line(&self, line: String) {
        let mut state = self.state.lock();
        state.ring.push_back(line);
        if state.ring.len() > OUTPUT_RING_CAP {
            state.ring.pop_front();
        }
    }

    fn mark_exited(&self, exit_code: Option<i32>) {
        let mut state = self.state.lock();
        state.running = false;
        state.exit_code = exit_code;
    }

    fn snapshot(&self) -> TerminalStatus {
        let state = self.state.lock();
        let tail_start = state.ring.len().saturating_sub(STATUS_TAIL_LINES);
        let output = state
            .ring
            .iter()
            .skip(tail_start)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        TerminalStatus {
            id: self.id.clone(),
            command: self.command.clone(),
            is_running: state.running,
            exit_code: state.exit_code,
            output,
        }
    }
}

/// The live registry of tracked long-running processes.
///
/// Shared between the agent loop and per-process reader tasks; the map and
/// each ring buffer sit behind `parking_lot` mutexes and are read via
/// snapshot copies.
#[derive(Clone)]
pub struct TerminalManager {
    entries: Arc<Mutex<HashMap<String, Arc<TerminalEntry>>>>,
    short_run_timeout: Duration,
}

impl Default for TerminalManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalManager {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            short_run_timeout: SHORT_RUN_TIMEOUT,
        }
    }

    /// Override the short-running timeout (tests, configuration).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.short_run_timeout = timeout;
        self
    }

    /// Execute `command` under the platform shell in `cwd`.
    ///
    /// Denylisted commands are rejected before any process is spawned,
    /// regardless of run mode.
    pub async fn run(
        &self,
        command: &str,
        is_long_running: bool,
        cwd: &Path,
    ) -> CoreResult<CommandOutcome> {
        let command = command.trim();
        if command.is_empty() {
            return Err(CoreError::EmptyCommand);
        }
        if safety::assess(command).is_dangerous() {
            return Err(CoreError::CommandForbidden {
                command: command.to_string(),
            });
        }

        if is_long_running {
            self.spawn_tracked(command, cwd)
        } else {
            self.run_blocking(command, cwd).await
        }
    }

    /// Current state and buffered tail of one tracked terminal.
    pub fn status(&self, id: &str) -> Option<TerminalStatus> {
        self.entries.lock().get(id).map(|entry| entry.snapshot())
    }

    /// Terminate a tracked terminal (including its children where the
    /// platform supports it) and drop it from the live set.
    pub fn stop(&self, id: &str) -> bool {
        let Some(entry) = self.entries.lock().remove(id) else {
            return false;
        };
        if let Some(pid) = entry.pid {
            kill_tree(pid);
        }
        debug!(id = %entry.id, command = %entry.command, "stopped terminal");
        true
    }

    /// Enumerate tracked long-running terminals.
    pub fn list(&self) -> Vec<TerminalSummary> {
        self.entries
            .lock()
            .values()
            .map(|entry| {
                let state = entry.state.lock();
                TerminalSummary {
                    id: entry.id.clone(),
                    command: entry.command.clone(),
                    uptime: entry.started.elapsed(),
                    is_running: state.running,
                }
            })
            .collect()
    }

    /// Best-effort kill of everything still tracked.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<TerminalEntry>> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in drained {
            if let Some(pid) = entry.pid {
                kill_tree(pid);
            }
        }
    }

    async fn run_blocking(&self, command: &str, cwd: &Path) -> CoreResult<CommandOutcome> {
        let mut child = shell_command(command, cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Both pipes are drained concurrently so a full stderr buffer can
        // never stall the process while we read stdout.
        let collect = async {
            let read_out = drain_lines(stdout, &mut stdout_buf);
            let read_err = drain_lines(stderr, &mut stderr_buf);
            let (_, _, status) = tokio::join!(read_out, read_err, child.wait());
            status
        };

        match tokio::time::timeout(self.short_run_timeout, collect).await {
            Ok(status) => {
                let status = status?;
                let exit_code = status.code();
                let output = format!("Stdout:\n{}\nStderr:\n{}", stdout_buf, stderr_buf);
                if status.success() {
                    Ok(CommandOutcome::Completed {
                        success: true,
                        output,
                        exit_code,
                        error: None,
                    })
                } else {
                    Ok(CommandOutcome::Completed {
                        success: false,
                        output,
                        exit_code,
                        error: Some(format!("Exit Code: {}", exit_code.unwrap_or(-1))),
                    })
                }
            }
            Err(_) => {
                warn!(command, timeout = ?self.short_run_timeout, "short-running command timed out");
                let _ = child.start_kill();
                let output = format!("Stdout:\n{}\nStderr:\n{}", stdout_buf, stderr_buf);
                Ok(CommandOutcome::Completed {
                    success: false,
                    output,
                    exit_code: None,
                    error: Some(format!(
                        "timed out after {}s",
                        self.short_run_timeout.as_secs()
                    )),
                })
            }
        }
    }

    fn spawn_tracked(&self, command: &str, cwd: &Path) -> CoreResult<CommandOutcome> {
        let mut child = shell_command(command, cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let id = short_id();
        let entry = Arc::new(TerminalEntry::new(id.clone(), command.to_string(), child.id()));
        self.entries.lock().insert(id.clone(), entry.clone());
        debug!(id = %id, command, "started long-running terminal");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let out_task = stdout.map(|pipe| tokio::spawn(pump_lines(pipe, entry.clone())));
        let err_task = stderr.map(|pipe| tokio::spawn(pump_lines(pipe, entry.clone())));

        // Supervisor: waits for both pumps to finish, then records the exit
        // code. The entry outlives registry removal, so a late status write
        // never races with `stop`.
        tokio::spawn(async move {
            if let Some(task) = out_task {
                let _ = task.await;
            }
            if let Some(task) = err_task {
                let _ = task.await;
            }
            let exit_code = child.wait().await.ok().and_then(|s| s.code());
            entry.mark_exited(exit_code);
        });

        Ok(CommandOutcome::Started { id })
    }
}

/// Read a pipe line by line into the entry's ring until EOF.
async fn pump_lines(pipe: impl tokio::io::AsyncRead + Unpin, entry: Arc<TerminalEntry>) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        entry.push_line(line);
    }
}

/// Collect lines from an optional pipe into `buf`, newline-terminated.
async fn drain_lines(pipe: Option<impl tokio::io::AsyncRead + Unpin>, buf: &mut String) {
    if let Some(pipe) = pipe {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            buf.push_str(&line);
            buf.push('\n');
        }
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

#[cfg(unix)]
fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).current_dir(cwd).process_group(0);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str, cwd: &Path) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command).current_dir(cwd);
    cmd
}

/// Platform-appropriate kill covering child processes.
#[cfg(unix)]
fn kill_tree(pid: u32) {
    // Long-running processes are spawned in their own group; signal it.
    let _ = std::process::Command::new("kill")
        .args(["-9", "--", &format!("-{}", pid)])
        .status();
}

#[cfg(windows)]
fn kill_tree(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .status();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    fn cwd() -> PathBuf {
        std::env::temp_dir()
    }

    #[tokio::test]
    async fn test_short_command_success() {
        let manager = TerminalManager::new();
        let outcome = manager.run("echo hi", false, &cwd()).await.unwrap();
        match outcome {
            CommandOutcome::Completed {
                success,
                output,
                exit_code,
                error,
            } => {
                assert!(success);
                assert_eq!(exit_code, Some(0));
                assert!(output.contains("hi"));
                assert!(error.is_none());
            }
            other => panic!("expected Completed, got {:?}", other),
        }
        // Short-running commands never enter the live set.
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_short_command_failure() {
        let manager = TerminalManager::new();
        let outcome = manager
            .run("definitely_not_a_command_xyz", false, &cwd())
            .await
            .unwrap();
        match outcome {
            CommandOutcome::Completed {
                success, exit_code, ..
            } => {
                assert!(!success);
                assert_ne!(exit_code, Some(0));
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_short_command_timeout_returns_partial_output() {
        let manager = TerminalManager::new().with_timeout(Duration::from_millis(300));
        let outcome = manager
            .run("echo early; sleep 5; echo late", false, &cwd())
            .await
            .unwrap();
        match outcome {
            CommandOutcome::Completed {
                success,
                output,
                error,
                ..
            } => {
                assert!(!success);
                assert!(output.contains("early"));
                assert!(!output.contains("late"));
                assert!(error.unwrap().contains("timed out"));
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_long_running_lifecycle() {
        let manager = TerminalManager::new();
        let outcome = manager.run("sleep 30", true, &cwd()).await.unwrap();
        let id = match outcome {
            CommandOutcome::Started { id } => id,
            other => panic!("expected Started, got {:?}", other),
        };

        let status = manager.status(&id).expect("tracked");
        assert!(status.is_running);
        assert_eq!(status.exit_code, None);
        assert_eq!(manager.list().len(), 1);

        assert!(manager.stop(&id));
        assert!(manager.status(&id).is_none());
        assert!(manager.list().is_empty());
        assert!(!manager.stop(&id));
    }

    #[tokio::test]
    async fn test_long_running_records_exit() {
        let manager = TerminalManager::new();
        let outcome = manager.run("echo done", true, &cwd()).await.unwrap();
        let CommandOutcome::Started { id } = outcome else {
            panic!("expected Started");
        };

        // The reader task records the exit asynchronously.
        let mut status = manager.status(&id).expect("tracked");
        for _ in 0..100 {
            if !status.is_running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = manager.status(&id).expect("tracked");
        }
        assert!(!status.is_running);
        assert_eq!(status.exit_code, Some(0));
        assert!(status.output.contains("done"));

        // Exited but not reaped until stopped.
        assert_eq!(manager.list().len(), 1);
        assert!(manager.stop(&id));
    }

    #[tokio::test]
    async fn test_dangerous_command_rejected_in_both_modes() {
        let manager = TerminalManager::new();
        for long in [false, true] {
            let err = manager.run("rm -rf /", long, &cwd()).await.unwrap_err();
            assert!(matches!(err, CoreError::CommandForbidden { .. }));
        }
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let manager = TerminalManager::new();
        let err = manager.run("   ", false, &cwd()).await.unwrap_err();
        assert!(matches!(err, CoreError::EmptyCommand));
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let entry = TerminalEntry::new("t1".into(), "yes".into(), None);
        for i in 0..(OUTPUT_RING_CAP + 10) {
            entry.push_line(format!("line {}", i));
        }
        let state = entry.state.lock();
        assert_eq!(state.ring.len(), OUTPUT_RING_CAP);
        assert_eq!(state.ring.front().unwrap(), "line 10");
    }
}
