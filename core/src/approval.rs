//! Approval policy and the external confirmation seam
//!
//! A task executes without confirmation when its kind is whitelisted, or,
//! for `run_command`, when the first whitespace token of the command's
//! first line matches a whitelisted prefix. Everything else is deferred to
//! an [`ApprovalPrompt`], which may be a human or an automated policy.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::protocol::{Task, TaskKind};

/// Immutable per-session approval configuration.
#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    /// Task kinds that never require confirmation.
    pub whitelisted_tasks: HashSet<TaskKind>,
    /// Command prefixes (first token) that never require confirmation.
    pub whitelisted_commands: HashSet<String>,
    /// Upper bound on agent cycles per `chat()` call.
    pub max_cycles: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            whitelisted_tasks: HashSet::from([
                TaskKind::SearchFiles,
                TaskKind::SearchInFiles,
                TaskKind::ReadFile,
            ]),
            whitelisted_commands: ["ls", "dir", "pwd", "whoami", "echo", "cat", "type"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_cycles: 30,
        }
    }
}

impl ApprovalConfig {
    /// Decide whether `task` may execute without external confirmation.
    pub fn is_auto_approved(&self, task: &Task) -> bool {
        if self.whitelisted_tasks.contains(&task.kind()) {
            return true;
        }
        if let Task::RunCommand { command, .. } = task {
            let first_token = command
                .lines()
                .next()
                .and_then(|line| line.split_whitespace().next())
                .unwrap_or("");
            return !first_token.is_empty() && self.whitelisted_commands.contains(first_token);
        }
        false
    }
}

/// External confirmation collaborator.
#[async_trait]
pub trait ApprovalPrompt: Send + Sync {
    /// Return `true` to approve the task; `false` (or an unavailable
    /// prompt) cancels the remainder of the batch.
    async fn confirm(&self, task: &Task) -> bool;
}

/// Prompt that approves everything; used by tests and `--auto-approve`.
pub struct AutoApprove;

#[async_trait]
impl ApprovalPrompt for AutoApprove {
    async fn confirm(&self, _task: &Task) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_command(cmd: &str) -> Task {
        Task::RunCommand {
            command: cmd.to_string(),
            is_long_running: false,
        }
    }

    #[test]
    fn test_whitelisted_kind_is_auto_approved() {
        let config = ApprovalConfig::default();
        let task = Task::ReadFile {
            path: "a.txt".to_string(),
            start_line: 1,
            end_line: None,
        };
        assert!(config.is_auto_approved(&task));
    }

    #[test]
    fn test_mutating_kind_requires_confirmation() {
        let config = ApprovalConfig::default();
        let task = Task::WriteFile {
            path: "a.txt".to_string(),
            content: "x".to_string(),
        };
        assert!(!config.is_auto_approved(&task));
    }

    #[test]
    fn test_command_prefix_matches_first_token_of_first_line() {
        let config = ApprovalConfig::default();
        assert!(config.is_auto_approved(&run_command("ls -la /tmp")));
        assert!(config.is_auto_approved(&run_command("echo hi\nrm -rf /")));
        assert!(!config.is_auto_approved(&run_command("rm -rf /\necho hi")));
        assert!(!config.is_auto_approved(&run_command("git status")));
    }
}
