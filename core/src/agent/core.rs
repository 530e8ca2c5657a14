//! The agent execution loop
//!
//! `Agent::chat` drives cycles of: stream a completion for the current
//! history, parse task tags out of the reply, gate each task through the
//! approval policy, execute approved tasks against the engines, and feed
//! the combined observations back as one user message. The loop ends when
//! a reply proposes no tasks, the user cancels, the cycle cap is reached,
//! or the transport fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info};

use super::prompt::{self, SystemPrompt};
use crate::approval::ApprovalPrompt;
use crate::config::Config;
use crate::context::EnvironmentContext;
use crate::error::{CoreError, CoreResult};
use crate::files::FileStore;
use crate::llm::{ChatMessage, CompletionStream, MessageRole, StreamEvent};
use crate::metrics::{CacheStats, UsageRecord};
use crate::protocol::{contains_tag_fragment, parse_tasks, Task};
use crate::search;
use crate::terminal::{safety, CommandOutcome, TerminalManager};

/// Crude character-based token budget for one request.
const TOKEN_BUDGET: u64 = 115_000;
/// Working-history length below which no windowing happens.
const WINDOW_WORKING_MAX: usize = 60;
/// Messages kept from the start of an over-budget history.
const WINDOW_HEAD: usize = 6;
/// Messages kept from the end of an over-budget history.
const WINDOW_TAIL: usize = 54;

const CORRECTION_MESSAGE: &str =
    "ERROR: Invalid Format! Use one or more closed tags. No tag if no task.";
const CANCELLED_MESSAGE: &str = "User cancelled execution";

/// Display events pushed to the binary while a `chat` call runs.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    CycleStart { current: usize, max: usize },
    TokenEstimate(u64),
    /// Reasoning-trace delta, shown but never entering history.
    Reasoning(String),
    /// Answer content delta.
    Content(String),
    ReplyComplete,
    /// One `SUCCESS:`/`FAILURE:` observation from an executed task.
    Observation(String),
    Usage {
        record: UsageRecord,
        session_hit_rate: Option<f64>,
    },
    Notice(String),
}

/// How one `chat` call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatOutcome {
    /// A reply proposed no tasks, or stop-after-first-execution kicked in.
    Completed,
    /// The user rejected a task; history keeps the cancellation note.
    Cancelled,
    MaxCyclesReached,
    /// The completion endpoint failed; no assistant message was appended.
    TransportFailed(String),
    /// An unexpected cycle failure; history keeps the crash note.
    Crashed(String),
}

/// One successful file mutation, in session order.
#[derive(Debug, Clone)]
pub struct Modification {
    pub path: PathBuf,
    pub added: usize,
    pub deleted: usize,
}

enum CycleControl {
    Continue,
    Finished,
    Cancelled,
}

/// The loop plus everything it owns: history, engines, metrics.
pub struct Agent {
    config: Config,
    env: EnvironmentContext,
    completions: Arc<dyn CompletionStream>,
    approval: Arc<dyn ApprovalPrompt>,
    events: UnboundedSender<AgentEvent>,
    history: Vec<ChatMessage>,
    files: FileStore,
    terminals: TerminalManager,
    stats: CacheStats,
    system_prompt: SystemPrompt,
    modifications: Vec<Modification>,
}

impl Agent {
    pub fn new(
        config: Config,
        env: EnvironmentContext,
        completions: Arc<dyn CompletionStream>,
        approval: Arc<dyn ApprovalPrompt>,
        events: UnboundedSender<AgentEvent>,
    ) -> Self {
        let terminals =
            TerminalManager::new().with_timeout(Duration::from_secs(config.command_timeout_secs));
        Self {
            config,
            env,
            completions,
            approval,
            events,
            history: Vec::new(),
            files: FileStore::new(),
            terminals,
            stats: CacheStats::new(),
            system_prompt: SystemPrompt::new(),
            modifications: Vec::new(),
        }
    }

    /// Run the cycle loop for one user turn. An empty `input` with existing
    /// history re-enters the loop on that history alone.
    pub async fn chat(&mut self, input: &str) -> ChatOutcome {
        if input.trim().is_empty() && self.history.is_empty() {
            self.emit(AgentEvent::Notice(
                "empty input and no history, waiting for a command".to_string(),
            ));
            return ChatOutcome::Completed;
        }

        let system = ChatMessage::system(self.system_prompt.render(&self.env));
        let mut working = self.history.clone();
        if !input.trim().is_empty() {
            working.push(ChatMessage::user(prompt::wrap_user_input(&self.env, input)));
        }

        let max_cycles = self.config.approval.max_cycles;
        let mut cycle = 0;
        let mut outcome = None;

        while cycle < max_cycles {
            cycle += 1;
            self.emit(AgentEvent::CycleStart {
                current: cycle,
                max: max_cycles,
            });

            match self.run_cycle(&system, &mut working).await {
                Ok(CycleControl::Continue) => {}
                Ok(CycleControl::Finished) => {
                    outcome = Some(ChatOutcome::Completed);
                    break;
                }
                Ok(CycleControl::Cancelled) => {
                    outcome = Some(ChatOutcome::Cancelled);
                    break;
                }
                Err(err @ (CoreError::Provider { .. } | CoreError::Transport(_))) => {
                    let message = err.to_string();
                    error!(%message, "completion request failed");
                    self.emit(AgentEvent::Notice(format!("request failed: {}", message)));
                    outcome = Some(ChatOutcome::TransportFailed(message));
                    break;
                }
                Err(err) => {
                    let message = err.to_string();
                    error!(%message, "cycle crashed");
                    working.push(ChatMessage::user(format!(
                        "ERROR: Agent crashed with error: {}",
                        message
                    )));
                    outcome = Some(ChatOutcome::Crashed(message));
                    break;
                }
            }
        }

        let outcome = outcome.unwrap_or(ChatOutcome::MaxCyclesReached);
        if outcome == ChatOutcome::MaxCyclesReached {
            self.emit(AgentEvent::Notice("max cycles reached".to_string()));
        }
        self.history = working;
        outcome
    }

    async fn run_cycle(
        &mut self,
        system: &ChatMessage,
        working: &mut Vec<ChatMessage>,
    ) -> CoreResult<CycleControl> {
        let mut messages: Vec<ChatMessage> = Vec::with_capacity(working.len() + 1);
        messages.push(system.clone());
        messages.extend_from_slice(working);

        let mut estimate = estimate_tokens(&messages);
        if estimate > TOKEN_BUDGET && working.len() > WINDOW_WORKING_MAX {
            messages = window_messages(system, working);
            estimate = estimate_tokens(&messages);
            debug!(kept = messages.len(), "windowed over-budget history");
        }
        self.emit(AgentEvent::TokenEstimate(estimate));

        let mut reply = String::new();
        let mut usage: Option<UsageRecord> = None;
        {
            let completions = self.completions.clone();
            let mut stream = completions.chat_stream(&messages);
            while let Some(event) = stream.next().await {
                match event? {
                    StreamEvent::Reasoning(chunk) => self.emit(AgentEvent::Reasoning(chunk)),
                    StreamEvent::Content(chunk) => {
                        reply.push_str(&chunk);
                        self.emit(AgentEvent::Content(chunk));
                    }
                    StreamEvent::Usage(record) => usage = Some(record),
                    StreamEvent::Done => break,
                }
            }
        }
        self.emit(AgentEvent::ReplyComplete);

        if let Some(record) = usage {
            self.stats.record(&record);
            self.emit(AgentEvent::Usage {
                session_hit_rate: self.stats.session_hit_rate(),
                record,
            });
        }

        working.push(ChatMessage::assistant(reply.clone()));

        let tasks = parse_tasks(&reply);
        if tasks.is_empty() {
            if contains_tag_fragment(&reply) {
                info!("tag fragment without a parsed task, sending correction");
                working.push(ChatMessage::user(CORRECTION_MESSAGE.to_string()));
                return Ok(CycleControl::Continue);
            }
            return Ok(CycleControl::Finished);
        }

        let mut observations = Vec::new();
        let mut cancelled = false;
        let mut executed_any = false;
        for task in &tasks {
            let approved = self.config.approval.is_auto_approved(task)
                || self.approval.confirm(task).await;
            if !approved {
                working.push(ChatMessage::user(CANCELLED_MESSAGE.to_string()));
                cancelled = true;
                break;
            }
            executed_any = true;
            for observation in self.execute(task).await {
                self.emit(AgentEvent::Observation(observation.clone()));
                observations.push(observation);
            }
        }

        if !observations.is_empty() {
            working.push(ChatMessage::user(observations.join("\n")));
        }
        if cancelled {
            return Ok(CycleControl::Cancelled);
        }
        if executed_any && self.config.stop_after_first_execution {
            return Ok(CycleControl::Finished);
        }
        Ok(CycleControl::Continue)
    }

    /// Execute one approved task. Failures become `FAILURE:` observations;
    /// only transport-level problems escape as errors.
    async fn execute(&mut self, task: &Task) -> Vec<String> {
        match task {
            Task::SearchFiles { pattern } => {
                match search::search_files(pattern, &self.env.cwd, search::FILE_SEARCH_LIMIT) {
                    Ok(results) if results.is_empty() => {
                        vec![format!("SUCCESS: No files found matching {}", pattern)]
                    }
                    Ok(results) => vec![format!(
                        "SUCCESS: Found {} files:\n{}",
                        results.len(),
                        search::render_tree(&results, &self.env.cwd)
                    )],
                    Err(err) => vec![format!("FAILURE: {}", err)],
                }
            }
            Task::SearchInFiles {
                regex,
                glob,
                root,
                max_matches,
            } => {
                let root_path = self.env.absolutize(root);
                match search::search_in_files(regex, &root_path, glob, *max_matches) {
                    Ok(matches) if matches.is_empty() => vec![format!(
                        "SUCCESS: No regex matches found\nRegex: {}\nGlob: {}\nRoot: {}",
                        regex,
                        glob,
                        root_path.display()
                    )],
                    Ok(matches) => {
                        let total: usize = matches.values().map(Vec::len).sum();
                        vec![format!(
                            "SUCCESS: Regex matches found\nRegex: {}\nGlob: {}\nMatches: {} (files: {})\n{}",
                            regex,
                            glob,
                            total,
                            matches.len(),
                            search::render_match_tree(&matches, &root_path)
                        )]
                    }
                    Err(err) => vec![format!("FAILURE: {}", err)],
                }
            }
            Task::WriteFile { path, content } => {
                let abs = self.env.absolutize(path);
                match self.files.write(&abs, content) {
                    Ok((added, deleted)) => {
                        self.record_modification(&abs, added, deleted);
                        vec![format!(
                            "SUCCESS: Saved to {} | +{} | -{}",
                            abs.display(),
                            added,
                            deleted
                        )]
                    }
                    Err(err) => vec![format!("FAILURE: {}", err)],
                }
            }
            Task::EditLines {
                path,
                delete_start,
                delete_end,
                insert_at,
                content,
            } => {
                let abs = self.env.absolutize(path);
                match self
                    .files
                    .edit_lines(&abs, *delete_start, *delete_end, *insert_at, content)
                {
                    Ok((added, deleted)) => {
                        self.record_modification(&abs, added, deleted);
                        vec![format!(
                            "SUCCESS: Edited {} | +{} | -{}",
                            abs.display(),
                            added,
                            deleted
                        )]
                    }
                    Err(err) => vec![format!("FAILURE: {}", err)],
                }
            }
            Task::ReadFile {
                path,
                start_line,
                end_line,
            } => {
                let abs = self.env.absolutize(path);
                match FileStore::read_range_numbered(&abs, *start_line, *end_line) {
                    Ok(slice) => vec![format!(
                        "SUCCESS: Read {}\nLines: {} | Range: {}-{}\nContent:\n{}",
                        abs.display(),
                        slice.total_lines,
                        slice.start_line,
                        slice.end_line,
                        slice.content
                    )],
                    Err(err) => vec![format!("FAILURE: {}", err)],
                }
            }
            Task::RunCommand {
                command,
                is_long_running,
            } => self.run_command_lines(command, *is_long_running).await,
        }
    }

    /// A single payload may carry several commands, one per line; each line
    /// is denylist-checked and executed on its own.
    async fn run_command_lines(&mut self, command: &str, is_long_running: bool) -> Vec<String> {
        let lines: Vec<&str> = command
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        if lines.is_empty() {
            return vec!["FAILURE: Empty command".to_string()];
        }

        let mut observations = Vec::new();
        for line in lines {
            if safety::assess(line).is_dangerous() {
                observations.push(format!("FAILURE: Dangerous command blocked: {}", line));
                continue;
            }
            match self.terminals.run(line, is_long_running, &self.env.cwd).await {
                Ok(CommandOutcome::Started { id }) => observations.push(format!(
                    "SUCCESS: Long-running command started. Terminal ID: {}\nCommand: {}",
                    id, line
                )),
                Ok(CommandOutcome::Completed {
                    success: true,
                    output,
                    ..
                }) => observations.push(format!("SUCCESS: Command executed: {}\n{}", line, output)),
                Ok(CommandOutcome::Completed {
                    success: false,
                    output,
                    error,
                    ..
                }) => observations.push(format!(
                    "FAILURE: {}\n{}",
                    error.unwrap_or_else(|| "command failed".to_string()),
                    output
                )),
                Err(CoreError::CommandForbidden { command }) => {
                    observations.push(format!("FAILURE: Dangerous command blocked: {}", command))
                }
                Err(err) => observations.push(format!("FAILURE: {}", err)),
            }
        }
        observations
    }

    fn record_modification(&mut self, path: &std::path::Path, added: usize, deleted: usize) {
        self.modifications.push(Modification {
            path: path.to_path_buf(),
            added,
            deleted,
        });
        self.system_prompt.invalidate_if_rules_file(path);
    }

    /// Undo the most recent file mutation, dropping its log entry.
    pub fn rollback_last(&mut self) -> CoreResult<PathBuf> {
        let path = self.files.rollback()?;
        self.modifications.pop();
        self.system_prompt.invalidate_if_rules_file(&path);
        Ok(path)
    }

    /// Ordered `(path, +added, -deleted)` log of this session's mutations.
    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    pub fn terminals(&self) -> &TerminalManager {
        &self.terminals
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Best-effort kill of tracked terminals, for process exit.
    pub fn shutdown(&self) {
        self.terminals.shutdown();
    }

    fn emit(&self, event: AgentEvent) {
        // A dropped receiver only silences display, never stops the loop.
        let _ = self.events.send(event);
    }
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

/// Crude request-size estimate: characters of role + content + a small
/// per-message overhead, divided by three.
fn estimate_tokens(messages: &[ChatMessage]) -> u64 {
    let chars: usize = messages
        .iter()
        .map(|m| role_str(m.role).len() + m.content.len() + 8)
        .sum();
    (chars / 3) as u64
}

/// Head-and-tail window applied when the estimate exceeds the budget.
fn window_messages(system: &ChatMessage, working: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(1 + WINDOW_HEAD + WINDOW_TAIL);
    out.push(system.clone());
    out.extend_from_slice(&working[..WINDOW_HEAD]);
    out.extend_from_slice(&working[working.len() - WINDOW_TAIL..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens_arithmetic() {
        // (4 + 5 + 8) + (9 + 2 + 8) = 36 chars, / 3 = 12.
        let messages = vec![ChatMessage::user("hello"), ChatMessage::assistant("ok")];
        assert_eq!(estimate_tokens(&messages), 12);
    }

    #[test]
    fn test_window_keeps_head_and_tail() {
        let system = ChatMessage::system("sys");
        let working: Vec<ChatMessage> = (0..80)
            .map(|i| ChatMessage::user(format!("msg {}", i)))
            .collect();
        let windowed = window_messages(&system, &working);
        assert_eq!(windowed.len(), 1 + WINDOW_HEAD + WINDOW_TAIL);
        assert_eq!(windowed[1].content, "msg 0");
        assert_eq!(windowed[WINDOW_HEAD].content, "msg 5");
        assert_eq!(windowed[WINDOW_HEAD + 1].content, "msg 26");
        assert_eq!(windowed.last().unwrap().content, "msg 79");
    }
}
