//! Interactive REPL, console rendering and the confirmation prompt
//!
//! Besides chatting, the REPL exposes session commands: `rollback`,
//! `terminals`, `status <id>`, `stop <id>`, `stats`, `exit`.

use std::io::Write;

use anyhow::Result;
use async_trait::async_trait;
use console::Style;
use dialoguer::Confirm;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use tagrun_core::agent::AgentEvent;
use tagrun_core::approval::ApprovalPrompt;
use tagrun_core::protocol::Task;
use tagrun_core::Agent;

/// Confirmation prompt backed by an interactive terminal question.
pub struct ConsolePrompt;

#[async_trait]
impl ApprovalPrompt for ConsolePrompt {
    async fn confirm(&self, task: &Task) -> bool {
        let description = task.describe();
        tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(format!("Execute: {}?", description))
                .default(false)
                .interact()
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false)
    }
}

/// Consume agent events and render them to the console. Ends when the
/// agent's sender is dropped.
pub fn spawn_renderer(mut rx: UnboundedReceiver<AgentEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let dim = Style::new().dim();
        let cyan = Style::new().cyan();
        let yellow = Style::new().yellow();
        let mut mid_reasoning = false;

        while let Some(event) = rx.recv().await {
            match event {
                AgentEvent::CycleStart { current, max } => {
                    println!(
                        "{}",
                        yellow.apply_to(format!("[Cycle {}/{}] Processing...", current, max))
                    );
                }
                AgentEvent::TokenEstimate(estimate) => {
                    println!(
                        "{}",
                        dim.apply_to(format!("[Token Estimate] ~{} tokens", estimate))
                    );
                }
                AgentEvent::Reasoning(chunk) => {
                    mid_reasoning = true;
                    print!("{}", cyan.apply_to(chunk));
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::Content(chunk) => {
                    if mid_reasoning {
                        println!();
                        mid_reasoning = false;
                    }
                    print!("{}", chunk);
                    let _ = std::io::stdout().flush();
                }
                AgentEvent::ReplyComplete => {
                    mid_reasoning = false;
                    println!("\n{}", dim.apply_to("-".repeat(40)));
                }
                AgentEvent::Observation(observation) => {
                    println!("{}", dim.apply_to(observation));
                }
                AgentEvent::Usage {
                    record,
                    session_hit_rate,
                } => {
                    println!(
                        "{}",
                        cyan.apply_to(format!(
                            "[Cache] hit={} miss={} rate={} | session_rate={}",
                            record.cache_hit(),
                            record.cache_miss(),
                            format_rate(record.hit_rate()),
                            format_rate(session_hit_rate)
                        ))
                    );
                }
                AgentEvent::Notice(text) => {
                    println!("{}", yellow.apply_to(format!("[!] {}", text)));
                }
            }
        }
    })
}

fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(rate) => format!("{:.1}%", rate * 100.0),
        None => "N/A".to_string(),
    }
}

async fn read_line(prompt: &str) -> Option<String> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "{}", prompt);
        let _ = stdout.flush();
        let mut buffer = String::new();
        match std::io::stdin().read_line(&mut buffer) {
            Ok(0) => None,
            Ok(_) => Some(buffer.trim_end().to_string()),
            Err(_) => None,
        }
    })
    .await
    .ok()
    .flatten()
}

/// The interactive loop. Returns on `exit`, end of input, or Ctrl-C.
pub async fn run(agent: &mut Agent) -> Result<()> {
    let bold = Style::new().bold();
    println!(
        "{}",
        bold.apply_to("tagrun - type a request, or: rollback | terminals | status <id> | stop <id> | stats | exit")
    );

    loop {
        let line = tokio::select! {
            line = read_line("> ") => line,
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        };
        let Some(line) = line else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        match line.as_str() {
            "exit" | "quit" => break,
            "rollback" => handle_rollback(agent),
            "terminals" => handle_terminals(agent),
            "stats" => handle_stats(agent),
            _ if line.starts_with("status ") => handle_status(agent, line[7..].trim()),
            _ if line.starts_with("stop ") => handle_stop(agent, line[5..].trim()),
            _ => {
                agent.chat(&line).await;
                print_modifications(agent);
            }
        }
    }
    Ok(())
}

fn handle_rollback(agent: &mut Agent) {
    let green = Style::new().green();
    let red = Style::new().red();
    match agent.rollback_last() {
        Ok(path) => println!(
            "{}",
            green.apply_to(format!("Rolled back file: {}", path.display()))
        ),
        Err(err) => println!("{}", red.apply_to(format!("Rollback failed: {}", err))),
    }
}

fn handle_terminals(agent: &Agent) {
    let summaries = agent.terminals().list();
    if summaries.is_empty() {
        println!("No tracked terminals");
        return;
    }
    for summary in summaries {
        println!(
            "{}  {}  up {}s  {}",
            summary.id,
            if summary.is_running { "running" } else { "exited" },
            summary.uptime.as_secs(),
            summary.command
        );
    }
}

fn handle_status(agent: &Agent, id: &str) {
    match agent.terminals().status(id) {
        Some(status) => {
            println!(
                "{}  {}  {}",
                status.id,
                if status.is_running {
                    "running".to_string()
                } else {
                    format!("exited ({:?})", status.exit_code)
                },
                status.command
            );
            if !status.output.is_empty() {
                println!("{}", status.output);
            }
        }
        None => println!("Terminal not found: {}", id),
    }
}

fn handle_stop(agent: &Agent, id: &str) {
    if agent.terminals().stop(id) {
        println!("Stopped terminal {}", id);
    } else {
        println!("Terminal not found: {}", id);
    }
}

fn handle_stats(agent: &Agent) {
    let stats = agent.stats();
    println!(
        "Requests: {} | prompt: {} | completion: {} | total: {}",
        stats.counted_requests, stats.prompt_tokens, stats.completion_tokens, stats.total_tokens
    );
    println!(
        "Cache: hit={} miss={} session_rate={}",
        stats.prompt_cache_hit_tokens,
        stats.prompt_cache_miss_tokens,
        format_rate(stats.session_hit_rate())
    );
    print_modifications(agent);
}

/// Per-session modification summary, printed after each turn.
pub fn print_modifications(agent: &Agent) {
    let bold = Style::new().bold();
    let green = Style::new().green();
    let modifications = agent.modifications();
    if modifications.is_empty() {
        println!("{}", green.apply_to("No file modifications in this session"));
        return;
    }
    println!("{}", bold.apply_to("===== File Modification Stats ====="));
    for m in modifications {
        println!("File: {}", m.path.display());
        println!("  +({}) | -({})", m.added, m.deleted);
    }
    println!("{}", bold.apply_to("==================================="));
}
