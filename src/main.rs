//! `tagrun` - a terminal tool-calling agent
//!
//! Thin binary over `tagrun-core`: argument parsing, logging init, console
//! rendering and the interactive confirmation prompt. All agent state and
//! logic lives in the core crate.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tagrun_core::approval::{ApprovalPrompt, AutoApprove};
use tagrun_core::config::{normalize_base_url, Config};
use tagrun_core::llm::{CompletionStream, LlmClient};
use tagrun_core::{Agent, EnvironmentContext};

use crate::cli::Cli;

mod cli;
mod repl;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(base_url) = cli.base_url {
        config.base_url = normalize_base_url(&base_url);
    }
    config.stop_after_first_execution = cli.stop_after_first;
    config.command_timeout_secs = cli.command_timeout;
    tracing::debug!(base_url = %config.base_url, model = %config.model, "session configuration");

    let env = match cli.cwd {
        Some(dir) => EnvironmentContext::rooted(dir),
        None => EnvironmentContext::capture().context("failed to capture environment")?,
    };

    let completions: Arc<dyn CompletionStream> =
        Arc::new(LlmClient::new(&config).context("failed to build completion client")?);
    let approval: Arc<dyn ApprovalPrompt> = if cli.auto_approve {
        Arc::new(AutoApprove)
    } else {
        Arc::new(repl::ConsolePrompt)
    };

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let renderer = repl::spawn_renderer(events_rx);
    let mut agent = Agent::new(config, env, completions, approval, events_tx);

    if cli.prompt.is_empty() {
        repl::run(&mut agent).await?;
    } else {
        let prompt = cli.prompt.join(" ");
        agent.chat(&prompt).await;
        repl::print_modifications(&agent);
    }

    agent.shutdown();
    drop(agent);
    let _ = renderer.await;
    Ok(())
}
