//! Command-line interface definition

use std::path::PathBuf;

use clap::Parser;

/// Terminal tool-calling agent driven by a tolerant tag protocol.
#[derive(Parser, Debug)]
#[command(name = "tagrun", version, about)]
pub struct Cli {
    /// Model name (overrides TAGRUN_MODEL)
    #[arg(long)]
    pub model: Option<String>,

    /// Completion endpoint base URL (overrides TAGRUN_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Working directory for the session (defaults to the current directory)
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Approve every proposed task without prompting
    #[arg(long)]
    pub auto_approve: bool,

    /// Stop the cycle loop after the first batch that executed a task
    #[arg(long)]
    pub stop_after_first: bool,

    /// Blocking timeout for short-running commands, in seconds
    #[arg(long, default_value_t = 120)]
    pub command_timeout: u64,

    /// One-shot prompt; omit to enter the interactive REPL
    pub prompt: Vec<String>,
}
