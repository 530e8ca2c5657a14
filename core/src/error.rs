//! Structured error types for tagrun-core
//!
//! Typed errors raised by the engines; the agent loop converts them into
//! `FAILURE:` observations, the binary maps them through `anyhow`.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for tagrun-core operations
#[derive(Error, Debug)]
pub enum CoreError {
    // =========================================================================
    // Completion Stream / Transport Errors
    // =========================================================================
    /// Provider returned a non-success status
    #[error("provider error: {status} - {message}")]
    Provider { status: u16, message: String },

    /// Network-level failure talking to the completion endpoint
    #[error("transport error: {0}")]
    Transport(String),

    // =========================================================================
    // Terminal / Command Errors
    // =========================================================================
    /// Command matched the destructive-command denylist
    #[error("dangerous command blocked: {command}")]
    CommandForbidden { command: String },

    /// Command string was empty after trimming
    #[error("empty command")]
    EmptyCommand,

    // =========================================================================
    // File Engine Errors
    // =========================================================================
    /// File does not exist
    #[error("file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Rollback requested with no retained edit records
    #[error("nothing to rollback")]
    NothingToRollback,

    /// The newest edit record's snapshot was already consumed
    #[error("no backup data for {path}")]
    NoBackupData { path: PathBuf },

    // =========================================================================
    // Search Errors
    // =========================================================================
    /// Content-search regex failed to compile
    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    /// Filename glob pattern failed to compile
    #[error("invalid glob pattern: {0}")]
    InvalidGlob(String),

    /// I/O failure from any engine
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the core
pub type CoreResult<T> = Result<T, CoreError>;
