//! Ambient environment context injected into the agent
//!
//! The loop never reads process globals; the binary captures the
//! environment once and hands it in, which keeps the core testable against
//! a temporary directory.

use std::path::{Path, PathBuf};

/// Operating system, working directory and path separator as presented to
/// the model and used to resolve relative paths.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    pub os: String,
    pub cwd: PathBuf,
    pub path_separator: char,
}

impl EnvironmentContext {
    /// Capture the current process environment.
    pub fn capture() -> std::io::Result<Self> {
        Ok(Self {
            os: std::env::consts::OS.to_string(),
            cwd: std::env::current_dir()?,
            path_separator: std::path::MAIN_SEPARATOR,
        })
    }

    /// Build a context rooted at an explicit directory (tests, `--cwd`).
    pub fn rooted(cwd: impl Into<PathBuf>) -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            cwd: cwd.into(),
            path_separator: std::path::MAIN_SEPARATOR,
        }
    }

    /// Resolve a possibly-relative path against the working directory.
    pub fn absolutize(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    /// The input-only context block prepended to each user turn.
    pub fn render_block(&self) -> String {
        format!(
            "BEGIN_CONTEXT\n\
             OPERATING SYSTEM: {}\n\
             PATH SEPARATOR: {}\n\
             CURRENT DIRECTORY: {}\n\
             END_CONTEXT",
            self.os,
            self.path_separator,
            self.cwd.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_relative_path() {
        let env = EnvironmentContext::rooted("/work/project");
        assert_eq!(
            env.absolutize("src/main.rs"),
            PathBuf::from("/work/project/src/main.rs")
        );
        assert_eq!(env.absolutize("/etc/hosts"), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn test_render_block_names_directory() {
        let env = EnvironmentContext::rooted("/work/project");
        let block = env.render_block();
        assert!(block.contains("CURRENT DIRECTORY: /work/project"));
        assert!(block.starts_with("BEGIN_CONTEXT"));
    }
}
