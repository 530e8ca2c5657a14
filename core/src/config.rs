//! Session configuration
//!
//! Loaded from environment variables by the binary; immutable for the
//! lifetime of an agent session.

use crate::approval::ApprovalConfig;

/// Everything the agent needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub approval: ApprovalConfig,
    /// Exit the cycle loop after the first batch that executed a task.
    pub stop_after_first_execution: bool,
    /// Blocking timeout for short-running commands, in seconds.
    pub command_timeout_secs: u64,
}

impl Config {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            api_key,
            base_url: normalize_base_url(&base_url),
            model,
            approval: ApprovalConfig::default(),
            stop_after_first_execution: false,
            command_timeout_secs: 120,
        }
    }

    /// Load from `TAGRUN_API_KEY`, `TAGRUN_BASE_URL`, `TAGRUN_MODEL`.
    ///
    /// Base URL and model carry defaults; the key may be empty for local
    /// endpoints that do not authenticate.
    pub fn from_env() -> Self {
        let api_key = std::env::var("TAGRUN_API_KEY").unwrap_or_default();
        let base_url = std::env::var("TAGRUN_BASE_URL")
            .unwrap_or_else(|_| "https://api.deepseek.com".to_string());
        let model = std::env::var("TAGRUN_MODEL").unwrap_or_else(|_| "deepseek-chat".to_string());
        Self::new(api_key.trim().to_string(), base_url, model.trim().to_string())
    }
}

/// Clean a base URL copied out of shell configs: surrounding whitespace,
/// backticks, and single or double quotes are all tolerated.
pub fn normalize_base_url(raw: &str) -> String {
    let mut text = raw.trim().trim_matches('`').trim();
    if (text.starts_with('"') && text.ends_with('"') && text.len() >= 2)
        || (text.starts_with('\'') && text.ends_with('\'') && text.len() >= 2)
    {
        text = text[1..text.len() - 1].trim();
    }
    text.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url_strips_decorations() {
        assert_eq!(
            normalize_base_url("  \"https://api.example.com/\"  "),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_base_url("`https://api.example.com`"),
            "https://api.example.com"
        );
        assert_eq!(
            normalize_base_url("'https://api.example.com'"),
            "https://api.example.com"
        );
        assert_eq!(normalize_base_url(""), "");
    }
}
