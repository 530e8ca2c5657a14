//! System prompt assembly
//!
//! The system message is static protocol instructions plus an optional user
//! rules file (`.tagrules` in the working directory). The rendered prompt is
//! cached per session and invalidated when a mutation touches the rules
//! file, so rule edits take effect on the next cycle.

use std::path::Path;

use crate::context::EnvironmentContext;

/// User rules file looked up in the working directory.
pub const RULES_FILE_NAME: &str = ".tagrules";

const STATIC_PROMPT: &str = r#"# TAG AGENT - OPERATING RULES
1. PASSIVE VALIDATION: Do NOT execute commands blindly. You PROPOSE actions; the user validates them.
2. SEARCH FIRST: When looking for problem code, prefer regex searching in file contents.
3. MULTI TASKS ALLOWED: You may output multiple closed tags per reply; they execute in order.
4. NO TASK = NO TAGS: Reply with natural language only if no action is needed.
5. EDIT EXISTING CODE BY LINE: If a file already exists, prefer editing by lines over rewriting it.
6. FOCUS FIRST: Only do what the user explicitly asked; no unrelated improvements.
7. NO REPETITION: Do not repeat or paraphrase provided context unless asked.
8. NO BOILERPLATE: No greetings or capability lists. Answer directly.

## TAG SYNTAX (EXACTLY AS SHOWN)

### Search Files (glob pattern)
<search_files>
  <pattern>**/*.rs</pattern>
</search_files>

### Search In Files (regex + glob + root)
<search_in_files>
  <regex>fn main\b</regex>
  <glob>**/*.rs</glob>
  <root>.</root>
  <max_matches>200</max_matches>
</search_in_files>

### Write File (path + content required)
<write_file>
  <path>path/to/file</path>
  <content>file_content</content>
</write_file>

### Edit Lines (delete range, then insert at line)
<edit_lines>
  <path>path/to/file.rs</path>
  <delete_start>10</delete_start>
  <delete_end>20</delete_end>
  <insert_at>10</insert_at>
  <content>new lines...</content>
</edit_lines>

### Read File (path required, start_line/end_line optional)
<read_file>
  <path>path/to/file</path>
  <start_line>1</start_line>
  <end_line>100</end_line>
</read_file>

### Run Command
<run_command>
  <command>cargo check</command>
  <is_long_running>false</is_long_running>
</run_command>

- Short-running: `<is_long_running>false</is_long_running>` (default). Quick commands like `ls`, `git status`.
- Long-running: `<is_long_running>true</is_long_running>`. Servers, watchers, anything that stays active. You receive a Terminal ID to track it.

## FORBIDDEN
- Unclosed tags
- Dangerous commands (rm -rf, etc.) without explicit user request"#;

/// Cached system prompt with the user rules folded in.
#[derive(Debug, Default)]
pub struct SystemPrompt {
    cached: Option<String>,
}

impl SystemPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop the cached render; the next `render` re-reads the rules file.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    /// Invalidate when `path` is the rules file, after a mutation touched it.
    pub fn invalidate_if_rules_file(&mut self, path: &Path) {
        let is_rules = path
            .file_name()
            .map(|name| name.to_string_lossy().eq_ignore_ascii_case(RULES_FILE_NAME))
            .unwrap_or(false);
        if is_rules {
            self.invalidate();
        }
    }

    /// The full system message. An unreadable or absent rules file renders
    /// as no rules, never as an error.
    pub fn render(&mut self, env: &EnvironmentContext) -> String {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }
        let rules = std::fs::read_to_string(env.cwd.join(RULES_FILE_NAME))
            .map(|text| text.trim().to_string())
            .unwrap_or_default();

        let rendered = if rules.is_empty() {
            STATIC_PROMPT.to_string()
        } else {
            format!(
                "{}\n\n## USER RULES (FROM {})\n```text\n{}\n```",
                STATIC_PROMPT, RULES_FILE_NAME, rules
            )
        };
        self.cached = Some(rendered.clone());
        rendered
    }
}

/// Wrap raw user input with the ambient environment block for one turn.
pub fn wrap_user_input(env: &EnvironmentContext, input: &str) -> String {
    format!(
        "IMPORTANT: The following CONTEXT is input-only. Do NOT quote, repeat, or summarize it unless the user asks.\n\
         IMPORTANT: Answer only the user's question. No greetings. No capability lists.\n\
         \n\
         {}\n\
         \n\
         {}",
        env.render_block(),
        input
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_without_rules_file() {
        let dir = TempDir::new().unwrap();
        let env = EnvironmentContext::rooted(dir.path());
        let mut prompt = SystemPrompt::new();
        let rendered = prompt.render(&env);
        assert!(rendered.contains("TAG SYNTAX"));
        assert!(!rendered.contains("USER RULES"));
    }

    #[test]
    fn test_rules_file_appended_and_cached() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(RULES_FILE_NAME), "always use tabs\n").unwrap();
        let env = EnvironmentContext::rooted(dir.path());
        let mut prompt = SystemPrompt::new();
        assert!(prompt.render(&env).contains("always use tabs"));

        // Cached render survives a file change until invalidated.
        std::fs::write(dir.path().join(RULES_FILE_NAME), "never use tabs\n").unwrap();
        assert!(prompt.render(&env).contains("always use tabs"));
        prompt.invalidate_if_rules_file(&dir.path().join(RULES_FILE_NAME));
        assert!(prompt.render(&env).contains("never use tabs"));
    }

    #[test]
    fn test_invalidate_ignores_other_files() {
        let mut prompt = SystemPrompt::new();
        prompt.cached = Some("rendered".to_string());
        prompt.invalidate_if_rules_file(Path::new("src/main.rs"));
        assert!(prompt.cached.is_some());
    }

    #[test]
    fn test_wrap_user_input_shape() {
        let env = EnvironmentContext::rooted("/work");
        let wrapped = wrap_user_input(&env, "list the files");
        assert!(wrapped.contains("BEGIN_CONTEXT"));
        assert!(wrapped.ends_with("list the files"));
    }
}
