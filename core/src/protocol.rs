//! Tag protocol parsing for agent communication
//!
//! The model proposes actions by embedding closed XML-ish tags in its
//! free-form reply, e.g. `<read_file><path>src/main.rs</path></read_file>`.
//! Parsing is deliberately tolerant: streamed or partial text never fails,
//! unterminated opening tags are skipped, and candidates missing required
//! fields are dropped without affecting their neighbours.

use std::fmt;

/// Recognized tag vocabulary, in no particular order.
const TAG_NAMES: [&str; 6] = [
    "write_file",
    "read_file",
    "run_command",
    "search_files",
    "search_in_files",
    "edit_lines",
];

/// Task kind, used for approval whitelisting and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    WriteFile,
    EditLines,
    ReadFile,
    RunCommand,
    SearchFiles,
    SearchInFiles,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::WriteFile => "write_file",
            TaskKind::EditLines => "edit_lines",
            TaskKind::ReadFile => "read_file",
            TaskKind::RunCommand => "run_command",
            TaskKind::SearchFiles => "search_files",
            TaskKind::SearchInFiles => "search_in_files",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured action extracted from model output.
///
/// A `Task` is only constructed when every field its kind requires is
/// present and non-empty; incomplete candidates never leave the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum Task {
    WriteFile {
        path: String,
        content: String,
    },
    EditLines {
        path: String,
        delete_start: Option<usize>,
        delete_end: Option<usize>,
        insert_at: Option<usize>,
        content: String,
    },
    ReadFile {
        path: String,
        start_line: usize,
        end_line: Option<usize>,
    },
    RunCommand {
        command: String,
        is_long_running: bool,
    },
    SearchFiles {
        pattern: String,
    },
    SearchInFiles {
        regex: String,
        glob: String,
        root: String,
        max_matches: usize,
    },
}

impl Task {
    pub fn kind(&self) -> TaskKind {
        match self {
            Task::WriteFile { .. } => TaskKind::WriteFile,
            Task::EditLines { .. } => TaskKind::EditLines,
            Task::ReadFile { .. } => TaskKind::ReadFile,
            Task::RunCommand { .. } => TaskKind::RunCommand,
            Task::SearchFiles { .. } => TaskKind::SearchFiles,
            Task::SearchInFiles { .. } => TaskKind::SearchInFiles,
        }
    }

    /// One-line human description used by confirmation prompts.
    pub fn describe(&self) -> String {
        match self {
            Task::WriteFile { path, content } => {
                format!("write_file {} ({} lines)", path, content.lines().count())
            }
            Task::EditLines {
                path,
                delete_start,
                delete_end,
                insert_at,
                ..
            } => format!(
                "edit_lines {} delete={:?}..{:?} insert_at={:?}",
                path, delete_start, delete_end, insert_at
            ),
            Task::ReadFile {
                path, start_line, ..
            } => format!("read_file {} from line {}", path, start_line),
            Task::RunCommand {
                command,
                is_long_running,
            } => {
                if *is_long_running {
                    format!("run_command (long-running): {}", command)
                } else {
                    format!("run_command: {}", command)
                }
            }
            Task::SearchFiles { pattern } => format!("search_files {}", pattern),
            Task::SearchInFiles { regex, glob, .. } => {
                format!("search_in_files /{}/ in {}", regex, glob)
            }
        }
    }
}

/// Parse every complete, valid task tag out of `text`, in document order.
///
/// Single left-to-right scan: at each position the earliest opening tag of
/// the vocabulary wins; an opening tag without a matching closing tag later
/// in the text is skipped, not an error.
pub fn parse_tasks(text: &str) -> Vec<Task> {
    let lower = text.to_ascii_lowercase();
    let mut tasks = Vec::new();
    let mut idx = 0;

    while idx < text.len() {
        let mut next_tag: Option<&str> = None;
        let mut next_start = usize::MAX;
        for tag in TAG_NAMES {
            let open = format!("<{}>", tag);
            if let Some(pos) = find_from(text, &lower, &open, idx) {
                if pos < next_start {
                    next_start = pos;
                    next_tag = Some(tag);
                }
            }
        }

        let Some(tag) = next_tag else { break };
        let open_len = tag.len() + 2;
        let close = format!("</{}>", tag);
        let Some(close_start) = find_from(text, &lower, &close, next_start + open_len) else {
            // Unterminated opening tag: advance past it and keep scanning.
            idx = next_start + open_len;
            continue;
        };

        let inner = text[next_start + open_len..close_start].trim();
        if let Some(task) = build_task(tag, inner) {
            tasks.push(task);
        }
        idx = close_start + close.len();
    }

    tasks
}

/// True when `text` contains a tag-like fragment of the vocabulary.
///
/// Used after a zero-task parse to distinguish "no action intended" from a
/// malformed attempt that deserves a correction message.
pub fn contains_tag_fragment(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    TAG_NAMES.iter().any(|tag| {
        lower.contains(&format!("<{}", tag)) || lower.contains(&format!("</{}", tag))
    })
}

/// Exact-case search first, ASCII-case-insensitive as the fallback.
fn find_from(text: &str, lower: &str, needle: &str, from: usize) -> Option<usize> {
    if from >= text.len() {
        return None;
    }
    text[from..]
        .find(needle)
        .or_else(|| lower[from..].find(needle))
        .map(|pos| from + pos)
}

/// Extract the payload of a `<name>...</name>` sub-field inside `inner`.
fn find_field(inner: &str, name: &str) -> Option<String> {
    let open = format!("<{}>", name);
    let close = format!("</{}>", name);

    if let (Some(si), Some(ei)) = (inner.find(&open), inner.find(&close)) {
        if ei >= si + open.len() {
            return Some(inner[si + open.len()..ei].trim().to_string());
        }
    }
    let lower = inner.to_ascii_lowercase();
    if let (Some(si), Some(ei)) = (lower.find(&open), lower.find(&close)) {
        if ei >= si + open.len() {
            return Some(inner[si + open.len()..ei].trim().to_string());
        }
    }
    None
}

fn field_number(inner: &str, name: &str) -> Option<usize> {
    find_field(inner, name).and_then(|s| s.trim().parse().ok())
}

fn build_task(tag: &str, inner: &str) -> Option<Task> {
    match tag {
        "write_file" => {
            let path = find_field(inner, "path").unwrap_or_default();
            let content = find_field(inner, "content").unwrap_or_default();
            if path.is_empty() || content.is_empty() {
                return None;
            }
            Some(Task::WriteFile { path, content })
        }
        "edit_lines" => {
            let path = find_field(inner, "path").unwrap_or_default();
            if path.is_empty() {
                return None;
            }
            let delete_start = field_number(inner, "delete_start");
            let delete_end = field_number(inner, "delete_end");
            let insert_at = field_number(inner, "insert_at");
            let content = find_field(inner, "content").unwrap_or_default();
            if delete_start.is_none() && insert_at.is_none() && content.is_empty() {
                return None;
            }
            Some(Task::EditLines {
                path,
                delete_start,
                delete_end,
                insert_at,
                content,
            })
        }
        "read_file" => {
            let path = find_field(inner, "path").unwrap_or_default();
            if path.is_empty() {
                return None;
            }
            Some(Task::ReadFile {
                path,
                start_line: field_number(inner, "start_line").unwrap_or(1),
                end_line: field_number(inner, "end_line"),
            })
        }
        "run_command" => {
            let command = find_field(inner, "command")
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| inner.trim().to_string());
            if command.is_empty() {
                return None;
            }
            let is_long_running = find_field(inner, "is_long_running")
                .map(|v| v.trim().eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            Some(Task::RunCommand {
                command,
                is_long_running,
            })
        }
        "search_files" => {
            let pattern = find_field(inner, "pattern")
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "*".to_string());
            Some(Task::SearchFiles { pattern })
        }
        "search_in_files" => {
            let regex = find_field(inner, "regex").unwrap_or_default();
            if regex.is_empty() {
                return None;
            }
            Some(Task::SearchInFiles {
                regex,
                glob: find_field(inner, "glob")
                    .filter(|g| !g.is_empty())
                    .unwrap_or_else(|| "**/*".to_string()),
                root: find_field(inner, "root")
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| ".".to_string()),
                max_matches: field_number(inner, "max_matches").unwrap_or(200),
            })
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_write_file() {
        let text = "Sure, creating it now.\n<write_file>\n<path>a/b.txt</path>\n<content>hello\nworld</content>\n</write_file>\nDone.";
        let tasks = parse_tasks(text);
        assert_eq!(tasks.len(), 1);
        assert_eq!(
            tasks[0],
            Task::WriteFile {
                path: "a/b.txt".to_string(),
                content: "hello\nworld".to_string(),
            }
        );
    }

    #[test]
    fn test_tasks_returned_in_document_order() {
        let text = "<read_file><path>x.rs</path></read_file>\
                    <run_command><command>ls</command></run_command>\
                    <search_files><pattern>*.rs</pattern></search_files>";
        let tasks = parse_tasks(text);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].kind(), TaskKind::ReadFile);
        assert_eq!(tasks[1].kind(), TaskKind::RunCommand);
        assert_eq!(tasks[2].kind(), TaskKind::SearchFiles);
    }

    #[test]
    fn test_missing_required_field_drops_only_that_tag() {
        let text = "<write_file><path>only-path.txt</path></write_file>\
                    <run_command><command>echo ok</command></run_command>";
        let tasks = parse_tasks(text);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind(), TaskKind::RunCommand);
    }

    #[test]
    fn test_unterminated_open_tag_is_skipped() {
        let text = "<run_command><command>never closed\
                    <read_file><path>ok.rs</path></read_file>";
        let tasks = parse_tasks(text);
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind(), TaskKind::ReadFile);
    }

    #[test]
    fn test_case_insensitive_fallback() {
        let text = "<RUN_COMMAND><COMMAND>pwd</COMMAND></RUN_COMMAND>";
        let tasks = parse_tasks(text);
        assert_eq!(tasks.len(), 1);
        assert_eq!(
            tasks[0],
            Task::RunCommand {
                command: "pwd".to_string(),
                is_long_running: false,
            }
        );
    }

    #[test]
    fn test_run_command_falls_back_to_raw_payload() {
        let tasks = parse_tasks("<run_command>git status</run_command>");
        assert_eq!(
            tasks[0],
            Task::RunCommand {
                command: "git status".to_string(),
                is_long_running: false,
            }
        );
    }

    #[test]
    fn test_run_command_long_running_flag() {
        let text = "<run_command><command>python -m http.server</command><is_long_running>true</is_long_running></run_command>";
        let tasks = parse_tasks(text);
        assert_eq!(
            tasks[0],
            Task::RunCommand {
                command: "python -m http.server".to_string(),
                is_long_running: true,
            }
        );
    }

    #[test]
    fn test_read_file_defaults() {
        let tasks = parse_tasks("<read_file><path>src/lib.rs</path></read_file>");
        assert_eq!(
            tasks[0],
            Task::ReadFile {
                path: "src/lib.rs".to_string(),
                start_line: 1,
                end_line: None,
            }
        );
    }

    #[test]
    fn test_edit_lines_requires_an_operation() {
        // Path alone is not an edit.
        let tasks = parse_tasks("<edit_lines><path>a.txt</path></edit_lines>");
        assert!(tasks.is_empty());

        let tasks = parse_tasks(
            "<edit_lines><path>a.txt</path><delete_start>2</delete_start></edit_lines>",
        );
        assert_eq!(
            tasks[0],
            Task::EditLines {
                path: "a.txt".to_string(),
                delete_start: Some(2),
                delete_end: None,
                insert_at: None,
                content: String::new(),
            }
        );
    }

    #[test]
    fn test_search_in_files_defaults() {
        let tasks = parse_tasks("<search_in_files><regex>fn main</regex></search_in_files>");
        assert_eq!(
            tasks[0],
            Task::SearchInFiles {
                regex: "fn main".to_string(),
                glob: "**/*".to_string(),
                root: ".".to_string(),
                max_matches: 200,
            }
        );
    }

    #[test]
    fn test_plain_text_yields_nothing() {
        assert!(parse_tasks("The build passed; nothing else to do.").is_empty());
        assert!(!contains_tag_fragment("The build passed."));
    }

    #[test]
    fn test_fragment_detection() {
        assert!(contains_tag_fragment("I would use <write_file> here but..."));
        assert!(contains_tag_fragment("stray closer </run_command>"));
    }
}
