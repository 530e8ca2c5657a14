//! Read-only filename and content search
//!
//! `search_files` matches a glob against file names (or relative paths when
//! the pattern contains a separator); `search_in_files` runs a regex over
//! the lines of glob-filtered files under a root. Hidden directories are
//! skipped in both. Results render as an ASCII tree for observations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use glob::Pattern;
use ignore::WalkBuilder;
use regex::Regex;

use crate::error::{CoreError, CoreResult};

/// Cap on filename-search results.
pub const FILE_SEARCH_LIMIT: usize = 50;

/// One content-search hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchLine {
    pub line_number: usize,
    pub text: String,
}

/// Find files under `root` whose name (or relative path, for patterns
/// containing a separator) matches `pattern`. Capped at `limit` results.
pub fn search_files(pattern: &str, root: &Path, limit: usize) -> CoreResult<Vec<PathBuf>> {
    let pattern =
        Pattern::new(pattern).map_err(|e| CoreError::InvalidGlob(e.to_string()))?;
    let match_full_path = pattern.as_str().contains('/');

    let mut results = Vec::new();
    for entry in walk(root) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let matched = if match_full_path {
            path.strip_prefix(root)
                .map(|rel| pattern.matches_path(rel))
                .unwrap_or(false)
        } else {
            path.file_name()
                .map(|name| pattern.matches(&name.to_string_lossy()))
                .unwrap_or(false)
        };
        if matched {
            results.push(path.to_path_buf());
            if results.len() >= limit {
                break;
            }
        }
    }
    Ok(results)
}

/// Run `regex` over every line of files under `root` whose relative path
/// matches `glob_pattern`, stopping after `max_matches` total hits.
pub fn search_in_files(
    regex: &str,
    root: &Path,
    glob_pattern: &str,
    max_matches: usize,
) -> CoreResult<BTreeMap<PathBuf, Vec<MatchLine>>> {
    let regex = Regex::new(regex).map_err(|e| CoreError::InvalidRegex(e.to_string()))?;
    let glob = RelGlob::new(glob_pattern)?;

    let mut matches: BTreeMap<PathBuf, Vec<MatchLine>> = BTreeMap::new();
    let mut total = 0;

    'files: for entry in walk(root) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        let Ok(rel) = path.strip_prefix(root) else { continue };
        if !glob.matches(rel) {
            continue;
        }
        let Ok(bytes) = std::fs::read(path) else { continue };
        let text = String::from_utf8_lossy(&bytes);

        for (index, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                matches.entry(path.to_path_buf()).or_default().push(MatchLine {
                    line_number: index + 1,
                    text: line.trim_end().to_string(),
                });
                total += 1;
                if total >= max_matches {
                    break 'files;
                }
            }
        }
    }
    Ok(matches)
}

/// Glob matched against root-relative paths. A leading `**/` also matches
/// zero directory components so the default `**/*` covers top-level files.
struct RelGlob {
    full: Pattern,
    bare: Option<Pattern>,
}

impl RelGlob {
    fn new(pattern: &str) -> CoreResult<Self> {
        let full = Pattern::new(pattern).map_err(|e| CoreError::InvalidGlob(e.to_string()))?;
        let bare = pattern
            .strip_prefix("**/")
            .map(Pattern::new)
            .transpose()
            .map_err(|e| CoreError::InvalidGlob(e.to_string()))?;
        Ok(Self { full, bare })
    }

    fn matches(&self, rel: &Path) -> bool {
        self.full.matches_path(rel)
            || self.bare.as_ref().is_some_and(|p| p.matches_path(rel))
    }
}

/// Walk `root` skipping hidden entries; VCS ignore files are not honored
/// since the model expects to see everything it could read.
fn walk(root: &Path) -> ignore::Walk {
    WalkBuilder::new(root)
        .hidden(true)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .build()
}

/// Render paths as an ASCII tree rooted at their common directory.
pub fn render_tree(paths: &[PathBuf], cwd: &Path) -> String {
    render_tree_with(paths, cwd, |_| None)
}

/// Render a content-search result tree, annotating files with hit counts.
pub fn render_match_tree(matches: &BTreeMap<PathBuf, Vec<MatchLine>>, cwd: &Path) -> String {
    let paths: Vec<PathBuf> = matches.keys().cloned().collect();
    render_tree_with(&paths, cwd, |path| {
        matches.get(path).map(|hits| format!(" ({} matches)", hits.len()))
    })
}

#[derive(Default)]
struct TreeNode {
    children: BTreeMap<String, TreeNode>,
    /// Full path when this node is a matched file.
    path: Option<PathBuf>,
}

fn render_tree_with(
    paths: &[PathBuf],
    cwd: &Path,
    annotate: impl Fn(&Path) -> Option<String>,
) -> String {
    if paths.is_empty() {
        return String::new();
    }

    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();

    let common_root = common_ancestor(&sorted).unwrap_or_else(|| cwd.to_path_buf());

    let mut root = TreeNode::default();
    for path in &sorted {
        let rel = path.strip_prefix(&common_root).unwrap_or(path);
        let mut node = &mut root;
        for part in rel.components() {
            let name = part.as_os_str().to_string_lossy().into_owned();
            node = node.children.entry(name).or_default();
        }
        node.path = Some((*path).clone());
    }

    let mut lines = vec![format!("{}/", common_root.display())];
    render_children(&root, "", &annotate, &mut lines);
    lines.join("\n")
}

fn render_children(
    node: &TreeNode,
    prefix: &str,
    annotate: &impl Fn(&Path) -> Option<String>,
    out: &mut Vec<String>,
) {
    let count = node.children.len();
    for (index, (name, child)) in node.children.iter().enumerate() {
        let is_last = index == count - 1;
        let connector = if is_last { "└── " } else { "├── " };
        let annotation = child
            .path
            .as_deref()
            .and_then(annotate)
            .unwrap_or_default();
        out.push(format!("{}{}{}{}", prefix, connector, name, annotation));
        let next_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
        render_children(child, &next_prefix, annotate, out);
    }
}

fn common_ancestor(paths: &[&PathBuf]) -> Option<PathBuf> {
    let first = paths.first()?;
    if paths.len() == 1 {
        return first.parent().map(Path::to_path_buf);
    }
    let mut ancestor: PathBuf = first.parent()?.to_path_buf();
    for path in &paths[1..] {
        while !path.starts_with(&ancestor) {
            ancestor = ancestor.parent()?.to_path_buf();
        }
    }
    Some(ancestor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn populate(dir: &TempDir) {
        fs::create_dir_all(dir.path().join("src/inner")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden")).unwrap();
        fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(
            dir.path().join("src/inner/util.rs"),
            "pub fn helper() {}\nfn main_helper() {}\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "fn main mention\n").unwrap();
        fs::write(dir.path().join(".hidden/secret.rs"), "fn main() {}\n").unwrap();
    }

    #[test]
    fn test_search_files_by_name() {
        let dir = TempDir::new().unwrap();
        populate(&dir);

        let mut found = search_files("*.rs", dir.path(), FILE_SEARCH_LIMIT).unwrap();
        found.sort();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["util.rs", "main.rs"]);
    }

    #[test]
    fn test_search_files_skips_hidden_directories() {
        let dir = TempDir::new().unwrap();
        populate(&dir);
        let found = search_files("secret.rs", dir.path(), FILE_SEARCH_LIMIT).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_search_files_with_path_pattern() {
        let dir = TempDir::new().unwrap();
        populate(&dir);
        let found = search_files("src/inner/*.rs", dir.path(), FILE_SEARCH_LIMIT).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with("src/inner/util.rs"));
    }

    #[test]
    fn test_search_files_respects_limit() {
        let dir = TempDir::new().unwrap();
        populate(&dir);
        let found = search_files("*.rs", dir.path(), 1).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_search_files_invalid_pattern() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            search_files("[", dir.path(), 10),
            Err(CoreError::InvalidGlob(_))
        ));
    }

    #[test]
    fn test_search_in_files_collects_line_hits() {
        let dir = TempDir::new().unwrap();
        populate(&dir);

        let matches = search_in_files(r"fn main", dir.path(), "**/*.rs", 200).unwrap();
        assert_eq!(matches.len(), 2);
        let main_rs = matches
            .get(&dir.path().join("src/main.rs"))
            .expect("main.rs matched");
        assert_eq!(main_rs[0].line_number, 1);
        assert_eq!(main_rs[0].text, "fn main() {}");
    }

    #[test]
    fn test_search_in_files_cap() {
        let dir = TempDir::new().unwrap();
        populate(&dir);
        let matches = search_in_files(r"fn", dir.path(), "**/*.rs", 1).unwrap();
        let total: usize = matches.values().map(Vec::len).sum();
        assert_eq!(total, 1);
    }

    #[test]
    fn test_search_in_files_invalid_regex() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            search_in_files("(", dir.path(), "**/*", 10),
            Err(CoreError::InvalidRegex(_))
        ));
    }

    #[test]
    fn test_render_tree_shape() {
        let root = PathBuf::from("/work");
        let paths = vec![
            PathBuf::from("/work/src/a.rs"),
            PathBuf::from("/work/src/inner/b.rs"),
            PathBuf::from("/work/top.txt"),
        ];
        let tree = render_tree(&paths, &root);
        assert!(tree.starts_with("/work/"));
        assert!(tree.contains("├── src"));
        assert!(tree.contains("└── top.txt"));
        assert!(tree.contains("b.rs"));
    }
}
