//! File mutation engine with diff accounting and single-level undo
//!
//! Performs full-file writes and line-range edits, records an
//! [`EditRecord`] per successful mutation, and can restore the most recent
//! record's prior content. Diff statistics are a coarse delta, not a true
//! sequence diff: `write` compares total line counts, `edit_lines` counts
//! the lines it removed and inserted.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult};

/// What kind of mutation produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditKind {
    Write,
    EditLines,
}

/// Retained before/after snapshot of one successful mutation.
///
/// The newest record per path keeps its snapshot; older records for the
/// same path are superseded and can no longer be rolled back to.
#[derive(Debug, Clone)]
pub struct EditRecord {
    pub path: PathBuf,
    before: Option<String>,
    pub after: String,
    pub added: usize,
    pub deleted: usize,
    pub kind: EditKind,
    pub timestamp: DateTime<Utc>,
}

impl EditRecord {
    pub fn has_backup(&self) -> bool {
        self.before.is_some()
    }
}

/// A line slice served by `read_range`.
#[derive(Debug, Clone)]
pub struct ReadSlice {
    pub total_lines: usize,
    pub start_line: usize,
    /// End line actually served, clamped to the file length.
    pub end_line: usize,
    pub content: String,
}

/// The mutation engine. Owns the session's edit history; reads are
/// stateless.
#[derive(Debug, Default)]
pub struct FileStore {
    records: Vec<EditRecord>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite-or-create `path` with `content`, creating parent
    /// directories as needed. Returns the coarse `(added, deleted)` delta.
    pub fn write(&mut self, path: &Path, content: &str) -> CoreResult<(usize, usize)> {
        let before = if path.exists() {
            read_text_robust(path)?
        } else {
            String::new()
        };

        let old_lines = before.lines().count();
        let new_lines = content.lines().count();
        let added = new_lines.saturating_sub(old_lines);
        let deleted = old_lines.saturating_sub(new_lines);

        ensure_parent_dir(path)?;
        fs::write(path, content)?;
        self.push_record(path, before, content.to_string(), added, deleted, EditKind::Write);
        Ok((added, deleted))
    }

    /// Delete the inclusive 1-based line range `[delete_start, delete_end]`
    /// if given (`delete_end` defaults to `delete_start`), then insert the
    /// lines of `content` at `insert_at` (clamped to the file bounds) if
    /// given. Returns `(lines_inserted, lines_removed)`.
    pub fn edit_lines(
        &mut self,
        path: &Path,
        delete_start: Option<usize>,
        delete_end: Option<usize>,
        insert_at: Option<usize>,
        content: &str,
    ) -> CoreResult<(usize, usize)> {
        if !path.exists() {
            return Err(CoreError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let before = read_text_robust(path)?;
        let mut lines: Vec<String> = before.lines().map(str::to_string).collect();

        let mut deleted = 0;
        if let Some(start) = delete_start {
            let end = delete_end.unwrap_or(start).min(lines.len());
            let start = start.max(1);
            if start <= end {
                lines.drain(start - 1..end);
                deleted = end - start + 1;
            }
        }

        let mut added = 0;
        if let Some(at) = insert_at {
            if !content.is_empty() {
                let index = at.clamp(1, lines.len() + 1) - 1;
                let new_lines: Vec<String> = content.lines().map(str::to_string).collect();
                added = new_lines.len();
                lines.splice(index..index, new_lines);
            }
        }

        let mut after = lines.join("\n");
        if before.ends_with('\n') && !after.is_empty() {
            after.push('\n');
        }

        ensure_parent_dir(path)?;
        fs::write(path, &after)?;
        self.push_record(path, before, after, added, deleted, EditKind::EditLines);
        Ok((added, deleted))
    }

    /// Serve a 1-based line range. `end_line` values that are absent or
    /// past the end of file clamp to the last line. Never mutates state.
    pub fn read_range(
        path: &Path,
        start_line: usize,
        end_line: Option<usize>,
    ) -> CoreResult<ReadSlice> {
        if !path.exists() {
            return Err(CoreError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = read_text_robust(path)?;
        let lines: Vec<&str> = text.lines().collect();
        let total_lines = lines.len();

        let start = start_line.max(1);
        let end = end_line
            .filter(|e| *e <= total_lines)
            .unwrap_or(total_lines);

        let content = if start <= end && start <= total_lines {
            lines[start - 1..end].join("\n")
        } else {
            String::new()
        };

        Ok(ReadSlice {
            total_lines,
            start_line: start,
            end_line: end,
            content,
        })
    }

    /// Like `read_range`, with each served line prefixed by its number.
    pub fn read_range_numbered(
        path: &Path,
        start_line: usize,
        end_line: Option<usize>,
    ) -> CoreResult<ReadSlice> {
        let mut slice = Self::read_range(path, start_line, end_line)?;
        if !slice.content.is_empty() {
            slice.content = slice
                .content
                .lines()
                .enumerate()
                .map(|(i, line)| format!("{:>4} | {}", slice.start_line + i, line))
                .collect::<Vec<_>>()
                .join("\n");
        }
        Ok(slice)
    }

    /// Restore the most recent record's prior content and discard the
    /// record. One level of undo per mutation; a record whose snapshot was
    /// superseded fails with `NoBackupData`.
    pub fn rollback(&mut self) -> CoreResult<PathBuf> {
        let record = self.records.pop().ok_or(CoreError::NothingToRollback)?;
        let before = record.before.ok_or(CoreError::NoBackupData {
            path: record.path.clone(),
        })?;
        ensure_parent_dir(&record.path)?;
        fs::write(&record.path, before)?;
        Ok(record.path)
    }

    /// Ordered history of this session's successful mutations.
    pub fn records(&self) -> &[EditRecord] {
        &self.records
    }

    fn push_record(
        &mut self,
        path: &Path,
        before: String,
        after: String,
        added: usize,
        deleted: usize,
        kind: EditKind,
    ) {
        // Older backups for the same path are superseded.
        for record in &mut self.records {
            if record.path == path {
                record.before = None;
            }
        }
        self.records.push(EditRecord {
            path: path.to_path_buf(),
            before: Some(before),
            after,
            added,
            deleted,
            kind,
            timestamp: Utc::now(),
        });
    }
}

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Decode file bytes as UTF-8, replacing invalid sequences rather than
/// failing; reads never crash on mixed-encoding files.
fn read_text_robust(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => String::from_utf8_lossy(err.as_bytes()).into_owned(),
    })
}
