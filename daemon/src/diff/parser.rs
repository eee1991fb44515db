// SPDX-License-Identifier: MIT
//! Unified-diff parser.
//!
//! Consumes `git diff` text and produces a [`ParsedDiff`]. The parser is
//! deliberately lenient — upstream producers vary, so unrecognized or
//! malformed fragments are skipped rather than rejected. The single hard
//! error is a hunk header that appears before any `diff --git` file header.

use super::{ChangeKind, DiffFile, DiffHunk, DiffLine, ParsedDiff};
use once_cell::sync::Lazy;
use regex::Regex;

/// A hunk header appeared before any file header — the input is not a diff.
#[derive(Debug, thiserror::Error)]
#[error("malformed diff: hunk header at input line {line} precedes any file header")]
pub struct MalformedDiff {
    pub line: usize,
}

static HUNK_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").unwrap());

/// Parse unified-diff text into a [`ParsedDiff`].
pub fn parse(input: &str) -> Result<ParsedDiff, MalformedDiff> {
    let mut files: Vec<DiffFile> = Vec::new();
    let mut current: Option<FileBuilder> = None;

    for (idx, line) in input.lines().enumerate() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            if let Some(file) = current.take() {
                files.push(file.finish());
            }
            current = Some(FileBuilder::from_git_header(rest));
            continue;
        }

        // `---`/`+++` set the file paths between the git header and the
        // first hunk. Inside a hunk they are not content (a removed line
        // whose text begins with `--` renders identically), so they are
        // skipped without touching paths.
        if let Some(rest) = line.strip_prefix("--- ") {
            if let Some(file) = current.as_mut() {
                if file.hunk.is_none() {
                    file.old_path = clean_path(rest);
                }
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("+++ ") {
            if let Some(file) = current.as_mut() {
                if file.hunk.is_none() {
                    file.new_path = clean_path(rest);
                }
            }
            continue;
        }

        if let Some(caps) = HUNK_HEADER.captures(line) {
            let file = match current.as_mut() {
                Some(f) => f,
                None => return Err(MalformedDiff { line: idx + 1 }),
            };
            file.end_hunk();
            let num = |i: usize, default: u32| {
                caps.get(i)
                    .map(|m| m.as_str().parse().unwrap_or(default))
                    .unwrap_or(default)
            };
            file.hunk = Some(HunkBuilder::new(
                num(1, 1),
                num(2, 1),
                num(3, 1),
                num(4, 1),
                line,
            ));
            continue;
        }

        let Some(file) = current.as_mut() else {
            continue; // free-standing preamble — ignore
        };

        if let Some(rest) = line.strip_prefix("rename from ") {
            file.end_hunk();
            file.rename_from = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("rename to ") {
            file.end_hunk();
            file.rename_to = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("similarity index ") {
            file.similarity = rest.trim_end_matches('%').parse::<u8>().ok().map(|p| p.min(100));
        } else if let Some(rest) = line.strip_prefix("new file mode ") {
            file.explicit_add = true;
            file.new_mode = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("deleted file mode ") {
            file.explicit_delete = true;
            file.old_mode = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("old mode ") {
            file.old_mode = Some(rest.to_string());
        } else if let Some(rest) = line.strip_prefix("new mode ") {
            file.new_mode = Some(rest.to_string());
        } else if line.starts_with("Binary files ") && line.ends_with(" differ") {
            file.end_hunk();
            file.is_binary = true;
        } else if file.hunk.is_some() {
            file.push_content(line);
        }
        // anything else (index lines, extended headers, stray text) is skipped
    }

    if let Some(file) = current.take() {
        files.push(file.finish());
    }

    let total_lines_added = files.iter().map(|f| f.lines_added).sum();
    let total_lines_removed = files.iter().map(|f| f.lines_removed).sum();
    Ok(ParsedDiff {
        files,
        total_lines_added,
        total_lines_removed,
    })
}

/// Strip the `a/` / `b/` prefix git puts on paths; `/dev/null` means the
/// side does not exist.
fn clean_path(raw: &str) -> Option<String> {
    let p = raw.trim();
    if p == "/dev/null" {
        return None;
    }
    let p = p
        .strip_prefix("a/")
        .or_else(|| p.strip_prefix("b/"))
        .unwrap_or(p);
    Some(p.to_string())
}

// ─── Builders ────────────────────────────────────────────────────────────────

struct FileBuilder {
    old_path: Option<String>,
    new_path: Option<String>,
    rename_from: Option<String>,
    rename_to: Option<String>,
    explicit_add: bool,
    explicit_delete: bool,
    is_binary: bool,
    similarity: Option<u8>,
    old_mode: Option<String>,
    new_mode: Option<String>,
    hunks: Vec<DiffHunk>,
    hunk: Option<HunkBuilder>,
}

impl FileBuilder {
    /// Seed paths from the `diff --git a/X b/Y` header; the `---`/`+++`
    /// lines override them when present.
    fn from_git_header(rest: &str) -> Self {
        let (old_path, new_path) = match rest.find(" b/") {
            Some(split) => {
                let old = rest[..split].strip_prefix("a/").map(str::to_string);
                let new = Some(rest[split + 3..].to_string());
                (old, new)
            }
            None => (None, None),
        };
        Self {
            old_path,
            new_path,
            rename_from: None,
            rename_to: None,
            explicit_add: false,
            explicit_delete: false,
            is_binary: false,
            similarity: None,
            old_mode: None,
            new_mode: None,
            hunks: Vec::new(),
            hunk: None,
        }
    }

    fn end_hunk(&mut self) {
        if let Some(h) = self.hunk.take() {
            self.hunks.push(h.finish());
        }
    }

    fn push_content(&mut self, line: &str) {
        let Some(hunk) = self.hunk.as_mut() else {
            return;
        };
        if let Some(content) = line.strip_prefix('+') {
            hunk.raw.push_str(line);
            hunk.raw.push('\n');
            hunk.added.push(DiffLine {
                line: hunk.new_line,
                content: content.to_string(),
            });
            hunk.new_line += 1;
        } else if let Some(content) = line.strip_prefix('-') {
            hunk.raw.push_str(line);
            hunk.raw.push('\n');
            hunk.removed.push(DiffLine {
                line: hunk.old_line,
                content: content.to_string(),
            });
            hunk.old_line += 1;
        } else if line.is_empty() || line.starts_with(' ') {
            hunk.raw.push_str(line);
            hunk.raw.push('\n');
            hunk.old_line += 1;
            hunk.new_line += 1;
        }
        // `\ No newline at end of file` and similar markers: skipped,
        // counters untouched
    }

    fn finish(mut self) -> DiffFile {
        self.end_hunk();

        if let Some(from) = self.rename_from.take() {
            self.old_path = Some(from);
        }
        if let Some(to) = self.rename_to.take() {
            self.new_path = Some(to);
        }

        let kind = if self.old_path.is_some()
            && self.new_path.is_some()
            && self.old_path != self.new_path
        {
            ChangeKind::Rename
        } else if self.explicit_add || self.old_path.is_none() {
            self.old_path = None;
            ChangeKind::Add
        } else if self.explicit_delete || self.new_path.is_none() {
            self.new_path = None;
            ChangeKind::Delete
        } else {
            ChangeKind::Modify
        };

        let hunks = if self.is_binary { Vec::new() } else { self.hunks };
        let lines_added = hunks.iter().map(|h| h.added_lines.len() as u32).sum();
        let lines_removed = hunks.iter().map(|h| h.removed_lines.len() as u32).sum();

        let mode_change = match (self.old_mode, self.new_mode) {
            (Some(old), Some(new)) => Some((old, new)),
            _ => None,
        };

        DiffFile {
            old_path: self.old_path,
            new_path: self.new_path,
            kind,
            is_binary: self.is_binary,
            similarity: self.similarity,
            mode_change,
            hunks,
            lines_added,
            lines_removed,
        }
    }
}

struct HunkBuilder {
    old_start: u32,
    old_count: u32,
    new_start: u32,
    new_count: u32,
    old_line: u32,
    new_line: u32,
    raw: String,
    added: Vec<DiffLine>,
    removed: Vec<DiffLine>,
}

impl HunkBuilder {
    fn new(old_start: u32, old_count: u32, new_start: u32, new_count: u32, header: &str) -> Self {
        Self {
            old_start,
            old_count,
            new_start,
            new_count,
            old_line: old_start,
            new_line: new_start,
            raw: format!("{header}\n"),
            added: Vec::new(),
            removed: Vec::new(),
        }
    }

    fn finish(self) -> DiffHunk {
        DiffHunk {
            old_start: self.old_start,
            old_count: self.old_count,
            new_start: self.new_start,
            new_count: self.new_count,
            raw: self.raw,
            added_lines: self.added,
            removed_lines: self.removed,
        }
    }
}
