// SPDX-License-Identifier: MIT
//! Diff model — parsed representation of a unified diff.
//!
//! [`parser`] turns raw `git diff` text into a [`ParsedDiff`] tree,
//! [`filter`] partitions the files into reviewable / lockfile / excluded
//! sets, and [`chunker`] batches the survivors into LLM-sized chunks.

pub mod chunker;
pub mod filter;
pub mod parser;

use serde::{Deserialize, Serialize};

// ─── Lines & hunks ────────────────────────────────────────────────────────────

/// A single added or removed line, with its line number in the file version
/// it belongs to (new file for additions, old file for removals).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub line: u32,
    pub content: String,
}

/// A contiguous changed region introduced by one `@@ -a,b +c,d @@` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffHunk {
    pub old_start: u32,
    pub old_count: u32,
    pub new_start: u32,
    pub new_count: u32,
    /// Raw hunk text, header line included. Preserved verbatim so chunks can
    /// show the model exactly what the diff said.
    pub raw: String,
    /// Added lines, numbered in the new file. Strictly increasing within
    /// `[new_start, new_start + new_count)`.
    pub added_lines: Vec<DiffLine>,
    /// Removed lines, numbered in the old file. Strictly increasing within
    /// `[old_start, old_start + old_count)`.
    pub removed_lines: Vec<DiffLine>,
}

// ─── Files ────────────────────────────────────────────────────────────────────

/// How a file changed in this diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Delete,
    Modify,
    Rename,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Add => "add",
            ChangeKind::Delete => "delete",
            ChangeKind::Modify => "modify",
            ChangeKind::Rename => "rename",
        }
    }
}

/// One file's worth of changes.
///
/// Invariants (enforced by the parser):
/// - `kind == Add`    ⇒ `old_path` is `None`
/// - `kind == Delete` ⇒ `new_path` is `None`
/// - `kind == Rename` ⇒ both paths present and distinct
/// - `is_binary`      ⇒ `hunks` is empty
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffFile {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub kind: ChangeKind,
    pub is_binary: bool,
    /// Rename similarity percentage (0–100), when git reported one.
    pub similarity: Option<u8>,
    /// `(old_mode, new_mode)` when the file mode changed.
    pub mode_change: Option<(String, String)>,
    pub hunks: Vec<DiffHunk>,
    pub lines_added: u32,
    pub lines_removed: u32,
}

impl DiffFile {
    /// The path the review should anchor comments to: the new path when the
    /// file still exists, the old path for deletions.
    pub fn effective_path(&self) -> &str {
        self.new_path
            .as_deref()
            .or(self.old_path.as_deref())
            .unwrap_or("")
    }

    /// Basename of the effective path (used for lockfile routing).
    pub fn file_name(&self) -> &str {
        self.effective_path()
            .rsplit('/')
            .next()
            .unwrap_or_default()
    }
}

// ─── Whole diff ───────────────────────────────────────────────────────────────

/// A fully parsed unified diff. File order matches the input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedDiff {
    pub files: Vec<DiffFile>,
    pub total_lines_added: u32,
    pub total_lines_removed: u32,
}

impl ParsedDiff {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
