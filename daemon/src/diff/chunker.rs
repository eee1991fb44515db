// SPDX-License-Identifier: MIT
//! Chunker — batch reviewable files into LLM-sized chunks.
//!
//! Files are never split: a chunk holds whole files, and a single file whose
//! formatted content exceeds the token budget becomes its own oversized
//! chunk rather than being truncated. Token counts are estimated at four
//! characters per token.

use super::DiffFile;

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Token budget per chunk.
    pub max_tokens: usize,
    /// Reserved for overlapping context between chunks. Unused while the
    /// chunker never splits files; kept so configs round-trip.
    pub overlap_tokens: usize,
    pub max_files_per_chunk: usize,
    /// Files are never split across chunks regardless; `false` is accepted
    /// and behaves identically.
    pub keep_files_together: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 6000,
            overlap_tokens: 200,
            max_files_per_chunk: 10,
            keep_files_together: true,
        }
    }
}

/// A bundle of whole files sized for one LLM call.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub index: usize,
    pub total_chunks: usize,
    pub files: Vec<DiffFile>,
    pub file_paths: Vec<String>,
    /// Formatted diff content handed to the model.
    pub content: String,
    pub estimated_tokens: usize,
    /// Languages present in this chunk, in order of first appearance.
    pub languages: Vec<String>,
}

/// Estimate the token count of `text` as ⌈chars / 4⌉.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Split `files` into chunks under `config`. File order is preserved and the
/// chunks partition the input exactly.
pub fn chunk_files(files: Vec<DiffFile>, config: &ChunkerConfig) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();
    let mut batch: Vec<(DiffFile, String)> = Vec::new();
    let mut batch_tokens = 0usize;

    for file in files {
        let formatted = format_file(&file);
        let tokens = estimate_tokens(&formatted);

        let oversized = tokens > config.max_tokens;
        let would_overflow = batch_tokens + tokens > config.max_tokens
            || batch.len() + 1 > config.max_files_per_chunk;

        if !batch.is_empty() && (oversized || would_overflow) {
            flush(&mut chunks, std::mem::take(&mut batch));
            batch_tokens = 0;
        }

        batch_tokens += tokens;
        batch.push((file, formatted));
    }
    if !batch.is_empty() {
        flush(&mut chunks, batch);
    }

    let total = chunks.len();
    for chunk in &mut chunks {
        chunk.total_chunks = total;
    }
    chunks
}

fn flush(chunks: &mut Vec<Chunk>, batch: Vec<(DiffFile, String)>) {
    let mut files = Vec::with_capacity(batch.len());
    let mut content = String::new();
    let mut languages: Vec<String> = Vec::new();

    for (file, formatted) in batch {
        if let Some(lang) = language_for_path(file.effective_path()) {
            if !languages.iter().any(|l| l == lang) {
                languages.push(lang.to_string());
            }
        }
        content.push_str(&formatted);
        files.push(file);
    }

    let file_paths = files
        .iter()
        .map(|f| f.effective_path().to_string())
        .collect();
    let estimated_tokens = estimate_tokens(&content);

    chunks.push(Chunk {
        index: chunks.len(),
        total_chunks: 0, // back-filled once all chunks exist
        files,
        file_paths,
        content,
        estimated_tokens,
        languages,
    });
}

fn format_file(file: &DiffFile) -> String {
    let mut out = format!(
        "### File: {} ({})\n",
        file.effective_path(),
        file.kind.as_str()
    );
    for hunk in &file.hunks {
        out.push_str(&hunk.raw);
    }
    out.push('\n');
    out
}

/// Map a path's extension to a review-relevant language tag.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit('.').next()?;
    Some(match ext {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" => "python",
        "go" => "go",
        "rb" => "ruby",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "cpp",
        "cs" => "csharp",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        "tf" => "terraform",
        "yml" | "yaml" => "yaml",
        "json" => "json",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ChangeKind, DiffHunk};

    fn file_with_content(path: &str, content_len: usize) -> DiffFile {
        let raw = "+".to_string() + &"x".repeat(content_len) + "\n";
        DiffFile {
            old_path: Some(path.to_string()),
            new_path: Some(path.to_string()),
            kind: ChangeKind::Modify,
            is_binary: false,
            similarity: None,
            mode_change: None,
            hunks: vec![DiffHunk {
                old_start: 1,
                old_count: 1,
                new_start: 1,
                new_count: 1,
                raw,
                added_lines: Vec::new(),
                removed_lines: Vec::new(),
            }],
            lines_added: 1,
            lines_removed: 0,
        }
    }

    #[test]
    fn empty_input_yields_zero_chunks() {
        let chunks = chunk_files(Vec::new(), &ChunkerConfig::default());
        assert!(chunks.is_empty());
    }

    #[test]
    fn oversized_file_gets_its_own_chunk() {
        let config = ChunkerConfig {
            max_tokens: 100,
            ..ChunkerConfig::default()
        };
        // 100-token budget = 400 chars; the middle file is far beyond it.
        let files = vec![
            file_with_content("a.rs", 80),
            file_with_content("big.rs", 2000),
            file_with_content("b.rs", 80),
        ];
        let chunks = chunk_files(files, &config);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].file_paths, vec!["big.rs"]);
        assert!(
            chunks[1].estimated_tokens > config.max_tokens,
            "single-file overflow is permitted"
        );
        for chunk in [&chunks[0], &chunks[2]] {
            assert!(chunk.estimated_tokens <= config.max_tokens);
        }
    }

    #[test]
    fn chunks_partition_files_in_order() {
        let config = ChunkerConfig {
            max_tokens: 60,
            ..ChunkerConfig::default()
        };
        let paths = ["a.rs", "b.rs", "c.rs", "d.rs", "e.rs"];
        let files: Vec<DiffFile> = paths
            .iter()
            .map(|p| file_with_content(p, 100))
            .collect();
        let chunks = chunk_files(files, &config);

        let flattened: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.file_paths.iter().map(String::as_str))
            .collect();
        assert_eq!(flattened, paths);
    }

    #[test]
    fn file_count_cap_forces_flush() {
        let config = ChunkerConfig {
            max_tokens: 1_000_000,
            max_files_per_chunk: 2,
            ..ChunkerConfig::default()
        };
        let files: Vec<DiffFile> = (0..5)
            .map(|i| file_with_content(&format!("f{i}.py"), 10))
            .collect();
        let chunks = chunk_files(files, &config);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.files.len() <= 2));
    }

    #[test]
    fn indices_and_totals_are_consistent() {
        let config = ChunkerConfig {
            max_tokens: 60,
            ..ChunkerConfig::default()
        };
        let files: Vec<DiffFile> = (0..4)
            .map(|i| file_with_content(&format!("f{i}.go"), 150))
            .collect();
        let chunks = chunk_files(files, &config);
        let total = chunks.len();
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.total_chunks, total);
        }
    }

    #[test]
    fn languages_are_tagged_and_deduplicated() {
        let files = vec![
            file_with_content("src/a.ts", 10),
            file_with_content("src/b.ts", 10),
            file_with_content("src/c.py", 10),
            file_with_content("README.unknownext", 10),
        ];
        let chunks = chunk_files(files, &ChunkerConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].languages, vec!["typescript", "python"]);
    }
}
