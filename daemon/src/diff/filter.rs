// SPDX-License-Identifier: MIT
//! File filter & categorizer.
//!
//! Partitions a parsed diff into three sets: reviewable source files,
//! dependency lockfiles (kept aside for vulnerability scanning), and
//! excluded files (generated output, vendored code, binary assets, …).
//! Include patterns override excludes; matching is case-insensitive.

use super::DiffFile;
use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

/// Globs excluded out of the box: generated files, build outputs, vendor
/// directories, minified/bundled assets, binary assets, IDE metadata,
/// lockfiles, and changelogs.
const BUILT_IN_EXCLUDES: &[&str] = &[
    "*.min.js",
    "*.min.css",
    "*.bundle.js",
    "*.map",
    "*.generated.*",
    "*_generated.go",
    "*.pb.go",
    "*_pb2.py",
    "*.snap",
    "__snapshots__/**",
    "dist/**",
    "build/**",
    "out/**",
    "target/**",
    "node_modules/**",
    "vendor/**",
    "third_party/**",
    ".idea/**",
    ".vscode/**",
    "*.iml",
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.ico",
    "*.svg",
    "*.woff",
    "*.woff2",
    "*.ttf",
    "*.eot",
    "*.pdf",
    "*.zip",
    "*.jar",
    "*.lock",
    "CHANGELOG*",
];

/// Lockfiles are not reviewed as source but are routed to their own
/// partition so the vulnerability scanner can read them.
pub const LOCKFILES: &[&str] = &[
    "package-lock.json",
    "pnpm-lock.yaml",
    "yarn.lock",
    "poetry.lock",
    "Pipfile.lock",
    "go.sum",
    "Cargo.lock",
    "Gemfile.lock",
    "composer.lock",
];

/// Dependency manifests the vulnerability scanner understands. These stay
/// reviewable as source but are also surfaced to the scanner.
pub const MANIFESTS: &[&str] = &["package.json", "requirements.txt", "pyproject.toml", "go.mod"];

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Extra exclude globs on top of the built-ins.
    pub exclude: Vec<String>,
    /// Include globs; a match here overrides any exclude.
    pub include: Vec<String>,
    /// Drop binary files.
    pub skip_binary: bool,
    /// Drop files whose total changed-line count exceeds this.
    pub max_lines: u32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            exclude: Vec::new(),
            include: Vec::new(),
            skip_binary: true,
            max_lines: 2000,
        }
    }
}

/// Result of [`FileFilter::partition`]. Order within each set matches the
/// diff's file order.
#[derive(Debug, Default)]
pub struct Partitioned {
    pub source: Vec<DiffFile>,
    pub lockfiles: Vec<DiffFile>,
    pub excluded: Vec<DiffFile>,
}

pub struct FileFilter {
    exclude: GlobSet,
    include: GlobSet,
    skip_binary: bool,
    max_lines: u32,
}

impl FileFilter {
    pub fn new(config: &FilterConfig) -> Result<Self> {
        let mut excludes: Vec<&str> = BUILT_IN_EXCLUDES.to_vec();
        excludes.extend(config.exclude.iter().map(String::as_str));

        Ok(Self {
            exclude: build_set(&excludes)?,
            include: build_set(&config.include.iter().map(String::as_str).collect::<Vec<_>>())?,
            skip_binary: config.skip_binary,
            max_lines: config.max_lines,
        })
    }

    pub fn partition(&self, files: Vec<DiffFile>) -> Partitioned {
        let mut out = Partitioned::default();
        for file in files {
            if LOCKFILES.contains(&file.file_name()) {
                out.lockfiles.push(file);
            } else if self.is_excluded(&file) {
                out.excluded.push(file);
            } else {
                out.source.push(file);
            }
        }
        out
    }

    fn is_excluded(&self, file: &DiffFile) -> bool {
        if self.skip_binary && file.is_binary {
            return true;
        }
        if file.lines_added + file.lines_removed > self.max_lines {
            return true;
        }
        let path = file.effective_path();
        if self.include.is_match(path) {
            return false;
        }
        self.exclude.is_match(path)
    }
}

/// Build a [`GlobSet`] with the filter's matching semantics: `*` does not
/// cross `/`, `**` does, matching is case-insensitive, and a pattern that
/// is not anchored (leading `/` or `**`) may match at any path segment
/// boundary.
fn build_set(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let anchored = pat.strip_prefix('/').unwrap_or(pat);
        let effective = if pat.starts_with('/') || pat.starts_with("**") {
            anchored.to_string()
        } else {
            format!("**/{anchored}")
        };
        let glob = GlobBuilder::new(&effective)
            .literal_separator(true)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("invalid glob pattern {pat:?}"))?;
        builder.add(glob);
    }
    builder.build().context("building glob set")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::ChangeKind;

    fn file(path: &str) -> DiffFile {
        DiffFile {
            old_path: Some(path.to_string()),
            new_path: Some(path.to_string()),
            kind: ChangeKind::Modify,
            is_binary: false,
            similarity: None,
            mode_change: None,
            hunks: Vec::new(),
            lines_added: 5,
            lines_removed: 2,
        }
    }

    fn filter(config: FilterConfig) -> FileFilter {
        FileFilter::new(&config).expect("filter")
    }

    #[test]
    fn lockfiles_are_routed_not_excluded() {
        let f = filter(FilterConfig::default());
        let out = f.partition(vec![file("package-lock.json"), file("sub/dir/go.sum")]);
        assert_eq!(out.lockfiles.len(), 2);
        assert!(out.source.is_empty());
        assert!(out.excluded.is_empty());
    }

    #[test]
    fn vendor_and_minified_are_excluded_at_any_depth() {
        let f = filter(FilterConfig::default());
        let out = f.partition(vec![
            file("web/node_modules/lodash/index.js"),
            file("assets/app.min.js"),
            file("src/main.rs"),
        ]);
        assert_eq!(out.excluded.len(), 2);
        assert_eq!(out.source.len(), 1);
        assert_eq!(out.source[0].effective_path(), "src/main.rs");
    }

    #[test]
    fn include_overrides_exclude() {
        let f = filter(FilterConfig {
            include: vec!["dist/keep.js".to_string()],
            ..FilterConfig::default()
        });
        let out = f.partition(vec![file("dist/keep.js"), file("dist/drop.js")]);
        assert_eq!(out.source.len(), 1);
        assert_eq!(out.source[0].effective_path(), "dist/keep.js");
        assert_eq!(out.excluded.len(), 1);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let f = filter(FilterConfig::default());
        let out = f.partition(vec![file("docs/ChangeLog.md"), file("Dist/app.js")]);
        assert_eq!(out.excluded.len(), 2);
    }

    #[test]
    fn binary_files_are_excluded_when_skip_binary() {
        let mut bin = file("data.dat");
        bin.is_binary = true;

        let f = filter(FilterConfig::default());
        let out = f.partition(vec![bin.clone()]);
        assert_eq!(out.excluded.len(), 1);

        let keep = filter(FilterConfig {
            skip_binary: false,
            ..FilterConfig::default()
        });
        let out = keep.partition(vec![bin]);
        assert_eq!(out.source.len(), 1);
    }

    #[test]
    fn oversized_files_are_excluded() {
        let mut big = file("src/huge.rs");
        big.lines_added = 1999;
        big.lines_removed = 2;

        let f = filter(FilterConfig::default());
        let out = f.partition(vec![big]);
        assert_eq!(out.excluded.len(), 1);
    }

    #[test]
    fn question_mark_matches_one_char() {
        let f = filter(FilterConfig {
            exclude: vec!["temp?.txt".to_string()],
            ..FilterConfig::default()
        });
        let out = f.partition(vec![file("temp1.txt"), file("temp12.txt")]);
        assert_eq!(out.excluded.len(), 1);
        assert_eq!(out.source.len(), 1);
        assert_eq!(out.source[0].effective_path(), "temp12.txt");
    }

    #[test]
    fn manifests_stay_reviewable() {
        let f = filter(FilterConfig::default());
        let out = f.partition(vec![file("package.json"), file("go.mod")]);
        assert_eq!(out.source.len(), 2);
    }
}
