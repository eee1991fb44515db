// SPDX-License-Identifier: MIT
//! Python analyzers: Ruff (lint) and Bandit (security).

use super::{finish, spawn_tool, ToolResult, ToolRunner, ToolsConfig};
use crate::review::model::{Category, Issue, Severity};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};

const PY_EXTENSIONS: &[&str] = &["py"];

// ─── Ruff ─────────────────────────────────────────────────────────────────────

pub struct Ruff {
    timeout: Duration,
}

impl Ruff {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl ToolRunner for Ruff {
    fn name(&self) -> &'static str {
        "ruff"
    }

    fn extensions(&self) -> &'static [&'static str] {
        PY_EXTENSIONS
    }

    fn is_available(&self) -> bool {
        super::binary_on_path("ruff")
    }

    async fn run(&self, files: &[String], workdir: &Path) -> ToolResult {
        if !has_ruff_config(workdir) {
            return ToolResult::failed(self.name(), "no recognized ruff config", 0);
        }

        let started = Instant::now();
        let mut args = vec![
            "check".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];
        args.extend(files.iter().cloned());

        match spawn_tool("ruff", &args, workdir, self.timeout).await {
            super::Spawned::Done {
                stdout,
                stderr,
                exit_code,
            } => {
                let issues = parse_ruff_json(&stdout, workdir);
                finish(self.name(), issues, exit_code, &stderr, started)
            }
            super::Spawned::TimedOut => ToolResult::failed(
                self.name(),
                format!("timed out after {}s", self.timeout.as_secs()),
                started.elapsed().as_millis() as u64,
            ),
            super::Spawned::Failed(e) => {
                ToolResult::failed(self.name(), e, started.elapsed().as_millis() as u64)
            }
        }
    }
}

fn has_ruff_config(workdir: &Path) -> bool {
    if workdir.join("ruff.toml").is_file() || workdir.join(".ruff.toml").is_file() {
        return true;
    }
    std::fs::read_to_string(workdir.join("pyproject.toml"))
        .map(|raw| raw.contains("[tool.ruff"))
        .unwrap_or(false)
}

/// Parse `ruff check --output-format json`: a flat array of diagnostics.
fn parse_ruff_json(raw: &str, workdir: &Path) -> Vec<Issue> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
        return Vec::new();
    };
    let Some(items) = root.as_array() else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    for item in items {
        let code = item.get("code").and_then(|v| v.as_str()).unwrap_or("RUF");
        let message = item
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("ruff finding")
            .to_string();
        let file_path = item
            .get("filename")
            .and_then(|v| v.as_str())
            .map(|p| super::relative_path(p, workdir))
            .unwrap_or_default();
        let line = item
            .get("location")
            .and_then(|l| l.get("row"))
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32;
        let end_line = item
            .get("end_location")
            .and_then(|l| l.get("row"))
            .and_then(|v| v.as_u64())
            .map(|l| l as u32)
            .unwrap_or(line)
            .max(line);

        issues.push(Issue {
            id: Issue::new_id(),
            category: categorize_code(code),
            subtype: code.chars().take(50).collect(),
            severity: Severity::Low,
            confidence: 0.9,
            file_path,
            line_start: line.max(1),
            line_end: end_line.max(1),
            message,
            evidence: String::new(),
            suggested_fix: item
                .get("fix")
                .and_then(|f| f.get("message"))
                .and_then(|v| v.as_str())
                .map(|s| s.chars().take(500).collect()),
            patch: None,
            cwe: None,
            owasp_tag: None,
            source_tool: Some("ruff".to_string()),
            is_llm_generated: false,
        });
    }
    issues
}

/// Ruff rule codes: `S` is flake8-bandit, `E`/`W` pycodestyle, `C` mccabe
/// complexity; everything else is style-adjacent.
fn categorize_code(code: &str) -> Category {
    if code.starts_with('S') {
        Category::Security
    } else if code.starts_with('E') || code.starts_with('W') {
        Category::Correctness
    } else if code.starts_with('C') {
        Category::Maintainability
    } else {
        Category::Style
    }
}

// ─── Bandit ───────────────────────────────────────────────────────────────────

pub struct Bandit {
    timeout: Duration,
}

impl Bandit {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl ToolRunner for Bandit {
    fn name(&self) -> &'static str {
        "bandit"
    }

    fn extensions(&self) -> &'static [&'static str] {
        PY_EXTENSIONS
    }

    fn is_available(&self) -> bool {
        super::binary_on_path("bandit")
    }

    async fn run(&self, files: &[String], workdir: &Path) -> ToolResult {
        let started = Instant::now();
        let mut args = vec!["-f".to_string(), "json".to_string(), "-q".to_string()];
        args.extend(files.iter().cloned());

        match spawn_tool("bandit", &args, workdir, self.timeout).await {
            super::Spawned::Done {
                stdout,
                stderr,
                exit_code,
            } => {
                let issues = parse_bandit_json(&stdout, workdir);
                finish(self.name(), issues, exit_code, &stderr, started)
            }
            super::Spawned::TimedOut => ToolResult::failed(
                self.name(),
                format!("timed out after {}s", self.timeout.as_secs()),
                started.elapsed().as_millis() as u64,
            ),
            super::Spawned::Failed(e) => {
                ToolResult::failed(self.name(), e, started.elapsed().as_millis() as u64)
            }
        }
    }
}

/// Parse `bandit -f json`: `{results: [...]}` with HIGH/MEDIUM/LOW severity
/// and confidence scales, and an optional CWE reference.
fn parse_bandit_json(raw: &str, workdir: &Path) -> Vec<Issue> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
        return Vec::new();
    };
    let Some(results) = root.get("results").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    for item in results {
        let severity = item
            .get("issue_severity")
            .and_then(|v| v.as_str())
            .map(super::severity_from_hml)
            .unwrap_or(Severity::Low);
        let confidence = item
            .get("issue_confidence")
            .and_then(|v| v.as_str())
            .map(super::confidence_from_hml)
            .unwrap_or(0.5);
        let message = item
            .get("issue_text")
            .and_then(|v| v.as_str())
            .unwrap_or("bandit finding")
            .to_string();
        let file_path = item
            .get("filename")
            .and_then(|v| v.as_str())
            .map(|p| super::relative_path(p, workdir))
            .unwrap_or_default();
        let line = item
            .get("line_number")
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32;
        let end_line = item
            .get("line_range")
            .and_then(|v| v.as_array())
            .and_then(|a| a.last())
            .and_then(|v| v.as_u64())
            .map(|l| l as u32)
            .unwrap_or(line)
            .max(line);
        let cwe = item
            .get("issue_cwe")
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_u64())
            .map(|id| format!("CWE-{id}"));
        let subtype = item
            .get("test_name")
            .and_then(|v| v.as_str())
            .unwrap_or("bandit")
            .chars()
            .take(50)
            .collect();
        let evidence = item
            .get("code")
            .and_then(|v| v.as_str())
            .map(|s| s.chars().take(500).collect())
            .unwrap_or_default();

        issues.push(Issue {
            id: Issue::new_id(),
            category: Category::Security,
            subtype,
            severity,
            confidence,
            file_path,
            line_start: line.max(1),
            line_end: end_line.max(1),
            message,
            evidence,
            suggested_fix: None,
            patch: None,
            cwe,
            owasp_tag: None,
            source_tool: Some("bandit".to_string()),
            is_llm_generated: false,
        });
    }
    issues
}
