// SPDX-License-Identifier: MIT
//! ESLint runner — JavaScript/TypeScript linting.
//!
//! Only invoked when the sandbox carries a recognized ESLint configuration;
//! running ESLint configless produces noise findings against its built-in
//! defaults, which no repo author asked for.

use super::{finish, spawn_tool, ToolResult, ToolRunner, ToolsConfig};
use crate::review::model::{Category, Issue, Severity};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};

/// Config files that mark a repo as ESLint-enabled.
const CONFIG_FILES: &[&str] = &[
    ".eslintrc",
    ".eslintrc.json",
    ".eslintrc.js",
    ".eslintrc.cjs",
    ".eslintrc.yml",
    ".eslintrc.yaml",
    "eslint.config.js",
    "eslint.config.mjs",
];

pub struct Eslint {
    timeout: Duration,
}

impl Eslint {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl ToolRunner for Eslint {
    fn name(&self) -> &'static str {
        "eslint"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["js", "jsx", "ts", "tsx", "mjs", "cjs"]
    }

    fn is_available(&self) -> bool {
        super::binary_on_path("eslint")
    }

    async fn run(&self, files: &[String], workdir: &Path) -> ToolResult {
        if !has_eslint_config(workdir) {
            return ToolResult::failed(self.name(), "no recognized eslint config", 0);
        }

        let started = Instant::now();
        let mut args = vec!["--format".to_string(), "json".to_string()];
        args.extend(files.iter().cloned());

        match spawn_tool("eslint", &args, workdir, self.timeout).await {
            super::Spawned::Done {
                stdout,
                stderr,
                exit_code,
            } => {
                let issues = parse_eslint_json(&stdout, workdir);
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

/// A recognized ESLint config exists in `workdir` — dotfile variants, the
/// flat-config files, or an `eslintConfig` key in `package.json`.
pub fn has_eslint_config(workdir: &Path) -> bool {
    if CONFIG_FILES.iter().any(|f| workdir.join(f).is_file()) {
        return true;
    }
    let package_json = workdir.join("package.json");
    if let Ok(raw) = std::fs::read_to_string(package_json) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
            return value.get("eslintConfig").is_some();
        }
    }
    false
}

/// Parse `eslint --format json`: an array of file results, each carrying a
/// `messages` array. Messages without a `ruleId` (internal errors) are not
/// findings.
fn parse_eslint_json(raw: &str, workdir: &Path) -> Vec<Issue> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
        return Vec::new();
    };
    let Some(files) = root.as_array() else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    for file_obj in files {
        let file_path = file_obj
            .get("filePath")
            .and_then(|v| v.as_str())
            .map(|p| super::relative_path(p, workdir))
            .unwrap_or_default();
        let Some(messages) = file_obj.get("messages").and_then(|v| v.as_array()) else {
            continue;
        };

        for msg in messages {
            let Some(rule_id) = msg.get("ruleId").and_then(|v| v.as_str()) else {
                continue;
            };
            let severity = match msg.get("severity").and_then(|v| v.as_u64()) {
                Some(2) => Severity::Medium,
                _ => Severity::Low,
            };
            let line = msg.get("line").and_then(|v| v.as_u64()).unwrap_or(1) as u32;
            let end_line = msg
                .get("endLine")
                .and_then(|v| v.as_u64())
                .map(|l| l as u32)
                .unwrap_or(line)
                .max(line);
            let message = msg
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("eslint finding")
                .to_string();

            issues.push(Issue {
                id: Issue::new_id(),
                category: categorize_rule(rule_id),
                subtype: rule_id.chars().take(50).collect(),
                severity,
                confidence: 0.9,
                file_path: file_path.clone(),
                line_start: line.max(1),
                line_end: end_line.max(1),
                message,
                evidence: String::new(),
                suggested_fix: msg
                    .get("fix")
                    .and_then(|f| f.get("text"))
                    .and_then(|t| t.as_str())
                    .map(|s| s.chars().take(500).collect()),
                patch: None,
                cwe: None,
                owasp_tag: None,
                source_tool: Some("eslint".to_string()),
                is_llm_generated: false,
            });
        }
    }
    issues
}

/// Infer a category from the rule id.
fn categorize_rule(rule_id: &str) -> Category {
    if rule_id.contains("security") || rule_id.contains("no-eval") {
        Category::Security
    } else if rule_id.contains("no-unused")
        || rule_id.contains("no-undef")
        || rule_id.contains("prefer-const")
    {
        Category::Correctness
    } else if rule_id.contains("complexity") || rule_id.contains("max-") {
        Category::Maintainability
    } else {
        Category::Style
    }
}
