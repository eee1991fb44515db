// SPDX-License-Identifier: MIT
//! Semgrep runner — multi-language security scanning, SARIF output.

use super::{finish, spawn_tool, ToolResult, ToolRunner, ToolsConfig};
use crate::review::model::{Category, Issue, Severity};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};

pub struct Semgrep {
    rules: String,
    semgrep_timeout: u64,
    timeout: Duration,
}

impl Semgrep {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            rules: config.semgrep_rules.clone(),
            semgrep_timeout: config.semgrep_timeout,
            // Semgrep manages its own per-rule timeout; give the harness-side
            // guard some headroom beyond it.
            timeout: Duration::from_secs(config.semgrep_timeout + 60),
        }
    }
}

#[async_trait]
impl ToolRunner for Semgrep {
    fn name(&self) -> &'static str {
        "semgrep"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[
            "js", "jsx", "ts", "tsx", "mjs", "cjs", "py", "go", "rb", "java", "kt", "c", "cc",
            "cpp", "cs", "php", "rs", "scala", "swift", "sh", "yaml", "yml", "tf",
        ]
    }

    fn is_available(&self) -> bool {
        super::binary_on_path("semgrep")
    }

    async fn run(&self, files: &[String], workdir: &Path) -> ToolResult {
        let started = Instant::now();
        let mut args = vec![
            "--sarif".to_string(),
            "--config".to_string(),
            self.rules.clone(),
            "--timeout".to_string(),
            self.semgrep_timeout.to_string(),
            "--max-target-bytes".to_string(),
            "1000000".to_string(),
            "--no-git-ignore".to_string(),
        ];
        args.extend(files.iter().cloned());

        match spawn_tool("semgrep", &args, workdir, self.timeout).await {
            super::Spawned::Done {
                stdout,
                stderr,
                exit_code,
            } => {
                let issues = parse_sarif(&stdout, workdir);
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

/// Parse a SARIF document: `runs[].results[]` with rule id, message, and a
/// physical location.
fn parse_sarif(raw: &str, workdir: &Path) -> Vec<Issue> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
        return Vec::new();
    };
    let Some(runs) = root.get("runs").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    for run in runs {
        let Some(results) = run.get("results").and_then(|v| v.as_array()) else {
            continue;
        };
        for result in results {
            let rule_id = result
                .get("ruleId")
                .and_then(|v| v.as_str())
                .unwrap_or("semgrep");
            let message = result
                .get("message")
                .and_then(|m| m.get("text"))
                .and_then(|v| v.as_str())
                .unwrap_or("semgrep finding")
                .chars()
                .take(900)
                .collect::<String>();

            let location = result
                .get("locations")
                .and_then(|v| v.as_array())
                .and_then(|a| a.first())
                .and_then(|l| l.get("physicalLocation"));
            let file_path = location
                .and_then(|l| l.get("artifactLocation"))
                .and_then(|a| a.get("uri"))
                .and_then(|v| v.as_str())
                .map(|p| super::relative_path(p, workdir))
                .unwrap_or_default();
            let region = location.and_then(|l| l.get("region"));
            let line = region
                .and_then(|r| r.get("startLine"))
                .and_then(|v| v.as_u64())
                .unwrap_or(1) as u32;
            let end_line = region
                .and_then(|r| r.get("endLine"))
                .and_then(|v| v.as_u64())
                .map(|l| l as u32)
                .unwrap_or(line)
                .max(line);

            let severity = match result.get("level").and_then(|v| v.as_str()) {
                Some("error") => Severity::High,
                Some("note") => Severity::Low,
                _ => Severity::Medium,
            };

            // The rule id is dotted (`javascript.lang.security.audit.xss`);
            // keep the trailing segment as the subtype.
            let subtype = rule_id
                .rsplit('.')
                .next()
                .unwrap_or(rule_id)
                .chars()
                .take(50)
                .collect();

            issues.push(Issue {
                id: Issue::new_id(),
                category: categorize_rule(rule_id),
                subtype,
                severity,
                confidence: 0.8,
                file_path,
                line_start: line.max(1),
                line_end: end_line.max(1),
                message,
                evidence: String::new(),
                suggested_fix: None,
                patch: None,
                cwe: None,
                owasp_tag: None,
                source_tool: Some("semgrep".to_string()),
                is_llm_generated: false,
            });
        }
    }
    issues
}

/// Semgrep is a security scanner first; unrecognized rules default there.
fn categorize_rule(rule_id: &str) -> Category {
    let id = rule_id.to_ascii_lowercase();
    if id.contains("injection") || id.contains("xss") || id.contains("sqli") || id.contains("crypto")
    {
        Category::Security
    } else if id.contains("bug") || id.contains("correctness") {
        Category::Correctness
    } else if id.contains("perf") {
        Category::Performance
    } else {
        Category::Security
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SARIF: &str = r#"{
        "version": "2.1.0",
        "runs": [
            {
                "tool": {"driver": {"name": "Semgrep"}},
                "results": [
                    {
                        "ruleId": "python.lang.security.audit.sqli.raw-query",
                        "level": "error",
                        "message": {"text": "Detected string concatenation in a raw SQL query."},
                        "locations": [
                            {
                                "physicalLocation": {
                                    "artifactLocation": {"uri": "app/db.py"},
                                    "region": {"startLine": 42, "endLine": 44}
                                }
                            }
                        ]
                    },
                    {
                        "ruleId": "generic.perf.nested-loop",
                        "level": "warning",
                        "message": {"text": "Quadratic scan over rows."},
                        "locations": [
                            {
                                "physicalLocation": {
                                    "artifactLocation": {"uri": "app/report.py"},
                                    "region": {"startLine": 7}
                                }
                            }
                        ]
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn parses_sarif_results() {
        let issues = parse_sarif(SARIF, Path::new("/sandbox"));
        assert_eq!(issues.len(), 2);

        assert_eq!(issues[0].category, Category::Security);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].file_path, "app/db.py");
        assert_eq!(issues[0].line_start, 42);
        assert_eq!(issues[0].line_end, 44);
        assert_eq!(issues[0].subtype, "raw-query");

        assert_eq!(issues[1].category, Category::Performance);
        assert_eq!(issues[1].severity, Severity::Medium);
        assert_eq!(issues[1].line_end, 7);
    }

    #[test]
    fn scanner_defaults_to_security_category() {
        assert_eq!(categorize_rule("some.unknown.rule"), Category::Security);
        assert_eq!(categorize_rule("lang.bug.use-after-free"), Category::Correctness);
    }

    #[test]
    fn malformed_sarif_yields_nothing() {
        assert!(parse_sarif("", Path::new("/s")).is_empty());
        assert!(parse_sarif("{\"runs\": 3}", Path::new("/s")).is_empty());
    }
}
