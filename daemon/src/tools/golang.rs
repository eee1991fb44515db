// SPDX-License-Identifier: MIT
//! Go analyzers: gosec (security), staticcheck, and `go vet`.

use super::{finish, spawn_tool, ToolResult, ToolRunner, ToolsConfig};
use crate::review::model::{Category, Issue, Severity};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};

const GO_EXTENSIONS: &[&str] = &["go"];

// ─── gosec ────────────────────────────────────────────────────────────────────

pub struct Gosec {
    timeout: Duration,
}

impl Gosec {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl ToolRunner for Gosec {
    fn name(&self) -> &'static str {
        "gosec"
    }

    fn extensions(&self) -> &'static [&'static str] {
        GO_EXTENSIONS
    }

    fn is_available(&self) -> bool {
        super::binary_on_path("gosec")
    }

    async fn run(&self, _files: &[String], workdir: &Path) -> ToolResult {
        let started = Instant::now();
        let args = vec!["-fmt=json".to_string(), "./...".to_string()];

        match spawn_tool("gosec", &args, workdir, self.timeout).await {
            super::Spawned::Done {
                stdout,
                stderr,
                exit_code,
            } => {
                let issues = parse_gosec_json(&stdout, workdir);
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

/// Parse `gosec -fmt=json`: `{Issues: [...]}` with HIGH/MEDIUM/LOW scales
/// and string line numbers (`"23"` or `"23-25"`).
fn parse_gosec_json(raw: &str, workdir: &Path) -> Vec<Issue> {
    let Ok(root) = serde_json::from_str::<serde_json::Value>(raw.trim()) else {
        return Vec::new();
    };
    let Some(items) = root.get("Issues").and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    let mut issues = Vec::new();
    for item in items {
        let severity = item
            .get("severity")
            .and_then(|v| v.as_str())
            .map(super::severity_from_hml)
            .unwrap_or(Severity::Low);
        let confidence = item
            .get("confidence")
            .and_then(|v| v.as_str())
            .map(super::confidence_from_hml)
            .unwrap_or(0.5);
        let message = item
            .get("details")
            .and_then(|v| v.as_str())
            .unwrap_or("gosec finding")
            .to_string();
        let file_path = item
            .get("file")
            .and_then(|v| v.as_str())
            .map(|p| super::relative_path(p, workdir))
            .unwrap_or_default();
        let (line, end_line) = item
            .get("line")
            .and_then(|v| v.as_str())
            .map(parse_line_span)
            .unwrap_or((1, 1));
        let cwe = item
            .get("cwe")
            .and_then(|c| c.get("id"))
            .and_then(|v| v.as_str())
            .map(|id| format!("CWE-{id}"));
        let subtype = item
            .get("rule_id")
            .and_then(|v| v.as_str())
            .unwrap_or("gosec")
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
            line_start: line,
            line_end: end_line,
            message,
            evidence,
            suggested_fix: None,
            patch: None,
            cwe,
            owasp_tag: None,
            source_tool: Some("gosec".to_string()),
            is_llm_generated: false,
        });
    }
    issues
}

/// `"23"` → (23, 23); `"23-25"` → (23, 25).
fn parse_line_span(raw: &str) -> (u32, u32) {
    match raw.split_once('-') {
        Some((start, end)) => {
            let start = start.trim().parse().unwrap_or(1);
            let end = end.trim().parse().unwrap_or(start).max(start);
            (start, end)
        }
        None => {
            let line = raw.trim().parse().unwrap_or(1);
            (line, line)
        }
    }
}

// ─── staticcheck ──────────────────────────────────────────────────────────────

pub struct Staticcheck {
    timeout: Duration,
}

impl Staticcheck {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl ToolRunner for Staticcheck {
    fn name(&self) -> &'static str {
        "staticcheck"
    }

    fn extensions(&self) -> &'static [&'static str] {
        GO_EXTENSIONS
    }

    fn is_available(&self) -> bool {
        super::binary_on_path("staticcheck")
    }

    async fn run(&self, _files: &[String], workdir: &Path) -> ToolResult {
        let started = Instant::now();
        let args = vec!["-f".to_string(), "json".to_string(), "./...".to_string()];

        match spawn_tool("staticcheck", &args, workdir, self.timeout).await {
            super::Spawned::Done {
                stdout,
                stderr,
                exit_code,
            } => {
                let issues = parse_staticcheck_json(&stdout, workdir);
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

/// Parse staticcheck's newline-delimited JSON diagnostics.
fn parse_staticcheck_json(raw: &str, workdir: &Path) -> Vec<Issue> {
    let mut issues = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(item) = serde_json::from_str::<serde_json::Value>(line) else {
            continue; // skip malformed lines
        };
        let code = item.get("code").and_then(|v| v.as_str()).unwrap_or("ST");
        let message = item
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("staticcheck finding")
            .to_string();
        let location = item.get("location");
        let file_path = location
            .and_then(|l| l.get("file"))
            .and_then(|v| v.as_str())
            .map(|p| super::relative_path(p, workdir))
            .unwrap_or_default();
        let line_start = location
            .and_then(|l| l.get("line"))
            .and_then(|v| v.as_u64())
            .unwrap_or(1) as u32;
        let line_end = item
            .get("end")
            .and_then(|e| e.get("line"))
            .and_then(|v| v.as_u64())
            .map(|l| l as u32)
            .unwrap_or(line_start)
            .max(line_start);
        let severity = match item.get("severity").and_then(|v| v.as_str()) {
            Some("error") => Severity::High,
            Some("note") => Severity::Low,
            _ => Severity::Medium,
        };

        issues.push(Issue {
            id: Issue::new_id(),
            category: categorize_staticcheck(code),
            subtype: code.chars().take(50).collect(),
            severity,
            confidence: 0.8,
            file_path,
            line_start: line_start.max(1),
            line_end: line_end.max(1),
            message,
            evidence: String::new(),
            suggested_fix: None,
            patch: None,
            cwe: None,
            owasp_tag: None,
            source_tool: Some("staticcheck".to_string()),
            is_llm_generated: false,
        });
    }
    issues
}

fn categorize_staticcheck(code: &str) -> Category {
    if code.starts_with("SA") {
        Category::Security
    } else if code.starts_with("ST") {
        Category::Style
    } else if code.starts_with('S') {
        Category::Correctness
    } else {
        Category::Maintainability
    }
}

// ─── go vet ───────────────────────────────────────────────────────────────────

pub struct GoVet {
    timeout: Duration,
}

impl GoVet {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl ToolRunner for GoVet {
    fn name(&self) -> &'static str {
        "go vet"
    }

    fn extensions(&self) -> &'static [&'static str] {
        GO_EXTENSIONS
    }

    fn is_available(&self) -> bool {
        super::binary_on_path("go")
    }

    async fn run(&self, _files: &[String], workdir: &Path) -> ToolResult {
        let started = Instant::now();
        let args = vec!["vet".to_string(), "-json".to_string(), "./...".to_string()];

        match spawn_tool("go", &args, workdir, self.timeout).await {
            super::Spawned::Done {
                stdout: _,
                stderr,
                exit_code,
            } => {
                // go vet reports on stderr, interleaved with `# pkg` markers.
                let issues = parse_go_vet_json(&stderr, workdir);
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

/// Parse `go vet -json` stderr: `# pkg` comment lines followed by JSON
/// objects of shape `{pkg: {analyzer: [{posn, message}]}}`, possibly several
/// concatenated.
fn parse_go_vet_json(raw: &str, workdir: &Path) -> Vec<Issue> {
    let json_text: String = raw
        .lines()
        .filter(|l| !l.trim_start().starts_with('#'))
        .collect::<Vec<_>>()
        .join("\n");

    let mut issues = Vec::new();
    for value in serde_json::Deserializer::from_str(&json_text).into_iter::<serde_json::Value>() {
        let Ok(root) = value else { break };
        let Some(packages) = root.as_object() else {
            continue;
        };
        for analyzers in packages.values() {
            let Some(analyzers) = analyzers.as_object() else {
                continue;
            };
            for (analyzer, diags) in analyzers {
                let Some(diags) = diags.as_array() else {
                    continue;
                };
                for diag in diags {
                    let message = diag
                        .get("message")
                        .and_then(|v| v.as_str())
                        .unwrap_or("go vet finding")
                        .to_string();
                    let posn = diag.get("posn").and_then(|v| v.as_str()).unwrap_or("");
                    let (file, line) = parse_posn(posn);

                    issues.push(Issue {
                        id: Issue::new_id(),
                        category: Category::Correctness,
                        subtype: analyzer.chars().take(50).collect(),
                        severity: Severity::Medium,
                        confidence: 0.9,
                        file_path: super::relative_path(&file, workdir),
                        line_start: line,
                        line_end: line,
                        message,
                        evidence: String::new(),
                        suggested_fix: None,
                        patch: None,
                        cwe: None,
                        owasp_tag: None,
                        source_tool: Some("go vet".to_string()),
                        is_llm_generated: false,
                    });
                }
            }
        }
    }
    issues
}

/// Split a `file:line:col` position. Missing parts default to line 1.
fn parse_posn(posn: &str) -> (String, u32) {
    let parts: Vec<&str> = posn.rsplitn(3, ':').collect();
    match parts.len() {
        3 => (parts[2].to_string(), parts[1].parse().unwrap_or(1)),
        2 => (parts[1].to_string(), parts[0].parse().unwrap_or(1)),
        _ => (posn.to_string(), 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gosec_output() {
        let raw = r#"{
            "Issues": [
                {
                    "severity": "HIGH",
                    "confidence": "HIGH",
                    "cwe": {"id": "338", "url": "https://cwe.mitre.org/data/definitions/338.html"},
                    "rule_id": "G404",
                    "details": "Use of weak random number generator (math/rand instead of crypto/rand)",
                    "file": "/sandbox/token.go",
                    "code": "r := rand.Intn(max)",
                    "line": "23-25",
                    "column": "7"
                }
            ]
        }"#;
        let issues = parse_gosec_json(raw, Path::new("/sandbox"));
        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert_eq!(issue.category, Category::Security);
        assert_eq!(issue.severity, Severity::High);
        assert!((issue.confidence - 0.9).abs() < 1e-9);
        assert_eq!(issue.cwe.as_deref(), Some("CWE-338"));
        assert_eq!(issue.file_path, "token.go");
        assert_eq!((issue.line_start, issue.line_end), (23, 25));
        assert_eq!(issue.subtype, "G404");
    }

    #[test]
    fn line_span_parsing() {
        assert_eq!(parse_line_span("23"), (23, 23));
        assert_eq!(parse_line_span("23-25"), (23, 25));
        assert_eq!(parse_line_span("junk"), (1, 1));
    }

    #[test]
    fn parses_staticcheck_ndjson() {
        let raw = r#"{"code":"SA4006","severity":"warning","location":{"file":"/sandbox/main.go","line":10,"column":2},"end":{"file":"/sandbox/main.go","line":10,"column":14},"message":"this value of err is never used"}
not json
{"code":"ST1005","severity":"note","location":{"file":"/sandbox/errs.go","line":4,"column":9},"message":"error strings should not be capitalized"}"#;
        let issues = parse_staticcheck_json(raw, Path::new("/sandbox"));
        assert_eq!(issues.len(), 2, "malformed lines are skipped");
        assert_eq!(issues[0].category, Category::Security);
        assert_eq!(issues[0].severity, Severity::Medium);
        assert_eq!(issues[0].file_path, "main.go");
        assert_eq!(issues[1].category, Category::Style);
        assert_eq!(issues[1].severity, Severity::Low);
    }

    #[test]
    fn staticcheck_code_prefixes() {
        assert_eq!(categorize_staticcheck("SA1019"), Category::Security);
        assert_eq!(categorize_staticcheck("ST1005"), Category::Style);
        assert_eq!(categorize_staticcheck("S1002"), Category::Correctness);
        assert_eq!(categorize_staticcheck("U1000"), Category::Maintainability);
    }

    #[test]
    fn parses_go_vet_stderr() {
        let raw = r#"# example.com/pkg
{
    "example.com/pkg": {
        "printf": [
            {
                "posn": "/sandbox/main.go:42:13",
                "message": "Printf format %d has arg s of wrong type string"
            }
        ],
        "unreachable": [
            {
                "posn": "/sandbox/dead.go:7:2",
                "message": "unreachable code"
            }
        ]
    }
}"#;
        let issues = parse_go_vet_json(raw, Path::new("/sandbox"));
        assert_eq!(issues.len(), 2);
        let printf = issues
            .iter()
            .find(|i| i.subtype == "printf")
            .expect("printf diag");
        assert_eq!(printf.category, Category::Correctness);
        assert_eq!(printf.severity, Severity::Medium);
        assert_eq!(printf.file_path, "main.go");
        assert_eq!(printf.line_start, 42);
    }

    #[test]
    fn go_vet_empty_stderr_is_clean() {
        assert!(parse_go_vet_json("", Path::new("/s")).is_empty());
        assert!(parse_go_vet_json("# pkg only\n", Path::new("/s")).is_empty());
    }
}
