// SPDX-License-Identifier: MIT
//! LLM response handling: locate JSON, validate issues, filter hallucinated
//! paths.

use crate::review::model::{Category, Issue, Severity};
use serde::Deserialize;
use tracing::debug;

/// Issue shape the model is asked to emit: the canonical schema minus the
/// fields the parser assigns itself.
#[derive(Debug, Deserialize)]
struct WireIssue {
    category: Category,
    #[serde(default)]
    subtype: String,
    severity: Severity,
    confidence: f64,
    file_path: String,
    line_start: u32,
    #[serde(default)]
    line_end: Option<u32>,
    message: String,
    #[serde(default)]
    evidence: String,
    #[serde(default)]
    suggested_fix: Option<String>,
    #[serde(default)]
    patch: Option<String>,
    #[serde(default)]
    cwe: Option<String>,
    #[serde(default)]
    owasp_tag: Option<String>,
}

/// Parse a raw model response into validated issues.
///
/// Returns an empty list on any parse failure — a confused model is a
/// no-coverage event, not an error. `chunk_paths` guards against the model
/// inventing files: an issue survives only if its path substring-matches a
/// chunk path in either direction.
pub fn parse_response(response: &str, chunk_paths: &[String], source_tool: &str) -> Vec<Issue> {
    let Some(json_text) = locate_json(response) else {
        return Vec::new();
    };
    let Ok(root) = serde_json::from_str::<serde_json::Value>(&json_text) else {
        debug!("llm response was not valid JSON");
        return Vec::new();
    };
    let Some(items) = root.get("issues").and_then(|v| v.as_array()) else {
        debug!("llm response lacked an issues array");
        return Vec::new();
    };

    let mut issues = Vec::new();
    for item in items {
        let Ok(wire) = serde_json::from_value::<WireIssue>(item.clone()) else {
            debug!("dropping malformed llm issue");
            continue;
        };
        if !path_matches_chunk(&wire.file_path, chunk_paths) {
            debug!(path = %wire.file_path, "dropping llm issue outside the chunk");
            continue;
        }

        let line_start = wire.line_start.max(1);
        let issue = Issue {
            id: Issue::new_id(),
            category: wire.category,
            subtype: wire.subtype.chars().take(50).collect(),
            severity: wire.severity,
            confidence: wire.confidence,
            file_path: wire.file_path,
            line_start,
            line_end: wire.line_end.unwrap_or(line_start).max(line_start),
            message: wire.message,
            evidence: wire.evidence.chars().take(500).collect(),
            suggested_fix: wire.suggested_fix,
            patch: wire.patch,
            cwe: wire.cwe,
            owasp_tag: wire.owasp_tag,
            source_tool: Some(source_tool.to_string()),
            is_llm_generated: true,
        };
        match issue.validate() {
            Ok(()) => issues.push(issue),
            Err(reason) => debug!(%reason, "dropping invalid llm issue"),
        }
    }
    issues
}

/// Locate the JSON payload: a fenced code block wins, then the outermost
/// `{…}` substring, then the whole response.
fn locate_json(response: &str) -> Option<String> {
    if let Some(fenced) = fenced_block(response) {
        return Some(fenced);
    }
    if let (Some(start), Some(end)) = (response.find('{'), response.rfind('}')) {
        if start < end {
            return Some(response[start..=end].to_string());
        }
    }
    let trimmed = response.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn fenced_block(response: &str) -> Option<String> {
    let open = response.find("```")?;
    let after_fence = &response[open + 3..];
    // Skip an optional language tag up to the first newline.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim().to_string())
}

/// Lenient containment check in either direction, tolerating models that
/// echo `a/`-prefixed or repo-absolute variants of a chunk path.
fn path_matches_chunk(path: &str, chunk_paths: &[String]) -> bool {
    chunk_paths
        .iter()
        .any(|p| p.contains(path) || path.contains(p.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> Vec<String> {
        vec!["src/app.ts".to_string(), "src/db.py".to_string()]
    }

    const GOOD_ISSUE: &str = r#"{
        "issues": [
            {
                "category": "security",
                "subtype": "sql-injection",
                "severity": "high",
                "confidence": 0.9,
                "file_path": "src/db.py",
                "line_start": 14,
                "line_end": 15,
                "message": "User input is interpolated into a SQL string.",
                "evidence": "cursor.execute(f\"SELECT * FROM t WHERE id={uid}\")",
                "cwe": "CWE-89"
            }
        ]
    }"#;

    #[test]
    fn parses_bare_json() {
        let issues = parse_response(GOOD_ISSUE, &paths(), "llm-openai");
        assert_eq!(issues.len(), 1);
        let issue = &issues[0];
        assert!(issue.is_llm_generated);
        assert_eq!(issue.source_tool.as_deref(), Some("llm-openai"));
        assert_eq!(issue.cwe.as_deref(), Some("CWE-89"));
        assert!(!issue.id.is_empty());
    }

    #[test]
    fn prefers_fenced_block() {
        let response = format!("Here is my analysis:\n```json\n{GOOD_ISSUE}\n```\nDone.");
        let issues = parse_response(&response, &paths(), "llm-openai");
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn extracts_embedded_object() {
        let response = format!("Sure! {GOOD_ISSUE} Let me know if that helps.");
        let issues = parse_response(&response, &paths(), "llm-openai");
        assert_eq!(issues.len(), 1);
    }

    #[test]
    fn garbage_yields_zero_issues() {
        assert!(parse_response("I could not analyze this.", &paths(), "llm").is_empty());
        assert!(parse_response("", &paths(), "llm").is_empty());
        assert!(parse_response("{\"issues\": \"nope\"}", &paths(), "llm").is_empty());
    }

    #[test]
    fn hallucinated_path_is_dropped() {
        let response = r#"{
            "issues": [
                {
                    "category": "correctness",
                    "severity": "medium",
                    "confidence": 0.8,
                    "file_path": "src/made_up.rs",
                    "line_start": 3,
                    "message": "Imaginary bug in a file outside the chunk."
                }
            ]
        }"#;
        assert!(parse_response(response, &paths(), "llm").is_empty());
    }

    #[test]
    fn prefixed_path_variant_is_accepted() {
        let response = r#"{
            "issues": [
                {
                    "category": "style",
                    "severity": "low",
                    "confidence": 0.6,
                    "file_path": "a/src/app.ts",
                    "line_start": 2,
                    "message": "Inconsistent naming."
                }
            ]
        }"#;
        let issues = parse_response(response, &paths(), "llm");
        assert_eq!(issues.len(), 1, "containment works in both directions");
    }

    #[test]
    fn invalid_fields_drop_only_that_issue() {
        let response = r#"{
            "issues": [
                {
                    "category": "correctness",
                    "severity": "medium",
                    "confidence": 1.7,
                    "file_path": "src/app.ts",
                    "line_start": 1,
                    "message": "Confidence out of range."
                },
                {
                    "category": "correctness",
                    "severity": "medium",
                    "confidence": 0.8,
                    "file_path": "src/app.ts",
                    "line_start": 1,
                    "message": "This one is fine."
                }
            ]
        }"#;
        let issues = parse_response(response, &paths(), "llm");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].message, "This one is fine.");
    }

    #[test]
    fn missing_line_end_defaults_to_line_start() {
        let response = r#"{
            "issues": [
                {
                    "category": "performance",
                    "severity": "low",
                    "confidence": 0.7,
                    "file_path": "src/app.ts",
                    "line_start": 9,
                    "message": "Allocation inside the hot loop."
                }
            ]
        }"#;
        let issues = parse_response(response, &paths(), "llm");
        assert_eq!(issues[0].line_end, 9);
    }
}
