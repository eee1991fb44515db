// SPDX-License-Identifier: MIT
//! Canonical issue schema and review output shapes.
//!
//! Every evidence source — static tools, the vulnerability scanner, the LLM
//! analyzer — normalizes its findings into [`Issue`]. All wire-facing types
//! are `Serialize`/`Deserialize` with snake_case fields so they round-trip
//! through the LLM JSON contract and the posted review unchanged.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Enums ────────────────────────────────────────────────────────────────────

/// Issue category, ordered by nothing — weight lives in [`Category::weight`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Correctness,
    Performance,
    Maintainability,
    Style,
    Dependency,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Security => "security",
            Category::Correctness => "correctness",
            Category::Performance => "performance",
            Category::Maintainability => "maintainability",
            Category::Style => "style",
            Category::Dependency => "dependency",
        }
    }

    /// Fixed category weight used by the risk model and priority sort.
    pub fn weight(&self) -> f64 {
        match self {
            Category::Security => 4.0,
            Category::Correctness => 3.0,
            Category::Dependency => 2.5,
            Category::Performance => 2.0,
            Category::Maintainability => 1.5,
            Category::Style => 1.0,
        }
    }
}

/// Issue severity, ordered `Low < Medium < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Fixed severity weight used by the risk model and priority sort.
    pub fn weight(&self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 3.0,
            Severity::High => 7.0,
            Severity::Critical => 15.0,
        }
    }
}

// ─── Issue ────────────────────────────────────────────────────────────────────

static CWE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^CWE-\d+$").unwrap());

/// A single review finding in canonical form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub category: Category,
    /// Free-form refinement of the category, e.g. `"sql-injection"`, `"cve"`.
    pub subtype: String,
    pub severity: Severity,
    /// Source-reported confidence in `[0, 1]`.
    pub confidence: f64,
    /// Repository-relative path.
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub message: String,
    #[serde(default)]
    pub evidence: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owasp_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tool: Option<String>,
    #[serde(default)]
    pub is_llm_generated: bool,
}

impl Issue {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Validate every bounded field. Callers drop invalid issues; the error
    /// message names the violated field for the debug log.
    pub fn validate(&self) -> Result<(), String> {
        fn len(s: &str) -> usize {
            s.chars().count()
        }

        if len(&self.subtype) > 50 {
            return Err(format!("subtype exceeds 50 chars ({})", len(&self.subtype)));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} outside [0,1]", self.confidence));
        }
        if self.file_path.is_empty() {
            return Err("file_path is empty".to_string());
        }
        if self.file_path.starts_with('/') {
            return Err(format!("file_path {:?} is not relative", self.file_path));
        }
        if self.line_start == 0 {
            return Err("line_start must be positive".to_string());
        }
        if self.line_end < self.line_start {
            return Err(format!(
                "line_end {} precedes line_start {}",
                self.line_end, self.line_start
            ));
        }
        let message_len = len(&self.message);
        if message_len == 0 || message_len > 900 {
            return Err(format!("message length {message_len} outside 1..=900"));
        }
        if len(&self.evidence) > 500 {
            return Err(format!("evidence exceeds 500 chars ({})", len(&self.evidence)));
        }
        if let Some(fix) = &self.suggested_fix {
            if len(fix) > 500 {
                return Err(format!("suggested_fix exceeds 500 chars ({})", len(fix)));
            }
        }
        if let Some(patch) = &self.patch {
            if len(patch) > 2000 {
                return Err(format!("patch exceeds 2000 chars ({})", len(patch)));
            }
        }
        if let Some(cwe) = &self.cwe {
            if !CWE_RE.is_match(cwe) {
                return Err(format!("cwe {cwe:?} does not match CWE-<digits>"));
            }
        }
        if let Some(tag) = &self.owasp_tag {
            if len(tag) > 20 {
                return Err(format!("owasp_tag exceeds 20 chars ({})", len(tag)));
            }
        }
        Ok(())
    }

    /// Priority used by the aggregator's descending sort.
    pub fn priority(&self) -> f64 {
        self.severity.weight() * self.confidence * self.category.weight()
    }
}

// ─── Review output ────────────────────────────────────────────────────────────

/// Per-category rollup, derived from the filtered issue set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryBreakdown {
    pub category: Category,
    pub count: usize,
    pub max_severity: Severity,
    pub score_contribution: f64,
}

/// Run statistics attached to every posted review.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewStats {
    pub files_changed: usize,
    pub issues_found: usize,
    /// Unique, sorted names of the tools that ran successfully.
    pub tools_run: Vec<String>,
    pub model_used: String,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_added: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lines_removed: Option<u32>,
}

/// PR coordinates echoed into the output for traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrInfo {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub sha: String,
}

/// The complete, validated output of one review run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutput {
    pub risk_score: u8,
    pub risk_level: super::risk::RiskLevel,
    pub inline_comments: Vec<Issue>,
    /// Markdown body of the posted review, capped at 4000 chars.
    pub summary_markdown: String,
    /// One-paragraph executive summary, capped at 1000 chars.
    pub exec_summary: String,
    pub stats: ReviewStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_breakdown: Option<Vec<CategoryBreakdown>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_info: Option<PrInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn issue(category: Category, severity: Severity, confidence: f64) -> Issue {
        Issue {
            id: Issue::new_id(),
            category,
            subtype: "test".to_string(),
            severity,
            confidence,
            file_path: "src/lib.rs".to_string(),
            line_start: 1,
            line_end: 1,
            message: "a finding".to_string(),
            evidence: String::new(),
            suggested_fix: None,
            patch: None,
            cwe: None,
            owasp_tag: None,
            source_tool: None,
            is_llm_generated: false,
        }
    }

    #[test]
    fn valid_issue_passes() {
        let i = issue(Category::Security, Severity::High, 0.9);
        assert!(i.validate().is_ok());
    }

    #[test]
    fn message_boundary_900_accepted_901_rejected() {
        let mut i = issue(Category::Style, Severity::Low, 0.5);
        i.message = "m".repeat(900);
        assert!(i.validate().is_ok());
        i.message = "m".repeat(901);
        assert!(i.validate().is_err());
    }

    #[test]
    fn empty_message_rejected() {
        let mut i = issue(Category::Style, Severity::Low, 0.5);
        i.message = String::new();
        assert!(i.validate().is_err());
    }

    #[test]
    fn confidence_out_of_range_rejected() {
        let mut i = issue(Category::Correctness, Severity::Medium, 1.2);
        assert!(i.validate().is_err());
        i.confidence = -0.1;
        assert!(i.validate().is_err());
        i.confidence = 1.0;
        assert!(i.validate().is_ok());
    }

    #[test]
    fn line_ordering_enforced() {
        let mut i = issue(Category::Correctness, Severity::Medium, 0.8);
        i.line_start = 10;
        i.line_end = 9;
        assert!(i.validate().is_err());
        i.line_end = 10;
        assert!(i.validate().is_ok());
        i.line_start = 0;
        assert!(i.validate().is_err());
    }

    #[test]
    fn absolute_or_empty_path_rejected() {
        let mut i = issue(Category::Security, Severity::High, 0.9);
        i.file_path = String::new();
        assert!(i.validate().is_err());
        i.file_path = "/etc/passwd".to_string();
        assert!(i.validate().is_err());
    }

    #[test]
    fn cwe_format_enforced() {
        let mut i = issue(Category::Security, Severity::High, 0.9);
        i.cwe = Some("CWE-79".to_string());
        assert!(i.validate().is_ok());
        i.cwe = Some("cwe-79".to_string());
        assert!(i.validate().is_err());
        i.cwe = Some("CWE-".to_string());
        assert!(i.validate().is_err());
    }

    #[test]
    fn bounded_optional_fields() {
        let mut i = issue(Category::Maintainability, Severity::Low, 0.6);
        i.suggested_fix = Some("f".repeat(501));
        assert!(i.validate().is_err());
        i.suggested_fix = Some("f".repeat(500));
        i.patch = Some("p".repeat(2001));
        assert!(i.validate().is_err());
        i.patch = Some("p".repeat(2000));
        i.owasp_tag = Some("A01:2021-Broken-Acc".to_string());
        assert!(i.validate().is_ok());
        i.owasp_tag = Some("t".repeat(21));
        assert!(i.validate().is_err());
    }

    #[test]
    fn severity_ordering_and_weights() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::Critical.weight(), 15.0);
        assert_eq!(Category::Security.weight(), 4.0);
    }

    #[test]
    fn serde_round_trip_preserves_fields() {
        let mut i = issue(Category::Dependency, Severity::High, 0.95);
        i.cwe = Some("CWE-1104".to_string());
        i.source_tool = Some("osv".to_string());
        let json = serde_json::to_string(&i).expect("serialize");
        let back: Issue = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.category, Category::Dependency);
        assert_eq!(back.severity, Severity::High);
        assert_eq!(back.cwe.as_deref(), Some("CWE-1104"));
        assert!(!back.is_llm_generated);
    }
}
