// SPDX-License-Identifier: MIT
//! Deterministic risk model.
//!
//! Each issue contributes `severity_weight × confidence × category_weight`.
//! The sum is normalized against a fixed budget of expected worst-case
//! findings and nudged upward by a 1.1 amplifier to widen mid-range
//! separation. Rounding is upward so any non-empty filtered issue set
//! produces a positive score.

use super::model::{Category, CategoryBreakdown, Issue, Severity};
use serde::{Deserialize, Serialize};

/// Highest severity weight (`critical`).
const MAX_SEVERITY_WEIGHT: f64 = 15.0;
/// Highest category weight (`security`).
const MAX_CATEGORY_WEIGHT: f64 = 4.0;

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Number of worst-case findings (critical severity, full confidence,
    /// security category) that saturates the score at 100.
    pub max_expected_issues: usize,
    /// Gate threshold: the check fails at or above this score.
    pub risk_threshold: u8,
    /// Gate also fails when any security issue is critical.
    pub fail_on_critical_security: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_expected_issues: 10,
            risk_threshold: 85,
            fail_on_critical_security: true,
        }
    }
}

/// Headline risk level, a four-way partition of the score range at 30/60/85.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            85.. => RiskLevel::Critical,
            60..=84 => RiskLevel::High,
            30..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Output of [`assess`].
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
    pub breakdown: Vec<CategoryBreakdown>,
    /// Unnormalized sum of contributions, kept for logging.
    pub raw_score: f64,
    /// `true` when the check gate fails for this issue set.
    pub gate_failed: bool,
}

/// Score the full filtered issue set. The caller passes every issue that
/// survived confidence filtering, not just the capped inline selection, so
/// hidden findings still move the headline number.
pub fn assess(issues: &[Issue], config: &RiskConfig) -> RiskAssessment {
    let mut breakdown: Vec<CategoryBreakdown> = Vec::new();
    let mut raw_score = 0.0;

    for issue in issues {
        let contribution = issue.severity.weight() * issue.confidence * issue.category.weight();
        raw_score += contribution;

        match breakdown.iter_mut().find(|b| b.category == issue.category) {
            Some(entry) => {
                entry.count += 1;
                entry.max_severity = entry.max_severity.max(issue.severity);
                entry.score_contribution += contribution;
            }
            None => breakdown.push(CategoryBreakdown {
                category: issue.category,
                count: 1,
                max_severity: issue.severity,
                score_contribution: contribution,
            }),
        }
    }

    let denominator =
        config.max_expected_issues as f64 * MAX_SEVERITY_WEIGHT * MAX_CATEGORY_WEIGHT;
    let normalized = (raw_score / denominator * 100.0).min(100.0);
    let score = (normalized * 1.1).ceil().min(100.0) as u8;
    let level = RiskLevel::from_score(score);

    let critical_security = issues
        .iter()
        .any(|i| i.category == Category::Security && i.severity == Severity::Critical);
    let gate_failed =
        score >= config.risk_threshold || (config.fail_on_critical_security && critical_security);

    RiskAssessment {
        score,
        level,
        breakdown,
        raw_score,
        gate_failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(category: Category, severity: Severity, confidence: f64) -> Issue {
        Issue {
            id: Issue::new_id(),
            category,
            subtype: "t".to_string(),
            severity,
            confidence,
            file_path: "src/lib.rs".to_string(),
            line_start: 1,
            line_end: 1,
            message: "m".to_string(),
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
    fn empty_set_scores_zero_and_passes() {
        let a = assess(&[], &RiskConfig::default());
        assert_eq!(a.score, 0);
        assert_eq!(a.level, RiskLevel::Low);
        assert!(!a.gate_failed);
        assert!(a.breakdown.is_empty());
    }

    #[test]
    fn ten_critical_security_issues_saturate() {
        let issues: Vec<Issue> = (0..10)
            .map(|_| issue(Category::Security, Severity::Critical, 1.0))
            .collect();
        let a = assess(&issues, &RiskConfig::default());
        assert_eq!(a.score, 100);
        assert_eq!(a.level, RiskLevel::Critical);
        assert!(a.gate_failed);
    }

    #[test]
    fn single_low_style_issue_scores_positive_but_low() {
        let issues = vec![issue(Category::Style, Severity::Low, 0.5)];
        let a = assess(&issues, &RiskConfig::default());
        assert!(a.score > 0, "a real finding never scores zero");
        assert!(a.score < 30);
        assert_eq!(a.level, RiskLevel::Low);
        assert!(!a.gate_failed);
    }

    #[test]
    fn level_partition_boundaries() {
        assert_eq!(RiskLevel::from_score(0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(29), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(59), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(60), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(84), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(85), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn score_is_monotonic_in_issue_set() {
        let config = RiskConfig::default();
        let mut issues = vec![
            issue(Category::Correctness, Severity::High, 0.8),
            issue(Category::Performance, Severity::Medium, 0.6),
        ];
        let before = assess(&issues, &config).score;
        issues.push(issue(Category::Style, Severity::Low, 0.5));
        let after = assess(&issues, &config).score;
        assert!(after >= before, "adding an issue cannot lower the score");
    }

    #[test]
    fn critical_security_fails_gate_even_at_low_score() {
        let issues = vec![issue(Category::Security, Severity::Critical, 0.6)];
        let a = assess(&issues, &RiskConfig::default());
        assert!(a.score < 85);
        assert!(a.gate_failed, "critical security finding trips the gate");

        let relaxed = RiskConfig {
            fail_on_critical_security: false,
            ..RiskConfig::default()
        };
        assert!(!assess(&issues, &relaxed).gate_failed);
    }

    #[test]
    fn breakdown_groups_by_category() {
        let issues = vec![
            issue(Category::Security, Severity::High, 1.0),
            issue(Category::Security, Severity::Low, 1.0),
            issue(Category::Style, Severity::Low, 1.0),
        ];
        let a = assess(&issues, &RiskConfig::default());
        assert_eq!(a.breakdown.len(), 2);
        let sec = a
            .breakdown
            .iter()
            .find(|b| b.category == Category::Security)
            .expect("security entry");
        assert_eq!(sec.count, 2);
        assert_eq!(sec.max_severity, Severity::High);
        // 7*1*4 + 1*1*4
        assert!((sec.score_contribution - 32.0).abs() < 1e-9);
    }
}
