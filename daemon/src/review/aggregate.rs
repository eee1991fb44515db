// SPDX-License-Identifier: MIT
//! Aggregator — merge findings from every source into a ranked, capped set.
//!
//! Pipeline: deduplicate → confidence-filter → priority-sort → cap. The
//! full filtered set is kept alongside the capped inline selection because
//! risk scoring runs on the former; issues hidden by the cap still move the
//! headline score.

use super::model::Issue;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AggregateConfig {
    /// Issues below this confidence are dropped.
    pub confidence_threshold: f64,
    /// Maximum number of inline comments posted to the PR.
    pub max_inline_comments: usize,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_inline_comments: 10,
        }
    }
}

/// Result of [`aggregate`].
#[derive(Debug, Clone)]
pub struct Aggregated {
    /// Every deduplicated issue that cleared the confidence threshold,
    /// priority-sorted. Risk scoring runs on this set.
    pub filtered: Vec<Issue>,
    /// The top slice selected for inline comments.
    pub inline: Vec<Issue>,
}

/// Merge `issues` from all sources into the final ranked set.
pub fn aggregate(issues: Vec<Issue>, config: &AggregateConfig) -> Aggregated {
    let before = issues.len();
    let mut deduped = deduplicate(issues);
    let after_dedup = deduped.len();

    deduped.retain(|i| i.confidence >= config.confidence_threshold);
    debug!(
        before,
        after_dedup,
        after_filter = deduped.len(),
        "aggregated issues"
    );

    // Highest priority first; equal priorities keep their relative order.
    deduped.sort_by(|a, b| {
        b.priority()
            .partial_cmp(&a.priority())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let inline = deduped
        .iter()
        .take(config.max_inline_comments)
        .cloned()
        .collect();

    Aggregated {
        filtered: deduped,
        inline,
    }
}

/// Collapse issues sharing a location/category/subtype key. On collision the
/// higher severity wins; ties fall to the higher confidence.
pub fn deduplicate(issues: Vec<Issue>) -> Vec<Issue> {
    let mut kept: Vec<Issue> = Vec::with_capacity(issues.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for issue in issues {
        let key = dedup_key(&issue);
        match index.get(&key) {
            Some(&slot) => {
                let existing = &mut kept[slot];
                let wins = issue.severity > existing.severity
                    || (issue.severity == existing.severity
                        && issue.confidence > existing.confidence);
                if wins {
                    *existing = issue;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(issue);
            }
        }
    }
    kept
}

fn dedup_key(issue: &Issue) -> String {
    let subtype_prefix: String = issue.subtype.chars().take(20).collect();
    format!(
        "{}:{}-{}:{}:{}",
        issue.file_path,
        issue.line_start,
        issue.line_end,
        issue.category.as_str(),
        subtype_prefix
    )
}
