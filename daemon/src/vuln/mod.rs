// SPDX-License-Identifier: MIT
//! Vulnerability scanner — dependency manifests → OSV advisories → issues.
//!
//! Understands `package.json` (npm), `requirements.txt` / `pyproject.toml`
//! (PyPI), and `go.mod` (Go). Each extracted package is queried against the
//! OSV-style database, one POST per package, capped at [`MAX_PACKAGES`] to
//! bound cost. Network failures degrade to zero findings; the scanner never
//! fails a review.

mod manifest;
mod osv;

pub use manifest::{clean_version, parse_manifest, Ecosystem, Package};
pub use osv::{severity_from_advisory, Advisory, OsvClient, SeverityEntry};

use crate::review::model::{Category, Issue};
use tracing::{debug, warn};

/// Upper bound on per-review OSV queries.
pub const MAX_PACKAGES: usize = 50;

#[derive(Debug, Clone)]
pub struct VulnConfig {
    pub enabled: bool,
    pub api_url: String,
}

impl Default for VulnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://api.osv.dev".to_string(),
        }
    }
}

/// Scan dependency manifests: `files` pairs a repo-relative path with the
/// manifest's content. Returns one issue per advisory hit.
pub async fn scan(client: &OsvClient, files: &[(String, String)]) -> Vec<Issue> {
    // (manifest path, package) pairs, deduplicated by name+ecosystem.
    let mut packages: Vec<(String, Package)> = Vec::new();
    for (path, content) in files {
        for pkg in parse_manifest(path, content) {
            let dup = packages
                .iter()
                .any(|(_, p)| p.name == pkg.name && p.ecosystem == pkg.ecosystem);
            if !dup {
                packages.push((path.clone(), pkg));
            }
        }
    }

    if packages.len() > MAX_PACKAGES {
        debug!(
            total = packages.len(),
            cap = MAX_PACKAGES,
            "truncating package list for vulnerability lookup"
        );
        packages.truncate(MAX_PACKAGES);
    }

    let queries = packages.iter().map(|(path, pkg)| async move {
        match client.query(pkg).await {
            Ok(vulns) => (path, pkg, vulns),
            Err(e) => {
                warn!(package = %pkg.name, err = %e, "osv query failed — skipping");
                (path, pkg, Vec::new())
            }
        }
    });

    let mut issues = Vec::new();
    for (path, pkg, vulns) in futures::future::join_all(queries).await {
        for vuln in vulns {
            issues.push(advisory_to_issue(path, pkg, &vuln));
        }
    }
    issues.retain(|i| i.validate().is_ok());
    issues
}

fn advisory_to_issue(manifest_path: &str, pkg: &Package, vuln: &osv::Advisory) -> Issue {
    let summary = vuln
        .summary
        .as_deref()
        .unwrap_or("known vulnerability")
        .chars()
        .take(600)
        .collect::<String>();
    let message = format!("{}: {} ({}@{})", vuln.id, summary, pkg.name, pkg.version);
    let evidence = vuln
        .details
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(200)
        .collect();

    // The advisory id as subtype keeps distinct advisories for one manifest
    // from collapsing in the aggregator's location-based dedup.
    Issue {
        id: Issue::new_id(),
        category: Category::Dependency,
        subtype: vuln.id.chars().take(50).collect(),
        severity: severity_from_advisory(vuln),
        confidence: 0.95,
        file_path: manifest_path.to_string(),
        line_start: 1,
        line_end: 1,
        message: message.chars().take(900).collect(),
        evidence,
        suggested_fix: None,
        patch: None,
        cwe: None,
        owasp_tag: None,
        source_tool: Some("osv".to_string()),
        is_llm_generated: false,
    }
}
