// SPDX-License-Identifier: MIT
//! OSV-style vulnerability database client.

use super::manifest::Package;
use crate::review::model::Severity;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One advisory returned for a package query.
#[derive(Debug, Clone, Deserialize)]
pub struct Advisory {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub severity: Vec<SeverityEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeverityEntry {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// Score dialects vary by feed: a bare number, a numeric string, or a
    /// CVSS vector. Kept raw and interpreted in [`severity_from_advisory`].
    #[serde(default)]
    pub score: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    vulns: Vec<Advisory>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    package: QueryPackage<'a>,
    version: &'a str,
}

#[derive(Debug, Serialize)]
struct QueryPackage<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

pub struct OsvClient {
    http: reqwest::Client,
    base_url: String,
}

impl OsvClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    /// `POST /v1/query` for a single package.
    pub async fn query(&self, pkg: &Package) -> Result<Vec<Advisory>> {
        let url = format!("{}/v1/query", self.base_url.trim_end_matches('/'));
        let body = QueryRequest {
            package: QueryPackage {
                name: &pkg.name,
                ecosystem: pkg.ecosystem.as_osv(),
            },
            version: &pkg.version,
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("osv query for {}", pkg.name))?;

        if !resp.status().is_success() {
            anyhow::bail!("osv query for {} returned {}", pkg.name, resp.status());
        }

        let parsed: QueryResponse = resp.json().await.context("decoding osv response")?;
        Ok(parsed.vulns)
    }
}

/// Derive a severity from the first advisory entry carrying a parseable
/// numeric score: ≥9 critical, ≥7 high, ≥4 medium, else low. Advisories
/// without one (or with only CVSS vector strings) default to medium.
pub fn severity_from_advisory(advisory: &Advisory) -> Severity {
    for entry in &advisory.severity {
        let score = match &entry.score {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        if let Some(score) = score.filter(|s| s.is_finite()) {
            return if score >= 9.0 {
                Severity::Critical
            } else if score >= 7.0 {
                Severity::High
            } else if score >= 4.0 {
                Severity::Medium
            } else {
                Severity::Low
            };
        }
    }
    Severity::Medium
}
