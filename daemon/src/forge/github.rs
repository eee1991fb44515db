// SPDX-License-Identifier: MIT
//! GitHub App client: RS256 app JWTs, cached installation tokens, and the
//! REST calls behind the [`ForgeClient`] capability.

use super::{CheckOutcome, ForgeClient, InlineComment, PrDetails, PrRef, ReviewSubmission};
use crate::retry::{retry, RetryConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

const USER_AGENT: &str = concat!("reviewd/", env!("CARGO_PKG_VERSION"));
const JSON_MEDIA: &str = "application/vnd.github+json";
const DIFF_MEDIA: &str = "application/vnd.github.v3.diff";

/// Minimum remaining validity for a cached installation token to be reused.
const TOKEN_FRESHNESS: i64 = 60;

#[derive(Debug, Clone)]
pub struct GithubConfig {
    pub api_url: String,
    pub app_id: u64,
    /// PEM-encoded RSA private key of the GitHub App.
    pub private_key_pem: String,
}

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Usable only with at least [`TOKEN_FRESHNESS`] seconds left.
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - now >= ChronoDuration::seconds(TOKEN_FRESHNESS)
    }
}

pub struct GithubClient {
    http: reqwest::Client,
    api_url: String,
    app_id: u64,
    encoding_key: EncodingKey,
    /// Process-wide installation-token cache, keyed by installation id.
    tokens: RwLock<HashMap<u64, CachedToken>>,
    retry: RetryConfig,
}

impl GithubClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(config.private_key_pem.as_bytes())
            .context("parsing app private key (RSA PEM)")?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("building http client")?;
        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            app_id: config.app_id,
            encoding_key,
            tokens: RwLock::new(HashMap::new()),
            retry: RetryConfig::default(),
        })
    }

    /// Mint the short-lived app JWT: `iat` backdated 60 s for clock skew,
    /// `exp` ten minutes out, `iss` the app id.
    fn app_jwt(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 600,
            iss: self.app_id.to_string(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .context("signing app JWT")
    }

    /// An installation access token, from cache when fresh enough.
    async fn installation_token(&self, installation_id: u64) -> Result<String> {
        let now = Utc::now();
        {
            let cache = self.tokens.read().await;
            if let Some(entry) = cache.get(&installation_id) {
                if entry.is_fresh(now) {
                    return Ok(entry.token.clone());
                }
            }
        }

        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
            expires_at: DateTime<Utc>,
        }

        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{installation_id}/access_tokens",
            self.api_url
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(jwt)
            .header("Accept", JSON_MEDIA)
            .send()
            .await
            .context("requesting installation token")?;
        if !resp.status().is_success() {
            anyhow::bail!("installation token request returned {}", resp.status());
        }
        let minted: TokenResponse = resp.json().await.context("decoding token response")?;
        debug!(installation_id, "minted installation token");

        let mut cache = self.tokens.write().await;
        cache.insert(
            installation_id,
            CachedToken {
                token: minted.token.clone(),
                expires_at: minted.expires_at,
            },
        );
        Ok(minted.token)
    }

    fn pull_url(&self, pr: &PrRef) -> String {
        format!(
            "{}/repos/{}/{}/pulls/{}",
            self.api_url, pr.owner, pr.repo, pr.number
        )
    }
}

#[async_trait]
impl ForgeClient for GithubClient {
    async fn fetch_pr(&self, pr: &PrRef) -> Result<PrDetails> {
        let token = self.installation_token(pr.installation_id).await?;
        let resp = self
            .http
            .get(self.pull_url(pr))
            .bearer_auth(&token)
            .header("Accept", JSON_MEDIA)
            .send()
            .await
            .context("fetching pull request")?;
        if !resp.status().is_success() {
            anyhow::bail!("pull request fetch returned {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await.context("decoding pull request")?;
        Ok(PrDetails {
            title: body
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            body: body
                .get("body")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            head_sha: body
                .get("head")
                .and_then(|h| h.get("sha"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            draft: body.get("draft").and_then(|v| v.as_bool()).unwrap_or(false),
            changed_files: body
                .get("changed_files")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
    }

    async fn fetch_diff(&self, pr: &PrRef) -> Result<String> {
        let token = self.installation_token(pr.installation_id).await?;
        retry(&self.retry, "diff fetch", || async {
            let resp = self
                .http
                .get(self.pull_url(pr))
                .bearer_auth(&token)
                .header("Accept", DIFF_MEDIA)
                .send()
                .await
                .context("fetching diff")?;
            if !resp.status().is_success() {
                anyhow::bail!("diff fetch returned {}", resp.status());
            }
            resp.text().await.context("reading diff body")
        })
        .await
    }

    async fn fetch_file(&self, pr: &PrRef, path: &str, git_ref: &str) -> Result<Option<String>> {
        let token = self.installation_token(pr.installation_id).await?;
        let url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.api_url, pr.owner, pr.repo, path
        );
        let resp = self
            .http
            .get(&url)
            .query(&[("ref", git_ref)])
            .bearer_auth(&token)
            .header("Accept", JSON_MEDIA)
            .send()
            .await
            .with_context(|| format!("fetching contents of {path}"))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            anyhow::bail!("contents fetch for {path} returned {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await.context("decoding contents")?;
        let Some(encoded) = body.get("content").and_then(|v| v.as_str()) else {
            return Ok(None); // directories and submodules have no content field
        };
        let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(cleaned)
            .context("decoding base64 contents")?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn post_review(&self, pr: &PrRef, review: &ReviewSubmission) -> Result<()> {
        let token = self.installation_token(pr.installation_id).await?;
        let url = format!("{}/reviews", self.pull_url(pr));
        let comments: Vec<serde_json::Value> = review
            .comments
            .iter()
            .map(|c: &InlineComment| {
                json!({
                    "path": c.path,
                    "line": c.line,
                    "side": "RIGHT",
                    "body": c.body,
                })
            })
            .collect();
        let payload = json!({
            "commit_id": review.commit_id,
            "body": review.body,
            "event": review.event.as_str(),
            "comments": comments,
        });

        retry(&self.retry, "review post", || async {
            let resp = self
                .http
                .post(&url)
                .bearer_auth(&token)
                .header("Accept", JSON_MEDIA)
                .json(&payload)
                .send()
                .await
                .context("posting review")?;
            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                anyhow::bail!("review post returned {status}: {body}");
            }
            Ok(())
        })
        .await
    }

    async fn create_check_run(&self, pr: &PrRef, head_sha: &str) -> Result<u64> {
        let token = self.installation_token(pr.installation_id).await?;
        let url = format!("{}/repos/{}/{}/check-runs", self.api_url, pr.owner, pr.repo);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .header("Accept", JSON_MEDIA)
            .json(&json!({
                "name": "reviewd",
                "head_sha": head_sha,
                "status": "in_progress",
            }))
            .send()
            .await
            .context("creating check run")?;
        if !resp.status().is_success() {
            anyhow::bail!("check run creation returned {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await.context("decoding check run")?;
        body.get("id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow::anyhow!("check run response lacked an id"))
    }

    async fn update_check_run(
        &self,
        pr: &PrRef,
        check_run_id: u64,
        outcome: &CheckOutcome,
    ) -> Result<()> {
        let token = self.installation_token(pr.installation_id).await?;
        let url = format!(
            "{}/repos/{}/{}/check-runs/{check_run_id}",
            self.api_url, pr.owner, pr.repo
        );
        let conclusion = if outcome.success { "success" } else { "failure" };
        let resp = self
            .http
            .patch(&url)
            .bearer_auth(&token)
            .header("Accept", JSON_MEDIA)
            .json(&json!({
                "status": "completed",
                "conclusion": conclusion,
                "output": {
                    "title": outcome.title,
                    "summary": outcome.summary,
                },
            }))
            .send()
            .await
            .context("updating check run")?;
        if !resp.status().is_success() {
            anyhow::bail!("check run update returned {}", resp.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_token_freshness_window() {
        let now = Utc::now();
        let fresh = CachedToken {
            token: "t".to_string(),
            expires_at: now + ChronoDuration::seconds(120),
        };
        let stale = CachedToken {
            token: "t".to_string(),
            expires_at: now + ChronoDuration::seconds(30),
        };
        let expired = CachedToken {
            token: "t".to_string(),
            expires_at: now - ChronoDuration::seconds(1),
        };
        assert!(fresh.is_fresh(now));
        assert!(!stale.is_fresh(now), "under 60s of validity is not reusable");
        assert!(!expired.is_fresh(now));
    }

    #[test]
    fn app_claims_shape() {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 600,
            iss: "12345".to_string(),
        };
        let value = serde_json::to_value(&claims).expect("serialize");
        assert_eq!(value["iss"], "12345");
        assert_eq!(value["exp"].as_i64().unwrap() - value["iat"].as_i64().unwrap(), 660);
    }
}
