// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat-completions provider.
//!
//! One implementation covers three deployment shapes: api.openai.com, Azure
//! OpenAI (deployment-scoped URL, `api-key` header), and any self-hosted
//! OpenAI-compatible gateway (custom base URL, optional key).

use super::{parse, prompt, ChunkAnalysis, LlmProvider, RagContext};
use crate::diff::chunker::Chunk;
use crate::retry::{retry, RetryConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const AZURE_API_VERSION: &str = "2024-02-15-preview";

pub struct OpenAiProvider {
    label: &'static str,
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
    azure: bool,
    model: String,
    max_tokens: u32,
    retry: RetryConfig,
}

impl OpenAiProvider {
    pub fn new(
        label: &'static str,
        base_url: Option<String>,
        azure_deployment: Option<String>,
        api_key: Option<String>,
        model: String,
        max_tokens: u32,
    ) -> Self {
        let url = endpoint_url(base_url.as_deref(), azure_deployment.as_deref());
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            label,
            http,
            url,
            api_key,
            azure: azure_deployment.is_some(),
            model,
            max_tokens,
            retry: RetryConfig::default(),
        }
    }
}

/// Resolve the chat-completions URL for the three deployment shapes.
fn endpoint_url(base_url: Option<&str>, azure_deployment: Option<&str>) -> String {
    let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
    if let Some(deployment) = azure_deployment {
        return format!(
            "{base}/openai/deployments/{deployment}/chat/completions?api-version={AZURE_API_VERSION}"
        );
    }
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn label(&self) -> &'static str {
        self.label
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn analyze(
        &self,
        chunk: &Chunk,
        context: &RagContext,
        pr_title: &str,
        pr_body: &str,
    ) -> Result<ChunkAnalysis> {
        let user_prompt = prompt::build_user_prompt(chunk, context, pr_title, pr_body);
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt::SYSTEM_PROMPT},
                {"role": "user", "content": user_prompt},
            ],
            "max_tokens": self.max_tokens,
            "temperature": 0.2,
        });

        let response: serde_json::Value = retry(&self.retry, "llm chat completion", || async {
            let mut req = self.http.post(&self.url).json(&body);
            req = match (&self.api_key, self.azure) {
                (Some(key), true) => req.header("api-key", key),
                (Some(key), false) => req.bearer_auth(key),
                (None, _) => req,
            };
            let resp = req.send().await.context("sending chat completion")?;
            if !resp.status().is_success() {
                anyhow::bail!("chat completion returned {}", resp.status());
            }
            resp.json().await.context("decoding chat completion")
        })
        .await?;

        let text = response
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|a| a.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let tokens_used = response
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let model = response
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.model)
            .to_string();

        let source_tool = format!("llm-{}", self.label);
        let issues = parse::parse_response(text, &chunk.file_paths, &source_tool);
        debug!(
            chunk = chunk.index,
            issues = issues.len(),
            tokens_used,
            "chunk analyzed"
        );

        Ok(ChunkAnalysis {
            issues,
            model,
            tokens_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_url_appends_v1() {
        assert_eq!(
            endpoint_url(None, None),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn custom_base_already_versioned() {
        assert_eq!(
            endpoint_url(Some("https://gw.internal/v1"), None),
            "https://gw.internal/v1/chat/completions"
        );
        assert_eq!(
            endpoint_url(Some("http://localhost:11434/"), None),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn azure_deployment_url_convention() {
        assert_eq!(
            endpoint_url(Some("https://corp.openai.azure.com"), Some("gpt4o-review")),
            "https://corp.openai.azure.com/openai/deployments/gpt4o-review/chat/completions?api-version=2024-02-15-preview"
        );
    }
}
