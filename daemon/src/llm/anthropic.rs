// SPDX-License-Identifier: MIT
//! Anthropic messages-API provider.

use super::{parse, prompt, ChunkAnalysis, LlmProvider, RagContext};
use crate::diff::chunker::Chunk;
use crate::retry::{retry, RetryConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
    max_tokens: u32,
    retry: RetryConfig,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, max_tokens: u32) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            http,
            api_key,
            model,
            max_tokens,
            retry: RetryConfig::default(),
        }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn label(&self) -> &'static str {
        "anthropic"
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
            "max_tokens": self.max_tokens,
            "system": prompt::SYSTEM_PROMPT,
            "messages": [
                {"role": "user", "content": user_prompt},
            ],
        });

        let response: serde_json::Value = retry(&self.retry, "llm messages call", || async {
            let resp = self
                .http
                .post(API_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
                .send()
                .await
                .context("sending messages request")?;
            if !resp.status().is_success() {
                anyhow::bail!("messages request returned {}", resp.status());
            }
            resp.json().await.context("decoding messages response")
        })
        .await?;

        let text = response
            .get("content")
            .and_then(|c| c.as_array())
            .and_then(|blocks| {
                blocks
                    .iter()
                    .find(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            })
            .and_then(|b| b.get("text"))
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let usage = response.get("usage");
        let tokens_used = usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + usage
                .and_then(|u| u.get("output_tokens"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
        let model = response
            .get("model")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.model)
            .to_string();

        let issues = parse::parse_response(text, &chunk.file_paths, "llm-anthropic");
        Ok(ChunkAnalysis {
            issues,
            model,
            tokens_used,
        })
    }
}
