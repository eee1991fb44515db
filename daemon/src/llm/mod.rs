// SPDX-License-Identifier: MIT
//! LLM analyzer — pluggable provider capability over chat-completion APIs.
//!
//! A provider receives one diff [`Chunk`] plus sanitized PR metadata and
//! repository context, and returns validated [`Issue`]s. Three concrete
//! backends: an OpenAI-compatible endpoint (covers Azure deployment URLs and
//! self-hosted gateways), the Anthropic messages API, and a local
//! OpenAI-compatible server. The set is closed and selected at startup.

pub mod anthropic;
pub mod openai;
pub mod parse;
pub mod prompt;

use crate::diff::chunker::Chunk;
use crate::review::model::Issue;
use anyhow::Result;
use async_trait::async_trait;

/// Repository documents retrieved for prompt context, each already
/// truncated by the fetcher.
#[derive(Debug, Clone, Default)]
pub struct RagContext {
    pub readme: Option<String>,
    pub contributing: Option<String>,
    pub lint_config: Option<String>,
}

/// Result of analyzing one chunk.
#[derive(Debug, Clone)]
pub struct ChunkAnalysis {
    pub issues: Vec<Issue>,
    pub model: String,
    pub tokens_used: u64,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider label, used in `source_tool` as `llm-<label>`.
    fn label(&self) -> &'static str;

    /// Model identifier reported in review stats.
    fn model(&self) -> &str;

    async fn analyze(
        &self,
        chunk: &Chunk,
        context: &RagContext,
        pr_title: &str,
        pr_body: &str,
    ) -> Result<ChunkAnalysis>;
}

/// Which backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Local,
}

impl ProviderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "anthropic" => Some(ProviderKind::Anthropic),
            "local" => Some(ProviderKind::Local),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: ProviderKind,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: String,
    /// Azure OpenAI deployment name; switches the URL convention.
    pub azure_deployment: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
    pub local_base_url: String,
    pub local_model: String,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            openai_api_key: None,
            openai_base_url: None,
            openai_model: "gpt-4o".to_string(),
            azure_deployment: None,
            anthropic_api_key: None,
            anthropic_model: "claude-sonnet-4-20250514".to_string(),
            local_base_url: "http://localhost:11434".to_string(),
            local_model: "qwen2.5-coder".to_string(),
            max_tokens: 4096,
        }
    }
}

/// Construct the configured provider. Fails at startup when the selected
/// backend is missing its API key.
pub fn build_provider(config: &LlmConfig) -> Result<Box<dyn LlmProvider>> {
    match config.provider {
        ProviderKind::OpenAi => {
            let key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is required for provider openai"))?;
            Ok(Box::new(openai::OpenAiProvider::new(
                "openai",
                config.openai_base_url.clone(),
                config.azure_deployment.clone(),
                Some(key),
                config.openai_model.clone(),
                config.max_tokens,
            )))
        }
        ProviderKind::Anthropic => {
            let key = config.anthropic_api_key.clone().ok_or_else(|| {
                anyhow::anyhow!("ANTHROPIC_API_KEY is required for provider anthropic")
            })?;
            Ok(Box::new(anthropic::AnthropicProvider::new(
                key,
                config.anthropic_model.clone(),
                config.max_tokens,
            )))
        }
        ProviderKind::Local => Ok(Box::new(openai::OpenAiProvider::new(
            "local",
            Some(config.local_base_url.clone()),
            None,
            None,
            config.local_model.clone(),
            config.max_tokens,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parsing() {
        assert_eq!(ProviderKind::parse("openai"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("Anthropic"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::parse("LOCAL"), Some(ProviderKind::Local));
        assert_eq!(ProviderKind::parse("mystery"), None);
    }

    #[test]
    fn openai_provider_requires_key() {
        let config = LlmConfig::default();
        assert!(build_provider(&config).is_err());

        let config = LlmConfig {
            openai_api_key: Some("sk-test".to_string()),
            ..LlmConfig::default()
        };
        let provider = build_provider(&config).expect("provider");
        assert_eq!(provider.label(), "openai");
    }

    #[test]
    fn local_provider_needs_no_key() {
        let config = LlmConfig {
            provider: ProviderKind::Local,
            ..LlmConfig::default()
        };
        let provider = build_provider(&config).expect("provider");
        assert_eq!(provider.label(), "local");
        assert_eq!(provider.model(), "qwen2.5-coder");
    }
}
