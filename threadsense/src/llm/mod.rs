use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::ThreadSenseError;
use common::LlmConfig;
use mock::MockLlmProvider;
use remote::{ProviderKind, RemoteLlmProvider};

pub mod mock;
pub mod remote;
pub mod summarizer;

/// Core trait for LLM providers (remote backends or the canned mock)
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion for an ordered message list
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;

    /// Short provider name for logs and health output
    fn name(&self) -> &str;

    /// True when replies are canned rather than model-generated
    fn is_mock(&self) -> bool {
        false
    }

    /// `complete(messages, max_tokens) -> text`, the capability everything else builds on
    async fn complete(&self, messages: Vec<ChatMessage>, max_tokens: usize) -> Result<String> {
        let response = self
            .generate(LlmRequest {
                messages,
                max_tokens: Some(max_tokens),
                temperature: None,
                timeout_seconds: None,
            })
            .await?;
        Ok(response.content)
    }
}

/// One chat turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request structure for LLM generation
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata, zero when the provider doesn't report it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Build the active provider from the `[llm]` section, reading API keys from the environment
pub fn provider_from_config(llm: Option<&LlmConfig>) -> Result<Arc<dyn LlmProvider>, ThreadSenseError> {
    provider_from_config_with(llm, |name| std::env::var(name).ok())
}

/// Provider selection with an injectable key lookup.
///
/// A named provider must have credentials; `mock` forces the canned provider; with no
/// name the first provider in [`ProviderKind::PREFERENCE`] holding a key wins, else the mock.
pub fn provider_from_config_with<F>(
    llm: Option<&LlmConfig>,
    lookup_key: F,
) -> Result<Arc<dyn LlmProvider>, ThreadSenseError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_config = LlmConfig::default();
    let llm = llm.unwrap_or(&default_config);

    let build = |kind: ProviderKind| -> Option<RemoteLlmProvider> {
        let endpoint = llm.endpoint(kind.name()).cloned().unwrap_or_default();
        let key_env = endpoint
            .api_key_env
            .clone()
            .unwrap_or_else(|| kind.default_key_env().to_string());
        let api_key = lookup_key(&key_env).filter(|k| !k.trim().is_empty())?;
        let url = endpoint
            .api_url
            .clone()
            .unwrap_or_else(|| kind.default_url().to_string());
        let model = endpoint
            .model
            .clone()
            .unwrap_or_else(|| kind.default_model().to_string());
        Some(
            RemoteLlmProvider::new(kind, url, api_key, model).with_defaults(
                endpoint.timeout_seconds.unwrap_or(60),
                endpoint.max_tokens.unwrap_or(250),
                endpoint.temperature.unwrap_or(0.3),
            ),
        )
    };

    match llm.provider.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(name) if name.eq_ignore_ascii_case("mock") => {
            info!("LLM provider forced to mock");
            Ok(Arc::new(MockLlmProvider::new()))
        }
        Some(name) => {
            let kind = ProviderKind::from_name(name).ok_or_else(|| {
                ThreadSenseError::configuration(format!("unknown LLM provider '{}'", name))
            })?;
            let provider = build(kind).ok_or_else(|| {
                ThreadSenseError::configuration(format!(
                    "LLM provider '{}' selected but no API key found",
                    kind.name()
                ))
            })?;
            info!(provider = kind.name(), "LLM provider initialized");
            Ok(Arc::new(provider))
        }
        None => {
            for kind in ProviderKind::PREFERENCE {
                if let Some(provider) = build(kind) {
                    info!(provider = kind.name(), "LLM provider initialized");
                    return Ok(Arc::new(provider));
                }
            }
            info!("no LLM credentials configured, using mock provider");
            Ok(Arc::new(MockLlmProvider::new()))
        }
    }
}

/// Helper to extract JSON from text that might contain markdown backticks or preamble
pub fn extract_json_from_text(text: &str) -> Option<String> {
    // 1. Try to find content between ```json and ```
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 2. Try to find content between ``` and ```
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 3. Try to find the first '{' and last '}'
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            return Some(text[start..=end].to_string());
        }
    }

    None
}
