use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ChatMessage, LlmProvider, LlmRequest, LlmResponse, UsageMetadata};
use crate::error::ThreadSenseError;

/// Supported remote backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// OpenAI-compatible endpoint that may answer with an SSE stream
    JanitorAi,
    OpenAi,
    Anthropic,
    Gemini,
}

impl ProviderKind {
    /// Order in which providers are tried when none is named explicitly
    pub const PREFERENCE: [ProviderKind; 4] = [
        ProviderKind::JanitorAi,
        ProviderKind::Anthropic,
        ProviderKind::OpenAi,
        ProviderKind::Gemini,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "janitorai" | "janitor" => Some(Self::JanitorAi),
            "openai" => Some(Self::OpenAi),
            "anthropic" | "claude" => Some(Self::Anthropic),
            "gemini" | "google" => Some(Self::Gemini),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JanitorAi => "janitorai",
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
        }
    }

    pub fn default_url(&self) -> &'static str {
        match self {
            Self::JanitorAi => "https://janitorai.com/hackathon/completions",
            Self::OpenAi => "https://api.openai.com/v1/chat/completions",
            Self::Anthropic => "https://api.anthropic.com/v1/messages",
            Self::Gemini => {
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent"
            }
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            // Janitor overwrites the model server-side
            Self::JanitorAi => "x2",
            Self::OpenAi => "gpt-3.5-turbo",
            Self::Anthropic => "claude-3-haiku-20240307",
            Self::Gemini => "gemini-pro",
        }
    }

    pub fn default_key_env(&self) -> &'static str {
        match self {
            Self::JanitorAi => "JANITOR_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }
}

/// Remote LLM provider speaking one of the supported wire formats
pub struct RemoteLlmProvider {
    kind: ProviderKind,
    base_url: String,
    api_key: String,
    model: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    default_temperature: f32,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        kind: ProviderKind,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            default_timeout: Duration::from_secs(60),
            default_max_tokens: 250,
            default_temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: usize, temperature: f32) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self.default_temperature = temperature;
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn build_request(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: usize,
        temperature: f32,
    ) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(&self.base_url)
            .header("Content-Type", "application/json");

        match self.kind {
            ProviderKind::JanitorAi => builder
                // Janitor expects the bare key, no Bearer prefix
                .header("Authorization", self.api_key.as_str())
                .json(&OpenAiRequest {
                    model: self.model.clone(),
                    messages,
                    max_tokens: Some(max_tokens),
                    temperature: Some(temperature),
                    stream: Some(false),
                }),
            ProviderKind::OpenAi => builder
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&OpenAiRequest {
                    model: self.model.clone(),
                    messages,
                    max_tokens: Some(max_tokens),
                    temperature: Some(temperature),
                    stream: None,
                }),
            ProviderKind::Anthropic => builder
                .header("x-api-key", self.api_key.as_str())
                .header("anthropic-version", "2023-06-01")
                .json(&AnthropicRequest {
                    model: self.model.clone(),
                    max_tokens,
                    messages: vec![ChatMessage::user(fold_for_anthropic(&messages))],
                }),
            ProviderKind::Gemini => builder
                .query(&[("key", self.api_key.as_str())])
                .json(&GeminiRequest {
                    contents: vec![GeminiContent {
                        parts: vec![GeminiPart {
                            text: fold_for_gemini(&messages),
                        }],
                    }],
                    generation_config: GeminiGenerationConfig {
                        temperature,
                        max_output_tokens: max_tokens,
                    },
                }),
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);
        let max_tokens = request.max_tokens.unwrap_or(self.default_max_tokens);
        let temperature = request.temperature.unwrap_or(self.default_temperature);

        let response = tokio::time::timeout(
            timeout,
            self.build_request(request.messages, max_tokens, temperature).send(),
        )
        .await
        .context("LLM request timed out")?
        .context("LLM HTTP request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ThreadSenseError::Transport {
                service: self.kind.name(),
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            }
            .into());
        }

        let body = tokio::time::timeout(timeout, response.text())
            .await
            .context("LLM response body timed out")?
            .context("Failed to read LLM response body")?;
        debug!(provider = self.kind.name(), bytes = body.len(), "LLM reply received");

        let (content, usage, model) = ProviderResponse::decode(self.kind, &body)?.into_parts();

        Ok(LlmResponse {
            content,
            usage,
            model: model.unwrap_or_else(|| self.model.clone()),
        })
    }

    fn name(&self) -> &str {
        self.kind.name()
    }
}

/// Anthropic gets the last system and user turns folded into one user message
fn fold_for_anthropic(messages: &[ChatMessage]) -> String {
    let last = |role: &str| {
        messages
            .iter()
            .rev()
            .find(|m| m.role == role)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    };
    let (system, user) = (last("system"), last("user"));
    if system.is_empty() {
        user.to_string()
    } else {
        format!("{}\n\n{}", system, user)
    }
}

/// Gemini gets a flat System/User transcript
fn fold_for_gemini(messages: &[ChatMessage]) -> String {
    let mut content = String::new();
    for msg in messages {
        match msg.role.as_str() {
            "system" => content.push_str(&format!("System: {}\n\n", msg.content)),
            "user" => content.push_str(&format!("User: {}\n\n", msg.content)),
            _ => {}
        }
    }
    content
}

/// Provider reply decoded by wire format, normalized through `into_parts`
#[derive(Debug)]
enum ProviderResponse {
    OpenAi(OpenAiResponse),
    JanitorStream(String),
    /// Janitor answered with neither SSE nor chat-completion JSON; the body is the text
    JanitorPlain(String),
    Anthropic(AnthropicResponse),
    Gemini(GeminiResponse),
}

impl ProviderResponse {
    fn decode(kind: ProviderKind, body: &str) -> Result<Self> {
        match kind {
            ProviderKind::JanitorAi => {
                if body.trim_start().starts_with("data:") {
                    let text = collect_sse_content(body);
                    if text.is_empty() {
                        anyhow::bail!("Janitor AI stream carried no content");
                    }
                    Ok(Self::JanitorStream(text))
                } else {
                    match serde_json::from_str::<OpenAiResponse>(body) {
                        Ok(parsed) => Ok(Self::OpenAi(parsed)),
                        Err(_) if !body.trim().is_empty() => Ok(Self::JanitorPlain(body.to_string())),
                        Err(e) => Err(anyhow::Error::new(e).context("Empty response from Janitor AI")),
                    }
                }
            }
            ProviderKind::OpenAi => serde_json::from_str(body)
                .map(Self::OpenAi)
                .context("Failed to parse OpenAI response"),
            ProviderKind::Anthropic => serde_json::from_str(body)
                .map(Self::Anthropic)
                .context("Failed to parse Anthropic response"),
            ProviderKind::Gemini => serde_json::from_str(body)
                .map(Self::Gemini)
                .context("Failed to parse Gemini response"),
        }
    }

    fn into_parts(self) -> (String, UsageMetadata, Option<String>) {
        match self {
            Self::OpenAi(resp) => {
                let content = resp
                    .choices
                    .into_iter()
                    .next()
                    .map(|c| c.message.content)
                    .unwrap_or_default();
                let usage = resp.usage.map(Usage::into_metadata).unwrap_or_default();
                (content, usage, resp.model)
            }
            Self::JanitorStream(text) => (text.trim().to_string(), UsageMetadata::default(), None),
            Self::JanitorPlain(text) => (text, UsageMetadata::default(), None),
            Self::Anthropic(resp) => {
                let content = resp
                    .content
                    .into_iter()
                    .filter_map(|block| block.text)
                    .collect::<Vec<_>>()
                    .join("");
                let usage = resp
                    .usage
                    .map(|u| UsageMetadata {
                        prompt_tokens: u.input_tokens,
                        completion_tokens: u.output_tokens,
                        total_tokens: u.input_tokens + u.output_tokens,
                    })
                    .unwrap_or_default();
                (content, usage, resp.model)
            }
            Self::Gemini(resp) => {
                let content = resp
                    .candidates
                    .into_iter()
                    .next()
                    .map(|c| {
                        c.content
                            .parts
                            .into_iter()
                            .map(|p| p.text)
                            .collect::<Vec<_>>()
                            .join("")
                    })
                    .unwrap_or_default();
                let usage = resp
                    .usage_metadata
                    .map(|u| UsageMetadata {
                        prompt_tokens: u.prompt_token_count,
                        completion_tokens: u.candidates_token_count,
                        total_tokens: u.total_token_count,
                    })
                    .unwrap_or_default();
                (content, usage, None)
            }
        }
    }
}

/// Concatenate the text carried by `data:` lines of an SSE body, skipping `[DONE]`
/// and lines that aren't JSON.
fn collect_sse_content(body: &str) -> String {
    let mut full = String::new();
    for line in body.lines().map(str::trim) {
        let Some(payload) = line.strip_prefix("data:") else {
            continue;
        };
        let payload = payload.trim();
        if payload.is_empty() || payload.contains("[DONE]") {
            continue;
        }
        let Ok(chunk) = serde_json::from_str::<StreamChunk>(payload) else {
            continue;
        };
        if let Some(content) = chunk.content {
            full.push_str(&content);
        } else if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.and_then(|d| d.content) {
                full.push_str(&text);
            }
            if let Some(text) = choice.message.and_then(|m| m.content) {
                full.push_str(&text);
            }
        }
    }
    full
}

// OpenAI-compatible request/response structures (OpenAI, Janitor AI)
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<usize>,
    #[serde(default)]
    completion_tokens: Option<usize>,
    #[serde(default)]
    total_tokens: Option<usize>,
}

impl Usage {
    fn into_metadata(self) -> UsageMetadata {
        UsageMetadata {
            prompt_tokens: self.prompt_tokens.unwrap_or(0),
            completion_tokens: self.completion_tokens.unwrap_or(0),
            total_tokens: self.total_tokens.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    message: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

// Anthropic messages API
#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<AnthropicBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: usize,
    #[serde(default)]
    output_tokens: usize,
}

// Gemini generateContent API
#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "usageMetadata", default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
    #[serde(default)]
    total_token_count: usize,
}
