// Canned provider used when no backend credentials are configured
use anyhow::Result;

use super::{ChatMessage, LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

const MOCK_SUMMARY: &str = "The discussion reveals a heated debate about the latest technology trends, \
with users expressing strong opinions on both sides. While there's no clear consensus, most participants \
agree that the topic warrants further investigation. The overall tone is passionate yet constructive, \
with users sharing personal experiences and technical insights.";

const MOCK_ANALYSIS: &str = r#"{
  "sentiment_overall": "mixed",
  "sentiment_score": 0.2,
  "top_keywords": ["technology", "debate", "opinions", "trends", "experience", "insights", "consensus", "investigation", "scalability", "implementation"],
  "toxicity_ratio": 0.15,
  "controversy_score": 0.6,
  "themes": ["Technology trends discussion", "User experience sharing", "Technical insights exchange", "Implementation challenges"],
  "key_opinions": ["Technology shows promise but needs more testing", "Concerns about scalability and long-term viability", "Positive sentiment from early adopters"],
  "emotion_breakdown": {"angry": 10, "happy": 25, "sad": 5, "fearful": 15, "surprised": 45}
}"#;

const MOCK_VERDICT: &str = "Decision: FINE\nConfidence: 0.85\nReason: The thread stays on topic and \
participants disagree civilly; nothing here breaks community or platform rules.";

const MOCK_LABEL: &str = r#"{"label": "FINE", "reason": "On-topic and civil."}"#;

const MOCK_NARRATION: &str = "Members have recently been debating a handful of recurring topics, \
and moderators have stepped in only occasionally.";

const MOCK_DEFAULT: &str = "This is a mock response for demo purposes. The actual AI analysis would \
appear here with a configured provider API key.";

/// Deterministic stand-in for a model: replies depend only on the last message
#[derive(Debug, Default, Clone)]
pub struct MockLlmProvider;

impl MockLlmProvider {
    pub fn new() -> Self {
        Self
    }

    /// Pick the canned reply matching the kind of request in `messages`
    pub fn respond(messages: &[ChatMessage]) -> &'static str {
        let last = messages
            .last()
            .map(|m| m.content.to_lowercase())
            .unwrap_or_default();

        if last.contains("\"label\"") {
            MOCK_LABEL
        } else if last.contains("moderation decision") {
            MOCK_VERDICT
        } else if last.contains("community memory") {
            MOCK_NARRATION
        } else if last.contains("summary") || last.contains("summarize") {
            MOCK_SUMMARY
        } else if last.contains("json") || last.contains("analysis") {
            MOCK_ANALYSIS
        } else {
            MOCK_DEFAULT
        }
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        Ok(LlmResponse {
            content: Self::respond(&request.messages).to_string(),
            usage: UsageMetadata::default(),
            model: "mock".to_string(),
        })
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn is_mock(&self) -> bool {
        true
    }
}
