use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};

use super::{Decision, Verdict};
use crate::llm::{ChatMessage, LlmProvider};
use crate::moderation::TopicRouter;

pub const DEFAULT_AGENT_MAX_TOKENS: usize = 300;
const THREAD_TEXT_MAX_COMMENTS: usize = 60;
const THREAD_TEXT_MAX_CHARS: usize = 8000;

static CONFIDENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"confidence[^0-9]{0,24}(\d+(?:\.\d+)?)\s*(%)?").unwrap());

/// Opaque conversational agent: one message in, free text out
#[async_trait::async_trait]
pub trait AgentGateway: Send + Sync {
    async fn send(&self, agent_id: &str, message: &str, max_tokens: usize) -> Result<String>;
}

/// Agents backed by an LLM provider, each agent's persona used as the system prompt
pub struct LlmAgentGateway {
    provider: Arc<dyn LlmProvider>,
    personas: HashMap<String, String>,
}

impl LlmAgentGateway {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            personas: HashMap::new(),
        }
    }

    /// Register every agent the router knows about
    pub fn from_router(provider: Arc<dyn LlmProvider>, router: &TopicRouter) -> Self {
        let mut gateway = Self::new(provider);
        for key in router.keys() {
            let profile = router.profile(key);
            gateway
                .personas
                .insert(profile.agent_id.clone(), profile.persona.clone());
        }
        gateway
    }

}

#[async_trait::async_trait]
impl AgentGateway for LlmAgentGateway {
    async fn send(&self, agent_id: &str, message: &str, max_tokens: usize) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        match self.personas.get(agent_id) {
            Some(persona) => messages.push(ChatMessage::system(persona.clone())),
            None => debug!(agent_id, "no persona registered, sending bare message"),
        }
        messages.push(ChatMessage::user(message));
        self.provider.complete(messages, max_tokens).await
    }
}

/// Flatten a thread into the text handed to an agent
pub fn build_thread_text(title: &str, comments: &[String]) -> String {
    let mut text = format!("Thread title: {}\n\nComments:\n", title);
    for (i, comment) in comments.iter().take(THREAD_TEXT_MAX_COMMENTS).enumerate() {
        let line = format!("{}. {}\n", i + 1, comment.trim());
        if text.len() + line.len() > THREAD_TEXT_MAX_CHARS {
            break;
        }
        text.push_str(&line);
    }
    text
}

fn moderation_prompt(thread_text: &str, community: &str) -> String {
    format!(
        "Review the following Reddit thread from r/{community} and give your moderation decision.\n\n\
         {thread_text}\n\
         Answer with exactly one decision from FINE, NEEDS_WARNING or VIOLATION, \
         then a confidence between 0 and 1, then a short reason, in this form:\n\
         Decision: <FINE|NEEDS_WARNING|VIOLATION>\n\
         Confidence: <0.0-1.0>\n\
         Reason: <one or two sentences>"
    )
}

/// Ask one agent for its verdict on a thread. Transport failures become an
/// `ERROR` verdict; this never fails.
pub async fn moderate_with_agent<G: AgentGateway + ?Sized>(
    gateway: &G,
    agent_id: &str,
    thread_text: &str,
    community: &str,
    max_tokens: usize,
) -> Verdict {
    let prompt = moderation_prompt(thread_text, community);
    match gateway.send(agent_id, &prompt, max_tokens).await {
        Ok(reply) => {
            let decision = parse_decision(&reply);
            let confidence = parse_confidence(&reply);
            debug!(agent_id, community, ?decision, confidence, "agent verdict parsed");
            Verdict {
                community: community.to_string(),
                agent_id: agent_id.to_string(),
                decision,
                confidence,
                reason: reply.clone(),
                raw_response: reply,
            }
        }
        Err(e) => {
            warn!(agent_id, community, error = %e, "agent call failed, recording ERROR verdict");
            Verdict {
                community: community.to_string(),
                agent_id: agent_id.to_string(),
                decision: Decision::Error,
                confidence: 0.0,
                reason: format!("Agent error: {:#}", e),
                raw_response: String::new(),
            }
        }
    }
}

/// Case-insensitive substring search, strongest decision first
pub fn parse_decision(reply: &str) -> Decision {
    let upper = reply.to_uppercase();
    if upper.contains("VIOLATION") {
        Decision::Violation
    } else if upper.contains("NEEDS_WARNING") || upper.contains("WARNING") {
        Decision::NeedsWarning
    } else if upper.contains("FINE") || upper.contains("CLEAN") {
        Decision::Fine
    } else {
        Decision::Unknown
    }
}

/// Number following a `confidence` marker, in [0, 1]. Defaults to 0.5.
///
/// A trailing `%` or a value from 2 up to 100 is a percentage; values between 1 and 2
/// are clamped to 1.
pub fn parse_confidence(reply: &str) -> f64 {
    let lower = reply.to_lowercase();
    let Some(caps) = CONFIDENCE_RE.captures(&lower) else {
        return 0.5;
    };
    let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
        return 0.5;
    };
    let percent = caps.get(2).is_some();

    match value {
        v if !v.is_finite() => 0.5,
        v if percent || (2.0..=100.0).contains(&v) => (v / 100.0).clamp(0.0, 1.0),
        v => v.clamp(0.0, 1.0),
    }
}
