// Thread summary and sentiment analysis prompt paths
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::{extract_json_from_text, ChatMessage, LlmProvider};

const SUMMARY_MAX_COMMENTS: usize = 150;
const ANALYSIS_MAX_COMMENTS: usize = 200;
pub const SUMMARY_MAX_TOKENS: usize = 250;
pub const ANALYSIS_MAX_TOKENS: usize = 400;

/// Structured sentiment analysis of a thread. Missing keys fall back to neutral values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadAnalysis {
    /// positive, neutral, negative or mixed
    pub sentiment_overall: String,
    /// -1 (very negative) to 1 (very positive)
    pub sentiment_score: f64,
    pub top_keywords: Vec<String>,
    pub toxicity_ratio: f64,
    pub controversy_score: f64,
    pub themes: Vec<String>,
    pub key_opinions: Vec<String>,
    /// Percentages keyed by emotion (angry, happy, sad, fearful, surprised)
    pub emotion_breakdown: BTreeMap<String, f64>,
}

impl Default for ThreadAnalysis {
    fn default() -> Self {
        Self {
            sentiment_overall: "neutral".to_string(),
            sentiment_score: 0.0,
            top_keywords: Vec::new(),
            toxicity_ratio: 0.0,
            controversy_score: 0.0,
            themes: Vec::new(),
            key_opinions: Vec::new(),
            emotion_breakdown: BTreeMap::new(),
        }
    }
}

/// Analysis as returned to callers: parsed, or the raw reply when it wasn't JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Analysis {
    Report(ThreadAnalysis),
    Raw { raw: String },
}

pub fn build_summary_prompt(comments: &[String]) -> Vec<ChatMessage> {
    let text = comments
        .iter()
        .take(SUMMARY_MAX_COMMENTS)
        .map(|c| format!("- {}", c))
        .collect::<Vec<_>>()
        .join("\n\n");
    let system = "You are ThreadSense, summarizing a Reddit discussion for a group.\n\
                  Output 3 concise sentences capturing: (1) main viewpoints, \
                  (2) any consensus/conflict, (3) overall tone. No usernames. No quotes.";
    let user = format!("Comments:\n{}\n\nNow produce the 3-sentence summary.", text);
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

pub fn build_analysis_prompt(comments: &[String]) -> Vec<ChatMessage> {
    let joined = comments
        .iter()
        .take(ANALYSIS_MAX_COMMENTS)
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    let system = "You analyze forum comments. Return a compact JSON with keys: \
        `sentiment_overall` in {positive,neutral,negative,mixed}, \
        `sentiment_score` (number -1 to 1, where -1=very negative, 0=neutral, 1=very positive), \
        `top_keywords` (array strings, max 10), \
        `toxicity_ratio` (0..1 rough estimate), \
        `controversy_score` (0..1, how divisive the discussion is), \
        `themes` (array of 3-5 short phrases), \
        `key_opinions` (array of 2-3 main viewpoints as short strings), \
        `emotion_breakdown` (object with percentages: angry, happy, sad, fearful, surprised). No extra text.";
    let user = format!("Comments:\n{}\n\nReturn ONLY the JSON.", joined);
    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Summarize a thread, falling back to an extractive summary when the provider fails
pub async fn summarize_thread<P: LlmProvider + ?Sized>(provider: &P, comments: &[String]) -> String {
    match provider
        .complete(build_summary_prompt(comments), SUMMARY_MAX_TOKENS)
        .await
    {
        Ok(summary) if !summary.trim().is_empty() => {
            info!(provider = provider.name(), comments = comments.len(), "thread summarized");
            summary.trim().to_string()
        }
        Ok(_) => {
            warn!("LLM returned an empty summary, falling back to extractive summary");
            extractive_summary(comments)
        }
        Err(e) => {
            warn!("LLM summarization failed: {}, falling back to extractive summary", e);
            extractive_summary(comments)
        }
    }
}

/// Analyze a thread; a provider failure yields the neutral default analysis
pub async fn analyze_thread<P: LlmProvider + ?Sized>(provider: &P, comments: &[String]) -> Analysis {
    match provider
        .complete(build_analysis_prompt(comments), ANALYSIS_MAX_TOKENS)
        .await
    {
        Ok(content) => parse_analysis(&content),
        Err(e) => {
            warn!("LLM analysis failed: {}, returning neutral analysis", e);
            Analysis::Report(ThreadAnalysis::default())
        }
    }
}

pub fn parse_analysis(content: &str) -> Analysis {
    extract_json_from_text(content)
        .and_then(|json| serde_json::from_str::<ThreadAnalysis>(&json).ok())
        .map(Analysis::Report)
        .unwrap_or_else(|| Analysis::Raw {
            raw: content.to_string(),
        })
}

/// Fallback summary when the LLM fails: the first three sentences of the thread
fn extractive_summary(comments: &[String]) -> String {
    let text = comments.join(" ");
    let sentences: Vec<String> = text
        .split(['.', '!', '?'])
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .take(3)
        .map(|s| format!("{}.", truncate(s, 200)))
        .collect();

    if sentences.is_empty() {
        "No comments found or thread unavailable.".to_string()
    } else {
        sentences.join(" ")
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len - 3).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmRequest, LlmResponse};

    struct FailingProvider;

    #[async_trait::async_trait]
    impl LlmProvider for FailingProvider {
        async fn generate(&self, _request: LlmRequest) -> anyhow::Result<LlmResponse> {
            anyhow::bail!("connection refused")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn comments() -> Vec<String> {
        vec![
            "First comment is the headline. It has two sentences.".to_string(),
            "Second comment agrees!".to_string(),
            "Third comment wonders why?".to_string(),
        ]
    }

    #[test]
    fn test_extractive_summary() {
        let summary = extractive_summary(&comments());
        assert_eq!(
            summary,
            "First comment is the headline. It has two sentences. Second comment agrees."
        );
        assert_eq!(extractive_summary(&[]), "No comments found or thread unavailable.");
    }

    #[test]
    fn test_extractive_summary_truncation() {
        let long = vec![format!("{}. Short.", "é".repeat(300))];
        let summary = extractive_summary(&long);
        let first = summary.split(". ").next().unwrap();
        assert!(first.ends_with("..."));
        assert_eq!(first.chars().count(), 200);
    }

    #[test]
    fn summary_prompt_caps_comment_count() {
        let many: Vec<String> = (0..300).map(|i| format!("comment {}", i)).collect();
        let prompt = build_summary_prompt(&many);
        assert_eq!(prompt.len(), 2);
        assert!(prompt[1].content.contains("- comment 149"));
        assert!(!prompt[1].content.contains("- comment 150"));

        let analysis = build_analysis_prompt(&many);
        assert!(analysis[1].content.contains("comment 199"));
        assert!(!analysis[1].content.contains("comment 200"));
    }

    #[test]
    fn analysis_parses_fenced_json_and_keeps_raw_text() {
        let parsed = parse_analysis("```json\n{\"sentiment_overall\": \"negative\", \"toxicity_ratio\": 0.4}\n```");
        match parsed {
            Analysis::Report(report) => {
                assert_eq!(report.sentiment_overall, "negative");
                assert_eq!(report.toxicity_ratio, 0.4);
                assert!(report.themes.is_empty());
            }
            other => panic!("expected report, got {:?}", other),
        }

        assert_eq!(
            parse_analysis("the vibe is fine"),
            Analysis::Raw {
                raw: "the vibe is fine".to_string()
            }
        );
    }

    #[tokio::test]
    async fn provider_failures_fall_back() {
        let summary = summarize_thread(&FailingProvider, &comments()).await;
        assert!(summary.starts_with("First comment is the headline."));

        let analysis = analyze_thread(&FailingProvider, &comments()).await;
        assert_eq!(analysis, Analysis::Report(ThreadAnalysis::default()));
    }
}
