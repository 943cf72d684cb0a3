//! Community moderation: topic routing, per-agent verdicts, verdict aggregation
//! and per-comment classification.
//!
//! A thread is routed to one specialist agent by its community name. The agent's
//! free-text reply is parsed into a [`Verdict`]; verdicts are combined into an
//! [`AggregateDecision`]; each comment then receives a [`CommentClassification`],
//! either from the agent itself or synthesized from the aggregate counts.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod agent;
pub mod aggregator;
pub mod classifier;
pub mod router;

pub use agent::{moderate_with_agent, AgentGateway, LlmAgentGateway};
pub use aggregator::{aggregate, comment_breakdown};
pub use classifier::{assign_labels_by_counts, classify_comments, compute_counts_from_classifications};
pub use router::{AgentProfile, TopicRouter, GENERAL_AGENT};

/// One agent's decision on a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Fine,
    NeedsWarning,
    Violation,
    Error,
    Unknown,
}

impl Decision {
    /// The comment label this decision is tallied under, if it is a known category
    pub fn label(self) -> Option<CommentLabel> {
        match self {
            Self::Fine => Some(CommentLabel::Fine),
            Self::NeedsWarning => Some(CommentLabel::NeedsWarning),
            Self::Violation => Some(CommentLabel::Violation),
            Self::Error => Some(CommentLabel::Error),
            Self::Unknown => None,
        }
    }
}

/// Label attached to a single comment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommentLabel {
    Violation,
    NeedsWarning,
    Fine,
    Error,
}

impl CommentLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Violation => "VIOLATION",
            Self::NeedsWarning => "NEEDS_WARNING",
            Self::Fine => "FINE",
            Self::Error => "ERROR",
        }
    }

    /// Strict parse of a label name (case-insensitive, `WARNING` accepted)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "VIOLATION" => Some(Self::Violation),
            "NEEDS_WARNING" | "WARNING" => Some(Self::NeedsWarning),
            "FINE" | "CLEAN" => Some(Self::Fine),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for CommentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One agent's opinion on a thread. Created per request and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(rename = "subreddit")]
    pub community: String,
    pub agent_id: String,
    pub decision: Decision,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub reason: String,
    pub raw_response: String,
}

/// Final ruling reported for a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinalDecision {
    // single-agent outcomes
    Violation,
    NeedsWarning,
    // multi-agent outcomes
    PlatformViolation,
    GlobalWarning,
    // either path
    Clean,
    Inconclusive,
    NoData,
}

impl FinalDecision {
    /// The agent decision a ruling stands for, used when spreading it over comments
    pub fn leading_decision(self) -> Decision {
        match self {
            Self::Violation | Self::PlatformViolation => Decision::Violation,
            Self::NeedsWarning | Self::GlobalWarning => Decision::NeedsWarning,
            Self::Clean => Decision::Fine,
            Self::Inconclusive | Self::NoData => Decision::Unknown,
        }
    }
}

/// Count per comment label
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictBreakdown {
    #[serde(rename = "VIOLATION")]
    pub violation: usize,
    #[serde(rename = "NEEDS_WARNING")]
    pub needs_warning: usize,
    #[serde(rename = "FINE")]
    pub fine: usize,
    #[serde(rename = "ERROR")]
    pub error: usize,
}

impl VerdictBreakdown {
    pub fn total(&self) -> usize {
        self.violation + self.needs_warning + self.fine + self.error
    }

    pub fn get(&self, label: CommentLabel) -> usize {
        match label {
            CommentLabel::Violation => self.violation,
            CommentLabel::NeedsWarning => self.needs_warning,
            CommentLabel::Fine => self.fine,
            CommentLabel::Error => self.error,
        }
    }

    pub fn increment(&mut self, label: CommentLabel) {
        match label {
            CommentLabel::Violation => self.violation += 1,
            CommentLabel::NeedsWarning => self.needs_warning += 1,
            CommentLabel::Fine => self.fine += 1,
            CommentLabel::Error => self.error += 1,
        }
    }

    /// Comments that tripped a rule (violations and warnings)
    pub fn rule_hits(&self) -> usize {
        self.violation + self.needs_warning
    }
}

/// The system's final ruling for a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDecision {
    pub final_decision: FinalDecision,
    pub confidence: f64,
    /// Per-comment estimate (single agent) or raw per-agent tally (several agents);
    /// absent when there were no verdicts
    pub verdict_breakdown: Option<VerdictBreakdown>,
    pub total_agents: usize,
    pub valid_responses: usize,
}

/// One label per input comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentClassification {
    pub text: String,
    pub label: CommentLabel,
    pub reason: String,
}
