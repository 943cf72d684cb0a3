// Per-comment labels: live from an agent, or synthesized from aggregate counts
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{AgentGateway, CommentClassification, CommentLabel, VerdictBreakdown};
use crate::llm::extract_json_from_text;

pub const DEFAULT_MAX_ITEMS: usize = 50;
const CLASSIFY_MAX_TOKENS: usize = 120;
const COMMENT_PROMPT_MAX_CHARS: usize = 2000;
const REASON_MAX_CHARS: usize = 240;

#[derive(Debug, Deserialize)]
struct LabelReply {
    label: String,
    #[serde(default)]
    reason: String,
}

fn classification_prompt(comment: &str) -> String {
    format!(
        "Classify this single Reddit comment for moderation.\n\n\
         Comment:\n{}\n\n\
         Reply with compact JSON only: {{\"label\": \"VIOLATION\" | \"NEEDS_WARNING\" | \"FINE\", \
         \"reason\": \"<short reason>\"}}",
        truncate(comment.trim(), COMMENT_PROMPT_MAX_CHARS)
    )
}

/// Label up to `max_items` comments one at a time. Comments past the cap are not
/// returned. A failed call labels that comment `ERROR` and classification carries on.
pub async fn classify_comments<G: AgentGateway + ?Sized>(
    gateway: &G,
    agent_id: &str,
    comments: &[String],
    max_items: usize,
) -> Vec<CommentClassification> {
    let mut results = Vec::with_capacity(comments.len().min(max_items));

    for (idx, comment) in comments.iter().take(max_items).enumerate() {
        let classification = match gateway
            .send(agent_id, &classification_prompt(comment), CLASSIFY_MAX_TOKENS)
            .await
        {
            Ok(reply) => {
                let (label, reason) = parse_label_reply(&reply);
                CommentClassification {
                    text: comment.clone(),
                    label,
                    reason,
                }
            }
            Err(e) => {
                warn!(agent_id, comment = idx, error = %e, "comment classification failed");
                CommentClassification {
                    text: comment.clone(),
                    label: CommentLabel::Error,
                    reason: format!("Classification failed: {:#}", e),
                }
            }
        };
        results.push(classification);
    }

    debug!(agent_id, classified = results.len(), total = comments.len(), "comments classified");
    results
}

/// Strict `{label, reason}` parse first, then substring heuristic on the raw reply
pub fn parse_label_reply(reply: &str) -> (CommentLabel, String) {
    let strict = extract_json_from_text(reply)
        .and_then(|json| serde_json::from_str::<LabelReply>(&json).ok())
        .and_then(|parsed| {
            CommentLabel::parse(&parsed.label)
                .filter(|label| *label != CommentLabel::Error)
                .map(|label| (label, parsed.reason))
        });

    match strict {
        Some((label, reason)) if !reason.trim().is_empty() => (label, reason.trim().to_string()),
        Some((label, _)) => (label, templated_reason(label, "")),
        None => (heuristic_label(reply), truncate(reply.trim(), REASON_MAX_CHARS)),
    }
}

fn heuristic_label(reply: &str) -> CommentLabel {
    let upper = reply.to_uppercase();
    if upper.contains("VIOLATION") {
        CommentLabel::Violation
    } else if upper.contains("WARNING") {
        CommentLabel::NeedsWarning
    } else {
        CommentLabel::Fine
    }
}

/// Recount labels from a classification list
pub fn compute_counts_from_classifications(classifications: &[CommentClassification]) -> VerdictBreakdown {
    let mut counts = VerdictBreakdown::default();
    for classification in classifications {
        counts.increment(classification.label);
    }
    counts
}

/// Assign one label per comment so the label multiset matches `counts`.
///
/// Each target count is clamped to the comment count, labels are filled in the order
/// VIOLATION, NEEDS_WARNING, ERROR, FINE until the comments run out, and any
/// shortfall becomes FINE. The order is then shuffled with a [`StdRng`] seeded from
/// SHA-256 of `seed_basis` and the comment count, so identical inputs always give the
/// same assignment. Changing the hash or the RNG changes every synthesized ordering.
pub fn assign_labels_by_counts(
    comments: &[String],
    counts: &VerdictBreakdown,
    seed_basis: &str,
    base_reason: &str,
) -> Vec<CommentClassification> {
    let n = comments.len();
    let mut labels = Vec::with_capacity(n);
    for label in [
        CommentLabel::Violation,
        CommentLabel::NeedsWarning,
        CommentLabel::Error,
        CommentLabel::Fine,
    ] {
        let room = n - labels.len();
        let take = counts.get(label).min(n).min(room);
        labels.extend(std::iter::repeat(label).take(take));
    }
    labels.resize(n, CommentLabel::Fine);

    let mut rng = StdRng::seed_from_u64(label_seed(seed_basis, n));
    labels.shuffle(&mut rng);

    comments
        .iter()
        .zip(labels)
        .map(|(text, label)| CommentClassification {
            text: text.clone(),
            label,
            reason: templated_reason(label, base_reason),
        })
        .collect()
}

fn label_seed(seed_basis: &str, n: usize) -> u64 {
    let digest = Sha256::new()
        .chain_update(seed_basis.as_bytes())
        .chain_update(b":")
        .chain_update(n.to_string().as_bytes())
        .finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

fn templated_reason(label: CommentLabel, base_reason: &str) -> String {
    let base = truncate(base_reason.trim(), REASON_MAX_CHARS);
    let lead = match label {
        CommentLabel::Violation => "Likely breaks community or platform rules",
        CommentLabel::NeedsWarning => "Borderline; a moderator reminder may be warranted",
        CommentLabel::Fine => "Within community norms",
        CommentLabel::Error => "Could not be assessed",
    };
    if base.is_empty() {
        format!("{}.", lead)
    } else {
        format!("{}. Thread assessment: {}", lead, base)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
