use super::{AggregateDecision, CommentLabel, Decision, FinalDecision, Verdict, VerdictBreakdown};

/// Combine agent verdicts into the final ruling for a thread.
///
/// - No verdicts: `NO_DATA`, confidence 0, no breakdown.
/// - One verdict: its decision mapped onto the single-agent outcomes, with a
///   per-comment breakdown estimated from the decision and confidence
///   (see [`synthesize_breakdown`]). The breakdown sums to `comment_count`.
/// - Several verdicts: majority vote. The breakdown is the raw per-agent tally
///   and sums to the number of known-category verdicts, not to `comment_count`.
///   Use [`comment_breakdown`] when comment units are needed.
pub fn aggregate(verdicts: &[Verdict], comment_count: usize) -> AggregateDecision {
    match verdicts {
        [] => AggregateDecision {
            final_decision: FinalDecision::NoData,
            confidence: 0.0,
            verdict_breakdown: None,
            total_agents: 0,
            valid_responses: 0,
        },
        [verdict] => aggregate_single(verdict, comment_count),
        _ => aggregate_many(verdicts),
    }
}

fn aggregate_single(verdict: &Verdict, comment_count: usize) -> AggregateDecision {
    let final_decision = match verdict.decision {
        Decision::Fine => FinalDecision::Clean,
        Decision::Violation => FinalDecision::Violation,
        Decision::NeedsWarning => FinalDecision::NeedsWarning,
        Decision::Error | Decision::Unknown => FinalDecision::Inconclusive,
    };
    let confidence = clamp_unit(verdict.confidence);

    AggregateDecision {
        final_decision,
        confidence,
        verdict_breakdown: Some(synthesize_breakdown(
            verdict.decision,
            confidence,
            comment_count,
        )),
        total_agents: 1,
        valid_responses: usize::from(verdict.decision.label().is_some()),
    }
}

fn aggregate_many(verdicts: &[Verdict]) -> AggregateDecision {
    let mut tally = VerdictBreakdown::default();
    let mut confidence_sum = 0.0;
    let mut valid = 0usize;

    for verdict in verdicts {
        if let Some(label) = verdict.decision.label() {
            tally.increment(label);
            confidence_sum += clamp_unit(verdict.confidence);
            valid += 1;
        }
    }

    let final_decision = if tally.violation * 2 > verdicts.len() {
        FinalDecision::PlatformViolation
    } else if tally.needs_warning > 0 {
        FinalDecision::GlobalWarning
    } else if tally.fine > 0 {
        FinalDecision::Clean
    } else {
        FinalDecision::Inconclusive
    };

    let confidence = if valid > 0 {
        confidence_sum / valid as f64
    } else {
        0.0
    };

    AggregateDecision {
        final_decision,
        confidence,
        verdict_breakdown: Some(tally),
        total_agents: verdicts.len(),
        valid_responses: valid,
    }
}

/// Display heuristic: estimate how a thread's comments would split across labels
/// given only one thread-level decision and its confidence. This is not derived from
/// per-comment data and must not be read as ground truth.
///
/// Shares per decision (remainder goes to FINE):
///
/// | decision      | violation            | warning               |
/// |---------------|----------------------|-----------------------|
/// | VIOLATION     | 0.6 + 0.3·c          | 0.1 + 0.2·(1−c)       |
/// | NEEDS_WARNING | 0.1 + 0.2·(1−c)      | 0.3 + 0.4·c           |
/// | FINE          | 0.05 + 0.1·(1−c)     | 0.1 + 0.15·(1−c)      |
/// | other         | 0.1                  | 0.2                   |
///
/// The dominant label of the decision is rounded first, the secondary one is
/// clamped to what is left, so counts never go negative and always sum to
/// `comment_count`.
pub fn synthesize_breakdown(decision: Decision, confidence: f64, comment_count: usize) -> VerdictBreakdown {
    let c = clamp_unit(confidence);
    let (violation_share, warning_share) = match decision {
        Decision::Violation => (0.6 + 0.3 * c, 0.1 + 0.2 * (1.0 - c)),
        Decision::NeedsWarning => (0.1 + 0.2 * (1.0 - c), 0.3 + 0.4 * c),
        Decision::Fine => (0.05 + 0.1 * (1.0 - c), 0.1 + 0.15 * (1.0 - c)),
        Decision::Error | Decision::Unknown => (0.1, 0.2),
    };

    let n = comment_count;
    let (first, second) = match decision {
        Decision::NeedsWarning => (CommentLabel::NeedsWarning, CommentLabel::Violation),
        _ => (CommentLabel::Violation, CommentLabel::NeedsWarning),
    };
    let share_of = |label: CommentLabel| match label {
        CommentLabel::Violation => violation_share,
        _ => warning_share,
    };

    let first_count = scaled(share_of(first), n);
    let second_count = scaled(share_of(second), n).min(n - first_count);

    let mut breakdown = VerdictBreakdown::default();
    set(&mut breakdown, first, first_count);
    set(&mut breakdown, second, second_count);
    breakdown.fine = n - first_count - second_count;
    breakdown
}

/// Breakdown of a decision in comment units, summing to `comment_count`.
///
/// The single-agent breakdown already counts comments. A multi-agent tally counts
/// votes, so the ruling is spread over the comments with [`synthesize_breakdown`]
/// instead.
pub fn comment_breakdown(decision: &AggregateDecision, comment_count: usize) -> VerdictBreakdown {
    match decision.verdict_breakdown {
        Some(breakdown) if decision.total_agents <= 1 && breakdown.total() == comment_count => breakdown,
        _ => synthesize_breakdown(
            decision.final_decision.leading_decision(),
            decision.confidence,
            comment_count,
        ),
    }
}

fn scaled(share: f64, n: usize) -> usize {
    ((share * n as f64).round().max(0.0) as usize).min(n)
}

fn set(breakdown: &mut VerdictBreakdown, label: CommentLabel, count: usize) {
    match label {
        CommentLabel::Violation => breakdown.violation = count,
        CommentLabel::NeedsWarning => breakdown.needs_warning = count,
        CommentLabel::Fine => breakdown.fine = count,
        CommentLabel::Error => breakdown.error = count,
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
