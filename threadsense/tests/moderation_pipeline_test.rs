use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::Config;
use threadsense::error::ThreadSenseError;
use threadsense::fetcher::{extract_community, FetchedThread, ThreadSource};
use threadsense::llm::mock::MockLlmProvider;
use threadsense::moderation::{AgentGateway, CommentLabel, Decision, FinalDecision};
use threadsense::service::{BatchEntry, ClassificationSource, ThreadSense};
use threadsense::storage::{BlockStore, InMemoryBlockStore};

const ASKREDDIT_URL: &str = "https://www.reddit.com/r/AskReddit/comments/t1/what_is_your_favourite_food/";
const SCIENCE_URL: &str = "https://www.reddit.com/r/science/comments/t2/new_study/";
const EMPTY_URL: &str = "https://www.reddit.com/r/science/comments/t3/deleted_thread/";

/// Serves fixed comments; URLs containing `deleted` have none
struct StaticSource;

#[async_trait::async_trait]
impl ThreadSource for StaticSource {
    async fn fetch_thread(&self, url: &str) -> FetchedThread {
        let comments = if url.contains("deleted") {
            Vec::new()
        } else {
            (0..5).map(|i| format!("comment {} on {}", i, url)).collect()
        };
        FetchedThread {
            url: url.to_string(),
            community: extract_community(url),
            title: format!("title of {}", url),
            comments,
            from_fallback: false,
        }
    }
}

/// Canned replies per agent id; classification prompts get `label_reply`
struct ScriptedAgents {
    verdicts: HashMap<String, String>,
    label_reply: String,
    calls: AtomicUsize,
}

impl ScriptedAgents {
    fn new(verdicts: &[(&str, &str)]) -> Self {
        Self {
            verdicts: verdicts
                .iter()
                .map(|(id, reply)| (id.to_string(), reply.to_string()))
                .collect(),
            label_reply: r#"{"label": "NEEDS_WARNING", "reason": "snippy"}"#.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl AgentGateway for ScriptedAgents {
    async fn send(&self, agent_id: &str, message: &str, _max_tokens: usize) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if message.contains("\"label\"") {
            return Ok(self.label_reply.clone());
        }
        self.verdicts
            .get(agent_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("agent {} unreachable", agent_id))
    }
}

fn config(extra: &str) -> Arc<Config> {
    let text = format!("[database]\npath = \":memory:\"\n{}", extra);
    Arc::new(toml::from_str(&text).unwrap())
}

fn service(config: Arc<Config>, store: Arc<dyn BlockStore>, agents: Arc<ScriptedAgents>) -> ThreadSense {
    ThreadSense::new(config, Arc::new(MockLlmProvider::new()), Arc::new(StaticSource), store)
        .unwrap()
        .with_agent_gateway(agents)
}

#[tokio::test]
async fn single_fine_verdict_end_to_end() {
    let agents = Arc::new(ScriptedAgents::new(&[(
        "agent-askreddit",
        "Decision: FINE\nConfidence: 0.9\nReason: friendly thread",
    )]));
    let store = Arc::new(InMemoryBlockStore::new());
    let svc = service(config(""), store.clone(), agents.clone());

    let report = svc.moderate(ASKREDDIT_URL).await.unwrap();

    assert_eq!(report.detected_subreddit, "askreddit");
    assert_eq!(report.agent_used, "askreddit");
    assert_eq!(report.comment_count, 5);
    assert_eq!(report.agent_decisions.len(), 1);
    assert_eq!(report.agent_decisions[0].decision, Decision::Fine);

    let decision = &report.final_decision;
    assert_eq!(decision.final_decision, FinalDecision::Clean);
    assert_eq!(decision.confidence, 0.9);
    let breakdown = decision.verdict_breakdown.unwrap();
    assert_eq!(breakdown.total(), 5);
    assert!(breakdown.violation <= 1 && breakdown.needs_warning <= 1);
    assert!(breakdown.fine >= 3);

    assert_eq!(report.classification_source, ClassificationSource::Synthesized);
    assert_eq!(report.comment_classifications.len(), 5);
    for (i, c) in report.comment_classifications.iter().enumerate() {
        assert_eq!(c.text, format!("comment {} on {}", i, ASKREDDIT_URL));
    }

    // memory was updated with the thread title and the rule hits
    assert_eq!(report.shared_memory_id, "community-memory/askreddit");
    let memory = svc.memory().load("askreddit").await.unwrap().unwrap();
    assert_eq!(memory.recent_topics, vec![format!("title of {}", ASKREDDIT_URL)]);
    assert_eq!(memory.rules_triggered as usize, breakdown.rule_hits());
    assert_eq!(agents.calls(), 1);
}

#[tokio::test]
async fn synthesized_labels_are_reproducible() {
    let agents = Arc::new(ScriptedAgents::new(&[(
        "agent-science",
        "Decision: NEEDS_WARNING\nConfidence: 0.6",
    )]));
    let svc = service(config(""), Arc::new(InMemoryBlockStore::new()), agents);

    let first = svc.moderate(SCIENCE_URL).await.unwrap();
    let second = svc.moderate(SCIENCE_URL).await.unwrap();
    assert_eq!(first.comment_classifications, second.comment_classifications);
    assert_ne!(first.report_id, second.report_id);
}

#[tokio::test]
async fn cross_check_majority_violation() {
    let agents = Arc::new(ScriptedAgents::new(&[
        ("agent-science", "VIOLATION\nconfidence: 0.9"),
        ("agent-worldnews", "This is a violation. Confidence: 0.7"),
        ("agent-general", "Fine overall, confidence 0.5"),
    ]));
    let cfg = config("[moderation]\ncross_check_agents = [\"worldnews\", \"general\", \"science\"]\n");
    let svc = service(cfg, Arc::new(InMemoryBlockStore::new()), agents.clone());

    let report = svc.moderate(SCIENCE_URL).await.unwrap();

    // routed agent plus two distinct cross-checkers
    assert_eq!(report.agent_decisions.len(), 3);
    let decision = &report.final_decision;
    assert_eq!(decision.final_decision, FinalDecision::PlatformViolation);
    assert_eq!(decision.total_agents, 3);
    assert_eq!(decision.valid_responses, 3);
    assert!((decision.confidence - 0.7).abs() < 1e-9);

    // several agents: comments are labelled live even with the flag off
    assert_eq!(report.classification_source, ClassificationSource::Live);
    assert_eq!(report.comment_classifications.len(), report.comment_count);
    let breakdown = decision.verdict_breakdown.unwrap();
    assert_eq!(breakdown.total(), 5);
    assert_eq!(breakdown.needs_warning, 5);
    // three verdict calls plus one call per comment
    assert_eq!(agents.calls(), 8);
}

fn unanimous_violation_agents() -> ScriptedAgents {
    let mut agents = ScriptedAgents::new(&[
        ("agent-science", "VIOLATION confidence 0.9"),
        ("agent-worldnews", "VIOLATION confidence 0.9"),
        ("agent-general", "VIOLATION confidence 0.9"),
    ]);
    agents.label_reply = r#"{"label": "VIOLATION", "reason": "doxxing"}"#.to_string();
    agents
}

#[tokio::test]
async fn platform_violation_labels_follow_the_ruling() {
    let agents = Arc::new(unanimous_violation_agents());
    let cfg = config("[moderation]\ncross_check_agents = [\"worldnews\", \"general\"]\n");
    let svc = service(cfg, Arc::new(InMemoryBlockStore::new()), agents);

    let report = svc.moderate(SCIENCE_URL).await.unwrap();

    assert_eq!(report.final_decision.final_decision, FinalDecision::PlatformViolation);
    let violations = report
        .comment_classifications
        .iter()
        .filter(|c| c.label == CommentLabel::Violation)
        .count();
    assert_eq!(violations, 5);
    assert_eq!(report.final_decision.verdict_breakdown.unwrap().violation, 5);

    let memory = svc.memory().load("science").await.unwrap().unwrap();
    assert_eq!(memory.rules_triggered, 5);
}

#[tokio::test]
async fn platform_violation_over_cap_spreads_ruling_over_comments() {
    let agents = Arc::new(unanimous_violation_agents());
    let cfg = config(
        "[moderation]\ncross_check_agents = [\"worldnews\", \"general\"]\nmax_classified_comments = 2\n",
    );
    let svc = service(cfg, Arc::new(InMemoryBlockStore::new()), agents.clone());

    let report = svc.moderate(SCIENCE_URL).await.unwrap();

    assert_eq!(report.final_decision.final_decision, FinalDecision::PlatformViolation);
    assert_eq!(report.classification_source, ClassificationSource::Synthesized);
    // the agent tally is reported as is
    assert_eq!(report.final_decision.verdict_breakdown.unwrap().violation, 3);

    let count = |label: CommentLabel| {
        report
            .comment_classifications
            .iter()
            .filter(|c| c.label == label)
            .count()
    };
    assert_eq!(report.comment_classifications.len(), 5);
    assert_eq!(count(CommentLabel::Violation), 4);
    assert_eq!(count(CommentLabel::NeedsWarning), 1);
    assert_eq!(count(CommentLabel::Fine), 0);
    // no per-comment calls past the cap
    assert_eq!(agents.calls(), 3);

    let memory = svc.memory().load("science").await.unwrap().unwrap();
    assert_eq!(memory.rules_triggered, 5);
}

#[tokio::test]
async fn agent_failure_yields_error_verdict_not_error_response() {
    let agents = Arc::new(ScriptedAgents::new(&[]));
    let svc = service(config(""), Arc::new(InMemoryBlockStore::new()), agents);

    let report = svc.moderate(SCIENCE_URL).await.unwrap();
    assert_eq!(report.agent_decisions[0].decision, Decision::Error);
    assert_eq!(report.final_decision.final_decision, FinalDecision::Inconclusive);
    assert_eq!(report.final_decision.confidence, 0.0);
}

#[tokio::test]
async fn live_classification_replaces_breakdown() {
    let agents = Arc::new(ScriptedAgents::new(&[("agent-science", "FINE, confidence 0.8")]));
    let cfg = config("[moderation]\nlive_classification = true\nmax_classified_comments = 10\n");
    let svc = service(cfg, Arc::new(InMemoryBlockStore::new()), agents.clone());

    let report = svc.moderate(SCIENCE_URL).await.unwrap();

    assert_eq!(report.classification_source, ClassificationSource::Live);
    assert!(report
        .comment_classifications
        .iter()
        .all(|c| c.label == CommentLabel::NeedsWarning && c.reason == "snippy"));
    let breakdown = report.final_decision.verdict_breakdown.unwrap();
    assert_eq!(breakdown.needs_warning, 5);
    assert_eq!(breakdown.total(), 5);
    // one verdict call plus one call per comment
    assert_eq!(agents.calls(), 6);

    let memory = svc.memory().load("science").await.unwrap().unwrap();
    assert_eq!(memory.rules_triggered, 5);
}

#[tokio::test]
async fn malformed_memory_record_does_not_fail_moderation() {
    let store = Arc::new(InMemoryBlockStore::new());
    store
        .create("community-memory/science", "{not valid json")
        .await
        .unwrap();
    let agents = Arc::new(ScriptedAgents::new(&[("agent-science", "FINE")]));
    let svc = service(config(""), store.clone(), agents);

    let report = svc.moderate(SCIENCE_URL).await.unwrap();
    assert_eq!(report.final_decision.final_decision, FinalDecision::Clean);
    assert_eq!(report.final_decision.confidence, 0.5);

    // record is left untouched and still reported as malformed
    let err = svc.memory().load("science").await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ThreadSenseError>(),
        Some(ThreadSenseError::MalformedRecord { .. })
    ));
    assert_eq!(
        store.get("community-memory/science").await.unwrap().as_deref(),
        Some("{not valid json")
    );
}

#[tokio::test]
async fn validation_happens_before_any_agent_call() {
    let agents = Arc::new(ScriptedAgents::new(&[("agent-science", "FINE")]));
    let svc = service(config(""), Arc::new(InMemoryBlockStore::new()), agents.clone());

    for bad in ["", "   ", "reddit.com/r/science", "ftp://x.test/r/a"] {
        assert!(matches!(
            svc.moderate(bad).await,
            Err(ThreadSenseError::Validation(_))
        ));
        assert!(matches!(
            svc.classify(bad, None).await,
            Err(ThreadSenseError::Validation(_))
        ));
    }
    assert!(matches!(
        svc.classify(SCIENCE_URL, Some(0)).await,
        Err(ThreadSenseError::Validation(_))
    ));
    assert!(matches!(
        svc.classify(SCIENCE_URL, Some(201)).await,
        Err(ThreadSenseError::Validation(_))
    ));

    let one = vec![SCIENCE_URL.to_string()];
    assert!(matches!(svc.compare(&one).await, Err(ThreadSenseError::Validation(_))));
    let six = vec![SCIENCE_URL.to_string(); 6];
    assert!(matches!(svc.compare(&six).await, Err(ThreadSenseError::Validation(_))));
    assert!(matches!(svc.batch(&[]).await, Err(ThreadSenseError::Validation(_))));
    let many = vec![SCIENCE_URL.to_string(); 21];
    assert!(matches!(svc.batch(&many).await, Err(ThreadSenseError::Validation(_))));

    assert_eq!(agents.calls(), 0);
}

#[tokio::test]
async fn batch_isolates_entries() {
    let agents = Arc::new(ScriptedAgents::new(&[]));
    let svc = service(config(""), Arc::new(InMemoryBlockStore::new()), agents);

    let urls = vec![
        SCIENCE_URL.to_string(),
        "not a url".to_string(),
        EMPTY_URL.to_string(),
        ASKREDDIT_URL.to_string(),
    ];
    let result = svc.batch(&urls).await.unwrap();

    assert_eq!(result.total, 4);
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 2);
    assert!(matches!(result.results[0], BatchEntry::Success { .. }));
    assert!(matches!(result.results[1], BatchEntry::Error { .. }));
    match &result.results[2] {
        BatchEntry::Failed { error, .. } => assert_eq!(error, "No comments found"),
        other => panic!("expected failed slot, got {:?}", other),
    }
    match &result.results[3] {
        BatchEntry::Success { report } => {
            assert_eq!(report.count, 5);
            assert!(report.summary.starts_with("The discussion reveals"));
        }
        other => panic!("expected success slot, got {:?}", other),
    }
}

#[tokio::test]
async fn compare_summarizes_each_thread() {
    let svc = service(
        config(""),
        Arc::new(InMemoryBlockStore::new()),
        Arc::new(ScriptedAgents::new(&[])),
    );
    let urls = vec![SCIENCE_URL.to_string(), EMPTY_URL.to_string()];
    let result = svc.compare(&urls).await.unwrap();

    assert_eq!(result.threads.len(), 2);
    assert_eq!(result.threads[0].count, 5);
    assert_eq!(result.threads[1].count, 0);
    assert_eq!(result.threads[1].summary, "No data available");
}

#[tokio::test]
async fn mock_provider_drives_whole_service() {
    // default agent gateway: the mock provider with agent personas
    let svc = ThreadSense::new(
        config("[moderation]\nlive_classification = true\n"),
        Arc::new(MockLlmProvider::new()),
        Arc::new(StaticSource),
        Arc::new(InMemoryBlockStore::new()),
    )
    .unwrap();

    let before = svc.community_overview("r/Science").await.unwrap();
    assert_eq!(before.subreddit, "science");
    assert!(before.overview.starts_with("r/science"));

    let report = svc.moderate(SCIENCE_URL).await.unwrap();
    assert_eq!(report.agent_decisions[0].decision, Decision::Fine);
    assert_eq!(report.agent_decisions[0].confidence, 0.85);
    assert_eq!(report.classification_source, ClassificationSource::Live);
    assert!(report
        .comment_classifications
        .iter()
        .all(|c| c.label == CommentLabel::Fine));

    let after = svc.community_overview("science").await.unwrap();
    assert!(after.overview.starts_with("Members have recently been debating"));

    let classified = svc.classify(SCIENCE_URL, Some(3)).await.unwrap();
    assert_eq!(classified.classified, 3);
    assert_eq!(classified.count, 5);

    let stats = svc.stats();
    assert_eq!(stats.moderate, 1);
    assert_eq!(stats.classify, 1);
    assert_eq!(stats.community_overview, 2);
    assert_eq!(stats.total_requests, 4);
    assert!(stats.mock_mode);
    assert_eq!(stats.provider, "mock");
}
