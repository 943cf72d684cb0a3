// Service object wiring fetch, insights, moderation and community memory
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ThreadSenseError;
use crate::fetcher::{FetchedThread, ThreadSource};
use crate::llm::summarizer::{analyze_thread, summarize_thread, Analysis};
use crate::llm::LlmProvider;
use crate::memory::CommunityMemoryStore;
use crate::moderation::agent::{build_thread_text, DEFAULT_AGENT_MAX_TOKENS};
use crate::moderation::classifier::DEFAULT_MAX_ITEMS;
use crate::moderation::{
    aggregate, assign_labels_by_counts, classify_comments, comment_breakdown,
    compute_counts_from_classifications, moderate_with_agent, AgentGateway, AggregateDecision, CommentClassification, LlmAgentGateway,
    TopicRouter, Verdict,
};
use crate::storage::BlockStore;
use common::Config;

pub const COMPARE_MIN_URLS: usize = 2;
pub const COMPARE_MAX_URLS: usize = 5;
pub const BATCH_MAX_URLS: usize = 20;
pub const CLASSIFY_MAX_ITEMS: usize = 200;
const NO_COMMENTS_SUMMARY: &str = "No comments found or thread unavailable.";

#[derive(Debug, Clone, Serialize)]
pub struct SummaryResult {
    pub summary: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub analysis: Analysis,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadReport {
    pub url: String,
    pub summary: String,
    pub analysis: Analysis,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompareResult {
    pub threads: Vec<ThreadReport>,
}

/// Outcome of one batch slot
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchEntry {
    Success {
        #[serde(flatten)]
        report: ThreadReport,
    },
    Failed {
        url: String,
        error: String,
    },
    Error {
        url: String,
        error: String,
    },
}

impl BatchEntry {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<BatchEntry>,
}

/// Where the per-comment labels of a report came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassificationSource {
    Live,
    Synthesized,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModerationReport {
    pub report_id: String,
    pub thread_url: String,
    pub detected_subreddit: String,
    pub agent_used: String,
    pub comment_count: usize,
    pub agent_decisions: Vec<Verdict>,
    pub final_decision: AggregateDecision,
    pub shared_memory_id: String,
    pub comment_classifications: Vec<CommentClassification>,
    pub classification_source: ClassificationSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifyResult {
    pub thread_url: String,
    pub agent_used: String,
    pub count: usize,
    pub classified: usize,
    pub classifications: Vec<CommentClassification>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityOverview {
    pub subreddit: String,
    pub agent: String,
    pub overview: String,
}

/// Per-operation request counters
#[derive(Debug, Default)]
pub struct ServiceStats {
    summarize: AtomicU64,
    analyze: AtomicU64,
    compare: AtomicU64,
    batch: AtomicU64,
    moderate: AtomicU64,
    classify: AtomicU64,
    overview: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub summarize: u64,
    pub analyze: u64,
    pub compare: u64,
    pub batch: u64,
    pub moderate: u64,
    pub classify: u64,
    pub community_overview: u64,
    pub total_requests: u64,
    pub uptime_seconds: i64,
    pub provider: String,
    pub mock_mode: bool,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Application service. Shared across request handlers behind an `Arc`.
pub struct ThreadSense {
    config: Arc<Config>,
    provider: Arc<dyn LlmProvider>,
    source: Arc<dyn ThreadSource>,
    agents: Arc<dyn AgentGateway>,
    router: TopicRouter,
    memory: CommunityMemoryStore,
    stats: ServiceStats,
    started_at: DateTime<Utc>,
}

impl ThreadSense {
    /// Agents default to the given provider driven with each agent's persona
    pub fn new(
        config: Arc<Config>,
        provider: Arc<dyn LlmProvider>,
        source: Arc<dyn ThreadSource>,
        store: Arc<dyn BlockStore>,
    ) -> Result<Self, ThreadSenseError> {
        let router = TopicRouter::from_config(&config.agents)?;
        let agents: Arc<dyn AgentGateway> =
            Arc::new(LlmAgentGateway::from_router(provider.clone(), &router));
        let memory = CommunityMemoryStore::new(store, &config.communities);

        Ok(Self {
            config,
            provider,
            source,
            agents,
            router,
            memory,
            stats: ServiceStats::default(),
            started_at: Utc::now(),
        })
    }

    /// Replace the agent capability
    pub fn with_agent_gateway(mut self, agents: Arc<dyn AgentGateway>) -> Self {
        self.agents = agents;
        self
    }

    pub fn provider(&self) -> &dyn LlmProvider {
        self.provider.as_ref()
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    pub fn memory(&self) -> &CommunityMemoryStore {
        &self.memory
    }

    pub async fn summarize(&self, thread_url: &str) -> Result<SummaryResult, ThreadSenseError> {
        bump(&self.stats.summarize);
        validate_thread_url(thread_url)?;
        let thread = self.source.fetch_thread(thread_url).await;
        if thread.comments.is_empty() {
            return Ok(SummaryResult {
                summary: NO_COMMENTS_SUMMARY.to_string(),
                count: 0,
            });
        }
        let summary = summarize_thread(self.provider.as_ref(), &thread.comments).await;
        Ok(SummaryResult {
            summary,
            count: thread.comments.len(),
        })
    }

    pub async fn analyze(&self, thread_url: &str) -> Result<AnalysisResult, ThreadSenseError> {
        bump(&self.stats.analyze);
        validate_thread_url(thread_url)?;
        let thread = self.source.fetch_thread(thread_url).await;
        if thread.comments.is_empty() {
            return Ok(AnalysisResult {
                analysis: Analysis::Report(Default::default()),
                count: 0,
            });
        }
        let analysis = analyze_thread(self.provider.as_ref(), &thread.comments).await;
        Ok(AnalysisResult {
            analysis,
            count: thread.comments.len(),
        })
    }

    /// Summarize and analyze 2 to 5 threads, one after another
    pub async fn compare(&self, thread_urls: &[String]) -> Result<CompareResult, ThreadSenseError> {
        bump(&self.stats.compare);
        if thread_urls.len() < COMPARE_MIN_URLS {
            return Err(ThreadSenseError::validation(format!(
                "At least {} thread URLs required",
                COMPARE_MIN_URLS
            )));
        }
        if thread_urls.len() > COMPARE_MAX_URLS {
            return Err(ThreadSenseError::validation(format!(
                "Maximum {} threads allowed",
                COMPARE_MAX_URLS
            )));
        }
        for url in thread_urls {
            validate_thread_url(url)?;
        }

        let mut threads = Vec::with_capacity(thread_urls.len());
        for url in thread_urls {
            let thread = self.source.fetch_thread(url).await;
            threads.push(self.thread_report(&thread).await);
        }
        Ok(CompareResult { threads })
    }

    /// Summarize and analyze up to 20 threads; each slot fails on its own
    pub async fn batch(&self, thread_urls: &[String]) -> Result<BatchResult, ThreadSenseError> {
        bump(&self.stats.batch);
        if thread_urls.is_empty() {
            return Err(ThreadSenseError::validation("thread_urls array is required"));
        }
        if thread_urls.len() > BATCH_MAX_URLS {
            return Err(ThreadSenseError::validation(format!(
                "Maximum {} threads allowed in batch",
                BATCH_MAX_URLS
            )));
        }

        let mut results = Vec::with_capacity(thread_urls.len());
        for url in thread_urls {
            let entry = match validate_thread_url(url) {
                Err(e) => BatchEntry::Error {
                    url: url.clone(),
                    error: e.to_string(),
                },
                Ok(()) => {
                    let thread = self.source.fetch_thread(url).await;
                    if thread.comments.is_empty() {
                        BatchEntry::Failed {
                            url: url.clone(),
                            error: "No comments found".to_string(),
                        }
                    } else {
                        BatchEntry::Success {
                            report: self.thread_report(&thread).await,
                        }
                    }
                }
            };
            results.push(entry);
        }

        let successful = results.iter().filter(|r| r.is_success()).count();
        info!(total = results.len(), successful, "batch finished");
        Ok(BatchResult {
            total: thread_urls.len(),
            successful,
            failed: results.len() - successful,
            results,
        })
    }

    async fn thread_report(&self, thread: &FetchedThread) -> ThreadReport {
        if thread.comments.is_empty() {
            return ThreadReport {
                url: thread.url.clone(),
                summary: "No data available".to_string(),
                analysis: Analysis::Report(Default::default()),
                count: 0,
            };
        }
        let summary = summarize_thread(self.provider.as_ref(), &thread.comments).await;
        let analysis = analyze_thread(self.provider.as_ref(), &thread.comments).await;
        ThreadReport {
            url: thread.url.clone(),
            summary,
            analysis,
            count: thread.comments.len(),
        }
    }

    /// Full moderation pipeline: fetch, route, agent verdicts, aggregate, per-comment
    /// labels, then a best-effort community memory update.
    pub async fn moderate(&self, thread_url: &str) -> Result<ModerationReport, ThreadSenseError> {
        bump(&self.stats.moderate);
        validate_thread_url(thread_url)?;
        let settings = self.config.moderation();

        let thread = self.source.fetch_thread(thread_url).await;
        let community = thread.community.clone();
        let profile = self.router.route(&community);
        info!(url = thread_url, community = %community, agent = %profile.key, "moderating thread");

        let thread_text = build_thread_text(&thread.title, &thread.comments);
        let max_tokens = settings.agent_max_tokens.unwrap_or(DEFAULT_AGENT_MAX_TOKENS);

        let mut agent_ids = vec![profile.agent_id.clone()];
        for key in &settings.cross_check_agents {
            let extra = &self.router.profile(key).agent_id;
            if !agent_ids.contains(extra) {
                agent_ids.push(extra.clone());
            }
        }

        let mut verdicts = Vec::with_capacity(agent_ids.len());
        for agent_id in &agent_ids {
            verdicts.push(
                moderate_with_agent(self.agents.as_ref(), agent_id, &thread_text, &community, max_tokens)
                    .await,
            );
        }

        let comment_count = thread.comments.len();
        let mut decision = aggregate(&verdicts, comment_count);

        // a multi-agent tally counts votes, so comments are labelled by the agent when possible
        let live_cap = settings.max_classified_comments.unwrap_or(DEFAULT_MAX_ITEMS);
        let cross_checked = verdicts.len() > 1;
        let live = comment_count <= live_cap
            && (cross_checked || settings.live_classification.unwrap_or(false));

        let (comment_classifications, classification_source) = if live {
            let labels =
                classify_comments(self.agents.as_ref(), &profile.agent_id, &thread.comments, live_cap).await;
            decision.verdict_breakdown = Some(compute_counts_from_classifications(&labels));
            (labels, ClassificationSource::Live)
        } else {
            let counts = comment_breakdown(&decision, comment_count);
            let base_reason = verdicts.first().map(|v| v.reason.as_str()).unwrap_or("");
            let labels = assign_labels_by_counts(&thread.comments, &counts, thread_url, base_reason);
            (labels, ClassificationSource::Synthesized)
        };

        let rule_hits = compute_counts_from_classifications(&comment_classifications).rule_hits();
        if let Err(e) = self
            .memory
            .update(&community, &thread.title, rule_hits as i64)
            .await
        {
            warn!(community = %community, error = %e, "community memory update failed, continuing");
        }

        Ok(ModerationReport {
            report_id: uuid::Uuid::new_v4().to_string(),
            thread_url: thread_url.to_string(),
            detected_subreddit: community.clone(),
            agent_used: profile.key.clone(),
            comment_count,
            agent_decisions: verdicts,
            final_decision: decision,
            shared_memory_id: self.memory.block_id_for(&community),
            comment_classifications,
            classification_source,
        })
    }

    /// Live per-comment labels from the routed agent
    pub async fn classify(
        &self,
        thread_url: &str,
        max_items: Option<usize>,
    ) -> Result<ClassifyResult, ThreadSenseError> {
        bump(&self.stats.classify);
        validate_thread_url(thread_url)?;
        let max_items = max_items.unwrap_or(DEFAULT_MAX_ITEMS);
        if max_items == 0 || max_items > CLASSIFY_MAX_ITEMS {
            return Err(ThreadSenseError::validation(format!(
                "max_items must be between 1 and {}",
                CLASSIFY_MAX_ITEMS
            )));
        }

        let thread = self.source.fetch_thread(thread_url).await;
        let profile = self.router.route(&thread.community);
        let classifications =
            classify_comments(self.agents.as_ref(), &profile.agent_id, &thread.comments, max_items).await;

        Ok(ClassifyResult {
            thread_url: thread_url.to_string(),
            agent_used: profile.key.clone(),
            count: thread.comments.len(),
            classified: classifications.len(),
            classifications,
        })
    }

    pub async fn community_overview(&self, community: &str) -> Result<CommunityOverview, ThreadSenseError> {
        bump(&self.stats.overview);
        let key = community.trim().trim_start_matches("r/").to_lowercase();
        if key.is_empty() {
            return Err(ThreadSenseError::validation("subreddit is required"));
        }
        let profile = self.router.route(&key);
        let overview = self
            .memory
            .describe(self.agents.as_ref(), &profile.agent_id, &key)
            .await;
        Ok(CommunityOverview {
            subreddit: key,
            agent: profile.key.clone(),
            overview,
        })
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    pub fn stats(&self) -> StatsSnapshot {
        let s = &self.stats;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let counts = [
            load(&s.summarize),
            load(&s.analyze),
            load(&s.compare),
            load(&s.batch),
            load(&s.moderate),
            load(&s.classify),
            load(&s.overview),
        ];
        StatsSnapshot {
            summarize: counts[0],
            analyze: counts[1],
            compare: counts[2],
            batch: counts[3],
            moderate: counts[4],
            classify: counts[5],
            community_overview: counts[6],
            total_requests: counts.iter().sum(),
            uptime_seconds: self.uptime_seconds(),
            provider: self.provider.name().to_string(),
            mock_mode: self.provider.is_mock(),
        }
    }
}

/// Reject blank or non-http(s) thread URLs
pub fn validate_thread_url(thread_url: &str) -> Result<(), ThreadSenseError> {
    let trimmed = thread_url.trim();
    if trimmed.is_empty() {
        return Err(ThreadSenseError::validation("thread_url is required"));
    }
    match url::Url::parse(trimmed) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.host().is_some() => Ok(()),
        _ => Err(ThreadSenseError::validation(format!(
            "thread_url must be an http(s) URL: {}",
            trimmed
        ))),
    }
}
