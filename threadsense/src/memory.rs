//! Rolling per-community moderation memory.
//!
//! Each community owns one JSON record in a [`BlockStore`] block. Updates are a
//! read-modify-write cycle serialized per community; the `overview` string is a pure
//! digest of the other fields and is recomputed on every write.

use anyhow::Result;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::error::ThreadSenseError;
use crate::moderation::AgentGateway;
use crate::storage::BlockStore;
use common::CommunityConfig;

const OVERVIEW_TOPICS: usize = 10;
const PEAK_HOURS: usize = 3;
const DESCRIBE_MAX_TOKENS: usize = 120;

/// Persisted state for one community
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommunityMemory {
    #[serde(default)]
    pub recent_topics: Vec<String>,
    #[serde(default)]
    pub rules_triggered: u64,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub threads_moderated: u64,
    /// Hour of day (UTC) -> threads moderated in that hour
    #[serde(default)]
    pub hourly_activity: BTreeMap<u8, u64>,
}

impl CommunityMemory {
    pub fn is_empty(&self) -> bool {
        self.recent_topics.is_empty() && self.rules_triggered == 0 && self.threads_moderated == 0
    }
}

/// Deterministic textual digest of a memory record
pub fn compute_overview(memory: &CommunityMemory) -> String {
    if memory.is_empty() {
        return "No moderation activity recorded yet.".to_string();
    }

    let mut parts = Vec::new();

    let start = memory.recent_topics.len().saturating_sub(OVERVIEW_TOPICS);
    let recent = &memory.recent_topics[start..];
    if !recent.is_empty() {
        parts.push(format!("Recent topics: {}.", recent.join("; ")));
    }

    if memory.threads_moderated > 0 {
        parts.push(format!(
            "Rules triggered: {} across {} threads ({:.1} per thread).",
            memory.rules_triggered,
            memory.threads_moderated,
            memory.rules_triggered as f64 / memory.threads_moderated as f64
        ));
    } else {
        parts.push(format!("Rules triggered: {}.", memory.rules_triggered));
    }

    if !memory.hourly_activity.is_empty() {
        let mut hours: Vec<(&u8, &u64)> = memory.hourly_activity.iter().collect();
        // busiest first, earlier hour breaks ties
        hours.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        let peaks: Vec<String> = hours
            .iter()
            .take(PEAK_HOURS)
            .map(|(hour, _)| format!("{:02}:00", hour))
            .collect();
        parts.push(format!("Peak activity hours (UTC): {}.", peaks.join(", ")));
    }

    parts.join(" ")
}

/// Built-in descriptions for the communities shipped in the default routing table
fn builtin_description(key: &str) -> Option<&'static str> {
    match key {
        "worldnews" => Some(
            "r/worldnews is a large community for major news from around the world, \
             where discussions often turn heated around politics and conflicts.",
        ),
        "askreddit" => Some(
            "r/askreddit is a broad question-and-answer community where open-ended questions \
             draw a wide mix of personal stories, jokes and opinions.",
        ),
        "science" => Some(
            "r/science is a community for discussing peer-reviewed research, where comments \
             are expected to stay on topic and grounded in evidence.",
        ),
        "askhistorians" => Some(
            "r/askhistorians is a strictly moderated community where answers are expected to be \
             in-depth, sourced and written with historical expertise.",
        ),
        _ => None,
    }
}

/// Community memory on top of a block store
pub struct CommunityMemoryStore {
    store: Arc<dyn BlockStore>,
    communities: HashMap<String, CommunityConfig>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CommunityMemoryStore {
    pub fn new(store: Arc<dyn BlockStore>, communities: &[CommunityConfig]) -> Self {
        let communities = communities
            .iter()
            .map(|c| (c.key.to_lowercase(), c.clone()))
            .collect();
        Self {
            store,
            communities,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn block_id_for(&self, community: &str) -> String {
        let key = community.to_lowercase();
        self.communities
            .get(&key)
            .and_then(|c| c.block_id.clone())
            .unwrap_or_else(|| format!("community-memory/{}", key))
    }

    fn lock_for(&self, block_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(block_id.to_string()).or_default().clone()
    }

    // Drops the map entry once no other update holds or waits on it, so the map only
    // holds communities with an update in flight.
    fn release_lock(&self, block_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if Arc::strong_count(&lock) == 2 {
            locks.remove(block_id);
        }
    }

    /// Read the stored record. `Ok(None)` when the community has never been updated.
    pub async fn load(&self, community: &str) -> Result<Option<CommunityMemory>> {
        let block_id = self.block_id_for(community);
        let Some(raw) = self.store.get(&block_id).await? else {
            return Ok(None);
        };
        let memory = serde_json::from_str(&raw).map_err(|e| ThreadSenseError::MalformedRecord {
            key: block_id.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(memory))
    }

    /// Record one moderated thread against a community
    pub async fn update(&self, community: &str, topic: &str, rule_hit_delta: i64) -> Result<CommunityMemory> {
        self.update_at(community, topic, rule_hit_delta, Utc::now()).await
    }

    /// [`update`](Self::update) with an explicit clock for the hour bucket
    pub async fn update_at(
        &self,
        community: &str,
        topic: &str,
        rule_hit_delta: i64,
        now: DateTime<Utc>,
    ) -> Result<CommunityMemory> {
        let block_id = self.block_id_for(community);
        let lock = self.lock_for(&block_id);
        let result = {
            let _guard = lock.lock().await;
            self.apply_update(community, &block_id, topic, rule_hit_delta, now).await
        };
        self.release_lock(&block_id, lock);
        result
    }

    async fn apply_update(
        &self,
        community: &str,
        block_id: &str,
        topic: &str,
        rule_hit_delta: i64,
        now: DateTime<Utc>,
    ) -> Result<CommunityMemory> {
        let existing = self.load(community).await?;
        let is_new = existing.is_none();
        let mut memory = existing.unwrap_or_default();

        let topic = topic.trim();
        if !topic.is_empty() {
            memory.recent_topics.push(topic.to_string());
            memory.threads_moderated += 1;
            *memory.hourly_activity.entry(now.hour() as u8).or_insert(0) += 1;
        }
        memory.rules_triggered = memory.rules_triggered.saturating_add_signed(rule_hit_delta);
        memory.overview = compute_overview(&memory);

        let value = serde_json::to_string(&memory)?;
        if is_new {
            self.store.create(block_id, &value).await?;
        } else {
            self.store.set(block_id, &value).await?;
        }

        debug!(
            block_id,
            topics = memory.recent_topics.len(),
            rules_triggered = memory.rules_triggered,
            "community memory updated"
        );
        Ok(memory)
    }

    /// Static description used when nothing better is available
    pub fn static_description(&self, community: &str) -> String {
        let key = community.to_lowercase();
        if let Some(description) = self.communities.get(&key).and_then(|c| c.description.clone()) {
            return description;
        }
        builtin_description(&key)
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "r/{} is a Reddit community with no recorded moderation history yet.",
                    key
                )
            })
    }

    /// Short narration of a community's memory. Falls back to the stored overview,
    /// then to the static description. Never fails.
    pub async fn describe<G: AgentGateway + ?Sized>(
        &self,
        gateway: &G,
        agent_id: &str,
        community: &str,
    ) -> String {
        let memory = match self.load(community).await {
            Ok(Some(memory)) if !memory.is_empty() || !memory.overview.trim().is_empty() => memory,
            Ok(_) => return self.static_description(community),
            Err(e) => {
                warn!(community, error = %e, "failed to load community memory");
                return self.static_description(community);
            }
        };

        match gateway
            .send(agent_id, &narration_prompt(community, &memory), DESCRIBE_MAX_TOKENS)
            .await
        {
            Ok(text) if !text.trim().is_empty() => {
                info!(community, "community memory narrated");
                text.trim().to_string()
            }
            Ok(_) => fallback_overview(self, community, &memory),
            Err(e) => {
                warn!(community, error = %e, "memory narration failed, using stored overview");
                fallback_overview(self, community, &memory)
            }
        }
    }
}

fn fallback_overview(store: &CommunityMemoryStore, community: &str, memory: &CommunityMemory) -> String {
    if memory.overview.trim().is_empty() {
        store.static_description(community)
    } else {
        memory.overview.clone()
    }
}

fn narration_prompt(community: &str, memory: &CommunityMemory) -> String {
    let record = serde_json::json!({
        "recent_topics": memory
            .recent_topics
            .iter()
            .rev()
            .take(OVERVIEW_TOPICS)
            .rev()
            .collect::<Vec<_>>(),
        "rules_triggered": memory.rules_triggered,
        "threads_moderated": memory.threads_moderated,
        "overview": memory.overview,
    });
    format!(
        "Here is the community memory for r/{community}:\n{record}\n\n\
         Describe what has been happening in this community in 1-2 neutral, third-person sentences. \
         Do not quote field names or values verbatim and do not use bullet points."
    )
}
