use std::sync::Arc;

use common::{init_db_pool, CommunityConfig};
use sqlx::sqlite::SqlitePoolOptions;
use threadsense::memory::{compute_overview, CommunityMemoryStore};
use threadsense::moderation::AgentGateway;
use threadsense::storage::{ensure_schema, BlockStore, SqliteBlockStore};

async fn sqlite_store() -> Arc<SqliteBlockStore> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    ensure_schema(&pool).await.unwrap();
    Arc::new(SqliteBlockStore::new(pool))
}

struct DownAgent;

#[async_trait::async_trait]
impl AgentGateway for DownAgent {
    async fn send(&self, _agent_id: &str, _message: &str, _max_tokens: usize) -> anyhow::Result<String> {
        anyhow::bail!("agent service unavailable")
    }
}

struct EchoAgent;

#[async_trait::async_trait]
impl AgentGateway for EchoAgent {
    async fn send(&self, agent_id: &str, message: &str, _max_tokens: usize) -> anyhow::Result<String> {
        assert!(message.contains("community memory"));
        Ok(format!("  narrated by {}  ", agent_id))
    }
}

#[tokio::test]
async fn concurrent_updates_lose_nothing() {
    let memory = Arc::new(CommunityMemoryStore::new(sqlite_store().await, &[]));

    let mut handles = Vec::new();
    for i in 0..25 {
        let memory = memory.clone();
        handles.push(tokio::spawn(async move {
            memory
                .update("worldnews", &format!("thread {}", i), 2)
                .await
                .map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let record = memory.load("worldnews").await.unwrap().unwrap();
    assert_eq!(record.recent_topics.len(), 25);
    assert_eq!(record.threads_moderated, 25);
    assert_eq!(record.rules_triggered, 50);
    assert_eq!(record.hourly_activity.values().sum::<u64>(), 25);
    assert_eq!(record.overview, compute_overview(&record));
}

#[tokio::test]
async fn empty_topic_update_is_idempotent() {
    let memory = CommunityMemoryStore::new(sqlite_store().await, &[]);
    let first = memory.update("science", "Coffee study", 3).await.unwrap();

    let again = memory.update("science", "", 0).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(memory.load("science").await.unwrap(), Some(first));
}

#[tokio::test]
async fn configured_block_id_is_used() {
    let store = sqlite_store().await;
    let communities = vec![CommunityConfig {
        key: "worldnews".to_string(),
        block_id: Some("block-123".to_string()),
        description: None,
    }];
    let memory = CommunityMemoryStore::new(store.clone(), &communities);

    memory.update("WorldNews", "Election results", 1).await.unwrap();

    let raw = store.get("block-123").await.unwrap().expect("block written");
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["recent_topics"][0], "Election results");
    assert_eq!(value["rules_triggered"], 1);
    assert!(store.get("community-memory/worldnews").await.unwrap().is_none());
}

#[tokio::test]
async fn malformed_record_is_an_error() {
    let store = sqlite_store().await;
    store.create("community-memory/science", "[1, 2, 3]").await.unwrap();
    let memory = CommunityMemoryStore::new(store, &[]);

    assert!(memory.load("science").await.is_err());
    assert!(memory.update("science", "t", 1).await.is_err());
}

#[tokio::test]
async fn describe_fallback_chain() {
    let store = sqlite_store().await;
    let memory = CommunityMemoryStore::new(store.clone(), &[]);

    // nothing stored: static description, the agent is not consulted
    let text = memory.describe(&EchoAgent, "agent-science", "science").await;
    assert!(text.starts_with("r/science"));

    memory.update("science", "Coffee study", 1).await.unwrap();

    let narrated = memory.describe(&EchoAgent, "agent-science", "science").await;
    assert_eq!(narrated, "narrated by agent-science");

    let fallback = memory.describe(&DownAgent, "agent-science", "science").await;
    let stored = memory.load("science").await.unwrap().unwrap();
    assert_eq!(fallback, stored.overview);
    assert!(fallback.starts_with(
        "Recent topics: Coffee study. Rules triggered: 1 across 1 threads (1.0 per thread)."
    ));

    // unreadable record: static description
    store.set("community-memory/science", "oops").await.unwrap();
    let broken = memory.describe(&EchoAgent, "agent-science", "science").await;
    assert!(broken.starts_with("r/science"));
}

#[tokio::test]
async fn memory_survives_pool_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("data").join("threadsense.db");
    let db_path = db_path.to_str().unwrap();

    {
        let pool = init_db_pool(db_path).await.unwrap();
        ensure_schema(&pool).await.unwrap();
        let memory = CommunityMemoryStore::new(Arc::new(SqliteBlockStore::new(pool.clone())), &[]);
        memory.update("askhistorians", "Roman roads", 2).await.unwrap();
        pool.close().await;
    }

    let pool = init_db_pool(db_path).await.unwrap();
    ensure_schema(&pool).await.unwrap();
    let memory = CommunityMemoryStore::new(Arc::new(SqliteBlockStore::new(pool)), &[]);
    let record = memory.load("askhistorians").await.unwrap().unwrap();
    assert_eq!(record.recent_topics, vec!["Roman roads"]);
    assert_eq!(record.rules_triggered, 2);
}

#[tokio::test]
async fn stored_overview_without_counters_is_still_served() {
    let store = sqlite_store().await;
    store
        .create("community-memory/worldnews", r#"{"overview": "Quiet week, mostly election threads."}"#)
        .await
        .unwrap();
    let memory = CommunityMemoryStore::new(store, &[]);

    let fallback = memory.describe(&DownAgent, "agent-worldnews", "worldnews").await;
    assert_eq!(fallback, "Quiet week, mostly election threads.");

    let narrated = memory.describe(&EchoAgent, "agent-worldnews", "worldnews").await;
    assert_eq!(narrated, "narrated by agent-worldnews");
}
