use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Keyed string blocks holding serialized records. No transactions across calls.
#[async_trait::async_trait]
pub trait BlockStore: Send + Sync {
    async fn get(&self, block_id: &str) -> Result<Option<String>>;

    /// Insert a new block. Fails if the block already exists.
    async fn create(&self, block_id: &str, value: &str) -> Result<()>;

    /// Overwrite an existing block's value
    async fn set(&self, block_id: &str, value: &str) -> Result<()>;
}

/// Block store in the application's SQLite database
#[derive(Clone)]
pub struct SqliteBlockStore {
    pool: SqlitePool,
}

impl SqliteBlockStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Create the tables this crate needs. Idempotent, called at startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    tracing::info!("storage: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS memory_blocks (
            block_id TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create memory_blocks table")?;
    Ok(())
}

#[async_trait::async_trait]
impl BlockStore for SqliteBlockStore {
    async fn get(&self, block_id: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT value FROM memory_blocks WHERE block_id = ?")
            .bind(block_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read block {}", block_id))
    }

    async fn create(&self, block_id: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT INTO memory_blocks (block_id, value, updated_at) VALUES (?, ?, ?)")
            .bind(block_id)
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to create block {}", block_id))?;
        debug!(block_id, "memory block created");
        Ok(())
    }

    async fn set(&self, block_id: &str, value: &str) -> Result<()> {
        let result = sqlx::query("UPDATE memory_blocks SET value = ?, updated_at = ? WHERE block_id = ?")
            .bind(value)
            .bind(Utc::now().to_rfc3339())
            .bind(block_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to update block {}", block_id))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("block {} does not exist", block_id);
        }
        Ok(())
    }
}

/// Process-local block store
#[derive(Default)]
pub struct InMemoryBlockStore {
    blocks: RwLock<HashMap<String, String>>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn get(&self, block_id: &str) -> Result<Option<String>> {
        Ok(self.blocks.read().await.get(block_id).cloned())
    }

    async fn create(&self, block_id: &str, value: &str) -> Result<()> {
        let mut blocks = self.blocks.write().await;
        if blocks.contains_key(block_id) {
            anyhow::bail!("block {} already exists", block_id);
        }
        blocks.insert(block_id.to_string(), value.to_string());
        Ok(())
    }

    async fn set(&self, block_id: &str, value: &str) -> Result<()> {
        match self.blocks.write().await.get_mut(block_id) {
            Some(slot) => {
                *slot = value.to_string();
                Ok(())
            }
            None => anyhow::bail!("block {} does not exist", block_id),
        }
    }
}
