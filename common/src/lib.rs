/*!
common/src/lib.rs

Shared configuration types and DB helper functions for ThreadSense.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default and an override config file
- A helper to initialize an SQLite pool
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// HTTP server section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/threadsense.db")
    pub path: String,
}

/// Remote LLM endpoint config (one per provider)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    /// Name of the env var holding the API key; the key itself never lives in the file
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
}

/// LLM top-level config grouping the provider endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "janitorai", "openai", "anthropic", "gemini" or "mock". Unset picks the first provider
    /// with credentials and falls back to the mock.
    pub provider: Option<String>,
    pub janitorai: Option<RemoteLlmConfig>,
    pub openai: Option<RemoteLlmConfig>,
    pub anthropic: Option<RemoteLlmConfig>,
    pub gemini: Option<RemoteLlmConfig>,
}

impl LlmConfig {
    /// Endpoint section for a provider name, if present
    pub fn endpoint(&self, name: &str) -> Option<&RemoteLlmConfig> {
        match name {
            "janitorai" => self.janitorai.as_ref(),
            "openai" => self.openai.as_ref(),
            "anthropic" => self.anthropic.as_ref(),
            "gemini" => self.gemini.as_ref(),
            _ => None,
        }
    }
}

/// Thread fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Skip the network and serve the canned comment set
    pub offline: Option<bool>,
    pub timeout_seconds: Option<u64>,
    pub max_comments: Option<usize>,
    pub user_agent: Option<String>,
}

/// Moderation pipeline knobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Ask the agent to label each comment instead of synthesizing labels
    pub live_classification: Option<bool>,
    pub max_classified_comments: Option<usize>,
    /// Extra agent keys consulted on every thread besides the routed one
    #[serde(default)]
    pub cross_check_agents: Vec<String>,
    pub agent_max_tokens: Option<usize>,
}

/// One specialist agent group. Order of `[[agents]]` entries is routing order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub key: String,
    /// Opaque id handed to the agent capability
    pub agent_id: Option<String>,
    pub persona: Option<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Per-community memory settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityConfig {
    pub key: String,
    pub block_id: Option<String>,
    /// Static description served when no memory narration is available
    pub description: Option<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: Option<ServerConfig>,
    pub database: DatabaseConfig,
    pub llm: Option<LlmConfig>,
    pub fetch: Option<FetchConfig>,
    pub moderation: Option<ModerationConfig>,
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub communities: Vec<CommunityConfig>,
}

impl Config {
    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn fetch(&self) -> FetchConfig {
        self.fetch.clone().unwrap_or_default()
    }

    pub fn moderation(&self) -> ModerationConfig {
        self.moderation.clone().unwrap_or_default()
    }
}

// Tables merge key by key; arrays and scalars from the override replace the default wholesale.
fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and returns a configured `SqlitePool`
/// (max 5 connections, WAL journal).
///
/// Example:
///   let pool = init_db_pool("data/threadsense.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
