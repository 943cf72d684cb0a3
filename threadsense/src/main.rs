/*
threadsense - single-binary main.rs
This binary loads configuration, prepares the memory database and serves the HTTP API.
*/

use anyhow::Result;
use clap::Parser;
use common::{init_db_pool, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use threadsense::fetcher::{RedditFetcher, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MAX_COMMENTS};
use threadsense::llm;
use threadsense::server::launch_rocket;
use threadsense::service::ThreadSense;
use threadsense::storage::{self, SqliteBlockStore};

#[derive(Parser, Debug)]
#[command(name = "threadsense", about = "ThreadSense thread insights and moderation server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Serve canned comments instead of fetching threads
    #[arg(long)]
    offline: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // API keys may live in a local .env
    if dotenv::dotenv().is_ok() {
        info!(".env loaded");
    }

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        Some(PathBuf::from("config.toml"))
    };

    let config = match Config::load_with_defaults(Some(&default_path), override_path.as_deref()).await {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");
    let config = Arc::new(config);

    // Memory database
    let db_pool = match init_db_pool(&config.database.path).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %config.database.path, "failed to initialize database pool");
            return Err(e);
        }
    };
    storage::ensure_schema(&db_pool).await?;
    let block_store = Arc::new(SqliteBlockStore::new(db_pool));

    // A named provider without credentials stops startup here
    let provider = llm::provider_from_config(config.llm.as_ref())?;
    if provider.is_mock() {
        info!("running in mock mode: replies are canned");
    }

    let fetch = config.fetch();
    let fetcher = RedditFetcher::new(
        fetch.timeout_seconds.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        fetch.max_comments.unwrap_or(DEFAULT_MAX_COMMENTS),
        fetch.user_agent.as_deref(),
    )?
    .offline(args.offline || fetch.offline.unwrap_or(false));

    let service = ThreadSense::new(config.clone(), provider, Arc::new(fetcher), block_store)?;
    info!(
        agents = ?service.router().keys().collect::<Vec<_>>(),
        "topic router ready"
    );

    launch_rocket(Arc::new(service), &config).await
}
