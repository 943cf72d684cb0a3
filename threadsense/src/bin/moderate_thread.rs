//! One-shot moderation of a single thread, printed as JSON. Uses an in-memory
//! block store, so community memory does not outlive the run.

use anyhow::Result;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use threadsense::fetcher::{RedditFetcher, DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_MAX_COMMENTS};
use threadsense::llm;
use threadsense::service::ThreadSense;
use threadsense::storage::InMemoryBlockStore;

#[derive(Parser, Debug)]
#[command(name = "moderate_thread", about = "Moderate one Reddit thread and print the report")]
struct Args {
    /// Thread URL, e.g. https://www.reddit.com/r/science/comments/abc/title/
    url: String,

    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,

    /// Use the canned comment set instead of fetching
    #[arg(long)]
    offline: bool,

    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).init();
    dotenv::dotenv().ok();

    let config = Arc::new(
        Config::load_with_defaults(Some(PathBuf::from("config.default.toml").as_path()), Some(&args.config))
            .await?,
    );
    let provider = llm::provider_from_config(config.llm.as_ref())?;

    let fetch = config.fetch();
    let fetcher = RedditFetcher::new(
        fetch.timeout_seconds.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        fetch.max_comments.unwrap_or(DEFAULT_MAX_COMMENTS),
        fetch.user_agent.as_deref(),
    )?
    .offline(args.offline || fetch.offline.unwrap_or(false));

    let service = ThreadSense::new(
        config,
        provider,
        Arc::new(fetcher),
        Arc::new(InMemoryBlockStore::new()),
    )?;

    let report = service.moderate(&args.url).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
