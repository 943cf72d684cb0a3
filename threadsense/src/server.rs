use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, status, Responder};
use rocket::serde::json::Json;
use rocket::{catch, catchers, get, post, routes, Build, Rocket, State};
use serde::{Deserialize, Serialize};

use common::Config;

use crate::error::ThreadSenseError;
use crate::service::{
    AnalysisResult, BatchResult, ClassifyResult, CommunityOverview, CompareResult, ModerationReport,
    StatsSnapshot, SummaryResult, ThreadSense,
};

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ThreadSense>,
}

/// Error body: `{"detail": "..."}`
#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Maps the service error taxonomy onto HTTP statuses
#[derive(Debug)]
pub struct ApiError(pub ThreadSenseError);

impl From<ThreadSenseError> for ApiError {
    fn from(e: ThreadSenseError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> Status {
        match self.0 {
            ThreadSenseError::Validation(_) => Status::BadRequest,
            ThreadSenseError::Configuration(_) => Status::ServiceUnavailable,
            _ => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status == Status::InternalServerError {
            tracing::error!("request failed: {}", self.0);
        } else {
            tracing::debug!("request rejected ({}): {}", status.code, self.0);
        }
        status::Custom(
            status,
            Json(ErrorBody {
                detail: self.0.to_string(),
            }),
        )
        .respond_to(req)
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
struct ThreadRequest {
    thread_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MultiThreadRequest {
    #[serde(default)]
    thread_urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    thread_url: Option<String>,
    max_items: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    time: i64,
    uptime_seconds: i64,
    api_provider: String,
    mock_mode: bool,
}

fn required_url(url: &Option<String>) -> std::result::Result<&str, ApiError> {
    url.as_deref()
        .ok_or_else(|| ThreadSenseError::validation("thread_url is required").into())
}

#[get("/health")]
async fn health(state: &State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    let provider = state.service.provider();
    Json(HealthResponse {
        ok: true,
        time: now.timestamp(),
        uptime_seconds: state.service.uptime_seconds(),
        api_provider: provider.name().to_string(),
        mock_mode: provider.is_mock(),
    })
}

#[post("/api/summarize", data = "<body>")]
async fn summarize(state: &State<AppState>, body: Json<ThreadRequest>) -> ApiResult<SummaryResult> {
    let url = required_url(&body.thread_url)?;
    Ok(Json(state.service.summarize(url).await?))
}

#[post("/api/analyze", data = "<body>")]
async fn analyze(state: &State<AppState>, body: Json<ThreadRequest>) -> ApiResult<AnalysisResult> {
    let url = required_url(&body.thread_url)?;
    Ok(Json(state.service.analyze(url).await?))
}

#[post("/api/compare", data = "<body>")]
async fn compare(state: &State<AppState>, body: Json<MultiThreadRequest>) -> ApiResult<CompareResult> {
    Ok(Json(state.service.compare(&body.thread_urls).await?))
}

#[post("/api/batch", data = "<body>")]
async fn batch(state: &State<AppState>, body: Json<MultiThreadRequest>) -> ApiResult<BatchResult> {
    Ok(Json(state.service.batch(&body.thread_urls).await?))
}

#[post("/api/moderate", data = "<body>")]
async fn moderate(state: &State<AppState>, body: Json<ThreadRequest>) -> ApiResult<ModerationReport> {
    let url = required_url(&body.thread_url)?;
    Ok(Json(state.service.moderate(url).await?))
}

#[post("/api/classify", data = "<body>")]
async fn classify(state: &State<AppState>, body: Json<ClassifyRequest>) -> ApiResult<ClassifyResult> {
    let url = required_url(&body.thread_url)?;
    Ok(Json(state.service.classify(url, body.max_items).await?))
}

#[get("/api/subreddit/<name>/summary")]
async fn subreddit_summary(state: &State<AppState>, name: &str) -> ApiResult<CommunityOverview> {
    Ok(Json(state.service.community_overview(name).await?))
}

#[get("/api/stats")]
async fn stats(state: &State<AppState>) -> Json<StatsSnapshot> {
    Json(state.service.stats())
}

#[catch(default)]
fn default_catcher(status: Status, _req: &Request<'_>) -> status::Custom<Json<ErrorBody>> {
    status::Custom(
        status,
        Json(ErrorBody {
            detail: status.reason_lossy().to_string(),
        }),
    )
}

/// Rocket instance with state, routes and catchers, ready to ignite or launch.
/// `[server] bind` and `port` from the config override Rocket's figment defaults.
pub fn build_rocket(service: Arc<ThreadSense>, config: &Config) -> Rocket<Build> {
    let mut fig = rocket::Config::figment();
    if let Some(server) = &config.server {
        if let Some(bind) = &server.bind {
            fig = fig.merge(("address", bind.clone()));
        }
        if let Some(port) = server.port {
            fig = fig.merge(("port", port));
        }
    }

    let state = AppState { service };

    rocket::custom(fig)
        .manage(state)
        .mount(
            "/",
            routes![
                health,
                summarize,
                analyze,
                compare,
                batch,
                moderate,
                classify,
                subreddit_summary,
                stats,
            ],
        )
        .register("/", catchers![default_catcher])
}

/// Build and launch the HTTP server. Blocks until Rocket shuts down.
pub async fn launch_rocket(service: Arc<ThreadSense>, config: &Config) -> Result<()> {
    let rocket = build_rocket(service, config);

    tracing::info!("Starting Rocket HTTP server");
    rocket
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
