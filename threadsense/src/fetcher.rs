use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_MAX_COMMENTS: usize = 200;
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Served whenever the real thread can't be fetched
pub const FALLBACK_COMMENTS: [&str; 20] = [
    "This is actually a really interesting take on the technology. I've been following this for months now.",
    "I disagree completely. The data doesn't support this conclusion at all. Has anyone actually read the research?",
    "As someone who works in this field, I can confirm that this is mostly accurate. The implementation details are spot on.",
    "Why is everyone so negative? This could be a game-changer if implemented correctly.",
    "I tried this approach last year and it didn't work for my use case. Maybe I was doing something wrong?",
    "The cost-benefit analysis here is completely off. The ROI just isn't there in my experience.",
    "This reminds me of a similar project I worked on. The challenges are real but not insurmountable.",
    "I'm skeptical about the scalability claims. Has anyone actually tested this at scale?",
    "Great write-up! Thanks for sharing your insights. This gives me a lot to think about.",
    "I think the real issue here is that people are overthinking it. Sometimes the simple solution is the best one.",
    "Has anyone considered the security implications? This could be a major vulnerability if not handled properly.",
    "I've been waiting for something like this for years. Finally, someone gets it right!",
    "The documentation is terrible though. How are people supposed to implement this without proper guides?",
    "This is just another overhyped technology that will fade away in a few months. Seen it before.",
    "I disagree with the negative comments. This has real potential if the community gets behind it.",
    "The performance benchmarks look promising, but I'd like to see more real-world testing.",
    "I'm concerned about the long-term maintenance. Who's going to support this in 5 years?",
    "This is exactly what I needed for my project. Thanks for the detailed explanation!",
    "I think people are missing the bigger picture here. This is about more than just the technology.",
    "The learning curve is too steep for most developers. We need better tooling and examples.",
];

pub fn fallback_comments() -> Vec<String> {
    FALLBACK_COMMENTS.iter().map(|c| c.to_string()).collect()
}

/// A thread as seen by the rest of the pipeline
#[derive(Debug, Clone, Serialize)]
pub struct FetchedThread {
    pub url: String,
    /// Lower-cased community name, `unknown` when the URL has none
    pub community: String,
    pub title: String,
    pub comments: Vec<String>,
    /// True when `comments` is the canned set
    pub from_fallback: bool,
}

/// Source of thread comments. Implementations never fail; they fall back to canned data.
#[async_trait::async_trait]
pub trait ThreadSource: Send + Sync {
    async fn fetch_thread(&self, url: &str) -> FetchedThread;

    /// `fetch(threadUrl) -> comments`
    async fn fetch(&self, url: &str) -> Vec<String> {
        self.fetch_thread(url).await.comments
    }
}

/// Fetches threads through Reddit's public `.json` listing endpoint (no OAuth)
pub struct RedditFetcher {
    client: Client,
    max_comments: usize,
    offline: bool,
}

impl RedditFetcher {
    pub fn new(timeout_secs: u64, max_comments: usize, user_agent: Option<&str>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent.unwrap_or(BROWSER_USER_AGENT))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            client,
            max_comments,
            offline: false,
        })
    }

    /// Serve canned comments without touching the network
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    /// Fetch the post title and comment bodies. Errors on transport failure,
    /// non-success status or an unexpected body shape.
    pub async fn try_fetch(&self, url: &str) -> Result<(Option<String>, Vec<String>)> {
        let json_url = reddit_json_url(url);
        let response = self
            .client
            .get(&json_url)
            .header("Accept", "application/json,text/html;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
            .context("failed to fetch thread listing")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("thread fetch failed with status: {}", status);
        }

        let listings: Vec<Listing> = response
            .json()
            .await
            .context("failed to parse thread listing")?;

        let title = listings
            .first()
            .and_then(|post| post.data.children.first())
            .and_then(|child| child.data.title.clone())
            .filter(|t| !t.trim().is_empty());

        let comments = listings
            .get(1)
            .map(|listing| {
                listing
                    .data
                    .children
                    .iter()
                    .filter_map(|child| child.data.body.as_deref())
                    .map(str::trim)
                    .filter(|body| !body.is_empty() && *body != "[deleted]" && *body != "[removed]")
                    .take(self.max_comments)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok((title, comments))
    }
}

#[async_trait::async_trait]
impl ThreadSource for RedditFetcher {
    async fn fetch_thread(&self, url: &str) -> FetchedThread {
        let community = extract_community(url);
        let slug_title = title_from_url(url).unwrap_or_else(|| format!("r/{} thread", community));

        if self.offline {
            return FetchedThread {
                url: url.to_string(),
                community,
                title: slug_title,
                comments: fallback_comments(),
                from_fallback: true,
            };
        }

        let (title, comments, from_fallback) = match self.try_fetch(url).await {
            Ok((title, comments)) if !comments.is_empty() => {
                info!(url, comments = comments.len(), "thread fetched");
                (title.unwrap_or(slug_title), comments, false)
            }
            Ok((title, _)) => {
                warn!(url, "thread has no comments, serving fallback comments");
                (title.unwrap_or(slug_title), fallback_comments(), true)
            }
            Err(e) => {
                warn!(url, error = %e, "thread fetch failed, serving fallback comments");
                (slug_title, fallback_comments(), true)
            }
        };

        FetchedThread {
            url: url.to_string(),
            community,
            title,
            comments,
            from_fallback,
        }
    }
}

/// `https://www.reddit.com/r/x/comments/id/slug` -> `.../slug/.json`
pub fn reddit_json_url(thread_url: &str) -> String {
    let base = match url::Url::parse(thread_url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => thread_url.to_string(),
    };

    if base.ends_with(".json") {
        base
    } else if base.ends_with('/') {
        format!("{}.json", base)
    } else {
        format!("{}/.json", base)
    }
}

/// Lower-cased segment following `/r/`, or `unknown`
pub fn extract_community(thread_url: &str) -> String {
    let path = url::Url::parse(thread_url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| thread_url.to_string());

    let mut segments = path.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("r") {
            if let Some(name) = segments.next() {
                return name.to_lowercase();
            }
        }
    }
    "unknown".to_string()
}

/// Human-readable title from the URL slug after `/comments/<id>/`
pub fn title_from_url(thread_url: &str) -> Option<String> {
    let parsed = url::Url::parse(thread_url).ok()?;
    let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();
    let idx = segments.iter().position(|s| *s == "comments")?;
    let slug = segments.get(idx + 2)?;
    let slug = slug.trim_end_matches(".json");
    if slug.is_empty() {
        return None;
    }
    Some(slug.replace('_', " "))
}

// Reddit listing JSON: [post listing, comment listing]
#[derive(Debug, Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    #[serde(default)]
    children: Vec<ListingChild>,
}

#[derive(Debug, Deserialize)]
struct ListingChild {
    data: ChildData,
}

#[derive(Debug, Deserialize)]
struct ChildData {
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    title: Option<String>,
}
