//! GitHub search connector: surfaces stale candidate repositories.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Months, Utc};
use fossick_core::{compute_idea_score, Classifier, Repo};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const CRATE_NAME: &str = "fossick-github";

const SEARCH_URL: &str = "https://api.github.com/search/repositories";
const SEARCH_ACCEPT: &str = "application/vnd.github.mercy-preview+json";
const QUERIES_PER_CYCLE: usize = 3;
const RESULTS_PER_QUERY: u32 = 30;
const MIN_STARS: u32 = 5;
const STALE_AFTER_MONTHS: u32 = 24;

/// Heuristic phrases that tend to surface unmaintained or prototype projects.
pub const QUERY_POOL: [&str; 10] = [
    "abandoned project",
    "prototype NOT maintained",
    "experiment NOT fork",
    "proof of concept",
    "hackathon project",
    "side project",
    "weekend project",
    "toy project idea",
    "mvp startup",
    "concept app",
];

/// Connector failure taxonomy. Per-query network/status/decode errors are
/// logged and skipped inside a fetch; only the explicit rate-limit signal
/// aborts the whole call, carrying the repos collected before the abort so
/// the caller can still persist them.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GitHub search rate limit hit (HTTP 403)")]
    RateLimited { fetched: Vec<Repo> },
}

/// Seam between the fetch pipeline and the refresh cycle, so the cycle is
/// testable with stub sources.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn fetch_candidates(&self) -> Result<Vec<Repo>, FetchError>;
}

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub token: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            token: None,
            user_agent: "fossick-bot/0.1".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
pub struct SearchClient {
    http: reqwest::Client,
    token: Option<String>,
    classifier: Classifier,
}

impl SearchClient {
    pub fn new(config: SearchConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            token: config.token,
            classifier: Classifier::default(),
        })
    }
}

#[async_trait]
impl CandidateSource for SearchClient {
    /// Runs three randomized searches, deduplicates across them by external
    /// ID, and maps raw records into scored, categorized domain entities.
    async fn fetch_candidates(&self) -> Result<Vec<Repo>, FetchError> {
        let cutoff = stale_cutoff(Utc::now());
        let phrases = pick_query_phrases(&mut rand::thread_rng());

        let mut seen = HashSet::new();
        let mut repos = Vec::new();

        let per_page = RESULTS_PER_QUERY.to_string();
        for phrase in phrases {
            let query = build_search_query(phrase, &cutoff);
            let mut request = self
                .http
                .get(SEARCH_URL)
                .query(&[
                    ("q", query.as_str()),
                    ("sort", "stars"),
                    ("order", "desc"),
                    ("per_page", per_page.as_str()),
                ])
                .header(ACCEPT, SEARCH_ACCEPT);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    warn!(phrase, error = %err, "search request failed, skipping query");
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::FORBIDDEN {
                return Err(FetchError::RateLimited { fetched: repos });
            }
            if !status.is_success() {
                warn!(phrase, %status, "search returned non-success, skipping query");
                continue;
            }

            let body: SearchResponse = match response.json().await {
                Ok(body) => body,
                Err(err) => {
                    warn!(phrase, error = %err, "decoding search response failed, skipping query");
                    continue;
                }
            };

            let fetched = body.items.len();
            for item in body.items {
                push_unique(&self.classifier, &mut seen, &mut repos, item);
            }
            debug!(phrase, fetched, "search query completed");
        }

        info!(total = repos.len(), "unique candidate repos fetched");
        Ok(repos)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: i64,
    name: String,
    full_name: String,
    owner: SearchOwner,
    html_url: String,
    description: Option<String>,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(rename = "stargazers_count")]
    stargazers: i32,
    #[serde(rename = "forks_count")]
    forks: i32,
    #[serde(default)]
    pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SearchOwner {
    login: String,
    avatar_url: String,
}

fn stale_cutoff(now: DateTime<Utc>) -> String {
    let cutoff = now
        .checked_sub_months(Months::new(STALE_AFTER_MONTHS))
        .unwrap_or(now);
    cutoff.format("%Y-%m-%d").to_string()
}

fn build_search_query(phrase: &str, cutoff: &str) -> String {
    format!("{phrase} pushed:<{cutoff} stars:>{MIN_STARS}")
}

fn pick_query_phrases<R: Rng + ?Sized>(rng: &mut R) -> Vec<&'static str> {
    QUERY_POOL
        .choose_multiple(rng, QUERIES_PER_CYCLE)
        .copied()
        .collect()
}

fn push_unique(
    classifier: &Classifier,
    seen: &mut HashSet<i64>,
    out: &mut Vec<Repo>,
    item: SearchItem,
) {
    if !seen.insert(item.id) {
        return;
    }
    out.push(map_item(classifier, item));
}

/// Normalizes nullable raw fields and derives score/category at fetch time.
fn map_item(classifier: &Classifier, item: SearchItem) -> Repo {
    let description = item.description.unwrap_or_default();
    let language = item.language.unwrap_or_default();
    Repo {
        idea_score: compute_idea_score(item.stargazers, item.forks, &description, &item.topics),
        category: classifier.classify(&item.name, &description, &item.topics, &language),
        id: item.id,
        name: item.name,
        full_name: item.full_name,
        owner_login: item.owner.login,
        owner_avatar: item.owner.avatar_url,
        html_url: item.html_url,
        description,
        language,
        topics: item.topics,
        stargazers: item.stargazers,
        forks: item.forks,
        pushed_at: item.pushed_at.unwrap_or(DateTime::UNIX_EPOCH),
        created_at: item.created_at.unwrap_or(DateTime::UNIX_EPOCH),
        fetched_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fossick_core::Category;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn item(id: i64, name: &str) -> SearchItem {
        SearchItem {
            id,
            name: name.to_string(),
            full_name: format!("someone/{name}"),
            owner: SearchOwner {
                login: "someone".to_string(),
                avatar_url: "https://avatars.example/1".to_string(),
            },
            html_url: format!("https://github.com/someone/{name}"),
            description: None,
            language: None,
            topics: vec![],
            stargazers: 12,
            forks: 3,
            pushed_at: Utc.with_ymd_and_hms(2022, 4, 1, 0, 0, 0).single(),
            created_at: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).single(),
        }
    }

    #[test]
    fn search_query_combines_phrase_cutoff_and_star_floor() {
        let query = build_search_query("abandoned project", "2024-08-24");
        assert_eq!(query, "abandoned project pushed:<2024-08-24 stars:>5");
    }

    #[test]
    fn cutoff_is_two_years_before_now() {
        let now = Utc.with_ymd_and_hms(2026, 8, 24, 12, 0, 0).single().unwrap();
        assert_eq!(stale_cutoff(now), "2024-08-24");
    }

    #[test]
    fn phrase_selection_is_three_distinct_pool_members() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let phrases = pick_query_phrases(&mut rng);
            assert_eq!(phrases.len(), 3);
            let unique: HashSet<_> = phrases.iter().collect();
            assert_eq!(unique.len(), 3);
            assert!(phrases.iter().all(|p| QUERY_POOL.contains(p)));
        }
    }

    #[test]
    fn duplicate_ids_across_queries_collapse_to_one_entry() {
        let classifier = Classifier::default();
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        // Same ID showing up in two different query result pages.
        push_unique(&classifier, &mut seen, &mut out, item(42, "ghost-town"));
        push_unique(&classifier, &mut seen, &mut out, item(7, "tumbleweed"));
        push_unique(&classifier, &mut seen, &mut out, item(42, "ghost-town"));

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].id, 42);
        assert_eq!(out[1].id, 7);
    }

    #[test]
    fn mapping_normalizes_nullable_fields_and_derives_score() {
        let classifier = Classifier::default();
        let mut raw = item(1, "dusty-react-app");
        raw.description = Some("an old react dashboard".to_string());
        raw.language = Some("TypeScript".to_string());

        let repo = map_item(&classifier, raw);
        assert_eq!(repo.category, Category::Web);
        assert_eq!(
            repo.idea_score,
            compute_idea_score(12, 3, "an old react dashboard", &[])
        );

        let bare = map_item(&classifier, item(2, "untitled"));
        assert_eq!(bare.description, "");
        assert_eq!(bare.language, "");
        assert!(bare.topics.is_empty());
    }

    #[test]
    fn search_response_decodes_github_payload_shape() {
        let payload = serde_json::json!({
            "total_count": 1,
            "incomplete_results": false,
            "items": [{
                "id": 99,
                "name": "relic",
                "full_name": "ghost/relic",
                "owner": {"login": "ghost", "avatar_url": "https://avatars.example/9"},
                "html_url": "https://github.com/ghost/relic",
                "description": null,
                "language": null,
                "stargazers_count": 8,
                "forks_count": 1,
                "pushed_at": "2022-05-01T10:00:00Z",
                "created_at": "2019-01-01T00:00:00Z"
            }]
        });
        let decoded: SearchResponse = serde_json::from_value(payload).unwrap();
        assert_eq!(decoded.items.len(), 1);
        assert_eq!(decoded.items[0].id, 99);
        assert!(decoded.items[0].description.is_none());
        assert!(decoded.items[0].topics.is_empty());
    }
}
