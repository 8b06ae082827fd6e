//! Axum JSON API: repository listing, stats, and the refresh trigger.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use fossick_core::{Category, Repo};
use fossick_storage::{RepoQuery, RepoStore, SortOrder};
use fossick_sync::{Refresher, TriggerRejection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

pub const CRATE_NAME: &str = "fossick-web";

const MAX_SEARCH_CHARS: usize = 100;
const MAX_PAGE: i64 = 1000;

pub struct AppState {
    pub store: RepoStore,
    pub refresher: Arc<Refresher>,
}

#[derive(Debug, Serialize)]
struct RepoListResponse {
    repos: Vec<Repo>,
    total: i64,
    page: i64,
    per_page: i64,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    categories: HashMap<String, i64>,
    total: i64,
}

/// Raw query-string inputs. Kept as strings so junk values degrade to
/// defaults instead of a 400, matching the lenient reference behavior.
#[derive(Debug, Default, Deserialize)]
struct ListParams {
    category: Option<String>,
    sort: Option<String>,
    search: Option<String>,
    page: Option<String>,
    per_page: Option<String>,
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/repos", get(list_repos_handler))
        .route("/api/repos/refresh", post(refresh_handler))
        .route("/api/stats", get(stats_handler))
        .layer(cors)
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn list_repos_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let query = normalize_list_params(&params);
    match state.store.query(&query).await {
        Ok((repos, total)) => Json(RepoListResponse {
            repos,
            total,
            page: query.page,
            per_page: query.per_page,
        })
        .into_response(),
        Err(err) => {
            error!(error = %err, "querying repos failed");
            internal_error()
        }
    }
}

async fn refresh_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.refresher.trigger_detached() {
        Ok(()) => Json(json!({"status": "refresh started"})).into_response(),
        Err(TriggerRejection::Cooldown { retry_after }) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "refresh on cooldown",
                "retry_after": retry_after.as_secs(),
            })),
        )
            .into_response(),
        Err(TriggerRejection::Busy) => (
            StatusCode::CONFLICT,
            Json(json!({"error": "refresh already in progress"})),
        )
            .into_response(),
    }
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.stats().await {
        Ok(categories) => {
            let total = categories.values().sum();
            Json(StatsResponse { categories, total }).into_response()
        }
        Err(err) => {
            error!(error = %err, "querying stats failed");
            internal_error()
        }
    }
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "internal server error"})),
    )
        .into_response()
}

fn normalize_list_params(params: &ListParams) -> RepoQuery {
    let category = params
        .category
        .as_deref()
        .filter(|c| *c != "all")
        .and_then(Category::parse);

    let search: String = params
        .search
        .as_deref()
        .unwrap_or_default()
        .chars()
        .take(MAX_SEARCH_CHARS)
        .collect();

    let page = params
        .page
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1)
        .clamp(1, MAX_PAGE);
    let per_page = params
        .per_page
        .as_deref()
        .and_then(|v| v.parse().ok())
        .filter(|v| (1..=100).contains(v))
        .unwrap_or(30);

    RepoQuery {
        category,
        sort: SortOrder::parse(params.sort.as_deref().unwrap_or_default()),
        search,
        page,
        per_page,
    }
}
