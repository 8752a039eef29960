pub mod monitoring;
use crate::pager::{FetchNextPage, PageView, PaginatedItems};
use crate::search::{ItemTree, RecentActivity, SearchError, SearchPage};
use crate::state::{AppState, SessionId};
use crate::types::{Category, Item, ItemId};
use prometheus_client::encoding::text::encode;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("a page fetch is already in progress for session {0}")]
    Busy(SessionId),
    #[error("upstream request failed: {0}")]
    Upstream(String),
    #[error("metrics encoding failed")]
    Metrics(#[from] std::fmt::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Busy(_) => StatusCode::CONFLICT,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(event = "api_request_failed", status = status.as_u16(), error = %self);
        }
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match &err {
            SearchError::Client(client) if client.status() == Some(404) => {
                ApiError::NotFound("search resource".to_string())
            }
            _ => ApiError::Upstream(err.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionResponse {
    pub session_id: SessionId,
    #[serde(flatten)]
    pub view: PageView,
}

#[derive(Deserialize, Debug)]
pub struct SearchParams {
    #[serde(default)]
    pub query: String,
    pub tags: Option<String>,
    #[serde(default)]
    pub page: u32,
    /// Passed through as Algolia `numericFilters`, e.g. `created_at_i>1700000000`.
    pub numeric_filters: Option<String>,
}

// Health endpoint handler
async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> Result<String, ApiError> {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry)?;
    Ok(buffer)
}

/// Registers a session and materializes its first page. A list resolution failure still
/// creates the session; the error is reported in the view and `next` retries it.
async fn open_session(
    state: &AppState,
    session: PaginatedItems,
) -> (StatusCode, Json<SessionResponse>) {
    let (session_id, session) = state.insert_session(session);
    let cancel = state.shutdown_token.child_token();
    session.fetch_next_page(&cancel).await;
    info!(event = "session_opened", session_id, items = session.item_count());
    (
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id,
            view: session.snapshot(),
        }),
    )
}

async fn create_feed_session(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let category: Category = category.parse().map_err(ApiError::BadRequest)?;
    let session = PaginatedItems::for_category(state.upstream.clone(), category, None);
    Ok(open_session(&state, session).await)
}

async fn create_comment_session(
    State(state): State<Arc<AppState>>,
    Path(story_id): Path<ItemId>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let cancel = state.shutdown_token.child_token();
    let story = state
        .story(story_id, &cancel)
        .await
        .map_err(|err| ApiError::Upstream(err.to_string()))?
        .ok_or_else(|| ApiError::NotFound(format!("item {story_id}")))?;

    let session = PaginatedItems::for_comments(state.upstream.clone(), story.child_ids, None);
    Ok(open_session(&state, session).await)
}

fn find_session(state: &AppState, session_id: SessionId) -> Result<Arc<PaginatedItems>, ApiError> {
    state
        .session(session_id)
        .ok_or_else(|| ApiError::NotFound(format!("session {session_id}")))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = find_session(&state, session_id)?;
    Ok(Json(SessionResponse {
        session_id,
        view: session.snapshot(),
    }))
}

/// Fetches the next page. Exhausted sessions answer with their unchanged view.
async fn next_page(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = find_session(&state, session_id)?;
    let cancel = state.shutdown_token.child_token();
    if let FetchNextPage::AlreadyFetching = session.fetch_next_page(&cancel).await {
        return Err(ApiError::Busy(session_id));
    }
    Ok(Json(SessionResponse {
        session_id,
        view: session.snapshot(),
    }))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<SessionId>,
) -> Result<StatusCode, ApiError> {
    if state.remove_session(session_id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("session {session_id}")))
    }
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchPage>, ApiError> {
    let tags = params.tags.as_deref().unwrap_or("story");
    let cancel = state.shutdown_token.child_token();
    let page = state
        .search
        .search_by_date(
            tags,
            &params.query,
            params.page,
            params.numeric_filters.as_deref(),
            &cancel,
        )
        .await?;
    Ok(Json(page))
}

async fn front_page(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Item>>, ApiError> {
    let cancel = state.shutdown_token.child_token();
    Ok(Json(state.search.front_page(&cancel).await?))
}

/// Newest stories and comments from the last hour.
async fn recent_activity(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RecentActivity>, ApiError> {
    let cancel = state.shutdown_token.child_token();
    Ok(Json(state.search.recent_activity(&cancel).await?))
}

async fn item_tree(
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<ItemId>,
) -> Result<Json<ItemTree>, ApiError> {
    let cancel = state.shutdown_token.child_token();
    Ok(Json(state.search.item_tree(item_id, &cancel).await?))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .route("/api/feeds/:category", post(create_feed_session))
        .route("/api/items/:id/comments", post(create_comment_session))
        .route("/api/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/sessions/:id/next", post(next_page))
        .route("/api/search", get(search))
        .route("/api/front-page", get(front_page))
        .route("/api/recent", get(recent_activity))
        .route("/api/items/:id/tree", get(item_tree))
        .with_state(state)
}

/// Starts the HTTP API on the supplied socket address and returns the bound address.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    {
        let mut registry = state.registry.write().await;
        monitoring::init_metrics(&mut registry).await;
        monitoring::register_build_info_metric(&mut registry, "hn_pager");
    }

    let shutdown_token = state.shutdown_token.clone();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(event = "server_listening", addr = %local_addr);

    let server_handle = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await;
        if let Err(err) = result {
            error!(event = "server_failed", error = %err, "HTTP server stopped with an error");
        }
    });

    Ok((local_addr, server_handle))
}
