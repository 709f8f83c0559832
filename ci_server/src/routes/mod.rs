//! CI dashboard HTTP routes: webhook and JSON API.

pub mod api;
pub mod webhook;

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;

use crate::config::CiConfig;
use crate::models::build::CiBuild;
use crate::services::signature::SignatureValidator;
use crate::services::status_worker::StatusQueue;
use crate::store::{BuildPage, Store};

/// Header carrying the staff token.
pub const STAFF_TOKEN_HEADER: &str = "x-ci-staff-token";

/// Shared state for CI route handlers.
#[derive(Clone)]
pub struct CiRouterState {
    pub store: Arc<dyn Store>,
    pub config: Arc<CiConfig>,
    pub validator: SignatureValidator,
    pub status_queue: StatusQueue,
}

impl CiRouterState {
    pub fn new(store: Arc<dyn Store>, config: CiConfig, status_queue: StatusQueue) -> Self {
        let validator = SignatureValidator::new(config.github_webhook_secret.as_bytes());
        Self {
            store,
            config: Arc::new(config),
            validator,
            status_queue,
        }
    }

    fn is_staff(&self, headers: &HeaderMap) -> bool {
        headers
            .get(STAFF_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|token| self.config.is_staff_token(token))
    }
}

/// Build the CI dashboard's Axum router (nested at `/ci`).
pub fn ci_router(state: CiRouterState) -> Router {
    Router::new()
        // Webhook
        .route("/webhook/github", post(webhook_handler))
        // Build API
        .route("/api/builds", get(list_builds))
        .route("/api/builds/{build_id}", get(get_build))
        .route("/api/builds/{build_id}/status", put(set_build_status))
        // Repository API
        .route("/api/repos", get(list_repositories))
        .route("/api/repos/{owner}/{name}/builds", get(repository_builds))
        .route(
            "/api/repos/{owner}/{name}/branches/{*branch}",
            get(branch_builds).delete(remove_branch),
        )
        .route("/api/repos/{owner}/{name}/commits/{sha}", get(commit_builds))
        .with_state(state)
}

fn api_error(e: api::ApiError) -> StatusCode {
    let code = e.status_code();
    if code.is_server_error() {
        tracing::error!("API error: {e:#}");
    } else {
        tracing::debug!("API request rejected: {e}");
    }
    code
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, StatusCode> {
    webhook::handle_webhook(&state, &headers, body)
        .await
        .map(|outcome| outcome.message())
}

// ── Build API ──

async fn list_builds(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    Query(params): Query<api::BuildListParams>,
) -> Result<Json<BuildPage>, StatusCode> {
    api::list_builds(state.store.as_ref(), params, state.is_staff(&headers))
        .await
        .map(Json)
        .map_err(api_error)
}

async fn get_build(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    Path(build_id): Path<i64>,
) -> Result<Json<api::BuildDetailJson>, StatusCode> {
    api::build_detail(state.store.as_ref(), build_id, state.is_staff(&headers))
        .await
        .map(Json)
        .map_err(api_error)
}

#[derive(Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

async fn set_build_status(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    Path(build_id): Path<i64>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<CiBuild>, StatusCode> {
    api::set_build_status(
        state.store.as_ref(),
        &state.status_queue,
        build_id,
        &update.status,
        state.is_staff(&headers),
    )
    .await
    .map(Json)
    .map_err(api_error)
}

// ── Repository API ──

#[derive(Deserialize)]
pub struct RepositoryListQuery {
    pub owner: Option<String>,
}

async fn list_repositories(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    Query(query): Query<RepositoryListQuery>,
) -> Result<Json<api::RepositoryListJson>, StatusCode> {
    api::list_repositories(
        state.store.as_ref(),
        query.owner.as_deref(),
        state.is_staff(&headers),
    )
    .await
    .map(Json)
    .map_err(api_error)
}

async fn repository_builds(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    Path((owner, name)): Path<(String, String)>,
    Query(params): Query<api::BuildListParams>,
) -> Result<Json<api::BuildListJson>, StatusCode> {
    api::repository_builds(
        state.store.as_ref(),
        &owner,
        &name,
        params,
        state.is_staff(&headers),
    )
    .await
    .map(Json)
    .map_err(api_error)
}

async fn branch_builds(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    Path((owner, name, branch)): Path<(String, String, String)>,
    Query(params): Query<api::BuildListParams>,
) -> Result<Json<api::BuildListJson>, StatusCode> {
    api::branch_builds(
        state.store.as_ref(),
        &owner,
        &name,
        &branch,
        params,
        state.is_staff(&headers),
    )
    .await
    .map(Json)
    .map_err(api_error)
}

async fn remove_branch(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    Path((owner, name, branch)): Path<(String, String, String)>,
) -> Result<StatusCode, StatusCode> {
    api::remove_branch(
        state.store.as_ref(),
        &owner,
        &name,
        &branch,
        state.is_staff(&headers),
    )
    .await
    .map(|()| StatusCode::NO_CONTENT)
    .map_err(api_error)
}

async fn commit_builds(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    Path((owner, name, sha)): Path<(String, String, String)>,
    Query(params): Query<api::BuildListParams>,
) -> Result<Json<api::BuildListJson>, StatusCode> {
    api::commit_builds(
        state.store.as_ref(),
        &owner,
        &name,
        &sha,
        params,
        state.is_staff(&headers),
    )
    .await
    .map(Json)
    .map_err(api_error)
}
