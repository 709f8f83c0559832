//! GitHub webhook handler: validates the delivery and turns pushes into builds.

use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use uuid::Uuid;

use crate::services::push_event::{PushEvent, PushEventError, RefKind};
use crate::services::{branch_service, build_service, plan_matcher, release_service};

use super::CiRouterState;

/// How a webhook delivery was handled, with its response text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Dispatched,
    NotListening,
    NoBranch,
    Duplicate,
    Ignored,
    Pong,
}

impl WebhookOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            WebhookOutcome::Dispatched => "OK",
            WebhookOutcome::NotListening => "Not listening for this repository",
            WebhookOutcome::NoBranch => "No branch found",
            WebhookOutcome::Duplicate => "Duplicate delivery",
            WebhookOutcome::Ignored => "Ignored event",
            WebhookOutcome::Pong => "pong",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            WebhookOutcome::Dispatched => "dispatched",
            WebhookOutcome::NotListening => "unknown_repository",
            WebhookOutcome::NoBranch => "no_branch",
            WebhookOutcome::Duplicate => "duplicate",
            WebhookOutcome::Ignored => "ignored",
            WebhookOutcome::Pong => "pong",
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Handle an incoming GitHub webhook delivery.
pub async fn handle_webhook(
    state: &CiRouterState,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<WebhookOutcome, StatusCode> {
    // Deliveries without an event header are treated as pushes.
    let event_type = header(headers, "x-github-event").unwrap_or("push");

    let signature = header(headers, "x-hub-signature-256")
        .or_else(|| header(headers, "x-hub-signature"))
        .unwrap_or("");
    if !state.validator.validate(&body, signature) {
        crate::metrics::webhook_received(event_type, "rejected");
        tracing::warn!(event = event_type, "Webhook signature validation failed");
        return Err(StatusCode::FORBIDDEN);
    }

    let result = match event_type {
        "push" => handle_push(state, headers, &body).await,
        "ping" => {
            tracing::info!("Received GitHub ping webhook");
            Ok(WebhookOutcome::Pong)
        }
        other => {
            tracing::debug!(event = other, "Ignoring webhook event");
            Ok(WebhookOutcome::Ignored)
        }
    };

    match &result {
        Ok(outcome) => crate::metrics::webhook_received(event_type, outcome.label()),
        Err(code) if code.is_client_error() => {
            crate::metrics::webhook_received(event_type, "malformed")
        }
        Err(_) => crate::metrics::webhook_received(event_type, "error"),
    }
    result
}

async fn handle_push(
    state: &CiRouterState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<WebhookOutcome, StatusCode> {
    let event = match PushEvent::from_slice(body) {
        Ok(event) => event,
        Err(PushEventError::MissingRef) => return Ok(WebhookOutcome::NoBranch),
        Err(e) => {
            tracing::warn!("Rejecting push webhook: {e}");
            return Err(StatusCode::BAD_REQUEST);
        }
    };

    let store = state.store.as_ref();
    let repo = store
        .find_repository_by_github_id(event.repository_id())
        .await
        .map_err(internal)?;
    let Some(repo) = repo else {
        tracing::debug!(
            github_id = event.repository_id(),
            "Push for a repository that is not registered"
        );
        return Ok(WebhookOutcome::NotListening);
    };

    let kind = event.ref_kind();
    let Some(branch_name) = branch_service::canonical_name(kind) else {
        tracing::debug!(repo = %repo.full_name(), git_ref = %event.git_ref, "Push to unrecognized ref");
        return Ok(WebhookOutcome::NoBranch);
    };

    let branch = branch_service::ensure_branch(store, &repo, &branch_name)
        .await
        .map_err(internal)?;

    if let RefKind::Tag(tag) = kind {
        if let Err(e) = release_service::record_release(store, &repo, tag).await {
            tracing::error!(repo = %repo.full_name(), tag, "Failed to record release: {e:#}");
        }
    }

    let plans = store
        .push_plans(repo.id, plan_matcher::plan_types_for(kind))
        .await
        .map_err(internal)?;
    let matched = plan_matcher::match_plans(plans, &event);

    let delivery_id = header(headers, "x-github-delivery").and_then(|v| Uuid::parse_str(v).ok());
    let dispatched = build_service::dispatch(
        store,
        &repo,
        &branch,
        matched,
        delivery_id,
        state.config.dedup_deliveries,
    )
    .await
    .map_err(internal)?;
    let Some(builds) = dispatched else {
        tracing::info!(
            delivery = ?delivery_id,
            repo = %repo.full_name(),
            "Duplicate delivery ignored"
        );
        return Ok(WebhookOutcome::Duplicate);
    };
    for build in &builds {
        state.status_queue.enqueue(build.id);
    }

    tracing::info!(
        repo = %repo.full_name(),
        branch = %branch.name,
        builds = builds.len(),
        "Push handled"
    );
    Ok(WebhookOutcome::Dispatched)
}

fn internal(e: anyhow::Error) -> StatusCode {
    tracing::error!("Webhook processing failed: {e:#}");
    StatusCode::INTERNAL_SERVER_ERROR
}
