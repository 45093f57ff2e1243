use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::Uri;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use stash_core::protocol::{
    PullRequest, PullResponse, PushRequest, PushResponse, HEALTH_PATH, PULL_PATH, PUSH_PATH,
};
use stash_core::util::{now_millis, owner_fingerprint};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{RateLimitMetricsSnapshot, SyncEndpoint, SyncRateLimiter};
use crate::store::DocumentStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<DocumentStore>,
    rate_limiter: Arc<SyncRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, store: Arc<DocumentStore>) -> Self {
        Self {
            rate_limiter: Arc::new(SyncRateLimiter::from_config(config.as_ref())),
            config,
            store,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .route(PULL_PATH, post(pull))
        .route(PUSH_PATH, post(push))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: now_millis(),
        rate_limit: state.rate_limiter.metrics_snapshot().await,
    })
}

async fn pull(
    State(state): State<AppState>,
    payload: Result<Json<PullRequest>, JsonRejection>,
) -> Result<Json<PullResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| reject("sync_pull", rejection))?;
    request
        .validate()
        .map_err(|message| invalid("sync_pull", message))?;
    state
        .rate_limiter
        .check(SyncEndpoint::Pull, &request.user_id)
        .await?;

    let timestamp = now_millis();
    let items = state
        .store
        .get_documents(&request.user_id, request.since)
        .await?;
    tracing::info!(
        endpoint = "sync_pull",
        owner = owner_fingerprint(&request.user_id),
        since = request.since,
        items = items.len(),
        "Served pull"
    );
    Ok(Json(PullResponse { items, timestamp }))
}

async fn push(
    State(state): State<AppState>,
    payload: Result<Json<PushRequest>, JsonRejection>,
) -> Result<Json<PushResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| reject("sync_push", rejection))?;
    request
        .validate()
        .map_err(|message| invalid("sync_push", message))?;
    state
        .rate_limiter
        .check(SyncEndpoint::Push, &request.user_id)
        .await?;

    state
        .store
        .upsert_documents(&request.user_id, &request.items)
        .await?;
    tracing::info!(
        endpoint = "sync_push",
        owner = owner_fingerprint(&request.user_id),
        items = request.items.len(),
        "Applied push"
    );
    Ok(Json(PushResponse {
        success: true,
        timestamp: now_millis(),
    }))
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("no route for {}", uri.path()))
}

fn reject(endpoint: &'static str, rejection: JsonRejection) -> AppError {
    tracing::info!(endpoint, "Rejected malformed body: {}", rejection.body_text());
    AppError::from(rejection)
}

fn invalid(endpoint: &'static str, message: String) -> AppError {
    tracing::info!(endpoint, "Rejected invalid payload: {message}");
    AppError::invalid_payload(message)
}
