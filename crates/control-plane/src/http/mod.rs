use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::telemetry;

mod groups;
mod ingest;
mod nodes;
mod services;

pub fn build_router(state: AppState) -> Router {
    let bearer_guarded = Router::new()
        .merge(ingest::router())
        .merge(nodes::validate_router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .merge(bearer_guarded)
        .merge(nodes::router())
        .merge(groups::router())
        .merge(services::router())
        // Handler panics become plain 500s instead of dropped connections.
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry::render_metrics(),
    )
}

/// Bearer check shared by the ingest and validate routes. An empty
/// configured token disables the check (development mode).
async fn require_api_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> ApiResult<Response> {
    if state.api_token.is_empty() {
        return Ok(next.run(req).await);
    }

    let token = extract_bearer(req.headers())?;
    if token != state.api_token {
        return Err(AppError::unauthorized("invalid api token"));
    }

    Ok(next.run(req).await)
}

pub fn extract_bearer(headers: &HeaderMap) -> ApiResult<String> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("missing authorization header"))?;

    let value = value
        .to_str()
        .map_err(|_| AppError::unauthorized("invalid authorization header"))?;

    let prefix = "Bearer ";
    if !value.starts_with(prefix) {
        return Err(AppError::unauthorized("invalid authorization scheme"));
    }

    Ok(value[prefix.len()..].to_string())
}
