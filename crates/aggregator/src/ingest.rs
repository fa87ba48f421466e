use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use metrics::counter;
use serde_json::{json, Value};
use tracing::{debug, warn};

use syslens_common::api::{ErrorBody, NodeCredentials};
use syslens_common::envelope::{
    EnvelopeCodec, EnvelopeFlags, COMPRESSED_HEADER, ENCRYPTED_HEADER,
};

use crate::buffer::MetricsBuffer;
use crate::cp_client::ControlPlaneClient;
use crate::sessions::SessionTable;

#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionTable,
    pub buffer: MetricsBuffer,
    pub codec: EnvelopeCodec,
    pub control_plane: ControlPlaneClient,
}

pub fn build_router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/api/v1/nodes/{node_id}/metrics", post(node_metrics))
        .route("/api/v1/nodes/{node_id}/heartbeat", post(node_heartbeat))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            node_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/nodes/register", post(register_node))
        .route("/api/v1/nodes", get(list_nodes))
        .merge(authed)
        // Handler panics become plain 500s instead of dropped connections.
        .layer(tower_http::catch_panic::CatchPanicLayer::new())
        .with_state(state)
}

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            code: status.as_u16(),
            message: message.into(),
        }),
    )
        .into_response()
}

/// Lenient session check: unknown and unverified nodes are logged and
/// allowed through so first contact works before registration completes.
async fn node_auth_middleware(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    req: Request,
    next: Next,
) -> Response {
    if node_id.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "bad_request", "missing node id");
    }

    match state.sessions.get(&node_id).await {
        None => {
            warn!(node_id, path = %req.uri().path(), "request from unregistered node");
        }
        Some(session) if !session.verified => {
            warn!(node_id, path = %req.uri().path(), "request from unverified node");
        }
        Some(_) => {}
    }

    next.run(req).await
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "time": Utc::now().to_rfc3339(),
    }))
}

async fn register_node(
    State(state): State<AppState>,
    body: Result<Json<NodeCredentials>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(err) => {
            warn!(?err, "failed to parse register request");
            return error_response(
                StatusCode::BAD_REQUEST,
                "bad_request",
                format!("invalid request body: {err}"),
            );
        }
    };

    debug!(node_id = %req.node_id, "node register request");

    match state
        .control_plane
        .validate_node(&req.node_id, &req.token)
        .await
    {
        Ok(true) => {
            state.sessions.register_or_update(&req.node_id, true).await;
            counter!("aggregator_register_total", "outcome" => "accepted").increment(1);
            (
                StatusCode::OK,
                Json(json!({"status": "ok", "node_id": req.node_id})),
            )
                .into_response()
        }
        Ok(false) => {
            counter!("aggregator_register_total", "outcome" => "rejected").increment(1);
            error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "node validation failed",
            )
        }
        Err(err) => {
            counter!("aggregator_register_total", "outcome" => "error").increment(1);
            error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                format!("node validation failed: {err}"),
            )
        }
    }
}

async fn node_metrics(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.sessions.touch(&node_id).await;

    let flags = flags_from_headers(&headers);
    let payload = match state.codec.decode(&body, flags) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(node_id, error = %err, "failed to process agent payload");
            counter!("aggregator_ingest_total", "outcome" => "bad_envelope").increment(1);
            return error_response(StatusCode::BAD_REQUEST, "bad_request", err.to_string());
        }
    };

    let mut metrics: Value = match serde_json::from_slice(&payload) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(_) | Err(_) => {
            counter!("aggregator_ingest_total", "outcome" => "bad_json").increment(1);
            return error_response(StatusCode::BAD_REQUEST, "bad_request", "invalid JSON payload");
        }
    };

    metrics["aggregator_received_at"] = json!(Utc::now().timestamp());
    state.buffer.publish(&node_id, metrics).await;
    counter!("aggregator_ingest_total", "outcome" => "buffered").increment(1);

    // 2xx means "buffered", not "persisted upstream".
    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

async fn node_heartbeat(State(state): State<AppState>, Path(node_id): Path<String>) -> Response {
    if !state.sessions.touch(&node_id).await {
        // Unknown nodes heartbeating are auto-registered, unverified.
        debug!(node_id, "heartbeat from unknown node; registering unverified");
        state.sessions.register_or_update(&node_id, false).await;
    }

    (StatusCode::OK, Json(json!({"status": "ok"}))).into_response()
}

async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    let nodes = state.sessions.snapshot().await;
    Json(json!({"status": "ok", "nodes": nodes}))
}

fn flags_from_headers(headers: &HeaderMap) -> EnvelopeFlags {
    EnvelopeFlags {
        encrypted: headers
            .get(ENCRYPTED_HEADER)
            .is_some_and(|v| v.as_bytes() == b"true"),
        compressed: headers
            .get(COMPRESSED_HEADER)
            .is_some_and(|v| v.as_bytes() == b"gzip"),
    }
}
