use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use metrics::counter;
use serde_json::{json, Value};
use tracing::{debug, info};

use syslens_common::envelope::{
    EnvelopeFlags, AGGREGATOR_ID_HEADER, COMPRESSED_HEADER, ENCRYPTED_HEADER,
};

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/nodes/{node_id}/metrics", post(submit_metrics))
}

/// Accepts one metrics envelope: invert the framing, stamp `received_at`,
/// and hand the payload to the time-series store. 200 means the points
/// were queued; a store error inside its grace window becomes a 500 so
/// the caller can see backpressure.
async fn submit_metrics(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    // Provenance only; persistence is decided by the bearer, not this header.
    let aggregator_id = headers
        .get(AGGREGATOR_ID_HEADER)
        .and_then(|v| v.to_str().ok());
    match aggregator_id {
        Some(aggregator) => {
            debug!(node_id, aggregator, "metrics received via aggregator");
        }
        None => debug!(node_id, "metrics received directly"),
    }

    let flags = EnvelopeFlags {
        encrypted: headers
            .get(ENCRYPTED_HEADER)
            .is_some_and(|v| v.as_bytes() == b"true"),
        compressed: headers
            .get(COMPRESSED_HEADER)
            .is_some_and(|v| v.as_bytes() == b"gzip"),
    };

    let payload = state.codec.decode(&body, flags).map_err(|err| {
        counter!("control_plane_ingest_total", "outcome" => "bad_envelope").increment(1);
        AppError::bad_request(err.to_string())
    })?;

    let mut metrics: Value = match serde_json::from_slice(&payload) {
        Ok(value @ Value::Object(_)) => value,
        _ => {
            counter!("control_plane_ingest_total", "outcome" => "bad_json").increment(1);
            return Err(AppError::bad_request("invalid JSON payload"));
        }
    };

    metrics["received_at"] = json!(Utc::now().timestamp());

    state.store.store_metrics(&node_id, &metrics).await.map_err(|err| {
        counter!("control_plane_ingest_total", "outcome" => "store_error").increment(1);
        AppError::from(err)
    })?;

    counter!("control_plane_ingest_total", "outcome" => "stored").increment(1);
    info!(node_id, "metrics stored");

    Ok((StatusCode::OK, Json(json!({"status": "success"}))))
}
