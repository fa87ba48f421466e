use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use syslens_common::api::{NodeCredentials, RegisterNodeRequest, SuccessBody};

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::identity;
use crate::persistence::{self as db, NodeKind, NodeRecord, NodeStatus, NodeUpdate};
use crate::validation;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/nodes/register", post(register_node))
        .route("/api/v1/nodes", get(list_nodes))
        .route(
            "/api/v1/nodes/{node_id}",
            get(get_node).put(update_node).delete(delete_node),
        )
        .route(
            "/api/v1/nodes/{node_id}/configuration",
            put(update_configuration),
        )
        .route("/api/v1/nodes/{node_id}/token", get(recover_token))
}

/// Validate sits behind the shared-bearer middleware with the ingest
/// route; the rest of the management surface is open.
pub fn validate_router() -> Router<AppState> {
    Router::new().route("/api/v1/nodes/validate", post(validate_node))
}

/// Catalog view of a node. Credentials never leave through this type.
#[derive(Debug, Serialize)]
struct NodeView {
    id: String,
    name: String,
    labels: Value,
    configuration: Value,
    #[serde(rename = "type")]
    kind: NodeKind,
    status: NodeStatus,
    group_id: Option<String>,
    service_id: Option<String>,
    description: Option<String>,
    registered_at: DateTime<Utc>,
    last_active_at: DateTime<Utc>,
    created_time: DateTime<Utc>,
    updated_time: DateTime<Utc>,
}

impl From<NodeRecord> for NodeView {
    fn from(record: NodeRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            labels: record.labels.0,
            configuration: record.configuration.0,
            kind: record.kind,
            status: record.status,
            group_id: record.group_id,
            service_id: record.service_id,
            description: record.description,
            registered_at: record.registered_at,
            last_active_at: record.last_active_at,
            created_time: record.created_time,
            updated_time: record.updated_time,
        }
    }
}

async fn ensure_references_exist(
    state: &AppState,
    group_id: Option<&str>,
    service_id: Option<&str>,
) -> ApiResult<()> {
    if let Some(group_id) = group_id {
        if db::groups::get_group(&state.db, group_id).await?.is_none() {
            return Err(AppError::bad_request(format!("unknown group: {group_id}")));
        }
    }
    if let Some(service_id) = service_id {
        if db::services::get_service(&state.db, service_id).await?.is_none() {
            return Err(AppError::bad_request(format!(
                "unknown service: {service_id}"
            )));
        }
    }
    Ok(())
}

/// Registers a new node or idempotently updates an existing one. New
/// nodes get minted credentials and the cleartext token is returned in
/// this response only. Re-registration merges fields and preserves the
/// stored token hash; re-issuance is an explicit operator action.
async fn register_node(
    State(state): State<AppState>,
    Json(req): Json<RegisterNodeRequest>,
) -> ApiResult<(StatusCode, Json<SuccessBody<Value>>)> {
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    ensure_references_exist(&state, req.group_id.as_deref(), req.service_id.as_deref()).await?;

    let existing = match &req.node_id {
        Some(node_id) => db::nodes::get_node(&state.db, node_id).await?,
        None => None,
    };

    if let Some(node) = existing {
        let update = NodeUpdate {
            name: Some(req.name),
            labels: req.labels.map(|labels| json!(labels)),
            group_id: req.group_id,
            service_id: req.service_id,
            description: req.description,
        };
        db::nodes::apply_node_update(&state.db, &node.id, update).await?;
        info!(node_id = %node.id, "node registration updated");

        return Ok((
            StatusCode::OK,
            Json(SuccessBody::new(json!({
                "node_id": node.id,
                "message": "node updated",
            }))),
        ));
    }

    let node_id = req
        .node_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(identity::generate_node_id);
    let issued = state.identity.mint(req.auth_token)?;

    let new_node = db::NewNode {
        id: node_id.clone(),
        name: req.name,
        auth_token_hash: issued.token_hash,
        encrypted_auth_token: Some(issued.encrypted_token),
        labels: req.labels.map(|labels| json!(labels)).unwrap_or(json!({})),
        configuration: json!({}),
        kind: match req.kind {
            Some(syslens_common::api::NodeKind::FixedService) => NodeKind::FixedService,
            _ => NodeKind::Agent,
        },
        group_id: req.group_id,
        service_id: req.service_id,
        description: req.description,
    };

    let record = db::nodes::create_node(&state.db, new_node).await?;
    info!(node_id = %record.id, "node registered");

    // The only moment the cleartext token leaves the control plane.
    Ok((
        StatusCode::OK,
        Json(SuccessBody::new(json!({
            "node_id": record.id,
            "auth_token": issued.token,
            "message": "node registered",
        }))),
    ))
}

/// Verification flow invoked by aggregators: bcrypt-verify the presented
/// token against the stored hash. Success marks the node active.
async fn validate_node(
    State(state): State<AppState>,
    Json(req): Json<NodeCredentials>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let Some(stored_hash) = db::nodes::get_token_hash(&state.db, &req.node_id).await? else {
        warn!(node_id = %req.node_id, "validate for unknown node");
        return Err(AppError::unauthorized("node validation failed"));
    };

    if !state.identity.verify(&req.token, &stored_hash) {
        warn!(node_id = %req.node_id, "node token mismatch");
        return Err(AppError::unauthorized("node validation failed"));
    }

    db::nodes::mark_node_active(&state.db, &req.node_id).await?;
    info!(node_id = %req.node_id, "node token validated");

    Ok(Json(SuccessBody::new(json!({"node_id": req.node_id}))))
}

#[derive(Debug, Deserialize)]
struct ListNodesParams {
    status: Option<String>,
    group_id: Option<String>,
    service_id: Option<String>,
}

async fn list_nodes(
    State(state): State<AppState>,
    Query(params): Query<ListNodesParams>,
) -> ApiResult<Json<SuccessBody<Vec<NodeView>>>> {
    let records = if let Some(status) = params.status {
        let status = parse_status(&status)?;
        db::nodes::list_nodes_by_status(&state.db, status).await?
    } else if let Some(group_id) = params.group_id {
        db::nodes::list_nodes_by_group(&state.db, &group_id).await?
    } else if let Some(service_id) = params.service_id {
        db::nodes::list_nodes_by_service(&state.db, &service_id).await?
    } else {
        db::nodes::list_nodes(&state.db).await?
    };

    Ok(Json(SuccessBody::new(
        records.into_iter().map(NodeView::from).collect(),
    )))
}

fn parse_status(raw: &str) -> ApiResult<NodeStatus> {
    match raw.to_ascii_lowercase().as_str() {
        "pending" => Ok(NodeStatus::Pending),
        "active" => Ok(NodeStatus::Active),
        "inactive" => Ok(NodeStatus::Inactive),
        other => Err(AppError::bad_request(format!(
            "unsupported status filter: {other}"
        ))),
    }
}

async fn get_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<SuccessBody<NodeView>>> {
    let record = db::nodes::get_node(&state.db, &node_id)
        .await?
        .ok_or_else(|| AppError::not_found("node not found"))?;

    Ok(Json(SuccessBody::new(record.into())))
}

#[derive(Debug, Deserialize)]
struct UpdateNodeRequest {
    name: Option<String>,
    labels: Option<Value>,
    group_id: Option<String>,
    service_id: Option<String>,
    description: Option<String>,
}

async fn update_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(req): Json<UpdateNodeRequest>,
) -> ApiResult<Json<SuccessBody<NodeView>>> {
    ensure_references_exist(&state, req.group_id.as_deref(), req.service_id.as_deref()).await?;

    let update = NodeUpdate {
        name: req.name,
        labels: req.labels,
        group_id: req.group_id,
        service_id: req.service_id,
        description: req.description,
    };
    let affected = db::nodes::apply_node_update(&state.db, &node_id, update).await?;
    if affected == 0 {
        return Err(AppError::not_found("node not found"));
    }

    let record = db::nodes::get_node(&state.db, &node_id)
        .await?
        .ok_or_else(|| AppError::not_found("node not found"))?;
    Ok(Json(SuccessBody::new(record.into())))
}

async fn delete_node(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let affected = db::nodes::delete_node(&state.db, &node_id).await?;
    if affected == 0 {
        return Err(AppError::not_found("node not found"));
    }

    info!(node_id, "node deleted");
    Ok(Json(SuccessBody::new(json!({"node_id": node_id}))))
}

/// Replaces the node configuration document. A JSON `null` body writes an
/// empty object so readers never see SQL NULL.
async fn update_configuration(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(configuration): Json<Value>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let stored = match configuration {
        Value::Null => None,
        value => {
            validation::validate_node_configuration(&value)?;
            Some(value)
        }
    };

    let affected = db::nodes::update_configuration(&state.db, &node_id, stored).await?;
    if affected == 0 {
        return Err(AppError::not_found("node not found"));
    }

    let record = db::nodes::get_node(&state.db, &node_id)
        .await?
        .ok_or_else(|| AppError::not_found("node not found"))?;
    Ok(Json(SuccessBody::new(json!({
        "node_id": node_id,
        "configuration": record.configuration.0,
    }))))
}

/// Operator recovery of the cleartext token from escrow. Compromise of
/// the master key reveals every token; the trade is recorded in the
/// design notes.
async fn recover_token(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let record = db::nodes::get_node(&state.db, &node_id)
        .await?
        .ok_or_else(|| AppError::not_found("node not found"))?;

    let Some(encrypted) = record.encrypted_auth_token else {
        return Err(AppError::not_found("node has no stored token"));
    };

    let token = state.identity.recover(&encrypted)?;
    info!(node_id, "node token recovered");

    Ok(Json(SuccessBody::new(json!({
        "node_id": node_id,
        "auth_token": token,
    }))))
}
