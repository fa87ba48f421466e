use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use syslens_common::api::SuccessBody;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::persistence::{self as db, GroupRecord, NewGroup};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/groups", post(create_group).get(list_groups))
        .route(
            "/api/v1/groups/{group_id}",
            get(get_group).put(update_group).delete(delete_group),
        )
        .route("/api/v1/groups/{group_id}/nodes", get(list_group_nodes))
}

fn group_view(record: GroupRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "type": record.kind,
        "description": record.description,
        "created_time": record.created_time,
        "updated_time": record.updated_time,
    })
}

#[derive(Debug, Deserialize)]
struct CreateGroupRequest {
    name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
}

async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<(StatusCode, Json<SuccessBody<Value>>)> {
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if db::groups::get_group_by_name(&state.db, &req.name).await?.is_some() {
        return Err(AppError::bad_request("group name already exists"));
    }

    let record = db::groups::create_group(
        &state.db,
        NewGroup {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            kind: req.kind,
            description: req.description,
        },
    )
    .await?;
    info!(group_id = %record.id, name = %record.name, "group created");

    Ok((StatusCode::CREATED, Json(SuccessBody::new(group_view(record)))))
}

async fn list_groups(State(state): State<AppState>) -> ApiResult<Json<SuccessBody<Vec<Value>>>> {
    let records = db::groups::list_groups(&state.db).await?;
    Ok(Json(SuccessBody::new(
        records.into_iter().map(group_view).collect(),
    )))
}

async fn get_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let record = db::groups::get_group(&state.db, &group_id)
        .await?
        .ok_or_else(|| AppError::not_found("group not found"))?;
    Ok(Json(SuccessBody::new(group_view(record))))
}

#[derive(Debug, Deserialize)]
struct UpdateGroupRequest {
    name: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    description: Option<String>,
}

async fn update_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Json(req): Json<UpdateGroupRequest>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let affected =
        db::groups::update_group(&state.db, &group_id, req.name, req.kind, req.description)
            .await?;
    if affected == 0 {
        return Err(AppError::not_found("group not found"));
    }

    let record = db::groups::get_group(&state.db, &group_id)
        .await?
        .ok_or_else(|| AppError::not_found("group not found"))?;
    Ok(Json(SuccessBody::new(group_view(record))))
}

/// Deleting a group nulls member back-references in the same transaction;
/// the membership itself is projected from `Node.group_id`.
async fn delete_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let affected = db::groups::delete_group(&state.db, &group_id).await?;
    if affected == 0 {
        return Err(AppError::not_found("group not found"));
    }

    info!(group_id, "group deleted");
    Ok(Json(SuccessBody::new(json!({"group_id": group_id}))))
}

async fn list_group_nodes(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
) -> ApiResult<Json<SuccessBody<Vec<Value>>>> {
    if db::groups::get_group(&state.db, &group_id).await?.is_none() {
        return Err(AppError::not_found("group not found"));
    }

    let nodes = db::nodes::list_nodes_by_group(&state.db, &group_id).await?;
    let views = nodes
        .into_iter()
        .map(|node| {
            json!({
                "id": node.id,
                "name": node.name,
                "status": node.status,
                "last_active_at": node.last_active_at,
            })
        })
        .collect();

    Ok(Json(SuccessBody::new(views)))
}
