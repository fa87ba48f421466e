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
use crate::persistence::{self as db, NewService, ServiceRecord};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/services", post(create_service).get(list_services))
        .route(
            "/api/v1/services/{service_id}",
            get(get_service).put(update_service).delete(delete_service),
        )
        .route(
            "/api/v1/services/{service_id}/nodes",
            get(list_service_nodes),
        )
}

fn service_view(record: ServiceRecord) -> Value {
    json!({
        "id": record.id,
        "name": record.name,
        "description": record.description,
        "created_time": record.created_time,
        "updated_time": record.updated_time,
    })
}

#[derive(Debug, Deserialize)]
struct CreateServiceRequest {
    name: String,
    description: Option<String>,
}

async fn create_service(
    State(state): State<AppState>,
    Json(req): Json<CreateServiceRequest>,
) -> ApiResult<(StatusCode, Json<SuccessBody<Value>>)> {
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if db::services::get_service_by_name(&state.db, &req.name).await?.is_some() {
        return Err(AppError::bad_request("service name already exists"));
    }

    let record = db::services::create_service(
        &state.db,
        NewService {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            description: req.description,
        },
    )
    .await?;
    info!(service_id = %record.id, name = %record.name, "service created");

    Ok((
        StatusCode::CREATED,
        Json(SuccessBody::new(service_view(record))),
    ))
}

async fn list_services(
    State(state): State<AppState>,
) -> ApiResult<Json<SuccessBody<Vec<Value>>>> {
    let records = db::services::list_services(&state.db).await?;
    Ok(Json(SuccessBody::new(
        records.into_iter().map(service_view).collect(),
    )))
}

async fn get_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let record = db::services::get_service(&state.db, &service_id)
        .await?
        .ok_or_else(|| AppError::not_found("service not found"))?;
    Ok(Json(SuccessBody::new(service_view(record))))
}

#[derive(Debug, Deserialize)]
struct UpdateServiceRequest {
    name: Option<String>,
    description: Option<String>,
}

async fn update_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
    Json(req): Json<UpdateServiceRequest>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let affected =
        db::services::update_service(&state.db, &service_id, req.name, req.description).await?;
    if affected == 0 {
        return Err(AppError::not_found("service not found"));
    }

    let record = db::services::get_service(&state.db, &service_id)
        .await?
        .ok_or_else(|| AppError::not_found("service not found"))?;
    Ok(Json(SuccessBody::new(service_view(record))))
}

async fn delete_service(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> ApiResult<Json<SuccessBody<Value>>> {
    let affected = db::services::delete_service(&state.db, &service_id).await?;
    if affected == 0 {
        return Err(AppError::not_found("service not found"));
    }

    info!(service_id, "service deleted");
    Ok(Json(SuccessBody::new(json!({"service_id": service_id}))))
}

async fn list_service_nodes(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> ApiResult<Json<SuccessBody<Vec<Value>>>> {
    if db::services::get_service(&state.db, &service_id).await?.is_none() {
        return Err(AppError::not_found("service not found"));
    }

    let nodes = db::nodes::list_nodes_by_service(&state.db, &service_id).await?;
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
