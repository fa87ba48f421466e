use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request as HttpRequest, StatusCode};
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use control_plane::app_state::AppState;
use control_plane::config::DiscoveryConfig;
use control_plane::http::build_router;
use control_plane::identity::IdentityService;
use control_plane::persistence::{self, nodes};
use control_plane::sweeper;
use control_plane::tsdb::MemoryStore;
use syslens_common::envelope::{
    CompressionConfig, EncryptionConfig, EnvelopeCodec, SecurityConfig,
};

const API_TOKEN: &str = "cp-bearer";

fn security() -> SecurityConfig {
    SecurityConfig {
        encryption: EncryptionConfig {
            enabled: true,
            key: "k".repeat(32),
            ..EncryptionConfig::default()
        },
        compression: CompressionConfig {
            enabled: true,
            ..CompressionConfig::default()
        },
    }
}

async fn setup_state() -> (AppState, MemoryStore) {
    let db = persistence::init_pool("sqlite::memory:").await.expect("pool");
    persistence::run_migrations(&db).await.expect("migrations");

    let store = MemoryStore::new();
    let state = AppState {
        db,
        store: Arc::new(store.clone()),
        identity: IdentityService::new("master-key"),
        codec: EnvelopeCodec::new(security()),
        api_token: API_TOKEN.to_string(),
    };
    (state, store)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

fn json_request(method: &str, uri: &str, body: Value) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn bearer_json_request(method: &str, uri: &str, body: Value) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {API_TOKEN}"))
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

/// Registers a node and returns `(node_id, cleartext token)`.
async fn register_node(app: &axum::Router, name: &str) -> (String, String) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/nodes/register",
            json!({"name": name}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "success");
    (
        body["data"]["node_id"].as_str().unwrap().to_string(),
        body["data"]["auth_token"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn health_reports_ok() {
    let (state, _) = setup_state().await;
    let app = build_router(state);

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn registration_issues_token_exactly_once() {
    let (state, _) = setup_state().await;
    let app = build_router(state.clone());

    let (node_id, token) = register_node(&app, "web-1").await;
    assert_eq!(token.len(), 32);

    // The stored record carries only the hash and the escrow blob.
    let record = nodes::get_node(&state.db, &node_id).await.unwrap().unwrap();
    assert_ne!(record.auth_token_hash, token);
    assert!(record.encrypted_auth_token.is_some());

    // A catalog read never exposes credentials.
    let response = app
        .clone()
        .oneshot(
            HttpRequest::builder()
                .uri(format!("/api/v1/nodes/{node_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert!(body["data"].get("auth_token_hash").is_none());
    assert_eq!(body["data"]["status"], "pending");
}

#[tokio::test]
async fn validate_accepts_issued_token_and_activates_node() {
    let (state, _) = setup_state().await;
    let app = build_router(state.clone());

    let (node_id, token) = register_node(&app, "web-1").await;

    let response = app
        .clone()
        .oneshot(bearer_json_request(
            "POST",
            "/api/v1/nodes/validate",
            json!({"node_id": node_id, "token": token}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let record = nodes::get_node(&state.db, &node_id).await.unwrap().unwrap();
    assert_eq!(record.status, persistence::NodeStatus::Active);
}

#[tokio::test]
async fn validate_rejects_wrong_token_with_401() {
    let (state, _) = setup_state().await;
    let app = build_router(state);

    let (node_id, _) = register_node(&app, "web-1").await;

    let response = app
        .oneshot(bearer_json_request(
            "POST",
            "/api/v1/nodes/validate",
            json!({"node_id": node_id, "token": "wrong"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["code"], 401);
}

#[tokio::test]
async fn validate_requires_the_shared_bearer() {
    let (state, _) = setup_state().await;
    let app = build_router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/nodes/validate",
            json!({"node_id": "x", "token": "y"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reregistration_updates_fields_but_preserves_token() {
    let (state, _) = setup_state().await;
    let app = build_router(state.clone());

    let (node_id, token) = register_node(&app, "web-1").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/nodes/register",
            json!({"node_id": node_id, "name": "renamed"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(
        body["data"].get("auth_token").is_none(),
        "re-registration must not mint a token"
    );

    let record = nodes::get_node(&state.db, &node_id).await.unwrap().unwrap();
    assert_eq!(record.name, "renamed");

    // The original token still validates.
    let response = app
        .oneshot(bearer_json_request(
            "POST",
            "/api/v1/nodes/validate",
            json!({"node_id": node_id, "token": token}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn token_recovery_returns_the_issued_cleartext() {
    let (state, _) = setup_state().await;
    let app = build_router(state);

    let (node_id, token) = register_node(&app, "web-1").await;

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri(format!("/api/v1/nodes/{node_id}/token"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["auth_token"], token);
}

#[tokio::test]
async fn metrics_ingest_inverts_envelope_and_writes_points() {
    let (state, store) = setup_state().await;
    let app = build_router(state.clone());

    let payload = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "hostname": "web-1",
        "cpu": {"usage": 55.0},
        "memory": {"total": 1024u64, "used": 512u64, "used_percent": 50.0},
    });
    let (body, flags) = state
        .codec
        .encode(&serde_json::to_vec(&payload).unwrap())
        .unwrap();

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri("/api/v1/nodes/node-A/metrics")
                .header("Authorization", format!("Bearer {API_TOKEN}"))
                .header("Content-Type", flags.content_type())
                .header("X-Encrypted", "true")
                .header("X-Compressed", "gzip")
                .header("X-Aggregator-ID", "aggregator-1")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "success");

    let points = store.points_for_node("node-A");
    assert!(!points.is_empty());
    assert!(points.iter().any(|p| p.measurement == "cpu"));
    assert!(points.iter().all(|p| p.tags["node_id"] == "node-A"));
}

#[tokio::test]
async fn corrupted_envelope_is_rejected_without_writes() {
    let (state, store) = setup_state().await;
    let app = build_router(state.clone());

    let (mut body, flags) = state
        .codec
        .encode(br#"{"cpu":{"usage":1.0}}"#)
        .unwrap();
    let mid = body.len() / 2;
    body[mid] = body[mid].wrapping_add(1);

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri("/api/v1/nodes/node-A/metrics")
                .header("Authorization", format!("Bearer {API_TOKEN}"))
                .header("Content-Type", flags.content_type())
                .header("X-Encrypted", "true")
                .header("X-Compressed", "gzip")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("failed to process data"));
    assert!(store.points().is_empty());
}

#[tokio::test]
async fn metrics_ingest_rejects_missing_bearer() {
    let (state, store) = setup_state().await;
    let app = build_router(state);

    let response = app
        .oneshot(
            HttpRequest::builder()
                .method("POST")
                .uri("/api/v1/nodes/node-A/metrics")
                .header("Content-Type", "application/json")
                .body(Body::from(r#"{"cpu":{"usage":1.0}}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(store.points().is_empty());
}

#[tokio::test]
async fn group_deletion_nulls_member_references() {
    let (state, _) = setup_state().await;
    let app = build_router(state.clone());

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/groups",
            json!({"name": "eu-west", "type": "region"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let group_id = body_json(response).await["data"]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/nodes/register",
            json!({"name": "web-1", "group_id": group_id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let node_id = body_json(response).await["data"]["node_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(
            HttpRequest::builder()
                .method("DELETE")
                .uri(format!("/api/v1/groups/{group_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The node survives with its back-reference nulled.
    let response = app
        .clone()
        .oneshot(
            HttpRequest::builder()
                .uri(format!("/api/v1/nodes/{node_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"]["group_id"], Value::Null);

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri(format!("/api/v1/groups/{group_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registering_into_unknown_group_is_a_bad_request() {
    let (state, _) = setup_state().await;
    let app = build_router(state);

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/nodes/register",
            json!({"name": "web-1", "group_id": "nope"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn configuration_null_reads_back_as_empty_object() {
    let (state, _) = setup_state().await;
    let app = build_router(state);

    let (node_id, _) = register_node(&app, "web-1").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/nodes/{node_id}/configuration"),
            Value::Null,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri(format!("/api/v1/nodes/{node_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["data"]["configuration"], json!({}));
}

#[tokio::test]
async fn configuration_rejects_unknown_keys_and_bad_ranges() {
    let (state, _) = setup_state().await;
    let app = build_router(state);

    let (node_id, _) = register_node(&app, "web-1").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/nodes/{node_id}/configuration"),
            json!({"turbo": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(json_request(
            "PUT",
            &format!("/api/v1/nodes/{node_id}/configuration"),
            json!({"collection": {"interval": 10}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn expired_node_disappears_after_sweep() {
    let (state, _) = setup_state().await;
    let app = build_router(state.clone());

    let (node_id, _) = register_node(&app, "web-1").await;
    nodes::update_last_active(&state.db, &node_id, Utc::now() - chrono::Duration::minutes(10))
        .await
        .unwrap();

    sweeper::sweep_once(
        &state.db,
        &DiscoveryConfig {
            node_expiry: 5,
            auto_remove_expired: true,
            sweep_interval: 60,
        },
    )
    .await
    .unwrap();

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri(format!("/api/v1/nodes/{node_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_nodes_filters_by_status() {
    let (state, _) = setup_state().await;
    let app = build_router(state.clone());

    let (active_id, token) = register_node(&app, "active-node").await;
    let (_pending_id, _) = register_node(&app, "pending-node").await;

    let response = app
        .clone()
        .oneshot(bearer_json_request(
            "POST",
            "/api/v1/nodes/validate",
            json!({"node_id": active_id, "token": token}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            HttpRequest::builder()
                .uri("/api/v1/nodes?status=active")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    let items = body["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["name"], "active-node");
}
