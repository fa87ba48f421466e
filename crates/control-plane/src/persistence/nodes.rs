use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

use super::Db;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum NodeStatus {
    Pending,
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "kebab-case")]
#[sqlx(type_name = "TEXT", rename_all = "kebab-case")]
pub enum NodeKind {
    Agent,
    FixedService,
}

#[derive(Debug, Clone, FromRow)]
pub struct NodeRecord {
    pub id: String,
    pub name: String,
    pub auth_token_hash: String,
    pub encrypted_auth_token: Option<String>,
    pub labels: Json<Value>,
    pub configuration: Json<Value>,
    #[sqlx(rename = "type")]
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub group_id: Option<String>,
    pub service_id: Option<String>,
    pub description: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNode {
    pub id: String,
    pub name: String,
    pub auth_token_hash: String,
    pub encrypted_auth_token: Option<String>,
    pub labels: Value,
    pub configuration: Value,
    pub kind: NodeKind,
    pub group_id: Option<String>,
    pub service_id: Option<String>,
    pub description: Option<String>,
}

/// Field updates applied on idempotent re-registration. The stored token
/// hash is never touched here; re-issuance is an explicit operator action.
#[derive(Debug, Clone, Default)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub labels: Option<Value>,
    pub group_id: Option<String>,
    pub service_id: Option<String>,
    pub description: Option<String>,
}

const NODE_COLUMNS: &str = r#"
    id,
    name,
    auth_token_hash,
    encrypted_auth_token,
    labels,
    configuration,
    type,
    status,
    group_id,
    service_id,
    description,
    registered_at,
    last_active_at,
    created_time,
    updated_time
"#;

/// `{}` over SQL NULL so readers never disambiguate unset from empty.
fn object_or_empty(value: Option<Value>) -> Value {
    match value {
        Some(value @ Value::Object(_)) => value,
        _ => Value::Object(serde_json::Map::new()),
    }
}

pub async fn create_node(pool: &Db, new_node: NewNode) -> Result<NodeRecord> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO nodes (
            id,
            name,
            auth_token_hash,
            encrypted_auth_token,
            labels,
            configuration,
            type,
            status,
            group_id,
            service_id,
            description,
            registered_at,
            last_active_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
    )
    .bind(&new_node.id)
    .bind(&new_node.name)
    .bind(&new_node.auth_token_hash)
    .bind(&new_node.encrypted_auth_token)
    .bind(Json(object_or_empty(Some(new_node.labels))))
    .bind(Json(object_or_empty(Some(new_node.configuration))))
    .bind(new_node.kind)
    .bind(NodeStatus::Pending)
    .bind(&new_node.group_id)
    .bind(&new_node.service_id)
    .bind(&new_node.description)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    get_node(pool, &new_node.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("node insert did not return row"))
}

pub async fn get_node(pool: &Db, id: &str) -> Result<Option<NodeRecord>> {
    let record = sqlx::query_as::<_, NodeRecord>(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn list_nodes(pool: &Db) -> Result<Vec<NodeRecord>> {
    let records = sqlx::query_as::<_, NodeRecord>(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes ORDER BY name ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn list_nodes_by_status(pool: &Db, status: NodeStatus) -> Result<Vec<NodeRecord>> {
    let records = sqlx::query_as::<_, NodeRecord>(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE status = ?1 ORDER BY name ASC"
    ))
    .bind(status)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn list_nodes_by_group(pool: &Db, group_id: &str) -> Result<Vec<NodeRecord>> {
    let records = sqlx::query_as::<_, NodeRecord>(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE group_id = ?1 ORDER BY name ASC"
    ))
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn list_nodes_by_service(pool: &Db, service_id: &str) -> Result<Vec<NodeRecord>> {
    let records = sqlx::query_as::<_, NodeRecord>(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE service_id = ?1 ORDER BY name ASC"
    ))
    .bind(service_id)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Applies an idempotent re-registration: merges changed fields, bumps
/// `last_active_at`, and resurrects inactive nodes to pending. Preserves
/// the stored token hash.
pub async fn apply_node_update(pool: &Db, id: &str, update: NodeUpdate) -> Result<u64> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET name = COALESCE(?2, name),
            labels = COALESCE(?3, labels),
            group_id = COALESCE(?4, group_id),
            service_id = COALESCE(?5, service_id),
            description = COALESCE(?6, description),
            status = CASE WHEN status = 'inactive' THEN 'pending' ELSE status END,
            last_active_at = ?7,
            updated_time = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(&update.name)
    .bind(update.labels.map(Json))
    .bind(&update.group_id)
    .bind(&update.service_id)
    .bind(&update.description)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn update_node_status(pool: &Db, id: &str, status: NodeStatus) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET status = ?2, updated_time = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(status)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn update_last_active(pool: &Db, id: &str, last_active: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET last_active_at = ?2, updated_time = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(last_active)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Marks the node active and bumps `last_active_at`; used on successful
/// authenticated contact.
pub async fn mark_node_active(pool: &Db, id: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET status = 'active', last_active_at = ?2, updated_time = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn update_configuration(
    pool: &Db,
    id: &str,
    configuration: Option<Value>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE nodes
        SET configuration = ?2, updated_time = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(Json(object_or_empty(configuration)))
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn delete_node(pool: &Db, id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM nodes WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

pub async fn get_token_hash(pool: &Db, id: &str) -> Result<Option<String>> {
    let hash: Option<String> =
        sqlx::query_scalar("SELECT auth_token_hash FROM nodes WHERE id = ?1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    Ok(hash)
}

/// All `(id, auth_token_hash)` pairs, for the linear find-by-token scan.
pub async fn list_token_hashes(pool: &Db) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT id, auth_token_hash FROM nodes ORDER BY id ASC")
            .fetch_all(pool)
            .await?;

    Ok(rows)
}

/// Nodes whose last contact predates `stale_before`, oldest first.
pub async fn find_expired_nodes(
    pool: &Db,
    stale_before: DateTime<Utc>,
) -> Result<Vec<NodeRecord>> {
    let records = sqlx::query_as::<_, NodeRecord>(&format!(
        "SELECT {NODE_COLUMNS} FROM nodes WHERE last_active_at < ?1 ORDER BY last_active_at ASC"
    ))
    .bind(stale_before)
    .fetch_all(pool)
    .await?;

    Ok(records)
}

#[cfg(test)]
pub(crate) fn new_node(id: &str, name: &str) -> NewNode {
    NewNode {
        id: id.to_string(),
        name: name.to_string(),
        auth_token_hash: format!("{id}-hash"),
        encrypted_auth_token: None,
        labels: serde_json::json!({}),
        configuration: serde_json::json!({}),
        kind: NodeKind::Agent,
        group_id: None,
        service_id: None,
        description: None,
    }
}
