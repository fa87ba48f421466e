use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::Db;
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct GroupRecord {
    pub id: String,
    pub name: String,
    #[sqlx(rename = "type")]
    pub kind: Option<String>,
    pub description: Option<String>,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewGroup {
    pub id: String,
    pub name: String,
    pub kind: Option<String>,
    pub description: Option<String>,
}

const GROUP_COLUMNS: &str = "id, name, type, description, created_time, updated_time";

pub async fn create_group(pool: &Db, new_group: NewGroup) -> Result<GroupRecord> {
    sqlx::query(
        r#"
        INSERT INTO node_groups (id, name, type, description)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(&new_group.id)
    .bind(&new_group.name)
    .bind(&new_group.kind)
    .bind(&new_group.description)
    .execute(pool)
    .await?;

    get_group(pool, &new_group.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("group insert did not return row"))
}

pub async fn get_group(pool: &Db, id: &str) -> Result<Option<GroupRecord>> {
    let record = sqlx::query_as::<_, GroupRecord>(&format!(
        "SELECT {GROUP_COLUMNS} FROM node_groups WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn get_group_by_name(pool: &Db, name: &str) -> Result<Option<GroupRecord>> {
    let record = sqlx::query_as::<_, GroupRecord>(&format!(
        "SELECT {GROUP_COLUMNS} FROM node_groups WHERE name = ?1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn list_groups(pool: &Db) -> Result<Vec<GroupRecord>> {
    let records = sqlx::query_as::<_, GroupRecord>(&format!(
        "SELECT {GROUP_COLUMNS} FROM node_groups ORDER BY name ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn update_group(
    pool: &Db,
    id: &str,
    name: Option<String>,
    kind: Option<String>,
    description: Option<String>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE node_groups
        SET name = COALESCE(?2, name),
            type = COALESCE(?3, type),
            description = COALESCE(?4, description),
            updated_time = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(kind)
    .bind(description)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Deletes the group and nulls every node's back-reference in one
/// transaction. The schema-level ON DELETE SET NULL mirrors this for
/// defense at the storage layer.
pub async fn delete_group(pool: &Db, id: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE nodes
        SET group_id = NULL, updated_time = datetime('now')
        WHERE group_id = ?1
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM node_groups WHERE id = ?1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::nodes::{self, new_node};
    use crate::persistence::setup_test_db;

    fn group(id: &str, name: &str) -> NewGroup {
        NewGroup {
            id: id.to_string(),
            name: name.to_string(),
            kind: Some("region".to_string()),
            description: None,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_by_id_and_name() {
        let db = setup_test_db().await;
        let record = create_group(&db, group("grp-1", "eu-west")).await.unwrap();
        assert_eq!(record.name, "eu-west");
        assert_eq!(record.kind.as_deref(), Some("region"));

        let by_name = get_group_by_name(&db, "eu-west").await.unwrap().unwrap();
        assert_eq!(by_name.id, "grp-1");
    }

    #[tokio::test]
    async fn group_names_are_unique() {
        let db = setup_test_db().await;
        create_group(&db, group("grp-1", "eu-west")).await.unwrap();
        assert!(create_group(&db, group("grp-2", "eu-west")).await.is_err());
    }

    #[tokio::test]
    async fn delete_group_nulls_node_references() {
        let db = setup_test_db().await;
        create_group(&db, group("grp-1", "eu-west")).await.unwrap();

        let mut node = new_node("node-a", "alpha");
        node.group_id = Some("grp-1".to_string());
        nodes::create_node(&db, node).await.unwrap();

        let affected = delete_group(&db, "grp-1").await.unwrap();
        assert_eq!(affected, 1);

        assert!(get_group(&db, "grp-1").await.unwrap().is_none());
        let node = nodes::get_node(&db, "node-a").await.unwrap().unwrap();
        assert_eq!(node.group_id, None, "back-reference must be nulled");
    }

    #[tokio::test]
    async fn node_with_unknown_group_is_rejected() {
        let db = setup_test_db().await;
        let mut node = new_node("node-a", "alpha");
        node.group_id = Some("missing".to_string());
        assert!(nodes::create_node(&db, node).await.is_err());
    }

    #[tokio::test]
    async fn update_group_merges_fields() {
        let db = setup_test_db().await;
        create_group(&db, group("grp-1", "eu-west")).await.unwrap();

        let affected = update_group(&db, "grp-1", Some("eu-central".into()), None, None)
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let record = get_group(&db, "grp-1").await.unwrap().unwrap();
        assert_eq!(record.name, "eu-central");
        assert_eq!(record.kind.as_deref(), Some("region"), "unset fields survive");
    }
}
