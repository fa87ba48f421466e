use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::Db;
use crate::Result;

#[derive(Debug, Clone, FromRow)]
pub struct ServiceRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_time: DateTime<Utc>,
    pub updated_time: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewService {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

const SERVICE_COLUMNS: &str = "id, name, description, created_time, updated_time";

pub async fn create_service(pool: &Db, new_service: NewService) -> Result<ServiceRecord> {
    sqlx::query(
        r#"
        INSERT INTO services (id, name, description)
        VALUES (?1, ?2, ?3)
        "#,
    )
    .bind(&new_service.id)
    .bind(&new_service.name)
    .bind(&new_service.description)
    .execute(pool)
    .await?;

    get_service(pool, &new_service.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("service insert did not return row"))
}

pub async fn get_service(pool: &Db, id: &str) -> Result<Option<ServiceRecord>> {
    let record = sqlx::query_as::<_, ServiceRecord>(&format!(
        "SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn get_service_by_name(pool: &Db, name: &str) -> Result<Option<ServiceRecord>> {
    let record = sqlx::query_as::<_, ServiceRecord>(&format!(
        "SELECT {SERVICE_COLUMNS} FROM services WHERE name = ?1"
    ))
    .bind(name)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

pub async fn list_services(pool: &Db) -> Result<Vec<ServiceRecord>> {
    let records = sqlx::query_as::<_, ServiceRecord>(&format!(
        "SELECT {SERVICE_COLUMNS} FROM services ORDER BY name ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(records)
}

pub async fn update_service(
    pool: &Db,
    id: &str,
    name: Option<String>,
    description: Option<String>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE services
        SET name = COALESCE(?2, name),
            description = COALESCE(?3, description),
            updated_time = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(name)
    .bind(description)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Deletes the service and nulls every node's back-reference in one
/// transaction, mirroring the group delete.
pub async fn delete_service(pool: &Db, id: &str) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE nodes
        SET service_id = NULL, updated_time = datetime('now')
        WHERE service_id = ?1
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM services WHERE id = ?1")
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

    fn service(id: &str, name: &str) -> NewService {
        NewService {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn service_names_are_unique() {
        let db = setup_test_db().await;
        create_service(&db, service("svc-1", "edge-dns")).await.unwrap();
        assert!(create_service(&db, service("svc-2", "edge-dns")).await.is_err());
    }

    #[tokio::test]
    async fn delete_service_nulls_node_references() {
        let db = setup_test_db().await;
        create_service(&db, service("svc-1", "edge-dns")).await.unwrap();

        let mut node = new_node("node-a", "alpha");
        node.service_id = Some("svc-1".to_string());
        nodes::create_node(&db, node).await.unwrap();

        assert_eq!(delete_service(&db, "svc-1").await.unwrap(), 1);
        assert!(get_service(&db, "svc-1").await.unwrap().is_none());

        let node = nodes::get_node(&db, "node-a").await.unwrap().unwrap();
        assert_eq!(node.service_id, None);
    }

    #[tokio::test]
    async fn list_orders_by_name() {
        let db = setup_test_db().await;
        create_service(&db, service("svc-2", "zeta")).await.unwrap();
        create_service(&db, service("svc-1", "alpha")).await.unwrap();

        let names: Vec<String> = list_services(&db)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
