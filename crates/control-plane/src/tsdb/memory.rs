use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use super::{split_points, MetricsStore, Point};

/// In-memory store for development and tests; retains every point.
#[derive(Clone, Default)]
pub struct MemoryStore {
    points: Arc<Mutex<Vec<Point>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<Point> {
        self.points.lock().expect("points lock").clone()
    }

    pub fn points_for_node(&self, node_id: &str) -> Vec<Point> {
        self.points()
            .into_iter()
            .filter(|p| p.tags.get("node_id").is_some_and(|id| id == node_id))
            .collect()
    }
}

#[async_trait]
impl MetricsStore for MemoryStore {
    async fn store_metrics(&self, node_id: &str, metrics: &Value) -> anyhow::Result<()> {
        let new_points = split_points(node_id, metrics);
        self.points.lock().expect("points lock").extend(new_points);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn stores_and_filters_by_node() {
        let store = MemoryStore::new();
        store
            .store_metrics("node-A", &json!({"cpu": {"usage": 10.0}}))
            .await
            .unwrap();
        store
            .store_metrics("node-B", &json!({"cpu": {"usage": 90.0}}))
            .await
            .unwrap();

        assert_eq!(store.points().len(), 2);
        let for_a = store.points_for_node("node-A");
        assert_eq!(for_a.len(), 1);
        assert_eq!(for_a[0].measurement, "cpu");
    }
}
