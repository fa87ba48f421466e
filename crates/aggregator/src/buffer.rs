use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

/// Per-node metric buffer with last-writer-wins semantics. The pipeline
/// values freshness over completeness here; the TSDB downstream is the
/// ground truth for history.
#[derive(Clone, Default)]
pub struct MetricsBuffer {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl MetricsBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the buffered payload for `node_id`.
    pub async fn publish(&self, node_id: &str, payload: Value) {
        self.inner
            .write()
            .await
            .insert(node_id.to_string(), payload);
    }

    /// Deep-copies the buffer under the lock. Callers do all I/O on the
    /// copy; the lock is never held across a request.
    pub async fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.read().await.clone()
    }

    pub async fn get(&self, node_id: &str) -> Option<Value> {
        self.inner.read().await.get(node_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
