use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::buffer::MetricsBuffer;
use crate::cp_client::ControlPlaneClient;

/// Drains a snapshot of the buffer upstream on every batch tick. Failures
/// are logged, never retried within the tick, and never spilled; the next
/// ingest overwrites the entry.
pub async fn forward_loop(
    buffer: MetricsBuffer,
    control_plane: ControlPlaneClient,
    batch_interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(batch_interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                forward_once(&buffer, &control_plane).await;
            }
        }
    }

    Ok(())
}

pub async fn forward_once(buffer: &MetricsBuffer, control_plane: &ControlPlaneClient) {
    // Copy under the lock, release before any I/O.
    let snapshot = buffer.snapshot().await;
    if snapshot.is_empty() {
        return;
    }

    for (node_id, mut payload) in snapshot {
        payload["processed_at"] = json!(Utc::now().timestamp());

        match control_plane.forward_metrics(&node_id, &payload).await {
            Ok(()) => {
                counter!("aggregator_forward_total", "outcome" => "ok").increment(1);
                debug!(node_id, "forwarded metrics to control plane");
            }
            Err(err) => {
                counter!("aggregator_forward_total", "outcome" => "error").increment(1);
                warn!(node_id, ?err, "failed to forward metrics to control plane");
            }
        }
    }
}
