use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::DiscoveryConfig;
use crate::persistence::{self as db, Db, NodeStatus};

/// Expires nodes that have gone quiet: deletes them when
/// `auto_remove_expired` is set, demotes them to inactive otherwise.
pub async fn node_expiry_loop(
    pool: Db,
    discovery: DiscoveryConfig,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(discovery.sweep_interval));
    // The immediate first tick would race startup registrations; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                if let Err(err) = sweep_once(&pool, &discovery).await {
                    warn!(?err, "node expiry sweep failed");
                }
            }
        }
    }

    Ok(())
}

pub async fn sweep_once(pool: &Db, discovery: &DiscoveryConfig) -> anyhow::Result<()> {
    let cutoff = Utc::now() - chrono::Duration::minutes(discovery.node_expiry as i64);
    let expired = db::nodes::find_expired_nodes(pool, cutoff).await?;

    for node in expired {
        if discovery.auto_remove_expired {
            db::nodes::delete_node(pool, &node.id).await?;
            counter!("control_plane_nodes_expired_total", "action" => "deleted").increment(1);
            info!(node_id = %node.id, last_active = %node.last_active_at, "deleted expired node");
        } else if node.status != NodeStatus::Inactive {
            db::nodes::update_node_status(pool, &node.id, NodeStatus::Inactive).await?;
            counter!("control_plane_nodes_expired_total", "action" => "demoted").increment(1);
            info!(node_id = %node.id, last_active = %node.last_active_at, "marked node inactive");
        }
    }

    Ok(())
}
