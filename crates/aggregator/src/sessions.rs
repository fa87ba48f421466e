use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::info;

use syslens_common::api::SessionInfo;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Aggregator-local, non-durable record of one agent connection.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub node_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub status: String,
    /// True iff the control plane accepted this node's credentials.
    pub verified: bool,
}

/// Per-node session table. Writers hold the lock briefly and never across
/// I/O.
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or refreshes a session. `verified` only ever upgrades; a
    /// later unverified contact does not revoke an earlier verification.
    pub async fn register_or_update(&self, node_id: &str, verified: bool) {
        let now = Utc::now();
        let mut sessions = self.inner.write().await;
        match sessions.get_mut(node_id) {
            Some(entry) => {
                entry.last_active = now;
                entry.status = "active".to_string();
                if verified {
                    entry.verified = true;
                }
                info!(node_id, verified = entry.verified, "session updated");
            }
            None => {
                sessions.insert(
                    node_id.to_string(),
                    SessionEntry {
                        node_id: node_id.to_string(),
                        connected_at: now,
                        last_active: now,
                        status: "connected".to_string(),
                        verified,
                    },
                );
                info!(node_id, verified, "session registered");
            }
        }
    }

    /// Bumps `last_active`; returns false when the node has no session.
    pub async fn touch(&self, node_id: &str) -> bool {
        let mut sessions = self.inner.write().await;
        match sessions.get_mut(node_id) {
            Some(entry) => {
                entry.last_active = Utc::now();
                entry.status = "active".to_string();
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, node_id: &str) -> Option<SessionEntry> {
        self.inner.read().await.get(node_id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        self.inner
            .read()
            .await
            .values()
            .map(|entry| SessionInfo {
                node_id: entry.node_id.clone(),
                status: entry.status.clone(),
                verified: entry.verified,
                connected_at: entry.connected_at,
                last_active: entry.last_active,
            })
            .collect()
    }

    /// Evicts sessions idle past `timeout`; returns the evicted node ids.
    pub async fn purge_expired(&self, timeout: Duration) -> Vec<String> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(0));
        let mut sessions = self.inner.write().await;
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, entry)| entry.last_active < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for node_id in &expired {
            sessions.remove(node_id);
            info!(node_id, "evicted expired session");
        }
        expired
    }
}

/// Evicts idle sessions once a minute until shutdown. Liveness signal only;
/// persistence upstream is unaffected.
pub async fn session_sweeper_loop(
    sessions: SessionTable,
    connection_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    // The immediate first tick would sweep an empty table; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let evicted = sessions.purge_expired(connection_timeout).await;
                if !evicted.is_empty() {
                    metrics::counter!("aggregator_sessions_evicted_total")
                        .increment(evicted.len() as u64);
                }
            }
        }
    }

    Ok(())
}
