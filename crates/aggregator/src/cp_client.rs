use std::time::Duration;

use anyhow::Context;
use reqwest::header::AUTHORIZATION;
use serde_json::Value;
use tracing::{info, warn};

use syslens_common::api::NodeCredentials;
use syslens_common::envelope::{AGGREGATOR_ID_HEADER, NODE_ID_HEADER};

use crate::config::AppConfig;

const VALIDATE_TIMEOUT: Duration = Duration::from_secs(10);
const FORWARD_TIMEOUT: Duration = Duration::from_secs(5);

/// Upstream client shared by the register handler and the forwarder.
#[derive(Clone)]
pub struct ControlPlaneClient {
    base_url: String,
    token: String,
    aggregator_id: String,
    client: reqwest::Client,
}

impl ControlPlaneClient {
    pub fn new(cfg: &AppConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            base_url: cfg.control_plane.url.trim_end_matches('/').to_string(),
            token: cfg.control_plane.token.clone(),
            aggregator_id: cfg.aggregator.id.clone(),
            client,
        })
    }

    /// Asks the control plane whether `(node_id, token)` is a valid pair.
    /// `Ok(true)` on 2xx, `Ok(false)` on any other status; transport
    /// failures are errors.
    pub async fn validate_node(&self, node_id: &str, token: &str) -> anyhow::Result<bool> {
        let url = format!("{}/api/v1/nodes/validate", self.base_url);
        let body = NodeCredentials {
            node_id: node_id.to_string(),
            token: token.to_string(),
        };

        let res = self
            .client
            .post(&url)
            .timeout(VALIDATE_TIMEOUT)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(AGGREGATOR_ID_HEADER, &self.aggregator_id)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                warn!(node_id, ?err, "node validation request failed");
                err
            })?;

        let status = res.status();
        if status.is_success() {
            info!(node_id, %status, "control plane accepted node credentials");
            return Ok(true);
        }

        let body = res.text().await.unwrap_or_default();
        warn!(node_id, %status, error = %body, "control plane rejected node credentials");
        Ok(false)
    }

    /// Forwards one node's latest payload upstream. Failures are logged by
    /// the caller and never retried within the same tick.
    pub async fn forward_metrics(&self, node_id: &str, payload: &Value) -> anyhow::Result<()> {
        let url = format!("{}/api/v1/nodes/{}/metrics", self.base_url, node_id);

        let res = self
            .client
            .post(&url)
            .timeout(FORWARD_TIMEOUT)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(NODE_ID_HEADER, node_id)
            .header(AGGREGATOR_ID_HEADER, &self.aggregator_id)
            .json(payload)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("control plane returned {status}: {body}");
        }

        Ok(())
    }
}
