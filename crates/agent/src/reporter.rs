use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use metrics::counter;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use syslens_common::api::NodeCredentials;
use syslens_common::envelope::{
    EnvelopeCodec, COMPRESSED_HEADER, ENCRYPTED_HEADER, NODE_ID_HEADER,
};
use syslens_common::stats::SystemStats;

use crate::config::AppConfig;
use crate::sampler::{Sampler, SamplerError};

const REGISTER_ATTEMPTS: u32 = 3;
const REGISTER_BACKOFF: Duration = Duration::from_secs(5);
const AGENT_USER_AGENT: &str = "SysLens-Agent";

/// Transport failure kinds; each is counted separately in the error log.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to build request: {0}")]
    Build(String),
}

impl ReportError {
    pub fn kind(&self) -> &'static str {
        match self {
            ReportError::Refused(_) => "refused",
            ReportError::Timeout(_) => "timeout",
            ReportError::Dns(_) => "dns",
            ReportError::Status { .. } => "status",
            ReportError::Build(_) => "build",
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ReportError::Timeout(err.to_string());
        }
        let message = format!("{err:#}");
        if message.contains("dns") {
            return ReportError::Dns(message);
        }
        if err.is_connect() {
            return ReportError::Refused(message);
        }
        ReportError::Build(message)
    }
}

/// Uploads sampler output to the configured target, with registration,
/// bounded retries, and local spillover of failed batches.
pub struct Reporter {
    target_url: String,
    auth_token: String,
    node_id: String,
    client: reqwest::Client,
    codec: EnvelopeCodec,
    timeout: Duration,
    retry_count: u32,
    retry_interval: Duration,
    register_backoff: Duration,
    spill_dir: PathBuf,
}

impl Reporter {
    pub fn new(cfg: &AppConfig, cli_target: Option<&str>) -> anyhow::Result<Self> {
        let (target_url, auth_token) = cfg.report_target(cli_target);
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            target_url,
            auth_token,
            node_id: cfg.node.id.clone(),
            client,
            codec: EnvelopeCodec::new(cfg.security.clone()),
            timeout: Duration::from_secs(cfg.server.timeout),
            retry_count: cfg.server.retry_count,
            retry_interval: Duration::from_secs(cfg.server.retry_interval),
            register_backoff: REGISTER_BACKOFF,
            spill_dir: PathBuf::from(&cfg.spill.dir),
        })
    }

    pub fn target_url(&self) -> &str {
        &self.target_url
    }

    /// One-shot registration handshake. Retried a fixed number of times
    /// with a fixed back-off; persistent failure is logged and the agent
    /// carries on (the next boot retries implicitly).
    pub async fn register(&self) -> bool {
        let url = format!("{}/api/v1/nodes/register", self.target_url);
        let body = NodeCredentials {
            node_id: self.node_id.clone(),
            token: self.auth_token.clone(),
        };

        for attempt in 1..=REGISTER_ATTEMPTS {
            if attempt > 1 {
                tokio::time::sleep(self.register_backoff).await;
            }

            let result = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(res) if res.status().is_success() => {
                    info!(node_id = %self.node_id, url = %url, "node registration accepted");
                    return true;
                }
                Ok(res) => {
                    let status = res.status();
                    let body = res.text().await.unwrap_or_default();
                    warn!(
                        node_id = %self.node_id,
                        %status,
                        attempt,
                        error = %body,
                        "node registration rejected"
                    );
                }
                Err(err) => {
                    warn!(node_id = %self.node_id, attempt, ?err, "node registration request failed");
                }
            }
        }

        error!(
            node_id = %self.node_id,
            url = %url,
            "node registration failed after {REGISTER_ATTEMPTS} attempts; continuing unregistered"
        );
        false
    }

    /// Uploads one snapshot. Retries with linear back-off; the classified
    /// error of the final attempt is returned for spillover.
    pub async fn report(&self, stats: &SystemStats) -> Result<(), ReportError> {
        let payload = serde_json::to_vec(stats)
            .map_err(|err| ReportError::Build(format!("serialize failed: {err}")))?;
        let (body, flags) = self
            .codec
            .encode(&payload)
            .map_err(|err| ReportError::Build(err.to_string()))?;

        let url = format!("{}/api/v1/nodes/{}/metrics", self.target_url, self.node_id);
        let mut last_err = ReportError::Build("no attempt made".into());

        for attempt in 0..=self.retry_count {
            if attempt > 0 {
                debug!(attempt, retries = self.retry_count, "retrying report");
                tokio::time::sleep(self.retry_interval).await;
            }

            let mut request = self
                .client
                .post(&url)
                .timeout(self.timeout)
                .header(CONTENT_TYPE, flags.content_type())
                .header(USER_AGENT, AGENT_USER_AGENT)
                .header(NODE_ID_HEADER, &self.node_id)
                .body(body.clone());

            if !self.auth_token.is_empty() {
                request = request.header(AUTHORIZATION, format!("Bearer {}", self.auth_token));
            }
            if flags.compressed {
                request = request.header(COMPRESSED_HEADER, "gzip");
            }
            if flags.encrypted {
                request = request.header(ENCRYPTED_HEADER, "true");
            }

            match request.send().await {
                Ok(res) if res.status().is_success() => {
                    debug!(status = %res.status(), "report accepted");
                    return Ok(());
                }
                Ok(res) => {
                    let status = res.status().as_u16();
                    let body = res.text().await.unwrap_or_default();
                    last_err = ReportError::Status { status, body };
                }
                Err(err) => {
                    last_err = ReportError::from_reqwest(err);
                }
            }

            counter!("agent_report_errors_total", "kind" => last_err.kind()).increment(1);
            warn!(node_id = %self.node_id, error = %last_err, "report attempt failed");
        }

        Err(last_err)
    }

    /// Writes a failed payload to the spill directory, one file per
    /// failure, named by sample timestamp. Spilled files are diagnostic
    /// evidence and are never replayed.
    pub fn spill(&self, stats: &SystemStats) {
        if let Err(err) = write_spill(&self.spill_dir, stats) {
            error!(?err, dir = %self.spill_dir.display(), "failed to spill report payload");
        } else {
            info!(dir = %self.spill_dir.display(), "spilled failed report payload");
        }
    }
}

fn write_spill(dir: &Path, stats: &SystemStats) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).context("create spill directory")?;

    let safe_time = stats.timestamp.to_rfc3339().replace(':', "-");
    let path = dir.join(format!("metrics_{safe_time}.json"));
    let data = serde_json::to_vec_pretty(stats).context("serialize spill payload")?;
    std::fs::write(&path, data).context("write spill file")?;
    Ok(path)
}

/// Sample → envelope → POST on every tick until shutdown. Transport
/// failures spill locally; the loop itself never terminates the process.
pub async fn report_loop(
    mut sampler: Sampler,
    reporter: Reporter,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let stats = match sampler.collect().await {
                    Ok(stats) => stats,
                    Err(SamplerError::Fatal) => {
                        error!("sampler cannot read host identity; skipping tick");
                        continue;
                    }
                };

                if let Err(err) = reporter.report(&stats).await {
                    error!(kind = err.kind(), error = %err, "report failed after retries");
                    reporter.spill(&stats);
                }
            }
        }
    }

    Ok(())
}
