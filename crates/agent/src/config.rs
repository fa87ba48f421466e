use std::collections::HashMap;

use rand::Rng;
use serde::Deserialize;
use syslens_common::envelope::SecurityConfig;

pub const ENV_PREFIX: &str = "SYSLENS_AGENT";

const MIN_COLLECTION_INTERVAL_MS: u64 = 100;
const MAX_COLLECTION_INTERVAL_MS: u64 = 60_000;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub node: NodeConfig,
    pub collection: CollectionConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    pub server: ServerConnection,
    pub aggregator: AggregatorConnection,
    pub spill: SpillConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    /// Sampler tick in milliseconds.
    pub interval: u64,
    pub disk: DiskConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiskConfig {
    pub mount_points: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Interfaces to probe; empty means all.
    #[serde(default)]
    pub interfaces: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConnection {
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub timeout: u64,
    pub retry_count: u32,
    pub retry_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConnection {
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub auth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpillConfig {
    /// Directory where failed report payloads are written.
    pub dir: String,
}

impl AppConfig {
    /// Report destination and bearer, in precedence order: explicit CLI
    /// override, then the aggregator when enabled, then the server.
    pub fn report_target(&self, cli_override: Option<&str>) -> (String, String) {
        if let Some(url) = cli_override {
            return (url.trim_end_matches('/').to_string(), self.server.token.clone());
        }
        if self.aggregator.enabled && !self.aggregator.url.is_empty() {
            return (
                self.aggregator.url.trim_end_matches('/').to_string(),
                self.aggregator.auth_token.clone(),
            );
        }
        (
            self.server.url.trim_end_matches('/').to_string(),
            self.server.token.clone(),
        )
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.node.id.trim().is_empty() {
            anyhow::bail!("node.id cannot be empty");
        }
        if !(MIN_COLLECTION_INTERVAL_MS..=MAX_COLLECTION_INTERVAL_MS)
            .contains(&self.collection.interval)
        {
            anyhow::bail!(
                "collection.interval must be between {} and {} ms",
                MIN_COLLECTION_INTERVAL_MS,
                MAX_COLLECTION_INTERVAL_MS
            );
        }
        if self.collection.disk.mount_points.is_empty() {
            anyhow::bail!("collection.disk.mount_points cannot be empty");
        }
        if self.server.timeout == 0 {
            anyhow::bail!("server.timeout must be > 0");
        }
        if self.aggregator.enabled && self.aggregator.url.trim().is_empty() {
            anyhow::bail!("aggregator.url is required when aggregator.enabled");
        }
        Ok(())
    }
}

/// Fallback node id when none is configured: hostname, or a generated
/// `node-<unix-ts>-<rand8>` matching what the control plane mints.
fn default_node_id() -> String {
    if let Some(hostname) = sysinfo::System::host_name() {
        if !hostname.is_empty() {
            return hostname;
        }
    }
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| {
            const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
            CHARS[rng.random_range(0..CHARS.len())] as char
        })
        .collect();
    format!("node-{}-{}", chrono::Utc::now().timestamp(), suffix)
}

pub fn load() -> anyhow::Result<AppConfig> {
    let env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        // Keep try_parsing disabled so numeric token strings stay strings.
        .try_parsing(false);

    let builder = config::Config::builder()
        .add_source(config::File::with_name("agent").required(false))
        .add_source(env)
        .set_default("node.id", default_node_id())?
        .set_default("collection.interval", 500)?
        .set_default("collection.disk.mount_points", vec!["/"])?
        .set_default("collection.network.interfaces", Vec::<String>::new())?
        .set_default("security.encryption.enabled", false)?
        .set_default("security.encryption.algorithm", "aes-256-gcm")?
        .set_default("security.encryption.key", "")?
        .set_default("security.compression.enabled", false)?
        .set_default("security.compression.algorithm", "gzip")?
        .set_default("security.compression.level", 6)?
        .set_default("server.url", "http://127.0.0.1:8080")?
        .set_default("server.token", "")?
        .set_default("server.timeout", 10)?
        .set_default("server.retry_count", 3)?
        .set_default("server.retry_interval", 1)?
        .set_default("aggregator.enabled", false)?
        .set_default("aggregator.url", "")?
        .set_default("aggregator.auth_token", "")?
        .set_default("spill.dir", "tmp/failed_reports")?;

    let cfg = builder.build()?;
    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

#[cfg(test)]
pub(crate) fn base_config() -> AppConfig {
    AppConfig {
        node: NodeConfig {
            id: "node-test".into(),
            labels: HashMap::new(),
        },
        collection: CollectionConfig {
            interval: 500,
            disk: DiskConfig {
                mount_points: vec!["/".into()],
            },
            network: NetworkConfig { interfaces: vec![] },
        },
        security: SecurityConfig::default(),
        server: ServerConnection {
            url: "http://127.0.0.1:8080".into(),
            token: "cp-token".into(),
            timeout: 10,
            retry_count: 3,
            retry_interval: 1,
        },
        aggregator: AggregatorConnection {
            enabled: false,
            url: String::new(),
            auth_token: String::new(),
        },
        spill: SpillConfig {
            dir: "tmp/failed_reports".into(),
        },
    }
}
