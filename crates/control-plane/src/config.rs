use serde::Deserialize;
use syslens_common::envelope::SecurityConfig;

pub const ENV_PREFIX: &str = "SYSLENS_CP";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    pub storage: StorageConfig,
    pub discovery: DiscoveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Bearer shared with aggregators (and direct-connect agents). Empty
    /// disables ingest authentication; intended for development only.
    pub auth_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// `influxdb` or `memory`.
    #[serde(rename = "type")]
    pub kind: String,
    pub influxdb: InfluxConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    /// Minutes without contact before a node expires.
    pub node_expiry: u64,
    /// Delete expired nodes instead of demoting them to inactive.
    pub auto_remove_expired: bool,
    /// Sweeper tick in seconds.
    pub sweep_interval: u64,
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.listen_addr.trim().is_empty() {
            anyhow::bail!("server.listen_addr cannot be empty");
        }
        if self.database.url.trim().is_empty() {
            anyhow::bail!("database.url cannot be empty");
        }
        // Every node's token escrow is sealed under this key; there is no
        // safe default.
        if self.security.encryption.key.trim().is_empty() {
            anyhow::bail!("security.encryption.key must be set");
        }
        match self.storage.kind.as_str() {
            "influxdb" => {
                if self.storage.influxdb.url.trim().is_empty() {
                    anyhow::bail!("storage.influxdb.url cannot be empty");
                }
            }
            "memory" => {}
            other => anyhow::bail!("unknown storage.type: {other}"),
        }
        if self.discovery.node_expiry == 0 {
            anyhow::bail!("discovery.node_expiry must be > 0");
        }
        if self.discovery.sweep_interval == 0 {
            anyhow::bail!("discovery.sweep_interval must be > 0");
        }
        Ok(())
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    let env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        // Keep try_parsing disabled so numeric token strings stay strings.
        .try_parsing(false);

    let builder = config::Config::builder()
        .add_source(config::File::with_name("control-plane").required(false))
        .add_source(env)
        .set_default("server.listen_addr", "0.0.0.0:8080")?
        .set_default("database.url", "sqlite://data/syslens.db")?
        .set_default("api.auth_token", "")?
        .set_default("security.encryption.enabled", false)?
        .set_default("security.encryption.algorithm", "aes-256-gcm")?
        .set_default("security.encryption.key", "")?
        .set_default("security.compression.enabled", true)?
        .set_default("security.compression.algorithm", "gzip")?
        .set_default("security.compression.level", 6)?
        .set_default("storage.type", "influxdb")?
        .set_default("storage.influxdb.url", "http://127.0.0.1:8086")?
        .set_default("storage.influxdb.token", "")?
        .set_default("storage.influxdb.org", "syslens")?
        .set_default("storage.influxdb.bucket", "metrics")?
        .set_default("discovery.node_expiry", 5)?
        .set_default("discovery.auto_remove_expired", true)?
        .set_default("discovery.sweep_interval", 60)?;

    let cfg = builder.build()?;
    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

#[cfg(test)]
pub(crate) fn base_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            listen_addr: "127.0.0.1:0".into(),
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".into(),
        },
        api: ApiConfig {
            auth_token: "cp-token".into(),
        },
        security: SecurityConfig {
            encryption: syslens_common::envelope::EncryptionConfig {
                key: "test-master-key".into(),
                ..Default::default()
            },
            ..SecurityConfig::default()
        },
        storage: StorageConfig {
            kind: "memory".into(),
            influxdb: InfluxConfig {
                url: "http://127.0.0.1:8086".into(),
                token: String::new(),
                org: "syslens".into(),
                bucket: "metrics".into(),
            },
        },
        discovery: DiscoveryConfig {
            node_expiry: 5,
            auto_remove_expired: true,
            sweep_interval: 60,
        },
    }
}
