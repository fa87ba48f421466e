use serde::Deserialize;
use syslens_common::envelope::SecurityConfig;

pub const ENV_PREFIX: &str = "SYSLENS_AGG";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub control_plane: ControlPlaneConfig,
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    pub aggregator: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Seconds without contact before a session is evicted.
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlPlaneConfig {
    pub url: String,
    /// Bearer presented to the control plane on validate and forward calls.
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    /// Forwarder tick in milliseconds.
    pub batch_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Value sent in `X-Aggregator-ID` for provenance.
    pub id: String,
}

impl AppConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.listen_addr.trim().is_empty() {
            anyhow::bail!("server.listen_addr cannot be empty");
        }
        if self.server.connection_timeout == 0 {
            anyhow::bail!("server.connection_timeout must be > 0");
        }
        if self.control_plane.url.trim().is_empty() {
            anyhow::bail!("control_plane.url cannot be empty");
        }
        if self.processing.batch_interval == 0 {
            anyhow::bail!("processing.batch_interval must be > 0");
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
        .add_source(config::File::with_name("aggregator").required(false))
        .add_source(env)
        .set_default("server.listen_addr", "0.0.0.0:8081")?
        .set_default("server.connection_timeout", 30)?
        .set_default("control_plane.url", "http://127.0.0.1:8080")?
        .set_default("control_plane.token", "")?
        .set_default("processing.batch_interval", 1000)?
        .set_default("security.encryption.enabled", false)?
        .set_default("security.encryption.algorithm", "aes-256-gcm")?
        .set_default("security.encryption.key", "")?
        .set_default("security.compression.enabled", true)?
        .set_default("security.compression.algorithm", "gzip")?
        .set_default("security.compression.level", 6)?
        .set_default("aggregator.id", "aggregator-1")?;

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
            connection_timeout: 30,
        },
        control_plane: ControlPlaneConfig {
            url: "http://127.0.0.1:8080".into(),
            token: "cp-token".into(),
        },
        processing: ProcessingConfig {
            batch_interval: 1000,
        },
        security: SecurityConfig::default(),
        aggregator: IdentityConfig {
            id: "aggregator-1".into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_zero_timeouts() {
        let mut cfg = base_config();
        cfg.server.connection_timeout = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = base_config();
        cfg.processing.batch_interval = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn base_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }
}
