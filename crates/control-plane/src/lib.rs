pub mod app_state;
pub mod config;
pub mod error;
pub mod http;
pub mod identity;
pub mod persistence;
pub mod sweeper;
pub mod telemetry;
pub mod tsdb;
pub mod validation;

pub type Result<T> = std::result::Result<T, anyhow::Error>;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use syslens_common::envelope::EnvelopeCodec;

use crate::app_state::AppState;
use crate::identity::IdentityService;
use crate::tsdb::MetricsStore;

const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

/// Builds the shared state from config: database pool (migrated), metrics
/// store, identity service, and envelope codec.
pub async fn build_state(cfg: &config::AppConfig) -> Result<AppState> {
    if cfg.security.encryption.key.trim().is_empty() {
        anyhow::bail!("master key is required but missing");
    }

    let db = persistence::init_pool(&cfg.database.url).await?;
    persistence::run_migrations(&db).await?;

    let store: Arc<dyn MetricsStore> = match cfg.storage.kind.as_str() {
        "memory" => Arc::new(tsdb::MemoryStore::new()),
        _ => Arc::new(tsdb::InfluxStore::new(&cfg.storage.influxdb)?),
    };

    Ok(AppState {
        db,
        store,
        identity: IdentityService::new(cfg.security.encryption.key.clone()),
        codec: EnvelopeCodec::new(cfg.security.clone()),
        api_token: cfg.api.auth_token.clone(),
    })
}

/// Boots the API server and the node-expiry sweeper, then serves until
/// `shutdown` resolves.
pub async fn run_with_shutdown<S>(cfg: config::AppConfig, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    telemetry::init_metrics_recorder();
    let state = build_state(&cfg).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown.await;
        let _ = shutdown_tx.send(true);
    });

    let sweeper_handle = tokio::spawn(sweeper::node_expiry_loop(
        state.db.clone(),
        cfg.discovery.clone(),
        shutdown_rx.clone(),
    ));

    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid listen address: {err}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "control-plane listening");

    let app = http::build_router(state.clone());
    let mut serve_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.changed().await;
        })
        .await?;

    if tokio::time::timeout(DRAIN_DEADLINE, sweeper_handle)
        .await
        .is_err()
    {
        warn!("sweeper drain exceeded deadline; exiting anyway");
    }

    state.db.close().await;
    info!("control-plane stopped");
    Ok(())
}
