pub mod buffer;
pub mod config;
pub mod cp_client;
pub mod forwarder;
pub mod ingest;
pub mod sessions;

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use syslens_common::envelope::EnvelopeCodec;

const DRAIN_DEADLINE: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json())
        .init();
}

/// Boots the ingest server, session sweeper, and forwarder, then serves
/// until `shutdown` resolves.
pub async fn run_with_shutdown<S>(cfg: config::AppConfig, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let sessions = sessions::SessionTable::new();
    let buffer = buffer::MetricsBuffer::new();
    let control_plane = cp_client::ControlPlaneClient::new(&cfg)?;

    let state = ingest::AppState {
        sessions: sessions.clone(),
        buffer: buffer.clone(),
        codec: EnvelopeCodec::new(cfg.security.clone()),
        control_plane: control_plane.clone(),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown.await;
        let _ = shutdown_tx.send(true);
    });

    let sweeper_handle = tokio::spawn(sessions::session_sweeper_loop(
        sessions,
        Duration::from_secs(cfg.server.connection_timeout),
        shutdown_rx.clone(),
    ));
    let forwarder_handle = tokio::spawn(forwarder::forward_loop(
        buffer,
        control_plane,
        cfg.processing.batch_interval,
        shutdown_rx.clone(),
    ));

    let addr: SocketAddr = cfg
        .server
        .listen_addr
        .parse()
        .map_err(|err| anyhow::anyhow!("invalid listen address: {err}"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "aggregator listening");

    let app = ingest::build_router(state);
    let mut serve_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = serve_shutdown.changed().await;
        })
        .await?;

    // Drain workers with an overall deadline; overrunning it is a soft
    // error and the process exits anyway.
    let drain = async {
        if let Err(err) = sweeper_handle.await {
            error!(?err, "session sweeper terminated abnormally");
        }
        if let Err(err) = forwarder_handle.await {
            error!(?err, "forwarder terminated abnormally");
        }
    };
    if tokio::time::timeout(DRAIN_DEADLINE, drain).await.is_err() {
        warn!("worker drain exceeded deadline; exiting anyway");
    }

    info!("aggregator stopped");
    Ok(())
}
