use control_plane::{config, run_with_shutdown, telemetry};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing();
    let cfg = config::load()?;
    info!(
        listen_addr = %cfg.server.listen_addr,
        database = %cfg.database.url,
        storage = %cfg.storage.kind,
        node_expiry_min = cfg.discovery.node_expiry,
        auto_remove_expired = cfg.discovery.auto_remove_expired,
        "control-plane starting"
    );

    run_with_shutdown(cfg, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => stream.recv().await,
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                None
            }
        };
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("received SIGTERM, shutting down");
        },
    }
}
