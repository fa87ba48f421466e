use syslens_agent::{config, init_tracing, reporter, sampler::Sampler};
use tokio::{signal, sync::watch};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cfg = config::load()?;

    // A bare `--server <url>` override beats every configured target.
    let cli_target = parse_server_override(std::env::args().skip(1))?;

    let reporter = reporter::Reporter::new(&cfg, cli_target.as_deref())?;
    info!(
        node_id = %cfg.node.id,
        target = reporter.target_url(),
        interval_ms = cfg.collection.interval,
        encrypted = cfg.security.encryption.enabled,
        compressed = cfg.security.compression.enabled,
        "agent starting"
    );

    reporter.register().await;

    let sampler = Sampler::new(
        cfg.collection.disk.mount_points.clone(),
        cfg.collection.network.interfaces.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let interval_ms = cfg.collection.interval;
    let loop_handle = tokio::spawn(async move {
        if let Err(err) = reporter::report_loop(sampler, reporter, interval_ms, shutdown_rx).await {
            error!(?err, "report loop terminated with error");
        }
    });

    shutdown_signal().await;
    info!("shutdown signal received, stopping agent");
    let _ = shutdown_tx.send(true);
    let _ = loop_handle.await;

    Ok(())
}

fn parse_server_override(mut args: impl Iterator<Item = String>) -> anyhow::Result<Option<String>> {
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--server" => {
                let Some(url) = args.next() else {
                    anyhow::bail!("--server requires a URL");
                };
                return Ok(Some(url));
            }
            "--help" | "-h" => {
                println!("Usage: syslens-agent [--server <url>]");
                std::process::exit(0);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(None)
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
