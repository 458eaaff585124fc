use anyhow::{bail, Result};
use lib_scada::retrieve::HttpSnapshotChannel;
use lib_scada::{Mirror, MirrorError};
use std::sync::Arc;
use tokio::signal;

mod mirror_logic;
use mirror_logic::{config, logger, monitor};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();
    let _ = dotenvy::dotenv();

    let settings = config::load_config().resolve()?;
    logger::setup_logging(&settings.log_dir, &settings.log_level)?;
    log::info!(
        "Mirroring {} (stream {}, ack mode {:?})",
        settings.mirror.api_base_url()?,
        settings.mirror.stream_url()?,
        settings.mirror.ack_mode
    );

    let channel = Arc::new(HttpSnapshotChannel::from_config(&settings.mirror)?);
    let mirror = Arc::new(Mirror::start(&settings.mirror)?);

    let needs_reload = match mirror.load_snapshot(channel.as_ref()).await {
        Ok(summary) => {
            log::info!("Initial snapshot: {:?}", summary);
            false
        }
        Err(MirrorError::Unauthorized) => {
            log::error!("Snapshot rejected: the auth token is missing or no longer valid.");
            shutdown_mirror(mirror).await;
            bail!(MirrorError::Unauthorized);
        }
        Err(e) => {
            log::warn!("Initial snapshot failed: {}. Retrying from the monitor.", e);
            true
        }
    };

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let monitor_handle = tokio::spawn(monitor::run(
        mirror.clone(),
        channel.clone(),
        settings.stats_interval,
        needs_reload,
        shutdown_tx.subscribe(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {}
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = monitor_handle.await {
        log::error!("Monitor task ended abnormally: {}", e);
    }
    shutdown_mirror(mirror).await;

    log::info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_mirror(mirror: Arc<Mirror>) {
    match Arc::try_unwrap(mirror) {
        Ok(mirror) => mirror.shutdown().await,
        Err(_) => log::warn!("Mirror still shared at shutdown; background tasks are cancelled on drop."),
    }
}
