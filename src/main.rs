mod config;
mod core;
mod error;
mod input;
mod playback;
mod protocol;
mod server;

use anyhow::{Context, Result};
use config::Config;
use server::{ReplayServer, RsaHandshake, ShutdownSignal};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!(
        "Recordings in {}, default {:?}",
        config.recordings_dir.display(),
        config.default_recording
    );

    let handshake = RsaHandshake::from_pem_file(&config.rsa_key_file)?;

    let shutdown = ShutdownSignal::new();
    tokio::spawn(wait_for_signal(shutdown.clone()));

    let server = ReplayServer::bind(config.clone(), handshake, shutdown)
        .await
        .with_context(|| format!("Failed to listen on {}:{}", config.host, config.port))?;
    info!("Replay server listening on {}", server.local_addr()?);
    server.run().await?;

    info!("Server shutdown gracefully");
    Ok(())
}

/// Trigger shutdown on Ctrl-C or SIGTERM
async fn wait_for_signal(shutdown: ShutdownSignal) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    shutdown.trigger();
}
