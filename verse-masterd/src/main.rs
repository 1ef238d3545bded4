mod api;
mod config;
mod master;
mod service;

use std::path::PathBuf;
use std::time::Instant;
use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::master::Master;
use crate::service::MasterHandle;

/// Verse Master Server - keeps track of announced Verse servers and lists
/// them to clients
#[derive(Parser, Debug)]
#[command(name = "verse-masterd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP port to listen on, overriding the configured address
    #[arg(short, long)]
    port: Option<u16>,

    /// Disable status messages
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Log every message handled
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.quiet {
        "verse_masterd=warn"
    } else if args.verbose {
        "verse_masterd=debug"
    } else {
        "verse_masterd=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter))
        )
        .init();

    tracing::info!("Starting verse-masterd v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => {
            let config = Config::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            tracing::info!("Loaded config from {}", path.display());
            config
        }
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.master.listen.set_port(port);
    }
    config.validate().context("Invalid configuration")?;

    let socket = UdpSocket::bind(config.master.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.master.listen))?;
    tracing::info!("Listening for servers and clients on {}", socket.local_addr()?);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn the master loop; it alone owns the registry
    let (handle, commands) = MasterHandle::channel(64);
    let master = Master::new(&config.master, Instant::now());
    let tick_interval = config.master.tick_interval();
    let master_cancel = cancel.clone();
    let master_task = tokio::spawn(async move {
        if let Err(e) = service::run(master, socket, commands, tick_interval, master_cancel).await {
            tracing::error!("Master loop error: {}", e);
        }
    });

    let api_task = if config.api.enabled {
        let app = api::routes::router(api::routes::AppState { master: handle });
        let listener = TcpListener::bind(config.api.listen)
            .await
            .with_context(|| format!("Failed to bind to {}", config.api.listen))?;
        tracing::info!("Status API listening on {}", config.api.listen);

        let server_cancel = cancel.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await
            {
                tracing::error!("Server error: {}", e);
            }
        }))
    } else {
        drop(handle);
        None
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");
    cancel.cancel();

    let _ = master_task.await;
    if let Some(api_task) = api_task {
        let _ = api_task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
