//! Generation worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use reelgen_worker::session::LogTransport;
use reelgen_worker::{Services, Transport, WorkerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    let _ = rustls::crypto::ring::default_provider().install_default();

    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("reelgen=info".parse().context("Invalid log directive")?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting reelgen-worker");

    let config = WorkerConfig::from_env().context("Failed to load configuration")?;

    if let Ok(raw) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = raw.parse().context("METRICS_ADDR must be host:port")?;
        reelgen_worker::metrics::init_metrics(addr)?;
        info!(%addr, "Metrics exporter listening");
    }

    match reelgen_media::check_ffmpeg() {
        Ok(path) => info!(ffmpeg = %path.display(), "Found ffmpeg"),
        Err(e) => warn!("Composition will fail until ffmpeg is installed: {}", e),
    }

    let transport: Arc<dyn Transport> = Arc::new(LogTransport);
    let services = Services::build(&config, transport)
        .await
        .context("Failed to build services")?;

    let reconciler = services.reconciler.clone();
    let interval = config.sweep_interval;
    let sweep = tokio::spawn(async move { reconciler.run(interval).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    services.reconciler.shutdown();
    sweep.await.ok();

    info!("Worker shutdown complete");
    Ok(())
}
