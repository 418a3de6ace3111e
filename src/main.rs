use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use grid_collector_server::config::ServerConfig;
use grid_collector_server::metrics::{self, Metrics};
use grid_collector_server::net::game_session::GameSession;
use grid_collector_server::net::transport::WebSocketServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Grid Collector Server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load_or_default();
    config.validate().context("invalid configuration")?;
    info!(
        "Configuration loaded: {}:{}, board {}x{}, {} items, broadcast every {}ms",
        config.bind_address,
        config.port,
        config.board_width,
        config.board_height,
        config.item_count,
        config.broadcast_interval_ms
    );

    let metrics = Arc::new(Metrics::new());

    if let Some(metrics_port) = config.metrics_port {
        let metrics_clone = metrics.clone();
        let bind_address = config.bind_address;
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(metrics_clone, bind_address, metrics_port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let session = Arc::new(GameSession::new(config.clone(), metrics));
    let server = WebSocketServer::bind(&config, session)
        .await
        .with_context(|| format!("failed to bind {}:{}", config.bind_address, config.port))?;

    info!("Server ready on ws://{}/ws", server.local_addr()?);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received");
    };

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = shutdown => {
            info!("Shutting down...");
        }
    }

    info!("Server stopped");
    Ok(())
}
