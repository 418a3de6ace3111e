//! WebSocket server
//!
//! Accepts TCP connections, upgrades those that request `/ws` and hands each
//! one to its own connection task. Every other path is refused with 404
//! during the handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use crate::config::ServerConfig;
use crate::game::constants::net::WS_PATH;
use crate::metrics::Metrics;
use crate::net::connection::handle_connection;
use crate::net::game_session::{start_broadcast_loop, SharedSession};

/// WebSocket server
pub struct WebSocketServer {
    listener: TcpListener,
    session: SharedSession,
    metrics: Arc<Metrics>,
}

impl WebSocketServer {
    /// Bind the listening socket. Failing to bind is the only fatal error.
    pub async fn bind(config: &ServerConfig, session: SharedSession) -> anyhow::Result<Self> {
        let addr = SocketAddr::new(config.bind_address, config.port);
        let listener = TcpListener::bind(addr).await?;
        let metrics = session.metrics().clone();

        Ok(Self {
            listener,
            session,
            metrics,
        })
    }

    /// Actual bound address (useful when binding port 0)
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            "WebSocket server listening on ws://{}{}",
            self.listener.local_addr()?,
            WS_PATH
        );

        start_broadcast_loop(self.session.clone());

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    continue;
                }
            };

            let session = self.session.clone();
            let metrics = self.metrics.clone();
            tokio::spawn(async move {
                if let Err(e) = upgrade(stream, peer, session).await {
                    Metrics::incr(&metrics.connections_rejected);
                    tracing::debug!("Upgrade from {} failed: {}", peer, e);
                }
            });
        }
    }
}

/// Complete the WebSocket handshake and serve the connection
async fn upgrade(stream: TcpStream, peer: SocketAddr, session: SharedSession) -> anyhow::Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
    }

    let ws = accept_hdr_async(stream, check_path).await?;
    tracing::debug!("New connection from {}", peer);

    handle_connection(ws, peer, session).await;
    Ok(())
}

/// Handshake callback: only the game path is upgraded
fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        return Ok(response);
    }

    let mut error = ErrorResponse::new(Some(format!("no WebSocket endpoint at {}", request.uri().path())));
    *error.status_mut() = StatusCode::NOT_FOUND;
    Err(error)
}
