//! Per-connection tasks
//!
//! Each accepted socket is split in two. The read half decodes client
//! intents and applies them to the session; the write half is a delivery
//! task that drains the player's mailbox onto the socket. Whichever side
//! ends first evicts the player; eviction is idempotent, so both may try.

use std::fmt::Display;
use std::net::SocketAddr;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

use crate::game::constants::net::MAX_CLIENT_MESSAGE_BYTES;
use crate::game::state::PlayerId;
use crate::metrics::Metrics;
use crate::net::game_session::SharedSession;
use crate::net::outbox::{Outbound, OutboxReceiver};
use crate::net::protocol::{decode, encode, ClientMessage};

/// Why a connection's read side stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// Client sent a close frame
    Closed,
    /// Stream ended without a close frame
    Eof,
    /// Transport error
    Error,
}

/// Serve one upgraded WebSocket until either side goes away
pub async fn handle_connection<S>(ws: WebSocketStream<S>, peer: SocketAddr, session: SharedSession)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (write, read) = ws.split();
    let (player_id, outbox) = session.join();
    debug!("Connection {} is player {}", peer, player_id);

    let mut writer = tokio::spawn(delivery_loop(write, outbox, player_id, session.clone()));

    tokio::select! {
        end = read_loop(read, player_id, &session) => {
            debug!("Player {} read side ended: {:?}", player_id, end);
        }
        _ = &mut writer => {
            debug!("Player {} delivery task ended", player_id);
        }
    }

    // Closing the mailbox lets a still-running delivery task drain and exit
    session.leave(player_id);
    info!("Connection {} closed (player {})", peer, player_id);
}

/// Decode and apply client frames until the stream ends.
///
/// Malformed, oversized and binary frames are ignored; only a close frame,
/// end of stream or a transport error stops the loop.
pub async fn read_loop<R, E>(mut read: R, player_id: PlayerId, session: &SharedSession) -> ReadEnd
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let metrics = session.metrics();

    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                Metrics::incr(&metrics.messages_received);
                Metrics::add(&metrics.bytes_received, text.len() as u64);

                if text.len() > MAX_CLIENT_MESSAGE_BYTES {
                    Metrics::incr(&metrics.intents_ignored);
                    debug!("Player {} sent oversized frame ({} bytes)", player_id, text.len());
                    continue;
                }

                match decode::<ClientMessage>(&text) {
                    Ok(message) => session.handle_message(player_id, message),
                    Err(e) => {
                        Metrics::incr(&metrics.intents_ignored);
                        debug!("Player {} sent malformed message: {}", player_id, e);
                    }
                }
            }
            Ok(Message::Binary(data)) => {
                Metrics::incr(&metrics.intents_ignored);
                debug!("Player {} sent binary frame ({} bytes)", player_id, data.len());
            }
            Ok(Message::Close(_)) => return ReadEnd::Closed,
            // Ping/pong are answered by the protocol layer
            Ok(_) => {}
            Err(e) => {
                debug!("Read error for player {}: {}", player_id, e);
                return ReadEnd::Error;
            }
        }
    }
    ReadEnd::Eof
}

/// Write queued messages in order until the mailbox closes or a write fails.
///
/// A failed write evicts the player. A closed mailbox means the player was
/// already evicted, so the socket is closed after the backlog is flushed.
pub async fn delivery_loop<W>(
    mut write: W,
    mut outbox: OutboxReceiver,
    player_id: PlayerId,
    session: SharedSession,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let metrics = session.metrics().clone();
    let mut sent: u64 = 0;

    while let Some(message) = outbox.recv().await {
        let text = match message {
            Outbound::Encoded(frame) => frame.to_string(),
            Outbound::Message(message) => match encode(&*message) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode message for player {}: {}", player_id, e);
                    continue;
                }
            },
        };

        let len = text.len() as u64;
        if let Err(e) = write.send(Message::Text(text)).await {
            debug!("Write to player {} failed: {}", player_id, e);
            session.leave(player_id);
            return;
        }
        sent += 1;
        Metrics::incr(&metrics.messages_sent);
        Metrics::add(&metrics.bytes_sent, len);
    }

    if let Err(e) = write.close().await {
        debug!("Close for player {} failed: {}", player_id, e);
    }
    debug!("Delivery for player {} finished after {} messages", player_id, sent);
}
