//! Per-player outbound mailbox
//!
//! A bounded queue between the world (mutations, broadcasts, onboarding) and
//! the player's delivery task. Pushing never waits: when the mailbox is full
//! the new message is dropped for this one recipient and the caller is told
//! so. The sending half is owned by exactly one `Player`; dropping it closes
//! the mailbox, which ends the delivery task once the backlog is drained.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

use crate::net::protocol::ServerMessage;

/// A queued outbound message
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Frame encoded once and shared by every recipient of a broadcast
    Encoded(Arc<str>),
    /// Message encoded by the delivery task, outside the world lock
    Message(Box<ServerMessage>),
}

impl Outbound {
    pub fn message(message: ServerMessage) -> Self {
        Outbound::Message(Box::new(message))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox full, message dropped")]
    Full,
    #[error("outbox closed")]
    Closed,
}

/// Sending half of a mailbox. Deliberately not `Clone`.
#[derive(Debug)]
pub struct Outbox {
    sender: mpsc::Sender<Outbound>,
}

impl Outbox {
    /// Enqueue without blocking. A full mailbox drops `message`.
    #[inline]
    pub fn try_push(&self, message: Outbound) -> Result<(), OutboxError> {
        self.sender.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => OutboxError::Full,
            TrySendError::Closed(_) => OutboxError::Closed,
        })
    }

    /// Maximum number of queued messages
    pub fn capacity(&self) -> usize {
        self.sender.max_capacity()
    }

    /// Number of messages currently queued
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the receiving half is gone (delivery task exited)
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half, drained by the delivery task
#[derive(Debug)]
pub struct OutboxReceiver {
    receiver: mpsc::Receiver<Outbound>,
}

impl OutboxReceiver {
    /// Next message in enqueue order, or `None` once the mailbox is closed
    /// and drained
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.receiver.recv().await
    }

    /// Non-blocking receive. `Ok(None)` means empty but still open.
    pub fn try_recv(&mut self) -> Result<Option<Outbound>, OutboxError> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(OutboxError::Closed),
        }
    }
}

/// Create a mailbox holding at most `capacity` messages
pub fn outbox(capacity: usize) -> (Outbox, OutboxReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (Outbox { sender }, OutboxReceiver { receiver })
}
