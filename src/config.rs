use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use crate::game::constants::{board, broadcast, net};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Board width in cells
    pub board_width: i32,
    /// Board height in cells
    pub board_height: i32,
    /// Items placed at the start of every episode
    pub item_count: usize,
    /// Broadcast tick period in milliseconds
    pub broadcast_interval_ms: u64,
    /// Per-player outbound mailbox capacity
    pub outbox_capacity: usize,
    /// Port for the metrics endpoint; disabled when unset
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("port cannot be 0")]
    ZeroPort,
    #[error("board must be at least 1x1, got {width}x{height}")]
    EmptyBoard { width: i32, height: i32 },
    #[error("item_count must be at least 1")]
    NoItems,
    #[error("item_count {items} leaves no free cell on a {cells} cell board")]
    BoardSaturated { items: usize, cells: usize },
    #[error("broadcast_interval_ms must be at least 1")]
    ZeroInterval,
    #[error("outbox_capacity must be at least {min}, got {capacity}")]
    OutboxTooSmall { capacity: usize, min: usize },
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: net::DEFAULT_PORT,
            board_width: board::WIDTH,
            board_height: board::HEIGHT,
            item_count: board::ITEM_COUNT,
            broadcast_interval_ms: broadcast::INTERVAL_MS,
            outbox_capacity: net::OUTBOX_CAPACITY,
            metrics_port: None,
        }
    }
}

/// Parse an environment variable, keeping `current` when unset or invalid
fn env_override<T: FromStr + Copy>(name: &str, current: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!("Invalid {} '{}', using default", name, raw);
                current
            }
        },
        Err(_) => current,
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let defaults = Self::default();

        let metrics_port = match std::env::var("METRICS_PORT") {
            Ok(raw) => match raw.trim().parse::<u16>() {
                Ok(port) if port > 0 => Some(port),
                _ => {
                    tracing::warn!("Invalid METRICS_PORT '{}', metrics endpoint disabled", raw);
                    None
                }
            },
            Err(_) => None,
        };

        Self {
            bind_address: env_override("BIND_ADDRESS", defaults.bind_address),
            port: env_override("PORT", defaults.port),
            board_width: env_override("BOARD_WIDTH", defaults.board_width),
            board_height: env_override("BOARD_HEIGHT", defaults.board_height),
            item_count: env_override("ITEM_COUNT", defaults.item_count),
            broadcast_interval_ms: env_override(
                "BROADCAST_INTERVAL_MS",
                defaults.broadcast_interval_ms,
            ),
            outbox_capacity: env_override("OUTBOX_CAPACITY", defaults.outbox_capacity),
            metrics_port,
        }
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.board_width <= 0 || self.board_height <= 0 {
            return Err(ConfigError::EmptyBoard {
                width: self.board_width,
                height: self.board_height,
            });
        }
        if self.item_count == 0 {
            return Err(ConfigError::NoItems);
        }
        let cells = self.board_width as usize * self.board_height as usize;
        if self.item_count >= cells {
            return Err(ConfigError::BoardSaturated {
                items: self.item_count,
                cells,
            });
        }
        if self.broadcast_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.outbox_capacity < net::MIN_OUTBOX_CAPACITY {
            return Err(ConfigError::OutboxTooSmall {
                capacity: self.outbox_capacity,
                min: net::MIN_OUTBOX_CAPACITY,
            });
        }
        Ok(())
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }
}
