/// Board constants
pub mod board {
    /// Default board width in cells
    pub const WIDTH: i32 = 20;
    /// Default board height in cells
    pub const HEIGHT: i32 = 15;
    /// Default number of items placed at each (re)initialization
    pub const ITEM_COUNT: usize = 15;
}

/// Broadcast scheduling constants
pub mod broadcast {
    /// Default period between delta publications in milliseconds
    pub const INTERVAL_MS: u64 = 150;
    /// Interval between periodic stats log lines, in seconds
    pub const STATS_LOG_INTERVAL_SECS: u64 = 30;
}

/// Networking constants
pub mod net {
    /// Default capacity of each player's outbound mailbox (messages).
    /// Absorbs many ticks of backlog before newest messages are dropped.
    pub const OUTBOX_CAPACITY: usize = 256;
    /// Smallest mailbox that still fits the onboarding pair
    /// (`welcome` then `full_state`)
    pub const MIN_OUTBOX_CAPACITY: usize = 2;
    /// Largest client frame that is decoded; anything bigger is ignored
    pub const MAX_CLIENT_MESSAGE_BYTES: usize = 1024;
    /// Path on which WebSocket upgrades are accepted
    pub const WS_PATH: &str = "/ws";
    /// Default listening port
    pub const DEFAULT_PORT: u16 = 8080;
}

/// Prefix for item identifiers (`item_0`, `item_1`, ...)
pub const ITEM_ID_PREFIX: &str = "item_";
