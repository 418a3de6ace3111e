//! Grid Collector Server Library
//!
//! An authoritative real-time server for a multiplayer grid game: players
//! move one cell at a time and collect items, and the server keeps every
//! connected WebSocket client in sync with periodic delta updates.

pub mod config;
pub mod game;
pub mod metrics;
pub mod net;
pub mod util;
