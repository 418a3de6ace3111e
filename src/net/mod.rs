pub mod connection;
pub mod delta;
pub mod game_session;
pub mod outbox;
pub mod protocol;
pub mod transport;
