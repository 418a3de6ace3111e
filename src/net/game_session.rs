//! Game session - owns the world lock, onboards players and broadcasts deltas

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::game::constants::broadcast;
use crate::game::state::{GameState, MoveOutcome, Player, PlayerId};
use crate::metrics::Metrics;
use crate::net::outbox::{outbox, Outbound, OutboxError, OutboxReceiver};
use crate::net::protocol::{encode, ClientMessage, FullState, ServerMessage, Welcome};
use crate::util::position::Direction;

/// Outcome of one broadcast tick that had something to publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub seq: u64,
    pub recipients: usize,
    pub dropped: usize,
    pub bytes: usize,
}

/// The single shared game. All world access goes through `state`, and the
/// lock is never held across an await point or a socket write.
pub struct GameSession {
    state: Mutex<GameState>,
    config: ServerConfig,
    metrics: Arc<Metrics>,
}

pub type SharedSession = Arc<GameSession>;

impl GameSession {
    pub fn new(config: ServerConfig, metrics: Arc<Metrics>) -> Self {
        let state = GameState::new(config.board_width, config.board_height, config.item_count);
        Self::with_state(state, config, metrics)
    }

    /// Wrap an existing world (seeded worlds in tests and benches)
    pub fn with_state(state: GameState, config: ServerConfig, metrics: Arc<Metrics>) -> Self {
        Self {
            state: Mutex::new(state),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn player_count(&self) -> usize {
        self.state.lock().player_count()
    }

    /// Copy of the current world as a newcomer would see it
    pub fn full_state(&self) -> FullState {
        FullState::from_game_state(&self.state.lock())
    }

    /// Run `f` with exclusive access to the world
    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut GameState) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Admit a new player.
    ///
    /// Insertion, the `welcome` message, the full-state copy and the
    /// player's first eligible delta sequence are all fixed under one lock
    /// acquisition, so the client sees `welcome`, then `full_state`, then
    /// only deltas taken after its snapshot.
    pub fn join(&self) -> (PlayerId, OutboxReceiver) {
        let id = Uuid::new_v4();
        let (tx, rx) = outbox(self.config.outbox_capacity);

        let (position, players) = {
            let mut state = self.state.lock();
            let position = state.add_player(id, tx);
            let snapshot = FullState::from_game_state(&state);

            if let Some(player) = state.get_player(id) {
                let welcome = ServerMessage::Welcome(Welcome { player_id: id });
                self.enqueue(player, Outbound::message(welcome));
                self.enqueue(player, Outbound::message(ServerMessage::FullState(snapshot)));
            }
            (position, state.player_count())
        };

        self.metrics.player_joined();
        info!("Player {} joined at {} ({} players)", id, position, players);
        (id, rx)
    }

    /// Evict a player. Safe to call from both the read and the write path.
    pub fn leave(&self, id: PlayerId) -> bool {
        let (removed, players) = {
            let mut state = self.state.lock();
            let removed = state.remove_player(id);
            (removed, state.player_count())
        };

        if removed {
            self.metrics.player_left();
            info!("Player {} left ({} players)", id, players);
        }
        removed
    }

    /// Apply one decoded client intent
    pub fn handle_message(&self, id: PlayerId, message: ClientMessage) {
        match message {
            ClientMessage::Move { direction } => {
                let Some(parsed) = Direction::parse(&direction) else {
                    Metrics::incr(&self.metrics.intents_ignored);
                    debug!("Player {} sent unknown direction '{}'", id, direction);
                    return;
                };
                let outcome = self.state.lock().apply_move(id, parsed);
                self.record_move(id, outcome);
            }
            ClientMessage::ResetGameRequest => self.reset(id),
        }
    }

    fn record_move(&self, id: PlayerId, outcome: MoveOutcome) {
        match outcome {
            MoveOutcome::Ignored => {
                Metrics::incr(&self.metrics.intents_ignored);
                debug!("Ignored move from player {}", id);
            }
            MoveOutcome::Blocked | MoveOutcome::Moved(_) => {}
            MoveOutcome::Collected { .. } => {
                Metrics::incr(&self.metrics.items_collected);
            }
            MoveOutcome::GameOver { winners, .. } => {
                Metrics::incr(&self.metrics.items_collected);
                Metrics::incr(&self.metrics.games_completed);
                info!("Game over, winners: {:?}", winners.as_slice());
            }
        }
    }

    fn reset(&self, id: PlayerId) {
        let accepted = {
            let mut state = self.state.lock();
            if state.game_over {
                state.initialize_items(self.config.item_count);
                true
            } else {
                false
            }
        };

        if accepted {
            Metrics::incr(&self.metrics.resets);
            info!("Player {} reset the game", id);
        } else {
            Metrics::incr(&self.metrics.intents_ignored);
            debug!("Ignored reset from player {}: game still running", id);
        }
    }

    /// Non-blocking enqueue with drop accounting
    fn enqueue(&self, player: &Player, message: Outbound) -> bool {
        match player.send(message) {
            Ok(()) => {
                Metrics::incr(&self.metrics.messages_enqueued);
                true
            }
            Err(OutboxError::Full) => {
                Metrics::incr(&self.metrics.messages_dropped);
                warn!("Outbox full for player {}, message dropped", player.id);
                false
            }
            Err(OutboxError::Closed) => {
                debug!("Outbox closed for player {}", player.id);
                false
            }
        }
    }

    /// Publish everything that changed since the previous tick.
    ///
    /// The pending delta is swapped out under the lock, encoded once with the
    /// lock released, then enqueued to every live player whose snapshot
    /// predates it. Returns `None` when there was nothing to publish.
    pub fn publish_pending(&self) -> Option<PublishReport> {
        let started = Instant::now();

        let taken = self.state.lock().take_delta();
        let Some((seq, update)) = taken else {
            Metrics::incr(&self.metrics.ticks_skipped);
            return None;
        };

        let frame: Arc<str> = match encode(&ServerMessage::DeltaUpdate(update)) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!("Failed to encode delta {}: {}", seq, e);
                return None;
            }
        };

        let mut report = PublishReport {
            seq,
            recipients: 0,
            dropped: 0,
            bytes: frame.len(),
        };
        {
            let state = self.state.lock();
            for player in state.live_players().filter(|p| p.first_delta_seq <= seq) {
                if self.enqueue(player, Outbound::Encoded(Arc::clone(&frame))) {
                    report.recipients += 1;
                } else {
                    report.dropped += 1;
                }
            }
        }

        self.metrics.record_publish_time(started.elapsed());
        Some(report)
    }
}

/// Start the broadcast scheduler background task
pub fn start_broadcast_loop(session: SharedSession) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = session.config.broadcast_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let rate = 1000.0 / session.config.broadcast_interval_ms as f32;
        info!("Broadcast loop started at {:.1} Hz", rate);

        let start = Instant::now();
        let stats_every =
            (broadcast::STATS_LOG_INTERVAL_SECS * 1000 / session.config.broadcast_interval_ms).max(1);
        let mut tick_count: u64 = 0;

        loop {
            ticker.tick().await;
            tick_count += 1;

            if let Some(report) = session.publish_pending() {
                debug!(
                    "Delta {}: {} bytes to {} players ({} dropped)",
                    report.seq, report.bytes, report.recipients, report.dropped
                );
            }

            if tick_count % stats_every == 0 {
                let (players, items, game_over) = session.with_state_mut(|state| {
                    (state.player_count(), state.items.len(), state.game_over)
                });
                info!(
                    "Game: {}s, {} players, {} items left, game over: {} | dropped {} messages",
                    start.elapsed().as_secs(),
                    players,
                    items,
                    game_over,
                    session
                        .metrics
                        .messages_dropped
                        .load(std::sync::atomic::Ordering::Relaxed)
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::state::Item;
    use crate::util::position::Position;
    use serde_json::Value;
    use std::sync::atomic::Ordering;

    fn config(outbox_capacity: usize) -> ServerConfig {
        ServerConfig {
            item_count: 5,
            outbox_capacity,
            ..ServerConfig::default()
        }
    }

    fn session() -> GameSession {
        session_with_capacity(64)
    }

    fn session_with_capacity(outbox_capacity: usize) -> GameSession {
        let config = config(outbox_capacity);
        let state = GameState::with_seed(
            config.board_width,
            config.board_height,
            config.item_count,
            21,
        );
        GameSession::with_state(state, config, Arc::new(Metrics::new()))
    }

    fn as_json(message: Outbound) -> Value {
        match message {
            Outbound::Encoded(text) => serde_json::from_str(&text).unwrap(),
            Outbound::Message(message) => serde_json::to_value(&*message).unwrap(),
        }
    }

    fn drain(rx: &mut OutboxReceiver) -> Vec<Value> {
        let mut out = Vec::new();
        while let Ok(Some(message)) = rx.try_recv() {
            out.push(as_json(message));
        }
        out
    }

    fn kinds(messages: &[Value]) -> Vec<&str> {
        messages.iter().map(|m| m["type"].as_str().unwrap()).collect()
    }

    fn place(session: &GameSession, id: PlayerId, x: i32, y: i32) {
        session.with_state_mut(|s| s.get_player_mut(id).unwrap().position = Position::new(x, y));
    }

    fn set_items(session: &GameSession, cells: &[(i32, i32)]) {
        session.with_state_mut(|s| {
            s.items.clear();
            for (i, &(x, y)) in cells.iter().enumerate() {
                let p = Position::new(x, y);
                s.items.insert(p, Item::new(i, p));
            }
        });
    }

    fn move_msg(direction: &str) -> ClientMessage {
        ClientMessage::Move {
            direction: direction.to_string(),
        }
    }

    #[test]
    fn test_join_sends_welcome_then_full_state() {
        let session = session();
        let (id, mut rx) = session.join();

        let messages = drain(&mut rx);
        assert_eq!(kinds(&messages), vec!["welcome", "full_state"]);
        assert_eq!(messages[0]["payload"]["playerId"], id.to_string());

        let snapshot = &messages[1]["payload"];
        assert_eq!(snapshot["boardWidth"], 20);
        assert_eq!(snapshot["items"].as_array().unwrap().len(), 5);
        let players = snapshot["players"].as_array().unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0]["id"], id.to_string());
        assert_eq!(session.player_count(), 1);
    }

    #[test]
    fn test_delta_follows_snapshot() {
        let session = session();
        let (a, mut rx_a) = session.join();
        session.publish_pending();
        drain(&mut rx_a);

        let (b, mut rx_b) = session.join();
        set_items(&session, &[(15, 10)]);
        place(&session, a, 5, 5);
        session.handle_message(a, move_msg("down"));

        let report = session.publish_pending().unwrap();
        assert_eq!(report.recipients, 2);

        let a_msgs = drain(&mut rx_a);
        assert_eq!(kinds(&a_msgs), vec!["delta_update"]);
        let updated = &a_msgs[0]["payload"]["playersUpdated"];
        assert_eq!(updated[a.to_string()]["pos"]["y"], 6);
        assert_eq!(updated[b.to_string()]["score"], 0);

        let b_msgs = drain(&mut rx_b);
        assert_eq!(kinds(&b_msgs), vec!["welcome", "full_state", "delta_update"]);
    }

    #[test]
    fn test_newcomer_skips_delta_taken_before_join() {
        let session = session();
        let (a, _rx_a) = session.join();

        // A tick swapped the pending delta out, then a player joined
        let (seq, _) = session.with_state_mut(|s| s.take_delta()).unwrap();
        let (b, _rx_b) = session.join();

        session.with_state_mut(|s| {
            assert!(s.get_player(a).unwrap().first_delta_seq <= seq);
            assert!(s.get_player(b).unwrap().first_delta_seq > seq);
        });
    }

    #[test]
    fn test_idle_tick_publishes_nothing() {
        let session = session();
        let (_id, mut rx) = session.join();
        assert!(session.publish_pending().is_some());
        drain(&mut rx);

        assert!(session.publish_pending().is_none());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(session.metrics().ticks_skipped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_all_players_receive_identical_delta() {
        let session = session();
        let (a, mut rx_a) = session.join();
        let (_b, mut rx_b) = session.join();
        session.publish_pending();
        drain(&mut rx_a);
        drain(&mut rx_b);

        place(&session, a, 2, 2);
        session.handle_message(a, move_msg("right"));
        session.publish_pending();

        let a_msgs = drain(&mut rx_a);
        let b_msgs = drain(&mut rx_b);
        assert_eq!(a_msgs.len(), 1);
        assert_eq!(a_msgs, b_msgs);
    }

    #[test]
    fn test_disconnect_mid_tick() {
        let session = session();
        let (a, _rx_a) = session.join();
        let (_b, mut rx_b) = session.join();
        session.publish_pending();
        drain(&mut rx_b);

        place(&session, a, 4, 4);
        session.handle_message(a, move_msg("up"));
        assert!(session.leave(a));
        assert!(!session.leave(a));
        session.publish_pending();

        let msgs = drain(&mut rx_b);
        assert_eq!(msgs.len(), 1);
        let payload = &msgs[0]["payload"];
        assert_eq!(payload["playersRemoved"][0], a.to_string());
        assert!(payload.get("playersUpdated").is_none());
        assert_eq!(session.metrics().players_connected.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_departed_player_mailbox_closed() {
        let session = session();
        let (a, mut rx_a) = session.join();
        drain(&mut rx_a);
        session.leave(a);
        assert!(rx_a.try_recv().is_err());
    }

    #[test]
    fn test_full_mailbox_drops_only_for_that_player() {
        let session = session_with_capacity(2);
        // Welcome and full_state fill A's mailbox
        let (_a, mut rx_a) = session.join();
        let (_b, mut rx_b) = session.join();
        drain(&mut rx_b);

        let report = session.publish_pending().unwrap();
        assert_eq!(report.recipients, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(kinds(&drain(&mut rx_b)), vec!["delta_update"]);
        assert_eq!(kinds(&drain(&mut rx_a)), vec!["welcome", "full_state"]);
        assert_eq!(session.metrics().messages_dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_invalid_direction_ignored() {
        let session = session();
        let (a, _rx) = session.join();
        let before = session.with_state_mut(|s| s.get_player(a).unwrap().position);

        session.handle_message(a, move_msg("north"));

        let after = session.with_state_mut(|s| s.get_player(a).unwrap().position);
        assert_eq!(before, after);
        assert_eq!(session.metrics().intents_ignored.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_reset_ignored_while_running() {
        let session = session();
        let (a, _rx) = session.join();
        session.publish_pending();

        session.handle_message(a, ClientMessage::ResetGameRequest);

        assert!(session.publish_pending().is_none());
        assert_eq!(session.metrics().resets.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_game_over_then_reset() {
        let session = session();
        let (a, mut rx_a) = session.join();
        set_items(&session, &[(1, 0)]);
        place(&session, a, 0, 0);
        session.publish_pending();
        drain(&mut rx_a);

        session.handle_message(a, move_msg("right"));
        session.publish_pending();
        let msgs = drain(&mut rx_a);
        let status = &msgs[0]["payload"]["gameStatus"];
        assert_eq!(status["gameOver"], true);
        assert_eq!(status["winnerId"], a.to_string());
        assert_eq!(session.metrics().games_completed.load(Ordering::Relaxed), 1);

        // Moves are ignored until a reset
        session.handle_message(a, move_msg("left"));
        assert!(session.publish_pending().is_none());

        session.handle_message(a, ClientMessage::ResetGameRequest);
        session.publish_pending();
        let msgs = drain(&mut rx_a);
        let payload = &msgs[0]["payload"];
        assert_eq!(payload["gameStatus"]["gameOver"], false);
        assert_eq!(payload["itemsAdded"].as_array().unwrap().len(), 5);
        assert_eq!(payload["playersUpdated"][a.to_string()]["score"], 0);
        assert!(!session.full_state().game_over);
    }
}
