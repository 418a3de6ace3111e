//! Game state definitions and mutation
//!
//! `GameState` is the single source of truth for the world: players, items,
//! board size and game-over status, plus the changes accumulated since the
//! last broadcast. Every method here assumes the caller holds the session
//! lock for the whole call; none of them block or perform I/O.

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::constants::ITEM_ID_PREFIX;
use crate::game::spatial::{live_player_at, random_free_cell};
use crate::net::delta::PendingDelta;
use crate::net::outbox::{Outbound, Outbox, OutboxError};
use crate::net::protocol::DeltaUpdate;
use crate::util::position::{Direction, Position};

/// Unique player identifier
pub type PlayerId = Uuid;

/// Winner set. Usually one id, more on an exact tie.
pub type Winners = SmallVec<[PlayerId; 2]>;

/// A connected participant
#[derive(Debug)]
pub struct Player {
    pub id: PlayerId,
    pub position: Position,
    pub score: u32,
    /// Flips to false once, on removal
    pub alive: bool,
    /// Publication sequence of the first delta this player may receive.
    /// Earlier deltas are already reflected in its full-state snapshot.
    pub first_delta_seq: u64,
    /// Exclusively owned; `None` once closed
    outbox: Option<Outbox>,
}

impl Player {
    pub fn new(id: PlayerId, position: Position, outbox: Outbox) -> Self {
        Self {
            id,
            position,
            score: 0,
            alive: true,
            first_delta_seq: 0,
            outbox: Some(outbox),
        }
    }

    /// Enqueue a message for this player without blocking
    pub fn send(&self, message: Outbound) -> Result<(), OutboxError> {
        match &self.outbox {
            Some(outbox) => outbox.try_push(message),
            None => Err(OutboxError::Closed),
        }
    }

    /// Close the mailbox. Returns false if it was already closed.
    pub fn close_outbox(&mut self) -> bool {
        self.outbox.take().is_some()
    }
}

/// Collectible item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub position: Position,
}

impl Item {
    pub fn new(index: usize, position: Position) -> Self {
        Self {
            id: format!("{}{}", ITEM_ID_PREFIX, index),
            position,
        }
    }
}

/// Result of applying a move intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Game over, unknown or departed player
    Ignored,
    /// Moving into a wall; nothing changed
    Blocked,
    /// Moved onto an empty cell
    Moved(Position),
    /// Moved and collected an item
    Collected { position: Position, score: u32 },
    /// Collected the last item, ending the episode
    GameOver { position: Position, winners: Winners },
}

/// Complete world state
pub struct GameState {
    pub players: HashMap<PlayerId, Player>,
    /// Items keyed by their (unique) position
    pub items: FxHashMap<Position, Item>,
    pub width: i32,
    pub height: i32,
    pub game_over: bool,
    pub winners: Winners,
    /// Changes since the last publication
    pub pending: PendingDelta,
    /// Number of (re)initializations so far
    pub episode: u64,
    /// Sequence number the next publication will carry
    publish_seq: u64,
    rng: StdRng,
}

impl GameState {
    /// Create a world and place the first batch of items
    pub fn new(width: i32, height: i32, item_count: usize) -> Self {
        Self::with_rng(width, height, item_count, StdRng::from_entropy())
    }

    /// Deterministic world for tests and benchmarks
    pub fn with_seed(width: i32, height: i32, item_count: usize, seed: u64) -> Self {
        Self::with_rng(width, height, item_count, StdRng::seed_from_u64(seed))
    }

    fn with_rng(width: i32, height: i32, item_count: usize, rng: StdRng) -> Self {
        let mut state = Self {
            players: HashMap::new(),
            items: FxHashMap::default(),
            width,
            height,
            game_over: false,
            winners: Winners::new(),
            pending: PendingDelta::new(),
            episode: 0,
            publish_seq: 0,
            rng,
        };
        state.initialize_items(item_count);
        state
    }

    /// Start a new episode: fresh items, cleared game-over, zeroed scores.
    pub fn initialize_items(&mut self, count: usize) {
        self.items.clear();

        for index in 0..count {
            let items = &self.items;
            let players = &self.players;
            let position = random_free_cell(&mut self.rng, self.width, self.height, |p| {
                items.contains_key(&p) || live_player_at(players.values(), p)
            });
            self.items.insert(position, Item::new(index, position));
        }
        self.pending.record_items_replaced(self.items.values());

        self.game_over = self.items.is_empty();
        self.winners.clear();
        self.pending.record_game_status(self.game_over, &self.winners);

        for player in self.players.values_mut().filter(|p| p.alive) {
            player.score = 0;
            self.pending.record_player_score(player.id, 0);
        }

        self.episode += 1;
        info!(
            "Episode {} started: {} items, {} players, scores reset",
            self.episode,
            self.items.len(),
            self.players.len()
        );
    }

    /// Insert a new player at a random free cell
    pub fn add_player(&mut self, id: PlayerId, outbox: Outbox) -> Position {
        let items = &self.items;
        let players = &self.players;
        let position = random_free_cell(&mut self.rng, self.width, self.height, |p| {
            live_player_at(players.values(), p) || items.contains_key(&p)
        });

        let mut player = Player::new(id, position, outbox);
        player.first_delta_seq = self.publish_seq;
        self.players.insert(id, player);

        // Lets already-connected observers learn about the newcomer
        self.pending.record_player_position(id, position);
        self.pending.record_player_score(id, 0);

        position
    }

    /// Evict a player and close its mailbox. Unknown ids are a no-op, so
    /// this is safe to call more than once.
    pub fn remove_player(&mut self, id: PlayerId) -> bool {
        let Some(mut player) = self.players.remove(&id) else {
            return false;
        };
        player.alive = false;
        player.close_outbox();
        self.pending.record_player_removed(id);
        true
    }

    /// Apply a single-step move for a player
    pub fn apply_move(&mut self, id: PlayerId, direction: Direction) -> MoveOutcome {
        if self.game_over {
            return MoveOutcome::Ignored;
        }
        let (width, height) = (self.width, self.height);
        let Some(player) = self.players.get_mut(&id).filter(|p| p.alive) else {
            return MoveOutcome::Ignored;
        };

        let next = player.position.step(direction, width, height);
        if next == player.position {
            return MoveOutcome::Blocked;
        }
        player.position = next;
        self.pending.record_player_position(id, next);

        if self.items.remove(&next).is_none() {
            return MoveOutcome::Moved(next);
        }

        player.score += 1;
        let score = player.score;
        self.pending.record_player_score(id, score);
        self.pending.record_item_removed(next);
        debug!("Player {} collected item at {} (score {})", id, next, score);

        if !self.items.is_empty() {
            return MoveOutcome::Collected {
                position: next,
                score,
            };
        }

        self.game_over = true;
        self.winners = self.compute_winners();
        self.pending.record_game_status(true, &self.winners);
        MoveOutcome::GameOver {
            position: next,
            winners: self.winners.clone(),
        }
    }

    /// Live players with the strictly maximal score; all of them on a tie
    pub fn compute_winners(&self) -> Winners {
        let mut best: Option<u32> = None;
        let mut winners = Winners::new();
        for player in self.players.values().filter(|p| p.alive) {
            match best {
                Some(score) if player.score < score => {}
                Some(score) if player.score == score => winners.push(player.id),
                _ => {
                    best = Some(player.score);
                    winners.clear();
                    winners.push(player.id);
                }
            }
        }
        winners
    }

    /// Swap out the pending changes, tagging them with the next publication
    /// sequence. Returns `None` when nothing changed.
    pub fn take_delta(&mut self) -> Option<(u64, DeltaUpdate)> {
        let seq = self.publish_seq;
        self.publish_seq += 1;
        if self.pending.is_empty() {
            return None;
        }
        Some((seq, self.pending.take()))
    }

    /// Sequence number the next publication will carry
    pub fn publish_seq(&self) -> u64 {
        self.publish_seq
    }

    pub fn get_player(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    pub fn live_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|p| p.alive)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn item_at(&self, position: Position) -> Option<&Item> {
        self.items.get(&position)
    }
}
