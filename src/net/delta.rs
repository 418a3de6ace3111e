//! Change accumulator between broadcast ticks
//!
//! Every state-changing operation records what it changed here while it
//! holds the world lock. The broadcast scheduler swaps the accumulated
//! changes out for an empty buffer once per tick and publishes them as a
//! single `delta_update`, so any number of mutations within one tick costs
//! each observer one message.
//!
//! Coalescing rules:
//! - player position and score are last-write-wins per player per field
//! - a player removed within the window loses its pending update
//! - a non-empty item list means "replace the whole item set"; it supersedes
//!   item removals recorded earlier in the same window

use std::mem;

use crate::game::state::{Item, PlayerId};
use crate::net::protocol::{format_winners, DeltaUpdate, GameStatusDelta, ItemSnapshot};
use crate::util::position::Position;

/// Pending changes since the last publication
#[derive(Debug, Default)]
pub struct PendingDelta {
    update: DeltaUpdate,
}

impl PendingDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a player's new position
    pub fn record_player_position(&mut self, id: PlayerId, position: Position) {
        self.update.players_updated.entry(id).or_default().pos = Some(position);
    }

    /// Record a player's new score
    pub fn record_player_score(&mut self, id: PlayerId, score: u32) {
        self.update.players_updated.entry(id).or_default().score = Some(score);
    }

    /// Record a player leaving. Any unpublished update for it is discarded.
    pub fn record_player_removed(&mut self, id: PlayerId) {
        self.update.players_updated.remove(&id);
        if !self.update.players_removed.contains(&id) {
            self.update.players_removed.push(id);
        }
    }

    /// Record a full replacement of the item set
    pub fn record_items_replaced<'a, I>(&mut self, items: I)
    where
        I: IntoIterator<Item = &'a Item>,
    {
        self.update.items_added = items.into_iter().map(ItemSnapshot::from_item).collect();
        self.update.items_removed.clear();
    }

    /// Record a collected item by its position key
    pub fn record_item_removed(&mut self, position: Position) {
        self.update.items_removed.push(position.key());
    }

    /// Record a game status change
    pub fn record_game_status(&mut self, game_over: bool, winners: &[PlayerId]) {
        self.update.game_status = Some(GameStatusDelta {
            game_over,
            winner_id: format_winners(winners),
        });
    }

    /// Whether nothing changed since the last publication
    pub fn is_empty(&self) -> bool {
        self.update.is_empty()
    }

    /// Swap out the accumulated changes, leaving an empty buffer
    pub fn take(&mut self) -> DeltaUpdate {
        mem::take(&mut self.update)
    }

    /// Read-only view of the accumulated changes
    pub fn peek(&self) -> &DeltaUpdate {
        &self.update
    }
}
