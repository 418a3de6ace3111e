//! Occupancy checks over the grid
//!
//! Pure functions over current player and item positions. Nothing here owns
//! state; callers pass views of the world they already hold the lock for.

use rand::Rng;

use crate::game::state::Player;
use crate::util::position::Position;

/// Whether any live player currently stands on `position`
pub fn live_player_at<'a, I>(players: I, position: Position) -> bool
where
    I: IntoIterator<Item = &'a Player>,
{
    players
        .into_iter()
        .any(|p| p.alive && p.position == position)
}

/// Uniformly random cell on a `width` x `height` board
#[inline]
pub fn random_cell<R: Rng + ?Sized>(rng: &mut R, width: i32, height: i32) -> Position {
    Position::new(rng.gen_range(0..width), rng.gen_range(0..height))
}

/// Draw uniformly random cells until one is not `occupied`.
///
/// There is no retry cap: a board with no free cell never returns. The
/// configuration is validated at startup so that item counts stay well
/// below board capacity.
pub fn random_free_cell<R, F>(rng: &mut R, width: i32, height: i32, mut occupied: F) -> Position
where
    R: Rng + ?Sized,
    F: FnMut(Position) -> bool,
{
    loop {
        let candidate = random_cell(rng, width, height);
        if !occupied(candidate) {
            return candidate;
        }
    }
}
