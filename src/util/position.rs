use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer grid coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const ORIGIN: Position = Position { x: 0, y: 0 };

    #[inline]
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Whether the position lies inside a `width` x `height` board
    #[inline]
    pub fn in_bounds(&self, width: i32, height: i32) -> bool {
        self.x >= 0 && self.x < width && self.y >= 0 && self.y < height
    }

    /// Single-step translation, clamped at the board edges.
    ///
    /// Stepping into a wall leaves that axis unchanged.
    pub fn step(&self, direction: Direction, width: i32, height: i32) -> Self {
        let mut next = *self;
        match direction {
            Direction::Up => {
                if next.y > 0 {
                    next.y -= 1;
                }
            }
            Direction::Down => {
                if next.y < height - 1 {
                    next.y += 1;
                }
            }
            Direction::Left => {
                if next.x > 0 {
                    next.x -= 1;
                }
            }
            Direction::Right => {
                if next.x < width - 1 {
                    next.x += 1;
                }
            }
        }
        next
    }

    /// Deterministic string key used to address items on the wire (`"x,y"`)
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Movement direction requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Parse a wire direction. Anything else is not a direction.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }
}
