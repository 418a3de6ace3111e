use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::game::state::{GameState, Item, Player, PlayerId};
use crate::util::position::Position;

/// Messages from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Move one cell. The direction is validated by the game, not here.
    Move { direction: String },
    /// Start a new episode (only honored after game over)
    ResetGameRequest,
}

/// Messages from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, right after connecting
    Welcome(Welcome),
    /// Complete world view, sent once right after `Welcome`
    FullState(FullState),
    /// Changes accumulated during one broadcast tick
    DeltaUpdate(DeltaUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub player_id: PlayerId,
}

/// Player snapshot for network transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub pos: Position,
    pub score: u32,
}

impl PlayerSnapshot {
    pub fn from_player(player: &Player) -> Self {
        Self {
            id: player.id,
            pos: player.position,
            score: player.score,
        }
    }
}

/// Item snapshot for network transmission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSnapshot {
    pub id: String,
    pub pos: Position,
}

impl ItemSnapshot {
    pub fn from_item(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            pos: item.position,
        }
    }
}

/// Full world state for a newly joined client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullState {
    pub players: Vec<PlayerSnapshot>,
    pub items: Vec<ItemSnapshot>,
    pub board_width: i32,
    pub board_height: i32,
    pub game_over: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
}

impl FullState {
    /// Copy the current world. Only live players are included.
    pub fn from_game_state(state: &GameState) -> Self {
        Self {
            players: state
                .players
                .values()
                .filter(|p| p.alive)
                .map(PlayerSnapshot::from_player)
                .collect(),
            items: state.items.values().map(ItemSnapshot::from_item).collect(),
            board_width: state.width,
            board_height: state.height,
            game_over: state.game_over,
            winner_id: format_winners(&state.winners),
        }
    }
}

/// Changed fields of one player. Absent fields did not change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
}

/// Game-over status change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatusDelta {
    pub game_over: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<String>,
}

/// Delta update (only changed entities)
///
/// A non-empty `items_added` replaces the client's whole item set; items are
/// never added one at a time mid-episode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaUpdate {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub players_updated: HashMap<PlayerId, PlayerDelta>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub players_removed: Vec<PlayerId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items_added: Vec<ItemSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items_removed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_status: Option<GameStatusDelta>,
}

impl DeltaUpdate {
    pub fn is_empty(&self) -> bool {
        self.players_updated.is_empty()
            && self.players_removed.is_empty()
            && self.items_added.is_empty()
            && self.items_removed.is_empty()
            && self.game_status.is_none()
    }
}

/// Render a winner set for the `winnerId` field: all ids joined by `,`.
/// No winners renders as an absent field.
pub fn format_winners(winners: &[PlayerId]) -> Option<String> {
    if winners.is_empty() {
        return None;
    }
    Some(
        winners
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(","),
    )
}

/// Encode a message as a JSON text frame
pub fn encode<T: Serialize>(message: &T) -> Result<String, EncodeError> {
    serde_json::to_string(message).map_err(|e| EncodeError(e.to_string()))
}

/// Decode a JSON text frame
pub fn decode<T: for<'de> Deserialize<'de>>(data: &str) -> Result<T, DecodeError> {
    serde_json::from_str(data).map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use uuid::Uuid;

    #[test]
    fn test_client_message_move() {
        let msg: ClientMessage = decode(r#"{"action":"move","direction":"left"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Move {
                direction: "left".to_string()
            }
        );
    }

    #[test]
    fn test_client_message_reset() {
        let msg: ClientMessage = decode(r#"{"action":"reset_game_request"}"#).unwrap();
        assert_eq!(msg, ClientMessage::ResetGameRequest);
    }

    #[test]
    fn test_client_message_unknown_action_rejected() {
        assert!(decode::<ClientMessage>(r#"{"action":"teleport","x":1}"#).is_err());
        assert!(decode::<ClientMessage>(r#"{"direction":"up"}"#).is_err());
        assert!(decode::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_welcome_wire_shape() {
        let id = Uuid::new_v4();
        let text = encode(&ServerMessage::Welcome(Welcome { player_id: id })).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "welcome");
        assert_eq!(value["payload"]["playerId"], id.to_string());
    }

    #[test]
    fn test_full_state_wire_shape() {
        let id = Uuid::new_v4();
        let state = FullState {
            players: vec![PlayerSnapshot {
                id,
                pos: Position::new(1, 2),
                score: 3,
            }],
            items: vec![ItemSnapshot {
                id: "item_0".to_string(),
                pos: Position::new(4, 5),
            }],
            board_width: 20,
            board_height: 15,
            game_over: false,
            winner_id: None,
        };
        let text = encode(&ServerMessage::FullState(state)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(value["type"], "full_state");
        let payload = &value["payload"];
        assert_eq!(payload["boardWidth"], 20);
        assert_eq!(payload["boardHeight"], 15);
        assert_eq!(payload["gameOver"], false);
        assert!(payload.get("winnerId").is_none());
        assert_eq!(payload["players"][0]["pos"]["x"], 1);
        assert_eq!(payload["players"][0]["score"], 3);
        assert_eq!(payload["items"][0]["id"], "item_0");
    }

    #[test]
    fn test_delta_update_omits_empty_fields() {
        let id = Uuid::new_v4();
        let mut delta = DeltaUpdate::default();
        delta.players_updated.insert(
            id,
            PlayerDelta {
                pos: Some(Position::new(0, 1)),
                score: None,
            },
        );
        delta.items_removed.push("0,1".to_string());

        let text = encode(&ServerMessage::DeltaUpdate(delta)).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        let payload = &value["payload"];

        assert_eq!(value["type"], "delta_update");
        let update = &payload["playersUpdated"][id.to_string()];
        assert_eq!(update["pos"]["y"], 1);
        assert!(update.get("score").is_none());
        assert_eq!(payload["itemsRemoved"][0], "0,1");
        assert!(payload.get("playersRemoved").is_none());
        assert!(payload.get("itemsAdded").is_none());
        assert!(payload.get("gameStatus").is_none());
    }

    #[test]
    fn test_game_status_keeps_false_flag() {
        let mut delta = DeltaUpdate::default();
        delta.game_status = Some(GameStatusDelta {
            game_over: false,
            winner_id: None,
        });
        let text = encode(&delta).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["gameStatus"]["gameOver"], false);
    }

    #[test]
    fn test_delta_is_empty() {
        let mut delta = DeltaUpdate::default();
        assert!(delta.is_empty());
        delta.players_removed.push(Uuid::new_v4());
        assert!(!delta.is_empty());
    }

    #[test]
    fn test_format_winners() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(format_winners(&[]), None);
        assert_eq!(format_winners(&[a]), Some(a.to_string()));
        assert_eq!(format_winners(&[a, b]), Some(format!("{},{}", a, b)));
    }
}
