//! Event payloads exchanged between game participants.
//!
//! These are plain data carriers; the rules that produce and consume them
//! live outside this workspace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::routing::{user_key, ARMY_MOVES_PREFIX, GAME_LOG_SLUG, WAR_RECOGNITIONS_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Americas,
    Europe,
    Africa,
    Asia,
    Australia,
    Antarctica,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitRank {
    Infantry,
    Cavalry,
    Artillery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Unit {
    pub id: i32,
    pub rank: UnitRank,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub username: String,
    #[serde(default)]
    pub units: BTreeMap<i32, Unit>,
}

impl Player {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            units: BTreeMap::new(),
        }
    }
}

/// Pause/resume broadcast sent over the direct exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayingState {
    pub is_paused: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmyMove {
    pub player: Player,
    pub units: Vec<Unit>,
    pub to_location: Location,
}

impl ArmyMove {
    /// Topic routing key of the moving player, e.g. `army_moves.alice`.
    pub fn routing_key(&self) -> String {
        user_key(ARMY_MOVES_PREFIX, &self.player.username)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionOfWar {
    pub attacker: Player,
    pub defender: Player,
}

impl RecognitionOfWar {
    /// Topic routing key scoped to the recognizing player.
    pub fn routing_key(recognizer: &str) -> String {
        user_key(WAR_RECOGNITIONS_PREFIX, recognizer)
    }
}

/// Log line carrying a full-precision timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameLog {
    pub current_time: DateTime<Utc>,
    pub message: String,
    pub username: String,
}

impl GameLog {
    pub fn new(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            current_time: Utc::now(),
            message: message.into(),
            username: username.into(),
        }
    }

    pub fn routing_key(&self) -> String {
        user_key(GAME_LOG_SLUG, &self.username)
    }
}

#[cfg(test)]
mod tests {
    use super::{ArmyMove, GameLog, Location, Player, PlayingState, Unit, UnitRank};

    #[test]
    fn playing_state_uses_camel_case_field() {
        let json = serde_json::to_string(&PlayingState { is_paused: true }).expect("encode");
        assert_eq!(json, r#"{"isPaused":true}"#);
    }

    #[test]
    fn army_move_json_shape_and_key() {
        let mv = ArmyMove {
            player: Player::new("alice"),
            units: vec![Unit {
                id: 1,
                rank: UnitRank::Infantry,
                location: Location::Americas,
            }],
            to_location: Location::Europe,
        };
        let json = serde_json::to_value(&mv).expect("encode");
        assert_eq!(json["toLocation"], "europe");
        assert_eq!(json["player"]["username"], "alice");
        assert_eq!(json["units"][0]["rank"], "infantry");
        assert_eq!(mv.routing_key(), "army_moves.alice");
    }

    #[test]
    fn player_units_default_when_missing() {
        let player: Player = serde_json::from_str(r#"{"username":"bob"}"#).expect("decode");
        assert!(player.units.is_empty());
    }

    #[test]
    fn game_log_routes_by_username() {
        let log = GameLog::new("carol", "hello");
        assert_eq!(log.routing_key(), "game_logs.carol");
    }
}
