//! Game-state snapshot types.
//!
//! A [`GameState`] is produced once per tick and pushed verbatim to every
//! subscriber. Field names and nesting are the wire format clients parse,
//! so renames here are breaking changes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 2D position in game units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// One enemy slot in the source's entity table.
///
/// Slots keep their enumeration index for the whole level; a destroyed
/// entity stays in place with `alive == false`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub x: f32,
    pub y: f32,
    /// Raw palette code, see [`TankColor`]
    pub color_code: u32,
    pub alive: bool,
}

impl EntityState {
    /// Returns the named color for this entity, if the code is known.
    pub fn color(&self) -> Option<TankColor> {
        TankColor::from_code(self.color_code)
    }
}

/// Snapshot of the game at one tick.
///
/// Either fully valid (`error` is `None`) or an error snapshot where every
/// other field is zeroed. There is no partially filled state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub lives: u32,
    pub level_number: u32,
    pub player: Position,
    pub num_starting_entities: u32,
    pub num_remaining_entities: u32,
    pub entities: Vec<EntityState>,
    /// Serialized as `null` when unset; clients check it before anything else.
    pub error: Option<String>,
}

impl GameState {
    /// Creates an error snapshot with all data fields zeroed.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Returns true if this snapshot reports an acquisition failure.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Serializes the snapshot to its JSON wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Tank palette used by the game for `colorCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TankColor {
    Player1,
    Player2,
    Brown,
    Grey,
    Turquoise,
    Pink,
    Yellow,
    Purple,
    Green,
    White,
    Black,
}

impl TankColor {
    /// Maps a raw palette code to a color.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::Player1),
            1 => Some(Self::Player2),
            2 => Some(Self::Brown),
            3 => Some(Self::Grey),
            4 => Some(Self::Turquoise),
            5 => Some(Self::Pink),
            6 => Some(Self::Yellow),
            7 => Some(Self::Purple),
            8 => Some(Self::Green),
            9 => Some(Self::White),
            10 => Some(Self::Black),
            _ => None,
        }
    }
}

impl fmt::Display for TankColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Player1 => "player 1",
            Self::Player2 => "player 2",
            Self::Brown => "brown",
            Self::Grey => "grey",
            Self::Turquoise => "turquoise",
            Self::Pink => "pink",
            Self::Yellow => "yellow",
            Self::Purple => "purple",
            Self::Green => "green",
            Self::White => "white",
            Self::Black => "black",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn sample_state() -> GameState {
        GameState {
            lives: 3,
            level_number: 7,
            player: Position::new(12.5, -4.0),
            num_starting_entities: 2,
            num_remaining_entities: 1,
            entities: vec![
                EntityState {
                    x: 1.0,
                    y: 2.0,
                    color_code: 2,
                    alive: true,
                },
                EntityState {
                    x: 3.0,
                    y: 4.0,
                    color_code: 8,
                    alive: false,
                },
            ],
            error: None,
        }
    }

    #[test]
    fn test_wire_field_names() {
        let value: Value = serde_json::from_str(&sample_state().to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "lives": 3,
                "levelNumber": 7,
                "player": {"x": 12.5, "y": -4.0},
                "numStartingEntities": 2,
                "numRemainingEntities": 1,
                "entities": [
                    {"x": 1.0, "y": 2.0, "colorCode": 2, "alive": true},
                    {"x": 3.0, "y": 4.0, "colorCode": 8, "alive": false}
                ],
                "error": null
            })
        );
    }

    #[test]
    fn test_failed_state_is_zeroed() {
        let state = GameState::failed("hook failed after 5 attempts");

        assert!(state.is_error());
        assert_eq!(state.lives, 0);
        assert_eq!(state.level_number, 0);
        assert_eq!(state.player, Position::default());
        assert_eq!(state.num_starting_entities, 0);
        assert!(state.entities.is_empty());

        let value: Value = serde_json::from_str(&state.to_json().unwrap()).unwrap();
        assert_eq!(value["error"], "hook failed after 5 attempts");
        assert_eq!(value["entities"], json!([]));
    }

    #[test]
    fn test_tank_color_codes() {
        assert_eq!(TankColor::from_code(0), Some(TankColor::Player1));
        assert_eq!(TankColor::from_code(10), Some(TankColor::Black));
        assert_eq!(TankColor::from_code(11), None);
        assert_eq!(TankColor::Grey.to_string(), "grey");
    }

    #[test]
    fn test_entity_color_lookup() {
        let state = sample_state();
        let colors: Vec<_> = state.entities.iter().map(EntityState::color).collect();
        assert_eq!(colors, vec![Some(TankColor::Brown), Some(TankColor::Green)]);
    }
}
