//! Wire types for the per-turn snapshot and the emitted action map.
//!
//! The host process deserializes one observation per real turn and feeds it
//! to [`crate::board::Board::from_observation`]. The engine's output is an
//! [`ActionMap`]: entity id string to new action queue (units) or action
//! token (factories), containing only entities whose plans changed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-cell board layers, indexed `[x][y]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BoardLayers {
    /// Ice presence (non-zero = ice).
    pub ice: Vec<Vec<i32>>,
    /// Ore presence (non-zero = ore).
    pub ore: Vec<Vec<i32>>,
    /// Rubble amount.
    pub rubble: Vec<Vec<i32>>,
    /// Lichen amount.
    pub lichen: Vec<Vec<i32>>,
    /// Lichen strain owner id, -1 for none.
    pub lichen_strains: Vec<Vec<i32>>,
    /// Legal factory placement mask, present only during the placement phase.
    #[serde(default)]
    pub valid_spawns_mask: Option<Vec<Vec<bool>>>,
}

/// Team-level state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeamObs {
    /// Numeric team id.
    pub team_id: u8,
    /// Unplaced water (placement phase) or zero.
    #[serde(default)]
    pub water: i32,
    /// Unplaced metal (placement phase) or zero.
    #[serde(default)]
    pub metal: i32,
    /// Lichen strain ids owned by this team's factories.
    #[serde(default)]
    pub factory_strains: Vec<u32>,
    /// Whether this team places its first factory first.
    #[serde(default)]
    pub place_first: bool,
}

/// Cargo hold contents.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CargoObs {
    /// Raw ice.
    pub ice: i32,
    /// Raw ore.
    pub ore: i32,
    /// Water.
    pub water: i32,
    /// Metal.
    pub metal: i32,
}

/// One factory in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryObs {
    /// Lichen strain id; doubles as the factory id.
    pub strain_id: u32,
    /// Owning team.
    pub team_id: u8,
    /// Center position `[x, y]`.
    pub pos: [i32; 2],
    /// Stored resources.
    pub cargo: CargoObs,
    /// Stored power.
    pub power: i32,
}

/// One unit in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitObs {
    /// Engine id string, e.g. `unit_12`.
    pub unit_id: String,
    /// Owning team.
    pub team_id: u8,
    /// Position `[x, y]`.
    pub pos: [i32; 2],
    /// `LIGHT` or `HEAVY`.
    pub unit_type: String,
    /// Stored resources.
    pub cargo: CargoObs,
    /// Stored power.
    pub power: i32,
    /// The currently committed action queue, wire tuples.
    #[serde(default)]
    pub action_queue: Vec<[i32; 6]>,
}

/// A full per-turn snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observation {
    /// Board layers.
    pub board: BoardLayers,
    /// Teams keyed by `player_0` / `player_1`.
    pub teams: BTreeMap<String, TeamObs>,
    /// Factories keyed by player, then by `factory_<n>`.
    pub factories: BTreeMap<String, BTreeMap<String, FactoryObs>>,
    /// Units keyed by player, then by `unit_<n>`.
    pub units: BTreeMap<String, BTreeMap<String, UnitObs>>,
    /// Real environment step (placement steps included).
    #[serde(default)]
    pub real_env_steps: i32,
}

/// One emitted entry: a unit queue or a factory token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmittedAction {
    /// A unit's replacement action queue.
    Queue(Vec<[i32; 6]>),
    /// A factory's single action token.
    Token(i32),
}

/// Entity id string to newly issued action.
pub type ActionMap = BTreeMap<String, EmittedAction>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_map_serialization_shape() {
        let mut map = ActionMap::new();
        map.insert("factory_0".into(), EmittedAction::Token(1));
        map.insert(
            "unit_3".into(),
            EmittedAction::Queue(vec![[0, 2, 0, 0, 0, 1]]),
        );
        let json = serde_json::to_string(&map).unwrap();
        assert!(json.contains("\"factory_0\":1"));
        assert!(json.contains("\"unit_3\":[[0,2,0,0,0,1]]"));
    }
}
