//! Wire types for the host protocol.
//!
//! The match harness sends one JSON object per line: the player key, the
//! environment step, the observation snapshot, the remaining overage time,
//! and (on the very first line) the environment configuration. The runner
//! answers each line with one JSON object: a setup decision during the
//! placement phase, an action map afterwards.

use serde::Deserialize;

use agent_core::observation::Observation;
use agent_core::rules::{GameRules, RobotClassSpec};

/// One request line from the host.
#[derive(Debug, Deserialize)]
pub struct TurnInput {
    /// Player key, `player_0` or `player_1`.
    pub player: String,
    /// Environment step, counting the placement phase.
    pub step: u32,
    /// Observation snapshot.
    pub obs: Observation,
    /// Overage seconds remaining for this agent.
    #[serde(rename = "remainingOverageTime", default)]
    pub remaining_overage_time: f64,
    /// Present on the first line only.
    #[serde(default)]
    pub info: Option<SetupInfo>,
}

/// First-line extras.
#[derive(Debug, Deserialize)]
pub struct SetupInfo {
    /// Ruleset constants as the engine publishes them.
    pub env_cfg: EnvCfg,
}

/// The host's ruleset block. Only the constants the engine consumes are
/// parsed; everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct EnvCfg {
    /// Steps in one day/night cycle.
    #[serde(rename = "CYCLE_LENGTH")]
    pub cycle_length: u32,
    /// Daylight steps at the start of each cycle.
    #[serde(rename = "DAY_LENGTH")]
    pub day_length: u32,
    /// Total steps in the action phase.
    #[serde(default = "default_episode_length")]
    pub max_episode_length: u32,
    /// Maximum rubble per cell.
    #[serde(rename = "MAX_RUBBLE")]
    pub max_rubble: i32,
    /// Maximum lichen per cell.
    #[serde(rename = "MAX_LICHEN_PER_TILE")]
    pub max_lichen_per_tile: i32,
    /// Lichen required before a cell seeds its neighbors.
    #[serde(rename = "MIN_LICHEN_TO_SPREAD")]
    pub min_lichen_to_spread: i32,
    /// Lichen gained on watered cells.
    #[serde(rename = "LICHEN_GAINED_WITH_WATER")]
    pub lichen_gained_with_water: i32,
    /// Lichen lost per unwatered step.
    #[serde(rename = "LICHEN_LOST_WITHOUT_WATER")]
    pub lichen_lost_without_water: i32,
    /// Grown cells per unit of watering cost.
    #[serde(rename = "LICHEN_WATERING_COST_FACTOR")]
    pub lichen_watering_cost_factor: i32,
    /// Ice processed per factory step.
    #[serde(rename = "FACTORY_PROCESSING_RATE_WATER")]
    pub factory_processing_rate_water: i32,
    /// Ice per water.
    #[serde(rename = "ICE_WATER_RATIO")]
    pub ice_water_ratio: i32,
    /// Ore processed per factory step.
    #[serde(rename = "FACTORY_PROCESSING_RATE_METAL")]
    pub factory_processing_rate_metal: i32,
    /// Ore per metal.
    #[serde(rename = "ORE_METAL_RATIO")]
    pub ore_metal_ratio: i32,
    /// Water burned per factory step.
    #[serde(rename = "FACTORY_WATER_CONSUMPTION")]
    pub factory_water_consumption: i32,
    /// Power generated per factory step.
    #[serde(rename = "FACTORY_CHARGE")]
    pub factory_charge: i32,
    /// Extra factory power per connected lichen tile.
    #[serde(rename = "POWER_PER_CONNECTED_LICHEN_TILE")]
    pub power_per_connected_lichen_tile: i32,
    /// Per-class robot constants.
    #[serde(rename = "ROBOTS")]
    pub robots: RobotsCfg,
}

fn default_episode_length() -> u32 {
    1000
}

/// The two robot blocks.
#[derive(Debug, Deserialize)]
pub struct RobotsCfg {
    /// Light robot constants.
    #[serde(rename = "LIGHT")]
    pub light: RobotCfg,
    /// Heavy robot constants.
    #[serde(rename = "HEAVY")]
    pub heavy: RobotCfg,
}

/// One robot class block.
#[derive(Debug, Deserialize)]
pub struct RobotCfg {
    /// Metal to build.
    #[serde(rename = "METAL_COST")]
    pub metal_cost: i32,
    /// Power to build.
    #[serde(rename = "POWER_COST")]
    pub power_cost: i32,
    /// Starting power.
    #[serde(rename = "INIT_POWER")]
    pub init_power: i32,
    /// Per-resource cargo capacity.
    #[serde(rename = "CARGO_SPACE")]
    pub cargo_space: i32,
    /// Battery capacity.
    #[serde(rename = "BATTERY_CAPACITY")]
    pub battery_capacity: i32,
    /// Power gained per daylight step.
    #[serde(rename = "CHARGE")]
    pub charge: i32,
    /// Base move cost.
    #[serde(rename = "MOVE_COST")]
    pub move_cost: i32,
    /// Extra power per rubble on the destination, fractional on the wire.
    #[serde(rename = "RUBBLE_MOVEMENT_COST")]
    pub rubble_movement_cost: f64,
    /// Dig cost.
    #[serde(rename = "DIG_COST")]
    pub dig_cost: i32,
    /// Rubble removed per dig.
    #[serde(rename = "DIG_RUBBLE_REMOVED")]
    pub dig_rubble_removed: i32,
    /// Resource gained per dig.
    #[serde(rename = "DIG_RESOURCE_GAIN")]
    pub dig_resource_gain: i32,
    /// Lichen removed per dig.
    #[serde(rename = "DIG_LICHEN_REMOVED")]
    pub dig_lichen_removed: i32,
    /// Self-destruct cost.
    #[serde(rename = "SELF_DESTRUCT_COST")]
    pub self_destruct_cost: i32,
    /// Queue replacement surcharge.
    #[serde(rename = "ACTION_QUEUE_POWER_COST")]
    pub action_queue_power_cost: i32,
}

impl RobotCfg {
    fn to_spec(&self) -> RobotClassSpec {
        RobotClassSpec {
            metal_cost: self.metal_cost,
            power_cost: self.power_cost,
            init_power: self.init_power,
            cargo_space: self.cargo_space,
            battery_capacity: self.battery_capacity,
            charge: self.charge,
            move_cost: self.move_cost,
            // The engine works in integer hundredths; the wire value is the
            // only fractional constant in the ruleset.
            rubble_movement_cost_centi: (self.rubble_movement_cost * 100.0).round() as i32,
            dig_cost: self.dig_cost,
            dig_rubble_removed: self.dig_rubble_removed,
            dig_resource_gain: self.dig_resource_gain,
            dig_lichen_removed: self.dig_lichen_removed,
            self_destruct_cost: self.self_destruct_cost,
            action_queue_power_cost: self.action_queue_power_cost,
        }
    }
}

impl EnvCfg {
    /// Convert the wire ruleset into engine constants.
    #[must_use]
    pub fn to_rules(&self) -> GameRules {
        GameRules {
            cycle_length: self.cycle_length,
            day_length: self.day_length,
            max_episode_length: self.max_episode_length,
            max_rubble: self.max_rubble,
            max_lichen_per_tile: self.max_lichen_per_tile,
            min_lichen_to_spread: self.min_lichen_to_spread,
            lichen_gained_with_water: self.lichen_gained_with_water,
            lichen_lost_without_water: self.lichen_lost_without_water,
            lichen_watering_cost_factor: self.lichen_watering_cost_factor,
            factory_processing_rate_water: self.factory_processing_rate_water,
            ice_water_ratio: self.ice_water_ratio,
            factory_processing_rate_metal: self.factory_processing_rate_metal,
            ore_metal_ratio: self.ore_metal_ratio,
            factory_water_consumption: self.factory_water_consumption,
            factory_charge: self.factory_charge,
            power_per_connected_lichen_tile: self.power_per_connected_lichen_tile,
            light: self.robots.light.to_spec(),
            heavy: self.robots.heavy.to_spec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_cfg_parses_and_converts() {
        let json = r#"{
            "CYCLE_LENGTH": 50, "DAY_LENGTH": 30, "MAX_RUBBLE": 100,
            "MAX_LICHEN_PER_TILE": 100, "MIN_LICHEN_TO_SPREAD": 20,
            "LICHEN_GAINED_WITH_WATER": 1, "LICHEN_LOST_WITHOUT_WATER": 1,
            "LICHEN_WATERING_COST_FACTOR": 10,
            "FACTORY_PROCESSING_RATE_WATER": 100, "ICE_WATER_RATIO": 4,
            "FACTORY_PROCESSING_RATE_METAL": 50, "ORE_METAL_RATIO": 5,
            "FACTORY_WATER_CONSUMPTION": 1, "FACTORY_CHARGE": 50,
            "POWER_PER_CONNECTED_LICHEN_TILE": 1,
            "ROBOTS": {
                "LIGHT": {
                    "METAL_COST": 10, "POWER_COST": 50, "INIT_POWER": 50,
                    "CARGO_SPACE": 100, "BATTERY_CAPACITY": 150, "CHARGE": 1,
                    "MOVE_COST": 1, "RUBBLE_MOVEMENT_COST": 0.05,
                    "DIG_COST": 5, "DIG_RUBBLE_REMOVED": 2,
                    "DIG_RESOURCE_GAIN": 2, "DIG_LICHEN_REMOVED": 10,
                    "SELF_DESTRUCT_COST": 10, "ACTION_QUEUE_POWER_COST": 1
                },
                "HEAVY": {
                    "METAL_COST": 100, "POWER_COST": 500, "INIT_POWER": 500,
                    "CARGO_SPACE": 1000, "BATTERY_CAPACITY": 3000, "CHARGE": 10,
                    "MOVE_COST": 20, "RUBBLE_MOVEMENT_COST": 1,
                    "DIG_COST": 60, "DIG_RUBBLE_REMOVED": 20,
                    "DIG_RESOURCE_GAIN": 20, "DIG_LICHEN_REMOVED": 100,
                    "SELF_DESTRUCT_COST": 100, "ACTION_QUEUE_POWER_COST": 10
                }
            }
        }"#;
        let cfg: EnvCfg = serde_json::from_str(json).unwrap();
        let rules = cfg.to_rules();
        assert_eq!(rules, GameRules::default());
    }
}
