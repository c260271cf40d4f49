//! The fixed game ruleset.
//!
//! Constants the external engine enforces: movement and dig costs, cargo and
//! battery limits, factory processing rates, lichen growth. Parsed from the
//! observation's config section when present; defaults match the standard
//! ruleset.

use serde::{Deserialize, Serialize};

use crate::math::Fixed;

/// The two mobile robot weight classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RobotClass {
    /// Small, cheap, fragile.
    Light,
    /// Large, expensive, crushes lights on contact.
    Heavy,
}

impl RobotClass {
    /// True for [`RobotClass::Heavy`].
    #[must_use]
    pub const fn is_heavy(self) -> bool {
        matches!(self, Self::Heavy)
    }
}

/// Per-class robot constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotClassSpec {
    /// Metal required to build one robot.
    pub metal_cost: i32,
    /// Power required to build one robot.
    pub power_cost: i32,
    /// Power a freshly built robot starts with.
    pub init_power: i32,
    /// Per-resource cargo capacity.
    pub cargo_space: i32,
    /// Maximum stored power.
    pub battery_capacity: i32,
    /// Power gained per daylight step.
    pub charge: i32,
    /// Base power cost of one move.
    pub move_cost: i32,
    /// Extra power per point of rubble on the destination cell,
    /// in hundredths (5 = 0.05 power per rubble).
    pub rubble_movement_cost_centi: i32,
    /// Power cost of one dig.
    pub dig_cost: i32,
    /// Rubble removed per dig.
    pub dig_rubble_removed: i32,
    /// Resource gained per dig on an ice/ore cell.
    pub dig_resource_gain: i32,
    /// Lichen removed per dig.
    pub dig_lichen_removed: i32,
    /// Power cost of self-destructing.
    pub self_destruct_cost: i32,
    /// Power surcharge for replacing the committed action queue.
    pub action_queue_power_cost: i32,
}

impl RobotClassSpec {
    /// Rubble movement cost rate as fixed-point power per rubble.
    #[must_use]
    pub fn rubble_rate(&self) -> Fixed {
        Fixed::from_num(self.rubble_movement_cost_centi) / Fixed::from_num(100)
    }

    /// Power cost of moving onto a cell with the given rubble, floored.
    #[must_use]
    pub fn move_power_cost(&self, rubble: i32) -> i32 {
        let cost = Fixed::from_num(self.move_cost) + self.rubble_rate() * Fixed::from_num(rubble);
        cost.floor().to_num::<i32>()
    }
}

/// Match-wide ruleset constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameRules {
    /// Steps in one day/night cycle.
    pub cycle_length: u32,
    /// Daylight steps at the start of each cycle.
    pub day_length: u32,
    /// Total steps in the action phase of a match.
    pub max_episode_length: u32,
    /// Maximum rubble on a cell.
    pub max_rubble: i32,
    /// Maximum lichen on a cell.
    pub max_lichen_per_tile: i32,
    /// Lichen required before a cell seeds its neighbors.
    pub min_lichen_to_spread: i32,
    /// Lichen gained on watered cells per watering.
    pub lichen_gained_with_water: i32,
    /// Lichen lost per unwatered step.
    pub lichen_lost_without_water: i32,
    /// Grown cells per unit of watering cost.
    pub lichen_watering_cost_factor: i32,
    /// Ice a factory can process per step.
    pub factory_processing_rate_water: i32,
    /// Ice consumed per water produced.
    pub ice_water_ratio: i32,
    /// Ore a factory can process per step.
    pub factory_processing_rate_metal: i32,
    /// Ore consumed per metal produced.
    pub ore_metal_ratio: i32,
    /// Water a factory burns every step to stay alive.
    pub factory_water_consumption: i32,
    /// Power a factory generates every step.
    pub factory_charge: i32,
    /// Extra factory power per connected lichen tile.
    pub power_per_connected_lichen_tile: i32,
    /// Light robot constants.
    pub light: RobotClassSpec,
    /// Heavy robot constants.
    pub heavy: RobotClassSpec,
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            cycle_length: 50,
            day_length: 30,
            max_episode_length: 1000,
            max_rubble: 100,
            max_lichen_per_tile: 100,
            min_lichen_to_spread: 20,
            lichen_gained_with_water: 1,
            lichen_lost_without_water: 1,
            lichen_watering_cost_factor: 10,
            factory_processing_rate_water: 100,
            ice_water_ratio: 4,
            factory_processing_rate_metal: 50,
            ore_metal_ratio: 5,
            factory_water_consumption: 1,
            factory_charge: 50,
            power_per_connected_lichen_tile: 1,
            light: RobotClassSpec {
                metal_cost: 10,
                power_cost: 50,
                init_power: 50,
                cargo_space: 100,
                battery_capacity: 150,
                charge: 1,
                move_cost: 1,
                rubble_movement_cost_centi: 5,
                dig_cost: 5,
                dig_rubble_removed: 2,
                dig_resource_gain: 2,
                dig_lichen_removed: 10,
                self_destruct_cost: 10,
                action_queue_power_cost: 1,
            },
            heavy: RobotClassSpec {
                metal_cost: 100,
                power_cost: 500,
                init_power: 500,
                cargo_space: 1000,
                battery_capacity: 3000,
                charge: 10,
                move_cost: 20,
                rubble_movement_cost_centi: 100,
                dig_cost: 60,
                dig_rubble_removed: 20,
                dig_resource_gain: 20,
                dig_lichen_removed: 100,
                self_destruct_cost: 100,
                action_queue_power_cost: 10,
            },
        }
    }
}

impl GameRules {
    /// Constants for the given robot class.
    #[must_use]
    pub fn class(&self, class: RobotClass) -> &RobotClassSpec {
        match class {
            RobotClass::Light => &self.light,
            RobotClass::Heavy => &self.heavy,
        }
    }

    /// Whether the given step is daylight.
    #[must_use]
    pub fn is_day(&self, step: u32) -> bool {
        step % self.cycle_length < self.day_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_power_cost_floors() {
        let rules = GameRules::default();
        // Light: 1 + 0.05 * 19 = 1.95 -> 1
        assert_eq!(rules.light.move_power_cost(19), 1);
        assert_eq!(rules.light.move_power_cost(20), 2);
        // Heavy: 20 + 1 * 37 = 57
        assert_eq!(rules.heavy.move_power_cost(37), 57);
    }

    #[test]
    fn test_day_night() {
        let rules = GameRules::default();
        assert!(rules.is_day(0));
        assert!(rules.is_day(29));
        assert!(!rules.is_day(30));
        assert!(!rules.is_day(49));
        assert!(rules.is_day(50));
    }
}
