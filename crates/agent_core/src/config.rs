//! Engine configuration.
//!
//! All tunable policy lives here as named fields with defaults matching the
//! values the strategy was tuned with. The config is constructed once by the
//! host and threaded through the simulation entry point; nothing in the
//! engine reads global state.
//!
//! Thresholds in this file are empirically tuned policy, not derived
//! invariants. Change them freely; the engine's correctness does not depend
//! on them.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Maximum number of simulated future turns per real turn.
    pub lookahead: u32,
    /// Baseline wall-clock allowance per invocation, in milliseconds.
    pub time_per_invocation_ms: u64,
    /// Step at which endgame behavior begins (pillage rush, water dumping).
    pub end_phase: u32,
    /// Step at which ice miners rush deliveries home.
    pub ice_mine_rush: u32,
    /// Base cap on light units per factory; grows by one every 100 steps.
    pub light_limit: u32,
    /// Water reserve below which a factory never waters lichen.
    pub never_water_threshold: i32,
    /// Water reserve above which a factory always waters lichen.
    pub always_water_threshold: i32,
    /// Water reserve above which a factory waters even with zero income.
    pub always_always_water_threshold: i32,
    /// Water level that triggers ice-conflict desperation checks.
    pub ice_conflict_water_threshold: i32,
    /// Water level below which a blockade keeps anticipating couriers.
    pub blockade_anticipation_water: i32,
    /// Factory water floor used by miner/cow/attacker validity checks.
    pub low_water_floor: i32,
    /// Water reserve treated as "safe" when releasing ice miners.
    pub water_surplus_threshold: i32,
    /// Probability (permille) that a protector strikes a threatened mine.
    pub protector_strike_permille: u32,
    /// Probability (permille) of the opportunistic collision-win move.
    pub win_collision_permille: u32,
    /// Chance table (permille) of breaking a light-vs-heavy standoff,
    /// indexed by consecutive standoff turns.
    pub standoff_break_vs_heavy: Vec<u32>,
    /// Chance table (permille) of breaking a same-weight standoff.
    pub standoff_break_same_weight: Vec<u32>,
    /// Node-count ceiling before a single path search logs an anomaly.
    pub search_node_warn_limit: u32,
    /// Maximum emitted action-queue length (engine wire limit).
    pub max_queue_len: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            lookahead: 50,
            time_per_invocation_ms: 3000,
            end_phase: 880,
            ice_mine_rush: 970,
            light_limit: 12,
            never_water_threshold: 50,
            always_water_threshold: 200,
            always_always_water_threshold: 300,
            ice_conflict_water_threshold: 130,
            blockade_anticipation_water: 150,
            low_water_floor: 40,
            water_surplus_threshold: 300,
            protector_strike_permille: 400,
            win_collision_permille: 250,
            standoff_break_vs_heavy: vec![0, 0, 0, 100, 300, 500, 700, 900, 900],
            standoff_break_same_weight: vec![0, 0, 0, 0, 100, 250, 500, 500, 700],
            search_node_warn_limit: 1500,
            max_queue_len: 20,
        }
    }
}

impl AgentConfig {
    /// Parse a config from RON text.
    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| EngineError::ConfigParse {
            path: "<inline>".into(),
            message: e.to_string(),
        })
    }

    /// Dynamic light-unit cap at a given step.
    #[must_use]
    pub fn light_limit_at(&self, step: u32) -> u32 {
        self.light_limit + step / 100
    }

    /// Standoff-break chance for a light threatened by a heavier unit.
    #[must_use]
    pub fn standoff_chance_vs_heavy(&self, standoff_turns: usize) -> u32 {
        let t = &self.standoff_break_vs_heavy;
        t[standoff_turns.min(t.len() - 1)]
    }

    /// Standoff-break chance between same-weight units.
    #[must_use]
    pub fn standoff_chance_same_weight(&self, standoff_turns: usize) -> u32 {
        let t = &self.standoff_break_same_weight;
        t[standoff_turns.min(t.len() - 1)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.lookahead, 50);
        assert_eq!(cfg.light_limit_at(0), 12);
        assert_eq!(cfg.light_limit_at(350), 15);
    }

    #[test]
    fn test_standoff_tables_clamp() {
        let cfg = AgentConfig::default();
        assert_eq!(cfg.standoff_chance_vs_heavy(0), 0);
        assert_eq!(cfg.standoff_chance_vs_heavy(100), 900);
        assert_eq!(cfg.standoff_chance_same_weight(5), 250);
    }

    #[test]
    fn test_ron_roundtrip() {
        let cfg = AgentConfig::from_ron("(lookahead: 10, end_phase: 800)").unwrap();
        assert_eq!(cfg.lookahead, 10);
        assert_eq!(cfg.end_phase, 800);
        // Unspecified fields fall back to defaults.
        assert_eq!(cfg.light_limit, 12);
    }
}
