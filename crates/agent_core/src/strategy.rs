//! Cross-invocation persistent memory.
//!
//! Each real turn runs in a fresh engine invocation; everything that must
//! survive between turns lives here and round-trips through an opaque binary
//! blob held by the host process. Entries referencing entities that no longer
//! appear in the latest snapshot are detected at restore time, logged once
//! per id, and pruned - never silently stale-read.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actions::UnitAction;
use crate::board::{CellId, FactoryId, Step, UnitId};
use crate::cell::RegionInfo;
use crate::error::{EngineError, Result};
use crate::modes::Mode;
use crate::roles::Role;

/// Tallies of emitted action kinds for one unit.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ActionTally {
    /// Stand-stills.
    pub no_move: u32,
    /// Real moves.
    pub moves: u32,
    /// Power transfers.
    pub power_transfer: u32,
    /// Non-power transfers.
    pub resource_transfer: u32,
    /// Digs.
    pub dig: u32,
    /// Pickups.
    pub pickup: u32,
    /// Self-destructs.
    pub self_destruct: u32,
    /// Turns where the committed queue had to be replaced.
    pub queue_update: u32,
}

/// Rolling per-unit history, updated at the start and end of each real turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitStats {
    /// Real step this unit was first observed.
    pub init_step: Step,
    /// Cell occupied at each observed step, starting at `init_step`.
    pub cell_ids: Vec<CellId>,
    /// Power at each observed step.
    pub power: Vec<i32>,
    /// Head of the committed queue at each observed step.
    pub next_queued_action: Vec<Option<UnitAction>>,
    /// `(cell, step)` pairs where this unit was seen mining.
    pub mine_events: Vec<(CellId, Step)>,
    /// `(cell, strain, step)` pairs where this unit destroyed lichen.
    pub pillage_events: Vec<(CellId, i32, Step)>,
    /// `(opposing unit, step)` pairs where this unit was threatened.
    pub threat_events: Vec<(UnitId, Step)>,
    /// Last friendly factory footprint this unit stood on.
    pub last_factory_id: Option<FactoryId>,
    /// Role name tallies across the match.
    pub role_counts: BTreeMap<String, u32>,
    /// Emitted action tallies across the match.
    pub actions: ActionTally,

    /// Previous-step observations used for event detection.
    pub prev_cell_id: Option<CellId>,
    /// Ice cargo last step.
    pub prev_ice: i32,
    /// Ore cargo last step.
    pub prev_ore: i32,
    /// Water cargo last step.
    pub prev_water: i32,
    /// Water cargo two steps ago.
    pub prev_prev_water: i32,
    /// Rubble under the unit last step.
    pub prev_rubble: i32,
    /// Lichen strain under the unit last step.
    pub prev_lichen_strain: i32,
}

impl UnitStats {
    /// Fresh stats for a unit first seen at `step`.
    #[must_use]
    pub fn new(step: Step) -> Self {
        Self {
            init_step: step,
            cell_ids: Vec::new(),
            power: Vec::new(),
            next_queued_action: Vec::new(),
            mine_events: Vec::new(),
            pillage_events: Vec::new(),
            threat_events: Vec::new(),
            last_factory_id: None,
            role_counts: BTreeMap::new(),
            actions: ActionTally::default(),
            prev_cell_id: None,
            prev_ice: 0,
            prev_ore: 0,
            prev_water: 0,
            prev_prev_water: 0,
            prev_rubble: 0,
            prev_lichen_strain: -1,
        }
    }

    /// Record the opposing units threatening this unit at `step`.
    pub fn save_threats(&mut self, step: Step, threats: &[UnitId]) {
        for &t in threats {
            self.threat_events.push((t, step));
        }
    }

    /// Cell occupied `past_steps` real steps ago, if history reaches back
    /// that far.
    #[must_use]
    pub fn past_cell(&self, past_steps: usize) -> Option<CellId> {
        if self.cell_ids.len() < past_steps + 1 {
            return None;
        }
        Some(self.cell_ids[self.cell_ids.len() - 1 - past_steps])
    }
}

/// Static per-cell cache: geometry that never changes after match start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellCache {
    /// Whether region labels have been computed and saved.
    pub region_saved: bool,
    /// Flatland/lowland region labels.
    pub region: RegionInfo,
    /// Manhattan distance to each factory footprint.
    pub factory_dists: Option<BTreeMap<FactoryId, i32>>,
    /// Occupancy history, indexed by absolute real step.
    pub unit_history: Option<Vec<Option<UnitId>>>,
}

/// Static per-factory cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactoryCache {
    /// Routes from the factory to its nearest ice/ore cells, nearest first.
    pub resource_routes: Vec<Vec<CellId>>,
    /// Routes from the factory to its nearest open regions, nearest first.
    pub lowland_routes: Vec<Vec<CellId>>,
    /// `(cell, step)` pairs where this factory's lichen was pillaged.
    pub pillage_events: Vec<(CellId, Step)>,
}

/// The whole persistent cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Strategy {
    /// Serialized mode per factory, written once per real turn.
    pub modes: BTreeMap<FactoryId, Mode>,
    /// Serialized role per unit, written once per real turn.
    pub roles: BTreeMap<UnitId, Role>,
    /// Cached multi-turn route per unit.
    pub routes: BTreeMap<UnitId, Vec<CellId>>,
    /// Home factory per unit.
    pub unit_assigned_factories: BTreeMap<UnitId, FactoryId>,
    /// Owning factory per contested resource cell.
    pub resource_assigned_factories: BTreeMap<CellId, FactoryId>,
    /// Rolling history per unit (both teams).
    pub unit_stats: BTreeMap<UnitId, UnitStats>,
    /// Units that have disappeared from the snapshot.
    pub dead_units: BTreeSet<UnitId>,
    /// Factories that have exploded.
    pub dead_factories: BTreeSet<FactoryId>,
    /// Static per-cell geometry caches.
    pub cell_caches: BTreeMap<CellId, CellCache>,
    /// Static per-factory caches.
    pub factory_caches: BTreeMap<FactoryId, FactoryCache>,
}

impl Strategy {
    /// Record a unit as dead, logging the first time only.
    pub fn check_dead_unit(&mut self, unit_id: UnitId) {
        if self.dead_units.insert(unit_id) {
            info!(unit_id, "unit died");
            self.roles.remove(&unit_id);
            self.routes.remove(&unit_id);
            self.unit_assigned_factories.remove(&unit_id);
        }
    }

    /// Record a factory as exploded, logging the first time only.
    pub fn check_dead_factory(&mut self, factory_id: FactoryId) {
        if self.dead_factories.insert(factory_id) {
            info!(factory_id, "factory exploded");
            self.modes.remove(&factory_id);
            self.resource_assigned_factories
                .retain(|_, f| *f != factory_id);
        }
    }

    /// Stats entry for a unit, creating it on first sight.
    pub fn stats_mut(&mut self, unit_id: UnitId, step: Step) -> &mut UnitStats {
        self.unit_stats
            .entry(unit_id)
            .or_insert_with(|| UnitStats::new(step))
    }

    /// Serialize to the opaque blob handed to the host.
    pub fn to_blob(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| EngineError::CacheEncode(e.to_string()))
    }

    /// Restore from the opaque blob handed back by the host.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        bincode::deserialize(blob).map_err(|e| EngineError::CacheDecode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_unit_prunes_entries() {
        let mut s = Strategy::default();
        s.routes.insert(5, vec![1, 2, 3]);
        s.unit_assigned_factories.insert(5, 0);
        s.check_dead_unit(5);
        assert!(s.routes.is_empty());
        assert!(s.unit_assigned_factories.is_empty());
        assert!(s.dead_units.contains(&5));
        // Second call is a no-op.
        s.check_dead_unit(5);
    }

    #[test]
    fn test_dead_factory_prunes_resource_assignments() {
        let mut s = Strategy::default();
        s.resource_assigned_factories.insert(100, 3);
        s.resource_assigned_factories.insert(101, 4);
        s.check_dead_factory(3);
        assert_eq!(s.resource_assigned_factories.len(), 1);
        assert_eq!(s.resource_assigned_factories.get(&101), Some(&4));
    }

    #[test]
    fn test_blob_roundtrip() {
        let mut s = Strategy::default();
        s.routes.insert(1, vec![10, 11, 12]);
        s.stats_mut(1, 4).cell_ids.push(10);
        let blob = s.to_blob().unwrap();
        let back = Strategy::from_blob(&blob).unwrap();
        assert_eq!(back.routes.get(&1), Some(&vec![10, 11, 12]));
        assert_eq!(back.unit_stats.get(&1).unwrap().init_step, 4);
    }

    #[test]
    fn test_past_cell() {
        let mut stats = UnitStats::new(0);
        stats.cell_ids = vec![7, 8, 9];
        assert_eq!(stats.past_cell(0), Some(9));
        assert_eq!(stats.past_cell(2), Some(7));
        assert_eq!(stats.past_cell(3), None);
    }
}
