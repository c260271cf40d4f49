//! One board cell.
//!
//! Cells carry static terrain facts (ice, ore, factory footprint), per-turn
//! indexed simulation state (rubble, lichen, occupancy, assignment), cached
//! static geometry (region ids, factory distances, occupancy history) and
//! search scratch for the pathfinder.
//!
//! Per-turn arrays are indexed by `step - board.step`; index 0 is the real
//! snapshot and higher indices are forward-simulated state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::board::{CellId, FactoryId, UnitId};

/// Pathfinder scratch cached on each cell.
///
/// A monotonically increasing generation id stamps entries so a new search
/// invalidates every cell's cache in O(1) instead of rescanning the board.
#[derive(Debug, Clone, Copy)]
pub struct SearchScratch {
    /// Generation of the search that last wrote this entry.
    pub generation: u64,
    /// Best known cost from any source.
    pub cost: i64,
    /// Best known hop count from any source.
    pub hops: i32,
    /// Predecessor cell on the best known route.
    pub prev: Option<CellId>,
}

impl Default for SearchScratch {
    fn default() -> Self {
        Self {
            generation: 0,
            cost: i64::MAX,
            hops: i32::MAX,
            prev: None,
        }
    }
}

/// Static region labels computed by flood fill at match start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionInfo {
    /// Connected zero-rubble region id, if this cell is flat.
    pub flatland_id: Option<u32>,
    /// Size of the flatland region.
    pub flatland_size: u32,
    /// Connected low-rubble region id, if this cell is cheap for lights.
    pub lowland_id: Option<u32>,
    /// Size of the lowland region.
    pub lowland_size: u32,
}

/// One cell of the board.
#[derive(Debug, Clone)]
pub struct Cell {
    /// Row-major id, `y * size + x`.
    pub id: CellId,
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
    /// Whether this cell yields ice when dug.
    pub ice: bool,
    /// Whether this cell yields ore when dug.
    pub ore: bool,

    /// Rubble per turn index.
    pub rubble: Vec<i32>,
    /// Lichen per turn index.
    pub lichen: Vec<i32>,
    /// Lichen strain owner per turn index, -1 for none.
    pub lichen_strain: Vec<i32>,
    /// Whether lichen here is connected to its factory, per turn index.
    pub lichen_connected: Vec<bool>,
    /// Steps from the owning factory through its own lichen, if computed
    /// this simulated turn.
    pub lichen_dist: Option<i64>,
    /// Whether this cell is a choke point in its factory's lichen field.
    pub lichen_bottleneck: bool,

    /// True for the center of a factory footprint.
    pub factory_center: bool,
    /// Factory whose 3x3 footprint covers this cell.
    pub factory_id: Option<FactoryId>,

    /// Occupying unit per turn index.
    pub unit_id: Vec<Option<UnitId>>,
    /// Assigned (exclusively claimed) unit per turn index.
    pub assigned_unit_id: Vec<Option<UnitId>>,
    /// Factory this resource cell is reserved for, if any.
    pub assigned_factory: Option<FactoryId>,

    /// Static region labels.
    pub region: RegionInfo,
    /// Manhattan distance to each factory footprint at snapshot time.
    pub factory_dists: BTreeMap<FactoryId, i32>,
    /// Which unit stood here at each past real step.
    pub unit_history: Vec<Option<UnitId>>,

    /// Pathfinder scratch.
    pub(crate) search: SearchScratch,
}

impl Cell {
    /// Create a cell from snapshot layers.
    #[must_use]
    pub fn new(
        id: CellId,
        x: i32,
        y: i32,
        ice: bool,
        ore: bool,
        rubble: i32,
        lichen: i32,
        lichen_strain: i32,
        future_len: usize,
        history_len: usize,
    ) -> Self {
        let mut rubble_v = vec![0; future_len + 1];
        rubble_v[0] = rubble;
        let mut lichen_v = vec![0; future_len + 1];
        lichen_v[0] = lichen;
        let mut strain_v = vec![-1; future_len + 1];
        strain_v[0] = lichen_strain;
        Self {
            id,
            x,
            y,
            ice,
            ore,
            rubble: rubble_v,
            lichen: lichen_v,
            lichen_strain: strain_v,
            lichen_connected: vec![false; future_len + 1],
            lichen_dist: None,
            lichen_bottleneck: false,
            factory_center: false,
            factory_id: None,
            unit_id: vec![None; future_len + 1],
            assigned_unit_id: vec![None; future_len + 1],
            assigned_factory: None,
            region: RegionInfo::default(),
            factory_dists: BTreeMap::new(),
            unit_history: vec![None; history_len],
            search: SearchScratch::default(),
        }
    }

    /// Whether this cell is part of any factory footprint.
    #[must_use]
    pub fn has_factory(&self) -> bool {
        self.factory_id.is_some()
    }

    /// Claim this cell for `unit` at turn index `i`.
    ///
    /// # Panics
    ///
    /// A second claim at the same index without an intervening release is a
    /// planner bug and fatal.
    pub fn set_assignment(&mut self, i: usize, unit: UnitId) {
        assert!(
            self.assigned_unit_id[i].is_none(),
            "cell ({},{}) already assigned to unit {} at index {i}, unit {unit} double-claims",
            self.x,
            self.y,
            self.assigned_unit_id[i].expect("checked above"),
        );
        self.assigned_unit_id[i] = Some(unit);
    }

    /// Release this cell's claim for `unit` at turn index `i`.
    ///
    /// # Panics
    ///
    /// Releasing an absent or foreign claim is a planner bug and fatal.
    pub fn unset_assignment(&mut self, i: usize, unit: UnitId) {
        assert!(
            self.assigned_unit_id[i] == Some(unit),
            "cell ({},{}) release mismatch at index {i}: held {:?}, releasing {unit}",
            self.x,
            self.y,
            self.assigned_unit_id[i],
        );
        self.assigned_unit_id[i] = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell() -> Cell {
        Cell::new(0, 3, 4, false, false, 10, 0, -1, 5, 16)
    }

    #[test]
    fn test_new_cell_arrays() {
        let c = cell();
        assert_eq!(c.rubble.len(), 6);
        assert_eq!(c.rubble[0], 10);
        assert_eq!(c.rubble[1], 0);
        assert_eq!(c.lichen_strain[0], -1);
        assert_eq!(c.unit_history.len(), 16);
    }

    #[test]
    fn test_assignment_set_and_unset() {
        let mut c = cell();
        c.set_assignment(2, 7);
        assert_eq!(c.assigned_unit_id[2], Some(7));
        c.unset_assignment(2, 7);
        assert_eq!(c.assigned_unit_id[2], None);
    }

    #[test]
    #[should_panic(expected = "double-claims")]
    fn test_double_assignment_is_fatal() {
        let mut c = cell();
        c.set_assignment(0, 7);
        c.set_assignment(0, 8);
    }

    #[test]
    #[should_panic(expected = "release mismatch")]
    fn test_foreign_release_is_fatal() {
        let mut c = cell();
        c.set_assignment(0, 7);
        c.unset_assignment(0, 8);
    }
}
