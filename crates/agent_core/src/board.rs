//! The world snapshot: grid, registries, geometry, and derived board info.
//!
//! The board owns every cell, unit, and factory by id; roles, modes, and the
//! persistent cache refer to entities by id only, so a vanished entity is a
//! normal lookup miss rather than a dangling reference.
//!
//! Per-turn-indexed state everywhere in the engine uses the convention
//! `index = absolute step - board.step`; [`Board::idx`] is the one place the
//! conversion happens.

use std::collections::BTreeMap;

use tracing::info;

use crate::cell::Cell;
use crate::config::AgentConfig;
use crate::error::{EngineError, Result};
use crate::factory::Factory;
use crate::modes::Mode;
use crate::observation::Observation;
use crate::player::PlayerState;
use crate::roles::Role;
use crate::rules::{GameRules, RobotClass};
use crate::strategy::Strategy;
use crate::unit::Unit;

/// Absolute game step.
pub type Step = u32;
/// Row-major cell id.
pub type CellId = u32;
/// Engine-assigned unit id.
pub type UnitId = u32;
/// Factory id; doubles as the factory's lichen strain id.
pub type FactoryId = u32;
/// Team id, 0 or 1.
pub type Team = u8;

/// Sentinel cost for unreachable destinations.
pub const UNREACHABLE: i64 = 1_000_000;

/// Ids at or above this mark hypothetical units built during look-ahead;
/// they never collide with engine ids and are skipped when harvesting.
pub const FUTURE_UNIT_ID_BASE: UnitId = 900_000;

/// Length of the per-cell occupancy history arrays.
pub const HISTORY_LEN: usize = 1100;

/// The world snapshot plus all forward-simulated state for one real turn.
#[derive(Debug)]
pub struct Board {
    /// Real step of this snapshot.
    pub step: Step,
    /// Board side length.
    pub size: i32,
    /// All cells, row-major.
    pub cells: Vec<Cell>,
    /// All units, both teams, by id. Sorted iteration keeps the engine
    /// deterministic.
    pub units: BTreeMap<UnitId, Unit>,
    /// All factories, both teams, by id.
    pub factories: BTreeMap<FactoryId, Factory>,
    /// Our team.
    pub me: PlayerState,
    /// The opposing team.
    pub opp: PlayerState,
    /// Ruleset constants.
    pub rules: GameRules,
    /// Engine configuration, threaded in from the host.
    pub config: AgentConfig,
    /// Persistent cross-invocation memory.
    pub strategy: Strategy,
    /// Simulated-turn arrays length (lookahead + 1).
    pub future_len: usize,

    /// Search generation counter for the pathfinder's lazy cache reset.
    pub(crate) search_generation: u64,
    /// Snapshot-time census of opposing mining sites: `(cell, unit)` pairs.
    pub(crate) opp_mines_cache: Option<Vec<(CellId, UnitId)>>,
    /// Lazily computed contested-cell verdicts.
    pub(crate) contested_cache: BTreeMap<CellId, bool>,
}

impl Board {
    /// Turn index for `step`.
    ///
    /// # Panics
    ///
    /// `step` must not precede the snapshot; past lookups go through
    /// occupancy history instead.
    #[inline]
    #[must_use]
    pub fn idx(&self, step: Step) -> usize {
        assert!(
            step >= self.step,
            "turn index for past step {step} (snapshot at {})",
            self.step
        );
        (step - self.step) as usize
    }

    /// Cell id at `(x, y)`, or `None` off-board.
    #[inline]
    #[must_use]
    pub fn cell_at(&self, x: i32, y: i32) -> Option<CellId> {
        if x < 0 || y < 0 || x >= self.size || y >= self.size {
            return None;
        }
        Some((y * self.size + x) as CellId)
    }

    /// The cell with the given id.
    #[inline]
    #[must_use]
    pub fn cell(&self, id: CellId) -> &Cell {
        &self.cells[id as usize]
    }

    /// Mutable cell access.
    #[inline]
    pub fn cell_mut(&mut self, id: CellId) -> &mut Cell {
        &mut self.cells[id as usize]
    }

    /// The unit with the given id.
    ///
    /// # Panics
    ///
    /// The id must be live; use [`Board::get_unit`] for ids from caches.
    #[inline]
    #[must_use]
    pub fn unit(&self, id: UnitId) -> &Unit {
        self.units.get(&id).unwrap_or_else(|| {
            panic!("unit {id} not in registry");
        })
    }

    /// Unit lookup tolerating dead ids.
    #[inline]
    #[must_use]
    pub fn get_unit(&self, id: UnitId) -> Option<&Unit> {
        self.units.get(&id)
    }

    /// Mutable unit access.
    ///
    /// # Panics
    ///
    /// The id must be live.
    #[inline]
    pub fn unit_mut(&mut self, id: UnitId) -> &mut Unit {
        self.units.get_mut(&id).unwrap_or_else(|| {
            panic!("unit {id} not in registry");
        })
    }

    /// The factory with the given id.
    ///
    /// # Panics
    ///
    /// The id must be live; use [`Board::get_factory`] for ids from caches.
    #[inline]
    #[must_use]
    pub fn factory(&self, id: FactoryId) -> &Factory {
        self.factories.get(&id).unwrap_or_else(|| {
            panic!("factory {id} not in registry");
        })
    }

    /// Factory lookup tolerating dead ids.
    #[inline]
    #[must_use]
    pub fn get_factory(&self, id: FactoryId) -> Option<&Factory> {
        self.factories.get(&id)
    }

    /// Mutable factory access.
    ///
    /// # Panics
    ///
    /// The id must be live.
    #[inline]
    pub fn factory_mut(&mut self, id: FactoryId) -> &mut Factory {
        self.factories.get_mut(&id).unwrap_or_else(|| {
            panic!("factory {id} not in registry");
        })
    }

    /// Our unit ids, ascending.
    #[must_use]
    pub fn my_units(&self) -> Vec<UnitId> {
        self.units
            .values()
            .filter(|u| u.team == self.me.id)
            .map(|u| u.id)
            .collect()
    }

    /// Opposing unit ids, ascending.
    #[must_use]
    pub fn opp_units(&self) -> Vec<UnitId> {
        self.units
            .values()
            .filter(|u| u.team == self.opp.id)
            .map(|u| u.id)
            .collect()
    }

    /// Our factory ids, ascending.
    #[must_use]
    pub fn my_factories(&self) -> Vec<FactoryId> {
        self.factories
            .values()
            .filter(|f| f.team == self.me.id)
            .map(|f| f.id)
            .collect()
    }

    /// Opposing factory ids, ascending.
    #[must_use]
    pub fn opp_factories(&self) -> Vec<FactoryId> {
        self.factories
            .values()
            .filter(|f| f.team == self.opp.id)
            .map(|f| f.id)
            .collect()
    }

    /// Whether `id` is a hypothetical unit created during look-ahead.
    #[inline]
    #[must_use]
    pub fn is_future_unit(id: UnitId) -> bool {
        id >= FUTURE_UNIT_ID_BASE
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    /// Up to four orthogonal neighbors, in N/E/S/W order.
    #[must_use]
    pub fn neighbors(&self, cell: CellId) -> Vec<CellId> {
        let c = self.cell(cell);
        let (x, y) = (c.x, c.y);
        [(0, -1), (1, 0), (0, 1), (-1, 0)]
            .iter()
            .filter_map(|(dx, dy)| self.cell_at(x + dx, y + dy))
            .collect()
    }

    /// Neighbor in a fixed offset, if on-board.
    #[must_use]
    pub fn neighbor(&self, cell: CellId, dx: i32, dy: i32) -> Option<CellId> {
        let c = self.cell(cell);
        self.cell_at(c.x + dx, c.y + dy)
    }

    /// Plain Manhattan distance between two cells.
    #[must_use]
    pub fn man_dist(&self, a: CellId, b: CellId) -> i32 {
        let (ca, cb) = (self.cell(a), self.cell(b));
        (ca.x - cb.x).abs() + (ca.y - cb.y).abs()
    }

    /// Manhattan distance from `cell` to the nearest cell of the 3x3
    /// footprint centered on `center`.
    #[must_use]
    pub fn man_dist_to_footprint(&self, cell: CellId, center: CellId) -> i32 {
        let (c, f) = (self.cell(cell), self.cell(center));
        let dx = ((c.x - f.x).abs() - 1).max(0);
        let dy = ((c.y - f.y).abs() - 1).max(0);
        dx + dy
    }

    /// Manhattan distance from `cell` to a factory's footprint.
    ///
    /// Tolerates dead factory ids (a buggy opponent can have none left);
    /// returns a large finite distance in that case.
    #[must_use]
    pub fn man_dist_factory(&self, cell: CellId, factory: FactoryId) -> i32 {
        match self.get_factory(factory) {
            Some(f) => {
                let center = self.cell_at(f.x, f.y).expect("factory on board");
                self.man_dist_to_footprint(cell, center)
            }
            None => 100,
        }
    }

    /// The neighbor of `from` that steps toward `to` (largest axis first),
    /// or `from` itself when already there.
    #[must_use]
    pub fn neighbor_toward(&self, from: CellId, to: CellId) -> CellId {
        let (cf, ct) = (self.cell(from), self.cell(to));
        let (dx, dy) = (ct.x - cf.x, ct.y - cf.y);
        if dx.abs() > dy.abs() {
            self.cell_at(cf.x + dx.signum(), cf.y).unwrap_or(from)
        } else if dy != 0 {
            self.cell_at(cf.x, cf.y + dy.signum()).unwrap_or(from)
        } else if dx != 0 {
            self.cell_at(cf.x + dx.signum(), cf.y).unwrap_or(from)
        } else {
            from
        }
    }

    /// Direction from `from` to an adjacent (or equal) cell.
    #[must_use]
    pub fn direction_to(&self, from: CellId, to: CellId) -> crate::actions::Direction {
        use crate::actions::Direction;
        let (cf, ct) = (self.cell(from), self.cell(to));
        if ct.y < cf.y {
            Direction::North
        } else if ct.x > cf.x {
            Direction::East
        } else if ct.y > cf.y {
            Direction::South
        } else if ct.x < cf.x {
            Direction::West
        } else {
            Direction::Center
        }
    }

    /// Whether `mid` lies inside the bounding box spanned by `a` and `b`.
    #[must_use]
    pub fn is_between(&self, mid: CellId, a: CellId, b: CellId) -> bool {
        let (cm, ca, cb) = (self.cell(mid), self.cell(a), self.cell(b));
        let x_ok = (ca.x <= cm.x && cm.x <= cb.x) || (ca.x >= cm.x && cm.x >= cb.x);
        let y_ok = (ca.y <= cm.y && cm.y <= cb.y) || (ca.y >= cm.y && cm.y >= cb.y);
        x_ok && y_ok
    }

    /// Cells at Manhattan radius `min_radius..=max_radius` around `center`,
    /// radius-major.
    #[must_use]
    pub fn radius_cells(&self, center: CellId, min_radius: i32, max_radius: i32) -> Vec<(CellId, i32)> {
        let c = self.cell(center);
        let (cx, cy) = (c.x, c.y);
        let mut out = Vec::new();
        for radius in min_radius..=max_radius {
            if radius == 0 {
                out.push((center, 0));
                continue;
            }
            for dx in -radius..=radius {
                let dy = radius - dx.abs();
                if let Some(id) = self.cell_at(cx + dx, cy + dy) {
                    out.push((id, radius));
                }
                if dy != 0 {
                    if let Some(id) = self.cell_at(cx + dx, cy - dy) {
                        out.push((id, radius));
                    }
                }
            }
        }
        out
    }

    /// Cells within footprint-distance `min_radius..=max_radius` of the 3x3
    /// footprint centered on `center`, footprint cells excluded.
    #[must_use]
    pub fn radius_cells_factory(
        &self,
        center: CellId,
        min_radius: i32,
        max_radius: i32,
    ) -> Vec<(CellId, i32)> {
        assert!(min_radius >= 1);
        // The +1/+2 padding accounts for the footprint extending one cell
        // from the center in each direction.
        self.radius_cells(center, min_radius + 1, max_radius + 2)
            .into_iter()
            .filter_map(|(id, _)| {
                let d = self.man_dist_to_footprint(id, center);
                (d >= min_radius && d <= max_radius).then_some((id, d))
            })
            .collect()
    }

    /// Nearest factory of `team` (or either team when `None`) to `cell`.
    #[must_use]
    pub fn nearest_factory(&self, cell: CellId, team: Option<Team>) -> Option<FactoryId> {
        let mut best: Option<(i32, FactoryId)> = None;
        for f in self.factories.values() {
            if team.is_some_and(|t| t != f.team) {
                continue;
            }
            let d = self.man_dist_factory(cell, f.id);
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, f.id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Footprint distance to the nearest factory of `team`.
    #[must_use]
    pub fn nearest_factory_dist(&self, cell: CellId, team: Option<Team>) -> i32 {
        self.nearest_factory(cell, team)
            .map_or(UNREACHABLE as i32, |f| self.man_dist_factory(cell, f))
    }

    // ------------------------------------------------------------------
    // Flood fill and region labelling
    // ------------------------------------------------------------------

    /// Iterative flood fill over 4-connected cells satisfying `cond`,
    /// starting at `start`. `visit` is called exactly once per member cell.
    pub fn flood_fill(
        &self,
        start: CellId,
        cond: impl Fn(&Board, CellId) -> bool,
        mut visit: impl FnMut(CellId),
    ) {
        let mut seen = vec![false; self.cells.len()];
        let mut queue = vec![start];
        while let Some(id) = queue.pop() {
            if seen[id as usize] {
                continue;
            }
            seen[id as usize] = true;
            if cond(self, id) {
                visit(id);
                for n in self.neighbors(id) {
                    if !seen[n as usize] {
                        queue.push(n);
                    }
                }
            }
        }
    }

    /// Label flatland (zero rubble) and lowland (light-passable rubble)
    /// regions, loading from the cache when available.
    pub fn set_region_info(&mut self) {
        // Load from persisted strategy if a full save exists.
        let cached = self
            .strategy
            .cell_caches
            .get(&0)
            .is_some_and(|c| c.region_saved)
            && self.strategy.cell_caches.len() >= self.cells.len();
        if cached {
            for cell in &mut self.cells {
                cell.region = self.strategy.cell_caches[&cell.id].region;
            }
            return;
        }

        let flat = |b: &Board, id: CellId| {
            let c = b.cell(id);
            c.rubble[0] == 0 && !c.has_factory() && !c.ice && !c.ore
        };
        // Lights can cross rubble below 20 with a single power.
        let low = |b: &Board, id: CellId| {
            let c = b.cell(id);
            c.rubble[0] <= 19 && !c.has_factory()
        };

        let mut next_id: u32 = 1;
        for start in 0..self.cells.len() as CellId {
            if flat(self, start) && self.cell(start).region.flatland_id.is_none() {
                let mut members = Vec::new();
                self.flood_fill(start, flat, |id| members.push(id));
                for &m in &members {
                    let region = &mut self.cells[m as usize].region;
                    region.flatland_id = Some(next_id);
                    region.flatland_size = members.len() as u32;
                }
                next_id += 1;
            }
        }
        for start in 0..self.cells.len() as CellId {
            if low(self, start) && self.cell(start).region.lowland_id.is_none() {
                let mut members = Vec::new();
                self.flood_fill(start, low, |id| members.push(id));
                for &m in &members {
                    let region = &mut self.cells[m as usize].region;
                    region.lowland_id = Some(next_id);
                    region.lowland_size = members.len() as u32;
                }
                next_id += 1;
            }
        }
    }

    /// Populate per-cell factory distances and occupancy history from the
    /// cache, computing fresh values when absent.
    pub fn set_cell_caches(&mut self) {
        let factory_ids: Vec<FactoryId> = self.factories.keys().copied().collect();
        for id in 0..self.cells.len() as CellId {
            let cached = self.strategy.cell_caches.get(&id);
            if let Some(dists) = cached.and_then(|c| c.factory_dists.clone()) {
                self.cells[id as usize].factory_dists = dists;
            } else {
                let mut dists = BTreeMap::new();
                for &f in &factory_ids {
                    dists.insert(f, self.man_dist_factory(id, f));
                }
                self.cells[id as usize].factory_dists = dists;
            }
            if let Some(history) = cached.and_then(|c| c.unit_history.clone()) {
                self.cells[id as usize].unit_history = history;
            }
        }
    }

    // ------------------------------------------------------------------
    // Occupancy
    // ------------------------------------------------------------------

    /// Register `unit` as occupying `cell` at `step`.
    ///
    /// # Panics
    ///
    /// A unit registered on two adjacent cells at the same index means two
    /// phases both moved it; that is a planner bug and fatal.
    pub fn register_unit(&mut self, step: Step, cell: CellId, unit: UnitId) {
        let i = self.idx(step);
        for n in self.neighbors(cell) {
            assert!(
                self.cell(n).unit_id[i] != Some(unit),
                "step {step}: unit {unit} registered at ({},{}) and ({},{})",
                self.cell(n).x,
                self.cell(n).y,
                self.cell(cell).x,
                self.cell(cell).y,
            );
        }
        self.cell_mut(cell).unit_id[i] = Some(unit);
    }

    /// The unit occupying `cell` at `step`, filtered by team if given.
    #[must_use]
    pub fn unit_at(&self, cell: CellId, step: Step, team: Option<Team>) -> Option<UnitId> {
        let i = (step - self.step) as usize;
        let uid = self.cell(cell).unit_id.get(i).copied().flatten()?;
        let unit = self.get_unit(uid)?;
        if team.is_some_and(|t| t != unit.team) {
            return None;
        }
        Some(uid)
    }

    /// The unit holding the exclusive claim on `cell` at `step`.
    #[must_use]
    pub fn assigned_unit(&self, cell: CellId, step: Step) -> Option<UnitId> {
        let i = self.idx(step);
        self.cell(cell).assigned_unit_id[i]
    }

    /// Count of cells a unit with the given power could legally end on next
    /// step from `cell` (including standing still).
    #[must_use]
    pub fn moves_available(&self, cell: CellId, step: Step, power: i32) -> i32 {
        let i = self.idx(step);
        let mut count = 0;
        for n in std::iter::once(cell).chain(self.neighbors(cell)) {
            let c = self.cell(n);
            let blocked_factory =
                c.factory_id.is_some_and(|f| self.factory(f).team != self.me.id);
            let taken = self.unit_at(n, step + 1, None).is_some();
            let cheap_enough = power >= 1 + c.rubble[i] / 20;
            if !taken && !blocked_factory && cheap_enough {
                count += 1;
            }
        }
        count
    }

    // ------------------------------------------------------------------
    // Derived board info
    // ------------------------------------------------------------------

    /// Cells the opposing team has recently mined or plans to mine,
    /// filtered by miner class and resource.
    pub fn opp_mines(&mut self, heavy: Option<bool>, ice: Option<bool>) -> Vec<CellId> {
        if self.opp_mines_cache.is_none() {
            let mut census = Vec::new();
            for uid in self.opp_units() {
                for cell in crate::unit::unit_mines(self, uid, 15, 10, None) {
                    census.push((cell, uid));
                }
            }
            census.sort_unstable();
            census.dedup();
            self.opp_mines_cache = Some(census);
        }
        let census = self.opp_mines_cache.as_ref().expect("filled above");
        let mut out = Vec::new();
        for &(cell, uid) in census {
            let unit_heavy = self.unit(uid).class == RobotClass::Heavy;
            if heavy.is_some_and(|h| h != unit_heavy) {
                continue;
            }
            let c = self.cell(cell);
            if ice.is_some_and(|want_ice| if want_ice { !c.ice } else { !c.ore }) {
                continue;
            }
            out.push(cell);
        }
        out.dedup();
        out
    }

    /// Rebuild the per-team lists of lichen cells cut off from their factory.
    pub fn identify_disconnected_lichen(&mut self, step: Step) {
        let i = self.idx(step);
        let mut mine = Vec::new();
        let mut theirs = Vec::new();
        for cell in &self.cells {
            if cell.lichen[i] > 0 && !cell.lichen_connected[i] {
                if self.me.owns_strain(cell.lichen_strain[i]) {
                    mine.push(cell.id);
                } else {
                    theirs.push(cell.id);
                }
            }
        }
        self.me.lichen_disconnected_cells = mine;
        self.opp.lichen_disconnected_cells = theirs;
    }

    /// Fraction of the recent past each team class of opposing unit spent on
    /// `cell`, as (light, heavy) in parts per 1000.
    #[must_use]
    pub fn traffic(&self, cell: CellId) -> (i32, i32) {
        const WINDOW: i32 = 50;
        let mut light = 0;
        let mut heavy = 0;
        let start = self.step as i32;
        for s in ((start - WINDOW + 1).max(0)..=start).rev() {
            if let Some(uid) = self.cell(cell).unit_history[s as usize] {
                if let Some(u) = self.get_unit(uid) {
                    if u.team == self.opp.id {
                        if u.class == RobotClass::Heavy {
                            heavy += 1;
                        } else {
                            light += 1;
                        }
                    }
                }
            }
        }
        (light * 1000 / WINDOW, heavy * 1000 / WINDOW)
    }

    // ------------------------------------------------------------------
    // Snapshot construction
    // ------------------------------------------------------------------

    /// Build a board from an observation plus restored cache, and wire the
    /// cached roles/modes/routes back onto the live entities.
    pub fn from_observation(
        obs: &Observation,
        my_team: Team,
        step: Step,
        rules: GameRules,
        config: AgentConfig,
        mut strategy: Strategy,
        skip_routes: bool,
    ) -> Result<Self> {
        let size = obs.board.ice.len() as i32;
        if size == 0 || obs.board.ice.iter().any(|col| col.len() != size as usize) {
            return Err(EngineError::MalformedObservation(
                "board layers must be square".into(),
            ));
        }
        let future_len = config.lookahead as usize;

        let me_key = format!("player_{my_team}");
        let opp_team: Team = 1 - my_team;
        let opp_key = format!("player_{opp_team}");

        let me = obs.teams.get(&me_key).map_or_else(PlayerState::default, |t| {
            PlayerState::new(my_team, t.water, t.metal, t.factory_strains.iter().copied())
        });
        let opp = obs.teams.get(&opp_key).map_or_else(PlayerState::default, |t| {
            PlayerState::new(opp_team, t.water, t.metal, t.factory_strains.iter().copied())
        });

        let mut cells = Vec::with_capacity((size * size) as usize);
        for y in 0..size {
            for x in 0..size {
                let (ux, uy) = (x as usize, y as usize);
                cells.push(Cell::new(
                    (y * size + x) as CellId,
                    x,
                    y,
                    obs.board.ice[ux][uy] > 0,
                    obs.board.ore[ux][uy] > 0,
                    obs.board.rubble[ux][uy],
                    obs.board.lichen[ux][uy],
                    obs.board.lichen_strains[ux][uy],
                    future_len,
                    HISTORY_LEN,
                ));
            }
        }

        let mut board = Board {
            step,
            size,
            cells,
            units: BTreeMap::new(),
            factories: BTreeMap::new(),
            me,
            opp,
            rules,
            config,
            strategy: Strategy::default(),
            future_len,
            search_generation: 0,
            opp_mines_cache: None,
            contested_cache: BTreeMap::new(),
        };

        // Factories pave over any resources under their footprint.
        for per_player in obs.factories.values() {
            for f in per_player.values() {
                let factory = Factory::from_obs(f, board.future_len);
                let center = board
                    .cell_at(f.pos[0], f.pos[1])
                    .ok_or_else(|| EngineError::MalformedObservation("factory off board".into()))?;
                board.cell_mut(center).factory_center = true;
                for dy in -1..=1 {
                    for dx in -1..=1 {
                        let id = board
                            .cell_at(f.pos[0] + dx, f.pos[1] + dy)
                            .ok_or_else(|| {
                                EngineError::MalformedObservation("factory footprint off board".into())
                            })?;
                        let cell = board.cell_mut(id);
                        cell.factory_id = Some(factory.id);
                        cell.ice = false;
                        cell.ore = false;
                    }
                }
                board.factories.insert(factory.id, factory);
            }
        }

        for per_player in obs.units.values() {
            for u in per_player.values() {
                let mut unit = Unit::from_obs(u, &board.rules, board.future_len)?;
                let (x, y) = unit.obs_pos.take().expect("observed unit has a position");
                let pos = board
                    .cell_at(x, y)
                    .ok_or_else(|| EngineError::MalformedObservation("unit off board".into()))?;
                unit.pos[0] = Some(pos);
                let id = unit.id;
                board.units.insert(id, unit);
                board.register_unit(step, pos, id);
            }
        }

        // Static geometry, loaded from cache when possible.
        std::mem::swap(&mut board.strategy, &mut strategy);
        board.set_region_info();
        if !skip_routes {
            let factory_ids: Vec<FactoryId> = board.factories.keys().copied().collect();
            for f in factory_ids {
                crate::factory::set_factory_routes(&mut board, f);
            }
        }
        board.set_cell_caches();

        board.restore_persisted_state();
        Ok(board)
    }

    /// Wire cached roles/modes/routes/assignments onto live entities,
    /// pruning everything that references dead ids.
    fn restore_persisted_state(&mut self) {
        // Factory modes.
        let modes: Vec<(FactoryId, Mode)> = self
            .strategy
            .modes
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        for (fid, mode) in modes {
            if self.factories.contains_key(&fid) {
                if mode.refs_alive(self) {
                    self.factory_mut(fid).mode = Some(mode);
                }
            } else {
                self.strategy.check_dead_factory(fid);
            }
        }

        // Unit roles.
        let roles: Vec<(UnitId, Role)> = self
            .strategy
            .roles
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        for (uid, role) in roles {
            if self.units.contains_key(&uid) {
                if let Some(role) = role.sanitized(self, uid) {
                    self.unit_mut(uid).role = Some(role);
                }
            } else {
                self.strategy.check_dead_unit(uid);
            }
        }

        // Routes.
        let routes: Vec<(UnitId, Vec<CellId>)> = self
            .strategy
            .routes
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        for (uid, route) in routes {
            if self.units.contains_key(&uid) {
                self.unit_mut(uid).route = route;
            } else {
                self.strategy.check_dead_unit(uid);
            }
        }

        // Home factories.
        let homes: Vec<(UnitId, FactoryId)> = self
            .strategy
            .unit_assigned_factories
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        for (uid, fid) in homes {
            if !self.units.contains_key(&uid) {
                self.strategy.check_dead_unit(uid);
                continue;
            }
            if self.factories.contains_key(&fid) {
                self.unit_mut(uid).assigned_factory = Some(fid);
            } else {
                self.strategy.check_dead_factory(fid);
            }
        }

        // Resource-cell ownership.
        let owned: Vec<(CellId, FactoryId)> = self
            .strategy
            .resource_assigned_factories
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        for (cid, fid) in owned {
            if self.factories.contains_key(&fid) {
                self.cell_mut(cid).assigned_factory = Some(fid);
            } else {
                self.strategy.check_dead_factory(fid);
            }
        }
    }

    // ------------------------------------------------------------------
    // Contested cells and ice vulnerability
    // ------------------------------------------------------------------

    /// Whether a cell sits in actively disputed territory: close to both
    /// teams' factories by distance and by path cost.
    pub fn is_contested(&mut self, cell: CellId) -> bool {
        if let Some(&v) = self.contested_cache.get(&cell) {
            return v;
        }
        let mut contested = false;
        let f0 = self.nearest_factory(cell, Some(0));
        let f1 = self.nearest_factory(cell, Some(1));
        if let (Some(f0), Some(f1)) = (f0, f1) {
            let d0 = self.man_dist_factory(cell, f0);
            let d1 = self.man_dist_factory(cell, f1);
            if d0.min(d1) <= 8 && (d0 - d1).abs() <= 4 {
                let c0 = self.footprint_cost(cell, f0);
                let c1 = self.footprint_cost(cell, f1);
                if (c0 - c1).abs() <= 180 {
                    contested = true;
                }
            }
        }
        self.contested_cache.insert(cell, contested);
        contested
    }

    /// Heavy-class path cost from `cell` to the footprint of `factory`,
    /// avoiding all factory footprints en route.
    fn footprint_cost(&mut self, cell: CellId, factory: FactoryId) -> i64 {
        use crate::pathfinding::DistOptions;
        let step = self.step;
        let (cost, _, _) = self.dist(
            step,
            &[cell],
            None,
            DistOptions {
                dest_cond: Some(&move |b: &Board, _s: Step, c: CellId| {
                    b.man_dist_factory(c, factory) == 0
                }),
                avoid_cond: Some(&|b: &Board, _s: Step, c: CellId| b.cell(c).has_factory()),
                unit_move_cost: Some(20),
                unit_rubble_rate_centi: Some(100),
                ..DistOptions::default()
            },
        );
        cost
    }

    /// Whether a factory at `this_center` would be starved of ice relative
    /// to a rival at `other_center`: every ice cell within reach of `this`
    /// is about as close (by distance and cost) to `other`.
    pub fn ice_vulnerable_relative(&mut self, step: Step, this_center: CellId, other: CellId) -> bool {
        let mut ice_cells = Vec::new();
        for (cell, self_dist) in self.radius_cells_factory(this_center, 1, 8) {
            if !self.cell(cell).ice {
                continue;
            }
            ice_cells.push(cell);
            let other_dist = self.man_dist_to_footprint(cell, other);
            if self_dist + 5 <= other_dist {
                return false;
            }
        }

        for ice_cell in ice_cells {
            let this_cost = self.center_cost(step, ice_cell, this_center);
            let other_cost = self.center_cost(step, ice_cell, other);
            if this_cost + 180 <= other_cost {
                return false;
            }
        }
        true
    }

    fn center_cost(&mut self, step: Step, from: CellId, center: CellId) -> i64 {
        use crate::pathfinding::DistOptions;
        let (cost, _, _) = self.dist(
            step,
            &[from],
            None,
            DistOptions {
                dest_cond: Some(&move |b: &Board, _s: Step, c: CellId| {
                    b.man_dist_to_footprint(c, center) == 0
                }),
                avoid_cond: Some(&|b: &Board, _s: Step, c: CellId| b.cell(c).has_factory()),
                unit_move_cost: Some(20),
                unit_rubble_rate_centi: Some(100),
                ..DistOptions::default()
            },
        );
        cost
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// One-line score summary of the simulated state at `step`.
    #[must_use]
    pub fn summary(&self, step: Step) -> String {
        let i = self.idx(step);
        let (mut pf, mut of) = (0, 0);
        let (mut pp, mut op) = (0i64, 0i64);
        for f in self.factories.values() {
            if f.team == self.me.id {
                pf += 1;
                pp += i64::from(f.power[i]);
            } else {
                of += 1;
                op += i64::from(f.power[i]);
            }
        }
        let (mut phu, mut plu, mut ohu, mut olu) = (0, 0, 0, 0);
        for u in self.units.values() {
            let heavy = u.class == RobotClass::Heavy;
            if u.team == self.me.id {
                pp += i64::from(u.power[i]);
                if heavy {
                    phu += 1;
                } else {
                    plu += 1;
                }
            } else {
                op += i64::from(u.power[i]);
                if heavy {
                    ohu += 1;
                } else {
                    olu += 1;
                }
            }
        }
        let (mut pl, mut ol) = (0i64, 0i64);
        for c in &self.cells {
            if c.lichen[i] > 0 {
                if self.me.owns_strain(c.lichen_strain[i]) {
                    pl += i64::from(c.lichen[i]);
                } else if self.opp.owns_strain(c.lichen_strain[i]) {
                    ol += i64::from(c.lichen[i]);
                }
            }
        }
        format!(
            "{pf}-{of}F, {phu}-{ohu}HU, {plu}-{olu}LU, {}-{}kP, {pl}-{ol}L",
            pp / 1000,
            op / 1000
        )
    }

    /// ASCII dump of the simulated board at `step` for log diagnostics.
    #[must_use]
    pub fn to_ascii(&self, step: Step) -> String {
        let i = self.idx(step);
        let mut out = String::new();
        for y in 0..self.size {
            for x in 0..self.size {
                let id = self.cell_at(x, y).expect("in range");
                let cell = self.cell(id);
                let ch = if let Some(uid) = self.unit_at(id, step, None) {
                    let u = self.unit(uid);
                    match (u.class, u.team == self.me.id) {
                        (RobotClass::Heavy, true) => 'X',
                        (RobotClass::Heavy, false) => 'O',
                        (RobotClass::Light, true) => 'x',
                        (RobotClass::Light, false) => 'o',
                    }
                } else if cell.factory_center {
                    char::from_digit(cell.factory_id.unwrap_or(9).min(9), 10).unwrap_or('#')
                } else if cell.has_factory() {
                    '#'
                } else if cell.ice {
                    '_'
                } else if cell.ore {
                    '~'
                } else {
                    match cell.rubble[i] {
                        0..=19 => '.',
                        20..=39 => ',',
                        40..=59 => ':',
                        60..=79 => ';',
                        _ => '^',
                    }
                };
                out.push(ch);
                out.push(' ');
            }
            out.push('\n');
        }
        out
    }

    /// Emit the standard per-turn summary log line.
    pub fn log_summary(&self, step: Step, sim_steps: u32, elapsed_ms: u128) {
        info!(
            step,
            sim_steps,
            elapsed_ms,
            summary = %self.summary(step),
            "turn complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_board(size: i32) -> Board {
        let config = AgentConfig {
            lookahead: 8,
            ..AgentConfig::default()
        };
        let future_len = config.lookahead as usize;
        let mut cells = Vec::new();
        for y in 0..size {
            for x in 0..size {
                cells.push(Cell::new(
                    (y * size + x) as CellId,
                    x,
                    y,
                    false,
                    false,
                    0,
                    0,
                    -1,
                    future_len,
                    HISTORY_LEN,
                ));
            }
        }
        Board {
            step: 0,
            size,
            cells,
            units: BTreeMap::new(),
            factories: BTreeMap::new(),
            me: PlayerState::new(0, 0, 0, []),
            opp: PlayerState::new(1, 0, 0, []),
            rules: GameRules::default(),
            config,
            strategy: Strategy::default(),
            future_len,
            search_generation: 0,
            opp_mines_cache: None,
            contested_cache: BTreeMap::new(),
        }
    }

    #[test]
    fn test_cell_id_roundtrip() {
        let b = empty_board(8);
        let id = b.cell_at(3, 5).unwrap();
        assert_eq!(id, 5 * 8 + 3);
        assert_eq!(b.cell(id).x, 3);
        assert_eq!(b.cell(id).y, 5);
        assert!(b.cell_at(-1, 0).is_none());
        assert!(b.cell_at(8, 0).is_none());
    }

    #[test]
    fn test_neighbors_edges() {
        let b = empty_board(4);
        let corner = b.cell_at(0, 0).unwrap();
        assert_eq!(b.neighbors(corner).len(), 2);
        let mid = b.cell_at(2, 2).unwrap();
        assert_eq!(b.neighbors(mid).len(), 4);
    }

    #[test]
    fn test_man_dist_to_footprint() {
        let b = empty_board(9);
        let center = b.cell_at(4, 4).unwrap();
        // Adjacent to the footprint edge.
        assert_eq!(b.man_dist_to_footprint(b.cell_at(4, 2).unwrap(), center), 1);
        // Inside the footprint.
        assert_eq!(b.man_dist_to_footprint(b.cell_at(3, 3).unwrap(), center), 0);
        // Diagonal.
        assert_eq!(b.man_dist_to_footprint(b.cell_at(0, 0).unwrap(), center), 6);
    }

    #[test]
    fn test_flood_fill_counts_region() {
        let mut b = empty_board(5);
        // Wall across x = 2.
        for y in 0..5 {
            let id = b.cell_at(2, y).unwrap();
            b.cell_mut(id).rubble[0] = 100;
        }
        let mut count = 0;
        b.flood_fill(
            b.cell_at(0, 0).unwrap(),
            |b, id| b.cell(id).rubble[0] == 0,
            |_| count += 1,
        );
        assert_eq!(count, 10);
    }

    #[test]
    fn test_region_labels() {
        let mut b = empty_board(5);
        for y in 0..5 {
            let id = b.cell_at(2, y).unwrap();
            b.cell_mut(id).rubble[0] = 100;
        }
        b.set_region_info();
        let left = b.cell(b.cell_at(0, 0).unwrap()).region;
        let right = b.cell(b.cell_at(4, 4).unwrap()).region;
        assert_eq!(left.flatland_size, 10);
        assert_eq!(right.flatland_size, 10);
        assert_ne!(left.flatland_id, right.flatland_id);
        let wall = b.cell(b.cell_at(2, 2).unwrap()).region;
        assert!(wall.flatland_id.is_none());
        assert!(wall.lowland_id.is_none());
    }

    #[test]
    fn test_radius_cells_factory_excludes_footprint() {
        let b = empty_board(9);
        let center = b.cell_at(4, 4).unwrap();
        let ring = b.radius_cells_factory(center, 1, 1);
        assert!(!ring.is_empty());
        for (id, d) in ring {
            assert_eq!(d, 1);
            assert_eq!(b.man_dist_to_footprint(id, center), 1);
        }
    }

    #[test]
    #[should_panic(expected = "registered at")]
    fn test_double_registration_is_fatal() {
        let mut b = empty_board(4);
        let a = b.cell_at(1, 1).unwrap();
        let c = b.cell_at(1, 2).unwrap();
        b.register_unit(0, a, 7);
        b.register_unit(0, c, 7);
    }
}
