//! Factories: per-turn state, lichen bookkeeping, build/water primitives,
//! and the precomputed route lists that rank candidate work sites.

use std::collections::BTreeSet;

use tracing::debug;

use crate::actions::FactoryAction;
use crate::board::{Board, CellId, FactoryId, Step, UnitId, FUTURE_UNIT_ID_BASE, UNREACHABLE};
use crate::math::{ratio, Fixed};
use crate::modes::Mode;
use crate::observation::FactoryObs;
use crate::pathfinding::DistOptions;
use crate::roles::{Role, RoleKind};
use crate::rules::RobotClass;
use crate::strategy::FactoryCache;
use crate::unit::Unit;

/// One factory.
#[derive(Debug, Clone)]
pub struct Factory {
    /// Factory id; also its lichen strain id.
    pub id: FactoryId,
    /// Owning team.
    pub team: u8,
    /// Center x.
    pub x: i32,
    /// Center y.
    pub y: i32,
    /// Ice per turn index.
    pub ice: Vec<i32>,
    /// Ore per turn index.
    pub ore: Vec<i32>,
    /// Water per turn index.
    pub water: Vec<i32>,
    /// Metal per turn index.
    pub metal: Vec<i32>,
    /// Power per turn index.
    pub power: Vec<i32>,

    /// Current strategy state machine (our factories only).
    pub mode: Option<Mode>,
    /// Action chosen this simulated turn.
    pub action: Option<FactoryAction>,
    /// Simulated step at which an action was last locked.
    pub acted_step: Option<Step>,
    /// The real-turn action to emit, if any.
    pub new_action: Option<FactoryAction>,

    /// Connected lichen count per turn index.
    pub lichen_count: Vec<i32>,
    /// Cells currently carrying this factory's connected lichen.
    pub lichen_connected_cells: Vec<CellId>,
    /// Connected cells plus the cells watering would grow into.
    pub lichen_growth_cells: Vec<CellId>,
    /// Flat cells adjacent to the connected field, ready to grow.
    pub lichen_flat_boundary_cells: Vec<CellId>,
    /// Rubbled cells adjacent to the connected field, growable if cleared.
    pub lichen_rubble_boundary_cells: Vec<CellId>,
    /// Connected cells on the growing edge of the field.
    pub lichen_frontier_cells: Vec<CellId>,
    /// Adjacent cells carrying an opposing strain.
    pub lichen_opp_boundary_cells: BTreeSet<CellId>,
    /// Choke-point cells of the connected field.
    pub lichen_bottleneck_cells: Vec<CellId>,

    /// Routes to the nearest ice/ore cells, nearest first.
    pub resource_routes: Vec<Vec<CellId>>,
    /// Routes to the nearest open regions, nearest first.
    pub lowland_routes: Vec<Vec<CellId>>,

    /// Power gain snapshot taken at the start of each simulated turn.
    pub power_gain_cache: i32,
    /// Power usage estimate snapshot, fixed-point.
    pub power_usage_cache: Fixed,
}

impl Factory {
    /// Build a factory from the observation.
    #[must_use]
    pub fn from_obs(obs: &FactoryObs, future_len: usize) -> Self {
        let mut mk = |v: i32| {
            let mut arr = vec![0; future_len + 1];
            arr[0] = v;
            arr
        };
        Self {
            id: obs.strain_id,
            team: obs.team_id,
            x: obs.pos[0],
            y: obs.pos[1],
            ice: mk(obs.cargo.ice),
            ore: mk(obs.cargo.ore),
            water: mk(obs.cargo.water),
            metal: mk(obs.cargo.metal),
            power: mk(obs.power),
            mode: None,
            action: None,
            acted_step: None,
            new_action: None,
            lichen_count: vec![0; future_len + 1],
            lichen_connected_cells: Vec::new(),
            lichen_growth_cells: Vec::new(),
            lichen_flat_boundary_cells: Vec::new(),
            lichen_rubble_boundary_cells: Vec::new(),
            lichen_frontier_cells: Vec::new(),
            lichen_opp_boundary_cells: BTreeSet::new(),
            lichen_bottleneck_cells: Vec::new(),
            resource_routes: Vec::new(),
            lowland_routes: Vec::new(),
            power_gain_cache: 0,
            power_usage_cache: Fixed::ZERO,
        }
    }
}

impl Board {
    /// The center cell of a factory.
    #[must_use]
    pub fn factory_center(&self, fid: FactoryId) -> CellId {
        let f = self.factory(fid);
        self.cell_at(f.x, f.y).expect("factory on board")
    }

    /// The eight non-center footprint cells.
    #[must_use]
    pub fn factory_cells(&self, fid: FactoryId) -> Vec<CellId> {
        let f = self.factory(fid);
        let mut out = Vec::with_capacity(8);
        for dx in -1..=1 {
            for dy in -1..=1 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                if let Some(id) = self.cell_at(f.x + dx, f.y + dy) {
                    out.push(id);
                }
            }
        }
        out
    }

    /// The twelve cells orthogonally adjacent to the footprint.
    #[must_use]
    pub fn factory_neighbors(&self, fid: FactoryId) -> Vec<CellId> {
        let f = self.factory(fid);
        const DELTAS: [(i32, i32); 12] = [
            (2, -1),
            (2, 0),
            (2, 1),
            (-2, -1),
            (-2, 0),
            (-2, 1),
            (-1, 2),
            (0, 2),
            (1, 2),
            (-1, -2),
            (0, -2),
            (1, -2),
        ];
        DELTAS
            .iter()
            .filter_map(|(dx, dy)| self.cell_at(f.x + dx, f.y + dy))
            .collect()
    }

    /// The footprint cell nearest `other`, stepped one cell toward it.
    #[must_use]
    pub fn factory_neighbor_toward(&self, fid: FactoryId, other: CellId) -> CellId {
        let mut nearest = self.factory_center(fid);
        let mut min_dist = UNREACHABLE as i32;
        for cell in self.factory_cells(fid) {
            let d = self.man_dist(cell, other);
            if d < min_dist {
                nearest = cell;
                min_dist = d;
            }
        }
        self.neighbor_toward(nearest, other)
    }

    /// Units working for this factory at `step`.
    ///
    /// Our factories go by explicit assignment (with nearest-factory
    /// fallback); opposing factories by each unit's last visited footprint.
    #[must_use]
    pub fn factory_units(&self, fid: FactoryId, step: Step) -> Vec<UnitId> {
        let factory_team = self.factory(fid).team;
        let mut out = Vec::new();
        if factory_team == self.opp.id {
            for u in self.units.values() {
                if u.team != factory_team {
                    continue;
                }
                let stats = self.strategy.unit_stats.get(&u.id);
                let mut counted = false;
                if let Some(stats) = stats {
                    if let Some(last) = stats.last_factory_id {
                        if last == fid {
                            out.push(u.id);
                            counted = true;
                        } else if self.factories.contains_key(&last) {
                            counted = true; // belongs to a live rival factory
                        }
                    }
                }
                if !counted {
                    if let Some(pos) = u.pos[0] {
                        if self.nearest_factory(pos, Some(factory_team)) == Some(fid) {
                            out.push(u.id);
                        }
                    }
                }
            }
            return out;
        }

        let i = self.idx(step);
        for u in self.units.values() {
            if u.team != factory_team {
                continue;
            }
            let assigned = match u.assigned_factory {
                Some(f) => f == fid,
                // Units being created this turn have no position yet.
                None => u.pos[i].is_some_and(|pos| {
                    self.nearest_factory(pos, Some(factory_team)) == Some(fid)
                }),
            };
            if assigned {
                out.push(u.id);
            }
        }
        out
    }

    /// Footprint cells with no assigned unit at `step` (center excluded).
    #[must_use]
    pub fn factory_unassigned_cells(&self, fid: FactoryId, step: Step) -> Vec<CellId> {
        self.factory_cells(fid)
            .into_iter()
            .filter(|&c| self.assigned_unit(c, step).is_none())
            .collect()
    }

    // ------------------------------------------------------------------
    // Lichen bookkeeping
    // ------------------------------------------------------------------

    /// Recompute the connected-lichen field and its boundary/frontier sets
    /// for `fid` at `step`, tagging connected cells on the grid.
    pub fn calculate_lichen_count(&mut self, fid: FactoryId, step: Step) {
        let i = self.idx(step);
        let min_spread = self.rules.min_lichen_to_spread;

        let mut connected = Vec::new();
        let mut growth = Vec::new();
        let mut flat_boundary = Vec::new();
        let mut rubble_boundary = Vec::new();
        let mut frontier = Vec::new();
        let mut opp_boundary = BTreeSet::new();

        let start = self.factory_center(fid);
        let mut seen = vec![false; self.cells.len()];
        let mut queue = vec![start];
        while let Some(id) = queue.pop() {
            if seen[id as usize] {
                continue;
            }
            seen[id as usize] = true;

            let cell = self.cell(id);
            let member = if cell.factory_id == Some(fid) || cell.lichen_strain[i] == fid as i32 {
                true
            } else if cell.has_factory() {
                false
            } else if cell.lichen[i] == 0 && !cell.ice && !cell.ore {
                // Could grow here; classify the boundary.
                let mut cell_is_boundary = false;
                for n in self.neighbors(id) {
                    let nc = self.cell(n);
                    if nc.lichen_strain[i] != -1 && nc.lichen_strain[i] != fid as i32 {
                        opp_boundary.insert(n);
                        cell_is_boundary = true;
                    }
                    if nc.factory_id.is_some() && nc.factory_id != Some(fid) {
                        cell_is_boundary = true;
                    }
                }
                if cell_is_boundary {
                    false
                } else {
                    let factory_dist = self.man_dist_factory(id, fid);
                    let max_adj_lichen = self
                        .neighbors(id)
                        .into_iter()
                        .filter(|&n| self.cell(n).lichen_strain[i] == fid as i32)
                        .map(|n| self.cell(n).lichen[i])
                        .max()
                        .unwrap_or(0);
                    let adjacent = factory_dist == 1 || max_adj_lichen > 0;
                    if self.cell(id).rubble[i] > 0 {
                        if adjacent {
                            rubble_boundary.push(id);
                        }
                        false
                    } else {
                        if adjacent {
                            flat_boundary.push(id);
                        }
                        if max_adj_lichen > 0 {
                            for n in self.neighbors(id) {
                                let nc = self.cell(n);
                                if nc.lichen_strain[i] == fid as i32 && nc.lichen[i] > 0 {
                                    frontier.push(n);
                                }
                            }
                        }
                        // Lichen spreads onto flatland from mature cells.
                        factory_dist == 1 || max_adj_lichen >= min_spread
                    }
                }
            } else {
                false
            };

            if member {
                if !self.cell(id).has_factory() {
                    growth.push(id);
                    if self.cell(id).lichen[i] > 0 {
                        connected.push(id);
                        self.cell_mut(id).lichen_connected[i] = true;
                    }
                }
                for n in self.neighbors(id) {
                    if !seen[n as usize] {
                        queue.push(n);
                    }
                }
            }
        }

        let f = self.factory_mut(fid);
        f.lichen_count[i] = connected.len() as i32;
        f.lichen_connected_cells = connected;
        f.lichen_growth_cells = growth;
        f.lichen_flat_boundary_cells = flat_boundary;
        f.lichen_rubble_boundary_cells = rubble_boundary;
        f.lichen_frontier_cells = frontier;
        f.lichen_opp_boundary_cells = opp_boundary;
    }

    /// Label every connected lichen cell with its distance from the factory
    /// through the field, and identify bottleneck cells.
    pub fn calculate_lichen_dists(&mut self, fid: FactoryId, step: Step) {
        let i = self.idx(step);
        self.factory_mut(fid).lichen_bottleneck_cells = Vec::new();
        if self.factory(fid).lichen_connected_cells.is_empty() {
            return;
        }

        let sources = self.factory_cells(fid);
        let strain = fid as i32;
        let _ = self.dist(
            step,
            &sources,
            None,
            DistOptions {
                dest_cond: Some(&|_b, _s, _c| false),
                avoid_cond: Some(&move |b: &Board, s: Step, c: CellId| {
                    b.cell(c).lichen_strain[b.idx(s)] != strain
                }),
                unit_move_cost: Some(1),
                unit_rubble_rate_centi: Some(0),
                ..DistOptions::default()
            },
        );

        let generation = self.search_generation;
        let labelled: Vec<CellId> = sources
            .iter()
            .copied()
            .chain(self.factory(fid).lichen_connected_cells.iter().copied())
            .collect();
        for id in labelled {
            let scratch = &self.cells[id as usize].search;
            self.cells[id as usize].lichen_dist =
                (scratch.generation == generation).then_some(scratch.cost);
        }

        // A connected cell with exactly one nearer neighbor and no equal
        // ones is a candidate choke point; confirm no alternate path feeds
        // the cells beyond it.
        let connected = self.factory(fid).lichen_connected_cells.clone();
        let mut bottlenecks = Vec::new();
        for cell in connected {
            let Some(cell_dist) = self.cell(cell).lichen_dist else {
                continue;
            };
            let mut to_near = 0;
            let mut to_same = 0;
            let mut far_cells = Vec::new();
            for n in self.neighbors(cell) {
                let Some(nd) = self.cell(n).lichen_dist else {
                    continue;
                };
                if cell_dist < nd {
                    far_cells.push(n);
                } else if cell_dist == nd {
                    to_same += 1;
                } else {
                    to_near += 1;
                }
            }
            if to_near == 1 && to_same == 0 && !far_cells.is_empty() {
                for far in far_cells {
                    let far_dist = self.cell(far).lichen_dist.expect("labelled");
                    let mut other_path = false;
                    let mut further = false;
                    for n in self.neighbors(far) {
                        if n == cell {
                            continue;
                        }
                        let Some(nd) = self.cell(n).lichen_dist else {
                            continue;
                        };
                        if nd <= far_dist {
                            other_path = true;
                        } else {
                            further = true;
                        }
                    }
                    if further && !other_path {
                        self.cell_mut(cell).lichen_bottleneck = true;
                        bottlenecks.push(cell);
                        break;
                    }
                }
            }
        }
        self.factory_mut(fid).lichen_bottleneck_cells = bottlenecks;
    }

    // ------------------------------------------------------------------
    // Power and water accounting
    // ------------------------------------------------------------------

    /// Factory power income at `step`: base charge plus connected lichen.
    #[must_use]
    pub fn factory_power_gain(&self, fid: FactoryId, step: Step) -> i32 {
        let i = self.idx(step);
        self.rules.factory_charge
            + self.factory(fid).lichen_count[i] * self.rules.power_per_connected_lichen_tile
    }

    /// Power earmarked for an imminent heavy build.
    #[must_use]
    pub fn factory_power_reserved(&self, fid: FactoryId, step: Step) -> i32 {
        let i = self.idx(step);
        let f = self.factory(fid);
        if f.metal[i] + f.ore[i] / self.rules.ore_metal_ratio >= self.rules.heavy.metal_cost {
            self.rules.heavy.init_power
        } else {
            0
        }
    }

    /// Rough per-step power drain of this factory's workforce, by role.
    #[must_use]
    pub fn factory_power_usage(&self, fid: FactoryId, step: Step, skip_unit: Option<UnitId>) -> Fixed {
        let i = self.idx(step);
        let mut usage = Fixed::ZERO;
        for uid in self.factory_units(fid, step) {
            if Some(uid) == skip_unit {
                continue;
            }
            let u = self.unit(uid);
            let spec = u.spec(&self.rules);
            let dig = Fixed::from_num(spec.dig_cost);
            let mv = Fixed::from_num(spec.move_cost);
            let aq = Fixed::from_num(spec.action_queue_power_cost);
            let gain = if u.class == RobotClass::Heavy {
                Fixed::from_num(6)
            } else {
                ratio(6, 10)
            };
            let antagonized = u.antagonized_cache.clone().flatten().is_some();
            let kind = u.role.as_ref().map(Role::kind);

            let drain = if antagonized && kind != Some(RoleKind::Antagonizer) {
                aq + ratio(3, 2) * mv - gain
            } else {
                match kind {
                    None => ratio(3, 2) * mv - gain,
                    Some(RoleKind::Miner) => ratio(9, 10) * dig + ratio(1, 10) * mv - gain,
                    Some(RoleKind::Cow) => ratio(7, 10) * dig + mv - gain,
                    Some(RoleKind::Generator) => -gain,
                    Some(RoleKind::Pillager) => {
                        if matches!(&u.role, Some(Role::Pillager(p)) if p.one_way) {
                            Fixed::ZERO
                        } else {
                            ratio(3, 10) * dig + mv - gain
                        }
                    }
                    Some(RoleKind::Transporter) => -gain,
                    Some(RoleKind::WaterTransporter) => mv - gain,
                    Some(RoleKind::Antagonizer) => ratio(3, 2) * mv - gain,
                    Some(RoleKind::Attacker | RoleKind::Sidekick) => {
                        aq + ratio(3, 2) * mv - gain
                    }
                    Some(RoleKind::Blockade) => aq + mv - gain,
                    Some(RoleKind::Recharge) => {
                        let on_factory = u.pos[i]
                            .is_some_and(|p| self.cell(p).has_factory());
                        if on_factory {
                            -gain
                        } else {
                            ratio(3, 2) * mv - gain
                        }
                    }
                    Some(RoleKind::Relocate) => ratio(3, 2) * mv - gain,
                    Some(RoleKind::Protector) => aq + ratio(1, 4) * mv - gain,
                }
            };
            usage += drain;
        }

        // Stored metal turns into a heavy soon; budget for it.
        let f = self.factory(fid);
        let metal = f.metal[i] + f.ore[i] / self.rules.ore_metal_ratio;
        if metal >= self.rules.heavy.metal_cost {
            usage += ratio(3, 2) * Fixed::from_num(20) - Fixed::from_num(6);
        }
        usage
    }

    /// Estimated water income per step from this factory's ice miners.
    #[must_use]
    pub fn factory_water_income(&self, fid: FactoryId, step: Step, skip_unit: Option<UnitId>) -> Fixed {
        let mut income = Fixed::ZERO;
        for uid in self.factory_units(fid, step) {
            if Some(uid) == skip_unit {
                continue;
            }
            let u = self.unit(uid);
            let Some(Role::Miner(m)) = &u.role else {
                continue;
            };
            if !self.cell(m.resource_cell).ice {
                continue;
            }
            if !self
                .threat_units(u.pos[self.idx(step)].unwrap_or(m.resource_cell), 1, 1, true, false)
                .is_empty()
                || u.antagonized_cache.clone().flatten().is_some()
            {
                continue;
            }
            let spec = u.spec(&self.rules);
            let move_dist = Fixed::from_num(self.man_dist_factory(m.resource_cell, fid));
            let rubble_estimate = ratio(11, 10);
            let charge_frac = ratio(6, 10) * Fixed::from_num(spec.charge);
            let move_cost = Fixed::from_num(2) * rubble_estimate * move_dist
                * (Fixed::from_num(spec.move_cost) - charge_frac);
            let dig_net = Fixed::from_num(spec.dig_cost) - charge_frac;
            let digs_by_power =
                (ratio(9, 10) * Fixed::from_num(spec.battery_capacity) - move_cost) / dig_net;
            let digs_by_cargo = ratio(3, 4) * Fixed::from_num(spec.cargo_space)
                / Fixed::from_num(spec.dig_resource_gain);
            let digs = digs_by_power.min(digs_by_cargo);
            let ice_cargo = digs * Fixed::from_num(spec.dig_resource_gain);
            let period = Fixed::from_num(2) * move_dist + digs + Fixed::from_num(2);
            if period > Fixed::ZERO {
                income += ice_cargo / Fixed::from_num(self.rules.ice_water_ratio) / period;
            }
        }
        income
    }

    /// Water cost of one lichen watering at `step`.
    #[must_use]
    pub fn factory_water_cost(&self, fid: FactoryId, _step: Step) -> i32 {
        crate::math::div_ceil(
            self.factory(fid).lichen_growth_cells.len() as i64,
            i64::from(self.rules.lichen_watering_cost_factor),
        ) as i32
    }

    /// Whether the factory can afford to water this turn.
    #[must_use]
    pub fn factory_can_water(&self, fid: FactoryId, step: Step) -> bool {
        let i = self.idx(step);
        self.factory(fid).water[i] >= self.factory_water_cost(fid, step)
    }

    /// Water lichen: every growth cell gains, next turn's water drops.
    pub fn factory_do_water(&mut self, fid: FactoryId, step: Step) -> FactoryAction {
        let i = self.idx(step);
        let grown = self.rules.lichen_gained_with_water + self.rules.lichen_lost_without_water;
        let cells = self.factory(fid).lichen_growth_cells.clone();
        for cell in cells {
            let c = self.cell_mut(cell);
            c.lichen[i + 1] += grown;
            c.lichen_strain[i + 1] = fid as i32;
        }
        let cost = self.factory_water_cost(fid, step);
        self.factory_mut(fid).water[i + 1] -= cost;
        FactoryAction::Water
    }

    // ------------------------------------------------------------------
    // Builds
    // ------------------------------------------------------------------

    /// Whether building now would immediately collide with a unit standing
    /// on the center that cannot vacate.
    fn can_build_without_collision(&self, fid: FactoryId, step: Step) -> bool {
        let i = self.idx(step);
        let center = self.factory_center(fid);
        if self.unit_at(center, step + 1, None).is_some() {
            return false;
        }
        if let Some(uid) = self.unit_at(center, step, None) {
            let u = self.unit(uid);
            let spec = u.spec(&self.rules);
            if u.pos[i + 1].is_none()
                && u.power[i] < spec.action_queue_power_cost + spec.move_cost
            {
                return false;
            }
        }
        true
    }

    /// Whether a light build is affordable and collision-free at `step`.
    #[must_use]
    pub fn factory_can_build_light(&self, fid: FactoryId, step: Step) -> bool {
        let i = self.idx(step);
        let f = self.factory(fid);
        self.can_build_without_collision(fid, step)
            && f.power[i] >= self.rules.light.power_cost
            && f.metal[i] >= self.rules.light.metal_cost
    }

    /// Whether a heavy build is affordable and collision-free at `step`.
    #[must_use]
    pub fn factory_can_build_heavy(&self, fid: FactoryId, step: Step) -> bool {
        let i = self.idx(step);
        let f = self.factory(fid);
        self.can_build_without_collision(fid, step)
            && f.power[i] >= self.rules.heavy.power_cost
            && f.metal[i] >= self.rules.heavy.metal_cost
    }

    /// Build a robot, spawning a hypothetical unit on the center next turn.
    pub fn factory_do_build(&mut self, fid: FactoryId, step: Step, heavy: bool) -> FactoryAction {
        let i = self.idx(step);
        let class = if heavy { RobotClass::Heavy } else { RobotClass::Light };
        let spec = *self.rules.class(class);

        let unit_id = FUTURE_UNIT_ID_BASE + 1000 * fid + step;
        let mut unit = Unit::blank(unit_id, self.factory(fid).team, class, self.future_len);
        let center = self.factory_center(fid);
        unit.pos[i + 1] = Some(center);
        unit.power[i + 1] = spec.init_power;
        debug_assert!(!self.units.contains_key(&unit_id));
        self.units.insert(unit_id, unit);
        self.register_unit(step + 1, center, unit_id);

        let f = self.factory_mut(fid);
        f.power[i] -= spec.power_cost;
        f.metal[i] -= spec.metal_cost;
        assert!(f.power[i] >= 0 && f.metal[i] >= 0, "factory {fid} overdrew on build");
        if heavy {
            FactoryAction::BuildHeavy
        } else {
            FactoryAction::BuildLight
        }
    }

    // ------------------------------------------------------------------
    // Route precomputation
    // ------------------------------------------------------------------
}

/// Precompute a factory's resource and open-region route lists, loading
/// from the persistent cache when present.
pub fn set_factory_routes(board: &mut Board, fid: FactoryId) {
    const FLAT_SIZE_THRESHOLD: u32 = 6;

    if let Some(cache) = board.strategy.factory_caches.get(&fid) {
        if !cache.resource_routes.is_empty() || !cache.lowland_routes.is_empty() {
            let resource_routes = cache.resource_routes.clone();
            let lowland_routes = cache.lowland_routes.clone();
            let f = board.factory_mut(fid);
            f.resource_routes = resource_routes;
            f.lowland_routes = lowland_routes;
            return;
        }
    }

    let my_team = board.me.id;
    let team = board.factory(fid).team;
    let center = board.factory_center(fid);

    // Nearest 15 ice and 15 ore cells by footprint distance.
    let mut resource_cells = Vec::new();
    let mut ice_count = 0;
    let mut ore_count = 0;
    for (cell, _) in board.radius_cells_factory(center, 1, 2 * board.size) {
        let c = board.cell(cell);
        if (ice_count < 15 && c.ice) || (ore_count < 15 && c.ore) {
            ice_count += i32::from(c.ice);
            ore_count += i32::from(c.ore);
            resource_cells.push(cell);
            if resource_cells.len() == 30 {
                break;
            }
        }
    }

    // Nearest distinct low-rubble/flat regions.
    let mut lowland_cells = Vec::new();
    let mut regions_seen = BTreeSet::new();
    for (cell, _) in board.radius_cells_factory(center, 1, 2 * board.size) {
        let region = board.cell(cell).region;
        if region.lowland_size >= FLAT_SIZE_THRESHOLD {
            if let Some(id) = region.lowland_id {
                if regions_seen.insert(id) {
                    lowland_cells.push(cell);
                }
            }
            if let Some(id) = region.flatland_id {
                if regions_seen.insert(id) && region.flatland_size >= FLAT_SIZE_THRESHOLD {
                    lowland_cells.push(cell);
                }
            }
            if lowland_cells.len() >= 10 {
                break;
            }
        }
    }

    let avoid_ice_factory = move |b: &Board, _s: Step, c: CellId| {
        let cell = b.cell(c);
        cell.has_factory()
            || (team == my_team
                && (cell.ice
                    || b.neighbors(c).into_iter().any(|n| {
                        b.cell(n)
                            .factory_id
                            .is_some_and(|f| b.factory(f).team != team)
                    })))
    };
    let avoid_ice_ore_factory = move |b: &Board, _s: Step, c: CellId| {
        let cell = b.cell(c);
        cell.has_factory()
            || (team == my_team
                && (cell.ice
                    || cell.ore
                    || b.neighbors(c).into_iter().any(|n| {
                        b.cell(n)
                            .factory_id
                            .is_some_and(|f| b.factory(f).team != team)
                    })))
    };

    let sources = board.factory_cells(fid);
    let step = board.step;
    let mut resource_routes = Vec::new();
    for cell in resource_cells {
        // Rubble counts for more on ore routes, which tend to be longer and
        // less traveled.
        let move_cost = if board.cell(cell).ore { 50 } else { 100 };
        let route = board.route(
            step,
            &sources,
            None,
            DistOptions {
                dest_cell: Some(cell),
                avoid_cond: Some(&avoid_ice_factory),
                unit_move_cost: Some(move_cost),
                unit_rubble_rate_centi: Some(100),
                ..DistOptions::default()
            },
        );
        if !route.is_empty() {
            resource_routes.push(route);
        }
    }
    resource_routes.sort_by_key(Vec::len);

    let mut lowland_routes = Vec::new();
    let mut destinations = BTreeSet::new();
    let mut regions_routed = BTreeSet::new();
    for cell in lowland_cells {
        let region = board.cell(cell).region;
        for region_id in [region.lowland_id, region.flatland_id].into_iter().flatten() {
            if !regions_routed.insert(region_id) {
                continue;
            }
            let route = board.route(
                step,
                &sources,
                None,
                DistOptions {
                    dest_cond: Some(&move |b: &Board, _s: Step, c: CellId| {
                        let r = b.cell(c).region;
                        r.lowland_id == Some(region_id) || r.flatland_id == Some(region_id)
                    }),
                    avoid_cond: Some(&avoid_ice_ore_factory),
                    unit_move_cost: Some(100),
                    unit_rubble_rate_centi: Some(100),
                    ..DistOptions::default()
                },
            );
            if let Some(&last) = route.last() {
                if destinations.insert(last) {
                    lowland_routes.push(route);
                }
            }
        }
    }
    lowland_routes.sort_by_key(Vec::len);

    debug!(
        factory = fid,
        resource_routes = resource_routes.len(),
        lowland_routes = lowland_routes.len(),
        "factory routes computed"
    );
    let f = board.factory_mut(fid);
    f.resource_routes = resource_routes;
    f.lowland_routes = lowland_routes;
}

/// Save computed factory routes into the persistent cache.
pub fn save_factory_routes(board: &mut Board) {
    for fid in board.factories.keys().copied().collect::<Vec<_>>() {
        let f = board.factory(fid);
        let resource_routes = f.resource_routes.clone();
        let lowland_routes = f.lowland_routes.clone();
        let cache = board
            .strategy
            .factory_caches
            .entry(fid)
            .or_insert_with(FactoryCache::default);
        cache.resource_routes = resource_routes;
        cache.lowland_routes = lowland_routes;
    }
}
