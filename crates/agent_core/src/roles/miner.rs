//! Miner: sit at a resource cell, dig, deliver cargo home.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::board::{Board, CellId, FactoryId, Step, UnitId, UNREACHABLE};
use crate::math::{div_ceil, Fixed};
use crate::pathfinding::{naive_cost, DistOptions};
use crate::roles::{handle_displaced_unit, Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Resource-route distance under which a factory counts as "forge range":
/// short enough that the miner handles its own power margin.
pub const FORGE_DIST: i32 = 5;

/// Mining role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Miner {
    /// Home factory.
    pub factory: FactoryId,
    /// The ice or ore cell this unit works.
    pub resource_cell: CellId,
    /// Current sub-destination.
    pub goal: Goal,
}

impl Miner {
    /// Whether the unit is outbound toward its resource cell.
    #[must_use]
    pub fn goal_is_resource(&self) -> bool {
        self.goal == Goal::Cell(self.resource_cell)
    }
}

fn make(factory: FactoryId, cell: CellId) -> Role {
    Role::Miner(Miner {
        factory,
        resource_cell: cell,
        goal: Goal::Factory(factory),
    })
}

/// Direct assignment to a known resource cell (forge startup).
pub fn from_cell(board: &mut Board, uid: UnitId, step: Step, cell: CellId) -> Option<Role> {
    let c = board.cell(cell);
    if !c.ice && !c.ore {
        return None;
    }
    let factory = crate::roles::home_factory(board, uid, step);
    let assigned = board.assigned_unit(cell, step);
    let can_take = assigned.map_or(true, |a| {
        board.unit(uid).class == RobotClass::Heavy && board.unit(a).class == RobotClass::Light
    });
    if can_take {
        handle_displaced_unit(board, step, cell);
        return Some(make(factory, cell));
    }
    None
}

/// Whether `factory` still needs an ice miner over the next `step_count`
/// steps, judged against stored water plus projected income.
pub(crate) fn factory_needs_water(
    board: &Board,
    step: Step,
    factory: FactoryId,
    mut step_count: i32,
    skip_unit: Option<UnitId>,
) -> bool {
    let i = board.idx(step);
    if step as i32 + step_count > 1100 {
        step_count -= (step as i32 + step_count - 1100) / 2;
    }
    let f = board.factory(factory);
    let factory_water = f.water[i] + f.ice[i] / board.rules.ice_water_ratio;
    if factory_water >= board.config.water_surplus_threshold {
        let income = board.factory_water_income(factory, step, skip_unit);
        let profit =
            income - Fixed::from_num(board.factory_water_cost(factory, step)) - Fixed::from_num(1);
        if Fixed::from_num(factory_water) + Fixed::from_num(step_count) * profit > Fixed::ZERO {
            return false;
        }
    }
    true
}

/// Rough factory power runway check before committing a heavy to ore.
pub(crate) fn power_ok(
    board: &Board,
    step: Step,
    uid: Option<UnitId>,
    factory: FactoryId,
    steps_threshold: i32,
) -> bool {
    let i = board.idx(step);
    // One more heavy's worth of drain on top of the current roster.
    let extra = Fixed::from_num(48) + Fixed::from_num(2) - Fixed::from_num(6);
    let usage = board.factory_power_usage(factory, step, uid) + extra;
    let gain = Fixed::from_num(board.factory(factory).power_gain_cache);
    let mut power = Fixed::from_num(board.factory(factory).power[i]);
    if let Some(u) = uid {
        power += Fixed::from_num(board.unit(u).power[i]);
    }
    if usage <= gain {
        return true;
    }
    power / (usage - gain) >= Fixed::from_num(steps_threshold)
}

/// Ore digs still worth doing for `factory` given its metal pipeline.
pub(crate) fn ore_digs(board: &Board, step: Step, factory: FactoryId) -> i32 {
    let i = board.idx(step);
    let f = board.factory(factory);
    let rules = &board.rules;
    let factory_ore = f.ore[i] + f.metal[i] * rules.ore_metal_ratio;
    let factory_metal = f.metal[i] + f.ore[i] / rules.ore_metal_ratio;
    let light_lim = board.config.light_limit_at(step) as i32;
    let light_count = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| {
            let unit = board.unit(u);
            unit.class == RobotClass::Light
                && unit.role.as_ref().map_or(true, |r| r.kind() != RoleKind::Relocate)
        })
        .count() as i32;
    let mut future_lights = factory_metal / rules.light.metal_cost;
    future_lights = future_lights.clamp(0, (light_lim - light_count).max(0));
    let extra_ore = future_lights * rules.light.metal_cost * rules.ore_metal_ratio
        + factory_ore % rules.ore_metal_ratio;
    if light_count + future_lights <= 3 * light_lim / 4 {
        div_ceil(i64::from(200 - extra_ore), 20) as i32
    } else {
        div_ceil(i64::from(500 - extra_ore), 20) as i32
    }
}

/// Pick the best unclaimed resource cell off the factory's precomputed
/// routes.
pub fn from_resource_route(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    ice: bool,
    dist_lim: i32,
    max_count: usize,
) -> Option<Role> {
    let factory = crate::roles::home_factory(board, uid, step);
    let my_class = board.unit(uid).class;

    let factory_units = board.factory_units(factory, step);
    let miners: Vec<UnitId> = factory_units
        .iter()
        .copied()
        .filter(|&u| {
            board
                .unit(u)
                .role
                .as_ref()
                .is_some_and(|r| r.kind() == RoleKind::Miner)
        })
        .collect();
    if my_class == RobotClass::Light && miners.len() > factory_units.len() / 2 {
        return None;
    }
    if ice && !factory_needs_water(board, step, factory, 200, None) {
        return None;
    }
    if max_count < 100 {
        let like = miners
            .iter()
            .filter(|&&u| {
                let unit = board.unit(u);
                unit.class == my_class
                    && matches!(&unit.role, Some(Role::Miner(m))
                        if if ice { board.cell(m.resource_cell).ice } else { board.cell(m.resource_cell).ore })
            })
            .count();
        if 1 + like > max_count {
            return None;
        }
    }

    let routes: Vec<(CellId, i32)> = board
        .factory(factory)
        .resource_routes
        .iter()
        .filter(|r| {
            let last = *r.last().expect("routes are non-empty");
            if ice {
                board.cell(last).ice
            } else {
                board.cell(last).ore
            }
        })
        .map(|r| (*r.last().expect("non-empty"), r.len() as i32 - 1))
        .collect();

    let sources = board.factory_cells(factory);
    let mut best: Option<(CellId, i64, i32)> = None;
    for (cell, man_dist) in routes {
        if man_dist > dist_lim || best.is_some_and(|(_, _, d)| man_dist > d + 2) {
            break;
        }
        if !board.dest_is_safe(uid, cell) {
            continue;
        }
        let assigned = board.assigned_unit(cell, step);
        let can_take = assigned.map_or(true, |a| {
            my_class == RobotClass::Heavy && board.unit(a).class == RobotClass::Light
        });
        if !can_take {
            continue;
        }
        let (cost, dist, _) = board.dist(
            step,
            &sources,
            Some(uid),
            DistOptions {
                dest_cell: Some(cell),
                avoid_cond: Some(&|b: &Board, s: Step, c: CellId| {
                    b.assigned_unit(c, s).is_some() || b.cell(c).has_factory()
                }),
                dist_lim: Some(dist_lim),
                ..DistOptions::default()
            },
        );
        if cost == UNREACHABLE {
            continue;
        }
        match best {
            None => best = Some((cell, cost, dist)),
            Some((bc, bcost, bdist)) => {
                if dist < bdist {
                    best = Some((cell, cost, dist));
                } else if dist == bdist {
                    let b_contested = board.is_contested(bc);
                    let c_contested = board.is_contested(cell);
                    if (b_contested && !c_contested)
                        || (b_contested == c_contested && cost < bcost)
                    {
                        best = Some((cell, cost, dist));
                    }
                }
            }
        }
    }

    best.map(|(cell, _, _)| {
        handle_displaced_unit(board, step, cell);
        make(factory, cell)
    })
}

/// A heavy whose contested ice cell is being antagonized moves to an
/// uncontested one when the factory has a spare.
pub fn from_transition_heavy_to_uncontested_ice(
    board: &mut Board,
    uid: UnitId,
    step: Step,
) -> Option<Role> {
    if board.idx(step) != 0 || board.unit(uid).class != RobotClass::Heavy {
        return None;
    }
    let Some(Role::Miner(miner)) = board.unit(uid).role.clone() else {
        return None;
    };
    if !board.cell(miner.resource_cell).ice
        || !board.is_contested(miner.resource_cell)
        || board.is_antagonized(uid).is_none()
    {
        return None;
    }
    let factory = crate::roles::home_factory(board, uid, step);
    let candidates: Vec<CellId> = board
        .factory(factory)
        .resource_routes
        .iter()
        .filter(|r| r.len() <= 13 && board.cell(*r.last().expect("non-empty")).ice)
        .map(|r| *r.last().expect("non-empty"))
        .collect();
    for cell in candidates {
        let dist = board.man_dist_factory(cell, factory);
        let opp_dist = board.nearest_factory_dist(cell, Some(board.opp.id));
        let assigned_light = board
            .assigned_unit(cell, step)
            .map_or(true, |a| board.unit(a).class == RobotClass::Light);
        if dist <= 8 && dist < opp_dist && assigned_light && !board.is_contested(cell) {
            info!(unit = uid, from = miner.resource_cell, to = cell, "miner moves to uncontested ice");
            handle_displaced_unit(board, step, cell);
            return Some(make(factory, cell));
        }
    }
    None
}

/// Promote a heavy to ore mining when the metal pipeline justifies it.
pub fn from_transition_heavy_to_ore(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    if step < 25
        || step >= board.config.end_phase - 15
        || board.unit(uid).class == RobotClass::Light
    {
        return None;
    }

    let exempt = |b: &mut Board, u: UnitId| -> bool {
        let idx = b.idx(step);
        let cur = b.unit_cell(u, step);
        let on_factory = b.cell(cur).has_factory();
        let has_protectors = !b.unit(u).protectors[idx].is_empty();
        match b.unit(u).role.clone() {
            None => false,
            Some(Role::Recharge(_)) => !on_factory,
            Some(Role::Cow(c)) => c.repair,
            Some(Role::Attacker(a)) => !a.defender,
            Some(Role::Sidekick(_) | Role::Protector(_) | Role::Generator(_) | Role::Relocate(_)) => true,
            Some(Role::Antagonizer(mut a)) => {
                super::antagonizer::can_destroy_factory(b, u, &mut a, step)
            }
            Some(Role::Miner(m)) => b.cell(m.resource_cell).ore || has_protectors,
            _ => false,
        }
    };
    if exempt(board, uid) {
        return None;
    }

    let factory = crate::roles::home_factory(board, uid, step);
    let ice_conflict = board
        .factory(factory)
        .mode
        .as_ref()
        .is_some_and(crate::modes::Mode::is_ice_conflict);
    let role_kind = board.unit(uid).role.as_ref().map(Role::kind);
    if ice_conflict
        && matches!(
            role_kind,
            None | Some(RoleKind::Antagonizer | RoleKind::Miner | RoleKind::Recharge)
        )
    {
        return None;
    }

    // One heavy ore miner at a time per factory.
    let heavies: Vec<UnitId> = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| board.unit(u).class == RobotClass::Heavy)
        .collect();
    let any_ore = heavies.iter().any(|&u| {
        matches!(&board.unit(u).role, Some(Role::Miner(m)) if board.cell(m.resource_cell).ore)
    });
    if any_ore {
        return None;
    }

    let factory_power =
        board.factory(factory).power[i] - board.factory_power_reserved(factory, step);
    let unit_power = if heavies.len() == 1 {
        board.unit(uid).power[i] + factory_power
    } else {
        board.unit(uid).power[i] + factory_power / 2
    };

    let digs = ore_digs(board, step, factory);
    if digs <= 0 {
        return None;
    }
    let spec = *board.unit(uid).spec(&board.rules);
    if unit_power < 3 * spec.move_cost + digs * spec.dig_cost {
        return None;
    }

    // Score candidate ore routes: near home, far from the opponent.
    let routes = board.factory(factory).resource_routes.clone();
    let mut best: Option<(Vec<CellId>, i64)> = None;
    for r in routes {
        let last = *r.last().expect("non-empty");
        if !board.cell(last).ore {
            continue;
        }
        let rdist = r.len() as i64 - 1;
        if rdist > 20 {
            break;
        }
        if board
            .assigned_unit(last, step)
            .is_some_and(|a| board.unit(a).class == RobotClass::Heavy)
        {
            continue;
        }
        let opp_dist = i64::from(board.nearest_factory_dist(last, Some(board.opp.id)));
        // Scores scaled by 1000 to keep the opp-distance tie-break integral.
        let score = if rdist == 1 {
            (-rdist + 5) * 1000 + opp_dist
        } else if opp_dist == 1 {
            (-rdist + opp_dist - 4) * 1000
        } else {
            (-rdist + opp_dist.min(4)) * 1000 + opp_dist
        };
        if best.as_ref().map_or(true, |(_, bs)| score > *bs) {
            best = Some((r.clone(), score));
        }
    }
    let (route, _) = best?;
    let ore_cell = *route.last().expect("non-empty");

    // Without another heavy on ice, require enough banked water to last.
    let other_ice_miner = heavies.iter().any(|&u| {
        u != uid
            && matches!(&board.unit(u).role, Some(Role::Miner(m)) if board.cell(m.resource_cell).ice)
    });
    if !other_ice_miner {
        let wt_count = board
            .my_units()
            .into_iter()
            .filter(|&u| {
                matches!(&board.unit(u).role, Some(Role::WaterTransporter(wt)) if wt.target_factory == factory)
            })
            .count() as i32;
        let f = board.factory(factory);
        let factory_water =
            f.water[i] + (f.ice[i] + board.unit(uid).ice[i]) / board.rules.ice_water_ratio;
        let mut threshold = 2 * route.len() as i32 + digs + 20 + 50 * wt_count;
        let opp_dist =
            board.nearest_factory_dist(board.factory_center(factory), Some(board.opp.id));
        if opp_dist < 20 {
            threshold += 40;
        }
        if factory_water < threshold {
            return None;
        }
    }

    // A sitting ice miner may only be redirected when everyone else is also
    // tied to ice.
    if matches!(role_kind, Some(RoleKind::Miner)) {
        let all_ice = heavies.iter().all(|&u| {
            matches!(&board.unit(u).role, Some(Role::Miner(m)) if board.cell(m.resource_cell).ice)
                || matches!(&board.unit(u).role, Some(Role::Antagonizer(a)) if board.cell(a.target_cell).ice)
                || exempt(board, u)
        });
        if !all_ice {
            return None;
        }
    }

    if !power_ok(board, step, Some(uid), factory, 100) {
        return None;
    }

    // Round-trip power check, cheap estimate first, exact search on pass.
    let cur = board.unit_cell(uid, step);
    let rubble_digs =
        div_ceil(i64::from(board.cell(ore_cell).rubble[i]), i64::from(spec.dig_rubble_removed))
            as i32;
    let route_dist = route.len() as i32 - 1;
    let total_steps = 2 * route_dist + rubble_digs + digs;
    let gain = board
        .unit(uid)
        .power_gain_span(&board.rules, step, step + total_steps as u32);
    let extra_buffer =
        spec.action_queue_power_cost + spec.dig_cost + 2 * spec.move_cost * route_dist;
    let rubble_to: i64 = route.iter().map(|&c| i64::from(board.cell(c).rubble[i])).sum();
    let naive_needed = i64::from(2 * spec.action_queue_power_cost)
        + (2 * rubble_to) * i64::from(spec.rubble_movement_cost_centi) / 100
        + i64::from(2 * route_dist * spec.move_cost)
        + i64::from((rubble_digs + digs) * spec.dig_cost)
        + i64::from(extra_buffer)
        - i64::from(gain);
    if i64::from(unit_power) < naive_needed {
        return None;
    }
    let avoid_opp = |b: &Board, _s: Step, c: CellId| {
        b.cell(c).factory_id.is_some_and(|f| b.factory(f).team != b.me.id)
    };
    let (cost_to, _, _) = board.dist(
        step,
        &[cur],
        Some(uid),
        DistOptions { dest_cell: Some(ore_cell), avoid_cond: Some(&avoid_opp), ..DistOptions::default() },
    );
    let (cost_from, _, _) = board.dist(
        step,
        &[ore_cell],
        Some(uid),
        DistOptions { dest_cell: Some(route[0]), avoid_cond: Some(&avoid_opp), ..DistOptions::default() },
    );
    let actual_needed = i64::from(2 * spec.action_queue_power_cost)
        + cost_to
        + cost_from
        + i64::from((rubble_digs + digs) * spec.dig_cost)
        + i64::from(extra_buffer)
        - i64::from(gain);
    if i64::from(unit_power) >= actual_needed {
        handle_displaced_unit(board, step, ore_cell);
        return Some(make(factory, ore_cell));
    }
    None
}

/// An active heavy ice miner moves to a route-distance-1 cell when one
/// frees up.
pub fn from_transition_to_closer_ice(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    if board.unit(uid).class != RobotClass::Heavy {
        return None;
    }
    let Some(Role::Miner(miner)) = board.unit(uid).role.clone() else {
        return None;
    };
    if !board.cell(miner.resource_cell).ice {
        return None;
    }
    let factory = miner.factory;
    if !board.factories.contains_key(&factory)
        || board.man_dist_factory(miner.resource_cell, factory) == 1
    {
        return None;
    }

    let currently_contested = board.is_contested(miner.resource_cell);
    let candidates: Vec<CellId> = board
        .factory(factory)
        .resource_routes
        .iter()
        .filter(|r| r.len() == 2 && board.cell(*r.last().expect("non-empty")).ice)
        .map(|r| *r.last().expect("non-empty"))
        .collect();
    let mut best: Option<CellId> = None;
    for cell in candidates {
        if !currently_contested && board.is_contested(cell) {
            continue;
        }
        let can_take = board
            .assigned_unit(cell, step)
            .map_or(true, |a| board.unit(a).class == RobotClass::Light);
        if !can_take {
            continue;
        }
        match best {
            None => best = Some(cell),
            Some(b) => {
                if board.is_contested(b) && !board.is_contested(cell) {
                    best = Some(cell);
                }
            }
        }
    }
    best.map(|cell| {
        if step == board.step {
            info!(unit = uid, from = miner.resource_cell, to = cell, "ice miner moves closer");
        }
        handle_displaced_unit(board, step, cell);
        make(factory, cell)
    })
}

pub(crate) fn is_valid(board: &mut Board, uid: UnitId, r: &mut Miner, step: Step) -> bool {
    let i = board.idx(step);
    if !board.factories.contains_key(&r.factory) {
        return false;
    }
    if !board.dest_is_safe(uid, r.resource_cell) {
        return false;
    }
    let cell_ice = board.cell(r.resource_cell).ice;
    if cell_ice && !factory_needs_water(board, step, r.factory, 250, Some(uid)) {
        if i == 0 {
            debug!(unit = uid, "ice miner released, water is plentiful");
        }
        return false;
    }

    let heavy = board.unit(uid).class == RobotClass::Heavy;
    let cell_ore = board.cell(r.resource_cell).ore;
    if heavy && cell_ore && board.unit(uid).ore[i] == 0 {
        let is_forge = board
            .factory(r.factory)
            .mode
            .as_ref()
            .is_some_and(crate::modes::Mode::is_forge);
        if !is_forge && !power_ok(board, step, Some(uid), r.factory, 50) {
            return false;
        }
    }

    // The last heavy cannot stay on ore while water runs out.
    if heavy && cell_ore {
        let heavies = board
            .factory_units(r.factory, step)
            .into_iter()
            .filter(|&u| {
                board.unit(u).class == RobotClass::Heavy
                    && board.unit(u).role.as_ref().map_or(true, |x| x.kind() != RoleKind::Generator)
            })
            .count();
        if heavies == 1 {
            let ice_dist = board
                .factory(r.factory)
                .resource_routes
                .iter()
                .find(|route| board.cell(*route.last().expect("non-empty")).ice)
                .map_or(0, |route| route.len() as i32 - 1);
            let cur = board.unit_cell(uid, step);
            let move_dist = board.man_dist(cur, r.resource_cell)
                + board.man_dist_factory(r.resource_cell, r.factory)
                + 2 * ice_dist;
            let water = board.factory(r.factory).water[i];
            if water < move_dist + 20 {
                return false;
            }
            let opp_dist =
                board.nearest_factory_dist(board.factory_center(r.factory), Some(board.opp.id));
            if opp_dist < 20 && water < move_dist + 60 {
                return false;
            }
            if water < move_dist + 100
                && board.man_dist(cur, r.resource_cell) < 2
                && board.is_antagonized(uid).is_some()
            {
                return false;
            }
        }
    }
    true
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Miner, step: Step) -> CellId {
    let cur = board.unit_cell(uid, step);
    if cur == board.factory_center(r.factory) {
        return r.resource_cell;
    }
    match r.goal {
        Goal::Cell(c) => c,
        Goal::Factory(f) => {
            // A heavy aims for the nearest footprint cell that is not already
            // claimed by another heavy, not just the center.
            if board.unit(uid).class == RobotClass::Heavy {
                let mut best: Option<(i32, CellId)> = None;
                for cell in board.factory_cells(f) {
                    let man_dist = board.man_dist(cur, cell);
                    let free = match board.assigned_unit(cell, step) {
                        None => true,
                        Some(a) => {
                            board.unit(a).class == RobotClass::Light
                                || matches!(&board.unit(a).role, Some(Role::Transporter(t)) if t.destination == uid)
                        }
                    };
                    if free && best.map_or(true, |(d, _)| man_dist < d) {
                        best = Some((man_dist, cell));
                    }
                }
                if let Some((_, cell)) = best {
                    return cell;
                }
            }
            board.factory_center(f)
        }
        Goal::Unit(u) => board.unit_cell(u, board.step),
    }
}

/// A dist-1 heavy miner with a transporter stocked next door can sit still
/// between deliveries instead of shuttling.
pub(crate) fn is_patient(board: &Board, uid: UnitId, r: &Miner, step: Step) -> bool {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let Some(&tid) = board.unit(uid).transporters[i].first() else {
        return false;
    };
    if board.unit(uid).class != RobotClass::Heavy
        || board.man_dist_factory(r.resource_cell, r.factory) != 1
        || cur != r.resource_cell
        || r.goal != Goal::Factory(r.factory)
    {
        return false;
    }
    let Some(Role::Transporter(t)) = &board.unit(tid).role else {
        return false;
    };
    if board.unit_cell(tid, step) != t.factory_cell || board.man_dist(t.factory_cell, cur) != 1 {
        return false;
    }
    for n in board.neighbors(cur) {
        if board
            .unit_at(n, step, Some(board.opp.id))
            .is_some_and(|o| board.unit(o).class == RobotClass::Heavy)
        {
            return false;
        }
    }
    true
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Miner, step: Step) {
    let i = board.idx(step);
    let rules = board.rules.clone();
    let spec = *board.unit(uid).spec(&rules);
    let cur = board.unit_cell(uid, step);
    let unit_power = board.unit(uid).power[i];
    let unit_resource = board.unit(uid).ice[i].max(board.unit(uid).ore[i]);
    let resource_dist = board.man_dist_factory(r.resource_cell, r.factory);

    if r.goal == Goal::Cell(r.resource_cell) {
        let mut power_threshold = 0i64;
        if resource_dist <= FORGE_DIST {
            power_threshold = i64::from(spec.action_queue_power_cost)
                + naive_cost(board, step, uid, cur, r.resource_cell, false)
                + i64::from(spec.dig_cost)
                + naive_cost(board, step, uid, r.resource_cell, board.factory_center(r.factory), true);
        }
        let resource_threshold = if step < 200 {
            3 * spec.cargo_space / 4
        } else {
            spec.cargo_space
        };
        let f = board.factory(r.factory);
        let heavy_metal_cost = rules.heavy.metal_cost;
        let metal_now = f.metal[i] + f.ore[i] / rules.ore_metal_ratio;
        let metal_with_mine =
            f.metal[i] + (f.ore[i] + board.unit(uid).ore[i]) / rules.ore_metal_ratio;
        let water_with_ice = f.water[i] + f.ice[i] / rules.ice_water_ratio;

        let return_home = i64::from(unit_power) < power_threshold
            || unit_resource >= resource_threshold
            // Head back a little early when threatened and depleted.
            || (i == 0
                && board.unit(uid).low_power
                && board.threatened_by_opp(step, uid, cur, None).0 > 0)
            // Deliver ore the moment it completes a heavy build.
            || (board.unit(uid).ore[i] > 0
                && metal_now < heavy_metal_cost
                && metal_with_mine >= heavy_metal_cost)
            // Deliver ice before the factory starves.
            || (board.unit(uid).ice[i] > 0
                && water_with_ice < 10 + board.man_dist_factory(cur, r.factory))
            // Endgame ice rush.
            || (step + resource_dist as u32 >= board.config.ice_mine_rush
                && board.unit(uid).ice[i] >= 4 * spec.dig_resource_gain);
        if return_home {
            r.goal = Goal::Factory(r.factory);
        }
    } else {
        let patient = is_patient(board, uid, r, step);
        let factory_power = board.factory(r.factory).power[i];
        let power_threshold = if patient {
            100
        } else if factory_power >= 5000 {
            spec.battery_capacity - 100
        } else {
            let mut t = i64::from(spec.action_queue_power_cost)
                + naive_cost(board, step, uid, cur, r.resource_cell, false)
                + i64::from(6 * spec.dig_cost)
                + naive_cost(board, step, uid, r.resource_cell, board.factory_center(r.factory), true);
            if board.cell(r.resource_cell).ore {
                let digs = if resource_dist <= FORGE_DIST {
                    ore_digs(board, step, r.factory)
                } else {
                    25
                };
                t += i64::from((digs - 4) * spec.dig_cost);
                t = t.min(i64::from(spec.battery_capacity));
            }
            t as i32
        };
        if unit_power >= power_threshold && unit_resource == 0 {
            r.goal = Goal::Cell(r.resource_cell);
        }
    }
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Miner,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let role = Role::Miner(r.clone());
    match phase {
        Phase::Move => {
            // A lying unit locks in a stand-still so its transporter knows
            // where to send power.
            if board.unit(uid).lying_at(step) {
                return board.unit_do_no_move(uid, step);
            }
            if is_patient(board, uid, r, step) {
                return board.unit_do_no_move(uid, step);
            }
            // A protected miner keeps the queue honest for one threat, then
            // goes quiet while the protector does its second.
            if i > 0 && board.unit_cell(uid, step) == r.resource_cell {
                if let Some(&pid) = board.unit(uid).protectors[i].first() {
                    let threat_count = match board.get_unit(pid).and_then(|p| p.role.as_ref()) {
                        Some(Role::Protector(p)) => p.threat_count,
                        _ => 0,
                    };
                    if threat_count >= 2 {
                        board.unit_mut(uid).set_lie_step(step);
                        return board.unit_do_no_move(uid, step);
                    }
                }
            }
            let goal = goal_cell(board, uid, r, step);
            crate::roles::do_move_to(board, uid, step, goal, &role)
                .or_else(|| board.unit_do_no_move(uid, step))
        }
        Phase::Dig => {
            let cur = board.unit_cell(uid, step);
            if r.goal == Goal::Cell(r.resource_cell) && cur == goal_cell(board, uid, r, step) {
                if board.unit(uid).power[i] >= board.unit_dig_cost(uid, step) {
                    return board.unit_do_dig(uid, step);
                }
            }
            None
        }
        Phase::Pickup => crate::roles::do_power_pickup(board, uid, step, &role, None, None),
        Phase::Transfer => crate::roles::do_transfer_resource_to_factory(board, uid, step, &role)
            .or_else(|| do_excess_power_transfer(board, uid, r, step)),
    }
}

/// A dist-1 heavy sitting on a full battery hands surplus back to a starved
/// factory.
fn do_excess_power_transfer(
    board: &mut Board,
    uid: UnitId,
    r: &Miner,
    step: Step,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let ice_conflict = board
        .factory(r.factory)
        .mode
        .as_ref()
        .is_some_and(crate::modes::Mode::is_ice_conflict);
    if board.unit(uid).class == RobotClass::Heavy
        && !board.unit(uid).transporters[i].is_empty()
        && cur == r.resource_cell
        && board.unit(uid).power[i] >= 1500
        && board.factory(r.factory).power[i] < 500
        && !ice_conflict
        && board.man_dist_factory(r.resource_cell, r.factory) == 1
    {
        let amount = (board.unit(uid).power[i] - 600) / 10 * 10;
        if amount > 0 {
            let transfer_cell = board.neighbor_toward(cur, board.factory_center(r.factory));
            let direction = board.direction_to(cur, transfer_cell);
            let cost = board.unit_transfer_cost(
                uid,
                step,
                direction,
                crate::actions::Resource::Power,
                amount,
            );
            if board.unit(uid).power[i] >= cost {
                if i == 0 {
                    debug!(unit = uid, amount, "miner returns excess power");
                }
                return board.unit_do_transfer(
                    uid,
                    step,
                    transfer_cell,
                    crate::actions::Resource::Power,
                    amount,
                );
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_is_resource() {
        let m = Miner { factory: 0, resource_cell: 42, goal: Goal::Cell(42) };
        assert!(m.goal_is_resource());
        let m = Miner { factory: 0, resource_cell: 42, goal: Goal::Factory(0) };
        assert!(!m.goal_is_resource());
    }
}
