//! Cow: clear rubble so lichen can grow (or routes stay cheap).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::math::div_ceil;
use crate::pathfinding::DistOptions;
use crate::roles::{handle_displaced_unit, Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Rubble-clearing role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cow {
    /// Home factory.
    pub factory: FactoryId,
    /// The rubble cell being cleared.
    pub rubble_cell: CellId,
    /// Set for repair cows restoring pillaged lichen ground.
    pub repair: bool,
    /// Current sub-destination.
    pub goal: Goal,
}

fn make(board: &Board, uid: UnitId, step: Step, factory: FactoryId, cell: CellId, repair: bool) -> Role {
    let cur = board.unit_cell(uid, step);
    let goal = if board.man_dist(cur, cell) < board.man_dist_factory(cur, factory) {
        Goal::Cell(cell)
    } else {
        Goal::Factory(factory)
    };
    Role::Cow(Cow { factory, rubble_cell: cell, repair, goal })
}

/// After mid-game, units near home patch over freshly pillaged ground.
pub fn from_transition_lichen_repair(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    if i != 0 || step < 200 {
        return None;
    }
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let exempt = match board.unit(uid).role.clone() {
        None => false,
        Some(Role::Recharge(_)) => !board.cell(cur).has_factory(),
        Some(Role::Blockade(_) | Role::WaterTransporter(_)) => true,
        Some(Role::Antagonizer(mut a)) => {
            super::antagonizer::can_destroy_factory(board, uid, &mut a, step)
        }
        Some(Role::Cow(c)) => c.repair,
        Some(Role::Miner(m)) => {
            board.unit(uid).class == RobotClass::Heavy
                && board.cell(m.resource_cell).ore
                && board.unit(uid).ore[i] > 0
        }
        _ => false,
    };
    if exempt {
        return None;
    }

    let heavy = board.unit(uid).class == RobotClass::Heavy;
    let f = board.factory(factory);
    let factory_water = f.water[i] + f.ice[i] / board.rules.ice_water_ratio;
    let on_ice = matches!(&board.unit(uid).role, Some(Role::Miner(m)) if board.cell(m.resource_cell).ice);
    if factory_water < 60 && heavy && (board.unit(uid).role.is_none() || on_ice) {
        return None;
    }
    let heavies = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| board.unit(u).class == RobotClass::Heavy)
        .count();
    let ice_conflict = board
        .factory(factory)
        .mode
        .as_ref()
        .is_some_and(crate::modes::Mode::is_ice_conflict);
    if heavy && ice_conflict && heavies == 1 {
        return None;
    }
    if board.man_dist_factory(cur, factory) > 8 {
        return None;
    }
    if heavy
        && crate::roles::count_like_roles(board, factory, step, RobotClass::Heavy, RoleKind::Cow) >= 1
    {
        return None;
    }

    if heavy {
        from_factory_radius(board, uid, step, 1, 20, 20, 8)
    } else {
        from_factory_radius(board, uid, step, 1, 1, 4, 8)
            .or_else(|| from_factory_radius(board, uid, step, 1, 1, 20, 8))
    }
}

/// Repair cow aimed by the factory's pillage event log.
pub fn from_lichen_repair(board: &mut Board, uid: UnitId, step: Step, max_dist: i32) -> Option<Role> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let heavy = board.unit(uid).class == RobotClass::Heavy;

    if heavy {
        let repair_cows = board
            .factory_units(factory, step)
            .into_iter()
            .filter(|&u| {
                board.unit(u).class == RobotClass::Heavy
                    && matches!(&board.unit(u).role, Some(Role::Cow(c)) if c.repair)
            })
            .count();
        if repair_cows >= 1 {
            return None;
        }
    }

    let pillaged: Vec<(CellId, Step)> = board
        .strategy
        .factory_caches
        .get(&factory)
        .map(|c| c.pillage_events.clone())
        .unwrap_or_default();
    let spec = *board.unit(uid).spec(&board.rules);
    let mut best: Option<(i32, CellId)> = None;
    for &(cell, pillage_step) in pillaged.iter().rev() {
        if pillage_step + 50 < board.step {
            break;
        }
        let rubble = board.cell(cell).rubble[i];
        let can_take = board.assigned_unit(cell, step).map_or(true, |a| {
            heavy && board.unit(a).class == RobotClass::Light
        });
        if rubble > 0
            && board.man_dist_factory(cell, factory) <= max_dist
            && can_take
            && board.dest_is_safe(uid, cell)
        {
            let score = board.man_dist(cur, cell)
                + div_ceil(i64::from(rubble), i64::from(spec.dig_rubble_removed)) as i32;
            if best.map_or(true, |(bs, _)| score < bs) {
                best = Some((score, cell));
            }
        }
    }
    best.map(|(_, cell)| {
        handle_displaced_unit(board, step, cell);
        make(board, uid, step, factory, cell, true)
    })
}

/// Clear the first rubbled cell along a mined resource route.
pub fn from_resource_route(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    ice: bool,
    num_routes: usize,
    max_dist: i32,
    max_count: usize,
) -> Option<Role> {
    let i = board.idx(step);
    let factory = crate::roles::home_factory(board, uid, step);
    let class = board.unit(uid).class;
    if crate::roles::count_like_roles(board, factory, step, class, RoleKind::Cow) + 1 > max_count {
        return None;
    }

    // Routes currently worked by a heavy miner come first.
    let all: Vec<Vec<CellId>> = board.factory(factory).resource_routes.clone();
    let mut active = Vec::new();
    let mut inactive = Vec::new();
    for r in all {
        let last = *r.last().expect("non-empty");
        let c = board.cell(last);
        let wanted = if ice { c.ice } else { c.ore };
        if !wanted {
            continue;
        }
        if ice && c.assigned_factory.is_some_and(|f| f != factory) {
            continue;
        }
        let mined = board.assigned_unit(last, step).is_some_and(|a| {
            board.unit(a).class == RobotClass::Heavy
                && board.unit(a).role.as_ref().is_some_and(|x| x.kind() == RoleKind::Miner)
        });
        if mined {
            active.push(r);
        } else {
            inactive.push(r);
        }
    }
    active.extend(inactive);

    for route in active.into_iter().take(num_routes) {
        if route.len() as i32 - 1 > max_dist {
            break;
        }
        for &cell in route.iter().skip(1) {
            if board.assigned_unit(cell, step).is_none()
                && board.cell(cell).rubble[i] > 0
                && board.nearest_factory_dist(cell, Some(board.opp.id)) > 2
                && board.dest_is_safe(uid, cell)
            {
                return Some(make(board, uid, step, factory, cell, false));
            }
        }
    }
    None
}

/// Open a path to a nearby low-rubble region big enough for lichen.
pub fn from_lowland_route(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    max_dist: usize,
    min_size: u32,
    max_count: usize,
) -> Option<Role> {
    let i = board.idx(step);
    let factory = crate::roles::home_factory(board, uid, step);
    let class = board.unit(uid).class;
    if crate::roles::count_like_roles(board, factory, step, class, RoleKind::Cow) + 1 > max_count {
        return None;
    }
    // A big open neighborhood means there is nothing to tunnel toward.
    let center = board.factory_center(factory);
    for (n, _) in board.radius_cells_factory(center, 1, 1) {
        if board.cell(n).region.lowland_size >= 100 {
            return None;
        }
    }
    let routes = board.factory(factory).lowland_routes.clone();
    for route in routes {
        if route.len() < 2 {
            continue;
        }
        if route.len() - 2 > max_dist {
            break;
        }
        let last = *route.last().expect("non-empty");
        if board.cell(last).region.lowland_size < min_size {
            continue;
        }
        for &cell in route.iter().skip(1) {
            if board.assigned_unit(cell, step).is_none()
                && board.cell(cell).rubble[i] > 0
                && board.dest_is_safe(uid, cell)
            {
                return Some(make(board, uid, step, factory, cell, false));
            }
        }
    }
    None
}

/// Clear along a computed route toward `target_cell` (ice-conflict support).
pub fn from_custom_route(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    target_cell: Option<CellId>,
    max_count: usize,
) -> Option<Role> {
    let target_cell = target_cell?;
    let i = board.idx(step);
    let factory = crate::roles::home_factory(board, uid, step);
    let class = board.unit(uid).class;
    if crate::roles::count_like_roles(board, factory, step, class, RoleKind::Cow) + 1 > max_count {
        return None;
    }
    let route = board.route(
        step,
        &[target_cell],
        None,
        DistOptions {
            dest_cond: Some(&move |b: &Board, _s: Step, c: CellId| {
                b.cell(c).factory_id == Some(factory)
            }),
            avoid_cond: Some(&|b: &Board, _s: Step, c: CellId| {
                b.cell(c).has_factory() && b.cell(c).factory_id != Some(factory)
            }),
            unit_move_cost: Some(20),
            unit_rubble_rate_centi: Some(100),
            ..DistOptions::default()
        },
    );
    let mut best: Option<(i32, CellId)> = None;
    for &cell in &route {
        let dist = board.man_dist_factory(cell, factory);
        if best.is_some_and(|(bd, _)| dist >= bd) {
            continue;
        }
        if board.assigned_unit(cell, step).is_none()
            && board.cell(cell).rubble[i] > 0
            && board.dest_is_safe(uid, cell)
        {
            best = Some((dist, cell));
        }
    }
    best.map(|(_, cell)| make(board, uid, step, factory, cell, false))
}

/// Push the lichen field outward over its cheapest rubbled boundary cell.
pub fn from_lichen_frontier(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    max_dist: i32,
    max_rubble: i32,
    max_connected: usize,
) -> Option<Role> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    if board.factory(factory).lichen_connected_cells.len() > max_connected {
        return None;
    }
    let boundary_assigned = board
        .factory(factory)
        .lichen_rubble_boundary_cells
        .iter()
        .filter(|&&c| board.assigned_unit(c, step).is_some())
        .count();
    if board.factory(factory).lichen_flat_boundary_cells.len() + boundary_assigned > 9 {
        return None;
    }

    let spec = *board.unit(uid).spec(&board.rules);
    let cur_near = board.man_dist_factory(cur, factory) <= max_dist;
    let candidates = board.factory(factory).lichen_rubble_boundary_cells.clone();
    let mut best: Option<(i64, CellId)> = None;
    for cell in candidates {
        let rubble = board.cell(cell).rubble[i];
        if rubble > max_rubble
            || board.assigned_unit(cell, step).is_some()
            || !board.dest_is_safe(uid, cell)
        {
            continue;
        }
        if board.man_dist_factory(cell, factory) > max_dist {
            continue;
        }
        if !cur_near && board.man_dist(cell, cur) > max_dist {
            continue;
        }
        let digs = div_ceil(i64::from(rubble), i64::from(spec.dig_rubble_removed));
        let opp_dist = i64::from(board.nearest_factory_dist(cell, Some(board.opp.id)));
        // Costs scaled by 5 for the away-from-opponent discount.
        let cost = 5
            * (i64::from(spec.move_cost) * i64::from(board.man_dist(cur, cell))
                + i64::from(spec.dig_cost) * digs
                + i64::from(spec.move_cost) * i64::from(board.man_dist_factory(cell, factory)))
            - i64::from(spec.move_cost) * opp_dist;
        if best.map_or(true, |(bc, _)| cost < bc) {
            best = Some((cost, cell));
        }
    }
    best.map(|(_, cell)| make(board, uid, step, factory, cell, false))
}

/// Widen a choke point in the lichen field.
pub fn from_lichen_bottleneck(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    max_dist: i32,
    min_rubble: i32,
    max_rubble: i32,
) -> Option<Role> {
    assert!(min_rubble > 0);
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let cur_near = board.man_dist_factory(cur, factory) <= max_dist;

    let bottlenecks = board.factory(factory).lichen_bottleneck_cells.clone();
    let mut scores: std::collections::BTreeMap<CellId, i64> = std::collections::BTreeMap::new();
    for cell in bottlenecks {
        let mut already_handled = false;
        for n in board.neighbors(cell) {
            let nc = board.cell(n);
            if nc.has_factory()
                || nc.ice
                || nc.ore
                || nc.rubble[i] < min_rubble
                || nc.rubble[i] > max_rubble
                || !board.dest_is_safe(uid, n)
            {
                continue;
            }
            if board.man_dist_factory(n, factory) > max_dist {
                continue;
            }
            if !cur_near && board.man_dist(n, cur) > max_dist {
                continue;
            }
            if board.assigned_unit(n, step).is_some() {
                already_handled = true;
                break;
            }
            let lichen_dist = board.cell(cell).lichen_dist.unwrap_or(100);
            // Scores scaled by 50 for the rubble term.
            let entry = scores.entry(n).or_insert_with(|| {
                i64::from(100 - board.cell(n).rubble[i])
            });
            *entry += 50 * (100 - lichen_dist);
        }
        if already_handled {
            for n in board.neighbors(cell) {
                scores.remove(&n);
            }
        }
    }
    scores
        .into_iter()
        .max_by_key(|&(cell, score)| (score, std::cmp::Reverse(cell)))
        .map(|(cell, _)| make(board, uid, step, factory, cell, false))
}

/// Fallback sweep: nearest rubble ring by ring around the factory.
pub fn from_factory_radius(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    min_rubble: i32,
    max_rubble: i32,
    max_dist: i32,
    max_dist_from_unit: i32,
) -> Option<Role> {
    assert!(min_rubble > 0);
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let heavy = board.unit(uid).class == RobotClass::Heavy;
    let center = board.factory_center(factory);

    for ring in 1..=max_dist {
        let mut best: Option<(i32, CellId)> = None;
        for (cell, _) in board.radius_cells_factory(center, ring, ring) {
            let c = board.cell(cell);
            let can_take = board.assigned_unit(cell, step).map_or(true, |a| {
                heavy && board.unit(a).class == RobotClass::Light
            });
            if c.rubble[i] >= min_rubble
                && c.rubble[i] <= max_rubble
                && can_take
                && !c.ice
                && !c.ore
                && board.dest_is_safe(uid, cell)
            {
                let d = board.man_dist(cell, cur);
                if d <= max_dist_from_unit && best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, cell));
                }
            }
        }
        if let Some((_, cell)) = best {
            let repair = max_dist <= 3 && max_rubble <= 20;
            handle_displaced_unit(board, step, cell);
            return Some(make(board, uid, step, factory, cell, repair));
        }
    }
    None
}

pub(crate) fn is_valid(board: &mut Board, uid: UnitId, r: &mut Cow, step: Step) -> bool {
    let i = board.idx(step);
    if !board.factories.contains_key(&r.factory)
        || board.cell(r.rubble_cell).rubble[i] == 0
        || !board.dest_is_safe(uid, r.rubble_cell)
    {
        return false;
    }
    // Heavies drop rubble duty when the factory is starving and no one else
    // mines ice.
    let f = board.factory(r.factory);
    let factory_water = f.water[i] + f.ice[i] / board.rules.ice_water_ratio;
    if factory_water < board.config.low_water_floor && board.unit(uid).class == RobotClass::Heavy {
        let ice_miners = board
            .factory_units(r.factory, step)
            .into_iter()
            .filter(|&u| {
                board.unit(u).class == RobotClass::Heavy
                    && match &board.unit(u).role {
                        None => true,
                        Some(Role::Miner(m)) => board.cell(m.resource_cell).ice,
                        _ => false,
                    }
            })
            .count();
        if ice_miners == 0 {
            if i == 0 {
                debug!(unit = uid, "cow released, factory needs ice");
            }
            return false;
        }
    }
    true
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Cow, step: Step) -> CellId {
    let cur = board.unit_cell(uid, step);
    if cur == board.factory_center(r.factory) {
        return r.rubble_cell;
    }
    crate::roles::goal_target_cell(board, r.goal)
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Cow, step: Step) {
    let i = board.idx(step);
    if r.goal == Goal::Cell(r.rubble_cell) {
        return;
    }
    let spec = *board.unit(uid).spec(&board.rules);
    let threshold = if board.unit(uid).class == RobotClass::Heavy
        && board.man_dist_factory(r.rubble_cell, r.factory) == 1
    {
        spec.action_queue_power_cost
            + 3 * spec.move_cost
            + 2 * spec.dig_cost
            + board.cell(r.rubble_cell).rubble[i]
    } else {
        10 * spec.dig_cost
    };
    if board.unit(uid).power[i] >= threshold {
        r.goal = Goal::Cell(r.rubble_cell);
    }
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Cow,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let role = Role::Cow(r.clone());
    match phase {
        Phase::Move => {
            let goal = goal_cell(board, uid, r, step);
            crate::roles::do_move_to(board, uid, step, goal, &role)
        }
        Phase::Dig => {
            let cur = board.unit_cell(uid, step);
            if r.goal == Goal::Cell(r.rubble_cell)
                && cur == goal_cell(board, uid, r, step)
                && board.unit(uid).power[i] >= board.unit_dig_cost(uid, step)
            {
                return board.unit_do_dig(uid, step);
            }
            None
        }
        Phase::Pickup => crate::roles::do_power_pickup(board, uid, step, &role, None, None),
        Phase::Transfer => crate::roles::do_transfer_resource_to_factory(board, uid, step, &role),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_flag_roundtrip() {
        let c = Cow { factory: 0, rubble_cell: 7, repair: true, goal: Goal::Cell(7) };
        let bytes = bincode::serialize(&c).unwrap();
        let back: Cow = bincode::deserialize(&bytes).unwrap();
        assert!(back.repair);
    }
}
