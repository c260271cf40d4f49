//! Pillager: dig up opposing lichen, weighted toward bottlenecks and the
//! growing frontier; turns kamikaze in the endgame.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::math::div_ceil;
use crate::pathfinding::naive_cost;
use crate::roles::{Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Lichen-destruction role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pillager {
    /// Home factory.
    pub factory: FactoryId,
    /// The opposing lichen cell being attacked.
    pub lichen_cell: CellId,
    /// One-way raiders never return for power.
    pub one_way: bool,
    /// Current sub-destination.
    pub goal: Goal,
}

fn make(board: &Board, uid: UnitId, step: Step, factory: FactoryId, cell: CellId, one_way: bool) -> Role {
    let goal = if one_way {
        Goal::Cell(cell)
    } else {
        let cur = board.unit_cell(uid, step);
        if board.man_dist(cur, cell) < board.man_dist_factory(cur, factory) {
            Goal::Cell(cell)
        } else {
            Goal::Factory(factory)
        }
    };
    Role::Pillager(Pillager { factory, lichen_cell: cell, one_way, goal })
}

fn end_phase(board: &Board, uid: UnitId, step: Step) -> bool {
    step >= board.config.end_phase
        || matches!(&board.unit(uid).role, Some(Role::Pillager(p)) if p.one_way)
}

/// Displacing a pillager retargets it at the nearest opposing factory center
/// instead of releasing it outright.
fn displace_pillager(board: &mut Board, step: Step, cell: CellId) {
    let Some(displaced) = board.assigned_unit(cell, step) else {
        return;
    };
    if let Some(Role::Pillager(mut p)) = board.unit(displaced).role.clone() {
        if let Some(opp_factory) = board.nearest_factory(p.lichen_cell, Some(board.opp.id)) {
            let new_cell = board.factory_center(opp_factory);
            crate::roles::unit_unset_role(board, displaced, step);
            p.lichen_cell = new_cell;
            crate::roles::unit_set_role(board, displaced, step, Some(Role::Pillager(p)));
            return;
        }
    }
    crate::roles::unit_unset_role(board, displaced, step);
}

fn dest_is_safe(board: &Board, uid: UnitId, step: Step, cell: CellId) -> bool {
    end_phase(board, uid, step) || board.dest_is_safe(uid, cell)
}

/// Value-per-cost score of attacking `cell` now.
fn cell_score(board: &mut Board, uid: UnitId, step: Step, cell: CellId) -> i64 {
    let ep = end_phase(board, uid, step);
    let i = board.idx(step);
    if !ep && board.cell(cell).lichen_dist.is_none() {
        return 0;
    }
    let mut cell_lichen = board.cell(cell).lichen[i];
    if board.cell(cell).lichen_dist.is_none() {
        cell_lichen -= 1000 - step as i32;
    }
    if cell_lichen <= 0 {
        return 0;
    }

    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let spec = *board.unit(uid).spec(&board.rules);
    let dist_to_cell = board.man_dist(cur, cell);
    let dist_back = if ep { 0 } else { board.man_dist_factory(cell, factory) };
    let digs = div_ceil(i64::from(cell_lichen), i64::from(spec.dig_lichen_removed));

    if !ep && dist_to_cell < board.man_dist_factory(cur, factory) {
        let threshold = i64::from(2 * spec.action_queue_power_cost)
            + i64::from(3 * spec.move_cost)
            + 3 * i64::from(spec.move_cost) * i64::from(dist_to_cell) / 2
            + i64::from(spec.dig_cost) * digs
            + 3 * i64::from(spec.move_cost) * i64::from(dist_back) / 2;
        if i64::from(board.unit(uid).power[i]) < threshold {
            return 0;
        }
    }

    // Costs in raw power; values scaled by 1000 parts.
    let cost = i64::from(spec.move_cost) * i64::from(dist_to_cell)
        + i64::from(spec.dig_cost) * digs
        + i64::from(spec.move_cost) * i64::from(dist_back) / 4;

    let mut traffic: i64 = 0;
    for c in std::iter::once(cell).chain(board.neighbors(cell)) {
        let (lt, ht) = board.traffic(c);
        traffic += i64::from(if board.unit(uid).class == RobotClass::Heavy {
            ht
        } else {
            lt + ht
        });
        if board.assigned_unit(c, step).is_some() {
            traffic += 10;
        }
    }
    let traffic = (traffic / 5).min(200);

    let mut value: i64 = 1000;
    if ep {
        value += 10 * i64::from(cell_lichen);
    } else {
        if board.cell(cell).lichen_bottleneck {
            value += 1000;
        }
        let frontier = board.factory(factory).lichen_frontier_cells.contains(&cell);
        if frontier {
            value += 1000;
        }
    }
    // Every-other-cell grids starve regrowth between digs.
    let c = board.cell(cell);
    if c.x % 2 == c.y % 2 {
        value += 500;
    }
    value = value * (1100 - traffic) / 1000;
    if cost <= 0 {
        return value;
    }
    value * 1000 / cost
}

/// Surplus fresh lights at the cap go on a one-way raid.
pub fn from_one_way(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    if board.unit(uid).class != RobotClass::Light
        || board.unit(uid).power[i] != board.rules.light.init_power
        || !board.cell(cur).factory_center
    {
        return None;
    }
    let factory = board.cell(cur).factory_id.expect("on center");
    let light_lim = board.config.light_limit_at(step) as usize;
    let light_count = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| {
            board.unit(u).class == RobotClass::Light
                && board.unit(u).role.as_ref().map_or(true, |r| r.kind() != RoleKind::Relocate)
        })
        .count();
    if light_count > light_lim {
        return from_lichen_cell_count(board, uid, step, 100, 100, true);
    }
    None
}

/// Main constructor: best-scoring connected opposing lichen cell.
pub fn from_lichen_cell_count(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    mut max_dist: i32,
    max_count: usize,
    one_way: bool,
) -> Option<Role> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let steps_remaining = 1000i64 - i64::from(step);
    let ep = end_phase(board, uid, step);
    let heavy = board.unit(uid).class == RobotClass::Heavy;

    // Transitions widen the search around the current target.
    if max_dist < 100 {
        if let Some(Role::Pillager(p)) = &board.unit(uid).role {
            max_dist = board.man_dist_factory(p.lichen_cell, factory) + 5;
        }
    }
    if max_count < 100 {
        let class = board.unit(uid).class;
        if crate::roles::count_like_roles(board, factory, step, class, RoleKind::Pillager) + 1
            > max_count
        {
            return None;
        }
    }

    let mut cells: Vec<CellId> = Vec::new();
    for f in board.opp_factories() {
        cells.extend(board.factory(f).lichen_connected_cells.iter().copied());
    }
    if ep {
        cells.extend(
            board
                .opp
                .lichen_disconnected_cells
                .iter()
                .copied()
                .filter(|&c| i64::from(board.cell(c).lichen[i]) > steps_remaining.min(100))
                .collect::<Vec<_>>(),
        );
    }

    let cur_near = board.man_dist_factory(cur, factory) <= max_dist;
    let spec = *board.unit(uid).spec(&board.rules);
    let mut best: Option<(i64, CellId)> = None;
    for cell in cells {
        if board.man_dist_factory(cell, factory) > max_dist
            || (!cur_near && board.man_dist(cell, cur) > max_dist)
            || (!dest_is_safe(board, uid, step, cell) && !ep)
        {
            continue;
        }
        let cur_dist = i64::from(board.man_dist(cur, cell));
        if cur_dist > steps_remaining - 1 {
            continue;
        }
        let takeable = match board.assigned_unit(cell, step) {
            None => true,
            Some(a) => {
                (heavy && board.unit(a).class == RobotClass::Light)
                    || (step >= 980
                        && board.unit(a).class == board.unit(uid).class
                        && board.unit(uid).power[i] >= spec.dig_cost
                        && (board.unit(a).power[i] < board.unit(a).spec(&board.rules).dig_cost
                            || cur_dist
                                < i64::from(
                                    board.man_dist(board.unit_cell(a, step), cell),
                                )))
            }
        };
        if !takeable {
            continue;
        }
        let score = cell_score(board, uid, step, cell);
        if score > 0 && best.map_or(true, |(bs, _)| score > bs) {
            best = Some((score, cell));
        }
    }
    if let Some((_, cell)) = best {
        displace_pillager(board, step, cell);
        return Some(make(board, uid, step, factory, cell, one_way));
    }
    if !ep {
        return None;
    }

    // Endgame: camp dist-1 boundary cells once all live lichen is claimed.
    let mut boundary: Vec<CellId> = Vec::new();
    for f in board.opp_factories() {
        for &c in board
            .factory(f)
            .lichen_flat_boundary_cells
            .iter()
            .chain(board.factory(f).lichen_rubble_boundary_cells.iter())
        {
            if board.man_dist_factory(c, f) == 1 && board.cell(c).rubble[i] <= 20 {
                boundary.push(c);
            }
        }
    }
    let mut best: Option<(i64, CellId)> = None;
    for cell in boundary {
        if board.man_dist_factory(cell, factory) > max_dist
            || (!cur_near && board.man_dist(cell, cur) > max_dist)
        {
            continue;
        }
        let cur_dist = i64::from(board.man_dist(cur, cell));
        if cur_dist > steps_remaining - 1 || board.assigned_unit(cell, step).is_some() {
            continue;
        }
        let score = -cur_dist;
        if best.map_or(true, |(bs, _)| score > bs) {
            best = Some((score, cell));
        }
    }
    best.map(|(_, cell)| {
        if i == 0 {
            info!(unit = uid, cell, "endgame boundary pillager");
        }
        displace_pillager(board, step, cell);
        make(board, uid, step, factory, cell, one_way)
    })
}

/// A pillager whose cell ran dry shifts to a nearby live one.
pub fn from_transition_active_pillager(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    max_dist: i32,
) -> Option<Role> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let steps_remaining = 1000i64 - i64::from(step);
    let Some(Role::Pillager(p)) = board.unit(uid).role.clone() else {
        return None;
    };
    if board.cell(p.lichen_cell).lichen[i] > 0 {
        return None;
    }

    let max_radius = if board.cell(p.lichen_cell).factory_center { 4 } else { 2 };
    let heavy = board.unit(uid).class == RobotClass::Heavy;
    for radius in 1..=max_radius {
        let mut best: Option<(i64, CellId)> = None;
        for (n, _) in board.radius_cells(p.lichen_cell, radius, radius) {
            let cur_dist = i64::from(board.man_dist(cur, n));
            let takeable = board.assigned_unit(n, step).map_or(true, |a| {
                heavy && board.unit(a).class == RobotClass::Light
            });
            if board.cell(n).lichen[i] > 0
                && board.opp.owns_strain(board.cell(n).lichen_strain[i])
                && takeable
                && cur_dist < steps_remaining - 1
            {
                let score = cell_score(board, uid, step, n);
                if score > 0 && best.map_or(true, |(bs, _)| score > bs) {
                    best = Some((score, n));
                }
            }
        }
        if let Some((_, cell)) = best {
            displace_pillager(board, step, cell);
            return Some(make(board, uid, step, p.factory, cell, false));
        }
    }

    if end_phase(board, uid, step) {
        from_lichen_cell_count(board, uid, step, max_dist, 100, false)
    } else {
        from_lichen_cell_count(board, uid, step, max_dist, 100, false)
            .or_else(|| Some(super::recharge::new(p.factory)))
    }
}

/// Endgame reassignment sweep: everything spare attacks lichen.
pub fn from_transition_end_of_game(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    if step < board.config.end_phase {
        return None;
    }
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let exempt = match board.unit(uid).role.clone() {
        None => false,
        Some(Role::Recharge(_)) => !board.cell(cur).has_factory(),
        Some(Role::Cow(c)) => c.repair,
        Some(
            Role::Attacker(_)
            | Role::Sidekick(_)
            | Role::Protector(_)
            | Role::Pillager(_)
            | Role::WaterTransporter(_)
            | Role::Blockade(_),
        ) => true,
        Some(Role::Miner(m)) => {
            board.cell(m.resource_cell).ice
                || (board.cell(m.resource_cell).ore && board.unit(uid).ore[i] > 0)
        }
        Some(Role::Antagonizer(mut a)) => {
            (board.cell(a.target_cell).ice
                && a.target_factory.is_none()
                && board.man_dist_factory(a.target_cell, a.factory) < 10)
                || super::antagonizer::can_destroy_factory(board, uid, &mut a, step)
        }
        Some(Role::Relocate(r)) => board
            .get_factory(r.target_factory)
            .and_then(|f| f.mode.as_ref())
            .is_some_and(crate::modes::Mode::is_ice_conflict),
        Some(Role::Transporter(_)) => board.unit(uid).class == RobotClass::Light,
        Some(Role::Generator(_)) => false,
    };
    if exempt {
        return None;
    }
    if matches!(
        board.unit(uid).role.as_ref().map(Role::kind),
        Some(RoleKind::Generator | RoleKind::Transporter)
    ) && board.unit(uid).class == RobotClass::Heavy
        && board.factory(factory).power[i] < 3000
    {
        return None;
    }

    // Keep at least one heavy on ice before sending the rest off to raid.
    let f = board.factory(factory);
    let factory_water = f.water[i] + f.ice[i] / board.rules.ice_water_ratio;
    if factory_water < 500 {
        let heavy_ice_miners = board
            .factory_units(factory, step)
            .into_iter()
            .filter(|&u| {
                board.unit(u).class == RobotClass::Heavy
                    && matches!(&board.unit(u).role, Some(Role::Miner(m)) if board.cell(m.resource_cell).ice)
            })
            .count();
        if heavy_ice_miners == 0 {
            return None;
        }
    }

    // Biggest near-enough lichen pile wins.
    let home_dist = i64::from(board.man_dist_factory(cur, factory));
    let mut best: Option<(i64, CellId)> = None;
    for id in 0..board.cells.len() as CellId {
        let c = board.cell(id);
        if c.lichen[i] == 0
            || !board.opp.owns_strain(c.lichen_strain[i])
            || board.assigned_unit(id, step).is_some()
        {
            continue;
        }
        let strain = c.lichen_strain[i] as FactoryId;
        if !board.factories.contains_key(&strain) {
            continue;
        }
        let lichen_dist = i64::from(board.man_dist_factory(id, factory));
        let opp_factory_dist = i64::from(board.man_dist_factory(id, strain));
        let score = i64::from(board.cell(id).lichen[i]) - opp_factory_dist;
        if i64::from(step) + home_dist + lichen_dist + 20 < 1000
            && best.map_or(true, |(bs, _)| score > bs)
        {
            best = Some((score, id));
        }
    }
    if let Some((_, cell)) = best {
        return Some(make(board, uid, step, factory, cell, false));
    }
    from_lichen_cell_count(board, uid, step, 100, 100, false)
}

pub(crate) fn is_valid(board: &mut Board, _uid: UnitId, r: &mut Pillager, _step: Step) -> bool {
    // A pillager with no lichen left under it stays valid; the endgame
    // transitions retarget it.
    board.factories.contains_key(&r.factory)
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Pillager, step: Step) -> CellId {
    let cur = board.unit_cell(uid, step);
    if cur == board.factory_center(r.factory) {
        return r.lichen_cell;
    }
    crate::roles::goal_target_cell(board, r.goal)
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Pillager, step: Step) {
    let i = board.idx(step);
    if r.goal == Goal::Cell(r.lichen_cell) {
        return;
    }
    let cur = board.unit_cell(uid, step);
    let spec = *board.unit(uid).spec(&board.rules);
    let threshold = if step >= board.config.end_phase && board.factory(r.factory).power[i] < 500 {
        i64::from(spec.action_queue_power_cost)
            + i64::from(spec.self_destruct_cost)
            + naive_cost(board, step, uid, cur, r.lichen_cell, false)
    } else if step >= board.config.end_phase {
        i64::from(spec.action_queue_power_cost)
            + i64::from(6 * spec.dig_cost)
            + naive_cost(board, step, uid, cur, r.lichen_cell, false)
    } else {
        i64::from(spec.action_queue_power_cost)
            + i64::from(6 * spec.dig_cost)
            + naive_cost(board, step, uid, cur, r.lichen_cell, false)
            + naive_cost(board, step, uid, r.lichen_cell, board.factory_center(r.factory), true)
    }
    .min(i64::from(spec.battery_capacity));
    if i64::from(board.unit(uid).power[i]) >= threshold {
        r.goal = Goal::Cell(r.lichen_cell);
    }
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Pillager,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let ep = step >= board.config.end_phase || r.one_way;
    let role = Role::Pillager(r.clone());
    let spec = *board.unit(uid).spec(&board.rules);
    match phase {
        Phase::Move => {
            // Units parked on barren cells wait for finalize so they can
            // yield the square if someone needs it.
            let goal = goal_cell(board, uid, r, step);
            if r.one_way {
                let cur = board.unit_cell(uid, step);
                if board.unit(uid).power[i] >= 25
                    || !board.threat_units(cur, 1, 1, false, true).is_empty()
                {
                    return crate::roles::do_move_to(board, uid, step, goal, &role);
                }
                None
            } else if board.cell(r.lichen_cell).lichen[i] > 0 {
                crate::roles::do_move_to(board, uid, step, goal, &role)
            } else if ep && board.unit(uid).power[i] >= 6 * spec.move_cost {
                crate::roles::do_move_to(board, uid, step, goal, &role)
            } else {
                None
            }
        }
        Phase::Dig => do_dig(board, uid, r, step, ep),
        Phase::Pickup => {
            if r.one_way {
                None
            } else {
                crate::roles::do_power_pickup(board, uid, step, &role, None, None)
            }
        }
        Phase::Transfer => crate::roles::do_transfer_resource_to_factory(board, uid, step, &role),
    }
}

fn do_dig(
    board: &mut Board,
    uid: UnitId,
    r: &mut Pillager,
    step: Step,
    ep: bool,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let goal = goal_cell(board, uid, r, step);
    let light = board.unit(uid).class == RobotClass::Light;
    let spec = *board.unit(uid).spec(&board.rules);

    let at_work = ep || (r.goal == Goal::Cell(r.lichen_cell) && cur == goal);
    if !at_work
        || board.cell(cur).lichen[i] == 0
        || !board.opp.owns_strain(board.cell(cur).lichen_strain[i])
    {
        return None;
    }

    let destruct_cost = board.unit_selfdestruct_cost(uid, step);
    let power = board.unit(uid).power[i];
    if ep && step < 970 && board.cell(cur).lichen_bottleneck {
        if light && power >= destruct_cost && power < 2 * destruct_cost {
            if i == 0 {
                info!(unit = uid, cell = cur, "bottleneck self-destruct");
            }
            return board.unit_do_selfdestruct(uid, step);
        }
        if power >= board.unit_dig_cost(uid, step) {
            if i == 0 {
                debug!(unit = uid, cell = cur, "bottleneck dig");
            }
            return board.unit_do_dig(uid, step);
        }
    }

    // Still traveling: do not stop to dig under threat, push to the goal and
    // trade there.
    if ep && step <= 997 && cur != goal {
        let heavy = !light;
        if !board.threat_units(cur, 1, 1, heavy, light).is_empty() {
            return None;
        }
    }

    if ep && light {
        let turns_remaining = i64::from(1000 - step);
        let digs_remaining = i64::from(power / spec.dig_cost);
        let max_by_digging =
            i64::from(spec.dig_lichen_removed - 1) * turns_remaining.min(digs_remaining);
        if i64::from(board.cell(cur).lichen[i]) > max_by_digging
            && power >= destruct_cost
            && power < 2 * destruct_cost
        {
            if i == 0 {
                info!(unit = uid, cell = cur, "endgame self-destruct");
            }
            return board.unit_do_selfdestruct(uid, step);
        }
    }

    if power >= board.unit_dig_cost(uid, step) {
        return board.unit_do_dig(uid, step);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_way_goal_defaults_to_cell() {
        let p = Pillager { factory: 0, lichen_cell: 9, one_way: true, goal: Goal::Cell(9) };
        assert_eq!(p.goal, Goal::Cell(9));
    }
}
