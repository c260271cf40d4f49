//! Attacker: run down an opposing unit - a stranded low-power one, a water
//! courier, or a trespasser in our territory.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::actions::{ActionKind, Resource};
use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::pathfinding::naive_cost;
use crate::roles::{Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Pursuit role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attacker {
    /// Home factory.
    pub factory: FactoryId,
    /// The unit being pursued.
    pub target_unit: UnitId,
    /// Pincer partner, if one locked in.
    pub sidekick_unit: Option<UnitId>,
    /// Set when the target is stranded below its return cost.
    pub low_power_target: bool,
    /// Set for territorial-defense pursuits.
    pub defender: bool,
    /// Current sub-destination.
    pub goal: Goal,
}

fn make(
    board: &Board,
    uid: UnitId,
    step: Step,
    factory: FactoryId,
    target: UnitId,
    sidekick: Option<UnitId>,
    low_power_target: bool,
    defender: bool,
) -> Role {
    let goal = if board.unit(target).low_power || sidekick.is_some() {
        Goal::Unit(target)
    } else {
        let cur = board.unit_cell(uid, step);
        let target_cell = board.unit_cell(target, board.step);
        if board.man_dist(cur, target_cell) < board.man_dist_factory(cur, factory) {
            Goal::Unit(target)
        } else {
            Goal::Factory(factory)
        }
    };
    Role::Attacker(Attacker {
        factory,
        target_unit: target,
        sidekick_unit: sidekick,
        low_power_target,
        defender,
        goal,
    })
}

fn transition_exempt(board: &mut Board, uid: UnitId, step: Step) -> bool {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    match board.unit(uid).role.clone() {
        None => false,
        Some(Role::Recharge(_)) => !board.cell(cur).has_factory(),
        Some(Role::Cow(c)) => c.repair && board.unit(uid).class == RobotClass::Heavy,
        Some(Role::Attacker(a)) => a.low_power_target,
        Some(Role::WaterTransporter(_) | Role::Protector(_)) => true,
        Some(Role::Antagonizer(mut a)) => {
            super::antagonizer::can_destroy_factory(board, uid, &mut a, step)
        }
        Some(Role::Miner(m)) => {
            board.cell(m.resource_cell).ice
                && board.unit(uid).class == RobotClass::Heavy
                && board.get_factory(m.factory).is_some_and(|f| f.water[i] < 200)
                && board
                    .factory_units(m.factory, step)
                    .into_iter()
                    .filter(|&u| {
                        board.unit(u).class == RobotClass::Heavy
                            && matches!(&board.unit(u).role, Some(Role::Miner(x)) if board.cell(x.resource_cell).ice)
                    })
                    .count()
                    == 1
        }
        _ => false,
    }
}

/// Run down whoever is harassing our water couriers, or any courier of
/// theirs caught in the open.
pub fn from_transition_attack_water_courier(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    if i != 0 {
        return None;
    }
    if matches!(board.unit(uid).role.as_ref().map(Role::kind), Some(RoleKind::Blockade)) {
        return None;
    }
    if transition_exempt(board, uid, step) {
        return None;
    }
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let my_class = board.unit(uid).class;
    let my_power = board.unit(uid).power[i];

    // Units antagonizing our couriers first.
    for mine in board.my_units() {
        if !matches!(
            board.unit(mine).role.as_ref().map(Role::kind),
            Some(RoleKind::WaterTransporter)
        ) {
            continue;
        }
        let Some(ant) = board.is_antagonized(mine) else {
            continue;
        };
        let ant_cell = board.unit_cell(ant, board.step);
        if board.unit(ant).class == my_class
            && my_power >= board.unit(ant).power[i]
            && !board.cell(ant_cell).has_factory()
            && board.unit(ant).assigned_unit_id[i].is_none()
            && board.man_dist(cur, ant_cell) < 15
        {
            info!(unit = uid, target = ant, "attacking courier harasser");
            return Some(make(board, uid, step, factory, ant, None, true, false));
        }
    }

    // Then anything of theirs carrying water.
    for opp in board.opp_units() {
        let opp_cell = board.unit_cell(opp, board.step);
        if board.unit(opp).water[i] >= 5
            && board.unit(opp).class == my_class
            && my_power >= board.unit(opp).power[i]
            && !board.cell(opp_cell).has_factory()
            && board.unit(opp).assigned_unit_id[i].is_none()
            && board.man_dist(cur, opp_cell) < 15
        {
            info!(unit = uid, target = opp, "attacking water carrier");
            return Some(make(board, uid, step, factory, opp, None, true, false));
        }
    }
    None
}

/// Run down a stranded opposing unit whose return route we can cut.
pub fn from_transition_attack_low_power_unit(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    if i != 0 || transition_exempt(board, uid, step) {
        return None;
    }
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let my_class = board.unit(uid).class;
    let rules = board.rules.clone();

    for opp in board.opp_units() {
        let opp_unit = board.unit(opp).clone();
        if !opp_unit.low_power
            || opp_unit.class != my_class
            || opp_unit.assigned_unit_id[i].is_some()
            || opp_unit.low_power_route.len() < 2
        {
            continue;
        }
        let opp_spec = *opp_unit.spec(&rules);
        let destruct_cost = if opp_unit.class == RobotClass::Light {
            opp_spec.self_destruct_cost
        } else {
            opp_spec.dig_cost
        };
        if step >= 980 && opp_unit.power[0] < destruct_cost {
            continue;
        }
        let opp_cell = board.unit_cell(opp, board.step);
        // Chain miners fed by lights never actually strand.
        if opp_unit.class == RobotClass::Heavy
            && (board.cell(opp_cell).ice || board.cell(opp_cell).ore)
        {
            continue;
        }
        // The mission must be continuable by a blockade unit.
        if let Some(Role::Blockade(b)) = &board.unit(uid).role {
            if b.target_unit != Some(opp) {
                continue;
            }
            let min_rubble = board
                .neighbors(opp_cell)
                .into_iter()
                .map(|c| board.cell(c).rubble[0])
                .min()
                .unwrap_or(0);
            if opp_unit.power[0] >= opp_spec.move_power_cost(min_rubble) {
                continue;
            }
        }
        let opp_dist = board.man_dist(cur, opp_cell);
        if step >= 900 && my_class == RobotClass::Heavy && opp_dist > 10 {
            continue;
        }
        if 2 * opp_dist as u32 > 1000 - step {
            continue;
        }

        // If they can reach safety before we reach the cutoff, pass.
        let steps_until_safe = crate::unit::steps_until_power(
            opp_unit.power[0],
            opp_unit.low_power_threshold.min(i64::from(i32::MAX)) as i32,
            &opp_spec,
            rules.cycle_length,
            rules.day_length,
            board.step,
        ) + 1;
        let cutoff_start = opp_unit.low_power_route[opp_unit.low_power_route.len() - 2];
        if board.man_dist(cur, cutoff_start) >= steps_until_safe {
            continue;
        }

        // Walk their forced retreat to find where we actually meet them.
        let mut opp_power = opp_unit.power[i];
        let mut sim_cell = opp_cell;
        let mut route_idx = 1usize;
        let mut pursuit_step = step;
        let mut steps_delayed = 0;
        while steps_delayed < opp_dist && sim_cell != cutoff_start {
            let next_cell = opp_unit.low_power_route[route_idx.min(opp_unit.low_power_route.len() - 1)];
            let move_cost = opp_spec.move_power_cost(board.cell(next_cell).rubble[i]);
            if opp_power >= move_cost {
                sim_cell = next_cell;
                opp_power -= move_cost;
                route_idx += 1;
            } else {
                steps_delayed += 1;
            }
            opp_power += opp_unit.power_gain(&rules, pursuit_step);
            pursuit_step += 1;
        }
        let cutoff_cell = sim_cell;

        let spec = *board.unit(uid).spec(&rules);
        let threshold = 3 * i64::from(spec.action_queue_power_cost)
            + naive_cost(board, step, uid, cur, opp_cell, false)
            + naive_cost(board, step, uid, opp_cell, cutoff_cell, false)
            + naive_cost(board, step, uid, cutoff_cell, board.factory_center(factory), true);
        if i64::from(board.unit(uid).power[i]) > threshold {
            return Some(make(board, uid, step, factory, opp, None, true, false));
        }
    }
    None
}

/// Lock a two-unit pincer when a neighbor pair is already in position.
pub fn from_transition_attack_with_sidekick(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    if i != 0 {
        return None;
    }
    let pincer_exempt = |b: &mut Board, u: UnitId| -> bool {
        matches!(
            b.unit(u).role.as_ref().map(Role::kind),
            Some(
                RoleKind::Attacker
                    | RoleKind::Sidekick
                    | RoleKind::WaterTransporter
                    | RoleKind::Generator
                    | RoleKind::Protector
            )
        ) || transition_exempt(b, u, step)
    };
    if pincer_exempt(board, uid) {
        return None;
    }

    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let my_class = board.unit(uid).class;

    let mut opp_neighbors = Vec::new();
    let mut friendly_neighbors = Vec::new();
    for n in board.neighbors(cur) {
        let Some(other) = board.unit_at(n, step, None) else {
            continue;
        };
        if board.unit(other).class != my_class {
            continue;
        }
        if board.unit(other).team == board.me.id {
            if !pincer_exempt(board, other) {
                friendly_neighbors.push(other);
            }
        } else if !board.cell(n).has_factory() && board.unit(other).assigned_unit_id[i].is_none() {
            opp_neighbors.push(other);
        }
    }
    opp_neighbors.sort_by_key(|&u| board.unit(u).power[0]);
    friendly_neighbors.sort_by_key(|&u| std::cmp::Reverse(board.unit(u).power[0]));

    for opp in opp_neighbors {
        let opp_spec = *board.unit(opp).spec(&board.rules);
        let destruct_cost = if board.unit(opp).class == RobotClass::Light {
            opp_spec.self_destruct_cost
        } else {
            opp_spec.dig_cost
        };
        if step >= 980 && board.unit(opp).power[0] < destruct_cost {
            continue;
        }
        for &partner in &friendly_neighbors {
            if super::sidekick::in_position(board, step, partner, uid, opp) {
                let partner_factory = crate::roles::home_factory(board, partner, step);
                let sidekick_role = Role::Sidekick(super::sidekick::Sidekick {
                    factory: partner_factory,
                    attacker_unit: uid,
                    target_unit: opp,
                    goal: Goal::Unit(opp),
                });
                crate::roles::unit_set_role(board, partner, step, Some(sidekick_role));
                info!(attacker = uid, sidekick = partner, target = opp, "pincer locked");
                return Some(make(board, uid, step, factory, opp, Some(partner), false, false));
            }
        }
    }
    None
}

/// Chase trespassers off our lichen.
pub fn from_transition_defend_territory(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    max_count: usize,
) -> Option<Role> {
    let i = board.idx(step);
    if i != 0 {
        return None;
    }
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let my_class = board.unit(uid).class;
    if crate::roles::count_like_roles(board, factory, step, my_class, RoleKind::Attacker) + 1
        > max_count
    {
        return None;
    }

    let heavy_count = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| {
            board.unit(u).class == RobotClass::Heavy
                && !matches!(
                    board.unit(u).role.as_ref().map(Role::kind),
                    Some(RoleKind::Generator | RoleKind::Attacker)
                )
        })
        .count();
    let defense_exempt = match board.unit(uid).role.clone() {
        None => false,
        Some(Role::Attacker(_) | Role::Sidekick(_)) => true,
        Some(Role::Generator(_)) => step < board.config.end_phase,
        Some(Role::Miner(m)) => {
            board.unit(uid).class == RobotClass::Heavy && board.cell(m.resource_cell).ore
        }
        Some(Role::Relocate(r)) => board
            .get_factory(r.target_factory)
            .and_then(|f| f.mode.as_ref())
            .is_some_and(crate::modes::Mode::is_ice_conflict),
        _ => {
            board.unit(uid).class == RobotClass::Heavy
                && board
                    .factory(factory)
                    .mode
                    .as_ref()
                    .is_some_and(crate::modes::Mode::is_ice_conflict)
        }
    };
    if defense_exempt || transition_exempt(board, uid, step) {
        return None;
    }
    if board.unit(uid).role.is_none()
        && heavy_count == 1
        && board.factory(factory).water[i] < 250
    {
        return None;
    }

    // Scores scaled by 1000: distance plus a power fraction, water carriers
    // jump the queue.
    let mut best: Option<(i64, UnitId)> = None;
    for opp in board.opp_units() {
        let opp_cell = board.unit_cell(opp, board.step);
        let opp_dist = board.man_dist(opp_cell, cur);
        if board.unit(opp).class != my_class
            || opp_dist >= 10
            || board.cell(opp_cell).has_factory()
            || board.unit(opp).assigned_unit_id[i].is_some()
        {
            continue;
        }
        let opp_spec = *board.unit(opp).spec(&board.rules);
        let destruct_cost = if board.unit(opp).class == RobotClass::Light {
            opp_spec.self_destruct_cost
        } else {
            opp_spec.dig_cost
        };
        if step >= 980 && board.unit(opp).power[0] < destruct_cost {
            continue;
        }
        let carrying_water = board.unit(opp).water[0] >= 5;
        let on_our_ground = std::iter::once(opp_cell)
            .chain(board.neighbors(opp_cell))
            .any(|c| {
                board.cell(c).lichen_strain[i] == factory as i32
                    || board.cell(c).factory_id == Some(factory)
            })
            && board.man_dist_factory(opp_cell, factory)
                < board.nearest_factory_dist(opp_cell, Some(board.opp.id));
        if !carrying_water && !on_our_ground {
            continue;
        }
        // A trespasser already withdrawing will be gone before we arrive.
        if !carrying_water && board.is_retreating(opp, step) {
            continue;
        }
        let mut score = i64::from(opp_dist) * 1000
            + 3000 * i64::from(board.unit(opp).power[i]) / i64::from(opp_spec.battery_capacity);
        if carrying_water {
            score -= 10_000;
        }
        if best.map_or(true, |(bs, _)| score < bs) {
            best = Some((score, opp));
        }
    }
    best.map(|(_, opp)| make(board, uid, step, factory, opp, None, false, true))
}

pub(crate) fn is_valid(board: &mut Board, uid: UnitId, r: &mut Attacker, step: Step) -> bool {
    let i = board.idx(step);
    if !board.factories.contains_key(&r.factory) || !board.units.contains_key(&r.target_unit) {
        return false;
    }
    let opp_cell = board.unit_cell(r.target_unit, board.step);

    if i == 0 && step >= 980 && r.defender {
        let opp_spec = *board.unit(r.target_unit).spec(&board.rules);
        let destruct_cost = if board.unit(r.target_unit).class == RobotClass::Light {
            opp_spec.self_destruct_cost
        } else {
            opp_spec.dig_cost
        };
        if board.unit(r.target_unit).power[0] < destruct_cost {
            return false;
        }
    }

    let defender_ok = r.defender
        && (board.unit(r.target_unit).water[0] >= 5
            || std::iter::once(opp_cell).chain(board.neighbors(opp_cell)).any(|c| {
                board.cell(c).lichen_strain[i] == r.factory as i32
                    || board.cell(c).factory_id == Some(r.factory)
            })
            || board.man_dist_factory(opp_cell, r.factory)
                <= board.nearest_factory_dist(opp_cell, Some(board.opp.id)));
    let sidekick_ok = r.sidekick_unit.is_some_and(|s| {
        board
            .get_unit(s)
            .and_then(|u| u.role.as_ref())
            .is_some_and(|role| role.kind() == RoleKind::Sidekick)
    });
    let mut valid =
        !board.cell(opp_cell).has_factory() && (r.low_power_target || defender_ok || sidekick_ok);

    if valid {
        let f = board.factory(r.factory);
        let factory_water = f.water[i] + f.ice[i] / board.rules.ice_water_ratio;
        if factory_water < board.config.low_water_floor
            && board.unit(uid).class == RobotClass::Heavy
            && r.defender
        {
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
                valid = false;
            }
        }
    }

    // Promote to a stranded-target chase the moment they hit low power.
    if i == 0 && valid && board.unit(r.target_unit).low_power && !r.low_power_target {
        r.low_power_target = true;
        r.defender = false;
        r.sidekick_unit = None;
    }
    valid
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Attacker, step: Step) -> CellId {
    let cur = board.unit_cell(uid, step);
    if cur == board.factory_center(r.factory) {
        return board.unit_cell(r.target_unit, board.step);
    }
    // Unit goals track the target's last observed position.
    crate::roles::goal_target_cell(board, r.goal)
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Attacker, step: Step) {
    if r.goal == Goal::Unit(r.target_unit) {
        return;
    }
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let spec = *board.unit(uid).spec(&board.rules);
    let target_cell = board.unit_cell(r.target_unit, board.step);
    let threshold = if board.factory(r.factory).power[i] >= 5000 {
        i64::from(spec.battery_capacity - 100)
    } else {
        i64::from(spec.action_queue_power_cost)
            + naive_cost(board, step, uid, cur, target_cell, false)
            + i64::from(20 * spec.action_queue_power_cost)
            + i64::from(20 * spec.move_cost)
            + naive_cost(board, step, uid, target_cell, board.factory_center(r.factory), true)
    }
    .min(i64::from(spec.battery_capacity));
    if i64::from(board.unit(uid).power[i]) >= threshold {
        r.goal = Goal::Unit(r.target_unit);
    }
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Attacker,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let role = Role::Attacker(r.clone());
    match phase {
        Phase::Move => {
            let cur = board.unit_cell(uid, step);
            let opp_cell = board.unit_cell(r.target_unit, board.step);
            // Arriving on the target's square after a long chase: everything
            // after is chaos; stop telegraphing.
            if cur == opp_cell && board.man_dist(board.unit_cell(uid, board.step), opp_cell) >= 4 {
                board.unit_mut(uid).set_lie_step(step);
                return None;
            }
            let goal = goal_cell(board, uid, r, step);
            crate::roles::do_move_to(board, uid, step, goal, &role)
        }
        Phase::Dig => None,
        Phase::Pickup => crate::roles::do_power_pickup(board, uid, step, &role, None, None),
        Phase::Transfer => crate::roles::do_transfer_resource_to_factory(board, uid, step, &role),
    }
}

/// Opposing couriers may top up at a factory first; read the pickup out of
/// their public queue when estimating their staying power.
#[must_use]
pub fn projected_power(board: &Board, opp: UnitId) -> i32 {
    let unit = board.unit(opp);
    let spec = unit.spec(&board.rules);
    let mut power = unit.power[0];
    for a in unit.action_queue.iter().take(5) {
        if a.kind == ActionKind::Pickup && a.resource == Resource::Power {
            power = (power + a.amount).min(spec.battery_capacity);
        }
    }
    power
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attacker_flags_roundtrip() {
        let a = Attacker {
            factory: 1,
            target_unit: 2,
            sidekick_unit: Some(3),
            low_power_target: true,
            defender: false,
            goal: Goal::Unit(2),
        };
        let bytes = bincode::serialize(&a).unwrap();
        let back: Attacker = bincode::deserialize(&bytes).unwrap();
        assert!(back.low_power_target);
        assert_eq!(back.sidekick_unit, Some(3));
    }
}
