//! Antagonizer: camp an opposing mining cell (or shadow a rival factory's
//! workforce) to shut its resource flow down.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::pathfinding::naive_cost;
use crate::roles::{handle_displaced_unit, Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;
use crate::unit::unit_mines;

/// Denial role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Antagonizer {
    /// Home factory.
    pub factory: FactoryId,
    /// The opposing resource cell being denied.
    pub target_cell: CellId,
    /// Set when harassing a light supply chain rather than a mine.
    pub chain: bool,
    /// When set, the role retargets within this rival factory's operation.
    pub target_factory: Option<FactoryId>,
    /// Current sub-destination.
    pub goal: Goal,

    /// Memoized attrition verdict for the current snapshot.
    #[serde(skip)]
    pub can_destroy_cached: Option<bool>,
}

fn make(board: &Board, uid: UnitId, step: Step, factory: FactoryId, cell: CellId, chain: bool, target_factory: Option<FactoryId>) -> Role {
    let cur = board.unit_cell(uid, step);
    let goal = if board.man_dist(cur, cell) < board.man_dist_factory(cur, factory) {
        Goal::Cell(cell)
    } else {
        Goal::Factory(factory)
    };
    Role::Antagonizer(Antagonizer {
        factory,
        target_cell: cell,
        chain,
        target_factory,
        goal,
        can_destroy_cached: None,
    })
}

/// Deny the nearest opposing mine of our weight class.
pub fn from_mine(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    max_dist: i32,
    ice: Option<bool>,
    max_count: usize,
    max_water: Option<i32>,
) -> Option<Role> {
    let i = board.idx(step);
    let factory = crate::roles::home_factory(board, uid, step);
    let class = board.unit(uid).class;
    if max_count < 100
        && crate::roles::count_like_roles(board, factory, step, class, RoleKind::Antagonizer) + 1
            > max_count
    {
        return None;
    }

    let heavy = class == RobotClass::Heavy;
    let mines = board.opp_mines(Some(heavy), ice);
    let mut best: Option<(i32, CellId)> = None;
    for cell in mines {
        if let (Some(true), Some(max_water)) = (ice, max_water) {
            // Only worth starving factories that are already thirsty.
            let Some(opp_factory) = board.nearest_factory(cell, Some(board.opp.id)) else {
                continue;
            };
            let f = board.factory(opp_factory);
            let heavies_ice: i32 = board
                .factory_units(opp_factory, step)
                .into_iter()
                .filter(|&u| board.unit(u).class == RobotClass::Heavy)
                .map(|u| board.unit(u).ice[i])
                .sum();
            let water = f.water[i] + (f.ice[i] + heavies_ice) / board.rules.ice_water_ratio;
            if water > max_water {
                continue;
            }
        }
        let dist = board.man_dist_factory(cell, factory);
        let can_take = board.assigned_unit(cell, step).map_or(true, |a| {
            heavy && board.unit(a).class == RobotClass::Light
        });
        if dist <= max_dist && can_take && best.map_or(true, |(bd, _)| dist < bd) {
            best = Some((dist, cell));
        }
    }
    best.map(|(_, cell)| {
        handle_displaced_unit(board, step, cell);
        make(board, uid, step, factory, cell, false, None)
    })
}

/// A light camps a stationary opposing supply-chain link.
pub fn from_chain(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    max_dist: i32,
    max_count: usize,
) -> Option<Role> {
    if board.unit(uid).class == RobotClass::Heavy {
        return None;
    }
    let i = board.idx(step);
    let factory = crate::roles::home_factory(board, uid, step);
    if max_count < 100 {
        let like = board
            .factory_units(factory, step)
            .into_iter()
            .filter(|&u| {
                board.unit(u).class == RobotClass::Light
                    && matches!(&board.unit(u).role, Some(Role::Antagonizer(a)) if a.chain)
            })
            .count();
        if 1 + like > max_count {
            return None;
        }
    }

    let mut best: Option<(i32, CellId)> = None;
    for opp in board.opp_units() {
        if !board.is_chain(opp) {
            continue;
        }
        let cell = board.unit_cell(opp, board.step);
        let dist = board.man_dist_factory(cell, factory);
        if dist <= max_dist
            && board.assigned_unit(cell, step).is_none()
            && best.map_or(true, |(bd, _)| dist < bd)
        {
            best = Some((dist, cell));
        }
    }
    best.map(|(_, cell)| {
        if i == 0 {
            info!(unit = uid, cell, "antagonizing supply chain");
        }
        make(board, uid, step, factory, cell, true, None)
    })
}

/// Ice-conflict opener: pick the most damaging denial cell at the rival.
pub fn from_factory(board: &mut Board, uid: UnitId, step: Step, target_factory: FactoryId) -> Option<Role> {
    if !board.factories.contains_key(&target_factory) {
        return None;
    }
    let factory = crate::roles::home_factory(board, uid, step);
    let cell = target_cell_from_target_factory(board, uid, step, target_factory, None)?;
    handle_displaced_unit(board, step, cell);
    Some(make(board, uid, step, factory, cell, false, Some(target_factory)))
}

/// A factory-tracking antagonizer retargets each real turn as the rival's
/// mining pattern shifts.
pub fn from_transition_retarget(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    if step != board.step {
        return None;
    }
    let Some(Role::Antagonizer(a)) = board.unit(uid).role.clone() else {
        return None;
    };
    let target_factory = a.target_factory?;
    if !board.factories.contains_key(&target_factory) {
        return None;
    }
    match target_cell_from_target_factory(board, uid, step, target_factory, Some(a.target_cell)) {
        Some(cell) if cell != a.target_cell => {
            handle_displaced_unit(board, step, cell);
            Some(make(board, uid, step, a.factory, cell, false, Some(target_factory)))
        }
        Some(_) => None,
        None => Some(super::recharge::new(a.factory)),
    }
}

/// Score the rival's recent and queued mining sites and take the best one.
fn target_cell_from_target_factory(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    target_factory: FactoryId,
    prev_target_cell: Option<CellId>,
) -> Option<CellId> {
    let class = board.unit(uid).class;
    let factory = crate::roles::home_factory(board, uid, step);

    let mut opp_units: Vec<UnitId> = board
        .factory_units(target_factory, step)
        .into_iter()
        .filter(|&u| board.unit(u).class == class)
        .collect();
    if opp_units.is_empty() {
        let center = board.factory_center(target_factory);
        for (cell, _) in board.radius_cells(center, 0, 4) {
            if let Some(opp) = board.unit_at(cell, board.step, Some(board.opp.id)) {
                if board.unit(opp).class == class {
                    opp_units.push(opp);
                }
            }
        }
    }

    // Scores scaled by 10: ice mines count 100x ore.
    let mut scores: BTreeMap<CellId, i64> = BTreeMap::new();
    for opp in opp_units {
        for cell in unit_mines(board, opp, 0, 10, None) {
            *scores.entry(cell).or_insert(0) += if board.cell(cell).ice { 1000 } else { 100 };
        }
        for cell in unit_mines(board, opp, 15, 0, Some(true)) {
            *scores.entry(cell).or_insert(0) += 100;
        }
        for cell in unit_mines(board, opp, 3, 0, Some(false)) {
            *scores.entry(cell).or_insert(0) += 10;
        }
    }
    if let Some(prev) = prev_target_cell {
        let pc = board.cell(prev);
        if (pc.ice || pc.ore) && !board.threat_units(prev, 1, 1, true, false).is_empty() {
            *scores.entry(prev).or_insert(0) += if pc.ice { 1000 } else { 100 };
        }
    }

    let mut best: Option<(i64, CellId)> = None;
    for (&cell, &score) in &scores {
        let can_take = board.assigned_unit(cell, step).map_or(true, |a| {
            a == uid || (class == RobotClass::Heavy && board.unit(a).class == RobotClass::Light)
        });
        if !can_take {
            continue;
        }
        let mut deny_score = score;
        for n in std::iter::once(cell).chain(board.neighbors(cell)) {
            if board.cell(n).ice {
                deny_score += 10;
            } else if board.cell(n).ore {
                deny_score += 1;
            }
        }
        let total = deny_score
            - 10 * i64::from(board.man_dist_factory(cell, factory))
            - i64::from(board.cell(cell).rubble[0]) / 10;
        if best.map_or(true, |(bs, _)| total > bs) {
            best = Some((total, cell));
        }
    }
    best.map(|(_, cell)| cell)
}

/// Whether a heavy parked on this ice cell can starve the rival factory
/// before the match ends: power-funded oscillation steps versus the rival's
/// projected water.
pub(crate) fn can_destroy_factory(
    board: &mut Board,
    uid: UnitId,
    r: &mut Antagonizer,
    step: Step,
) -> bool {
    if let Some(cached) = r.can_destroy_cached {
        return cached;
    }
    r.can_destroy_cached = Some(false);
    if board.unit(uid).class != RobotClass::Heavy || !board.cell(r.target_cell).ice {
        return false;
    }
    // An offensive ice conflict stays patient; attrition math is for the
    // defensive case.
    if board
        .get_factory(r.factory)
        .and_then(|f| f.mode.as_ref())
        .is_some_and(|m| m.is_ice_conflict() && !m.is_defensive_ice_conflict())
    {
        return false;
    }
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    if board.man_dist(cur, r.target_cell) > 2 {
        return false;
    }
    let Some(opp_factory) = r
        .target_factory
        .filter(|f| board.factories.contains_key(f))
        .or_else(|| board.nearest_factory(r.target_cell, Some(board.opp.id)))
    else {
        return false;
    };
    let resource_dist = board.man_dist_factory(r.target_cell, opp_factory);
    let nearest_ice_dist = board
        .factory(opp_factory)
        .resource_routes
        .iter()
        .find(|route| board.cell(*route.last().expect("non-empty")).ice)
        .map(|route| route.len() as i32 - 1);
    if nearest_ice_dist.is_some_and(|d| resource_dist > d) {
        return false;
    }

    let spec = *board.unit(uid).spec(&board.rules);
    let min_neighbor_rubble = board
        .neighbors(r.target_cell)
        .into_iter()
        .filter(|&c| !board.cell(c).has_factory())
        .map(|c| board.cell(c).rubble[i])
        .min()
        .unwrap_or(0);
    let oscillate_cost = (i64::from(board.cell(r.target_cell).rubble[i])
        + i64::from(min_neighbor_rubble)
        + i64::from(2 * spec.move_cost))
        / 2;
    if oscillate_cost == 0 {
        return false;
    }

    let opp_units = board.factory_units(opp_factory, step);
    let (opp_water, opp_ice): (i32, i32) = opp_units.iter().fold((0, 0), |(w, ic), &u| {
        (w + board.unit(u).water[i], ic + board.unit(u).ice[i])
    });
    let f = board.factory(opp_factory);
    let water = i64::from(f.water[i])
        + i64::from(opp_water)
        + i64::from(f.ice[i] + opp_ice) / i64::from(board.rules.ice_water_ratio);
    let step_count = i64::from(board.unit(uid).power[i]) / oscillate_cost;
    if i64::from(step) + step_count >= 1000 {
        return false;
    }
    // Assume a rival light keeps trickling ice in; 0.4 water per step.
    let water = water + 2 * step_count / 5;
    let verdict = step_count >= water;
    r.can_destroy_cached = Some(verdict);
    if i == 0 && verdict {
        info!(unit = uid, factory = opp_factory, step_count, water, "antagonizer can starve factory");
    }
    verdict
}

pub(crate) fn is_valid(board: &mut Board, uid: UnitId, r: &mut Antagonizer, step: Step) -> bool {
    if !board.factories.contains_key(&r.factory) {
        return false;
    }
    let i = board.idx(step);
    if i > 0 || r.target_factory.is_some() || can_destroy_factory(board, uid, r, step) {
        return true;
    }

    // A heavy seizing a cell a light is antagonizing ends the act.
    if board.unit(uid).class == RobotClass::Light && step >= 2 {
        let history = &board.cell(r.target_cell).unit_history;
        if let Some(h) = history[step as usize] {
            let held_three = history[(step - 1) as usize] == Some(h)
                && history[(step - 2) as usize] == Some(h);
            if held_three
                && board
                    .get_unit(h)
                    .is_some_and(|u| u.team == board.opp.id && u.class == RobotClass::Heavy)
            {
                return false;
            }
        }
    }

    let mut opp_here_recently = false;
    let lo = board.step.saturating_sub(14);
    for s in (lo..=board.step).rev() {
        if let Some(h) = board.cell(r.target_cell).unit_history[s as usize] {
            if board.get_unit(h).is_some_and(|u| u.team == board.opp.id) {
                opp_here_recently = true;
                break;
            }
        }
    }
    let heavy = board.unit(uid).class == RobotClass::Heavy;
    opp_here_recently || board.opp_mines(Some(heavy), None).contains(&r.target_cell)
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Antagonizer, step: Step) -> CellId {
    let cur = board.unit_cell(uid, step);
    if cur == board.factory_center(r.factory) {
        return r.target_cell;
    }
    match r.goal {
        Goal::Cell(goal) => {
            // Adjacent and unthreatened: hold position, make them come to us.
            let hugging_home = r.target_factory.is_some()
                && board.man_dist_factory(goal, r.factory) == 1;
            if board.man_dist(cur, goal) == 1 && !hugging_home {
                let my_class = board.unit(uid).class;
                let threatened = std::iter::once(cur).chain(board.neighbors(cur)).any(|n| {
                    board
                        .unit_at(n, board.step, Some(board.opp.id))
                        .is_some_and(|o| board.unit(o).class == my_class)
                });
                if !threatened {
                    return cur;
                }
            }
            goal
        }
        Goal::Factory(f) => board.factory_center(f),
        Goal::Unit(u) => board.unit_cell(u, board.step),
    }
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Antagonizer, step: Step) {
    let i = board.idx(step);
    let spec = *board.unit(uid).spec(&board.rules);
    let cur = board.unit_cell(uid, step);
    let unit_power = board.unit(uid).power[i];
    let unit_resource = board.unit(uid).ice[i].max(board.unit(uid).ore[i]);

    if r.goal == Goal::Cell(r.target_cell) {
        if unit_resource >= spec.cargo_space / 2 {
            r.goal = Goal::Factory(r.factory);
        }
    } else {
        let ice_conflict = board
            .factory(r.factory)
            .mode
            .as_ref()
            .is_some_and(crate::modes::Mode::is_ice_conflict);
        let power_threshold: i64 = if ice_conflict
            && step < 10
            && board.unit(uid).class == RobotClass::Heavy
        {
            // Force a pickup before heading out at match start.
            600
        } else if ice_conflict
            && board.cell(cur).has_factory()
            && unit_power < 2000
            && board.factory(r.factory).power[i] >= 500
        {
            i64::from(unit_power) + 1
        } else {
            let min_moves = if ice_conflict { 10 } else { 40 };
            i64::from(spec.action_queue_power_cost)
                + naive_cost(board, step, uid, cur, r.target_cell, false)
                + i64::from(min_moves * spec.move_cost)
                + naive_cost(board, step, uid, r.target_cell, board.factory_center(r.factory), true)
        };
        let power_threshold = power_threshold.min(i64::from(spec.battery_capacity));
        if i64::from(unit_power) >= power_threshold && unit_resource < spec.cargo_space / 5 {
            r.goal = Goal::Cell(r.target_cell);
        }
    }
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Antagonizer,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let role = Role::Antagonizer(r.clone());
    match phase {
        Phase::Move => {
            let goal = goal_cell(board, uid, r, step);
            crate::roles::do_move_to(board, uid, step, goal, &role)
        }
        Phase::Dig => {
            // Factory-tracking antagonizers mine the cell they deny, only on
            // alternate steps when far from home so the denial stays primary.
            let cur = board.unit_cell(uid, step);
            let home_dist = board.man_dist_factory(cur, r.factory);
            if r.target_factory.is_none()
                || (!board.cell(cur).ice && !board.cell(cur).ore)
                || (home_dist > 1 && step % 2 != 0)
            {
                return None;
            }
            let goal = goal_cell(board, uid, r, step);
            let opp_dist = board.nearest_factory_dist(cur, Some(board.opp.id));
            if cur == goal && (home_dist < opp_dist || board.cell(cur).rubble[i] == 0) {
                if board.unit(uid).power[i] >= board.unit_dig_cost(uid, step) {
                    if i == 0 {
                        debug!(unit = uid, "antagonizer opportunistic dig");
                    }
                    return board.unit_do_dig(uid, step);
                }
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
    fn test_cached_verdict_not_persisted() {
        let a = Antagonizer {
            factory: 0,
            target_cell: 3,
            chain: false,
            target_factory: None,
            goal: Goal::Cell(3),
            can_destroy_cached: Some(true),
        };
        let bytes = bincode::serialize(&a).unwrap();
        let back: Antagonizer = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.can_destroy_cached, None);
    }
}
