//! Water transporter: ferry water (or ice) from a healthy factory to a
//! starving one, usually an ice-conflict factory.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::actions::Resource;
use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::pathfinding::naive_cost;
use crate::roles::{Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Factory-to-factory water shuttle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterTransporter {
    /// The factory being kept alive.
    pub factory: FactoryId,
    /// The factory water is drawn from.
    pub target_factory: FactoryId,
    /// Current sub-destination.
    pub goal: Goal,
}

impl WaterTransporter {
    /// Whether the unit is outbound toward the source factory.
    #[must_use]
    pub fn goal_is_target(&self) -> bool {
        self.goal == Goal::Factory(self.target_factory)
    }
}

fn water_threshold(board: &Board, r: &WaterTransporter) -> i32 {
    let dist = board.man_dist_factory(board.factory_center(r.factory), r.target_factory);
    (3 * dist / 2).clamp(10, 100)
}

/// A light at an ice-conflict factory becomes a water courier when reserves
/// dip.
pub fn from_transition_ice_conflict_factory(
    board: &mut Board,
    uid: UnitId,
    step: Step,
) -> Option<Role> {
    if board.unit(uid).class != RobotClass::Light {
        return None;
    }
    let factory = crate::roles::home_factory(board, uid, step);
    if !board
        .factory(factory)
        .mode
        .as_ref()
        .is_some_and(crate::modes::Mode::is_ice_conflict)
    {
        return None;
    }
    if matches!(
        board.unit(uid).role.as_ref().map(Role::kind),
        Some(RoleKind::Blockade | RoleKind::WaterTransporter)
    ) {
        return None;
    }
    from_ice_conflict_factory(board, uid, step, factory, 125)
}

/// Pick the best donor factory for a starving one.
pub fn from_ice_conflict_factory(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    factory: FactoryId,
    water_floor: i32,
) -> Option<Role> {
    let i = board.idx(step);
    if board.factory(factory).water[i] >= water_floor {
        return None;
    }

    let existing: Vec<FactoryId> = board
        .factory_units(factory, step)
        .into_iter()
        .filter_map(|u| match &board.unit(u).role {
            Some(Role::WaterTransporter(wt)) => Some(wt.target_factory),
            _ => None,
        })
        .collect();
    if existing.len() >= 2 {
        return None;
    }

    let factory_water = board.factory(factory).water[i];
    let center = board.factory_center(factory);
    let mut best: Option<(FactoryId, i64)> = None;
    for other in board.my_factories() {
        if other == factory
            || board
                .factory(other)
                .mode
                .as_ref()
                .is_some_and(crate::modes::Mode::is_ice_conflict)
        {
            continue;
        }
        let dist = i64::from(board.man_dist_factory(center, other));
        let income = board.factory_water_income(other, step, None);
        let income_score = (income * crate::math::Fixed::from_num(20)).floor().to_num::<i64>();
        // Scores scaled by 1000 for the fixed-point income term.
        let mut score = (income_score - dist) * 1000;
        if 2 * dist + 50 > i64::from(factory_water) {
            score -= (2 * dist + 50 - i64::from(factory_water)) * 3000;
        }
        if 2 * dist > i64::from(factory_water) {
            score -= 1_000_000;
        }
        if existing.contains(&other) {
            score -= 100_000;
        }
        if best.map_or(true, |(_, bs)| score > bs) {
            best = Some((other, score));
        }
    }
    best.map(|(target, _)| {
        Role::WaterTransporter(WaterTransporter { factory, target_factory: target, goal: Goal::Factory(factory) })
    })
}

pub(crate) fn is_valid(board: &mut Board, uid: UnitId, r: &mut WaterTransporter, step: Step) -> bool {
    let i = board.idx(step);
    if !board.factories.contains_key(&r.factory) || !board.factories.contains_key(&r.target_factory)
    {
        return false;
    }
    if board
        .factory(r.target_factory)
        .mode
        .as_ref()
        .is_some_and(crate::modes::Mode::is_ice_conflict)
    {
        return false;
    }
    // After dropping the delivery off, stand down if the crisis has passed.
    let ice_conflict_home = board
        .factory(r.factory)
        .mode
        .as_ref()
        .is_some_and(crate::modes::Mode::is_ice_conflict);
    if r.goal == Goal::Factory(r.factory)
        && board.unit(uid).ice[i] == 0
        && board.unit(uid).water[i] == 0
        && (!ice_conflict_home || board.factory(r.factory).water[i] >= 130)
    {
        return false;
    }
    true
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &WaterTransporter, step: Step) -> CellId {
    let cur = board.unit_cell(uid, step);
    if cur == board.factory_center(r.factory) {
        return board.factory_center(r.target_factory);
    }
    crate::roles::goal_target_cell(board, r.goal)
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut WaterTransporter, step: Step) {
    let i = board.idx(step);
    let spec = *board.unit(uid).spec(&board.rules);
    let power_threshold = (2 * naive_cost(
        board,
        step,
        uid,
        board.factory_center(r.factory),
        board.factory_center(r.target_factory),
        false,
    ))
    .min(i64::from(9 * spec.battery_capacity / 10)) as i32;
    let threshold = water_threshold(board, r);
    let unit_water =
        board.unit(uid).water[i] + board.unit(uid).ice[i] / board.rules.ice_water_ratio;

    if r.goal == Goal::Factory(r.target_factory) {
        if unit_water >= threshold && board.unit(uid).power[i] >= power_threshold {
            r.goal = Goal::Factory(r.factory);
        }
    } else if unit_water == 0 && board.unit(uid).power[i] >= power_threshold {
        r.goal = Goal::Factory(r.target_factory);
    }
}

/// Whether the home factory is about to die and the courier must sprint.
pub(crate) fn emergency(board: &Board, uid: UnitId, r: &WaterTransporter, step: Step) -> bool {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let dist = board.man_dist_factory(cur, r.factory);
    let water = board.factory(r.factory).water[i];
    board.unit(uid).water[i] > 0 && water <= dist && dist < water + 5
}

fn do_pickup_water(
    board: &mut Board,
    uid: UnitId,
    r: &WaterTransporter,
    step: Step,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let cur_factory = board.cell(cur).factory_id?;
    let threshold = water_threshold(board, r);
    let unit_water =
        board.unit(uid).water[i] + board.unit(uid).ice[i] / board.rules.ice_water_ratio;
    if cur_factory != r.target_factory || board.cell(cur).factory_center || unit_water >= threshold {
        return None;
    }

    let amount = threshold - unit_water;
    let ice_amount =
        (amount * board.rules.ice_water_ratio).min(board.factory(cur_factory).ice[i]);
    // Prefer ice when the donor has it spare: it hides the water run from the
    // public queue a little longer.
    if ice_amount > 0
        && ice_amount <= 100
        && ice_amount == amount * board.rules.ice_water_ratio
        && board.unit(uid).water[i] == 0
    {
        let cost = board.unit_pickup_cost(uid, step, Resource::Ice, ice_amount);
        if board.unit(uid).power[i] >= cost {
            if i == 0 {
                debug!(unit = uid, amount = ice_amount, "water courier picks up ice");
            }
            return board.unit_do_pickup(uid, step, Resource::Ice, ice_amount);
        }
    }

    let water_amount = amount.min(board.factory(cur_factory).water[i] - 30);
    if water_amount > 0 {
        let cost = board.unit_pickup_cost(uid, step, Resource::Water, water_amount);
        if board.unit(uid).power[i] >= cost {
            return board.unit_do_pickup(uid, step, Resource::Water, water_amount);
        }
        None
    } else {
        board.unit_do_no_move(uid, step)
    }
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut WaterTransporter,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let role = Role::WaterTransporter(r.clone());
    match phase {
        Phase::Move => {
            let goal = goal_cell(board, uid, r, step);
            crate::roles::do_move_to(board, uid, step, goal, &role)
        }
        Phase::Dig => None,
        Phase::Pickup => do_pickup_water(board, uid, r, step).or_else(|| {
            let alternate = r.goal_is_target().then_some(r.target_factory);
            crate::roles::do_power_pickup(board, uid, step, &role, alternate, None)
        }),
        Phase::Transfer => crate::roles::do_transfer_resource_to_factory(board, uid, step, &role),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_is_target() {
        let wt = WaterTransporter { factory: 1, target_factory: 2, goal: Goal::Factory(2) };
        assert!(wt.goal_is_target());
        let wt = WaterTransporter { factory: 1, target_factory: 2, goal: Goal::Factory(1) };
        assert!(!wt.goal_is_target());
    }
}
