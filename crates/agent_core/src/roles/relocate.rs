//! Relocate: one-way transfer of a unit to a factory that needs it more.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::math::Fixed;
use crate::pathfinding::naive_cost;
use crate::roles::{Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Relocation role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relocate {
    /// The factory being left.
    pub factory: FactoryId,
    /// The factory being joined.
    pub target_factory: FactoryId,
    /// Current sub-destination.
    pub goal: Goal,
}

fn make(factory: FactoryId, target: FactoryId) -> Role {
    Role::Relocate(Relocate { factory, target_factory: target, goal: Goal::Factory(factory) })
}

fn relocating_to(board: &Board, target: FactoryId, class: RobotClass) -> usize {
    board
        .my_units()
        .into_iter()
        .filter(|&u| {
            board.unit(u).class == class
                && matches!(&board.unit(u).role, Some(Role::Relocate(r)) if r.target_factory == target)
        })
        .count()
}

/// Forge factories shed surplus lights to whoever can feed them.
pub fn from_forge(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    if board.unit(uid).class != RobotClass::Light {
        return None;
    }
    let factory = crate::roles::home_factory(board, uid, step);
    if !board
        .factory(factory)
        .mode
        .as_ref()
        .is_some_and(crate::modes::Mode::is_forge)
    {
        return None;
    }
    let like = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| board.unit(u).class == RobotClass::Light)
        .count();
    if like <= 4 {
        return None;
    }

    let center = board.factory_center(factory);
    let mut best: Option<(i32, FactoryId)> = None;
    for other in board.my_factories() {
        if other == factory {
            continue;
        }
        let mode = board.factory(other).mode.clone();
        if mode.as_ref().is_some_and(crate::modes::Mode::is_forge) {
            continue;
        }
        let light_lim = if mode.as_ref().is_some_and(crate::modes::Mode::is_ice_conflict) {
            8
        } else {
            board.config.light_limit_at(step) as usize
        };
        let there = board
            .factory_units(other, step)
            .into_iter()
            .filter(|&u| board.unit(u).class == RobotClass::Light)
            .count()
            + relocating_to(board, other, RobotClass::Light);
        if there >= light_lim {
            continue;
        }
        let dist = board.man_dist(center, board.factory_center(other));
        if best.map_or(true, |(bd, _)| dist < bd) {
            best = Some((dist, other));
        }
    }
    best.map(|(_, target)| make(factory, target))
}

fn factory_power_income(board: &Board, fid: FactoryId) -> Fixed {
    Fixed::from_num(board.factory(fid).power_gain_cache) - board.factory(fid).power_usage_cache
}

/// Leave a power-starved factory for one with a deep surplus.
pub fn from_power_surplus(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    let factory = crate::roles::home_factory(board, uid, step);
    let class = board.unit(uid).class;

    let factory_power =
        board.factory(factory).power[i] - board.factory_power_reserved(factory, step);
    if factory_power >= 3000 || factory_power_income(board, factory) > Fixed::ZERO {
        return None;
    }

    let (unit_threshold, relocate_lim) = if class == RobotClass::Heavy {
        (3, 1)
    } else {
        (board.config.light_limit_at(step) as usize - 2, 2)
    };
    let like: Vec<UnitId> = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| board.unit(u).class == class)
        .collect();
    if like.len() < unit_threshold {
        return None;
    }
    let leaving = like
        .iter()
        .filter(|&&u| {
            board.unit(u).role.as_ref().is_some_and(|r| r.kind() == RoleKind::Relocate)
        })
        .count();
    if leaving >= relocate_lim {
        return None;
    }

    let center = board.factory_center(factory);
    let mut best: Option<(i32, FactoryId)> = None;
    for other in board.my_factories() {
        if other == factory {
            continue;
        }
        let f_power = board.factory(other).power[i] - board.factory_power_reserved(other, step);
        if f_power < 4000 || factory_power_income(board, other) < Fixed::from_num(20) {
            continue;
        }
        let dist = board.man_dist(center, board.factory_center(other));
        if best.map_or(true, |(bd, _)| dist < bd) {
            best = Some((dist, other));
        }
    }
    best.map(|(_, target)| {
        if i == 0 {
            info!(unit = uid, from = factory, to = target, "relocating for power");
        }
        make(factory, target)
    })
}

/// Late-game idle units fan out to factories with nothing spare on hand.
pub fn from_idle(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    let factory = crate::roles::home_factory(board, uid, step);
    let class = board.unit(uid).class;

    let relocate_lim = if class == RobotClass::Heavy { 1 } else { 2 };
    let leaving = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| {
            board.unit(u).class == class
                && board.unit(u).role.as_ref().is_some_and(|r| r.kind() == RoleKind::Relocate)
        })
        .count();
    if leaving >= relocate_lim {
        return None;
    }

    let center = board.factory_center(factory);
    let mut best: Option<(i32, FactoryId)> = None;
    for other in board.my_factories() {
        if other == factory {
            continue;
        }
        let has_idle = board.factory_units(other, step).into_iter().any(|u| {
            board.unit(u).class == class
                && match &board.unit(u).role {
                    Some(Role::Recharge(_)) => {
                        board.cell(board.unit_cell(u, step)).has_factory()
                    }
                    Some(Role::Relocate(_)) => true,
                    _ => false,
                }
        });
        if has_idle {
            continue;
        }
        let f_power = board.factory(other).power[i] - board.factory_power_reserved(other, step);
        if f_power < 4000 && factory_power_income(board, other) < Fixed::from_num(20) {
            continue;
        }
        let dist = board.man_dist(center, board.factory_center(other));
        if best.map_or(true, |(bd, _)| dist < bd) {
            best = Some((dist, other));
        }
    }
    best.map(|(_, target)| {
        if i == 0 {
            info!(unit = uid, from = factory, to = target, "relocating idle unit");
        }
        make(factory, target)
    })
}

/// A heavy with siblings on ice goes to reinforce a struggling factory.
pub fn from_transition_assist_ice_conflict(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    if board.unit(uid).class == RobotClass::Light {
        return None;
    }
    let exempt = match board.unit(uid).role.clone() {
        None => false,
        Some(Role::Recharge(_)) => !board.cell(board.unit_cell(uid, step)).has_factory(),
        Some(Role::Cow(c)) => c.repair,
        Some(Role::Attacker(a)) => a.low_power_target,
        Some(Role::Antagonizer(mut a)) => {
            super::antagonizer::can_destroy_factory(board, uid, &mut a, step)
        }
        Some(Role::Relocate(r)) => board
            .get_factory(r.target_factory)
            .and_then(|f| f.mode.as_ref())
            .is_some_and(crate::modes::Mode::is_ice_conflict),
        Some(Role::Protector(_)) => true,
        _ => false,
    };
    if exempt {
        return None;
    }
    let factory = crate::roles::home_factory(board, uid, step);
    let other_heavies: Vec<UnitId> = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| u != uid && board.unit(u).class == RobotClass::Heavy)
        .collect();
    let has_ice_miner = other_heavies.iter().any(|&u| {
        matches!(&board.unit(u).role, Some(Role::Miner(m)) if board.cell(m.resource_cell).ice)
    });
    if !has_ice_miner {
        return None;
    }
    let opp_dist =
        board.nearest_factory_dist(board.factory_center(factory), Some(board.opp.id));
    if other_heavies.len() <= 1 && opp_dist < 10 {
        return None;
    }
    from_assist_ice_conflict(board, uid, step)
}

/// Send a unit toward a defensive ice conflict or a heavy-less factory.
pub fn from_assist_ice_conflict(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    if step < 10 {
        return None;
    }
    let factory = crate::roles::home_factory(board, uid, step);
    if board
        .factory(factory)
        .mode
        .as_ref()
        .is_some_and(crate::modes::Mode::is_ice_conflict)
    {
        return None;
    }
    let class = board.unit(uid).class;
    let center = board.factory_center(factory);
    let mut best: Option<(i32, FactoryId)> = None;
    for other in board.my_factories() {
        if other == factory {
            continue;
        }
        let likes = board
            .factory_units(other, step)
            .into_iter()
            .filter(|&u| board.unit(u).class == class)
            .count()
            + relocating_to(board, other, class);
        let mode = board.factory(other).mode.clone();
        let is_ice_conflict = mode.as_ref().is_some_and(crate::modes::Mode::is_ice_conflict);
        let is_defensive =
            mode.as_ref().is_some_and(crate::modes::Mode::is_defensive_ice_conflict);
        let wanted = (class == RobotClass::Heavy && likes == 0)
            || (class == RobotClass::Heavy && is_defensive && likes < 2)
            || (class == RobotClass::Light && is_ice_conflict && likes < 4);
        if !wanted {
            continue;
        }
        let dist = board.man_dist(center, board.factory_center(other));
        if best.map_or(true, |(bd, _)| dist < bd) {
            best = Some((dist, other));
        }
    }
    best.map(|(_, target)| {
        if board.idx(step) == 0 {
            info!(unit = uid, from = factory, to = target, "relocating to assist");
        }
        make(factory, target)
    })
}

pub(crate) fn is_valid(board: &mut Board, uid: UnitId, r: &mut Relocate, step: Step) -> bool {
    if !board.factories.contains_key(&r.target_factory) {
        return false;
    }
    if !board.factories.contains_key(&r.factory) {
        // Source factory exploded mid-trip; adopt the destination and let the
        // assignment loop find new work there.
        board.unit_mut(uid).assigned_factory = Some(r.target_factory);
        return false;
    }
    let cur = board.unit_cell(uid, step);
    if r.goal == Goal::Factory(r.target_factory)
        && board.man_dist_factory(cur, r.target_factory) <= 1
    {
        board.unit_mut(uid).assigned_factory = Some(r.target_factory);
        return false;
    }
    true
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Relocate, step: Step) -> CellId {
    let cur = board.unit_cell(uid, step);
    if cur == board.factory_center(r.factory) {
        return board.factory_center(r.target_factory);
    }
    crate::roles::goal_target_cell(board, r.goal)
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Relocate, step: Step) {
    // One-way ticket.
    if r.goal == Goal::Factory(r.target_factory) {
        return;
    }
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let spec = *board.unit(uid).spec(&board.rules);
    let threshold = (2 * naive_cost(board, step, uid, cur, board.factory_center(r.target_factory), false))
        .min(i64::from(9 * spec.battery_capacity / 10));
    if i64::from(board.unit(uid).power[i]) >= threshold {
        r.goal = Goal::Factory(r.target_factory);
    }
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Relocate,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let role = Role::Relocate(r.clone());
    match phase {
        Phase::Move => {
            let goal = goal_cell(board, uid, r, step);
            crate::roles::do_move_to(board, uid, step, goal, &role)
        }
        Phase::Dig => None,
        Phase::Pickup => {
            // Do not drain the donor factory below the trip's needs.
            let cur = board.unit_cell(uid, step);
            let spec = *board.unit(uid).spec(&board.rules);
            let threshold = 2 * naive_cost(
                board,
                step,
                uid,
                cur,
                board.factory_center(r.target_factory),
                false,
            );
            let max_amount = if threshold <= i64::from(9 * spec.battery_capacity / 10) {
                Some(threshold.min(i64::from(i32::MAX)) as i32)
            } else {
                None
            };
            crate::roles::do_power_pickup(board, uid, step, &role, None, max_amount)
        }
        Phase::Transfer => crate::roles::do_transfer_resource_to_factory(board, uid, step, &role),
    }
}
