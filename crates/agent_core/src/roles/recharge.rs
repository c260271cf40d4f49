//! Recharge: return to the factory, top up, and wait for reassignment.

use serde::{Deserialize, Serialize};

use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::roles::{Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Idle-return role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recharge {
    /// The factory to wait at.
    pub factory: FactoryId,
}

/// Plain constructor; the terminal fallback of every candidate list.
#[must_use]
pub fn new(factory: FactoryId) -> Role {
    Role::Recharge(Recharge { factory })
}

/// A depleted unit abandons its job and limps home, unless its role is one
/// that manages its own power budget.
pub fn from_transition_low_power_unit(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    if !board.unit(uid).low_power {
        return None;
    }
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);

    // A roleless unit already sitting on the factory made it home.
    if board.unit(uid).role.is_none() && board.cell(cur).has_factory() {
        return None;
    }
    let exempt = match board.unit(uid).role.clone() {
        None => false,
        Some(
            Role::Recharge(_)
            | Role::Protector(_)
            | Role::Transporter(_)
            | Role::WaterTransporter(_)
            | Role::Relocate(_)
            | Role::Blockade(_)
            | Role::Generator(_),
        ) => true,
        Some(Role::Attacker(a)) => {
            a.low_power_target
                && board.get_unit(a.target_unit).is_some_and(|t| t.water[i] >= 5)
        }
        Some(Role::Miner(m)) => {
            board.man_dist_factory(m.resource_cell, factory) <= super::miner::FORGE_DIST
        }
        Some(Role::Antagonizer(mut a)) => {
            super::antagonizer::can_destroy_factory(board, uid, &mut a, step)
        }
        Some(Role::Pillager(p)) => step >= board.config.end_phase || p.one_way,
        _ => false,
    };
    if exempt {
        return None;
    }
    Some(new(factory))
}

/// A unit carrying ice/water heads home early when the factory is about to
/// run dry.
pub fn from_transition_low_water_factory(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    if board.unit(uid).ice[i] + board.unit(uid).water[i] == 0 {
        return None;
    }
    let cur = board.unit_cell(uid, step);
    let factory = crate::roles::home_factory(board, uid, step);
    let exempt = match board.unit(uid).role.clone() {
        Some(Role::Recharge(_) | Role::WaterTransporter(_)) => true,
        Some(Role::Miner(m)) => {
            board.man_dist_factory(m.resource_cell, factory) <= super::miner::FORGE_DIST
        }
        Some(Role::Antagonizer(mut a)) => {
            super::antagonizer::can_destroy_factory(board, uid, &mut a, step)
        }
        Some(Role::Pillager(_)) => {
            step >= board.config.end_phase && board.man_dist_factory(cur, factory) > 10
        }
        _ => false,
    };
    if exempt {
        return None;
    }
    let f = board.factory(factory);
    if f.water[i] + f.ice[i] / board.rules.ice_water_ratio
        < 10 + board.man_dist_factory(cur, factory)
    {
        return Some(new(factory));
    }
    None
}

pub(crate) fn is_valid(board: &mut Board, uid: UnitId, r: &mut Recharge, step: Step) -> bool {
    let i = board.idx(step);
    if !board.factories.contains_key(&r.factory) {
        return false;
    }
    let cur = board.unit_cell(uid, step);
    let u = board.unit(uid);
    // Done once we arrive empty: the assignment loop takes over from here.
    board.cell(cur).factory_id != Some(r.factory)
        || u.ice[i] + u.ore[i] + u.water[i] + u.metal[i] > 0
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Recharge, step: Step) -> CellId {
    let cur = board.unit_cell(uid, step);
    let center = board.factory_center(r.factory);
    if board.unit(uid).class == RobotClass::Heavy && cur == center {
        // Parked on the center blocks builds; at an ice-conflict factory head
        // toward the rival, otherwise drift toward open ground.
        if let Some(target) = board
            .factory(r.factory)
            .mode
            .as_ref()
            .and_then(crate::modes::Mode::ice_conflict_target)
        {
            if board.factories.contains_key(&target) {
                return board.neighbor_toward(cur, board.factory_center(target));
            }
        }
        let mid = board
            .cell_at(board.size / 2, board.size / 2)
            .expect("board center");
        for (cell, _) in board.radius_cells(mid, 0, board.size) {
            if !board.cell(cell).has_factory() {
                return cell;
            }
        }
    }
    center
}

pub(crate) fn update_goal(_board: &mut Board, _uid: UnitId, _r: &mut Recharge, _step: Step) {}

/// Lights waiting at an ice-conflict or forge factory bank their spare
/// power back into it.
fn do_power_dump(
    board: &mut Board,
    uid: UnitId,
    r: &Recharge,
    step: Step,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let special = board
        .factory(r.factory)
        .mode
        .as_ref()
        .is_some_and(|m| m.is_ice_conflict() || m.is_forge());
    if board.unit(uid).class != RobotClass::Light
        || !special
        || board.cell(cur).factory_id != Some(r.factory)
    {
        return None;
    }
    let amount = (board.unit(uid).power[i] - 10) / 10 * 10;
    if amount > 0 {
        let cost = board.unit_transfer_cost(
            uid,
            step,
            crate::actions::Direction::Center,
            crate::actions::Resource::Power,
            amount,
        );
        if board.unit(uid).power[i] >= cost {
            return board.unit_do_transfer(
                uid,
                step,
                cur,
                crate::actions::Resource::Power,
                amount,
            );
        }
    }
    None
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Recharge,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let role = Role::Recharge(r.clone());
    match phase {
        Phase::Move => {
            let goal = goal_cell(board, uid, r, step);
            crate::roles::do_move_to(board, uid, step, goal, &role)
        }
        Phase::Dig | Phase::Pickup => None,
        Phase::Transfer => crate::roles::do_transfer_resource_to_factory(board, uid, step, &role)
            .or_else(|| do_power_dump(board, uid, r, step)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_name() {
        assert_eq!(RoleKind::Recharge.name(), "recharge");
    }
}
