//! Transporter: station on a factory edge cell and keep a heavy miner
//! topped up with power.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::actions::Resource;
use crate::board::{Board, CellId, Step, UnitId, UNREACHABLE};
use crate::roles::{handle_displaced_unit, Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Power-shuttle role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transporter {
    /// The factory edge cell this unit is stationed on.
    pub factory_cell: CellId,
    /// The miner being supplied.
    pub destination: UnitId,
    /// Current sub-destination.
    pub goal: Goal,
}

fn make(board: &Board, uid: UnitId, step: Step, factory_cell: CellId, destination: UnitId) -> Role {
    let cur = board.unit_cell(uid, step);
    let dest_cell = board.unit_cell(destination, board.step);
    let goal = if board.man_dist(cur, dest_cell) < board.man_dist(cur, factory_cell) {
        Goal::Unit(destination)
    } else {
        Goal::Cell(factory_cell)
    };
    Role::Transporter(Transporter { factory_cell, destination, goal })
}

/// A protector whose miner has not been threatened lately steps back down
/// into a transporter.
pub fn from_transition_from_protector(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    if board.idx(step) != 0 || board.unit(uid).class != RobotClass::Heavy {
        return None;
    }
    let Some(Role::Protector(p)) = board.unit(uid).role.clone() else {
        return None;
    };
    let miner = p.miner_unit;
    if !board.units.contains_key(&miner) {
        return None;
    }
    let Some(Role::Miner(m)) = board.unit(miner).role.clone() else {
        return None;
    };
    if board.threat_units(m.resource_cell, 15, 2, true, false).is_empty() {
        handle_displaced_unit(board, step, p.factory_cell);
        return Some(make(board, uid, step, p.factory_cell, miner));
    }
    None
}

/// A fresh light takes the free edge cell nearest an unsupplied heavy miner.
pub fn from_new_unit(board: &mut Board, uid: UnitId, step: Step, max_dist: i32) -> Option<Role> {
    let i = board.idx(step);
    let factory = crate::roles::home_factory(board, uid, step);

    let miner_units: Vec<UnitId> = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| {
            board.unit(u).class == RobotClass::Heavy
                && board.unit(u).role.as_ref().is_some_and(|r| r.kind() == RoleKind::Miner)
        })
        .collect();
    for miner in &miner_units {
        let miner = *miner;
        if !board.unit(miner).transporters[i].is_empty() {
            continue;
        }
        let Some(Role::Miner(m)) = board.unit(miner).role.clone() else {
            continue;
        };
        let resource_dist = board.man_dist_factory(m.resource_cell, factory);
        if miner_units.len() > 1 && resource_dist > max_dist {
            continue;
        }
        let mut best: Option<(i32, CellId)> = None;
        for cell in board.factory_unassigned_cells(factory, step) {
            let d = board.man_dist(cell, m.resource_cell);
            if d <= resource_dist && best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, cell));
            }
        }
        if let Some((_, cell)) = best {
            return Some(make(board, uid, step, cell, miner));
        }
    }
    None
}

pub(crate) fn is_valid(board: &mut Board, _uid: UnitId, r: &mut Transporter, _step: Step) -> bool {
    board.cell(r.factory_cell).factory_id.is_some_and(|f| board.factories.contains_key(&f))
        && board
            .get_unit(r.destination)
            .and_then(|u| u.role.as_ref())
            .is_some_and(|role| role.kind() == RoleKind::Miner)
}

fn destination_resource_cell(board: &Board, r: &Transporter) -> Option<CellId> {
    match board.get_unit(r.destination).and_then(|u| u.role.as_ref()) {
        Some(Role::Miner(m)) => Some(m.resource_cell),
        _ => None,
    }
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Transporter, step: Step) -> CellId {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = board.cell(r.factory_cell).factory_id.expect("validated");
    let Some(resource_cell) = destination_resource_cell(board, r) else {
        return r.factory_cell;
    };
    if cur == board.factory_center(factory) {
        return resource_cell;
    }
    if r.goal == Goal::Cell(r.factory_cell) {
        return r.factory_cell;
    }

    // Goal is the miner: settle on the nearest usable cell beside its
    // resource cell.
    if board.man_dist(cur, resource_cell) == 1 {
        return cur;
    }
    // Scores scaled by 1000 for the rubble tie-break.
    let mut nearest = (cur, UNREACHABLE);
    for cell in board.neighbors(resource_cell) {
        if board.assigned_unit(cell, step).is_some_and(|a| a != uid) {
            continue;
        }
        if board.cell(cell).factory_id.is_some_and(|f| board.factory(f).team != board.me.id) {
            continue;
        }
        let mut score = i64::from(board.man_dist(r.factory_cell, cell)) * 1000
            + i64::from(board.cell(cell).rubble[i]);
        if cell == r.factory_cell {
            score -= 3000;
        }
        if score < nearest.1 {
            nearest = (cell, score);
        }
    }
    if i == 0 && nearest.0 == cur && board.man_dist(cur, resource_cell) > 1 {
        warn!(unit = uid, dest = r.destination, "transporter cannot park near its miner");
    }
    nearest.0
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Transporter, step: Step) {
    let i = board.idx(step);
    let rules = board.rules.clone();
    let spec = *board.unit(uid).spec(&rules);
    let cur = board.unit_cell(uid, step);
    let unit_power = board.unit(uid).power[i];
    let unit_resource = board.unit(uid).ice[i].max(board.unit(uid).ore[i]);
    let factory = board.cell(r.factory_cell).factory_id.expect("validated");
    let dest_spec = *board.unit(r.destination).spec(&rules);

    if r.goal == Goal::Unit(r.destination) {
        let mut power_threshold = spec.action_queue_power_cost
            + dest_spec.dig_cost / 2
            + 2 * spec.move_cost * board.man_dist_factory(cur, factory);
        if board.unit(uid).class == RobotClass::Heavy {
            power_threshold += dest_spec.dig_cost;
        }
        let resource_threshold = 4 * spec.cargo_space / 5;
        if unit_power < power_threshold || unit_resource >= resource_threshold {
            r.goal = Goal::Cell(r.factory_cell);
        }
    } else {
        let dest_gain = board.unit(r.destination).power_gain(&rules, step + 1)
            + board.unit(r.destination).power_gain(&rules, step + 2);
        if unit_power >= 2 * dest_spec.dig_cost - dest_gain && unit_resource == 0 {
            r.goal = Goal::Unit(r.destination);
        }
    }
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Transporter,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let role = Role::Transporter(r.clone());
    match phase {
        Phase::Move => {
            let goal = goal_cell(board, uid, r, step);
            crate::roles::do_move_to(board, uid, step, goal, &role)
        }
        Phase::Dig => None,
        Phase::Pickup => {
            let factory = board.cell(r.factory_cell).factory_id.expect("validated");
            let rules = board.rules.clone();
            let dest_spec = *board.unit(r.destination).spec(&rules);
            if let Some(resource_cell) = destination_resource_cell(board, r) {
                if board.man_dist_factory(resource_cell, factory) == 1 {
                    // A dist-1 miner only needs a top-up when it is running
                    // genuinely low.
                    let dest_power = board.unit(r.destination).power[i];
                    let digs = dest_power / dest_spec.dig_cost;
                    let gain = board.unit(r.destination).power_gain_span(
                        &rules,
                        step,
                        step + digs.max(0) as u32,
                    );
                    if (dest_power + gain) / dest_spec.dig_cost >= 8 {
                        return None;
                    }
                }
            }
            crate::roles::do_power_pickup(board, uid, step, &role, None, Some(4 * dest_spec.dig_cost))
        }
        Phase::Transfer => do_transfer(board, uid, r, step, &role),
    }
}

/// Whether this transporter supplies an ice miner. Ice suppliers get an
/// earlier pickup slot in the phase pipeline so the water chain never
/// starves behind ore logistics.
pub(crate) fn destination_is_ice(board: &Board, r: &Transporter) -> bool {
    destination_resource_cell(board, r).is_some_and(|c| board.cell(c).ice)
}

fn do_transfer(
    board: &mut Board,
    uid: UnitId,
    r: &Transporter,
    step: Step,
    role: &Role,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let rules = board.rules.clone();
    let spec = *board.unit(uid).spec(&rules);
    let factory = board.cell(r.factory_cell).factory_id.expect("validated");

    if let Some(action) = do_excess_power_transfer(board, uid, r, step) {
        return Some(action);
    }

    if r.goal == Goal::Unit(r.destination) && board.unit(uid).power[i] > 8 * spec.move_cost {
        // Transfers resolve after the miner's move is locked in.
        assert!(
            board.unit(r.destination).pos[i + 1].is_some(),
            "transporter {uid} transfers before miner {} moved",
            r.destination
        );
        let transfer_cell = board.unit_cell(r.destination, step + 1);
        if board.man_dist(cur, transfer_cell) == 1 && !board.cell(transfer_cell).has_factory() {
            let dest_spec = *board.unit(r.destination).spec(&rules);
            let mut amount = dest_spec.battery_capacity
                - board.unit(r.destination).power[i]
                - board.unit(r.destination).power_gain(&rules, step);
            let dist = destination_resource_cell(board, r)
                .map_or(1, |rc| board.man_dist_factory(rc, factory));
            let gain = board.unit(uid).power_gain_span(&rules, step, step + dist.max(0) as u32);
            let keep = spec.action_queue_power_cost + 2 * spec.move_cost * dist - gain;
            amount = amount.min(board.unit(uid).power[i] - keep);
            if amount > 0 {
                let direction = board.direction_to(cur, transfer_cell);
                let cost = board.unit_transfer_cost(uid, step, direction, Resource::Power, amount);
                if board.unit(uid).power[i] >= cost {
                    return board.unit_do_transfer(uid, step, transfer_cell, Resource::Power, amount);
                }
            }
        }
    }

    crate::roles::do_transfer_resource_to_factory(board, uid, step, role)
}

/// Heavy transporter at its post sheds battery surplus into a starved
/// factory.
fn do_excess_power_transfer(
    board: &mut Board,
    uid: UnitId,
    r: &Transporter,
    step: Step,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = board.cell(r.factory_cell).factory_id?;
    let ice_conflict = board
        .factory(factory)
        .mode
        .as_ref()
        .is_some_and(crate::modes::Mode::is_ice_conflict);
    let resource_cell = destination_resource_cell(board, r)?;
    if board.unit(uid).class == RobotClass::Heavy
        && cur == r.factory_cell
        && board.unit(uid).power[i] >= 1500
        && board.factory(factory).power[i] < 500
        && !ice_conflict
        && board.man_dist(resource_cell, r.factory_cell) == 1
        && (board.unit_cell(r.destination, step) != resource_cell
            || board.unit(r.destination).power[i] >= 100)
    {
        let amount = (board.unit(uid).power[i] - 700) / 10 * 10;
        if amount > 0 {
            let cost = board.unit_transfer_cost(
                uid,
                step,
                crate::actions::Direction::Center,
                Resource::Power,
                amount,
            );
            if board.unit(uid).power[i] >= cost {
                if i == 0 {
                    debug!(unit = uid, amount, "transporter returns excess power");
                }
                return board.unit_do_transfer(uid, step, cur, Resource::Power, amount);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_defaults() {
        let t = Transporter { factory_cell: 5, destination: 9, goal: Goal::Cell(5) };
        assert_eq!(t.goal, Goal::Cell(t.factory_cell));
    }
}
