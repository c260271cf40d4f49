//! Generator: park a heavy on a station cell beside the factory and bank
//! ambient charge into it.

use serde::{Deserialize, Serialize};

use crate::actions::Resource;
use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::pathfinding::naive_cost;
use crate::roles::{Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Power-banking role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    /// Home factory.
    pub factory: FactoryId,
    /// The adjacent cell the unit parks on.
    pub station_cell: CellId,
    /// Current sub-destination.
    pub goal: Goal,
}

/// A post-forge heavy with a full metal bank becomes a standing generator.
pub fn from_post_forge_heavy(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    max_count: usize,
) -> Option<Role> {
    let i = board.idx(step);
    let factory = crate::roles::home_factory(board, uid, step);
    let f = board.factory(factory);
    let factory_metal = f.metal[i]
        + board.unit(uid).metal[i]
        + (f.ore[i] + board.unit(uid).ore[i]) / board.rules.ore_metal_ratio;
    if factory_metal < board.rules.heavy.metal_cost {
        return None;
    }
    let helpers = board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| {
            board.unit(u).class == RobotClass::Heavy
                && matches!(
                    board.unit(u).role.as_ref().map(Role::kind),
                    Some(RoleKind::Generator | RoleKind::Transporter | RoleKind::Protector)
                )
        })
        .count();
    if 1 + helpers > max_count {
        return None;
    }

    let center = board.factory_center(factory);
    let mut best: Option<(i32, CellId)> = None;
    for (cell, _) in board.radius_cells_factory(center, 1, 1) {
        let c = board.cell(cell);
        if c.ice || c.ore || board.assigned_unit(cell, step).is_some() {
            continue;
        }
        let mut score = 100 - c.rubble[i];
        for n in board.neighbors(cell) {
            if board.cell(n).ice {
                score -= 20;
            }
            if board.cell(n).ore {
                score -= 10;
            }
        }
        if best.map_or(true, |(bs, _)| score > bs) {
            best = Some((score, cell));
        }
    }
    best.map(|(_, cell)| {
        Role::Generator(Generator { factory, station_cell: cell, goal: Goal::Factory(factory) })
    })
}

pub(crate) fn is_valid(board: &mut Board, _uid: UnitId, r: &mut Generator, step: Step) -> bool {
    let i = board.idx(step);
    board.factories.contains_key(&r.factory) && board.factory(r.factory).power[i] < 6000
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Generator, step: Step) -> CellId {
    let cur = board.unit_cell(uid, step);
    if cur == board.factory_center(r.factory) {
        return r.station_cell;
    }
    crate::roles::goal_target_cell(board, r.goal)
}

/// Target battery level tracking the day/night cycle: enough to keep
/// feeding the factory, empty-ish by dawn.
fn desired_power(board: &Board, step: Step) -> i32 {
    let day_idx = (step % board.rules.cycle_length) as i32;
    let day_len = board.rules.day_length as i32;
    if day_idx < day_len {
        100 + 4 * day_idx
    } else {
        100 + 120 - 6 * (day_idx - day_len)
    }
}

fn threat_nearby(board: &Board, r: &Generator) -> bool {
    std::iter::once(r.station_cell)
        .chain(board.neighbors(r.station_cell))
        .any(|n| {
            board
                .unit_at(n, board.step, Some(board.opp.id))
                .is_some_and(|o| board.unit(o).class == RobotClass::Heavy)
        })
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Generator, step: Step) {
    let i = board.idx(step);
    let unit_power = board.unit(uid).power[i];
    let threat = threat_nearby(board, r);

    if r.goal == Goal::Cell(r.station_cell) {
        if unit_power < 80 || threat {
            r.goal = Goal::Factory(r.factory);
        }
    } else {
        let cur = board.unit_cell(uid, step);
        let unit_resource = board.unit(uid).ice[i].max(board.unit(uid).ore[i]);
        let spec = *board.unit(uid).spec(&board.rules);
        let threshold = i64::from(spec.action_queue_power_cost)
            + naive_cost(board, step, uid, cur, r.station_cell, false)
            + i64::from(desired_power(board, step))
            + 40;
        if unit_resource == 0 && i64::from(unit_power) >= threshold && !threat {
            r.goal = Goal::Cell(r.station_cell);
        }
    }
}

fn do_excess_power_transfer(
    board: &mut Board,
    uid: UnitId,
    r: &Generator,
    step: Step,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    if r.goal != Goal::Cell(r.station_cell) || cur != r.station_cell {
        return None;
    }
    let desired = desired_power(board, step);
    let power = board.unit(uid).power[i];
    let amount = if power > desired + 100 {
        power - desired - 40
    } else if power >= desired - 20 {
        6
    } else {
        return None;
    };
    if amount > 0 {
        let transfer_cell = board.neighbor_toward(cur, board.factory_center(r.factory));
        let direction = board.direction_to(cur, transfer_cell);
        let cost = board.unit_transfer_cost(uid, step, direction, Resource::Power, amount);
        if power >= cost {
            return board.unit_do_transfer(uid, step, transfer_cell, Resource::Power, amount);
        }
    }
    None
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Generator,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let role = Role::Generator(r.clone());
    match phase {
        Phase::Move => {
            let goal = goal_cell(board, uid, r, step);
            crate::roles::do_move_to(board, uid, step, goal, &role)
        }
        Phase::Dig => {
            let cur = board.unit_cell(uid, step);
            if r.goal == Goal::Cell(r.station_cell)
                && cur == r.station_cell
                && board.cell(cur).rubble[i] > 0
                && board.cell(cur).rubble[i] <= 20
                && board.unit(uid).power[i] >= board.unit_dig_cost(uid, step)
            {
                return board.unit_do_dig(uid, step);
            }
            None
        }
        Phase::Pickup => None,
        Phase::Transfer => crate::roles::do_transfer_resource_to_factory(board, uid, step, &role)
            .or_else(|| do_excess_power_transfer(board, uid, r, step)),
    }
}

#[cfg(test)]
mod tests {
    use crate::rules::GameRules;

    #[test]
    fn test_desired_power_cycle_shape() {
        // Rises through the day, falls through the night.
        let rules = GameRules::default();
        let day_peak = 100 + 4 * (rules.day_length as i32 - 1);
        assert!(day_peak > 100);
    }
}
