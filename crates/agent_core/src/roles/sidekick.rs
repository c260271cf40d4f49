//! Sidekick: the second jaw of an attacker's pincer. The attacker denies the
//! stand-still; the sidekick blocks one of the target's two remaining escape
//! axes each step.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::rng;
use crate::roles::{Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Pincer-partner role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidekick {
    /// Home factory.
    pub factory: FactoryId,
    /// The attacker this unit flanks for.
    pub attacker_unit: UnitId,
    /// The unit being boxed in.
    pub target_unit: UnitId,
    /// Current sub-destination.
    pub goal: Goal,
}

/// Whether (sidekick, attacker, target) are in a workable pincer right now.
pub(crate) fn in_position(
    board: &Board,
    step: Step,
    sidekick: UnitId,
    attacker: UnitId,
    target: UnitId,
) -> bool {
    if step != board.step {
        return false;
    }
    let t = board.unit(target);
    let t_spec = t.spec(&board.rules);
    // The sidekick needs a real power edge; the attacker only denies the
    // stand-still.
    if t.power[0] >= t_spec.battery_capacity / 2
        || t.power[0] >= board.unit(attacker).power[0]
        || t.power[0] >= board.unit(sidekick).power[0] - 10
    {
        return false;
    }

    let scell = board.unit_cell(sidekick, step);
    let acell = board.unit_cell(attacker, step);
    let tcell = board.unit_cell(target, step);
    let t_team = t.team;
    if board.nearest_factory_dist(tcell, Some(t_team)) <= 1
        || board.man_dist(scell, acell) > 1
        || board.man_dist(acell, tcell) > 1
    {
        return false;
    }

    // The attacker must be free to make its denial move.
    for n in board.neighbors(tcell) {
        if let Some(other) = board.unit_at(n, step, Some(t_team)) {
            let o = board.unit(other);
            if o.class == RobotClass::Heavy && board.unit(attacker).class == RobotClass::Light {
                return false;
            }
            if o.class == board.unit(attacker).class && o.power[0] > board.unit(attacker).power[0] {
                return false;
            }
        }
    }

    // And the sidekick must have at least one safe blocking move.
    !safe_blocking_moves(board, step, sidekick, target).is_empty()
}

/// The one or two cells that block the target's open escape axes without
/// stepping into a losing exchange.
fn safe_blocking_moves(board: &Board, step: Step, sidekick: UnitId, target: UnitId) -> Vec<CellId> {
    let scell = board.unit_cell(sidekick, step);
    let tcell = board.unit_cell(target, step);
    let (sc, tc) = (board.cell(scell), board.cell(tcell));
    let dx = (tc.x - sc.x).signum();
    let dy = (tc.y - sc.y).signum();
    let t_team = board.unit(target).team;

    let mut out = Vec::new();
    for candidate in [board.neighbor(scell, dx, 0), board.neighbor(scell, 0, dy)] {
        let Some(cell) = candidate else { continue };
        if cell == scell {
            continue;
        }
        if board.cell(cell).factory_id.is_some_and(|f| board.factory(f).team != board.me.id) {
            continue;
        }
        let mut safe = true;
        for n in board.neighbors(cell) {
            if let Some(other) = board.unit_at(n, step, Some(t_team)) {
                let o = board.unit(other);
                if (o.class == RobotClass::Heavy && board.unit(sidekick).class == RobotClass::Light)
                    || (o.class == board.unit(sidekick).class
                        && o.power[0] >= board.unit(sidekick).power[0])
                {
                    safe = false;
                }
            }
        }
        if safe {
            out.push(cell);
        }
    }
    out
}

pub(crate) fn is_valid(board: &mut Board, uid: UnitId, r: &mut Sidekick, step: Step) -> bool {
    if board.idx(step) > 0 {
        return true;
    }
    board.factories.contains_key(&r.factory)
        && board.units.contains_key(&r.target_unit)
        && board.units.contains_key(&r.attacker_unit)
        && matches!(
            board.unit(r.attacker_unit).role.as_ref(),
            Some(Role::Attacker(a)) if a.sidekick_unit == Some(uid)
        )
        && in_position(board, step, uid, r.attacker_unit, r.target_unit)
}

/// A push direction is good when it drives the target away from every
/// opposing factory line.
fn is_good_push(board: &Board, r: &Sidekick, dx: i32, dy: i32) -> bool {
    if dx == 0 && dy == 0 {
        return false;
    }
    assert!(dx == 0 || dy == 0);
    let tcell = board.unit_cell(r.target_unit, board.step);
    let tc = board.cell(tcell);
    for f in board.opp_factories() {
        let fac = board.factory(f);
        if (dx > 0 && fac.x + 1 >= tc.x)
            || (dx < 0 && fac.x - 1 <= tc.x)
            || (dy > 0 && fac.y + 1 >= tc.y)
            || (dy < 0 && fac.y - 1 <= tc.y)
        {
            return false;
        }
    }
    true
}

pub(crate) fn goal_cell(board: &mut Board, uid: UnitId, r: &Sidekick, step: Step) -> CellId {
    let scell = board.unit_cell(uid, step);
    if step != board.step {
        return scell;
    }
    let tcell = board.unit_cell(r.target_unit, step);
    let (sc, tc) = (board.cell(scell), board.cell(tcell));
    let dx = (tc.x - sc.x).signum();
    let dy = (tc.y - sc.y).signum();

    let mut moves = safe_blocking_moves(board, step, uid, r.target_unit);
    if moves.is_empty() {
        // Validity should have caught this; hold position rather than panic
        // mid-choreography.
        warn!(unit = uid, "sidekick has no blocking move");
        return scell;
    }
    if moves.len() == 1 {
        return moves[0];
    }
    rng::shuffle(u64::from(step) + u64::from(uid), &mut moves);
    for &cell in &moves {
        let c = board.cell(cell);
        let move_dx = c.x - sc.x;
        let move_dy = c.y - sc.y;
        // Moving along one axis blocks pushes along the other.
        if (move_dx != 0 && is_good_push(board, r, 0, dy))
            || (move_dy != 0 && is_good_push(board, r, dx, 0))
        {
            return cell;
        }
    }
    moves[0]
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Sidekick,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    match phase {
        Phase::Move => {
            let goal = goal_cell(board, uid, r, step);
            let role = Role::Sidekick(r.clone());
            crate::roles::do_move_to(board, uid, step, goal, &role)
        }
        Phase::Dig | Phase::Pickup | Phase::Transfer => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_name() {
        assert_eq!(RoleKind::Sidekick.name(), "sidekick");
    }
}
