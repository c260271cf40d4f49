//! Protector: stand beside a threatened heavy ice miner and deter the
//! antagonizer with probabilistic strikes at the mined cell.
//!
//! The strike choreography leans on queue lies: the emitted queue shows two
//! full threats and then goes stale, so the opponent cannot read whether the
//! next strike is real.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::board::{Board, CellId, Step, UnitId};
use crate::rng;
use crate::roles::{handle_displaced_unit, Goal, Phase, Role, RoleKind};
use crate::rules::RobotClass;

/// Protector role state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Protector {
    /// The miner being shielded.
    pub miner_unit: UnitId,
    /// The factory edge cell adjacent to the miner's resource cell.
    pub factory_cell: CellId,
    /// Last real step a strike was committed.
    pub last_strike: Option<Step>,
    /// Current sub-destination.
    pub goal: Goal,

    /// Memoized strike decision for the current real turn.
    #[serde(skip)]
    pub should_strike_cached: Option<bool>,
    /// Threats enqueued so far this look-ahead (drives the queue lie).
    #[serde(skip)]
    pub threat_count: u32,
}

fn threat_units(board: &Board, miner: UnitId, history_len: u32, max_radius: i32) -> Vec<UnitId> {
    let resource_cell = match board.get_unit(miner).and_then(|u| u.role.as_ref()) {
        Some(Role::Miner(m)) => m.resource_cell,
        _ => return Vec::new(),
    };
    board.threat_units(resource_cell, history_len, max_radius, true, false)
}

fn max_threat_power(board: &Board, threats: &[UnitId]) -> i32 {
    threats.iter().map(|&u| board.unit(u).power[0]).max().unwrap_or(0)
}

fn make(board: &Board, miner: UnitId, factory_cell: CellId) -> Role {
    let factory = board.cell(factory_cell).factory_id.expect("edge cell");
    Role::Protector(Protector {
        miner_unit: miner,
        factory_cell,
        last_strike: None,
        goal: Goal::Factory(factory),
        should_strike_cached: None,
        threat_count: 0,
    })
}

/// A transporter already standing beside a freshly threatened dist-1 ice
/// miner upgrades in place.
pub fn from_transition_from_transporter(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    if board.idx(step) != 0 || board.unit(uid).class != RobotClass::Heavy {
        return None;
    }
    let Some(Role::Transporter(t)) = board.unit(uid).role.clone() else {
        return None;
    };
    let miner = t.destination;
    let factory = crate::roles::home_factory(board, uid, step);
    let Some(Role::Miner(m)) = board.get_unit(miner).and_then(|u| u.role.clone()) else {
        return None;
    };
    if board.cell(m.resource_cell).ice
        && board.man_dist_factory(m.resource_cell, factory) == 1
        && board.man_dist(board.unit_cell(miner, step), m.resource_cell) < 2
        && !board.threat_units(m.resource_cell, 1, 2, true, false).is_empty()
    {
        let factory_cell = board.neighbor_toward(m.resource_cell, board.factory_center(factory));
        handle_displaced_unit(board, step, factory_cell);
        return Some(make(board, miner, factory_cell));
    }
    None
}

/// A spare heavy moves in when an antagonized dist-1 ice miner has no
/// protector.
pub fn from_transition_protect_ice_miner(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    let i = board.idx(step);
    if i != 0 || board.unit(uid).class == RobotClass::Light {
        return None;
    }
    let exempt = match board.unit(uid).role.clone() {
        None => false,
        Some(Role::Recharge(_)) => {
            !board.cell(board.unit_cell(uid, step)).has_factory()
        }
        Some(Role::Cow(c)) => c.repair,
        Some(Role::Attacker(a)) => a.low_power_target,
        Some(Role::Antagonizer(mut a)) => {
            super::antagonizer::can_destroy_factory(board, uid, &mut a, step)
        }
        Some(Role::Miner(m)) => {
            board.cell(m.resource_cell).ice && board.is_antagonized(uid).is_none()
        }
        Some(Role::Protector(_)) => true,
        _ => false,
    };
    if exempt {
        return None;
    }

    let factory = crate::roles::home_factory(board, uid, step);
    for miner in board.factory_units(factory, step) {
        if miner == uid
            || !board.unit(miner).protectors[i].is_empty()
            || board.unit(miner).class != RobotClass::Heavy
        {
            continue;
        }
        let Some(Role::Miner(m)) = board.unit(miner).role.clone() else {
            continue;
        };
        if !board.cell(m.resource_cell).ice
            || board.man_dist_factory(m.resource_cell, factory) != 1
            || board.man_dist(board.unit_cell(miner, step), m.resource_cell) >= 2
            || board.is_antagonized(miner).is_none()
        {
            continue;
        }
        let factory_cell = board.neighbor_toward(m.resource_cell, board.factory_center(factory));
        handle_displaced_unit(board, step, factory_cell);
        return Some(make(board, miner, factory_cell));
    }
    None
}

pub(crate) fn is_valid(board: &mut Board, _uid: UnitId, r: &mut Protector, step: Step) -> bool {
    let factory_ok = board
        .cell(r.factory_cell)
        .factory_id
        .is_some_and(|f| board.factories.contains_key(&f));
    if !factory_ok || !board.units.contains_key(&r.miner_unit) {
        return false;
    }
    let Some(Role::Miner(m)) = board.unit(r.miner_unit).role.clone() else {
        return false;
    };
    let _ = step;
    board.man_dist(m.resource_cell, r.factory_cell) == 1
        && !threat_units(board, r.miner_unit, 10, 2).is_empty()
}

pub(crate) fn goal_cell(board: &mut Board, _uid: UnitId, r: &Protector, _step: Step) -> CellId {
    crate::roles::goal_target_cell(board, r.goal)
}

pub(crate) fn update_goal(board: &mut Board, uid: UnitId, r: &mut Protector, step: Step) {
    let i = board.idx(step);
    let unit_power = board.unit(uid).power[i];
    let threats = threat_units(board, r.miner_unit, 3, 3);
    let threat_power = max_threat_power(board, &threats);
    let factory = board.cell(r.factory_cell).factory_id.expect("validated");
    let battery = board.unit(uid).spec(&board.rules).battery_capacity;

    if r.goal == Goal::Cell(r.factory_cell) {
        if unit_power <= threat_power {
            r.goal = Goal::Factory(factory);
        }
    } else if unit_power > threat_power || (unit_power == threat_power && unit_power == battery) {
        r.goal = Goal::Cell(r.factory_cell);
    }
}

/// Both units standing where the choreography needs them (miner off-by-one
/// allowed, so a protected move can bring it back).
pub(crate) fn in_position(board: &Board, uid: UnitId, r: &Protector, step: Step) -> bool {
    let Some(Role::Miner(m)) = board.unit(r.miner_unit).role.clone() else {
        return false;
    };
    board.unit_cell(uid, step) == r.factory_cell
        && board.man_dist(board.unit_cell(r.miner_unit, step), m.resource_cell) <= 1
}

pub(crate) fn is_protecting(board: &Board, uid: UnitId, r: &Protector, step: Step) -> bool {
    let i = board.idx(step);
    assert!(i == 0);
    if r.goal != Goal::Cell(r.factory_cell) || !in_position(board, uid, r, step) {
        return false;
    }
    let miner_spec = board.unit(r.miner_unit).spec(&board.rules);
    if board.unit(r.miner_unit).power[i]
        < miner_spec.dig_cost + miner_spec.action_queue_power_cost
    {
        return false;
    }
    let threats = threat_units(board, r.miner_unit, 1, 1);
    let threat_power = max_threat_power(board, &threats);
    board.unit(uid).power[0] - board.unit(uid).spec(&board.rules).action_queue_power_cost
        > threat_power
}

pub(crate) fn should_strike(board: &mut Board, uid: UnitId, r: &mut Protector, step: Step) -> bool {
    assert!(board.idx(step) == 0);
    if let Some(cached) = r.should_strike_cached {
        return cached;
    }
    r.should_strike_cached = Some(false);
    let threats = threat_units(board, r.miner_unit, 1, 1);
    let Some(Role::Miner(m)) = board.unit(r.miner_unit).role.clone() else {
        return false;
    };
    if !threats.is_empty() && is_protecting(board, uid, r, step) {
        // A lone threat camped on the resource cell with the miner off by one
        // resolves itself: the miner's protected move is completely safe.
        let solo_camper = threats.len() == 1
            && board.unit_cell(threats[0], board.step) == m.resource_cell
            && board.man_dist(board.unit_cell(r.miner_unit, step), m.resource_cell) == 1;
        if !solo_camper {
            let overdue = r.last_strike.map_or(true, |s| s + 10 <= step);
            if overdue
                || rng::chance(
                    u64::from(step) + u64::from(uid),
                    board.config.protector_strike_permille,
                )
            {
                r.last_strike = Some(step);
                r.should_strike_cached = Some(true);
            }
        }
    }
    r.should_strike_cached.expect("set above")
}

pub(crate) fn do_phase(
    board: &mut Board,
    uid: UnitId,
    r: &mut Protector,
    step: Step,
    phase: Phase,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let role = Role::Protector(r.clone());
    match phase {
        Phase::Move => do_move(board, uid, r, step),
        Phase::Dig => None,
        Phase::Pickup => do_pickup(board, uid, r, step, &role),
        Phase::Transfer => do_transfer(board, uid, r, step, &role, i),
    }
}

fn do_move(
    board: &mut Board,
    uid: UnitId,
    r: &mut Protector,
    step: Step,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let goal = goal_cell(board, uid, r, step);
    let role = Role::Protector(r.clone());

    let need_to_move = cur != goal
        || (board.cell(goal).factory_center
            && board.cell(cur).factory_id != board.cell(goal).factory_id);
    if need_to_move {
        return crate::roles::do_move_to(board, uid, step, goal, &role);
    }

    // At the post. Real turn: strike or hold. Future turns: advertise the
    // strike for two steps, then let the queue go stale.
    let striking_now = i == 0 && should_strike(board, uid, r, step);
    let advertising = i > 0 && in_position(board, uid, r, step);
    if striking_now || advertising {
        if i > 0 && r.threat_count >= 2 {
            board.unit_mut(uid).set_lie_step(step);
            return None;
        }
        let Some(Role::Miner(m)) = board.unit(r.miner_unit).role.clone() else {
            return None;
        };
        let (move_cell, threats) = board.goal_to_move(step, uid, m.resource_cell, Some(&role));
        let direction = board.direction_to(cur, move_cell);
        let cost = board.unit_move_power(uid, step, direction)?;
        if board.unit(uid).power[i] >= cost {
            if i == 0 {
                info!(unit = uid, miner = r.miner_unit, "protector strike");
            } else {
                r.threat_count += 1;
            }
            return board.unit_do_move(uid, step, direction, false, Some(cost), &threats);
        }
        return None;
    }

    if i == 0 && in_position(board, uid, r, step) {
        return board.unit_do_no_move(uid, step);
    }
    None
}

fn do_pickup(
    board: &mut Board,
    uid: UnitId,
    r: &mut Protector,
    step: Step,
    role: &Role,
) -> Option<crate::actions::UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let factory = board.cell(r.factory_cell).factory_id.expect("validated");

    if r.goal == Goal::Factory(factory) {
        return crate::roles::do_power_pickup(board, uid, step, role, None, None);
    }
    if i > 0 {
        return None;
    }
    if !(r.goal == Goal::Cell(r.factory_cell) && cur == r.factory_cell) {
        return None;
    }
    if should_strike(board, uid, r, step) {
        return None;
    }

    let rules = board.rules.clone();
    let protector_power = board.unit(uid).power[i];
    let miner_power = board.unit(r.miner_unit).power[i];
    let miner_spec = *board.unit(r.miner_unit).spec(&rules);
    let threats = threat_units(board, r.miner_unit, 3, 3);
    let threat_power = max_threat_power(board, &threats);

    let max_miner_power = (threat_power + 100)
        .max(20 * (miner_spec.dig_cost + miner_spec.action_queue_power_cost))
        .min(miner_spec.battery_capacity);
    let mut power_for_miner = (max_miner_power - miner_power).max(0);
    let power_for_protector = (threat_power + 100 - protector_power).max(0);
    if power_for_protector == 0 {
        let surplus = protector_power - (threat_power + 100);
        power_for_miner = (power_for_miner - surplus).max(0);
    }
    let power_needed = ((power_for_miner + power_for_protector + 99) / 100) * 100;
    if power_needed > 0 {
        return crate::roles::do_power_pickup(board, uid, step, role, None, Some(power_needed));
    }
    None
}

fn do_transfer(
    board: &mut Board,
    uid: UnitId,
    r: &mut Protector,
    step: Step,
    role: &Role,
    i: usize,
) -> Option<crate::actions::UnitAction> {
    let cur = board.unit_cell(uid, step);
    let factory = board.cell(r.factory_cell).factory_id.expect("validated");
    if r.goal == Goal::Factory(factory) {
        return crate::roles::do_transfer_resource_to_factory(board, uid, step, role);
    }
    if i > 0 || cur != r.factory_cell {
        return None;
    }
    if should_strike(board, uid, r, step) {
        return None;
    }
    // The miner must have locked in a move ending on its resource cell.
    let Some(Role::Miner(m)) = board.unit(r.miner_unit).role.clone() else {
        return None;
    };
    if board.unit(r.miner_unit).pos[i + 1] != Some(m.resource_cell) {
        return None;
    }

    let rules = board.rules.clone();
    let protector_power = board.unit(uid).power[i];
    let miner_power = board.unit(r.miner_unit).power[i];
    let miner_spec = *board.unit(r.miner_unit).spec(&rules);
    let threats = threat_units(board, r.miner_unit, 3, 3);
    let threat_power = max_threat_power(board, &threats);

    let per_dig = miner_spec.dig_cost + miner_spec.action_queue_power_cost;
    let digs = miner_power / per_dig;
    let gain =
        board.unit(r.miner_unit).power_gain_span(&rules, step, step + digs.max(0) as u32);
    if (miner_power + gain) / per_dig > 10 {
        return None;
    }

    let power_to_keep = threat_power + 100;
    if protector_power <= power_to_keep {
        return None;
    }
    let mut amount = miner_spec.battery_capacity
        - miner_power
        - board.unit(r.miner_unit).power_gain(&rules, step);
    amount = amount.min(protector_power - power_to_keep);
    let max_miner_power = (threat_power + 100)
        .max(20 * per_dig)
        .min(miner_spec.battery_capacity);
    amount = amount.min(max_miner_power - miner_power);
    amount = amount / 100 * 100;
    if amount > 0 {
        let direction = board.direction_to(cur, m.resource_cell);
        let cost = board.unit_transfer_cost(
            uid,
            step,
            direction,
            crate::actions::Resource::Power,
            amount,
        );
        if board.unit(uid).power[i] >= cost {
            return board.unit_do_transfer(
                uid,
                step,
                m.resource_cell,
                crate::actions::Resource::Power,
                amount,
            );
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_fields_default() {
        let p = Protector {
            miner_unit: 1,
            factory_cell: 2,
            last_strike: None,
            goal: Goal::Cell(2),
            should_strike_cached: Some(true),
            threat_count: 3,
        };
        let bytes = bincode::serialize(&p).unwrap();
        let back: Protector = bincode::deserialize(&bytes).unwrap();
        // Scratch fields never round-trip; they are per-turn state.
        assert_eq!(back.should_strike_cached, None);
        assert_eq!(back.threat_count, 0);
        assert_eq!(back.miner_unit, 1);
    }

    #[test]
    fn test_kind_constant() {
        assert_eq!(RoleKind::Protector.name(), "protector");
    }
}
