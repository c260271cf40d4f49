//! Per-unit behavior state machines.
//!
//! A role is a closed tagged union over the concrete behaviors. Each variant
//! carries its target ids plus a goal (the immediate sub-destination). The
//! mode layer tries each role's candidate constructors in a fixed priority
//! order; declaration order, not score, breaks ties.
//!
//! Roles claim exclusive cell/unit assignments while set; releasing a role
//! cascades to any helper units (protectors, transporters) bound to it.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::actions::{Resource, UnitAction};
use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::rules::RobotClass;

pub mod antagonizer;
pub mod attacker;
pub mod blockade;
pub mod cow;
pub mod generator;
pub mod miner;
pub mod pillager;
pub mod protector;
pub mod recharge;
pub mod relocate;
pub mod sidekick;
pub mod transporter;
pub mod water_transporter;

pub use antagonizer::Antagonizer;
pub use attacker::Attacker;
pub use blockade::Blockade;
pub use cow::Cow;
pub use generator::Generator;
pub use miner::Miner;
pub use pillager::Pillager;
pub use protector::Protector;
pub use recharge::Recharge;
pub use relocate::Relocate;
pub use sidekick::Sidekick;
pub use transporter::Transporter;
pub use water_transporter::WaterTransporter;

/// A role's immediate sub-destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Goal {
    /// Head for (or work at) a cell.
    Cell(CellId),
    /// Head for (or shadow) a unit.
    Unit(UnitId),
    /// Return to (or wait at) a factory.
    Factory(FactoryId),
}

/// Discriminant of [`Role`], for cheap comparisons and tallies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum RoleKind {
    Miner,
    Transporter,
    WaterTransporter,
    Protector,
    Antagonizer,
    Attacker,
    Sidekick,
    Blockade,
    Cow,
    Pillager,
    Recharge,
    Relocate,
    Generator,
}

impl RoleKind {
    /// Stable lowercase name used in logs and tallies.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            RoleKind::Miner => "miner",
            RoleKind::Transporter => "transporter",
            RoleKind::WaterTransporter => "water_transporter",
            RoleKind::Protector => "protector",
            RoleKind::Antagonizer => "antagonizer",
            RoleKind::Attacker => "attacker",
            RoleKind::Sidekick => "sidekick",
            RoleKind::Blockade => "blockade",
            RoleKind::Cow => "cow",
            RoleKind::Pillager => "pillager",
            RoleKind::Recharge => "recharge",
            RoleKind::Relocate => "relocate",
            RoleKind::Generator => "generator",
        }
    }
}

/// A unit's behavior state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Role {
    Miner(Miner),
    Transporter(Transporter),
    WaterTransporter(WaterTransporter),
    Protector(Protector),
    Antagonizer(Antagonizer),
    Attacker(Attacker),
    Sidekick(Sidekick),
    Blockade(Blockade),
    Cow(Cow),
    Pillager(Pillager),
    Recharge(Recharge),
    Relocate(Relocate),
    Generator(Generator),
}

impl Role {
    /// Discriminant.
    #[must_use]
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Miner(_) => RoleKind::Miner,
            Role::Transporter(_) => RoleKind::Transporter,
            Role::WaterTransporter(_) => RoleKind::WaterTransporter,
            Role::Protector(_) => RoleKind::Protector,
            Role::Antagonizer(_) => RoleKind::Antagonizer,
            Role::Attacker(_) => RoleKind::Attacker,
            Role::Sidekick(_) => RoleKind::Sidekick,
            Role::Blockade(_) => RoleKind::Blockade,
            Role::Cow(_) => RoleKind::Cow,
            Role::Pillager(_) => RoleKind::Pillager,
            Role::Recharge(_) => RoleKind::Recharge,
            Role::Relocate(_) => RoleKind::Relocate,
            Role::Generator(_) => RoleKind::Generator,
        }
    }

    /// Stable lowercase name.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.kind().name()
    }

    /// The factory this role works for, if its reference is still live.
    #[must_use]
    pub fn factory_id(&self, board: &Board) -> Option<FactoryId> {
        let fid = match self {
            Role::Miner(r) => r.factory,
            Role::Transporter(r) => board.cell(r.factory_cell).factory_id?,
            Role::WaterTransporter(r) => r.factory,
            Role::Protector(r) => board.cell(r.factory_cell).factory_id?,
            Role::Antagonizer(r) => r.factory,
            Role::Attacker(r) => r.factory,
            Role::Sidekick(r) => r.factory,
            Role::Blockade(r) => r.factory,
            Role::Cow(r) => r.factory,
            Role::Pillager(r) => r.factory,
            Role::Recharge(r) => r.factory,
            Role::Relocate(r) => r.factory,
            Role::Generator(r) => r.factory,
        };
        board.factories.contains_key(&fid).then_some(fid)
    }

    /// Whether the current goal points at the role's factory side.
    #[must_use]
    pub fn goal_is_factory(&self) -> bool {
        match self {
            Role::Miner(r) => r.goal == Goal::Factory(r.factory),
            Role::Transporter(r) => r.goal == Goal::Cell(r.factory_cell),
            Role::WaterTransporter(r) => r.goal == Goal::Factory(r.factory),
            Role::Protector(r) => {
                matches!(r.goal, Goal::Factory(_)) || r.goal == Goal::Cell(r.factory_cell)
            }
            Role::Antagonizer(r) => r.goal == Goal::Factory(r.factory),
            Role::Attacker(r) => r.goal == Goal::Factory(r.factory),
            Role::Sidekick(r) => r.goal == Goal::Factory(r.factory),
            Role::Blockade(r) => r.goal == Some(Goal::Factory(r.factory)),
            Role::Cow(r) => r.goal == Goal::Factory(r.factory),
            Role::Pillager(r) => r.goal == Goal::Factory(r.factory),
            Role::Recharge(_) => true,
            Role::Relocate(r) => r.goal == Goal::Factory(r.factory),
            Role::Generator(r) => r.goal == Goal::Factory(r.factory),
        }
    }

    /// Drop or repair a restored role whose references died between turns.
    /// Returns `None` when the role cannot survive; the unit re-enters role
    /// assignment and any stale ids are logged by the strategy cache.
    #[must_use]
    pub fn sanitized(mut self, board: &Board, uid: UnitId) -> Option<Role> {
        let unit_ok = |u: UnitId| board.units.contains_key(&u);
        let factory_ok = |f: FactoryId| board.factories.contains_key(&f);
        let ok = match &mut self {
            Role::Miner(r) => factory_ok(r.factory),
            Role::Transporter(r) => {
                board.cell(r.factory_cell).factory_id.is_some_and(factory_ok)
                    && unit_ok(r.destination)
            }
            Role::WaterTransporter(r) => factory_ok(r.factory) && factory_ok(r.target_factory),
            Role::Protector(r) => {
                board.cell(r.factory_cell).factory_id.is_some_and(factory_ok)
                    && unit_ok(r.miner_unit)
            }
            Role::Antagonizer(r) => {
                if r.target_factory.is_some_and(|f| !factory_ok(f)) {
                    r.target_factory = None;
                }
                factory_ok(r.factory)
            }
            Role::Attacker(r) => {
                if r.sidekick_unit.is_some_and(|u| !unit_ok(u)) {
                    r.sidekick_unit = None;
                }
                factory_ok(r.factory) && unit_ok(r.target_unit)
            }
            Role::Sidekick(r) => {
                factory_ok(r.factory) && unit_ok(r.attacker_unit) && unit_ok(r.target_unit)
            }
            Role::Blockade(r) => {
                if r.target_unit.is_some_and(|u| !unit_ok(u)) {
                    r.target_unit = None;
                    r.goal = Some(Goal::Factory(r.factory));
                }
                if r.partner.is_some_and(|u| !unit_ok(u)) {
                    r.partner = None;
                }
                factory_ok(r.factory) && factory_ok(r.target_factory)
            }
            Role::Cow(r) => factory_ok(r.factory),
            Role::Pillager(r) => factory_ok(r.factory),
            Role::Recharge(r) => factory_ok(r.factory),
            Role::Relocate(r) => {
                if !factory_ok(r.factory) && factory_ok(r.target_factory) {
                    // Source factory exploded mid-relocation: the unit now
                    // belongs to its destination, and re-enters assignment.
                    return None;
                }
                factory_ok(r.factory) && factory_ok(r.target_factory)
            }
            Role::Generator(r) => factory_ok(r.factory),
        };
        if !ok {
            debug!(unit = uid, role = self.kind_name(), "dropping role with stale refs");
            return None;
        }
        Some(self)
    }
}

// ----------------------------------------------------------------------
// Lifecycle: set / unset with cascade
// ----------------------------------------------------------------------

/// Give `uid` a role (or re-claim its current one for this simulated turn).
///
/// Passing a new role releases the previous role's claims and any helper
/// units bound to this unit; passing `None` re-claims the existing role.
pub fn unit_set_role(board: &mut Board, uid: UnitId, step: Step, new_role: Option<Role>) {
    if let Some(new) = new_role {
        // Helpers were recruited for the old job; let them find new work.
        release_helpers(board, uid, step, true);
        if board.unit(uid).role.is_some() {
            unit_unset_role(board, uid, step);
        }
        if board.idx(step) == 0 {
            debug!(unit = uid, role = new.kind_name(), "role set");
        }
        board.unit_mut(uid).role = Some(new);
    }

    let role = board
        .unit(uid)
        .role
        .clone()
        .expect("unit_set_role requires a role");
    let prev = board.unit(uid).role_set_step;
    assert!(
        prev.map_or(true, |p| p < step),
        "unit {uid} role set twice at step {step}"
    );
    board.unit_mut(uid).role_set_step = Some(step);
    set_claims(board, uid, &role, step);
}

/// Release `uid`'s role and everything it claimed.
pub fn unit_unset_role(board: &mut Board, uid: UnitId, step: Step) {
    let Some(role) = board.unit_mut(uid).role.take() else {
        return;
    };
    if board.idx(step) == 0 {
        debug!(unit = uid, role = role.kind_name(), "role released");
    }
    release_helpers(board, uid, step, false);
    if board.unit(uid).role_set_step == Some(step) {
        unset_claims(board, uid, &role, step);
    }
    board.unit_mut(uid).role_set_step = None;
}

/// Release the protector/transporter helpers bound to `uid`.
fn release_helpers(board: &mut Board, uid: UnitId, step: Step, include_protectors: bool) {
    let i = board.idx(step);
    if include_protectors {
        for pid in board.unit(uid).protectors[i].clone() {
            if board.units.contains_key(&pid) {
                unit_unset_role(board, pid, step);
            }
        }
    }
    for tid in board.unit(uid).transporters[i].clone() {
        if board.units.contains_key(&tid) {
            unit_unset_role(board, tid, step);
        }
    }
}

/// Displace whatever unit currently claims `cell`, releasing its role.
pub(crate) fn handle_displaced_unit(board: &mut Board, step: Step, cell: CellId) {
    if let Some(displaced) = board.assigned_unit(cell, step) {
        unit_unset_role(board, displaced, step);
    }
}

fn set_claims(board: &mut Board, uid: UnitId, role: &Role, step: Step) {
    let i = board.idx(step);
    match role {
        Role::Miner(r) => board.cell_mut(r.resource_cell).set_assignment(i, uid),
        Role::Transporter(r) => {
            let dest = r.destination;
            if board.units.contains_key(&dest) {
                board.unit_mut(dest).set_transporter(i, uid);
            }
            board.cell_mut(r.factory_cell).set_assignment(i, uid);
        }
        Role::WaterTransporter(_) => {}
        Role::Protector(r) => {
            let miner = r.miner_unit;
            if board.units.contains_key(&miner) {
                board.unit_mut(miner).set_protector(i, uid);
            }
            board.cell_mut(r.factory_cell).set_assignment(i, uid);
        }
        Role::Antagonizer(r) => board.cell_mut(r.target_cell).set_assignment(i, uid),
        Role::Attacker(r) => {
            let target = r.target_unit;
            let prev = board.unit(target).assigned_unit_id[i];
            assert!(
                prev.is_none(),
                "unit {target} already pursued by {prev:?}, attacker {uid} double-claims"
            );
            board.unit_mut(target).assigned_unit_id[i] = Some(uid);
        }
        Role::Sidekick(_) => {}
        // Blockades share targets; the pair coordinates through the role.
        Role::Blockade(_) => {}
        Role::Cow(r) => board.cell_mut(r.rubble_cell).set_assignment(i, uid),
        Role::Pillager(r) => {
            if !board.cell(r.lichen_cell).factory_center {
                board.cell_mut(r.lichen_cell).set_assignment(i, uid);
            }
        }
        Role::Recharge(_) | Role::Relocate(_) => {}
        Role::Generator(r) => board.cell_mut(r.station_cell).set_assignment(i, uid),
    }
}

fn unset_claims(board: &mut Board, uid: UnitId, role: &Role, step: Step) {
    let i = board.idx(step);
    match role {
        Role::Miner(r) => board.cell_mut(r.resource_cell).unset_assignment(i, uid),
        Role::Transporter(r) => {
            for other in board.my_units() {
                board.unit_mut(other).unset_transporter(i, uid);
            }
            board.cell_mut(r.factory_cell).unset_assignment(i, uid);
        }
        Role::WaterTransporter(_) => {}
        Role::Protector(r) => {
            for other in board.my_units() {
                board.unit_mut(other).unset_protector(i, uid);
            }
            board.cell_mut(r.factory_cell).unset_assignment(i, uid);
        }
        Role::Antagonizer(r) => board.cell_mut(r.target_cell).unset_assignment(i, uid),
        Role::Attacker(r) => {
            let target = r.target_unit;
            if board.units.contains_key(&target) {
                assert!(board.unit(target).assigned_unit_id[i] == Some(uid));
                board.unit_mut(target).assigned_unit_id[i] = None;
            }
        }
        Role::Sidekick(_) | Role::Blockade(_) => {}
        Role::Cow(r) => board.cell_mut(r.rubble_cell).unset_assignment(i, uid),
        Role::Pillager(r) => {
            if !board.cell(r.lichen_cell).factory_center {
                board.cell_mut(r.lichen_cell).unset_assignment(i, uid);
            }
        }
        Role::Recharge(_) | Role::Relocate(_) => {}
        Role::Generator(r) => board.cell_mut(r.station_cell).unset_assignment(i, uid),
    }
}

// ----------------------------------------------------------------------
// Dispatch
// ----------------------------------------------------------------------

/// Re-examine whether `role` should keep driving `uid`.
pub fn is_valid(board: &mut Board, uid: UnitId, role: &mut Role, step: Step) -> bool {
    match role {
        Role::Miner(r) => miner::is_valid(board, uid, r, step),
        Role::Transporter(r) => transporter::is_valid(board, uid, r, step),
        Role::WaterTransporter(r) => water_transporter::is_valid(board, uid, r, step),
        Role::Protector(r) => protector::is_valid(board, uid, r, step),
        Role::Antagonizer(r) => antagonizer::is_valid(board, uid, r, step),
        Role::Attacker(r) => attacker::is_valid(board, uid, r, step),
        Role::Sidekick(r) => sidekick::is_valid(board, uid, r, step),
        Role::Blockade(r) => blockade::is_valid(board, uid, r, step),
        Role::Cow(r) => cow::is_valid(board, uid, r, step),
        Role::Pillager(r) => pillager::is_valid(board, uid, r, step),
        Role::Recharge(r) => recharge::is_valid(board, uid, r, step),
        Role::Relocate(r) => relocate::is_valid(board, uid, r, step),
        Role::Generator(r) => generator::is_valid(board, uid, r, step),
    }
}

/// The immediate next sub-destination cell (possibly the current cell).
pub fn goal_cell(board: &mut Board, uid: UnitId, role: &Role, step: Step) -> CellId {
    match role {
        Role::Miner(r) => miner::goal_cell(board, uid, r, step),
        Role::Transporter(r) => transporter::goal_cell(board, uid, r, step),
        Role::WaterTransporter(r) => water_transporter::goal_cell(board, uid, r, step),
        Role::Protector(r) => protector::goal_cell(board, uid, r, step),
        Role::Antagonizer(r) => antagonizer::goal_cell(board, uid, r, step),
        Role::Attacker(r) => attacker::goal_cell(board, uid, r, step),
        Role::Sidekick(r) => sidekick::goal_cell(board, uid, r, step),
        Role::Blockade(_) => {
            // Blockade goals are stateful; use the mutable entry point.
            let mut cloned = role.clone();
            let cell = match &mut cloned {
                Role::Blockade(b) => blockade::goal_cell(board, uid, b, step),
                _ => unreachable!(),
            };
            cell
        }
        Role::Cow(r) => cow::goal_cell(board, uid, r, step),
        Role::Pillager(r) => pillager::goal_cell(board, uid, r, step),
        Role::Recharge(r) => recharge::goal_cell(board, uid, r, step),
        Role::Relocate(r) => relocate::goal_cell(board, uid, r, step),
        Role::Generator(r) => generator::goal_cell(board, uid, r, step),
    }
}

/// Advance the role's goal state machine for this simulated turn.
pub fn update_goal(board: &mut Board, uid: UnitId, role: &mut Role, step: Step) {
    match role {
        Role::Miner(r) => miner::update_goal(board, uid, r, step),
        Role::Transporter(r) => transporter::update_goal(board, uid, r, step),
        Role::WaterTransporter(r) => water_transporter::update_goal(board, uid, r, step),
        Role::Protector(r) => protector::update_goal(board, uid, r, step),
        Role::Antagonizer(r) => antagonizer::update_goal(board, uid, r, step),
        Role::Attacker(r) => attacker::update_goal(board, uid, r, step),
        Role::Sidekick(_) => {}
        Role::Blockade(r) => blockade::update_goal(board, uid, r, step),
        Role::Cow(r) => cow::update_goal(board, uid, r, step),
        Role::Pillager(r) => pillager::update_goal(board, uid, r, step),
        Role::Recharge(_) => {}
        Role::Relocate(r) => relocate::update_goal(board, uid, r, step),
        Role::Generator(r) => generator::update_goal(board, uid, r, step),
    }
}

// ----------------------------------------------------------------------
// Shared behavior helpers
// ----------------------------------------------------------------------

/// Standard move-toward-goal used by most roles.
pub(crate) fn do_move_to(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    goal: CellId,
    role: &Role,
) -> Option<UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let need_to_move = cur != goal
        || (board.cell(goal).factory_center
            && board.cell(cur).factory_id != board.cell(goal).factory_id);
    if !need_to_move {
        return None;
    }
    let (move_cell, threats) = board.goal_to_move(step, uid, goal, Some(role));
    let direction = board.direction_to(cur, move_cell);
    let cost = board.unit_move_power(uid, step, direction)?;
    if board.unit(uid).power[i] >= cost {
        return board.unit_do_move(uid, step, direction, false, Some(cost), &threats);
    }
    None
}

/// Drop-everything cargo transfer once back at the factory.
pub(crate) fn do_transfer_resource_to_factory(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    role: &Role,
) -> Option<UnitAction> {
    let i = board.idx(step);
    if !role.goal_is_factory() {
        return None;
    }
    let (ice, ore, water, metal) = {
        let u = board.unit(uid);
        (u.ice[i], u.ore[i], u.water[i], u.metal[i])
    };
    if ice + ore + water + metal == 0 {
        return None;
    }
    let factory = role.factory_id(board)?;
    let cur = board.unit_cell(uid, step);
    if board.man_dist_factory(cur, factory) > 1 {
        return None;
    }
    let transfer_cell = board.neighbor_toward(cur, board.factory_center(factory));
    let mut resources = [
        (Resource::Ice, ice),
        (Resource::Ore, ore),
        (Resource::Water, water),
        (Resource::Metal, metal),
    ];
    resources.sort_by_key(|&(_, amount)| std::cmp::Reverse(amount));
    let (resource, _) = resources[0];
    // The wire amount is "everything": the engine clamps to what is held.
    let amount = 1000;
    let direction = board.direction_to(cur, transfer_cell);
    let cost = board.unit_transfer_cost(uid, step, direction, resource, amount);
    if board.unit(uid).power[i] >= cost {
        return board.unit_do_transfer(uid, step, transfer_cell, resource, amount);
    }
    None
}

/// Standard top-up while standing on a friendly factory.
pub(crate) fn do_power_pickup(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    role: &Role,
    alternate_factory: Option<FactoryId>,
    max_amount: Option<i32>,
) -> Option<UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let cur_factory = board.cell(cur).factory_id?;
    let assigned = alternate_factory.or_else(|| role.factory_id(board))?;

    if (!role.goal_is_factory() && alternate_factory.is_none())
        || board.cell(cur).factory_center
    {
        return None;
    }
    if cur_factory != assigned {
        return None;
    }

    let factory_power =
        board.factory(cur_factory).power[i] - board.factory_power_reserved(cur_factory, step);
    let (battery, power_now) = {
        let u = board.unit(uid);
        (u.spec(&board.rules).battery_capacity, u.power[i])
    };
    let gain = {
        let u = board.unit(uid);
        u.power_gain(&board.rules, step)
    };
    let mut amount = battery - power_now - gain;
    if let Some(cap) = max_amount {
        amount = amount.min(cap);
    }
    let desired = amount;
    amount = amount.min(factory_power);

    if amount > 0 {
        let cost = board.unit_pickup_cost(uid, step, Resource::Power, amount);
        if power_now >= cost {
            return board.unit_do_pickup(uid, step, Resource::Power, amount);
        }
    }
    if desired > 0 && cur_factory == assigned {
        // Wait here for power to accumulate.
        return board.unit_do_no_move(uid, step);
    }
    None
}

/// At finalize time, an idle unit adjacent to a stranded friendly can hand
/// it just enough power to limp home.
pub(crate) fn do_idle_transfer_power_to_low_power_unit(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    role: &Role,
) -> Option<UnitAction> {
    let i = board.idx(step);
    if board.unit(uid).low_power
        || matches!(role.kind(), RoleKind::WaterTransporter | RoleKind::Blockade)
    {
        return None;
    }
    let cur = board.unit_cell(uid, step);
    let my_rubble = board.cell(cur).rubble[i];

    for neighbor in board.neighbors(cur) {
        // Units on factory cells refill there instead.
        if board.cell(neighbor).has_factory() {
            continue;
        }
        let Some(other) = board.unit_at(neighbor, step + 1, Some(board.me.id)) else {
            continue;
        };
        let factory = board
            .unit(other)
            .assigned_factory
            .or_else(|| board.nearest_factory(neighbor, Some(board.me.id)));
        let Some(factory) = factory else {
            continue;
        };
        let factory_dist = board.man_dist_factory(neighbor, factory);
        let (other_power, other_spec) = {
            let o = board.unit(other);
            (o.power[i], *o.spec(&board.rules))
        };
        if other_power >= factory_dist * other_spec.move_cost {
            continue;
        }

        let amount = factory_dist * other_spec.move_cost
            + (my_rubble * other_spec.rubble_movement_cost_centi) / 100
            - other_power;
        let my_power = board.unit(uid).power[i];
        let battery = board.unit(uid).spec(&board.rules).battery_capacity;
        let mut threshold = (battery / 3 + amount).min(300 + amount);
        if amount <= 10 && my_power >= 150 {
            threshold = my_power;
        }
        if my_power >= threshold {
            let direction = board.direction_to(cur, neighbor);
            let cost = board.unit_transfer_cost(uid, step, direction, Resource::Power, amount);
            if my_power >= cost {
                if i == 0 {
                    info!(unit = uid, to = other, amount, "emergency power hand-off");
                }
                return board.unit_do_transfer(uid, step, neighbor, Resource::Power, amount);
            }
        }
    }
    None
}

/// At finalize time, an idle unit on nearly-clear rubble next to our lichen
/// can finish the clearing.
pub(crate) fn do_idle_dig_repair(
    board: &mut Board,
    uid: UnitId,
    step: Step,
    role: &Role,
) -> Option<UnitAction> {
    let i = board.idx(step);
    if board.unit(uid).low_power
        || matches!(role.kind(), RoleKind::WaterTransporter | RoleKind::Blockade)
    {
        return None;
    }
    let cur = board.unit_cell(uid, step);
    let spec = *board.unit(uid).spec(&board.rules);
    let rubble = board.cell(cur).rubble[i];
    if rubble < spec.dig_rubble_removed - 1 || rubble > spec.dig_rubble_removed {
        return None;
    }
    let adjacent_growth = board.neighbors(cur).into_iter().any(|n| {
        let c = board.cell(n);
        (c.lichen[i] > 0 && board.me.owns_strain(c.lichen_strain[i]))
            || c.factory_id.is_some_and(|f| board.factory(f).team == board.me.id)
    });
    if !adjacent_growth {
        return None;
    }
    if board.unit(uid).power[i] >= 6 * spec.move_cost + board.unit_dig_cost(uid, step) {
        if i == 0 {
            debug!(unit = uid, "idle repair dig");
        }
        return board.unit_do_dig(uid, step);
    }
    None
}

/// Count this factory's units currently in `kind` with the same weight
/// class as `uid` (including `uid` itself if it qualifies).
pub(crate) fn count_like_roles(
    board: &Board,
    factory: FactoryId,
    step: Step,
    class: RobotClass,
    kind: RoleKind,
) -> usize {
    board
        .factory_units(factory, step)
        .into_iter()
        .filter(|&u| {
            let unit = board.unit(u);
            unit.class == class && unit.role.as_ref().is_some_and(|r| r.kind() == kind)
        })
        .count()
}

/// The unit's home factory, falling back to the nearest friendly one.
///
/// # Panics
///
/// Panics when the team has no factories left; the match is over then.
pub(crate) fn home_factory(board: &Board, uid: UnitId, step: Step) -> FactoryId {
    if let Some(f) = board.unit(uid).assigned_factory {
        if board.factories.contains_key(&f) {
            return f;
        }
    }
    let cur = board.unit_cell(uid, step);
    let team = board.unit(uid).team;
    board
        .nearest_factory(cur, Some(team))
        .expect("team has at least one factory")
}

/// Emit one of the per-phase actions for `uid`'s role. The driver calls
/// this once per (phase, unit); the role decides whether it responds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Movement phase.
    Move,
    /// Dig phase.
    Dig,
    /// Transfer phase.
    Transfer,
    /// Pickup phase.
    Pickup,
}

/// Run one phase method of `role` for `uid`.
pub fn do_phase(
    board: &mut Board,
    uid: UnitId,
    role: &mut Role,
    step: Step,
    phase: Phase,
) -> Option<UnitAction> {
    match role {
        Role::Miner(r) => miner::do_phase(board, uid, r, step, phase),
        Role::Transporter(r) => transporter::do_phase(board, uid, r, step, phase),
        Role::WaterTransporter(r) => water_transporter::do_phase(board, uid, r, step, phase),
        Role::Protector(r) => protector::do_phase(board, uid, r, step, phase),
        Role::Antagonizer(r) => antagonizer::do_phase(board, uid, r, step, phase),
        Role::Attacker(r) => attacker::do_phase(board, uid, r, step, phase),
        Role::Sidekick(r) => sidekick::do_phase(board, uid, r, step, phase),
        Role::Blockade(r) => blockade::do_phase(board, uid, r, step, phase),
        Role::Cow(r) => cow::do_phase(board, uid, r, step, phase),
        Role::Pillager(r) => pillager::do_phase(board, uid, r, step, phase),
        Role::Recharge(r) => recharge::do_phase(board, uid, r, step, phase),
        Role::Relocate(r) => relocate::do_phase(board, uid, r, step, phase),
        Role::Generator(r) => generator::do_phase(board, uid, r, step, phase),
    }
}

/// Standard "can't stand still if someone is moving here" guard used by the
/// stationary phases (dig/transfer/pickup).
pub(crate) fn cell_taken_next_step(board: &Board, uid: UnitId, step: Step) -> bool {
    let cur = board.unit_cell(uid, step);
    board.unit_at(cur, step + 1, None).is_some()
}

/// Standard "don't sit in danger" guard for the stationary phases.
pub(crate) fn threatened_here(board: &Board, uid: UnitId, step: Step, role: &Role) -> bool {
    let cur = board.unit_cell(uid, step);
    board.threatened_by_opp(step, uid, cur, Some(role)).0 > 0
}

/// Decompose a goal for direction math: the cell a goal currently stands
/// for.
pub(crate) fn goal_target_cell(board: &Board, goal: Goal) -> CellId {
    match goal {
        Goal::Cell(c) => c,
        Goal::Unit(u) => board.unit_cell(u, board.step),
        Goal::Factory(f) => board.factory_center(f),
    }
}
