//! The per-turn simulation driver.
//!
//! One simulated turn runs as `begin_step_simulation` (derived board info) →
//! `update_roles_and_goals` (mode/role revalidation and assignment) → the
//! phase pipeline (a fixed total order of per-role action phases) →
//! `finalize_step` (stand-still defaults and queue slots) →
//! `end_step_simulation` (resource processing and persistence).
//!
//! [`run_turn`] loops simulated turns under a wall-clock allowance and
//! harvests replacement action queues for exactly the entities whose plans
//! changed.
//!
//! The phase pipeline is an explicit ordered list of passes. Its order is
//! load-bearing: transfers must land before their recipients decide moves,
//! blockade pairs must move before ordinary lights, and factories must build
//! after the heavies but before the lights have claimed the center cell.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::actions::{compress_queue, ActionKind, Direction, FactoryAction, Resource, UnitAction};
use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::config::AgentConfig;
use crate::modes::{self, Mode};
use crate::observation::{ActionMap, EmittedAction};
use crate::roles::{self, blockade, protector, Goal, Phase, Role, RoleKind};
use crate::rng;
use crate::rules::RobotClass;
use crate::unit::lie_queue;

// ----------------------------------------------------------------------
// Wall-clock budget
// ----------------------------------------------------------------------

/// Cooperative wall-clock budget for one invocation.
///
/// The look-ahead loop checks the budget after every completed simulated
/// turn; a partially simulated turn is never emitted.
#[derive(Debug)]
pub struct TimeBudget {
    start: Instant,
    allowance: Duration,
}

impl TimeBudget {
    /// Start the clock with the allowance policy for this step: nearly the
    /// full per-invocation time when overage remains, a share of the leftover
    /// overage during the end phase, and a reduced slice once overage runs
    /// low.
    #[must_use]
    pub fn start(config: &AgentConfig, step: Step, overage_ms: u64) -> Self {
        let tpi = config.time_per_invocation_ms;
        let mut allowance_ms = if overage_ms >= 10_000 {
            tpi * 99 / 100
        } else {
            tpi * 8 / 10
        };
        if overage_ms >= 10_000 && step >= config.end_phase {
            let steps_left = u64::from(1000 - step.min(999));
            allowance_ms += overage_ms.saturating_sub(15_000) / steps_left;
        }
        Self {
            start: Instant::now(),
            allowance: Duration::from_millis(allowance_ms),
        }
    }

    /// A budget with a fixed allowance (tests and benches).
    #[must_use]
    pub fn with_allowance(allowance: Duration) -> Self {
        Self {
            start: Instant::now(),
            allowance,
        }
    }

    /// Time spent so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Whether one more simulated turn would likely overrun the allowance,
    /// judging by the average cost of the turns completed so far.
    #[must_use]
    pub fn exhausted(&self, sim_steps: u32) -> bool {
        let elapsed = self.start.elapsed();
        let per_step = elapsed / sim_steps.max(1);
        elapsed + per_step > self.allowance
    }
}

// ----------------------------------------------------------------------
// Begin step
// ----------------------------------------------------------------------

/// Recompute the derived board info needed before roles are updated:
/// per-factory lichen fields and power snapshots, occupancy history and
/// rolling unit statistics (real turn only), and the opposing-mine census.
pub fn begin_step_simulation(board: &mut Board, step: Step) {
    let i = board.idx(step);

    if i == 0 && step == 0 {
        save_static_caches(board);
    }

    if i == 0 {
        let unit_ids: Vec<UnitId> = board.units.keys().copied().collect();
        for uid in unit_ids {
            let cell = board.unit_cell(uid, step);
            board.cell_mut(cell).unit_history[step as usize] = Some(uid);
            save_unit_stats_begin(board, uid);
        }
        let _ = board.opp_mines(None, None);
    }

    let factory_ids: Vec<FactoryId> = board.factories.keys().copied().collect();
    for fid in factory_ids {
        board.calculate_lichen_count(fid, step);
        board.calculate_lichen_dists(fid, step);
        let gain = board.factory_power_gain(fid, step);
        let usage = board.factory_power_usage(fid, step, None);
        let f = board.factory_mut(fid);
        f.power_gain_cache = gain;
        f.power_usage_cache = usage;
        f.action = None;
    }
    for uid in board.my_units() {
        board.unit_mut(uid).action = None;
    }

    board.identify_disconnected_lichen(step);
}

/// Persist the static geometry computed at match start: factory route lists,
/// region labels, factory distances, and the occupancy-history arrays.
fn save_static_caches(board: &mut Board) {
    crate::factory::save_factory_routes(board);
    for id in 0..board.cells.len() as CellId {
        let (region, dists, history) = {
            let c = board.cell(id);
            (c.region, c.factory_dists.clone(), c.unit_history.clone())
        };
        let cache = board.strategy.cell_caches.entry(id).or_default();
        cache.region_saved = true;
        cache.region = region;
        cache.factory_dists = Some(dists);
        cache.unit_history = Some(history);
    }
}

/// Update one unit's rolling statistics from the fresh snapshot: position,
/// power, queued action, and mining/pillage events detected by diffing
/// against the previous turn.
fn save_unit_stats_begin(board: &mut Board, uid: UnitId) {
    let board_step = board.step;
    let cur = board.unit_cell(uid, board_step);
    let (cell_factory, has_ice, has_ore, rubble, lichen_strain) = {
        let c = board.cell(cur);
        (c.factory_id, c.ice, c.ore, c.rubble[0], c.lichen_strain[0])
    };
    let (u_ice, u_ore, u_water, u_power, head, team, dig_removed) = {
        let u = board.unit(uid);
        (
            u.ice[0],
            u.ore[0],
            u.water[0],
            u.power[0],
            u.action_queue.first().copied(),
            u.team,
            u.spec(&board.rules).dig_rubble_removed,
        )
    };

    let (prev_cell, prev_ice, prev_ore, prev_water, prev_rubble, prev_strain) = {
        let stats = board.strategy.stats_mut(uid, board_step);
        (
            stats.prev_cell_id,
            stats.prev_ice,
            stats.prev_ore,
            stats.prev_water,
            stats.prev_rubble,
            stats.prev_lichen_strain,
        )
    };

    let stationary = prev_cell == Some(cur);
    let mined = stationary
        && ((has_ice && u_ice > prev_ice)
            || (has_ore && u_ore > prev_ore)
            || ((has_ice || has_ore) && rubble == prev_rubble - dig_removed));
    let pillaged =
        stationary && prev_strain != -1 && lichen_strain == -1 && prev_rubble == 0 && rubble > 0;

    if u_water == 0 && prev_water > 0 && team == board.opp.id {
        debug!(unit = uid, cell = cur, "opposing water transfer spotted");
    }

    let stats = board.strategy.stats_mut(uid, board_step);
    if cell_factory.is_some() {
        stats.last_factory_id = cell_factory;
    }
    stats.cell_ids.push(cur);
    stats.power.push(u_power);
    stats.next_queued_action.push(head);
    if mined {
        stats.mine_events.push((cur, board_step));
    }
    if pillaged {
        stats
            .pillage_events
            .push((cur, prev_strain, board_step.saturating_sub(1)));
    }
    stats.prev_cell_id = Some(cur);
    stats.prev_ice = u_ice;
    stats.prev_ore = u_ore;
    stats.prev_prev_water = stats.prev_water;
    stats.prev_water = u_water;
    stats.prev_rubble = rubble;
    stats.prev_lichen_strain = lichen_strain;

    if pillaged && prev_strain >= 0 {
        board
            .strategy
            .factory_caches
            .entry(prev_strain as FactoryId)
            .or_default()
            .pillage_events
            .push((cur, board_step));
    }
}

// ----------------------------------------------------------------------
// Roles and goals
// ----------------------------------------------------------------------

/// Revalidate factory modes and unit roles, assign work to everything
/// without any, and advance every role's goal state machine.
pub fn update_roles_and_goals(board: &mut Board, step: Step) {
    let i = board.idx(step);

    // Modes that no longer hold collapse; their validity checks release the
    // affected units themselves.
    for fid in board.my_factories() {
        if let Some(mode) = board.factory(fid).mode.clone() {
            if !modes::is_valid(board, fid, &mode, step) {
                board.factory_mut(fid).mode = None;
            }
        }
    }

    // Special transitions trump whatever mode a factory has.
    for fid in board.my_factories() {
        if let Some(new_mode) = modes::transition(board, fid, step) {
            if i == 0 {
                info!(factory = fid, mode = new_mode.kind_name(), "mode transition");
            }
            board.factory_mut(fid).mode = Some(new_mode);
        }
    }

    // Fill-in chain for modeless factories. At match start walk the list in
    // reverse so a double ice-superiority leaves the better factory default.
    let mut fill_ids = board.my_factories();
    if step == 0 {
        fill_ids.reverse();
    }
    for fid in fill_ids {
        if board.factory(fid).mode.is_none() {
            let mode = modes::new_mode(board, fid, step);
            if i == 0 {
                info!(factory = fid, mode = mode.kind_name(), "mode set");
            }
            board.factory_mut(fid).mode = Some(mode);
        }
    }

    // Roles that survive revalidation re-claim their assignments for this
    // simulated turn; the rest release everything and go back in the pool.
    for uid in board.my_units() {
        if board.unit(uid).role.is_none() {
            continue;
        }
        let mut role = board.unit(uid).role.clone().expect("checked above");
        let valid = roles::is_valid(board, uid, &mut role, step);
        if board.unit(uid).role.is_some() {
            board.unit_mut(uid).role = Some(role);
        }
        if valid && board.unit(uid).role.is_some() {
            roles::unit_set_role(board, uid, step, None);
        } else {
            roles::unit_unset_role(board, uid, step);
        }
    }

    // Low-power flags for our units, and for theirs on the real turn.
    let all_units: Vec<UnitId> = board.units.keys().copied().collect();
    for uid in all_units {
        let team = board.unit(uid).team;
        if team == board.me.id || (i == 0 && team == board.opp.id) {
            board.update_low_power_flag(step, uid);
        }
    }

    // Role transitions for units that already have work.
    for uid in board.my_units() {
        let fid = roles::home_factory(board, uid, step);
        if let Some(new_role) = modes::transition_role(board, fid, uid, step) {
            roles::unit_set_role(board, uid, step, Some(new_role));
        }
    }

    // Assignment loop: giving one unit a role can displace another, so keep
    // sweeping until the pool drains. A non-converging sweep is a logic bug.
    let mut sweeps = 0;
    loop {
        let roleless: Vec<UnitId> = board
            .my_units()
            .into_iter()
            .filter(|&u| board.unit(u).role.is_none())
            .collect();
        if roleless.is_empty() {
            break;
        }
        sweeps += 1;
        if sweeps > 5 {
            warn!(step, pool = roleless.len(), "role assignment still sweeping");
        }
        assert!(
            sweeps <= 100,
            "role assignment failed to converge at step {step}: {roleless:?}"
        );
        for uid in roleless {
            let fid = roles::home_factory(board, uid, step);
            let new_role = modes::new_role(board, fid, uid, step);
            roles::unit_set_role(board, uid, step, Some(new_role));
        }
    }

    for uid in board.my_units() {
        let Some(mut role) = board.unit(uid).role.clone() else {
            continue;
        };
        roles::update_goal(board, uid, &mut role, step);
        board.unit_mut(uid).role = Some(role);
    }
}

// ----------------------------------------------------------------------
// Phase helpers
// ----------------------------------------------------------------------

/// Guards applied before a stationary phase may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    /// No precondition.
    Always,
    /// The unit's cell must not be claimed for next turn.
    CellFree,
    /// Cell free and no opposing threat on the current cell.
    CellFreeSafe,
}

fn unit_acted(board: &Board, uid: UnitId, step: Step) -> bool {
    board.unit(uid).acted_step == Some(step)
}

fn mark_acted(board: &mut Board, uid: UnitId, step: Step, action: Option<UnitAction>) {
    if action.is_some() {
        let u = board.unit_mut(uid);
        u.action = action;
        u.acted_step = Some(step);
    }
}

fn class_matches(board: &Board, uid: UnitId, heavy: Option<bool>) -> bool {
    heavy.map_or(true, |h| h == (board.unit(uid).class == RobotClass::Heavy))
}

/// Run one `(role kind, phase)` pass over the not-yet-acted units.
#[allow(clippy::fn_params_excessive_bools)]
fn role_phase(
    board: &mut Board,
    units: &[UnitId],
    step: Step,
    kind: RoleKind,
    phase: Phase,
    heavy: Option<bool>,
    lie_blocks: bool,
    hold: Hold,
) {
    for &uid in units {
        if unit_acted(board, uid, step) || !class_matches(board, uid, heavy) {
            continue;
        }
        let Some(role) = board.unit(uid).role.clone() else {
            continue;
        };
        if role.kind() != kind {
            continue;
        }
        if lie_blocks && board.unit(uid).lying_at(step) {
            continue;
        }
        match hold {
            Hold::Always => {}
            Hold::CellFree => {
                if roles::cell_taken_next_step(board, uid, step) {
                    continue;
                }
            }
            Hold::CellFreeSafe => {
                if roles::cell_taken_next_step(board, uid, step)
                    || roles::threatened_here(board, uid, step, &role)
                {
                    continue;
                }
            }
        }
        let mut role = role;
        let action = roles::do_phase(board, uid, &mut role, step, phase);
        if board.unit(uid).role.is_some() {
            board.unit_mut(uid).role = Some(role);
        }
        mark_acted(board, uid, step, action);
    }
}

/// Pillager digs have their own courage rules: one-way raiders and endgame
/// heavies dig through threats the other roles would respect.
fn pillager_dig_phase(board: &mut Board, units: &[UnitId], step: Step, heavy: Option<bool>) {
    let i = board.idx(step);
    for &uid in units {
        if unit_acted(board, uid, step) || !class_matches(board, uid, heavy) {
            continue;
        }
        let Some(Role::Pillager(p)) = board.unit(uid).role.clone() else {
            continue;
        };
        if roles::cell_taken_next_step(board, uid, step) {
            continue;
        }
        let role = Role::Pillager(p.clone());
        if roles::threatened_here(board, uid, step, &role) {
            let is_heavy = board.unit(uid).class == RobotClass::Heavy;
            let timid_light = step < board.config.end_phase && !is_heavy && !p.one_way;
            let timid_heavy = is_heavy && (step < 980 || board.unit(uid).power[i] >= 210);
            if timid_light || timid_heavy {
                continue;
            }
        }
        let mut role = role;
        let action = roles::do_phase(board, uid, &mut role, step, Phase::Dig);
        if board.unit(uid).role.is_some() {
            board.unit_mut(uid).role = Some(role);
        }
        mark_acted(board, uid, step, action);
    }
}

/// Recharge phases split into off-factory and at-factory passes so returning
/// units cede right-of-way to everyone already home.
fn recharge_phase(
    board: &mut Board,
    units: &[UnitId],
    step: Step,
    phase: Phase,
    heavy: Option<bool>,
    at_factory: Option<bool>,
) {
    for &uid in units {
        if unit_acted(board, uid, step) || !class_matches(board, uid, heavy) {
            continue;
        }
        let Some(role @ Role::Recharge(_)) = board.unit(uid).role.clone() else {
            continue;
        };
        if let Some(want) = at_factory {
            let cur = board.unit_cell(uid, step);
            if want != board.cell(cur).has_factory() {
                continue;
            }
        }
        if phase == Phase::Transfer
            && (roles::cell_taken_next_step(board, uid, step)
                || roles::threatened_here(board, uid, step, &role))
        {
            continue;
        }
        let mut role = role;
        let action = roles::do_phase(board, uid, &mut role, step, phase);
        if board.unit(uid).role.is_some() {
            board.unit_mut(uid).role = Some(role);
        }
        mark_acted(board, uid, step, action);
    }
}

/// Blockade moves resolve engaged pairs first and the primary of each pair
/// before its secondary; the choreography depends on this order.
fn blockade_move_phase(board: &mut Board, units: &[UnitId], step: Step, primary: bool, engaged: bool) {
    for &uid in units {
        if unit_acted(board, uid, step)
            || board.unit(uid).class == RobotClass::Heavy
            || board.unit(uid).lying_at(step)
        {
            continue;
        }
        let Some(Role::Blockade(mut b)) = board.unit(uid).role.clone() else {
            continue;
        };
        let is_primary = blockade::is_primary(board, uid, &mut b);
        let is_engaged = blockade::engaged(board, uid, &mut b, step);
        // Persist the primary/engagement caches even when filtered out.
        if board.unit(uid).role.is_some() {
            board.unit_mut(uid).role = Some(Role::Blockade(b.clone()));
        }
        if is_primary != primary || is_engaged != engaged {
            continue;
        }
        let mut role = Role::Blockade(b);
        let action = roles::do_phase(board, uid, &mut role, step, Phase::Move);
        if board.unit(uid).role.is_some() {
            board.unit_mut(uid).role = Some(role);
        }
        mark_acted(board, uid, step, action);
    }
}

/// A loaded water transporter moves ahead of the blockade dance when its
/// destination factory will run dry before a cautious route gets there.
fn water_transporter_emergency_phase(board: &mut Board, units: &[UnitId], step: Step) {
    for &uid in units {
        if unit_acted(board, uid, step) || board.unit(uid).class == RobotClass::Heavy {
            continue;
        }
        let Some(Role::WaterTransporter(wt)) = board.unit(uid).role.clone() else {
            continue;
        };
        if crate::roles::water_transporter::emergency(board, uid, &wt, step) {
            let mut role = Role::WaterTransporter(wt);
            let action = roles::do_phase(board, uid, &mut role, step, Phase::Move);
            if board.unit(uid).role.is_some() {
                board.unit_mut(uid).role = Some(role);
            }
            mark_acted(board, uid, step, action);
        }
    }
}

/// The protected-miner passes: a miner with a stationed protector commits
/// its dig/transfer/move only when the protector is in position and not
/// about to strike, so the two never trade places blind.
fn protected_miner_phase(
    board: &mut Board,
    units: &[UnitId],
    step: Step,
    phase: Phase,
    heavy: Option<bool>,
) {
    let i = board.idx(step);
    for &uid in units {
        if unit_acted(board, uid, step)
            || !class_matches(board, uid, heavy)
            || board.unit(uid).lying_at(step)
        {
            continue;
        }
        let Some(Role::Miner(m)) = board.unit(uid).role.clone() else {
            continue;
        };
        if phase != Phase::Move && roles::cell_taken_next_step(board, uid, step) {
            continue;
        }
        let Some(&pid) = board.unit(uid).protectors[i].first() else {
            continue;
        };
        let Some(Role::Protector(mut p)) = board.get_unit(pid).and_then(|u| u.role.clone()) else {
            continue;
        };
        let cur = board.unit_cell(uid, step);

        // Safe to commit only while the protector stands its post and has
        // not armed a strike this turn. Strike state is real-turn-only.
        let covered = i == 0
            && protector::is_protecting(board, pid, &p, step)
            && !protector::should_strike(board, pid, &mut p, step);
        if board.get_unit(pid).is_some_and(|u| u.role.is_some()) {
            board.unit_mut(pid).role = Some(Role::Protector(p.clone()));
        }

        let action = match phase {
            Phase::Dig => {
                if i == 0 && m.goal_is_resource() && cur == m.resource_cell && covered {
                    let mut role = Role::Miner(m.clone());
                    let a = roles::do_phase(board, uid, &mut role, step, Phase::Dig);
                    if board.unit(uid).role.is_some() {
                        board.unit_mut(uid).role = Some(role);
                    }
                    a
                } else {
                    None
                }
            }
            Phase::Transfer => {
                let at_home = board.man_dist_factory(cur, m.factory) <= 1;
                let on_home = board.cell(cur).factory_id == Some(m.factory);
                let goal_home = m.goal == Goal::Factory(m.factory);
                if (i == 0 && goal_home && at_home && covered) || (goal_home && on_home) {
                    let mut role = Role::Miner(m.clone());
                    let a = roles::do_phase(board, uid, &mut role, step, Phase::Transfer);
                    if board.unit(uid).role.is_some() {
                        board.unit_mut(uid).role = Some(role);
                    }
                    a
                } else {
                    None
                }
            }
            Phase::Pickup => {
                let mut role = Role::Miner(m.clone());
                let a = roles::do_phase(board, uid, &mut role, step, Phase::Pickup);
                if board.unit(uid).role.is_some() {
                    board.unit_mut(uid).role = Some(role);
                }
                a
            }
            Phase::Move => {
                let role = Role::Miner(m.clone());
                if i == 0
                    && m.goal_is_resource()
                    && board.man_dist(cur, m.resource_cell) == 1
                    && covered
                {
                    debug!(unit = uid, "protected miner returns to its resource cell");
                    roles::do_move_to(board, uid, step, m.resource_cell, &role)
                } else if i == 0
                    && m.goal == Goal::Factory(m.factory)
                    && board.man_dist(cur, p.factory_cell) == 1
                {
                    debug!(unit = uid, "protected miner heads for the protector post");
                    roles::do_move_to(board, uid, step, p.factory_cell, &role)
                } else {
                    None
                }
            }
        };
        mark_acted(board, uid, step, action);
    }
}

/// Default stand-still for everything that has not acted by the end of its
/// class's passes. Even a no-move can cost power (queue refresh, forced
/// displacement), so it runs as a real phase.
fn no_move_phase(board: &mut Board, units: &[UnitId], step: Step, heavy: Option<bool>) {
    for &uid in units {
        if unit_acted(board, uid, step) || !class_matches(board, uid, heavy) {
            continue;
        }
        let action = board.unit_do_no_move(uid, step);
        mark_acted(board, uid, step, action);
    }
}

/// Factory passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FactoryPass {
    /// Forge factories build ahead of the light transporters.
    ForgeBuild,
    /// Regular build decision.
    Build,
    /// Endgame watering, resolved before the light passes.
    EndPhaseWater,
    /// Regular watering, after digs have repriced the growth set.
    Water,
    /// Explicit do-nothing so the factory counts as acted.
    Idle,
}

fn factory_phase(board: &mut Board, factories: &[FactoryId], step: Step, pass: FactoryPass) {
    for &fid in factories {
        if board.factory(fid).acted_step == Some(step) {
            continue;
        }
        let action = match pass {
            FactoryPass::ForgeBuild => {
                if board.factory(fid).mode.as_ref().is_some_and(Mode::is_forge) {
                    modes::do_build(board, fid, step)
                } else {
                    None
                }
            }
            FactoryPass::Build => modes::do_build(board, fid, step),
            FactoryPass::EndPhaseWater => {
                if step >= board.config.end_phase {
                    modes::do_water(board, fid, step)
                } else {
                    None
                }
            }
            FactoryPass::Water => modes::do_water(board, fid, step),
            FactoryPass::Idle => Some(FactoryAction::None),
        };
        if action.is_some() {
            let f = board.factory_mut(fid);
            f.action = action;
            f.acted_step = Some(step);
        }
    }
}

// ----------------------------------------------------------------------
// Endgame and opportunistic special phases
// ----------------------------------------------------------------------

fn threats_at(board: &Board, uid: UnitId, step: Step, cell: CellId) -> Vec<UnitId> {
    if board.idx(step) == 0 {
        board.threatened_by_opp(step, uid, cell, None).1
    } else {
        Vec::new()
    }
}

/// Penultimate step: reposition onto the juiciest opposing lichen so the
/// final-step destruct lands where it hurts.
fn do_move_step998(board: &mut Board, uid: UnitId, step: Step) -> Option<UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let spec = *board.unit(uid).spec(&board.rules);
    let destruct_cost = if board.unit(uid).class == RobotClass::Light {
        spec.self_destruct_cost
    } else {
        spec.dig_cost
    };
    let power = board.unit(uid).power[i];

    // Too poor to move and still destruct: settle where we stand.
    if destruct_cost <= power && power < spec.move_cost + destruct_cost {
        return do_dig_step999(board, uid, step, true)
            .or_else(|| do_move_step999(board, uid, step, true));
    }
    // Too poor even to destruct: aim for a lichen collision instead.
    if power < destruct_cost {
        return do_move_step999(board, uid, step, true);
    }

    let mut best: Option<(CellId, i32)> = None;
    for move_cell in std::iter::once(cur).chain(board.neighbors(cur)) {
        let (lichen, strain) = {
            let c = board.cell(move_cell);
            (c.lichen[i], c.lichen_strain[i])
        };
        if lichen == 0 || !board.opp.owns_strain(strain) {
            continue;
        }
        let direction = board.direction_to(cur, move_cell);
        let Some(cost) = board.unit_move_power(uid, step, direction) else {
            continue;
        };
        if power >= cost + destruct_cost && best.map_or(true, |(_, b)| lichen > b) {
            best = Some((move_cell, lichen));
        }
    }
    let (best_cell, _) = best?;
    if best_cell == cur {
        return do_dig_step999(board, uid, step, true);
    }
    let direction = board.direction_to(cur, best_cell);
    let cost = board.unit_move_power(uid, step, direction)?;
    if power >= cost + destruct_cost {
        let threats = threats_at(board, uid, step, best_cell);
        return board.unit_do_move(uid, step, direction, false, Some(cost), &threats);
    }
    None
}

/// Final step: engineer a lichen-destroying collision, or at least get off
/// our own lichen.
fn do_move_step999(board: &mut Board, uid: UnitId, step: Step, force: bool) -> Option<UnitAction> {
    debug_assert!(step == 999 || force);
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let spec = *board.unit(uid).spec(&board.rules);
    let power = board.unit(uid).power[i];
    let destruct_cost = if board.unit(uid).class == RobotClass::Light {
        spec.self_destruct_cost
    } else {
        spec.dig_cost
    };
    let (cur_lichen, cur_strain) = {
        let c = board.cell(cur);
        (c.lichen[i], c.lichen_strain[i])
    };

    // Crash into opposing lichen when destructing is out of budget or there
    // is nothing worth destructing under us.
    if power >= spec.move_cost
        && (power < destruct_cost || cur_lichen == 0 || board.me.owns_strain(cur_strain))
    {
        let mut best: Option<(CellId, i64)> = None;
        for move_cell in std::iter::once(cur).chain(board.neighbors(cur)) {
            let (lichen, strain) = {
                let c = board.cell(move_cell);
                (c.lichen[i], c.lichen_strain[i])
            };
            if lichen == 0 || !board.opp.owns_strain(strain) {
                continue;
            }
            let mut score: i64 = if board.unit_at(move_cell, step + 1, None).is_some() {
                1_234_000
            } else {
                board.threatened_by_opp_all(step, uid, move_cell).0 * 1000
            };
            if board.unit_at(move_cell, step, Some(board.opp.id)).is_some() {
                score += 1000;
            }
            if score > 0 {
                score += i64::from(lichen);
            }
            if score > 0 && best.map_or(true, |(_, b)| score > b) {
                best = Some((move_cell, score));
            }
        }
        if let Some((best_cell, _)) = best {
            let direction = board.direction_to(cur, best_cell);
            if let Some(cost) = board.unit_move_power(uid, step, direction) {
                if power >= cost {
                    let threats = threats_at(board, uid, step, best_cell);
                    return board.unit_do_move(uid, step, direction, false, Some(cost), &threats);
                }
            }
        }
    }

    if cur_lichen == 0 {
        let cost = board
            .unit_move_power(uid, step, Direction::Center)
            .expect("center move is always on board");
        if power >= cost {
            return board.unit_do_move(uid, step, Direction::Center, false, Some(cost), &[]);
        }
    }

    if board.me.owns_strain(cur_strain) {
        // Get off our own field: prefer empty or hostile ground, else the
        // least (lichen x collision risk) of the remaining options.
        let mut best: Option<(CellId, i64)> = None;
        for move_cell in std::iter::once(cur).chain(board.neighbors(cur)) {
            let direction = board.direction_to(cur, move_cell);
            let Some(cost) = board.unit_move_power(uid, step, direction) else {
                continue;
            };
            if power < cost {
                continue;
            }
            let (lichen, strain) = {
                let c = board.cell(move_cell);
                (c.lichen[i], c.lichen_strain[i])
            };
            let key: i64 = if lichen == 0 || !board.me.owns_strain(strain) {
                i64::MAX
            } else {
                let risk = board.threatened_by_opp_all(step, uid, move_cell).0.max(1);
                -(i64::from(lichen) * risk)
            };
            if best.map_or(true, |(_, b)| key > b) {
                best = Some((move_cell, key));
            }
        }
        if let Some((best_cell, _)) = best {
            let direction = board.direction_to(cur, best_cell);
            let cost = board.unit_move_power(uid, step, direction)?;
            if power >= cost {
                let threats = threats_at(board, uid, step, best_cell);
                return board.unit_do_move(uid, step, direction, false, Some(cost), &threats);
            }
        }
    }
    None
}

/// Final step: destruct on opposing lichen, or clear the last rubble next to
/// our own field.
fn do_dig_step999(board: &mut Board, uid: UnitId, step: Step, force: bool) -> Option<UnitAction> {
    debug_assert!(step == 999 || force);
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let spec = *board.unit(uid).spec(&board.rules);
    let power = board.unit(uid).power[i];
    let (cur_lichen, cur_strain, cur_rubble) = {
        let c = board.cell(cur);
        (c.lichen[i], c.lichen_strain[i], c.rubble[i])
    };

    if cur_lichen > 0 && board.opp.owns_strain(cur_strain) {
        if power >= board.unit_selfdestruct_cost(uid, step) {
            return board.unit_do_selfdestruct(uid, step);
        }
        if power >= board.unit_dig_cost(uid, step) {
            return board.unit_do_dig(uid, step);
        }
    }

    if cur_rubble > 0 && cur_rubble <= spec.dig_rubble_removed {
        let adjacent_growth = board.neighbors(cur).into_iter().any(|n| {
            let c = board.cell(n);
            (c.lichen[i] > 0 && board.me.owns_strain(c.lichen_strain[i]))
                || c.factory_id.is_some_and(|f| board.factory(f).team == board.me.id)
        });
        if adjacent_growth && power >= board.unit_dig_cost(uid, step) {
            return board.unit_do_dig(uid, step);
        }
    }
    None
}

/// A unit standing on a factory about to run out of water salvages what it
/// can before the explosion, unless a rescue shipment is in sight.
fn do_exploding_factory_pickup(board: &mut Board, uid: UnitId, step: Step) -> Option<UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let fid = board.cell(cur).factory_id?;
    {
        let f = board.factory(fid);
        if f.water[i] != 0 || f.ice[i] >= 4 {
            return None;
        }
    }
    if board.unit_at(cur, step + 1, None).is_some() {
        return None;
    }

    // A nearby courier with water or ice means the factory may yet live.
    let mut watch = vec![board.factory_center(fid)];
    watch.extend(board.factory_cells(fid));
    watch.extend(board.factory_neighbors(fid));
    for cell in watch {
        if let Some(other) = board.unit_at(cell, step, Some(board.me.id)) {
            let o = board.unit(other);
            if o.water[i] >= 2 || o.ice[i] >= 8 {
                return None;
            }
        }
    }

    let spec = *board.unit(uid).spec(&board.rules);
    let (f_power, f_metal, f_ore) = {
        let f = board.factory(fid);
        (f.power[i], f.metal[i], f.ore[i])
    };
    let u = board.unit(uid);
    let (u_power, u_metal, u_ore) = (u.power[i], u.metal[i], u.ore[i]);
    if f_power > 0 {
        let amount = spec.battery_capacity - u_power;
        if amount > 0 && u_power >= board.unit_pickup_cost(uid, step, Resource::Power, amount) {
            return board.unit_do_pickup(uid, step, Resource::Power, amount);
        }
    }
    if f_metal > 0 {
        let amount = spec.cargo_space - u_metal;
        if amount > 0 && u_power >= board.unit_pickup_cost(uid, step, Resource::Metal, amount) {
            return board.unit_do_pickup(uid, step, Resource::Metal, amount);
        }
    }
    if f_ore > 0 {
        let amount = spec.cargo_space - u_ore;
        if amount > 0 && u_power >= board.unit_pickup_cost(uid, step, Resource::Ore, amount) {
            return board.unit_do_pickup(uid, step, Resource::Ore, amount);
        }
    }
    None
}

/// Opportunistic real-turn move onto a cell an equal-weight opponent has
/// publicly queued into, taken only with spare power and a deterministic
/// minority of the time.
fn do_move_win_collision(board: &mut Board, uid: UnitId, step: Step) -> Option<UnitAction> {
    let i = board.idx(step);
    let cur = board.unit_cell(uid, step);
    let spec = *board.unit(uid).spec(&board.rules);
    let power = board.unit(uid).power[i];
    if power < spec.battery_capacity / 3 {
        return None;
    }

    // Roles with delicate positioning sit this one out.
    if let Some(role) = &board.unit(uid).role {
        let skip = match role.kind() {
            RoleKind::WaterTransporter
            | RoleKind::Blockade
            | RoleKind::Generator
            | RoleKind::Relocate
            | RoleKind::Attacker
            | RoleKind::Sidekick
            | RoleKind::Protector
            | RoleKind::Antagonizer => true,
            RoleKind::Recharge => !board.cell(cur).has_factory(),
            RoleKind::Miner => board.unit(uid).class == RobotClass::Heavy,
            _ => false,
        };
        if skip {
            return None;
        }
    }

    if !rng::chance(
        u64::from(step) + u64::from(uid),
        board.config.win_collision_permille,
    ) {
        return None;
    }

    let my_class = board.unit(uid).class;
    for move_cell in board.neighbors(cur) {
        let (has_factory, lichen, strain) = {
            let c = board.cell(move_cell);
            (c.has_factory(), c.lichen[i], c.lichen_strain[i])
        };
        if has_factory || (lichen > 0 && board.me.owns_strain(strain)) {
            continue;
        }
        for neighbor in board.neighbors(move_cell) {
            let Some(opp) = board.unit_at(neighbor, step, Some(board.opp.id)) else {
                continue;
            };
            let opp_unit = board.unit(opp);
            if opp_unit.class != my_class {
                continue;
            }
            let Some(head) = opp_unit.action_queue.first() else {
                continue;
            };
            if head.kind != ActionKind::Move || head.direction == Direction::Center {
                continue;
            }
            let (dx, dy) = head.direction.delta();
            if board.neighbor(neighbor, dx, dy) != Some(move_cell) {
                continue;
            }
            let my_power = power - spec.action_queue_power_cost;
            if my_power <= opp_unit.power[i] {
                continue;
            }
            if !board.safe_to_move(uid, step, move_cell)
                || board.threatened_by_opp(step, uid, move_cell, None).0 > 0
            {
                continue;
            }
            let direction = board.direction_to(cur, move_cell);
            let Some(cost) = board.unit_move_power(uid, step, direction) else {
                continue;
            };
            if power >= cost {
                info!(unit = uid, opp, cell = move_cell, "win-collision move");
                let threats = threats_at(board, uid, step, move_cell);
                return board.unit_do_move(uid, step, direction, false, Some(cost), &threats);
            }
        }
    }
    None
}

/// Run one of the special per-unit passes across the not-yet-acted units.
fn special_phase(
    board: &mut Board,
    units: &[UnitId],
    step: Step,
    lie_blocks: bool,
    f: impl Fn(&mut Board, UnitId, Step) -> Option<UnitAction>,
) {
    for &uid in units {
        if unit_acted(board, uid, step) {
            continue;
        }
        if lie_blocks && board.unit(uid).lying_at(step) {
            continue;
        }
        let action = f(board, uid, step);
        mark_acted(board, uid, step, action);
    }
}

// ----------------------------------------------------------------------
// The canonical pipeline
// ----------------------------------------------------------------------

/// Run the full per-turn action-resolution pipeline.
///
/// `units` and `factories` are snapshots taken before the first pass; robots
/// built mid-turn join the pipeline on the next simulated turn.
#[allow(clippy::too_many_lines)]
pub fn run_phase_pipeline(board: &mut Board, units: &[UnitId], factories: &[FactoryId], step: Step) {
    use self::FactoryPass as FP;
    use crate::roles::Phase::{Dig, Move, Pickup, Transfer};
    use crate::roles::RoleKind as RK;

    let heavy = Some(true);
    let light = Some(false);

    // Endgame protocols and opportunistic openers.
    if step == 998 {
        special_phase(board, units, step, true, do_move_step998);
    }
    if step == 999 {
        special_phase(board, units, step, true, |b, u, s| do_dig_step999(b, u, s, false));
        special_phase(board, units, step, true, |b, u, s| do_move_step999(b, u, s, false));
    }
    special_phase(board, units, step, false, do_exploding_factory_pickup);
    if step == board.step {
        special_phase(board, units, step, true, do_move_win_collision);
    }

    // Heavy protected miners act before their protectors decide anything.
    protected_miner_phase(board, units, step, Transfer, heavy);
    protected_miner_phase(board, units, step, Dig, heavy);
    protected_miner_phase(board, units, step, Pickup, heavy);
    protected_miner_phase(board, units, step, Move, heavy);

    role_phase(board, units, step, RK::Protector, Transfer, heavy, true, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Protector, Pickup, heavy, true, Hold::CellFree);
    role_phase(board, units, step, RK::Protector, Move, heavy, true, Hold::Always);

    role_phase(board, units, step, RK::Miner, Transfer, heavy, true, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Miner, Dig, heavy, true, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Miner, Pickup, heavy, true, Hold::CellFree);
    role_phase(board, units, step, RK::Miner, Move, heavy, false, Hold::Always);

    role_phase(board, units, step, RK::Transporter, Transfer, heavy, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Transporter, Pickup, heavy, false, Hold::CellFree);
    role_phase(board, units, step, RK::Transporter, Move, heavy, false, Hold::Always);

    recharge_phase(board, units, step, Transfer, heavy, Some(false));
    recharge_phase(board, units, step, Move, heavy, Some(false));

    // Light blockades and water couriers run before everything else light;
    // the pair choreography and delivery deadlines cannot wait.
    role_phase(board, units, step, RK::Blockade, Transfer, light, true, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Blockade, Pickup, light, true, Hold::CellFree);
    role_phase(board, units, step, RK::WaterTransporter, Transfer, light, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::WaterTransporter, Pickup, light, false, Hold::CellFree);
    water_transporter_emergency_phase(board, units, step);
    blockade_move_phase(board, units, step, true, true);
    blockade_move_phase(board, units, step, false, true);
    blockade_move_phase(board, units, step, true, false);
    blockade_move_phase(board, units, step, false, false);
    role_phase(board, units, step, RK::WaterTransporter, Move, light, false, Hold::Always);

    recharge_phase(board, units, step, Transfer, heavy, Some(true));
    recharge_phase(board, units, step, Move, heavy, Some(true));

    // Forges build before the light transporters so metal becomes robots
    // while the local power economy still supports them.
    factory_phase(board, factories, step, FP::ForgeBuild);

    role_phase(board, units, step, RK::Transporter, Transfer, light, false, Hold::CellFreeSafe);
    transporter_ice_pickup_phase(board, units, step);
    role_phase(board, units, step, RK::Transporter, Pickup, light, false, Hold::CellFree);
    role_phase(board, units, step, RK::Transporter, Move, light, false, Hold::Always);

    role_phase(board, units, step, RK::Attacker, Transfer, heavy, true, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Attacker, Pickup, heavy, true, Hold::CellFree);
    role_phase(board, units, step, RK::Attacker, Move, heavy, true, Hold::Always);
    role_phase(board, units, step, RK::Sidekick, Move, heavy, true, Hold::Always);

    role_phase(board, units, step, RK::Relocate, Transfer, heavy, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Relocate, Pickup, heavy, false, Hold::CellFree);
    role_phase(board, units, step, RK::Relocate, Move, heavy, false, Hold::Always);

    pillager_dig_phase(board, units, step, heavy);
    role_phase(board, units, step, RK::Pillager, Transfer, heavy, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Pillager, Pickup, heavy, false, Hold::CellFree);
    role_phase(board, units, step, RK::Pillager, Move, heavy, false, Hold::Always);

    role_phase(board, units, step, RK::Antagonizer, Transfer, heavy, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Antagonizer, Pickup, heavy, false, Hold::CellFree);
    role_phase(board, units, step, RK::Antagonizer, Dig, heavy, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Antagonizer, Move, heavy, false, Hold::Always);

    role_phase(board, units, step, RK::Cow, Dig, heavy, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Cow, Transfer, heavy, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Cow, Pickup, heavy, false, Hold::CellFree);
    role_phase(board, units, step, RK::Cow, Move, heavy, false, Hold::Always);

    role_phase(board, units, step, RK::Generator, Dig, heavy, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Generator, Transfer, heavy, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Generator, Move, heavy, false, Hold::Always);

    no_move_phase(board, units, step, heavy);

    factory_phase(board, factories, step, FP::EndPhaseWater);
    factory_phase(board, factories, step, FP::Build);

    // The light passes mirror the heavy ones.
    role_phase(board, units, step, RK::Miner, Transfer, light, true, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Miner, Dig, light, true, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Miner, Pickup, light, true, Hold::CellFree);
    role_phase(board, units, step, RK::Miner, Move, light, false, Hold::Always);

    role_phase(board, units, step, RK::Relocate, Transfer, light, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Relocate, Pickup, light, false, Hold::CellFree);
    role_phase(board, units, step, RK::Relocate, Move, light, false, Hold::Always);

    role_phase(board, units, step, RK::Attacker, Transfer, light, true, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Attacker, Pickup, light, true, Hold::CellFree);
    role_phase(board, units, step, RK::Attacker, Move, light, true, Hold::Always);
    role_phase(board, units, step, RK::Sidekick, Move, light, true, Hold::Always);

    recharge_phase(board, units, step, Transfer, light, None);
    recharge_phase(board, units, step, Move, light, None);

    pillager_dig_phase(board, units, step, light);
    role_phase(board, units, step, RK::Pillager, Transfer, light, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Pillager, Pickup, light, false, Hold::CellFree);
    role_phase(board, units, step, RK::Pillager, Move, light, false, Hold::Always);

    role_phase(board, units, step, RK::Antagonizer, Transfer, light, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Antagonizer, Pickup, light, false, Hold::CellFree);
    role_phase(board, units, step, RK::Antagonizer, Move, light, false, Hold::Always);

    role_phase(board, units, step, RK::Cow, Dig, light, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Cow, Transfer, light, false, Hold::CellFreeSafe);
    role_phase(board, units, step, RK::Cow, Pickup, light, false, Hold::CellFree);
    role_phase(board, units, step, RK::Cow, Move, light, false, Hold::Always);

    no_move_phase(board, units, step, light);

    factory_phase(board, factories, step, FP::Water);
    factory_phase(board, factories, step, FP::Idle);
}

/// Light transporters feeding an ice miner top up with power one pass early
/// so the miner's delivery cadence never waits on them.
fn transporter_ice_pickup_phase(board: &mut Board, units: &[UnitId], step: Step) {
    for &uid in units {
        if unit_acted(board, uid, step) || board.unit(uid).class == RobotClass::Heavy {
            continue;
        }
        let Some(Role::Transporter(t)) = board.unit(uid).role.clone() else {
            continue;
        };
        if roles::cell_taken_next_step(board, uid, step) {
            continue;
        }
        if !crate::roles::transporter::destination_is_ice(board, &t) {
            continue;
        }
        let mut role = Role::Transporter(t);
        let action = roles::do_phase(board, uid, &mut role, step, Phase::Pickup);
        if board.unit(uid).role.is_some() {
            board.unit_mut(uid).role = Some(role);
        }
        mark_acted(board, uid, step, action);
    }
}

// ----------------------------------------------------------------------
// Finalize
// ----------------------------------------------------------------------

/// Fill the stand-still default for anything that never acted, upgrade idle
/// no-moves into emergency power hand-offs or repair digs, and record the
/// turn's action into each entity's outgoing queue slot.
pub fn finalize_step(
    board: &mut Board,
    units: &[UnitId],
    factories: &[FactoryId],
    step: Step,
    step_idx: usize,
) {
    for &uid in units {
        let chosen = board.unit(uid).action;
        let action = match chosen {
            None => Some(UnitAction::no_move()),
            Some(a) if a.same_effect(&UnitAction::no_move()) => {
                let upgraded = board.unit(uid).role.clone().and_then(|role| {
                    roles::do_idle_transfer_power_to_low_power_unit(board, uid, step, &role)
                        .or_else(|| roles::do_idle_dig_repair(board, uid, step, &role))
                });
                Some(upgraded.unwrap_or(a))
            }
            some => some,
        };
        let u = board.unit_mut(uid);
        u.action = action;
        u.new_action_queue[step_idx] = action;
    }

    for &fid in factories {
        let action = board.factory(fid).action.unwrap_or(FactoryAction::None);
        if step_idx == 0 && action != FactoryAction::None {
            board.factory_mut(fid).new_action = Some(action);
        }
    }
}

// ----------------------------------------------------------------------
// End step
// ----------------------------------------------------------------------

/// Apply end-of-turn world deltas: factory processing and charging, unit
/// charging and cargo carryover, rubble/lichen projection, and (on the real
/// turn) the persistent-cache writeback.
///
/// # Panics
///
/// Negative resources after processing are an invariant violation and fatal.
pub fn end_step_simulation(board: &mut Board, step: Step) {
    let i = board.idx(step);
    let rules = board.rules.clone();

    for fid in board.my_factories() {
        let gain = board.factory_power_gain(fid, step);
        let f = board.factory_mut(fid);
        f.power[i + 1] += f.power[i] + gain;
        assert!(f.power[i + 1] >= 0, "factory {fid} power negative at step {step}");

        let new_water = rules.factory_processing_rate_water.min(f.ice[i]) / rules.ice_water_ratio;
        f.water[i + 1] += f.water[i] + new_water - rules.factory_water_consumption;
        f.ice[i + 1] += f.ice[i] - new_water * rules.ice_water_ratio;
        assert!(f.ice[i + 1] >= 0, "factory {fid} ice negative at step {step}");

        let new_metal = rules.factory_processing_rate_metal.min(f.ore[i]) / rules.ore_metal_ratio;
        f.metal[i + 1] += f.metal[i] + new_metal;
        f.ore[i + 1] += f.ore[i] - new_metal * rules.ore_metal_ratio;
        assert!(f.ore[i + 1] >= 0, "factory {fid} ore negative at step {step}");
        assert!(f.metal[i + 1] >= 0, "factory {fid} metal negative at step {step}");
    }

    for uid in board.my_units() {
        let gain = board.unit(uid).power_gain(&rules, step);
        let battery = board.unit(uid).spec(&rules).battery_capacity;
        let u = board.unit_mut(uid);
        u.ice[i + 1] += u.ice[i];
        u.ore[i + 1] += u.ore[i];
        u.water[i + 1] += u.water[i];
        u.metal[i + 1] += u.metal[i];
        u.power[i + 1] = (u.power[i + 1] + u.power[i] + gain).min(battery);
        assert!(
            u.ice[i + 1] >= 0 && u.ore[i + 1] >= 0 && u.water[i + 1] >= 0 && u.metal[i + 1] >= 0,
            "unit {uid} cargo negative at step {step}"
        );
    }

    let my_strains = board.me.strains.clone();
    for cell in &mut board.cells {
        cell.rubble[i + 1] = (cell.rubble[i + 1] + cell.rubble[i]).min(rules.max_rubble);

        // Assume opposing lichen keeps growing; everything else decays.
        cell.lichen[i + 1] += cell.lichen[i];
        let strain = cell.lichen_strain[i];
        if strain == -1 || (strain >= 0 && my_strains.contains(&(strain as u32))) {
            cell.lichen[i + 1] -= rules.lichen_lost_without_water;
        } else if cell.lichen[i] > 0 {
            cell.lichen[i + 1] += rules.lichen_gained_with_water;
        }
        cell.lichen[i + 1] = cell.lichen[i + 1].clamp(0, rules.max_lichen_per_tile);

        if cell.lichen[i + 1] == 0 {
            cell.lichen_strain[i + 1] = -1;
        } else if cell.lichen_strain[i + 1] == -1 {
            cell.lichen_strain[i + 1] = cell.lichen_strain[i];
        }
    }

    // Factory assignments follow the roles that worked this turn; heavy ice
    // sites stay reserved for the factory they feed.
    for uid in board.my_units() {
        let Some(role) = board.unit(uid).role.clone() else {
            continue;
        };
        let role_factory = role.factory_id(board);
        if role_factory.is_some() {
            board.unit_mut(uid).assigned_factory = role_factory;
        }
        let reserved_cell = match &role {
            Role::Miner(m) if board.cell(m.resource_cell).ice => Some(m.resource_cell),
            Role::Antagonizer(a) if board.cell(a.target_cell).ice => Some(a.target_cell),
            _ => None,
        };
        if let Some(cell) = reserved_cell {
            if board.unit(uid).class == RobotClass::Heavy
                && board.cell(cell).assigned_factory.is_none()
            {
                if let Some(fid) = role_factory {
                    board.cell_mut(cell).assigned_factory = Some(fid);
                }
            }
        }
    }

    if i == 0 {
        persist_turn_state(board);
    }
}

/// Write the real turn's roles, modes, routes, assignments, statistics, and
/// occupancy history into the persistent cache.
fn persist_turn_state(board: &mut Board) {
    for fid in board.my_factories() {
        let mode = board
            .factory(fid)
            .mode
            .clone()
            .expect("mode assigned before persistence");
        board.strategy.modes.insert(fid, mode);
    }

    let unit_ids: Vec<UnitId> = board.units.keys().copied().collect();
    for uid in unit_ids {
        if Board::is_future_unit(uid) {
            continue;
        }
        save_unit_stats_end(board, uid);
        if board.unit(uid).team != board.me.id {
            continue;
        }
        let role = board
            .unit(uid)
            .role
            .clone()
            .expect("role assigned before persistence");
        board.strategy.roles.insert(uid, role);

        let route = board.unit(uid).route.clone();
        if route.is_empty() {
            board.strategy.routes.remove(&uid);
        } else {
            board.strategy.routes.insert(uid, route);
        }
        match board.unit(uid).assigned_factory {
            Some(f) => {
                board.strategy.unit_assigned_factories.insert(uid, f);
            }
            None => {
                board.strategy.unit_assigned_factories.remove(&uid);
            }
        }
    }

    for id in 0..board.cells.len() as CellId {
        let assigned = board.cell(id).assigned_factory;
        match assigned {
            Some(f) => {
                board.strategy.resource_assigned_factories.insert(id, f);
            }
            None => {
                board.strategy.resource_assigned_factories.remove(&id);
            }
        }
        let history = board.cell(id).unit_history.clone();
        board
            .strategy
            .cell_caches
            .entry(id)
            .or_default()
            .unit_history = Some(history);
    }
}

/// Tally the real turn's role and emitted action for one unit's statistics.
fn save_unit_stats_end(board: &mut Board, uid: UnitId) {
    if board.unit(uid).team != board.me.id {
        return;
    }
    let board_step = board.step;
    let role_name = board
        .unit(uid)
        .role
        .as_ref()
        .expect("role assigned before stats")
        .kind_name();
    let action = board.unit(uid).new_action_queue[0]
        .expect("first simulated turn always completes");
    let head_old = board.unit(uid).action_queue.first().copied();
    let queue_updated = match head_old {
        None => true,
        Some(old) => !old.same_effect(&action) && old.repeat == 0,
    };

    let stats = board.strategy.stats_mut(uid, board_step);
    *stats.role_counts.entry(role_name.to_string()).or_insert(0) += 1;
    match action.kind {
        ActionKind::Move if action.direction == Direction::Center => stats.actions.no_move += 1,
        ActionKind::Move => stats.actions.moves += 1,
        ActionKind::Transfer if action.resource == Resource::Power => {
            stats.actions.power_transfer += 1;
        }
        ActionKind::Transfer => stats.actions.resource_transfer += 1,
        ActionKind::Dig => stats.actions.dig += 1,
        ActionKind::Pickup => stats.actions.pickup += 1,
        ActionKind::SelfDestruct => stats.actions.self_destruct += 1,
        ActionKind::Recharge => {}
    }
    if queue_updated {
        stats.actions.queue_update += 1;
    }
}

// ----------------------------------------------------------------------
// Turn loop and harvesting
// ----------------------------------------------------------------------

/// Simulate one turn end to end.
pub fn simulate_step(board: &mut Board, step: Step, step_idx: usize) {
    begin_step_simulation(board, step);
    update_roles_and_goals(board, step);
    let units = board.my_units();
    let factories = board.my_factories();
    run_phase_pipeline(board, &units, &factories, step);
    finalize_step(board, &units, &factories, step, step_idx);
    end_step_simulation(board, step);
}

/// Forward-simulate as many turns as the budget allows and return the
/// replacement action queues for entities whose plans changed.
pub fn run_turn(board: &mut Board, budget: &TimeBudget) -> ActionMap {
    let mut sim_steps: u32 = 0;
    for step_idx in 0..board.future_len {
        let step = board.step + step_idx as Step;
        simulate_step(board, step, step_idx);
        sim_steps += 1;
        if step >= 999 {
            break;
        }
        if budget.exhausted(sim_steps) {
            debug!(step, sim_steps, "time allowance reached, stopping look-ahead");
            break;
        }
    }
    let actions = harvest_actions(board);
    board.log_summary(board.step, sim_steps, budget.elapsed().as_millis());
    actions
}

/// Emit a replacement queue for every real unit whose recomputed first
/// action differs from its committed one, and one token per factory that
/// decided to act. Queues past a unit's lie point are swapped for a decoy.
fn harvest_actions(board: &mut Board) -> ActionMap {
    let mut actions = ActionMap::new();
    let board_step = board.step;

    for uid in board.my_units() {
        if Board::is_future_unit(uid) {
            continue;
        }
        let (init_power, aq_cost) = {
            let u = board.unit(uid);
            (u.init_power, u.spec(&board.rules).action_queue_power_cost)
        };
        if init_power < aq_cost {
            continue;
        }
        let head_old = board.unit(uid).action_queue.first().copied();
        let head_new = board.unit(uid).new_action_queue.first().copied().flatten();
        let Some(head_new) = head_new else {
            continue;
        };
        let unchanged = head_old.is_some_and(|old| old.same_effect(&head_new));
        if unchanged {
            continue;
        }
        if let Some(old) = head_old {
            if old.repeat == 0 {
                let remaining = board
                    .unit(uid)
                    .action_queue
                    .iter()
                    .take_while(|a| a.repeat == 0)
                    .count();
                debug!(
                    step = board_step,
                    unit = uid,
                    remaining,
                    "replacing an unexpired action queue"
                );
            }
        }

        // The look-ahead may have stopped early; emit the prefix it filled.
        let mut queue: Vec<UnitAction> = board
            .unit(uid)
            .new_action_queue
            .iter()
            .map_while(|a| *a)
            .collect();
        if let Some(lie) = board.unit(uid).lie_step {
            let honest = (lie - board_step) as usize;
            queue.truncate(honest);
            queue.extend(lie_queue(board, uid));
        }
        if queue.is_empty() {
            continue;
        }
        let wire: Vec<[i32; 6]> = compress_queue(&queue, board.config.max_queue_len)
            .iter()
            .map(UnitAction::to_wire)
            .collect();
        actions.insert(format!("unit_{uid}"), EmittedAction::Queue(wire));
    }

    for fid in board.my_factories() {
        if let Some(action) = board.factory(fid).new_action {
            if let Some(wire) = action.to_wire() {
                actions.insert(format!("factory_{fid}"), EmittedAction::Token(wire));
            }
        }
    }
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_allowance_policy() {
        let config = AgentConfig::default();
        // Plenty of overage: nearly the full slice.
        let b = TimeBudget::start(&config, 100, 60_000);
        assert_eq!(b.allowance, Duration::from_millis(2970));
        // Low overage: reduced slice.
        let b = TimeBudget::start(&config, 100, 5_000);
        assert_eq!(b.allowance, Duration::from_millis(2400));
        // End phase: leftover overage is spread over the remaining steps.
        let b = TimeBudget::start(&config, 900, 115_000);
        assert_eq!(b.allowance, Duration::from_millis(2970 + 1000));
    }

    #[test]
    fn test_budget_exhaustion_is_monotone() {
        let b = TimeBudget::with_allowance(Duration::ZERO);
        // A zero allowance is exhausted after the first simulated turn.
        assert!(b.exhausted(1));
        let b = TimeBudget::with_allowance(Duration::from_secs(3600));
        assert!(!b.exhausted(1));
    }
}
