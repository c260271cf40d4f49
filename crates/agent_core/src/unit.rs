//! Mobile units: per-turn state, action primitives, and the derived queries
//! the planning layer runs on (threat analysis, low-power detection, the
//! single-step routing decision).
//!
//! Action primitives mutate forward-simulated state at the turn index they
//! execute: solid resource transfers land immediately, power transfers land
//! one turn later so the recipient cannot double-spend it, and every
//! primitive charges the action-queue refresh surcharge when the emitted
//! action deviates from the committed queue.

use tracing::{debug, info};

use crate::actions::{ActionKind, Direction, Resource, UnitAction};
use crate::board::{Board, CellId, Step, UnitId, UNREACHABLE};
use crate::error::{EngineError, Result};
use crate::observation::UnitObs;
use crate::pathfinding::{naive_cost, naive_route, DistOptions};
use crate::rng;
use crate::roles::{Role, RoleKind};
use crate::rules::{GameRules, RobotClass, RobotClassSpec};

/// One mobile unit, ours or the opponent's.
#[derive(Debug, Clone)]
pub struct Unit {
    /// Engine id (or synthetic id for units built during look-ahead).
    pub id: UnitId,
    /// Owning team.
    pub team: u8,
    /// Weight class.
    pub class: RobotClass,
    /// Position per turn index; `None` until that turn's move is decided.
    pub pos: Vec<Option<CellId>>,
    /// Ice cargo per turn index.
    pub ice: Vec<i32>,
    /// Ore cargo per turn index.
    pub ore: Vec<i32>,
    /// Water cargo per turn index.
    pub water: Vec<i32>,
    /// Metal cargo per turn index.
    pub metal: Vec<i32>,
    /// Power per turn index.
    pub power: Vec<i32>,

    /// Current behavior state machine (our units only).
    pub role: Option<Role>,
    /// Simulated step at which the role last (re-)claimed its assignments.
    pub role_set_step: Option<Step>,
    /// Cached multi-turn route toward the current goal.
    pub route: Vec<CellId>,
    /// Home factory.
    pub assigned_factory: Option<crate::board::FactoryId>,

    /// Too depleted to act and still reach a friendly factory.
    pub low_power: bool,
    /// Exact return cost backing the `low_power` flag.
    pub low_power_threshold: i64,
    /// Exact return route backing the `low_power` flag.
    pub low_power_route: Vec<CellId>,

    /// Protector units bound to this unit, per turn index.
    pub protectors: Vec<Vec<UnitId>>,
    /// Transporter units bound to this unit, per turn index.
    pub transporters: Vec<Vec<UnitId>>,

    /// Exclusive claim by a pursuing unit, per turn index.
    pub assigned_unit_id: Vec<Option<UnitId>>,

    /// Power at snapshot time; queue emission checks affordability
    /// against this, not the simulated value.
    pub init_power: i32,
    /// First simulated step from which the emitted queue is a decoy.
    pub lie_step: Option<Step>,

    /// Committed queue from the engine, expanded to one action per step.
    pub action_queue: Vec<UnitAction>,
    /// Committed queue as received.
    pub raw_queue: Vec<UnitAction>,
    /// Locally planned queue, one slot per simulated turn.
    pub new_action_queue: Vec<Option<UnitAction>>,
    /// Action chosen this simulated turn, if any.
    pub action: Option<UnitAction>,
    /// Simulated step at which this unit last locked an action.
    pub acted_step: Option<Step>,

    pub(crate) mines_cache: Option<Vec<CellId>>,
    pub(crate) antagonized_cache: Option<Option<UnitId>>,
    pub(crate) chain_cache: Option<bool>,
    /// Raw observed position, consumed by the board during construction.
    pub(crate) obs_pos: Option<(i32, i32)>,
}

impl Unit {
    /// Build a unit from the observation.
    pub fn from_obs(obs: &UnitObs, rules: &GameRules, future_len: usize) -> Result<Self> {
        let id: UnitId = obs
            .unit_id
            .rsplit('_')
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| EngineError::MalformedObservation(format!("bad unit id {}", obs.unit_id)))?;
        let class = match obs.unit_type.as_str() {
            "LIGHT" => RobotClass::Light,
            "HEAVY" => RobotClass::Heavy,
            other => {
                return Err(EngineError::MalformedObservation(format!(
                    "unknown unit type {other}"
                )))
            }
        };
        let raw_queue: Vec<UnitAction> = obs
            .action_queue
            .iter()
            .filter_map(|w| UnitAction::from_wire(*w))
            .collect();
        let mut unit = Self::blank(id, obs.team_id, class, future_len);
        unit.pos[0] = None; // set below once the board computes the cell id
        unit.ice[0] = obs.cargo.ice;
        unit.ore[0] = obs.cargo.ore;
        unit.water[0] = obs.cargo.water;
        unit.metal[0] = obs.cargo.metal;
        unit.power[0] = obs.power;
        unit.init_power = obs.power;
        let spec = *rules.class(class);
        let power = obs.power;
        let cycle = rules.cycle_length;
        let day = rules.day_length;
        unit.action_queue = crate::actions::expand_queue(&raw_queue, 20, |target| {
            steps_until_power(power, target, &spec, cycle, day, 0)
        });
        unit.raw_queue = raw_queue;
        unit.obs_pos = Some((obs.pos[0], obs.pos[1]));
        Ok(unit)
    }

    /// A unit with empty state (used for hypothetical builds).
    #[must_use]
    pub fn blank(id: UnitId, team: u8, class: RobotClass, future_len: usize) -> Self {
        Self {
            id,
            team,
            class,
            pos: vec![None; future_len + 1],
            ice: vec![0; future_len + 1],
            ore: vec![0; future_len + 1],
            water: vec![0; future_len + 1],
            metal: vec![0; future_len + 1],
            power: vec![0; future_len + 1],
            role: None,
            role_set_step: None,
            route: Vec::new(),
            assigned_factory: None,
            low_power: false,
            low_power_threshold: 0,
            low_power_route: Vec::new(),
            protectors: vec![Vec::new(); future_len + 1],
            transporters: vec![Vec::new(); future_len + 1],
            assigned_unit_id: vec![None; future_len + 1],
            init_power: 0,
            lie_step: None,
            action_queue: Vec::new(),
            raw_queue: Vec::new(),
            new_action_queue: vec![None; future_len + 1],
            action: None,
            acted_step: None,
            mines_cache: None,
            antagonized_cache: None,
            chain_cache: None,
            obs_pos: None,
        }
    }

    /// Per-class constants.
    #[must_use]
    pub fn spec<'a>(&self, rules: &'a GameRules) -> &'a RobotClassSpec {
        rules.class(self.class)
    }

    /// Power gained at `step` (charge during daylight, nothing at night).
    #[must_use]
    pub fn power_gain(&self, rules: &GameRules, step: Step) -> i32 {
        if rules.is_day(step) {
            self.spec(rules).charge
        } else {
            0
        }
    }

    /// Total power gained over `[step, end_step)`.
    #[must_use]
    pub fn power_gain_span(&self, rules: &GameRules, step: Step, end_step: Step) -> i32 {
        let mut total = 0;
        let mut s = step;
        while s < end_step {
            total += self.power_gain(rules, s);
            s += 1;
        }
        total
    }

    /// Record a helper protector at turn index `i`.
    pub fn set_protector(&mut self, i: usize, unit: UnitId) {
        self.protectors[i].push(unit);
    }

    /// Remove a helper protector at turn index `i`.
    pub fn unset_protector(&mut self, i: usize, unit: UnitId) {
        self.protectors[i].retain(|&u| u != unit);
    }

    /// Record a helper transporter at turn index `i`.
    pub fn set_transporter(&mut self, i: usize, unit: UnitId) {
        self.transporters[i].push(unit);
    }

    /// Remove a helper transporter at turn index `i`.
    pub fn unset_transporter(&mut self, i: usize, unit: UnitId) {
        self.transporters[i].retain(|&u| u != unit);
    }

    /// Mark the point after which the emitted queue is deliberately stale.
    pub fn set_lie_step(&mut self, step: Step) {
        if self.lie_step.is_none() {
            self.lie_step = Some(step);
        }
    }

    /// Whether the queue is locked by a lie from `step` on.
    #[must_use]
    pub fn lying_at(&self, step: Step) -> bool {
        self.lie_step.is_some_and(|l| step >= l)
    }
}

/// Steps until a unit charging from `power` reaches `goal_power`.
#[must_use]
pub fn steps_until_power(
    power: i32,
    goal_power: i32,
    spec: &RobotClassSpec,
    cycle_length: u32,
    day_length: u32,
    from_step: Step,
) -> i32 {
    let goal = goal_power.min(spec.battery_capacity);
    let diff = goal - power;
    if diff <= 0 {
        return 0;
    }
    let total_day_steps = crate::math::div_ceil(i64::from(diff), i64::from(spec.charge)) as i32;
    let full_days = total_day_steps / day_length as i32;
    let remainder = (total_day_steps % day_length as i32) * spec.charge;

    let mut gained = 0;
    let mut extra = 0;
    while gained < remainder {
        if (from_step + extra as u32) % cycle_length < day_length {
            gained += spec.charge;
        }
        extra += 1;
    }
    cycle_length as i32 * full_days + extra
}

impl Board {
    /// Cell a unit occupies at `step`; past steps resolve through the
    /// persisted position history.
    ///
    /// # Panics
    ///
    /// Panics if the position for a simulated step has not been decided yet
    /// or the requested past step predates the unit.
    #[must_use]
    pub fn unit_cell(&self, uid: UnitId, step: Step) -> CellId {
        if step < self.step {
            let stats = self
                .strategy
                .unit_stats
                .get(&uid)
                .unwrap_or_else(|| panic!("no history for unit {uid} at past step {step}"));
            assert!(
                step >= stats.init_step,
                "step {step} predates unit {uid} (born {})",
                stats.init_step
            );
            return stats.cell_ids[(step - stats.init_step) as usize];
        }
        let i = self.idx(step);
        self.unit(uid).pos[i]
            .unwrap_or_else(|| panic!("unit {uid} has no position at index {i}"))
    }

    /// Like [`Board::unit_cell`] but `None` when undecided/unknown.
    #[must_use]
    pub fn unit_cell_opt(&self, uid: UnitId, step: Step) -> Option<CellId> {
        if step < self.step {
            let stats = self.strategy.unit_stats.get(&uid)?;
            if step < stats.init_step {
                return None;
            }
            return stats.cell_ids.get((step - stats.init_step) as usize).copied();
        }
        self.unit(uid).pos.get(self.idx(step)).copied().flatten()
    }

    // ------------------------------------------------------------------
    // Queue-diff surcharge
    // ------------------------------------------------------------------

    /// Whether emitting `action` at `step` forces a queue refresh: the
    /// committed and planned queues match exactly before this index and
    /// differ at it.
    fn need_queue_cost(&self, uid: UnitId, step: Step, action: &UnitAction) -> bool {
        let i = self.idx(step);
        let unit = self.unit(uid);

        // A no-move placeholder in the previous slot that was not a real
        // decision means the refresh is already owed.
        if i > 0 {
            let placeholder = unit.new_action_queue[i - 1]
                .as_ref()
                .is_some_and(|a| a.same_effect(&UnitAction::no_move()));
            let stale = unit
                .acted_step
                .map_or(true, |s| step.saturating_sub(s) > 1);
            if placeholder && stale {
                return true;
            }
        }

        // Same action as committed at this slot: no surcharge.
        if unit
            .action_queue
            .get(i)
            .is_some_and(|old| old.same_effect(action))
        {
            return false;
        }

        // Differs here. The surcharge is owed only if every earlier slot
        // still matches (otherwise it was already paid).
        for j in (0..i).rev() {
            let old = unit.action_queue.get(j);
            let new = unit.new_action_queue[j].as_ref();
            let matches = match (old, new) {
                (None, None) => true,
                (Some(a), Some(b)) => a.same_effect(b),
                _ => false,
            };
            if !matches {
                return false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Action primitives
    // ------------------------------------------------------------------

    /// Power cost of moving in `direction` at `step`, including the queue
    /// refresh surcharge when applicable.
    ///
    /// Returns `None` if the move would leave the board.
    #[must_use]
    pub fn unit_move_power(&self, uid: UnitId, step: Step, direction: Direction) -> Option<i32> {
        let i = self.idx(step);
        let unit = self.unit(uid);
        let cur = self.unit_cell(uid, step);
        let (dx, dy) = direction.delta();
        let c = self.cell(cur);
        let target = self.cell_at(c.x + dx, c.y + dy)?;
        let spec = unit.spec(&self.rules);
        let mut cost = if direction == Direction::Center {
            0
        } else {
            spec.move_power_cost(self.cell(target).rubble[i])
        };
        if self.need_queue_cost(uid, step, &UnitAction::movement(direction)) {
            cost += spec.action_queue_power_cost;
        }
        Some(cost)
    }

    /// Register a stand-still at `step` (position carries over).
    fn register_no_move(&mut self, uid: UnitId, step: Step) {
        let i = self.idx(step);
        let cur = self.unit_cell(uid, step);
        self.unit_mut(uid).pos[i + 1] = Some(cur);
        self.register_unit(step + 1, cur, uid);
    }

    /// Execute a move, updating position, occupancy, and power.
    ///
    /// With `force_no_move` the unit stands still without paying anything;
    /// used when a required queue refresh is unaffordable. The returned
    /// action is `None` in that case but the unit still counts as acted.
    pub fn unit_do_move(
        &mut self,
        uid: UnitId,
        step: Step,
        direction: Direction,
        force_no_move: bool,
        move_cost: Option<i32>,
        threats: &[UnitId],
    ) -> Option<UnitAction> {
        let i = self.idx(step);
        if force_no_move {
            assert!(direction == Direction::Center);
            self.register_no_move(uid, step);
            self.unit_mut(uid).acted_step = Some(step);
            return None;
        }

        let cur = self.unit_cell(uid, step);
        let (dx, dy) = direction.delta();
        let c = self.cell(cur);
        let target = self
            .cell_at(c.x + dx, c.y + dy)
            .unwrap_or_else(|| panic!("unit {uid} move off board from ({},{})", c.x, c.y));
        self.unit_mut(uid).pos[i + 1] = Some(target);
        self.register_unit(step + 1, target, uid);

        let cost = move_cost
            .or_else(|| self.unit_move_power(uid, step, direction))
            .expect("validated move");
        if i == 0 && !threats.is_empty() {
            let board_step = self.step;
            self.strategy
                .stats_mut(uid, board_step)
                .save_threats(board_step, threats);
        }
        let unit = self.unit_mut(uid);
        unit.power[i] -= cost;
        assert!(
            unit.power[i] >= 0,
            "unit {uid} power went negative on move at step {step}"
        );
        Some(UnitAction::movement(direction))
    }

    /// Stand still, paying any refresh surcharge; falls back to
    /// `force_no_move` when even that is unaffordable.
    pub fn unit_do_no_move(&mut self, uid: UnitId, step: Step) -> Option<UnitAction> {
        let i = self.idx(step);
        let cost = self
            .unit_move_power(uid, step, Direction::Center)
            .expect("center move is always on board");
        if self.unit(uid).power[i] >= cost {
            self.unit_do_move(uid, step, Direction::Center, false, Some(cost), &[])
        } else {
            self.unit_do_move(uid, step, Direction::Center, true, None, &[])
        }
    }

    /// Queue refresh surcharge (if any) for a transfer.
    #[must_use]
    pub fn unit_transfer_cost(
        &self,
        uid: UnitId,
        step: Step,
        direction: Direction,
        resource: Resource,
        amount: i32,
    ) -> i32 {
        let action = UnitAction::transfer(direction, resource, amount);
        if self.need_queue_cost(uid, step, &action) {
            self.unit(uid).spec(&self.rules).action_queue_power_cost
        } else {
            0
        }
    }

    /// Execute a transfer toward `to_cell` (adjacent or own cell).
    ///
    /// Solid resources land on the recipient this turn; power lands next
    /// turn so it cannot be double-spent. The recipient is the factory under
    /// the target cell, else the unit that has locked that cell for next
    /// turn.
    ///
    /// # Panics
    ///
    /// Panics when no recipient exists; phases must verify that first.
    pub fn unit_do_transfer(
        &mut self,
        uid: UnitId,
        step: Step,
        to_cell: CellId,
        resource: Resource,
        amount: i32,
    ) -> Option<UnitAction> {
        let i = self.idx(step);
        let cur = self.unit_cell(uid, step);
        let direction = self.direction_to(cur, to_cell);

        let recipient_factory = self.cell(to_cell).factory_id;
        let recipient_unit = if recipient_factory.is_none() {
            self.unit_at(to_cell, step + 1, None)
        } else {
            None
        };
        assert!(
            recipient_factory.is_some() || recipient_unit.is_some(),
            "unit {uid} transfer at step {step} has no recipient"
        );

        let held = {
            let u = self.unit(uid);
            match resource {
                Resource::Ice => u.ice[i],
                Resource::Ore => u.ore[i],
                Resource::Water => u.water[i],
                Resource::Metal => u.metal[i],
                Resource::Power => u.power[i],
            }
        };
        let actual = amount.min(held);

        // Solids to factories land now (processed at end of turn); solids to
        // units land next turn alongside power.
        let solid_idx = if recipient_factory.is_some() { i } else { i + 1 };
        match resource {
            Resource::Ice => self.unit_mut(uid).ice[i] -= actual,
            Resource::Ore => self.unit_mut(uid).ore[i] -= actual,
            Resource::Water => self.unit_mut(uid).water[i] -= actual,
            Resource::Metal => self.unit_mut(uid).metal[i] -= actual,
            Resource::Power => self.unit_mut(uid).power[i] -= actual,
        }
        if let Some(fid) = recipient_factory {
            let f = self.factory_mut(fid);
            match resource {
                Resource::Ice => f.ice[solid_idx] += actual,
                Resource::Ore => f.ore[solid_idx] += actual,
                Resource::Water => f.water[solid_idx] += actual,
                Resource::Metal => f.metal[solid_idx] += actual,
                Resource::Power => f.power[i + 1] += actual,
            }
        } else if let Some(ruid) = recipient_unit {
            let r = self.unit_mut(ruid);
            match resource {
                Resource::Ice => r.ice[solid_idx] += actual,
                Resource::Ore => r.ore[solid_idx] += actual,
                Resource::Water => r.water[solid_idx] += actual,
                Resource::Metal => r.metal[solid_idx] += actual,
                Resource::Power => r.power[i + 1] += actual,
            }
        }

        let surcharge = self.unit_transfer_cost(uid, step, direction, resource, amount);
        let unit = self.unit_mut(uid);
        unit.power[i] -= surcharge;
        assert!(
            unit.power[i] >= 0,
            "unit {uid} power went negative on transfer at step {step}"
        );
        self.register_no_move(uid, step);
        Some(UnitAction::transfer(direction, resource, amount))
    }

    /// Queue refresh surcharge (if any) for a pickup.
    #[must_use]
    pub fn unit_pickup_cost(&self, uid: UnitId, step: Step, resource: Resource, amount: i32) -> i32 {
        let action = UnitAction::pickup(resource, amount);
        if self.need_queue_cost(uid, step, &action) {
            self.unit(uid).spec(&self.rules).action_queue_power_cost
        } else {
            0
        }
    }

    /// Execute a pickup from the factory underneath.
    ///
    /// # Panics
    ///
    /// Panics when the unit is not standing on a factory.
    pub fn unit_do_pickup(
        &mut self,
        uid: UnitId,
        step: Step,
        resource: Resource,
        amount: i32,
    ) -> Option<UnitAction> {
        let i = self.idx(step);
        let cur = self.unit_cell(uid, step);
        let fid = self
            .cell(cur)
            .factory_id
            .unwrap_or_else(|| panic!("unit {uid} pickup off-factory at step {step}"));

        let available = {
            let f = self.factory(fid);
            match resource {
                Resource::Ice => f.ice[i],
                Resource::Ore => f.ore[i],
                Resource::Water => f.water[i],
                Resource::Metal => f.metal[i],
                Resource::Power => f.power[i],
            }
        };
        let actual = amount.min(available);
        {
            let f = self.factory_mut(fid);
            match resource {
                Resource::Ice => f.ice[i] -= actual,
                Resource::Ore => f.ore[i] -= actual,
                Resource::Water => f.water[i] -= actual,
                Resource::Metal => f.metal[i] -= actual,
                Resource::Power => f.power[i] -= actual,
            }
        }
        {
            let u = self.unit_mut(uid);
            match resource {
                Resource::Ice => u.ice[i] += actual,
                Resource::Ore => u.ore[i] += actual,
                Resource::Water => u.water[i] += actual,
                Resource::Metal => u.metal[i] += actual,
                Resource::Power => u.power[i] += actual,
            }
        }
        let surcharge = self.unit_pickup_cost(uid, step, resource, amount);
        let unit = self.unit_mut(uid);
        unit.power[i] -= surcharge;
        assert!(
            unit.power[i] >= 0,
            "unit {uid} power went negative on pickup at step {step}"
        );
        self.register_no_move(uid, step);
        Some(UnitAction::pickup(resource, amount))
    }

    /// Dig cost including any refresh surcharge.
    #[must_use]
    pub fn unit_dig_cost(&self, uid: UnitId, step: Step) -> i32 {
        let spec = self.unit(uid).spec(&self.rules);
        let mut cost = spec.dig_cost;
        if self.need_queue_cost(uid, step, &UnitAction::dig()) {
            cost += spec.action_queue_power_cost;
        }
        cost
    }

    /// Execute a dig: rubble first, then hostile lichen, then resources.
    pub fn unit_do_dig(&mut self, uid: UnitId, step: Step) -> Option<UnitAction> {
        let i = self.idx(step);
        let cur = self.unit_cell(uid, step);
        let spec = *self.unit(uid).spec(&self.rules);
        let cost = self.unit_dig_cost(uid, step);

        let cell = self.cell_mut(cur);
        if cell.rubble[i] > 0 {
            cell.rubble[i] -= spec.dig_rubble_removed.min(cell.rubble[i]);
        } else if cell.lichen[i] > 0 {
            cell.lichen[i] -= spec.dig_lichen_removed.min(cell.lichen[i]);
            if cell.lichen[i] <= 0 {
                cell.rubble[i] += spec.dig_rubble_removed;
            }
        } else if cell.ice {
            self.unit_mut(uid).ice[i] += spec.dig_resource_gain;
        } else if cell.ore {
            self.unit_mut(uid).ore[i] += spec.dig_resource_gain;
        }

        let unit = self.unit_mut(uid);
        unit.power[i] -= cost;
        assert!(
            unit.power[i] >= 0,
            "unit {uid} power went negative on dig at step {step}"
        );
        self.register_no_move(uid, step);
        Some(UnitAction::dig())
    }

    /// Self-destruct cost including any refresh surcharge.
    #[must_use]
    pub fn unit_selfdestruct_cost(&self, uid: UnitId, step: Step) -> i32 {
        let spec = self.unit(uid).spec(&self.rules);
        let mut cost = spec.self_destruct_cost;
        if self.need_queue_cost(uid, step, &UnitAction::self_destruct()) {
            cost += spec.action_queue_power_cost;
        }
        cost
    }

    /// Execute a self-destruct.
    pub fn unit_do_selfdestruct(&mut self, uid: UnitId, step: Step) -> Option<UnitAction> {
        let i = self.idx(step);
        let cost = self.unit_selfdestruct_cost(uid, step);
        let unit = self.unit_mut(uid);
        unit.power[i] -= cost;
        assert!(
            unit.power[i] >= 0,
            "unit {uid} power went negative on self-destruct at step {step}"
        );
        self.register_no_move(uid, step);
        Some(UnitAction::self_destruct())
    }

    // ------------------------------------------------------------------
    // Derived queries
    // ------------------------------------------------------------------

    /// Whether it is safe (from friendly fire) for `uid` to move onto `cell`
    /// at `step`.
    #[must_use]
    pub fn safe_to_move(&self, uid: UnitId, step: Step, cell: CellId) -> bool {
        let i = self.idx(step);
        let my_team = self.unit(uid).team;

        // A friendly unit has already locked this cell for next step.
        if self.unit_at(cell, step + 1, None).is_some() {
            return false;
        }

        let unit_at_dest = self
            .unit_at(cell, step, Some(my_team))
            .filter(|&u| u != uid);

        // During the final night, crowding friendlies off non-lichen cells
        // no longer matters.
        if step >= 980 {
            let c = self.cell(cell);
            let on_own_lichen = c.lichen[i] > 0 && self.me.owns_strain(c.lichen_strain[i]);
            let class_ok = unit_at_dest.map_or(true, |other| {
                let o = self.unit(other);
                let me = self.unit(uid);
                me.class == o.class || me.class == RobotClass::Heavy
            });
            if !on_own_lichen && class_ok {
                return true;
            }
        }

        // If a friendly is standing there without a decided move, it must be
        // able to vacate.
        if let Some(other) = unit_at_dest {
            if self.unit(other).pos[i + 1].is_none() {
                let mut move_costs = Vec::new();
                for direction in Direction::MOVES {
                    let (dx, dy) = direction.delta();
                    let c = self.cell(cell);
                    let Some(move_cell) = self.cell_at(c.x + dx, c.y + dy) else {
                        continue;
                    };
                    if self.unit_at(move_cell, step + 1, None).is_some() {
                        continue;
                    }
                    if self
                        .cell(move_cell)
                        .factory_id
                        .is_some_and(|f| self.factory(f).team != my_team)
                    {
                        continue;
                    }
                    if let Some(cost) = self.unit_move_power(other, step, direction) {
                        move_costs.push(cost);
                    }
                }
                let min_cost = move_costs.iter().min().copied();
                if min_cost.map_or(true, |c| self.unit(other).power[i] < c) {
                    return false;
                }
            }
        }

        // Would taking this cell close a cornered neighbor's only escape?
        for neighbor in self.neighbors(cell) {
            if let Some(nuid) = self.unit_at(neighbor, step, Some(my_team)) {
                if nuid != uid
                    && self.unit(nuid).pos[i + 1].is_none()
                    && self.unit_at(neighbor, step + 1, None).is_some()
                    && self.moves_available(neighbor, step, self.unit(nuid).power[i]) <= 1
                {
                    return false;
                }
            }
        }

        true
    }

    /// Opposing units that have recently been within `max_radius` of `cell`.
    #[must_use]
    pub fn threat_units(
        &self,
        cell: CellId,
        history_len: u32,
        max_radius: i32,
        heavy: bool,
        light: bool,
    ) -> Vec<UnitId> {
        let mut out = Vec::new();
        let start = self.step;
        for (radius_cell, _) in self.radius_cells(cell, 0, max_radius) {
            let lo = start.saturating_sub(history_len.saturating_sub(1));
            for s in (lo..=start).rev() {
                if let Some(uid) = self.cell(radius_cell).unit_history[s as usize] {
                    if let Some(u) = self.get_unit(uid) {
                        if u.team != self.opp.id {
                            continue;
                        }
                        let class_ok = (heavy && u.class == RobotClass::Heavy)
                            || (light && u.class == RobotClass::Light);
                        if class_ok && !out.contains(&uid) {
                            out.push(uid);
                        }
                    }
                }
            }
        }
        out
    }

    /// Whether a light unit would be walking into recent heavy opposition.
    #[must_use]
    pub fn dest_is_safe(&self, uid: UnitId, cell: CellId) -> bool {
        if self.unit(uid).class == RobotClass::Heavy {
            return true;
        }
        for n in std::iter::once(cell).chain(self.neighbors(cell)) {
            let lo = self.step.saturating_sub(1);
            for s in lo..=self.step {
                if let Some(h) = self.cell(n).unit_history[s as usize] {
                    if let Some(u) = self.get_unit(h) {
                        if u.team == self.opp.id && u.class == RobotClass::Heavy {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    /// How many consecutive recent turns `opp` has been threatening `uid`
    /// while standing still.
    #[must_use]
    pub fn standoff_turns(&self, uid: UnitId, step: Step, opp: UnitId) -> usize {
        assert!(step == self.step);
        let unit = self.unit(uid);
        if unit.antagonized_cache == Some(None) {
            return 0;
        }

        // An opponent with a queued real move is leaving; no standoff.
        let opp_unit = self.unit(opp);
        if opp_unit
            .action_queue
            .first()
            .is_some_and(|a| a.kind == ActionKind::Move && a.direction != Direction::Center)
        {
            return 0;
        }

        let Some(stats) = self.strategy.unit_stats.get(&uid) else {
            return 0;
        };
        if stats.cell_ids.len() <= 3 {
            return 0;
        }
        let Some(opp_cell) = self.unit_cell_opt(opp, step) else {
            return 0;
        };

        let mut max_standoff = 0;
        for jump in [1u32, 2] {
            let mut prev_step = step.saturating_sub(jump);
            let mut count = 0;
            for &(threat_id, threat_step) in stats.threat_events.iter().rev() {
                if threat_step == prev_step && threat_id == opp {
                    // Only a standoff while the opponent holds its ground.
                    if self.unit_cell_opt(opp, prev_step) != Some(opp_cell) {
                        break;
                    }
                    if jump == 2 && self.unit_cell_opt(opp, prev_step + 1) != Some(opp_cell) {
                        break;
                    }
                    count += 1;
                    prev_step = prev_step.saturating_sub(jump);
                } else if threat_step < prev_step {
                    break;
                }
            }
            max_standoff = max_standoff.max(count);
        }
        max_standoff
    }

    /// Risk contribution of one opposing unit possibly contesting
    /// `move_cell`.
    fn opp_collision_risk(
        &self,
        step: Step,
        uid: UnitId,
        opp: UnitId,
        move_cell: CellId,
        depth: u8,
    ) -> i64 {
        let i = self.idx(step);
        let cur = self.unit_cell(uid, step);
        let opp_cell = self.unit_cell(opp, self.step);
        let is_my_move = cur != move_cell;

        let opp_threatened_at_cell = if i == 0 && depth > 0 {
            self.threatened_by_opp_inner(step, opp, move_cell, false, None, depth - 1)
                .0
                > 0
        } else {
            false
        };

        let history = &self.cell(move_cell).unit_history;
        let opp_just_at_cell =
            self.step >= 1 && history[(self.step - 1) as usize] == Some(opp);
        let mut opp_recently_at_cell = false;
        for back in 2..4u32 {
            if self.step >= back && history[(self.step - back) as usize] == Some(opp) {
                opp_recently_at_cell = true;
            }
        }

        let mut opp_planning_to_move = false;
        if let Some(head) = self.unit(opp).action_queue.first() {
            let plan_cell = if head.kind == ActionKind::Move {
                let (dx, dy) = head.direction.delta();
                let c = self.cell(opp_cell);
                self.cell_at(c.x + dx, c.y + dy).unwrap_or(opp_cell)
            } else {
                opp_cell
            };
            if plan_cell == move_cell {
                opp_planning_to_move = true;
            }
        }

        let same_class = self.unit(uid).class == self.unit(opp).class;
        let risk = i64::from(!is_my_move && same_class) * 50
            + i64::from(opp_just_at_cell) * 100
            + i64::from(opp_recently_at_cell) * 20
            + i64::from(opp_planning_to_move) * 100
            - i64::from(opp_threatened_at_cell) * 90;
        risk.max(5)
    }

    /// Risk score for `uid` ending up on `move_cell` next step, plus the
    /// units generating that risk. Zero means perfectly safe.
    #[must_use]
    pub fn threatened_by_opp(
        &self,
        step: Step,
        uid: UnitId,
        move_cell: CellId,
        role: Option<&Role>,
    ) -> (i64, Vec<UnitId>) {
        self.threatened_by_opp_inner(step, uid, move_cell, false, role, 1)
    }

    /// Like [`Board::threatened_by_opp`] but counting every possible
    /// collision, even favorable ones (endgame lichen crashes).
    #[must_use]
    pub fn threatened_by_opp_all(
        &self,
        step: Step,
        uid: UnitId,
        move_cell: CellId,
    ) -> (i64, Vec<UnitId>) {
        self.threatened_by_opp_inner(step, uid, move_cell, true, None, 1)
    }

    fn threatened_by_opp_inner(
        &self,
        step: Step,
        uid: UnitId,
        move_cell: CellId,
        all_collisions: bool,
        role: Option<&Role>,
        depth: u8,
    ) -> (i64, Vec<UnitId>) {
        let i = self.idx(step);
        let me = self.unit(uid);
        let my_team = me.team;
        if self
            .cell(move_cell)
            .factory_id
            .is_some_and(|f| self.factory(f).team == my_team)
        {
            return (0, Vec::new());
        }

        let mut risk: i64 = 0;
        let mut threats: Vec<UnitId> = Vec::new();
        let cur = self.unit_cell(uid, step);
        let is_my_move = cur != move_cell;

        for neighbor in std::iter::once(move_cell).chain(self.neighbors(move_cell)) {
            let Some(opp) = self.unit_at(neighbor, self.step, None) else {
                continue;
            };
            if self.unit(opp).team == my_team {
                continue;
            }
            let opp_unit = self.unit(opp);

            // Lighter units cannot hurt a heavy.
            if me.class == RobotClass::Heavy
                && opp_unit.class == RobotClass::Light
                && !all_collisions
            {
                continue;
            }

            // No threat if they cannot afford the move.
            let is_opp_move = neighbor != move_cell;
            let move_cost = if is_opp_move {
                opp_unit
                    .spec(&self.rules)
                    .move_power_cost(self.cell(move_cell).rubble[i])
            } else {
                0
            };
            if opp_unit.power[0] < move_cost {
                continue;
            }

            // An antagonizer harassing a supply chain ignores threats from
            // the chain itself and its miner.
            if let Some(Role::Antagonizer(ant)) = role {
                if ant.chain {
                    let target_mode_ice_conflict = self
                        .get_factory(ant.factory)
                        .and_then(|f| f.mode.as_ref())
                        .is_some_and(|m| m.kind_name() == "ice_conflict");
                    if !target_mode_ice_conflict {
                        let chainish = self.unit(opp).chain_cache == Some(true)
                            || (opp_unit.class == RobotClass::Heavy
                                && (self.cell(neighbor).ice || self.cell(neighbor).ore)
                                && opp_unit.action_queue.first().is_some_and(|a| {
                                    matches!(a.kind, ActionKind::Dig | ActionKind::Transfer)
                                }));
                        if chainish {
                            continue;
                        }
                    }
                }
            }

            // A heavier unit is always a threat to a light.
            if me.class == RobotClass::Light && opp_unit.class == RobotClass::Heavy {
                threats.push(opp);
                if i == 0 && my_team == self.me.id && is_my_move && is_opp_move && !all_collisions {
                    let standoff = self.standoff_turns(uid, step, opp);
                    let chance = self.config.standoff_chance_vs_heavy(standoff);
                    if rng::chance(u64::from(step) + u64::from(uid), chance) {
                        info!(unit = uid, opp, standoff, "breaking standoff with heavy");
                        continue;
                    }
                }
                risk += self.opp_collision_risk(step, uid, opp, move_cell, depth);
                continue;
            }

            // The opponent is where I currently stand: safe to step off,
            // dangerous to stay.
            if neighbor == cur {
                if move_cell == cur {
                    risk += 1000;
                    threats.push(opp);
                }
                continue;
            }

            // Same weight, I stand still: they may step on me.
            if is_opp_move && !is_my_move {
                risk += self.opp_collision_risk(step, uid, opp, move_cell, depth);
                threats.push(opp);
                continue;
            }

            // Same weight, both moving: power decides the exchange. Action
            // queue surcharges are deducted when the head of the committed
            // queue does not already point at this move.
            if is_opp_move && is_my_move {
                let mut my_power = me.power[0];
                let mut opp_power = opp_unit.power[0];
                if i == 0 {
                    let my_dir = self.direction_to(cur, move_cell);
                    let opp_dir = self.direction_to(neighbor, move_cell);
                    let head_matches = |u: &Unit, d: Direction| {
                        u.action_queue
                            .first()
                            .is_some_and(|a| a.kind == ActionKind::Move && a.direction == d)
                    };
                    if !head_matches(me, my_dir) {
                        my_power -= me.spec(&self.rules).action_queue_power_cost;
                    }
                    if !head_matches(opp_unit, opp_dir) {
                        opp_power -= opp_unit.spec(&self.rules).action_queue_power_cost;
                    }
                }
                if opp_power > my_power || all_collisions {
                    threats.push(opp);
                    if i == 0 && my_team == self.me.id && !all_collisions {
                        let standoff = self.standoff_turns(uid, step, opp);
                        let chance = self.config.standoff_chance_same_weight(standoff);
                        if rng::chance(u64::from(step) + u64::from(uid), chance) {
                            info!(unit = uid, opp, standoff, "breaking same-weight standoff");
                            continue;
                        }
                    }
                    risk += self.opp_collision_risk(step, uid, opp, move_cell, depth);
                }
            }
        }
        (risk, threats)
    }

    /// The core single-step routing decision: where should `uid` move this
    /// turn to make progress toward `goal_cell`?
    ///
    /// Reuses the cached multi-turn route when still relevant and safe, else
    /// falls through successively less cautious avoidance tiers until a
    /// feasible next cell is found. Returns the chosen cell (possibly the
    /// current one) and, at turn index 0, the units threatening it.
    pub fn goal_to_move(
        &mut self,
        step: Step,
        uid: UnitId,
        goal_cell: CellId,
        role: Option<&Role>,
    ) -> (CellId, Vec<UnitId>) {
        let i = self.idx(step);
        let cur = self.unit_cell(uid, step);
        let my_class = self.unit(uid).class;
        let my_power_now = self.unit(uid).power[0];

        // Try the cached route first.
        let route = self.unit(uid).route.clone();
        if let Some(&route_dest) = route.last() {
            let relevant = route_dest == goal_cell
                || (self.cell(goal_cell).factory_center
                    && self.cell(route_dest).factory_id == self.cell(goal_cell).factory_id);
            if relevant {
                if let Some(pos) = route.iter().position(|&c| c == cur) {
                    let next = route[(pos + 1).min(route.len() - 1)];
                    let safe_friendly = self.safe_to_move(uid, step, next);
                    let near_goal = self.man_dist(cur, goal_cell) <= 1;
                    let safe_opp = !((i == 0 || near_goal)
                        && self.threatened_by_opp(step, uid, next, role).0 > 0);
                    if safe_friendly && safe_opp {
                        return (next, Vec::new());
                    }
                }
            }
        }

        let end_phase = step >= self.config.end_phase;

        let mut best_score = [UNREACHABLE; 6];
        let mut best_ideal = [UNREACHABLE; 5];
        let mut best_move = cur;
        let mut best_route: Vec<CellId> = Vec::new();
        let mut best_threats: Vec<UnitId> = Vec::new();

        let mut options = self.neighbors(cur);
        rng::shuffle(u64::from(step) + u64::from(uid), &mut options);

        // Endgame pillagers and engaged blockades skip the careful tier;
        // likewise when every cell around the goal is already claimed.
        let mut skip_careful = false;
        match role {
            Some(Role::Pillager(_)) if end_phase => skip_careful = true,
            Some(Role::Blockade(b)) if !b.goal_is_factory() => skip_careful = true,
            _ => {}
        }
        if !skip_careful {
            let all_blocked = self.neighbors(goal_cell).into_iter().all(|c| {
                self.assigned_unit(c, step).is_some()
                    || self
                        .cell(c)
                        .factory_id
                        .is_some_and(|f| self.factory(f).team != self.me.id)
            });
            if all_blocked {
                skip_careful = true;
            }
        }

        let straightline = matches!(role, Some(Role::Blockade(b)) if b.straightline);

        for move_cell in std::iter::once(cur).chain(options) {
            if self
                .cell(move_cell)
                .factory_id
                .is_some_and(|f| self.factory(f).team != self.me.id)
            {
                continue;
            }
            if !self.safe_to_move(uid, step, move_cell) {
                continue;
            }

            let (mut risk, threat_units) = self.threatened_by_opp(step, uid, move_cell, role);

            // If a friendly is taking our cell and we cannot afford this
            // move, staying is not an option; pressure the score.
            if self.unit_at(cur, step + 1, None).is_some() {
                let dir = self.direction_to(cur, move_cell);
                let cost = self.unit_move_power(uid, step, dir).unwrap_or(i32::MAX);
                if self.unit(uid).power[i] < cost {
                    risk += 1000;
                }
            }

            // A protected miner shoulder-to-shoulder with its protector may
            // deliberately step into the threat.
            if i == 0 {
                if let Some(Role::Miner(m)) = role {
                    let occupied_by_opp = self
                        .unit_at(move_cell, step, None)
                        .is_some_and(|o| self.unit(o).team != self.me.id);
                    if occupied_by_opp && m.goal_is_resource() {
                        if let Some(&pid) = self.unit(uid).protectors[i].first() {
                            let striking = matches!(
                                self.get_unit(pid).and_then(|p| p.role.as_ref()),
                                Some(Role::Protector(p)) if p.should_strike_cached == Some(true)
                            );
                            if striking {
                                info!(unit = uid, cell = move_cell, "protected miner strike");
                                risk -= 1;
                            }
                        }
                    }
                }
            }

            // Direct arrival at a safe goal short-circuits the search (not
            // for factory centers, which are rarely the true destination).
            if move_cell == goal_cell && risk <= 0 && !self.cell(goal_cell).factory_center {
                return (move_cell, Vec::new());
            }

            let mut cost1 = UNREACHABLE;
            let mut cost2 = UNREACHABLE;
            let mut cost3 = UNREACHABLE;
            let mut cost4 = UNREACHABLE;
            let mut dest: Option<CellId> = None;

            // Extra-cautious tier for loaded water couriers: stay well away
            // from opposing factories and active blockades.
            let very_safe = |b: &Board, s: Step, c: CellId| {
                b.nearest_factory(c, Some(b.opp.id))
                    .is_some_and(|f| b.man_dist_factory(c, f) <= 3)
                    || b.assigned_unit(c, s).is_some_and(|a| a != uid)
                    || b
                        .unit_at(c, b.step, None)
                        .and_then(|u| b.get_unit(u))
                        .and_then(|u| u.role.as_ref())
                        .is_some_and(|r| r.kind() == RoleKind::Blockade)
            };

            if let Some(Role::WaterTransporter(wt)) = role {
                let loaded = {
                    let u = self.unit(uid);
                    u.water[i] >= 5 || u.ice[i] >= 50
                };
                if (loaded || wt.goal_is_target()) && !very_safe(self, step, move_cell) {
                    let (c1, wt_hops, d) = self.dist(
                        step,
                        &[move_cell],
                        Some(uid),
                        DistOptions {
                            dest_cell: Some(goal_cell),
                            avoid_cond: Some(&very_safe),
                            ..DistOptions::default()
                        },
                    );
                    cost1 = c1;
                    dest = d;
                    // An overly roundabout safe route can miss the delivery
                    // deadline; fall through to faster tiers.
                    let home_water = self
                        .get_factory(wt.factory)
                        .map_or(0, |f| f.water[i]);
                    if loaded && i64::from(wt_hops) >= i64::from(home_water) - 2 {
                        cost1 = UNREACHABLE;
                    }
                }
            }

            // Normal caution: lights avoid factory centers, camped heavies,
            // and claimed cells; heavies avoid cells claimed by heavies.
            let careful = |b: &Board, s: Step, c: CellId| {
                if my_class == RobotClass::Light {
                    if b.cell(c).factory_center {
                        return true;
                    }
                    let camped = std::iter::once(c).chain(b.neighbors(c)).any(|x| {
                        b.unit_at(x, b.step, Some(b.opp.id)).is_some_and(|o| {
                            let ou = b.unit(o);
                            (ou.class == RobotClass::Heavy || ou.power[0] > my_power_now)
                                && b.is_stationary(o, b.step, 5)
                        })
                    });
                    if camped {
                        return true;
                    }
                    let mining_heavy = (b.cell(c).ice || b.cell(c).ore)
                        && b.unit_at(c, b.step, Some(b.opp.id))
                            .is_some_and(|o| b.unit(o).class == RobotClass::Heavy);
                    if mining_heavy {
                        return true;
                    }
                }
                b.assigned_unit(c, s).is_some_and(|a| {
                    if a == uid {
                        return false;
                    }
                    let au = b.unit(a);
                    let a_kind = au.role.as_ref().map(Role::kind);
                    (my_class == RobotClass::Light
                        && a_kind.is_some_and(|k| k != RoleKind::Pillager))
                        || au.class == RobotClass::Heavy
                        || a_kind == Some(RoleKind::Transporter)
                })
            };

            if cost1 == UNREACHABLE && !skip_careful && !careful(self, step, move_cell) {
                let (c2, _, d) = self.dist(
                    step,
                    &[move_cell],
                    Some(uid),
                    DistOptions {
                        dest_cell: Some(goal_cell),
                        avoid_cond: Some(&careful),
                        ..DistOptions::default()
                    },
                );
                cost2 = c2;
                if d.is_some() {
                    dest = d;
                }
            }

            // Reckless: only steer around heavy miners and the transporters
            // feeding them.
            let reckless = |b: &Board, s: Step, c: CellId| {
                b.assigned_unit(c, s).is_some_and(|a| {
                    if a == uid {
                        return false;
                    }
                    let au = b.unit(a);
                    match au.role.as_ref() {
                        Some(Role::Miner(_)) => au.class == RobotClass::Heavy,
                        Some(Role::Transporter(t)) => b
                            .get_unit(t.destination)
                            .and_then(|d| d.role.as_ref())
                            .and_then(|r| match r {
                                Role::Miner(m) => Some(m.resource_cell),
                                _ => None,
                            })
                            .is_some_and(|rc| b.man_dist(t.factory_cell, rc) == 1),
                        _ => false,
                    }
                })
            };

            if cost1 == UNREACHABLE
                && cost2 == UNREACHABLE
                && !reckless(self, step, move_cell)
            {
                let rate = if straightline { Some(0) } else { None };
                let (c3, _, d) = self.dist(
                    step,
                    &[move_cell],
                    Some(uid),
                    DistOptions {
                        dest_cell: Some(goal_cell),
                        avoid_cond: Some(&reckless),
                        unit_rubble_rate_centi: rate,
                        ..DistOptions::default()
                    },
                );
                cost3 = c3;
                if d.is_some() {
                    dest = d;
                }
            }

            // Last resort: no avoidance at all, to break ties between
            // otherwise-unreachable options.
            if cost1 == UNREACHABLE && cost2 == UNREACHABLE && cost3 == UNREACHABLE {
                let (c4, _, d) = self.dist(
                    step,
                    &[move_cell],
                    Some(uid),
                    DistOptions {
                        dest_cell: Some(goal_cell),
                        ..DistOptions::default()
                    },
                );
                cost4 = c4;
                if d.is_some() {
                    dest = d;
                }
            }

            let candidate_route = dest.map_or_else(Vec::new, |d| self.last_route(d));

            let mut move_cost = if move_cell == cur {
                0
            } else {
                i64::from(
                    self.unit(uid)
                        .spec(&self.rules)
                        .move_power_cost(self.cell(move_cell).rubble[i]),
                )
            };

            // While oscillating with an opponent, lean toward home.
            let leaning_home = matches!(role, Some(Role::Antagonizer(a)) if cur == a.target_cell)
                || self.unit(uid).antagonized_cache.clone().flatten().is_some();
            if leaning_home {
                let factory = self
                    .unit(uid)
                    .assigned_factory
                    .or_else(|| self.nearest_factory(cur, Some(self.me.id)));
                if let Some(f) = factory {
                    move_cost += i64::from(self.unit(uid).spec(&self.rules).move_cost)
                        * i64::from(self.man_dist_factory(move_cell, f));
                }
            }

            let ideal = [cost1, cost2, cost3, cost4, move_cost];
            let score = [risk, cost1, cost2, cost3, cost4, move_cost];
            if ideal < best_ideal {
                best_ideal = ideal;
                best_threats = threat_units;
            }
            if score < best_score {
                best_score = score;
                best_move = move_cell;
                best_route = candidate_route;
            }
        }

        self.unit_mut(uid).route = best_route;
        if i == 0 && best_score[0] > 0 {
            debug!(unit = uid, cell = best_move, risk = best_score[0], "risky move");
        }
        (best_move, if i == 0 { best_threats } else { Vec::new() })
    }

    /// Recompute the low-power flag: can this unit both act now and still
    /// reach a friendly factory? Checked with the cheap estimator first,
    /// escalating to exact search only near the threshold.
    pub fn update_low_power_flag(&mut self, step: Step, uid: UnitId) {
        let i = self.idx(step);
        {
            let u = self.unit_mut(uid);
            u.low_power = false;
            u.low_power_route = Vec::new();
        }

        let unit_power = self.unit(uid).power[i];
        let spec = *self.unit(uid).spec(&self.rules);
        let role_kind = self.unit(uid).role.as_ref().map(Role::kind);

        if unit_power >= spec.battery_capacity / 2
            || role_kind == Some(RoleKind::Recharge)
            || self
                .unit(uid)
                .role
                .as_ref()
                .is_some_and(Role::goal_is_factory)
        {
            return;
        }

        let mut cur = self.unit_cell(uid, step);
        let goal_cell = match self.unit(uid).role.clone() {
            None => None,
            // A blockade's goal logic is elaborate and order-sensitive;
            // approximate with the target's position.
            Some(Role::Blockade(b)) => Some(
                b.target_unit
                    .and_then(|t| self.unit_cell_opt(t, self.step))
                    .unwrap_or(cur),
            ),
            Some(role) => Some(crate::roles::goal_cell(self, uid, &role, step)),
        };
        if goal_cell.is_some_and(|g| self.cell(g).has_factory()) {
            return;
        }

        let is_player = self.unit(uid).team == self.me.id;
        let factory = self
            .unit(uid)
            .assigned_factory
            .filter(|f| self.factories.contains_key(f))
            .or_else(|| {
                let team = self.unit(uid).team;
                self.nearest_factory(cur, Some(team))
            });
        let Some(factory) = factory else {
            return;
        };
        if !is_player && self.cell(cur).factory_id == Some(factory) {
            return;
        }

        let mut baseline = 0i64;
        let mut do_something_cost = 0i64;
        if is_player {
            baseline = i64::from(3 * spec.move_cost + spec.action_queue_power_cost);
            // Cost of doing something useful this turn before heading home.
            do_something_cost = i64::from(spec.dig_cost);
            if self.unit(uid).role.is_some() {
                if let Some(goal) = goal_cell {
                    if goal != cur {
                        let next = self.neighbor_toward(cur, goal);
                        do_something_cost =
                            i64::from(spec.move_power_cost(self.cell(next).rubble[i]));
                        if !self.cell(next).has_factory() {
                            cur = next;
                        }
                    }
                }
            }
        } else {
            assert!(i == 0);
        }

        // A unit with no queued real move will pay at least one refresh.
        let head_moves = self.unit(uid).action_queue.first().is_some_and(|a| {
            a.kind == ActionKind::Move && a.direction != Direction::Center
        });
        let naive_aq_cost = if head_moves {
            0
        } else {
            i64::from(spec.action_queue_power_cost)
        };

        let factory_center = {
            let f = self.factory(factory);
            self.cell_at(f.x, f.y).expect("factory on board")
        };
        let man_dist = self.man_dist_factory(cur, factory);
        let naive_threshold = naive_cost(self, step, uid, cur, factory_center, true);
        let end_step = if is_player {
            step + man_dist as u32
        } else {
            step + (man_dist.max(1) as u32) - 1
        };
        let naive_gain = i64::from(self.unit(uid).power_gain_span(&self.rules, step, end_step));

        if i64::from(unit_power) - do_something_cost + naive_gain
            >= baseline + naive_threshold + naive_aq_cost
        {
            return;
        }

        let (threshold, hops, dest) = self.dist(
            step,
            &[cur],
            Some(uid),
            DistOptions {
                dest_cell: Some(factory_center),
                ..DistOptions::default()
            },
        );
        let Some(dest) = dest else {
            return;
        };
        let end_step = if is_player {
            step + hops.max(0) as u32
        } else {
            step + (hops.max(1) as u32) - 1
        };
        let gain = i64::from(self.unit(uid).power_gain_span(&self.rules, step, end_step));
        if i64::from(unit_power) - do_something_cost + gain
            < baseline + threshold + naive_aq_cost
        {
            let route = self.last_route(dest);
            assert!(
                route.last().is_some_and(|&c| self.cell(c).has_factory()),
                "low-power route must end on a factory"
            );
            let u = self.unit_mut(uid);
            u.low_power = true;
            u.low_power_threshold = threshold;
            u.low_power_route = route;
        }
    }

    /// The opposing unit that has threatened `uid` for at least 3 of the
    /// last 6 real turns, if any. Memoized per snapshot.
    pub fn is_antagonized(&mut self, uid: UnitId) -> Option<UnitId> {
        if let Some(cached) = self.unit(uid).antagonized_cache.clone() {
            return cached;
        }
        let mut result: Option<UnitId> = None;
        if let Some(stats) = self.strategy.unit_stats.get(&uid) {
            if stats.cell_ids.len() >= 6 {
                let mut counts: std::collections::BTreeMap<UnitId, u32> =
                    std::collections::BTreeMap::new();
                let mut best: Option<(u32, UnitId)> = None;
                for &(threat_id, threat_step) in stats.threat_events.iter().rev() {
                    if threat_step + 6 < self.step {
                        break;
                    }
                    if self.units.contains_key(&threat_id) {
                        let c = counts.entry(threat_id).or_insert(0);
                        *c += 1;
                        if best.map_or(true, |(bc, _)| *c > bc) {
                            best = Some((*c, threat_id));
                        }
                    }
                }
                if let Some((count, threat)) = best {
                    if count >= 3 {
                        result = Some(threat);
                    }
                }
            }
        }
        self.unit_mut(uid).antagonized_cache = Some(result);
        result
    }

    /// Whether an opposing light is acting as a stationary supply chain
    /// link (alternating resource and power transfers in fixed directions).
    pub fn is_chain(&mut self, uid: UnitId) -> bool {
        assert!(self.unit(uid).team == self.opp.id);
        if let Some(cached) = self.unit(uid).chain_cache {
            return cached;
        }
        let mut result = false;
        let cell = self.unit_cell(uid, self.step);
        let unit = self.unit(uid);
        if unit.class == RobotClass::Light
            && !self.cell(cell).has_factory()
            && unit.action_queue.len() >= 2
        {
            let mut resource_count = 0;
            let mut power_count = 0;
            let mut resource_dir: Option<Direction> = None;
            let mut power_dir: Option<Direction> = None;
            let mut chain_shaped = true;
            for a in unit.action_queue.iter().take(10) {
                let idle_move = a.kind == ActionKind::Move && a.direction == Direction::Center;
                if !(idle_move || a.kind == ActionKind::Recharge || a.kind == ActionKind::Transfer)
                {
                    chain_shaped = false;
                    break;
                }
                if a.kind != ActionKind::Transfer {
                    continue;
                }
                if a.resource == Resource::Power {
                    power_count += 1;
                    match power_dir {
                        None => power_dir = Some(a.direction),
                        Some(d) if d != a.direction => {
                            chain_shaped = false;
                            break;
                        }
                        _ => {}
                    }
                } else {
                    resource_count += 1;
                    match resource_dir {
                        None => resource_dir = Some(a.direction),
                        Some(d) if d != a.direction => {
                            chain_shaped = false;
                            break;
                        }
                        _ => {}
                    }
                }
            }
            result = chain_shaped
                && resource_count >= 2
                && power_count >= 2
                && resource_dir != power_dir;
        }
        self.unit_mut(uid).chain_cache = Some(result);
        result
    }

    /// Whether `uid` has held its current cell for the past `count` steps.
    #[must_use]
    pub fn is_stationary(&self, uid: UnitId, step: Step, count: u32) -> bool {
        let Some(cur) = self.unit_cell_opt(uid, step) else {
            return false;
        };
        let lo = step.saturating_sub(count).max(0);
        for s in (lo..step).rev() {
            if self.cell(cur).unit_history[s as usize] != Some(uid) {
                return false;
            }
        }
        true
    }

    /// Whether an opposing unit looks like it is withdrawing from our
    /// territory back toward its own factories.
    #[must_use]
    pub fn is_retreating(&self, uid: UnitId, step: Step) -> bool {
        if step != self.step {
            return false;
        }
        let (future_cell, future_steps) = self.future_cell(uid, 3);
        let past_steps = 8usize.saturating_sub(future_steps);
        let Some(past_cell) = self
            .strategy
            .unit_stats
            .get(&uid)
            .and_then(|s| s.past_cell(past_steps))
        else {
            return false;
        };

        if self.man_dist(past_cell, future_cell) < 4 {
            return false;
        }
        let unit_team = self.unit(uid).team;
        let Some(past_factory) = self.nearest_factory(past_cell, None) else {
            return false;
        };
        if self.factory(past_factory).team == unit_team {
            return false;
        }
        let Some(future_factory) = self.nearest_factory(future_cell, None) else {
            return false;
        };
        if self.factory(future_factory).team != unit_team {
            return false;
        }
        let delta = self.man_dist_factory(future_cell, future_factory)
            - self.man_dist_factory(past_cell, future_factory);
        delta <= -4
    }

    /// Project the unit's committed queue into a future route, stopping at
    /// `max_len` cells, a destination cell, or a destination factory.
    #[must_use]
    pub fn future_route(
        &self,
        uid: UnitId,
        max_len: usize,
        dest_cell: Option<CellId>,
        dest_factory: Option<crate::board::FactoryId>,
        ignore_repeat1: bool,
    ) -> Vec<CellId> {
        let mut cell = self.unit_cell(uid, self.step);
        let mut route = vec![cell];
        let team = self.unit(uid).team;
        let mut prev_sig: Option<(ActionKind, Direction, i32, i32)> = None;
        for a in &self.unit(uid).action_queue {
            let sig = (a.kind, a.direction, a.repeat, a.n);
            if a.kind == ActionKind::Move && a.direction != Direction::Center {
                if ignore_repeat1 && a.repeat == 1 && a.n == 1 && prev_sig == Some(sig) {
                    break;
                }
                let (dx, dy) = a.direction.delta();
                let c = self.cell(cell);
                match self.cell_at(c.x + dx, c.y + dy) {
                    Some(next)
                        if !self
                            .cell(next)
                            .factory_id
                            .is_some_and(|f| self.factory(f).team != team) =>
                    {
                        cell = next;
                    }
                    _ => break,
                }
                prev_sig = Some(sig);
            } else {
                prev_sig = Some(sig);
                continue;
            }

            route.push(cell);
            if route.len() > max_len
                || dest_cell == Some(cell)
                || (dest_factory.is_some() && self.cell(cell).factory_id == dest_factory)
            {
                break;
            }
        }
        route
    }

    /// The cell the unit's committed queue puts it on after up to
    /// `future_steps` steps, and how many steps were actually usable.
    #[must_use]
    pub fn future_cell(&self, uid: UnitId, future_steps: usize) -> (CellId, usize) {
        let mut cell = self.unit_cell(uid, self.step);
        let queue = &self.unit(uid).action_queue;
        let take = future_steps.min(queue.len());
        for (j, a) in queue.iter().take(take).enumerate() {
            if a.kind == ActionKind::Move {
                let (dx, dy) = a.direction.delta();
                let c = self.cell(cell);
                match self.cell_at(c.x + dx, c.y + dy) {
                    Some(next) => cell = next,
                    None => return (cell, j),
                }
            }
        }
        (cell, take)
    }
}

/// Cells `uid` has recently mined (from history) or will mine (from its
/// committed queue), deduplicated in order.
pub fn unit_mines(
    board: &mut Board,
    uid: UnitId,
    past_steps: u32,
    future_steps: usize,
    ice: Option<bool>,
) -> Vec<CellId> {
    let default_args = past_steps == 15 && future_steps == 10;
    if default_args {
        if let Some(cached) = board.unit(uid).mines_cache.clone() {
            return cached
                .into_iter()
                .filter(|&c| {
                    ice.map_or(true, |want| {
                        if want {
                            board.cell(c).ice
                        } else {
                            board.cell(c).ore
                        }
                    })
                })
                .collect();
        }
    }

    let mut mines: Vec<CellId> = Vec::new();
    if let Some(stats) = board.strategy.unit_stats.get(&uid) {
        for &(cell, past_step) in stats.mine_events.iter().rev() {
            if past_step + past_steps <= board.step {
                break;
            }
            let c = board.cell(cell);
            let keep = ice.map_or(true, |want| if want { c.ice } else { c.ore });
            if keep {
                mines.push(cell);
            }
        }
    }

    let mut cell = board.unit_cell(uid, board.step);
    for a in board.unit(uid).action_queue.iter().take(future_steps) {
        match a.kind {
            ActionKind::Move => {
                let (dx, dy) = a.direction.delta();
                let c = board.cell(cell);
                match board.cell_at(c.x + dx, c.y + dy) {
                    Some(next) => cell = next,
                    None => break,
                }
            }
            ActionKind::Dig => {
                let c = board.cell(cell);
                if c.ice || c.ore {
                    let keep = ice.map_or(true, |want| if want { c.ice } else { c.ore });
                    if keep {
                        mines.push(cell);
                    }
                }
            }
            _ => {}
        }
    }

    // De-duplicate preserving order.
    let mut seen = std::collections::BTreeSet::new();
    mines.retain(|c| seen.insert(*c));

    if default_args && ice.is_none() {
        board.unit_mut(uid).mines_cache = Some(mines.clone());
    }
    mines
}

/// Build a decoy queue tail: a plausible mining excursion toward a
/// mid-field resource cell, emitted in place of the real plan once a lie is
/// armed so the opponent cannot read our intent.
pub fn lie_queue(board: &mut Board, uid: UnitId) -> Vec<UnitAction> {
    let Some(step) = board.unit(uid).lie_step else {
        return vec![UnitAction::no_move()];
    };
    let cur = board.unit_cell(uid, step);
    let Some(opp_factory) = board.nearest_factory(cur, Some(board.opp.id)) else {
        return vec![UnitAction::no_move()];
    };
    let (fx, fy) = {
        let f = board.factory(opp_factory);
        (f.x, f.y)
    };
    let c = board.cell(cur);
    let mid = board
        .cell_at((c.x + 3 * fx) / 4, (c.y + 3 * fy) / 4)
        .unwrap_or(cur);

    for (resource_cell, _) in board.radius_cells(mid, 0, 30) {
        let rc = board.cell(resource_cell);
        if !(rc.ice || rc.ore) {
            continue;
        }
        if board
            .assigned_unit(resource_cell, step)
            .is_some_and(|a| board.unit(a).class == RobotClass::Heavy)
        {
            continue;
        }
        if rng::chance(u64::from(step), 500) {
            continue;
        }
        let route = naive_route(board, step, uid, cur, resource_cell);
        let mut actions = Vec::new();
        let mut prev = cur;
        for &cell in route.iter().skip(1) {
            actions.push(UnitAction::movement(board.direction_to(prev, cell)));
            prev = cell;
        }
        actions.push(UnitAction::dig());
        return actions;
    }
    vec![UnitAction::no_move()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::GameRules;

    #[test]
    fn test_steps_until_power() {
        let rules = GameRules::default();
        // Already there.
        assert_eq!(steps_until_power(100, 100, &rules.heavy, 50, 30, 0), 0);
        // Heavy charges 10/day-step; 100 deficit = 10 day steps from dawn.
        assert_eq!(steps_until_power(0, 100, &rules.heavy, 50, 30, 0), 10);
        // Goal clamps to battery capacity.
        assert_eq!(
            steps_until_power(3000, 99_999, &rules.heavy, 50, 30, 0),
            0
        );
    }

    #[test]
    fn test_blank_unit_shapes() {
        let u = Unit::blank(900_123, 0, RobotClass::Light, 10);
        assert_eq!(u.pos.len(), 11);
        assert_eq!(u.power.len(), 11);
        assert!(u.pos[0].is_none());
        assert_eq!(u.protectors.len(), 11);
    }

    #[test]
    fn test_power_gain_span() {
        let rules = GameRules::default();
        let u = Unit::blank(1, 0, RobotClass::Heavy, 4);
        // Steps 28..32: 28, 29 are day (charge 10), 30, 31 night.
        assert_eq!(u.power_gain_span(&rules, 28, 32), 20);
    }

    #[test]
    fn test_lying_at() {
        let mut u = Unit::blank(1, 0, RobotClass::Light, 4);
        assert!(!u.lying_at(5));
        u.set_lie_step(5);
        // First lie step wins.
        u.set_lie_step(9);
        assert!(!u.lying_at(4));
        assert!(u.lying_at(5));
        assert!(u.lying_at(6));
    }
}
