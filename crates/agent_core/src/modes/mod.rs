//! Per-factory strategy state machines.
//!
//! A mode governs three things: which robot the factory builds next, whether
//! it waters lichen this turn, and which ordered list of role candidates its
//! units walk when they need work. Candidate lists are tried top to bottom;
//! declaration order, not score, breaks ties.
//!
//! Mode transitions are evaluated at turn index 0 only, never mid-lookahead.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::actions::FactoryAction;
use crate::board::{Board, FactoryId, Step, UnitId};
use crate::math::Fixed;
use crate::rng;
use crate::roles::{self, Role};
use crate::rules::RobotClass;

pub mod default;
pub mod forge;
pub mod ice_conflict;

pub use forge::Forge;
pub use ice_conflict::IceConflict;

/// A factory's strategy state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Mode {
    /// Balanced resource/expansion play.
    Default,
    /// Ore-first factory pumping out lights.
    Forge(Forge),
    /// Survive by denying a nearby rival's ice.
    IceConflict(IceConflict),
}

impl Mode {
    /// Stable lowercase name used in logs.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Mode::Default => "default",
            Mode::Forge(_) => "forge",
            Mode::IceConflict(_) => "ice_conflict",
        }
    }

    /// Whether this is the ice-conflict mode.
    #[must_use]
    pub fn is_ice_conflict(&self) -> bool {
        matches!(self, Mode::IceConflict(_))
    }

    /// Whether this is a defensive ice conflict (reacting to an attack).
    #[must_use]
    pub fn is_defensive_ice_conflict(&self) -> bool {
        matches!(self, Mode::IceConflict(ic) if ic.defensive)
    }

    /// Whether this is the forge mode.
    #[must_use]
    pub fn is_forge(&self) -> bool {
        matches!(self, Mode::Forge(_))
    }

    /// The rival factory an ice conflict is aimed at.
    #[must_use]
    pub fn ice_conflict_target(&self) -> Option<FactoryId> {
        match self {
            Mode::IceConflict(ic) => Some(ic.opp_factory),
            _ => None,
        }
    }

    /// Whether every entity this restored mode references still exists.
    #[must_use]
    pub fn refs_alive(&self, board: &Board) -> bool {
        match self {
            Mode::Default => true,
            Mode::Forge(f) => (f.ore_cell as usize) < board.cells.len(),
            Mode::IceConflict(ic) => board.factories.contains_key(&ic.opp_factory),
        }
    }
}

/// Re-examine whether `mode` should keep driving `fid`. May clear unit roles
/// as a side effect when a mode collapses.
pub fn is_valid(board: &mut Board, fid: FactoryId, mode: &Mode, step: Step) -> bool {
    match mode {
        Mode::Default => true,
        Mode::Forge(f) => forge::is_valid(board, fid, f, step),
        Mode::IceConflict(ic) => ice_conflict::is_valid(board, fid, ic, step),
    }
}

/// Special mode-changing criteria checked each real turn for factories that
/// already have a mode.
pub fn transition(board: &mut Board, fid: FactoryId, step: Step) -> Option<Mode> {
    ice_conflict::from_transition_antagonized(board, fid, step)
}

/// Fill-in constructor chain for a factory with no mode, in fixed priority
/// order.
pub fn new_mode(board: &mut Board, fid: FactoryId, step: Step) -> Mode {
    ice_conflict::from_ice_superiority(board, fid, step)
        .or_else(|| ice_conflict::from_desperation(board, fid, step, None))
        .or_else(|| forge::from_factory(board, fid, step))
        .unwrap_or(Mode::Default)
}

/// Role-transition candidates for a unit that already has a role. All three
/// modes share the list; what differs per mode is the new-role chain below.
pub fn transition_role(board: &mut Board, _fid: FactoryId, uid: UnitId, step: Step) -> Option<Role> {
    default::transition_role(board, uid, step)
}

/// New-role candidate list for a roleless unit.
pub fn new_role(board: &mut Board, fid: FactoryId, uid: UnitId, step: Step) -> Role {
    match board.factory(fid).mode.clone().expect("mode set before roles") {
        Mode::Default => default::new_role(board, fid, uid, step),
        Mode::Forge(f) => forge::new_role(board, fid, uid, step, &f),
        Mode::IceConflict(ic) => ice_conflict::new_role(board, fid, uid, step, &ic),
    }
}

/// Build decision for this simulated turn.
pub fn do_build(board: &mut Board, fid: FactoryId, step: Step) -> Option<FactoryAction> {
    match board.factory(fid).mode.clone().expect("mode set") {
        Mode::Default | Mode::Forge(_) | Mode::IceConflict(_) => shared_build(board, fid, step),
    }
}

/// Water decision for this simulated turn.
pub fn do_water(board: &mut Board, fid: FactoryId, step: Step) -> Option<FactoryAction> {
    let i = board.idx(step);
    match board.factory(fid).mode.clone().expect("mode set") {
        Mode::Default | Mode::Forge(_) => shared_water(board, fid, step),
        Mode::IceConflict(_) => {
            // Conserve water: only grow on a deep reserve or in the endgame.
            if board.factory(fid).water[i] > board.config.always_always_water_threshold
                || step >= board.config.end_phase
            {
                shared_water(board, fid, step)
            } else {
                None
            }
        }
    }
}

/// Heavy-first build policy with the growing light cap.
fn shared_build(board: &mut Board, fid: FactoryId, step: Step) -> Option<FactoryAction> {
    let i = board.idx(step);
    let light_lim = board.config.light_limit_at(step) as usize;

    let units = board.factory_units(fid, step);
    let light_count = units
        .iter()
        .filter(|&&u| {
            let unit = board.unit(u);
            unit.class == RobotClass::Light
                && unit
                    .role
                    .as_ref()
                    .map_or(true, |r| r.kind() != crate::roles::RoleKind::Relocate)
        })
        .count();
    let heavy_count = units
        .iter()
        .filter(|&&u| {
            let unit = board.unit(u);
            unit.class == RobotClass::Heavy
                && unit.role.as_ref().map_or(true, |r| {
                    !matches!(
                        r.kind(),
                        crate::roles::RoleKind::Relocate | crate::roles::RoleKind::Generator
                    )
                })
        })
        .count();

    let enough_heavies = (heavy_count >= 2 && light_count < light_lim / 2)
        || (heavy_count >= 3 && light_count < 3 * light_lim / 4);

    let f = board.factory(fid);
    let metal_pipeline = f.metal[i] + f.ore[i] / board.rules.ore_metal_ratio;
    if !enough_heavies && metal_pipeline >= board.rules.heavy.metal_cost {
        if board.factory_can_build_heavy(fid, step) {
            return Some(execute_build(board, fid, step, true));
        }
    } else if board.factory_can_build_light(fid, step) {
        let over_cap_trickle = light_count < light_lim + 4 && step >= 350 && step % 2 == 0;
        let endgame_trickle = step >= 750 && step % 2 == 0;
        if light_count < light_lim || over_cap_trickle || endgame_trickle {
            return Some(execute_build(board, fid, step, false));
        }
    }
    None
}

fn execute_build(board: &mut Board, fid: FactoryId, step: Step, heavy: bool) -> FactoryAction {
    if board.idx(step) == 0 {
        debug!(factory = fid, heavy, "building robot");
    }
    board.factory_do_build(fid, step, heavy)
}

/// Tiered water policy: never below the floor, probabilistically on income,
/// always above the luxury threshold, unconditionally when going for broke.
fn shared_water(board: &mut Board, fid: FactoryId, step: Step) -> Option<FactoryAction> {
    let i = board.idx(step);
    // Digs this turn changed the growth set; reprice before deciding.
    board.calculate_lichen_count(fid, step);

    if step >= 999 {
        return Some(board.factory_do_water(fid, step));
    }
    let water_cost = board.factory_water_cost(fid, step);
    if water_cost == 0 {
        return None;
    }

    // Nothing new would grow: skip.
    let f = board.factory(fid);
    if step < board.config.end_phase && f.lichen_flat_boundary_cells.is_empty() {
        let min_lichen = f
            .lichen_growth_cells
            .iter()
            .map(|&c| board.cell(c).lichen[i])
            .min()
            .unwrap_or(0);
        if min_lichen >= 10 {
            if i == 0 {
                debug!(factory = fid, "skip watering, nothing grows");
            }
            return None;
        }
    }

    let ice_miners: Vec<UnitId> = board
        .factory_units(fid, step)
        .into_iter()
        .filter(|&u| {
            matches!(&board.unit(u).role, Some(Role::Miner(m)) if board.cell(m.resource_cell).ice)
        })
        .collect();
    let heavy_ice_count = ice_miners
        .iter()
        .filter(|&&u| board.unit(u).class == RobotClass::Heavy)
        .count();

    let f = board.factory(fid);
    let water = f.water[i];
    let water_with_ice = water + f.ice[i] / board.rules.ice_water_ratio;

    // Go for broke at the end: dump everything if it lasts to step 1000.
    let broke_threshold = (1 + water_cost) + (1000 - step as i32 - 2) * (2 + water_cost);
    let mut endgame_water = water;
    if step >= board.config.ice_mine_rush
        && water >= 1 + water_cost
        && water_with_ice >= (1 + water_cost) + 3 * (2 + water_cost)
    {
        endgame_water = water_with_ice;
        for &u in &ice_miners {
            if board.man_dist_factory(board.unit_cell(u, step), fid) <= 1 {
                endgame_water += board.unit(u).ice[i] / board.rules.ice_water_ratio;
            }
        }
    }
    if endgame_water >= broke_threshold && board.factory_can_water(fid, step) {
        return Some(board.factory_do_water(fid, step));
    }

    if water - (1 + water_cost) < board.config.never_water_threshold {
        return None;
    }

    if water - (1 + water_cost) >= board.config.always_water_threshold
        && board.factory_can_water(fid, step)
    {
        // Above the comfortable band with no heavy income, hold steady by
        // watering every other turn.
        if heavy_ice_count > 0
            || step % 2 == 0
            || water - (1 + water_cost) >= board.config.always_always_water_threshold
        {
            return Some(board.factory_do_water(fid, step));
        }
        return None;
    }

    let income = board.factory_water_income(fid, step, None);
    let permille = ((income - Fixed::from_num(1)) / Fixed::from_num(water_cost)
        * Fixed::from_num(1000))
    .floor()
    .to_num::<i64>()
    .clamp(0, 1000) as u32;
    if rng::chance(u64::from(step), permille) && board.factory_can_water(fid, step) {
        return Some(board.factory_do_water(fid, step));
    }
    None
}

/// Clear the roles of a collapsing mode's units so they re-enter assignment.
/// Runs before any role is re-claimed this turn, so no claims are held yet.
pub(crate) fn release_units(board: &mut Board, fid: FactoryId, step: Step, keep: impl Fn(&Role) -> bool) {
    for uid in board.factory_units(fid, step) {
        let keep_role = board.unit(uid).role.as_ref().is_some_and(&keep);
        if !keep_role {
            let unit = board.unit_mut(uid);
            unit.role = None;
            unit.role_set_step = None;
        }
    }
    if board.idx(step) == 0 {
        info!(factory = fid, "mode collapse released its units");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(Mode::Default.kind_name(), "default");
        assert_eq!(Mode::Forge(Forge { ore_cell: 0 }).kind_name(), "forge");
        assert_eq!(
            Mode::IceConflict(IceConflict { opp_factory: 1, defensive: false }).kind_name(),
            "ice_conflict"
        );
    }

    #[test]
    fn test_defensive_flag() {
        let m = Mode::IceConflict(IceConflict { opp_factory: 1, defensive: true });
        assert!(m.is_ice_conflict());
        assert!(m.is_defensive_ice_conflict());
        assert_eq!(m.ice_conflict_target(), Some(1));
        assert!(!Mode::Default.is_ice_conflict());
    }

    #[test]
    fn test_mode_roundtrip() {
        let m = Mode::Forge(Forge { ore_cell: 42 });
        let bytes = bincode::serialize(&m).unwrap();
        let back: Mode = bincode::deserialize(&bytes).unwrap();
        assert!(matches!(back, Mode::Forge(f) if f.ore_cell == 42));
    }
}
