//! Forge mode: a factory with safe dist-1 ore pumps out lights for the rest
//! of the team.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::board::{Board, CellId, FactoryId, Step, UnitId};
use crate::modes::Mode;
use crate::roles::{miner, relocate, transporter, Role, RoleKind};
use crate::rules::RobotClass;

/// How close the ore must be for a factory to qualify as a forge.
const MAX_ORE_DIST: i32 = 3;

/// Forge mode state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forge {
    /// The ore cell the forge's heavy works.
    pub ore_cell: CellId,
}

/// Whether `fid` qualifies to run as a forge.
pub fn from_factory(board: &mut Board, fid: FactoryId, step: Step) -> Option<Mode> {
    let i = board.idx(step);
    // A step-0 ice conflict that fell through lands in default, not forge.
    if step == 1 {
        return None;
    }

    if step >= 2 {
        // Lichen won't survive the power diet of a forge.
        if !board.factory(fid).lichen_connected_cells.is_empty() {
            return None;
        }
        let center = board.factory_center(fid);
        if board.nearest_factory_dist(center, Some(board.opp.id)) < 15 {
            return None;
        }
        let f = board.factory(fid);
        if f.water[i] + f.ice[i] / board.rules.ice_water_ratio < 60 {
            return None;
        }
        let lights = board
            .factory_units(fid, step)
            .into_iter()
            .filter(|&u| board.unit(u).class == RobotClass::Light)
            .count();
        if lights + 2 >= board.config.light_limit_at(step) as usize {
            return None;
        }
    }

    // No rival may hold ice superiority over this spot.
    let center = board.factory_center(fid);
    for opp in board.opp_factories() {
        let opp_center = board.factory_center(opp);
        if board.ice_vulnerable_relative(step, center, opp_center) {
            return None;
        }
    }

    // The team must still be able to carry its ice-conflict factories.
    let mut ice_conflict_count = 0usize;
    let mut forge_count = 0usize;
    let mut default_count = 0usize;
    for other in board.my_factories() {
        if other == fid {
            continue;
        }
        match &board.factory(other).mode {
            Some(Mode::IceConflict(_)) => ice_conflict_count += 1,
            Some(Mode::Forge(_)) => forge_count += 1,
            _ => default_count += 1,
        }
    }
    if 2 * ice_conflict_count > 4 * default_count + forge_count + 1 {
        return None;
    }

    // Nearest safe ore wins; scores scaled by 1000 for the rubble tie-break.
    let mut best: Option<(i64, CellId)> = None;
    for (cell, self_dist) in board.radius_cells_factory(center, 1, MAX_ORE_DIST) {
        if !board.cell(cell).ore {
            continue;
        }
        let opp_dist = board.nearest_factory_dist(cell, Some(board.opp.id));
        let dist_diff = i64::from(opp_dist - self_dist);
        if dist_diff > 0 {
            let score = dist_diff * 1000 + 100 - i64::from(board.cell(cell).rubble[0]);
            if best.map_or(true, |(bs, _)| score > bs) {
                best = Some((score, cell));
            }
        }
    }
    best.map(|(_, cell)| {
        if i == 0 {
            info!(factory = fid, ore_cell = cell, "factory becomes a forge");
        }
        Mode::Forge(Forge { ore_cell: cell })
    })
}

pub(crate) fn is_valid(board: &mut Board, fid: FactoryId, f: &Forge, step: Step) -> bool {
    let i = board.idx(step);
    let mut valid = true;

    // Water first.
    let fac = board.factory(fid);
    let factory_water = fac.water[i] + fac.ice[i] / board.rules.ice_water_ratio;
    let center = board.factory_center(fid);
    let opp_dist = board.nearest_factory_dist(center, Some(board.opp.id));
    if factory_water < board.config.low_water_floor || (factory_water < 80 && opp_dist <= 8) {
        valid = false;
    }

    // The forge lives and dies with its heavy ore miner.
    if valid && step >= 10 {
        let has_ore_heavy = board.factory_units(fid, step).into_iter().any(|u| {
            board.unit(u).class == RobotClass::Heavy
                && matches!(&board.unit(u).role, Some(Role::Miner(m)) if board.cell(m.resource_cell).ore)
        });
        if !has_ore_heavy {
            valid = false;
        }
    }

    // Done once the light cap is met (counting metal already banked).
    if valid {
        let fac = board.factory(fid);
        let factory_metal = fac.metal[i] + fac.ore[i] / board.rules.ore_metal_ratio;
        let lights = board
            .factory_units(fid, step)
            .into_iter()
            .filter(|&u| {
                board.unit(u).class == RobotClass::Light
                    && board
                        .unit(u)
                        .role
                        .as_ref()
                        .map_or(true, |r| r.kind() != RoleKind::Relocate)
            })
            .count() as i32;
        let future_lights = factory_metal / board.rules.light.metal_cost;
        valid = lights + future_lights < board.config.light_limit_at(step) as i32;
    }

    if !valid {
        crate::modes::release_units(board, fid, step, |r| {
            matches!(r, Role::Relocate(_))
        });
    }
    valid
}

/// Forge role chain: ore first, then the default lists.
pub(crate) fn new_role(board: &mut Board, fid: FactoryId, uid: UnitId, step: Step, f: &Forge) -> Role {
    if board.unit(uid).class == RobotClass::Heavy {
        miner::from_cell(board, uid, step, f.ore_cell)
            .or_else(|| miner::from_resource_route(board, uid, step, false, MAX_ORE_DIST, 100))
            .unwrap_or_else(|| super::default::new_role(board, fid, uid, step))
    } else {
        transporter::from_new_unit(board, uid, step, MAX_ORE_DIST)
            .or_else(|| relocate::from_forge(board, uid, step))
            .or_else(|| miner::from_resource_route(board, uid, step, true, 3, 1))
            .unwrap_or_else(|| super::default::new_role(board, fid, uid, step))
    }
}
