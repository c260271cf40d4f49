//! Ice-conflict mode: survive on minimal water while a heavy antagonizer
//! denies a nearby rival's ice until it starves.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::board::{Board, FactoryId, Step, UnitId};
use crate::modes::Mode;
use crate::roles::{antagonizer, cow, miner, recharge, water_transporter, Role, RoleKind};
use crate::rules::RobotClass;

/// Ice-conflict mode state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceConflict {
    /// The rival factory being starved.
    pub opp_factory: FactoryId,
    /// Set when this is a reaction to our own miner being antagonized.
    pub defensive: bool,
}

fn nearest_ice_route_dist(board: &Board, fid: FactoryId) -> Option<i32> {
    board
        .factory(fid)
        .resource_routes
        .iter()
        .find(|r| board.cell(*r.last().expect("non-empty")).ice)
        .map(|r| r.len() as i32 - 1)
}

/// A lone antagonized heavy ice miner with shrinking water flips the whole
/// factory into a defensive ice conflict.
pub fn from_transition_antagonized(board: &mut Board, fid: FactoryId, step: Step) -> Option<Mode> {
    let i = board.idx(step);
    if i != 0
        || board
            .factory(fid)
            .mode
            .as_ref()
            .is_some_and(Mode::is_ice_conflict)
    {
        return None;
    }
    // Needs a friendly factory left to lean on for water.
    if board.my_factories().len() == 1 {
        return None;
    }

    let heavies: Vec<UnitId> = board
        .factory_units(fid, step)
        .into_iter()
        .filter(|&u| board.unit(u).class == RobotClass::Heavy)
        .collect();
    let heavies_water: i32 = heavies.iter().map(|&u| board.unit(u).water[i]).sum();
    let f = board.factory(fid);
    let factory_water =
        f.water[i] + heavies_water + (f.ice[i] + heavies_water) / board.rules.ice_water_ratio;
    if heavies.len() != 1 || factory_water >= board.config.ice_conflict_water_threshold {
        return None;
    }

    let heavy = heavies[0];
    let Some(Role::Miner(m)) = board.unit(heavy).role.clone() else {
        return None;
    };
    if !board.cell(m.resource_cell).ice
        || board.man_dist(board.unit_cell(heavy, step), m.resource_cell) >= 2
    {
        return None;
    }

    let antagonist = board.is_antagonized(heavy)?;
    let contested = board.is_contested(m.resource_cell);
    if !contested && board.unit(antagonist).power[i] / 20 < factory_water - 20 {
        info!(unit = heavy, "antagonized but can outlast the harasser");
        return None;
    }
    // A safer cell beats a mode flip.
    if miner::from_transition_heavy_to_uncontested_ice(board, heavy, step).is_some() {
        info!(unit = heavy, "antagonized, transitioning ice cell first");
        return None;
    }

    let opp_factory = board
        .strategy
        .unit_stats
        .get(&antagonist)
        .and_then(|s| s.last_factory_id)
        .filter(|f| board.factories.contains_key(f));
    if let Some(of) = opp_factory {
        let far = board.man_dist_factory(board.factory_center(of), fid) > 15;
        if far && board.unit(antagonist).power[i] / 20 < factory_water - 20 {
            info!(unit = heavy, "antagonized, but can outlast the distant attacker");
            return None;
        }
    }

    crate::modes::release_units(board, fid, step, |_| false);
    from_desperation(board, fid, step, opp_factory)
}

/// Open the match starving a rival whose ice we dominate.
pub fn from_ice_superiority(board: &mut Board, fid: FactoryId, step: Step) -> Option<Mode> {
    if step != 0 {
        return None;
    }
    let has_dist1_ice = nearest_ice_route_dist(board, fid) == Some(1);
    let center = board.factory_center(fid);
    for opp in board.opp_factories() {
        // A luxury conflict never doubles up on one victim.
        if has_dist1_ice {
            let already = board.my_factories().into_iter().any(|own| {
                matches!(
                    &board.factory(own).mode,
                    Some(Mode::IceConflict(ic)) if ic.opp_factory == opp
                )
            });
            if already {
                continue;
            }
        }
        let opp_center = board.factory_center(opp);
        if board.man_dist(center, opp_center) > 10 {
            continue;
        }
        if board.ice_vulnerable_relative(step, opp_center, center) {
            info!(factory = fid, target = opp, "opening ice conflict");
            return Some(Mode::IceConflict(IceConflict { opp_factory: opp, defensive: false }));
        }
    }
    None
}

/// A factory with no adjacent ice denies the nearest rival until it starves
/// and its ice can be adopted.
pub fn from_desperation(
    board: &mut Board,
    fid: FactoryId,
    step: Step,
    attacking_factory: Option<FactoryId>,
) -> Option<Mode> {
    if attacking_factory.is_none() {
        if step != 0 {
            return None;
        }
        if nearest_ice_route_dist(board, fid) == Some(1) {
            return None;
        }
    }
    let center = board.factory_center(fid);
    let opp_factory =
        attacking_factory.or_else(|| board.nearest_factory(center, Some(board.opp.id)))?;
    info!(factory = fid, target = opp_factory, defensive = attacking_factory.is_some(), "ice conflict");
    Some(Mode::IceConflict(IceConflict {
        opp_factory,
        defensive: attacking_factory.is_some(),
    }))
}

pub(crate) fn is_valid(board: &mut Board, fid: FactoryId, ic: &IceConflict, step: Step) -> bool {
    let i = board.idx(step);
    let mut valid = board.factories.contains_key(&ic.opp_factory);

    // Abort luxury conflicts when too many are running at once.
    if valid && !ic.defensive && (i == 0 || step == 0) {
        let own_dist1 = nearest_ice_route_dist(board, fid) == Some(1);
        let opp_dist1 = nearest_ice_route_dist(board, ic.opp_factory) == Some(1);
        if own_dist1 && opp_dist1 {
            let mut ice_conflicts = 0usize;
            let mut defaults = 0usize;
            for own in board.my_factories() {
                match &board.factory(own).mode {
                    Some(Mode::IceConflict(x)) => {
                        if board
                            .get_factory(x.opp_factory)
                            .is_some_and(|f| f.water[i] > 15)
                        {
                            ice_conflicts += 1;
                        }
                    }
                    Some(Mode::Forge(_)) => {}
                    _ => defaults += 1,
                }
            }
            if ice_conflicts > 2 * defaults {
                valid = false;
            }
        }
    }

    // Defensive conflicts end when a second heavy arrives,
    if valid && ic.defensive && i == 0 {
        let heavies = board
            .factory_units(fid, step)
            .into_iter()
            .filter(|&u| board.unit(u).class == RobotClass::Heavy)
            .count();
        if heavies > 1 {
            valid = false;
        }
    }
    // ... or when the home ice has been quiet for a while,
    if valid && ic.defensive && i == 0 {
        let ice_cell = board
            .factory(fid)
            .resource_routes
            .iter()
            .find(|r| board.cell(*r.last().expect("non-empty")).ice)
            .map(|r| *r.last().expect("non-empty"));
        if let Some(cell) = ice_cell {
            if board.threat_units(cell, 10, 2, true, false).is_empty() {
                valid = false;
            }
        }
    }
    // ... or when the attacker has no heavies left to send.
    if valid && ic.defensive && i == 0 {
        let f = board.factory(ic.opp_factory);
        let opp_metal = f.metal[i] + f.ore[i] / board.rules.ore_metal_ratio;
        let opp_heavies = board
            .factory_units(ic.opp_factory, step)
            .into_iter()
            .filter(|&u| board.unit(u).class == RobotClass::Heavy)
            .count();
        if opp_heavies == 0 && opp_metal < board.rules.heavy.metal_cost {
            valid = false;
        }
    }

    if !valid {
        // Couriers mid-delivery finish the run; everyone else re-enters
        // assignment.
        crate::modes::release_units(board, fid, step, |r| {
            r.kind() == RoleKind::WaterTransporter
        });
        adopt_an_ice_cell(board, fid, step);
    }
    valid
}

/// Post-conflict cleanup: make sure this factory owns at least one ice cell,
/// taking the nearest one from a factory holding several.
fn adopt_an_ice_cell(board: &mut Board, fid: FactoryId, step: Step) {
    let mut owned_counts: std::collections::BTreeMap<FactoryId, usize> =
        std::collections::BTreeMap::new();
    let mut own_ice: Vec<crate::board::CellId> = Vec::new();
    for other in board.my_factories() {
        for route in board.factory(other).resource_routes.clone() {
            let cell = *route.last().expect("non-empty");
            if !board.cell(cell).ice {
                continue;
            }
            if let Some(owner) = board.cell(cell).assigned_factory {
                *owned_counts.entry(owner).or_insert(0) += 1;
            }
            if other == fid {
                own_ice.push(cell);
            }
        }
    }
    if owned_counts.get(&fid).copied().unwrap_or(0) > 0 {
        return;
    }
    for cell in own_ice {
        let owner = board.cell(cell).assigned_factory;
        let free = owner.map_or(true, |o| owned_counts.get(&o).copied().unwrap_or(0) > 1);
        if free {
            if board.idx(step) == 0 {
                info!(factory = fid, cell, "adopting ice cell after conflict");
            }
            board.cell_mut(cell).assigned_factory = Some(fid);
            break;
        }
    }
}

/// Ice-conflict role chain: the heavy antagonizes, lights ferry water and
/// harass, everyone else conserves.
pub(crate) fn new_role(
    board: &mut Board,
    fid: FactoryId,
    uid: UnitId,
    step: Step,
    ic: &IceConflict,
) -> Role {
    let i = board.idx(step);
    let heavy_ant_target = board
        .factory_units(fid, step)
        .into_iter()
        .filter(|&u| board.unit(u).class == RobotClass::Heavy)
        .find_map(|u| match &board.unit(u).role {
            Some(Role::Antagonizer(a)) => Some(a.target_cell),
            _ => None,
        });
    let light_count = board
        .factory_units(fid, step)
        .into_iter()
        .filter(|&u| board.unit(u).class == RobotClass::Light)
        .count();
    let harasser_cap = light_count.saturating_sub(2).max(1);

    if board.unit(uid).class == RobotClass::Heavy {
        antagonizer::from_factory(board, uid, step, ic.opp_factory)
            .or_else(|| {
                // With deep power reserves, normal work resumes.
                (board.factory(fid).power[i] > 3000 && heavy_ant_target.is_some())
                    .then(|| super::default::new_role(board, fid, uid, step))
            })
            .unwrap_or_else(|| recharge::new(fid))
    } else {
        water_transporter::from_ice_conflict_factory(board, uid, step, fid, 130)
            .or_else(|| {
                // Wait for the heavy to pick its post before clearing a path
                // to it.
                (step >= 3)
                    .then(|| cow::from_custom_route(board, uid, step, heavy_ant_target, 1))
                    .flatten()
            })
            .or_else(|| antagonizer::from_chain(board, uid, step, 12, harasser_cap))
            .or_else(|| {
                antagonizer::from_mine(board, uid, step, 12, Some(true), harasser_cap, None)
            })
            .or_else(|| {
                antagonizer::from_mine(board, uid, step, 10, Some(false), harasser_cap, None)
            })
            .or_else(|| miner::from_resource_route(board, uid, step, true, 20, 1))
            .or_else(|| {
                (board.factory(fid).power[i] > 1000)
                    .then(|| miner::from_resource_route(board, uid, step, true, 20, 2))
                    .flatten()
            })
            .or_else(|| {
                (board.factory(fid).power[i] > 2500)
                    .then(|| super::default::new_role(board, fid, uid, step))
            })
            .unwrap_or_else(|| recharge::new(fid))
    }
}
