//! The default factory mode: balanced mining, expansion, and defense.
//!
//! The candidate lists below are walked top to bottom and the first match
//! wins. Their order is strategic priority; reordering entries changes play.

use crate::board::{Board, FactoryId, Step, UnitId};
use crate::roles::{
    antagonizer, attacker, blockade, cow, generator, miner, pillager, protector, recharge,
    relocate, transporter, water_transporter, Role,
};
use crate::rules::RobotClass;

/// Role transitions offered to units that already have a role.
pub fn transition_role(board: &mut Board, uid: UnitId, step: Step) -> Option<Role> {
    recharge::from_transition_low_power_unit(board, uid, step)
        .or_else(|| recharge::from_transition_low_water_factory(board, uid, step))
        .or_else(|| water_transporter::from_transition_ice_conflict_factory(board, uid, step))
        .or_else(|| blockade::from_transition_block_water_transporter(board, uid, step))
        .or_else(|| blockade::from_transition_block_different_water_transporter(board, uid, step))
        .or_else(|| cow::from_transition_lichen_repair(board, uid, step))
        .or_else(|| attacker::from_transition_attack_water_courier(board, uid, step))
        .or_else(|| attacker::from_transition_attack_low_power_unit(board, uid, step))
        .or_else(|| protector::from_transition_from_transporter(board, uid, step))
        .or_else(|| protector::from_transition_protect_ice_miner(board, uid, step))
        .or_else(|| relocate::from_transition_assist_ice_conflict(board, uid, step))
        .or_else(|| attacker::from_transition_attack_with_sidekick(board, uid, step))
        .or_else(|| miner::from_transition_heavy_to_ore(board, uid, step))
        .or_else(|| miner::from_transition_heavy_to_uncontested_ice(board, uid, step))
        .or_else(|| {
            (board.unit(uid).class == RobotClass::Heavy)
                .then(|| attacker::from_transition_defend_territory(board, uid, step, 100))
                .flatten()
        })
        .or_else(|| transporter::from_transition_from_protector(board, uid, step))
        .or_else(|| pillager::from_transition_end_of_game(board, uid, step))
        .or_else(|| pillager::from_transition_active_pillager(board, uid, step, 20))
        .or_else(|| antagonizer::from_transition_retarget(board, uid, step))
        .or_else(|| miner::from_transition_to_closer_ice(board, uid, step))
}

/// New-role candidates for a roleless unit at a default factory.
pub fn new_role(board: &mut Board, fid: FactoryId, uid: UnitId, step: Step) -> Role {
    if board.unit(uid).class == RobotClass::Heavy {
        new_heavy_role(board, fid, uid, step)
    } else {
        new_light_role(board, fid, uid, step)
    }
}

fn new_heavy_role(board: &mut Board, fid: FactoryId, uid: UnitId, step: Step) -> Role {
    None.or_else(|| generator::from_post_forge_heavy(board, uid, step, 1))
        .or_else(|| {
            (step >= 200)
                .then(|| cow::from_factory_radius(board, uid, step, 20, 20, 1, 100))
                .flatten()
        })
        .or_else(|| miner::from_resource_route(board, uid, step, true, 10, 1))
        .or_else(|| cow::from_lichen_repair(board, uid, step, 5))
        .or_else(|| relocate::from_power_surplus(board, uid, step))
        .or_else(|| antagonizer::from_mine(board, uid, step, 20, Some(true), 100, Some(50)))
        .or_else(|| antagonizer::from_mine(board, uid, step, 20, Some(true), 100, Some(100)))
        .or_else(|| antagonizer::from_mine(board, uid, step, 15, None, 100, None))
        .or_else(|| cow::from_lichen_bottleneck(board, uid, step, 1, 20, 100))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 4, 40, 10_000))
        .or_else(|| miner::from_resource_route(board, uid, step, true, 10, 2))
        .or_else(|| pillager::from_lichen_cell_count(board, uid, step, 15, 1, false))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 10, 40, 10_000))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 10, 100, 10_000))
        .or_else(|| miner::from_resource_route(board, uid, step, true, 10, 3))
        .or_else(|| attacker::from_transition_defend_territory(board, uid, step, 1))
        .or_else(|| antagonizer::from_mine(board, uid, step, 25, Some(true), 100, Some(50)))
        .or_else(|| antagonizer::from_mine(board, uid, step, 20, None, 100, None))
        .or_else(|| pillager::from_lichen_cell_count(board, uid, step, 20, 2, false))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 15, 40, 10_000))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 15, 100, 10_000))
        .or_else(|| miner::from_resource_route(board, uid, step, true, 15, 4))
        .or_else(|| attacker::from_transition_defend_territory(board, uid, step, 3))
        .or_else(|| antagonizer::from_mine(board, uid, step, 40, Some(true), 100, Some(50)))
        .or_else(|| antagonizer::from_mine(board, uid, step, 40, None, 100, None))
        .or_else(|| pillager::from_lichen_cell_count(board, uid, step, 100, 100, false))
        .or_else(|| (step >= 750).then(|| relocate::from_idle(board, uid, step)).flatten())
        .unwrap_or_else(|| recharge::new(fid))
}

fn new_light_role(board: &mut Board, fid: FactoryId, uid: UnitId, step: Step) -> Role {
    None.or_else(|| transporter::from_new_unit(board, uid, step, 1))
        .or_else(|| pillager::from_one_way(board, uid, step))
        .or_else(|| pillager::from_lichen_cell_count(board, uid, step, 20, 1, false))
        .or_else(|| antagonizer::from_chain(board, uid, step, 20, 1))
        .or_else(|| relocate::from_assist_ice_conflict(board, uid, step))
        .or_else(|| antagonizer::from_mine(board, uid, step, 20, Some(true), 100, Some(50)))
        .or_else(|| antagonizer::from_mine(board, uid, step, 20, None, 1, None))
        .or_else(|| cow::from_lowland_route(board, uid, step, 2, 50, 100))
        .or_else(|| cow::from_lowland_route(board, uid, step, 6, 100, 100))
        .or_else(|| cow::from_lowland_route(board, uid, step, 4, 15, 100))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 100, 19, 20))
        .or_else(|| cow::from_lichen_bottleneck(board, uid, step, 10, 1, 100))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 100, 39, 15))
        .or_else(|| cow::from_lowland_route(board, uid, step, 6, 50, 100))
        .or_else(|| cow::from_resource_route(board, uid, step, false, 1, 20, 4))
        .or_else(|| antagonizer::from_chain(board, uid, step, 20, 3))
        .or_else(|| cow::from_lowland_route(board, uid, step, 8, 100, 3))
        .or_else(|| cow::from_lichen_repair(board, uid, step, 10))
        .or_else(|| {
            (step < 750)
                .then(|| relocate::from_power_surplus(board, uid, step))
                .flatten()
        })
        .or_else(|| miner::from_resource_route(board, uid, step, false, 10, 2))
        .or_else(|| cow::from_resource_route(board, uid, step, true, 2, 10, 4))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 10, 19, 10_000))
        .or_else(|| attacker::from_transition_defend_territory(board, uid, step, 4))
        .or_else(|| miner::from_resource_route(board, uid, step, true, 10, 2))
        .or_else(|| antagonizer::from_chain(board, uid, step, 20, 3))
        .or_else(|| antagonizer::from_mine(board, uid, step, 20, None, 3, None))
        .or_else(|| pillager::from_lichen_cell_count(board, uid, step, 15, 100, false))
        .or_else(|| cow::from_lichen_repair(board, uid, step, 15))
        .or_else(|| attacker::from_transition_defend_territory(board, uid, step, 6))
        .or_else(|| miner::from_resource_route(board, uid, step, false, 20, 3))
        .or_else(|| miner::from_resource_route(board, uid, step, true, 15, 3))
        .or_else(|| antagonizer::from_chain(board, uid, step, 25, 100))
        .or_else(|| antagonizer::from_mine(board, uid, step, 25, None, 100, None))
        .or_else(|| pillager::from_lichen_cell_count(board, uid, step, 20, 100, false))
        .or_else(|| attacker::from_transition_defend_territory(board, uid, step, 8))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 15, 39, 10_000))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 4, 79, 10_000))
        .or_else(|| antagonizer::from_chain(board, uid, step, 40, 100))
        .or_else(|| antagonizer::from_mine(board, uid, step, 40, None, 100, None))
        .or_else(|| pillager::from_lichen_cell_count(board, uid, step, 100, 100, false))
        .or_else(|| cow::from_lichen_frontier(board, uid, step, 100, 100, 10_000))
        .or_else(|| miner::from_resource_route(board, uid, step, false, 20, 4))
        .or_else(|| miner::from_resource_route(board, uid, step, true, 15, 100))
        .or_else(|| (step >= 750).then(|| relocate::from_idle(board, uid, step)).flatten())
        .unwrap_or_else(|| recharge::new(fid))
}
