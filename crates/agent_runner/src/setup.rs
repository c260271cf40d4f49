//! Placement-phase fallback.
//!
//! The real placement heuristic is out of scope for this repo; the runner
//! bids nothing and takes the first legal spawn with adjacent ice, splitting
//! the starting stock evenly across factories. Good enough for self-play and
//! integration testing.

use serde_json::{json, Value};
use tracing::info;

use crate::protocol::TurnInput;

/// Answer one placement-phase request.
#[must_use]
pub fn early_setup(input: &TurnInput) -> Value {
    if input.step == 0 {
        return json!({ "faction": "AlphaStrike", "bid": 0 });
    }

    let Some(team) = input.obs.teams.get(&input.player) else {
        return json!({});
    };
    let my_turn = if team.place_first {
        input.step % 2 == 1
    } else {
        input.step % 2 == 0
    };
    if !my_turn || team.metal == 0 {
        return json!({});
    }

    let Some(mask) = &input.obs.board.valid_spawns_mask else {
        return json!({});
    };
    let ice = &input.obs.board.ice;
    let n = mask.len() as i32;

    // Nearest legal spawn center to any ice cell; ties go to the first in
    // scan order.
    let mut best: Option<(i32, i32, i32)> = None;
    for x in 0..n {
        for y in 0..n {
            if !mask[x as usize][y as usize] {
                continue;
            }
            let mut nearest_ice = i32::MAX;
            for ix in 0..n {
                for iy in 0..n {
                    if ice[ix as usize][iy as usize] > 0 {
                        // Distance to the footprint edge, not the center.
                        let d = ((ix - x).abs() - 1).max(0) + ((iy - y).abs() - 1).max(0);
                        nearest_ice = nearest_ice.min(d);
                    }
                }
            }
            if best.map_or(true, |(_, _, b)| nearest_ice < b) {
                best = Some((x, y, nearest_ice));
            }
        }
    }

    let Some((x, y, ice_dist)) = best else {
        return json!({});
    };
    let water = team.water.min(150);
    let metal = team.metal.min(150);
    info!(x, y, ice_dist, "placing factory");
    json!({ "spawn": [x, y], "water": water, "metal": metal })
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_core::observation::{BoardLayers, Observation, TeamObs};

    fn placement_input(step: u32, place_first: bool) -> TurnInput {
        let n = 8;
        let mut board = BoardLayers {
            ice: vec![vec![0; n]; n],
            ore: vec![vec![0; n]; n],
            rubble: vec![vec![0; n]; n],
            lichen: vec![vec![0; n]; n],
            lichen_strains: vec![vec![-1; n]; n],
            valid_spawns_mask: Some(vec![vec![false; n]; n]),
        };
        board.ice[2][2] = 1;
        if let Some(mask) = board.valid_spawns_mask.as_mut() {
            mask[2][4] = true;
            mask[6][6] = true;
        }
        let mut obs = Observation {
            board,
            ..Observation::default()
        };
        obs.teams.insert(
            "player_0".into(),
            TeamObs {
                team_id: 0,
                water: 150,
                metal: 150,
                factory_strains: Vec::new(),
                place_first,
            },
        );
        TurnInput {
            player: "player_0".into(),
            step,
            obs,
            remaining_overage_time: 60.0,
            info: None,
        }
    }

    #[test]
    fn test_bid_is_zero() {
        let v = early_setup(&placement_input(0, true));
        assert_eq!(v["bid"], 0);
    }

    #[test]
    fn test_spawn_prefers_ice() {
        let v = early_setup(&placement_input(1, true));
        assert_eq!(v["spawn"], serde_json::json!([2, 4]));
        assert_eq!(v["water"], 150);
    }

    #[test]
    fn test_waits_for_turn() {
        let v = early_setup(&placement_input(2, true));
        assert!(v.get("spawn").is_none());
    }
}
