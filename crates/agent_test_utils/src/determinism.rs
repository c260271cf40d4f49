//! Determinism testing utilities.
//!
//! The engine must be a pure function of its inputs: identical snapshots and
//! caches produce identical action maps. Sources of non-determinism the
//! engine design rules out:
//!
//! - **Floating-point math**: all fractional quantities use fixed-point.
//! - **Hash iteration order**: registries are `BTreeMap`s, iterated in id
//!   order.
//! - **System randomness**: tie-breaking uses a seeded hash of
//!   `(step, entity id)`, never a global RNG.
//!
//! The harness here hashes the simulated world state so tests can assert
//! that two runs from the same inputs agree exactly.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use agent_core::board::{Board, Step};

/// Hash the simulated world state at `step`: every unit's position, power,
/// and cargo, every factory's stock, and the projected rubble/lichen layers.
#[must_use]
pub fn state_hash(board: &Board, step: Step) -> u64 {
    let i = (step - board.step) as usize;
    let mut hasher = DefaultHasher::new();
    for (id, unit) in &board.units {
        id.hash(&mut hasher);
        unit.pos[i].hash(&mut hasher);
        unit.power[i].hash(&mut hasher);
        unit.ice[i].hash(&mut hasher);
        unit.ore[i].hash(&mut hasher);
        unit.water[i].hash(&mut hasher);
        unit.metal[i].hash(&mut hasher);
    }
    for (id, factory) in &board.factories {
        id.hash(&mut hasher);
        factory.power[i].hash(&mut hasher);
        factory.ice[i].hash(&mut hasher);
        factory.ore[i].hash(&mut hasher);
        factory.water[i].hash(&mut hasher);
        factory.metal[i].hash(&mut hasher);
    }
    for cell in &board.cells {
        cell.rubble[i].hash(&mut hasher);
        cell.lichen[i].hash(&mut hasher);
        cell.lichen_strain[i].hash(&mut hasher);
    }
    hasher.finish()
}

/// Run `build` twice and assert both runs produce the same hash sequence
/// over `steps` simulated turns.
///
/// # Panics
///
/// Panics when the two runs diverge, reporting the first differing step.
pub fn assert_deterministic(steps: u32, mut build: impl FnMut() -> Board) {
    let hashes = |mut board: Board| -> Vec<u64> {
        let mut out = Vec::new();
        for idx in 0..steps {
            let step = board.step + idx;
            agent_core::simulation::simulate_step(&mut board, step, idx as usize);
            out.push(state_hash(&board, step + 1));
        }
        out
    };
    let first = hashes(build());
    let second = hashes(build());
    for (idx, (a, b)) in first.iter().zip(second.iter()).enumerate() {
        assert!(
            a == b,
            "simulation diverged at simulated step {idx}: {a:#x} != {b:#x}"
        );
    }
}
