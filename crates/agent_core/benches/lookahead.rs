//! Look-ahead throughput: simulated turns per second on a small active
//! world. The per-turn wall-clock allowance budgets directly against this.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use agent_core::board::Board;
use agent_core::simulation::simulate_step;
use agent_core::strategy::Strategy;
use agent_test_utils::fixtures::ObservationBuilder;

fn active_world() -> Board {
    ObservationBuilder::new(48)
        .factory(0, 0, 6, 6)
        .factory(0, 2, 40, 8)
        .factory(1, 1, 40, 40)
        .ice(8, 6)
        .ice(42, 8)
        .ice(42, 40)
        .ore(6, 9)
        .heavy(0, 1, 7, 6)
        .heavy(0, 2, 41, 8)
        .light(0, 3, 6, 7)
        .light(0, 4, 40, 9)
        .heavy(1, 10, 41, 40)
        .light(1, 11, 40, 41)
        .board(0, Strategy::default())
}

fn bench_lookahead(c: &mut Criterion) {
    c.bench_function("simulate_8_steps_48x48", |b| {
        b.iter_batched(
            active_world,
            |mut board| {
                for idx in 0..8u32 {
                    simulate_step(&mut board, idx, idx as usize);
                }
                board
            },
            BatchSize::SmallInput,
        );
    });

    c.bench_function("snapshot_build_48x48", |b| {
        b.iter(active_world);
    });
}

criterion_group!(benches, bench_lookahead);
criterion_main!(benches);
