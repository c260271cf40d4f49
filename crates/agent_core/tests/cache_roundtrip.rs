//! Persistence round-trip: what one invocation saves, the next restores,
//! and references to vanished entities are pruned rather than stale-read.

use agent_core::roles::Role;
use agent_core::simulation::simulate_step;
use agent_core::strategy::Strategy;
use agent_test_utils::fixtures::ObservationBuilder;

fn world() -> ObservationBuilder {
    ObservationBuilder::new(24)
        .factory(0, 0, 4, 4)
        .factory(1, 1, 19, 19)
        .ice(6, 4)
        .ice(21, 19)
        .heavy(0, 1, 5, 4)
        .light(0, 2, 4, 5)
}

#[test]
fn test_turn_state_round_trips_through_the_blob() {
    let mut board = world().board(0, Strategy::default());
    simulate_step(&mut board, 0, 0);

    let strategy = std::mem::take(&mut board.strategy);
    let blob = strategy.to_blob().unwrap();
    let restored = Strategy::from_blob(&blob).unwrap();

    assert!(restored.modes.contains_key(&0));
    assert!(restored.roles.contains_key(&1));
    assert!(restored.roles.contains_key(&2));
    assert!(restored.unit_stats.contains_key(&1));
    // Static geometry went along for the ride.
    assert!(restored.cell_caches.values().any(|c| c.region_saved));
    assert!(!restored.factory_caches.is_empty());
}

#[test]
fn test_restored_roles_rebind_to_live_units() {
    let mut board = world().board(0, Strategy::default());
    simulate_step(&mut board, 0, 0);
    let strategy = std::mem::take(&mut board.strategy);

    let next = world().step(1).board(0, strategy);
    assert!(next.unit(1).role.is_some());
    let kind = next.unit(1).role.as_ref().map(Role::kind_name);
    assert_eq!(
        next.strategy.roles.get(&1).map(Role::kind_name),
        kind,
        "restored role must match the persisted one"
    );
}

#[test]
fn test_dead_unit_is_detected_and_pruned() {
    let mut board = world().board(0, Strategy::default());
    simulate_step(&mut board, 0, 0);
    let strategy = std::mem::take(&mut board.strategy);
    assert!(strategy.roles.contains_key(&2));

    // Unit 2 does not survive to the next snapshot.
    let survivor_world = ObservationBuilder::new(24)
        .step(1)
        .factory(0, 0, 4, 4)
        .factory(1, 1, 19, 19)
        .ice(6, 4)
        .ice(21, 19)
        .heavy(0, 1, 5, 4);
    let next = survivor_world.board(0, strategy);

    assert!(next.strategy.dead_units.contains(&2));
    assert!(!next.strategy.roles.contains_key(&2));
    assert!(!next.strategy.routes.contains_key(&2));
    assert!(!next.strategy.unit_assigned_factories.contains_key(&2));
}

#[test]
fn test_dead_factory_is_detected_and_pruned() {
    let two_factories = ObservationBuilder::new(24)
        .factory(0, 0, 4, 4)
        .factory(0, 2, 10, 10)
        .factory(1, 1, 19, 19)
        .ice(6, 4)
        .ice(12, 10)
        .ice(21, 19)
        .heavy(0, 1, 5, 4);
    let mut board = two_factories.board(0, Strategy::default());
    simulate_step(&mut board, 0, 0);
    let strategy = std::mem::take(&mut board.strategy);
    assert!(strategy.modes.contains_key(&0));
    assert!(strategy.modes.contains_key(&2));

    // Factory 0 exploded and took its heavy with it.
    let after = ObservationBuilder::new(24)
        .step(1)
        .factory(0, 2, 10, 10)
        .factory(1, 1, 19, 19)
        .ice(6, 4)
        .ice(12, 10)
        .ice(21, 19);
    let next = after.board(0, strategy);

    assert!(next.strategy.dead_factories.contains(&0));
    assert!(!next.strategy.modes.contains_key(&0));
    assert!(next.strategy.modes.contains_key(&2));
    assert!(next
        .strategy
        .resource_assigned_factories
        .values()
        .all(|&f| f != 0));
}
