//! # Agent Core
//!
//! Deterministic forward-simulation decision engine for an autonomous agent
//! playing a simultaneous-turn, grid-based resource/combat strategy game.
//!
//! Each real turn the engine receives a world snapshot, forward-simulates as
//! many future turns as its wall-clock allowance permits, assigns every
//! controllable entity a role (units) or mode (factories), resolves actions
//! in a fixed per-turn phase order, and emits new action queues for exactly
//! the entities whose plans changed.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO (the runner crate owns stdin/stdout and the cache blob)
//! - No system randomness (tie-breaking uses a seeded hash of `(step, id)`)
//! - No floating-point math (fractional scores use fixed-point)
//!
//! ## Crate Structure
//!
//! - [`board`] - world snapshot, registries, flood fill, region labelling
//! - [`pathfinding`] - incremental best-first search and the greedy estimator
//! - [`unit`] / [`factory`] - entity state and action primitives
//! - [`roles`] - the per-unit behavior state machines
//! - [`modes`] - the per-factory strategy state machines
//! - [`simulation`] - the per-turn driver and look-ahead loop
//! - [`strategy`] - the cross-invocation persistent cache

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod actions;
pub mod board;
pub mod cell;
pub mod config;
pub mod error;
pub mod factory;
pub mod math;
pub mod modes;
pub mod observation;
pub mod pathfinding;
pub mod player;
pub mod rng;
pub mod roles;
pub mod rules;
pub mod simulation;
pub mod strategy;
pub mod unit;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::actions::{ActionKind, Direction, FactoryAction, Resource, UnitAction};
    pub use crate::board::{Board, CellId, FactoryId, Step, Team, UnitId};
    pub use crate::config::AgentConfig;
    pub use crate::error::{EngineError, Result};
    pub use crate::math::Fixed;
    pub use crate::observation::{ActionMap, Observation};
    pub use crate::rules::{GameRules, RobotClass, RobotClassSpec};
    pub use crate::simulation::{run_turn, TimeBudget};
    pub use crate::strategy::Strategy;
}
