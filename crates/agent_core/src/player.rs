//! Per-team view of the match.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::board::{CellId, Team};

/// One team's aggregate state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerState {
    /// Team id (0 or 1).
    pub id: Team,
    /// Unplaced water (placement phase only).
    pub water: i32,
    /// Unplaced metal (placement phase only).
    pub metal: i32,
    /// Lichen strain ids owned by this team's factories.
    pub strains: BTreeSet<u32>,
    /// Lichen cells of this team that are cut off from their factory and
    /// decaying; recomputed each simulated turn.
    pub lichen_disconnected_cells: Vec<CellId>,
}

impl PlayerState {
    /// Create a team view.
    #[must_use]
    pub fn new(id: Team, water: i32, metal: i32, strains: impl IntoIterator<Item = u32>) -> Self {
        Self {
            id,
            water,
            metal,
            strains: strains.into_iter().collect(),
            lichen_disconnected_cells: Vec::new(),
        }
    }

    /// Whether the given strain id belongs to this team.
    #[must_use]
    pub fn owns_strain(&self, strain: i32) -> bool {
        strain >= 0 && self.strains.contains(&(strain as u32))
    }
}
