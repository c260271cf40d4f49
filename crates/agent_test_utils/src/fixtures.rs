//! Observation builders.
//!
//! Scenario tests assemble a small world snapshot cell by cell and hand it
//! to the engine exactly the way the host process would. The builder fills
//! in the team bookkeeping (strains, player keys) that the wire format
//! carries alongside the board layers.

use std::collections::BTreeMap;

use agent_core::board::{Board, Step, Team};
use agent_core::config::AgentConfig;
use agent_core::observation::{
    BoardLayers, CargoObs, FactoryObs, Observation, TeamObs, UnitObs,
};
use agent_core::rules::GameRules;
use agent_core::strategy::Strategy;

/// Builds an [`Observation`] for scenario tests.
#[derive(Debug, Clone)]
pub struct ObservationBuilder {
    size: usize,
    ice: Vec<(i32, i32)>,
    ore: Vec<(i32, i32)>,
    rubble: Vec<(i32, i32, i32)>,
    lichen: Vec<(i32, i32, i32, i32)>,
    factories: Vec<FactoryObs>,
    units: Vec<UnitObs>,
    step: u32,
}

impl ObservationBuilder {
    /// An empty square board of the given side length.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size,
            ice: Vec::new(),
            ore: Vec::new(),
            rubble: Vec::new(),
            lichen: Vec::new(),
            factories: Vec::new(),
            units: Vec::new(),
            step: 0,
        }
    }

    /// Set the real environment step.
    #[must_use]
    pub fn step(mut self, step: u32) -> Self {
        self.step = step;
        self
    }

    /// Place ice at `(x, y)`.
    #[must_use]
    pub fn ice(mut self, x: i32, y: i32) -> Self {
        self.ice.push((x, y));
        self
    }

    /// Place ore at `(x, y)`.
    #[must_use]
    pub fn ore(mut self, x: i32, y: i32) -> Self {
        self.ore.push((x, y));
        self
    }

    /// Set rubble at `(x, y)`.
    #[must_use]
    pub fn rubble(mut self, x: i32, y: i32, amount: i32) -> Self {
        self.rubble.push((x, y, amount));
        self
    }

    /// Set lichen and its strain at `(x, y)`.
    #[must_use]
    pub fn lichen(mut self, x: i32, y: i32, amount: i32, strain: i32) -> Self {
        self.lichen.push((x, y, amount, strain));
        self
    }

    /// Place a factory with the standard starting stock.
    #[must_use]
    pub fn factory(self, team: Team, id: u32, x: i32, y: i32) -> Self {
        self.factory_with(team, id, x, y, 150, 0, 1000)
    }

    /// Place a factory with explicit water, metal, and power.
    #[must_use]
    pub fn factory_with(
        mut self,
        team: Team,
        id: u32,
        x: i32,
        y: i32,
        water: i32,
        metal: i32,
        power: i32,
    ) -> Self {
        self.factories.push(FactoryObs {
            strain_id: id,
            team_id: team,
            pos: [x, y],
            cargo: CargoObs {
                ice: 0,
                ore: 0,
                water,
                metal,
            },
            power,
        });
        self
    }

    /// Place a heavy robot with a full battery and no queue.
    #[must_use]
    pub fn heavy(self, team: Team, id: u32, x: i32, y: i32) -> Self {
        self.unit_with(team, id, true, x, y, 3000, CargoObs::default(), Vec::new())
    }

    /// Place a light robot with a full battery and no queue.
    #[must_use]
    pub fn light(self, team: Team, id: u32, x: i32, y: i32) -> Self {
        self.unit_with(team, id, false, x, y, 150, CargoObs::default(), Vec::new())
    }

    /// Place a robot with explicit power, cargo, and committed queue.
    #[must_use]
    pub fn unit_with(
        mut self,
        team: Team,
        id: u32,
        heavy: bool,
        x: i32,
        y: i32,
        power: i32,
        cargo: CargoObs,
        action_queue: Vec<[i32; 6]>,
    ) -> Self {
        self.units.push(UnitObs {
            unit_id: format!("unit_{id}"),
            team_id: team,
            pos: [x, y],
            unit_type: if heavy { "HEAVY" } else { "LIGHT" }.to_string(),
            cargo,
            power,
            action_queue,
        });
        self
    }

    /// Assemble the observation.
    #[must_use]
    pub fn build(&self) -> Observation {
        let n = self.size;
        let mut layers = BoardLayers {
            ice: vec![vec![0; n]; n],
            ore: vec![vec![0; n]; n],
            rubble: vec![vec![0; n]; n],
            lichen: vec![vec![0; n]; n],
            lichen_strains: vec![vec![-1; n]; n],
            valid_spawns_mask: None,
        };
        for &(x, y) in &self.ice {
            layers.ice[x as usize][y as usize] = 1;
        }
        for &(x, y) in &self.ore {
            layers.ore[x as usize][y as usize] = 1;
        }
        for &(x, y, amount) in &self.rubble {
            layers.rubble[x as usize][y as usize] = amount;
        }
        for &(x, y, amount, strain) in &self.lichen {
            layers.lichen[x as usize][y as usize] = amount;
            layers.lichen_strains[x as usize][y as usize] = strain;
        }

        let mut teams = BTreeMap::new();
        for team in 0..2u8 {
            let strains: Vec<u32> = self
                .factories
                .iter()
                .filter(|f| f.team_id == team)
                .map(|f| f.strain_id)
                .collect();
            teams.insert(
                format!("player_{team}"),
                TeamObs {
                    team_id: team,
                    water: 0,
                    metal: 0,
                    factory_strains: strains,
                    place_first: team == 0,
                },
            );
        }

        let mut factories: BTreeMap<String, BTreeMap<String, FactoryObs>> = BTreeMap::new();
        for f in &self.factories {
            factories
                .entry(format!("player_{}", f.team_id))
                .or_default()
                .insert(format!("factory_{}", f.strain_id), f.clone());
        }
        let mut units: BTreeMap<String, BTreeMap<String, UnitObs>> = BTreeMap::new();
        for u in &self.units {
            units
                .entry(format!("player_{}", u.team_id))
                .or_default()
                .insert(u.unit_id.clone(), u.clone());
        }

        Observation {
            board: layers,
            teams,
            factories,
            units,
            real_env_steps: self.step as i32,
        }
    }

    /// Assemble the observation and construct the board for `my_team`, using
    /// a short look-ahead suitable for tests.
    ///
    /// # Panics
    ///
    /// Panics if the observation is malformed; test fixtures are expected to
    /// be well-formed.
    #[must_use]
    pub fn board(&self, my_team: Team, strategy: Strategy) -> Board {
        self.board_with_config(my_team, strategy, test_config())
    }

    /// Like [`ObservationBuilder::board`] with an explicit config.
    ///
    /// # Panics
    ///
    /// Panics if the observation is malformed.
    #[must_use]
    pub fn board_with_config(&self, my_team: Team, strategy: Strategy, config: AgentConfig) -> Board {
        let obs = self.build();
        Board::from_observation(
            &obs,
            my_team,
            self.step as Step,
            GameRules::default(),
            config,
            strategy,
            false,
        )
        .expect("test observation is well-formed")
    }
}

/// The engine config used by scenario tests: a short look-ahead keeps the
/// simulated horizon cheap while still exercising multi-turn behavior.
#[must_use]
pub fn test_config() -> AgentConfig {
    AgentConfig {
        lookahead: 12,
        ..AgentConfig::default()
    }
}
