//! Host process around the decision engine.
//!
//! Speaks the match harness protocol: one JSON request per line on stdin,
//! one JSON response per line on stdout, logs on stderr. Each action-phase
//! request builds a fresh board snapshot, restores the strategy cache, runs
//! the time-boxed look-ahead, and emits the changed action queues.
//!
//! # Usage
//!
//! ```bash
//! # Run against the match harness
//! cargo run -p agent_runner --release
//!
//! # With a tuned engine config and an on-disk cache blob
//! cargo run -p agent_runner --release -- --config agent.ron --cache /tmp/agent.bin
//! ```

mod protocol;
mod setup;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agent_core::board::{Board, Team};
use agent_core::config::AgentConfig;
use agent_core::rules::GameRules;
use agent_core::simulation::{run_turn, TimeBudget};
use agent_core::strategy::Strategy;

use protocol::TurnInput;

#[derive(Parser)]
#[command(name = "agent_runner")]
#[command(about = "Forward-simulation strategy agent, harness protocol on stdin/stdout")]
#[command(version)]
struct Cli {
    /// Engine configuration file (RON); defaults are compiled in.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Persist the strategy cache blob here between invocations.
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Enable verbose logging to stderr.
    #[arg(short, long)]
    verbose: bool,
}

/// Per-process agent state carried between request lines.
struct AgentState {
    config: AgentConfig,
    rules: GameRules,
    strategy: Strategy,
    factories_per_team: Option<u32>,
    cache_path: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    // Logging goes to stderr; stdout carries the protocol.
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    let config = match &cli.config {
        Some(path) => match std::fs::read_to_string(path).map_err(|e| e.to_string()).and_then(
            |text| AgentConfig::from_ron(&text).map_err(|e| e.to_string()),
        ) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!(path = %path.display(), error = %e, "bad config, using defaults");
                AgentConfig::default()
            }
        },
        None => AgentConfig::default(),
    };

    let strategy = cli
        .cache
        .as_ref()
        .and_then(|path| std::fs::read(path).ok())
        .and_then(|blob| match Strategy::from_blob(&blob) {
            Ok(s) => {
                info!("strategy cache restored from disk");
                Some(s)
            }
            Err(e) => {
                warn!(error = %e, "discarding unreadable strategy cache");
                None
            }
        })
        .unwrap_or_default();

    let mut state = AgentState {
        config,
        rules: GameRules::default(),
        strategy,
        factories_per_team: None,
        cache_path: cli.cache,
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<TurnInput>(&line) {
            Ok(input) => handle(&mut state, &input),
            Err(e) => {
                error!(error = %e, "malformed request line");
                "{}".to_string()
            }
        };
        writeln!(stdout, "{response}").ok();
        stdout.flush().ok();
    }
}

fn handle(state: &mut AgentState, input: &TurnInput) -> String {
    if let Some(info) = &input.info {
        state.rules = info.env_cfg.to_rules();
    }

    let value = if input.obs.real_env_steps < 0 {
        setup::early_setup(input)
    } else {
        act(state, input)
    };
    serde_json::to_string(&value).unwrap_or_else(|e| {
        error!(error = %e, "response serialization failed");
        "{}".to_string()
    })
}

/// One action-phase turn: snapshot, look-ahead, harvest, cache writeback.
fn act(state: &mut AgentState, input: &TurnInput) -> serde_json::Value {
    let my_team: Team = if input.player.ends_with('1') { 1 } else { 0 };
    let factories_per_team = *state.factories_per_team.get_or_insert_with(|| {
        input
            .obs
            .factories
            .get(&input.player)
            .map_or(1, |m| m.len().max(1) as u32)
    });
    // The host's step still counts the placement turns; the engine works in
    // action-phase steps. This offset compensates for the host's indexing
    // and applies only here, never during setup.
    let step = input.step.saturating_sub(2 * factories_per_team + 1);

    let strategy = std::mem::take(&mut state.strategy);
    let mut board = match Board::from_observation(
        &input.obs,
        my_team,
        step,
        state.rules.clone(),
        state.config.clone(),
        strategy,
        false,
    ) {
        Ok(b) => b,
        Err(e) => {
            error!(step, error = %e, "snapshot rejected");
            return serde_json::json!({});
        }
    };

    let overage_ms = (input.remaining_overage_time.max(0.0) * 1000.0) as u64;
    let budget = TimeBudget::start(&state.config, step, overage_ms);
    let actions = run_turn(&mut board, &budget);
    if tracing::enabled!(tracing::Level::DEBUG) {
        tracing::debug!("board at step {step}:\n{}", board.to_ascii(step));
    }
    state.strategy = std::mem::take(&mut board.strategy);

    if let Some(path) = &state.cache_path {
        match state.strategy.to_blob() {
            Ok(blob) => {
                if let Err(e) = std::fs::write(path, blob) {
                    warn!(path = %path.display(), error = %e, "cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "cache encode failed"),
        }
    }

    serde_json::to_value(&actions).unwrap_or_else(|e| {
        error!(error = %e, "action map serialization failed");
        serde_json::json!({})
    })
}
