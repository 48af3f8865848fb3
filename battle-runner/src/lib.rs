//! Battle Runner - Loads battles, runs them, and stores their traces
//!
//! This crate is the collaborator side of the engine: it fetches a battle
//! from a [`BattleStore`], checks that every bot is admitted, runs the
//! engine on a fresh backend, and persists the trace once the battle has an
//! outcome. A failed run leaves the previously stored trace untouched.

pub mod eligibility;
pub mod store;

pub use eligibility::ArchBitMismatch;
pub use store::{BattleStore, FileStore, StoredBattle};

use battle_engine::{BattleReport, BotPreview, CancelToken, EngineConfig, RunError, RunFailure};
use r2_backend::{Opener, Session, Target};
use rayon::prelude::*;
use std::collections::HashSet;
use thiserror::Error;

/// Why a battle could not be run
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("could not load battle {battle}: {source:#}")]
    LoadBattle {
        battle: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not store the trace of battle {battle}: {source:#}")]
    SaveTrace {
        battle: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    ArchBitMismatch(#[from] ArchBitMismatch),

    #[error("battle run failed: {0}")]
    Run(#[from] RunFailure),

    #[error("battle {battle} has no bot with id {bot}")]
    UnknownBot { battle: u64, bot: u64 },

    #[error("bot preview failed: {0}")]
    Preview(#[from] RunError),
}

impl RunnerError {
    /// Short reason suitable for showing next to the battle
    pub fn reason(&self) -> String {
        match self {
            RunnerError::LoadBattle { .. } => "Couldn't get the battle with the given id".to_string(),
            RunnerError::SaveTrace { .. } => "Couldn't store the battle log".to_string(),
            RunnerError::ArchBitMismatch(e) => e.to_string(),
            RunnerError::Run(failure) => failure.error.reason().to_string(),
            RunnerError::UnknownBot { .. } => "Invalid bot supplied".to_string(),
            RunnerError::Preview(e) => e.reason().to_string(),
        }
    }
}

/// Run one stored battle and persist its trace
pub fn run_battle<S, O>(
    store: &S,
    opener: &O,
    battle_id: u64,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> Result<BattleReport, RunnerError>
where
    S: BattleStore,
    O: Opener,
{
    tracing::info!("Running battle {}", battle_id);
    let battle = load(store, battle_id)?;
    eligibility::check(&battle)?;

    let report = battle_engine::run_battle(opener, &battle.config, config, cancel)?;
    store
        .save_trace(battle_id, report.trace.text())
        .map_err(|source| RunnerError::SaveTrace {
            battle: battle_id,
            source,
        })?;

    tracing::info!("Battle {} ({}): {}", battle_id, battle.name, report.outcome);
    Ok(report)
}

/// Run independent battles in parallel, each on its own backend
///
/// A battle id given more than once is run once; results follow the order of
/// first appearance.
pub fn run_battles<S, O>(
    store: &S,
    opener: &O,
    battle_ids: &[u64],
    config: &EngineConfig,
    cancel: &CancelToken,
) -> Vec<(u64, Result<BattleReport, RunnerError>)>
where
    S: BattleStore,
    O: Opener,
{
    let mut seen = HashSet::new();
    let unique: Vec<u64> = battle_ids.iter().copied().filter(|id| seen.insert(*id)).collect();

    unique
        .par_iter()
        .map(|&id| (id, run_battle(store, opener, id, config, cancel)))
        .collect()
}

/// Assemble and disassemble one bot of a stored battle
pub fn preview_bot<S, O>(store: &S, opener: &O, battle_id: u64, bot_id: u64) -> Result<BotPreview, RunnerError>
where
    S: BattleStore,
    O: Opener,
{
    let battle = load(store, battle_id)?;
    let bot = battle
        .config
        .bots
        .iter()
        .find(|bot| bot.id == bot_id)
        .ok_or(RunnerError::UnknownBot {
            battle: battle_id,
            bot: bot_id,
        })?;

    let backend = opener.open(&Target::Empty).map_err(RunError::from)?;
    let mut session = Session::new(backend);
    Ok(battle_engine::preview(&mut session, bot)?)
}

fn load<S: BattleStore>(store: &S, battle_id: u64) -> Result<StoredBattle, RunnerError> {
    store
        .load_battle(battle_id)
        .map_err(|source| RunnerError::LoadBattle {
            battle: battle_id,
            source,
        })
}
