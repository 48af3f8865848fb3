//! Round scheduler
//!
//! Drives one battle from setup to outcome:
//!
//! ```text
//! Init -> Running { round } -> TerminatedByBot { bot, round }
//!                           -> TerminatedMaxRounds
//! ```
//!
//! Each round hands the backend's single execution context to bot
//! `round % N`: switch architecture, restore its registers, step once, save
//! its registers, record the round, then read the end flag.

use crate::arena::{self, ArenaLayout};
use crate::assembler;
use crate::config::{BattleConfig, BotSpec, EngineConfig};
use crate::error::{RunError, RunFailure};
use crate::monitor::{EndConditionMonitor, TerminationStatus};
use crate::registers::{self, RegisterSnapshot};
use crate::trace::{RoundRecord, TraceLog};
use crate::Result;
use r2_backend::{Backend, BackendError, Command, Opener, Session, Target};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation switch, checked at the top of every round
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every run holding a clone of this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a battle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `bot` raised the end flag during `round`
    TerminatedByBot { bot: usize, round: u64 },
    /// Every round was played and nobody died: a draw
    MaxRoundsReached { rounds: u64 },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::TerminatedByBot { bot, round } => {
                write!(f, "bot {} terminated in round {}", bot, round)
            }
            Outcome::MaxRoundsReached { rounds } => {
                write!(f, "draw after {} rounds", rounds)
            }
        }
    }
}

/// Scheduler state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Bots placed, snapshots taken, end flag cleared
    Init,
    /// Currently playing `round`
    Running { round: u64 },
    /// A bot raised the end flag
    TerminatedByBot { bot: usize, round: u64 },
    /// The round limit was reached
    TerminatedMaxRounds,
}

/// The end flag held a value none of the hooks write
///
/// Logged and kept in the report, but the battle goes on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmbiguousTermination {
    pub round: u64,
    pub bot: usize,
    pub value: String,
}

/// Per-bot state for the duration of one run
#[derive(Debug, Clone)]
pub struct BotRuntime {
    pub index: usize,
    pub id: u64,
    pub name: String,
    pub arch: String,
    pub bits: u32,
    pub bytecode: Vec<u8>,
    pub base_address: u64,
    pub snapshot: RegisterSnapshot,
}

/// Result of a completed battle
#[derive(Debug, Clone)]
pub struct BattleReport {
    pub outcome: Outcome,
    pub trace: TraceLog,
    pub warnings: Vec<AmbiguousTermination>,
}

/// Owns the session, the arena and every bot for one battle
pub struct RoundScheduler<B: Backend> {
    session: Session<B>,
    bots: Vec<BotRuntime>,
    monitor: EndConditionMonitor,
    dump_window: u64,
    state: SchedulerState,
    warnings: Vec<AmbiguousTermination>,
}

impl<B: Backend> RoundScheduler<B> {
    /// Assemble, place and snapshot every bot, then arm the end conditions
    pub fn setup(
        mut session: Session<B>,
        battle: &BattleConfig,
        config: &EngineConfig,
        trace: &mut TraceLog,
    ) -> Result<Self> {
        trace.comment("Assembling the bots");
        let mut bytecodes = Vec::with_capacity(battle.bots.len());
        for (index, bot) in battle.bots.iter().enumerate() {
            bytecodes.push(assembler::assemble(&mut session, index, bot, trace)?);
        }

        let lengths: Vec<usize> = bytecodes.iter().map(Vec::len).collect();
        let layout = ArenaLayout::plan(battle.arena_size, config.stride, &lengths)?;

        let placed: Vec<(&BotSpec, &[u8])> = battle
            .bots
            .iter()
            .zip(bytecodes.iter().map(Vec::as_slice))
            .collect();
        let snapshots = arena::load(&mut session, &layout, &placed, trace)?;

        let bots: Vec<BotRuntime> = battle
            .bots
            .iter()
            .zip(bytecodes)
            .zip(layout.placements())
            .zip(snapshots)
            .enumerate()
            .map(|(index, (((spec, bytecode), placement), snapshot))| BotRuntime {
                index,
                id: spec.id,
                name: spec.name.clone(),
                arch: spec.arch.clone(),
                bits: spec.bits,
                bytecode,
                base_address: placement.base,
                snapshot,
            })
            .collect();

        for bot in &bots {
            let memory = session.dump_memory(config.dump_window, bot.base_address)?;
            trace.command_output(
                Command::DumpMemory { len: config.dump_window, address: bot.base_address }.to_string(),
                &memory,
            );
        }

        let monitor = EndConditionMonitor::arm(&mut session, trace)?;

        Ok(Self {
            session,
            bots,
            monitor,
            dump_window: config.dump_window,
            state: SchedulerState::Init,
            warnings: Vec::new(),
        })
    }

    /// Current state
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Bots in turn order
    pub fn bots(&self) -> &[BotRuntime] {
        &self.bots
    }

    /// Ambiguous end-flag readings seen so far
    pub fn warnings(&self) -> &[AmbiguousTermination] {
        &self.warnings
    }

    /// Play rounds until a bot dies, the limit is hit, or `cancel` fires
    pub fn run(&mut self, max_rounds: u64, cancel: &CancelToken, trace: &mut TraceLog) -> Result<Outcome> {
        for round in 0..max_rounds {
            if cancel.is_cancelled() {
                tracing::warn!("Battle cancelled before round {}", round);
                return Err(RunError::Cancelled { round });
            }
            if let Some(outcome) = self.play_round(round, trace)? {
                return Ok(outcome);
            }
        }

        self.state = SchedulerState::TerminatedMaxRounds;
        tracing::info!("No bot died within {} rounds", max_rounds);
        Ok(Outcome::MaxRoundsReached { rounds: max_rounds })
    }

    /// Play a single round; `Some` when it ended the battle
    pub fn play_round(&mut self, round: u64, trace: &mut TraceLog) -> Result<Option<Outcome>> {
        let index = (round % self.bots.len() as u64) as usize;
        self.state = SchedulerState::Running { round };

        let bot = &self.bots[index];
        let bits = bot.bits.to_string();
        self.session.set_config("asm.arch", &bot.arch)?;
        self.session.set_config("asm.bits", &bits)?;
        let restore = registers::restore(&mut self.session, &bot.snapshot)?;
        let pc = self.session.program_counter()?;

        trace.begin_round(round, index, &bot.name, &pc, &bot.arch, bot.bits);
        trace.comment("setting the architecture accordingly");
        trace.command(Command::SetConfig { key: "asm.arch", value: &bot.arch }.to_string());
        trace.command(Command::SetConfig { key: "asm.bits", value: &bits }.to_string());
        trace.comment("Loading the registers");
        trace.command(restore);

        trace.comment("Stepping");
        trace.command(Command::Step.to_string());
        self.session.step()?;

        trace.comment("Storing the registers");
        trace.command(Command::ReadAllRegisters.to_string());
        let snapshot = registers::save(&mut self.session)?;

        let base = bot.base_address;
        let record = RoundRecord {
            round,
            bot: index,
            bot_name: bot.name.clone(),
            pc,
            arch: bot.arch.clone(),
            bits: bot.bits,
            memory: String::new(),
        };
        self.bots[index].snapshot = snapshot;

        trace.comment("Printing the arena");
        let memory = self.session.dump_memory(self.dump_window, base)?;
        trace.command_output(
            Command::DumpMemory { len: self.dump_window, address: base }.to_string(),
            &memory,
        );
        trace.end_round(RoundRecord { memory, ..record });

        match self.monitor.check(&mut self.session, trace)? {
            TerminationStatus::Clear => Ok(None),
            TerminationStatus::Raised => {
                tracing::warn!("Bot {} ({}) has died in round {}", index, self.bots[index].name, round);
                self.state = SchedulerState::TerminatedByBot { bot: index, round };
                Ok(Some(Outcome::TerminatedByBot { bot: index, round }))
            }
            TerminationStatus::Unexpected(value) => {
                tracing::warn!(
                    "Got invalid end flag '{}' for bot {} in round {}, continuing",
                    value,
                    index,
                    round
                );
                trace.comment(format!("unexpected end flag value '{}', continuing", value));
                self.warnings.push(AmbiguousTermination { round, bot: index, value });
                Ok(None)
            }
        }
    }
}

/// Run one battle on a fresh backend from `opener`
///
/// The backend is released before this returns, whatever the outcome. On
/// failure the trace gathered up to that point comes back with the error.
pub fn run_battle<O: Opener>(
    opener: &O,
    battle: &BattleConfig,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> std::result::Result<BattleReport, RunFailure> {
    let mut trace = TraceLog::new();
    match execute(opener, battle, config, cancel, &mut trace) {
        Ok((outcome, warnings)) => {
            tracing::info!("Battle finished: {}", outcome);
            Ok(BattleReport {
                outcome,
                trace,
                warnings,
            })
        }
        Err(error) => {
            tracing::warn!("Battle failed: {}", error);
            Err(RunFailure { error, trace })
        }
    }
}

fn execute<O: Opener>(
    opener: &O,
    battle: &BattleConfig,
    config: &EngineConfig,
    cancel: &CancelToken,
    trace: &mut TraceLog,
) -> Result<(Outcome, Vec<AmbiguousTermination>)> {
    battle.validate()?;
    tracing::info!(
        "Starting battle: {} bots, {} byte arena, {} rounds max",
        battle.bots.len(),
        battle.arena_size,
        battle.max_rounds
    );

    let size = battle.arena_size;
    let backend = opener.open(&Target::Arena(size)).map_err(|e| match e {
        BackendError::Open { reason, .. } => RunError::ArenaAllocation { size, reason },
        other => RunError::Backend(other),
    })?;
    let mut session = Session::new(backend);

    match session.arena_size()? {
        Some(actual) if actual == size => {}
        other => {
            return Err(RunError::ArenaAllocation {
                size,
                reason: format!("backend reports an arena of {:?} bytes", other),
            })
        }
    }

    let overview = session.dump_memory(size, 0)?;
    trace.command_output(Command::DumpMemory { len: size, address: 0 }.to_string(), &overview);

    let mut scheduler = RoundScheduler::setup(session, battle, config, trace)?;
    let outcome = scheduler.run(battle.max_rounds, cancel, trace)?;
    Ok((outcome, scheduler.warnings))
}
