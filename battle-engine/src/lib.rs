//! Battle Engine - Turn-based execution of competing bots
//!
//! This crate connects bot assembly, arena placement, register multiplexing
//! and termination detection into a single round scheduler that drives one
//! radare2 backend session per battle.
//!
//! # Overview
//!
//! A battle runs in two phases:
//!
//! * Setup: every bot is assembled, written into the shared arena at
//!   `stride * (i + 1)`, and given an initial register snapshot. The four
//!   fatal-event hooks are armed onto one flag.
//! * Rounds: bot `round % N` gets its architecture and registers swapped
//!   into the backend, executes exactly one instruction, and has its
//!   registers saved again. The first bot to raise the flag ends the battle.
//!
//! Every command and round is recorded in a [`TraceLog`].
//!
//! # Usage
//!
//! ```no_run
//! use battle_engine::{run_battle, BattleConfig, BotSpec, CancelToken, EngineConfig};
//! use r2_backend::{PipeOptions, R2Opener};
//!
//! let battle = BattleConfig {
//!     arena_size: 4096,
//!     max_rounds: 100,
//!     bots: vec![
//!         BotSpec::new(1, "looper", "jmp $", "x86", 32),
//!         BotSpec::new(2, "trapper", "nop\nint3", "x86", 32),
//!     ],
//! };
//!
//! let opener = R2Opener::new(PipeOptions::default());
//! match run_battle(&opener, &battle, &EngineConfig::default(), &CancelToken::new()) {
//!     Ok(report) => println!("{}", report.outcome),
//!     Err(failure) => eprintln!("battle failed: {}", failure),
//! }
//! ```

pub mod arena;
pub mod assembler;
pub mod config;
pub mod error;
pub mod monitor;
pub mod registers;
pub mod scheduler;
pub mod trace;

pub use arena::{ArenaLayout, Placement};
pub use assembler::{assemble, normalize_source, preview, BotPreview};
pub use config::{BattleConfig, BotSpec, EngineConfig};
pub use error::{ConfigError, RunError, RunFailure};
pub use monitor::{EndConditionMonitor, FatalHook, TerminationStatus};
pub use registers::RegisterSnapshot;
pub use scheduler::{
    run_battle, AmbiguousTermination, BattleReport, BotRuntime, CancelToken, Outcome,
    SchedulerState,
};
pub use trace::{RoundRecord, TraceLog};

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, RunError>;
