//! Engine error taxonomy

use crate::trace::TraceLog;
use r2_backend::BackendError;
use thiserror::Error;

/// A battle that cannot be run as configured
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("arena size must be greater than zero")]
    EmptyArena,

    #[error("battle has no participating bots")]
    NoBots,

    #[error("stride must be greater than zero")]
    ZeroStride,

    #[error("bot {bot} assembles to {len} bytes, more than the {stride}-byte stride")]
    BytecodeExceedsStride { bot: usize, len: usize, stride: u64 },

    #[error("bot {bot} at 0x{base:x}..0x{end:x} does not fit in a {arena_size}-byte arena")]
    OutsideArena {
        bot: usize,
        base: u64,
        end: u64,
        arena_size: u64,
    },
}

/// Why a battle run stopped before reaching an outcome
#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid battle configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("bot {bot} ({name}) does not assemble for {arch}/{bits}: {reason}")]
    Assembly {
        bot: usize,
        name: String,
        arch: String,
        bits: u32,
        reason: String,
    },

    #[error("arena of {size} bytes could not be allocated: {reason}")]
    ArenaAllocation { size: u64, reason: String },

    #[error("backend communication failed: {0}")]
    Backend(#[from] BackendError),

    #[error("run cancelled before round {round}")]
    Cancelled { round: u64 },
}

impl RunError {
    /// Short, user-facing reason
    pub fn reason(&self) -> &'static str {
        match self {
            RunError::Config(_) => "invalid battle configuration",
            RunError::Assembly { .. } => "err building bot",
            RunError::ArenaAllocation { .. } => "could not allocate the arena",
            RunError::Backend(_) => "backend failure",
            RunError::Cancelled { .. } => "cancelled",
        }
    }
}

/// A failed run together with whatever trace it produced
#[derive(Debug, Error)]
#[error("{error}")]
pub struct RunFailure {
    #[source]
    pub error: RunError,
    pub trace: TraceLog,
}
