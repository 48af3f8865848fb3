//! Battle and engine configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default distance between two bots' base addresses, in bytes
pub const DEFAULT_STRIDE: u64 = 50;

/// Default size of the per-round memory dump, in bytes
pub const DEFAULT_DUMP_WINDOW: u64 = 100;

/// One participant as handed over by the bot store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotSpec {
    /// Persistent bot id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Assembly source, one statement per line
    pub source: String,
    /// Target architecture (`x86`, `arm`, ...)
    pub arch: String,
    /// Target bit width
    pub bits: u32,
}

impl BotSpec {
    /// Create a bot description
    pub fn new(
        id: u64,
        name: impl Into<String>,
        source: impl Into<String>,
        arch: impl Into<String>,
        bits: u32,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            source: source.into(),
            arch: arch.into(),
            bits,
        }
    }
}

/// Everything a single battle run needs, fixed once the run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleConfig {
    /// Size of the shared arena in bytes
    pub arena_size: u64,
    /// Upper bound on the number of rounds
    pub max_rounds: u64,
    /// Participants in turn order
    pub bots: Vec<BotSpec>,
}

impl BattleConfig {
    /// Check the parts of the battle that do not depend on assembled code
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena_size == 0 {
            return Err(ConfigError::EmptyArena);
        }
        if self.bots.is_empty() {
            return Err(ConfigError::NoBots);
        }
        Ok(())
    }

    /// Parse a battle from JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Knobs of the engine itself, shared by every battle it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Distance between consecutive bot base addresses
    pub stride: u64,
    /// Bytes of arena printed into the trace after each round
    pub dump_window: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stride: DEFAULT_STRIDE,
            dump_window: DEFAULT_DUMP_WINDOW,
        }
    }
}
