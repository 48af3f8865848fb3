//! Battle trace recording
//!
//! The trace is a transcript of the backend session: every command the
//! engine issues, the output worth keeping, and one header per round. It
//! contains nothing that varies between two runs of the same battle against
//! a deterministic backend.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Prompt prefixed to every command and comment line
pub const PROMPT: &str = "[0x00000000]> ";

const SEPARATOR: &str =
    "########################################################################";

/// Summary of a single round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round index, from 0
    pub round: u64,
    /// Index of the bot that stepped
    pub bot: usize,
    /// Name of the bot that stepped
    pub bot_name: String,
    /// Program counter before the step
    pub pc: String,
    /// Architecture the backend was switched to
    pub arch: String,
    /// Bit width the backend was switched to
    pub bits: u32,
    /// Memory window at the bot's base address after the step
    pub memory: String,
}

/// Append-only transcript of one battle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceLog {
    text: String,
    rounds: Vec<RoundRecord>,
}

impl TraceLog {
    /// Create an empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `# comment` line
    pub fn comment(&mut self, message: impl AsRef<str>) {
        let _ = writeln!(self.text, "{}# {}", PROMPT, message.as_ref());
    }

    /// Record a command whose output is not kept
    pub fn command(&mut self, command: impl AsRef<str>) {
        let _ = writeln!(self.text, "{}{}", PROMPT, command.as_ref());
    }

    /// Record a command followed by its output
    pub fn command_output(&mut self, command: impl AsRef<str>, output: &str) {
        self.command(command);
        let output = output.trim_end();
        if !output.is_empty() {
            self.text.push_str(output);
            self.text.push('\n');
        }
    }

    /// Open a new round: separator plus header line
    pub fn begin_round(&mut self, round: u64, bot: usize, bot_name: &str, pc: &str, arch: &str, bits: u32) {
        self.command(SEPARATOR);
        self.comment(format!(
            "ROUND {}, BOT {} ({}), PC={}, arch={}, bits={}",
            round, bot, bot_name, pc, arch, bits
        ));
    }

    /// Close a round with its summary
    pub fn end_round(&mut self, record: RoundRecord) {
        self.rounds.push(record);
    }

    /// Completed rounds in order
    pub fn rounds(&self) -> &[RoundRecord] {
        &self.rounds
    }

    /// Number of completed rounds
    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    /// The transcript so far
    pub fn text(&self) -> &str {
        &self.text
    }
}
