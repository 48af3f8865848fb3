//! End-condition monitor
//!
//! Four independent esil events are wired onto one flag. The flag tells
//! whether a bot died, not why.

use crate::trace::TraceLog;
use r2_backend::{Backend, Command, Result, Session};
use std::fmt;

/// Flag variable every fatal hook writes to
pub const END_FLAG: &str = "theend";

/// Fatal emulator events that end a battle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalHook {
    /// Instruction the emulator cannot execute
    Unimplemented,
    /// Trap instruction
    Trap,
    /// Software interrupt
    Interrupt,
    /// Memory access outside the arena
    IoError,
}

impl FatalHook {
    /// Every hook, in the order they are armed
    pub const ALL: [FatalHook; 4] = [
        FatalHook::Unimplemented,
        FatalHook::Trap,
        FatalHook::Interrupt,
        FatalHook::IoError,
    ];

    /// Configuration key of the hook
    pub fn config_key(self) -> &'static str {
        match self {
            FatalHook::Unimplemented => "cmd.esil.todo",
            FatalHook::Trap => "cmd.esil.trap",
            FatalHook::Interrupt => "cmd.esil.intr",
            FatalHook::IoError => "cmd.esil.ioer",
        }
    }
}

/// Reading of the end flag after a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationStatus {
    /// Nobody died
    Clear,
    /// One of the fatal hooks fired
    Raised,
    /// The flag holds something no hook writes
    Unexpected(String),
}

impl TerminationStatus {
    /// Classify the trimmed output of `?v theend`
    pub fn classify(value: &str) -> Self {
        match value.trim() {
            "0x0" => TerminationStatus::Clear,
            "0x1" => TerminationStatus::Raised,
            other => TerminationStatus::Unexpected(other.to_string()),
        }
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationStatus::Clear => f.write_str("clear"),
            TerminationStatus::Raised => f.write_str("raised"),
            TerminationStatus::Unexpected(value) => write!(f, "unexpected '{}'", value),
        }
    }
}

/// Probes the shared flag once the fatal hooks are wired
///
/// Only [`EndConditionMonitor::arm`] hands one out, so a monitor never reads
/// a flag nothing can raise.
#[derive(Debug, Clone, Copy)]
pub struct EndConditionMonitor {
    _armed: (),
}

impl EndConditionMonitor {
    /// Wire every fatal hook onto the flag and clear it
    pub fn arm<B: Backend>(session: &mut Session<B>, trace: &mut TraceLog) -> Result<Self> {
        let raise = format!("f {}=1", END_FLAG);

        trace.comment("Defining the end conditions");
        for hook in FatalHook::ALL {
            let command = Command::SetConfig {
                key: hook.config_key(),
                value: &raise,
            };
            trace.command(command.to_string());
            session.run(&command)?;
        }

        trace.comment("Initializing the end condition variable");
        trace.command(Command::SetFlag { name: END_FLAG, value: 0 }.to_string());
        session.set_flag(END_FLAG, 0)?;

        Ok(Self { _armed: () })
    }

    /// Read the flag once
    pub fn check<B: Backend>(
        &self,
        session: &mut Session<B>,
        trace: &mut TraceLog,
    ) -> Result<TerminationStatus> {
        trace.comment("Checking if we've won");
        let value = session.read_variable(END_FLAG)?;
        trace.command_output(Command::ReadVariable { name: END_FLAG }.to_string(), &value);
        Ok(TerminationStatus::classify(&value))
    }
}
