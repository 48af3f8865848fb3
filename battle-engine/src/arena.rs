//! Arena placement and loading
//!
//! Bot `i` lives at `stride * (i + 1)`. Placement is checked up front: a
//! bot longer than the stride would overwrite its neighbour, and a bot past
//! the end of the arena would be silently truncated by the backend.

use crate::config::BotSpec;
use crate::error::{ConfigError, RunError};
use crate::registers::{self, RegisterSnapshot};
use crate::trace::TraceLog;
use crate::Result;
use r2_backend::{Backend, Command, Session};

/// Where one bot's bytecode sits in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// First byte of the bot
    pub base: u64,
    /// Bytecode length
    pub len: u64,
}

impl Placement {
    /// One past the last byte of the bot
    pub fn end(&self) -> u64 {
        self.base + self.len
    }
}

/// Checked placement of every bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArenaLayout {
    arena_size: u64,
    placements: Vec<Placement>,
}

impl ArenaLayout {
    /// Compute base addresses for bytecode of the given lengths
    pub fn plan(arena_size: u64, stride: u64, lengths: &[usize]) -> std::result::Result<Self, ConfigError> {
        if stride == 0 {
            return Err(ConfigError::ZeroStride);
        }

        let mut placements = Vec::with_capacity(lengths.len());
        for (bot, &len) in lengths.iter().enumerate() {
            if len as u64 > stride {
                return Err(ConfigError::BytecodeExceedsStride { bot, len, stride });
            }

            let base = stride * (bot as u64 + 1);
            let placement = Placement { base, len: len as u64 };
            if placement.end() > arena_size {
                return Err(ConfigError::OutsideArena {
                    bot,
                    base,
                    end: placement.end(),
                    arena_size,
                });
            }
            placements.push(placement);
        }

        Ok(Self {
            arena_size,
            placements,
        })
    }

    /// Arena size this layout was planned for
    pub fn arena_size(&self) -> u64 {
        self.arena_size
    }

    /// Placements in bot order
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }
}

/// Write every bot into the arena and capture its initial registers
///
/// Returns one snapshot per bot, in layout order. Each bot starts with
/// `PC = base` and `SP = default SP + base`.
pub fn load<B: Backend>(
    session: &mut Session<B>,
    layout: &ArenaLayout,
    bots: &[(&BotSpec, &[u8])],
    trace: &mut TraceLog,
) -> Result<Vec<RegisterSnapshot>> {
    trace.comment("initializing the vm and the stack");
    trace.command(Command::InitVm.to_string());
    trace.command(Command::InitStack.to_string());
    session.init_vm()?;

    // Default register state right after aei/aeim, reinstated before each bot
    let pristine = registers::save(session)?;

    let mut snapshots = Vec::with_capacity(bots.len());
    for (index, ((bot, bytecode), placement)) in bots.iter().zip(layout.placements()).enumerate() {
        let base = placement.base;
        registers::restore(session, &pristine)?;

        trace.comment(format!("writing bot {} to 0x{:x}", index, base));
        let hex = hex::encode(bytecode);
        trace.command(Command::WriteBytes { hex: &hex, address: base }.to_string());
        session.write_bytes(bytecode, base)?;

        let written = session.read_bytes(placement.len, base)?;
        if written != *bytecode {
            return Err(RunError::ArenaAllocation {
                size: layout.arena_size(),
                reason: format!("bytes written for bot {} at 0x{:x} did not read back", index, base),
            });
        }

        trace.comment("Setting the program counter and the stack pointer");
        let pc = format!("0x{:x}", base);
        let sp = format!("SP+0x{:x}", base);
        trace.command(Command::SetRegister { name: "PC", value: &pc }.to_string());
        session.set_register("PC", &pc)?;
        trace.command(Command::SetRegister { name: "SP", value: &sp }.to_string());
        session.set_register("SP", &sp)?;

        trace.comment("Storing registers");
        trace.command(Command::ReadAllRegisters.to_string());
        snapshots.push(registers::save(session)?);

        tracing::info!(
            "Placed bot {} ({}) at 0x{:x}, {} bytes",
            index,
            bot.name,
            base,
            bytecode.len()
        );
    }

    Ok(snapshots)
}
