//! Architecture and bit-width admission checks
//!
//! A battle lists the architectures and bit widths it accepts; every bot
//! entered into it must match both.

use crate::store::StoredBattle;
use thiserror::Error;

/// A bot that is not allowed into a battle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchBitMismatch {
    #[error("bot {bot} ({name}) has an invalid architecture: {arch}")]
    Arch { bot: usize, name: String, arch: String },

    #[error("bot {bot} ({name}) has an invalid 'bit-ness': {bits}")]
    Bits { bot: usize, name: String, bits: u32 },
}

/// Check every participant against the battle's allowed archs and bits
pub fn check(battle: &StoredBattle) -> Result<(), ArchBitMismatch> {
    for (index, bot) in battle.config.bots.iter().enumerate() {
        if !battle.archs.iter().any(|arch| arch == &bot.arch) {
            return Err(ArchBitMismatch::Arch {
                bot: index,
                name: bot.name.clone(),
                arch: bot.arch.clone(),
            });
        }
        if !battle.bits.contains(&bot.bits) {
            return Err(ArchBitMismatch::Bits {
                bot: index,
                name: bot.name.clone(),
                bits: bot.bits,
            });
        }
    }
    Ok(())
}
