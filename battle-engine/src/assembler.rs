//! Bot assembly through the backend

use crate::config::BotSpec;
use crate::error::RunError;
use crate::trace::TraceLog;
use crate::Result;
use r2_backend::{Backend, Command, Session};
use serde::{Deserialize, Serialize};

/// Bytecode and listing of a single bot, for display next to its source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotPreview {
    /// Command used to assemble the bot
    pub assemble_command: String,
    /// Hex-encoded bytecode
    pub bytecode_hex: String,
    /// Command used to disassemble the bytecode
    pub disassemble_command: String,
    /// Disassembly listing
    pub disassembly: String,
}

/// Turn multi-line source into the `;`-separated form `rasm2` expects
///
/// Accepts `\r\n`, `\n` and `\r` line endings and drops blank lines.
/// Backslashes and double quotes are escaped, in that order, so nothing in
/// the source can close the quoted `rasm2` argument.
pub fn normalize_source(source: &str) -> String {
    source
        .split(|c: char| c == '\r' || c == '\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| line.replace('\\', "\\\\").replace('"', "\\\""))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Assemble bot `index` and return its bytecode
///
/// An empty or non-hex answer from the backend means the source does not
/// assemble for the bot's architecture.
pub fn assemble<B: Backend>(
    session: &mut Session<B>,
    index: usize,
    bot: &BotSpec,
    trace: &mut TraceLog,
) -> Result<Vec<u8>> {
    let assembly_error = |reason: String| RunError::Assembly {
        bot: index,
        name: bot.name.clone(),
        arch: bot.arch.clone(),
        bits: bot.bits,
        reason,
    };

    let source = normalize_source(&bot.source);
    if source.is_empty() {
        return Err(assembly_error("source has no statements".to_string()));
    }

    let command = Command::Assemble {
        arch: &bot.arch,
        bits: bot.bits,
        source: &source,
    };
    trace.command(format!("; {}", command));

    let output = session.run(&command)?;
    let hex_output = output.trim();
    if hex_output.is_empty() {
        return Err(assembly_error("backend produced no bytecode".to_string()));
    }

    let bytecode = hex::decode(hex_output)
        .map_err(|_| assembly_error(format!("backend output is not bytecode: {}", hex_output)))?;

    tracing::info!(
        "Assembled bot {} ({}) for {}/{}: {} bytes",
        index,
        bot.name,
        bot.arch,
        bot.bits,
        bytecode.len()
    );

    Ok(bytecode)
}

/// Assemble a bot and disassemble the result again
pub fn preview<B: Backend>(session: &mut Session<B>, bot: &BotSpec) -> Result<BotPreview> {
    let mut scratch = TraceLog::new();
    let bytecode = assemble(session, 0, bot, &mut scratch)?;
    let bytecode_hex = hex::encode(&bytecode);

    let source = normalize_source(&bot.source);
    let assemble_command = Command::Assemble {
        arch: &bot.arch,
        bits: bot.bits,
        source: &source,
    }
    .to_string();
    let disassemble_command = Command::Disassemble {
        arch: &bot.arch,
        bits: bot.bits,
        hex: &bytecode_hex,
    }
    .to_string();

    let disassembly = session.disassemble(&bot.arch, bot.bits, &bytecode_hex)?;

    Ok(BotPreview {
        assemble_command,
        bytecode_hex,
        disassemble_command,
        disassembly,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use r2_backend::fake::FakeBackend;

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_source("nop\r\nint3"), "nop; int3");
        assert_eq!(normalize_source("nop\nint3\n"), "nop; int3");
        assert_eq!(normalize_source("nop\r\r\n  \n jmp $ "), "nop; jmp $");
    }

    #[test]
    fn test_normalize_escapes_quotes() {
        assert_eq!(normalize_source("db \"hi\""), "db \\\"hi\\\"");
    }

    #[test]
    fn test_normalize_escapes_backslashes_before_quotes() {
        assert_eq!(normalize_source(r#"x\";!id #"#), r#"x\\\";!id #"#);
        assert_eq!(normalize_source(r"nop \"), r"nop \\");
    }

    #[test]
    fn test_source_cannot_close_the_quoted_argument() {
        for source in [r#"x\";!id #"#, r#"nop\"#, r#"a\\"; !ls"#] {
            let normalized = normalize_source(source);
            let command = Command::Assemble {
                arch: "x86",
                bits: 32,
                source: &normalized,
            }
            .to_string();

            // Walk the quoted argument: the only unescaped quote must be the last byte
            let quoted = &command[command.find('"').unwrap() + 1..];
            let mut escaped = false;
            let mut closing = None;
            for (i, c) in quoted.char_indices() {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => {
                        closing = Some(i);
                        break;
                    }
                    _ => {}
                }
            }
            assert_eq!(closing, Some(quoted.len() - 1), "{:?} escapes its quotes in {}", source, command);
        }
    }

    #[test]
    fn test_assemble_bot() {
        let mut session = Session::new(FakeBackend::new(0));
        let mut trace = TraceLog::new();
        let bot = BotSpec::new(1, "trapper", "nop\r\nint3", "x86", 32);

        let bytecode = assemble(&mut session, 0, &bot, &mut trace).unwrap();
        assert_eq!(bytecode, vec![0x90, 0xcc]);
        assert!(trace.text().contains("; rasm2 -a x86 -b 32 \"nop; int3\""));
    }

    #[test]
    fn test_invalid_source_is_assembly_error() {
        let mut session = Session::new(FakeBackend::new(0));
        let mut trace = TraceLog::new();
        let bot = BotSpec::new(1, "broken", "mov eax, 1", "x86", 32);

        let err = assemble(&mut session, 3, &bot, &mut trace).unwrap_err();
        match err {
            RunError::Assembly { bot, name, .. } => {
                assert_eq!(bot, 3);
                assert_eq!(name, "broken");
            }
            other => panic!("expected assembly error, got {:?}", other),
        }
    }

    #[test]
    fn test_blank_source_never_reaches_backend() {
        let mut session = Session::new(FakeBackend::new(0));
        let mut trace = TraceLog::new();
        let bot = BotSpec::new(1, "empty", "\r\n\r\n", "x86", 32);

        assert!(matches!(
            assemble(&mut session, 0, &bot, &mut trace),
            Err(RunError::Assembly { .. })
        ));
        assert_eq!(session.commands_sent(), 0);
    }

    #[test]
    fn test_preview() {
        let mut session = Session::new(FakeBackend::new(0));
        let bot = BotSpec::new(1, "spinner", "nop\njmp $", "x86", 32);

        let preview = preview(&mut session, &bot).unwrap();
        assert_eq!(preview.bytecode_hex, "90ebfe");
        assert_eq!(preview.disassemble_command, "rasm2 -a x86 -b 32 -D 90ebfe");
        assert!(preview.disassembly.contains("jmp $"));
    }
}
