//! Register context store
//!
//! The backend has one register file. Every bot keeps its own copy as a
//! [`RegisterSnapshot`], which is swapped in before its turn and captured
//! again right after.

use r2_backend::{Backend, BackendError, Result, Session};
use serde::{Deserialize, Serialize};

/// Opaque, ordered register state of one bot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    entries: Vec<(String, String)>,
}

impl RegisterSnapshot {
    /// Parse `aerR` output (`aer <name> = <value>` per line)
    pub fn parse(output: &str) -> Self {
        let entries = output
            .lines()
            .filter_map(|line| {
                let line = line.trim();
                let line = line
                    .strip_prefix("aer ")
                    .or_else(|| line.strip_prefix("ar "))
                    .unwrap_or(line);
                let (name, value) = line.split_once('=')?;
                let (name, value) = (name.trim(), value.trim());
                if name.is_empty() || value.is_empty() {
                    return None;
                }
                Some((name.to_string(), value.to_string()))
            })
            .collect();
        Self { entries }
    }

    /// Value of a register, as the backend printed it
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Register name/value pairs in backend order
    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }

    /// Number of registers captured
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing was captured
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The single `;`-joined command line that reinstates this state
    pub fn restore_command(&self) -> String {
        self.entries
            .iter()
            .map(|(name, value)| format!("aer {}={}", name, value))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Capture the backend's active register state
///
/// An `aerR` answer without a single register is an error: an empty snapshot
/// would restore nothing and leave the previous bot's registers in place.
pub fn save<B: Backend>(session: &mut Session<B>) -> Result<RegisterSnapshot> {
    let output = session.read_all_registers()?;
    let snapshot = RegisterSnapshot::parse(&output);
    if snapshot.is_empty() {
        return Err(BackendError::Malformed {
            command: "aerR".to_string(),
            output,
        });
    }
    Ok(snapshot)
}

/// Reinstate a captured register state in one batched command
///
/// Returns the command that was sent, for the trace.
pub fn restore<B: Backend>(session: &mut Session<B>, snapshot: &RegisterSnapshot) -> Result<String> {
    let command = snapshot.restore_command();
    session.raw(&command)?;
    Ok(command)
}

#[cfg(test)]
mod tests {
    use super::*;
    use r2_backend::fake::FakeBackend;

    /// Answers `aerR` with text that holds no registers
    struct GarbledRegisters(FakeBackend);

    impl Backend for GarbledRegisters {
        fn cmd(&mut self, command: &str) -> Result<String> {
            if command == "aerR" {
                return Ok("garbage\n".to_string());
            }
            self.0.cmd(command)
        }
    }

    #[test]
    fn test_parse_aer_output() {
        let snapshot = RegisterSnapshot::parse("aer pc = 0x00000032\naer sp = 0x00178032\n\n");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get("PC"), Some("0x00000032"));
        assert_eq!(snapshot.get("sp"), Some("0x00178032"));
    }

    #[test]
    fn test_parse_skips_noise() {
        let snapshot = RegisterSnapshot::parse("garbage\naer = 0x1\naer a0 = 0x7");
        assert_eq!(snapshot.entries(), &[("a0".to_string(), "0x7".to_string())]);
    }

    #[test]
    fn test_restore_command() {
        let snapshot = RegisterSnapshot::parse("aer pc = 0x1\naer a0 = 0x2");
        assert_eq!(snapshot.restore_command(), "aer pc=0x1;aer a0=0x2");
    }

    #[test]
    fn test_save_restore_save_is_identity() {
        let mut session = Session::new(FakeBackend::new(256));
        session.init_vm().unwrap();
        session.set_register("PC", "0x64").unwrap();
        session.set_register("a0", "0x2a").unwrap();

        let first = save(&mut session).unwrap();
        restore(&mut session, &first).unwrap();
        let second = save(&mut session).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_restore_switches_context() {
        let mut session = Session::new(FakeBackend::new(256));
        session.set_register("PC", "0x32").unwrap();
        let bot_a = save(&mut session).unwrap();

        session.set_register("PC", "0x64").unwrap();
        let bot_b = save(&mut session).unwrap();

        restore(&mut session, &bot_a).unwrap();
        assert_eq!(save(&mut session).unwrap(), bot_a);
        restore(&mut session, &bot_b).unwrap();
        assert_eq!(save(&mut session).unwrap().get("pc"), Some("0x00000064"));
    }

    #[test]
    fn test_unparseable_register_dump_is_rejected() {
        let mut session = Session::new(GarbledRegisters(FakeBackend::new(256)));
        match save(&mut session) {
            Err(BackendError::Malformed { command, output }) => {
                assert_eq!(command, "aerR");
                assert_eq!(output, "garbage\n");
            }
            other => panic!("expected malformed output, got {:?}", other),
        }
    }

    #[test]
    fn test_restore_returns_sent_command() {
        let mut session = Session::new(FakeBackend::new(256));
        session.set_register("PC", "0x32").unwrap();
        let snapshot = save(&mut session).unwrap();
        assert_eq!(restore(&mut session, &snapshot).unwrap(), snapshot.restore_command());
    }
}
