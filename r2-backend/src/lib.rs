//! r2 Backend - Command plumbing for the radare2 emulation backend
//!
//! This crate owns everything that talks to the external emulator: the
//! line-oriented r2pipe transport, the typed command vocabulary used by the
//! battle engine, and an in-memory fake that speaks the same dialect for tests.
//!
//! # Overview
//!
//! * [`Backend`] - one command in, raw text out
//! * [`R2Pipe`] - a `r2 -q0` child process driven over stdin/stdout
//! * [`Session`] - typed operations (assemble, write bytes, step, ...) on top of a backend
//! * [`Opener`] - creates one fresh backend per battle run
//!
//! # Usage
//!
//! ```no_run
//! use r2_backend::{Opener, PipeOptions, R2Opener, Session, Target};
//!
//! let opener = R2Opener::new(PipeOptions::default());
//! let mut session = Session::new(opener.open(&Target::Arena(4096)).unwrap());
//! let hex = session.assemble("x86", 32, "nop; nop").unwrap();
//! println!("bytecode: {}", hex);
//! ```

pub mod command;
pub mod error;
pub mod pipe;
pub mod session;

#[cfg(any(test, feature = "fake"))]
pub mod fake;

pub use command::Command;
pub use error::BackendError;
pub use pipe::{PipeOptions, R2Opener, R2Pipe};
pub use session::Session;

use std::fmt;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// A single-context emulation backend reached through a textual protocol
///
/// One command per call; the returned string is the raw output of that
/// command. Implementations hold exactly one live execution context.
pub trait Backend {
    /// Execute one command and return its raw output
    fn cmd(&mut self, command: &str) -> Result<String>;
}

impl<B: Backend + ?Sized> Backend for Box<B> {
    fn cmd(&mut self, command: &str) -> Result<String> {
        (**self).cmd(command)
    }
}

impl<B: Backend + ?Sized> Backend for &mut B {
    fn cmd(&mut self, command: &str) -> Result<String> {
        (**self).cmd(command)
    }
}

/// What a freshly opened backend should be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A zero-filled memory-backed file of the given size (the battle arena)
    Arena(u64),
    /// No file at all, for assemble/disassemble only sessions
    Empty,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Arena(size) => write!(f, "malloc://{}", size),
            Target::Empty => f.write_str("--"),
        }
    }
}

/// Factory for backends, one per battle run
///
/// Openers are shared between concurrently running battles, the backends
/// they return never are.
pub trait Opener: Sync {
    /// Backend type produced by this opener
    type Backend: Backend;

    /// Open a new, exclusively owned backend attached to `target`
    fn open(&self, target: &Target) -> Result<Self::Backend>;
}

/// Parse a numeric value as printed by the backend (`0x1f`, `31`)
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_rendering() {
        assert_eq!(Target::Arena(4096).to_string(), "malloc://4096");
        assert_eq!(Target::Empty.to_string(), "--");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("0x0"), Some(0));
        assert_eq!(parse_number(" 0x1000\n"), Some(4096));
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0xzz"), None);
        assert_eq!(parse_number(""), None);
    }
}
