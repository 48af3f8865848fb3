//! Backend error types

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure while talking to the emulation backend
///
/// Every variant is fatal for the session it happened on: once a command
/// has gone unanswered the pipe can no longer be trusted to be in sync.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend process could not be started
    #[error("failed to spawn backend `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to the pipe failed
    #[error("backend pipe i/o failed: {0}")]
    Io(#[from] io::Error),

    /// A command did not complete within the configured timeout
    #[error("backend did not answer `{command}` within {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The backend went away (process exited, or an earlier failure poisoned the pipe)
    #[error("backend session is closed")]
    Closed,

    /// The backend answered with bytes that are not UTF-8
    #[error("backend returned non-UTF-8 output for `{command}`")]
    Utf8 { command: String },

    /// The backend answered, but not in the shape the command promises
    #[error("backend returned malformed output for `{command}`: {output:?}")]
    Malformed { command: String, output: String },

    /// The backend could not attach to the requested target
    #[error("backend refused to open `{target}`: {reason}")]
    Open { target: String, reason: String },
}
