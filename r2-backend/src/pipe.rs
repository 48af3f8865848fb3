//! r2pipe transport
//!
//! Drives `r2 -q0 <target>` as a child process. Each command is written as a
//! single line on stdin; radare2 answers with the command output followed by
//! a NUL byte. A reader thread forwards every NUL-terminated chunk over a
//! channel so that waiting for an answer can be bounded by a timeout.

use crate::{Backend, BackendError, Opener, Result, Target};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

/// How to launch and talk to radare2
#[derive(Debug, Clone)]
pub struct PipeOptions {
    /// radare2 executable
    pub program: PathBuf,
    /// Upper bound on how long a single command may take, `None` waits forever
    pub timeout: Option<Duration>,
}

impl Default for PipeOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from("r2"),
            timeout: Some(Duration::from_secs(10)),
        }
    }
}

type Chunk = std::io::Result<Vec<u8>>;

/// A live radare2 process
///
/// The process is the single execution context; dropping the pipe quits and
/// reaps it, so a session never outlives its owner.
pub struct R2Pipe {
    child: Child,
    stdin: Option<ChildStdin>,
    responses: Receiver<Chunk>,
    reader: Option<JoinHandle<()>>,
    timeout: Option<Duration>,
    poisoned: bool,
}

impl R2Pipe {
    /// Spawn radare2 attached to `target` and wait for its ready marker
    pub fn open(target: &Target, options: &PipeOptions) -> Result<Self> {
        let target = target.to_string();
        tracing::info!("Opening r2 backend on {}", target);

        let mut child = Command::new(&options.program)
            .arg("-q0")
            .arg(&target)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| BackendError::Spawn {
                program: options.program.display().to_string(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(BackendError::Closed)?;
        let stdout = child.stdout.take().ok_or(BackendError::Closed)?;

        let (tx, responses) = mpsc::channel::<Chunk>();
        let reader = std::thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut chunk = Vec::new();
                match reader.read_until(0, &mut chunk) {
                    Ok(0) => break,
                    Ok(_) => {
                        if chunk.last() == Some(&0) {
                            chunk.pop();
                        }
                        if tx.send(Ok(chunk)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        let mut pipe = Self {
            child,
            stdin: Some(stdin),
            responses,
            reader: Some(reader),
            timeout: options.timeout,
            poisoned: false,
        };

        // r2 -q0 prints a lone NUL once it is ready for commands
        pipe.receive("<handshake>").map_err(|e| BackendError::Open {
            target: target.clone(),
            reason: e.to_string(),
        })?;

        Ok(pipe)
    }

    fn receive(&mut self, command: &str) -> Result<Vec<u8>> {
        let received = match self.timeout {
            Some(timeout) => self.responses.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => BackendError::Timeout {
                    command: command.to_string(),
                    timeout,
                },
                RecvTimeoutError::Disconnected => BackendError::Closed,
            }),
            None => self.responses.recv().map_err(|_| BackendError::Closed),
        };

        match received {
            Ok(Ok(chunk)) => Ok(chunk),
            Ok(Err(e)) => {
                self.poisoned = true;
                Err(BackendError::Io(e))
            }
            Err(e) => {
                self.poisoned = true;
                Err(e)
            }
        }
    }
}

impl Backend for R2Pipe {
    fn cmd(&mut self, command: &str) -> Result<String> {
        if self.poisoned {
            return Err(BackendError::Closed);
        }

        let stdin = self.stdin.as_mut().ok_or(BackendError::Closed)?;
        if let Err(e) = writeln!(stdin, "{}", command).and_then(|_| stdin.flush()) {
            self.poisoned = true;
            return Err(BackendError::Io(e));
        }

        let chunk = self.receive(command)?;
        String::from_utf8(chunk).map_err(|_| BackendError::Utf8 {
            command: command.to_string(),
        })
    }
}

impl Drop for R2Pipe {
    fn drop(&mut self) {
        if let Some(mut stdin) = self.stdin.take() {
            let _ = writeln!(stdin, "q!");
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        tracing::debug!("r2 backend released");
    }
}

/// Opens one radare2 process per request
#[derive(Debug, Clone, Default)]
pub struct R2Opener {
    options: PipeOptions,
}

impl R2Opener {
    /// Create an opener that launches radare2 with the given options
    pub fn new(options: PipeOptions) -> Self {
        Self { options }
    }
}

impl Opener for R2Opener {
    type Backend = R2Pipe;

    fn open(&self, target: &Target) -> Result<R2Pipe> {
        R2Pipe::open(target, &self.options)
    }
}
