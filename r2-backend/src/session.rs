//! Typed operations over a single backend

use crate::{parse_number, Backend, BackendError, Command, Opener, Result, Target};

/// Exclusive handle on one backend execution context
///
/// Each method issues exactly one command. Responses are returned trimmed
/// of surrounding whitespace unless noted otherwise.
pub struct Session<B: Backend> {
    backend: B,
    commands_sent: u64,
}

impl<B: Backend> Session<B> {
    /// Wrap an already opened backend
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            commands_sent: 0,
        }
    }

    /// Open a fresh backend through `opener` and wrap it
    pub fn open<O>(opener: &O, target: &Target) -> Result<Self>
    where
        O: Opener<Backend = B>,
    {
        Ok(Self::new(opener.open(target)?))
    }

    /// Execute a typed command and return its untrimmed output
    pub fn run(&mut self, command: &Command<'_>) -> Result<String> {
        self.raw(&command.to_string())
    }

    /// Execute a raw command line (used for batched register restores)
    pub fn raw(&mut self, line: &str) -> Result<String> {
        tracing::debug!("> {}", line);
        self.commands_sent += 1;
        self.backend.cmd(line)
    }

    /// Number of commands issued so far
    pub fn commands_sent(&self) -> u64 {
        self.commands_sent
    }

    /// Size of the currently opened file, i.e. the arena
    pub fn arena_size(&mut self) -> Result<Option<u64>> {
        let out = self.run(&Command::ReadVariable { name: "$s" })?;
        Ok(parse_number(&out))
    }

    /// Assemble `source` for the given architecture, returning the hex output
    pub fn assemble(&mut self, arch: &str, bits: u32, source: &str) -> Result<String> {
        let out = self.run(&Command::Assemble { arch, bits, source })?;
        Ok(out.trim().to_string())
    }

    /// Disassemble hex-encoded bytecode into a listing
    pub fn disassemble(&mut self, arch: &str, bits: u32, hex: &str) -> Result<String> {
        let out = self.run(&Command::Disassemble { arch, bits, hex })?;
        Ok(out.trim_end().to_string())
    }

    /// Write raw bytes at `address`
    pub fn write_bytes(&mut self, bytes: &[u8], address: u64) -> Result<()> {
        let hex = hex::encode(bytes);
        self.run(&Command::WriteBytes { hex: &hex, address })?;
        Ok(())
    }

    /// Read `len` raw bytes at `address`
    pub fn read_bytes(&mut self, len: u64, address: u64) -> Result<Vec<u8>> {
        let command = Command::ReadBytes { len, address };
        let out = self.run(&command)?;
        hex::decode(out.trim()).map_err(|_| BackendError::Malformed {
            command: command.to_string(),
            output: out.clone(),
        })
    }

    /// Human-readable dump of `len` bytes at `address`
    pub fn dump_memory(&mut self, len: u64, address: u64) -> Result<String> {
        let out = self.run(&Command::DumpMemory { len, address })?;
        Ok(out.trim_end().to_string())
    }

    /// Assign a register (the value may be a backend expression)
    pub fn set_register(&mut self, name: &str, value: &str) -> Result<()> {
        self.run(&Command::SetRegister { name, value })?;
        Ok(())
    }

    /// Raw `aerR` output describing every register
    pub fn read_all_registers(&mut self) -> Result<String> {
        self.run(&Command::ReadAllRegisters)
    }

    /// Current program counter as printed by the backend
    pub fn program_counter(&mut self) -> Result<String> {
        let out = self.run(&Command::ProgramCounter)?;
        Ok(out.trim().to_string())
    }

    /// Set a configuration variable
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.run(&Command::SetConfig { key, value })?;
        Ok(())
    }

    /// Read a configuration variable
    pub fn get_config(&mut self, key: &str) -> Result<String> {
        let out = self.run(&Command::GetConfig { key })?;
        Ok(out.trim().to_string())
    }

    /// Set a flag variable
    pub fn set_flag(&mut self, name: &str, value: u64) -> Result<()> {
        self.run(&Command::SetFlag { name, value })?;
        Ok(())
    }

    /// Initialize the emulator VM and its stack
    pub fn init_vm(&mut self) -> Result<()> {
        self.run(&Command::InitVm)?;
        self.run(&Command::InitStack)?;
        Ok(())
    }

    /// Execute exactly one instruction in the active context
    pub fn step(&mut self) -> Result<()> {
        self.run(&Command::Step)?;
        Ok(())
    }

    /// Read a variable, trimmed
    pub fn read_variable(&mut self, name: &str) -> Result<String> {
        let out = self.run(&Command::ReadVariable { name })?;
        Ok(out.trim().to_string())
    }
}
