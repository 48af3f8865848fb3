//! In-memory fake of the radare2 backend
//!
//! Understands the subset of the r2 dialect that [`Command`](crate::Command)
//! renders, over a flat byte memory and a four-register file. The
//! instruction set is tiny and deterministic:
//!
//! | mnemonic   | bytes  | effect |
//! |------------|--------|--------|
//! | `nop`      | `90`   | advance |
//! | `inc a0`   | `40`   | `a0 += 1` |
//! | `int3`     | `cc`   | trap hook |
//! | `ud2`      | `0f0b` | unimplemented-instruction hook |
//! | `int 0x80` | `cd80` | interrupt hook |
//! | `jmp $`    | `ebfe` | spin in place |
//!
//! Any other byte fires the unimplemented-instruction hook; stepping outside
//! memory fires the i/o error hook.

use crate::{parse_number, Backend, BackendError, Opener, Result, Target};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Stack pointer value after `aeim`
pub const FAKE_STACK_TOP: u64 = 0x0017_8000;

/// Register names in the order `aerR` prints them
pub const FAKE_REGISTERS: [&str; 4] = ["pc", "sp", "a0", "a1"];

/// Scripted misbehaviour for the fake
#[derive(Debug, Clone)]
pub struct FakeScript {
    /// Largest arena the fake agrees to open
    pub max_arena: u64,
    /// Report this value from `?v $s` instead of the real arena size
    pub misreported_size: Option<u64>,
    /// Fail the n-th (0-based) `aes` as if the pipe broke
    pub fail_on_step: Option<usize>,
    /// After the n-th (0-based) `aes`, force a flag to a value
    pub flag_after_step: Vec<(usize, String, u64)>,
}

impl Default for FakeScript {
    fn default() -> Self {
        Self {
            max_arena: 1 << 24,
            misreported_size: None,
            fail_on_step: None,
            flag_after_step: Vec::new(),
        }
    }
}

/// A deterministic stand-in for one radare2 process
pub struct FakeBackend {
    memory: Vec<u8>,
    registers: [u64; 4],
    config: BTreeMap<String, String>,
    flags: BTreeMap<String, u64>,
    steps: usize,
    script: FakeScript,
    journal: Arc<Mutex<Vec<String>>>,
    released: Arc<AtomicUsize>,
}

impl FakeBackend {
    /// Fake attached to a zero-filled arena of `size` bytes
    pub fn new(size: u64) -> Self {
        Self::with_script(size, FakeScript::default())
    }

    /// Fake with scripted misbehaviour
    pub fn with_script(size: u64, script: FakeScript) -> Self {
        Self {
            memory: vec![0; size as usize],
            registers: [0; 4],
            config: BTreeMap::new(),
            flags: BTreeMap::new(),
            steps: 0,
            script,
            journal: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Every command line received so far
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    /// Current value of a register by name
    pub fn register(&self, name: &str) -> Option<u64> {
        register_index(name).map(|i| self.registers[i])
    }

    fn statement(&mut self, line: &str) -> Result<String> {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("rasm2 ") {
            return Ok(self.rasm2(rest));
        }

        match line {
            "" => return Ok(String::new()),
            "aei" => {
                self.registers = [0; 4];
                return Ok(String::new());
            }
            "aeim" => {
                self.registers[1] = FAKE_STACK_TOP;
                return Ok(String::new());
            }
            "aerR" => {
                let mut out = String::new();
                for (name, value) in FAKE_REGISTERS.iter().zip(self.registers.iter()) {
                    let _ = writeln!(out, "aer {} = 0x{:08x}", name, value);
                }
                return Ok(out);
            }
            "aer~$(arn PC)~[1]" => return Ok(format!("0x{:08x}\n", self.registers[0])),
            "aes" => return self.step().map(|_| String::new()),
            _ => {}
        }

        if let Some(assignment) = line.strip_prefix("aer ") {
            if let Some((name, expr)) = assignment.split_once('=') {
                let value = self.eval(expr.trim());
                if let (Some(i), Some(value)) = (register_index(name.trim()), value) {
                    self.registers[i] = value;
                }
            }
            return Ok(String::new());
        }

        if let Some(rest) = line.strip_prefix("wx ") {
            if let Some((hex, address)) = split_at_address(rest) {
                if let Ok(bytes) = hex::decode(hex) {
                    self.write(address, &bytes);
                }
            }
            return Ok(String::new());
        }

        if let Some(rest) = line.strip_prefix("p8 ") {
            if let Some((len, address)) = split_at_address(rest) {
                let len = parse_number(len).unwrap_or(0);
                return Ok(format!("{}\n", hex::encode(self.read(address, len))));
            }
            return Ok(String::new());
        }

        if let Some(rest) = line.strip_prefix("pxc ") {
            if let Some((len, address)) = split_at_address(rest) {
                let len = parse_number(len).unwrap_or(0);
                return Ok(self.hexdump(address, len));
            }
            return Ok(String::new());
        }

        if let Some(rest) = line.strip_prefix("e ") {
            return Ok(match rest.split_once('=') {
                Some((key, value)) => {
                    self.config.insert(key.trim().to_string(), value.trim().to_string());
                    String::new()
                }
                None => format!("{}\n", self.config.get(rest.trim()).cloned().unwrap_or_default()),
            });
        }

        if let Some(rest) = line.strip_prefix("f ") {
            if let Some((name, value)) = rest.split_once('=') {
                let value = parse_number(value).unwrap_or(0);
                self.flags.insert(name.trim().to_string(), value);
            }
            return Ok(String::new());
        }

        if let Some(name) = line.strip_prefix("?v ") {
            let value = match name.trim() {
                "$s" => self
                    .script
                    .misreported_size
                    .unwrap_or(self.memory.len() as u64),
                other => self.flags.get(other).copied().unwrap_or(0),
            };
            return Ok(format!("0x{:x}\n", value));
        }

        Ok(String::new())
    }

    fn step(&mut self) -> Result<()> {
        let index = self.steps;
        self.steps += 1;

        if self.script.fail_on_step == Some(index) {
            return Err(BackendError::Closed);
        }

        let pc = self.registers[0];
        let opcode = self.byte(pc);
        match opcode {
            None => self.fire("ioer")?,
            Some(0x90) => self.registers[0] = pc + 1,
            Some(0x40) => {
                self.registers[2] = self.registers[2].wrapping_add(1);
                self.registers[0] = pc + 1;
            }
            Some(0xcc) => {
                self.registers[0] = pc + 1;
                self.fire("trap")?;
            }
            Some(0x0f) if self.byte(pc + 1) == Some(0x0b) => {
                self.registers[0] = pc + 2;
                self.fire("todo")?;
            }
            Some(0xcd) => {
                self.registers[0] = pc + 2;
                self.fire("intr")?;
            }
            Some(0xeb) if self.byte(pc + 1) == Some(0xfe) => {}
            Some(_) => {
                self.registers[0] = pc + 1;
                self.fire("todo")?;
            }
        }

        let forced: Vec<(String, u64)> = self
            .script
            .flag_after_step
            .iter()
            .filter(|(step, _, _)| *step == index)
            .map(|(_, name, value)| (name.clone(), *value))
            .collect();
        for (name, value) in forced {
            self.flags.insert(name, value);
        }

        Ok(())
    }

    fn fire(&mut self, event: &str) -> Result<()> {
        if let Some(hook) = self.config.get(&format!("cmd.esil.{}", event)).cloned() {
            self.statement(&hook)?;
        }
        Ok(())
    }

    fn rasm2(&self, args: &str) -> String {
        // -a <arch> -b <bits> then either -D <hex> or "<source>"
        let mut parts = args.splitn(5, ' ');
        let (Some("-a"), Some(_arch), Some("-b"), Some(_bits), Some(rest)) =
            (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return String::new();
        };

        if let Some(hex) = rest.strip_prefix("-D ") {
            return disassemble(hex.trim());
        }

        let source = rest.trim().trim_matches('"');
        let mut out = String::new();
        for statement in source.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match encode(statement) {
                Some(hex) => out.push_str(hex),
                None => return String::new(),
            }
        }
        if out.is_empty() {
            out
        } else {
            format!("{}\n", out)
        }
    }

    fn eval(&self, expr: &str) -> Option<u64> {
        expr.split('+').try_fold(0u64, |acc, term| {
            let term = term.trim();
            let value = parse_number(term).or_else(|| self.register(term))?;
            Some(acc.wrapping_add(value))
        })
    }

    fn byte(&self, address: u64) -> Option<u8> {
        self.memory.get(usize::try_from(address).ok()?).copied()
    }

    fn read(&self, address: u64, len: u64) -> Vec<u8> {
        (address..address.saturating_add(len))
            .map(|a| self.byte(a).unwrap_or(0xff))
            .collect()
    }

    fn write(&mut self, address: u64, bytes: &[u8]) {
        for (offset, byte) in bytes.iter().enumerate() {
            if let Some(slot) = usize::try_from(address + offset as u64)
                .ok()
                .and_then(|a| self.memory.get_mut(a))
            {
                *slot = *byte;
            }
        }
    }

    fn hexdump(&self, address: u64, len: u64) -> String {
        let bytes = self.read(address, len);
        let mut out = String::new();
        for (row, chunk) in bytes.chunks(16).enumerate() {
            let _ = write!(out, "0x{:08x} ", address + (row as u64) * 16);
            for byte in chunk {
                let _ = write!(out, " {:02x}", byte);
            }
            out.push('\n');
        }
        out
    }
}

impl Backend for FakeBackend {
    fn cmd(&mut self, command: &str) -> Result<String> {
        if let Ok(mut journal) = self.journal.lock() {
            journal.push(command.to_string());
        }

        // Batched statements, except inside a quoted rasm2 source
        if command.starts_with("rasm2 ") || !command.contains(';') {
            return self.statement(command);
        }
        let mut out = String::new();
        for statement in command.split(';') {
            out.push_str(&self.statement(statement)?);
        }
        Ok(out)
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Opener handing out fresh fakes and counting them
#[derive(Debug, Clone, Default)]
pub struct FakeOpener {
    script: FakeScript,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
    journal: Arc<Mutex<Vec<String>>>,
}

impl FakeOpener {
    /// Opener whose fakes follow `script`
    pub fn new(script: FakeScript) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    /// Number of backends opened so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Number of backends dropped so far
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Commands received by every backend this opener produced, in order
    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }
}

impl Opener for FakeOpener {
    type Backend = FakeBackend;

    fn open(&self, target: &Target) -> Result<FakeBackend> {
        let size = match target {
            Target::Arena(size) => *size,
            Target::Empty => 0,
        };
        if size > self.script.max_arena {
            return Err(BackendError::Open {
                target: target.to_string(),
                reason: format!("cannot allocate {} bytes", size),
            });
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        let mut backend = FakeBackend::with_script(size, self.script.clone());
        backend.journal = Arc::clone(&self.journal);
        backend.released = Arc::clone(&self.released);
        Ok(backend)
    }
}

fn register_index(name: &str) -> Option<usize> {
    let name = name.to_ascii_lowercase();
    FAKE_REGISTERS.iter().position(|r| *r == name)
}

fn split_at_address(rest: &str) -> Option<(&str, u64)> {
    let (head, address) = rest.split_once('@')?;
    Some((head.trim(), parse_number(address)?))
}

fn encode(statement: &str) -> Option<&'static str> {
    match statement {
        "nop" => Some("90"),
        "inc a0" => Some("40"),
        "int3" => Some("cc"),
        "ud2" => Some("0f0b"),
        "int 0x80" => Some("cd80"),
        "jmp $" => Some("ebfe"),
        _ => None,
    }
}

fn disassemble(hex: &str) -> String {
    let Ok(bytes) = hex::decode(hex) else {
        return String::new();
    };

    let mut out = String::new();
    let mut offset = 0;
    while offset < bytes.len() {
        let (len, mnemonic) = match (bytes[offset], bytes.get(offset + 1)) {
            (0x90, _) => (1, "nop"),
            (0x40, _) => (1, "inc a0"),
            (0xcc, _) => (1, "int3"),
            (0x0f, Some(0x0b)) => (2, "ud2"),
            (0xcd, Some(_)) => (2, "int 0x80"),
            (0xeb, Some(0xfe)) => (2, "jmp $"),
            _ => (1, "invalid"),
        };
        let _ = writeln!(
            out,
            "0x{:08x}   {}  {}  {}",
            offset,
            len,
            hex::encode(&bytes[offset..offset + len]),
            mnemonic
        );
        offset += len;
    }
    out
}
