//! Typed command vocabulary and its radare2 rendering

use std::fmt;

/// One backend command
///
/// `Display` renders the exact text sent over the pipe, so the same value
/// can be both executed and written to a battle trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Assemble `source` (statements separated by `;`) into hex
    Assemble { arch: &'a str, bits: u32, source: &'a str },
    /// Disassemble hex-encoded bytecode into a listing
    Disassemble { arch: &'a str, bits: u32, hex: &'a str },
    /// Initialize the emulator VM state
    InitVm,
    /// Initialize the emulator stack
    InitStack,
    /// Write hex-encoded bytes at an address
    WriteBytes { hex: &'a str, address: u64 },
    /// Read `len` raw bytes at an address, printed as hex
    ReadBytes { len: u64, address: u64 },
    /// Human-readable memory dump of `len` bytes at an address
    DumpMemory { len: u64, address: u64 },
    /// Assign a register; `value` may be an expression such as `SP+0x32`
    SetRegister { name: &'a str, value: &'a str },
    /// Print every register as replayable assignments
    ReadAllRegisters,
    /// Print the program counter, whatever the architecture calls it
    ProgramCounter,
    /// Set a configuration variable
    SetConfig { key: &'a str, value: &'a str },
    /// Read a configuration variable
    GetConfig { key: &'a str },
    /// Set a flag (named variable) to a numeric value
    SetFlag { name: &'a str, value: u64 },
    /// Execute exactly one instruction
    Step,
    /// Evaluate a variable or expression and print it as hex
    ReadVariable { name: &'a str },
}

impl fmt::Display for Command<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Assemble { arch, bits, source } => {
                write!(f, "rasm2 -a {} -b {} \"{}\"", arch, bits, source)
            }
            Command::Disassemble { arch, bits, hex } => {
                write!(f, "rasm2 -a {} -b {} -D {}", arch, bits, hex)
            }
            Command::InitVm => f.write_str("aei"),
            Command::InitStack => f.write_str("aeim"),
            Command::WriteBytes { hex, address } => write!(f, "wx {} @ 0x{:x}", hex, address),
            Command::ReadBytes { len, address } => write!(f, "p8 {} @ 0x{:x}", len, address),
            Command::DumpMemory { len, address } => write!(f, "pxc {} @ 0x{:x}", len, address),
            Command::SetRegister { name, value } => write!(f, "aer {}={}", name, value),
            Command::ReadAllRegisters => f.write_str("aerR"),
            Command::ProgramCounter => f.write_str("aer~$(arn PC)~[1]"),
            Command::SetConfig { key, value } => write!(f, "e {}={}", key, value),
            Command::GetConfig { key } => write!(f, "e {}", key),
            Command::SetFlag { name, value } => write!(f, "f {}={}", name, value),
            Command::Step => f.write_str("aes"),
            Command::ReadVariable { name } => write!(f, "?v {}", name),
        }
    }
}
