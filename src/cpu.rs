use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Register file: accumulator, general purpose registers, PC, SP and flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu {
    pub pc: usize,
    pub sp: usize, // grows down from memory_size
    pub acc: u64,
    pub gpr: Vec<u64>, // R1..Rn
    pub flags: Flags,
}

bitflags! {
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Flags: u8 {
const C = 1 << 0; // Carry / borrow / last bit shifted out
const V = 1 << 1; // Signed overflow
const Z = 1 << 2; // Zero
const N = 1 << 3; // Negative
}
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    #[error("invalid instruction encoding (opcode {opcode}, mode {mode})")]
    InvalidOpcode { opcode: u8, mode: u8 },
    #[error("address {addr} is outside memory")]
    InvalidAddress { addr: i64 },
    #[error("register {reg} does not exist")]
    InvalidRegister { reg: u8 },
    #[error("stack overflow (sp = {sp})")]
    StackOverflow { sp: usize },
    #[error("return with an empty call stack")]
    StackUnderflow,
    #[error("division by zero")]
    DivisionByZero,
    #[error("negative shift count {amount}")]
    NegativeShift { amount: i64 },
}

/// A runtime error, pinned to the instruction that raised it.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[error("fault at pc {pc} (word {word:#x}): {kind}")]
pub struct Fault {
    pub pc: usize,
    pub word: u64,
    pub kind: FaultKind,
}

impl Cpu {
    pub fn new(register_count: u8, sp: usize) -> Self {
        Self {
            pc: 0,
            sp,
            acc: 0,
            gpr: vec![0; register_count as usize],
            flags: Flags::empty(),
        }
    }

    pub fn reset(&mut self, entry: usize, sp: usize) {
        self.pc = entry;
        self.sp = sp;
        self.acc = 0;
        self.gpr.iter_mut().for_each(|r| *r = 0);
        self.flags = Flags::empty();
    }

    pub fn reg(&self, id: u8) -> Result<u64, FaultKind> {
        match id {
            0 => Ok(self.acc),
            n => self
                .gpr
                .get(n as usize - 1)
                .copied()
                .ok_or(FaultKind::InvalidRegister { reg: n }),
        }
    }

    pub fn set_reg(&mut self, id: u8, val: u64) -> Result<(), FaultKind> {
        match id {
            0 => self.acc = val,
            n => {
                let slot = self
                    .gpr
                    .get_mut(n as usize - 1)
                    .ok_or(FaultKind::InvalidRegister { reg: n })?;
                *slot = val;
            }
        }
        Ok(())
    }

    /// Sets Z and N from a signed result.
    pub fn set_zn(&mut self, value: i64) {
        self.flags.set(Flags::Z, value == 0);
        self.flags.set(Flags::N, value < 0);
    }
}

pub fn register_name(id: u8) -> String {
    match id {
        0 => "ACC".to_string(),
        n => format!("R{n}"),
    }
}

/// Parses `ACC`, `Rn`, `REGn` or `REGISTERn`, with an optional `%` prefix.
///
/// Returns the register id without checking it against a register count;
/// `R0` is rejected since general purpose registers start at 1.
pub fn parse_register(text: &str) -> Option<u8> {
    let t = text.trim();
    let t = t.strip_prefix('%').unwrap_or(t).to_ascii_uppercase();
    if t == "ACC" || t == "ACCUMULATOR" {
        return Some(0);
    }
    let digits = ["REGISTER", "REG", "R"]
        .iter()
        .find_map(|prefix| t.strip_prefix(prefix))?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match digits.parse::<u8>() {
        Ok(0) | Err(_) => None,
        Ok(n) => Some(n),
    }
}
