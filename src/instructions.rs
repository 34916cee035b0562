use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::decoder::{Mode, Op};
use crate::exec::{self, Transition};

bitflags! {
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Modes: u8 {
const IMPLIED = 1 << 0;
const IMMEDIATE = 1 << 1;
const DIRECT = 1 << 2;
const INDIRECT = 1 << 3;
const INDEXED = 1 << 4;
const REGISTER = 1 << 5;
}
}

impl Modes {
    pub const VALUE: Modes = Modes::IMMEDIATE
        .union(Modes::DIRECT)
        .union(Modes::INDIRECT)
        .union(Modes::INDEXED)
        .union(Modes::REGISTER);
    pub const LOCATION: Modes = Modes::VALUE.difference(Modes::IMMEDIATE);
    pub const TARGET: Modes = Modes::LOCATION;
}

impl Mode {
    pub fn flag(self) -> Modes {
        match self {
            Mode::Implied => Modes::IMPLIED,
            Mode::Immediate => Modes::IMMEDIATE,
            Mode::Direct => Modes::DIRECT,
            Mode::Indirect => Modes::INDIRECT,
            Mode::Indexed => Modes::INDEXED,
            Mode::Register => Modes::REGISTER,
        }
    }
}

/// How the executor interprets the resolved operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    None,
    Value,    // the operand's value
    Location, // a writable cell or register
    Target,   // a code address
}

#[derive(Debug, Clone, Copy)]
pub struct InstrDesc {
    pub op: Op,
    pub mnemonic: &'static str,
    pub role: Role,
    pub modes: Modes,
    pub dst: bool, // accepts a second, register operand
    pub min_operands: u8,
    pub max_operands: u8,
    pub exec: Transition,
}

macro_rules! implied {
    ($op:ident, $mn:literal, $exec:ident) => {
        InstrDesc {
            op: Op::$op,
            mnemonic: $mn,
            role: Role::None,
            modes: Modes::IMPLIED,
            dst: false,
            min_operands: 0,
            max_operands: 0,
            exec: exec::$exec,
        }
    };
}

/// `OP src[, dst]` where dst defaults to ACC.
macro_rules! binary {
    ($op:ident, $mn:literal, $role:ident, $modes:ident, $exec:ident) => {
        InstrDesc {
            op: Op::$op,
            mnemonic: $mn,
            role: Role::$role,
            modes: Modes::$modes,
            dst: true,
            min_operands: 1,
            max_operands: 2,
            exec: exec::$exec,
        }
    };
    ($op:ident, $mn:literal, $exec:ident) => {
        binary!($op, $mn, Value, VALUE, $exec)
    };
}

macro_rules! branch {
    ($op:ident, $mn:literal, $exec:ident) => {
        branch!($op, $mn, false, 1, $exec)
    };
    ($op:ident, $mn:literal, tests_register, $exec:ident) => {
        branch!($op, $mn, true, 2, $exec)
    };
    ($op:ident, $mn:literal, $dst:expr, $max:expr, $exec:ident) => {
        InstrDesc {
            op: Op::$op,
            mnemonic: $mn,
            role: Role::Target,
            modes: Modes::TARGET,
            dst: $dst,
            min_operands: 1,
            max_operands: $max,
            exec: exec::$exec,
        }
    };
}

/// I/O with an optional operand defaulting to ACC.
macro_rules! io {
    ($op:ident, $mn:literal, $role:ident, $modes:ident, $exec:ident) => {
        InstrDesc {
            op: Op::$op,
            mnemonic: $mn,
            role: Role::$role,
            modes: Modes::$modes,
            dst: false,
            min_operands: 0,
            max_operands: 1,
            exec: exec::$exec,
        }
    };
}

/// Indexed by opcode.
pub const TABLE: &[InstrDesc] = &[
    implied!(Hlt, "HLT", hlt),
    binary!(Add, "ADD", add),
    binary!(Sub, "SUB", sub),
    binary!(Sta, "STA", Location, LOCATION, sta),
    implied!(Nop, "NOP", nop),
    binary!(Lda, "LDA", lda),
    branch!(Bra, "BRA", bra),
    branch!(Brz, "BRZ", tests_register, brz),
    branch!(Brp, "BRP", tests_register, brp),
    io!(Inp, "INP", Location, LOCATION, inp),
    io!(Out, "OUT", Value, VALUE, out),
    io!(Outc, "OUTC", Value, VALUE, outc),
    io!(Outb, "OUTB", Value, VALUE, outb),
    binary!(And, "AND", and),
    binary!(Or, "OR", or),
    binary!(Not, "NOT", not),
    binary!(Xor, "XOR", xor),
    binary!(Lsl, "LSL", lsl),
    binary!(Lsr, "LSR", lsr),
    binary!(Asl, "ASL", asl),
    binary!(Asr, "ASR", asr),
    binary!(Csl, "CSL", csl),
    binary!(Csr, "CSR", csr),
    binary!(Cslc, "CSLC", cslc),
    binary!(Csrc, "CSRC", csrc),
    branch!(Call, "CALL", call),
    implied!(Ret, "RET", ret),
    binary!(Cmp, "CMP", cmp),
    branch!(Beq, "BEQ", beq),
    branch!(Bne, "BNE", bne),
    branch!(Blt, "BLT", blt),
    branch!(Bgt, "BGT", bgt),
    binary!(Mul, "MUL", mul),
    binary!(Div, "DIV", div),
    binary!(Mod, "MOD", modulo),
];

/// Data directives handled by the assembler rather than the table.
pub const DIRECTIVES: &[&str] = &["DAT", "RES"];

pub fn describe(op: Op) -> &'static InstrDesc {
    &TABLE[op.opcode() as usize]
}

pub fn lookup(mnemonic: &str) -> Option<&'static InstrDesc> {
    TABLE
        .iter()
        .find(|d| d.mnemonic.eq_ignore_ascii_case(mnemonic))
}

pub fn is_reserved(word: &str) -> bool {
    lookup(word).is_some() || DIRECTIVES.iter().any(|d| d.eq_ignore_ascii_case(word))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_indexed_by_opcode() {
        for (i, desc) in TABLE.iter().enumerate() {
            assert_eq!(desc.op.opcode() as usize, i, "{}", desc.mnemonic);
        }
    }

    #[test]
    fn mode_sets() {
        assert!(!Modes::LOCATION.contains(Modes::IMMEDIATE));
        assert!(lookup("sta").unwrap().modes.contains(Modes::INDEXED));
        assert_eq!(lookup("RET").unwrap().modes, Modes::IMPLIED);
        assert!(is_reserved("dat"));
        assert!(!is_reserved("LOOP"));
    }
}
