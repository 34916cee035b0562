use serde::{Deserialize, Serialize};

use crate::cpu::FaultKind;
use crate::instructions::{self, Role};

pub const OPCODE_BITS: u32 = 6;
pub const MODE_BITS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Op {
    Hlt = 0,
    Add = 1,
    Sub = 2,
    Sta = 3,
    Nop = 4,
    Lda = 5,
    Bra = 6,
    Brz = 7,
    Brp = 8,
    Inp = 9,
    Out = 10,
    Outc = 11,
    Outb = 12,
    And = 13,
    Or = 14,
    Not = 15,
    Xor = 16,
    Lsl = 17,
    Lsr = 18,
    Asl = 19,
    Asr = 20,
    Csl = 21,
    Csr = 22,
    Cslc = 23,
    Csrc = 24,
    Call = 25,
    Ret = 26,
    Cmp = 27,
    Beq = 28,
    Bne = 29,
    Blt = 30,
    Bgt = 31,
    Mul = 32,
    Div = 33,
    Mod = 34,
}

impl Op {
    pub fn opcode(self) -> u8 {
        self as u8
    }

    pub fn from_opcode(opcode: u8) -> Option<Op> {
        instructions::TABLE.get(opcode as usize).map(|desc| desc.op)
    }
}

/// Addressing mode as stored in the 3-bit mode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Mode {
    Implied = 0,
    Immediate = 1,
    Direct = 2,
    Indirect = 3,
    Indexed = 4,
    Register = 5,
}

impl Mode {
    pub fn from_bits(bits: u8) -> Option<Mode> {
        Some(match bits {
            0 => Mode::Implied,
            1 => Mode::Immediate,
            2 => Mode::Direct,
            3 => Mode::Indirect,
            4 => Mode::Indexed,
            5 => Mode::Register,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Implied => "implied",
            Mode::Immediate => "immediate",
            Mode::Direct => "direct",
            Mode::Indirect => "indirect",
            Mode::Indexed => "indexed",
            Mode::Register => "register",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decoded {
    pub op: Op,
    pub mode: Mode,
    pub dst: u8, // ACC = 0, R1..Rn = 1..n
    pub idx: u8, // index register, only meaningful for indexed mode
    pub operand: i64,
}

/// Bit layout of one instruction word, derived from a validated config.
///
/// Fields from the most significant end: opcode, mode, dst, index, operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub word_width: u32,
    pub register_count: u8,
    pub reg_bits: u32,
    pub operand_bits: u32,
}

pub fn mask_bits(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

pub fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits >= 64 {
        return raw as i64;
    }
    let s = 64 - bits;
    ((raw << s) as i64) >> s
}

/// Minimum number of bits needed to represent `n` (at least one).
pub fn bits_for(n: u64) -> u32 {
    (u64::BITS - n.leading_zeros()).max(1)
}

impl Layout {
    pub fn word_mask(&self) -> u64 {
        mask_bits(self.word_width)
    }

    pub fn to_word(&self, value: i64) -> u64 {
        (value as u64) & self.word_mask()
    }

    pub fn to_signed(&self, raw: u64) -> i64 {
        sign_extend(raw & self.word_mask(), self.word_width)
    }

    pub fn word_range(&self) -> (i128, i128) {
        signed_range(self.word_width)
    }

    pub fn immediate_range(&self) -> (i128, i128) {
        signed_range(self.operand_bits)
    }

    /// Largest unsigned value the operand field holds (addresses, register ids).
    pub fn operand_max(&self) -> u64 {
        mask_bits(self.operand_bits)
    }

    fn mode_shift(&self) -> u32 {
        self.word_width - OPCODE_BITS - MODE_BITS
    }

    fn dst_shift(&self) -> u32 {
        self.operand_bits + self.reg_bits
    }
}

fn signed_range(bits: u32) -> (i128, i128) {
    let half = 1i128 << (bits - 1);
    (-half, half - 1)
}

/// Packs and unpacks instruction words for one layout.
#[derive(Debug, Clone, Copy)]
pub struct WordCodec {
    pub layout: Layout,
}

impl WordCodec {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn encode(&self, d: &Decoded) -> u64 {
        let l = &self.layout;
        let reg_mask = mask_bits(l.reg_bits);
        let word = ((d.op.opcode() as u64) << (l.word_width - OPCODE_BITS))
            | ((d.mode as u64) << l.mode_shift())
            | (((d.dst as u64) & reg_mask) << l.dst_shift())
            | (((d.idx as u64) & reg_mask) << l.operand_bits)
            | ((d.operand as u64) & l.operand_max());
        word & l.word_mask()
    }

    /// Decodes a cell, rejecting anything the instruction table would not have produced.
    pub fn decode(&self, raw: u64) -> Result<Decoded, FaultKind> {
        let l = &self.layout;
        let raw = raw & l.word_mask();
        let opcode = (raw >> (l.word_width - OPCODE_BITS)) as u8;
        let mode_bits = ((raw >> l.mode_shift()) & mask_bits(MODE_BITS)) as u8;
        let invalid = FaultKind::InvalidOpcode { opcode, mode: mode_bits };

        let op = Op::from_opcode(opcode).ok_or(invalid)?;
        let mode = Mode::from_bits(mode_bits).ok_or(invalid)?;
        let desc = instructions::describe(op);
        if !desc.modes.contains(mode.flag()) {
            return Err(invalid);
        }

        let reg_mask = mask_bits(l.reg_bits);
        let dst = ((raw >> l.dst_shift()) & reg_mask) as u8;
        let idx = ((raw >> l.operand_bits) & reg_mask) as u8;
        let field = raw & l.operand_max();
        if !desc.dst && dst != 0 {
            return Err(invalid);
        }
        for reg in [dst, idx] {
            if reg > l.register_count {
                return Err(FaultKind::InvalidRegister { reg });
            }
        }

        let operand = match mode {
            Mode::Immediate => sign_extend(field, l.operand_bits),
            Mode::Implied => 0,
            _ => field as i64,
        };
        if mode == Mode::Register && operand > l.register_count as i64 {
            return Err(FaultKind::InvalidRegister {
                reg: u8::try_from(operand).unwrap_or(u8::MAX),
            });
        }
        if desc.role == Role::None && field != 0 {
            return Err(invalid);
        }
        Ok(Decoded { op, mode, dst, idx, operand })
    }
}
