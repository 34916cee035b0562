use bitvec::prelude::*;

use crate::cpu::{Cpu, FaultKind, Flags};
use crate::decoder::{Decoded, Layout, Mode};
use crate::instructions::Role;
use crate::io::OutputEvent;
use crate::memory::{Bus, LinearMemory};

pub type Transition = fn(&mut Machine, Effective) -> Result<Flow, FaultKind>;

/// Everything a transition function may touch.
#[derive(Debug, Clone)]
pub struct Machine {
    pub cpu: Cpu,
    pub mem: LinearMemory,
    pub layout: Layout,
    pub stack_base: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Memory(usize),
    Register(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    None,
    Value(i64),
    Location(Location),
    Target(usize),
}

/// A resolved operand plus the instruction's register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Effective {
    pub operand: Operand,
    pub dst: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Halt,
    Output(OutputEvent),
    Input(Location),
}

impl Machine {
    pub fn signed(&self, raw: u64) -> i64 {
        self.layout.to_signed(raw)
    }

    pub fn reg_value(&self, id: u8) -> Result<i64, FaultKind> {
        Ok(self.signed(self.cpu.reg(id)?))
    }

    pub fn store(&mut self, loc: Location, value: i64) -> Result<(), FaultKind> {
        let raw = self.layout.to_word(value);
        match loc {
            Location::Memory(addr) => self.mem.write(addr, raw),
            Location::Register(id) => self.cpu.set_reg(id, raw),
        }
    }

    pub fn load(&self, loc: Location) -> Result<i64, FaultKind> {
        match loc {
            Location::Memory(addr) => Ok(self.signed(self.mem.read(addr)?)),
            Location::Register(id) => self.reg_value(id),
        }
    }

    fn locate(&self, d: &Decoded) -> Result<Location, FaultKind> {
        Ok(match d.mode {
            Mode::Register => Location::Register(d.operand as u8),
            Mode::Indirect => {
                let a = self.mem.check(d.operand)?;
                let ptr = self.signed(self.mem.read(a)?);
                Location::Memory(self.mem.check(ptr)?)
            }
            Mode::Indexed => {
                let offset = self.reg_value(d.idx)?;
                Location::Memory(self.mem.check(d.operand.wrapping_add(offset))?)
            }
            _ => Location::Memory(self.mem.check(d.operand)?),
        })
    }

    /// Turns the decoded operand into what the instruction's role asks for.
    pub fn resolve(&self, role: Role, d: &Decoded) -> Result<Operand, FaultKind> {
        Ok(match role {
            Role::None => Operand::None,
            Role::Value => match d.mode {
                Mode::Immediate => Operand::Value(d.operand),
                Mode::Implied => Operand::None,
                _ => Operand::Value(self.load(self.locate(d)?)?),
            },
            Role::Location => Operand::Location(self.locate(d)?),
            Role::Target => match self.locate(d)? {
                Location::Memory(addr) => Operand::Target(addr),
                Location::Register(id) => Operand::Target(self.mem.check(self.reg_value(id)?)?),
            },
        })
    }

    fn dst_write(&mut self, dst: u8, value: i64) -> Result<(), FaultKind> {
        self.store(Location::Register(dst), value)?;
        let stored = self.reg_value(dst)?;
        self.cpu.set_zn(stored);
        Ok(())
    }

    fn jump_if(&mut self, e: Effective, cond: bool) -> Result<Flow, FaultKind> {
        if cond {
            self.cpu.pc = target(e);
        }
        Ok(Flow::Continue)
    }
}

fn value(e: Effective) -> i64 {
    match e.operand {
        Operand::Value(v) => v,
        _ => 0,
    }
}

fn target(e: Effective) -> usize {
    match e.operand {
        Operand::Target(t) => t,
        _ => 0,
    }
}

fn location(e: Effective) -> Location {
    match e.operand {
        Operand::Location(loc) => loc,
        _ => Location::Register(0),
    }
}

pub fn hlt(_m: &mut Machine, _e: Effective) -> Result<Flow, FaultKind> {
    Ok(Flow::Halt)
}

pub fn nop(_m: &mut Machine, _e: Effective) -> Result<Flow, FaultKind> {
    Ok(Flow::Continue)
}

pub fn lda(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    m.dst_write(e.dst, value(e))?;
    Ok(Flow::Continue)
}

pub fn sta(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let v = m.reg_value(e.dst)?;
    m.store(location(e), v)?;
    Ok(Flow::Continue)
}

// Arithmetic

/// Stores a wide result into dst, wrapping to the word and updating all four flags.
fn arith_store(m: &mut Machine, dst: u8, wide: i128, carry: bool) -> Result<(), FaultKind> {
    let wrapped = m.signed(wide as u64);
    m.dst_write(dst, wrapped)?;
    m.cpu.flags.set(Flags::C, carry);
    m.cpu.flags.set(Flags::V, wide != wrapped as i128);
    Ok(())
}

fn subtract_flags(m: &mut Machine, a: i64, b: i64) -> (i128, bool) {
    let borrow = m.layout.to_word(a) < m.layout.to_word(b);
    (a as i128 - b as i128, borrow)
}

pub fn add(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let (a, b) = (m.reg_value(e.dst)?, value(e));
    let unsigned = m.layout.to_word(a) as u128 + m.layout.to_word(b) as u128;
    let carry = unsigned > m.layout.word_mask() as u128;
    arith_store(m, e.dst, a as i128 + b as i128, carry)?;
    Ok(Flow::Continue)
}

pub fn sub(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let a = m.reg_value(e.dst)?;
    let (wide, borrow) = subtract_flags(m, a, value(e));
    arith_store(m, e.dst, wide, borrow)?;
    Ok(Flow::Continue)
}

pub fn cmp(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let a = m.reg_value(e.dst)?;
    let (wide, borrow) = subtract_flags(m, a, value(e));
    let wrapped = m.signed(wide as u64);
    m.cpu.set_zn(wrapped);
    m.cpu.flags.set(Flags::C, borrow);
    m.cpu.flags.set(Flags::V, wide != wrapped as i128);
    Ok(Flow::Continue)
}

pub fn mul(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let a = m.reg_value(e.dst)?;
    let wide = a as i128 * value(e) as i128;
    let carry = m.cpu.flags.contains(Flags::C);
    arith_store(m, e.dst, wide, carry)?;
    Ok(Flow::Continue)
}

fn divide(m: &mut Machine, e: Effective, rem: bool) -> Result<Flow, FaultKind> {
    let (a, b) = (m.reg_value(e.dst)?, value(e));
    if b == 0 {
        return Err(FaultKind::DivisionByZero);
    }
    let (a, b) = (a as i128, b as i128);
    let wide = if rem { a % b } else { a / b };
    let carry = m.cpu.flags.contains(Flags::C);
    arith_store(m, e.dst, wide, carry)?;
    Ok(Flow::Continue)
}

pub fn div(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    divide(m, e, false)
}

pub fn modulo(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    divide(m, e, true)
}

// Logic

fn logic(m: &mut Machine, e: Effective, f: fn(u64, u64) -> u64) -> Result<Flow, FaultKind> {
    let a = m.cpu.reg(e.dst)?;
    let b = m.layout.to_word(value(e));
    let res = f(a, b) & m.layout.word_mask();
    let v = m.signed(res);
    m.dst_write(e.dst, v)?;
    Ok(Flow::Continue)
}

pub fn and(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    logic(m, e, |a, b| a & b)
}

pub fn or(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    logic(m, e, |a, b| a | b)
}

pub fn xor(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    logic(m, e, |a, b| a ^ b)
}

pub fn not(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    logic(m, e, |_, b| !b)
}

// Shifts and rotates, applied one bit at a time

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shift {
    Lsl,
    Lsr,
    Asl,
    Asr,
    Csl,
    Csr,
    Cslc,
    Csrc,
}

fn shift(m: &mut Machine, e: Effective, kind: Shift) -> Result<Flow, FaultKind> {
    let amount = value(e);
    if amount < 0 {
        return Err(FaultKind::NegativeShift { amount });
    }
    let width = m.layout.word_width;
    let mask = m.layout.word_mask();
    let msb = 1u64 << (width - 1);
    // past these counts the result repeats (or is fully shifted out)
    let steps = match kind {
        Shift::Csl | Shift::Csr => amount as u64 % width as u64,
        Shift::Cslc | Shift::Csrc => amount as u64 % (width as u64 + 1),
        _ => (amount as u64).min(width as u64 + 1),
    };

    let mut raw = m.cpu.reg(e.dst)?;
    let mut carry = m.cpu.flags.contains(Flags::C);
    let mut overflow = false;
    for _ in 0..steps {
        let top = raw & msb != 0;
        let bottom = raw & 1 != 0;
        raw = match kind {
            Shift::Lsl | Shift::Asl => (raw << 1) & mask,
            Shift::Lsr => raw >> 1,
            Shift::Asr => (raw >> 1) | (raw & msb),
            Shift::Csl => ((raw << 1) & mask) | top as u64,
            Shift::Csr => (raw >> 1) | ((bottom as u64) << (width - 1)),
            Shift::Cslc => ((raw << 1) & mask) | carry as u64,
            Shift::Csrc => (raw >> 1) | ((carry as u64) << (width - 1)),
        };
        match kind {
            Shift::Lsl | Shift::Asl | Shift::Cslc => carry = top,
            Shift::Lsr | Shift::Asr | Shift::Csrc => carry = bottom,
            Shift::Csl | Shift::Csr => {}
        }
        if kind == Shift::Asl && (raw & msb != 0) != top {
            overflow = true;
        }
    }

    let v = m.signed(raw);
    m.dst_write(e.dst, v)?;
    m.cpu.flags.set(Flags::C, carry);
    if kind == Shift::Asl {
        m.cpu.flags.set(Flags::V, overflow);
    }
    Ok(Flow::Continue)
}

pub fn lsl(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    shift(m, e, Shift::Lsl)
}

pub fn lsr(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    shift(m, e, Shift::Lsr)
}

pub fn asl(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    shift(m, e, Shift::Asl)
}

pub fn asr(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    shift(m, e, Shift::Asr)
}

pub fn csl(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    shift(m, e, Shift::Csl)
}

pub fn csr(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    shift(m, e, Shift::Csr)
}

pub fn cslc(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    shift(m, e, Shift::Cslc)
}

pub fn csrc(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    shift(m, e, Shift::Csrc)
}

// Control flow

pub fn bra(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    m.jump_if(e, true)
}

pub fn brz(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let v = m.reg_value(e.dst)?;
    m.jump_if(e, v == 0)
}

pub fn brp(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let v = m.reg_value(e.dst)?;
    m.jump_if(e, v >= 0)
}

pub fn beq(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let z = m.cpu.flags.contains(Flags::Z);
    m.jump_if(e, z)
}

pub fn bne(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let z = m.cpu.flags.contains(Flags::Z);
    m.jump_if(e, !z)
}

pub fn blt(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let f = m.cpu.flags;
    m.jump_if(e, f.contains(Flags::N) != f.contains(Flags::V))
}

pub fn bgt(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let f = m.cpu.flags;
    let taken = !f.contains(Flags::Z) && f.contains(Flags::N) == f.contains(Flags::V);
    m.jump_if(e, taken)
}

pub fn call(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let sp = m.cpu.sp;
    if sp <= m.stack_base {
        return Err(FaultKind::StackOverflow { sp });
    }
    // pc already points past the CALL
    let ret = m.layout.to_word(m.cpu.pc as i64);
    m.mem.write(sp - 1, ret)?;
    m.cpu.sp = sp - 1;
    m.cpu.pc = target(e);
    Ok(Flow::Continue)
}

pub fn ret(m: &mut Machine, _e: Effective) -> Result<Flow, FaultKind> {
    let sp = m.cpu.sp;
    if sp >= m.mem.size() {
        return Err(FaultKind::StackUnderflow);
    }
    let addr = m.signed(m.mem.read(sp)?);
    m.cpu.pc = m.mem.check(addr)?;
    m.cpu.sp = sp + 1;
    Ok(Flow::Continue)
}

// I/O

pub fn inp(_m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    Ok(Flow::Input(location(e)))
}

pub fn out(_m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    Ok(Flow::Output(OutputEvent::Number(value(e))))
}

pub fn outc(_m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let c = u32::try_from(value(e))
        .ok()
        .and_then(char::from_u32)
        .unwrap_or(char::REPLACEMENT_CHARACTER);
    Ok(Flow::Output(OutputEvent::Char(c)))
}

pub fn outb(m: &mut Machine, e: Effective) -> Result<Flow, FaultKind> {
    let raw = m.layout.to_word(value(e));
    let width = m.layout.word_width as usize;
    let bits = raw.view_bits::<Lsb0>();
    let text = bits[..width]
        .iter()
        .rev()
        .map(|b| if *b { '1' } else { '0' })
        .collect();
    Ok(Flow::Output(OutputEvent::Binary(text)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;

    fn machine(width: u8) -> Machine {
        let cfg = MachineConfig {
            word_width: width,
            register_count: 1,
            memory_size: 32,
            stack_region: 4,
            ..MachineConfig::default()
        };
        let layout = cfg.validate().unwrap();
        Machine {
            cpu: Cpu::new(cfg.register_count, cfg.memory_size),
            mem: LinearMemory::new(cfg.memory_size, layout.word_mask()),
            layout,
            stack_base: cfg.stack_base(),
        }
    }

    fn with_value(v: i64) -> Effective {
        Effective {
            operand: Operand::Value(v),
            dst: 0,
        }
    }

    #[test]
    fn add_wraps_and_sets_overflow() {
        let mut m = machine(16);
        m.cpu.acc = 0x7fff;
        add(&mut m, with_value(1)).unwrap();
        assert_eq!(m.cpu.acc, 0x8000);
        assert!(m.cpu.flags.contains(Flags::V | Flags::N));
        assert!(!m.cpu.flags.contains(Flags::C));
    }

    #[test]
    fn add_carry_out() {
        let mut m = machine(16);
        m.cpu.acc = 0xffff; // -1
        add(&mut m, with_value(1)).unwrap();
        assert_eq!(m.cpu.acc, 0);
        assert!(m.cpu.flags.contains(Flags::C | Flags::Z));
        assert!(!m.cpu.flags.contains(Flags::V));
    }

    #[test]
    fn outb_renders_full_width() {
        let mut m = machine(16);
        let flow = outb(&mut m, with_value(5)).unwrap();
        assert_eq!(
            flow,
            Flow::Output(OutputEvent::Binary("0000000000000101".into()))
        );
    }

    #[test]
    fn lsr_saturates() {
        let mut m = machine(16);
        m.cpu.acc = 0x8001;
        lsr(&mut m, with_value(40)).unwrap();
        assert_eq!(m.cpu.acc, 0);
        assert!(!m.cpu.flags.contains(Flags::C));
    }
}
