use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::{ConfigError, MachineConfig};
use crate::cpu::{Cpu, Fault, FaultKind, Flags};
use crate::decoder::WordCodec;
use crate::exec::{Effective, Flow, Location, Machine};
use crate::instructions;
use crate::io::{BufferedIo, IoChannel};
use crate::memory::{Bus, LinearMemory};
use crate::program::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Ready,
    Running,
    Halted,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    Continue,
    Halted,
    Faulted(Fault),
    NeedsInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Halted,
    Faulted(Fault),
    NeedsInput,
    BudgetExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub cycles: u64, // instructions executed by this call
}

/// Everything observable about a VM, with cells and registers as signed values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub memory: Vec<i64>,
    pub acc: i64,
    pub registers: Vec<i64>, // R1..Rn
    pub pc: usize,
    pub sp: usize,
    pub flags: Flags,
    pub status: Status,
    pub fault: Option<Fault>,
    pub cycles: u64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("invalid machine configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("program was assembled for a different machine: {0}")]
    ConfigMismatch(String),
    #[error("program occupies {len} cells but the stack starts at {stack_base}")]
    ImageOverlapsStack { len: usize, stack_base: usize },
    #[error("the machine is not waiting for input")]
    NotAwaitingInput,
    #[error("address {addr} is outside memory of {size} cells")]
    AddressOutOfRange { addr: usize, size: usize },
}

pub struct Vm<I: IoChannel = BufferedIo> {
    machine: Machine,
    codec: WordCodec,
    config: MachineConfig,
    io: I,
    status: Status,
    fault: Option<Fault>,
    pending_input: Option<Location>,
    cycles: u64,
}

impl Vm<BufferedIo> {
    pub fn load(program: &Program, config: &MachineConfig) -> Result<Self, VmError> {
        Self::load_with_io(program, config, BufferedIo::default())
    }

    pub fn from_program(program: &Program) -> Result<Self, VmError> {
        Self::load(program, &program.config)
    }
}

impl<I: IoChannel> Vm<I> {
    pub fn load_with_io(program: &Program, config: &MachineConfig, io: I) -> Result<Self, VmError> {
        let layout = config.validate()?;
        let built_for = program.layout()?;
        if layout != built_for || config.memory_size != program.config.memory_size {
            return Err(VmError::ConfigMismatch(format!(
                "{} cells of {} bits with {} registers, program expects {} cells of {} bits with {} registers",
                config.memory_size,
                layout.word_width,
                layout.register_count,
                program.config.memory_size,
                built_for.word_width,
                built_for.register_count,
            )));
        }
        if program.memory.len() != config.memory_size {
            return Err(VmError::ConfigMismatch(format!(
                "image holds {} cells, machine has {}",
                program.memory.len(),
                config.memory_size
            )));
        }
        let stack_base = config.stack_base();
        if program.len > stack_base {
            return Err(VmError::ImageOverlapsStack {
                len: program.len,
                stack_base,
            });
        }

        let mut cpu = Cpu::new(config.register_count, config.memory_size);
        cpu.pc = program.entry;
        let machine = Machine {
            cpu,
            mem: LinearMemory::from_image(&program.memory, layout.word_mask()),
            layout,
            stack_base,
        };
        debug!(
            memory = config.memory_size,
            registers = config.register_count,
            width = layout.word_width,
            stack = config.stack_region,
            "vm loaded"
        );
        Ok(Self {
            machine,
            codec: WordCodec::new(layout),
            config: *config,
            io,
            status: Status::Ready,
            fault: None,
            pending_input: None,
            cycles: 0,
        })
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn fault(&self) -> Option<Fault> {
        self.fault
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn cpu(&self) -> &Cpu {
        &self.machine.cpu
    }

    pub fn io(&self) -> &I {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    pub fn awaiting_input(&self) -> bool {
        self.pending_input.is_some()
    }

    pub fn acc(&self) -> i64 {
        self.machine.signed(self.machine.cpu.acc)
    }

    /// Signed value of a cell.
    pub fn peek(&self, addr: usize) -> Result<i64, VmError> {
        self.machine
            .mem
            .read(addr)
            .map(|raw| self.machine.signed(raw))
            .map_err(|_| self.out_of_range(addr))
    }

    pub fn poke(&mut self, addr: usize, value: i64) -> Result<(), VmError> {
        self.machine
            .store(Location::Memory(addr), value)
            .map_err(|_| self.out_of_range(addr))
    }

    fn out_of_range(&self, addr: usize) -> VmError {
        VmError::AddressOutOfRange {
            addr,
            size: self.machine.mem.size(),
        }
    }

    /// Executes one instruction.
    pub fn step(&mut self) -> StepResult {
        match self.status {
            Status::Halted => return StepResult::Halted,
            Status::Faulted => {
                if let Some(fault) = self.fault {
                    return StepResult::Faulted(fault);
                }
                return StepResult::Halted;
            }
            Status::Ready => self.status = Status::Running,
            Status::Running => {}
        }

        if let Some(loc) = self.pending_input {
            return match self.io.provide_input() {
                Some(value) => self.deliver(loc, value),
                None => StepResult::NeedsInput,
            };
        }

        let pc = self.machine.cpu.pc;
        let word = match self.machine.mem.read(pc) {
            Ok(word) => word,
            Err(kind) => return self.raise(pc, 0, kind),
        };
        match self.execute(pc, word) {
            Ok(flow) => self.apply(flow),
            Err(kind) => self.raise(pc, word, kind),
        }
    }

    /// Every fetched word costs a cycle, including one that fails to decode.
    fn execute(&mut self, pc: usize, word: u64) -> Result<Flow, FaultKind> {
        self.cycles += 1;
        let d = self.codec.decode(word)?;
        let desc = instructions::describe(d.op);
        trace!(pc, op = desc.mnemonic, mode = d.mode.name(), operand = d.operand, dst = d.dst, "exec");
        self.machine.cpu.pc = pc + 1;
        let operand = self.machine.resolve(desc.role, &d)?;
        (desc.exec)(&mut self.machine, Effective { operand, dst: d.dst })
    }

    fn apply(&mut self, flow: Flow) -> StepResult {
        match flow {
            Flow::Continue => StepResult::Continue,
            Flow::Halt => {
                self.status = Status::Halted;
                info!(cycles = self.cycles, "halted");
                StepResult::Halted
            }
            Flow::Output(event) => {
                self.io.consume_output(event);
                StepResult::Continue
            }
            Flow::Input(loc) => match self.io.provide_input() {
                Some(value) => self.deliver(loc, value),
                None => {
                    self.pending_input = Some(loc);
                    StepResult::NeedsInput
                }
            },
        }
    }

    fn deliver(&mut self, loc: Location, value: i64) -> StepResult {
        self.pending_input = None;
        match self.machine.store(loc, value) {
            Ok(()) => StepResult::Continue,
            // the IN instruction already advanced pc
            Err(kind) => {
                let pc = self.machine.cpu.pc.saturating_sub(1);
                let word = self.machine.mem.read(pc).unwrap_or(0);
                self.raise(pc, word, kind)
            }
        }
    }

    fn raise(&mut self, pc: usize, word: u64, kind: FaultKind) -> StepResult {
        let fault = Fault { pc, word, kind };
        warn!(%fault, "faulted");
        self.status = Status::Faulted;
        self.fault = Some(fault);
        StepResult::Faulted(fault)
    }

    /// Completes a suspended IN with `value`, masked to the word width.
    pub fn resume_with_input(&mut self, value: i64) -> Result<(), VmError> {
        let loc = self.pending_input.ok_or(VmError::NotAwaitingInput)?;
        self.deliver(loc, value);
        Ok(())
    }

    /// Steps until a terminal state, a pending input or `max_cycles` instructions.
    pub fn run(&mut self, max_cycles: u64) -> RunResult {
        let start = self.cycles;
        let outcome = loop {
            match self.status {
                Status::Halted => break RunOutcome::Halted,
                Status::Faulted => {
                    if let Some(fault) = self.fault {
                        break RunOutcome::Faulted(fault);
                    }
                    break RunOutcome::Halted;
                }
                _ => {}
            }
            if self.cycles - start >= max_cycles {
                break RunOutcome::BudgetExhausted;
            }
            match self.step() {
                StepResult::Continue => {}
                StepResult::Halted => break RunOutcome::Halted,
                StepResult::Faulted(fault) => break RunOutcome::Faulted(fault),
                StepResult::NeedsInput => break RunOutcome::NeedsInput,
            }
        };
        RunResult {
            outcome,
            cycles: self.cycles - start,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        let m = &self.machine;
        Snapshot {
            memory: m.mem.cells.iter().map(|&raw| m.signed(raw)).collect(),
            acc: m.signed(m.cpu.acc),
            registers: m.cpu.gpr.iter().map(|&raw| m.signed(raw)).collect(),
            pc: m.cpu.pc,
            sp: m.cpu.sp,
            flags: m.cpu.flags,
            status: self.status,
            fault: self.fault,
            cycles: self.cycles,
        }
    }
}
