pub mod assembler;
pub mod config;
pub mod cpu;
pub mod decoder;
pub mod disasm;
pub mod exec;
pub mod instructions;
pub mod io;
pub mod lexer;
pub mod memory;
pub mod program;
pub mod vm;

pub use assembler::{assemble, AsmErrorKind, AssemblyError, Diagnostic};
pub use config::{ConfigError, MachineConfig};
pub use cpu::{Cpu, Fault, FaultKind, Flags};
pub use io::{BufferedIo, IoChannel, OutputEvent};
pub use memory::{Bus, LinearMemory};
pub use program::Program;
pub use vm::{RunOutcome, RunResult, Snapshot, Status, StepResult, Vm, VmError};
