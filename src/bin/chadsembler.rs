use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chadsembler::{assemble, disasm, BufferedIo, MachineConfig, OutputEvent, StepResult, Vm};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Assemble and run a Chadsembler program"
)]
struct Opts {
    #[arg(value_name = "SOURCE")]
    source: PathBuf,
    /// Number of memory cells
    #[arg(long)]
    memory_size: Option<usize>,
    /// Number of general purpose registers (R1..Rn)
    #[arg(long)]
    registers: Option<u8>,
    /// Milliseconds to wait between instructions
    #[arg(long)]
    clock_speed: Option<u64>,
    /// Cells reserved at the top of memory for the call stack
    #[arg(long)]
    stack_region: Option<usize>,
    /// Bits per memory cell
    #[arg(long)]
    word_width: Option<u8>,
    /// Stop after this many instructions
    #[arg(long, default_value_t = 1_000_000u64)]
    max_cycles: u64,
    /// Queue an input value; repeat for more. Stdin is read once the queue is empty.
    #[arg(short, long = "input", value_name = "N", allow_hyphen_values = true)]
    inputs: Vec<i64>,
    /// Print the assembled listing before running
    #[arg(long)]
    listing: bool,
    /// Print the final machine state as JSON
    #[arg(long)]
    dump_state: bool,
}

impl Opts {
    fn config(&self) -> MachineConfig {
        let mut cfg = MachineConfig::default();
        if let Some(v) = self.memory_size {
            cfg.memory_size = v;
        }
        if let Some(v) = self.registers {
            cfg.register_count = v;
        }
        if let Some(v) = self.clock_speed {
            cfg.clock_speed = v;
        }
        if let Some(v) = self.stack_region {
            cfg.stack_region = v;
        }
        if let Some(v) = self.word_width {
            cfg.word_width = v;
        }
        cfg
    }
}

fn print_events(events: Vec<OutputEvent>) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for event in events {
        write!(stdout, "{event}")?;
    }
    stdout.flush()?;
    Ok(())
}

/// Prompts until a valid integer arrives; `None` on end of input.
fn read_input() -> Result<Option<i64>> {
    let stdin = std::io::stdin();
    loop {
        eprint!("input> ");
        std::io::stderr().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(None);
        }
        match line.trim().parse::<i64>() {
            Ok(v) => return Ok(Some(v)),
            Err(_) => eprintln!("`{}` is not an integer", line.trim()),
        }
    }
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let source = std::fs::read_to_string(&opts.source)
        .with_context(|| format!("reading {}", opts.source.display()))?;

    let program = match assemble(&source, &opts.config()) {
        Ok(p) => p,
        Err(err) => {
            eprintln!("{err}");
            return Ok(ExitCode::from(1));
        }
    };
    if opts.listing {
        print!("{}", disasm::listing(&program)?);
    }

    let clock = Duration::from_millis(program.config.clock_speed);
    let mut vm = Vm::load_with_io(
        &program,
        &program.config,
        BufferedIo::with_input(opts.inputs.iter().copied()),
    )?;

    let code = loop {
        if vm.cycles() >= opts.max_cycles {
            eprintln!("stopped after {} instructions", vm.cycles());
            break 3;
        }
        let result = vm.step();
        print_events(vm.io_mut().take_output())?;
        match result {
            StepResult::Continue => {
                if !clock.is_zero() {
                    std::thread::sleep(clock);
                }
            }
            StepResult::Halted => break 0,
            StepResult::Faulted(fault) => {
                eprintln!("FAULT: {fault}");
                break 2;
            }
            StepResult::NeedsInput => match read_input()? {
                Some(v) => vm.resume_with_input(v)?,
                None => {
                    eprintln!("input exhausted");
                    break 3;
                }
            },
        }
    };

    if opts.dump_state {
        println!("{}", serde_json::to_string_pretty(&vm.snapshot())?);
    }
    Ok(ExitCode::from(code))
}
