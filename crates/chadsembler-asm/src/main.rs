use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use chadsembler::decoder::WordCodec;
use chadsembler::disasm::{fmt_decoded, listing};
use chadsembler::{assemble, MachineConfig};

mod model;
use model::{label_list, load_image, save_image};

#[derive(Parser, Debug)]
#[command(author, version, about = "Chadsembler assembler / disassembler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assemble a source file into a JSON program image
    Build {
        /// Input assembly file
        #[arg(short, long)]
        input: PathBuf,
        /// Output image (JSON)
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long)]
        memory_size: Option<usize>,
        #[arg(long)]
        registers: Option<u8>,
        #[arg(long)]
        stack_region: Option<usize>,
        #[arg(long)]
        word_width: Option<u8>,
        /// Export labels to JSON (Vec<{ addr, name }>)
        #[arg(long, value_name = "FILE")]
        labels_out: Option<PathBuf>,
    },
    /// Print a listing of a JSON program image
    Dis {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
        /// Output format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, serde::Serialize)]
struct ListingRow {
    addr: usize,
    word: u64,
    text: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Build {
            input,
            output,
            memory_size,
            registers,
            stack_region,
            word_width,
            labels_out,
        } => {
            let mut cfg = MachineConfig::default();
            cfg.memory_size = memory_size.unwrap_or(cfg.memory_size);
            cfg.register_count = registers.unwrap_or(cfg.register_count);
            cfg.stack_region = stack_region.unwrap_or(cfg.stack_region);
            cfg.word_width = word_width.unwrap_or(cfg.word_width);

            let src = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let program = match assemble(&src, &cfg) {
                Ok(p) => p,
                Err(e) => anyhow::bail!("{}: assembly failed\n{e}", input.display()),
            };
            save_image(&program, &output)?;
            if let Some(path) = labels_out {
                std::fs::write(&path, serde_json::to_string_pretty(&label_list(&program))?)?;
            }
            println!("wrote {} ({} cells used)", output.display(), program.len);
        }
        Command::Dis { image, format } => {
            let program = load_image(&image)?;
            match format {
                OutputFormat::Text => print!("{}", listing(&program)?),
                OutputFormat::Json => {
                    let layout = program.layout()?;
                    let codec = WordCodec::new(layout);
                    let rows: Vec<ListingRow> = program
                        .memory
                        .iter()
                        .enumerate()
                        .take(program.len)
                        .map(|(addr, &word)| ListingRow {
                            addr,
                            word,
                            text: match codec.decode(word) {
                                Ok(d) if !program.is_data(addr) => fmt_decoded(&d),
                                _ => format!("DAT {}", layout.to_signed(word)),
                            },
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&rows)?);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_survives_disk() {
        let program = assemble("start: LDA #1\nOUT\nHLT\nvalue DAT 9", &MachineConfig::default()).unwrap();
        let path = std::env::temp_dir().join("_chadsembler_asm_test.json");
        save_image(&program, &path).unwrap();
        let back = load_image(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(back, program);
        let labels = label_list(&back);
        assert_eq!(labels[0].name, "START");
        assert_eq!(labels[1].addr, 3);
    }
}
