use crate::config::ConfigError;
use crate::cpu::register_name;
use crate::decoder::{Decoded, Mode, WordCodec};
use crate::instructions::{self, Role};
use crate::program::Program;

/// Renders a decoded instruction in source syntax; the text assembles back to the same word.
pub fn fmt_decoded(d: &Decoded) -> String {
    let desc = instructions::describe(d.op);
    if desc.role == Role::None {
        return desc.mnemonic.to_string();
    }
    let src = match d.mode {
        Mode::Immediate => format!("#{}", d.operand),
        Mode::Direct => d.operand.to_string(),
        Mode::Indirect => format!(">{}", d.operand),
        Mode::Indexed => format!("{}[{}]", d.operand, register_name(d.idx)),
        Mode::Register => register_name(d.operand as u8),
        Mode::Implied => String::new(),
    };
    if desc.dst && d.dst != 0 {
        format!("{} {}, {}", desc.mnemonic, src, register_name(d.dst))
    } else {
        format!("{} {}", desc.mnemonic, src)
    }
}

/// One line per occupied cell: address, raw word, labels and the instruction or data value.
pub fn listing(program: &Program) -> Result<String, ConfigError> {
    let layout = program.layout()?;
    let codec = WordCodec::new(layout);
    let digits = (layout.word_width as usize).div_ceil(4);
    let mut out = String::new();
    for (addr, &word) in program.memory.iter().enumerate().take(program.len) {
        let labels = program.labels_at(addr);
        let label = if labels.is_empty() {
            String::new()
        } else {
            format!("{}:", labels.join(": "))
        };
        let text = if program.is_data(addr) {
            format!("DAT {}", layout.to_signed(word))
        } else {
            match codec.decode(word) {
                Ok(d) => fmt_decoded(&d),
                Err(_) => format!("DAT {}", layout.to_signed(word)),
            }
        };
        out.push_str(&format!("{addr:>4}  {word:0digits$x}  {label:<12}{text}\n"));
    }
    Ok(out)
}
