use serde::{Deserialize, Serialize};

use crate::decoder::{bits_for, Layout, MODE_BITS, OPCODE_BITS};

pub const MIN_WORD_WIDTH: u8 = 16;
pub const MAX_WORD_WIDTH: u8 = 64;
/// Largest memory a machine may have, in cells.
pub const MAX_MEMORY_SIZE: usize = 1 << 20;

/// Machine parameters a program is assembled and run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub memory_size: usize,
    pub register_count: u8,
    pub clock_speed: u64, // ms between steps, pacing only
    pub stack_region: usize,
    pub word_width: u8,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            memory_size: 100,
            register_count: 4,
            clock_speed: 0,
            stack_region: 10,
            word_width: 32,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("memory size must be at least 1")]
    EmptyMemory,
    #[error("memory size {0} exceeds the maximum of {} cells", MAX_MEMORY_SIZE)]
    MemoryTooLarge(usize),
    #[error("word width {0} is outside {}..={}", MIN_WORD_WIDTH, MAX_WORD_WIDTH)]
    WordWidth(u8),
    #[error("stack region of {stack} cells does not fit in {memory} cells of memory")]
    StackTooLarge { stack: usize, memory: usize },
    #[error("{width}-bit words leave {operand_bits} operand bits, too few to address {memory} cells")]
    OperandTooNarrow {
        width: u8,
        operand_bits: i64,
        memory: usize,
    },
    #[error("unknown option `{0}` (expected MEMORY, REGISTERS, CLOCK, STACK or WIDTH)")]
    UnknownOption(String),
    #[error("invalid value `{value}` for {option}: {reason}")]
    InvalidValue {
        option: String,
        value: String,
        reason: &'static str,
    },
    #[error("directive `{0}` is not of the form KEY=VALUE")]
    Malformed(String),
}

impl MachineConfig {
    /// Checks the configuration and derives the instruction word layout.
    pub fn validate(&self) -> Result<Layout, ConfigError> {
        if self.memory_size == 0 {
            return Err(ConfigError::EmptyMemory);
        }
        if self.memory_size > MAX_MEMORY_SIZE {
            return Err(ConfigError::MemoryTooLarge(self.memory_size));
        }
        if !(MIN_WORD_WIDTH..=MAX_WORD_WIDTH).contains(&self.word_width) {
            return Err(ConfigError::WordWidth(self.word_width));
        }
        if self.stack_region > self.memory_size {
            return Err(ConfigError::StackTooLarge {
                stack: self.stack_region,
                memory: self.memory_size,
            });
        }
        let reg_bits = bits_for(self.register_count as u64);
        let operand_bits = self.word_width as i64 - (OPCODE_BITS + MODE_BITS) as i64 - 2 * reg_bits as i64;
        let needed = bits_for(self.memory_size as u64 - 1) as i64;
        if operand_bits < 2 || operand_bits < needed {
            return Err(ConfigError::OperandTooNarrow {
                width: self.word_width,
                operand_bits,
                memory: self.memory_size,
            });
        }
        Ok(Layout {
            word_width: self.word_width as u32,
            register_count: self.register_count,
            reg_bits,
            operand_bits: operand_bits as u32,
        })
    }

    /// First address of the call stack region.
    pub fn stack_base(&self) -> usize {
        self.memory_size.saturating_sub(self.stack_region)
    }

    /// Applies one `KEY=VALUE` directive (the text after `!`).
    pub fn apply_directive(&mut self, text: &str) -> Result<(), ConfigError> {
        let (key, value) = text
            .split_once('=')
            .ok_or_else(|| ConfigError::Malformed(text.trim().to_string()))?;
        let key = key.trim().to_ascii_uppercase();
        let value = value.trim();
        let invalid = |reason| ConfigError::InvalidValue {
            option: key.clone(),
            value: value.to_string(),
            reason,
        };

        if !matches!(key.as_str(), "MEMORY" | "REGISTERS" | "CLOCK" | "STACK" | "WIDTH") {
            return Err(ConfigError::UnknownOption(key.clone()));
        }
        if value.starts_with(['+', '-']) {
            return Err(invalid("values must be non-negative and unsigned"));
        }
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected a decimal integer"));
        }
        let n: u64 = value.parse().map_err(|_| invalid("value is too large"))?;

        match key.as_str() {
            "MEMORY" => {
                if n == 0 {
                    return Err(invalid("memory must hold at least 1 cell"));
                }
                self.memory_size = usize::try_from(n)
                    .ok()
                    .filter(|&n| n <= MAX_MEMORY_SIZE)
                    .ok_or_else(|| invalid("memory is limited to 1048576 cells"))?;
            }
            "REGISTERS" => {
                self.register_count =
                    u8::try_from(n).map_err(|_| invalid("at most 255 registers"))?;
            }
            "CLOCK" => self.clock_speed = n,
            "STACK" => {
                self.stack_region = usize::try_from(n).map_err(|_| invalid("value is too large"))?;
            }
            _ => {
                self.word_width = u8::try_from(n)
                    .ok()
                    .filter(|w| (MIN_WORD_WIDTH..=MAX_WORD_WIDTH).contains(w))
                    .ok_or_else(|| invalid("word width must be between 16 and 64"))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_layout() {
        let layout = MachineConfig::default().validate().unwrap();
        // 4 registers need 3 bits for ids 0..=4
        assert_eq!(
            layout,
            Layout {
                word_width: 32,
                register_count: 4,
                reg_bits: 3,
                operand_bits: 17,
            }
        );
    }

    #[test]
    fn narrow_word_rejected() {
        let cfg = MachineConfig {
            memory_size: 1 << 12,
            word_width: 16,
            ..MachineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OperandTooNarrow { .. })
        ));
    }

    #[test]
    fn memory_is_capped() {
        let cfg = MachineConfig {
            memory_size: MAX_MEMORY_SIZE + 1,
            word_width: 64,
            ..MachineConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::MemoryTooLarge(MAX_MEMORY_SIZE + 1)));

        let mut cfg = MachineConfig::default();
        assert!(matches!(
            cfg.apply_directive("MEMORY=1000000000000"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(cfg.memory_size, 100);
        cfg.apply_directive("WIDTH=64").unwrap();
        cfg.apply_directive(&format!("MEMORY={MAX_MEMORY_SIZE}")).unwrap();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn directives() {
        let mut cfg = MachineConfig::default();
        cfg.apply_directive("memory=200").unwrap();
        cfg.apply_directive(" REGISTERS = 8 ").unwrap();
        assert_eq!(cfg.memory_size, 200);
        assert_eq!(cfg.register_count, 8);
        assert!(matches!(
            cfg.apply_directive("MEMORY=-5"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            cfg.apply_directive("SPEED=5"),
            Err(ConfigError::UnknownOption(_))
        ));
        assert!(matches!(
            cfg.apply_directive("MEMORY"),
            Err(ConfigError::Malformed(_))
        ));
    }
}
