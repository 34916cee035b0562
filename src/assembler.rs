use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use num_traits::Num;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MachineConfig;
use crate::cpu::parse_register;
use crate::decoder::{Decoded, Layout, Mode, WordCodec};
use crate::instructions::{self, InstrDesc, Role};
use crate::lexer::{self, Block, SourceLine};
use crate::program::Program;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AsmErrorKind {
    UndefinedLabel,
    DuplicateLabel,
    InvalidOperand,
    InvalidAddressingMode,
    OperandOutOfRange,
    UnknownMnemonic,
    InvalidLabel,
    InvalidDirective,
    ProgramTooLarge,
    InvalidConfig,
    UnbalancedBlock,
}

impl fmt::Display for AsmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AsmErrorKind::UndefinedLabel => "undefined label",
            AsmErrorKind::DuplicateLabel => "duplicate label",
            AsmErrorKind::InvalidOperand => "invalid operand",
            AsmErrorKind::InvalidAddressingMode => "invalid addressing mode",
            AsmErrorKind::OperandOutOfRange => "operand out of range",
            AsmErrorKind::UnknownMnemonic => "unknown mnemonic",
            AsmErrorKind::InvalidLabel => "invalid label",
            AsmErrorKind::InvalidDirective => "invalid directive",
            AsmErrorKind::ProgramTooLarge => "program too large",
            AsmErrorKind::InvalidConfig => "invalid configuration",
            AsmErrorKind::UnbalancedBlock => "unbalanced block",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub line: usize, // 1-based; 0 when not tied to a line
    pub kind: AsmErrorKind,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}: {}", self.kind, self.message)
        } else {
            write!(f, "line {}: {}: {}", self.line, self.kind, self.message)
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", render(.diagnostics))]
pub struct AssemblyError {
    pub diagnostics: Vec<Diagnostic>,
}

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

impl AssemblyError {
    pub fn kinds(&self) -> Vec<AsmErrorKind> {
        self.diagnostics.iter().map(|d| d.kind).collect()
    }

    pub fn has(&self, kind: AsmErrorKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }
}

type Failure = (AsmErrorKind, String);

#[derive(Debug, Clone)]
enum Item {
    Instr {
        desc: &'static InstrDesc,
        operand: Option<String>,
    },
    Data(Option<String>),
    Reserve(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Literal(i128),
    Label(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Source {
    mode: Mode,
    value: Value, // the register id for register mode
    idx: u8,
}

/// Splits a well-formed literal into sign, radix and digits without converting it.
fn split_literal(text: &str) -> Option<(bool, u32, String)> {
    let t = text.trim();
    let (neg, body) = match t.as_bytes().first() {
        Some(b'-') => (true, &t[1..]),
        Some(b'+') => (false, &t[1..]),
        _ => (false, t),
    };
    let lower = body.to_ascii_lowercase();
    let (radix, digits) = if let Some(h) = lower.strip_prefix("0x") {
        (16, h)
    } else if let Some(b) = lower.strip_prefix("0b") {
        (2, b)
    } else {
        (10, lower.as_str())
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    Some((neg, radix, digits.to_string()))
}

/// Decimal with optional sign, `0x` hex or `0b` binary.
pub fn parse_literal(text: &str) -> Option<i128> {
    let (neg, radix, digits) = split_literal(text)?;
    let v = <i128 as Num>::from_str_radix(&digits, radix).ok()?;
    Some(if neg { -v } else { v })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_label(name: &str) -> Result<(), Failure> {
    if !is_identifier(name) {
        return Err((
            AsmErrorKind::InvalidLabel,
            format!("`{name}` is not a valid label name"),
        ));
    }
    if instructions::is_reserved(name) || parse_register(name).is_some() {
        return Err((
            AsmErrorKind::InvalidLabel,
            format!("`{name}` is reserved and cannot be a label"),
        ));
    }
    Ok(())
}

fn parse_value(text: &str) -> Result<Value, Failure> {
    let t = text.trim();
    if t.is_empty() {
        return Err((AsmErrorKind::InvalidOperand, "missing operand value".into()));
    }
    if t.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '+') {
        if split_literal(t).is_none() {
            return Err((AsmErrorKind::InvalidOperand, format!("malformed number `{t}`")));
        }
        return parse_literal(t)
            .map(Value::Literal)
            .ok_or_else(|| (AsmErrorKind::OperandOutOfRange, format!("`{t}` is too large for any word")));
    }
    if is_identifier(t) {
        return Ok(Value::Label(t.to_ascii_uppercase()));
    }
    Err((AsmErrorKind::InvalidOperand, format!("cannot parse operand `{t}`")))
}

fn parse_reg_operand(text: &str, layout: &Layout) -> Result<u8, Failure> {
    let id = parse_register(text).ok_or_else(|| {
        (
            AsmErrorKind::InvalidOperand,
            format!("`{}` is not a register (ACC, R1..R{})", text.trim(), layout.register_count),
        )
    })?;
    if id > layout.register_count {
        return Err((
            AsmErrorKind::InvalidOperand,
            format!(
                "register R{id} does not exist (machine has {} general purpose registers)",
                layout.register_count
            ),
        ));
    }
    Ok(id)
}

fn parse_source(text: &str, layout: &Layout) -> Result<Source, Failure> {
    let t = text.trim();
    let plain = |mode, value| Source { mode, value, idx: 0 };
    if let Some(rest) = t.strip_prefix('#') {
        return Ok(plain(Mode::Immediate, parse_value(rest)?));
    }
    if let Some(rest) = t.strip_prefix('@') {
        return Ok(plain(Mode::Direct, parse_value(rest)?));
    }
    if let Some(rest) = t.strip_prefix('>') {
        return Ok(plain(Mode::Indirect, parse_value(rest)?));
    }
    if t.starts_with('%') || parse_register(t).is_some() {
        let id = parse_reg_operand(t, layout)?;
        return Ok(plain(Mode::Register, Value::Literal(id as i128)));
    }
    if let Some((base, rest)) = t.split_once('[') {
        let reg = rest.strip_suffix(']').ok_or_else(|| {
            (AsmErrorKind::InvalidOperand, format!("unterminated index in `{t}`"))
        })?;
        return Ok(Source {
            mode: Mode::Indexed,
            value: parse_value(base)?,
            idx: parse_reg_operand(reg, layout)?,
        });
    }
    Ok(plain(Mode::Direct, parse_value(t)?))
}

/// An instruction pool: the global program or one procedure body.
#[derive(Debug, Default)]
struct Pool {
    name: Option<String>,
    items: Vec<(usize, Item)>,       // (line, item)
    labels: BTreeMap<String, usize>, // name -> offset within the pool
    size: usize,
}

struct Assembler<'a> {
    layout: Layout,
    config: MachineConfig,
    labels: &'a BTreeMap<String, usize>,
    scopes: &'a BTreeMap<String, BTreeMap<String, usize>>,
}

impl Assembler<'_> {
    /// Labels resolve in the enclosing procedure first, then globally.
    fn resolve(&self, value: &Value, scope: Option<&str>) -> Result<i128, Failure> {
        match value {
            Value::Literal(v) => Ok(*v),
            Value::Label(name) => scope
                .and_then(|proc| self.scopes.get(proc))
                .and_then(|locals| locals.get(name))
                .or_else(|| self.labels.get(name))
                .map(|&a| a as i128)
                .ok_or_else(|| (AsmErrorKind::UndefinedLabel, format!("label `{name}` is not defined"))),
        }
    }

    fn encode_instr(
        &self,
        desc: &InstrDesc,
        operand: Option<&str>,
        scope: Option<&str>,
    ) -> Result<u64, Failure> {
        let parts: Vec<&str> = match operand {
            Some(text) => text.split(',').map(str::trim).collect(),
            None => Vec::new(),
        };
        let count = parts.len();
        if count < desc.min_operands as usize || count > desc.max_operands as usize {
            let expected = match (desc.min_operands, desc.max_operands) {
                (0, 0) => "no operands".to_string(),
                (a, b) if a == b => format!("{a} operand(s)"),
                (a, b) => format!("{a} to {b} operands"),
            };
            return Err((
                AsmErrorKind::InvalidOperand,
                format!("{} takes {expected}, found {count}", desc.mnemonic),
            ));
        }

        let (mode, operand, idx) = match (desc.role, parts.first()) {
            (Role::None, _) => (Mode::Implied, 0, 0),
            // INP and OUT* default to the accumulator
            (_, None) => (Mode::Register, 0, 0),
            (_, Some(text)) => {
                let src = parse_source(text, &self.layout)?;
                if !desc.modes.contains(src.mode.flag()) {
                    return Err((
                        AsmErrorKind::InvalidAddressingMode,
                        format!("{} does not accept {} addressing", desc.mnemonic, src.mode.name()),
                    ));
                }
                let v = self.resolve(&src.value, scope)?;
                (src.mode, self.check_range(src.mode, v, text)?, src.idx)
            }
        };

        let dst = match parts.get(1) {
            Some(text) => parse_reg_operand(text, &self.layout)?,
            None => 0,
        };
        let codec = WordCodec::new(self.layout);
        Ok(codec.encode(&Decoded {
            op: desc.op,
            mode,
            dst,
            idx,
            operand,
        }))
    }

    fn check_range(&self, mode: Mode, v: i128, text: &str) -> Result<i64, Failure> {
        let ok = match mode {
            Mode::Immediate => {
                let (lo, hi) = self.layout.immediate_range();
                (lo..=hi).contains(&v)
            }
            Mode::Register | Mode::Implied => true,
            _ => v >= 0 && v < self.config.memory_size as i128,
        };
        if !ok {
            let what = if mode == Mode::Immediate {
                let (lo, hi) = self.layout.immediate_range();
                format!("immediate range {lo}..={hi}")
            } else {
                format!("memory 0..{}", self.config.memory_size)
            };
            return Err((
                AsmErrorKind::OperandOutOfRange,
                format!("`{}` is outside {what}", text.trim()),
            ));
        }
        Ok(v as i64)
    }

    fn encode_data(&self, value: Option<&str>, scope: Option<&str>) -> Result<u64, Failure> {
        let v = match value {
            Some(text) => self.resolve(&parse_value(text)?, scope)?,
            None => 0,
        };
        let (lo, hi) = self.layout.word_range();
        if !(lo..=hi).contains(&v) {
            return Err((
                AsmErrorKind::OperandOutOfRange,
                format!("{v} does not fit a {}-bit word", self.layout.word_width),
            ));
        }
        Ok(self.layout.to_word(v as i64))
    }
}

fn report(diags: &mut Vec<Diagnostic>, line: usize, (kind, message): Failure) {
    diags.push(Diagnostic { line, kind, message });
}

/// Applies `!KEY=VALUE` lines to a copy of `base`.
fn configure(lines: &[SourceLine], base: &MachineConfig, diags: &mut Vec<Diagnostic>) -> MachineConfig {
    let mut config = *base;
    for (i, line) in lines.iter().enumerate() {
        if let Some(text) = &line.directive {
            if let Err(e) = config.apply_directive(text) {
                diags.push(Diagnostic {
                    line: i + 1,
                    kind: AsmErrorKind::InvalidDirective,
                    message: e.to_string(),
                });
            }
        }
    }
    config
}

/// Two-pass assembly of `source` against `config` (directives in the source win).
pub fn assemble(source: &str, config: &MachineConfig) -> Result<Program, AssemblyError> {
    let lines = lexer::lex(source);
    let mut diags = Vec::new();

    let config = configure(&lines, config, &mut diags);
    let layout = match config.validate() {
        Ok(layout) => layout,
        Err(e) => {
            report(&mut diags, 0, (AsmErrorKind::InvalidConfig, e.to_string()));
            return Err(AssemblyError { diagnostics: diags });
        }
    };
    if !diags.is_empty() {
        return Err(AssemblyError { diagnostics: diags });
    }

    // Pass 1: split lines into pools, size them and record labels
    let mut pools = vec![Pool::default()];
    let mut open: Option<usize> = None; // line of the unclosed `{`
    for (i, line) in lines.iter().enumerate() {
        let no = i + 1;
        match line.block {
            Some(Block::Open) => {
                if let Some(at) = open {
                    report(
                        &mut diags,
                        no,
                        (
                            AsmErrorKind::UnbalancedBlock,
                            format!("procedures cannot nest; the block opened on line {at} is still open"),
                        ),
                    );
                    continue;
                }
                open = Some(no);
                let name = match &line.label {
                    Some(name) => name.clone(),
                    None => {
                        let f: Failure = (AsmErrorKind::InvalidLabel, "a procedure block needs a name".into());
                        report(&mut diags, no, f);
                        String::new()
                    }
                };
                if !name.is_empty() {
                    if let Err(f) = check_label(&name) {
                        report(&mut diags, no, f);
                    } else if pools[0].labels.contains_key(&name)
                        || pools.iter().any(|p| p.name.as_ref() == Some(&name))
                    {
                        report(
                            &mut diags,
                            no,
                            (AsmErrorKind::DuplicateLabel, format!("label `{name}` is already defined")),
                        );
                    }
                }
                pools.push(Pool {
                    name: Some(name),
                    ..Pool::default()
                });
                continue;
            }
            Some(Block::Close) => {
                if open.take().is_none() {
                    report(
                        &mut diags,
                        no,
                        (AsmErrorKind::UnbalancedBlock, "`}` without an open procedure".into()),
                    );
                }
                continue;
            }
            None => {}
        }

        // `LDAA 5` lexes as label LDAA with mnemonic `5`
        if let (true, Some(word), Some(m)) = (line.bare_label, &line.label, &line.mnemonic) {
            if !is_identifier(m) {
                let f: Failure = (AsmErrorKind::UnknownMnemonic, format!("unknown instruction `{word}`"));
                report(&mut diags, no, f);
                continue;
            }
        }

        let index = if open.is_some() { pools.len() - 1 } else { 0 };
        if let Some(name) = &line.label {
            // a global label may not reuse a procedure name
            let taken = pools[index].labels.contains_key(name)
                || (index == 0 && pools.iter().any(|p| p.name.as_ref() == Some(name)));
            match check_label(name) {
                Err(f) => report(&mut diags, no, f),
                Ok(()) if taken => report(
                    &mut diags,
                    no,
                    (AsmErrorKind::DuplicateLabel, format!("label `{name}` is already defined")),
                ),
                Ok(()) => {
                    let pool = &mut pools[index];
                    pool.labels.insert(name.clone(), pool.size);
                }
            }
        }
        let Some(mnemonic) = line.mnemonic.as_deref() else {
            continue;
        };
        let (item, size) = match mnemonic {
            "DAT" => (Item::Data(line.operand.clone()), 1),
            "RES" => {
                let n = line
                    .operand
                    .as_deref()
                    .and_then(parse_literal)
                    .and_then(|n| usize::try_from(n).ok());
                match n {
                    Some(n) => (Item::Reserve(n), n),
                    None => {
                        report(
                            &mut diags,
                            no,
                            (AsmErrorKind::InvalidOperand, "RES needs a non-negative cell count".into()),
                        );
                        continue;
                    }
                }
            }
            m => match instructions::lookup(m) {
                Some(desc) => (
                    Item::Instr {
                        desc,
                        operand: line.operand.clone(),
                    },
                    1,
                ),
                None => {
                    report(
                        &mut diags,
                        no,
                        (AsmErrorKind::UnknownMnemonic, format!("unknown instruction `{m}`")),
                    );
                    continue;
                }
            },
        };
        let pool = &mut pools[index];
        pool.items.push((no, item));
        pool.size = pool.size.saturating_add(size);
    }
    if let Some(at) = open {
        report(
            &mut diags,
            at,
            (AsmErrorKind::UnbalancedBlock, "procedure block is never closed".into()),
        );
    }
    if !diags.is_empty() {
        return Err(AssemblyError { diagnostics: diags });
    }

    // The global pool comes first, then each procedure in definition order
    let limit = config.stack_base();
    let mut labels = BTreeMap::new();
    let mut scopes = BTreeMap::new();
    let mut items: Vec<(usize, usize, Option<String>, Item)> = Vec::new(); // (line, addr, scope, item)
    let mut addr = 0usize;
    for pool in pools {
        let base = addr;
        let absolute = pool.labels.into_iter().map(|(name, offset)| (name, base.saturating_add(offset)));
        match &pool.name {
            Some(proc) => {
                labels.insert(proc.clone(), base);
                scopes.insert(proc.clone(), absolute.collect::<BTreeMap<_, _>>());
            }
            None => labels.extend(absolute),
        }
        for (no, item) in pool.items {
            let size = match &item {
                Item::Reserve(n) => *n,
                _ => 1,
            };
            items.push((no, addr, pool.name.clone(), item));
            addr = addr.saturating_add(size);
            if addr > limit && diags.is_empty() {
                report(
                    &mut diags,
                    no,
                    (
                        AsmErrorKind::ProgramTooLarge,
                        format!("program needs more than {limit} cells, all that is free below the stack"),
                    ),
                );
            }
        }
    }
    if !diags.is_empty() {
        return Err(AssemblyError { diagnostics: diags });
    }

    // Pass 2: encode
    let asm = Assembler {
        layout,
        config,
        labels: &labels,
        scopes: &scopes,
    };
    let mut memory = vec![0u64; config.memory_size];
    let mut source_lines = BTreeMap::new();
    let mut data = BTreeSet::new();
    for (no, at, scope, item) in &items {
        let scope = scope.as_deref();
        let encoded = match item {
            Item::Instr { desc, operand } => asm.encode_instr(desc, operand.as_deref(), scope),
            Item::Data(value) => {
                data.insert(*at);
                asm.encode_data(value.as_deref(), scope)
            }
            Item::Reserve(n) => {
                data.extend(*at..*at + *n);
                continue;
            }
        };
        source_lines.insert(*at, *no);
        match encoded {
            Ok(word) => memory[*at] = word,
            Err(f) => report(&mut diags, *no, f),
        }
    }
    if !diags.is_empty() {
        return Err(AssemblyError { diagnostics: diags });
    }

    debug!(cells = addr, labels = labels.len(), width = layout.word_width, "assembled program");
    Ok(Program {
        memory,
        labels,
        scopes,
        entry: 0,
        len: addr,
        lines: source_lines,
        data,
        config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals() {
        assert_eq!(parse_literal("42"), Some(42));
        assert_eq!(parse_literal("-0x10"), Some(-16));
        assert_eq!(parse_literal("0b101"), Some(5));
        assert_eq!(parse_literal("+7"), Some(7));
        assert_eq!(parse_literal("0x"), None);
        assert_eq!(parse_literal("12a"), None);
    }

    #[test]
    fn operand_forms() {
        let layout = MachineConfig::default().validate().unwrap();
        let src = |t| parse_source(t, &layout).unwrap();
        assert_eq!(src("#5").mode, Mode::Immediate);
        assert_eq!(src("@x").mode, Mode::Direct);
        assert_eq!(src("x").value, Value::Label("X".into()));
        assert_eq!(src(">ptr").mode, Mode::Indirect);
        assert_eq!(src("%acc").mode, Mode::Register);
        assert_eq!(src("R2").value, Value::Literal(2));
        let indexed = src("table[R1]");
        assert_eq!((indexed.mode, indexed.idx), (Mode::Indexed, 1));
        assert!(parse_source("R9", &layout).is_err());
    }
}
