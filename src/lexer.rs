use serde::{Deserialize, Serialize};

use crate::instructions;

pub const COMMENT: char = ';';
pub const DIRECTIVE: char = '!';
pub const OPEN_BLOCK: char = '{';
pub const CLOSE_BLOCK: char = '}';

/// Procedure block delimiters: `NAME {` opens, a lone `}` closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Block {
    Open,
    Close,
}

/// One source line split into its fields. No validation happens here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLine {
    pub label: Option<String>,
    pub mnemonic: Option<String>,
    pub operand: Option<String>,
    pub comment: Option<String>,
    pub directive: Option<String>,
    pub block: Option<Block>,
    pub bare_label: bool, // label written without a colon
}

impl SourceLine {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.mnemonic.is_none() && self.directive.is_none() && self.block.is_none()
    }
}

fn split_word(s: &str) -> (&str, &str) {
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim()),
        None => (s, ""),
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

pub fn lex_line(line: &str) -> SourceLine {
    let (code, comment) = match line.split_once(COMMENT) {
        Some((code, rest)) => (code.trim(), Some(rest.trim().to_string())),
        None => (line.trim(), None),
    };
    let mut out = SourceLine {
        comment,
        ..SourceLine::default()
    };
    if let Some(d) = code.strip_prefix(DIRECTIVE) {
        out.directive = Some(d.trim().to_string());
        return out;
    }
    if code.strip_prefix(CLOSE_BLOCK) == Some("") {
        out.block = Some(Block::Close);
        return out;
    }
    if let Some(head) = code.strip_suffix(OPEN_BLOCK) {
        out.block = Some(Block::Open);
        out.label = non_empty(&head.trim().trim_end_matches(':').trim().to_ascii_uppercase());
        return out;
    }

    let (first, rest) = split_word(code);
    let body = if let Some((name, after)) = first.split_once(':') {
        out.label = Some(name.to_ascii_uppercase());
        // `loop:INP` has the mnemonic glued to the label
        if after.is_empty() {
            rest.to_string()
        } else {
            format!("{after} {rest}")
        }
    } else if !rest.is_empty() && !instructions::is_reserved(first) {
        out.label = Some(first.to_ascii_uppercase());
        out.bare_label = true;
        rest.to_string()
    } else {
        code.to_string()
    };

    let (mnemonic, operand) = split_word(body.trim());
    out.mnemonic = non_empty(&mnemonic.to_ascii_uppercase());
    out.operand = non_empty(operand);
    out
}

pub fn lex(source: &str) -> Vec<SourceLine> {
    source.lines().map(lex_line).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn glued_label() {
        let l = lex_line("top:lda #1 ; start");
        assert_eq!(l.label.as_deref(), Some("TOP"));
        assert_eq!(l.mnemonic.as_deref(), Some("LDA"));
        assert_eq!(l.operand.as_deref(), Some("#1"));
        assert_eq!(l.comment.as_deref(), Some("start"));
    }

    #[test]
    fn procedure_blocks() {
        let open = lex_line("square: { ; squares ACC");
        assert_eq!(open.block, Some(Block::Open));
        assert_eq!(open.label.as_deref(), Some("SQUARE"));
        assert_eq!(open.mnemonic, None);
        assert_eq!(lex_line("double {").label.as_deref(), Some("DOUBLE"));
        assert_eq!(lex_line("  }  ").block, Some(Block::Close));
        assert!(!lex_line("}").is_empty());
    }

    #[test]
    fn blank_and_comment_only() {
        assert!(lex_line("   ").is_empty());
        let l = lex_line("; just a note");
        assert!(l.is_empty());
        assert_eq!(l.comment.as_deref(), Some("just a note"));
    }
}
