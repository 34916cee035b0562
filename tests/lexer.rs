use chadsembler::lexer::{lex, lex_line, Block, SourceLine};
use pretty_assertions::assert_eq;

fn line(label: Option<&str>, mnemonic: Option<&str>, operand: Option<&str>) -> SourceLine {
    SourceLine {
        label: label.map(str::to_string),
        mnemonic: mnemonic.map(str::to_string),
        operand: operand.map(str::to_string),
        ..SourceLine::default()
    }
}

#[test]
fn colon_label() {
    assert_eq!(lex_line("loop: ADD #1, R2"), line(Some("LOOP"), Some("ADD"), Some("#1, R2")));
}

fn bare(label: &str, mnemonic: &str, operand: Option<&str>) -> SourceLine {
    SourceLine {
        bare_label: true,
        ..line(Some(label), Some(mnemonic), operand)
    }
}

#[test]
fn lmc_style_label() {
    assert_eq!(lex_line("count DAT 0"), bare("COUNT", "DAT", Some("0")));
    assert_eq!(lex_line("loop INP"), bare("LOOP", "INP", None));
    // a lone mnemonic is never a label
    assert_eq!(lex_line("  HLT  "), line(None, Some("HLT"), None));
}

#[test]
fn label_only_line() {
    assert_eq!(lex_line("end:"), line(Some("END"), None, None));
}

#[test]
fn comment_and_directive() {
    let l = lex_line("sta x ; keep it");
    assert_eq!(l.mnemonic.as_deref(), Some("STA"));
    assert_eq!(l.operand.as_deref(), Some("x"));
    assert_eq!(l.comment.as_deref(), Some("keep it"));

    let d = lex_line("!MEMORY=200 ; bigger");
    assert_eq!(d.directive.as_deref(), Some("MEMORY=200"));
    assert_eq!(d.mnemonic, None);
}

#[test]
fn unknown_mnemonic_is_left_alone() {
    assert_eq!(lex_line("FROB"), line(None, Some("FROB"), None));
}

#[test]
fn block_lines() {
    assert_eq!(
        lex_line("inc {"),
        SourceLine {
            block: Some(Block::Open),
            ..line(Some("INC"), None, None)
        }
    );
    assert_eq!(
        lex_line("} ; end of inc"),
        SourceLine {
            block: Some(Block::Close),
            comment: Some("end of inc".into()),
            ..SourceLine::default()
        }
    );
}

#[test]
fn one_record_per_line() {
    let lines = lex("LDA #1\n\n; note\nHLT");
    assert_eq!(lines.len(), 4);
    assert!(lines[1].is_empty());
    assert!(lines[2].is_empty());
}
