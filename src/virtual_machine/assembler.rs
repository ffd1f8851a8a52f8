//! Program decoder: source text to [`Program`].
//!
//! Uses [`for_each_instruction!`](crate::for_each_instruction) to generate
//! `parse_instruction`, which picks the instruction form by mnemonic and
//! operand count.
//!
//! # Syntax
//!
//! ```text
//! label: instruction operand1, operand2   // optional comment
//! ```
//!
//! - Mnemonics, registers and labels are case-insensitive
//! - Registers are `a`..`d` or `r0`..`r255` (only `r0`..`r3` exist at runtime)
//! - Immediates are decimal integers (e.g. `42`, `-1`)
//! - Label operands are bare names or double-quoted (`jmp "loop"`)
//! - Comments start with `//`
//! - Commas between operands are optional
//!
//! Decoding runs the [`preprocessor`](super::preprocessor) first, then two
//! passes: the first binds labels to instruction indices, the second parses
//! operands and resolves label references.

use crate::for_each_instruction;
use crate::virtual_machine::errors::{DecodeError, DecodeErrorKind};
use crate::virtual_machine::isa::{Instruction, is_mnemonic};
use crate::virtual_machine::operand::{MAX_VALUE, Operand, Register, in_range};
use crate::virtual_machine::preprocessor::{LABEL_SUFFIX, SourceLine, preprocess};
use crate::virtual_machine::program::Program;
use std::collections::HashMap;
use std::fmt::Write;

/// Maximum number of instructions in one program.
pub const MAX_CODE_SIZE: usize = 2048;

/// Formats a compiler-style diagnostic for a decode failure.
pub fn render_diagnostic(file: &str, source: &str, err: &DecodeError) -> String {
    let mut diag = String::new();
    let _ = writeln!(diag, "error[{}]: {}", err.kind.kind(), err.kind);
    let _ = writeln!(diag, " --> {file}:{}", err.line);

    if let Some(raw_line) = source.lines().nth(err.line.saturating_sub(1)) {
        let line_text = raw_line.trim_end_matches('\r');
        let indent = line_text.len() - line_text.trim_start().len();
        let width = line_text.trim().chars().count().max(1);
        let _ = writeln!(diag, "  |");
        let _ = writeln!(diag, "{:>4} | {}", err.line, line_text);
        let _ = writeln!(diag, "  | {}{}", " ".repeat(indent), "^".repeat(width));
    }

    diag
}

/// Splits a normalized line into tokens; commas count as whitespace.
fn tokenize(line: &str) -> Vec<&str> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect()
}

/// Checks if a token is a label definition (ends with `:`).
fn is_label_def(tok: &str) -> bool {
    tok.ends_with(LABEL_SUFFIX)
}

/// Extracts and validates the label name from a label definition token.
fn label_name(tok: &str) -> Result<&str, DecodeErrorKind> {
    let name = &tok[..tok.len() - 1];
    if name.is_empty() || name.contains(LABEL_SUFFIX) || name.contains('"') {
        return Err(DecodeErrorKind::InvalidLabel {
            token: tok.to_string(),
        });
    }
    Ok(name)
}

/// Parses a register operand.
pub(crate) fn parse_reg(instruction: &str, tok: &str) -> Result<Register, DecodeErrorKind> {
    Register::parse(tok).ok_or_else(|| DecodeErrorKind::InvalidOperand {
        instruction: instruction.to_string(),
        token: tok.to_string(),
        expected: "register",
    })
}

/// Parses a register or an immediate bounded by [`MAX_VALUE`].
pub(crate) fn parse_value(instruction: &str, tok: &str) -> Result<Operand, DecodeErrorKind> {
    if let Some(reg) = Register::parse(tok) {
        return Ok(Operand::Reg(reg));
    }
    let digits = tok.strip_prefix('-').unwrap_or(tok);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DecodeErrorKind::InvalidOperand {
            instruction: instruction.to_string(),
            token: tok.to_string(),
            expected: "register or integer",
        });
    }
    match tok.parse::<i64>() {
        Ok(v) if in_range(v) => Ok(Operand::Imm(v)),
        _ => Err(DecodeErrorKind::ImmediateOutOfRange {
            token: tok.to_string(),
            max: MAX_VALUE,
        }),
    }
}

/// Resolves a bare or double-quoted label reference.
pub(crate) fn parse_label(
    instruction: &str,
    tok: &str,
    labels: &HashMap<String, usize>,
) -> Result<usize, DecodeErrorKind> {
    let name = match tok.strip_prefix('"') {
        Some(rest) => rest.strip_suffix('"').unwrap_or(""),
        None => tok,
    };
    if name.is_empty() || name.contains('"') {
        return Err(DecodeErrorKind::InvalidOperand {
            instruction: instruction.to_string(),
            token: tok.to_string(),
            expected: "label",
        });
    }
    labels
        .get(name)
        .copied()
        .ok_or_else(|| DecodeErrorKind::UndefinedLabel {
            label: name.to_string(),
        })
}

macro_rules! define_parse_instruction {
    (
        $(
            $(#[$doc:meta])*
            $name:ident, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        /// Parse one instruction from its tokens (mnemonic first).
        fn parse_instruction(
            tokens: &[&str],
            labels: &HashMap<String, usize>,
        ) -> Result<Instruction, DecodeErrorKind> {
            let Some((&name, operands)) = tokens.split_first() else {
                return Err(DecodeErrorKind::UnknownOpcode {
                    name: String::new(),
                });
            };

            $(
                if name == $mnemonic {
                    if let [ $( $field ),* ] = operands {
                        return Ok(Instruction::$name {
                            $(
                                $field: define_parse_instruction!(
                                    @parse_operand $kind, $mnemonic, $field, labels
                                )?,
                            )*
                        });
                    }
                }
            )*

            if !is_mnemonic(name) {
                return Err(DecodeErrorKind::UnknownOpcode {
                    name: name.to_string(),
                });
            }
            Err(DecodeErrorKind::ArityMismatch {
                instruction: name.to_string(),
                expected: arities(name),
                actual: operands.len(),
            })
        }

        /// Lists the accepted operand counts of `name`, e.g. `0 or 2`.
        fn arities(name: &str) -> String {
            let mut counts: Vec<usize> = Vec::new();
            $(
                if name == $mnemonic {
                    counts.push(define_parse_instruction!(@count $( $field ),*));
                }
            )*
            counts
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(" or ")
        }
    };

    // ---------- counting ----------
    (@count $( $x:ident ),* ) => {
        <[()]>::len(&[ $( define_parse_instruction!(@unit $x) ),* ])
    };

    (@unit $x:ident) => { () };

    // ---------- parsing ----------
    (@parse_operand Reg, $mnemonic:literal, $tok:ident, $labels:ident) => {
        parse_reg($mnemonic, $tok)
    };

    (@parse_operand Value, $mnemonic:literal, $tok:ident, $labels:ident) => {
        parse_value($mnemonic, $tok)
    };

    (@parse_operand Label, $mnemonic:literal, $tok:ident, $labels:ident) => {
        parse_label($mnemonic, $tok, $labels)
    };
}

for_each_instruction!(define_parse_instruction);

/// An instruction line awaiting operand parsing.
struct PendingInstr<'a> {
    line: usize,
    tokens: Vec<&'a str>,
}

/// Pass 1: bind labels to instruction indices and collect instruction lines.
fn bind_labels(
    lines: &[SourceLine],
) -> Result<(HashMap<String, usize>, Vec<PendingInstr<'_>>), DecodeError> {
    let mut labels = HashMap::new();
    let mut pending = Vec::new();

    for source_line in lines {
        let line = source_line.line;
        let mut tokens = tokenize(&source_line.text);
        if tokens.is_empty() {
            continue;
        }

        if is_label_def(tokens[0]) {
            let name = label_name(tokens[0]).map_err(|e| DecodeError::new(line, e))?;
            if labels.contains_key(name) {
                return Err(DecodeError::new(
                    line,
                    DecodeErrorKind::DuplicateLabel {
                        label: name.to_string(),
                    },
                ));
            }
            labels.insert(name.to_string(), pending.len());
            tokens.remove(0);
            if tokens.is_empty() {
                continue;
            }
        }

        if !is_mnemonic(tokens[0]) {
            return Err(DecodeError::new(
                line,
                DecodeErrorKind::UnknownOpcode {
                    name: tokens[0].to_string(),
                },
            ));
        }

        if pending.len() == MAX_CODE_SIZE {
            return Err(DecodeError::new(
                line,
                DecodeErrorKind::CodeTooBig {
                    actual: pending.len() + 1,
                    max: MAX_CODE_SIZE,
                },
            ));
        }
        pending.push(PendingInstr { line, tokens });
    }

    Ok((labels, pending))
}

/// Decodes program text into a [`Program`].
///
/// Pure and deterministic: the same text always yields the same program or
/// the same error.
pub fn decode(source: &str) -> Result<Program, DecodeError> {
    let lines = preprocess(source)?;
    let (labels, pending) = bind_labels(&lines)?;

    let mut instructions = Vec::with_capacity(pending.len());
    let mut source_lines = Vec::with_capacity(pending.len());
    for instr in &pending {
        let decoded =
            parse_instruction(&instr.tokens, &labels).map_err(|e| DecodeError::new(instr.line, e))?;
        instructions.push(decoded);
        source_lines.push(instr.line);
    }

    Ok(Program::new(instructions, labels, source_lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::errors::PreprocessError;

    fn decode_err(source: &str) -> DecodeError {
        decode(source).expect_err("expected decode error")
    }

    #[test]
    fn decode_empty_source() {
        let program = decode("").unwrap();
        assert!(program.is_empty());
        let program = decode("\n  // nothing here\n\n").unwrap();
        assert!(program.is_empty());
    }

    #[test]
    fn decode_stack_program() {
        let program = decode("push 1\npush 2\nadd\nwrite").unwrap();
        assert_eq!(
            program.instructions(),
            &[
                Instruction::Push {
                    value: Operand::Imm(1)
                },
                Instruction::Push {
                    value: Operand::Imm(2)
                },
                Instruction::Add {},
                Instruction::Write {},
            ]
        );
    }

    #[test]
    fn decode_register_forms_with_and_without_commas() {
        let program = decode("add a, 1\nsub b 2\nmov r3, a\npop c\nwrite d").unwrap();
        assert_eq!(
            program.instructions(),
            &[
                Instruction::AddReg {
                    rd: Register(0),
                    value: Operand::Imm(1)
                },
                Instruction::SubReg {
                    rd: Register(1),
                    value: Operand::Imm(2)
                },
                Instruction::Mov {
                    rd: Register(3),
                    value: Operand::Reg(Register(0))
                },
                Instruction::PopInto { rd: Register(2) },
                Instruction::WriteValue {
                    value: Operand::Reg(Register(3))
                },
            ]
        );
    }

    #[test]
    fn decode_is_case_insensitive() {
        let program = decode("PUSH A\nLoop: JMP LOOP").unwrap();
        assert_eq!(program.label("loop"), Some(1));
        assert_eq!(program.get(1), Some(&Instruction::Jmp { target: 1 }));
    }

    #[test]
    fn labels_bind_to_following_instruction() {
        let program = decode("jmp l1\npush 99\nl1: push 1\nwrite").unwrap();
        assert_eq!(program.label("l1"), Some(2));
        assert_eq!(program.get(0), Some(&Instruction::Jmp { target: 2 }));
        assert_eq!(program.source_line(2), 3);
    }

    #[test]
    fn label_on_own_line_and_at_end() {
        let program = decode("start:\npush 1\njmp end\nend:").unwrap();
        assert_eq!(program.label("start"), Some(0));
        assert_eq!(program.label("end"), Some(2));
        assert_eq!(program.len(), 2);
    }

    #[test]
    fn quoted_labels_resolve() {
        let program = decode("loop:\nje a \"loop\"").unwrap();
        assert_eq!(
            program.get(0),
            Some(&Instruction::JeReg {
                rs: Register(0),
                target: 0
            })
        );
    }

    #[test]
    fn conditional_jump_forms() {
        let program = decode("l: jg l\njl b l\nje l").unwrap();
        assert_eq!(program.get(0), Some(&Instruction::Jg { target: 0 }));
        assert_eq!(
            program.get(1),
            Some(&Instruction::JlReg {
                rs: Register(1),
                target: 0
            })
        );
        assert_eq!(program.get(2), Some(&Instruction::Je { target: 0 }));
    }

    #[test]
    fn out_of_range_register_decodes() {
        let program = decode("mov r99, 1").unwrap();
        assert_eq!(
            program.get(0),
            Some(&Instruction::Mov {
                rd: Register(99),
                value: Operand::Imm(1)
            })
        );
    }

    #[test]
    fn unknown_opcode() {
        let err = decode_err("push 1\njump end");
        assert_eq!(err.line, 2);
        assert_eq!(
            err.kind,
            DecodeErrorKind::UnknownOpcode {
                name: "jump".to_string()
            }
        );
    }

    #[test]
    fn arity_mismatch_lists_forms() {
        let err = decode_err("add a");
        assert_eq!(
            err.kind,
            DecodeErrorKind::ArityMismatch {
                instruction: "add".to_string(),
                expected: "0 or 2".to_string(),
                actual: 1,
            }
        );
        let err = decode_err("push");
        assert!(matches!(err.kind, DecodeErrorKind::ArityMismatch { actual: 0, .. }));
    }

    #[test]
    fn invalid_operands() {
        let err = decode_err("mov 1, a");
        assert!(matches!(
            err.kind,
            DecodeErrorKind::InvalidOperand {
                expected: "register",
                ..
            }
        ));
        let err = decode_err("push x");
        assert!(matches!(err.kind, DecodeErrorKind::InvalidOperand { .. }));
        let err = decode_err("push r300");
        assert!(matches!(err.kind, DecodeErrorKind::InvalidOperand { .. }));
        let err = decode_err("jmp \"open");
        assert!(matches!(
            err.kind,
            DecodeErrorKind::InvalidOperand {
                expected: "label",
                ..
            }
        ));
    }

    #[test]
    fn immediate_bounds() {
        assert!(decode("push 2147483648\npush -2147483648").is_ok());
        let err = decode_err("push 2147483649");
        assert!(matches!(err.kind, DecodeErrorKind::ImmediateOutOfRange { .. }));
        let err = decode_err("push 99999999999999999999999");
        assert!(matches!(err.kind, DecodeErrorKind::ImmediateOutOfRange { .. }));
    }

    #[test]
    fn duplicate_label_error() {
        let err = decode_err("a1:\npush 1\na1: push 2");
        assert_eq!(err.line, 3);
        assert_eq!(
            err.kind,
            DecodeErrorKind::DuplicateLabel {
                label: "a1".to_string()
            }
        );
    }

    #[test]
    fn undefined_label_error() {
        let err = decode_err("push 1\njmp nowhere");
        assert_eq!(err.line, 2);
        assert_eq!(
            err.kind,
            DecodeErrorKind::UndefinedLabel {
                label: "nowhere".to_string()
            }
        );
    }

    #[test]
    fn invalid_label_declaration() {
        let err = decode_err(":\npush 1");
        assert!(matches!(err.kind, DecodeErrorKind::InvalidLabel { .. }));
    }

    #[test]
    fn code_too_big() {
        let ok = "push 1\n".repeat(MAX_CODE_SIZE);
        assert_eq!(decode(&ok).unwrap().len(), MAX_CODE_SIZE);
        let err = decode_err(&"push 1\n".repeat(MAX_CODE_SIZE + 1));
        assert_eq!(err.line, MAX_CODE_SIZE + 1);
        assert!(matches!(err.kind, DecodeErrorKind::CodeTooBig { .. }));
    }

    #[test]
    fn macro_errors_surface_as_decode_errors() {
        let err = decode_err("push 1\n#define m\npush 2");
        assert_eq!(
            err.kind,
            DecodeErrorKind::Macro(PreprocessError::UnterminatedDefine {
                name: "m".to_string()
            })
        );
    }

    #[test]
    fn macro_local_labels_decode() {
        let src = "#define countdown\n{}top: sub a 1\njg a {}top\n#enddefine\nmov a 3\ncountdown!\ncountdown!";
        let program = decode(src).unwrap();
        assert_eq!(program.len(), 5);
        assert_eq!(program.label("countdown-0#top"), Some(1));
        assert_eq!(program.label("countdown-1#top"), Some(3));
        assert_eq!(
            program.get(4),
            Some(&Instruction::JgReg {
                rs: Register(0),
                target: 3
            })
        );
    }

    #[test]
    fn nested_macro_invocation_is_unknown_opcode() {
        let src = "#define inner\npush 1\n#enddefine\n#define outer\ninner!\n#enddefine\nouter!";
        let err = decode_err(src);
        assert_eq!(
            err.kind,
            DecodeErrorKind::UnknownOpcode {
                name: "inner!".to_string()
            }
        );
    }

    #[test]
    fn decode_is_deterministic() {
        let src = "mov a 5\nloop: sub a 1\npush a\njg a loop\nwrite";
        assert_eq!(decode(src), decode(src));
        assert_eq!(decode("bogus"), decode("bogus"));
    }

    #[test]
    fn diagnostic_points_at_line() {
        let source = "push 1\n  jump end\n";
        let err = decode_err(source);
        let diag = render_diagnostic("prog.asm", source, &err);
        assert!(diag.starts_with("error[UnknownOpcode]: unknown instruction jump"));
        assert!(diag.contains(" --> prog.asm:2"));
        assert!(diag.contains("   2 |   jump end"));
        assert!(diag.contains("  |   ^^^^^^^^"));
    }
}
