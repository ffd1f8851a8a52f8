//! `#define` macro expansion.
//!
//! Runs before decoding and is a plain, non-recursive textual substitution:
//!
//! ```text
//! #define twice
//! push a
//! push a
//! #enddefine
//!
//! twice!
//! ```
//!
//! Body lines are emitted verbatim and never re-scanned, so an invocation
//! inside a body reaches the decoder untouched. Per expansion, label
//! declarations in the body get the prefix `NAME-<n>#` and every `{}` in a
//! body line is replaced by that same prefix, which lets a macro jump to its
//! own local labels (`jmp {}loop`). A declaration that already spells the
//! placeholder (`{}loop:`) is not prefixed twice.
//!
//! Lines are trimmed and lower-cased, `//` comments are stripped, and every
//! emitted line remembers the source line it came from.

use crate::virtual_machine::errors::{DecodeError, PreprocessError};
use std::collections::HashMap;

pub(crate) const COMMENT_PREFIX: &str = "//";
const DEFINE: &str = "#define";
const ENDDEFINE: &str = "#enddefine";
const INVOKE_SUFFIX: char = '!';
const PLACEHOLDER: &str = "{}";
pub(crate) const LABEL_SUFFIX: char = ':';

/// A normalized source line and the 1-based line number it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub line: usize,
    pub text: String,
}

struct Macro {
    body: Vec<String>,
    expansions: usize,
}

/// Strips comments, trims and lower-cases a raw line.
fn normalize(raw: &str) -> String {
    let code = match raw.find(COMMENT_PREFIX) {
        Some(at) => &raw[..at],
        None => raw,
    };
    code.trim().to_lowercase()
}

/// Splits `label: name!` / `name!` into the optional label and macro name.
fn invocation(line: &str) -> Option<(Option<&str>, &str)> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (label, call) = match tokens.as_slice() {
        [call] => (None, *call),
        [label, call] if label.ends_with(LABEL_SUFFIX) => (Some(*label), *call),
        _ => return None,
    };
    let name = call.strip_suffix(INVOKE_SUFFIX)?;
    if name.is_empty() {
        return None;
    }
    Some((label, name))
}

/// Expands all macros in `source`.
pub fn preprocess(source: &str) -> Result<Vec<SourceLine>, DecodeError> {
    let mut out = Vec::new();
    let mut macros: HashMap<String, Macro> = HashMap::new();
    let mut lines = source
        .lines()
        .enumerate()
        .map(|(i, raw)| (i + 1, normalize(raw)));

    while let Some((line_no, line)) = lines.next() {
        if line.is_empty() {
            continue;
        }

        if line == ENDDEFINE {
            return Err(DecodeError::new(line_no, PreprocessError::StrayEnddefine));
        }

        if line.starts_with(DEFINE) {
            let header: Vec<&str> = line.split_whitespace().collect();
            if header.len() != 2 || header[0] != DEFINE {
                return Err(DecodeError::new(
                    line_no,
                    PreprocessError::InvalidMacro {
                        reason: format!("bad definition header `{line}`"),
                    },
                ));
            }
            let name = header[1].to_string();
            if macros.contains_key(&name) {
                return Err(DecodeError::new(
                    line_no,
                    PreprocessError::MacroRedefinition { name },
                ));
            }

            let self_call = format!("{name}{INVOKE_SUFFIX}");
            let mut body = Vec::new();
            let mut closed = false;
            for (body_no, body_line) in lines.by_ref() {
                if body_line == ENDDEFINE {
                    closed = true;
                    break;
                }
                if body_line.is_empty() {
                    continue;
                }
                let bad = if body_line.starts_with(DEFINE) {
                    Some("nested #define".to_string())
                } else if body_line.split_whitespace().any(|t| t == self_call) {
                    Some(format!("macro {name} invokes itself"))
                } else if body_line.matches(PLACEHOLDER).count() > 1 {
                    Some(format!("too many '{PLACEHOLDER}' in one line"))
                } else {
                    None
                };
                if let Some(reason) = bad {
                    return Err(DecodeError::new(
                        body_no,
                        PreprocessError::InvalidMacro { reason },
                    ));
                }
                body.push(body_line);
            }
            if !closed {
                return Err(DecodeError::new(
                    line_no,
                    PreprocessError::UnterminatedDefine { name },
                ));
            }

            macros.insert(
                name,
                Macro {
                    body,
                    expansions: 0,
                },
            );
            continue;
        }

        if let Some((label, name)) = invocation(&line) {
            let Some(mac) = macros.get_mut(name) else {
                return Err(DecodeError::new(
                    line_no,
                    PreprocessError::UndefinedMacro {
                        name: name.to_string(),
                    },
                ));
            };

            if let Some(label) = label {
                out.push(SourceLine {
                    line: line_no,
                    text: label.to_string(),
                });
            }

            let prefix = format!("{name}-{}#", mac.expansions);
            mac.expansions += 1;
            for body_line in &mac.body {
                let text = if body_line
                    .split_whitespace()
                    .next()
                    .is_some_and(|t| t.ends_with(LABEL_SUFFIX) && !t.contains(PLACEHOLDER))
                {
                    format!("{prefix}{body_line}")
                } else {
                    body_line.clone()
                };
                out.push(SourceLine {
                    line: line_no,
                    text: text.replace(PLACEHOLDER, &prefix),
                });
            }
            continue;
        }

        out.push(SourceLine {
            line: line_no,
            text: line,
        });
    }

    Ok(out)
}
