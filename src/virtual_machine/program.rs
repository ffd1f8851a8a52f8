//! Decoded program representation.

use crate::virtual_machine::isa::Instruction;
use std::collections::HashMap;

/// Immutable, decoded program.
///
/// Holds the instruction sequence, the label table (label name to
/// instruction index) and, for diagnostics, the source line each
/// instruction was decoded from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Program {
    instructions: Vec<Instruction>,
    labels: HashMap<String, usize>,
    lines: Vec<usize>,
}

impl Program {
    /// Builds a program from already decoded parts.
    ///
    /// `lines` must have one entry per instruction; missing entries are
    /// reported as line 0.
    pub fn new(
        instructions: Vec<Instruction>,
        labels: HashMap<String, usize>,
        lines: Vec<usize>,
    ) -> Self {
        Self {
            instructions,
            labels,
            lines,
        }
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Instruction at `ip`, or `None` past the end.
    pub fn get(&self, ip: usize) -> Option<&Instruction> {
        self.instructions.get(ip)
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Instruction index bound to `name`.
    pub fn label(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    pub fn labels(&self) -> &HashMap<String, usize> {
        &self.labels
    }

    /// Source line the instruction at `ip` came from.
    pub fn source_line(&self, ip: usize) -> usize {
        self.lines.get(ip).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let program = Program::new(
            vec![Instruction::Halt {}],
            HashMap::from([("end".to_string(), 1)]),
            vec![7],
        );
        assert_eq!(program.len(), 1);
        assert!(!program.is_empty());
        assert_eq!(program.get(0), Some(&Instruction::Halt {}));
        assert_eq!(program.get(1), None);
        assert_eq!(program.label("end"), Some(1));
        assert_eq!(program.label("start"), None);
        assert_eq!(program.source_line(0), 7);
        assert_eq!(program.source_line(5), 0);
    }

    #[test]
    fn default_is_empty() {
        assert!(Program::default().is_empty());
    }
}
