//! Instruction operands and their textual forms.

use std::fmt;

/// Number of registers in the machine's bank.
pub const REGISTER_COUNT: usize = 4;

/// Letter aliases for `r0..r3`, in bank order.
pub const REGISTER_NAMES: [&str; REGISTER_COUNT] = ["a", "b", "c", "d"];

/// Largest magnitude any value in the machine may reach.
pub const MAX_VALUE: i64 = 1 << 31;

/// Register index as written in the source.
///
/// Indices are only range-checked when executed, so `r99` decodes fine and
/// faults with `InvalidRegister` at runtime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Register(pub u8);

impl Register {
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Parses `a`..`d` or `r<N>` with `N` fitting in a byte.
    pub fn parse(tok: &str) -> Option<Register> {
        if let Some(idx) = REGISTER_NAMES.iter().position(|name| *name == tok) {
            return Some(Register(idx as u8));
        }
        let digits = tok.strip_prefix('r')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u8>().ok().map(Register)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match REGISTER_NAMES.get(self.index()) {
            Some(name) => f.write_str(name),
            None => write!(f, "r{}", self.0),
        }
    }
}

/// Source operand: a register read or an immediate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(Register),
    Imm(i64),
}

impl Operand {
    /// Returns a human-readable type name for error messages.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Operand::Reg(_) => "Register",
            Operand::Imm(_) => "Integer",
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Imm(v) => write!(f, "{v}"),
        }
    }
}

/// Where a `read` delivers its input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputTarget {
    Stack,
    Reg(Register),
}

impl fmt::Display for InputTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputTarget::Stack => f.write_str("stack"),
            InputTarget::Reg(r) => write!(f, "{r}"),
        }
    }
}

/// Checks that `v` lies within `[-MAX_VALUE, MAX_VALUE]`.
pub const fn in_range(v: i64) -> bool {
    v >= -MAX_VALUE && v <= MAX_VALUE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_letter_registers() {
        assert_eq!(Register::parse("a"), Some(Register(0)));
        assert_eq!(Register::parse("d"), Some(Register(3)));
        assert_eq!(Register::parse("e"), None);
    }

    #[test]
    fn parse_numbered_registers() {
        assert_eq!(Register::parse("r0"), Some(Register(0)));
        assert_eq!(Register::parse("r99"), Some(Register(99)));
        assert_eq!(Register::parse("r255"), Some(Register(255)));
        assert_eq!(Register::parse("r256"), None);
        assert_eq!(Register::parse("r"), None);
        assert_eq!(Register::parse("r-1"), None);
        assert_eq!(Register::parse("r+1"), None);
    }

    #[test]
    fn register_display_prefers_letters() {
        assert_eq!(Register(1).to_string(), "b");
        assert_eq!(Register(42).to_string(), "r42");
    }

    #[test]
    fn value_range() {
        assert!(in_range(MAX_VALUE));
        assert!(in_range(-MAX_VALUE));
        assert!(!in_range(MAX_VALUE + 1));
        assert_eq!(Operand::Imm(3).type_name(), "Integer");
        assert_eq!(InputTarget::Reg(Register(2)).to_string(), "c");
    }
}
