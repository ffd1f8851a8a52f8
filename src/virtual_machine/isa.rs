//! Instruction Set Architecture (ISA) definitions.
//!
//! The [`for_each_instruction!`](crate::for_each_instruction) macro holds the
//! canonical list of instruction forms and invokes a callback macro for code
//! generation, so the decoder and the VM never drift apart.
//!
//! A mnemonic may have several forms distinguished by operand count, e.g.
//! `add` (stack form) and `add reg, value` (register form).
//!
//! This module generates:
//! - The [`Instruction`] enum, one variant per form, with typed operands
//! - [`Instruction::mnemonic`] and [`MNEMONICS`]
//!
//! Operand kinds:
//! - `Reg`: register index ([`Register`])
//! - `Value`: register or immediate ([`Operand`])
//! - `Label`: label reference, resolved to an instruction index by the decoder

use crate::virtual_machine::operand::{Operand, Register};

/// Invokes a callback macro with the complete instruction form list.
#[macro_export]
macro_rules! for_each_instruction {
    ($callback:ident) => {
        $callback! {
            // =========================
            // Stack
            // =========================
            /// PUSH value ; push value onto the stack
            Push, "push" => [value: Value],
            /// POP ; discard the top of the stack
            Pop, "pop" => [],
            /// POP rd ; rd = pop()
            PopInto, "pop" => [rd: Reg],
            // =========================
            // Arithmetic
            // =========================
            /// ADD ; push(pop_left + pop_right)
            Add, "add" => [],
            /// ADD rd, value ; rd = rd + value
            AddReg, "add" => [rd: Reg, value: Value],
            /// SUB ; push(pop_left - pop_right)
            Sub, "sub" => [],
            /// SUB rd, value ; rd = rd - value
            SubReg, "sub" => [rd: Reg, value: Value],
            /// MUL ; push(pop_left * pop_right)
            Mul, "mul" => [],
            /// MUL rd, value ; rd = rd * value
            MulReg, "mul" => [rd: Reg, value: Value],
            /// DIV ; push(pop_left / pop_right), truncating
            Div, "div" => [],
            /// DIV rd, value ; rd = rd / value, truncating
            DivReg, "div" => [rd: Reg, value: Value],
            /// MOD ; push(pop_left % pop_right)
            Mod, "mod" => [],
            /// MOD rd, value ; rd = rd % value
            ModReg, "mod" => [rd: Reg, value: Value],
            /// MOV rd, value ; rd = value
            Mov, "mov" => [rd: Reg, value: Value],
            // =========================
            // Control flow
            // =========================
            /// JMP label ; ip = label
            Jmp, "jmp" => [target: Label],
            /// JE label ; if top of stack == 0 then ip = label
            Je, "je" => [target: Label],
            /// JE rs, label ; if rs == 0 then ip = label
            JeReg, "je" => [rs: Reg, target: Label],
            /// JL label ; if top of stack < 0 then ip = label
            Jl, "jl" => [target: Label],
            /// JL rs, label ; if rs < 0 then ip = label
            JlReg, "jl" => [rs: Reg, target: Label],
            /// JG label ; if top of stack > 0 then ip = label
            Jg, "jg" => [target: Label],
            /// JG rs, label ; if rs > 0 then ip = label
            JgReg, "jg" => [rs: Reg, target: Label],
            /// HALT ; stop the machine
            Halt, "halt" => [],
            // =========================
            // I/O
            // =========================
            /// READ ; wait for input and push it
            Read, "read" => [],
            /// READ rd ; wait for input and store it in rd
            ReadInto, "read" => [rd: Reg],
            /// WRITE ; output pop()
            Write, "write" => [],
            /// WRITE value ; output value
            WriteValue, "write" => [value: Value],
        }
    };
}

#[macro_export]
macro_rules! define_instructions {
    (
        $(
            $(#[$doc:meta])*
            $name:ident, $mnemonic:literal => [
                $( $field:ident : $kind:ident ),* $(,)?
            ]
        ),* $(,)?
    ) => {
        /// One decoded instruction form with its operands.
        #[derive(Copy, Clone, Debug, Eq, PartialEq)]
        pub enum Instruction {
            $(
                $(#[$doc])*
                $name { $( $field: define_instructions!(@ty $kind) ),* },
            )*
        }

        impl Instruction {
            /// Returns the assembly mnemonic for this instruction.
            pub const fn mnemonic(&self) -> &'static str {
                match self {
                    $( Instruction::$name { .. } => $mnemonic, )*
                }
            }
        }

        /// Every mnemonic, once per form (duplicates for multi-form mnemonics).
        pub const MNEMONICS: &[&str] = &[ $( $mnemonic ),* ];
    };

    // ---------- types ----------
    (@ty Reg)   => { Register };
    (@ty Value) => { Operand };
    (@ty Label) => { usize };
}

for_each_instruction!(define_instructions);

impl Instruction {
    /// Returns the jump target if this is a (conditional) jump.
    pub const fn jump_target(&self) -> Option<usize> {
        match self {
            Instruction::Jmp { target }
            | Instruction::Je { target }
            | Instruction::JeReg { target, .. }
            | Instruction::Jl { target }
            | Instruction::JlReg { target, .. }
            | Instruction::Jg { target }
            | Instruction::JgReg { target, .. } => Some(*target),
            _ => None,
        }
    }
}

/// Returns whether `name` is a known mnemonic.
pub fn is_mnemonic(name: &str) -> bool {
    MNEMONICS.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_cover_every_form() {
        assert_eq!(Instruction::Add {}.mnemonic(), "add");
        assert_eq!(
            Instruction::AddReg {
                rd: Register(0),
                value: Operand::Imm(1)
            }
            .mnemonic(),
            "add"
        );
        assert_eq!(Instruction::ReadInto { rd: Register(1) }.mnemonic(), "read");
    }

    #[test]
    fn is_mnemonic_known_and_unknown() {
        for name in [
            "push", "pop", "add", "sub", "mul", "div", "mod", "mov", "jmp", "je", "jl", "jg",
            "halt", "read", "write",
        ] {
            assert!(is_mnemonic(name), "{name}");
        }
        assert!(!is_mnemonic("jump"));
        assert!(!is_mnemonic("PUSH"));
    }

    #[test]
    fn jump_target_only_on_jumps() {
        assert_eq!(Instruction::Jmp { target: 4 }.jump_target(), Some(4));
        assert_eq!(
            Instruction::JgReg {
                rs: Register(0),
                target: 2
            }
            .jump_target(),
            Some(2)
        );
        assert_eq!(Instruction::Halt {}.jump_target(), None);
    }
}
