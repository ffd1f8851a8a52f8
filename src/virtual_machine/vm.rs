//! Core virtual machine implementation.
//!
//! The machine executes one decoded instruction per [`Machine::step`]. Steps
//! are pure: they read a [`MachineState`] and return a new one together with
//! the [`StateDelta`] describing the change, so a failing step never leaves a
//! partially mutated state behind.
//!
//! # Semantics
//!
//! - Values are signed 64-bit integers bounded by `±2^31`; leaving that range
//!   is a [`Fault::ValueOverflow`]
//! - Division and remainder truncate toward zero (`-7 / 2 == -3`)
//! - Stack arithmetic pops the right operand first: `push 5, push 2, sub`
//!   leaves `3`
//! - `je/jl/jg label` test the top of the stack without popping it;
//!   `je/jl/jg reg, label` test a register. Both compare against zero
//! - `read` pauses the machine; [`Machine::resume`] supplies the value

mod registers;

pub use registers::Registers;

use crate::virtual_machine::errors::{Fault, ResourceLimit};
use crate::virtual_machine::isa::Instruction;
use crate::virtual_machine::operand::{InputTarget, MAX_VALUE, Operand, Register, in_range};
use crate::virtual_machine::program::Program;
use crate::virtual_machine::state::{InputEvent, MachineState, Pointer, StateDelta};

/// Default ceiling on stack depth.
pub const MAX_STACK_DEPTH: usize = 1000;

/// Default ceiling on executed instructions per run.
pub const MAX_STEPS: u64 = 100_000;

/// Per-run resource ceilings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    pub max_stack_depth: usize,
    /// `None` disables the step ceiling.
    pub max_steps: Option<u64>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_stack_depth: MAX_STACK_DEPTH,
            max_steps: Some(MAX_STEPS),
        }
    }
}

/// Result of one step: the next state and what changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transition {
    pub state: MachineState,
    pub delta: StateDelta,
}

#[derive(Clone, Copy, Debug)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Clone, Copy, Debug)]
enum Cmp {
    Zero,
    Negative,
    Positive,
}

impl Cmp {
    const fn holds(self, v: i64) -> bool {
        match self {
            Cmp::Zero => v == 0,
            Cmp::Negative => v < 0,
            Cmp::Positive => v > 0,
        }
    }
}

macro_rules! exec_vm {
    (
        exec = $exec:ident,
        instr = $instr:expr,
        { $( $variant:ident { $( $field:ident ),* } => $handler:ident ( $( $arg:expr ),* ) ),* $(,)? }
    ) => {{
        match $instr {
            $(
                Instruction::$variant { $( $field ),* } => $exec.$handler( $( $arg ),* ),
            )*
        }
    }};
}

/// Working copy of the state while one instruction executes.
struct Exec<'a> {
    state: MachineState,
    delta: StateDelta,
    ip: usize,
    program: &'a Program,
    limits: &'a Limits,
}

impl Exec<'_> {
    fn finish(self) -> Transition {
        Transition {
            state: self.state,
            delta: self.delta,
        }
    }

    fn advance(&mut self) -> Result<(), Fault> {
        let next = self.ip + 1;
        self.state.ip = Pointer::At(next);
        self.delta.pointer = Some(next);
        Ok(())
    }

    fn jump(&mut self, target: usize) -> Result<(), Fault> {
        if target > self.program.len() {
            return Err(Fault::InvalidJumpTarget {
                target,
                len: self.program.len(),
            });
        }
        self.state.ip = Pointer::At(target);
        self.delta.pointer = Some(target);
        Ok(())
    }

    fn read(&self, operand: Operand) -> Result<i64, Fault> {
        match operand {
            Operand::Reg(r) => self.state.registers.get(r),
            Operand::Imm(v) => Ok(v),
        }
    }

    fn set_reg(&mut self, reg: Register, v: i64) -> Result<(), Fault> {
        self.state.registers.set(reg, v)?;
        self.delta.registers = Some(self.state.registers.values().to_vec());
        Ok(())
    }

    fn push(&mut self, v: i64) -> Result<(), Fault> {
        let max = self.limits.max_stack_depth;
        if self.state.stack.len() >= max {
            return Err(Fault::ResourceLimitExceeded(ResourceLimit::StackDepth(max)));
        }
        self.state.stack.push(v);
        self.delta.stack = Some(self.state.stack.clone());
        Ok(())
    }

    fn pop(&mut self) -> Result<i64, Fault> {
        let v = self
            .state
            .stack
            .pop()
            .ok_or(Fault::StackUnderflow { ip: self.ip })?;
        self.delta.stack = Some(self.state.stack.clone());
        Ok(v)
    }

    fn peek(&self) -> Result<i64, Fault> {
        self.state
            .stack
            .last()
            .copied()
            .ok_or(Fault::StackUnderflow { ip: self.ip })
    }

    fn arith(&self, op: ArithOp, left: i64, right: i64) -> Result<i64, Fault> {
        let result = match op {
            ArithOp::Add => left.checked_add(right),
            ArithOp::Sub => left.checked_sub(right),
            ArithOp::Mul => left.checked_mul(right),
            ArithOp::Div | ArithOp::Mod if right == 0 => {
                return Err(Fault::DivisionByZero { ip: self.ip });
            }
            ArithOp::Div => left.checked_div(right),
            ArithOp::Mod => left.checked_rem(right),
        };
        match result {
            Some(v) if in_range(v) => Ok(v),
            _ => Err(Fault::ValueOverflow {
                ip: self.ip,
                max: MAX_VALUE,
            }),
        }
    }

    fn op_push(&mut self, value: Operand) -> Result<(), Fault> {
        let v = self.read(value)?;
        self.push(v)?;
        self.advance()
    }

    fn op_pop(&mut self) -> Result<(), Fault> {
        self.pop()?;
        self.advance()
    }

    fn op_pop_into(&mut self, rd: Register) -> Result<(), Fault> {
        let v = self.pop()?;
        self.set_reg(rd, v)?;
        self.advance()
    }

    fn op_stack_arith(&mut self, op: ArithOp) -> Result<(), Fault> {
        if self.state.stack.len() < 2 {
            return Err(Fault::StackUnderflow { ip: self.ip });
        }
        let len = self.state.stack.len();
        let (left, right) = (self.state.stack[len - 2], self.state.stack[len - 1]);
        let result = self.arith(op, left, right)?;
        self.pop()?;
        self.pop()?;
        self.push(result)?;
        self.advance()
    }

    fn op_reg_arith(&mut self, op: ArithOp, rd: Register, value: Operand) -> Result<(), Fault> {
        let left = self.state.registers.get(rd)?;
        let right = self.read(value)?;
        let result = self.arith(op, left, right)?;
        self.set_reg(rd, result)?;
        self.advance()
    }

    fn op_mov(&mut self, rd: Register, value: Operand) -> Result<(), Fault> {
        let v = self.read(value)?;
        self.set_reg(rd, v)?;
        self.advance()
    }

    fn op_jmp(&mut self, target: usize) -> Result<(), Fault> {
        self.jump(target)
    }

    fn op_branch(&mut self, cmp: Cmp, target: usize) -> Result<(), Fault> {
        if cmp.holds(self.peek()?) {
            self.jump(target)
        } else {
            self.advance()
        }
    }

    fn op_branch_reg(&mut self, cmp: Cmp, rs: Register, target: usize) -> Result<(), Fault> {
        if cmp.holds(self.state.registers.get(rs)?) {
            self.jump(target)
        } else {
            self.advance()
        }
    }

    fn op_halt(&mut self) -> Result<(), Fault> {
        self.state.ip = Pointer::Halted;
        self.delta.halted = true;
        Ok(())
    }

    fn op_read(&mut self, target: InputTarget) -> Result<(), Fault> {
        if let InputTarget::Reg(r) = target {
            self.state.registers.get(r)?;
        }
        self.state.awaiting_input = true;
        self.delta.input = Some(InputEvent::Requested(target));
        Ok(())
    }

    fn op_write(&mut self) -> Result<(), Fault> {
        let v = self.pop()?;
        self.delta.output = Some(v);
        self.advance()
    }

    fn op_write_value(&mut self, value: Operand) -> Result<(), Fault> {
        let v = self.read(value)?;
        self.delta.output = Some(v);
        self.advance()
    }
}

/// Bytecode-free interpreter over a decoded [`Program`].
///
/// Holds no mutable state of its own; every call takes the current
/// [`MachineState`] and returns the next one.
#[derive(Clone, Copy, Debug)]
pub struct Machine<'p> {
    program: &'p Program,
    limits: Limits,
}

impl<'p> Machine<'p> {
    pub fn new(program: &'p Program, limits: Limits) -> Self {
        Self { program, limits }
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    /// Executes the instruction under the pointer.
    ///
    /// Stepping past the last instruction (or on a halted machine) yields a
    /// halt delta. Stepping while input is pending repeats the input request
    /// without changing anything.
    pub fn step(&self, state: &MachineState) -> Result<Transition, Fault> {
        let ip = match state.ip {
            Pointer::Halted => {
                return Ok(Transition {
                    state: state.clone(),
                    delta: StateDelta::halt(),
                });
            }
            Pointer::At(ip) => ip,
        };

        let Some(&instr) = self.program.get(ip) else {
            let mut next = state.clone();
            next.ip = Pointer::Halted;
            next.awaiting_input = false;
            return Ok(Transition {
                state: next,
                delta: StateDelta::halt(),
            });
        };

        if state.awaiting_input {
            let target = match instr {
                Instruction::ReadInto { rd } => InputTarget::Reg(rd),
                _ => InputTarget::Stack,
            };
            return Ok(Transition {
                state: state.clone(),
                delta: StateDelta {
                    input: Some(InputEvent::Requested(target)),
                    ..StateDelta::default()
                },
            });
        }

        if let Some(max) = self.limits.max_steps {
            if state.steps >= max {
                return Err(Fault::ResourceLimitExceeded(ResourceLimit::StepCount(max)));
            }
        }

        let mut exec = Exec {
            state: state.clone(),
            delta: StateDelta::default(),
            ip,
            program: self.program,
            limits: &self.limits,
        };
        exec.state.steps += 1;

        let executed: Result<(), Fault> = exec_vm! {
            exec = exec,
            instr = instr,
            {
                // Stack
                Push { value } => op_push(value),
                Pop {} => op_pop(),
                PopInto { rd } => op_pop_into(rd),
                // Arithmetic
                Add {} => op_stack_arith(ArithOp::Add),
                AddReg { rd, value } => op_reg_arith(ArithOp::Add, rd, value),
                Sub {} => op_stack_arith(ArithOp::Sub),
                SubReg { rd, value } => op_reg_arith(ArithOp::Sub, rd, value),
                Mul {} => op_stack_arith(ArithOp::Mul),
                MulReg { rd, value } => op_reg_arith(ArithOp::Mul, rd, value),
                Div {} => op_stack_arith(ArithOp::Div),
                DivReg { rd, value } => op_reg_arith(ArithOp::Div, rd, value),
                Mod {} => op_stack_arith(ArithOp::Mod),
                ModReg { rd, value } => op_reg_arith(ArithOp::Mod, rd, value),
                Mov { rd, value } => op_mov(rd, value),
                // Control flow
                Jmp { target } => op_jmp(target),
                Je { target } => op_branch(Cmp::Zero, target),
                JeReg { rs, target } => op_branch_reg(Cmp::Zero, rs, target),
                Jl { target } => op_branch(Cmp::Negative, target),
                JlReg { rs, target } => op_branch_reg(Cmp::Negative, rs, target),
                Jg { target } => op_branch(Cmp::Positive, target),
                JgReg { rs, target } => op_branch_reg(Cmp::Positive, rs, target),
                Halt {} => op_halt(),
                // I/O
                Read {} => op_read(InputTarget::Stack),
                ReadInto { rd } => op_read(InputTarget::Reg(rd)),
                Write {} => op_write(),
                WriteValue { value } => op_write_value(value),
            }
        };
        executed?;

        Ok(exec.finish())
    }

    /// Supplies the value a paused `read` is waiting for and advances past it.
    pub fn resume(&self, state: &MachineState, value: i64) -> Result<Transition, Fault> {
        let ip = match state.ip {
            Pointer::At(ip) if state.awaiting_input => ip,
            _ => return Err(Fault::UnexpectedInput),
        };
        if !in_range(value) {
            return Err(Fault::InvalidInput {
                input: value.to_string(),
                max: MAX_VALUE,
            });
        }

        let mut exec = Exec {
            state: state.clone(),
            delta: StateDelta::default(),
            ip,
            program: self.program,
            limits: &self.limits,
        };
        match self.program.get(ip) {
            Some(Instruction::Read {}) => exec.push(value)?,
            Some(Instruction::ReadInto { rd }) => exec.set_reg(*rd, value)?,
            _ => return Err(Fault::UnexpectedInput),
        }
        exec.state.awaiting_input = false;
        exec.delta.input = Some(InputEvent::Consumed(value));
        exec.advance()?;
        Ok(exec.finish())
    }

    /// Pushes a value before the run starts, without moving the pointer.
    pub fn seed(&self, state: &MachineState, value: i64) -> Result<Transition, Fault> {
        let mut exec = Exec {
            state: state.clone(),
            delta: StateDelta::default(),
            ip: 0,
            program: self.program,
            limits: &self.limits,
        };
        exec.push(value)?;
        exec.delta.input = Some(InputEvent::Consumed(value));
        Ok(exec.finish())
    }
}
