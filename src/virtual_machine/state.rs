//! Machine state and the per-step deltas that describe how it changes.
//!
//! A client that starts from [`MachineState::new`] and applies every
//! [`StateDelta`] in order with [`MachineState::apply`] ends up with the same
//! registers, stack and pointer as the authoritative machine.

use crate::virtual_machine::operand::InputTarget;
use crate::virtual_machine::vm::Registers;

/// Instruction pointer: an index into the program or the halted sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pointer {
    At(usize),
    Halted,
}

/// Complete machine state between two steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineState {
    pub(crate) registers: Registers,
    /// Bottom first.
    pub(crate) stack: Vec<i64>,
    pub(crate) ip: Pointer,
    /// Instructions executed so far.
    pub(crate) steps: u64,
    /// Set by `read`, cleared when the input is supplied.
    pub(crate) awaiting_input: bool,
}

impl Default for MachineState {
    fn default() -> Self {
        Self::new()
    }
}

impl MachineState {
    /// Zeroed registers, empty stack, pointer at the first instruction.
    pub fn new() -> Self {
        Self {
            registers: Registers::new(),
            stack: Vec::new(),
            ip: Pointer::At(0),
            steps: 0,
            awaiting_input: false,
        }
    }

    pub fn registers(&self) -> &[i64] {
        self.registers.values()
    }

    /// Stack contents, bottom to top.
    pub fn stack(&self) -> &[i64] {
        &self.stack
    }

    pub fn pointer(&self) -> Pointer {
        self.ip
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_halted(&self) -> bool {
        self.ip == Pointer::Halted
    }

    pub fn is_awaiting_input(&self) -> bool {
        self.awaiting_input
    }

    /// Replays a delta onto this state, as a client mirroring the stream does.
    ///
    /// Only observable fields are updated; the step counter is not carried by
    /// deltas.
    pub fn apply(&mut self, delta: &StateDelta) {
        if let Some(values) = &delta.registers {
            self.registers.overwrite(values);
        }
        if let Some(stack) = &delta.stack {
            self.stack.clone_from(stack);
        }
        if let Some(ip) = delta.pointer {
            self.ip = Pointer::At(ip);
        }
        match delta.input {
            Some(InputEvent::Requested(_)) => self.awaiting_input = true,
            Some(InputEvent::Consumed(_)) => self.awaiting_input = false,
            None => {}
        }
        if delta.halted {
            self.ip = Pointer::Halted;
        }
    }
}

/// Input activity within one step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    /// The machine paused on a `read` and wants a value for `target`.
    Requested(InputTarget),
    /// A value was supplied (or seeded) and stored.
    Consumed(i64),
}

/// Everything observable that one step changed.
///
/// Register and stack changes are full snapshots so that deltas can be
/// applied without knowing the instruction that produced them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateDelta {
    /// New instruction index, when the pointer moved.
    pub pointer: Option<usize>,
    /// Whole register bank, when any register changed.
    pub registers: Option<Vec<i64>>,
    /// Whole stack bottom to top, when it changed.
    pub stack: Option<Vec<i64>>,
    pub output: Option<i64>,
    pub input: Option<InputEvent>,
    pub halted: bool,
}

impl StateDelta {
    /// A delta that only records the transition to halted.
    pub fn halt() -> Self {
        Self {
            halted: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
