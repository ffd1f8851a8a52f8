//! Single-step stack/register virtual machine.
//!
//! Program text goes through the `#define` preprocessor and the decoder into
//! an immutable [`program::Program`]; the [`vm::Machine`] then executes it
//! one instruction at a time, producing a [`state::StateDelta`] per step.
//!
//! # Architecture
//!
//! - **Registers**: 4 signed registers `a b c d` (also `r0..r3`)
//! - **Stack**: LIFO of signed integers with a bounded depth
//! - **Values**: 64-bit integers kept within `±2^31`
//! - **Execution model**: pure steps over an explicit [`state::MachineState`];
//!   `read` pauses the machine until input is supplied
//!
//! # Modules
//!
//! - [`assembler`]: Decoding, label binding and diagnostics
//! - [`errors`]: Decode and runtime error types
//! - [`isa`]: Instruction set definition
//! - [`operand`]: Registers, value operands and input targets
//! - [`preprocessor`]: `#define` macro expansion
//! - [`program`]: Decoded program representation
//! - [`state`]: Machine state and per-step deltas
//! - [`vm`]: Core virtual machine implementation

pub mod assembler;
pub mod errors;
pub mod isa;
pub mod operand;
pub mod preprocessor;
pub mod program;
pub mod state;
pub mod vm;
