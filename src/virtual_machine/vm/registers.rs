use crate::virtual_machine::errors::Fault;
use crate::virtual_machine::operand::{REGISTER_COUNT, Register};

/// Register bank.
///
/// Holds [`REGISTER_COUNT`] signed registers, all starting at zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registers {
    regs: [i64; REGISTER_COUNT],
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

impl Registers {
    /// Creates a zeroed register bank.
    pub(crate) fn new() -> Self {
        Self {
            regs: [0; REGISTER_COUNT],
        }
    }

    /// Returns the value in register `reg`.
    ///
    /// Returns [`Fault::InvalidRegister`] if `reg` is out of bounds.
    pub(crate) fn get(&self, reg: Register) -> Result<i64, Fault> {
        self.regs
            .get(reg.index())
            .copied()
            .ok_or(Fault::InvalidRegister {
                index: reg.0,
                available: REGISTER_COUNT,
            })
    }

    /// Stores a value into register `reg`.
    ///
    /// Returns [`Fault::InvalidRegister`] if `reg` is out of bounds.
    pub(crate) fn set(&mut self, reg: Register, v: i64) -> Result<(), Fault> {
        let slot = self
            .regs
            .get_mut(reg.index())
            .ok_or(Fault::InvalidRegister {
                index: reg.0,
                available: REGISTER_COUNT,
            })?;
        *slot = v;
        Ok(())
    }

    pub(crate) fn values(&self) -> &[i64] {
        &self.regs
    }

    /// Replaces the bank with a snapshot; extra values are ignored.
    pub(crate) fn overwrite(&mut self, values: &[i64]) {
        for (slot, v) in self.regs.iter_mut().zip(values) {
            *slot = *v;
        }
    }
}
