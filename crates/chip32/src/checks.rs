//! Bounds checking policies.
//!
//! A machine checks register ids, ROM and RAM bounds and the stack limits
//! before every access. Trusted images can skip those guards by running
//! on an [`Unchecked`] machine; out of range accesses then read as zero and
//! writes go nowhere. Opcode validity and division by zero are always
//! checked.

use crate::machine::MachineError;

pub trait Checks {
    /// Reports `error` unless `condition` holds.
    fn ensure(condition: bool, error: MachineError) -> Result<(), MachineError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Checked;

#[derive(Debug, Clone, Copy, Default)]
pub struct Unchecked;

impl Checks for Checked {
    #[inline(always)]
    fn ensure(condition: bool, error: MachineError) -> Result<(), MachineError> {
        if condition { Ok(()) } else { Err(error) }
    }
}

impl Checks for Unchecked {
    #[inline(always)]
    fn ensure(_condition: bool, _error: MachineError) -> Result<(), MachineError> {
        Ok(())
    }
}
