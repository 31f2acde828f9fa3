#![no_std]

#![cfg_attr(
    not(test),
    deny(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::todo,
        clippy::unimplemented,
        clippy::indexing_slicing,
        clippy::string_slice,
        clippy::arithmetic_side_effects,
        clippy::panicking_unwrap,
        clippy::out_of_bounds_indexing,
        clippy::panic_in_result_fn,
        clippy::unwrap_in_result,
    )
)]
#![cfg_attr(not(test), warn(clippy::missing_panics_doc))]

//! A small register machine and the assembler that feeds it.
//!
//! The machine works over two caller owned memory regions placed in a
//! 16 bit address space:
//! `
//!     rom: VirtualMemory<&'a [u8]>,
//!     ram: VirtualMemory<&'b mut [u8]>,
//! `
//! The `rom` holds the program image produced by the [`assembler`] along
//! with any constants it declares. The `ram` holds the stack, which starts
//! at the top of the region and grows down, and any data the program
//! reserves. Instruction, stack and load/store addresses are offsets into
//! their region; absolute addresses are only used by the host side
//! translation helpers on [`Machine`].
//!
//! Every instruction is one opcode byte followed by its little endian
//! operands, see [`opcode`] for the encoding table.

#[macro_use]
mod fmt;

pub mod assembler;
pub mod checks;
pub mod machine;
pub mod memory;
pub mod opcode;
pub mod register;

pub use assembler::{Assembler, AssemblerError, AssemblerErrorKind, AssemblyResult};
pub use checks::{Checked, Checks, Unchecked};
pub use machine::{InterruptHandler, Machine, MachineError, Outcome};
pub use memory::{Location, Ram, Rom, VirtualMemory};
pub use opcode::{Opcode, OpcodeInfo, INSTRUCTION_COUNT};
pub use register::{Register, Registers, REGISTER_COUNT};


#[cfg(test)]
mod assembler_test;
