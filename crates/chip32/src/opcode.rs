//! Instruction set.
//!
//! Each instruction is encoded as its opcode byte followed by
//! [`OpcodeInfo::arg_bytes`] bytes of operands. Register operands take one
//! byte holding the register id, addresses and jump targets take two bytes
//! and immediates take one or four bytes, all little endian.

use variant_count::VariantCount;

use crate::machine::MachineError;

#[repr(u8)] // Must match the encoded opcode byte
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Opcode {
    /// Does nothing.
    Nop,
    /// Stops execution, the run finishes.
    Halt,
    /// Calls the host interrupt handler with an 8 bit code.
    Syscall,
    /// Loads a 32 bit constant into a register.
    Lcons,
    /// Copies the second register into the first.
    Mov,
    /// Pushes a register onto the stack.
    Push,
    /// Pops the top of the stack into a register.
    Pop,
    /// Saves the next instruction address in `ra` and jumps.
    Call,
    /// Jumps to the address held in `ra`.
    Ret,
    /// Writes a register to RAM.
    Store,
    /// Reads a register from RAM.
    Load,
    Add,
    Sub,
    Mul,
    Div,
    /// Logical shift left.
    Shl,
    /// Logical shift right.
    Shr,
    /// Arithmetic shift right, both operands read as signed.
    Ishr,
    And,
    Or,
    Xor,
    Not,
    /// Unconditional jump.
    Jmp,
    /// Jumps to the address held in a register.
    Jr,
    /// Skips the next instruction when the operand register id is zero.
    Skipz,
    /// Skips the next instruction when the operand register id is not zero.
    Skipnz,
}

/// Number of opcodes, any byte at or above this is not an instruction.
pub const INSTRUCTION_COUNT: usize = Opcode::VARIANT_COUNT;

/// Largest operand payload of any instruction (`LCONS reg, imm32`).
pub const MAX_ARG_BYTES: usize = 5;

/// Opcodes in encoding order.
pub const ALL_OPCODES: [Opcode; INSTRUCTION_COUNT] = [
    Opcode::Nop,
    Opcode::Halt,
    Opcode::Syscall,
    Opcode::Lcons,
    Opcode::Mov,
    Opcode::Push,
    Opcode::Pop,
    Opcode::Call,
    Opcode::Ret,
    Opcode::Store,
    Opcode::Load,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Shl,
    Opcode::Shr,
    Opcode::Ishr,
    Opcode::And,
    Opcode::Or,
    Opcode::Xor,
    Opcode::Not,
    Opcode::Jmp,
    Opcode::Jr,
    Opcode::Skipz,
    Opcode::Skipnz,
];

#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
const _: () = {
    let mut index = 0;
    while index < INSTRUCTION_COUNT {
        let opcode = ALL_OPCODES[index];
        assert!(opcode as usize == index);

        let info = opcode.info();
        assert!(info.arg_bytes as usize <= MAX_ARG_BYTES);

        let operands = opcode.operands();
        assert!(operands.len() == info.arg_count as usize);
        let mut width = 0;
        let mut operand = 0;
        while operand < operands.len() {
            width += operands[operand].width();
            operand += 1;
        }
        assert!(width == info.arg_bytes as usize);

        index += 1;
    }
};

/// Static description of one instruction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OpcodeInfo {
    pub opcode: Opcode,
    /// Operands expected by the assembler.
    pub arg_count: u8,
    /// Encoded operand bytes following the opcode byte.
    pub arg_bytes: u8,
}

impl OpcodeInfo {
    /// Full encoded length, opcode byte included.
    pub const fn encoded_len(&self) -> usize {
        (self.arg_bytes as usize).saturating_add(1)
    }
}

/// How an operand is written in source and encoded in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperandKind {
    /// A register name, one byte id.
    Register,
    /// An 8 bit literal.
    Immediate8,
    /// A 32 bit literal or the address of a symbol.
    Immediate32,
    /// A 16 bit RAM offset.
    Address,
    /// A 16 bit code address, usually a label.
    Target,
}

impl OperandKind {
    pub const fn width(self) -> usize {
        match self {
            Self::Register | Self::Immediate8 => 1,
            Self::Address | Self::Target => 2,
            Self::Immediate32 => 4,
        }
    }
}

impl Opcode {
    pub const fn info(self) -> OpcodeInfo {
        let (arg_count, arg_bytes) = match self {
            Self::Nop | Self::Halt | Self::Ret => (0, 0),
            Self::Syscall => (1, 1),
            Self::Lcons => (2, 5),
            Self::Mov => (2, 2),
            Self::Push | Self::Pop => (1, 1),
            Self::Call | Self::Jmp => (1, 2),
            Self::Store | Self::Load => (2, 3),
            Self::Add | Self::Sub | Self::Mul | Self::Div => (2, 2),
            Self::Shl | Self::Shr | Self::Ishr => (2, 2),
            Self::And | Self::Or | Self::Xor => (2, 2),
            Self::Not | Self::Jr | Self::Skipz | Self::Skipnz => (1, 1),
        };
        OpcodeInfo {
            opcode: self,
            arg_count,
            arg_bytes,
        }
    }

    /// Operand layout in source order, which is also encoding order.
    pub const fn operands(self) -> &'static [OperandKind] {
        use OperandKind::*;
        match self {
            Self::Nop | Self::Halt | Self::Ret => &[],
            Self::Syscall => &[Immediate8],
            Self::Lcons => &[Register, Immediate32],
            Self::Push | Self::Pop | Self::Not | Self::Jr | Self::Skipz | Self::Skipnz => {
                &[Register]
            }
            Self::Call | Self::Jmp => &[Target],
            Self::Store => &[Address, Register],
            Self::Load => &[Register, Address],
            Self::Mov
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Shl
            | Self::Shr
            | Self::Ishr
            | Self::And
            | Self::Or
            | Self::Xor => &[Register, Register],
        }
    }

    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Nop => "nop",
            Self::Halt => "halt",
            Self::Syscall => "syscall",
            Self::Lcons => "lcons",
            Self::Mov => "mov",
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Call => "call",
            Self::Ret => "ret",
            Self::Store => "store",
            Self::Load => "load",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Div => "div",
            Self::Shl => "shl",
            Self::Shr => "shr",
            Self::Ishr => "ishr",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Not => "not",
            Self::Jmp => "jmp",
            Self::Jr => "jr",
            Self::Skipz => "skipz",
            Self::Skipnz => "skipnz",
        }
    }

    /// Older spellings still accepted by the assembler.
    const fn alias(self) -> Option<&'static str> {
        match self {
            Self::Shl => Some("shiftl"),
            Self::Shr => Some("shiftr"),
            Self::Ishr => Some("ishiftr"),
            Self::Jmp => Some("jump"),
            Self::Jr => Some("jumpr"),
            _ => None,
        }
    }

    /// Case insensitive mnemonic lookup.
    pub fn from_mnemonic(name: &str) -> Option<Self> {
        ALL_OPCODES.iter().copied().find(|opcode| {
            opcode.mnemonic().eq_ignore_ascii_case(name)
                || opcode
                    .alias()
                    .is_some_and(|alias| alias.eq_ignore_ascii_case(name))
        })
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> u8 {
        opcode as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = MachineError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        ALL_OPCODES
            .get(usize::from(value))
            .copied()
            .ok_or(MachineError::UnknownOpcode(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_opcode_byte() {
        for (index, opcode) in ALL_OPCODES.iter().enumerate() {
            assert_eq!(Opcode::try_from(index as u8).unwrap(), *opcode);
        }
        assert!(matches!(
            Opcode::try_from(INSTRUCTION_COUNT as u8),
            Err(MachineError::UnknownOpcode(26))
        ));
    }

    #[test]
    fn mnemonics_are_case_insensitive() {
        assert_eq!(Opcode::from_mnemonic("LCONS"), Some(Opcode::Lcons));
        assert_eq!(Opcode::from_mnemonic("SkipNZ"), Some(Opcode::Skipnz));
        assert_eq!(Opcode::from_mnemonic("jump"), Some(Opcode::Jmp));
        assert_eq!(Opcode::from_mnemonic("ishiftr"), Some(Opcode::Ishr));
        assert_eq!(Opcode::from_mnemonic("lconst"), None);
    }

    #[test]
    fn encoded_lengths() {
        assert_eq!(Opcode::Halt.info().encoded_len(), 1);
        assert_eq!(Opcode::Lcons.info().encoded_len(), 6);
        assert_eq!(Opcode::Call.info().encoded_len(), 3);
        assert_eq!(Opcode::Store.info().encoded_len(), 4);
    }
}
