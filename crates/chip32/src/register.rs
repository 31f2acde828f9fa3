use variant_count::VariantCount;

use crate::machine::MachineError;

/// Register ids as encoded in instructions.
///
/// | name  | id    | use                              | preserved |
/// |-------|-------|----------------------------------|-----------|
/// | r0-r5 | 0-5   | general purpose                  | yes       |
/// | t0-t9 | 6-15  | general purpose, temporary/args  | no        |
/// | ip    | 16    | instruction pointer              | yes       |
/// | bp    | 17    | base pointer                     | yes       |
/// | sp    | 18    | stack pointer                    | yes       |
/// | ra    | 19    | return address                   | no        |
/// | ov    | 20    | overflow                         | yes       |
#[repr(u8)]
#[derive(VariantCount, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Register {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    T0,
    T1,
    T2,
    T3,
    T4,
    T5,
    T6,
    T7,
    T8,
    T9,
    Ip,
    Bp,
    Sp,
    Ra,
    Ov,
}

pub const REGISTER_COUNT: usize = Register::VARIANT_COUNT;

const ALL_REGISTERS: [Register; REGISTER_COUNT] = [
    Register::R0,
    Register::R1,
    Register::R2,
    Register::R3,
    Register::R4,
    Register::R5,
    Register::T0,
    Register::T1,
    Register::T2,
    Register::T3,
    Register::T4,
    Register::T5,
    Register::T6,
    Register::T7,
    Register::T8,
    Register::T9,
    Register::Ip,
    Register::Bp,
    Register::Sp,
    Register::Ra,
    Register::Ov,
];

#[allow(clippy::indexing_slicing, clippy::arithmetic_side_effects)]
const _: () = {
    let mut index = 0;
    while index < REGISTER_COUNT {
        assert!(ALL_REGISTERS[index] as usize == index);
        index += 1;
    }
};

impl Register {
    pub const fn id(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::R0 => "r0",
            Self::R1 => "r1",
            Self::R2 => "r2",
            Self::R3 => "r3",
            Self::R4 => "r4",
            Self::R5 => "r5",
            Self::T0 => "t0",
            Self::T1 => "t1",
            Self::T2 => "t2",
            Self::T3 => "t3",
            Self::T4 => "t4",
            Self::T5 => "t5",
            Self::T6 => "t6",
            Self::T7 => "t7",
            Self::T8 => "t8",
            Self::T9 => "t9",
            Self::Ip => "ip",
            Self::Bp => "bp",
            Self::Sp => "sp",
            Self::Ra => "ra",
            Self::Ov => "ov",
        }
    }

    /// Whether a callee must leave this register as it found it.
    pub const fn is_preserved(self) -> bool {
        !matches!(
            self,
            Self::T0
                | Self::T1
                | Self::T2
                | Self::T3
                | Self::T4
                | Self::T5
                | Self::T6
                | Self::T7
                | Self::T8
                | Self::T9
                | Self::Ra
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_REGISTERS
            .iter()
            .copied()
            .find(|register| register.name().eq_ignore_ascii_case(name))
    }
}

impl TryFrom<u8> for Register {
    type Error = MachineError;
    fn try_from(id: u8) -> Result<Self, Self::Error> {
        ALL_REGISTERS
            .get(usize::from(id))
            .copied()
            .ok_or(MachineError::InvalidRegister(id))
    }
}

/// The register file, zeroed on machine initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registers {
    values: [u32; REGISTER_COUNT],
}

impl Registers {
    pub const fn new() -> Self {
        Self {
            values: [0; REGISTER_COUNT],
        }
    }

    pub fn get(&self, register: Register) -> u32 {
        self.read_raw(register.id())
    }

    pub fn set(&mut self, register: Register, value: u32) {
        self.write_raw(register.id(), value);
    }

    /// Reads by raw id, ids past the end read as zero.
    pub(crate) fn read_raw(&self, id: u8) -> u32 {
        self.values.get(usize::from(id)).copied().unwrap_or(0)
    }

    /// Writes by raw id, writes past the end are dropped.
    pub(crate) fn write_raw(&mut self, id: u8, value: u32) {
        if let Some(slot) = self.values.get_mut(usize::from(id)) {
            *slot = value;
        }
    }

    pub fn clear(&mut self) {
        self.values = [0; REGISTER_COUNT];
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.values
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_ids() {
        assert_eq!(Register::from_name("T9"), Some(Register::T9));
        assert_eq!(Register::from_name("ov"), Some(Register::Ov));
        assert_eq!(Register::from_name("r6"), None);
        assert_eq!(Register::try_from(18).unwrap(), Register::Sp);
        assert!(matches!(
            Register::try_from(REGISTER_COUNT as u8),
            Err(MachineError::InvalidRegister(21))
        ));
    }

    #[test]
    fn temporaries_are_not_preserved() {
        assert!(Register::R5.is_preserved());
        assert!(Register::Sp.is_preserved());
        assert!(!Register::T0.is_preserved());
        assert!(!Register::Ra.is_preserved());
    }
}
