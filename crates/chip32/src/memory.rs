use crate::machine::MachineError;

/// Size of the machine address space.
pub const ADDRESS_SPACE: usize = 0x1_0000;

/// A caller owned buffer mapped at `addr` in the 16 bit address space.
///
/// The machine never checks that the ROM and RAM regions are disjoint,
/// keeping them apart is up to the caller.
#[derive(Debug)]
pub struct VirtualMemory<M> {
    addr: u16,
    size: u32,
    mem: M,
}

pub type Rom<'a> = VirtualMemory<&'a [u8]>;
pub type Ram<'b> = VirtualMemory<&'b mut [u8]>;

/// Where an absolute address lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Location {
    /// Offset into the ROM region.
    Rom(u16),
    /// Offset into the RAM region.
    Ram(u16),
    Unmapped,
}

impl<M: AsRef<[u8]>> VirtualMemory<M> {
    /// Maps `mem` at `addr`, the region must end inside the address space.
    pub fn new(addr: u16, mem: M) -> Result<Self, MachineError> {
        let len = mem.as_ref().len();
        let fits = usize::from(addr)
            .checked_add(len)
            .is_some_and(|end| end <= ADDRESS_SPACE);
        let size = u32::try_from(len).map_err(|_| MachineError::InvalidAddress(u32::from(addr)))?;
        if !fits {
            return Err(MachineError::InvalidAddress(u32::from(addr)));
        }
        Ok(Self { addr, size, mem })
    }

    pub fn addr(&self) -> u16 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn size(&self) -> u32 {
        self.size
    }

    pub fn as_slice(&self) -> &[u8] {
        self.mem.as_ref()
    }

    /// Translates an absolute address to an offset into this region.
    pub fn offset_of(&self, addr: u16) -> Option<u16> {
        let offset = addr.checked_sub(self.addr)?;
        (u32::from(offset) < self.size).then_some(offset)
    }

    /// Whether a 32 bit word starting at `offset` lies inside the region.
    pub fn word_fits(&self, offset: u32) -> bool {
        offset.checked_add(4).is_some_and(|end| end <= self.size)
    }

    pub fn byte(&self, offset: u32) -> Option<u8> {
        let index = usize::try_from(offset).ok()?;
        self.as_slice().get(index).copied()
    }

    /// Reads a little endian word at `offset`.
    pub fn word(&self, offset: u32) -> Option<u32> {
        let start = usize::try_from(offset).ok()?;
        let bytes = self.as_slice().get(start..start.checked_add(4)?)?;
        let bytes: [u8; 4] = bytes.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }
}

impl<M: AsRef<[u8]> + AsMut<[u8]>> VirtualMemory<M> {
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.mem.as_mut()
    }

    /// Writes a little endian word at `offset`, `None` if it does not fit.
    pub fn set_word(&mut self, offset: u32, value: u32) -> Option<()> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(4)?;
        self.as_mut_slice()
            .get_mut(start..end)?
            .copy_from_slice(&value.to_le_bytes());
        Some(())
    }
}
