//! The execution engine.
//!
//! A [`Machine`] owns the register file and borrows the two memory regions
//! for its lifetime. [`Machine::run`] executes instructions until the
//! program halts, a syscall handler asks to stop, the instruction budget is
//! used up or a check fails. A paused machine keeps its registers and
//! instruction pointer, calling `run` again resumes where it stopped.

use core::marker::PhantomData;

use thiserror_no_std::Error;

use crate::checks::{Checked, Checks, Unchecked};
use crate::memory::{Location, Ram, Rom};
use crate::opcode::{MAX_ARG_BYTES, Opcode, OperandKind};
use crate::register::{REGISTER_COUNT, Register, Registers};

/// Bytes moved by one stack push or pop.
const WORD_BYTES: u32 = 4;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MachineError {
    #[error("byte {0} is not a valid opcode")]
    UnknownOpcode(u8),
    #[error("register id {0} is out of range")]
    InvalidRegister(u8),
    #[error("address {0} is out of the region bounds")]
    InvalidAddress(u32),
    #[error("attempted opperation would overflow the stack")]
    StackOverflow,
    #[error("attempted opperation would underflow the stack")]
    StackUnderflow,
    #[error("no interrupt handler installed for syscall {0}")]
    UnhandledInterrupt(u8),
    #[error("division by zero")]
    DivisionByZero,
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome {
    /// A `HALT` executed or the syscall handler requested a stop.
    Finished,
    /// The instruction budget ran out, `run` may be called again.
    Paused,
}

/// Host side of the `SYSCALL` instruction.
///
/// Returning `false` stops the run with [`Outcome::Finished`].
pub trait InterruptHandler {
    fn on_interrupt(&mut self, code: u8, registers: &mut Registers) -> bool;
}

impl<F> InterruptHandler for F
where
    F: FnMut(u8, &mut Registers) -> bool,
{
    fn on_interrupt(&mut self, code: u8, registers: &mut Registers) -> bool {
        self(code, registers)
    }
}

enum Flow {
    Next,
    Halt,
    Stop,
}

/// Operand bytes of the instruction being executed.
struct Args([u8; MAX_ARG_BYTES]);

impl Args {
    fn byte(&self, offset: usize) -> u8 {
        self.0.get(offset).copied().unwrap_or(0)
    }

    fn short(&self, offset: usize) -> u32 {
        let low = self.byte(offset);
        let high = self.byte(offset.wrapping_add(1));
        u32::from(u16::from_le_bytes([low, high]))
    }

    fn word(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.byte(offset),
            self.byte(offset.wrapping_add(1)),
            self.byte(offset.wrapping_add(2)),
            self.byte(offset.wrapping_add(3)),
        ])
    }
}

pub struct Machine<'a, 'b, C: Checks = Checked> {
    registers: Registers,
    rom: Rom<'a>,
    ram: Ram<'b>,
    stack_size: u16,
    skip: bool,
    executed: u64,
    interrupt: Option<&'b mut dyn InterruptHandler>,
    checks: PhantomData<C>,
}

impl<'a, 'b> Machine<'a, 'b, Checked> {
    /// Binds the regions and initializes the machine, see [`Machine::reset`].
    pub fn new(rom: Rom<'a>, ram: Ram<'b>, stack_size: u16) -> Self {
        Self::with_checks(rom, ram, stack_size)
    }
}

impl<'a, 'b> Machine<'a, 'b, Unchecked> {
    /// Same as [`Machine::new`] but without register, bounds and stack
    /// guards. Only for trusted images.
    pub fn new_unchecked(rom: Rom<'a>, ram: Ram<'b>, stack_size: u16) -> Self {
        Self::with_checks(rom, ram, stack_size)
    }
}

impl<'a, 'b, C: Checks> Machine<'a, 'b, C> {
    fn with_checks(rom: Rom<'a>, ram: Ram<'b>, stack_size: u16) -> Self {
        let mut machine = Self {
            registers: Registers::new(),
            rom,
            ram,
            stack_size,
            skip: false,
            executed: 0,
            interrupt: None,
            checks: PhantomData,
        };
        machine.reset();
        machine
    }

    /// Zero fills RAM and the registers and points SP at the top of RAM.
    /// The interrupt handler stays installed.
    pub fn reset(&mut self) {
        self.ram.as_mut_slice().fill(0);
        self.registers.clear();
        self.registers.set(Register::Sp, self.ram.size());
        self.skip = false;
        self.executed = 0;
        debug!(
            "machine reset rom={}@{} ram={}@{}",
            self.rom.len(),
            self.rom.addr(),
            self.ram.len(),
            self.ram.addr()
        );
    }

    /// Executes until the program finishes or `max_instructions` have run.
    /// A budget of zero runs without limit.
    ///
    /// `program_size` is the lowest RAM offset the stack may pop from.
    pub fn run(&mut self, program_size: u16, max_instructions: u32) -> Result<Outcome, MachineError> {
        trace!(
            "run ip={} budget={}",
            self.registers.get(Register::Ip),
            max_instructions
        );
        let mut count: u32 = 0;
        while max_instructions == 0 || count < max_instructions {
            let flow = match self.step(program_size) {
                Ok(flow) => flow,
                Err(error) => {
                    warn!(
                        "run failed at ip={}: {}",
                        self.registers.get(Register::Ip),
                        error
                    );
                    return Err(error);
                }
            };
            match flow {
                Flow::Halt => {
                    debug!("halted after {}", count);
                    return Ok(Outcome::Finished);
                }
                Flow::Stop => {
                    self.executed = self.executed.wrapping_add(1);
                    debug!("stopped by syscall after {}", count);
                    return Ok(Outcome::Finished);
                }
                Flow::Next => {
                    count = count.wrapping_add(1);
                    self.executed = self.executed.wrapping_add(1);
                }
            }
        }
        debug!("paused at ip={}", self.registers.get(Register::Ip));
        Ok(Outcome::Paused)
    }

    fn step(&mut self, program_size: u16) -> Result<Flow, MachineError> {
        let ip = self.registers.get(Register::Ip);
        C::ensure(ip < self.rom.size(), MachineError::InvalidAddress(ip))?;

        let opcode = Opcode::try_from(self.rom_byte(ip))?;
        let info = opcode.info();
        let first_arg = ip.wrapping_add(1);
        let next = first_arg.wrapping_add(u32::from(info.arg_bytes));
        C::ensure(
            next <= self.rom.size(),
            MachineError::InvalidAddress(next.wrapping_sub(1)),
        )?;

        let mut args = Args([0; MAX_ARG_BYTES]);
        for (slot, address) in args.0.iter_mut().zip(first_arg..next) {
            *slot = self.rom_byte(address);
        }

        if self.skip {
            self.skip = false;
            trace!("skipped {} at {}", opcode, ip);
            self.registers.set(Register::Ip, next);
            return Ok(Flow::Next);
        }

        // Registers are validated up front so a failing instruction mutates
        // nothing.
        let mut offset = 0;
        for operand in opcode.operands() {
            if *operand == OperandKind::Register {
                let id = args.byte(offset);
                C::ensure(
                    usize::from(id) < REGISTER_COUNT,
                    MachineError::InvalidRegister(id),
                )?;
            }
            offset = offset.wrapping_add(operand.width());
        }

        let mut target = next;
        match opcode {
            Opcode::Nop => {}
            Opcode::Halt => return Ok(Flow::Halt),
            Opcode::Syscall => {
                let code = args.byte(0);
                let handler = self
                    .interrupt
                    .as_deref_mut()
                    .ok_or(MachineError::UnhandledInterrupt(code))?;
                let proceed = handler.on_interrupt(code, &mut self.registers);
                if !proceed {
                    self.registers.set(Register::Ip, next);
                    return Ok(Flow::Stop);
                }
            }
            Opcode::Lcons => self.registers.write_raw(args.byte(0), args.word(1)),
            Opcode::Mov => {
                let value = self.registers.read_raw(args.byte(1));
                self.registers.write_raw(args.byte(0), value);
            }
            Opcode::Push => {
                let sp = self.registers.get(Register::Sp);
                C::ensure(sp >= WORD_BYTES, MachineError::StackOverflow)?;
                let sp = sp.wrapping_sub(WORD_BYTES);
                C::ensure(self.ram.word_fits(sp), MachineError::InvalidAddress(sp))?;
                let value = self.registers.read_raw(args.byte(0));
                self.ram_set_word(sp, value);
                self.registers.set(Register::Sp, sp);
            }
            Opcode::Pop => {
                let sp = self.registers.get(Register::Sp);
                C::ensure(self.ram.word_fits(sp), MachineError::StackUnderflow)?;
                C::ensure(sp >= u32::from(program_size), MachineError::StackOverflow)?;
                let value = self.ram_word(sp);
                self.registers.write_raw(args.byte(0), value);
                self.registers
                    .set(Register::Sp, sp.wrapping_add(WORD_BYTES));
            }
            Opcode::Call => {
                let address = args.short(0);
                C::ensure(address < self.rom.size(), MachineError::InvalidAddress(address))?;
                self.registers.set(Register::Ra, next);
                target = address;
            }
            Opcode::Ret => target = self.registers.get(Register::Ra),
            Opcode::Store => {
                let address = args.short(0);
                C::ensure(self.ram.word_fits(address), MachineError::InvalidAddress(address))?;
                let value = self.registers.read_raw(args.byte(2));
                self.ram_set_word(address, value);
            }
            Opcode::Load => {
                let address = args.short(1);
                C::ensure(self.ram.word_fits(address), MachineError::InvalidAddress(address))?;
                let value = self.ram_word(address);
                self.registers.write_raw(args.byte(0), value);
            }
            Opcode::Add => self.binary(&args, |lhs, rhs| Ok(lhs.wrapping_add(rhs)))?,
            Opcode::Sub => self.binary(&args, |lhs, rhs| Ok(lhs.wrapping_sub(rhs)))?,
            Opcode::Mul => self.binary(&args, |lhs, rhs| Ok(lhs.wrapping_mul(rhs)))?,
            Opcode::Div => self.binary(&args, |lhs, rhs| {
                lhs.checked_div(rhs).ok_or(MachineError::DivisionByZero)
            })?,
            Opcode::Shl => self.binary(&args, |lhs, rhs| Ok(lhs.checked_shl(rhs).unwrap_or(0)))?,
            Opcode::Shr => self.binary(&args, |lhs, rhs| Ok(lhs.checked_shr(rhs).unwrap_or(0)))?,
            Opcode::Ishr => self.binary(&args, |lhs, rhs| Ok(arithmetic_shift(lhs, rhs)))?,
            Opcode::And => self.binary(&args, |lhs, rhs| Ok(lhs & rhs))?,
            Opcode::Or => self.binary(&args, |lhs, rhs| Ok(lhs | rhs))?,
            Opcode::Xor => self.binary(&args, |lhs, rhs| Ok(lhs ^ rhs))?,
            Opcode::Not => {
                let value = self.registers.read_raw(args.byte(0));
                self.registers.write_raw(args.byte(0), !value);
            }
            Opcode::Jmp => {
                let address = args.short(0);
                C::ensure(address < self.rom.size(), MachineError::InvalidAddress(address))?;
                target = address;
            }
            Opcode::Jr => {
                let address = self.registers.read_raw(args.byte(0)) & 0xffff;
                C::ensure(address < self.rom.size(), MachineError::InvalidAddress(address))?;
                target = address;
            }
            // Both test the operand's register id, not the register value.
            Opcode::Skipz => self.skip = args.byte(0) == 0,
            Opcode::Skipnz => self.skip = args.byte(0) != 0,
        }

        self.registers.set(Register::Ip, target);
        Ok(Flow::Next)
    }

    fn binary<F>(&mut self, args: &Args, op: F) -> Result<(), MachineError>
    where
        F: FnOnce(u32, u32) -> Result<u32, MachineError>,
    {
        let lhs = self.registers.read_raw(args.byte(0));
        let rhs = self.registers.read_raw(args.byte(1));
        self.registers.write_raw(args.byte(0), op(lhs, rhs)?);
        Ok(())
    }

    fn rom_byte(&self, offset: u32) -> u8 {
        self.rom.byte(offset).unwrap_or(0)
    }

    fn ram_word(&self, offset: u32) -> u32 {
        self.ram.word(offset).unwrap_or(0)
    }

    fn ram_set_word(&mut self, offset: u32, value: u32) {
        // Out of range writes only reach here on an unchecked machine.
        let _ = self.ram.set_word(offset, value);
    }

    pub fn register(&self, register: Register) -> u32 {
        self.registers.get(register)
    }

    pub fn set_register(&mut self, register: Register, value: u32) {
        self.registers.set(register, value);
    }

    pub fn register_by_id(&self, id: u8) -> Result<u32, MachineError> {
        let register = Register::try_from(id)?;
        Ok(self.registers.get(register))
    }

    pub fn set_register_by_id(&mut self, id: u8, value: u32) -> Result<(), MachineError> {
        let register = Register::try_from(id)?;
        self.registers.set(register, value);
        Ok(())
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    /// Pushes a raw word for the host, e.g. to seed call arguments.
    /// Unlike `PUSH` this does not check for stack overflow.
    pub fn stack_push(&mut self, value: u32) -> Result<(), MachineError> {
        let sp = self.registers.get(Register::Sp).wrapping_sub(WORD_BYTES);
        C::ensure(self.ram.word_fits(sp), MachineError::InvalidAddress(sp))?;
        self.ram_set_word(sp, value);
        self.registers.set(Register::Sp, sp);
        Ok(())
    }

    /// Pops a raw word for the host, without the `POP` stack guards.
    pub fn stack_pop(&mut self) -> Result<u32, MachineError> {
        let sp = self.registers.get(Register::Sp);
        C::ensure(self.ram.word_fits(sp), MachineError::InvalidAddress(sp))?;
        let value = self.ram_word(sp);
        self.registers
            .set(Register::Sp, sp.wrapping_add(WORD_BYTES));
        Ok(value)
    }

    /// Bytes currently on the stack.
    pub fn stack_count(&self) -> u32 {
        self.ram
            .size()
            .saturating_sub(self.registers.get(Register::Sp))
    }

    /// The stack size hint given at construction, informational only.
    pub fn stack_size(&self) -> u16 {
        self.stack_size
    }

    pub fn instructions_executed(&self) -> u64 {
        self.executed
    }

    /// Whether the next instruction will be skipped.
    pub fn skip_pending(&self) -> bool {
        self.skip
    }

    pub fn resolve(&self, addr: u16) -> Location {
        if let Some(offset) = self.rom.offset_of(addr) {
            Location::Rom(offset)
        } else if let Some(offset) = self.ram.offset_of(addr) {
            Location::Ram(offset)
        } else {
            Location::Unmapped
        }
    }

    /// The bytes from an absolute address to the end of its region.
    pub fn memory(&self, addr: u16) -> Result<&[u8], MachineError> {
        let bytes = match self.resolve(addr) {
            Location::Rom(offset) => self.rom.as_slice().get(usize::from(offset)..),
            Location::Ram(offset) => self.ram.as_slice().get(usize::from(offset)..),
            Location::Unmapped => None,
        };
        bytes.ok_or(MachineError::InvalidAddress(u32::from(addr)))
    }

    /// Same as [`Machine::memory`] for RAM. ROM addresses are rejected.
    pub fn memory_mut(&mut self, addr: u16) -> Result<&mut [u8], MachineError> {
        let Location::Ram(offset) = self.resolve(addr) else {
            return Err(MachineError::InvalidAddress(u32::from(addr)));
        };
        self.ram
            .as_mut_slice()
            .get_mut(usize::from(offset)..)
            .ok_or(MachineError::InvalidAddress(u32::from(addr)))
    }

    pub fn rom(&self) -> &Rom<'a> {
        &self.rom
    }

    pub fn ram(&self) -> &Ram<'b> {
        &self.ram
    }

    /// Installs the `SYSCALL` handler, replacing any previous one.
    pub fn set_interrupt_handler(&mut self, handler: &'b mut dyn InterruptHandler) {
        self.interrupt = Some(handler);
    }

    pub fn clear_interrupt_handler(&mut self) {
        self.interrupt = None;
    }
}

/// Sign preserving right shift. Shift amounts outside 0..32 saturate.
fn arithmetic_shift(lhs: u32, rhs: u32) -> u32 {
    let lhs = lhs as i32;
    let saturated = if lhs < 0 { -1 } else { 0 };
    let shifted = u32::try_from(rhs as i32)
        .ok()
        .and_then(|shift| lhs.checked_shr(shift))
        .unwrap_or(saturated);
    shifted as u32
}
