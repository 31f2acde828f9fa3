// A two pass assembler for the machine's instruction set.
//
// Source is line oriented:
//
//     .loop:                  ; label, a single token ending in ':'
//     lcons r0, 0x10          ; mnemonic followed by operands
//     jmp .loop
//     $msg  DC8 "hi", 10      ; constants stored in ROM
//     $buf  DV32 4            ; RAM reservation, four 32 bit words
//
// `parse` turns every line into an `Instruction` with its operands already
// encoded. `build_binary` lays the instructions out in the program image,
// records symbol addresses and then patches every symbol reference.

use heapless::{String, Vec};
use thiserror_no_std::Error;

use crate::opcode::{MAX_ARG_BYTES, Opcode, OperandKind};
use crate::register::Register;

pub const NAME_CAP: usize = 32;
const MAX_OPERANDS: usize = 2;

pub type Name = String<NAME_CAP>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerError {
    #[error("{0}")]
    Kind(AssemblerErrorKind),
    #[error("line {line}: {kind}")]
    WithLine { line: u32, kind: AssemblerErrorKind },
}

impl AssemblerError {
    fn with_line(self, line: u32) -> Self {
        match self {
            AssemblerError::WithLine { .. } => self,
            AssemblerError::Kind(kind) => AssemblerError::WithLine { line, kind },
        }
    }

    pub fn line_number(&self) -> Option<u32> {
        match self {
            Self::Kind(_) => None,
            Self::WithLine { line, .. } => Some(*line),
        }
    }

    pub fn error_kind(&self) -> &AssemblerErrorKind {
        match self {
            Self::Kind(kind) => kind,
            Self::WithLine { kind, .. } => kind,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblerErrorKind {
    #[error("not a valid line")]
    NotAValidLine,
    #[error("label must be a single token ending with ':'")]
    InvalidLabel,
    #[error("duplicated label: {0}")]
    DuplicatedLabel(Name),
    #[error("bad number of parameters, required {expected}, got {found}")]
    BadParameterCount { expected: u8, found: usize },
    #[error("bad register name: {0}")]
    BadRegister(Name),
    #[error("invalid number")]
    InvalidNumber,
    #[error("integer too high: {0}")]
    IntegerTooHigh(i64),
    #[error("integer too low: {0}")]
    IntegerTooLow(i64),
    #[error("bad data type, must be DC8/16/32 or DV8/16/32")]
    BadDataType,
    #[error("data directive needs a type and values")]
    MissingDataValues,
    #[error("label not found: {0}")]
    LabelNotFound(Name),
    #[error("name is too long")]
    NameTooLong,
    #[error("too many instructions")]
    TooManyInstructions,
    #[error("too many labels")]
    TooManyLabels,
    #[error("constant data does not fit")]
    DataTooLarge,
    #[error("program does not fit in the output buffer")]
    ProgramTooLarge,
    #[error("line number overflow")]
    LineNumberOverflow,
}

/// Sizes of an assembled program, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AssemblyResult {
    /// Whole image, code and constants.
    pub rom_usage_size: usize,
    /// Reserved by `DV` directives.
    pub ram_usage_size: usize,
    /// Emitted by `DC` directives.
    pub constants_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionKind {
    Op(Opcode),
    Label,
    /// `DCn`, constants emitted into the image.
    RomData,
    /// `DVn`, a RAM reservation. Emits nothing.
    RamData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    fn from_bits(bits: &str) -> Option<Self> {
        match bits {
            "8" => Some(Self::Byte),
            "16" => Some(Self::Half),
            "32" => Some(Self::Word),
            _ => None,
        }
    }

    fn bytes(self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Half => 2,
            Self::Word => 4,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Byte => 8,
            Self::Half => 16,
            Self::Word => 32,
        }
    }

    /// Accepted literal range. Negative values are stored in two's complement.
    fn range(self) -> (i64, i64) {
        match self {
            Self::Byte => (i64::from(i8::MIN), i64::from(u8::MAX)),
            Self::Half => (i64::from(i16::MIN), i64::from(u16::MAX)),
            Self::Word => (i64::from(i32::MIN), i64::from(u32::MAX)),
        }
    }
}

/// A symbol reference patched once all addresses are known.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fixup {
    symbol: Name,
    /// Offset of the patched bytes within the operands.
    offset: usize,
    width: Width,
}

/// One parsed source line.
#[derive(Debug, Clone)]
pub struct Instruction {
    line: u32,
    mnemonic: Name,
    kind: InstructionKind,
    args: Vec<Name, MAX_OPERANDS>,
    operands: Vec<u8, MAX_ARG_BYTES>,
    fixup: Option<Fixup>,
    data_width: Option<Width>,
    data_start: usize,
    data_bytes: usize,
    element_count: u16,
    address: u16,
}

impl Instruction {
    fn new(line: u32, mnemonic: Name, kind: InstructionKind) -> Self {
        Self {
            line,
            mnemonic,
            kind,
            args: Vec::new(),
            operands: Vec::new(),
            fixup: None,
            data_width: None,
            data_start: 0,
            data_bytes: 0,
            element_count: 0,
            address: 0,
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    /// The mnemonic as written, or the symbol name for labels and data.
    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn kind(&self) -> InstructionKind {
        self.kind
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match self.kind {
            InstructionKind::Op(opcode) => Some(opcode),
            _ => None,
        }
    }

    pub fn args(&self) -> &[Name] {
        &self.args
    }

    /// Encoded operand bytes, symbol references still zeroed.
    pub fn operands(&self) -> &[u8] {
        &self.operands
    }

    pub fn uses_label(&self) -> bool {
        self.fixup.is_some()
    }

    /// Element width in bits of a data directive.
    pub fn data_width(&self) -> Option<u8> {
        self.data_width.map(Width::bits)
    }

    /// Elements reserved by a `DV` directive.
    pub fn element_count(&self) -> u16 {
        self.element_count
    }

    /// Byte offset in the image, valid after `build_binary`.
    pub fn address(&self) -> u16 {
        self.address
    }
}

#[derive(Debug, Clone)]
struct Label {
    name: Name,
    address: u16,
}

pub struct Assembler<const INSTRUCTION_CAP: usize, const LABEL_CAP: usize, const DATA_CAP: usize> {
    instructions: Vec<Instruction, INSTRUCTION_CAP>,
    labels: Vec<Label, LABEL_CAP>,
    data: Vec<u8, DATA_CAP>,
}

impl<const INSTRUCTION_CAP: usize, const LABEL_CAP: usize, const DATA_CAP: usize>
    Assembler<INSTRUCTION_CAP, LABEL_CAP, DATA_CAP>
{
    pub fn new() -> Self {
        Self {
            instructions: Vec::new(),
            labels: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.instructions.clear();
        self.labels.clear();
        self.data.clear();
    }

    /// Parses and lays out `source` into `program`.
    pub fn assemble(&mut self, source: &str, program: &mut [u8]) -> Result<AssemblyResult, AssemblerError> {
        self.parse(source)?;
        self.build_binary(program)
    }

    /// Scans `source` into the instruction list, replacing any previous
    /// contents. Operands are encoded here, symbol references are left
    /// zeroed for `build_binary`.
    pub fn parse(&mut self, source: &str) -> Result<(), AssemblerError> {
        self.clear();
        let mut line_number: u32 = 0;
        for line in source.lines() {
            line_number = line_number
                .checked_add(1)
                .ok_or(AssemblerError::Kind(AssemblerErrorKind::LineNumberOverflow))?;
            if let Err(err) = self.parse_line(line_number, line) {
                debug!("parse failed on line {}", line_number);
                return Err(err.with_line(line_number));
            }
        }
        trace!(
            "parsed {} instructions, {} labels",
            self.instructions.len(),
            self.labels.len()
        );
        Ok(())
    }

    fn parse_line(&mut self, line_number: u32, line: &str) -> Result<(), AssemblerError> {
        let line = strip_comment(line).trim();
        if line.is_empty() {
            return Ok(());
        }
        let (first, rest) = split_token(line);

        if first.starts_with('.') {
            return self.add_label(line_number, first, rest);
        }
        if let Some(opcode) = Opcode::from_mnemonic(first) {
            return self.add_op(line_number, opcode, first, rest);
        }
        if first.starts_with('$') {
            return self.add_data(line_number, first, rest);
        }
        Err(AssemblerError::Kind(AssemblerErrorKind::NotAValidLine))
    }

    fn add_label(&mut self, line_number: u32, token: &str, rest: &str) -> Result<(), AssemblerError> {
        let Some(name) = token.strip_suffix(':') else {
            return Err(AssemblerError::Kind(AssemblerErrorKind::InvalidLabel));
        };
        if !rest.is_empty() || name.len() < 2 {
            return Err(AssemblerError::Kind(AssemblerErrorKind::InvalidLabel));
        }
        let name = to_name(name)?;
        self.define_symbol(&name)?;
        self.push(Instruction::new(line_number, name, InstructionKind::Label))
    }

    fn add_op(
        &mut self,
        line_number: u32,
        opcode: Opcode,
        mnemonic: &str,
        rest: &str,
    ) -> Result<(), AssemblerError> {
        let info = opcode.info();
        let found = split_args(rest).count();
        if found != usize::from(info.arg_count) {
            return Err(AssemblerError::Kind(AssemblerErrorKind::BadParameterCount {
                expected: info.arg_count,
                found,
            }));
        }

        let mut instruction = Instruction::new(line_number, to_name(mnemonic)?, InstructionKind::Op(opcode));
        for (operand, token) in opcode.operands().iter().zip(split_args(rest)) {
            instruction
                .args
                .push(to_name(token)?)
                .map_err(|_| AssemblerError::Kind(AssemblerErrorKind::NameTooLong))?;
            let offset = instruction.operands.len();
            match operand {
                OperandKind::Register => {
                    let register = Register::from_name(token).ok_or_else(|| {
                        AssemblerError::Kind(AssemblerErrorKind::BadRegister(
                            to_name(token).unwrap_or_default(),
                        ))
                    })?;
                    push_operand(&mut instruction, &[register.id()])?;
                }
                OperandKind::Immediate8 => {
                    let value = fit(parse_number(token)?, Width::Byte)?;
                    push_operand(&mut instruction, &little_endian(value, Width::Byte))?;
                }
                OperandKind::Address => {
                    let value = fit(parse_number(token)?, Width::Half)?;
                    push_operand(&mut instruction, &little_endian(value, Width::Half))?;
                }
                OperandKind::Immediate32 => {
                    if is_symbol(token) {
                        instruction.fixup = Some(Fixup {
                            symbol: to_name(token)?,
                            offset,
                            width: Width::Word,
                        });
                        push_operand(&mut instruction, &[0; 4])?;
                    } else {
                        let value = fit(parse_number(token)?, Width::Word)?;
                        push_operand(&mut instruction, &little_endian(value, Width::Word))?;
                    }
                }
                OperandKind::Target => match parse_number(token) {
                    Ok(value) => {
                        let value = fit(value, Width::Half)?;
                        push_operand(&mut instruction, &little_endian(value, Width::Half))?;
                    }
                    Err(_) => {
                        instruction.fixup = Some(Fixup {
                            symbol: to_name(token)?,
                            offset,
                            width: Width::Half,
                        });
                        push_operand(&mut instruction, &[0; 2])?;
                    }
                },
            }
        }
        self.push(instruction)
    }

    fn add_data(&mut self, line_number: u32, token: &str, rest: &str) -> Result<(), AssemblerError> {
        let (data_type, values) = split_token(rest);
        if data_type.is_empty() || values.is_empty() {
            return Err(AssemblerError::Kind(AssemblerErrorKind::MissingDataValues));
        }
        let (kind, width) = parse_data_type(data_type)?;
        let name = to_name(token)?;
        self.define_symbol(&name)?;

        let mut instruction = Instruction::new(line_number, name, kind);
        instruction.data_width = Some(width);
        if kind == InstructionKind::RamData {
            let count = parse_number(values)?;
            instruction.element_count = u16::try_from(count).map_err(|_| {
                if count < 0 {
                    AssemblerError::Kind(AssemblerErrorKind::IntegerTooLow(count))
                } else {
                    AssemblerError::Kind(AssemblerErrorKind::IntegerTooHigh(count))
                }
            })?;
        } else {
            instruction.data_start = self.data.len();
            let mut remaining = Some(values);
            while let Some(text) = remaining {
                let (value, rest) = split_value(text);
                self.push_constant(value.trim(), width)?;
                remaining = rest;
            }
            instruction.data_bytes = self.data.len().saturating_sub(instruction.data_start);
        }
        self.push(instruction)
    }

    fn push_constant(&mut self, value: &str, width: Width) -> Result<(), AssemblerError> {
        let string = value
            .strip_prefix('"')
            .and_then(|inner| inner.strip_suffix('"'));
        match string {
            // Strings are bytes plus a terminating zero whatever the width.
            Some(text) => {
                self.push_data(text.as_bytes())?;
                self.push_data(&[0])
            }
            None => {
                let value = fit(parse_number(value)?, width)?;
                self.push_data(&little_endian(value, width))
            }
        }
    }

    fn push_data(&mut self, bytes: &[u8]) -> Result<(), AssemblerError> {
        self.data
            .extend_from_slice(bytes)
            .map_err(|_| AssemblerError::Kind(AssemblerErrorKind::DataTooLarge))
    }

    fn define_symbol(&mut self, name: &Name) -> Result<(), AssemblerError> {
        if self.labels.iter().any(|label| label.name == *name) {
            return Err(AssemblerError::Kind(AssemblerErrorKind::DuplicatedLabel(
                name.clone(),
            )));
        }
        // Resolved in `build_binary`.
        self.labels
            .push(Label {
                name: name.clone(),
                address: 0,
            })
            .map_err(|_| AssemblerError::Kind(AssemblerErrorKind::TooManyLabels))
    }

    fn push(&mut self, instruction: Instruction) -> Result<(), AssemblerError> {
        self.instructions
            .push(instruction)
            .map_err(|_| AssemblerError::Kind(AssemblerErrorKind::TooManyInstructions))
    }

    /// Writes the parsed program into `program` and patches symbol
    /// references. On error the contents of `program` are unspecified.
    pub fn build_binary(&mut self, program: &mut [u8]) -> Result<AssemblyResult, AssemblerError> {
        let Self {
            instructions,
            labels,
            data,
        } = self;
        let mut result = AssemblyResult::default();
        let mut cursor: usize = 0;

        for instruction in instructions.iter_mut() {
            let line = instruction.line;
            instruction.address = u16::try_from(cursor).map_err(|_| {
                AssemblerError::Kind(AssemblerErrorKind::ProgramTooLarge).with_line(line)
            })?;
            match instruction.kind {
                InstructionKind::Op(opcode) => {
                    emit(program, &mut cursor, &[u8::from(opcode)])
                        .and_then(|_| emit(program, &mut cursor, &instruction.operands))
                        .map_err(|err| err.with_line(line))?;
                }
                InstructionKind::Label => {
                    resolve_label(labels, &instruction.mnemonic, instruction.address);
                }
                InstructionKind::RamData => {
                    resolve_label(labels, &instruction.mnemonic, instruction.address);
                    let width = instruction.data_width.map_or(0, Width::bytes);
                    let reserved = usize::from(instruction.element_count).saturating_mul(width);
                    result.ram_usage_size = result.ram_usage_size.saturating_add(reserved);
                }
                InstructionKind::RomData => {
                    resolve_label(labels, &instruction.mnemonic, instruction.address);
                    let end = instruction
                        .data_start
                        .saturating_add(instruction.data_bytes);
                    let bytes = data.get(instruction.data_start..end).ok_or_else(|| {
                        AssemblerError::Kind(AssemblerErrorKind::DataTooLarge).with_line(line)
                    })?;
                    emit(program, &mut cursor, bytes).map_err(|err| err.with_line(line))?;
                    result.constants_size = result.constants_size.saturating_add(bytes.len());
                }
            }
        }

        for instruction in instructions.iter() {
            let Some(fixup) = &instruction.fixup else {
                continue;
            };
            let line = instruction.line;
            let address = labels
                .iter()
                .find(|label| label.name == fixup.symbol)
                .map(|label| label.address)
                .ok_or_else(|| {
                    AssemblerError::Kind(AssemblerErrorKind::LabelNotFound(fixup.symbol.clone()))
                        .with_line(line)
                })?;
            // Operands start right after the opcode byte.
            let mut at = usize::from(instruction.address)
                .saturating_add(1)
                .saturating_add(fixup.offset);
            let bytes = little_endian(u32::from(address), fixup.width);
            emit(program, &mut at, &bytes).map_err(|err| err.with_line(line))?;
        }

        result.rom_usage_size = cursor;
        debug!(
            "assembled rom={} ram={} constants={}",
            result.rom_usage_size,
            result.ram_usage_size,
            result.constants_size
        );
        Ok(result)
    }

    /// Address of a label (`.name`) or data symbol (`$name`) after
    /// `build_binary`.
    pub fn label_address(&self, name: &str) -> Option<u16> {
        self.labels
            .iter()
            .find(|label| label.name == name)
            .map(|label| label.address)
    }

    pub fn labels(&self) -> impl Iterator<Item = (&str, u16)> {
        self.labels
            .iter()
            .map(|label| (label.name.as_str(), label.address))
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }
}

impl<const INSTRUCTION_CAP: usize, const LABEL_CAP: usize, const DATA_CAP: usize> Default
    for Assembler<INSTRUCTION_CAP, LABEL_CAP, DATA_CAP>
{
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_label(labels: &mut [Label], name: &str, address: u16) {
    if let Some(label) = labels.iter_mut().find(|label| label.name == name) {
        label.address = address;
    }
}

fn emit(program: &mut [u8], cursor: &mut usize, bytes: &[u8]) -> Result<(), AssemblerError> {
    let end = cursor
        .checked_add(bytes.len())
        .ok_or(AssemblerError::Kind(AssemblerErrorKind::ProgramTooLarge))?;
    program
        .get_mut(*cursor..end)
        .ok_or(AssemblerError::Kind(AssemblerErrorKind::ProgramTooLarge))?
        .copy_from_slice(bytes);
    *cursor = end;
    Ok(())
}

fn push_operand(instruction: &mut Instruction, bytes: &[u8]) -> Result<(), AssemblerError> {
    // Widths come from the opcode table, which never exceeds MAX_ARG_BYTES.
    instruction
        .operands
        .extend_from_slice(bytes)
        .map_err(|_| AssemblerError::Kind(AssemblerErrorKind::DataTooLarge))
}

fn little_endian(value: u32, width: Width) -> Vec<u8, 4> {
    value
        .to_le_bytes()
        .into_iter()
        .take(width.bytes())
        .collect()
}

fn fit(value: i64, width: Width) -> Result<u32, AssemblerError> {
    let (min, max) = width.range();
    if value > max {
        return Err(AssemblerError::Kind(AssemblerErrorKind::IntegerTooHigh(value)));
    }
    if value < min {
        return Err(AssemblerError::Kind(AssemblerErrorKind::IntegerTooLow(value)));
    }
    // In range, so truncating keeps the two's complement bits.
    Ok(value as u32)
}

fn parse_data_type(token: &str) -> Result<(InstructionKind, Width), AssemblerError> {
    let bad = || AssemblerError::Kind(AssemblerErrorKind::BadDataType);
    let mut chars = token.chars();
    let (Some(d), Some(kind)) = (chars.next(), chars.next()) else {
        return Err(bad());
    };
    if !d.eq_ignore_ascii_case(&'d') {
        return Err(bad());
    }
    let kind = match kind.to_ascii_lowercase() {
        'c' => InstructionKind::RomData,
        'v' => InstructionKind::RamData,
        _ => return Err(bad()),
    };
    let width = Width::from_bits(chars.as_str()).ok_or_else(bad)?;
    Ok((kind, width))
}

/// Parses an integer the way C's `strtol` does with base 0: `0x` for hex,
/// a leading `0` for octal, decimal otherwise, with an optional sign.
fn parse_number(token: &str) -> Result<i64, AssemblerError> {
    let invalid = AssemblerError::Kind(AssemblerErrorKind::InvalidNumber);
    let (negative, unsigned) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let (radix, digits) = if let Some(hex) = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"))
    {
        (16, hex)
    } else if unsigned.len() > 1 {
        match unsigned.strip_prefix('0') {
            Some(octal) => (8, octal),
            None => (10, unsigned),
        }
    } else {
        (10, unsigned)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid);
    }
    let magnitude = i64::from_str_radix(digits, radix).map_err(|_| invalid)?;
    Ok(if negative {
        magnitude.wrapping_neg()
    } else {
        magnitude
    })
}

fn is_symbol(token: &str) -> bool {
    token.starts_with('.') || token.starts_with('$')
}

fn strip_comment(line: &str) -> &str {
    let mut quoted = false;
    for (index, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ';' if !quoted => return line.get(..index).unwrap_or(line),
            _ => {}
        }
    }
    line
}

/// Splits off the first whitespace separated token.
fn split_token(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim()),
        None => (text, ""),
    }
}

fn split_args(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|arg| !arg.is_empty())
}

/// Splits off the first comma separated value, commas inside quotes are
/// part of the value.
fn split_value(text: &str) -> (&str, Option<&str>) {
    let mut quoted = false;
    for (index, c) in text.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                if let Some((value, rest)) = text.split_at_checked(index) {
                    return (value, rest.strip_prefix(','));
                }
            }
            _ => {}
        }
    }
    (text, None)
}

fn to_name(name: &str) -> Result<Name, AssemblerError> {
    let mut out = Name::new();
    out.push_str(name)
        .map_err(|_| AssemblerError::Kind(AssemblerErrorKind::NameTooLong))?;
    Ok(out)
}
