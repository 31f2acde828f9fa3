use crate::assembler::{
    Assembler, AssemblerError, AssemblerErrorKind, AssemblyResult, InstructionKind,
};
use crate::opcode::Opcode;
use crate::register::Register;

extern crate std;
use std::vec::Vec as StdVec;

type TestAssembler = Assembler<64, 32, 256>;

fn assemble(source: &str) -> Result<(StdVec<u8>, AssemblyResult), AssemblerError> {
    let mut buffer = [0u8; 256];
    let mut asm = TestAssembler::new();
    let result = asm.assemble(source, &mut buffer)?;
    Ok((buffer[..result.rom_usage_size].to_vec(), result))
}

fn assemble_err(source: &str) -> (Option<u32>, AssemblerErrorKind) {
    let err = assemble(source).unwrap_err();
    (err.line_number(), err.error_kind().clone())
}

#[test]
fn forward_references_are_patched() {
    let mut buffer = [0u8; 64];
    let mut asm = TestAssembler::new();
    let result = asm
        .assemble(
            "
            jmp .end
            call .sub
        .sub:
            ret
        .end:
            halt
        ",
            &mut buffer,
        )
        .unwrap();

    assert_eq!(result.rom_usage_size, 8);
    assert_eq!(buffer[..8], [22, 7, 0, 7, 6, 0, 8, 1]);
    assert_eq!(asm.label_address(".sub"), Some(6));
    assert_eq!(asm.label_address(".end"), Some(7));
    assert_eq!(asm.label_address(".missing"), None);
}

#[test]
fn jump_register_target_is_loaded_as_a_constant() {
    let mut buffer = [0u8; 64];
    let mut asm = TestAssembler::new();
    asm.assemble("lcons t0, .target\njr t0\n.target:\nhalt", &mut buffer)
        .unwrap();

    let target = asm.label_address(".target").unwrap();
    assert_eq!(target, 8);
    assert_eq!(buffer[..9], [3, Register::T0.id(), 8, 0, 0, 0, 23, 6, 1]);
}

#[test]
fn operand_encoding() {
    let (image, _) = assemble(
        "
        syscall 0x42
        mov r1, sp
        store 0x1234, t3
        load ov, 16
        not ra
        ",
    )
    .unwrap();

    assert_eq!(
        image,
        [2, 0x42, 4, 1, 18, 9, 0x34, 0x12, 9, 10, 20, 16, 0, 21, 19]
    );
}

#[test]
fn comments_blank_lines_and_case() {
    let (image, result) = assemble(
        "
        ; a comment on its own

          LCONS R0, 0x10   ; trailing comment
        Halt
        ",
    )
    .unwrap();

    assert_eq!(image, [3, 0, 0x10, 0, 0, 0, 1]);
    assert_eq!(result.rom_usage_size, 7);
    assert_eq!(result.constants_size, 0);
}

#[test]
fn older_mnemonics_are_accepted() {
    let mut asm = TestAssembler::new();
    asm.parse("shiftl r0, r1\nshiftr r0, r1\nishiftr r0, r1\njump 0\njumpr t0")
        .unwrap();

    let opcodes: StdVec<_> = asm
        .instructions()
        .iter()
        .filter_map(|instruction| instruction.opcode())
        .collect();
    assert_eq!(
        opcodes,
        [Opcode::Shl, Opcode::Shr, Opcode::Ishr, Opcode::Jmp, Opcode::Jr]
    );
    // Numeric targets are encoded directly.
    assert!(asm.instructions().iter().all(|instruction| !instruction.uses_label()));
}

#[test]
fn number_formats() {
    let (image, _) = assemble("lcons r0, 0x1F\nlcons r1, 017\nlcons r2, -2\nsyscall 255").unwrap();

    assert_eq!(
        image,
        [
            3, 0, 0x1f, 0, 0, 0, //
            3, 1, 15, 0, 0, 0, //
            3, 2, 0xfe, 0xff, 0xff, 0xff, //
            2, 255,
        ]
    );
    assert_eq!(
        assemble_err("syscall 256"),
        (Some(1), AssemblerErrorKind::IntegerTooHigh(256))
    );
    assert_eq!(
        assemble_err("nop\nlcons r0, 0x1G"),
        (Some(2), AssemblerErrorKind::InvalidNumber)
    );
    assert_eq!(
        assemble_err("store -70000, r0"),
        (Some(1), AssemblerErrorKind::IntegerTooLow(-70000))
    );
}

#[test]
fn rom_constants() {
    let mut buffer = [0u8; 64];
    let mut asm = TestAssembler::new();
    let result = asm
        .assemble(
            "
            lcons r0, $msg
            halt
        $msg    DC8 \"hi, you; there\", 10
        $table  DC16 0x1234, 5
        $word   dc32 -1
            ",
            &mut buffer,
        )
        .unwrap();

    let message = b"hi, you; there\0\n";
    assert_eq!(asm.label_address("$msg"), Some(7));
    assert_eq!(buffer[..7], [3, 0, 7, 0, 0, 0, 1]);
    assert_eq!(buffer[7..7 + message.len()], *message);

    let table = 7 + message.len();
    assert_eq!(asm.label_address("$table"), Some(table as u16));
    assert_eq!(buffer[table..table + 4], [0x34, 0x12, 5, 0]);
    assert_eq!(buffer[table + 4..table + 8], [0xff; 4]);

    assert_eq!(result.constants_size, message.len() + 8);
    assert_eq!(result.rom_usage_size, table + 8);
    assert_eq!(result.ram_usage_size, 0);
}

#[test]
fn ram_reservations() {
    let mut buffer = [0u8; 64];
    let mut asm = TestAssembler::new();
    let result = asm
        .assemble(
            "
            nop
        $buffer DV32 4
        $flags  DV8 3
            halt
            ",
            &mut buffer,
        )
        .unwrap();

    assert_eq!(result.ram_usage_size, 19);
    assert_eq!(result.rom_usage_size, 2);
    assert_eq!(result.constants_size, 0);
    // Reservations emit nothing and record the image offset they sit at.
    assert_eq!(asm.label_address("$buffer"), Some(1));
    assert_eq!(asm.label_address("$flags"), Some(1));

    let reservation = asm
        .instructions()
        .iter()
        .find(|instruction| instruction.mnemonic() == "$buffer")
        .unwrap();
    assert_eq!(reservation.kind(), InstructionKind::RamData);
    assert_eq!(reservation.data_width(), Some(32));
    assert_eq!(reservation.element_count(), 4);
}

#[test]
fn integer_too_high_reports_the_directive_line() {
    assert_eq!(
        assemble_err("nop\n$x DC8 300"),
        (Some(2), AssemblerErrorKind::IntegerTooHigh(300))
    );
    assert_eq!(
        assemble_err("$x DC16 0x10000"),
        (Some(1), AssemblerErrorKind::IntegerTooHigh(0x10000))
    );
}

#[test]
fn bad_data_directives() {
    assert_eq!(
        assemble_err("$x DX8 1"),
        (Some(1), AssemblerErrorKind::BadDataType)
    );
    assert_eq!(
        assemble_err("$x DC12 1"),
        (Some(1), AssemblerErrorKind::BadDataType)
    );
    assert_eq!(
        assemble_err("$x"),
        (Some(1), AssemblerErrorKind::MissingDataValues)
    );
    assert_eq!(
        assemble_err("$x DV8"),
        (Some(1), AssemblerErrorKind::MissingDataValues)
    );
    assert_eq!(
        assemble_err("$x DV8 -1"),
        (Some(1), AssemblerErrorKind::IntegerTooLow(-1))
    );
}

#[test]
fn duplicated_symbols() {
    let (line, kind) = assemble_err(".a:\nnop\n.a:");
    assert_eq!(line, Some(3));
    assert!(matches!(kind, AssemblerErrorKind::DuplicatedLabel(name) if name == ".a"));

    let (line, kind) = assemble_err("$x DC8 1\n$x DV8 1");
    assert_eq!(line, Some(2));
    assert!(matches!(kind, AssemblerErrorKind::DuplicatedLabel(name) if name == "$x"));
}

#[test]
fn label_not_found_reports_the_using_line() {
    let (line, kind) = assemble_err("nop\njmp .nowhere\nhalt");
    assert_eq!(line, Some(2));
    assert!(matches!(kind, AssemblerErrorKind::LabelNotFound(name) if name == ".nowhere"));
}

#[test]
fn bad_register() {
    let (line, kind) = assemble_err("mov r0, r9");
    assert_eq!(line, Some(1));
    assert!(matches!(kind, AssemblerErrorKind::BadRegister(name) if name == "r9"));
}

#[test]
fn bad_parameter_count() {
    assert_eq!(
        assemble_err("add r0"),
        (
            Some(1),
            AssemblerErrorKind::BadParameterCount {
                expected: 2,
                found: 1
            }
        )
    );
    assert_eq!(
        assemble_err("nop\nhalt r0"),
        (
            Some(2),
            AssemblerErrorKind::BadParameterCount {
                expected: 0,
                found: 1
            }
        )
    );
    assert_eq!(
        assemble_err("push r0, r1"),
        (
            Some(1),
            AssemblerErrorKind::BadParameterCount {
                expected: 1,
                found: 2
            }
        )
    );
}

#[test]
fn invalid_lines() {
    assert_eq!(
        assemble_err("nop\nbogus r0"),
        (Some(2), AssemblerErrorKind::NotAValidLine)
    );
    assert_eq!(
        assemble_err(".label"),
        (Some(1), AssemblerErrorKind::InvalidLabel)
    );
    assert_eq!(
        assemble_err(".label: nop"),
        (Some(1), AssemblerErrorKind::InvalidLabel)
    );
    assert_eq!(
        assemble_err(".:"),
        (Some(1), AssemblerErrorKind::InvalidLabel)
    );
}

#[test]
fn capacity_limits() {
    let mut buffer = [0u8; 64];

    let mut asm: Assembler<2, 4, 8> = Assembler::new();
    let err = asm.assemble("nop\nnop\nnop", &mut buffer).unwrap_err();
    assert_eq!(
        err,
        AssemblerError::WithLine {
            line: 3,
            kind: AssemblerErrorKind::TooManyInstructions
        }
    );

    let mut asm: Assembler<8, 1, 8> = Assembler::new();
    let err = asm.assemble(".a:\n.b:", &mut buffer).unwrap_err();
    assert_eq!(err.line_number(), Some(2));
    assert_eq!(err.error_kind(), &AssemblerErrorKind::TooManyLabels);

    let mut asm: Assembler<8, 4, 2> = Assembler::new();
    let err = asm.assemble("$s DC8 \"abc\"", &mut buffer).unwrap_err();
    assert_eq!(err.error_kind(), &AssemblerErrorKind::DataTooLarge);

    let mut asm = TestAssembler::new();
    let long = ".a_label_name_that_is_far_too_long_to_store:";
    let err = asm.assemble(long, &mut buffer).unwrap_err();
    assert_eq!(err.error_kind(), &AssemblerErrorKind::NameTooLong);
}

#[test]
fn output_buffer_too_small() {
    let mut buffer = [0u8; 4];
    let mut asm = TestAssembler::new();
    let err = asm.assemble("nop\nlcons r0, 1", &mut buffer).unwrap_err();
    assert_eq!(err.line_number(), Some(2));
    assert_eq!(err.error_kind(), &AssemblerErrorKind::ProgramTooLarge);
}

#[test]
fn parse_replaces_previous_state() {
    let mut asm = TestAssembler::new();
    asm.parse("jmp .x\n.x:\n$d DC8 1").unwrap();
    assert_eq!(asm.instructions().len(), 3);
    assert!(asm.instructions()[0].uses_label());
    assert_eq!(asm.instructions()[0].args(), [".x"]);

    asm.parse("nop").unwrap();
    assert_eq!(asm.instructions().len(), 1);
    assert_eq!(asm.labels().count(), 0);
    assert_eq!(asm.label_address(".x"), None);

    asm.clear();
    assert!(asm.instructions().is_empty());
}

#[test]
fn intermediate_instructions() {
    let mut buffer = [0u8; 64];
    let mut asm = TestAssembler::new();
    asm.assemble("nop\n.loop:\nlcons r2, 7\njmp .loop", &mut buffer)
        .unwrap();

    let instructions = asm.instructions();
    assert_eq!(instructions.len(), 4);

    assert_eq!(instructions[1].kind(), InstructionKind::Label);
    assert_eq!(instructions[1].mnemonic(), ".loop");
    assert_eq!(instructions[1].address(), 1);

    assert_eq!(instructions[2].line(), 3);
    assert_eq!(instructions[2].kind(), InstructionKind::Op(Opcode::Lcons));
    assert_eq!(instructions[2].operands(), [2, 7, 0, 0, 0]);
    assert_eq!(instructions[2].address(), 1);

    assert!(instructions[3].uses_label());
    assert_eq!(instructions[3].address(), 7);
    assert_eq!(buffer[7..10], [22, 1, 0]);
}

#[test]
fn error_messages_carry_the_line() {
    use std::string::ToString;

    let err = assemble("nop\n$x DC8 300").unwrap_err();
    assert_eq!(err.to_string(), "line 2: integer too high: 300");
}
