//! Fixture rendering.
//!
//! Each [`TestCase`] becomes one `ax_test![...]` block: the instruction's
//! encoded bytes, a setup closure writing operand values (and preloading
//! precondition flags), an assertion closure checking the observed values,
//! and the expected set/clear flag masks.

use clap::ValueEnum;

use flaglearn_engine::{JumpTestCase, TestCase};
use flaglearn_x86::{Immediate, MemoryRef, Operand, Register, RenderError};

/// Guest address backing memory operands. Base registers are pointed here
/// (plus the operand's displacement) and index registers are zeroed, so the
/// effective address is always `MEM_START + offset`.
const MEM_START: i64 = 0x1000;

pub fn render(case: &TestCase, id: &str) -> Result<String, RenderError> {
    let instruction = &case.instruction;
    let bytes = case
        .encoding
        .iter()
        .map(|b| format!("{b:#x}"))
        .collect::<Vec<_>>()
        .join(", ");
    let flags = format!(
        "({}; {})",
        case.flags_set.literal(),
        case.flags_not_set.literal()
    );
    let preload = if case.input.flags.is_empty() {
        String::new()
    } else {
        format!("\n        write_flags!(a; {});", case.input.flags.literal())
    };

    let dynamic = instruction.dynamic_operands();
    match dynamic.len() {
        0 => Ok(format!(
            "\
// {instruction}
ax_test![{id}; {bytes}; |a: Axecutor| {{
        todo!(\"Assert state of registers and/or memory\");{preload}
    }};
    {flags}
];"
        )),
        1 => {
            let write = write_operand(dynamic[0], case.input.values[0])?;
            let check = assert_operand(dynamic[0], case.expected[0])?;
            Ok(format!(
                "\
// {instruction}
ax_test![{id}; {bytes};
    |a: &mut Axecutor| {{
        {write}{preload}
    }};
    |a: Axecutor| {{
        {check}
    }};
    {flags}
];"
            ))
        }
        2 => {
            let write0 = write_operand(dynamic[0], case.input.values[0])?;
            let write1 = write_operand(dynamic[1], case.input.values[1])?;
            let check0 = assert_operand(dynamic[0], case.expected[0])?;
            let check1 = assert_operand(dynamic[1], case.expected[1])?;
            Ok(format!(
                "\
// {instruction}
ax_test![{id}; {bytes};
    |a: &mut Axecutor| {{
        {write0}
        {write1}{preload}
    }};
    |a: Axecutor| {{
        {check0}
        {check1}
    }};
    {flags}
];"
            ))
        }
        n => unreachable!("instructions are limited to 2 dynamic operands, got {n}"),
    }
}

/// How much scaffolding a rendered jump fixture carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JumpStyle {
    /// Setup and assertion closures to fill in.
    Setup,
    /// An assertion closure only.
    Asserts,
    /// Neither; RIP and flags are the whole test.
    Bare,
}

pub fn render_jump(case: &JumpTestCase, id: &str, style: JumpStyle) -> String {
    let join = |bytes: &[u8]| {
        bytes
            .iter()
            .map(|b| format!("{b:#x}"))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let initial_bytes = join(&case.initial_encoding);
    let final_bytes = join(&case.final_encoding);
    let unit = if case.padding == 1 { "byte" } else { "bytes" };
    let closures = match style {
        JumpStyle::Setup => {
            "\n    |a: &mut Axecutor| {\n        todo!(\"write setup code\");\n    };\
             \n    |a: Axecutor| {\n        todo!(\"Write more assertions. RIP and flags are already covered\");\n    };"
        }
        JumpStyle::Asserts => {
            "\n    |a: Axecutor| {\n        todo!(\"Write more assertions. RIP and flags are already covered\");\n    };"
        }
        JumpStyle::Bare => "",
    };

    format!(
        "\
jmp_test![{id};
    start: {initial_rip:#x}; end: {final_rip:#x};
    {initial_bytes}; // {initial_code}
    {padding}; // {padding} {unit} of 0x90 (nop) as padding
    {final_bytes}; // {final_code}{closures}
    ({set}; {not_set})
];",
        initial_rip = case.initial_rip,
        final_rip = case.final_rip,
        initial_code = case.initial_code,
        padding = case.padding,
        final_code = case.final_code,
        set = case.flags_set.literal(),
        not_set = case.flags_not_set.literal(),
    )
}

fn reg_write(reg: &Register, literal: &str) -> String {
    format!(
        "write_reg_value!({}; a; {}; {literal});",
        reg.size_letter(),
        reg.name().to_uppercase()
    )
}

fn mem_address(mem: &MemoryRef) -> u64 {
    (MEM_START + mem.offset()) as u64
}

fn write_operand(op: &Operand, value: u64) -> Result<String, RenderError> {
    match op {
        Operand::Register(reg) => {
            let literal = Immediate::new(value).render_for(reg.size())?;
            Ok(reg_write(reg, &literal))
        }
        Operand::Memory(mem) => {
            let addr = mem_address(mem);
            let literal = Immediate::new(value).render_for(mem.size())?;
            let mut out = reg_write(mem.base(), &format!("{addr:#x}"));
            if let Some(index) = mem.index() {
                out.push_str("\n        ");
                out.push_str(&reg_write(index, "0"));
            }
            out.push_str(&format!(
                "\n        a.mem_init_zero({addr:#x}, {}).unwrap();\n        a.mem_write_{}({addr:#x}, {literal}).unwrap();",
                mem.size(),
                u32::from(mem.size()) * 8,
            ));
            Ok(out)
        }
        Operand::Immediate(_) => unreachable!("immediates are not dynamic operands"),
    }
}

fn assert_operand(op: &Operand, value: u64) -> Result<String, RenderError> {
    match op {
        Operand::Register(reg) => {
            let literal = Immediate::new(value).render_for(reg.size())?;
            Ok(format!(
                "assert_reg_value!({}; a; {}; {literal});",
                reg.size_letter(),
                reg.name().to_uppercase()
            ))
        }
        Operand::Memory(mem) => {
            let addr = mem_address(mem);
            let literal = Immediate::new(value).render_for(mem.size())?;
            // The base register must still point at the buffer afterwards.
            Ok(format!(
                "assert_reg_value!({}; a; {}; {addr:#x});\n        assert_mem_value!({}; a; {addr:#x}; {literal});",
                mem.base().size_letter(),
                mem.base().name().to_uppercase(),
                mem.size_letter(),
            ))
        }
        Operand::Immediate(_) => unreachable!("immediates are not dynamic operands"),
    }
}
