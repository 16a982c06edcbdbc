//! Probe program codegen.
//!
//! Each probe is a freestanding `_start` program in GNU `as` Intel syntax:
//! load the input values, preload the precondition flags, run the
//! instruction under test exactly once, then dump RFLAGS and the current
//! value of every dynamic operand to stdout via a raw `write` syscall.
//!
//! The statement order is load-bearing: operand setup (flag-neutral `mov`s
//! only) -> flag preload -> instruction -> flag capture -> value capture ->
//! output. Reordering any of these changes what the probe observes.

use std::fmt::Write as _;

use flaglearn_x86::{Instruction, Operand};

use crate::inputs::Input;

/// Byte length of the probe's stdout buffer: an 8-byte RFLAGS slot plus one
/// 8-byte slot per dynamic operand.
pub fn output_len(dynamic_operands: usize) -> usize {
    8 + 8 * dynamic_operands
}

/// The rax-family register of the given width, used to shuttle operand
/// values into the output buffer.
fn accumulator(size: u8) -> &'static str {
    match size {
        1 => "al",
        2 => "ax",
        4 => "eax",
        8 => "rax",
        _ => unreachable!("operand sizes are validated at construction"),
    }
}

/// Emit the probe program for one instruction under one concrete input.
///
/// Memory operands are bound to the stack: the base register is pointed at
/// `rsp` and the index register (if any) zeroed, so the effective address is
/// always writable in a freestanding process.
pub fn probe_program(instruction: &Instruction, input: &Input) -> String {
    let dynamic = instruction.dynamic_operands();
    debug_assert_eq!(dynamic.len(), input.values.len());

    let mut setup = String::new();
    for (op, &value) in dynamic.iter().zip(&input.values) {
        match op {
            Operand::Register(reg) => {
                let _ = writeln!(setup, "    mov {reg}, {value}");
            }
            Operand::Memory(mem) => {
                if mem.base().name() != "rsp" {
                    let _ = writeln!(setup, "    mov {}, rsp", mem.base());
                }
                if let Some(index) = mem.index() {
                    let _ = writeln!(setup, "    mov {index}, 0");
                }
                // The size prefix in the operand's own rendering picks the
                // width-correct mov form.
                let _ = writeln!(setup, "    mov {mem}, {value}");
            }
            Operand::Immediate(_) => unreachable!("dynamic operands exclude immediates"),
        }
    }

    let mut capture = String::new();
    for (slot, op) in dynamic.iter().enumerate() {
        let acc = accumulator(op.size().expect("dynamic operands are sized"));
        let _ = writeln!(capture, "    push rax");
        let _ = writeln!(capture, "    mov {acc}, {op}");
        let _ = writeln!(capture, "    mov [rip+out_val{slot}], {acc}");
        let _ = writeln!(capture, "    pop rax");
    }

    format!(
        "\
.intel_syntax noprefix
.data
out_flags: .space 8
out_val0: .space 8
out_val1: .space 8
.text
.global _start
_start:
{setup}\
    push rax
    mov rax, {flags:#x}
    push rax
    popfq
    pop rax
{instruction}
    push rax
    pushfq
    pop rax
    mov [rip+out_flags], rax
    pop rax
{capture}\
    mov rax, 1
    mov rdi, 1
    lea rsi, [rip+out_flags]
    mov rdx, {len}
    syscall
    mov rax, 60
    xor rdi, rdi
    syscall
",
        flags = input.flags.bits(),
        len = output_len(dynamic.len()),
    )
}

/// Byte length of a jump probe's stdout buffer: RFLAGS, initial RIP and
/// final RIP, 8 bytes each.
pub const JUMP_OUTPUT_LEN: usize = 24;

/// Emit a jump probe: run `initial`, then `padding` nop bytes, then
/// `final_code`, recording the instruction pointer on both sides.
///
/// RIP is sampled with `lea rax, [rip]` immediately before the initial code
/// and immediately after the final code, so the two values bracket the
/// control-flow transfer including however much padding was skipped. Flags
/// are cleared up front and captured at the end. `initial` and `final_code`
/// are spliced verbatim and may contain labels and multiple instructions.
pub fn jump_program(initial: &str, padding: usize, final_code: &str) -> String {
    format!(
        "\
.intel_syntax noprefix
.data
out_flags: .space 8
out_initial_rip: .space 8
out_final_rip: .space 8
.text
.global _start
_start:
    mov rax, 0
    push rax
    popfq
    lea rax, [rip]
    mov [rip+out_initial_rip], rax
{initial}
.rept {padding}
.byte 0x90
.endr
{final_code}
    lea rax, [rip]
    mov [rip+out_final_rip], rax
    pushfq
    pop rax
    mov [rip+out_flags], rax
    mov rax, 1
    mov rdi, 1
    lea rsi, [rip+out_flags]
    mov rdx, {JUMP_OUTPUT_LEN}
    syscall
    mov rax, 60
    xor rdi, rdi
    syscall
"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::Flags;
    use flaglearn_x86::Instruction;

    fn input(values: Vec<u64>, flags: Flags) -> Input {
        Input { values, flags }
    }

    #[test]
    fn register_operands_load_directly() {
        let instr = Instruction::parse("add rax, rbx").unwrap();
        let program = probe_program(&instr, &input(vec![5, 7], Flags::empty()));
        assert!(program.contains("    mov rax, 5\n"));
        assert!(program.contains("    mov rbx, 7\n"));
        assert!(program.contains("    mov rdx, 24\n"));
    }

    #[test]
    fn memory_operand_binds_base_and_index() {
        let instr = Instruction::parse("add qword ptr [rax+4*rcx], rbx").unwrap();
        let program = probe_program(&instr, &input(vec![1, 2], Flags::empty()));
        assert!(program.contains("    mov rax, rsp\n"));
        assert!(program.contains("    mov rcx, 0\n"));
        assert!(program.contains("    mov qword ptr [rax+4*rcx], 1\n"));
    }

    #[test]
    fn rsp_based_operand_needs_no_rebind() {
        let instr = Instruction::parse("inc byte ptr [rsp]").unwrap();
        let program = probe_program(&instr, &input(vec![0xff], Flags::empty()));
        assert!(!program.contains("mov rsp, rsp"));
        assert!(program.contains("    mov byte ptr [rsp], 255\n"));
        assert!(program.contains("    mov rdx, 16\n"));
    }

    #[test]
    fn flag_preload_uses_input_mask() {
        let instr = Instruction::parse("adc rax, rbx").unwrap();
        let program = probe_program(&instr, &input(vec![0, 0], Flags::CF | Flags::ZF));
        assert!(program.contains("    mov rax, 0x41\n"));
    }

    #[test]
    fn probe_stages_are_ordered() {
        let instr = Instruction::parse("add rax, rbx").unwrap();
        let program = probe_program(&instr, &input(vec![1, 2], Flags::empty()));

        let setup = program.find("mov rax, 1\n").unwrap();
        let preload = program.find("popfq").unwrap();
        let instruction = program.find("add rax, rbx").unwrap();
        let flag_capture = program.find("pushfq").unwrap();
        let value_capture = program.find("[rip+out_val0]").unwrap();
        let write = program.find("mov rdx, 24").unwrap();

        assert!(setup < preload);
        assert!(preload < instruction);
        assert!(instruction < flag_capture);
        assert!(flag_capture < value_capture);
        assert!(value_capture < write);
    }

    #[test]
    fn capture_width_matches_operand_size() {
        let instr = Instruction::parse("inc bl").unwrap();
        let program = probe_program(&instr, &input(vec![3], Flags::empty()));
        assert!(program.contains("    mov al, bl\n"));
        assert!(program.contains("    mov [rip+out_val0], al\n"));
    }

    #[test]
    fn zero_operand_probe_only_reports_flags() {
        let instr = Instruction::parse("stc").unwrap();
        let program = probe_program(&instr, &input(vec![], Flags::empty()));
        assert!(!program.contains("out_val0],"));
        assert!(program.contains("    mov rdx, 8\n"));
    }

    #[test]
    fn output_len_matches_arity() {
        assert_eq!(output_len(0), 8);
        assert_eq!(output_len(1), 16);
        assert_eq!(output_len(2), 24);
    }

    #[test]
    fn jump_program_brackets_code_with_rip_samples() {
        let program = jump_program("jmp .Ldone", 50, ".Ldone: nop");

        let initial_sample = program.find("out_initial_rip], rax").unwrap();
        let initial_code = program.find("jmp .Ldone").unwrap();
        let padding = program.find(".rept 50").unwrap();
        let final_code = program.find(".Ldone: nop").unwrap();
        let final_sample = program.find("out_final_rip], rax").unwrap();
        let flag_capture = program.find("pushfq").unwrap();

        assert!(initial_sample < initial_code);
        assert!(initial_code < padding);
        assert!(padding < final_code);
        assert!(final_code < final_sample);
        assert!(final_sample < flag_capture);
        assert!(program.contains("    mov rdx, 24\n"));
    }

    #[test]
    fn jump_program_clears_flags_before_running() {
        let program = jump_program("nop", 1, "nop");
        let clear = program.find("mov rax, 0\n").unwrap();
        let preload = program.find("popfq").unwrap();
        let initial_store = program.find("[rip+out_initial_rip]").unwrap();
        assert!(clear < preload);
        assert!(preload < initial_store);
    }
}
