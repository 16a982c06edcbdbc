//! End-to-end harness tests against the real system toolchain.
//!
//! These need `as` + `gcc` and an x86-64 linux host; they skip (rather than
//! fail) anywhere else.

#![cfg(all(target_arch = "x86_64", target_os = "linux"))]

use std::time::Duration;

use flaglearn_harness::{ProbeError, Toolchain};

fn toolchain_or_skip() -> Option<Toolchain> {
    if !Toolchain::available() {
        eprintln!("skipping: `as`/`gcc` not on PATH");
        return None;
    }
    Some(Toolchain::detect())
}

/// Minimal probe-shaped program writing `len` bytes from a known buffer.
fn emit_bytes_program(len: usize) -> String {
    format!(
        "\
.intel_syntax noprefix
.data
buf: .space 24
.text
.global _start
_start:
    mov rax, 0x42
    mov [rip+buf], rax
    mov rax, 1
    mov rdi, 1
    lea rsi, [rip+buf]
    mov rdx, {len}
    syscall
    mov rax, 60
    xor rdi, rdi
    syscall
"
    )
}

#[test]
fn encode_extracts_single_instruction_bytes() {
    let Some(toolchain) = toolchain_or_skip() else {
        return;
    };
    assert_eq!(toolchain.encode("nop").unwrap(), vec![0x90]);
    assert_eq!(toolchain.encode("add rax, rbx").unwrap(), vec![0x48, 0x01, 0xd8]);
}

#[test]
fn encode_rejects_garbage() {
    let Some(toolchain) = toolchain_or_skip() else {
        return;
    };
    assert!(toolchain.encode("definitely not asm").is_err());
}

#[test]
fn run_probe_captures_stdout_buffer() {
    let Some(toolchain) = toolchain_or_skip() else {
        return;
    };
    let output = toolchain.run_probe(&emit_bytes_program(16), 16).unwrap();
    assert_eq!(output.len(), 16);
    assert_eq!(u64::from_le_bytes(output[..8].try_into().unwrap()), 0x42);
}

#[test]
fn run_probe_rejects_wrong_output_length() {
    let Some(toolchain) = toolchain_or_skip() else {
        return;
    };
    let err = toolchain.run_probe(&emit_bytes_program(16), 24).unwrap_err();
    assert!(matches!(
        err,
        ProbeError::OutputLength {
            got: 16,
            expected: 24
        }
    ));
}

#[test]
fn run_probe_surfaces_assembler_failure() {
    let Some(toolchain) = toolchain_or_skip() else {
        return;
    };
    let err = toolchain.run_probe("this is not assembly\n", 8).unwrap_err();
    assert!(matches!(err, ProbeError::ToolFailed { tool: "as", .. }));
}

#[test]
fn hung_probe_is_killed_at_the_deadline() {
    let Some(toolchain) = toolchain_or_skip() else {
        return;
    };
    let toolchain = toolchain.with_timeout(Duration::from_millis(300));
    let source = "\
.intel_syntax noprefix
.text
.global _start
_start:
    jmp _start
";
    let err = toolchain.run_probe(source, 8).unwrap_err();
    assert!(matches!(err, ProbeError::Timeout(_)));
}
