//! Canonical x86-64 general-purpose register name tables.
//!
//! Every name appears in exactly one size class; [`size_of`] is a pure
//! function of the name.

use std::sync::OnceLock;

pub const QWORD: [&str; 17] = [
    "rip", "rax", "rbx", "rcx", "rdx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11",
    "r12", "r13", "r14", "r15",
];

pub const DWORD: [&str; 16] = [
    "eax", "ebx", "ecx", "edx", "esi", "edi", "ebp", "esp", "r8d", "r9d", "r10d", "r11d", "r12d",
    "r13d", "r14d", "r15d",
];

pub const WORD: [&str; 16] = [
    "ax", "bx", "cx", "dx", "si", "di", "bp", "sp", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w",
    "r14w", "r15w",
];

pub const BYTE: [&str; 20] = [
    "al", "ah", "bl", "bh", "cl", "ch", "dl", "dh", "sil", "dil", "bpl", "spl", "r8b", "r9b",
    "r10b", "r11b", "r12b", "r13b", "r14b", "r15b",
];

/// Byte width of the named register (lowercase), or `None` if unknown.
pub fn size_of(name: &str) -> Option<u8> {
    if QWORD.contains(&name) {
        Some(8)
    } else if DWORD.contains(&name) {
        Some(4)
    } else if WORD.contains(&name) {
        Some(2)
    } else if BYTE.contains(&name) {
        Some(1)
    } else {
        None
    }
}

/// All register names ordered longest-first.
///
/// Greedy prefix matching in the memory-operand grammar must try `rax`
/// before `ax` before `al`, otherwise a substring wins.
pub fn all_longest_first() -> &'static [&'static str] {
    static SORTED: OnceLock<Vec<&'static str>> = OnceLock::new();
    SORTED.get_or_init(|| {
        let mut names: Vec<&'static str> = QWORD
            .iter()
            .chain(DWORD.iter())
            .chain(WORD.iter())
            .chain(BYTE.iter())
            .copied()
            .collect();
        names.sort_by_key(|n| std::cmp::Reverse(n.len()));
        names
    })
}
