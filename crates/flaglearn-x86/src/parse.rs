//! Operand grammar.
//!
//! Resolution order is significant and must not change: register, then
//! immediate, then memory. Earlier failures are discarded on purpose (they
//! carry no information once a later alternative is being tried); only the
//! final alternative's failure is surfaced.

use crate::error::ParseError;
use crate::operand::{Immediate, MemoryRef, Operand, Register};
use crate::registers;

/// Parse a single textual operand.
///
/// `sibling` is the already-parsed other operand of the same instruction,
/// used to infer the access size of memory operands that carry no explicit
/// `... ptr` prefix.
pub fn parse_operand(text: &str, sibling: Option<&Operand>) -> Result<Operand, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::UnknownOperand(text.to_string()));
    }

    if let Ok(reg) = Register::parse(trimmed) {
        return Ok(Operand::Register(reg));
    }
    if let Ok(imm) = parse_immediate(trimmed) {
        return Ok(Operand::Immediate(imm));
    }
    parse_memory(trimmed, sibling).map(Operand::Memory)
}

/// Parse an integer literal in any common base (`0x`, `0o`, `0b`, decimal),
/// with optional `_` separators and an optional leading `-` (stored as the
/// two's-complement u64).
pub(crate) fn parse_immediate(text: &str) -> Result<Immediate, ParseError> {
    let err = || ParseError::InvalidImmediate(text.to_string());

    let cleaned: String = text.trim().chars().filter(|c| *c != '_').collect();
    let (negative, rest) = match cleaned.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, cleaned.as_str()),
    };

    let lower = rest.to_ascii_lowercase();
    let (radix, digits) = if let Some(d) = lower.strip_prefix("0x") {
        (16, d)
    } else if let Some(d) = lower.strip_prefix("0o") {
        (8, d)
    } else if let Some(d) = lower.strip_prefix("0b") {
        (2, d)
    } else {
        (10, lower.as_str())
    };
    if digits.is_empty() {
        return Err(err());
    }

    let value = u64::from_str_radix(digits, radix).map_err(|_| err())?;
    Ok(Immediate::new(if negative {
        value.wrapping_neg()
    } else {
        value
    }))
}

/// Parse a bracketed memory operand: optional size prefix, mandatory `[`
/// body `]`, optional base register, then either a signed offset or a
/// `*scale` with index register. Trailing text is an error.
pub(crate) fn parse_memory(
    text: &str,
    sibling: Option<&Operand>,
) -> Result<MemoryRef, ParseError> {
    let lower = text.trim().to_ascii_lowercase();

    let (explicit_size, rest) = if let Some(r) = lower.strip_prefix("byte ptr") {
        (Some(1), r)
    } else if let Some(r) = lower.strip_prefix("word ptr") {
        (Some(2), r)
    } else if let Some(r) = lower.strip_prefix("dword ptr") {
        (Some(4), r)
    } else if let Some(r) = lower.strip_prefix("qword ptr") {
        (Some(8), r)
    } else if let Some(r) = lower.strip_prefix("ptr") {
        (None, r)
    } else {
        (None, lower.as_str())
    };

    let size = match explicit_size {
        Some(size) => size,
        None => sibling
            .and_then(Operand::size)
            .ok_or_else(|| ParseError::MissingSize(text.to_string()))?,
    };

    let invalid = |reason: &'static str| ParseError::InvalidMemory {
        text: text.to_string(),
        reason,
    };

    let body = rest
        .trim()
        .strip_prefix('[')
        .and_then(|b| b.strip_suffix(']'))
        .ok_or_else(|| invalid("expected a bracketed address"))?;

    let mut cursor = body.trim();
    let base = take_register(&mut cursor).ok_or_else(|| invalid("expected a base register"))?;
    cursor = cursor.trim_start();

    if cursor.is_empty() {
        return MemoryRef::new(base, 0, 1, None, size);
    }

    let sign = match cursor.chars().next() {
        Some('+') => 1i64,
        Some('-') => -1i64,
        _ => return Err(invalid("expected `+`, `-` or end of address")),
    };
    cursor = cursor[1..].trim_start();

    // `base + index` with no explicit scale.
    if sign == 1 {
        if let Some(index) = take_register(&mut cursor) {
            if !cursor.trim().is_empty() {
                return Err(invalid("trailing text after index register"));
            }
            return MemoryRef::new(base, 0, 1, Some(index), size);
        }
    }

    let number = take_number(&mut cursor).ok_or_else(|| invalid("expected a number"))?;
    cursor = cursor.trim_start();

    if let Some(rest) = cursor.strip_prefix('*') {
        if sign == -1 {
            return Err(invalid("scale cannot be negative"));
        }
        if !matches!(number, 1 | 2 | 4 | 8) {
            return Err(invalid("scale must be 1, 2, 4 or 8"));
        }
        cursor = rest.trim_start();
        let index =
            take_register(&mut cursor).ok_or_else(|| invalid("expected an index register"))?;
        if !cursor.trim().is_empty() {
            return Err(invalid("trailing text after index register"));
        }
        return MemoryRef::new(base, 0, number as u8, Some(index), size);
    }

    if !cursor.trim().is_empty() {
        return Err(invalid("trailing text after offset"));
    }
    MemoryRef::new(base, sign * number as i64, 1, None, size)
}

/// Greedy longest-first register match at the front of `cursor`, consuming
/// the name on success.
fn take_register(cursor: &mut &str) -> Option<Register> {
    for name in registers::all_longest_first() {
        if let Some(rest) = cursor.strip_prefix(name) {
            *cursor = rest;
            // The tables only contain valid names.
            return Some(Register::parse(name).expect("table names are valid"));
        }
    }
    None
}

/// Consume a decimal number, tolerating embedded whitespace (`+ 8`).
fn take_number(cursor: &mut &str) -> Option<u64> {
    let mut digits = String::new();
    let mut consumed = 0;
    for (idx, ch) in cursor.char_indices() {
        if ch.is_ascii_digit() {
            digits.push(ch);
        } else if !ch.is_whitespace() {
            break;
        }
        consumed = idx + ch.len_utf8();
    }
    if digits.is_empty() {
        return None;
    }
    *cursor = &cursor[consumed..];
    digits.parse().ok()
}
