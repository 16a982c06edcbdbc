use std::fmt;

use crate::error::ParseError;
use crate::operand::{Immediate, Operand};
use crate::parse::{parse_immediate, parse_operand};

/// A single x86-64 instruction: lowercase mnemonic, up to two explicit
/// operands, optional implicit operands (registers an instruction reads or
/// writes without naming them, e.g. `rdx` for `cqo`), and an optional
/// trailing immediate (the third operand of `imul r, r/m, imm`).
///
/// Equality covers the mnemonic and explicit operands only; implicit
/// operands and the trailing immediate are carried along but do not change
/// an instruction's identity.
#[derive(Debug, Clone)]
pub struct Instruction {
    mnemonic: String,
    operands: Vec<Operand>,
    implicit: Vec<Operand>,
    extra_imm: Option<Immediate>,
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.mnemonic == other.mnemonic && self.operands == other.operands
    }
}

impl Eq for Instruction {}

impl Instruction {
    /// Parse `mnemonic [op1[, op2[, imm]]]`.
    ///
    /// Commas inside `[...]` do not delimit operands. With two operands the
    /// parse order is adaptive: the first operand is tried standalone and
    /// the second against it; if that fails (the second operand's size was
    /// needed to size the first), the order is swapped.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let trimmed = text.trim();
        let (mnemonic, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((m, rest)) => (m, rest.trim()),
            None if trimmed.is_empty() => return Err(ParseError::EmptyInstruction),
            None => (trimmed, ""),
        };
        let mnemonic = mnemonic.to_ascii_lowercase();

        if rest.is_empty() {
            return Ok(Self {
                mnemonic,
                operands: Vec::new(),
                implicit: Vec::new(),
                extra_imm: None,
            });
        }

        let pieces = split_operands(rest);
        let mut extra_imm = None;
        let operands = match pieces.as_slice() {
            [single] => vec![parse_operand(single, None)?],
            [first, second] => parse_pair(first, second)?,
            [first, second, third] => {
                let pair = parse_pair(first, second)?;
                extra_imm = Some(parse_immediate(third)?);
                pair
            }
            _ => return Err(ParseError::TooManyOperands(text.to_string())),
        };

        Ok(Self {
            mnemonic,
            operands,
            implicit: Vec::new(),
            extra_imm,
        })
    }

    /// Attach implicit operands, enforcing the two-operand limit across the
    /// explicit and implicit lists combined.
    pub fn with_implicit(mut self, implicit: Vec<Operand>) -> Result<Self, ParseError> {
        let total = self.operands.len() + implicit.len();
        if total > 2 {
            return Err(ParseError::TooManyDynamicOperands(total));
        }
        self.implicit = implicit;
        Ok(self)
    }

    pub fn mnemonic(&self) -> &str {
        &self.mnemonic
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn implicit(&self) -> &[Operand] {
        &self.implicit
    }

    pub fn extra_imm(&self) -> Option<&Immediate> {
        self.extra_imm.as_ref()
    }

    /// Explicit then implicit operands, excluding immediates. These are the
    /// operands a probe supplies an input value for and reads back out.
    pub fn dynamic_operands(&self) -> Vec<&Operand> {
        self.operands
            .iter()
            .chain(self.implicit.iter())
            .filter(|op| op.is_dynamic())
            .collect()
    }
}

fn parse_pair(first: &str, second: &str) -> Result<Vec<Operand>, ParseError> {
    let forward = parse_operand(first, None)
        .and_then(|a| parse_operand(second, Some(&a)).map(|b| (a, b)));
    let (a, b) = match forward {
        Ok(pair) => pair,
        Err(_) => {
            // The second operand may be the only one with an inherent size
            // (e.g. `mov [rsp], rax`); parse it first and size the other
            // against it. Failures here are the ones worth reporting.
            let b = parse_operand(second, None)?;
            let a = parse_operand(first, Some(&b))?;
            (a, b)
        }
    };
    Ok(vec![a, b])
}

/// Split an operand list on commas at bracket depth zero.
fn split_operands(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut depth = 0u32;
    for ch in text.chars() {
        match ch {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                pieces.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    pieces.push(current.trim().to_string());
    pieces
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operands.as_slice() {
            [] => f.write_str(&self.mnemonic),
            [a] => write!(f, "{} {a}", self.mnemonic),
            [a, b] => match &self.extra_imm {
                None => write!(f, "{} {a}, {b}", self.mnemonic),
                Some(imm) => write!(f, "{} {a}, {b}, {imm}", self.mnemonic),
            },
            _ => unreachable!("parser caps explicit operands at two"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::Register;

    #[test]
    fn parses_register_and_immediate() {
        let instr = Instruction::parse("mov rax, 0x5").unwrap();
        assert_eq!(instr.mnemonic(), "mov");
        assert!(
            matches!(&instr.operands()[0], Operand::Register(r) if r.name() == "rax")
        );
        assert!(matches!(&instr.operands()[1], Operand::Immediate(i) if i.value == 5));
        assert!(instr.extra_imm().is_none());
    }

    #[test]
    fn parses_memory_source() {
        let instr = Instruction::parse("mov rax, [rsp+8]").unwrap();
        let Operand::Memory(mem) = &instr.operands()[1] else {
            panic!("expected memory operand");
        };
        assert_eq!(mem.base().name(), "rsp");
        assert_eq!(mem.offset(), 8);
        assert_eq!(mem.size(), 8, "size inferred from rax");
    }

    #[test]
    fn adaptive_order_sizes_memory_destination() {
        // The first operand has no explicit size; parsing must fall back to
        // sizing it against the second.
        let instr = Instruction::parse("mov [rsp+4*rcx], rax").unwrap();
        let Operand::Memory(mem) = &instr.operands()[0] else {
            panic!("expected memory operand");
        };
        assert_eq!(mem.base().name(), "rsp");
        assert_eq!(mem.offset(), 0);
        assert_eq!(mem.scale(), 4);
        assert_eq!(mem.index().unwrap().name(), "rcx");
        assert_eq!(mem.size(), 8);
        assert!(matches!(&instr.operands()[1], Operand::Register(r) if r.name() == "rax"));
    }

    #[test]
    fn two_sizeless_memory_operands_are_rejected() {
        // Both orders fail to find a size; the parse surfaces an error
        // rather than guessing a width.
        assert!(Instruction::parse("mov [rsp], [rsp+8]").is_err());
    }

    #[test]
    fn single_operand_and_bare_mnemonic() {
        let push = Instruction::parse("push rax").unwrap();
        assert_eq!(push.mnemonic(), "push");
        assert_eq!(push.operands().len(), 1);

        let pop = Instruction::parse("pop al").unwrap();
        assert!(matches!(&pop.operands()[0], Operand::Register(r) if r.size() == 1));

        let ret = Instruction::parse("ret").unwrap();
        assert!(ret.operands().is_empty());
    }

    #[test]
    fn third_operand_is_always_an_immediate() {
        let instr = Instruction::parse("imul ax, bx, 0x5").unwrap();
        assert_eq!(instr.operands().len(), 2);
        assert_eq!(instr.extra_imm().unwrap().value, 5);

        assert!(Instruction::parse("imul ax, bx, cx").is_err());
    }

    #[test]
    fn too_many_operands_fail() {
        assert!(matches!(
            Instruction::parse("bogus a, b, c, d"),
            Err(ParseError::TooManyOperands(_))
        ));
    }

    #[test]
    fn implicit_operands_respect_operand_limit() {
        let instr = Instruction::parse("cqo").unwrap();
        let rax = Operand::Register(Register::parse("rax").unwrap());
        let rdx = Operand::Register(Register::parse("rdx").unwrap());
        let instr = instr.with_implicit(vec![rax.clone(), rdx.clone()]).unwrap();
        assert_eq!(instr.dynamic_operands().len(), 2);

        let full = Instruction::parse("add rax, rbx").unwrap();
        assert!(matches!(
            full.with_implicit(vec![rdx]),
            Err(ParseError::TooManyDynamicOperands(3))
        ));
    }

    #[test]
    fn equality_ignores_implicit_and_trailing_immediate() {
        let a = Instruction::parse("div rcx").unwrap();
        let b = Instruction::parse("div rcx")
            .unwrap()
            .with_implicit(vec![Operand::Register(Register::parse("rax").unwrap())])
            .unwrap();
        assert_eq!(a, b);

        let c = Instruction::parse("imul ax, bx, 0x5").unwrap();
        let d = Instruction::parse("imul ax, bx, 0x7").unwrap();
        assert_eq!(c, d);

        let e = Instruction::parse("add rax, rbx").unwrap();
        let f = Instruction::parse("sub rax, rbx").unwrap();
        assert_ne!(e, f);
    }

    #[test]
    fn display_round_trips() {
        for text in [
            "ret",
            "push rax",
            "mov rax, 0x5",
            "mov rax, qword ptr [rsp+8]",
            "mov qword ptr [rsp+4*rcx], rax",
            "add byte ptr [rax], bl",
            "imul ax, bx, 0x5",
        ] {
            let parsed = Instruction::parse(text).unwrap();
            let reparsed = Instruction::parse(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed, "{text}");
        }
    }

    #[test]
    fn dynamic_operands_exclude_immediates() {
        let instr = Instruction::parse("add rax, 0x5").unwrap();
        assert_eq!(instr.dynamic_operands().len(), 1);

        let instr = Instruction::parse("imul ax, bx, 0x5").unwrap();
        assert_eq!(instr.dynamic_operands().len(), 2);
    }
}
