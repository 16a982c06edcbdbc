//! Textual operand/instruction model for the probe generator.
//!
//! This crate understands just enough GNU `as` Intel syntax to take a single
//! x86-64 instruction like `add qword ptr [rsp+8], rax` apart into a
//! mnemonic plus up to two explicit operands (and an optional trailing
//! immediate, as in `imul ax, bx, 0x5`). It is deliberately not a
//! disassembler: the operand grammar covers registers, immediates and
//! base/offset/scale/index memory references, nothing more.
//!
//! Operands render back into the exact text the system assembler accepts, so
//! a parsed [`Instruction`] can be spliced verbatim into a generated probe
//! program.

mod error;
mod instruction;
mod operand;
mod parse;
pub mod registers;

pub use error::{ParseError, RenderError, Result};
pub use instruction::Instruction;
pub use operand::{size_letter, Immediate, MemoryRef, Operand, Register};
pub use parse::parse_operand;
