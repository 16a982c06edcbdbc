use thiserror::Error;

pub type Result<T> = std::result::Result<T, ParseError>;

/// Errors from operand/instruction parsing.
///
/// Parsing is all-or-nothing: any variant here aborts the run immediately,
/// there is never a partial instruction to fall back on.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("unknown register: {0}")]
    UnknownRegister(String),

    #[error("invalid immediate literal: {0}")]
    InvalidImmediate(String),

    #[error("could not parse operand: {0}")]
    UnknownOperand(String),

    #[error(
        "cannot infer the size of memory operand `{0}`; \
         annotate it with a `byte/word/dword/qword ptr` prefix"
    )]
    MissingSize(String),

    #[error("invalid memory operand `{text}`: {reason}")]
    InvalidMemory { text: String, reason: &'static str },

    #[error("memory operand cannot combine an offset with a scaled index")]
    OffsetWithIndex,

    #[error("instruction is empty")]
    EmptyInstruction,

    #[error("too many operands in `{0}` (at most two plus a trailing immediate)")]
    TooManyOperands(String),

    #[error("at most 2 explicit and implicit operands are supported, got {0}")]
    TooManyDynamicOperands(usize),
}

/// A value that cannot be expressed as a literal at its operand's width.
///
/// Recovered locally by the synthesis engine: the affected test case is
/// dropped from the surviving set.
#[derive(Debug, Clone, Copy, Error)]
#[error("value {value:#x} does not fit a {size}-byte operand")]
pub struct RenderError {
    pub value: u64,
    pub size: u8,
}
