use std::fmt;

use crate::error::{ParseError, RenderError};
use crate::registers;

/// One- or two-character width tag used by the fixture macros (`b`/`w`/`d`/`q`).
pub fn size_letter(size: u8) -> char {
    match size {
        1 => 'b',
        2 => 'w',
        4 => 'd',
        8 => 'q',
        _ => unreachable!("operand sizes are validated at construction"),
    }
}

/// A general-purpose register operand. The name is stored lowercase; the
/// size is fixed by the canonical name tables.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Register {
    name: String,
    size: u8,
}

impl Register {
    pub fn parse(name: &str) -> Result<Self, ParseError> {
        let name = name.trim().to_ascii_lowercase();
        let size = registers::size_of(&name)
            .ok_or_else(|| ParseError::UnknownRegister(name.clone()))?;
        Ok(Self { name, size })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn size_letter(&self) -> char {
        size_letter(self.size)
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// An immediate operand. Immediates carry no inherent width; rendering one
/// as a literal requires a target operand to fix the width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Immediate {
    pub value: u64,
}

impl Immediate {
    pub fn new(value: u64) -> Self {
        Self { value }
    }

    /// Render as a fixture literal for a target of `target_size` bytes.
    ///
    /// Values at or above `0x7fffffff` get an explicit width suffix (`u32`
    /// against a 4-byte target, `u64` otherwise) so the literal cannot be
    /// silently truncated; smaller values render as bare hex. Fails if the
    /// value does not fit the target width at all.
    pub fn render_for(&self, target_size: u8) -> Result<String, RenderError> {
        let bits = u32::from(target_size) * 8;
        if bits < 64 && self.value >> bits != 0 {
            return Err(RenderError {
                value: self.value,
                size: target_size,
            });
        }

        if self.value >= 0x7fff_ffff {
            let suffix = if target_size == 4 { "u32" } else { "u64" };
            Ok(format!("{:#x}{suffix}", self.value))
        } else {
            Ok(format!("{:#x}", self.value))
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.value)
    }
}

/// A `base + offset` or `base + scale*index` memory reference with an
/// explicit access size. Offset and index are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryRef {
    base: Register,
    offset: i64,
    scale: u8,
    index: Option<Register>,
    size: u8,
}

impl MemoryRef {
    pub fn new(
        base: Register,
        offset: i64,
        scale: u8,
        index: Option<Register>,
        size: u8,
    ) -> Result<Self, ParseError> {
        if offset != 0 && index.is_some() {
            return Err(ParseError::OffsetWithIndex);
        }
        debug_assert!(matches!(scale, 1 | 2 | 4 | 8));
        debug_assert!(matches!(size, 1 | 2 | 4 | 8));
        Ok(Self {
            base,
            offset,
            scale,
            index,
            size,
        })
    }

    pub fn base(&self) -> &Register {
        &self.base
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn index(&self) -> Option<&Register> {
        self.index.as_ref()
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn size_letter(&self) -> char {
        size_letter(self.size)
    }

    fn size_prefix(&self) -> &'static str {
        match self.size {
            1 => "byte ptr ",
            2 => "word ptr ",
            4 => "dword ptr ",
            8 => "qword ptr ",
            _ => unreachable!(),
        }
    }
}

impl fmt::Display for MemoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.size_prefix())?;
        match (&self.index, self.offset) {
            (None, 0) => write!(f, "[{}]", self.base),
            (None, offset) if offset < 0 => {
                write!(f, "[{}-{}]", self.base, offset.unsigned_abs())
            }
            (None, offset) => write!(f, "[{}+{offset}]", self.base),
            (Some(index), _) if self.scale == 1 => write!(f, "[{}+{index}]", self.base),
            (Some(index), _) => write!(f, "[{}+{}*{index}]", self.base, self.scale),
        }
    }
}

/// Closed set of operand shapes the probe generator understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    Register(Register),
    Immediate(Immediate),
    Memory(MemoryRef),
}

impl Operand {
    /// Access width in bytes; immediates have none.
    pub fn size(&self) -> Option<u8> {
        match self {
            Operand::Register(reg) => Some(reg.size()),
            Operand::Immediate(_) => None,
            Operand::Memory(mem) => Some(mem.size()),
        }
    }

    /// A register or memory operand, i.e. one whose value is supplied and
    /// observed per probe.
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, Operand::Immediate(_))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => reg.fmt(f),
            Operand::Immediate(imm) => imm.fmt(f),
            Operand::Memory(mem) => mem.fmt(f),
        }
    }
}
