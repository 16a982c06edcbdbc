use flaglearn_probe::{Flags, Input};
use flaglearn_x86::{Immediate, Instruction, RenderError};

/// One synthesized expectation: for this instruction, under this input and
/// these precondition flags, the hardware produced these operand values and
/// this flag state.
///
/// Test cases are produced exclusively by [`crate::learn`] and are never
/// mutated afterwards, only filtered, sorted and rendered.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub instruction: Instruction,
    /// The instruction's encoded bytes (from the assembler, not from us).
    pub encoding: Vec<u8>,
    /// Observed flags, relative to the configured observation set.
    pub flags_set: Flags,
    pub flags_not_set: Flags,
    pub input: Input,
    /// Post-execution value of each dynamic operand, in input order,
    /// truncated to the operand's width.
    pub expected: Vec<u64>,
}

impl TestCase {
    /// Canonical identifier: instruction text, set flags, implicit-operand
    /// values (they are invisible in the instruction text but distinguish
    /// otherwise-identical cases), and any precondition flags, sanitized to
    /// `[a-z0-9_]`.
    pub fn id(&self) -> String {
        let mut raw = self.instruction.to_string();
        for name in self.flags_set.names() {
            raw.push('_');
            raw.push_str(name);
        }

        let explicit_dynamic = self
            .instruction
            .operands()
            .iter()
            .filter(|op| op.is_dynamic())
            .count();
        let implicit_values = self.input.values.iter().skip(explicit_dynamic);
        for (op, value) in self
            .instruction
            .implicit()
            .iter()
            .filter(|op| op.is_dynamic())
            .zip(implicit_values)
        {
            raw.push_str(&format!("_{op}_{value}"));
        }

        for name in self.input.flags.names() {
            raw.push('_');
            raw.push_str(name);
        }

        sanitize(&raw)
    }

    /// Whether every input and expected value can be expressed as a literal
    /// at its operand's width. Cases that cannot are dropped rather than
    /// emitted as unrenderable fixtures.
    pub fn check_renderable(&self) -> Result<(), RenderError> {
        let dynamic = self.instruction.dynamic_operands();
        for values in [&self.input.values, &self.expected] {
            for (op, &value) in dynamic.iter().zip(values.iter()) {
                if let Some(size) = op.size() {
                    Immediate::new(value).render_for(size)?;
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
