//! Jump fixture synthesis.
//!
//! Control-flow instructions do not fit the operand-probing model: what
//! matters is where execution lands, not an operand value. A jump probe
//! runs an initial code block, a run of nop padding and a final code block,
//! sampling RIP on both sides, and becomes one [`JumpTestCase`] describing
//! the distance travelled and the resulting flag state.

use flaglearn_harness::{ProbeError, Toolchain};
use flaglearn_probe::{jump_program, Flags, JUMP_OUTPUT_LEN};
use thiserror::Error;

use crate::testcase::sanitize;

/// Both RIP samples read the address of the store that follows them, so the
/// raw final sample sits one 7-byte `lea` plus one 7-byte store past the
/// final code. Removing both gives it the same skew as the initial sample,
/// making the difference of the two equal the distance actually executed.
const FINAL_RIP_ADJUST: u64 = 14;

/// One synthesized jump expectation: starting from `initial_rip`, executing
/// the initial block, `padding` nop bytes and the final block ends at
/// `final_rip` with these flags.
#[derive(Debug, Clone)]
pub struct JumpTestCase {
    pub initial_code: String,
    pub final_code: String,
    pub padding: usize,
    /// Encoded bytes of the initial block (before the padding run).
    pub initial_encoding: Vec<u8>,
    /// Encoded bytes of the final block (after the padding run).
    pub final_encoding: Vec<u8>,
    pub initial_rip: u64,
    pub final_rip: u64,
    pub flags_set: Flags,
    pub flags_not_set: Flags,
}

impl JumpTestCase {
    /// Canonical identifier: both code blocks plus the set flags, sanitized
    /// to `[a-z0-9_]`.
    pub fn id(&self) -> String {
        let mut raw = format!("{}_{}", self.initial_code, self.final_code);
        for name in self.flags_set.names() {
            raw.push('_');
            raw.push_str(name);
        }
        sanitize(&raw)
    }
}

#[derive(Debug, Error)]
pub enum JumpError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("could not locate the run of {0} nop bytes in the assembled code")]
    PaddingNotFound(usize),
}

/// Probe one jump scenario on the host and synthesize its test case.
///
/// The scenario is probed once (there is no input space: the code blocks
/// are fixed) and its encoding assembled separately, split at the first run
/// of `padding` nop bytes.
pub fn probe_jump(
    toolchain: &Toolchain,
    initial: &str,
    padding: usize,
    final_code: &str,
    observed: Flags,
) -> Result<JumpTestCase, JumpError> {
    let source = jump_program(initial, padding, final_code);
    let buffer = toolchain.run_probe(&source, JUMP_OUTPUT_LEN)?;
    let (flags_set, flags_not_set, initial_rip, final_rip) = decode_jump(&buffer, observed);

    let combined = toolchain.encode(&format!(
        "{initial}\n.rept {padding}\n.byte 0x90\n.endr\n{final_code}"
    ))?;
    let (initial_encoding, final_encoding) =
        split_on_padding(&combined, padding).ok_or(JumpError::PaddingNotFound(padding))?;

    tracing::info!(
        initial,
        final_code,
        distance = final_rip.wrapping_sub(initial_rip),
        "jump probed"
    );

    Ok(JumpTestCase {
        initial_code: initial.to_string(),
        final_code: final_code.to_string(),
        padding,
        initial_encoding,
        final_encoding,
        initial_rip,
        final_rip,
        flags_set,
        flags_not_set,
    })
}

fn decode_jump(buffer: &[u8], observed: Flags) -> (Flags, Flags, u64, u64) {
    let word = |range: std::ops::Range<usize>| {
        u64::from_le_bytes(buffer[range].try_into().expect("length checked by harness"))
    };
    let flags_set = Flags::from_bits_truncate(word(0..8)) & observed;
    let flags_not_set = observed - flags_set;
    let initial_rip = word(8..16);
    let final_rip = word(16..24).wrapping_sub(FINAL_RIP_ADJUST);
    (flags_set, flags_not_set, initial_rip, final_rip)
}

/// Split assembled bytes at the first run of `padding` nops.
fn split_on_padding(bytes: &[u8], padding: usize) -> Option<(Vec<u8>, Vec<u8>)> {
    if padding == 0 || bytes.len() < padding {
        return None;
    }
    let start = bytes
        .windows(padding)
        .position(|w| w.iter().all(|&b| b == 0x90))?;
    Some((
        bytes[..start].to_vec(),
        bytes[start + padding..].to_vec(),
    ))
}
