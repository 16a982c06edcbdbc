//! Probe execution and test-case synthesis.
//!
//! [`learn`] runs every generated [`Input`] through the native harness in
//! parallel, decodes the observation buffers, discards duplicate
//! observations under the flag-equivalence policy, and returns an ordered,
//! size-capped collection of [`TestCase`] records.
//!
//! Probes are independent and commutative: there is no cross-probe
//! synchronization, a failing probe is recorded as "no observation" and the
//! batch continues, and only the final collection is ordered (by canonical
//! test id).
//!
//! Control-flow instructions take the separate [`probe_jump`] path: one
//! probe per scenario (there is no input space to sweep) producing a
//! [`JumpTestCase`] that records where execution landed.

mod jump;
mod testcase;

use rand::Rng;
use thiserror::Error;

use flaglearn_harness::{ProbeError, Toolchain};
use flaglearn_probe::{output_len, probe_program, Flags, Input};
use flaglearn_x86::{Instruction, Operand};
use rayon::prelude::*;

pub use jump::{probe_jump, JumpError, JumpTestCase};
pub use testcase::TestCase;

/// Hard cap on the synthesized collection; larger sets are uniformly
/// sampled down to this size and the truncation reported to the caller.
pub const DEFAULT_CAP: usize = 50;

#[derive(Debug, Clone)]
pub struct LearnOptions {
    /// Flags under analysis. Observations are classified (and deduplicated)
    /// relative to this set only.
    pub observed: Flags,
    /// Keep every successful probe instead of deduplicating by flag
    /// outcome.
    pub result_only: bool,
    /// Maximum number of surviving test cases.
    pub cap: usize,
    /// Worker pool size; defaults to four workers per CPU core.
    pub jobs: Option<usize>,
}

impl Default for LearnOptions {
    fn default() -> Self {
        Self {
            observed: Flags::all(),
            result_only: false,
            cap: DEFAULT_CAP,
            jobs: None,
        }
    }
}

/// The synthesized result set plus run accounting.
#[derive(Debug)]
pub struct Synthesis {
    /// Surviving test cases, ordered by [`TestCase::id`].
    pub cases: Vec<TestCase>,
    /// Whether the survivors were sampled down to the cap.
    pub truncated: bool,
    /// Total probes attempted.
    pub probed: usize,
    /// Probes that produced no observation.
    pub failures: usize,
}

#[derive(Debug, Error)]
pub enum LearnError {
    #[error("no probe produced a usable observation for `{instruction}`; last failure: {last}")]
    NoObservations { instruction: String, last: String },

    #[error("input carries {got} values but the instruction has {expected} dynamic operands")]
    ArityMismatch { got: usize, expected: usize },

    #[error("could not obtain the instruction's encoding: {0}")]
    Encode(#[source] ProbeError),

    #[error("failed to build the worker pool: {0}")]
    Pool(String),
}

/// Probe `instruction` across `inputs` and synthesize test cases.
pub fn learn(
    toolchain: &Toolchain,
    instruction: &Instruction,
    inputs: &[Input],
    options: &LearnOptions,
    rng: &mut impl Rng,
) -> Result<Synthesis, LearnError> {
    let dynamic = instruction.dynamic_operands();
    let arity = dynamic.len();
    for input in inputs {
        if input.values.len() != arity {
            return Err(LearnError::ArityMismatch {
                got: input.values.len(),
                expected: arity,
            });
        }
    }

    let encoding = toolchain
        .encode(&instruction.to_string())
        .map_err(LearnError::Encode)?;

    let workers = options.jobs.unwrap_or_else(default_workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| LearnError::Pool(e.to_string()))?;

    tracing::info!(
        instruction = %instruction,
        inputs = inputs.len(),
        workers,
        "probing"
    );

    let expected_len = output_len(arity);
    let observations: Vec<Result<Observation, ProbeError>> = pool.install(|| {
        inputs
            .par_iter()
            .map(|input| {
                let source = probe_program(instruction, input);
                toolchain
                    .run_probe(&source, expected_len)
                    .map(|buffer| decode_observation(&buffer, &dynamic, options.observed))
            })
            .collect()
    });

    synthesize(instruction, &encoding, inputs, observations, options, rng)
}

fn default_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores * 4
}

/// What one successful probe told us, before it becomes a [`TestCase`].
#[derive(Debug, Clone)]
struct Observation {
    flags_set: Flags,
    flags_not_set: Flags,
    values: Vec<u64>,
}

/// Decode a raw probe buffer: 8 bytes of RFLAGS, then one little-endian
/// 8-byte slot per dynamic operand, of which only the operand's width is
/// meaningful.
fn decode_observation(buffer: &[u8], dynamic: &[&Operand], observed: Flags) -> Observation {
    let rflags = u64::from_le_bytes(buffer[..8].try_into().expect("length checked by harness"));
    let flags_set = Flags::from_bits_truncate(rflags) & observed;
    let flags_not_set = observed - flags_set;

    let values = dynamic
        .iter()
        .enumerate()
        .map(|(slot, op)| {
            let size = usize::from(op.size().expect("dynamic operands are sized"));
            let offset = 8 + 8 * slot;
            let mut bytes = [0u8; 8];
            bytes[..size].copy_from_slice(&buffer[offset..offset + size]);
            u64::from_le_bytes(bytes)
        })
        .collect();

    Observation {
        flags_set,
        flags_not_set,
        values,
    }
}

/// Turn raw observations into the final ordered, deduplicated, capped set.
///
/// Processing order follows input order, which makes "first seen wins"
/// deterministic for a given input sequence.
fn synthesize(
    instruction: &Instruction,
    encoding: &[u8],
    inputs: &[Input],
    observations: Vec<Result<Observation, ProbeError>>,
    options: &LearnOptions,
    rng: &mut impl Rng,
) -> Result<Synthesis, LearnError> {
    let mut seen = std::collections::HashSet::new();
    let mut cases: Vec<TestCase> = Vec::new();
    let mut failures = 0usize;
    let mut last_failure: Option<ProbeError> = None;

    for (input, observation) in inputs.iter().zip(observations) {
        let observation = match observation {
            Ok(observation) => observation,
            Err(err) => {
                tracing::debug!(%err, "probe failed");
                failures += 1;
                last_failure = Some(err);
                continue;
            }
        };

        let case = TestCase {
            instruction: instruction.clone(),
            encoding: encoding.to_vec(),
            flags_set: observation.flags_set,
            flags_not_set: observation.flags_not_set,
            input: input.clone(),
            expected: observation.values,
        };
        // Renderability comes before dedup: a dropped case must not consume
        // its equivalence class, or a later renderable duplicate would be
        // discarded with it.
        if let Err(err) = case.check_renderable() {
            tracing::debug!(%err, "dropping unrenderable case");
            continue;
        }

        if !options.result_only {
            let key = (
                case.flags_set.bits(),
                case.flags_not_set.bits(),
                case.input.flags.bits(),
            );
            if !seen.insert(key) {
                continue;
            }
        }
        cases.push(case);
    }

    if cases.is_empty() {
        return Err(LearnError::NoObservations {
            instruction: instruction.to_string(),
            last: last_failure
                .map(|e| e.to_string())
                .unwrap_or_else(|| "every observation was filtered out".to_string()),
        });
    }

    cases.sort_by_cached_key(TestCase::id);

    let mut truncated = false;
    if cases.len() > options.cap {
        let mut keep = rand::seq::index::sample(rng, cases.len(), options.cap).into_vec();
        keep.sort_unstable();
        let mut keep = keep.into_iter().peekable();
        let mut idx = 0usize;
        cases.retain(|_| {
            let kept = keep.peek() == Some(&idx);
            if kept {
                keep.next();
            }
            idx += 1;
            kept
        });
        truncated = true;
    }

    Ok(Synthesis {
        cases,
        truncated,
        probed: inputs.len(),
        failures,
    })
}
