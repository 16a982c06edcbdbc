//! Probe construction: which inputs to try and what program to run them in.
//!
//! Given a parsed [`flaglearn_x86::Instruction`], this crate builds the
//! combinatorial input space (boundary values, exhaustive small ranges,
//! random samples, precondition-flag permutations) and, for each concrete
//! [`Input`], the text of a minimal freestanding assembly program that
//! executes the instruction once and reports the resulting flag state and
//! operand values on stdout.

mod flags;
mod inputs;
mod program;

pub use flags::{Flags, UnknownFlag};
pub use inputs::{boundary_catalog, permute_with_flags, value_sets, Input, InputSpaceError, RANDOM_SAMPLES};
pub use program::{jump_program, output_len, probe_program, JUMP_OUTPUT_LEN};
