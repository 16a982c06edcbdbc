//! Native toolchain harness.
//!
//! Turns generated probe source into observations by driving the system
//! toolchain: `as` assembles, `gcc -nostdlib -static` links a freestanding
//! executable, and the executable's stdout is the raw observation buffer.
//!
//! Every probe runs in its own temporary directory and removes intermediate
//! artifacts as soon as they are consumed; under high parallelism the
//! scratch store (ideally RAM-backed `/dev/shm`) is tight, so cleanup must
//! happen on every exit path, including failures. A probe failure is an
//! ordinary [`ProbeError`] value, never a batch abort: input spaces are
//! generated redundantly enough that isolated losses are tolerated by
//! volume.

mod scratch;

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;

pub use scratch::scratch_root;

/// Marker word pair flanking the instruction when extracting its encoding.
/// Eight words on each side make a 16-byte pattern that cannot occur by
/// accident in a single instruction's encoding.
const MARKER: [u8; 16] = [
    0x20, 0x10, 0x40, 0x30, 0x20, 0x10, 0x40, 0x30, 0x20, 0x10, 0x40, 0x30, 0x20, 0x10, 0x40,
    0x30,
];

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A single probe's failure. Recovered locally: the probe contributes no
/// observation and the batch continues.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to invoke `{tool}`: {source}")]
    Spawn {
        tool: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("`{tool}` failed with {status}")]
    ToolFailed {
        tool: &'static str,
        status: ExitStatus,
    },

    #[error("probe process killed after exceeding {0:?}")]
    Timeout(Duration),

    #[error("probe wrote {got} output bytes, expected {expected}")]
    OutputLength { got: usize, expected: usize },

    #[error("assembled object does not contain the marker pattern")]
    MarkerNotFound,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Handle to the external assembler/linker/execution collaborators.
#[derive(Debug, Clone)]
pub struct Toolchain {
    scratch_root: PathBuf,
    timeout: Duration,
}

impl Toolchain {
    /// Pick a scratch root (RAM-backed when possible) and use the default
    /// probe timeout.
    pub fn detect() -> Self {
        Self {
            scratch_root: scratch::scratch_root(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_scratch_root(mut self, root: PathBuf) -> Self {
        self.scratch_root = root;
        self
    }

    /// Whether the required external tools are on PATH. Lets callers (and
    /// integration tests) skip instead of failing every probe.
    pub fn available() -> bool {
        ["as", "gcc"].iter().all(|tool| {
            Command::new(tool)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .is_ok()
        })
    }

    /// Assemble, link and run one probe program, returning its raw stdout
    /// buffer. `expected_len` is the output-buffer size for the probe's
    /// operand arity; anything else is a failed observation.
    pub fn run_probe(&self, source: &str, expected_len: usize) -> Result<Vec<u8>, ProbeError> {
        let dir = tempfile::Builder::new()
            .prefix("flaglearn-probe")
            .tempdir_in(&self.scratch_root)?;

        let asm = dir.path().join("probe.s");
        fs::write(&asm, source)?;

        let obj = dir.path().join("probe.o");
        run_tool(
            "as",
            Command::new("as")
                .arg("-moperand-check=error")
                .arg("-o")
                .arg(&obj)
                .arg(&asm),
        )?;
        // Free scratch space as soon as each stage's input is consumed.
        fs::remove_file(&asm)?;

        let exe = dir.path().join("probe");
        run_tool(
            "gcc",
            Command::new("gcc")
                .args(["-m64", "-nostdlib", "-static", "-o"])
                .arg(&exe)
                .arg(&obj),
        )?;
        fs::remove_file(&obj)?;

        let output = self.run_with_deadline(&exe)?;
        if output.len() != expected_len {
            return Err(ProbeError::OutputLength {
                got: output.len(),
                expected: expected_len,
            });
        }
        Ok(output)
    }

    /// Obtain an instruction's encoded bytes by assembling it between two
    /// recognizable marker blocks and scanning the object file for the
    /// payload region in between.
    pub fn encode(&self, instruction_text: &str) -> Result<Vec<u8>, ProbeError> {
        let marker_block = ".word 0x1020\n.word 0x3040\n".repeat(4);
        let source = format!(
            ".intel_syntax noprefix\nmain:\n{marker_block}{instruction_text}\n{marker_block}"
        );

        let dir = tempfile::Builder::new()
            .prefix("flaglearn-encode")
            .tempdir_in(&self.scratch_root)?;
        let asm = dir.path().join("encode.s");
        fs::write(&asm, source)?;
        let obj = dir.path().join("encode.o");
        run_tool(
            "as",
            Command::new("as").arg("-o").arg(&obj).arg(&asm),
        )?;

        let object = fs::read(&obj)?;
        payload_between_markers(&object).map(<[u8]>::to_vec)
    }

    /// Run the probe executable with a bounded wait.
    ///
    /// The child is polled rather than waited on so a wedged probe cannot
    /// pin a worker forever; on deadline it is killed and reaped.
    fn run_with_deadline(&self, exe: &Path) -> Result<Vec<u8>, ProbeError> {
        let mut child = Command::new(exe)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ProbeError::Spawn {
                tool: "probe",
                source,
            })?;

        let start = Instant::now();
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None if start.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProbeError::Timeout(self.timeout));
                }
                None => std::thread::sleep(Duration::from_millis(2)),
            }
        };

        let mut output = Vec::new();
        if let Some(mut stdout) = child.stdout.take() {
            stdout.read_to_end(&mut output)?;
        }
        if !status.success() {
            // Faulting instructions (e.g. divide by zero) land here.
            tracing::debug!(%status, "probe process did not exit cleanly");
            return Err(ProbeError::ToolFailed {
                tool: "probe",
                status,
            });
        }
        Ok(output)
    }
}

fn run_tool(tool: &'static str, cmd: &mut Command) -> Result<(), ProbeError> {
    let status = cmd
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| ProbeError::Spawn { tool, source })?;
    if status.success() {
        Ok(())
    } else {
        Err(ProbeError::ToolFailed { tool, status })
    }
}

/// Slice the bytes between the end of the first marker occurrence and the
/// start of the last.
fn payload_between_markers(object: &[u8]) -> Result<&[u8], ProbeError> {
    let first = object
        .windows(MARKER.len())
        .position(|w| w == MARKER)
        .ok_or(ProbeError::MarkerNotFound)?;
    let last = object
        .windows(MARKER.len())
        .rposition(|w| w == MARKER)
        .ok_or(ProbeError::MarkerNotFound)?;
    let start = first + MARKER.len();
    if last < start {
        return Err(ProbeError::MarkerNotFound);
    }
    Ok(&object[start..last])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_extraction_finds_bytes_between_markers() {
        let mut object = vec![0xaa; 7];
        object.extend_from_slice(&MARKER);
        object.extend_from_slice(&[0x48, 0x01, 0xd8]);
        object.extend_from_slice(&MARKER);
        object.extend_from_slice(&[0xbb; 5]);

        let payload = payload_between_markers(&object).unwrap();
        assert_eq!(payload, &[0x48, 0x01, 0xd8]);
    }

    #[test]
    fn payload_extraction_handles_empty_payload() {
        let mut object = Vec::new();
        object.extend_from_slice(&MARKER);
        object.extend_from_slice(&MARKER);
        assert_eq!(payload_between_markers(&object).unwrap(), &[] as &[u8]);
    }

    #[test]
    fn missing_marker_is_an_error() {
        assert!(matches!(
            payload_between_markers(&[0u8; 64]),
            Err(ProbeError::MarkerNotFound)
        ));
        // A single marker has no payload region.
        assert!(matches!(
            payload_between_markers(&MARKER),
            Err(ProbeError::MarkerNotFound)
        ));
    }
}
