use std::path::{Path, PathBuf};

/// Root directory for per-probe scratch space.
///
/// Prefers RAM-backed `/dev/shm` for throughput (probes are tiny and
/// short-lived, and thousands of them churn files); falls back to the
/// system temp dir when it is absent or not writable.
pub fn scratch_root() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if is_writable(shm) {
        return shm.to_path_buf();
    }
    let fallback = std::env::temp_dir();
    tracing::warn!(
        "/dev/shm is not writable, using {} (expect slower probing)",
        fallback.display()
    );
    fallback
}

fn is_writable(dir: &Path) -> bool {
    dir.is_dir() && tempfile::tempfile_in(dir).is_ok()
}
