//! Persisted state layout under the user cache directory
//!
//! Everything the runner stores between invocations lives under
//! `<cache>/codecatalyst-runner/`:
//! - `workflows/<sha256(workflow_path)>/` — caches, artifacts, sources
//! - `actions/<sha256(url)>/` — downloaded remote action sources
//! - `tmp/` — scratch directories, removed at executor close

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::error;

use crate::error::Result;

const STATE_DIR: &str = "codecatalyst-runner";

/// Hex-encoded SHA-256 of the input
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Root of all persisted state
pub fn state_root() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join(STATE_DIR)
}

/// Per-workflow state dir, keyed by the workflow file path
pub fn workflow_cache_dir(workflow_path: &Path) -> PathBuf {
    state_root()
        .join("workflows")
        .join(sha256_hex(&workflow_path.to_string_lossy()))
}

/// Cache dir for a downloaded remote action, keyed by its URL
pub fn action_cache_dir(url: &str) -> PathBuf {
    state_root().join("actions").join(sha256_hex(url))
}

/// Base directory for temp files and scratch directories.
///
/// Creating it lazily keeps first-run behaviour simple; failures fall
/// back to the system temp dir so executors can still stage files.
pub fn tmp_dir() -> PathBuf {
    let dir = state_root().join("tmp");
    if let Err(err) = std::fs::create_dir_all(&dir) {
        error!(?err, "failed to create tmp dir, falling back to system temp");
        return std::env::temp_dir();
    }
    dir
}

/// Create a fresh scratch directory under [`tmp_dir`]
pub fn new_scratch_dir(prefix: &str) -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir_in(tmp_dir())?
        .keep();
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_is_stable() {
        // echo -n "abc" | sha256sum
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn workflow_cache_dirs_differ_by_path() {
        let a = workflow_cache_dir(Path::new("/a/workflow.yaml"));
        let b = workflow_cache_dir(Path::new("/b/workflow.yaml"));
        assert_ne!(a, b);
        assert!(a.starts_with(state_root().join("workflows")));
    }

    #[test]
    fn scratch_dirs_are_unique() {
        let a = new_scratch_dir("mce").unwrap();
        let b = new_scratch_dir("mce").unwrap();
        assert_ne!(a, b);
        std::fs::remove_dir_all(&a).unwrap();
        std::fs::remove_dir_all(&b).unwrap();
    }
}
