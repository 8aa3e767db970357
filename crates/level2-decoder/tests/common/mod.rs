//! Common helpers for level2-decoder tests.

use std::path::PathBuf;

/// Write chunk bytes into `dir` under a bucket-style local name.
#[allow(dead_code)]
pub fn write_chunk(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
