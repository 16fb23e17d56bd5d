//! Content digests for drivers that do not get them from the build system
//!
//! The cache treats digests as opaque strings. Build systems usually hand
//! them over ready-made; these helpers produce Blake3 hex digests for
//! standalone use.

use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};

/// Compute the Blake3 hex digest of a file's content
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let content = std::fs::read(path)?;
    Ok(hash_bytes(&content))
}

pub fn hash_bytes(content: &[u8]) -> String {
    blake3::hash(content).to_hex().to_string()
}

/// Build a path -> digest map suitable for `update_cache`
pub fn compute_digests(paths: &[PathBuf]) -> std::io::Result<FxHashMap<String, String>> {
    paths
        .iter()
        .map(|path| Ok((path.to_string_lossy().into_owned(), hash_file(path)?)))
        .collect()
}
