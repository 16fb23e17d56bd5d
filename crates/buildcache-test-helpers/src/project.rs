//! On-disk projects for loader tests

use buildcache_core::digest::compute_digests;
use std::path::PathBuf;
use tempfile::TempDir;

/// A temporary directory of source files
pub struct TestProject {
    dir: TempDir,
    files: Vec<PathBuf>,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            files: Vec::new(),
        }
    }

    /// Write (or overwrite) `name` and return its path as a cache key
    pub fn write(&mut self, name: &str, content: &str) -> String {
        let path = self.dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write source file");
        if !self.files.contains(&path) {
            self.files.push(path.clone());
        }
        path.to_string_lossy().into_owned()
    }

    pub fn remove(&mut self, name: &str) {
        let path = self.dir.path().join(name);
        std::fs::remove_file(&path).expect("Failed to remove source file");
        self.files.retain(|p| p != &path);
    }

    /// Content digests of every file currently in the project
    pub fn digests(&self) -> Vec<(String, String)> {
        compute_digests(&self.files)
            .expect("Failed to hash project files")
            .into_iter()
            .collect()
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}
