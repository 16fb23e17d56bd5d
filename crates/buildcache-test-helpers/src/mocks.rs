//! Mock implementations for testing

use buildcache_core::{LanguageVersion, MemoryProbe, SourceParser};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Memory reading well above the default threshold
pub const HIGH_USAGE: u64 = 4 << 30;

/// Memory probe whose reading the test controls
#[derive(Debug, Clone, Default)]
pub struct PressureSwitch {
    usage: Arc<AtomicU64>,
}

impl PressureSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `HIGH_USAGE` until released
    pub fn press(&self) {
        self.set(HIGH_USAGE);
    }

    pub fn release(&self) {
        self.set(0);
    }

    pub fn set(&self, bytes: u64) {
        self.usage.store(bytes, Ordering::Relaxed);
    }

    /// A probe sharing this switch, ready to hand to a cache
    pub fn probe(&self) -> Arc<dyn MemoryProbe> {
        Arc::new(self.clone())
    }
}

impl MemoryProbe for PressureSwitch {
    fn heap_used(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }
}

/// Stand-in for a parsed source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFile {
    pub file_name: String,
    pub text: String,
    pub version: LanguageVersion,
}

/// Parser that counts how often it runs
#[derive(Debug, Clone, Default)]
pub struct CountingParser {
    calls: Arc<AtomicUsize>,
}

impl CountingParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl SourceParser for CountingParser {
    type Output = ParsedFile;

    fn parse(&self, file_name: &str, text: &str, version: LanguageVersion) -> ParsedFile {
        self.calls.fetch_add(1, Ordering::Relaxed);
        ParsedFile {
            file_name: file_name.to_string(),
            text: text.to_string(),
            version,
        }
    }
}

/// Stand-in for a compiled program: the files it was built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub target: String,
    pub roots: Vec<String>,
}

impl CompiledProgram {
    pub fn new(target: &str, roots: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            target: target.to_string(),
            roots: roots.iter().map(|r| r.to_string()).collect(),
        })
    }
}
