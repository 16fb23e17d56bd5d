use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CacheError, Result};

/// Default memory threshold before eviction starts: 1 GiB
pub const DEFAULT_MAX_MEMORY_USAGE: u64 = 1024 * (1 << 20);

/// Language level requested from the parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LanguageVersion {
    #[serde(rename = "ES3")]
    Es3,
    #[serde(rename = "ES5")]
    Es5,
    #[serde(rename = "ES2015")]
    Es2015,
    #[serde(rename = "ES2017")]
    Es2017,
    #[serde(rename = "ES2020")]
    Es2020,
    #[serde(rename = "ESNext")]
    EsNext,
}

impl Default for LanguageVersion {
    fn default() -> Self {
        LanguageVersion::Es2015
    }
}

/// Settings for a cache session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Process memory threshold in MiB (default: 1024)
    #[serde(default = "default_max_cache_size_mb")]
    pub max_cache_size_mb: u64,

    /// Reuse parsed files across builds (default: true)
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Language level handed to the parser (default: ES2015)
    #[serde(default)]
    pub target: LanguageVersion,
}

fn default_true() -> bool {
    true
}

fn default_max_cache_size_mb() -> u64 {
    DEFAULT_MAX_MEMORY_USAGE >> 20
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size_mb: default_max_cache_size_mb(),
            enable_cache: true,
            target: LanguageVersion::default(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Memory threshold in bytes
    pub fn max_memory_usage(&self) -> u64 {
        self.max_cache_size_mb.saturating_mul(1 << 20)
    }
}
