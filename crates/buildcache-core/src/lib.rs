//! Incremental compilation cache for long-lived compiler workers
//!
//! Parsed source files are reused across builds as long as the digest the
//! build system reports for them is unchanged. Compiled programs are reused
//! per build target. Both tiers are evicted by halving, least recently used
//! first, once the process grows past a memory threshold.

pub mod config;
pub mod digest;
pub mod error;
pub mod file_cache;
pub mod fs;
pub mod loader;
pub mod memory;
pub mod program_cache;
pub mod store;
pub mod trace;

pub use config::{CacheConfig, LanguageVersion, DEFAULT_MAX_MEMORY_USAGE};
pub use error::{CacheError, Result};
pub use file_cache::{FileCache, SourceFileCache, SourceFileEntry};
pub use fs::{FileSystem, MockFileSystem, RealFileSystem};
pub use loader::{
    loader_for_config, CachedFileLoader, FileLoader, SourceParser, UncachedFileLoader,
};
pub use memory::{FixedUsage, MemoryProbe, ProcessMemoryProbe};
pub use program_cache::{Eviction, ProgramAndFileCache};
pub use store::{CacheStats, LruStore, PinSet};
pub use trace::{NullSink, RecordingSink, TraceEvent, TraceSink, TracingSink};
