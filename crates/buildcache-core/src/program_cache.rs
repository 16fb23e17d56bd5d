use std::sync::Arc;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::file_cache::{FileCache, SourceFileCache, SourceFileEntry};
use crate::memory::{MemoryProbe, ProcessMemoryProbe};
use crate::store::{CacheStats, LruStore};
use crate::trace::{TraceSink, TracingSink};

/// Which tier a memory-freeing pass took entries from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eviction {
    /// Not under pressure, or nothing could be dropped
    None,
    Programs(usize),
    Files(usize),
}

impl Eviction {
    pub fn count(self) -> usize {
        match self {
            Eviction::None => 0,
            Eviction::Programs(n) | Eviction::Files(n) => n,
        }
    }
}

/// Two-tier cache: compiled programs by build target, parsed files by path.
///
/// Programs are the cheaper tier to lose. Under memory pressure they are
/// evicted first, and files are only touched when no program could be
/// dropped. Programs carry no digest, so `update_cache` never invalidates
/// them; a stale program only leaves through eviction.
pub struct ProgramAndFileCache<S, P> {
    files: FileCache<S>,
    program_store: LruStore<Arc<P>>,
}

impl<S, P> ProgramAndFileCache<S, P> {
    pub fn new(probe: Arc<dyn MemoryProbe>, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            files: FileCache::new(probe, Arc::clone(&sink)),
            program_store: LruStore::new("program", sink),
        }
    }

    pub fn with_config(
        config: &CacheConfig,
        probe: Arc<dyn MemoryProbe>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            files: FileCache::with_config(config, probe, Arc::clone(&sink)),
            program_store: LruStore::new("program", sink),
        }
    }

    pub fn get_program(&mut self, target: &str) -> Option<Arc<P>> {
        self.program_store.get(target, true).cloned()
    }

    pub fn put_program(&mut self, target: &str, program: Arc<P>) {
        self.maybe_free_memory();
        self.program_store.set(target, program);
    }

    /// Free memory if needed, programs first; returns the number of entries
    /// dropped from whichever tier was evicted
    pub fn maybe_free_memory(&mut self) -> usize {
        self.free_memory().count()
    }

    /// Run one memory-freeing pass and report which tier lost entries.
    ///
    /// Programs are never pinned. If evicting them frees anything the pass
    /// stops there; otherwise it falls back to the file tier, including its
    /// pinning and fixed-point guard.
    pub fn free_memory(&mut self) -> Eviction {
        if !self.files.should_free_memory() {
            return Eviction::None;
        }

        let dropped = self.program_store.evict(None);
        if dropped > 0 {
            debug!("evicted {} program cache entries", dropped);
            return Eviction::Programs(dropped);
        }

        match self.files.maybe_free_memory() {
            0 => Eviction::None,
            n => Eviction::Files(n),
        }
    }

    pub fn should_free_memory(&self) -> bool {
        self.files.should_free_memory()
    }

    pub fn set_max_cache_size(&mut self, bytes: i64) -> Result<()> {
        self.files.set_threshold(bytes)?;
        self.maybe_free_memory();
        Ok(())
    }

    pub fn reset_max_cache_size(&mut self) {
        self.files.reset_threshold();
        self.maybe_free_memory();
    }

    pub fn max_cache_size(&self) -> u64 {
        self.files.max_cache_size()
    }

    pub fn update_cache<I>(&mut self, digests: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.files.update_cache(digests);
    }

    pub fn get_last_digest(&self, path: &str) -> Result<&str> {
        self.files.get_last_digest(path)
    }

    pub fn get_cache(&mut self, path: &str) -> Option<Arc<S>> {
        self.files.get_cache(path)
    }

    /// Store a parsed file, freeing memory through both tiers first
    pub fn put_cache(&mut self, path: &str, entry: SourceFileEntry<S>) {
        self.maybe_free_memory();
        self.files.insert_entry(path, entry);
    }

    pub fn is_known_input(&self, path: &str) -> bool {
        self.files.is_known_input(path)
    }

    pub fn in_cache(&self, path: &str) -> bool {
        self.files.in_cache(path)
    }

    pub fn in_program_cache(&self, target: &str) -> bool {
        self.program_store.contains_key(target)
    }

    /// The file tier, read-only
    pub fn files(&self) -> &FileCache<S> {
        &self.files
    }

    pub fn program_count(&self) -> usize {
        self.program_store.len()
    }

    /// Targets from least to most recently used
    pub fn cached_targets(&self) -> impl Iterator<Item = &str> {
        self.program_store.keys()
    }

    pub fn program_stats(&self) -> CacheStats {
        self.program_store.stats()
    }

    pub fn reset_stats(&mut self) {
        self.files.reset_stats();
        self.program_store.reset_stats();
    }

    pub fn print_stats(&self) {
        self.files.print_stats();
        self.program_store.print_stats();
    }

    pub fn trace_stats(&self) {
        self.files.trace_stats();
        self.program_store.trace_stats();
    }
}

impl<S, P> Default for ProgramAndFileCache<S, P> {
    fn default() -> Self {
        Self::new(Arc::new(ProcessMemoryProbe::new()), Arc::new(TracingSink))
    }
}

impl<S, P> SourceFileCache for ProgramAndFileCache<S, P> {
    type Source = S;

    fn is_known_input(&self, path: &str) -> bool {
        self.files.is_known_input(path)
    }

    fn get_cache(&mut self, path: &str) -> Option<Arc<S>> {
        self.files.get_cache(path)
    }

    fn get_last_digest(&self, path: &str) -> Result<&str> {
        self.files.get_last_digest(path)
    }

    fn put_cache(&mut self, path: &str, entry: SourceFileEntry<S>) {
        ProgramAndFileCache::put_cache(self, path, entry)
    }

    fn heap_used(&self) -> u64 {
        self.files.heap_used()
    }
}

impl<S, P> std::fmt::Debug for ProgramAndFileCache<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramAndFileCache")
            .field("files", &self.files)
            .field("program_store", &self.program_store)
            .finish()
    }
}
