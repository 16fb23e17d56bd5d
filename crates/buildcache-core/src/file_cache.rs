use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::{CacheConfig, DEFAULT_MAX_MEMORY_USAGE};
use crate::error::{CacheError, Result};
use crate::memory::{MemoryProbe, ProcessMemoryProbe};
use crate::store::{CacheStats, LruStore};
use crate::trace::{TraceSink, TracingSink};

/// A parsed file together with the digest of the input it was parsed from
#[derive(Debug)]
pub struct SourceFileEntry<S> {
    pub digest: String,
    pub value: Arc<S>,
}

impl<S> SourceFileEntry<S> {
    pub fn new(digest: impl Into<String>, value: Arc<S>) -> Self {
        Self {
            digest: digest.into(),
            value,
        }
    }
}

/// The operations a cached loader needs from a file-level cache
pub trait SourceFileCache {
    type Source;

    /// Whether `path` is declared as an input of the current build
    fn is_known_input(&self, path: &str) -> bool;

    fn get_cache(&mut self, path: &str) -> Option<Arc<Self::Source>>;

    fn get_last_digest(&self, path: &str) -> Result<&str>;

    /// Store an entry, freeing memory first if the process is under pressure
    fn put_cache(&mut self, path: &str, entry: SourceFileEntry<Self::Source>);

    /// Process memory usage in bytes, as seen by the cache
    fn heap_used(&self) -> u64;
}

impl<T: SourceFileCache + ?Sized> SourceFileCache for &mut T {
    type Source = T::Source;

    fn is_known_input(&self, path: &str) -> bool {
        (**self).is_known_input(path)
    }

    fn get_cache(&mut self, path: &str) -> Option<Arc<Self::Source>> {
        (**self).get_cache(path)
    }

    fn get_last_digest(&self, path: &str) -> Result<&str> {
        (**self).get_last_digest(path)
    }

    fn put_cache(&mut self, path: &str, entry: SourceFileEntry<Self::Source>) {
        (**self).put_cache(path, entry)
    }

    fn heap_used(&self) -> u64 {
        (**self).heap_used()
    }
}

/// Cache of parsed source files, valid while their digests are unchanged
///
/// One instance lives for the whole worker process. Every build calls
/// [`FileCache::update_cache`] with the digests of its inputs before loading
/// anything; entries whose digest changed are dropped at that point. Inputs
/// of the current build are pinned and never evicted.
pub struct FileCache<S> {
    file_store: LruStore<SourceFileEntry<S>>,

    /// Digests of the current build's inputs; also the eviction pin set
    last_digests: FxHashMap<String, String>,

    /// Set once an eviction pass frees nothing; cleared by `update_cache`
    cannot_evict: bool,

    max_memory_usage: u64,

    probe: Arc<dyn MemoryProbe>,
}

impl<S> FileCache<S> {
    pub fn new(probe: Arc<dyn MemoryProbe>, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            file_store: LruStore::new("file", sink),
            last_digests: FxHashMap::default(),
            cannot_evict: false,
            max_memory_usage: DEFAULT_MAX_MEMORY_USAGE,
            probe,
        }
    }

    /// Create a cache whose threshold comes from `config`
    pub fn with_config(
        config: &CacheConfig,
        probe: Arc<dyn MemoryProbe>,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        let mut cache = Self::new(probe, sink);
        cache.max_memory_usage = config.max_memory_usage();
        cache
    }

    /// Change the memory threshold and free memory if already above it
    pub fn set_max_cache_size(&mut self, bytes: i64) -> Result<()> {
        self.set_threshold(bytes)?;
        self.maybe_free_memory();
        Ok(())
    }

    /// Restore the 1 GiB default threshold
    pub fn reset_max_cache_size(&mut self) {
        self.reset_threshold();
        self.maybe_free_memory();
    }

    pub fn max_cache_size(&self) -> u64 {
        self.max_memory_usage
    }

    pub(crate) fn set_threshold(&mut self, bytes: i64) -> Result<()> {
        if bytes < 0 {
            return Err(CacheError::InvalidArgument {
                name: "max_cache_size",
                value: bytes,
            });
        }
        self.max_memory_usage = bytes as u64;
        Ok(())
    }

    pub(crate) fn reset_threshold(&mut self) {
        self.max_memory_usage = DEFAULT_MAX_MEMORY_USAGE;
    }

    /// Install the digests of the next build's inputs.
    ///
    /// Replaces the previous set wholesale, re-enables eviction and drops
    /// any cached file whose digest no longer matches.
    pub fn update_cache<I>(&mut self, digests: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.last_digests = digests.into_iter().collect();
        self.cannot_evict = false;
        debug!("updating digests for {} inputs", self.last_digests.len());

        for (path, new_digest) in &self.last_digests {
            let stale = match self.file_store.get(path, false) {
                Some(entry) if entry.digest != *new_digest => entry.digest.clone(),
                _ => continue,
            };
            debug!(
                "dropping file cache entry for {} (digest {} -> {})",
                path, stale, new_digest
            );
            self.file_store.delete(path);
        }
    }

    /// Digest registered for `path` by the last `update_cache`
    pub fn get_last_digest(&self, path: &str) -> Result<&str> {
        match self.last_digests.get(path) {
            Some(digest) => Ok(digest.as_str()),
            None => {
                let mut known: Vec<String> = self.last_digests.keys().cloned().collect();
                known.sort();
                Err(CacheError::MissingDigest {
                    path: path.to_string(),
                    known,
                })
            }
        }
    }

    pub fn get_cache(&mut self, path: &str) -> Option<Arc<S>> {
        self.file_store
            .get(path, true)
            .map(|entry| Arc::clone(&entry.value))
    }

    pub fn put_cache(&mut self, path: &str, entry: SourceFileEntry<S>) {
        self.maybe_free_memory();
        self.insert_entry(path, entry);
    }

    pub(crate) fn insert_entry(&mut self, path: &str, entry: SourceFileEntry<S>) {
        self.file_store.set(path, entry);
    }

    pub fn is_known_input(&self, path: &str) -> bool {
        self.last_digests.contains_key(path)
    }

    /// Whether a parsed file is cached for `path`; touches neither stats nor
    /// recency
    pub fn in_cache(&self, path: &str) -> bool {
        self.file_store.peek(path).is_some()
    }

    /// Evict half of the unpinned files if the process is over its threshold.
    ///
    /// Returns the number of files dropped. A pass that drops nothing
    /// disables further passes until the next `update_cache`.
    pub fn maybe_free_memory(&mut self) -> usize {
        if !self.should_free_memory() || self.cannot_evict {
            return 0;
        }

        let dropped = self.file_store.evict(Some(&self.last_digests));
        if dropped == 0 {
            debug!(
                "all {} cached files are pinned, eviction disabled until next update",
                self.file_store.len()
            );
            self.cannot_evict = true;
        } else {
            debug!("evicted {} file cache entries", dropped);
        }
        dropped
    }

    pub fn should_free_memory(&self) -> bool {
        self.probe.heap_used() > self.max_memory_usage
    }

    /// Current reading of the injected memory probe
    pub fn heap_used(&self) -> u64 {
        self.probe.heap_used()
    }

    pub fn cannot_evict(&self) -> bool {
        self.cannot_evict
    }

    pub fn len(&self) -> usize {
        self.file_store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.file_store.is_empty()
    }

    /// Cached paths from least to most recently used
    pub fn cached_paths(&self) -> impl Iterator<Item = &str> {
        self.file_store.keys()
    }

    pub fn stats(&self) -> CacheStats {
        self.file_store.stats()
    }

    /// Number of eviction passes that scanned the file store
    pub fn eviction_passes(&self) -> u64 {
        self.file_store.eviction_passes()
    }

    pub fn reset_stats(&mut self) {
        self.file_store.reset_stats();
    }

    pub fn print_stats(&self) {
        self.file_store.print_stats();
    }

    pub fn trace_stats(&self) {
        self.file_store.trace_stats();
    }
}

impl<S> Default for FileCache<S> {
    /// Process memory readings, traces through `tracing`
    fn default() -> Self {
        Self::new(Arc::new(ProcessMemoryProbe::new()), Arc::new(TracingSink))
    }
}

impl<S> SourceFileCache for FileCache<S> {
    type Source = S;

    fn is_known_input(&self, path: &str) -> bool {
        FileCache::is_known_input(self, path)
    }

    fn get_cache(&mut self, path: &str) -> Option<Arc<S>> {
        FileCache::get_cache(self, path)
    }

    fn get_last_digest(&self, path: &str) -> Result<&str> {
        FileCache::get_last_digest(self, path)
    }

    fn put_cache(&mut self, path: &str, entry: SourceFileEntry<S>) {
        FileCache::put_cache(self, path, entry)
    }

    fn heap_used(&self) -> u64 {
        FileCache::heap_used(self)
    }
}

impl<S> std::fmt::Debug for FileCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache")
            .field("file_store", &self.file_store)
            .field("inputs", &self.last_digests.len())
            .field("cannot_evict", &self.cannot_evict)
            .field("max_memory_usage", &self.max_memory_usage)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FixedUsage;
    use crate::trace::{NullSink, RecordingSink};
    use std::sync::atomic::{AtomicU64, Ordering};

    const GIB: u64 = 1 << 30;

    fn digests(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(p, d)| (p.to_string(), d.to_string()))
            .collect()
    }

    fn cache_with_usage(usage: u64) -> FileCache<String> {
        FileCache::new(Arc::new(FixedUsage(usage)), Arc::new(NullSink))
    }

    fn switchable_cache(sink: Arc<dyn TraceSink>) -> (Arc<AtomicU64>, FileCache<String>) {
        let usage = Arc::new(AtomicU64::new(0));
        let reading = usage.clone();
        let cache = FileCache::new(Arc::new(move || reading.load(Ordering::Relaxed)), sink);
        (usage, cache)
    }

    fn put(cache: &mut FileCache<String>, path: &str, digest: &str) -> Arc<String> {
        let value = Arc::new(format!("parsed {}", path));
        cache.put_cache(path, SourceFileEntry::new(digest, value.clone()));
        value
    }

    #[test]
    fn test_get_cache_returns_same_handle() {
        let mut cache = cache_with_usage(0);
        cache.update_cache(digests(&[("/a.ts", "d1")]));
        let value = put(&mut cache, "/a.ts", "d1");

        let hit = cache.get_cache("/a.ts").unwrap();
        assert!(Arc::ptr_eq(&hit, &value));
        assert!(cache.get_cache("/b.ts").is_none());
    }

    #[test]
    fn test_update_cache_same_digest_keeps_entry() {
        let mut cache = cache_with_usage(0);
        cache.update_cache(digests(&[("/a.ts", "d1")]));
        put(&mut cache, "/a.ts", "d1");

        cache.update_cache(digests(&[("/a.ts", "d1")]));
        assert!(cache.in_cache("/a.ts"));
    }

    #[test]
    fn test_update_cache_changed_digest_drops_entry() {
        let mut cache = cache_with_usage(0);
        cache.update_cache(digests(&[("/a.ts", "d1"), ("/b.ts", "d2")]));
        put(&mut cache, "/a.ts", "d1");
        put(&mut cache, "/b.ts", "d2");

        cache.update_cache(digests(&[("/a.ts", "d9"), ("/b.ts", "d2")]));
        assert!(cache.get_cache("/a.ts").is_none());
        assert!(cache.get_cache("/b.ts").is_some());
    }

    #[test]
    fn test_update_cache_keeps_entries_for_undeclared_paths() {
        let mut cache = cache_with_usage(0);
        cache.update_cache(digests(&[("/a.ts", "d1")]));
        put(&mut cache, "/a.ts", "d1");

        cache.update_cache(digests(&[("/b.ts", "d2")]));
        assert!(cache.in_cache("/a.ts"));
        assert!(!cache.is_known_input("/a.ts"));
    }

    #[test]
    fn test_get_last_digest() {
        let mut cache = cache_with_usage(0);
        cache.update_cache(digests(&[("/b.ts", "d2"), ("/a.ts", "d1")]));

        assert_eq!(cache.get_last_digest("/a.ts").unwrap(), "d1");
        match cache.get_last_digest("/c.ts") {
            Err(CacheError::MissingDigest { path, known }) => {
                assert_eq!(path, "/c.ts");
                assert_eq!(known, vec!["/a.ts".to_string(), "/b.ts".to_string()]);
            }
            other => panic!("expected MissingDigest, got {:?}", other),
        }
    }

    #[test]
    fn test_is_known_input_and_in_cache() {
        let mut cache = cache_with_usage(0);
        cache.update_cache(digests(&[("/a.ts", "d1")]));

        assert!(cache.is_known_input("/a.ts"));
        assert!(!cache.is_known_input("/b.ts"));
        assert!(!cache.in_cache("/a.ts"));

        put(&mut cache, "/a.ts", "d1");
        let reads = cache.stats().reads;
        assert!(cache.in_cache("/a.ts"));
        assert_eq!(cache.stats().reads, reads);
    }

    #[test]
    fn test_negative_max_cache_size_is_rejected() {
        let mut cache = cache_with_usage(0);
        cache.set_max_cache_size(512).unwrap();

        let err = cache.set_max_cache_size(-1).unwrap_err();
        assert!(matches!(
            err,
            CacheError::InvalidArgument { value: -1, .. }
        ));
        assert_eq!(cache.max_cache_size(), 512);

        cache.reset_max_cache_size();
        assert_eq!(cache.max_cache_size(), DEFAULT_MAX_MEMORY_USAGE);
    }

    #[test]
    fn test_reset_max_cache_size_frees_memory() {
        let (usage, mut cache) = switchable_cache(Arc::new(NullSink));
        cache.update_cache(Vec::new());
        cache.set_max_cache_size(i64::MAX).unwrap();
        for i in 0..4 {
            put(&mut cache, &format!("/f{}.ts", i), "d");
        }

        usage.store(2 * GIB, Ordering::Relaxed);
        assert_eq!(cache.len(), 4);

        cache.reset_max_cache_size();
        assert_eq!(cache.max_cache_size(), DEFAULT_MAX_MEMORY_USAGE);
        assert_eq!(cache.len(), 2);
        let paths: Vec<&str> = cache.cached_paths().collect();
        assert_eq!(paths, vec!["/f2.ts", "/f3.ts"]);
    }

    #[test]
    fn test_no_eviction_below_threshold() {
        let mut cache = cache_with_usage(GIB / 2);
        cache.update_cache(Vec::new());
        for i in 0..8 {
            put(&mut cache, &format!("/f{}.ts", i), "d");
        }

        assert!(!cache.should_free_memory());
        assert_eq!(cache.maybe_free_memory(), 0);
        assert_eq!(cache.len(), 8);
    }

    #[test]
    fn test_put_cache_evicts_before_insert_under_pressure() {
        let (usage, mut cache) = switchable_cache(Arc::new(NullSink));
        cache.update_cache(Vec::new());
        for i in 0..4 {
            put(&mut cache, &format!("/f{}.ts", i), "d");
        }

        usage.store(2 * GIB, Ordering::Relaxed);
        put(&mut cache, "/f4.ts", "d");

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.stats().evictions, 2);
        let paths: Vec<&str> = cache.cached_paths().collect();
        assert_eq!(paths, vec!["/f2.ts", "/f3.ts", "/f4.ts"]);
    }

    #[test]
    fn test_pinned_inputs_survive_eviction() {
        let mut cache = cache_with_usage(1);
        cache.update_cache(digests(&[("/a.ts", "d1")]));
        put(&mut cache, "/a.ts", "d1");
        put(&mut cache, "/b.ts", "x");
        put(&mut cache, "/c.ts", "x");
        put(&mut cache, "/d.ts", "x");

        cache.set_max_cache_size(0).unwrap();

        assert!(cache.in_cache("/a.ts"));
        assert!(!cache.in_cache("/b.ts"));
        assert!(!cache.in_cache("/c.ts"));
        assert!(cache.in_cache("/d.ts"));
    }

    #[test]
    fn test_fixed_point_guard_stops_rescanning() {
        let sink = Arc::new(RecordingSink::new());
        let (usage, mut cache) = switchable_cache(sink.clone());
        cache.update_cache(digests(&[("/a.ts", "d1"), ("/b.ts", "d2")]));
        put(&mut cache, "/a.ts", "d1");
        put(&mut cache, "/b.ts", "d2");

        usage.store(2 * GIB, Ordering::Relaxed);
        assert_eq!(cache.maybe_free_memory(), 0);
        assert!(cache.cannot_evict());
        let passes = cache.eviction_passes();
        assert_eq!(passes, 1);
        let traced = sink.counter_count("file cache evictions");

        for _ in 0..5 {
            assert_eq!(cache.maybe_free_memory(), 0);
        }
        assert_eq!(cache.eviction_passes(), passes);
        assert_eq!(sink.counter_count("file cache evictions"), traced);

        cache.update_cache(digests(&[("/a.ts", "d1")]));
        assert!(!cache.cannot_evict());
        assert_eq!(cache.maybe_free_memory(), 1);
        assert!(!cache.in_cache("/b.ts"));
    }

    #[test]
    fn test_reset_stats_keeps_entries() {
        let mut cache = cache_with_usage(0);
        cache.update_cache(digests(&[("/a.ts", "d1")]));
        put(&mut cache, "/a.ts", "d1");
        cache.get_cache("/a.ts");
        cache.get_cache("/missing.ts");

        let stats = cache.stats();
        assert!(stats.hits <= stats.reads);

        cache.reset_stats();
        assert_eq!(cache.stats(), CacheStats::default());
        assert!(cache.get_cache("/a.ts").is_some());
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_with_config_threshold() {
        let config = CacheConfig {
            max_cache_size_mb: 16,
            ..CacheConfig::default()
        };
        let cache: FileCache<String> =
            FileCache::with_config(&config, Arc::new(FixedUsage(0)), Arc::new(NullSink));
        assert_eq!(cache.max_cache_size(), 16 << 20);
    }
}
