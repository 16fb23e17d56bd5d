//! Source file loading strategies
//!
//! A [`FileLoader`] turns a path into a parsed source file. The cached
//! strategy consults a [`SourceFileCache`] first and only reads and parses on
//! a miss; the uncached strategy always goes to the file system. For the same
//! file contents both return the same parse result.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::config::{CacheConfig, LanguageVersion};
use crate::error::Result;
use crate::file_cache::{SourceFileCache, SourceFileEntry};
use crate::fs::FileSystem;
use crate::trace::TraceSink;

/// Counter carrying the cumulative read+parse time of cache misses
pub const FILE_LOAD_TIME_COUNTER: &str = "file load time";

/// Parser front-end the loaders hand file contents to
pub trait SourceParser {
    type Output;

    fn parse(&self, file_name: &str, text: &str, version: LanguageVersion) -> Self::Output;
}

impl<F, T> SourceParser for F
where
    F: Fn(&str, &str, LanguageVersion) -> T,
{
    type Output = T;

    fn parse(&self, file_name: &str, text: &str, version: LanguageVersion) -> T {
        self(file_name, text, version)
    }
}

/// Loads parsed source files for the compiler
pub trait FileLoader {
    type Output;

    fn file_exists(&self, path: &str) -> bool;

    /// Parse the file at `path`; `file_name` is the name the parser reports
    fn load_file(
        &mut self,
        file_name: &str,
        path: &str,
        version: LanguageVersion,
    ) -> Result<Arc<Self::Output>>;
}

/// Loader backed by a digest-checked file cache.
///
/// Existence means "declared as an input of this build", not "present on
/// disk". Hits do no I/O at all.
pub struct CachedFileLoader<C, P> {
    cache: C,
    fs: Arc<dyn FileSystem>,
    parser: P,
    sink: Arc<dyn TraceSink>,
    total_read_time: Duration,
}

impl<C, P> CachedFileLoader<C, P>
where
    C: SourceFileCache,
    P: SourceParser<Output = C::Source>,
{
    pub fn new(cache: C, fs: Arc<dyn FileSystem>, parser: P, sink: Arc<dyn TraceSink>) -> Self {
        Self {
            cache,
            fs,
            parser,
            sink,
            total_read_time: Duration::ZERO,
        }
    }

    /// Time spent reading and parsing cache misses so far
    pub fn total_read_time(&self) -> Duration {
        self.total_read_time
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn into_cache(self) -> C {
        self.cache
    }
}

impl<C, P> FileLoader for CachedFileLoader<C, P>
where
    C: SourceFileCache,
    P: SourceParser<Output = C::Source>,
{
    type Output = C::Source;

    fn file_exists(&self, path: &str) -> bool {
        self.cache.is_known_input(path)
    }

    fn load_file(
        &mut self,
        file_name: &str,
        path: &str,
        version: LanguageVersion,
    ) -> Result<Arc<C::Source>> {
        if let Some(hit) = self.cache.get_cache(path) {
            return Ok(hit);
        }

        let read_start = Instant::now();
        let text = self.fs.read_file(Path::new(path))?;
        let parsed = Arc::new(self.parser.parse(file_name, &text, version));
        let entry = SourceFileEntry::new(self.cache.get_last_digest(path)?, Arc::clone(&parsed));
        let elapsed = read_start.elapsed();

        self.cache.put_cache(path, entry);
        self.total_read_time += elapsed;
        trace!("loaded {} in {:?}", path, elapsed);

        self.sink.counter(
            FILE_LOAD_TIME_COUNTER,
            &[("read", self.total_read_time.as_secs_f64() * 1000.0)],
        );
        self.sink.snapshot_memory_usage(self.cache.heap_used());

        Ok(parsed)
    }
}

/// Loader that reads and parses on every call
pub struct UncachedFileLoader<P> {
    fs: Arc<dyn FileSystem>,
    parser: P,
}

impl<P: SourceParser> UncachedFileLoader<P> {
    pub fn new(fs: Arc<dyn FileSystem>, parser: P) -> Self {
        Self { fs, parser }
    }
}

impl<P: SourceParser> FileLoader for UncachedFileLoader<P> {
    type Output = P::Output;

    fn file_exists(&self, path: &str) -> bool {
        self.fs.exists(Path::new(path))
    }

    fn load_file(
        &mut self,
        file_name: &str,
        path: &str,
        version: LanguageVersion,
    ) -> Result<Arc<P::Output>> {
        let text = self.fs.read_file(Path::new(path))?;
        Ok(Arc::new(self.parser.parse(file_name, &text, version)))
    }
}

/// Pick the loading strategy `config` asks for
pub fn loader_for_config<'a, C, P>(
    config: &CacheConfig,
    cache: C,
    fs: Arc<dyn FileSystem>,
    parser: P,
    sink: Arc<dyn TraceSink>,
) -> Box<dyn FileLoader<Output = C::Source> + 'a>
where
    C: SourceFileCache + 'a,
    P: SourceParser<Output = C::Source> + 'a,
{
    if config.enable_cache {
        Box::new(CachedFileLoader::new(cache, fs, parser, sink))
    } else {
        Box::new(UncachedFileLoader::new(fs, parser))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::file_cache::FileCache;
    use crate::fs::MockFileSystem;
    use crate::memory::FixedUsage;
    use crate::trace::{NullSink, RecordingSink};

    #[derive(Debug, PartialEq)]
    struct Parsed {
        name: String,
        text: String,
        version: LanguageVersion,
    }

    fn parse(name: &str, text: &str, version: LanguageVersion) -> Parsed {
        Parsed {
            name: name.to_string(),
            text: text.to_string(),
            version,
        }
    }

    fn mock_fs() -> Arc<MockFileSystem> {
        let mut fs = MockFileSystem::new();
        fs.add_file("/src/a.ts", "export const a = 1;");
        fs.add_file("/src/b.ts", "export const b = 2;");
        Arc::new(fs)
    }

    fn file_cache() -> FileCache<Parsed> {
        let mut cache = FileCache::new(Arc::new(FixedUsage(0)), Arc::new(NullSink));
        cache.update_cache(vec![
            ("/src/a.ts".to_string(), "d1".to_string()),
            ("/src/b.ts".to_string(), "d2".to_string()),
        ]);
        cache
    }

    #[test]
    fn test_cached_loader_hit_skips_io() {
        let fs = mock_fs();
        let mut cache = file_cache();
        let mut loader = CachedFileLoader::new(&mut cache, fs.clone(), parse, Arc::new(NullSink));

        let first = loader.load_file("a.ts", "/src/a.ts", LanguageVersion::Es2015).unwrap();
        let second = loader.load_file("a.ts", "/src/a.ts", LanguageVersion::Es2015).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fs.read_count(), 1);
        assert_eq!(first.text, "export const a = 1;");
        assert_eq!(first.name, "a.ts");
        assert_eq!(first.version, LanguageVersion::Es2015);
        drop(loader);
        assert_eq!(cache.get_last_digest("/src/a.ts").unwrap(), "d1");
        assert!(cache.in_cache("/src/a.ts"));
    }

    #[test]
    fn test_cached_loader_file_exists_means_declared() {
        let mut fs = MockFileSystem::new();
        fs.add_file("/src/on_disk_only.ts", "");
        let mut cache = file_cache();
        let loader = CachedFileLoader::new(&mut cache, Arc::new(fs), parse, Arc::new(NullSink));

        assert!(loader.file_exists("/src/a.ts"));
        assert!(!loader.file_exists("/src/on_disk_only.ts"));
    }

    #[test]
    fn test_cached_loader_records_load_time_and_snapshot() {
        let sink = Arc::new(RecordingSink::new());
        let mut cache = file_cache();
        let mut loader = CachedFileLoader::new(&mut cache, mock_fs(), parse, sink.clone());

        loader.load_file("a.ts", "/src/a.ts", LanguageVersion::Es5).unwrap();
        loader.load_file("b.ts", "/src/b.ts", LanguageVersion::Es5).unwrap();
        loader.load_file("a.ts", "/src/a.ts", LanguageVersion::Es5).unwrap();

        assert_eq!(sink.counter_count(FILE_LOAD_TIME_COUNTER), 2);
        assert_eq!(sink.snapshot_count(), 2);
        let reported = sink.last_value(FILE_LOAD_TIME_COUNTER, "read").unwrap();
        assert!((reported - loader.total_read_time().as_secs_f64() * 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_cached_loader_propagates_io_error() {
        let mut cache = file_cache();
        cache.update_cache(vec![("/src/gone.ts".to_string(), "d".to_string())]);
        let mut loader = CachedFileLoader::new(&mut cache, mock_fs(), parse, Arc::new(NullSink));

        let err = loader
            .load_file("gone.ts", "/src/gone.ts", LanguageVersion::Es5)
            .unwrap_err();
        match err {
            CacheError::Io(inner) => assert_eq!(inner.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected Io, got {:?}", other),
        }
        drop(loader);
        assert!(!cache.in_cache("/src/gone.ts"));
    }

    #[test]
    fn test_cached_loader_undeclared_input_is_missing_digest() {
        let mut fs = MockFileSystem::new();
        fs.add_file("/src/extra.ts", "let x;");
        let mut cache = file_cache();
        let mut loader = CachedFileLoader::new(&mut cache, Arc::new(fs), parse, Arc::new(NullSink));

        let err = loader
            .load_file("extra.ts", "/src/extra.ts", LanguageVersion::Es5)
            .unwrap_err();
        assert!(matches!(err, CacheError::MissingDigest { .. }));
    }

    #[test]
    fn test_uncached_loader_always_reads() {
        let fs = mock_fs();
        let mut loader = UncachedFileLoader::new(fs.clone(), parse);

        let first = loader.load_file("a.ts", "/src/a.ts", LanguageVersion::EsNext).unwrap();
        let second = loader.load_file("a.ts", "/src/a.ts", LanguageVersion::EsNext).unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first, second);
        assert_eq!(fs.read_count(), 2);
        assert!(loader.file_exists("/src/b.ts"));
        assert!(!loader.file_exists("/src/c.ts"));
    }

    #[test]
    fn test_strategies_agree_on_output() {
        let fs = mock_fs();
        let mut cache = file_cache();
        let mut cached = CachedFileLoader::new(&mut cache, fs.clone(), parse, Arc::new(NullSink));
        let mut uncached = UncachedFileLoader::new(fs, parse);

        for path in ["/src/a.ts", "/src/b.ts"] {
            let a = cached.load_file(path, path, LanguageVersion::Es2017).unwrap();
            let b = uncached.load_file(path, path, LanguageVersion::Es2017).unwrap();
            assert_eq!(*a, *b);
        }
    }

    #[test]
    fn test_loader_for_config_selects_strategy() {
        let fs = mock_fs();
        let mut cache = file_cache();
        let config = CacheConfig {
            enable_cache: false,
            ..CacheConfig::default()
        };

        let mut loader =
            loader_for_config(&config, &mut cache, fs.clone(), parse, Arc::new(NullSink));
        loader.load_file("a.ts", "/src/a.ts", config.target).unwrap();
        drop(loader);

        assert_eq!(fs.read_count(), 1);
        assert!(!cache.in_cache("/src/a.ts"));
    }
}
