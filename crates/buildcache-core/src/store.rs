//! Named least-recently-used key/value store
//!
//! Keys are kept in recency order: the front of the list is the entry that
//! was touched longest ago, the back is the most recent one. A cache hit moves
//! the key to the back in O(1). Eviction removes half of the entries from the
//! front, skipping any key the caller pins.

use generational_arena::{Arena, Index};
use rustc_hash::FxHashMap;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;
use std::sync::Arc;
use tracing::debug;

use crate::trace::TraceSink;

/// Keys that must survive an eviction pass
pub trait PinSet {
    fn is_pinned(&self, key: &str) -> bool;
}

impl<S: BuildHasher> PinSet for HashSet<String, S> {
    fn is_pinned(&self, key: &str) -> bool {
        self.contains(key)
    }
}

impl<V, S: BuildHasher> PinSet for HashMap<String, V, S> {
    fn is_pinned(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

impl<const N: usize> PinSet for [&str; N] {
    fn is_pinned(&self, key: &str) -> bool {
        self.contains(&key)
    }
}

/// Read/hit/eviction counters for one store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub reads: u64,
    pub hits: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn misses(&self) -> u64 {
        self.reads - self.hits
    }

    /// Hit percentage; an unread store counts as 100%
    pub fn hit_rate(&self) -> f64 {
        if self.reads == 0 {
            100.0
        } else {
            self.hits as f64 / self.reads as f64 * 100.0
        }
    }
}

#[derive(Debug)]
struct Node<V> {
    key: String,
    value: V,
    prev: Option<Index>,
    next: Option<Index>,
}

/// String-keyed store with recency ordering and halving eviction
pub struct LruStore<V> {
    name: String,
    size_key: String,
    nodes: Arena<Node<V>>,
    lookup: FxHashMap<String, Index>,
    /// Least-recently-used entry
    head: Option<Index>,
    /// Most-recently-used entry
    tail: Option<Index>,
    stats: CacheStats,
    eviction_passes: u64,
    sink: Arc<dyn TraceSink>,
}

impl<V> LruStore<V> {
    /// Create an empty store; `name` prefixes every trace counter it emits
    pub fn new(name: impl Into<String>, sink: Arc<dyn TraceSink>) -> Self {
        let name = name.into();
        Self {
            size_key: format!("{}s", name),
            name,
            nodes: Arena::new(),
            lookup: FxHashMap::default(),
            head: None,
            tail: None,
            stats: CacheStats::default(),
            eviction_passes: 0,
            sink,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.lookup.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Number of eviction passes that actually scanned the store
    pub fn eviction_passes(&self) -> u64 {
        self.eviction_passes
    }

    /// Insert or overwrite. An overwritten key keeps its recency position.
    pub fn set(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        if let Some(&index) = self.lookup.get(&key) {
            self.nodes[index].value = value;
            return;
        }

        let index = self.nodes.insert(Node {
            key: key.clone(),
            value,
            prev: None,
            next: None,
        });
        self.lookup.insert(key, index);
        self.push_back(index);
    }

    /// Look up `key`, counting the read.
    ///
    /// With `update_recency` a hit moves the key to the most-recently-used
    /// end and the hit counters are traced. Without it this is a peek that
    /// only bumps the read counter.
    pub fn get(&mut self, key: &str, update_recency: bool) -> Option<&V> {
        self.stats.reads += 1;
        let index = self.lookup.get(key).copied();

        if update_recency {
            if let Some(index) = index {
                self.stats.hits += 1;
                self.move_to_back(index);
            }
            self.trace_stats();
        }

        index.map(|i| &self.nodes[i].value)
    }

    /// Look up `key` without touching stats or recency
    pub fn peek(&self, key: &str) -> Option<&V> {
        self.lookup.get(key).map(|&i| &self.nodes[i].value)
    }

    /// Remove `key` if present
    pub fn delete(&mut self, key: &str) -> Option<V> {
        let index = self.lookup.remove(key)?;
        self.unlink(index);
        self.nodes.remove(index).map(|node| node.value)
    }

    /// Drop up to half of the entries, oldest first, skipping pinned keys.
    ///
    /// Returns the number of entries actually removed, which is lower than
    /// half when pinned keys are in the way.
    pub fn evict(&mut self, pinned: Option<&dyn PinSet>) -> usize {
        let mut remaining = self.len() / 2;
        if remaining == 0 {
            return 0;
        }
        self.eviction_passes += 1;

        let mut dropped = 0;
        let mut cursor = self.head;
        while let Some(index) = cursor {
            if remaining == 0 {
                break;
            }
            let node = &self.nodes[index];
            cursor = node.next;

            if pinned.is_some_and(|p| p.is_pinned(&node.key)) {
                continue;
            }

            let key = node.key.clone();
            self.lookup.remove(&key);
            self.unlink(index);
            self.nodes.remove(index);
            remaining -= 1;
            dropped += 1;
        }

        self.stats.evictions += dropped as u64;
        self.trace_stats();
        dropped
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Keys<'_, V> {
        Keys {
            store: self,
            cursor: self.head,
        }
    }

    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::default();
    }

    /// Log a one-line hit-rate summary
    pub fn print_stats(&self) {
        debug!(
            "{} cache stats: {:.2}% hits (reads: {}, hits: {}, evictions: {})",
            self.name,
            self.stats.hit_rate(),
            self.stats.reads,
            self.stats.hits,
            self.stats.evictions
        );
    }

    /// Emit hit rate, eviction total and size to the trace sink
    pub fn trace_stats(&self) {
        self.sink.counter(
            &format!("{} cache hit rate", self.name),
            &[
                ("hits", self.stats.hits as f64),
                ("misses", self.stats.misses() as f64),
            ],
        );
        self.sink.counter(
            &format!("{} cache evictions", self.name),
            &[("evictions", self.stats.evictions as f64)],
        );
        self.sink.counter(
            &format!("{} cache size", self.name),
            &[(self.size_key.as_str(), self.len() as f64)],
        );
    }

    fn unlink(&mut self, index: Index) {
        let (prev, next) = {
            let node = &self.nodes[index];
            (node.prev, node.next)
        };

        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }

        let node = &mut self.nodes[index];
        node.prev = None;
        node.next = None;
    }

    fn push_back(&mut self, index: Index) {
        let old_tail = self.tail;
        {
            let node = &mut self.nodes[index];
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => self.nodes[t].next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    fn move_to_back(&mut self, index: Index) {
        if self.tail != Some(index) {
            self.unlink(index);
            self.push_back(index);
        }
    }
}

impl<V> std::fmt::Debug for LruStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruStore")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Iterator over store keys in recency order
pub struct Keys<'a, V> {
    store: &'a LruStore<V>,
    cursor: Option<Index>,
}

impl<'a, V> Iterator for Keys<'a, V> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let node = &self.store.nodes[self.cursor?];
        self.cursor = node.next;
        Some(node.key.as_str())
    }
}
