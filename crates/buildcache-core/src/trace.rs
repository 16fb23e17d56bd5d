//! Performance trace sinks
//!
//! The cache reports counters (hit rates, eviction totals, sizes, load times)
//! and memory snapshots to a [`TraceSink`]. Sinks are fire-and-forget: they
//! return nothing and must never influence cache behavior.

use std::sync::Mutex;

/// Target used for all perf trace events emitted through `tracing`
pub const PERF_TARGET: &str = "buildcache::perf";

/// Receiver for named counters and memory snapshots
pub trait TraceSink: Send + Sync {
    /// Record the current values of a named counter
    fn counter(&self, name: &str, values: &[(&str, f64)]);

    /// Record a snapshot of the process memory usage
    fn snapshot_memory_usage(&self, heap_used: u64);
}

/// Default sink: forwards everything to `tracing` at trace level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

impl TraceSink for TracingSink {
    fn counter(&self, name: &str, values: &[(&str, f64)]) {
        tracing::trace!(target: PERF_TARGET, counter = name, values = ?values);
    }

    fn snapshot_memory_usage(&self, heap_used: u64) {
        tracing::trace!(target: PERF_TARGET, heap_used, "memory snapshot");
    }
}

/// Sink that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TraceSink for NullSink {
    fn counter(&self, _name: &str, _values: &[(&str, f64)]) {}

    fn snapshot_memory_usage(&self, _heap_used: u64) {}
}

/// A single event captured by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Counter {
        name: String,
        values: Vec<(String, f64)>,
    },
    MemorySnapshot {
        heap_used: u64,
    },
}

/// In-memory sink, used to instrument the cache in tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far, oldest first
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of times the named counter was emitted
    pub fn counter_count(&self, name: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TraceEvent::Counter { name: n, .. } if n == name))
            .count()
    }

    /// Most recent value of `key` within the named counter
    pub fn last_value(&self, name: &str, key: &str) -> Option<f64> {
        self.events().iter().rev().find_map(|e| match e {
            TraceEvent::Counter { name: n, values } if n == name => {
                values.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
            }
            _ => None,
        })
    }

    /// Number of memory snapshots recorded
    pub fn snapshot_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TraceEvent::MemorySnapshot { .. }))
            .count()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn push(&self, event: TraceEvent) {
        // A poisoned recorder only loses instrumentation.
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl TraceSink for RecordingSink {
    fn counter(&self, name: &str, values: &[(&str, f64)]) {
        self.push(TraceEvent::Counter {
            name: name.to_string(),
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        });
    }

    fn snapshot_memory_usage(&self, heap_used: u64) {
        self.push(TraceEvent::MemorySnapshot { heap_used });
    }
}
