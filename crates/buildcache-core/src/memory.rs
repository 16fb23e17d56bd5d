//! Process memory readings
//!
//! Eviction is driven by how much memory the whole process uses, not by how
//! many entries a cache holds. The reading is injected through [`MemoryProbe`]
//! so that tests can pin it to a fixed value.

use std::sync::Mutex;
use sysinfo::{Pid, System};
use tracing::warn;

/// Source of the current process memory usage, in bytes
pub trait MemoryProbe: Send + Sync {
    fn heap_used(&self) -> u64;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> u64 + Send + Sync,
{
    fn heap_used(&self) -> u64 {
        self()
    }
}

/// Probe that always reports the same usage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedUsage(pub u64);

impl MemoryProbe for FixedUsage {
    fn heap_used(&self) -> u64 {
        self.0
    }
}

/// Reads the resident memory of the current process
pub struct ProcessMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot determine current pid, memory pressure disabled: {}", e);
                None
            }
        };

        Self {
            system: Mutex::new(System::new()),
            pid,
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    /// Returns 0 when the process cannot be inspected, which never
    /// triggers eviction.
    fn heap_used(&self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };
        let Ok(mut system) = self.system.lock() else {
            return 0;
        };

        if !system.refresh_process(pid) {
            return 0;
        }
        system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

impl std::fmt::Debug for ProcessMemoryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMemoryProbe")
            .field("pid", &self.pid)
            .finish()
    }
}
