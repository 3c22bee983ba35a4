// Process memory probes used for pressure-driven eviction
// Author: kelexine (https://github.com/kelexine)

use std::sync::atomic::{AtomicU64, Ordering};

/// Page size assumed when converting `/proc/self/statm` pages to bytes.
const PAGE_SIZE: u64 = 4096;

/// Reports current process memory in bytes.
pub trait MemoryProbe: Send + Sync {
    fn heap_bytes(&self) -> u64;
}

/// Resident set size from `/proc/self/statm`; reports 0 where procfs is absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessMemoryProbe;

impl MemoryProbe for ProcessMemoryProbe {
    fn heap_bytes(&self) -> u64 {
        std::fs::read_to_string("/proc/self/statm")
            .ok()
            .and_then(|statm| parse_statm_resident(&statm))
            .map(|pages| pages * PAGE_SIZE)
            .unwrap_or(0)
    }
}

fn parse_statm_resident(statm: &str) -> Option<u64> {
    statm.split_whitespace().nth(1)?.parse().ok()
}

/// Probe returning a settable value. Lets tests drive pressure eviction, and
/// a value of 0 disables it.
#[derive(Debug, Default)]
pub struct StaticMemoryProbe {
    bytes: AtomicU64,
}

impl StaticMemoryProbe {
    pub fn new(bytes: u64) -> Self {
        Self {
            bytes: AtomicU64::new(bytes),
        }
    }

    pub fn set(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for StaticMemoryProbe {
    fn heap_bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}
