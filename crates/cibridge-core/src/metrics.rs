//! Process-wide counters.
//!
//! Call sites bump a [`Counter`] on [`METRICS`]; nothing is reported until
//! [`Metrics::flush`] logs all values in one `info!` event, which the CLI
//! does before exiting.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub static METRICS: Metrics = Metrics::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// Builds accepted by the server and recorded in the ledger.
    TriggersSubmitted,
    /// Ledger entries refreshed from the server.
    Syncs,
    /// Entries a sync gave up on.
    SyncFailures,
    LogCacheHits,
    LogCacheMisses,
}

impl Counter {
    const ALL: [Counter; 5] = [
        Counter::TriggersSubmitted,
        Counter::Syncs,
        Counter::SyncFailures,
        Counter::LogCacheHits,
        Counter::LogCacheMisses,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Counter::TriggersSubmitted => "triggers_submitted",
            Counter::Syncs => "syncs",
            Counter::SyncFailures => "sync_failures",
            Counter::LogCacheHits => "log_cache_hits",
            Counter::LogCacheMisses => "log_cache_misses",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Counter values at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub triggers_submitted: u64,
    pub syncs: u64,
    pub sync_failures: u64,
    pub log_cache_hits: u64,
    pub log_cache_misses: u64,
}

pub struct Metrics {
    counters: [AtomicU64; Counter::ALL.len()],
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            counters: [
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
                AtomicU64::new(0),
            ],
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.counters[counter.index()].fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = counter.name(), "counter incremented");
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            triggers_submitted: self.get(Counter::TriggersSubmitted),
            syncs: self.get(Counter::Syncs),
            sync_failures: self.get(Counter::SyncFailures),
            log_cache_hits: self.get(Counter::LogCacheHits),
            log_cache_misses: self.get(Counter::LogCacheMisses),
        }
    }

    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            triggers_submitted = s.triggers_submitted,
            syncs = s.syncs,
            sync_failures = s.sync_failures,
            log_cache_hits = s.log_cache_hits,
            log_cache_misses = s.log_cache_misses,
        );
    }
}
