//! # Worker Metrics
//!
//! Lightweight traffic counters for one worker. `AtomicU64` with relaxed
//! ordering keeps recording zero-allocation and cheap; no cross-field
//! ordering is required, only eventual consistency. The put counters also
//! feed the master's quiescence protocol through FLUSH_DONE reports.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub gets_served: u64,
    pub puts_sent: u64,
    pub puts_applied: u64,
    pub flush_cycles: u64,
    pub kernel_calls: u64,
}

/// Thread-safe counter set shared by the worker's three threads.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    gets_served: AtomicU64,
    puts_sent: AtomicU64,
    puts_applied: AtomicU64,
    flush_cycles: AtomicU64,
    kernel_calls: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one GET_REQUEST answered for a remote peer.
    pub fn record_get_served(&self) {
        self.gets_served.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one PUT_REQUEST shipped by the flusher.
    pub fn record_put_sent(&self) {
        self.puts_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one inbound PUT_REQUEST merged into an owned shard.
    pub fn record_put_applied(&self) {
        self.puts_applied.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one flusher drain cycle.
    pub fn record_flush_cycle(&self) {
        self.flush_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one kernel method invocation.
    pub fn record_kernel_call(&self) {
        self.kernel_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn puts_sent(&self) -> u64 {
        self.puts_sent.load(Ordering::Relaxed)
    }

    pub fn puts_applied(&self) -> u64 {
        self.puts_applied.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gets_served: self.gets_served.load(Ordering::Relaxed),
            puts_sent: self.puts_sent.load(Ordering::Relaxed),
            puts_applied: self.puts_applied.load(Ordering::Relaxed),
            flush_cycles: self.flush_cycles.load(Ordering::Relaxed),
            kernel_calls: self.kernel_calls.load(Ordering::Relaxed),
        }
    }
}
