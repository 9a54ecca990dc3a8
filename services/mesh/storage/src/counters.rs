//! Per-node activity counters and the diagnostic stats line.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by a tree and its accumulators
#[derive(Debug, Default)]
pub struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    timed_out: AtomicU64,
    map_calls: AtomicU64,
    emit_calls: AtomicU64,
    reduce_calls: AtomicU64,
    cycles: AtomicU64,
}

impl Counters {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame was confirmed by the transport
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// A frame was received
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// A send exhausted its retries
    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// A map hook ran
    pub fn record_map(&self) {
        self.map_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was emitted into a store
    pub fn record_emit(&self) {
        self.emit_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// A reduce hook ran
    pub fn record_reduce(&self) {
        self.reduce_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// A topology discovery cycle elapsed
    pub fn record_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Confirmed sends
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Received frames
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Timed-out sends
    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }

    /// Reduce invocations
    pub fn reduce_calls(&self) -> u64 {
        self.reduce_calls.load(Ordering::Relaxed)
    }

    /// Discovery cycles
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Take a consistent-enough snapshot for reporting
    pub fn snapshot(&self, ram: usize) -> Stats {
        Stats {
            sent: self.sent(),
            received: self.received(),
            timed_out: self.timed_out(),
            map_calls: self.map_calls.load(Ordering::Relaxed),
            emit_calls: self.emit_calls.load(Ordering::Relaxed),
            reduce_calls: self.reduce_calls(),
            cycles: self.cycles(),
            ram,
        }
    }
}

/// Point-in-time copy of a node's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Confirmed sends
    pub sent: u64,
    /// Received frames
    pub received: u64,
    /// Timed-out sends
    pub timed_out: u64,
    /// Map invocations
    pub map_calls: u64,
    /// Emit invocations
    pub emit_calls: u64,
    /// Reduce invocations
    pub reduce_calls: u64,
    /// Discovery cycles
    pub cycles: u64,
    /// Live bytes held by stored records
    pub ram: usize,
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent={} recv={} timedout={} map={} emit={} reduce={} cycles={} ram={}",
            self.sent,
            self.received,
            self.timed_out,
            self.map_calls,
            self.emit_calls,
            self.reduce_calls,
            self.cycles,
            self.ram
        )
    }
}
