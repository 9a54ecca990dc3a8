//! Live-byte accounting for stored records.

use crate::StoreError;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Tracks the bytes held by stored records, optionally against a hard cap.
///
/// A node shares one ledger across all of its accumulators.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    allocated: AtomicUsize,
    limit: Option<usize>,
}

impl MemoryLedger {
    /// Create a ledger with an optional cap
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            allocated: AtomicUsize::new(0),
            limit,
        }
    }

    /// Create a ledger without a cap
    pub fn unbounded() -> Self {
        Self::new(None)
    }

    /// Create a ledger capped at `limit` bytes
    pub fn with_limit(limit: usize) -> Self {
        Self::new(Some(limit))
    }

    /// Charge `bytes`; fails without side effects if the cap would be exceeded
    pub fn charge(&self, bytes: usize) -> Result<(), StoreError> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_add(bytes).filter(|next| *next <= limit)
            })
            .map(|_| ())
            .map_err(|allocated| {
                debug!(requested = bytes, allocated, limit, "ledger charge refused");
                StoreError::Allocation {
                    requested: bytes,
                    allocated,
                    limit,
                }
            })
    }

    /// Charge `bytes` regardless of the cap (used when moving existing
    /// records between ledgers)
    pub fn force_charge(&self, bytes: usize) {
        self.allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Give `bytes` back
    pub fn refund(&self, bytes: usize) {
        let _ = self
            .allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    /// Live bytes currently charged
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Configured cap, if any
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}
