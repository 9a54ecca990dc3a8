//! Record store and map/reduce combiner for mesh aggregation.
//!
//! This crate holds everything a node keeps in RAM between flushes: the
//! key/value [`Record`]s, the per-job [`Accumulator`] that combines them by
//! key, the [`MemoryLedger`] that accounts for their bytes, and the
//! [`Counters`] reported in the node's stats line.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulator;
pub mod counters;
pub mod ledger;
pub mod record;

use thiserror::Error;

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The memory ledger refused the charge
    #[error("allocation of {requested} bytes refused ({allocated}/{limit} in use)")]
    Allocation {
        /// Bytes requested
        requested: usize,
        /// Bytes already charged
        allocated: usize,
        /// Ledger cap
        limit: usize,
    },
    /// Record does not fit the wire encoding
    #[error("wire error: {0}")]
    Wire(#[from] mesh_wire::WireError),
}

// Re-export main types
pub use accumulator::{Accumulator, Combiner, Emitted, MapOutput, DEFAULT_FLUSH_INTERVAL};
pub use counters::{Counters, Stats};
pub use ledger::MemoryLedger;
pub use record::{Record, RecordFlags, RECORD_OVERHEAD};
