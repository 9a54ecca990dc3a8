//! Aggregation tree: parent-directed flushing, congestion backoff, and flush scheduling for mesh.
//!
//! An [`AggregationTree`] is one node's attachment to the collection tree. It
//! owns the node's accumulators, follows the hop-count gradient to pick a
//! parent, batches every accumulator's ready records into one frame per
//! flush, and folds frames received from children back into its own
//! accumulators. The sink consumes what reaches it.
//!
//! The tree never calls back into its owner. Discovery and transport
//! notifications are handed to it explicitly through
//! [`AggregationTree::handle_topology`] and [`AggregationTree::handle_transport`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod schedule;
pub mod throttle;
pub mod tree;

use thiserror::Error;

/// Tree errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeError {
    /// An accumulator with this id is already bound
    #[error("accumulator {0} already bound")]
    DuplicateAccumulator(u8),
    /// No accumulator with this id is bound
    #[error("accumulator {0} not bound")]
    UnknownAccumulator(u8),
    /// The tree was closed
    #[error("tree closed")]
    Closed,
}

pub use config::{TreeConfig, DEFAULT_MAX_RETRIES};
pub use schedule::FlushSchedule;
pub use throttle::{overshoot, skip_probability, CongestionGate, MAX_OVERSHOOT};
pub use tree::{AggregationTree, SinkHandler};
