//! Collaborator interface for reliable single-hop delivery.

use bytes::Bytes;
use mesh_topology::NodeAddr;
use thiserror::Error;

/// Completion and receive notifications, delivered to the owning tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A frame arrived from a neighbour
    Received {
        /// Sender
        from: NodeAddr,
        /// Frame bytes
        payload: Bytes,
    },
    /// The in-flight frame was acknowledged
    Sent {
        /// Destination
        to: NodeAddr,
        /// Retransmissions it took
        retries: u8,
    },
    /// The in-flight frame exhausted its retries
    TimedOut {
        /// Destination
        to: NodeAddr,
        /// Retransmissions attempted
        retries: u8,
    },
}

/// Reasons a send is refused
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Another send is still in flight
    #[error("transport busy")]
    Busy,
    /// The transport was closed
    #[error("transport closed")]
    Closed,
    /// Nothing to send
    #[error("empty payload")]
    EmptyPayload,
}

/// Reliable send-with-retry to one neighbour at a time
pub trait Transport: Send {
    /// Start sending `payload` to `to`; false if the send was not accepted
    fn send(&mut self, to: NodeAddr, payload: Bytes, max_retries: u8) -> bool;

    /// Whether a send is in flight
    fn is_busy(&self) -> bool;

    /// Stop sending and receiving
    fn close(&mut self);
}
