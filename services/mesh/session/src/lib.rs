//! Reliable single-hop transport collaborator and simulated lossy radio medium for mesh.
//!
//! A tree hands each outgoing frame to a [`Transport`], which retries it up to
//! a bound and later reports the outcome as a [`TransportEvent`]. At most one
//! send is in flight per node; callers check [`Transport::is_busy`] instead of
//! queueing.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use mesh_session::{Medium, Transport, TransportEvent};
//! use mesh_topology::NodeAddr;
//!
//! let medium = Medium::new(0.0, Some(7));
//! let mut a = medium.attach(NodeAddr(1));
//! let _b = medium.attach(NodeAddr(0));
//!
//! assert!(a.send(NodeAddr(0), Bytes::from_static(&[0, 0]), 3));
//! assert!(a.is_busy());
//!
//! let events = medium.pump();
//! assert!(events.iter().any(|(node, event)| {
//!     *node == NodeAddr(1) && matches!(event, TransportEvent::Sent { retries: 0, .. })
//! }));
//! assert!(!a.is_busy());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod medium;
pub mod transport;

pub use medium::{Medium, MediumStats, SimTransport};
pub use transport::{Transport, TransportError, TransportEvent};
