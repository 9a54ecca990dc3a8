//! Hop-count gradient, neighbour discovery collaborator, and simulated beaconing for mesh.
//!
//! Every node estimates its distance to the sink as a hop count and picks as
//! parent the neighbour that advertised the lowest one. This crate provides
//! the gradient state machine, the [`Topology`] trait through which a tree
//! drives its discovery service, and an in-memory beacon board used by the
//! simulator and tests.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod beacon;
pub mod discovery;
pub mod gradient;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Link-layer address of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeAddr(pub u16);

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 >> 8, self.0 & 0xff)
    }
}

impl From<u16> for NodeAddr {
    fn from(value: u16) -> Self {
        NodeAddr(value)
    }
}

/// Topology errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// The node is not registered on the board
    #[error("unknown node {0}")]
    UnknownNode(NodeAddr),
    /// A node cannot neighbour itself
    #[error("self link on node {0}")]
    SelfLink(NodeAddr),
}

pub use beacon::{Beacons, SimTopology};
pub use discovery::{Topology, TopologyEvent};
pub use gradient::{Gradient, UNROUTED_HOP};
