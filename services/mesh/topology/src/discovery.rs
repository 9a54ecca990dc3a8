//! Collaborator interface for neighbour discovery.

use crate::NodeAddr;

/// Events a discovery service delivers to its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyEvent {
    /// A neighbour announced its hop count
    NeighborFound {
        /// Neighbour address
        addr: NodeAddr,
        /// Hop count the neighbour advertised
        hop: u8,
    },
    /// One discovery round elapsed
    QueryTick,
}

/// Neighbour discovery service driven by an aggregation tree.
///
/// Implementations announce the advertised hop count to neighbours and report
/// what they hear back as [`TopologyEvent`]s, which the owner passes to the
/// tree explicitly.
pub trait Topology: Send {
    /// Begin advertising `initial_hop`
    fn start(&mut self, initial_hop: u8);

    /// Change the advertised hop count
    fn set_advertised_hop(&mut self, hop: u8);

    /// Stop advertising
    fn close(&mut self);
}
