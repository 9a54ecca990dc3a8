//! Parent selection by strictly decreasing hop count.

use crate::NodeAddr;
use serde::Serialize;
use tracing::info;

/// Hop count meaning "no route to the sink"
pub const UNROUTED_HOP: u8 = u8::MAX;

/// A node's position in the collection tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Gradient {
    parent: Option<NodeAddr>,
    hop: u8,
    is_sink: bool,
}

impl Gradient {
    /// The tree root: hop 0, never adopts a parent
    pub fn sink() -> Self {
        Self {
            parent: None,
            hop: 0,
            is_sink: true,
        }
    }

    /// A node that has not heard from any routed neighbour yet
    pub fn unrouted() -> Self {
        Self {
            parent: None,
            hop: UNROUTED_HOP,
            is_sink: false,
        }
    }

    /// Sink or unrouted, depending on role
    pub fn new(is_sink: bool) -> Self {
        if is_sink {
            Self::sink()
        } else {
            Self::unrouted()
        }
    }

    /// Current parent, if any
    pub fn parent(&self) -> Option<NodeAddr> {
        self.parent
    }

    /// Current hop count
    pub fn hop(&self) -> u8 {
        self.hop
    }

    /// Whether this node is the root
    pub fn is_sink(&self) -> bool {
        self.is_sink
    }

    /// Whether data can move toward the sink from here
    pub fn is_routed(&self) -> bool {
        self.is_sink || self.parent.is_some()
    }

    /// Hop count to announce to neighbours
    pub fn advertised(&self) -> u8 {
        self.hop.saturating_add(1)
    }

    /// Adopt `addr` as parent iff `hop` is a strict improvement.
    ///
    /// Ties keep the incumbent so two equally good parents cannot make the
    /// node flap between them.
    pub fn consider(&mut self, addr: NodeAddr, hop: u8) -> bool {
        if hop >= self.hop {
            return false;
        }

        info!("Adopting parent {} at hop {} (was {:?} at hop {})", addr, hop, self.parent, self.hop);
        self.parent = Some(addr);
        self.hop = hop;
        true
    }
}
