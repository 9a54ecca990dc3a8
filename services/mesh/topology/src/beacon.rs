//! In-memory beacon board standing in for a radio neighbourhood.
//!
//! Nodes register on a shared [`Beacons`] board through their
//! [`SimTopology`] handle. Each [`Beacons::tick`] is one discovery round:
//! every started node hears the current advertisement of each started
//! neighbour, then gets a query tick.

use crate::discovery::{Topology, TopologyEvent};
use crate::{NodeAddr, TopologyError};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Debug, Default)]
struct Board {
    /// Advertised hop per started node
    advertised: BTreeMap<NodeAddr, u8>,
    /// Symmetric neighbour relation
    links: BTreeMap<NodeAddr, BTreeSet<NodeAddr>>,
}

/// Shared discovery board
#[derive(Debug, Clone, Default)]
pub struct Beacons {
    board: Arc<Mutex<Board>>,
}

impl Beacons {
    /// Create an empty board
    pub fn new() -> Self {
        Self::default()
    }

    /// A board with nodes `0..n` on a line, each linked to its predecessor
    pub fn line(n: u16) -> Self {
        let beacons = Self::new();
        {
            let mut board = beacons.lock();
            for i in 0..n {
                board.links.entry(NodeAddr(i)).or_default();
                if i > 0 {
                    board.links.entry(NodeAddr(i)).or_default().insert(NodeAddr(i - 1));
                    board.links.entry(NodeAddr(i - 1)).or_default().insert(NodeAddr(i));
                }
            }
        }
        beacons
    }

    fn lock(&self) -> MutexGuard<'_, Board> {
        self.board.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make `a` and `b` hear each other
    pub fn connect(&self, a: NodeAddr, b: NodeAddr) -> Result<(), TopologyError> {
        if a == b {
            return Err(TopologyError::SelfLink(a));
        }
        let mut board = self.lock();
        board.links.entry(a).or_default().insert(b);
        board.links.entry(b).or_default().insert(a);
        Ok(())
    }

    /// Neighbours of `addr`
    pub fn neighbors(&self, addr: NodeAddr) -> Result<Vec<NodeAddr>, TopologyError> {
        self.lock()
            .links
            .get(&addr)
            .map(|set| set.iter().copied().collect())
            .ok_or(TopologyError::UnknownNode(addr))
    }

    /// Discovery handle for one node
    pub fn handle(&self, addr: NodeAddr) -> SimTopology {
        self.lock().links.entry(addr).or_default();
        SimTopology {
            addr,
            beacons: self.clone(),
        }
    }

    /// Hop count `addr` currently advertises, if started
    pub fn advertised(&self, addr: NodeAddr) -> Option<u8> {
        self.lock().advertised.get(&addr).copied()
    }

    /// Run one discovery round and return the events to deliver, per node
    pub fn tick(&self) -> Vec<(NodeAddr, TopologyEvent)> {
        let board = self.lock();
        let mut events = Vec::new();

        for (&node, neighbors) in &board.links {
            if !board.advertised.contains_key(&node) {
                continue;
            }
            for neighbor in neighbors {
                if let Some(&hop) = board.advertised.get(neighbor) {
                    events.push((node, TopologyEvent::NeighborFound { addr: *neighbor, hop }));
                }
            }
        }
        events.extend(
            board
                .advertised
                .keys()
                .map(|&node| (node, TopologyEvent::QueryTick)),
        );

        debug!("Beacon round produced {} events for {} nodes", events.len(), board.advertised.len());
        events
    }
}

/// One node's view of the beacon board
#[derive(Debug, Clone)]
pub struct SimTopology {
    addr: NodeAddr,
    beacons: Beacons,
}

impl SimTopology {
    /// Address of this node
    pub fn addr(&self) -> NodeAddr {
        self.addr
    }
}

impl Topology for SimTopology {
    fn start(&mut self, initial_hop: u8) {
        debug!("Node {} starts advertising hop {}", self.addr, initial_hop);
        self.beacons.lock().advertised.insert(self.addr, initial_hop);
    }

    fn set_advertised_hop(&mut self, hop: u8) {
        let mut board = self.beacons.lock();
        if let Some(slot) = board.advertised.get_mut(&self.addr) {
            *slot = hop;
        }
    }

    fn close(&mut self) {
        self.beacons.lock().advertised.remove(&self.addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_links() {
        let beacons = Beacons::line(3);
        assert_eq!(beacons.neighbors(NodeAddr(0)).unwrap(), vec![NodeAddr(1)]);
        assert_eq!(
            beacons.neighbors(NodeAddr(1)).unwrap(),
            vec![NodeAddr(0), NodeAddr(2)]
        );
        assert_eq!(
            beacons.neighbors(NodeAddr(9)),
            Err(TopologyError::UnknownNode(NodeAddr(9)))
        );
    }

    #[test]
    fn test_connect_rejects_self_link() {
        let beacons = Beacons::new();
        assert_eq!(
            beacons.connect(NodeAddr(1), NodeAddr(1)),
            Err(TopologyError::SelfLink(NodeAddr(1)))
        );
        beacons.connect(NodeAddr(1), NodeAddr(2)).unwrap();
        assert_eq!(beacons.neighbors(NodeAddr(2)).unwrap(), vec![NodeAddr(1)]);
    }

    #[test]
    fn test_tick_only_reports_started_nodes() {
        let beacons = Beacons::line(3);
        let mut sink = beacons.handle(NodeAddr(0));
        let mut middle = beacons.handle(NodeAddr(1));

        assert!(beacons.tick().is_empty());

        sink.start(1);
        middle.start(255);
        let events = beacons.tick();
        assert_eq!(
            events,
            vec![
                (NodeAddr(0), TopologyEvent::NeighborFound { addr: NodeAddr(1), hop: 255 }),
                (NodeAddr(1), TopologyEvent::NeighborFound { addr: NodeAddr(0), hop: 1 }),
                (NodeAddr(0), TopologyEvent::QueryTick),
                (NodeAddr(1), TopologyEvent::QueryTick),
            ]
        );

        middle.set_advertised_hop(2);
        assert_eq!(beacons.advertised(NodeAddr(1)), Some(2));

        middle.close();
        assert_eq!(beacons.advertised(NodeAddr(1)), None);
        assert_eq!(beacons.tick(), vec![(NodeAddr(0), TopologyEvent::QueryTick)]);
    }

    #[test]
    fn test_set_before_start_is_ignored() {
        let beacons = Beacons::line(2);
        let mut node = beacons.handle(NodeAddr(1));
        node.set_advertised_hop(4);
        assert_eq!(beacons.advertised(NodeAddr(1)), None);
    }
}
