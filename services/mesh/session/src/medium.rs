//! Lossy in-memory radio shared by simulated nodes.
//!
//! Sends are queued by [`SimTransport::send`] and resolved by
//! [`Medium::pump`]: each attempt is lost with the configured probability,
//! the first surviving attempt delivers the frame and acknowledges the
//! sender, and a send whose attempts are all lost times out.

use crate::transport::{Transport, TransportError, TransportEvent};
use bytes::Bytes;
use mesh_topology::NodeAddr;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

#[derive(Debug)]
struct InFlight {
    to: NodeAddr,
    payload: Bytes,
    max_retries: u8,
}

/// Attempt accounting across the whole medium
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MediumStats {
    /// Transmission attempts, retries included
    pub attempts: u64,
    /// Attempts lost in the air
    pub lost: u64,
    /// Frames delivered
    pub delivered: u64,
    /// Sends that exhausted their retries
    pub timed_out: u64,
}

#[derive(Debug)]
struct State {
    rng: StdRng,
    loss: f64,
    open: BTreeSet<NodeAddr>,
    in_flight: BTreeMap<NodeAddr, InFlight>,
    stats: MediumStats,
}

/// Shared simulated radio
#[derive(Debug, Clone)]
pub struct Medium {
    state: Arc<Mutex<State>>,
}

impl Medium {
    /// Create a medium losing each attempt with probability `loss`
    pub fn new(loss: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let loss = if loss.is_finite() { loss.clamp(0.0, 1.0) } else { 0.0 };

        Self {
            state: Arc::new(Mutex::new(State {
                rng,
                loss,
                open: BTreeSet::new(),
                in_flight: BTreeMap::new(),
                stats: MediumStats::default(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a transport for `addr`
    pub fn attach(&self, addr: NodeAddr) -> SimTransport {
        self.lock().open.insert(addr);
        SimTransport {
            addr,
            medium: self.clone(),
        }
    }

    /// Attempt accounting so far
    pub fn stats(&self) -> MediumStats {
        self.lock().stats
    }

    /// Number of sends waiting to be resolved
    pub fn pending(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn submit(&self, from: NodeAddr, to: NodeAddr, payload: Bytes, max_retries: u8) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.open.contains(&from) {
            return Err(TransportError::Closed);
        }
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        if state.in_flight.contains_key(&from) {
            return Err(TransportError::Busy);
        }

        trace!("Node {} queued {} bytes for {}", from, payload.len(), to);
        state.in_flight.insert(
            from,
            InFlight {
                to,
                payload,
                max_retries,
            },
        );
        Ok(())
    }

    fn is_in_flight(&self, addr: NodeAddr) -> bool {
        self.lock().in_flight.contains_key(&addr)
    }

    fn detach(&self, addr: NodeAddr) {
        let mut state = self.lock();
        state.open.remove(&addr);
        state.in_flight.remove(&addr);
    }

    /// Resolve every in-flight send and return the resulting events, per node.
    ///
    /// Receptions come before the completion reported to their sender.
    pub fn pump(&self) -> Vec<(NodeAddr, TransportEvent)> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let in_flight = std::mem::take(&mut state.in_flight);
        let mut events = Vec::with_capacity(in_flight.len() * 2);

        for (from, send) in in_flight {
            let reachable = state.open.contains(&send.to);
            let mut delivered = None;

            for attempt in 0..=send.max_retries {
                state.stats.attempts += 1;
                if reachable && !state.rng.gen_bool(state.loss) {
                    delivered = Some(attempt);
                    break;
                }
                state.stats.lost += 1;
            }

            match delivered {
                Some(retries) => {
                    state.stats.delivered += 1;
                    debug!("Node {} delivered {} bytes to {} after {} retries", from, send.payload.len(), send.to, retries);
                    events.push((
                        send.to,
                        TransportEvent::Received {
                            from,
                            payload: send.payload,
                        },
                    ));
                    events.push((from, TransportEvent::Sent { to: send.to, retries }));
                }
                None => {
                    state.stats.timed_out += 1;
                    warn!("Node {} gave up on {} after {} retries", from, send.to, send.max_retries);
                    events.push((
                        from,
                        TransportEvent::TimedOut {
                            to: send.to,
                            retries: send.max_retries,
                        },
                    ));
                }
            }
        }

        events
    }
}

/// One node's transport on a [`Medium`]
#[derive(Debug)]
pub struct SimTransport {
    addr: NodeAddr,
    medium: Medium,
}

impl SimTransport {
    /// Address of this node
    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    /// Like [`Transport::send`], with the refusal reason
    pub fn try_send(&mut self, to: NodeAddr, payload: Bytes, max_retries: u8) -> Result<(), TransportError> {
        self.medium.submit(self.addr, to, payload, max_retries)
    }
}

impl Transport for SimTransport {
    fn send(&mut self, to: NodeAddr, payload: Bytes, max_retries: u8) -> bool {
        match self.try_send(to, payload, max_retries) {
            Ok(()) => true,
            Err(err) => {
                debug!("Node {} send to {} refused: {}", self.addr, to, err);
                false
            }
        }
    }

    fn is_busy(&self) -> bool {
        self.medium.is_in_flight(self.addr)
    }

    fn close(&mut self) {
        self.medium.detach(self.addr);
    }
}
