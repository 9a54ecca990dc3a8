//! One node's attachment to the collection tree.

use crate::config::TreeConfig;
use crate::schedule::FlushSchedule;
use crate::throttle::CongestionGate;
use crate::TreeError;
use mesh_session::{Transport, TransportEvent};
use mesh_storage::{Accumulator, Counters, MemoryLedger, RecordFlags, Stats};
use mesh_topology::{Gradient, NodeAddr, Topology, TopologyEvent};
use mesh_wire::{Frame, FrameBuilder, Urgency};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Consumer of records reaching the sink: `(accumulator id, key, value)`
pub type SinkHandler = Box<dyn FnMut(u8, &[u8], &[u8]) + Send>;

/// Aggregation tree node
pub struct AggregationTree {
    addr: NodeAddr,
    gradient: Gradient,
    accumulators: Vec<Accumulator>,
    transport: Box<dyn Transport>,
    topology: Box<dyn Topology>,
    ledger: Arc<MemoryLedger>,
    counters: Arc<Counters>,
    config: TreeConfig,
    gate: CongestionGate,
    schedule: FlushSchedule,
    rng: StdRng,
    sink_handler: Option<SinkHandler>,
    closed: bool,
}

impl AggregationTree {
    /// Open a tree node and start advertising its hop count.
    ///
    /// The sink starts routed at hop 0; every other node starts unrouted and
    /// waits for a neighbour with a lower hop count.
    pub fn open<T, P>(addr: NodeAddr, is_sink: bool, transport: T, topology: P, config: TreeConfig) -> Self
    where
        T: Transport + 'static,
        P: Topology + 'static,
    {
        let gradient = Gradient::new(is_sink);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut tree = Self {
            addr,
            gradient,
            accumulators: Vec::new(),
            transport: Box::new(transport),
            topology: Box::new(topology),
            ledger: Arc::new(MemoryLedger::new(config.ram_limit)),
            counters: Arc::new(Counters::new()),
            config,
            gate: CongestionGate::new(),
            schedule: FlushSchedule::new(is_sink),
            rng,
            sink_handler: None,
            closed: false,
        };

        tree.topology.start(tree.gradient.advertised());
        info!("Node {} opened as {} (advertising hop {})", addr, if is_sink { "sink" } else { "node" }, tree.gradient.advertised());
        tree
    }

    /// Register the consumer of records reaching the sink
    pub fn with_sink_handler<F>(mut self, handler: F) -> Self
    where
        F: FnMut(u8, &[u8], &[u8]) + Send + 'static,
    {
        self.sink_handler = Some(Box::new(handler));
        self
    }

    /// Attach an accumulator; its records are charged to this tree from now on
    pub fn bind(&mut self, mut accumulator: Accumulator) -> Result<(), TreeError> {
        if self.closed {
            return Err(TreeError::Closed);
        }
        if self.accumulator(accumulator.id()).is_some() {
            return Err(TreeError::DuplicateAccumulator(accumulator.id()));
        }

        accumulator.attach(Arc::clone(&self.ledger), Arc::clone(&self.counters));
        debug!("Node {} bound accumulator {} ({} records)", self.addr, accumulator.id(), accumulator.len());
        self.accumulators.push(accumulator);
        Ok(())
    }

    /// Detach an accumulator and hand it back with its records
    pub fn unbind(&mut self, id: u8) -> Option<Accumulator> {
        let index = self.accumulators.iter().position(|acc| acc.id() == id)?;
        let mut accumulator = self.accumulators.remove(index);
        accumulator.detach();
        debug!("Node {} unbound accumulator {}", self.addr, id);
        Some(accumulator)
    }

    /// Feed a new fact to a bound accumulator; returns how many records it stored
    pub fn sow(&mut self, id: u8, key: &[u8], value: &[u8]) -> Result<usize, TreeError> {
        self.accumulator_mut(id)
            .map(|acc| acc.sow(key, value))
            .ok_or(TreeError::UnknownAccumulator(id))
    }

    /// Push ready records one hop toward the sink.
    ///
    /// Returns true iff a send was issued. Nothing is lost when it returns
    /// false: records stay queued for the next attempt.
    pub fn flush(&mut self, urgent: bool) -> bool {
        if self.closed {
            return false;
        }

        if self.gradient.is_sink() {
            self.consume();
            return false;
        }

        let Some(parent) = self.gradient.parent() else {
            debug!("Node {} flush skipped: no parent", self.addr);
            return false;
        };

        if self.transport.is_busy() {
            debug!("Node {} flush skipped: transport busy", self.addr);
            return false;
        }

        if urgent
            && self
                .gate
                .should_skip(self.counters.timed_out(), self.counters.sent(), &mut self.rng)
        {
            return false;
        }

        let mut frame = FrameBuilder::new(Urgency::from(urgent), self.config.max_payload);
        for accumulator in self.accumulators.iter_mut() {
            frame.append_segment(|buf| accumulator.gather(buf, urgent));
        }

        if !frame.is_worth_sending() {
            trace!("Node {} has nothing to flush (urgent={})", self.addr, urgent);
            return false;
        }

        let segments = frame.segment_count();
        let payload = frame.finish();
        let len = payload.len();
        if !self.transport.send(parent, payload, self.config.max_retries) {
            warn!("Node {} send of {} bytes to {} rejected", self.addr, len, parent);
            self.release_pending();
            return false;
        }

        info!("Node {} sent {} bytes ({} segments, urgent={}) to {}", self.addr, len, segments, urgent, parent);
        true
    }

    /// Hand every stored record to the sink consumer and purge it
    fn consume(&mut self) {
        for accumulator in self.accumulators.iter_mut() {
            match self.sink_handler.as_mut() {
                Some(handler) => {
                    for record in accumulator.iter() {
                        handler(accumulator.id(), record.key(), record.value());
                    }
                }
                None => {
                    for record in accumulator.iter() {
                        debug!("Sink {} consumed {:?} => {:?} from accumulator {}", self.addr, record.key(), record.value(), accumulator.id());
                    }
                }
            }
            accumulator.cleanup(RecordFlags::all());
        }
    }

    fn release_pending(&mut self) {
        let released: usize = self
            .accumulators
            .iter_mut()
            .map(Accumulator::release_pending)
            .sum();
        if released > 0 {
            debug!("Node {} re-armed {} pending records", self.addr, released);
        }
    }

    /// React to a transport notification
    pub fn handle_transport(&mut self, event: TransportEvent) {
        if self.closed {
            return;
        }

        match event {
            TransportEvent::Sent { to, retries } => {
                self.counters.record_sent();
                let confirmed: usize = self
                    .accumulators
                    .iter_mut()
                    .map(|acc| acc.cleanup(RecordFlags::PENDING_ACK))
                    .sum();
                debug!("Node {} frame to {} confirmed after {} retries ({} records released)", self.addr, to, retries, confirmed);
            }
            TransportEvent::TimedOut { to, retries } => {
                self.counters.record_timeout();
                info!("Node {} frame to {} timed out after {} retries", self.addr, to, retries);
                self.release_pending();
            }
            TransportEvent::Received { from, payload } => {
                self.counters.record_received();
                self.receive(from, &payload);
                self.flush(true);
            }
        }
    }

    fn receive(&mut self, from: NodeAddr, payload: &[u8]) {
        let frame = match Frame::parse(payload) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Node {} dropping frame from {}: {}", self.addr, from, err);
                return;
            }
        };

        debug!("Node {} received {} bytes from {} (urgent={})", self.addr, payload.len(), from, frame.is_urgent());
        for accumulator in self.accumulators.iter_mut() {
            let segment = frame.segment_for(accumulator.id());
            if segment.is_empty() {
                trace!("Node {} frame from {} has nothing for accumulator {}", self.addr, from, accumulator.id());
                continue;
            }
            accumulator.feed(segment, frame.is_urgent());
        }
    }

    /// React to a discovery notification
    pub fn handle_topology(&mut self, event: TopologyEvent) {
        if self.closed {
            return;
        }

        match event {
            TopologyEvent::NeighborFound { addr, hop } => {
                if self.gradient.consider(addr, hop) {
                    self.topology.set_advertised_hop(self.gradient.advertised());
                }
            }
            TopologyEvent::QueryTick => self.counters.record_cycle(),
        }
    }

    /// Delay until the next periodic flush, `None` at the sink or with nothing bound
    pub fn next_flush_delay(&mut self) -> Option<Duration> {
        let intervals = self.accumulators.iter().map(Accumulator::interval);
        self.schedule.next_delay(intervals, &mut self.rng)
    }

    /// Purge every record and stop discovery and transport
    pub fn close(&mut self) {
        if self.closed {
            return;
        }

        for accumulator in self.accumulators.iter_mut() {
            accumulator.cleanup(RecordFlags::all());
        }
        self.topology.close();
        self.transport.close();
        self.closed = true;
        info!("Node {} closed", self.addr);
    }

    /// Node address
    pub fn addr(&self) -> NodeAddr {
        self.addr
    }

    /// Whether this node is the sink
    pub fn is_sink(&self) -> bool {
        self.gradient.is_sink()
    }

    /// Current hop count
    pub fn hop(&self) -> u8 {
        self.gradient.hop()
    }

    /// Current parent
    pub fn parent(&self) -> Option<NodeAddr> {
        self.gradient.parent()
    }

    /// Discovery rounds seen
    pub fn cycles(&self) -> u64 {
        self.counters.cycles()
    }

    /// Number of bound accumulators
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    /// Whether nothing is bound
    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Bound accumulator by id
    pub fn accumulator(&self, id: u8) -> Option<&Accumulator> {
        self.accumulators.iter().find(|acc| acc.id() == id)
    }

    /// Mutable bound accumulator by id
    pub fn accumulator_mut(&mut self, id: u8) -> Option<&mut Accumulator> {
        self.accumulators.iter_mut().find(|acc| acc.id() == id)
    }

    /// Bound accumulators
    pub fn accumulators(&self) -> impl Iterator<Item = &Accumulator> {
        self.accumulators.iter()
    }

    /// Records across all accumulators matching `filter`
    pub fn size(&self, filter: RecordFlags) -> usize {
        self.accumulators.iter().map(|acc| acc.size(filter)).sum()
    }

    /// Shared counters
    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Memory ledger shared by bound accumulators
    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    /// Active configuration
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Urgent flushes skipped by congestion backoff
    pub fn throttled(&self) -> u64 {
        self.gate.skipped()
    }

    /// Counter snapshot for the stats line
    pub fn stats(&self) -> Stats {
        self.counters.snapshot(self.ledger.allocated())
    }
}

impl fmt::Debug for AggregationTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationTree")
            .field("addr", &self.addr)
            .field("gradient", &self.gradient)
            .field("accumulators", &self.accumulators)
            .field("config", &self.config)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use mesh_storage::{Combiner, MapOutput, Record};
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct Radio {
        sent: Vec<(NodeAddr, Bytes, u8)>,
        busy: bool,
        reject: bool,
        closed: bool,
    }

    #[derive(Clone, Default)]
    struct FakeTransport(Arc<Mutex<Radio>>);

    impl FakeTransport {
        fn radio(&self) -> std::sync::MutexGuard<'_, Radio> {
            self.0.lock().unwrap()
        }

        fn complete(&self) {
            self.radio().busy = false;
        }
    }

    impl Transport for FakeTransport {
        fn send(&mut self, to: NodeAddr, payload: Bytes, max_retries: u8) -> bool {
            let mut radio = self.radio();
            if radio.reject || radio.busy {
                return false;
            }
            radio.sent.push((to, payload, max_retries));
            radio.busy = true;
            true
        }

        fn is_busy(&self) -> bool {
            self.0.lock().unwrap().busy
        }

        fn close(&mut self) {
            self.radio().closed = true;
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Start(u8),
        Advertise(u8),
        Close,
    }

    #[derive(Clone, Default)]
    struct FakeTopology(Arc<Mutex<Vec<Call>>>);

    impl FakeTopology {
        fn calls(&self) -> Vec<Call> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Topology for FakeTopology {
        fn start(&mut self, initial_hop: u8) {
            self.0.lock().unwrap().push(Call::Start(initial_hop));
        }

        fn set_advertised_hop(&mut self, hop: u8) {
            self.0.lock().unwrap().push(Call::Advertise(hop));
        }

        fn close(&mut self) {
            self.0.lock().unwrap().push(Call::Close);
        }
    }

    /// Key and value passed through, values summed
    struct Sum;

    impl Combiner for Sum {
        fn map(&self, key: &[u8], value: &[u8], out: &mut MapOutput) {
            if let Ok(record) = Record::new(key, value) {
                out.push(record);
            }
        }

        fn reduce(&self, existing: &mut Record, incoming: &[u8]) {
            existing.value_mut()[0] = existing.value()[0].wrapping_add(incoming[0]);
        }
    }

    struct Harness {
        tree: AggregationTree,
        transport: FakeTransport,
        topology: FakeTopology,
    }

    fn open(is_sink: bool) -> Harness {
        open_with(is_sink, TreeConfig { seed: Some(3), ..TreeConfig::default() })
    }

    fn open_with(is_sink: bool, config: TreeConfig) -> Harness {
        let transport = FakeTransport::default();
        let topology = FakeTopology::default();
        let addr = if is_sink { NodeAddr(0) } else { NodeAddr(2) };
        let tree = AggregationTree::open(addr, is_sink, transport.clone(), topology.clone(), config);
        Harness {
            tree,
            transport,
            topology,
        }
    }

    fn routed() -> Harness {
        let mut h = open(false);
        h.tree.handle_topology(TopologyEvent::NeighborFound { addr: NodeAddr(1), hop: 1 });
        h.tree.bind(Accumulator::new(1, Sum)).unwrap();
        h
    }

    fn sow_ab_cd(tree: &mut AggregationTree, id: u8) {
        tree.sow(id, b"A", b"B").unwrap();
        tree.sow(id, b"C", b"D").unwrap();
    }

    #[test]
    fn test_open_advertises_initial_hop() {
        let sink = open(true);
        assert_eq!(sink.topology.calls(), vec![Call::Start(1)]);
        assert!(sink.tree.is_sink());
        assert_eq!(sink.tree.hop(), 0);

        let node = open(false);
        assert_eq!(node.topology.calls(), vec![Call::Start(255)]);
        assert_eq!(node.tree.parent(), None);
        assert_eq!(node.tree.hop(), 255);
    }

    #[test]
    fn test_parent_adoption() {
        let mut h = open(false);

        h.tree.handle_topology(TopologyEvent::NeighborFound { addr: NodeAddr(7), hop: 3 });
        assert_eq!(h.tree.parent(), Some(NodeAddr(7)));
        assert_eq!(h.tree.hop(), 3);

        h.tree.handle_topology(TopologyEvent::NeighborFound { addr: NodeAddr(8), hop: 3 });
        h.tree.handle_topology(TopologyEvent::NeighborFound { addr: NodeAddr(8), hop: 6 });
        assert_eq!(h.tree.parent(), Some(NodeAddr(7)));

        h.tree.handle_topology(TopologyEvent::NeighborFound { addr: NodeAddr(9), hop: 1 });
        assert_eq!(h.tree.parent(), Some(NodeAddr(9)));
        assert_eq!(h.tree.hop(), 1);

        assert_eq!(
            h.topology.calls(),
            vec![Call::Start(255), Call::Advertise(4), Call::Advertise(2)]
        );
    }

    #[test]
    fn test_sink_keeps_hop_zero() {
        let mut h = open(true);
        h.tree.handle_topology(TopologyEvent::NeighborFound { addr: NodeAddr(4), hop: 0 });
        assert_eq!(h.tree.parent(), None);
        assert_eq!(h.tree.hop(), 0);
        assert_eq!(h.topology.calls(), vec![Call::Start(1)]);
    }

    #[test]
    fn test_query_tick_counts_cycles() {
        let mut h = open(false);
        for _ in 0..3 {
            h.tree.handle_topology(TopologyEvent::QueryTick);
        }
        assert_eq!(h.tree.cycles(), 3);
    }

    #[test]
    fn test_bind_rejects_duplicate_and_moves_charge() {
        let mut h = open(false);
        let mut acc = Accumulator::new(1, Sum);
        acc.emit(&Record::new(b"k", b"v").unwrap()).unwrap();
        let footprint = acc.footprint();

        h.tree.bind(acc).unwrap();
        assert_eq!(h.tree.ledger().allocated(), footprint);
        assert_eq!(
            h.tree.bind(Accumulator::new(1, Sum)),
            Err(TreeError::DuplicateAccumulator(1))
        );
        assert_eq!(h.tree.len(), 1);

        let acc = h.tree.unbind(1).unwrap();
        assert_eq!(acc.len(), 1);
        assert_eq!(h.tree.ledger().allocated(), 0);
        assert!(h.tree.unbind(1).is_none());
        assert!(h.tree.is_empty());
    }

    #[test]
    fn test_sow_unknown_accumulator() {
        let mut h = routed();
        assert_eq!(h.tree.sow(9, b"k", b"v"), Err(TreeError::UnknownAccumulator(9)));
        assert_eq!(h.tree.sow(1, b"k", b"v"), Ok(1));
    }

    #[test]
    fn test_flush_without_parent_keeps_data() {
        let mut h = open(false);
        h.tree.bind(Accumulator::new(1, Sum)).unwrap();
        sow_ab_cd(&mut h.tree, 1);

        assert!(!h.tree.flush(false));
        assert!(h.transport.radio().sent.is_empty());
        assert_eq!(h.tree.size(RecordFlags::all()), 2);
        assert_eq!(h.tree.size(RecordFlags::PENDING_ACK), 0);
    }

    #[test]
    fn test_flush_sends_frame_to_parent() {
        let mut h = routed();
        sow_ab_cd(&mut h.tree, 1);

        assert!(h.tree.flush(false));
        {
            let radio = h.transport.radio();
            assert_eq!(radio.sent.len(), 1);
            let (to, payload, retries) = &radio.sent[0];
            assert_eq!(*to, NodeAddr(1));
            assert_eq!(*retries, 4);
            assert_eq!(
                payload.as_ref(),
                &[0, 1, 1, 10, 1, 1, b'C', b'D', 1, 1, b'A', b'B']
            );
        }
        assert_eq!(h.tree.size(RecordFlags::PENDING_ACK), 2);

        // single in-flight send
        assert!(!h.tree.flush(false));

        h.transport.complete();
        h.tree.handle_transport(TransportEvent::Sent { to: NodeAddr(1), retries: 0 });
        assert_eq!(h.tree.size(RecordFlags::all()), 0);
        assert_eq!(h.tree.ledger().allocated(), 0);
        assert_eq!(h.tree.stats().sent, 1);
    }

    #[test]
    fn test_flush_with_nothing_ready() {
        let mut h = routed();
        assert!(!h.tree.flush(false));
        assert!(h.transport.radio().sent.is_empty());
    }

    #[test]
    fn test_records_sown_while_in_flight_survive_confirmation() {
        let mut h = routed();
        h.tree.sow(1, b"A", b"B").unwrap();
        assert!(h.tree.flush(false));

        h.tree.sow(1, b"C", b"D").unwrap();
        h.transport.complete();
        h.tree.handle_transport(TransportEvent::Sent { to: NodeAddr(1), retries: 1 });

        let acc = h.tree.accumulator(1).unwrap();
        assert_eq!(acc.len(), 1);
        assert!(acc.find(b"C").is_some());
    }

    #[test]
    fn test_timeout_regathers_same_records() {
        let mut h = routed();
        sow_ab_cd(&mut h.tree, 1);
        assert!(h.tree.flush(false));

        h.transport.complete();
        h.tree.handle_transport(TransportEvent::TimedOut { to: NodeAddr(1), retries: 4 });
        assert_eq!(h.tree.stats().timed_out, 1);
        assert_eq!(h.tree.size(RecordFlags::all()), 2);
        assert_eq!(h.tree.size(RecordFlags::PENDING_ACK), 0);

        assert!(h.tree.flush(false));
        let radio = h.transport.radio();
        assert_eq!(radio.sent.len(), 2);
        assert_eq!(radio.sent[0].1, radio.sent[1].1);
    }

    #[test]
    fn test_rejected_send_rearms_records() {
        let mut h = routed();
        sow_ab_cd(&mut h.tree, 1);
        h.transport.radio().reject = true;

        assert!(!h.tree.flush(false));
        assert_eq!(h.tree.size(RecordFlags::PENDING_ACK), 0);
        assert_eq!(h.tree.size(RecordFlags::all()), 2);
    }

    #[test]
    fn test_flush_batches_accumulators() {
        let mut h = routed();
        h.tree.bind(Accumulator::new(2, Sum)).unwrap();
        h.tree.bind(Accumulator::new(3, Sum)).unwrap();
        h.tree.sow(1, &[5], &[10]).unwrap();
        h.tree.sow(2, &[5], &[10]).unwrap();

        assert!(h.tree.flush(false));
        let radio = h.transport.radio();
        assert_eq!(
            radio.sent[0].1.as_ref(),
            &[0, 2, 1, 6, 1, 1, 5, 10, 2, 6, 1, 1, 5, 10]
        );
    }

    #[test]
    fn test_frame_respects_max_payload() {
        let config = TreeConfig {
            max_payload: 8,
            seed: Some(1),
            ..TreeConfig::default()
        };
        let mut h = open_with(false, config);
        h.tree.handle_topology(TopologyEvent::NeighborFound { addr: NodeAddr(1), hop: 0 });
        h.tree.bind(Accumulator::new(1, Sum)).unwrap();
        sow_ab_cd(&mut h.tree, 1);

        assert!(h.tree.flush(false));
        assert_eq!(h.transport.radio().sent[0].1.as_ref(), &[0, 1, 1, 6, 1, 1, b'C', b'D']);
        assert_eq!(h.tree.size(RecordFlags::PENDING_ACK), 1);

        h.transport.complete();
        h.tree.handle_transport(TransportEvent::Sent { to: NodeAddr(1), retries: 0 });
        assert!(h.tree.flush(false));
        assert_eq!(h.transport.radio().sent[1].1.as_ref(), &[0, 1, 1, 6, 1, 1, b'A', b'B']);
    }

    #[test]
    fn test_sink_consumes_instead_of_sending() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let transport = FakeTransport::default();
        let config = TreeConfig {
            seed: Some(1),
            ..TreeConfig::default()
        };
        let mut tree = AggregationTree::open(NodeAddr(0), true, transport.clone(), FakeTopology::default(), config)
            .with_sink_handler(move |id, key, value| {
                sink_seen.lock().unwrap().push((id, key.to_vec(), value.to_vec()));
            });
        tree.bind(Accumulator::new(1, Sum)).unwrap();
        sow_ab_cd(&mut tree, 1);

        assert!(!tree.flush(false));
        assert!(transport.radio().sent.is_empty());
        assert_eq!(tree.size(RecordFlags::all()), 0);
        assert_eq!(tree.ledger().allocated(), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(1, b"C".to_vec(), b"D".to_vec()), (1, b"A".to_vec(), b"B".to_vec())]
        );
        assert_eq!(tree.next_flush_delay(), None);
    }

    #[test]
    fn test_sink_without_handler_purges() {
        let mut h = open(true);
        h.tree.bind(Accumulator::new(1, Sum)).unwrap();
        h.tree.handle_transport(TransportEvent::Received {
            from: NodeAddr(1),
            payload: Bytes::from_static(&[0, 1, 1, 6, 1, 1, 5, 10]),
        });
        assert_eq!(h.tree.stats().received, 1);
        assert_eq!(h.tree.size(RecordFlags::all()), 0);
        assert!(h.transport.radio().sent.is_empty());
    }

    #[test]
    fn test_receive_urgent_feeds_and_forwards() {
        let mut h = routed();
        let payload = Bytes::from_static(&[1, 1, 1, 6, 1, 1, 5, 10]);

        h.tree.handle_transport(TransportEvent::Received { from: NodeAddr(3), payload });

        assert_eq!(h.tree.stats().received, 1);
        let radio = h.transport.radio();
        assert_eq!(radio.sent.len(), 1);
        assert_eq!(radio.sent[0].1.as_ref(), &[1, 1, 1, 6, 1, 1, 5, 10]);
    }

    #[test]
    fn test_receive_periodic_waits_for_schedule() {
        let mut h = routed();
        let payload = Bytes::from_static(&[0, 1, 1, 6, 1, 1, 5, 10]);

        h.tree.handle_transport(TransportEvent::Received { from: NodeAddr(3), payload });

        assert!(h.transport.radio().sent.is_empty());
        assert_eq!(h.tree.size(RecordFlags::STORED), 1);
        assert_eq!(h.tree.size(RecordFlags::URGENT), 0);
    }

    #[test]
    fn test_receive_merges_into_local_record() {
        let mut h = routed();
        h.tree.sow(1, &[5], &[1]).unwrap();
        let payload = Bytes::from_static(&[0, 1, 1, 6, 1, 1, 5, 10]);

        h.tree.handle_transport(TransportEvent::Received { from: NodeAddr(3), payload });

        let acc = h.tree.accumulator(1).unwrap();
        assert_eq!(acc.len(), 1);
        assert_eq!(acc.find(&[5]).unwrap().value(), &[11]);
        assert_eq!(h.tree.stats().reduce_calls, 1);
    }

    #[test]
    fn test_receive_demux_bounded_by_segment_count() {
        let mut h = routed();
        h.tree.bind(Accumulator::new(5, Sum)).unwrap();
        h.tree.bind(Accumulator::new(6, Sum)).unwrap();
        let payload = Bytes::from_static(&[0, 1, 5, 0, 6, 6, 1, 1, 5, 10, 0, 0]);

        h.tree.handle_transport(TransportEvent::Received { from: NodeAddr(3), payload });

        assert_eq!(h.tree.size(RecordFlags::all()), 0);
        assert_eq!(h.tree.stats().received, 1);
    }

    #[test]
    fn test_receive_garbage_is_absorbed() {
        let mut h = routed();
        h.tree.handle_transport(TransportEvent::Received {
            from: NodeAddr(3),
            payload: Bytes::from_static(&[1]),
        });
        h.tree.handle_transport(TransportEvent::Received {
            from: NodeAddr(3),
            payload: Bytes::from_static(&[0, 1, 1, 40, 1, 1, 5, 10]),
        });
        assert_eq!(h.tree.size(RecordFlags::all()), 0);
        assert_eq!(h.tree.stats().received, 2);
    }

    #[test]
    fn test_urgent_flush_backs_off_under_congestion() {
        let mut h = routed();
        h.tree.sow(1, &[5], &[10]).unwrap();
        h.tree.accumulator_mut(1).unwrap().find_mut(&[5]).unwrap().set_flags(RecordFlags::URGENT);
        for _ in 0..10 {
            h.tree.handle_transport(TransportEvent::TimedOut { to: NodeAddr(1), retries: 4 });
        }

        let mut sent = 0;
        for _ in 0..200 {
            if h.tree.flush(true) {
                sent += 1;
                h.transport.complete();
                h.tree.handle_transport(TransportEvent::TimedOut { to: NodeAddr(1), retries: 4 });
            }
        }
        assert!(sent > 0);
        assert!(h.tree.throttled() > 0);
        assert_eq!(sent + h.tree.throttled(), 200);

        // periodic flushes are never throttled
        assert!(h.tree.flush(false));
    }

    #[test]
    fn test_next_flush_delay_uses_shortest_interval() {
        let mut h = routed();
        assert_eq!(h.tree.unbind(1).map(|acc| acc.id()), Some(1));
        assert_eq!(h.tree.next_flush_delay(), None);

        h.tree.bind(Accumulator::new(1, Sum).with_interval(Duration::from_secs(40))).unwrap();
        h.tree.bind(Accumulator::new(2, Sum).with_interval(Duration::from_secs(8))).unwrap();
        for _ in 0..20 {
            let delay = h.tree.next_flush_delay().unwrap();
            assert!(delay >= Duration::from_secs(8));
            assert!(delay <= Duration::from_secs(10));
        }
    }

    #[test]
    fn test_ram_limit_drops_new_keys() {
        let config = TreeConfig {
            ram_limit: Some(mesh_storage::RECORD_OVERHEAD + 2),
            seed: Some(1),
            ..TreeConfig::default()
        };
        let mut h = open_with(false, config);
        h.tree.bind(Accumulator::new(1, Sum)).unwrap();

        assert_eq!(h.tree.sow(1, &[1], &[1]), Ok(1));
        assert_eq!(h.tree.sow(1, &[2], &[1]), Ok(0));
        assert_eq!(h.tree.sow(1, &[1], &[1]), Ok(1));
        assert_eq!(h.tree.size(RecordFlags::all()), 1);
    }

    #[test]
    fn test_stats_line() {
        let mut h = routed();
        h.tree.sow(1, &[1], &[1]).unwrap();
        h.tree.sow(1, &[1], &[1]).unwrap();
        h.tree.handle_topology(TopologyEvent::QueryTick);

        let line = h.tree.stats().to_string();
        assert!(line.starts_with("sent=0 recv=0 timedout=0 map=2 emit=2 reduce=1 cycles=1 ram="));
    }

    #[test]
    fn test_close_purges_and_stops() {
        let mut h = routed();
        sow_ab_cd(&mut h.tree, 1);

        h.tree.close();
        assert_eq!(h.tree.size(RecordFlags::all()), 0);
        assert_eq!(h.tree.ledger().allocated(), 0);
        assert!(h.transport.radio().closed);
        assert_eq!(h.topology.calls().last(), Some(&Call::Close));

        assert!(!h.tree.flush(false));
        assert_eq!(h.tree.bind(Accumulator::new(2, Sum)), Err(TreeError::Closed));
    }
}
