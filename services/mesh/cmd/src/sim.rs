//! A line of nodes sharing one simulated radio.
//!
//! Node 0 is the sink; node `i` hears nodes `i - 1` and `i + 1`. The driver
//! calls into the simulation from its timers; every call runs to completion.

use crate::config::SimConfig;
use crate::workload::{
    Collect, CollectKey, CollectValue, Detect, Detection, COLLECT_JOB, DETECT_JOB, SENSOR_TEMP,
};
use anyhow::Result;
use mesh_routing::AggregationTree;
use mesh_session::{Medium, MediumStats};
use mesh_storage::{Accumulator, Stats};
use mesh_topology::{Beacons, NodeAddr};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::debug;

/// What reached the sink
#[derive(Debug, Default)]
pub struct Results {
    readings: BTreeMap<CollectKey, CollectValue>,
    detections: BTreeSet<Detection>,
}

impl Results {
    fn record(&mut self, job: u8, key: &[u8], value: &[u8]) {
        match job {
            COLLECT_JOB => match (CollectKey::from_bytes(key), CollectValue::from_bytes(value)) {
                (Some(key), Some(value)) => self.readings.entry(key).or_default().merge(&value),
                _ => component_warn!("sink", "Undecodable collect record ({} byte key, {} byte value)", key.len(), value.len()),
            },
            DETECT_JOB => match Detection::from_bytes(key) {
                Some(detection) => {
                    component_info!("sink", "Animal {} sighted at second {}", detection.animal, detection.second);
                    self.detections.insert(detection);
                }
                None => component_warn!("sink", "Undecodable detection ({} byte key)", key.len()),
            },
            other => debug!("Sink ignoring record for unknown job {}", other),
        }
    }
}

/// Per-node outcome
#[derive(Debug, Serialize)]
pub struct NodeSummary {
    pub addr: NodeAddr,
    pub hop: u8,
    pub parent: Option<NodeAddr>,
    pub throttled: u64,
    pub stats: Stats,
}

/// One collect window as seen by the sink
#[derive(Debug, Serialize)]
pub struct ReadingRow {
    #[serde(flatten)]
    pub key: CollectKey,
    pub count: u16,
    pub mean: f64,
    pub variance: f64,
}

/// Final report printed on exit
#[derive(Debug, Serialize)]
pub struct Summary {
    pub nodes: Vec<NodeSummary>,
    pub medium: MediumStats,
    pub readings: Vec<ReadingRow>,
    pub detections: Vec<Detection>,
}

/// Simulated deployment
pub struct Simulation {
    medium: Medium,
    beacons: Beacons,
    trees: Vec<AggregationTree>,
    next_flush: Vec<Option<Instant>>,
    rng: StdRng,
    results: Arc<Mutex<Results>>,
    detect: bool,
    detect_rate: f64,
}

impl Simulation {
    /// Build the line and bind the jobs on every node
    pub fn new(config: &SimConfig, now: Instant) -> Result<Self> {
        let medium = Medium::new(config.loss, config.seed);
        let beacons = Beacons::line(config.nodes);
        let results = Arc::new(Mutex::new(Results::default()));
        let mut trees = Vec::with_capacity(usize::from(config.nodes));

        for i in 0..config.nodes {
            let addr = NodeAddr(i);
            let mut tree_config = config.tree.clone();
            tree_config.seed = config.seed.map(|seed| seed.wrapping_add(u64::from(i) + 1));

            let mut tree = AggregationTree::open(addr, i == 0, medium.attach(addr), beacons.handle(addr), tree_config);
            if i == 0 {
                let results = Arc::clone(&results);
                tree = tree.with_sink_handler(move |job, key, value| {
                    results
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .record(job, key, value);
                });
            }

            let x = (i & 0xff) as u8;
            tree.bind(
                Accumulator::new(COLLECT_JOB, Collect::new(x, 0, now, config.window()))
                    .with_interval(config.flush_interval()),
            )?;
            if config.detect {
                tree.bind(Accumulator::new(DETECT_JOB, Detect::new(now)).with_interval(config.flush_interval()))?;
            }
            trees.push(tree);
        }

        let next_flush = trees
            .iter_mut()
            .map(|tree| tree.next_flush_delay().map(|delay| now + delay))
            .collect();
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        component_info!("sim", "Built {} nodes (loss {}, detect {})", config.nodes, config.loss, config.detect);
        Ok(Self {
            medium,
            beacons,
            trees,
            next_flush,
            rng,
            results,
            detect: config.detect,
            detect_rate: config.detect_rate,
        })
    }

    fn tree_mut(&mut self, addr: NodeAddr) -> Option<&mut AggregationTree> {
        self.trees.get_mut(usize::from(addr.0))
    }

    /// One discovery round
    pub fn discover(&mut self) {
        for (node, event) in self.beacons.tick() {
            if let Some(tree) = self.tree_mut(node) {
                tree.handle_topology(event);
            }
        }
    }

    /// Every sensor node takes a reading, and maybe sights something
    pub fn sense(&mut self) {
        for tree in self.trees.iter_mut().filter(|tree| !tree.is_sink()) {
            let reading = self.rng.gen_range(15i8..=25);
            if let Err(e) = tree.sow(COLLECT_JOB, &[SENSOR_TEMP], &[reading as u8]) {
                component_warn!("sim", "Node {} reading dropped: {}", tree.addr(), e);
            }

            if self.detect && self.rng.gen_bool(self.detect_rate) {
                let animal = self.rng.gen_range(1u8..=5);
                component_debug!("sim", "Node {} sighted animal {}", tree.addr(), animal);
                if tree.sow(DETECT_JOB, &[], &[animal]).is_ok() {
                    tree.flush(true);
                }
            }
        }
    }

    /// Run the periodic flush of every node whose deadline passed; returns sends issued
    pub fn flush_due(&mut self, now: Instant) -> usize {
        let mut issued = 0;
        for (tree, deadline) in self.trees.iter_mut().zip(self.next_flush.iter_mut()) {
            if deadline.is_some_and(|at| at <= now) {
                if tree.flush(false) {
                    issued += 1;
                }
                *deadline = tree.next_flush_delay().map(|delay| now + delay);
            }
        }
        issued
    }

    /// Resolve the radio until it goes quiet; returns events delivered
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        loop {
            let events = self.medium.pump();
            if events.is_empty() {
                return delivered;
            }
            delivered += events.len();
            for (node, event) in events {
                if let Some(tree) = self.tree_mut(node) {
                    tree.handle_transport(event);
                }
            }
        }
    }

    /// Log one stats line per node
    pub fn log_stats(&self) {
        for tree in &self.trees {
            component_info!("stats", "node={} hop={} {}", tree.addr(), tree.hop(), tree.stats());
        }
        let medium = self.medium.stats();
        component_info!(
            "stats",
            "medium attempts={} lost={} delivered={} timedout={}",
            medium.attempts,
            medium.lost,
            medium.delivered,
            medium.timed_out
        );
    }

    /// Drain the sink, close every node, and report
    pub fn finish(mut self) -> Summary {
        if let Some(sink) = self.trees.first_mut() {
            sink.flush(false);
        }

        let nodes = self
            .trees
            .iter()
            .map(|tree| NodeSummary {
                addr: tree.addr(),
                hop: tree.hop(),
                parent: tree.parent(),
                throttled: tree.throttled(),
                stats: tree.stats(),
            })
            .collect();
        for tree in self.trees.iter_mut() {
            tree.close();
        }

        let results = std::mem::take(&mut *self.results.lock().unwrap_or_else(PoisonError::into_inner));
        Summary {
            nodes,
            medium: self.medium.stats(),
            readings: results
                .readings
                .into_iter()
                .map(|(key, value)| ReadingRow {
                    key,
                    count: value.count,
                    mean: value.mean(),
                    variance: value.variance(),
                })
                .collect(),
            detections: results.detections.into_iter().collect(),
        }
    }
}
