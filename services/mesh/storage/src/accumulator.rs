//! Per-job record store with map/reduce hooks and the segment codec.
//!
//! An accumulator keeps at most one record per distinct key. New facts enter
//! through [`Accumulator::sow`], which runs the job's map hook; every record
//! the hook produces is merged into the store by [`Accumulator::emit`], which
//! either inserts a fresh copy or folds the value into the existing record
//! with the job's reduce hook. Records from children arrive the same way via
//! [`Accumulator::feed`].
//!
//! Record lifecycle: stored, then `PENDING_ACK` once gathered into a frame,
//! then removed by [`Accumulator::cleanup`] when the transport confirms the
//! send. A stored record may also be removed directly by cleanup on teardown.

use crate::counters::Counters;
use crate::ledger::MemoryLedger;
use crate::record::{Record, RecordFlags};
use crate::StoreError;
use mesh_wire::{RecordRef, Segment, SegmentHeader, SegmentWriter};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Flush interval an accumulator declares unless told otherwise
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(30);

/// Records produced by one map invocation
pub type MapOutput = SmallVec<[Record; 2]>;

/// Job-specific map and reduce hooks
pub trait Combiner: Send {
    /// Turn one sensed fact into zero or more records
    fn map(&self, key: &[u8], value: &[u8], out: &mut MapOutput);

    /// Fold `incoming` into the value of `existing`.
    ///
    /// Records from children and local sensing interleave arbitrarily, so the
    /// fold must not depend on arrival order.
    fn reduce(&self, existing: &mut Record, incoming: &[u8]);
}

/// Outcome of a successful emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
    /// The key was new; a copy of the candidate was stored
    Inserted,
    /// The key existed; the candidate's value was reduced into it
    Merged,
}

/// One aggregation job's record store
pub struct Accumulator {
    id: u8,
    records: VecDeque<Record>,
    combiner: Box<dyn Combiner>,
    interval: Duration,
    ledger: Arc<MemoryLedger>,
    counters: Arc<Counters>,
}

impl Accumulator {
    /// Create an unbound accumulator with its own unbounded ledger
    pub fn new<C: Combiner + 'static>(id: u8, combiner: C) -> Self {
        Self {
            id,
            records: VecDeque::new(),
            combiner: Box::new(combiner),
            interval: DEFAULT_FLUSH_INTERVAL,
            ledger: Arc::new(MemoryLedger::unbounded()),
            counters: Arc::new(Counters::new()),
        }
    }

    /// Set the nominal flush interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Wire demux id
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Nominal flush interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Ledger currently charged for this store
    pub fn ledger(&self) -> &Arc<MemoryLedger> {
        &self.ledger
    }

    /// Counters currently incremented by this store
    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Move this store's charge onto `ledger` and report to `counters` from now on
    pub fn attach(&mut self, ledger: Arc<MemoryLedger>, counters: Arc<Counters>) {
        let held = self.footprint();
        self.ledger.refund(held);
        ledger.force_charge(held);
        self.ledger = ledger;
        self.counters = counters;
    }

    /// Return to a private ledger and counters
    pub fn detach(&mut self) {
        self.attach(Arc::new(MemoryLedger::unbounded()), Arc::new(Counters::new()));
    }

    /// Bytes this store is charged for
    pub fn footprint(&self) -> usize {
        self.records.iter().map(Record::footprint).sum()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Stored records in traversal order
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    /// First record whose key equals `key`
    pub fn find(&self, key: &[u8]) -> Option<&Record> {
        self.records.iter().find(|record| record.matches(key))
    }

    /// Mutable lookup by key
    pub fn find_mut(&mut self, key: &[u8]) -> Option<&mut Record> {
        self.records.iter_mut().find(|record| record.matches(key))
    }

    /// Insert-or-combine `candidate` into the store
    pub fn emit(&mut self, candidate: &Record) -> Result<Emitted, StoreError> {
        self.counters.record_emit();

        if let Some(existing) = self
            .records
            .iter_mut()
            .find(|record| record.matches(candidate.key()))
        {
            self.combiner.reduce(existing, candidate.value());
            if candidate.is_urgent() {
                existing.set_flags(RecordFlags::URGENT);
            }
            self.counters.record_reduce();
            trace!(accumulator = self.id, key = ?candidate.key(), "merged record");
            return Ok(Emitted::Merged);
        }

        self.ledger.charge(candidate.footprint())?;

        let mut stored = candidate.clone();
        stored.clear_flags(RecordFlags::PENDING_ACK);
        stored.set_flags(RecordFlags::STORED);
        self.records.push_front(stored);

        trace!(accumulator = self.id, key = ?candidate.key(), "inserted record");
        Ok(Emitted::Inserted)
    }

    /// Feed one new fact through the map hook; returns how many records it stored
    pub fn sow(&mut self, key: &[u8], value: &[u8]) -> usize {
        self.counters.record_map();

        let mut out = MapOutput::new();
        self.combiner.map(key, value, &mut out);

        let mut stored = 0;
        for record in &out {
            match self.emit(record) {
                Ok(_) => stored += 1,
                Err(err) => {
                    warn!(accumulator = self.id, error = %err, "dropping mapped record");
                }
            }
        }
        stored
    }

    /// Serialize ready records into `buf` as one segment.
    ///
    /// Only whole records are written, in traversal order, stopping at the
    /// first that does not fit. Records already awaiting confirmation are
    /// skipped, as are non-urgent records when `urgent_only` is set. Every
    /// written record is marked `PENDING_ACK` but stays stored. Returns the
    /// segment length, or 0 if nothing was written.
    pub fn gather(&mut self, buf: &mut [u8], urgent_only: bool) -> usize {
        let Some(mut writer) = SegmentWriter::new(buf, self.id) else {
            return 0;
        };

        for record in self.records.iter_mut() {
            if record.is_pending() || (urgent_only && !record.is_urgent()) {
                continue;
            }
            if !writer.push(record.key(), record.value()) {
                break;
            }
            record.set_flags(RecordFlags::PENDING_ACK);
        }

        let records = writer.records();
        let written = writer.finish();
        debug!(accumulator = self.id, records, len = written, urgent_only, "gathered segment");
        written
    }

    /// Decode the segment at the front of `buf` and emit its records.
    ///
    /// Returns 0 without touching the store when the segment is addressed to
    /// another accumulator (or `buf` is too short to tell). Returns `buf.len()`
    /// without applying anything when a declared length overruns its bounds.
    /// Otherwise returns the segment length. Records are tagged urgent when
    /// `urgent` is set.
    pub fn feed(&mut self, buf: &[u8], urgent: bool) -> usize {
        let Ok(header) = SegmentHeader::decode(buf) else {
            return 0;
        };
        if header.owner_id != self.id {
            return 0;
        }

        let decoded = Segment::parse(buf).and_then(|segment| {
            segment
                .records()
                .collect::<Result<SmallVec<[RecordRef<'_>; 8]>, _>>()
        });
        let incoming = match decoded {
            Ok(incoming) => incoming,
            Err(err) => {
                warn!(accumulator = self.id, len = buf.len(), error = %err, "discarding malformed segment");
                return buf.len();
            }
        };

        for wire in incoming {
            let mut record = match Record::try_from(wire) {
                Ok(record) => record,
                Err(err) => {
                    warn!(accumulator = self.id, error = %err, "skipping undecodable record");
                    continue;
                }
            };
            if urgent {
                record.set_flags(RecordFlags::URGENT);
            }
            if let Err(err) = self.emit(&record) {
                warn!(accumulator = self.id, error = %err, "dropping fed record");
            }
        }

        header.declared_len()
    }

    /// Remove every record whose flags intersect `filter`; returns how many
    pub fn cleanup(&mut self, filter: RecordFlags) -> usize {
        let before = self.records.len();
        let mut released = 0;
        self.records.retain(|record| {
            if record.intersects(filter) {
                released += record.footprint();
                false
            } else {
                true
            }
        });
        self.ledger.refund(released);
        before - self.records.len()
    }

    /// Count records whose flags intersect `filter`
    pub fn size(&self, filter: RecordFlags) -> usize {
        self.records
            .iter()
            .filter(|record| record.intersects(filter))
            .count()
    }

    /// Make every pending record eligible for gathering again; returns how many
    pub fn release_pending(&mut self) -> usize {
        let mut released = 0;
        for record in self.records.iter_mut().filter(|record| record.is_pending()) {
            record.clear_flags(RecordFlags::PENDING_ACK);
            released += 1;
        }
        released
    }
}

impl Drop for Accumulator {
    fn drop(&mut self) {
        self.ledger.refund(self.footprint());
    }
}

impl fmt::Debug for Accumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Accumulator")
            .field("id", &self.id)
            .field("records", &self.records)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}
