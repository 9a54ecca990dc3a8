//! Key/value records and their lifecycle flags.

use crate::StoreError;
use bitflags::bitflags;
use mesh_wire::{check_lengths, RecordRef};

/// Fixed per-record bookkeeping charged to the memory ledger on top of the
/// key and value bytes
pub const RECORD_OVERHEAD: usize = 8;

bitflags! {
    /// Record lifecycle flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// Held by an accumulator store (and charged to its ledger)
        const STORED = 1 << 0;
        /// Sent ahead of the periodic schedule
        const URGENT = 1 << 1;
        /// Gathered into an in-flight frame, awaiting transport confirmation
        const PENDING_ACK = 1 << 2;
    }
}

/// A key/value pair stored as one contiguous buffer: key bytes immediately
/// followed by value bytes.
///
/// Key and value together never exceed 255 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    data: Box<[u8]>,
    key_len: u8,
    flags: RecordFlags,
}

impl Record {
    /// Create a record holding copies of `key` and `value`
    pub fn new(key: &[u8], value: &[u8]) -> Result<Self, StoreError> {
        check_lengths(key.len(), value.len())?;

        let mut data = Vec::with_capacity(key.len() + value.len());
        data.extend_from_slice(key);
        data.extend_from_slice(value);

        Ok(Self {
            data: data.into_boxed_slice(),
            key_len: key.len() as u8,
            flags: RecordFlags::empty(),
        })
    }

    /// Create a zero-filled record of the given shape
    pub fn zeroed(key_len: usize, value_len: usize) -> Result<Self, StoreError> {
        check_lengths(key_len, value_len)?;

        Ok(Self {
            data: vec![0u8; key_len + value_len].into_boxed_slice(),
            key_len: key_len as u8,
            flags: RecordFlags::empty(),
        })
    }

    /// Builder-style: mark the record urgent
    pub fn urgent(mut self) -> Self {
        self.flags.insert(RecordFlags::URGENT);
        self
    }

    /// Key bytes
    pub fn key(&self) -> &[u8] {
        &self.data[..self.key_len as usize]
    }

    /// Value bytes
    pub fn value(&self) -> &[u8] {
        &self.data[self.key_len as usize..]
    }

    /// Mutable key bytes
    pub fn key_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.key_len as usize]
    }

    /// Mutable value bytes, for reducers folding into this record
    pub fn value_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.key_len as usize..]
    }

    /// Key length
    pub fn key_len(&self) -> usize {
        self.key_len as usize
    }

    /// Value length
    pub fn value_len(&self) -> usize {
        self.data.len() - self.key_len as usize
    }

    /// Combined key and value length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether both key and value are empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes charged to the memory ledger while this record is stored
    pub fn footprint(&self) -> usize {
        RECORD_OVERHEAD + self.data.len()
    }

    /// Exact key equality: same length and identical bytes
    pub fn matches(&self, key: &[u8]) -> bool {
        self.key() == key
    }

    /// Current flags
    pub fn flags(&self) -> RecordFlags {
        self.flags
    }

    /// Whether any of `filter` is set
    pub fn intersects(&self, filter: RecordFlags) -> bool {
        self.flags.intersects(filter)
    }

    /// Set flags (idempotent)
    pub fn set_flags(&mut self, flags: RecordFlags) {
        self.flags.insert(flags);
    }

    /// Clear flags (idempotent)
    pub fn clear_flags(&mut self, flags: RecordFlags) {
        self.flags.remove(flags);
    }

    /// Whether the record is urgent
    pub fn is_urgent(&self) -> bool {
        self.flags.contains(RecordFlags::URGENT)
    }

    /// Whether the record is awaiting transport confirmation
    pub fn is_pending(&self) -> bool {
        self.flags.contains(RecordFlags::PENDING_ACK)
    }

    /// Borrowed wire view
    pub fn as_wire(&self) -> RecordRef<'_> {
        RecordRef {
            key: self.key(),
            value: self.value(),
        }
    }
}

impl TryFrom<RecordRef<'_>> for Record {
    type Error = StoreError;

    fn try_from(record: RecordRef<'_>) -> Result<Self, Self::Error> {
        Record::new(record.key, record.value)
    }
}
