//! Fixed two-byte headers for frames and segments.
//!
//! Every length field on the wire is a single unsigned byte, so a segment
//! (header included) can never describe more than 255 bytes.

use bytes::{Buf, BufMut};

/// Frame header size in bytes (urgency, segment count)
pub const FRAME_HEADER_SIZE: usize = 2;

/// Segment header size in bytes (owner id, segment length)
pub const SEGMENT_HEADER_SIZE: usize = 2;

/// Record header size in bytes (key length, value length)
pub const RECORD_HEADER_SIZE: usize = 2;

/// Largest value any single-byte length field can carry
pub const MAX_FIELD_LEN: usize = u8::MAX as usize;

/// Default transport payload size
pub const DEFAULT_MAX_PAYLOAD: usize = 128;

/// Smallest frame worth handing to the transport: one segment holding one record
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_SIZE + SEGMENT_HEADER_SIZE + RECORD_HEADER_SIZE;

/// Priority class carried in the first frame byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    /// Periodic flush
    Periodic = 0,
    /// Urgent flush, sent ahead of the schedule
    Urgent = 1,
}

impl Urgency {
    /// Any non-zero byte reads as urgent
    pub fn from_byte(value: u8) -> Self {
        if value == 0 {
            Urgency::Periodic
        } else {
            Urgency::Urgent
        }
    }

    /// Whether this is the urgent class
    pub fn is_urgent(self) -> bool {
        self == Urgency::Urgent
    }
}

impl From<bool> for Urgency {
    fn from(urgent: bool) -> Self {
        if urgent {
            Urgency::Urgent
        } else {
            Urgency::Periodic
        }
    }
}

/// Frame header: `urgency(1) segmentCount(1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Priority class of the whole frame
    pub urgency: Urgency,
    /// Number of segments that follow
    pub segment_count: u8,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(urgency: Urgency, segment_count: u8) -> Self {
        Self {
            urgency,
            segment_count,
        }
    }

    /// Encode the header
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.urgency as u8);
        buf.put_u8(self.segment_count);
    }

    /// Decode the header from the front of `buf`
    pub fn decode(mut buf: &[u8]) -> Result<Self, crate::WireError> {
        if buf.len() < FRAME_HEADER_SIZE {
            return Err(crate::WireError::Incomplete);
        }

        let urgency = Urgency::from_byte(buf.get_u8());
        let segment_count = buf.get_u8();

        Ok(Self {
            urgency,
            segment_count,
        })
    }
}

/// Segment header: `ownerId(1) segLen(1)`, where `segLen` counts the header itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// Id of the accumulator this segment is addressed to
    pub owner_id: u8,
    /// Declared segment length, header included
    pub len: u8,
}

impl SegmentHeader {
    /// Create a new segment header
    pub fn new(owner_id: u8, len: u8) -> Self {
        Self { owner_id, len }
    }

    /// Declared length as usize
    pub fn declared_len(&self) -> usize {
        self.len as usize
    }

    /// Length of the records area
    pub fn body_len(&self) -> usize {
        self.declared_len().saturating_sub(SEGMENT_HEADER_SIZE)
    }

    /// Encode the header
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.owner_id);
        buf.put_u8(self.len);
    }

    /// Decode the header from the front of `buf`
    pub fn decode(mut buf: &[u8]) -> Result<Self, crate::WireError> {
        if buf.len() < SEGMENT_HEADER_SIZE {
            return Err(crate::WireError::Incomplete);
        }

        let owner_id = buf.get_u8();
        let len = buf.get_u8();

        Ok(Self { owner_id, len })
    }

    /// Check the declared length against the bytes actually available
    pub fn validate(&self, available: usize) -> Result<(), crate::WireError> {
        if self.declared_len() < SEGMENT_HEADER_SIZE {
            return Err(crate::WireError::Malformed);
        }

        if self.declared_len() > available {
            return Err(crate::WireError::SegmentOverrun {
                declared: self.declared_len(),
                available,
            });
        }

        Ok(())
    }
}
