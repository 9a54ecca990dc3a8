//! Addressed segments: `ownerId(1) segLen(1) Record*`.

use crate::header::{SegmentHeader, MAX_FIELD_LEN, SEGMENT_HEADER_SIZE};
use crate::record::{encode_record, encoded_len, RecordDecoder};
use crate::WireError;

/// Writes whole records into a caller-supplied buffer and seals them with a
/// segment header.
///
/// A record that does not fit is refused entirely, never split.
#[derive(Debug)]
pub struct SegmentWriter<'a> {
    buf: &'a mut [u8],
    owner_id: u8,
    len: usize,
    limit: usize,
    records: usize,
}

impl<'a> SegmentWriter<'a> {
    /// Start a segment, or `None` when not even the header fits
    pub fn new(buf: &'a mut [u8], owner_id: u8) -> Option<Self> {
        if buf.len() < SEGMENT_HEADER_SIZE {
            return None;
        }

        let limit = buf.len().min(MAX_FIELD_LEN);
        Some(Self {
            buf,
            owner_id,
            len: SEGMENT_HEADER_SIZE,
            limit,
            records: 0,
        })
    }

    /// Whether a record of this shape still fits
    pub fn fits(&self, key_len: usize, value_len: usize) -> bool {
        self.len + encoded_len(key_len, value_len) <= self.limit
    }

    /// Append one record; returns false (and writes nothing) if it does not fit
    pub fn push(&mut self, key: &[u8], value: &[u8]) -> bool {
        if !self.fits(key.len(), value.len()) {
            return false;
        }

        let mut cursor: &mut [u8] = &mut self.buf[self.len..self.limit];
        if encode_record(&mut cursor, key, value).is_err() {
            return false;
        }

        self.len += encoded_len(key.len(), value.len());
        self.records += 1;
        true
    }

    /// Number of records written so far
    pub fn records(&self) -> usize {
        self.records
    }

    /// Seal the segment and return its length, or 0 if it holds no records
    pub fn finish(mut self) -> usize {
        if self.records == 0 {
            return 0;
        }

        let mut head: &mut [u8] = &mut self.buf[..SEGMENT_HEADER_SIZE];
        SegmentHeader::new(self.owner_id, self.len as u8).encode(&mut head);
        self.len
    }
}

/// A validated segment borrowed from a received buffer
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    /// Segment header as read from the wire
    pub header: SegmentHeader,
    body: &'a [u8],
}

impl<'a> Segment<'a> {
    /// Parse a segment at the front of `buf`, trusting nothing past its declared length
    pub fn parse(buf: &'a [u8]) -> Result<Self, WireError> {
        let header = SegmentHeader::decode(buf)?;
        header.validate(buf.len())?;

        Ok(Self {
            header,
            body: &buf[SEGMENT_HEADER_SIZE..header.declared_len()],
        })
    }

    /// Owner id of this segment
    pub fn owner_id(&self) -> u8 {
        self.header.owner_id
    }

    /// Records area, header stripped
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Iterate the records in this segment
    pub fn records(&self) -> RecordDecoder<'a> {
        RecordDecoder::new(self.body)
    }
}
