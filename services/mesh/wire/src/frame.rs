//! Transport frames: `urgency(1) segmentCount(1) Segment*`.
//!
//! Outbound frames are assembled segment by segment with [`FrameBuilder`];
//! inbound frames are demultiplexed by owner id with [`Frame::segment_for`].

use crate::header::{
    FrameHeader, SegmentHeader, Urgency, FRAME_HEADER_SIZE, MIN_FRAME_SIZE, SEGMENT_HEADER_SIZE,
};
use bytes::{Bytes, BytesMut};

/// Outbound frame under construction, bounded by the transport payload size
#[derive(Debug)]
pub struct FrameBuilder {
    buf: BytesMut,
    max_payload: usize,
    segment_count: u8,
}

impl FrameBuilder {
    /// Create a new frame builder
    pub fn new(urgency: Urgency, max_payload: usize) -> Self {
        let mut buf = BytesMut::with_capacity(max_payload.max(FRAME_HEADER_SIZE));
        FrameHeader::new(urgency, 0).encode(&mut buf);
        Self {
            buf,
            max_payload,
            segment_count: 0,
        }
    }

    /// Bytes written so far, frame header included
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether no segment has been appended
    pub fn is_empty(&self) -> bool {
        self.segment_count == 0
    }

    /// Number of segments appended
    pub fn segment_count(&self) -> u8 {
        self.segment_count
    }

    /// Room left before the payload limit
    pub fn remaining(&self) -> usize {
        self.max_payload.saturating_sub(self.buf.len())
    }

    /// Let `fill` write one self-delimited segment into the remaining room.
    ///
    /// `fill` returns the number of bytes it wrote; 0 means it contributed
    /// nothing and the segment count is left alone.
    pub fn append_segment<F>(&mut self, fill: F) -> usize
    where
        F: FnOnce(&mut [u8]) -> usize,
    {
        if self.segment_count == u8::MAX {
            return 0;
        }

        let room = self.remaining();
        if room < SEGMENT_HEADER_SIZE {
            return 0;
        }

        let start = self.buf.len();
        self.buf.resize(start + room, 0);
        let written = fill(&mut self.buf[start..]).min(room);
        self.buf.truncate(start + written);

        if written > 0 {
            self.segment_count += 1;
        }
        written
    }

    /// Whether the frame carries at least one record
    pub fn is_worth_sending(&self) -> bool {
        self.buf.len() >= MIN_FRAME_SIZE
    }

    /// Patch the segment count and hand out the encoded frame
    pub fn finish(mut self) -> Bytes {
        self.buf[1] = self.segment_count;
        self.buf.freeze()
    }
}

/// Inbound frame borrowed from a transport payload
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    /// Frame header
    pub header: FrameHeader,
    body: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse the frame header; segments are only examined on demand
    pub fn parse(payload: &'a [u8]) -> Result<Self, crate::WireError> {
        let header = FrameHeader::decode(payload)?;
        Ok(Self {
            header,
            body: &payload[FRAME_HEADER_SIZE..],
        })
    }

    /// Whether the frame was flushed urgently
    pub fn is_urgent(&self) -> bool {
        self.header.urgency.is_urgent()
    }

    /// Scan segment headers, never past the declared segment count
    pub fn segments(&self) -> SegmentScan<'a> {
        SegmentScan {
            rest: self.body,
            remaining: self.header.segment_count,
        }
    }

    /// The frame remainder starting at the first segment addressed to
    /// `owner_id`, or an empty slice if no declared segment matches
    pub fn segment_for(&self, owner_id: u8) -> &'a [u8] {
        self.segments()
            .find(|(header, _)| header.owner_id == owner_id)
            .map(|(_, rest)| rest)
            .unwrap_or(&[])
    }
}

/// Bounded scan over `(ownerId, segLen)` pairs.
///
/// Yields each segment header together with the frame remainder starting at
/// that segment. Stops after `segmentCount` headers, or right after a header
/// whose length cannot be advanced over (shorter than a header, or past the
/// end of the frame).
#[derive(Debug, Clone)]
pub struct SegmentScan<'a> {
    rest: &'a [u8],
    remaining: u8,
}

impl<'a> Iterator for SegmentScan<'a> {
    type Item = (SegmentHeader, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let header = match SegmentHeader::decode(self.rest) {
            Ok(header) => header,
            Err(_) => {
                self.remaining = 0;
                return None;
            }
        };

        let here = self.rest;
        let step = header.declared_len();
        if step < SEGMENT_HEADER_SIZE || step > here.len() {
            tracing::trace!(
                owner_id = header.owner_id,
                declared = step,
                available = here.len(),
                "segment length cannot be advanced over, ending scan"
            );
            self.rest = &[];
            self.remaining = 0;
        } else {
            self.rest = &here[step..];
        }

        Some((header, here))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentWriter;

    fn one_record_segment(owner_id: u8, key: u8, value: u8) -> impl FnOnce(&mut [u8]) -> usize {
        move |buf: &mut [u8]| {
            let Some(mut writer) = SegmentWriter::new(buf, owner_id) else {
                return 0;
            };
            writer.push(&[key], &[value]);
            writer.finish()
        }
    }

    #[test]
    fn test_builder_batches_segments() {
        let mut builder = FrameBuilder::new(Urgency::Periodic, 128);
        assert_eq!(builder.append_segment(one_record_segment(1, 5, 10)), 6);
        assert_eq!(builder.append_segment(one_record_segment(2, 5, 10)), 6);
        assert_eq!(builder.append_segment(|_| 0), 0);
        assert_eq!(builder.segment_count(), 2);
        assert!(builder.is_worth_sending());

        let frame = builder.finish();
        assert_eq!(
            &frame[..],
            &[0, 2, 1, 6, 1, 1, 5, 10, 2, 6, 1, 1, 5, 10]
        );
    }

    #[test]
    fn test_builder_without_segments_is_not_worth_sending() {
        let builder = FrameBuilder::new(Urgency::Urgent, 128);
        assert!(builder.is_empty());
        assert!(!builder.is_worth_sending());
        assert_eq!(&builder.finish()[..], &[1, 0]);
    }

    #[test]
    fn test_builder_respects_payload_limit() {
        let mut builder = FrameBuilder::new(Urgency::Periodic, 9);
        assert_eq!(builder.append_segment(one_record_segment(1, 5, 10)), 6);
        assert_eq!(builder.remaining(), 1);
        assert_eq!(builder.append_segment(one_record_segment(2, 5, 10)), 0);
        assert_eq!(builder.len(), 8);
    }

    #[test]
    fn test_demux_finds_addressed_segment() {
        let payload = [
            0, 2, 2, 10, 1, 1, b'C', b'D', 1, 1, b'A', b'B', 1, 6, 1, 1, b'E', b'F', 0, 0, 0,
        ];
        let frame = Frame::parse(&payload).unwrap();
        assert!(!frame.is_urgent());

        assert_eq!(frame.segment_for(2), &payload[2..]);
        assert_eq!(frame.segment_for(1), &payload[12..]);
        assert!(frame.segment_for(3).is_empty());
    }

    #[test]
    fn test_demux_stops_at_segment_count() {
        // one declared segment, addressed to 5, with a zero length
        let payload = [0, 1, 5, 0, 1, 1, b'C', b'D', 1, 1, b'A', b'B'];
        let frame = Frame::parse(&payload).unwrap();

        assert_eq!(frame.segments().count(), 1);
        assert!(frame.segment_for(1).is_empty());
    }

    #[test]
    fn test_demux_ignores_segments_past_count() {
        let payload = [1, 1, 4, 6, 1, 1, b'x', b'y', 2, 6, 1, 1, b'C', b'D'];
        let frame = Frame::parse(&payload).unwrap();
        assert!(frame.is_urgent());
        assert!(frame.segment_for(2).is_empty());
        assert_eq!(frame.segment_for(4), &payload[2..]);
    }

    #[test]
    fn test_demux_on_truncated_frame() {
        let payload = [0, 3, 1];
        let frame = Frame::parse(&payload).unwrap();
        assert_eq!(frame.segments().count(), 0);
        assert!(Frame::parse(&[0]).is_err());
    }
}
