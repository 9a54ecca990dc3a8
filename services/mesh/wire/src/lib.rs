//! Frame, segment and record codec for mesh aggregation traffic.
//!
//! Every node flushes the combined records of all its accumulators to its
//! parent in a single transport payload. This crate owns the byte layout of
//! that payload: building it from per-accumulator segments, and handing each
//! accumulator back its own segment on the receiving side.
//!
//! ## Wire Format
//!
//! All fields are unsigned bytes.
//!
//! ```text
//! Frame   := urgency(1) segmentCount(1) Segment*
//! Segment := ownerId(1) segLen(1) Record*      segLen includes its own header
//! Record  := keyLen(1) valueLen(1) key value   keyLen + valueLen <= 255
//! ```
//!
//! Total frame size is bounded by the transport payload (128 bytes by default).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod header;
pub mod record;
pub mod segment;

// Re-export main types
pub use error::WireError;
pub use frame::{Frame, FrameBuilder, SegmentScan};
pub use header::{
    FrameHeader, SegmentHeader, Urgency, DEFAULT_MAX_PAYLOAD, FRAME_HEADER_SIZE, MAX_FIELD_LEN,
    MIN_FRAME_SIZE, RECORD_HEADER_SIZE, SEGMENT_HEADER_SIZE,
};
pub use record::{check_lengths, encode_record, encoded_len, RecordDecoder, RecordRef};
pub use segment::{Segment, SegmentWriter};
