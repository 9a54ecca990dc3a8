//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer too short to hold a header
    #[error("incomplete header")]
    Incomplete,

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Declared segment length is below the segment header size
    #[error("malformed segment")]
    Malformed,

    /// Declared segment length runs past the supplied buffer
    #[error("segment overrun: declared {declared}, available {available}")]
    SegmentOverrun {
        /// Length claimed by the segment header
        declared: usize,
        /// Bytes actually supplied
        available: usize,
    },

    /// A record's key+value claim runs past its segment
    #[error("record overrun at offset {0}")]
    RecordOverrun(usize),
}
