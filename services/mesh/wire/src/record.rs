//! Record layout: `keyLen(1) valueLen(1) key(keyLen) value(valueLen)`.

use crate::header::{MAX_FIELD_LEN, RECORD_HEADER_SIZE};
use crate::WireError;
use bytes::BufMut;

/// Encoded size of a record with the given key and value lengths
pub fn encoded_len(key_len: usize, value_len: usize) -> usize {
    RECORD_HEADER_SIZE + key_len + value_len
}

/// Reject key/value combinations the single-byte framing cannot describe
pub fn check_lengths(key_len: usize, value_len: usize) -> Result<(), WireError> {
    let total = key_len + value_len;
    if total > MAX_FIELD_LEN {
        return Err(WireError::Size(total));
    }
    Ok(())
}

/// Encode one record into `buf`
pub fn encode_record<B: BufMut>(buf: &mut B, key: &[u8], value: &[u8]) -> Result<(), WireError> {
    check_lengths(key.len(), value.len())?;

    let needed = encoded_len(key.len(), value.len());
    if buf.remaining_mut() < needed {
        return Err(WireError::Size(needed));
    }

    buf.put_u8(key.len() as u8);
    buf.put_u8(value.len() as u8);
    buf.put_slice(key);
    buf.put_slice(value);
    Ok(())
}

/// Borrowed view of one decoded record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordRef<'a> {
    /// Key bytes
    pub key: &'a [u8],
    /// Value bytes
    pub value: &'a [u8],
}

impl RecordRef<'_> {
    /// Encoded size of this record
    pub fn encoded_len(&self) -> usize {
        encoded_len(self.key.len(), self.value.len())
    }
}

/// Iterator over the records of a segment body.
///
/// Yields an error once and then stops if a record claims more bytes than the
/// body holds.
#[derive(Debug, Clone)]
pub struct RecordDecoder<'a> {
    body: &'a [u8],
    offset: usize,
}

impl<'a> RecordDecoder<'a> {
    /// Decode records from a segment body (header already stripped)
    pub fn new(body: &'a [u8]) -> Self {
        Self { body, offset: 0 }
    }

    /// Bytes of the body consumed so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn fuse(&mut self) {
        self.offset = self.body.len();
    }
}

impl<'a> Iterator for RecordDecoder<'a> {
    type Item = Result<RecordRef<'a>, WireError>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.body[self.offset..];
        if rest.is_empty() {
            return None;
        }

        if rest.len() < RECORD_HEADER_SIZE {
            let at = self.offset;
            self.fuse();
            return Some(Err(WireError::RecordOverrun(at)));
        }

        let key_len = rest[0] as usize;
        let value_len = rest[1] as usize;
        let total = encoded_len(key_len, value_len);
        if total > rest.len() {
            let at = self.offset;
            self.fuse();
            return Some(Err(WireError::RecordOverrun(at)));
        }

        let key = &rest[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + key_len];
        let value = &rest[RECORD_HEADER_SIZE + key_len..total];
        self.offset += total;

        Some(Ok(RecordRef { key, value }))
    }
}
