//! The record codec collaborator: the engine stores opaque bytes and
//! leaves serialization of the caller's record type to an implementation
//! of [`Encode`]/[`Decode`] supplied by the embedder.

use std::error::Error as StdError;

/// A type that can be turned into the bytes a [`crate::segment::Segment`]
/// writes to its store, and that carries a mutable offset field the
/// engine stamps on append.
pub trait Encode {
    type Error: StdError + Send + Sync + 'static;

    /// Set this record's assigned absolute offset. Called by the engine
    /// immediately before serialization on append.
    fn set_offset(&mut self, offset: u64);

    fn encode(&self) -> Result<Vec<u8>, Self::Error>;
}

/// The inverse of [`Encode`]: reconstructs a record from the bytes a
/// store entry held.
pub trait Decode: Sized {
    type Error: StdError + Send + Sync + 'static;

    fn decode(bytes: &[u8]) -> Result<Self, Self::Error>;
}

/// A minimal record type pairing an offset with an opaque payload. Used by
/// the crate's own tests and available to embedders who don't need a
/// richer record shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub value: Vec<u8>,
}

impl Record {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            offset: 0,
            value: value.into(),
        }
    }
}

/// Width, in bytes, of the offset prefix [`Record::encode`] writes ahead
/// of the payload so [`Record::decode`] can carry `offset` back to the
/// caller, matching the Go reference's protobuf `Record.Offset` field
/// riding along on the wire.
const OFFSET_WIDTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum RecordCodecError {
    #[error("record payload too short to contain an 8-byte offset prefix: got {0} bytes")]
    Truncated(usize),
}

impl Encode for Record {
    type Error = RecordCodecError;

    fn set_offset(&mut self, offset: u64) {
        self.offset = offset;
    }

    fn encode(&self) -> Result<Vec<u8>, Self::Error> {
        let mut bytes = Vec::with_capacity(OFFSET_WIDTH + self.value.len());
        bytes.extend_from_slice(&self.offset.to_be_bytes());
        bytes.extend_from_slice(&self.value);
        Ok(bytes)
    }
}

impl Decode for Record {
    type Error = RecordCodecError;

    fn decode(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < OFFSET_WIDTH {
            return Err(RecordCodecError::Truncated(bytes.len()));
        }
        let (offset_bytes, value) = bytes.split_at(OFFSET_WIDTH);
        Ok(Record {
            offset: u64::from_be_bytes(offset_bytes.try_into().unwrap()),
            value: value.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_round_trips_offset_and_value() {
        let mut record = Record::new(&b"Hello World!"[..]);
        record.set_offset(42);
        let bytes = record.encode().unwrap();
        let decoded = Record::decode(&bytes).unwrap();
        assert_eq!(decoded.offset, 42);
        assert_eq!(decoded.value, b"Hello World!");
    }

    #[test]
    fn decode_rejects_bytes_shorter_than_the_offset_prefix() {
        let err = Record::decode(&[0u8; 4]).unwrap_err();
        assert!(matches!(err, RecordCodecError::Truncated(4)));
    }
}
