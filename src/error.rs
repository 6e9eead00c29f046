use std::io;

use thiserror::Error;

/// Errors raised by a single [`crate::store::Store`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error during store {op}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("short read at position {position}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        position: u64,
        wanted: u64,
        got: u64,
    },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }
}

/// Errors raised by a single [`crate::index::Index`].
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error during index {op}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// The index has no room for another 12-byte entry given its configured
    /// `max_index_bytes`.
    #[error("index is full (max_index_bytes exhausted)")]
    SpaceExhausted,

    /// `read` was asked for an entry that does not exist.
    #[error("index entry {0} is out of range")]
    OutOfRange(i64),
}

impl IndexError {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }
}

/// Errors raised while appending to or reading from a single
/// [`crate::segment::Segment`].
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("failed to encode record")]
    Codec(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("io error during segment {op}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl SegmentError {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }
}

/// Errors raised by the top-level [`crate::engine::Log`], the only error type
/// an embedder should need to match on.
#[derive(Debug, Error)]
pub enum LogError {
    /// The requested offset is not within `[lowest_offset, highest_offset]`.
    #[error("offset {0} out of range")]
    OffsetOutOfRange(u64),

    /// The active segment has no room left in its index; rotation did not
    /// (yet) make room for this append.
    #[error("segment at base offset {base_offset} is full")]
    SpaceExhausted { base_offset: u64 },

    /// The append itself succeeded and is durable at `offset`, but rolling
    /// over to a fresh active segment afterward failed. The record is not
    /// lost; callers who only check `is_err()` should still recover
    /// `offset` from this variant rather than assume nothing happened.
    #[error("appended at offset {offset} but failed to rotate to a new segment")]
    RotationFailed {
        offset: u64,
        #[source]
        source: Box<LogError>,
    },

    #[error("failed to encode or decode record at offset {offset}")]
    Codec {
        offset: u64,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("io error during log {op}")]
    Io {
        op: &'static str,
        #[source]
        source: io::Error,
    },
}

impl LogError {
    pub(crate) fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }
}

impl From<SegmentError> for LogError {
    fn from(err: SegmentError) -> Self {
        match err {
            SegmentError::Store(StoreError::Io { op, source }) => LogError::Io { op, source },
            SegmentError::Store(StoreError::ShortRead { .. }) => {
                LogError::io("segment store read", io::Error::new(io::ErrorKind::UnexpectedEof, err.to_string()))
            }
            SegmentError::Index(IndexError::SpaceExhausted) => {
                // Caller (Log::append) attaches the base offset; this arm is
                // only reached when callers construct a LogError directly
                // from a bare SegmentError without that context.
                LogError::SpaceExhausted { base_offset: 0 }
            }
            SegmentError::Index(IndexError::Io { op, source }) => LogError::Io { op, source },
            SegmentError::Index(IndexError::OutOfRange(n)) => LogError::io(
                "index read",
                io::Error::new(io::ErrorKind::UnexpectedEof, format!("index entry {n} out of range")),
            ),
            SegmentError::Codec(source) => LogError::Codec { offset: 0, source },
            SegmentError::Io { op, source } => LogError::Io { op, source },
        }
    }
}
