//! A segmented, append-only record log.
//!
//! Records are opaque byte payloads assigned a dense, monotonically
//! increasing 64-bit offset on append. The log is backed by a directory of
//! segments, each pairing a length-prefixed [`store`] file with a
//! fixed-width, memory-mapped [`index`] file mapping offsets to store
//! positions. See [`engine::Log`] for the top-level API.

mod error;
mod index;
mod segment;
mod store;

pub mod engine;
pub mod record;

pub use engine::{Log, Options};
pub use error::{IndexError, LogError, SegmentError, StoreError};
pub use record::{Decode, Encode, Record};

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_options_match_documented_defaults() {
        let options = Options::default();
        assert_eq!(options.initial_offset, 0);
        assert_eq!(options.max_store_bytes, 1024);
        assert_eq!(options.max_index_bytes, 1024);
    }

    #[test]
    fn space_exhausted_surfaces_on_a_tiny_index() {
        let dir = TempDir::new().unwrap();
        let options = Options {
            initial_offset: 16,
            max_store_bytes: 1 << 20,
            max_index_bytes: 36, // room for exactly 3 entries
        };
        let log = Log::open(dir.path(), options).unwrap();
        for i in 0..3u64 {
            let mut record = Record::new(&b"x"[..]);
            let offset = log.append(&mut record).unwrap();
            assert_eq!(offset, 16 + i);
        }
        let mut record = Record::new(&b"x"[..]);
        let err = log.append(&mut record).unwrap_err();
        assert!(matches!(
            err,
            LogError::SpaceExhausted { base_offset: 16 }
        ));

        // the log rotated in response to the failure; the next attempt
        // lands in a fresh segment and succeeds.
        let mut record = Record::new(&b"x"[..]);
        let offset = log.append(&mut record).unwrap();
        assert_eq!(offset, 19);
    }
}
