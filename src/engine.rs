use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::error::LogError;
use crate::record::{Decode, Encode};
use crate::segment::Segment;

/// Configuration for a [`Log`].
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Base offset of the first segment when opening an empty directory.
    pub initial_offset: u64,
    /// Threshold above which a segment is considered full by store size.
    pub max_store_bytes: u64,
    /// Threshold above which a segment is considered full by index size;
    /// also the pre-grow size of each index file.
    pub max_index_bytes: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            initial_offset: 0,
            max_store_bytes: 1024,
            max_index_bytes: 1024,
        }
    }
}

struct State {
    segments: Vec<Segment>,
}

impl State {
    fn active(&self) -> &Segment {
        self.segments.last().expect("a log always has an active segment")
    }

    fn active_mut(&mut self) -> &mut Segment {
        self.segments.last_mut().expect("a log always has an active segment")
    }

    /// Index into `segments` of the unique segment containing `offset`,
    /// found by binary search on ascending `base_offset`.
    fn find(&self, offset: u64) -> Option<usize> {
        let i = self.segments.partition_point(|s| s.base_offset <= offset);
        if i == 0 {
            return None;
        }
        let idx = i - 1;
        let seg = &self.segments[idx];
        if offset < seg.next_offset() {
            Some(idx)
        } else {
            None
        }
    }
}

/// A directory of segments forming one ordered, append-only record log.
pub struct Log {
    dir: PathBuf,
    options: Options,
    state: RwLock<State>,
}

impl Log {
    /// Open (or create) a log rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>, options: Options) -> Result<Self, LogError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| LogError::io("create_dir_all", e))?;
        let segments = Self::setup(&dir, &options)?;
        info!(
            "log: opened {:?} with {} segment(s)",
            dir,
            segments.len()
        );
        Ok(Self {
            dir,
            options,
            state: RwLock::new(State { segments }),
        })
    }

    fn setup(dir: &Path, options: &Options) -> Result<Vec<Segment>, LogError> {
        let mut base_offsets: Vec<u64> = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| LogError::io("read_dir", e))? {
            let entry = entry.map_err(|e| LogError::io("read_dir entry", e))?;
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<u64>() {
                Ok(base_offset) => base_offsets.push(base_offset),
                Err(_) => {
                    warn!("log: ignoring unrecognized file {:?} during setup", path);
                    continue;
                }
            }
        }
        base_offsets.sort_unstable();
        base_offsets.dedup();

        let mut segments = Vec::with_capacity(base_offsets.len().max(1));
        for base_offset in base_offsets {
            segments.push(Segment::open(
                dir,
                base_offset,
                options.max_store_bytes,
                options.max_index_bytes,
            )?);
        }
        if segments.is_empty() {
            segments.push(Segment::open(
                dir,
                options.initial_offset,
                options.max_store_bytes,
                options.max_index_bytes,
            )?);
        }

        debug_assert!(
            segments
                .iter()
                .tuple_windows()
                .all(|(a, b)| a.base_offset < b.base_offset && b.base_offset == a.next_offset()),
            "segments on disk must be contiguous and strictly ascending by base_offset"
        );

        Ok(segments)
    }

    /// Append `record`, returning its assigned absolute offset.
    ///
    /// Takes the log's write lock for the full operation: the active
    /// segment's in-memory cursor is mutated unconditionally, and if the
    /// append fills the segment, rotation (installing a fresh active
    /// segment) happens before the lock is released. This is stricter
    /// than serializing only rotation, but it's what makes the mutation
    /// of a shared, unsynchronized `next_offset` sound under Rust's
    /// aliasing rules.
    ///
    /// Two distinct rotation triggers are handled here, because the store
    /// and the index behave differently at capacity: the store never
    /// refuses a write, so a store-size overrun is only observable after
    /// a successful append, and rotation proceeds smoothly with no
    /// caller-visible error. The index *does* refuse a write that would
    /// exceed `max_index_bytes`, so an index overrun surfaces as a
    /// `SpaceExhausted` error on the append that hits the boundary; the
    /// log rotates in response to that failure so the *next* append
    /// attempt succeeds, but this call still reports the error.
    ///
    /// A rotation that fails after a successful append does not retract
    /// the append: the record is already durable at its assigned offset,
    /// so the failure is surfaced as [`LogError::RotationFailed`], which
    /// carries that offset, rather than as a bare I/O error that would
    /// leave the caller unable to tell the append itself succeeded.
    pub fn append<R: Encode>(&self, record: &mut R) -> Result<u64, LogError>
    where
        R::Error: 'static,
    {
        use crate::error::{IndexError, SegmentError};

        let mut state = self.state.write();
        let base_offset = state.active().base_offset;

        match state.active_mut().append(record) {
            Ok(offset) => {
                if state.active().store_is_maxed() {
                    if let Err(source) = self.rotate(&mut state, offset + 1) {
                        return Err(LogError::RotationFailed {
                            offset,
                            source: Box::new(source),
                        });
                    }
                }
                Ok(offset)
            }
            Err(SegmentError::Index(IndexError::SpaceExhausted)) => {
                let next = state.active().next_offset();
                self.rotate(&mut state, next)?;
                Err(LogError::SpaceExhausted { base_offset })
            }
            Err(other) => Err(other.into()),
        }
    }

    fn rotate(&self, state: &mut State, new_base: u64) -> Result<(), LogError> {
        debug!("log: rotating to new segment at base_offset={new_base}");
        let new_segment = Segment::open(
            &self.dir,
            new_base,
            self.options.max_store_bytes,
            self.options.max_index_bytes,
        )?;
        state.segments.push(new_segment);
        Ok(())
    }

    /// Read the record at absolute `offset`.
    pub fn read<R: Decode>(&self, offset: u64) -> Result<R, LogError>
    where
        R::Error: 'static,
    {
        let state = self.state.read();
        let idx = state.find(offset).ok_or(LogError::OffsetOutOfRange(offset))?;
        state.segments[idx]
            .read(offset)
            .map_err(|e| attach_read_context(e, offset))
    }

    pub fn lowest_offset(&self) -> u64 {
        self.state.read().segments[0].base_offset
    }

    pub fn highest_offset(&self) -> u64 {
        let state = self.state.read();
        let off = state.active().next_offset();
        off.saturating_sub(1)
    }

    /// Drop every segment whose `next_offset < watermark`, retaining the
    /// rest in order.
    pub fn truncate(&self, watermark: u64) -> Result<(), LogError> {
        let mut state = self.state.write();
        let mut kept = Vec::with_capacity(state.segments.len());
        for seg in state.segments.drain(..) {
            if seg.next_offset() < watermark {
                debug!(
                    "log: truncate dropping segment base_offset={} (next_offset={} < watermark={watermark})",
                    seg.base_offset,
                    seg.next_offset()
                );
                seg.remove(&self.dir)?;
            } else {
                kept.push(seg);
            }
        }
        if kept.is_empty() {
            kept.push(Segment::open(
                &self.dir,
                watermark,
                self.options.max_store_bytes,
                self.options.max_index_bytes,
            )?);
        }
        state.segments = kept;
        Ok(())
    }

    /// A reader over the raw, length-prefixed bytes of every segment's
    /// store, concatenated in segment order from the start of each.
    pub fn reader(&self) -> LogReader<'_> {
        LogReader {
            log: self,
            segment_idx: 0,
            position: 0,
        }
    }

    pub fn close(&self) -> Result<(), LogError> {
        let state = self.state.read();
        for seg in &state.segments {
            seg.close()?;
        }
        Ok(())
    }

    /// Close and delete the whole log directory.
    pub fn remove(&self) -> Result<(), LogError> {
        self.close()?;
        fs::remove_dir_all(&self.dir).map_err(|e| LogError::io("remove_dir_all", e))?;
        Ok(())
    }

    /// Remove, then re-run setup against the (now empty) directory.
    pub fn reset(&self) -> Result<(), LogError> {
        self.remove()?;
        fs::create_dir_all(&self.dir).map_err(|e| LogError::io("create_dir_all", e))?;
        let segments = Self::setup(&self.dir, &self.options)?;
        *self.state.write() = State { segments };
        info!("log: reset {:?}", self.dir);
        Ok(())
    }
}

fn attach_read_context(err: crate::error::SegmentError, offset: u64) -> LogError {
    use crate::error::SegmentError;
    match err {
        SegmentError::Codec(source) => LogError::Codec { offset, source },
        other => other.into(),
    }
}

/// Streaming reader produced by [`Log::reader`]. Reads raw, length-prefixed
/// store bytes across all segments in order; does not itself re-frame
/// records (see [`crate::store::LEN_WIDTH`] for the prefix width).
pub struct LogReader<'a> {
    log: &'a Log,
    segment_idx: usize,
    position: u64,
}

impl Read for LogReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let state = self.log.state.read();
            let Some(seg) = state.segments.get(self.segment_idx) else {
                return Ok(0);
            };
            let n = seg
                .store()
                .read_at(buf, self.position)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
            if n > 0 {
                self.position += n as u64;
                return Ok(n);
            }
            drop(state);
            self.segment_idx += 1;
            self.position = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn open_log(options: Options) -> (TempDir, Log) {
        let dir = TempDir::new().unwrap();
        let log = Log::open(dir.path(), options).unwrap();
        (dir, log)
    }

    #[test]
    fn append_and_read_a_record_succeeds() {
        let (_dir, log) = open_log(Options::default());
        let mut record = Record::new(&b"Hello World!"[..]);
        let offset = log.append(&mut record).unwrap();
        assert_eq!(offset, 0);
        let got: Record = log.read(offset).unwrap();
        assert_eq!(got.offset, offset);
        assert_eq!(got.value, b"Hello World!");
    }

    #[test]
    fn offset_out_of_bounds_errors() {
        let (_dir, log) = open_log(Options::default());
        let err = log.read::<Record>(1).unwrap_err();
        assert!(matches!(err, LogError::OffsetOutOfRange(1)));
    }

    #[test]
    fn init_with_existing_segments_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let options = Options {
            max_store_bytes: 32,
            ..Options::default()
        };
        {
            let log = Log::open(dir.path(), options).unwrap();
            for i in 0..3u64 {
                let mut record = Record::new(&b"Hello World!"[..]);
                let offset = log.append(&mut record).unwrap();
                assert_eq!(offset, i);
            }
            assert_eq!(log.lowest_offset(), 0);
            assert_eq!(log.highest_offset(), 2);
            log.close().unwrap();
        }
        let log = Log::open(dir.path(), options).unwrap();
        assert_eq!(log.lowest_offset(), 0);
        assert_eq!(log.highest_offset(), 2);
    }

    #[test]
    fn truncate_drops_segments_below_watermark() {
        let options = Options {
            max_store_bytes: 32,
            ..Options::default()
        };
        let (_dir, log) = open_log(options);
        for _ in 0..2 {
            let mut record = Record::new(&b"Hello World!"[..]);
            log.append(&mut record).unwrap();
        }
        log.truncate(3).unwrap();
        assert!(log.read::<Record>(0).is_err());
    }

    #[test]
    fn reader_yields_length_prefixed_frames() {
        let (_dir, log) = open_log(Options::default());
        let mut record = Record::new(&b"hello world"[..]);
        let offset = log.append(&mut record).unwrap();
        assert_eq!(offset, 0);

        let mut reader = log.reader();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).unwrap();

        let len = u64::from_be_bytes(bytes[..8].try_into().unwrap());
        assert_eq!(len, 11);
        assert_eq!(&bytes[8..8 + len as usize], b"hello world");
    }

    #[test]
    fn rotation_keeps_offsets_dense_across_segments() {
        let options = Options {
            max_store_bytes: 20,
            ..Options::default()
        };
        let (dir, log) = open_log(options);
        for i in 0..4u64 {
            let mut record = Record::new(&b"Hello World!"[..]);
            let offset = log.append(&mut record).unwrap();
            assert_eq!(offset, i);
        }
        let store_files = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == "store")
            })
            .count();
        assert!(store_files > 1);
        for i in 0..4u64 {
            let got: Record = log.read(i).unwrap();
            assert_eq!(got.value, b"Hello World!");
        }
    }
}
