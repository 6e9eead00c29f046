use std::fs::{File, OpenOptions};
use std::path::Path;

use log::{debug, trace};
use memmap2::MmapMut;
use parking_lot::Mutex;

use crate::error::IndexError;

/// Width, in bytes, of one packed index entry: a 4-byte big-endian
/// relative offset followed by an 8-byte big-endian store position.
pub const ENTRY_WIDTH: u64 = 12;
const RELATIVE_OFFSET_WIDTH: usize = 4;
const POSITION_WIDTH: usize = 8;

/// A fixed-width, memory-mapped mapping from a segment-relative record
/// number to the byte position of that record in the owning segment's
/// store.
///
/// The backing file is grown to `max_index_bytes` on open so the mapping
/// never needs to be resized mid-life, then truncated back to the true
/// number of entries on close so reopening is a simple `file_size / 12`.
pub struct Index {
    inner: Mutex<Inner>,
    max_index_bytes: u64,
}

struct Inner {
    file: File,
    mmap: MmapMut,
    size: u64,
}

impl Index {
    /// Open (creating if necessary) the index file at `path`, pre-growing
    /// it to `max_index_bytes` for the mmap.
    pub fn open(path: &Path, max_index_bytes: u64) -> Result<Self, IndexError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| IndexError::io("open", e))?;
        let size = file.metadata().map_err(|e| IndexError::io("stat", e))?.len();

        file.set_len(max_index_bytes)
            .map_err(|e| IndexError::io("set_len (pre-grow)", e))?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| IndexError::io("mmap", e))?;

        Ok(Self {
            inner: Mutex::new(Inner { file, mmap, size }),
            max_index_bytes,
        })
    }

    /// Number of bytes currently holding valid entries (always a multiple
    /// of [`ENTRY_WIDTH`]).
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Number of valid entries.
    pub fn len(&self) -> u64 {
        self.size() / ENTRY_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append `(relative_offset, position)`. Fails with
    /// [`IndexError::SpaceExhausted`] if the entry would not fit within
    /// `max_index_bytes`.
    pub fn write(&self, relative_offset: u32, position: u64) -> Result<(), IndexError> {
        let mut inner = self.inner.lock();
        if inner.size + ENTRY_WIDTH > self.max_index_bytes {
            return Err(IndexError::SpaceExhausted);
        }
        let at = inner.size as usize;
        inner.mmap[at..at + RELATIVE_OFFSET_WIDTH].copy_from_slice(&relative_offset.to_be_bytes());
        inner.mmap[at + RELATIVE_OFFSET_WIDTH..at + RELATIVE_OFFSET_WIDTH + POSITION_WIDTH]
            .copy_from_slice(&position.to_be_bytes());
        inner.size += ENTRY_WIDTH;
        trace!("index: wrote entry {relative_offset} -> {position}");
        Ok(())
    }

    /// Read entry number `n`. `n == -1` means "the last entry".
    pub fn read(&self, n: i64) -> Result<(u32, u64), IndexError> {
        let inner = self.inner.lock();
        let entries = (inner.size / ENTRY_WIDTH) as i64;
        let idx = if n == -1 { entries - 1 } else { n };
        if entries == 0 || idx < 0 || idx >= entries {
            return Err(IndexError::OutOfRange(n));
        }
        let at = (idx as u64 * ENTRY_WIDTH) as usize;
        let relative_offset =
            u32::from_be_bytes(inner.mmap[at..at + RELATIVE_OFFSET_WIDTH].try_into().unwrap());
        let position = u64::from_be_bytes(
            inner.mmap[at + RELATIVE_OFFSET_WIDTH..at + RELATIVE_OFFSET_WIDTH + POSITION_WIDTH]
                .try_into()
                .unwrap(),
        );
        Ok((relative_offset, position))
    }

    /// Flush the mapping and truncate the backing file to the true number
    /// of entries, sealing it for reopen.
    pub fn close(&self) -> Result<(), IndexError> {
        let mut inner = self.inner.lock();
        inner.mmap.flush().map_err(|e| IndexError::io("mmap flush", e))?;
        let size = inner.size;
        inner
            .file
            .set_len(size)
            .map_err(|e| IndexError::io("set_len (truncate)", e))?;
        debug!("index: sealed at {size} bytes ({} entries)", size / ENTRY_WIDTH);
        Ok(())
    }
}
