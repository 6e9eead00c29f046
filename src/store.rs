use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::trace;
use parking_lot::Mutex;

use crate::error::StoreError;

/// Width, in bytes, of the length prefix written ahead of every record.
pub const LEN_WIDTH: u64 = 8;

/// An append-only, positionally-addressable byte store.
///
/// Every `append` writes an 8-byte big-endian length prefix followed by the
/// payload; `read` flushes any buffered writes before doing a positional
/// read so readers never observe a torn length/payload pair. All operations
/// are serialized by a single mutex, matching the reference store's
/// lock-per-call discipline.
pub struct Store {
    inner: Mutex<Inner>,
}

struct Inner {
    file: BufWriter<File>,
    size: u64,
}

impl Store {
    /// Open (creating if necessary) the store file at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::io("open", e))?;
        let size = file.metadata().map_err(|e| StoreError::io("stat", e))?.len();
        Ok(Self {
            inner: Mutex::new(Inner {
                file: BufWriter::new(file),
                size,
            }),
        })
    }

    /// Current size in bytes, including buffered-but-unflushed writes.
    pub fn size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Append `payload`, returning `(bytes_written, position)` where
    /// `position` is the byte offset at which this entry's length prefix
    /// starts.
    pub fn append(&self, payload: &[u8]) -> Result<(u64, u64), StoreError> {
        let mut inner = self.inner.lock();
        let position = inner.size;
        let len = payload.len() as u64;
        inner
            .file
            .write_all(&len.to_be_bytes())
            .map_err(|e| StoreError::io("write length prefix", e))?;
        inner
            .file
            .write_all(payload)
            .map_err(|e| StoreError::io("write payload", e))?;
        let written = LEN_WIDTH + len;
        inner.size += written;
        trace!("store: appended {written} bytes at position {position}");
        Ok((written, position))
    }

    /// Read the record whose length prefix starts at `position`.
    pub fn read(&self, position: u64) -> Result<Vec<u8>, StoreError> {
        let mut inner = self.inner.lock();
        inner.file.flush().map_err(|e| StoreError::io("flush", e))?;
        let file = inner.file.get_mut();

        let mut len_buf = [0u8; LEN_WIDTH as usize];
        file.seek(SeekFrom::Start(position))
            .map_err(|e| StoreError::io("seek", e))?;
        read_exact_or_short(file, &mut len_buf, position)?;
        let len = u64::from_be_bytes(len_buf);

        let mut payload = vec![0u8; len as usize];
        read_exact_or_short(file, &mut payload, position + LEN_WIDTH)?;
        Ok(payload)
    }

    /// Positional read used by the log-wide byte reader; returns the number
    /// of bytes read (short reads at EOF are not an error here, matching
    /// `io::Read` semantics for a stream reader).
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        inner.file.flush().map_err(|e| StoreError::io("flush", e))?;
        let file = inner.file.get_mut();
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| StoreError::io("seek", e))?;
        file.read(buf).map_err(|e| StoreError::io("read_at", e))
    }

    /// Flush buffered writes and fsync the file.
    pub fn sync(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.file.flush().map_err(|e| StoreError::io("flush", e))?;
        inner
            .file
            .get_ref()
            .sync_all()
            .map_err(|e| StoreError::io("sync_all", e))
    }

    /// Flush buffered writes and close the file.
    pub fn close(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        inner.file.flush().map_err(|e| StoreError::io("flush", e))
    }
}

fn read_exact_or_short(file: &mut File, buf: &mut [u8], position: u64) -> Result<(), StoreError> {
    let wanted = buf.len() as u64;
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(StoreError::ShortRead {
            position,
            wanted,
            got: 0,
        }),
        Err(e) => Err(StoreError::io("read", e)),
    }
}
