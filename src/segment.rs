use std::path::Path;

use log::debug;

use crate::error::SegmentError;
use crate::index::Index;
use crate::record::{Decode, Encode};
use crate::store::Store;

/// One {store, index} pair rooted at `base_offset`.
///
/// A segment owns record framing: it stamps the assigned offset onto the
/// record, serializes it, appends the bytes to its store, and records the
/// offset-to-position mapping in its index.
pub struct Segment {
    pub base_offset: u64,
    next_offset: u64,
    store: Store,
    index: Index,
    max_store_bytes: u64,
    max_index_bytes: u64,
}

impl Segment {
    /// Open (creating if necessary) the `<base_offset>.store` and
    /// `<base_offset>.index` files in `dir`.
    pub fn open(
        dir: &Path,
        base_offset: u64,
        max_store_bytes: u64,
        max_index_bytes: u64,
    ) -> Result<Self, SegmentError> {
        let store_path = dir.join(format!("{base_offset}.store"));
        let index_path = dir.join(format!("{base_offset}.index"));

        let store = Store::open(&store_path)?;
        let index = Index::open(&index_path, max_index_bytes)?;

        let next_offset = match index.read(-1) {
            Ok((relative_offset, _)) => base_offset + relative_offset as u64 + 1,
            Err(_) => base_offset,
        };

        debug!("segment: opened base_offset={base_offset} next_offset={next_offset}");

        Ok(Self {
            base_offset,
            next_offset,
            store,
            index,
            max_store_bytes,
            max_index_bytes,
        })
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Stamp `record` with the next offset, serialize, append to the
    /// store, and record the offset-to-position mapping. Returns the
    /// assigned absolute offset.
    pub fn append<R: Encode>(&mut self, record: &mut R) -> Result<u64, SegmentError>
    where
        R::Error: 'static,
    {
        let offset = self.next_offset;
        record.set_offset(offset);
        let bytes = record
            .encode()
            .map_err(|e| SegmentError::Codec(Box::new(e)))?;

        let (_, position) = self.store.append(&bytes)?;
        let relative_offset = (offset - self.base_offset) as u32;
        self.index.write(relative_offset, position)?;
        self.next_offset += 1;
        Ok(offset)
    }

    /// Read the record at absolute `offset`, which must satisfy
    /// `base_offset <= offset < next_offset`.
    pub fn read<R: Decode>(&self, offset: u64) -> Result<R, SegmentError>
    where
        R::Error: 'static,
    {
        let relative_offset = (offset - self.base_offset) as i64;
        let (_, position) = self.index.read(relative_offset)?;
        let bytes = self.store.read(position)?;
        R::decode(&bytes).map_err(|e| SegmentError::Codec(Box::new(e)))
    }

    /// Whether this segment has reached either size cap and should no
    /// longer accept appends.
    pub fn is_maxed(&self) -> bool {
        self.store.size() >= self.max_store_bytes || self.index.size() >= self.max_index_bytes
    }

    /// Whether the store half specifically has reached its cap. Used by
    /// the log to decide on a smooth, proactive rotation after a
    /// successful append — distinct from the index hitting its hard
    /// write-time guard, which the log instead handles reactively (see
    /// [`crate::engine::Log::append`]).
    pub(crate) fn store_is_maxed(&self) -> bool {
        self.store.size() >= self.max_store_bytes
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub fn close(&self) -> Result<(), SegmentError> {
        self.index.close()?;
        self.store.close()?;
        Ok(())
    }

    /// Close then delete both backing files.
    pub fn remove(&self, dir: &Path) -> Result<(), SegmentError> {
        self.close()?;
        let store_path = dir.join(format!("{}.store", self.base_offset));
        let index_path = dir.join(format!("{}.index", self.base_offset));
        std::fs::remove_file(&store_path)
            .map_err(|e| SegmentError::io("remove store file", e))?;
        std::fs::remove_file(&index_path)
            .map_err(|e| SegmentError::io("remove index file", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use tempfile::TempDir;

    #[test]
    fn append_assigns_dense_offsets_from_base() {
        let dir = TempDir::new().unwrap();
        let mut seg = Segment::open(dir.path(), 16, 1024, 1024).unwrap();
        let mut r0 = Record::new(&b"a"[..]);
        let mut r1 = Record::new(&b"bb"[..]);
        assert_eq!(seg.append(&mut r0).unwrap(), 16);
        assert_eq!(seg.append(&mut r1).unwrap(), 17);
        assert_eq!(seg.next_offset(), 18);

        let got: Record = seg.read(16).unwrap();
        assert_eq!(got.value, b"a");
        let got: Record = seg.read(17).unwrap();
        assert_eq!(got.value, b"bb");
    }

    #[test]
    fn reopen_recovers_next_offset_from_index() {
        let dir = TempDir::new().unwrap();
        {
            let mut seg = Segment::open(dir.path(), 0, 1024, 1024).unwrap();
            let mut r = Record::new(&b"x"[..]);
            seg.append(&mut r).unwrap();
            let mut r = Record::new(&b"y"[..]);
            seg.append(&mut r).unwrap();
            seg.close().unwrap();
        }
        let seg = Segment::open(dir.path(), 0, 1024, 1024).unwrap();
        assert_eq!(seg.next_offset(), 2);
    }

    #[test]
    fn is_maxed_reports_store_and_index_caps() {
        let dir = TempDir::new().unwrap();
        let mut seg = Segment::open(dir.path(), 0, 20, 1024).unwrap();
        assert!(!seg.is_maxed());
        let mut r = Record::new(&b"Hello World!"[..]);
        seg.append(&mut r).unwrap();
        assert!(seg.is_maxed());
    }

    #[test]
    fn remove_deletes_backing_files() {
        let dir = TempDir::new().unwrap();
        let seg = Segment::open(dir.path(), 0, 1024, 1024).unwrap();
        seg.remove(dir.path()).unwrap();
        assert!(!dir.path().join("0.store").exists());
        assert!(!dir.path().join("0.index").exists());
    }
}
