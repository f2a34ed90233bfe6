//! RocksDB engine.
//!
//! Scans are driven by a raw iterator so that bounds are applied exactly
//! as the store defines them rather than relying on `IteratorMode`
//! semantics. Descending scans with an exclusive upper bound (which is
//! what an open-ended table scan becomes) seek to the bound and step back
//! one position; if the seek ran off the end of the keyspace the cursor
//! is parked on the last key instead.

use std::ops::Bound;
use std::path::Path;

use ::rocksdb::{
    DBAccess, DBRawIteratorWithThreadMode, Options, SnapshotWithThreadMode, WriteOptions, DB,
};

use super::{BatchOp, RawEntry, RawIter, ReadView, ScanRange, StorageEngine, WriteBatch};
use crate::error::StoreResult;
use crate::key::ScanOrder;

/// Engine adapter over a RocksDB database.
pub struct RocksDbEngine {
    db: DB,
}

impl RocksDbEngine {
    /// Open or create a database in `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path)?;
        Ok(Self { db })
    }
}

impl ReadView for RocksDbEngine {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    fn scan<'a>(&'a self, range: &ScanRange, order: ScanOrder) -> StoreResult<RawIter<'a>> {
        Ok(raw_scan(self.db.raw_iterator(), range, order))
    }
}

impl StorageEngine for RocksDbEngine {
    fn name(&self) -> &'static str {
        "rocksdb"
    }

    fn write_batch(&self, batch: WriteBatch, sync: bool) -> StoreResult<()> {
        let mut native = ::rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => native.put(key, value),
                BatchOp::Delete { key } => native.delete(key),
            }
        }
        let mut opts = WriteOptions::default();
        opts.set_sync(sync);
        self.db.write_opt(native, &opts)?;
        Ok(())
    }

    fn snapshot(&self) -> StoreResult<Option<Box<dyn ReadView + '_>>> {
        Ok(Some(Box::new(RocksDbSnapshot {
            snap: self.db.snapshot(),
        })))
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

struct RocksDbSnapshot<'a> {
    snap: SnapshotWithThreadMode<'a, DB>,
}

impl ReadView for RocksDbSnapshot<'_> {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.snap.get(key)?)
    }

    fn scan<'a>(&'a self, range: &ScanRange, order: ScanOrder) -> StoreResult<RawIter<'a>> {
        Ok(raw_scan(self.snap.raw_iterator(), range, order))
    }
}

// ---------------------------------------------------------------------------
// Raw Scan
// ---------------------------------------------------------------------------

fn raw_scan<'a, D: DBAccess + 'a>(
    mut iter: DBRawIteratorWithThreadMode<'a, D>,
    range: &ScanRange,
    order: ScanOrder,
) -> RawIter<'a> {
    if range.is_empty() {
        return Box::new(std::iter::empty());
    }
    match order {
        ScanOrder::Ascending => match &range.start {
            Bound::Unbounded => iter.seek_to_first(),
            Bound::Included(k) => iter.seek(k),
            Bound::Excluded(k) => {
                iter.seek(k);
                if iter.valid() && iter.key() == Some(k.as_slice()) {
                    iter.next();
                }
            }
        },
        ScanOrder::Descending => match &range.end {
            Bound::Unbounded => iter.seek_to_last(),
            Bound::Included(k) => iter.seek_for_prev(k),
            Bound::Excluded(k) => {
                iter.seek(k);
                if iter.valid() {
                    iter.prev();
                } else {
                    iter.seek_to_last();
                }
            }
        },
    }
    Box::new(RawScan {
        iter,
        range: range.clone(),
        order,
        done: false,
    })
}

struct RawScan<'a, D: DBAccess> {
    iter: DBRawIteratorWithThreadMode<'a, D>,
    range: ScanRange,
    order: ScanOrder,
    done: bool,
}

impl<D: DBAccess> Iterator for RawScan<'_, D> {
    type Item = StoreResult<RawEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.iter.valid() {
            self.done = true;
            return match self.iter.status() {
                Ok(()) => None,
                Err(e) => Some(Err(e.into())),
            };
        }
        let (key, value) = match (self.iter.key(), self.iter.value()) {
            (Some(k), Some(v)) => (k.to_vec(), v.to_vec()),
            _ => {
                self.done = true;
                return None;
            }
        };
        let in_range = match self.order {
            ScanOrder::Ascending => self.range.below_end(&key),
            ScanOrder::Descending => self.range.above_start(&key),
        };
        if !in_range {
            self.done = true;
            return None;
        }
        match self.order {
            ScanOrder::Ascending => self.iter.next(),
            ScanOrder::Descending => self.iter.prev(),
        }
        Some(Ok((key, value)))
    }
}
