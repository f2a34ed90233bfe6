//! sled engine.
//!
//! One long-lived `sled::Db` per repository, all tables sharing the default
//! tree and told apart by their prefix byte. sled gives us atomic batches
//! and ordered double-ended iteration but no snapshots, so read
//! transactions on this engine observe the latest committed state.

use std::path::Path;

use ::sled::{Batch, Config, Db};

use super::{BatchOp, RawEntry, RawIter, ReadView, ScanRange, StorageEngine, WriteBatch};
use crate::error::StoreResult;
use crate::key::ScanOrder;

/// Engine adapter over a sled database.
#[derive(Debug, Clone)]
pub struct SledEngine {
    db: Db,
}

impl SledEngine {
    /// Open or create a database in `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = ::sled::open(path)?;
        Ok(Self { db })
    }

    /// A throwaway database that is removed when dropped.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = Config::new().temporary(true).open()?;
        Ok(Self { db })
    }
}

impl ReadView for SledEngine {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn scan<'a>(&'a self, range: &ScanRange, order: ScanOrder) -> StoreResult<RawIter<'a>> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let iter = self.db.range::<Vec<u8>, _>((range.start.clone(), range.end.clone()));
        let iter: Box<dyn Iterator<Item = ::sled::Result<(::sled::IVec, ::sled::IVec)>>> =
            match order {
                ScanOrder::Ascending => Box::new(iter),
                ScanOrder::Descending => Box::new(iter.rev()),
            };
        Ok(Box::new(iter.map(|res| -> StoreResult<RawEntry> {
            let (k, v) = res?;
            Ok((k.to_vec(), v.to_vec()))
        })))
    }

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.db.contains_key(key)?)
    }
}

impl StorageEngine for SledEngine {
    fn name(&self) -> &'static str {
        "sled"
    }

    fn write_batch(&self, batch: WriteBatch, sync: bool) -> StoreResult<()> {
        let mut native = Batch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => native.insert(key, value),
                BatchOp::Delete { key } => native.remove(key),
            }
        }
        self.db.apply_batch(native)?;
        if sync {
            self.db.flush()?;
        }
        Ok(())
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
