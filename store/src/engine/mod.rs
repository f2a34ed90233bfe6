//! # Storage Engines
//!
//! The narrow capability interface every embedded engine has to provide,
//! and one thin adapter per engine:
//!
//! ```text
//! memory.rs   : copy-on-write BTreeMap; tests, tooling, fault injection
//! sled.rs     : sled B+ tree, long-lived handle, no snapshots
//! rocksdb.rs  : RocksDB via raw iterators, native snapshots (feature "rocksdb")
//! ```
//!
//! Engines only ever see physical keys (`prefix ++ logical key`). Tables,
//! buffering, tombstones and merge iteration all live above this line in
//! [`crate::transaction`], so adding an engine means implementing four
//! methods, not copying a repository.

pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocksdb;
pub mod sled;

use std::ops::Bound;

use crate::config::{BackendKind, StoreConfig};
use crate::error::StoreResult;
use crate::key::{bounds_empty, compare_keys, ScanOrder};

pub use self::memory::MemoryEngine;
#[cfg(feature = "rocksdb")]
pub use self::rocksdb::RocksDbEngine;
pub use self::sled::SledEngine;

/// A physical key-value pair as stored by the engine.
pub type RawEntry = (Vec<u8>, Vec<u8>);

/// Ordered, lazily evaluated engine scan.
pub type RawIter<'a> = Box<dyn Iterator<Item = StoreResult<RawEntry>> + 'a>;

// ---------------------------------------------------------------------------
// Scan Range
// ---------------------------------------------------------------------------

/// A range over physical keys. The transaction layer always builds these
/// clamped to a single table prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRange {
    pub start: Bound<Vec<u8>>,
    pub end: Bound<Vec<u8>>,
}

impl ScanRange {
    pub fn new(start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Self {
        Self { start, end }
    }

    /// Every key starting with `prefix`.
    pub fn prefix(prefix: u8) -> Self {
        let end = if prefix == u8::MAX {
            Bound::Unbounded
        } else {
            Bound::Excluded(vec![prefix + 1])
        };
        Self {
            start: Bound::Included(vec![prefix]),
            end,
        }
    }

    pub fn is_empty(&self) -> bool {
        bounds_empty(self.start.as_ref(), self.end.as_ref())
    }

    /// True if `key` is at or past the lower bound.
    pub fn above_start(&self, key: &[u8]) -> bool {
        match &self.start {
            Bound::Unbounded => true,
            Bound::Included(s) => compare_keys(key, s).is_ge(),
            Bound::Excluded(s) => compare_keys(key, s).is_gt(),
        }
    }

    /// True if `key` is at or before the upper bound.
    pub fn below_end(&self, key: &[u8]) -> bool {
        match &self.end {
            Bound::Unbounded => true,
            Bound::Included(e) => compare_keys(key, e).is_le(),
            Bound::Excluded(e) => compare_keys(key, e).is_lt(),
        }
    }
}

// ---------------------------------------------------------------------------
// Write Batch
// ---------------------------------------------------------------------------

/// One physical mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered list of puts and deletes the engine applies atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put { key, value });
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete { key });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    /// `(puts, deletes)` in this batch.
    pub fn counts(&self) -> (usize, usize) {
        let puts = self
            .ops
            .iter()
            .filter(|op| matches!(op, BatchOp::Put { .. }))
            .count();
        (puts, self.ops.len() - puts)
    }
}

// ---------------------------------------------------------------------------
// Capability Traits
// ---------------------------------------------------------------------------

/// Read access to either the live engine or a snapshot of it.
pub trait ReadView {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Ordered scan over `range`. Must yield keys in [`compare_keys`]
    /// order (reversed for [`ScanOrder::Descending`]) and honour the bound
    /// inclusivity exactly.
    fn scan<'a>(&'a self, range: &ScanRange, order: ScanOrder) -> StoreResult<RawIter<'a>>;

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn count(&self, range: &ScanRange) -> StoreResult<u64> {
        let mut n = 0u64;
        for entry in self.scan(range, ScanOrder::Ascending)? {
            entry?;
            n += 1;
        }
        Ok(n)
    }
}

/// An embedded key-value engine the repository can sit on.
pub trait StorageEngine: ReadView + Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Apply every op in `batch` atomically. With `sync`, the batch must be
    /// durable before this returns.
    fn write_batch(&self, batch: WriteBatch, sync: bool) -> StoreResult<()>;

    /// A point-in-time read view, or `None` if the engine can't provide one.
    fn snapshot(&self) -> StoreResult<Option<Box<dyn ReadView + '_>>> {
        Ok(None)
    }

    /// Force buffered writes to disk.
    fn flush(&self) -> StoreResult<()>;
}

/// Open the engine selected by `config`.
pub fn open_engine(config: &StoreConfig) -> StoreResult<Box<dyn StorageEngine>> {
    match config.backend {
        BackendKind::Memory => Ok(Box::new(MemoryEngine::new())),
        BackendKind::Sled => Ok(Box::new(SledEngine::open(&config.path)?)),
        #[cfg(feature = "rocksdb")]
        BackendKind::RocksDb => Ok(Box::new(RocksDbEngine::open(&config.path)?)),
        #[cfg(not(feature = "rocksdb"))]
        BackendKind::RocksDb => Err(crate::error::StoreError::InvalidOperation(
            "this build does not include the rocksdb backend".to_string(),
        )),
    }
}
