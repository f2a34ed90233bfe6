//! In-memory engine.
//!
//! The map lives behind an `Arc` that is never mutated in place: a batch is
//! applied to a private clone which is swapped in only once every op has
//! gone through. That makes a failed batch leave no trace and makes a
//! snapshot nothing more than an `Arc` clone.
//!
//! Clones of a `MemoryEngine` share the same data, so a test can hand one
//! clone to a repository and keep another for fault injection.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{BatchOp, RawEntry, RawIter, ReadView, ScanRange, StorageEngine, WriteBatch};
use crate::error::{StoreError, StoreResult};
use crate::key::{ByteKey, ScanOrder};

type Map = BTreeMap<ByteKey, Vec<u8>>;

/// Volatile engine backed by a copy-on-write `BTreeMap`.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    map: Arc<RwLock<Arc<Map>>>,
    /// When set, the next batch fails after applying this many ops to its
    /// private copy.
    fail_after: Arc<Mutex<Option<usize>>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the first `write_batch` with more than `ops` operations fail
    /// with a storage error before applying anything. Shorter batches go
    /// through and leave the fault armed. Once it fires it is disarmed.
    pub fn fail_writes_after(&self, ops: usize) {
        *self.fail_after.lock() = Some(ops);
    }

    /// Number of physical rows, registry included.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    fn current(&self) -> Arc<Map> {
        Arc::clone(&self.map.read())
    }
}

impl ReadView for MemoryEngine {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn scan<'a>(&'a self, range: &ScanRange, order: ScanOrder) -> StoreResult<RawIter<'a>> {
        Ok(Box::new(MapScan::new(self.current(), range, order)))
    }
}

impl StorageEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn write_batch(&self, batch: WriteBatch, _sync: bool) -> StoreResult<()> {
        let mut fail_after = self.fail_after.lock();

        // Writers are serialized by the repository, but hold the write lock
        // across clone-and-swap anyway so direct engine users stay correct.
        let mut guard = self.map.write();
        let mut next: Map = (**guard).clone();
        for (i, op) in batch.into_ops().into_iter().enumerate() {
            if *fail_after == Some(i) {
                *fail_after = None;
                return Err(StoreError::Storage(format!(
                    "injected write failure at op {i}"
                )));
            }
            match op {
                BatchOp::Put { key, value } => {
                    next.insert(ByteKey::new(key), value);
                }
                BatchOp::Delete { key } => {
                    next.remove(key.as_slice());
                }
            }
        }
        *guard = Arc::new(next);
        Ok(())
    }

    fn snapshot(&self) -> StoreResult<Option<Box<dyn ReadView + '_>>> {
        Ok(Some(Box::new(MemorySnapshot {
            map: self.current(),
        })))
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Frozen view of the map at the moment the snapshot was taken.
struct MemorySnapshot {
    map: Arc<Map>,
}

impl ReadView for MemorySnapshot {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.map.get(key).cloned())
    }

    fn scan<'a>(&'a self, range: &ScanRange, order: ScanOrder) -> StoreResult<RawIter<'a>> {
        Ok(Box::new(MapScan::new(Arc::clone(&self.map), range, order)))
    }
}

// ---------------------------------------------------------------------------
// Scan Cursor
// ---------------------------------------------------------------------------

/// Lazy scan over a shared map. Each step re-seeks from the last key
/// returned, so the cursor owns its data and never borrows a lock guard.
struct MapScan {
    map: Arc<Map>,
    lower: Bound<ByteKey>,
    upper: Bound<ByteKey>,
    order: ScanOrder,
    done: bool,
}

impl MapScan {
    fn new(map: Arc<Map>, range: &ScanRange, order: ScanOrder) -> Self {
        let to_key = |b: &Bound<Vec<u8>>| match b {
            Bound::Included(k) => Bound::Included(ByteKey::from(k.as_slice())),
            Bound::Excluded(k) => Bound::Excluded(ByteKey::from(k.as_slice())),
            Bound::Unbounded => Bound::Unbounded,
        };
        Self {
            map,
            lower: to_key(&range.start),
            upper: to_key(&range.end),
            order,
            done: range.is_empty(),
        }
    }
}

impl Iterator for MapScan {
    type Item = StoreResult<RawEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut range = self.map.range((self.lower.clone(), self.upper.clone()));
        let hit = match self.order {
            ScanOrder::Ascending => range.next(),
            ScanOrder::Descending => range.next_back(),
        };
        let Some((key, value)) = hit else {
            self.done = true;
            return None;
        };
        let entry = (key.as_bytes().to_vec(), value.clone());
        match self.order {
            ScanOrder::Ascending => self.lower = Bound::Excluded(key.clone()),
            ScanOrder::Descending => self.upper = Bound::Excluded(key.clone()),
        }
        // The narrowed range can collapse to (k, k); BTreeMap::range panics
        // on that, so stop before the next call.
        if crate::key::bounds_empty(self.lower.as_ref(), self.upper.as_ref()) {
            self.done = true;
        }
        Some(Ok(entry))
    }
}
