//! # Transactions
//!
//! A transaction stages inserts, tombstones and table clears in memory and
//! resolves every read by consulting its own buffer first and the engine
//! second. Nothing it writes is visible to any other transaction until
//! [`Transaction::commit`] hands the buffer to the repository, which turns
//! it into one atomic engine batch.
//!
//! ## Lifecycle
//!
//! ```text
//!            commit()                 rollback() / drop
//! Active ─────────────▶ Committed    Active ─────────────▶ RolledBack
//! ```
//!
//! Both terminal states reject every further call with
//! [`StoreError::InvalidOperation`]. A commit whose batch write fails leaves
//! the transaction `Active` with its buffer intact so the caller can retry
//! or roll back.
//!
//! ## Read resolution
//!
//! For a key `K` in table `T`:
//!
//! 1. Buffered value for `K` → that value. Buffered tombstone → absent.
//! 2. `T` cleared in this transaction → absent.
//! 3. Otherwise → the engine (or this transaction's snapshot).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::{decode_value, encode_value, StoreKey};
use crate::cursor::{BufferedIter, MergeCursor};
use crate::engine::{RawIter, ReadView, ScanRange, StorageEngine};
use crate::error::{StoreError, StoreResult};
use crate::key::{physical_key, ByteKey, KeyRange, ScanOrder};
use crate::lock::WriterGuard;
use crate::repository::Repository;

/// Buffered rows of one table: `Some(value)` or `None` for a tombstone.
pub(crate) type TableBuffer = BTreeMap<ByteKey, Option<Vec<u8>>>;

/// Buffered rows of every table touched by a transaction, by prefix.
pub(crate) type Updates = BTreeMap<u8, TableBuffer>;

// ---------------------------------------------------------------------------
// Mode & State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    /// Reads only. Never blocks, never blocked.
    Read,
    /// Reads and writes. Holds the repository's writer lock while active.
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Active => "active",
            TransactionState::Committed => "committed",
            TransactionState::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Read Source
// ---------------------------------------------------------------------------

/// Where engine reads go: the live engine, or a snapshot taken at begin.
enum ReadSource<'r> {
    Live(&'r dyn StorageEngine),
    Snapshot(Box<dyn ReadView + 'r>),
}

impl ReadSource<'_> {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        match self {
            ReadSource::Live(engine) => engine.get(key),
            ReadSource::Snapshot(snap) => snap.get(key),
        }
    }

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        match self {
            ReadSource::Live(engine) => engine.contains(key),
            ReadSource::Snapshot(snap) => snap.contains(key),
        }
    }

    fn count(&self, range: &ScanRange) -> StoreResult<u64> {
        match self {
            ReadSource::Live(engine) => engine.count(range),
            ReadSource::Snapshot(snap) => snap.count(range),
        }
    }

    fn scan<'a>(&'a self, range: &ScanRange, order: ScanOrder) -> StoreResult<RawIter<'a>> {
        match self {
            ReadSource::Live(engine) => engine.scan(range, order),
            ReadSource::Snapshot(snap) => snap.scan(range, order),
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// A unit of work against one [`Repository`].
///
/// Obtained from [`Repository::begin_read`] or [`Repository::begin_write`].
/// Dropping an active transaction rolls it back.
pub struct Transaction<'r> {
    repo: &'r Repository,
    mode: TransactionMode,
    state: TransactionState,
    updates: Updates,
    cleared: BTreeSet<u8>,
    source: ReadSource<'r>,
    writer: Option<WriterGuard<'r>>,
}

impl<'r> Transaction<'r> {
    pub(crate) fn new(
        repo: &'r Repository,
        mode: TransactionMode,
        snapshot: Option<Box<dyn ReadView + 'r>>,
        writer: Option<WriterGuard<'r>>,
    ) -> Self {
        let source = match snapshot {
            Some(snap) => ReadSource::Snapshot(snap),
            None => ReadSource::Live(repo.engine()),
        };
        Self {
            repo,
            mode,
            state: TransactionState::Active,
            updates: Updates::new(),
            cleared: BTreeSet::new(),
            source,
            writer,
        }
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// True if reads are served from a point-in-time snapshot.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self.source, ReadSource::Snapshot(_))
    }

    /// True if anything has been buffered since begin.
    pub fn is_dirty(&self) -> bool {
        !self.cleared.is_empty() || self.updates.values().any(|t| !t.is_empty())
    }

    /// Number of buffered inserts and tombstones across all tables.
    pub fn pending_writes(&self) -> usize {
        self.updates.values().map(|t| t.len()).sum()
    }

    fn ensure_active(&self) -> StoreResult<()> {
        match self.state {
            TransactionState::Active => Ok(()),
            other => Err(StoreError::invalid(format!("transaction already {other}"))),
        }
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        self.ensure_active()?;
        if self.mode != TransactionMode::ReadWrite {
            return Err(StoreError::invalid("write on a read-only transaction"));
        }
        Ok(())
    }

    // -- Mutations ----------------------------------------------------------

    /// Buffer `key = value` in `table`, serializing both.
    pub fn insert<K, V>(&mut self, table: &str, key: &K, value: &V) -> StoreResult<()>
    where
        K: StoreKey + ?Sized,
        V: Serialize + ?Sized,
    {
        self.ensure_writable()?;
        let value = encode_value(value)?;
        self.insert_raw(table, &key.encode_key(), &value)
    }

    /// Buffer raw `key = value` bytes in `table`.
    pub fn insert_raw(&mut self, table: &str, key: &[u8], value: &[u8]) -> StoreResult<()> {
        self.ensure_writable()?;
        let prefix = self.repo.get_or_create_table(table)?;
        self.updates
            .entry(prefix)
            .or_default()
            .insert(ByteKey::from(key), Some(value.to_vec()));
        Ok(())
    }

    /// Buffer a tombstone for `key` in `table`.
    pub fn remove<K: StoreKey + ?Sized>(&mut self, table: &str, key: &K) -> StoreResult<()> {
        self.remove_raw(table, &key.encode_key())
    }

    pub fn remove_raw(&mut self, table: &str, key: &[u8]) -> StoreResult<()> {
        self.ensure_writable()?;
        let prefix = self.repo.get_or_create_table(table)?;
        self.updates
            .entry(prefix)
            .or_default()
            .insert(ByteKey::from(key), None);
        Ok(())
    }

    /// Mark `table` cleared. Earlier buffered rows for it are discarded;
    /// rows inserted after this call survive the commit.
    pub fn remove_all_keys(&mut self, table: &str) -> StoreResult<()> {
        self.ensure_writable()?;
        let prefix = self.repo.get_or_create_table(table)?;
        self.updates.remove(&prefix);
        self.cleared.insert(prefix);
        Ok(())
    }

    // -- Point reads --------------------------------------------------------

    fn lookup(&self, prefix: u8, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        if let Some(entry) = self.updates.get(&prefix).and_then(|t| t.get(key)) {
            return Ok(entry.clone());
        }
        if self.cleared.contains(&prefix) {
            return Ok(None);
        }
        self.source.get(&physical_key(prefix, key))
    }

    fn key_exists(&self, prefix: u8, key: &[u8]) -> StoreResult<bool> {
        if let Some(entry) = self.updates.get(&prefix).and_then(|t| t.get(key)) {
            return Ok(entry.is_some());
        }
        if self.cleared.contains(&prefix) {
            return Ok(false);
        }
        self.source.contains(&physical_key(prefix, key))
    }

    pub fn exists<K: StoreKey + ?Sized>(&self, table: &str, key: &K) -> StoreResult<bool> {
        self.exists_raw(table, &key.encode_key())
    }

    pub fn exists_raw(&self, table: &str, key: &[u8]) -> StoreResult<bool> {
        self.ensure_active()?;
        match self.repo.table_prefix(table) {
            Some(prefix) => self.key_exists(prefix, key),
            None => Ok(false),
        }
    }

    /// Look up and deserialize the value stored under `key`.
    pub fn select<K, V>(&self, table: &str, key: &K) -> StoreResult<Option<V>>
    where
        K: StoreKey + ?Sized,
        V: DeserializeOwned,
    {
        self.select_raw(table, &key.encode_key())?
            .map(|bytes| decode_value(&bytes))
            .transpose()
    }

    pub fn select_raw(&self, table: &str, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.ensure_active()?;
        match self.repo.table_prefix(table) {
            Some(prefix) => self.lookup(prefix, key),
            None => Ok(None),
        }
    }

    /// Look up several keys at once. The result has one entry per key, in
    /// the order the keys were given.
    pub fn select_multiple<K, V>(&self, table: &str, keys: &[K]) -> StoreResult<Vec<Option<V>>>
    where
        K: StoreKey,
        V: DeserializeOwned,
    {
        let raw_keys: Vec<Vec<u8>> = keys.iter().map(|k| k.encode_key()).collect();
        self.select_multiple_raw(table, &raw_keys)?
            .into_iter()
            .map(|v| v.map(|bytes| decode_value(&bytes)).transpose())
            .collect()
    }

    pub fn select_multiple_raw<B: AsRef<[u8]>>(
        &self,
        table: &str,
        keys: &[B],
    ) -> StoreResult<Vec<Option<Vec<u8>>>> {
        self.ensure_active()?;
        let Some(prefix) = self.repo.table_prefix(table) else {
            return Ok(vec![None; keys.len()]);
        };
        keys.iter().map(|k| self.lookup(prefix, k.as_ref())).collect()
    }

    /// Number of rows `table` would hold if this transaction committed now.
    pub fn count(&self, table: &str) -> StoreResult<u64> {
        self.ensure_active()?;
        let Some(prefix) = self.repo.table_prefix(table) else {
            return Ok(0);
        };
        let cleared = self.cleared.contains(&prefix);
        let mut count = if cleared {
            0
        } else {
            self.source.count(&ScanRange::prefix(prefix))?
        };

        // The engine count and the per-key lookups are separate reads of a
        // live engine and may straddle another commit.
        if let Some(rows) = self.updates.get(&prefix) {
            for (key, entry) in rows {
                let in_engine = !cleared && self.source.contains(&physical_key(prefix, key.as_bytes()))?;
                match (entry.is_some(), in_engine) {
                    (true, false) => count = count.saturating_add(1),
                    (false, true) => count = count.saturating_sub(1),
                    _ => {}
                }
            }
        }
        Ok(count)
    }

    /// Fail with [`StoreError::ContractViolation`] unless the current value
    /// of `key` equals `expected` (`None` meaning absent).
    pub fn ensure<K, V>(&self, table: &str, key: &K, expected: Option<&V>) -> StoreResult<()>
    where
        K: StoreKey + ?Sized,
        V: Serialize + ?Sized,
    {
        let raw_key = key.encode_key();
        let actual = self.select_raw(table, &raw_key)?;
        let expected = expected.map(encode_value).transpose()?;
        if actual != expected {
            return Err(StoreError::ContractViolation(format!(
                "{table}/{}: expected {}, found {}",
                hex::encode(&raw_key),
                describe(expected.as_deref()),
                describe(actual.as_deref()),
            )));
        }
        Ok(())
    }

    // -- Range reads --------------------------------------------------------

    /// Rows of `table` within `range`, in `order`. The returned cursor is
    /// lazy and single-pass; call again for a fresh one.
    pub fn select_range(
        &self,
        table: &str,
        range: &KeyRange,
        order: ScanOrder,
        keys_only: bool,
    ) -> StoreResult<MergeCursor<'_>> {
        self.ensure_active()?;
        let Some(prefix) = self.repo.table_prefix(table) else {
            return Ok(MergeCursor::empty());
        };
        if range.is_empty() {
            return Ok(MergeCursor::empty());
        }

        let engine: RawIter<'_> = if self.cleared.contains(&prefix) {
            Box::new(std::iter::empty())
        } else {
            let (start, end) = range.to_physical(prefix);
            self.source.scan(&ScanRange::new(start, end), order)?
        };

        let buffered: BufferedIter<'_> = match self.updates.get(&prefix) {
            Some(rows) => {
                let within = rows.range((range.start.clone(), range.end.clone()));
                match order {
                    ScanOrder::Ascending => Box::new(within),
                    ScanOrder::Descending => Box::new(within.rev()),
                }
            }
            None => Box::new(std::iter::empty()),
        };

        Ok(MergeCursor::new(engine, buffered, prefix, order, keys_only))
    }

    pub fn select_forward(
        &self,
        table: &str,
        range: &KeyRange,
        keys_only: bool,
    ) -> StoreResult<MergeCursor<'_>> {
        self.select_range(table, range, ScanOrder::Ascending, keys_only)
    }

    pub fn select_backward(
        &self,
        table: &str,
        range: &KeyRange,
        keys_only: bool,
    ) -> StoreResult<MergeCursor<'_>> {
        self.select_range(table, range, ScanOrder::Descending, keys_only)
    }

    /// Every row of `table`.
    pub fn select_all(
        &self,
        table: &str,
        order: ScanOrder,
        keys_only: bool,
    ) -> StoreResult<MergeCursor<'_>> {
        self.select_range(table, &KeyRange::all(), order, keys_only)
    }

    // -- Termination --------------------------------------------------------

    /// Write the buffer to the engine as one atomic batch.
    ///
    /// On failure the transaction stays active with its buffer intact and
    /// the writer lock released; calling `commit` again re-acquires the
    /// lock before retrying.
    pub fn commit(&mut self) -> StoreResult<()> {
        self.ensure_active()?;

        if self.mode == TransactionMode::Read {
            self.finish(TransactionState::Committed);
            return Ok(());
        }

        let writer = match self.writer.take() {
            Some(guard) => guard,
            None => self.repo.acquire_writer()?,
        };
        let result = self.repo.on_commit(&self.updates, &self.cleared);
        drop(writer);

        result?;
        self.finish(TransactionState::Committed);
        Ok(())
    }

    /// Discard the buffer and release the writer lock.
    pub fn rollback(&mut self) -> StoreResult<()> {
        self.ensure_active()?;
        self.finish(TransactionState::RolledBack);
        self.repo.on_rollback(self.mode);
        Ok(())
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.updates.clear();
        self.cleared.clear();
        self.writer = None;
        self.source = ReadSource::Live(self.repo.engine());
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            if self.is_dirty() {
                debug!(
                    pending = self.pending_writes(),
                    "dropping uncommitted transaction, rolling back"
                );
            }
            if let Err(e) = self.rollback() {
                warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("pending_writes", &self.pending_writes())
            .field("cleared", &self.cleared)
            .field("holds_writer", &self.writer.is_some())
            .finish()
    }
}

fn describe(value: Option<&[u8]>) -> String {
    match value {
        Some(bytes) => format!("{} bytes ({})", bytes.len(), hex::encode(bytes)),
        None => "absent".to_string(),
    }
}
