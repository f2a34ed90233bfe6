//! # Repository
//!
//! One storage engine, one table registry, one writer lock. The repository
//! is the factory for [`Transaction`]s and the only place a transaction's
//! buffer is turned into engine writes.
//!
//! ## Commit Translation
//!
//! For every table cleared in the transaction, each row currently in the
//! engine under that table's prefix becomes a delete (unless the buffer
//! rewrites the same key). Every buffered insert becomes a put of
//! `prefix ++ key`, every tombstone a delete. The whole lot goes to the
//! engine as a single batch, so a crash or a failed write leaves either
//! all of it or none of it.
//!
//! ## Concurrency
//!
//! `Repository` is `Send + Sync`; share it behind an `Arc`. Any number of
//! read transactions run concurrently with each other and with the single
//! read-write transaction the writer lock admits. Creating a table takes
//! its own lock, separate from the one guarding name lookups.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::engine::{open_engine, ScanRange, StorageEngine, WriteBatch};
use crate::error::StoreResult;
use crate::key::{physical_key, ScanOrder};
use crate::lock::{WriterGuard, WriterLock};
use crate::metrics::StoreMetrics;
use crate::table::{Reservation, Table, TableRegistry};
use crate::transaction::{Transaction, TransactionMode, Updates};

pub struct Repository {
    engine: Box<dyn StorageEngine>,
    registry: Mutex<TableRegistry>,
    /// Serializes table creation.
    creating: Mutex<()>,
    writer: WriterLock,
    config: StoreConfig,
    metrics: StoreMetrics,
}

impl Repository {
    /// Open the backend named in `config` and load its table registry.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let engine = open_engine(config)?;
        Self::with_engine(engine, config.clone())
    }

    /// Wrap an already-open engine.
    pub fn with_engine(engine: Box<dyn StorageEngine>, config: StoreConfig) -> StoreResult<Self> {
        let registry = TableRegistry::load(engine.as_ref())?;
        let metrics = StoreMetrics::new();
        metrics.tables.set(registry.len() as i64);

        info!(
            backend = engine.name(),
            path = %config.path.display(),
            tables = registry.len(),
            "repository opened"
        );

        Ok(Self {
            engine,
            registry: Mutex::new(registry),
            creating: Mutex::new(()),
            writer: WriterLock::new(),
            config,
            metrics,
        })
    }

    /// Start a transaction. `ReadWrite` blocks until the writer lock is
    /// free (or the configured wait elapses).
    pub fn begin(&self, mode: TransactionMode) -> StoreResult<Transaction<'_>> {
        match mode {
            TransactionMode::Read => {
                let snapshot = if self.config.use_snapshots {
                    self.engine.snapshot()?
                } else {
                    None
                };
                Ok(Transaction::new(self, mode, snapshot, None))
            }
            TransactionMode::ReadWrite => {
                let guard = self.acquire_writer()?;
                debug!("write transaction started");
                Ok(Transaction::new(self, mode, None, Some(guard)))
            }
        }
    }

    pub fn begin_read(&self) -> StoreResult<Transaction<'_>> {
        self.begin(TransactionMode::Read)
    }

    pub fn begin_write(&self) -> StoreResult<Transaction<'_>> {
        self.begin(TransactionMode::ReadWrite)
    }

    /// Every registered table, ordered by prefix.
    pub fn tables(&self) -> Vec<Table> {
        self.registry.lock().tables()
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        self.table_prefix(name).map(|prefix| Table {
            name: name.to_string(),
            prefix,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn metrics(&self) -> &StoreMetrics {
        &self.metrics
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Force the engine's buffered writes to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.engine.flush()
    }

    // -- Crate-internal -----------------------------------------------------

    pub(crate) fn engine(&self) -> &dyn StorageEngine {
        self.engine.as_ref()
    }

    pub(crate) fn table_prefix(&self, name: &str) -> Option<u8> {
        self.registry.lock().get(name)
    }

    /// Never holds the registry lock across the engine write.
    pub(crate) fn get_or_create_table(&self, name: &str) -> StoreResult<u8> {
        if let Some(prefix) = self.table_prefix(name) {
            return Ok(prefix);
        }

        let _creating = self.creating.lock();
        let prefix = match self.registry.lock().reserve(name)? {
            Reservation::Existing(prefix) => return Ok(prefix),
            Reservation::New(prefix) => prefix,
        };
        TableRegistry::persist(self.engine(), name, prefix, self.config.sync_on_commit)?;

        let mut registry = self.registry.lock();
        registry.publish(name, prefix);
        self.metrics.tables.set(registry.len() as i64);
        Ok(prefix)
    }

    pub(crate) fn acquire_writer(&self) -> StoreResult<WriterGuard<'_>> {
        let started = Instant::now();
        let guard = self.writer.acquire(self.config.writer_wait.timeout());
        self.metrics
            .writer_wait_seconds
            .observe(started.elapsed().as_secs_f64());
        guard
    }

    /// Translate a transaction buffer into one engine batch and apply it.
    pub(crate) fn on_commit(&self, updates: &Updates, cleared: &BTreeSet<u8>) -> StoreResult<()> {
        let started = Instant::now();
        let result = self.build_batch(updates, cleared).and_then(|batch| {
            let (puts, deletes) = batch.counts();
            if batch.is_empty() {
                return Ok((0, 0));
            }
            self.engine.write_batch(batch, self.config.sync_on_commit)?;
            Ok((puts, deletes))
        });

        match result {
            Ok((puts, deletes)) => {
                self.metrics.commits_total.inc();
                self.metrics.rows_written_total.inc_by(puts as u64);
                self.metrics.rows_deleted_total.inc_by(deletes as u64);
                let elapsed = started.elapsed();
                self.metrics
                    .commit_duration_seconds
                    .observe(elapsed.as_secs_f64());
                debug!(
                    puts,
                    deletes,
                    cleared = cleared.len(),
                    elapsed_us = elapsed.as_micros() as u64,
                    "transaction committed"
                );
                Ok(())
            }
            Err(e) => {
                self.metrics.commit_failures_total.inc();
                warn!(error = %e, "commit failed, transaction left active");
                Err(e)
            }
        }
    }

    pub(crate) fn on_rollback(&self, mode: TransactionMode) {
        self.metrics.rollbacks_total.inc();
        debug!(?mode, "transaction rolled back");
    }

    fn build_batch(&self, updates: &Updates, cleared: &BTreeSet<u8>) -> StoreResult<WriteBatch> {
        let mut batch = WriteBatch::new();

        for &prefix in cleared {
            let rewritten = updates.get(&prefix);
            for entry in self
                .engine
                .scan(&ScanRange::prefix(prefix), ScanOrder::Ascending)?
            {
                let (key, _) = entry?;
                let shadowed = rewritten.map_or(false, |rows| rows.contains_key(&key[1..]));
                if !shadowed {
                    batch.delete(key);
                }
            }
        }

        for (&prefix, rows) in updates {
            for (key, entry) in rows {
                let physical = physical_key(prefix, key.as_bytes());
                match entry {
                    Some(value) => batch.put(physical, value.clone()),
                    None => batch.delete(physical),
                }
            }
        }

        Ok(batch)
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("backend", &self.engine.name())
            .field("path", &self.config.path)
            .field("tables", &self.registry.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryEngine;
    use crate::error::StoreError;
    use crate::engine::{RawIter, ReadView};
    use crate::key::KeyRange;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    /// Memory engine whose synced writes take a while.
    struct SlowEngine {
        inner: MemoryEngine,
        writing: Arc<AtomicBool>,
    }

    impl ReadView for SlowEngine {
        fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn scan<'a>(&'a self, range: &ScanRange, order: ScanOrder) -> StoreResult<RawIter<'a>> {
            self.inner.scan(range, order)
        }
    }

    impl StorageEngine for SlowEngine {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn write_batch(&self, batch: WriteBatch, sync: bool) -> StoreResult<()> {
            if sync {
                self.writing.store(true, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(400));
            }
            self.inner.write_batch(batch, sync)
        }

        fn flush(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    fn repo() -> Repository {
        Repository::open(&StoreConfig::in_memory()).unwrap()
    }

    #[test]
    fn commit_makes_writes_visible_to_later_readers() {
        let repo = repo();
        let mut tx = repo.begin_write().unwrap();
        tx.insert_raw("headers", b"h1", b"one").unwrap();
        tx.insert_raw("headers", b"h2", b"two").unwrap();

        let reader = repo.begin_read().unwrap();
        assert_eq!(reader.select_raw("headers", b"h1").unwrap(), None);
        drop(reader);

        tx.commit().unwrap();

        let reader = repo.begin_read().unwrap();
        assert_eq!(
            reader.select_raw("headers", b"h1").unwrap(),
            Some(b"one".to_vec())
        );
        assert_eq!(reader.count("headers").unwrap(), 2);
        assert_eq!(repo.metrics().commits_total.get(), 1);
        assert_eq!(repo.metrics().rows_written_total.get(), 2);
    }

    #[test]
    fn clear_then_insert_keeps_only_new_rows() {
        let repo = repo();
        let mut tx = repo.begin_write().unwrap();
        for k in [b"a", b"b", b"c"] {
            tx.insert_raw("t", k, b"old").unwrap();
        }
        tx.commit().unwrap();

        let mut tx = repo.begin_write().unwrap();
        tx.remove_all_keys("t").unwrap();
        tx.insert_raw("t", b"b", b"new").unwrap();
        tx.insert_raw("t", b"z", b"new").unwrap();
        assert_eq!(tx.count("t").unwrap(), 2);
        tx.commit().unwrap();

        let reader = repo.begin_read().unwrap();
        let rows: Vec<_> = reader
            .select_all("t", ScanOrder::Ascending, false)
            .unwrap()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, b"b".to_vec());
        assert_eq!(rows[0].value, Some(b"new".to_vec()));
        assert_eq!(rows[1].key, b"z".to_vec());
    }

    #[test]
    fn empty_commit_writes_nothing() {
        let engine = MemoryEngine::new();
        engine.fail_writes_after(0);
        let repo = Repository::with_engine(Box::new(engine), StoreConfig::in_memory()).unwrap();
        let mut tx = repo.begin_write().unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn failed_commit_leaves_transaction_retryable() {
        let engine = MemoryEngine::new();
        let repo =
            Repository::with_engine(Box::new(engine.clone()), StoreConfig::in_memory()).unwrap();

        // Create the table up front so the injected failure hits the commit.
        let mut tx = repo.begin_write().unwrap();
        tx.insert_raw("t", b"seed", b"0").unwrap();
        tx.commit().unwrap();

        let mut tx = repo.begin_write().unwrap();
        tx.insert_raw("t", b"k1", b"1").unwrap();
        tx.insert_raw("t", b"k2", b"2").unwrap();
        engine.fail_writes_after(1);

        assert!(matches!(tx.commit(), Err(StoreError::Storage(_))));
        assert_eq!(tx.state(), crate::transaction::TransactionState::Active);
        assert_eq!(tx.pending_writes(), 2);
        assert_eq!(repo.metrics().commit_failures_total.get(), 1);

        {
            let reader = repo.begin_read().unwrap();
            assert!(!reader.exists_raw("t", b"k1").unwrap());
        }

        tx.commit().unwrap();
        let reader = repo.begin_read().unwrap();
        assert!(reader.exists_raw("t", b"k1").unwrap());
        assert!(reader.exists_raw("t", b"k2").unwrap());
    }

    #[test]
    fn reads_of_unknown_tables_do_not_create_them() {
        let repo = repo();
        let reader = repo.begin_read().unwrap();
        assert_eq!(reader.select_raw("ghost", b"k").unwrap(), None);
        assert_eq!(reader.count("ghost").unwrap(), 0);
        assert_eq!(
            reader
                .select_range("ghost", &KeyRange::all(), ScanOrder::Ascending, false)
                .unwrap()
                .count(),
            0
        );
        assert!(repo.tables().is_empty());
        assert!(repo.table("ghost").is_none());
    }

    #[test]
    fn tables_survive_rollback() {
        let repo = repo();
        let mut tx = repo.begin_write().unwrap();
        tx.insert_raw("blocks", b"k", b"v").unwrap();
        tx.rollback().unwrap();

        assert_eq!(
            repo.tables(),
            vec![Table {
                name: "blocks".into(),
                prefix: 1
            }]
        );
        assert_eq!(repo.metrics().rollbacks_total.get(), 1);
        assert_eq!(repo.metrics().tables.get(), 1);
    }

    #[test]
    fn table_creation_does_not_stall_readers() {
        let writing = Arc::new(AtomicBool::new(false));
        let engine = SlowEngine {
            inner: MemoryEngine::new(),
            writing: writing.clone(),
        };
        let config = StoreConfig::in_memory();
        assert!(config.sync_on_commit);
        let repo = Repository::with_engine(Box::new(engine), config).unwrap();

        thread::scope(|s| {
            let creator = s.spawn(|| {
                let mut tx = repo.begin_write().unwrap();
                tx.insert_raw("new_table", b"k", b"v").unwrap();
                tx.rollback().unwrap();
            });

            while !writing.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(1));
            }
            let started = Instant::now();
            let reader = repo.begin_read().unwrap();
            assert_eq!(reader.select_raw("other", b"k").unwrap(), None);
            assert!(repo.table("new_table").is_none());
            let elapsed = started.elapsed();
            assert!(elapsed < Duration::from_millis(100), "reader waited {elapsed:?}");

            creator.join().unwrap();
        });

        assert_eq!(repo.table("new_table").map(|t| t.prefix), Some(1));
    }
}
