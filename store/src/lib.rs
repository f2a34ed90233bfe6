// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # NOVA Store
//!
//! Transactional key-value storage for the NOVA node. Headers, proven
//! headers, block bodies and chain metadata all live in one embedded engine
//! which this crate carves into named tables.
//!
//! ## Architecture
//!
//! - **engine**: Adapters for the embedded engines (in-memory, sled,
//!   RocksDB). Each one only has to do point reads, ordered range scans and
//!   atomic batch writes.
//! - **table**: Maps table names to one-byte key prefixes, persisted in a
//!   reserved registry namespace.
//! - **transaction**: Buffers writes, tombstones and table clears in
//!   memory and answers reads through the buffer first.
//! - **cursor**: Merges an engine scan with buffered rows in either
//!   direction.
//! - **repository**: Owns the engine, the registry and the writer lock;
//!   turns a committed buffer into one atomic batch.
//! - **codec**: Order-preserving key encodings and bincode values.
//!
//! ## Quick Start
//!
//! ```no_run
//! use nova_store::{KeyRange, Repository, ScanOrder, StoreConfig};
//!
//! # fn main() -> nova_store::StoreResult<()> {
//! let repo = Repository::open(&StoreConfig::in_memory())?;
//!
//! let mut tx = repo.begin_write()?;
//! tx.insert("headers", &42u64, &"header bytes")?;
//! tx.commit()?;
//!
//! let tx = repo.begin_read()?;
//! for row in tx.select_range("headers", &KeyRange::all(), ScanOrder::Descending, false)? {
//!     let row = row?;
//!     println!("{} => {}", row.key_as::<u64>()?, row.value_as::<String>()?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! 1. A commit is all or nothing, even when the engine write fails halfway.
//! 2. Nothing a transaction buffers is visible outside it before commit.
//! 3. One writer at a time; readers never wait.

pub mod codec;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod key;
mod lock;
pub mod metrics;
pub mod repository;
pub mod table;
pub mod transaction;

pub use codec::{decode_value, encode_value, DecodeKey, FixedWidthKey, StoreKey};
pub use config::{BackendKind, StoreConfig, WriterWait};
pub use cursor::{MergeCursor, Row};
pub use engine::{MemoryEngine, ReadView, ScanRange, SledEngine, StorageEngine, WriteBatch};
#[cfg(feature = "rocksdb")]
pub use engine::RocksDbEngine;
pub use error::{StoreError, StoreResult};
pub use key::{compare_keys, ByteKey, KeyRange, ScanOrder};
pub use metrics::StoreMetrics;
pub use repository::Repository;
pub use table::Table;
pub use transaction::{Transaction, TransactionMode, TransactionState};
