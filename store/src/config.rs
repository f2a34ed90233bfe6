//! # Store Configuration & Constants
//!
//! Layout constants for the physical key space, plus the runtime knobs a
//! node operator can set when opening a repository.
//!
//! The layout constants are part of the on-disk format. Changing them
//! after a data directory exists makes every row in it unreadable, so
//! don't.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Physical Layout
// ---------------------------------------------------------------------------

/// Prefix byte reserved for the table registry itself. Registry rows live at
/// `[REGISTRY_PREFIX, table_prefix]` and hold the table name as raw bytes.
pub const REGISTRY_PREFIX: u8 = 0x00;

/// First prefix handed out to a user table.
pub const FIRST_TABLE_PREFIX: u8 = 1;

/// Last prefix handed out to a user table. 255 is never allocated so that
/// every table has a successor prefix to bound its scans.
pub const LAST_TABLE_PREFIX: u8 = 254;

/// Maximum number of user tables a single data directory can hold.
pub const MAX_TABLES: usize = (LAST_TABLE_PREFIX - FIRST_TABLE_PREFIX) as usize + 1;

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Which embedded engine backs the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Volatile in-process map. Tests and tooling only.
    Memory,
    /// sled B+ tree.
    Sled,
    /// RocksDB LSM tree (requires the `rocksdb` cargo feature).
    #[serde(rename = "rocksdb")]
    RocksDb,
}

impl BackendKind {
    /// Parse a backend name. Accepts "memory", "sled", or "rocksdb"
    /// (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Some(BackendKind::Memory),
            "sled" => Some(BackendKind::Sled),
            "rocksdb" | "rocks" => Some(BackendKind::RocksDb),
            _ => None,
        }
    }

    /// Name used in logs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Sled => "sled",
            BackendKind::RocksDb => "rocksdb",
        }
    }
}

/// How long `begin_write` may block waiting for the current writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WriterWait {
    /// Block until the current writer finishes, however long that takes.
    #[default]
    Indefinite,
    /// Give up with [`StoreError::LockTimeout`] after this many milliseconds.
    BoundedMs(u64),
}

impl WriterWait {
    /// The wait bound, if any.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            WriterWait::Indefinite => None,
            WriterWait::BoundedMs(ms) => Some(Duration::from_millis(*ms)),
        }
    }
}

/// Runtime options for opening a [`Repository`](crate::Repository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Engine to open.
    pub backend: BackendKind,

    /// Data directory. Ignored by the in-memory backend.
    pub path: PathBuf,

    /// Ask the engine to sync the commit batch to disk before returning.
    pub sync_on_commit: bool,

    /// Writer lock acquisition policy.
    pub writer_wait: WriterWait,

    /// Give read transactions a point-in-time snapshot when the engine
    /// supports one. When false, reads see the latest committed state.
    pub use_snapshots: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sled,
            path: PathBuf::from("data"),
            sync_on_commit: true,
            writer_wait: WriterWait::Indefinite,
            use_snapshots: true,
        }
    }
}

impl StoreConfig {
    /// Config for a volatile in-memory repository.
    pub fn in_memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            path: PathBuf::new(),
            ..Default::default()
        }
    }

    /// Config for an on-disk repository at `path` using `backend`.
    pub fn at<P: AsRef<Path>>(backend: BackendKind, path: P) -> Self {
        Self {
            backend,
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let raw = std::fs::read(path.as_ref())?;
        serde_json::from_slice(&raw).map_err(|e| {
            StoreError::InvalidOperation(format!(
                "invalid store config {}: {e}",
                path.as_ref().display()
            ))
        })
    }
}
