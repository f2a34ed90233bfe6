//! # Table Registry
//!
//! Makes one flat, prefix-addressed engine look like many named tables.
//! Each table owns a single prefix byte; every row of the table lives at
//! `prefix ++ logical key`.
//!
//! ## Persisted Layout
//!
//! | Physical key       | Value              |
//! |--------------------|--------------------|
//! | `0x00 ++ prefix`   | table name (UTF-8) |
//!
//! Prefixes are handed out monotonically starting at 1 and never reused.
//! The in-memory map is only a cache: on open it is rebuilt from the
//! registry rows, never trusted across restarts.

use std::collections::HashMap;

use tracing::info;

use crate::config::{FIRST_TABLE_PREFIX, LAST_TABLE_PREFIX, MAX_TABLES, REGISTRY_PREFIX};
use crate::engine::{ReadView, ScanRange, StorageEngine, WriteBatch};
use crate::error::{StoreError, StoreResult};
use crate::key::ScanOrder;

/// A named table and the prefix byte its rows are stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    pub prefix: u8,
}

/// Outcome of [`TableRegistry::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reservation {
    Existing(u8),
    New(u8),
}

/// Name-to-prefix map for one repository.
///
/// Creating a table is split in three so the caller can keep the map
/// unlocked while the registry row is written: [`reserve`](Self::reserve)
/// under the lock, [`persist`](Self::persist) without it, then
/// [`publish`](Self::publish) under the lock again. Callers serialize
/// creations themselves.
#[derive(Debug, Default)]
pub(crate) struct TableRegistry {
    by_name: HashMap<String, u8>,
    /// Highest prefix allocated so far, `REGISTRY_PREFIX` when empty.
    last_prefix: u8,
}

impl TableRegistry {
    /// Rebuild the registry by scanning the reserved namespace.
    pub(crate) fn load<V: ReadView + ?Sized>(view: &V) -> StoreResult<Self> {
        let mut registry = TableRegistry {
            by_name: HashMap::new(),
            last_prefix: REGISTRY_PREFIX,
        };

        for entry in view.scan(&ScanRange::prefix(REGISTRY_PREFIX), ScanOrder::Ascending)? {
            let (key, value) = entry?;
            let prefix = match key.as_slice() {
                [REGISTRY_PREFIX, p] if (FIRST_TABLE_PREFIX..=LAST_TABLE_PREFIX).contains(p) => *p,
                _ => {
                    return Err(StoreError::Corruption(format!(
                        "malformed registry key {}",
                        hex::encode(&key)
                    )))
                }
            };
            let name = String::from_utf8(value).map_err(|_| {
                StoreError::Corruption(format!("registry entry {prefix} is not UTF-8"))
            })?;
            if name.is_empty() {
                return Err(StoreError::Corruption(format!(
                    "registry entry {prefix} has an empty name"
                )));
            }
            if let Some(existing) = registry.by_name.insert(name.clone(), prefix) {
                return Err(StoreError::Corruption(format!(
                    "table {name:?} registered under both {existing} and {prefix}"
                )));
            }
            registry.last_prefix = registry.last_prefix.max(prefix);
        }

        Ok(registry)
    }

    pub(crate) fn get(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).copied()
    }

    /// Pick the prefix a new table `name` would get, without recording it.
    /// Returns the existing prefix when the table is already registered.
    pub(crate) fn reserve(&self, name: &str) -> StoreResult<Reservation> {
        if let Some(prefix) = self.get(name) {
            return Ok(Reservation::Existing(prefix));
        }
        if name.is_empty() {
            return Err(StoreError::invalid("table name must not be empty"));
        }
        if self.last_prefix >= LAST_TABLE_PREFIX {
            return Err(StoreError::ResourceExhausted(format!(
                "all {MAX_TABLES} table prefixes are in use, cannot create {name:?}"
            )));
        }
        Ok(Reservation::New(self.last_prefix + 1))
    }

    /// Write the registry row for a reserved prefix.
    pub(crate) fn persist(
        engine: &dyn StorageEngine,
        name: &str,
        prefix: u8,
        sync: bool,
    ) -> StoreResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(vec![REGISTRY_PREFIX, prefix], name.as_bytes().to_vec());
        engine.write_batch(batch, sync)
    }

    /// Make a persisted table visible to lookups.
    pub(crate) fn publish(&mut self, name: &str, prefix: u8) {
        self.by_name.insert(name.to_string(), prefix);
        self.last_prefix = self.last_prefix.max(prefix);
        info!(table = name, prefix, "table created");
    }

    /// All tables, ordered by prefix.
    pub(crate) fn tables(&self) -> Vec<Table> {
        let mut out: Vec<Table> = self
            .by_name
            .iter()
            .map(|(name, prefix)| Table {
                name: name.clone(),
                prefix: *prefix,
            })
            .collect();
        out.sort_by_key(|t| t.prefix);
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.by_name.len()
    }
}
