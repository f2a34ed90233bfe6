//! Error types for the NOVA store.
//!
//! Every fallible store operation returns a [`StoreError`]. The variants
//! map one-to-one onto the failure classes callers are expected to handle
//! differently: caller mistakes, exhausted prefix space, on-disk corruption,
//! engine I/O failures, and broken invariants.

use thiserror::Error;

/// Errors that can occur while operating on a repository or transaction.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The call is not allowed in the transaction's current mode or state
    /// (e.g. `insert` on a read transaction, anything after `commit`).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Every table prefix byte is already allocated.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A persisted registry or data entry could not be decoded.
    #[error("corruption: {0}")]
    Corruption(String),

    /// The storage engine failed on open, read, or batch write.
    #[error("storage error: {0}")]
    Storage(String),

    /// A caller-supplied expectation or internal invariant did not hold.
    /// Not recoverable; the caller should abort whatever it was doing.
    #[error("contract violation: {0}")]
    ContractViolation(String),

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The writer lock was not acquired within the configured bound.
    #[error("timed out after {waited_ms}ms waiting for the writer lock")]
    LockTimeout {
        /// Milliseconds spent waiting before giving up.
        waited_ms: u64,
    },
}

/// Result alias used throughout the crate.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        match e {
            sled::Error::Corruption { .. } => StoreError::Corruption(e.to_string()),
            other => StoreError::Storage(other.to_string()),
        }
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        match e.kind() {
            rocksdb::ErrorKind::Corruption => StoreError::Corruption(e.into_string()),
            _ => StoreError::Storage(e.into_string()),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl StoreError {
    /// Shorthand used by the transaction state checks.
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidOperation(msg.into())
    }
}
