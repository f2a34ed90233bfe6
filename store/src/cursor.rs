//! # Merge Cursor
//!
//! Range reads inside a transaction have two sources: rows already in the
//! engine and rows buffered by the transaction itself. Both arrive sorted
//! in the same direction, so the cursor walks them in lock-step:
//!
//! ```text
//! engine:  a=1      c=3      e=5
//! buffer:      b=2  c=tomb        f=6
//! result:  a=1  b=2               e=5  f=6
//! ```
//!
//! On equal keys the buffered entry wins and both sides advance. Tombstones
//! are consumed but never yielded. The cursor holds two peekable iterators
//! and loops instead of recursing, so arbitrarily long runs of tombstones
//! cost no stack.

use std::cmp::Ordering;
use std::iter::Peekable;

use crate::codec::{decode_value, DecodeKey};
use crate::engine::RawIter;
use crate::error::{StoreError, StoreResult};
use crate::key::{compare_keys, ByteKey, ScanOrder};
use serde::de::DeserializeOwned;

/// Buffered side of a merge: `(key, Some(value) | None for a tombstone)`.
pub(crate) type BufferedIter<'a> = Box<dyn Iterator<Item = (&'a ByteKey, &'a Option<Vec<u8>>)> + 'a>;

/// One row produced by a range read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Logical key (table prefix stripped).
    pub key: Vec<u8>,
    /// Value bytes, `None` for keys-only scans.
    pub value: Option<Vec<u8>>,
}

impl Row {
    /// Decode the key as `K`.
    pub fn key_as<K: DecodeKey>(&self) -> StoreResult<K> {
        K::decode_key(&self.key)
    }

    /// Decode the value as `V`. Fails on keys-only rows.
    pub fn value_as<V: DeserializeOwned>(&self) -> StoreResult<V> {
        match &self.value {
            Some(bytes) => decode_value(bytes),
            None => Err(StoreError::invalid("row was read keys-only")),
        }
    }
}

enum Step {
    Engine,
    Buffer,
    Both,
}

/// Ordered union of an engine scan and a transaction's buffered rows.
pub struct MergeCursor<'a> {
    engine: Peekable<RawIter<'a>>,
    buffer: Peekable<BufferedIter<'a>>,
    prefix: u8,
    order: ScanOrder,
    keys_only: bool,
    done: bool,
}

impl<'a> MergeCursor<'a> {
    pub(crate) fn new(
        engine: RawIter<'a>,
        buffer: BufferedIter<'a>,
        prefix: u8,
        order: ScanOrder,
        keys_only: bool,
    ) -> Self {
        Self {
            engine: engine.peekable(),
            buffer: buffer.peekable(),
            prefix,
            order,
            keys_only,
            done: false,
        }
    }

    /// A cursor that yields nothing, for tables that don't exist yet.
    pub(crate) fn empty() -> Self {
        Self::new(
            Box::new(std::iter::empty()),
            Box::new(std::iter::empty()),
            0,
            ScanOrder::Ascending,
            false,
        )
    }

    fn row(&self, key: &[u8], value: Vec<u8>) -> Row {
        Row {
            key: key.to_vec(),
            value: if self.keys_only { None } else { Some(value) },
        }
    }

    fn next_step(&mut self) -> StoreResult<Option<Step>> {
        // Surface engine errors before comparing anything.
        if matches!(self.engine.peek(), Some(Err(_))) {
            if let Some(Err(e)) = self.engine.next() {
                return Err(e);
            }
        }
        let engine_key = match self.engine.peek() {
            Some(Ok((key, _))) => {
                if key.first() != Some(&self.prefix) {
                    return Err(StoreError::ContractViolation(format!(
                        "engine scan for table prefix {} returned foreign key {}",
                        self.prefix,
                        hex::encode(key)
                    )));
                }
                Some(&key[1..])
            }
            _ => None,
        };
        let buffer_key = self.buffer.peek().map(|(k, _)| k.as_bytes());

        Ok(match (engine_key, buffer_key) {
            (None, None) => None,
            (Some(_), None) => Some(Step::Engine),
            (None, Some(_)) => Some(Step::Buffer),
            (Some(e), Some(b)) => {
                let ord = match self.order {
                    ScanOrder::Ascending => compare_keys(e, b),
                    ScanOrder::Descending => compare_keys(b, e),
                };
                Some(match ord {
                    Ordering::Less => Step::Engine,
                    Ordering::Greater => Step::Buffer,
                    Ordering::Equal => Step::Both,
                })
            }
        })
    }
}

impl Iterator for MergeCursor<'_> {
    type Item = StoreResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let step = match self.next_step() {
                Ok(Some(step)) => step,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            if let Step::Engine = step {
                if let Some(Ok((key, value))) = self.engine.next() {
                    return Some(Ok(self.row(&key[1..], value)));
                }
                continue;
            }
            if let Step::Both = step {
                // Shadowed by the buffered entry.
                self.engine.next();
            }
            if let Some((key, entry)) = self.buffer.next() {
                if let Some(value) = entry {
                    return Some(Ok(self.row(key.as_bytes(), value.clone())));
                }
                // Tombstone: consumed, not yielded.
            }
        }
        None
    }
}
