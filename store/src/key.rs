//! # Keys, Ordering, and Ranges
//!
//! One comparer orders every key in the store: plain lexicographic byte
//! order, where a key that is a strict prefix of another sorts first. The
//! engines iterate in this order, the transaction buffer sorts in this
//! order, and the merge cursor compares heads in this order. If any of the
//! three disagree, range merges silently return garbage.
//!
//! [`ByteKey`] is the owned, value-typed key used by every in-memory map so
//! that equality, hashing, and ordering are all structural.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

// ---------------------------------------------------------------------------
// Comparer
// ---------------------------------------------------------------------------

/// Total order over byte sequences: lexicographic, shorter-is-less on a
/// common-prefix tie.
pub fn compare_keys(a: &[u8], b: &[u8]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        if x != y {
            return x.cmp(y);
        }
    }
    a.len().cmp(&b.len())
}

// ---------------------------------------------------------------------------
// ByteKey
// ---------------------------------------------------------------------------

/// An owned key with structural equality and [`compare_keys`] ordering.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct ByteKey(Vec<u8>);

impl ByteKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        ByteKey(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Ord for ByteKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_keys(&self.0, &other.0)
    }
}

impl PartialOrd for ByteKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// `[u8]`'s own Ord is the same lexicographic order, which is what makes
// borrowed lookups into `BTreeMap<ByteKey, _>` sound.
impl Borrow<[u8]> for ByteKey {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for ByteKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for ByteKey {
    fn from(v: Vec<u8>) -> Self {
        ByteKey(v)
    }
}

impl From<&[u8]> for ByteKey {
    fn from(v: &[u8]) -> Self {
        ByteKey(v.to_vec())
    }
}

impl From<&str> for ByteKey {
    fn from(v: &str) -> Self {
        ByteKey(v.as_bytes().to_vec())
    }
}

impl fmt::Debug for ByteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ByteKey({})", hex::encode(&self.0))
    }
}

impl fmt::Display for ByteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// Direction of a range scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOrder {
    #[default]
    Ascending,
    Descending,
}

/// A range of logical keys within one table.
///
/// `start`/`end` correspond to `firstKey`/`lastKey`; `Included` vs
/// `Excluded` are the inclusivity flags and `Unbounded` means "from the
/// first row" / "to the last row" of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound<ByteKey>,
    pub end: Bound<ByteKey>,
}

impl KeyRange {
    /// The whole table.
    pub fn all() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
        }
    }

    /// Everything from `first` onwards.
    pub fn starting_at(first: impl Into<ByteKey>, inclusive: bool) -> Self {
        Self {
            start: bound(first.into(), inclusive),
            end: Bound::Unbounded,
        }
    }

    /// Everything up to `last`.
    pub fn up_to(last: impl Into<ByteKey>, inclusive: bool) -> Self {
        Self {
            start: Bound::Unbounded,
            end: bound(last.into(), inclusive),
        }
    }

    /// Everything between `first` and `last` with explicit inclusivity.
    pub fn between(
        first: impl Into<ByteKey>,
        include_first: bool,
        last: impl Into<ByteKey>,
        include_last: bool,
    ) -> Self {
        Self {
            start: bound(first.into(), include_first),
            end: bound(last.into(), include_last),
        }
    }

    /// True if `key` falls inside the range.
    pub fn contains(&self, key: &[u8]) -> bool {
        let after_start = match &self.start {
            Bound::Unbounded => true,
            Bound::Included(s) => compare_keys(key, s.as_bytes()) != Ordering::Less,
            Bound::Excluded(s) => compare_keys(key, s.as_bytes()) == Ordering::Greater,
        };
        let before_end = match &self.end {
            Bound::Unbounded => true,
            Bound::Included(e) => compare_keys(key, e.as_bytes()) != Ordering::Greater,
            Bound::Excluded(e) => compare_keys(key, e.as_bytes()) == Ordering::Less,
        };
        after_start && before_end
    }

    /// True if no key can fall inside the range (start after end, or equal
    /// bounds with at least one side excluded).
    pub fn is_empty(&self) -> bool {
        bounds_empty(self.start.as_ref(), self.end.as_ref())
    }

    /// Map the logical range onto the physical key space of a table.
    /// Unbounded sides are clamped to the table's own prefix so a scan can
    /// never leak into the neighbouring table.
    pub(crate) fn to_physical(&self, prefix: u8) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        let start = match &self.start {
            Bound::Unbounded => Bound::Included(vec![prefix]),
            Bound::Included(k) => Bound::Included(physical_key(prefix, k.as_bytes())),
            Bound::Excluded(k) => Bound::Excluded(physical_key(prefix, k.as_bytes())),
        };
        let end = match &self.end {
            Bound::Unbounded => Bound::Excluded(vec![prefix + 1]),
            Bound::Included(k) => Bound::Included(physical_key(prefix, k.as_bytes())),
            Bound::Excluded(k) => Bound::Excluded(physical_key(prefix, k.as_bytes())),
        };
        (start, end)
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

fn bound(key: ByteKey, inclusive: bool) -> Bound<ByteKey> {
    if inclusive {
        Bound::Included(key)
    } else {
        Bound::Excluded(key)
    }
}

/// Emptiness test shared by logical and physical ranges.
pub(crate) fn bounds_empty<K: AsRef<[u8]>>(start: Bound<&K>, end: Bound<&K>) -> bool {
    match (start, end) {
        (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
        (Bound::Included(s), Bound::Included(e)) => {
            compare_keys(s.as_ref(), e.as_ref()) == Ordering::Greater
        }
        (Bound::Included(s), Bound::Excluded(e))
        | (Bound::Excluded(s), Bound::Included(e))
        | (Bound::Excluded(s), Bound::Excluded(e)) => {
            compare_keys(s.as_ref(), e.as_ref()) != Ordering::Less
        }
    }
}

/// `prefix ++ logical_key`.
pub(crate) fn physical_key(prefix: u8, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.push(prefix);
    out.extend_from_slice(key);
    out
}
