//! # Key and Value Encoding
//!
//! Keys must encode so that byte order equals the natural order of the key
//! type, otherwise range scans come back in the wrong order. Integers are
//! big-endian (signed ones with the sign bit flipped), strings and byte
//! blobs are stored as-is, and fixed-width keys can be paired into
//! composite keys.
//!
//! Values go through serde + bincode. Compact, fast, deterministic. Domain
//! stores that need a different wire format can use the `*_raw`
//! transaction methods and bring their own.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A type that can be used as an order-preserving table key.
pub trait StoreKey {
    /// Encode into bytes whose lexicographic order matches `Ord` on `Self`.
    fn encode_key(&self) -> Vec<u8>;
}

/// A key type that can be rebuilt from its encoding.
pub trait DecodeKey: StoreKey + Sized {
    /// Decode bytes produced by [`StoreKey::encode_key`].
    fn decode_key(bytes: &[u8]) -> StoreResult<Self>;
}

/// Keys with a constant encoded width, usable as the leading part of a
/// composite key.
pub trait FixedWidthKey: DecodeKey {
    const WIDTH: usize;
}

fn width_error(expected: usize, got: usize) -> StoreError {
    StoreError::Corruption(format!(
        "key has {got} bytes, expected {expected}"
    ))
}

macro_rules! impl_unsigned_key {
    ($($t:ty),*) => {$(
        impl StoreKey for $t {
            fn encode_key(&self) -> Vec<u8> {
                self.to_be_bytes().to_vec()
            }
        }

        impl DecodeKey for $t {
            fn decode_key(bytes: &[u8]) -> StoreResult<Self> {
                let arr = bytes
                    .try_into()
                    .map_err(|_| width_error(std::mem::size_of::<$t>(), bytes.len()))?;
                Ok(<$t>::from_be_bytes(arr))
            }
        }

        impl FixedWidthKey for $t {
            const WIDTH: usize = std::mem::size_of::<$t>();
        }
    )*};
}

impl_unsigned_key!(u8, u16, u32, u64);

impl StoreKey for i64 {
    fn encode_key(&self) -> Vec<u8> {
        ((*self as u64) ^ (1 << 63)).to_be_bytes().to_vec()
    }
}

impl DecodeKey for i64 {
    fn decode_key(bytes: &[u8]) -> StoreResult<Self> {
        let raw = u64::decode_key(bytes)?;
        Ok((raw ^ (1 << 63)) as i64)
    }
}

impl FixedWidthKey for i64 {
    const WIDTH: usize = 8;
}

impl<const N: usize> StoreKey for [u8; N] {
    fn encode_key(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl<const N: usize> DecodeKey for [u8; N] {
    fn decode_key(bytes: &[u8]) -> StoreResult<Self> {
        bytes.try_into().map_err(|_| width_error(N, bytes.len()))
    }
}

impl<const N: usize> FixedWidthKey for [u8; N] {
    const WIDTH: usize = N;
}

impl StoreKey for Vec<u8> {
    fn encode_key(&self) -> Vec<u8> {
        self.clone()
    }
}

impl DecodeKey for Vec<u8> {
    fn decode_key(bytes: &[u8]) -> StoreResult<Self> {
        Ok(bytes.to_vec())
    }
}

impl StoreKey for [u8] {
    fn encode_key(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl StoreKey for String {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl DecodeKey for String {
    fn decode_key(bytes: &[u8]) -> StoreResult<Self> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| StoreError::Corruption(format!("key is not UTF-8: {e}")))
    }
}

impl StoreKey for str {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl<A: StoreKey, B: StoreKey> StoreKey for (A, B) {
    fn encode_key(&self) -> Vec<u8> {
        let mut out = self.0.encode_key();
        out.extend(self.1.encode_key());
        out
    }
}

impl<A: FixedWidthKey, B: DecodeKey> DecodeKey for (A, B) {
    fn decode_key(bytes: &[u8]) -> StoreResult<Self> {
        if bytes.len() < A::WIDTH {
            return Err(width_error(A::WIDTH, bytes.len()));
        }
        let (head, tail) = bytes.split_at(A::WIDTH);
        Ok((A::decode_key(head)?, B::decode_key(tail)?))
    }
}

impl<T: StoreKey + ?Sized> StoreKey for &T {
    fn encode_key(&self) -> Vec<u8> {
        (**self).encode_key()
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// Serialize a value for storage.
pub fn encode_value<V: Serialize + ?Sized>(value: &V) -> StoreResult<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a stored value.
pub fn decode_value<V: DeserializeOwned>(bytes: &[u8]) -> StoreResult<V> {
    Ok(bincode::deserialize(bytes)?)
}
