//! Hash-consing tables.
//!
//! Every sub-expression, primitive, and metadata record is interned by a
//! stable structural hash. The tables keep insertion order (the packer's
//! dense index assignment is iteration order), store the full value
//! alongside its hash, and verify equality on reuse so an accidental
//! collision surfaces as an integrity error instead of silent corruption.

use indexmap::IndexMap;
use xxhash_rust::xxh3::Xxh3;

use crate::error::{Error, Result};

const HASH_SEED: u64 = 0x1d8a_f0c3_97b4_52e6;

/// Structural hasher with a platform-independent byte stream: explicit
/// discriminant bytes, little-endian scalars, floats by bit pattern.
pub(crate) struct StableHasher {
    inner: Xxh3,
}

impl StableHasher {
    pub fn new() -> Self {
        Self {
            inner: Xxh3::with_seed(HASH_SEED),
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.inner.update(&[v]);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.inner.update(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.inner.update(&v.to_le_bytes());
    }

    pub fn write_f64(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    pub fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_u64(s.len() as u64);
        self.inner.update(s.as_bytes());
    }

    pub fn finish(self) -> u64 {
        self.inner.digest()
    }
}

/// Structural hashing with a defined serialization order.
pub(crate) trait StableHash {
    fn stable_hash(&self, h: &mut StableHasher);
}

/// One content-addressed table: stable hash to stored value, in insertion
/// order.
pub(crate) struct ConsTable<T> {
    name: &'static str,
    entries: IndexMap<u64, T>,
}

impl<T: StableHash + PartialEq> ConsTable<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: IndexMap::new(),
        }
    }

    /// Intern a value, returning its stable hash. A hash hit with a
    /// different stored value is an integrity failure.
    pub fn intern(&mut self, value: T) -> Result<u64> {
        let mut hasher = StableHasher::new();
        value.stable_hash(&mut hasher);
        let hash = hasher.finish();
        match self.entries.get(&hash) {
            Some(existing) if *existing == value => Ok(hash),
            Some(_) => Err(Error::Integrity {
                table: self.name,
                hash,
            }),
            None => {
                self.entries.insert(hash, value);
                Ok(hash)
            }
        }
    }

    /// Dense index of an interned value (insertion order).
    pub fn index_of(&self, hash: u64) -> Option<usize> {
        self.entries.get_index_of(&hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Values in insertion order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }
}
