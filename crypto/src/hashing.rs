//! Hashing functions using BLAKE3
//!
//! Typed hashes use a fixed byte layout so that off-chain tooling can
//! reproduce them bit for bit:
//! - `u64` as 8 big-endian bytes
//! - hashes and addresses as their 32 raw bytes
//! - lists as the BLAKE3 hash of their concatenated encoded elements
//! - strings as the BLAKE3 hash of their UTF-8 bytes

use mosaic_core::{Address, Hash};

/// Compute BLAKE3 hash of data
pub fn blake3_hash(data: &[u8]) -> Hash {
    let hash = blake3::hash(data);
    Hash::from_bytes(*hash.as_bytes())
}

/// Default hash function (BLAKE3)
pub fn hash(data: &[u8]) -> Hash {
    blake3_hash(data)
}

/// Hash multiple pieces of data
pub fn hash_multiple(parts: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    let hash = hasher.finalize();
    Hash::from_bytes(*hash.as_bytes())
}

/// Hash of a type descriptor string, used as a type tag
pub fn type_hash(descriptor: &str) -> Hash {
    blake3_hash(descriptor.as_bytes())
}

/// Incremental hasher for typed, order-sensitive structures
pub struct TypedHasher {
    hasher: blake3::Hasher,
}

impl TypedHasher {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
        }
    }

    /// Start with a type tag
    pub fn tagged(type_hash: &Hash) -> Self {
        let mut hasher = Self::new();
        hasher.hash(type_hash);
        hasher
    }

    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.hasher.update(data);
        self
    }

    pub fn hash(&mut self, value: &Hash) -> &mut Self {
        self.update(value.as_bytes())
    }

    pub fn address(&mut self, value: &Address) -> &mut Self {
        self.update(value.as_bytes())
    }

    pub fn uint(&mut self, value: u64) -> &mut Self {
        self.update(&value.to_be_bytes())
    }

    pub fn string(&mut self, value: &str) -> &mut Self {
        let digest = blake3_hash(value.as_bytes());
        self.hash(&digest)
    }

    /// Order-sensitive list of addresses
    pub fn address_list(&mut self, values: &[Address]) -> &mut Self {
        let mut inner = blake3::Hasher::new();
        for value in values {
            inner.update(value.as_bytes());
        }
        self.update(inner.finalize().as_bytes())
    }

    /// Order-sensitive list of integers
    pub fn uint_list(&mut self, values: &[u64]) -> &mut Self {
        let mut inner = blake3::Hasher::new();
        for value in values {
            inner.update(&value.to_be_bytes());
        }
        self.update(inner.finalize().as_bytes())
    }

    pub fn finalize(&self) -> Hash {
        let hash = self.hasher.finalize();
        Hash::from_bytes(*hash.as_bytes())
    }
}

impl Default for TypedHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Sortition distance: `hash(account ‖ dislocation) XOR proposal`
///
/// Interpreted as a big-endian unsigned integer; smaller is closer.
pub fn sortition_distance(account: &Address, dislocation: &Hash, proposal: &Hash) -> Hash {
    let shuffled = hash_multiple(&[account.as_bytes(), dislocation.as_bytes()]);
    shuffled.xor(proposal)
}
