//! Key hashing for the extendible hash table.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Maps keys to the 32-bit hashes that drive directory and bucket
/// indexing.
pub trait KeyHasher<K>: Send + Sync {
    /// Hashes a key.
    fn hash_key(&self, key: &K) -> u32;
}

/// Default hasher: SipHash via the standard library, truncated to 32 bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyHasher;

impl<K: Hash> KeyHasher<K> for DefaultKeyHasher {
    fn hash_key(&self, key: &K) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as u32
    }
}

/// Identity hasher for `u32` keys.
///
/// Makes bucket placement a direct function of the key, which keeps
/// split/merge behavior fully deterministic in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityHasher;

impl KeyHasher<u32> for IdentityHasher {
    fn hash_key(&self, key: &u32) -> u32 {
        *key
    }
}
