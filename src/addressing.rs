/// Content addressing: `(chain id, content hash)` → sharded storage key.
///
/// ```text
/// (1, 0x01abcdef…) ──▶ 1/01/ab/cd/01abcdef….bin
/// ```
///
/// Sharding bounds the number of entries under any one directory or
/// prefix. Keys are a pure function of their inputs, so reading a blob
/// back never needs a lookup table.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::blob::ContentHash;

pub const DEFAULT_SHARD_DEPTH: usize = 3;

/// Hex characters per shard segment.
pub const SEGMENT_LEN: usize = 2;

const LEAF_EXTENSION: &str = "bin";

/// A `/`-separated storage path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path components, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Final path component (the blob's file name).
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContentAddresser {
    shard_depth: usize,
}

impl Default for ContentAddresser {
    fn default() -> Self {
        Self::new(DEFAULT_SHARD_DEPTH)
    }
}

impl ContentAddresser {
    pub fn new(shard_depth: usize) -> Self {
        Self { shard_depth }
    }

    pub fn shard_depth(&self) -> usize {
        self.shard_depth
    }

    /// Derive the storage key for a blob on `chain_id`.
    ///
    /// Hashes too short to fill every shard level get fewer levels; the
    /// leaf always carries the full digest, so distinct hashes never share
    /// a key.
    pub fn derive_key(&self, chain_id: u64, hash: &ContentHash) -> StorageKey {
        let digits = hash.hex_digits();
        let mut key = chain_id.to_string();

        for level in 0..self.shard_depth {
            let start = level * SEGMENT_LEN;
            let end = start + SEGMENT_LEN;
            if end > digits.len() {
                break;
            }
            key.push('/');
            key.push_str(&digits[start..end]);
        }

        key.push('/');
        key.push_str(digits);
        key.push('.');
        key.push_str(LEAF_EXTENSION);
        StorageKey(key)
    }
}
