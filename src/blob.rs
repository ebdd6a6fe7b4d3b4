/// Blob identity and the records handed back to the indexing pipeline.
///
/// A blob is identified purely by its content hash. Two blobs with the same
/// hash are the same blob; nothing in this crate compares bytes on a dedup hit.
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StorageError};

/// Version byte of KZG-commitment versioned hashes.
pub const VERSIONED_HASH_VERSION_KZG: u8 = 0x01;

/// A `0x`-prefixed, lower-case hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse a hex digest, with or without `0x`. The digest must be a
    /// non-empty whole number of bytes.
    pub fn parse(input: &str) -> Result<Self> {
        let digits = input
            .strip_prefix("0x")
            .or_else(|| input.strip_prefix("0X"))
            .unwrap_or(input);

        if digits.is_empty() || digits.len() % 2 != 0 {
            return Err(StorageError::InvalidHash(input.to_string()));
        }
        if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidHash(input.to_string()));
        }

        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// Versioned hash of raw bytes: the version byte followed by the tail
    /// of the SHA-256 digest.
    pub fn versioned_sha256(data: &[u8]) -> Self {
        let mut digest: [u8; 32] = Sha256::digest(data).into();
        digest[0] = VERSIONED_HASH_VERSION_KZG;
        Self(format!("0x{}", hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hex digits without the `0x` prefix.
    pub fn hex_digits(&self) -> &str {
        &self.0[2..]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// Immutable blob bytes together with their content hash.
#[derive(Debug, Clone)]
pub struct BlobContent {
    pub hash: ContentHash,
    pub data: Bytes,
}

impl BlobContent {
    pub fn new(hash: ContentHash, data: impl Into<Bytes>) -> Self {
        Self {
            hash,
            data: data.into(),
        }
    }

    /// Build content from raw bytes, deriving the versioned SHA-256 hash.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            hash: ContentHash::versioned_sha256(&data),
            data,
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A blob offered for storage by the indexing pipeline.
#[derive(Debug, Clone)]
pub struct BlobCandidate {
    pub content: BlobContent,
    pub chain_id: u64,
}

impl BlobCandidate {
    pub fn new(hash: ContentHash, data: impl Into<Bytes>, chain_id: u64) -> Self {
        Self {
            content: BlobContent::new(hash, data),
            chain_id,
        }
    }

    pub fn hash(&self) -> &ContentHash {
        &self.content.hash
    }
}

/// Where one replica of a blob lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    /// Backend identifier (e.g. "object-store", "content-network").
    pub backend: String,
    /// Backend-specific URI of the stored bytes.
    pub uri: String,
}

/// A blob stored on every configured backend.
///
/// Locations follow the configured backend order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStorageRecord {
    pub hash: ContentHash,
    pub size: u64,
    pub locations: Vec<StorageLocation>,
}

impl BlobStorageRecord {
    /// URI of the replica held by `backend`, if any.
    pub fn uri(&self, backend: &str) -> Option<&str> {
        self.locations
            .iter()
            .find(|l| l.backend == backend)
            .map(|l| l.uri.as_str())
    }
}
