/// Pluggable storage backend abstraction for blob-vault.
///
/// Every blob is replicated to all configured backends:
/// - Object store (S3-compatible bucket, durable hot storage)
/// - Content network (Swarm, paid for with postage batches)
/// - Filesystem (local directory, dev fallback)
///
/// Backends are shared by reference between concurrent batches, so
/// implementations must be safe for concurrent use and writes must be
/// idempotent: storing the same bytes at the same key twice succeeds and
/// yields the same URI.
pub mod filesystem;
pub mod object_store;
pub mod swarm;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::addressing::StorageKey;
use crate::error::Result;

pub const OBJECT_STORE_ID: &str = "object-store";
pub const CONTENT_NETWORK_ID: &str = "content-network";
pub const FILESYSTEM_ID: &str = "filesystem";

/// Trait for pluggable storage backends.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Stable identifier used as the key of this backend's URI in records.
    fn id(&self) -> &str;

    /// Write `data` at `key`, returning a URI that `retrieve` accepts.
    async fn store(&self, key: &StorageKey, data: Bytes) -> Result<String>;

    /// Read back bytes previously returned by `store`.
    async fn retrieve(&self, uri: &str) -> Result<Bytes>;

    /// Verify the backend can currently accept writes. Must not mutate state.
    async fn health_check(&self) -> Result<()>;
}

/// Health of one backend, computed fresh before each batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHealth {
    pub backend: String,
    pub healthy: bool,
    /// Diagnostic for unhealthy backends.
    pub detail: Option<String>,
}

impl BackendHealth {
    pub fn healthy(backend: &str) -> Self {
        Self {
            backend: backend.to_string(),
            healthy: true,
            detail: None,
        }
    }

    pub fn unhealthy(backend: &str, detail: impl Into<String>) -> Self {
        Self {
            backend: backend.to_string(),
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}
