/// Blob storage manager: the single entry point of the indexing pipeline.
///
/// Coordinates one batch end to end:
/// 1. Health-check every backend (fail before any write if one is down)
/// 2. Drop blobs the persistence layer already knows about
/// 3. Derive the sharded storage key of each new blob
/// 4. Write each new blob to every backend concurrently
/// 5. Return one record per new blob, with one URI per backend
///
/// The manager holds no state between batches besides its backends.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use tracing::{error, info, warn};

use crate::addressing::ContentAddresser;
use crate::blob::{BlobCandidate, BlobStorageRecord, ContentHash};
use crate::config::StorageConfig;
use crate::dedup::{self, KnownBlobLookup};
use crate::dispatch::{KeyedBlob, StorageDispatcher};
use crate::error::{Result, StorageError};
use crate::storage::filesystem::FilesystemBackend;
use crate::storage::object_store::ObjectStoreBackend;
use crate::storage::swarm::SwarmBackend;
use crate::storage::{BackendHealth, StorageBackend};

pub struct BlobStorageManager {
    backends: Vec<Arc<dyn StorageBackend>>,
    addresser: ContentAddresser,
    dispatcher: StorageDispatcher,
    health_check_timeout: Duration,
}

impl BlobStorageManager {
    pub fn new(
        backends: Vec<Arc<dyn StorageBackend>>,
        addresser: ContentAddresser,
        dispatcher: StorageDispatcher,
        health_check_timeout: Duration,
    ) -> Result<Self> {
        if backends.is_empty() {
            return Err(StorageError::Config(
                "at least one storage backend is required".to_string(),
            ));
        }
        for (i, backend) in backends.iter().enumerate() {
            if backends[..i].iter().any(|b| b.id() == backend.id()) {
                return Err(StorageError::Config(format!(
                    "duplicate backend id: {}",
                    backend.id()
                )));
            }
        }

        Ok(Self {
            backends,
            addresser,
            dispatcher,
            health_check_timeout,
        })
    }

    /// Build every backend named in `config`, in dispatch order.
    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        config.validate()?;

        let mut backends: Vec<Arc<dyn StorageBackend>> = Vec::new();
        if let Some(c) = &config.backends.object_store {
            backends.push(Arc::new(ObjectStoreBackend::new(c)));
        }
        if let Some(c) = &config.backends.content_network {
            backends.push(Arc::new(SwarmBackend::new(c.clone())?));
        }
        if let Some(c) = &config.backends.filesystem {
            backends.push(Arc::new(FilesystemBackend::new(c)?));
        }

        Self::new(
            backends,
            ContentAddresser::new(config.addressing.shard_depth),
            StorageDispatcher::new(
                config.dispatch.max_in_flight,
                config.dispatch.write_timeout(),
            ),
            config.dispatch.health_check_timeout(),
        )
    }

    pub fn backends(&self) -> &[Arc<dyn StorageBackend>] {
        &self.backends
    }

    pub fn addresser(&self) -> &ContentAddresser {
        &self.addresser
    }

    /// Check every backend concurrently. Never cached: a backend healthy
    /// for one batch may be gone by the next.
    pub async fn check_health(&self) -> Vec<BackendHealth> {
        let checks = self.backends.iter().map(|backend| async move {
            match tokio::time::timeout(self.health_check_timeout, backend.health_check()).await {
                Ok(Ok(())) => BackendHealth::healthy(backend.id()),
                Ok(Err(StorageError::HealthCheck { reason, .. })) => {
                    BackendHealth::unhealthy(backend.id(), reason)
                }
                Ok(Err(e)) => BackendHealth::unhealthy(backend.id(), e.to_string()),
                Err(_) => BackendHealth::unhealthy(
                    backend.id(),
                    format!("health check timed out after {:?}", self.health_check_timeout),
                ),
            }
        });

        let report = join_all(checks).await;
        for health in report.iter().filter(|h| !h.healthy) {
            warn!(
                backend = %health.backend,
                detail = health.detail.as_deref().unwrap_or_default(),
                "Backend unhealthy"
            );
        }
        report
    }

    /// Store every candidate not yet known to `known` on all backends.
    ///
    /// Returns records for the newly stored blobs only, in input order.
    /// Already-known blobs are skipped without any write. Fails with
    /// [`StorageError::StorageUnavailable`] before writing anything if a
    /// backend is unhealthy, or with the dispatcher's error if any write
    /// fails, in which case no record is returned at all.
    pub async fn prepare_batch<L>(
        &self,
        candidates: &[BlobCandidate],
        known: &L,
    ) -> Result<Vec<BlobStorageRecord>>
    where
        L: KnownBlobLookup + ?Sized,
    {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(empty) = candidates.iter().find(|c| c.content.data.is_empty()) {
            return Err(StorageError::InvalidBlob {
                hash: empty.hash().to_string(),
                reason: "blob content is empty".to_string(),
            });
        }

        let unhealthy: Vec<BackendHealth> = self
            .check_health()
            .await
            .into_iter()
            .filter(|h| !h.healthy)
            .collect();
        if !unhealthy.is_empty() {
            error!(
                unhealthy = unhealthy.len(),
                candidates = candidates.len(),
                "Refusing batch, storage unavailable"
            );
            return Err(StorageError::StorageUnavailable(unhealthy));
        }

        let hashes: Vec<ContentHash> = candidates.iter().map(|c| c.hash().clone()).collect();
        let partition = dedup::partition(&hashes, known).await?;

        info!(
            candidates = candidates.len(),
            new = partition.new.len(),
            existing = partition.existing.len(),
            "Blob batch partitioned"
        );
        if partition.new.is_empty() {
            return Ok(Vec::new());
        }

        let mut first_by_hash: HashMap<&ContentHash, &BlobCandidate> = HashMap::new();
        for candidate in candidates {
            first_by_hash.entry(candidate.hash()).or_insert(candidate);
        }

        let keyed: Vec<KeyedBlob> = partition
            .new
            .iter()
            .filter_map(|hash| first_by_hash.get(hash))
            .map(|candidate| KeyedBlob {
                key: self
                    .addresser
                    .derive_key(candidate.chain_id, candidate.hash()),
                content: candidate.content.clone(),
            })
            .collect();

        self.dispatcher.write_all(&keyed, &self.backends).await
    }

    /// Read a blob back from one backend.
    pub async fn retrieve(&self, backend_id: &str, uri: &str) -> Result<Bytes> {
        let backend = self
            .backends
            .iter()
            .find(|b| b.id() == backend_id)
            .ok_or_else(|| StorageError::UnknownBackend(backend_id.to_string()))?;
        backend.retrieve(uri).await
    }

    /// Read a blob from the first backend in `record` that returns it.
    pub async fn retrieve_any(&self, record: &BlobStorageRecord) -> Result<Bytes> {
        let mut last_err = StorageError::NotFound {
            backend: "any".to_string(),
            uri: record.hash.to_string(),
        };

        for backend in &self.backends {
            let Some(uri) = record.uri(backend.id()) else {
                continue;
            };
            match backend.retrieve(uri).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    warn!(
                        hash = %record.hash,
                        backend = %backend.id(),
                        error = %e,
                        "Retrieve failed, trying next backend"
                    );
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }
}
