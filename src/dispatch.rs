/// Concurrent fan-out of blob writes to every backend.
///
/// ```text
/// blob 0 ──┬──▶ object-store
///          ├──▶ content-network
///          └──▶ filesystem
/// blob 1 ──┬──▶ ...
/// ```
///
/// Every (blob, backend) pair is an independent write. All of them share
/// one in-flight bound and one deadline. A blob only gets a record once
/// every backend confirmed it, and a single failed write fails the batch.
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};

use crate::addressing::StorageKey;
use crate::blob::{BlobContent, BlobStorageRecord, StorageLocation};
use crate::error::{BatchWriteError, Result, StorageError, WriteCause, WriteFailure};
use crate::storage::StorageBackend;

/// Blob content paired with the key every backend stores it under.
#[derive(Debug, Clone)]
pub struct KeyedBlob {
    pub content: BlobContent,
    pub key: StorageKey,
}

#[derive(Debug, Clone)]
pub struct StorageDispatcher {
    max_in_flight: usize,
    write_timeout: Duration,
}

impl StorageDispatcher {
    pub fn new(max_in_flight: usize, write_timeout: Duration) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            write_timeout,
        }
    }

    /// Write every blob to every backend.
    ///
    /// Records come back in input order, each listing backends in the
    /// given order. Writes still in flight when another fails are allowed
    /// to finish; nothing is rolled back, since rewriting the same content
    /// at the same key is harmless.
    pub async fn write_all(
        &self,
        blobs: &[KeyedBlob],
        backends: &[Arc<dyn StorageBackend>],
    ) -> Result<Vec<BlobStorageRecord>> {
        if blobs.is_empty() || backends.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            blobs = blobs.len(),
            backends = backends.len(),
            max_in_flight = self.max_in_flight,
            "Dispatching blob writes"
        );

        let writes = blobs.iter().enumerate().flat_map(|(b, blob)| {
            backends
                .iter()
                .enumerate()
                .map(move |(k, backend)| (b, k, blob, backend))
        });

        let fan_out = stream::iter(writes)
            .map(|(b, k, blob, backend)| async move {
                let result = backend.store(&blob.key, blob.content.data.clone()).await;
                (b, k, result)
            })
            .buffer_unordered(self.max_in_flight)
            .collect::<Vec<_>>();

        let outcomes = match tokio::time::timeout(self.write_timeout, fan_out).await {
            Ok(outcomes) => outcomes,
            Err(_) => {
                error!(
                    blobs = blobs.len(),
                    timeout = ?self.write_timeout,
                    "Batch write deadline elapsed, abandoning in-flight writes"
                );
                return Err(StorageError::Timeout(self.write_timeout));
            }
        };

        let mut uris: Vec<Vec<Option<String>>> = vec![vec![None; backends.len()]; blobs.len()];
        let mut failures = Vec::new();
        let mut succeeded = 0;

        for (b, k, result) in outcomes {
            match result {
                Ok(uri) => {
                    uris[b][k] = Some(uri);
                    succeeded += 1;
                }
                Err(e) => {
                    let backend = backends[k].id().to_string();
                    warn!(
                        hash = %blobs[b].content.hash,
                        backend = %backend,
                        error = %e,
                        "Blob write failed"
                    );
                    let cause = match e {
                        StorageError::Write { cause, .. } => cause,
                        other => WriteCause::Transient(other.to_string()),
                    };
                    failures.push((
                        b,
                        k,
                        WriteFailure {
                            hash: blobs[b].content.hash.clone(),
                            backend,
                            cause,
                        },
                    ));
                }
            }
        }

        if !failures.is_empty() {
            failures.sort_by_key(|(b, k, _)| (*b, *k));
            error!(
                failed = failures.len(),
                succeeded, "Batch write failed, no records emitted"
            );
            return Err(StorageError::BatchWrite(BatchWriteError {
                failures: failures.into_iter().map(|(_, _, f)| f).collect(),
                succeeded,
            }));
        }

        let records = blobs
            .iter()
            .zip(uris)
            .map(|(blob, blob_uris)| BlobStorageRecord {
                hash: blob.content.hash.clone(),
                size: blob.content.size(),
                locations: backends
                    .iter()
                    .zip(blob_uris)
                    .filter_map(|(backend, uri)| {
                        uri.map(|uri| StorageLocation {
                            backend: backend.id().to_string(),
                            uri,
                        })
                    })
                    .collect(),
            })
            .collect();

        info!(blobs = blobs.len(), writes = succeeded, "Batch write complete");
        Ok(records)
    }
}
