/// Swarm content-network backend via the Bee HTTP API.
///
/// Swarm only accepts new chunks paid for by a postage batch. A node can be
/// perfectly reachable and still unable to store anything, so the health
/// check also requires at least one usable batch; running out of postage is
/// a capacity problem, not a connectivity one.
///
/// Blobs are uploaded to `/bzz` under their storage key and addressed as
/// `bzz://{reference}/{storage key}`.
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::{StorageBackend, CONTENT_NETWORK_ID};
use crate::addressing::StorageKey;
use crate::error::{Result, StorageError, WriteCause};

const URI_SCHEME: &str = "bzz://";
const POSTAGE_BATCH_HEADER: &str = "swarm-postage-batch-id";
const PIN_HEADER: &str = "swarm-pin";

/// Configuration for a Bee node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmConfig {
    #[serde(default = "default_id")]
    pub id: String,
    /// Bee API endpoint (e.g., "http://localhost:1633").
    pub api_url: String,
    /// Postage batch to pay uploads with. When unset, the first usable
    /// batch reported by the node is used.
    #[serde(default)]
    pub postage_batch_id: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_id() -> String {
    CONTENT_NETWORK_ID.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

pub struct SwarmBackend {
    client: Client,
    config: SwarmConfig,
    /// Batch picked from the node's stamps when none is configured,
    /// refreshed by every health check.
    discovered_batch: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct StampsResponse {
    #[serde(default)]
    stamps: Vec<PostageBatch>,
}

#[derive(Debug, Deserialize)]
struct PostageBatch {
    #[serde(rename = "batchID")]
    batch_id: String,
    #[serde(default)]
    usable: bool,
    #[serde(default = "default_exists")]
    exists: bool,
    #[serde(rename = "batchTTL", default)]
    batch_ttl: i64,
}

fn default_exists() -> bool {
    true
}

impl PostageBatch {
    fn has_capacity(&self) -> bool {
        self.usable && self.exists && self.batch_ttl > 0
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    reference: String,
}

impl SwarmBackend {
    pub fn new(config: SwarmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| StorageError::Config(format!("Swarm HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            discovered_batch: RwLock::new(None),
        })
    }

    fn api(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url.trim_end_matches('/'))
    }

    /// Batches that can currently pay for uploads.
    async fn usable_batches(&self) -> std::result::Result<Vec<PostageBatch>, String> {
        let resp = self
            .client
            .get(self.api("/stamps"))
            .send()
            .await
            .map_err(|e| format!("stamps request failed: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("stamps request returned {}", resp.status()));
        }

        let stamps: StampsResponse = resp
            .json()
            .await
            .map_err(|e| format!("stamps response parse error: {e}"))?;

        Ok(stamps
            .stamps
            .into_iter()
            .filter(PostageBatch::has_capacity)
            .collect())
    }

    async fn resolve_batch_id(&self) -> Result<String> {
        if let Some(batch_id) = &self.config.postage_batch_id {
            return Ok(batch_id.clone());
        }
        if let Some(batch_id) = self.discovered_batch.read().await.clone() {
            return Ok(batch_id);
        }

        let batches = self.usable_batches().await.map_err(|reason| StorageError::Write {
            backend: self.config.id.clone(),
            cause: WriteCause::Transient(reason),
        })?;

        let batch_id = batches
            .into_iter()
            .next()
            .map(|b| b.batch_id)
            .ok_or_else(|| StorageError::Write {
                backend: self.config.id.clone(),
                cause: WriteCause::NoCapacity("no usable postage batch".to_string()),
            })?;
        *self.discovered_batch.write().await = Some(batch_id.clone());
        Ok(batch_id)
    }
}

fn classify_upload_status(status: StatusCode, body: String) -> WriteCause {
    let detail = format!("{status}: {body}");
    match status {
        StatusCode::PAYMENT_REQUIRED => WriteCause::NoCapacity(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => WriteCause::Unauthorized(detail),
        _ => WriteCause::Transient(detail),
    }
}

#[async_trait]
impl StorageBackend for SwarmBackend {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn store(&self, key: &StorageKey, data: Bytes) -> Result<String> {
        let batch_id = self.resolve_batch_id().await?;
        let size = data.len();

        let resp = self
            .client
            .post(self.api("/bzz"))
            .query(&[("name", key.as_str())])
            .header("Content-Type", "application/octet-stream")
            .header(POSTAGE_BATCH_HEADER, &batch_id)
            .header(PIN_HEADER, "true")
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::Write {
                backend: self.config.id.clone(),
                cause: WriteCause::Transient(e.to_string()),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Write {
                backend: self.config.id.clone(),
                cause: classify_upload_status(status, body),
            });
        }

        let upload: UploadResponse = resp.json().await.map_err(|e| StorageError::Write {
            backend: self.config.id.clone(),
            cause: WriteCause::Transient(format!("upload response parse error: {e}")),
        })?;

        debug!(
            backend = %self.config.id,
            key = %key,
            reference = %upload.reference,
            size,
            "Blob uploaded to Swarm"
        );
        Ok(format!("{URI_SCHEME}{}/{key}", upload.reference))
    }

    async fn retrieve(&self, uri: &str) -> Result<Bytes> {
        let path = uri
            .strip_prefix(URI_SCHEME)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| StorageError::InvalidUri {
                backend: self.config.id.clone(),
                uri: uri.to_string(),
            })?;

        let resp = self
            .client
            .get(self.api(&format!("/bzz/{path}")))
            .send()
            .await
            .map_err(|e| StorageError::Read {
                backend: self.config.id.clone(),
                reason: e.to_string(),
            })?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                backend: self.config.id.clone(),
                uri: uri.to_string(),
            });
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(StorageError::Read {
                backend: self.config.id.clone(),
                reason: format!("{status}: {body}"),
            });
        }

        resp.bytes().await.map_err(|e| StorageError::Read {
            backend: self.config.id.clone(),
            reason: e.to_string(),
        })
    }

    async fn health_check(&self) -> Result<()> {
        let unhealthy = |reason: String| StorageError::HealthCheck {
            backend: self.config.id.clone(),
            reason,
        };

        let resp = self
            .client
            .get(self.api("/health"))
            .send()
            .await
            .map_err(|e| unhealthy(format!("node unreachable: {e}")))?;
        if !resp.status().is_success() {
            return Err(unhealthy(format!("node health returned {}", resp.status())));
        }

        let batches = self
            .usable_batches()
            .await
            .map_err(|reason| unhealthy(reason))?;
        if self.config.postage_batch_id.is_none() {
            *self.discovered_batch.write().await = batches.first().map(|b| b.batch_id.clone());
        }
        match &self.config.postage_batch_id {
            Some(batch_id) if !batches.iter().any(|b| &b.batch_id == batch_id) => Err(unhealthy(
                format!("no write capacity: postage batch {batch_id} is not usable"),
            )),
            None if batches.is_empty() => Err(unhealthy(
                "no write capacity: no usable postage batch".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
