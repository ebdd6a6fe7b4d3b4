use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::blob::ContentHash;
use crate::storage::BackendHealth;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Health check failed for backend {backend}: {reason}")]
    HealthCheck { backend: String, reason: String },

    #[error("Storage unavailable: {}", describe_unhealthy(.0))]
    StorageUnavailable(Vec<BackendHealth>),

    #[error("Write to backend {backend} failed: {cause}")]
    Write { backend: String, cause: WriteCause },

    #[error("Read from backend {backend} failed: {reason}")]
    Read { backend: String, reason: String },

    #[error("Blob not found in backend {backend}: {uri}")]
    NotFound { backend: String, uri: String },

    #[error("{0}")]
    BatchWrite(BatchWriteError),

    #[error("Batch write deadline of {0:?} elapsed")]
    Timeout(Duration),

    #[error("Invalid content hash: {0}")]
    InvalidHash(String),

    #[error("Invalid blob {hash}: {reason}")]
    InvalidBlob { hash: String, reason: String },

    #[error("Invalid URI for backend {backend}: {uri}")]
    InvalidUri { backend: String, uri: String },

    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("Known-blob lookup failed: {0}")]
    Lookup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StorageError {
    /// Whether retrying the whole batch later can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Timeout(_) | StorageError::StorageUnavailable(_) => true,
            StorageError::HealthCheck { .. } => true,
            StorageError::Write { cause, .. } => cause.is_transient(),
            StorageError::BatchWrite(batch) => {
                batch.failures.iter().all(|f| f.cause.is_transient())
            }
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Why a single backend write failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCause {
    /// The target bucket or container does not exist.
    BucketMissing(String),
    /// Credentials were rejected.
    Unauthorized(String),
    /// The backend has no write capacity left (e.g. exhausted postage).
    NoCapacity(String),
    /// Network or server-side failure that may go away on retry.
    Transient(String),
}

impl WriteCause {
    pub fn is_transient(&self) -> bool {
        matches!(self, WriteCause::Transient(_))
    }
}

impl fmt::Display for WriteCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteCause::BucketMissing(msg) => write!(f, "bucket missing: {msg}"),
            WriteCause::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            WriteCause::NoCapacity(msg) => write!(f, "no write capacity: {msg}"),
            WriteCause::Transient(msg) => write!(f, "transient I/O: {msg}"),
        }
    }
}

/// One failed (blob, backend) write inside a batch.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub hash: ContentHash,
    pub backend: String,
    pub cause: WriteCause,
}

/// Every write failure observed while dispatching one batch.
#[derive(Debug, Clone)]
pub struct BatchWriteError {
    pub failures: Vec<WriteFailure>,
    /// Number of writes that succeeded before the batch was declared failed.
    pub succeeded: usize,
}

impl fmt::Display for BatchWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batch write failed ({} failed, {} succeeded)",
            self.failures.len(),
            self.succeeded
        )?;
        for failure in &self.failures {
            write!(
                f,
                "; {} -> {}: {}",
                failure.hash, failure.backend, failure.cause
            )?;
        }
        Ok(())
    }
}

fn describe_unhealthy(unhealthy: &[BackendHealth]) -> String {
    unhealthy
        .iter()
        .map(|h| {
            format!(
                "{} ({})",
                h.backend,
                h.detail.as_deref().unwrap_or("unhealthy")
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
