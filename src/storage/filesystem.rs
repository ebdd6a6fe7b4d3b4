/// Local filesystem backend.
///
/// Blobs live at `{root}/{storage key}` and are addressed as
/// `file://{root}/{storage key}`. Writes go to a temporary sibling first
/// and are renamed into place, so concurrent writers of the same blob never
/// expose a torn file.
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{StorageBackend, FILESYSTEM_ID};
use crate::addressing::StorageKey;
use crate::error::{Result, StorageError, WriteCause};

const URI_SCHEME: &str = "file://";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_id")]
    pub id: String,
    /// Directory blobs are written under. Relative paths are resolved
    /// against the working directory at startup.
    pub root: PathBuf,
}

fn default_id() -> String {
    FILESYSTEM_ID.to_string()
}

pub struct FilesystemBackend {
    id: String,
    root: PathBuf,
}

impl FilesystemBackend {
    pub fn new(config: &FilesystemConfig) -> Result<Self> {
        Ok(Self {
            id: config.id.clone(),
            root: std::path::absolute(&config.root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_error(&self, err: std::io::Error) -> StorageError {
        let cause = match err.kind() {
            ErrorKind::PermissionDenied => WriteCause::Unauthorized(err.to_string()),
            _ => WriteCause::Transient(err.to_string()),
        };
        StorageError::Write {
            backend: self.id.clone(),
            cause,
        }
    }

    /// Resolve a `file://` URI to a path strictly below the root. Only
    /// plain components may follow the root, so `..` cannot escape it.
    fn path_from_uri(&self, uri: &str) -> Result<PathBuf> {
        let path = uri
            .strip_prefix(URI_SCHEME)
            .map(PathBuf::from)
            .filter(|p| match p.strip_prefix(&self.root) {
                Ok(rest) => {
                    rest.components().next().is_some()
                        && rest.components().all(|c| matches!(c, Component::Normal(_)))
                }
                Err(_) => false,
            })
            .ok_or_else(|| StorageError::InvalidUri {
                backend: self.id.clone(),
                uri: uri.to_string(),
            })?;
        Ok(path)
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn store(&self, key: &StorageKey, data: Bytes) -> Result<String> {
        let path = self.root.join(key.as_str());
        let parent = path.parent().unwrap_or(&self.root);
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| self.write_error(e))?;

        let tmp = parent.join(format!(".{}.{}.tmp", key.file_name(), Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, &data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.write_error(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(self.write_error(e));
        }

        debug!(backend = %self.id, path = %path.display(), size = data.len(), "Blob written");
        Ok(format!("{URI_SCHEME}{}", path.display()))
    }

    async fn retrieve(&self, uri: &str) -> Result<Bytes> {
        let path = self.path_from_uri(uri)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                backend: self.id.clone(),
                uri: uri.to_string(),
            }),
            Err(e) => Err(StorageError::Read {
                backend: self.id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn health_check(&self) -> Result<()> {
        let unhealthy = |reason: String| StorageError::HealthCheck {
            backend: self.id.clone(),
            reason,
        };

        let metadata = tokio::fs::metadata(&self.root).await.map_err(|e| {
            unhealthy(format!("root {} is not accessible: {e}", self.root.display()))
        })?;
        if !metadata.is_dir() {
            return Err(unhealthy(format!(
                "root {} is not a directory",
                self.root.display()
            )));
        }
        if metadata.permissions().readonly() {
            return Err(unhealthy(format!(
                "root {} is not writable",
                self.root.display()
            )));
        }
        Ok(())
    }
}
