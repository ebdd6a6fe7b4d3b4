/// Configuration for the storage manager and its backends.
///
/// Loaded from an optional YAML file overlaid with `BLOB_VAULT_`-prefixed
/// environment variables, where `__` separates nested keys:
///
/// ```text
/// BLOB_VAULT_BACKENDS__CONTENT_NETWORK__POSTAGE_BATCH_ID=abcd…
/// ```
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::addressing::DEFAULT_SHARD_DEPTH;
use crate::error::{Result, StorageError};
use crate::storage::filesystem::FilesystemConfig;
use crate::storage::object_store::ObjectStoreConfig;
use crate::storage::swarm::SwarmConfig;

pub const ENV_PREFIX: &str = "BLOB_VAULT_";

/// Deepest sharding accepted from configuration.
const MAX_SHARD_DEPTH: usize = 16;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub addressing: AddressingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    /// Postgres database holding already-indexed blobs, used for dedup.
    #[serde(default)]
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressingConfig {
    #[serde(default = "default_shard_depth")]
    pub shard_depth: usize,
}

impl Default for AddressingConfig {
    fn default() -> Self {
        Self {
            shard_depth: default_shard_depth(),
        }
    }
}

fn default_shard_depth() -> usize {
    DEFAULT_SHARD_DEPTH
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on concurrent backend writes per batch.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Deadline for writing a whole batch.
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
    /// Deadline for each backend's health check.
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            write_timeout_secs: default_write_timeout_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
        }
    }
}

impl DispatchConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }
}

fn default_max_in_flight() -> usize {
    16
}

fn default_write_timeout_secs() -> u64 {
    120
}

fn default_health_check_timeout_secs() -> u64 {
    10
}

/// Configured backends. Every configured backend must accept each blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,
    #[serde(default)]
    pub content_network: Option<SwarmConfig>,
    #[serde(default)]
    pub filesystem: Option<FilesystemConfig>,
}

impl BackendsConfig {
    /// Identifiers of the configured backends, in dispatch order.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        if let Some(c) = &self.object_store {
            ids.push(c.id.as_str());
        }
        if let Some(c) = &self.content_network {
            ids.push(c.id.as_str());
        }
        if let Some(c) = &self.filesystem {
            ids.push(c.id.as_str());
        }
        ids
    }
}

impl StorageConfig {
    /// Load from `path` (if given) and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.is_file() {
                return Err(StorageError::Config(format!(
                    "config file {} not found",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::extract(Figment::new().merge(Yaml::string(yaml)))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: StorageConfig = figment
            .extract()
            .map_err(|e| StorageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let ids = self.backends.ids();
        if ids.is_empty() {
            return Err(StorageError::Config(
                "at least one storage backend must be configured".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for id in &ids {
            if id.is_empty() {
                return Err(StorageError::Config("backend id must not be empty".to_string()));
            }
            if !seen.insert(*id) {
                return Err(StorageError::Config(format!("duplicate backend id: {id}")));
            }
        }
        if self.dispatch.max_in_flight == 0 {
            return Err(StorageError::Config(
                "dispatch.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.dispatch.write_timeout_secs == 0 || self.dispatch.health_check_timeout_secs == 0 {
            return Err(StorageError::Config(
                "dispatch timeouts must be non-zero".to_string(),
            ));
        }
        if self.addressing.shard_depth > MAX_SHARD_DEPTH {
            return Err(StorageError::Config(format!(
                "addressing.shard_depth must be at most {MAX_SHARD_DEPTH}"
            )));
        }
        if let Some(swarm) = &self.backends.content_network {
            if !swarm.api_url.starts_with("http://") && !swarm.api_url.starts_with("https://") {
                return Err(StorageError::Config(format!(
                    "invalid content network api_url: {}",
                    swarm.api_url
                )));
            }
        }
        if let Some(s3) = &self.backends.object_store {
            if s3.bucket.is_empty() {
                return Err(StorageError::Config("object_store.bucket is empty".to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
addressing:
  shard_depth: 2
dispatch:
  max_in_flight: 4
backends:
  object_store:
    endpoint: http://localhost:9000
    bucket: blobs
    access_key_id: minio
    secret_access_key: minio123
  content_network:
    api_url: http://localhost:1633
    postage_batch_id: f00d
  filesystem:
    root: /var/lib/blob-vault
"#;

    #[test]
    fn test_full_config_with_defaults() {
        let config = StorageConfig::from_yaml_str(FULL).unwrap();
        assert_eq!(config.addressing.shard_depth, 2);
        assert_eq!(config.dispatch.max_in_flight, 4);
        assert_eq!(config.dispatch.write_timeout(), Duration::from_secs(120));
        assert_eq!(
            config.backends.ids(),
            ["object-store", "content-network", "filesystem"]
        );
        let s3 = config.backends.object_store.as_ref().unwrap();
        assert_eq!(s3.region, "us-east-1");
        assert!(s3.force_path_style);
        let swarm = config.backends.content_network.as_ref().unwrap();
        assert_eq!(swarm.postage_batch_id.as_deref(), Some("f00d"));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_requires_a_backend() {
        let err = StorageConfig::from_yaml_str("dispatch:\n  max_in_flight: 2\n").unwrap_err();
        assert!(err.to_string().contains("at least one storage backend"));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let yaml = r#"
backends:
  content_network:
    id: replica
    api_url: http://localhost:1633
  filesystem:
    id: replica
    root: /tmp/blobs
"#;
        let err = StorageConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate backend id"));
    }

    #[test]
    fn test_rejects_zero_in_flight_and_bad_url() {
        let yaml = "dispatch:\n  max_in_flight: 0\nbackends:\n  filesystem:\n    root: /tmp\n";
        assert!(StorageConfig::from_yaml_str(yaml).is_err());

        let yaml = "backends:\n  content_network:\n    api_url: localhost:1633\n";
        assert!(StorageConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_shard_depth_limit() {
        let yaml = |depth: usize| {
            format!("addressing:\n  shard_depth: {depth}\nbackends:\n  filesystem:\n    root: /tmp\n")
        };
        let config = StorageConfig::from_yaml_str(&yaml(16)).unwrap();
        assert_eq!(config.addressing.shard_depth, 16);

        let err = StorageConfig::from_yaml_str(&yaml(17)).unwrap_err();
        assert!(err.to_string().contains("at most 16"), "{err}");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = StorageConfig::load(Some(Path::new("/nonexistent/blob-vault.yaml"))).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
