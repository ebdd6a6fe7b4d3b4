/// Object store backend (S3-compatible API).
///
/// Blobs are written to `{bucket}/{storage key}` and addressed as
/// `s3://{bucket}/{storage key}`. Works against AWS S3 as well as
/// compatible gateways (MinIO, Storj, R2) via a custom endpoint.
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Builder as S3ConfigBuilder, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{StorageBackend, OBJECT_STORE_ID};
use crate::addressing::StorageKey;
use crate::error::{Result, StorageError, WriteCause};

const URI_SCHEME: &str = "s3://";

/// Configuration for an S3-compatible bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_id")]
    pub id: String,
    /// Custom endpoint (e.g. "http://localhost:9000"); AWS when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default = "default_force_path_style")]
    pub force_path_style: bool,
}

fn default_id() -> String {
    OBJECT_STORE_ID.to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_force_path_style() -> bool {
    true
}

pub struct ObjectStoreBackend {
    id: String,
    client: S3Client,
    bucket: String,
}

impl ObjectStoreBackend {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "blob-vault",
        );

        let mut builder = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        Self {
            id: config.id.clone(),
            client: S3Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    fn uri_for(&self, key: &StorageKey) -> String {
        format!("{URI_SCHEME}{}/{key}", self.bucket)
    }

    /// Split `s3://bucket/key`, rejecting URIs for other buckets.
    fn key_from_uri<'a>(&self, uri: &'a str) -> Result<&'a str> {
        let invalid = || StorageError::InvalidUri {
            backend: self.id.clone(),
            uri: uri.to_string(),
        };
        let rest = uri.strip_prefix(URI_SCHEME).ok_or_else(invalid)?;
        let (bucket, key) = rest.split_once('/').ok_or_else(invalid)?;
        if bucket != self.bucket || key.is_empty() {
            return Err(invalid());
        }
        Ok(key)
    }
}

fn classify_put_error(err: &SdkError<PutObjectError>) -> WriteCause {
    let detail = DisplayErrorContext(err).to_string();
    match err {
        SdkError::ServiceError(service) => match service.err().code() {
            Some("NoSuchBucket") => WriteCause::BucketMissing(detail),
            Some("AccessDenied" | "InvalidAccessKeyId" | "SignatureDoesNotMatch") => {
                WriteCause::Unauthorized(detail)
            }
            Some("QuotaExceeded" | "ServiceQuotaExceeded") => WriteCause::NoCapacity(detail),
            _ => match service.raw().status().as_u16() {
                404 => WriteCause::BucketMissing(detail),
                401 | 403 => WriteCause::Unauthorized(detail),
                _ => WriteCause::Transient(detail),
            },
        },
        _ => WriteCause::Transient(detail),
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn store(&self, key: &StorageKey, data: Bytes) -> Result<String> {
        let size = data.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_length(size as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Write {
                backend: self.id.clone(),
                cause: classify_put_error(&e),
            })?;

        debug!(backend = %self.id, key = %key, size, "Object stored");
        Ok(self.uri_for(key))
    }

    async fn retrieve(&self, uri: &str) -> Result<Bytes> {
        let key = self.key_from_uri(uri)?;

        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    return Err(StorageError::NotFound {
                        backend: self.id.clone(),
                        uri: uri.to_string(),
                    });
                }
                return Err(StorageError::Read {
                    backend: self.id.clone(),
                    reason: DisplayErrorContext(service_err).to_string(),
                });
            }
        };

        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Read {
                backend: self.id.clone(),
                reason: e.to_string(),
            })?
            .into_bytes();

        Ok(bytes)
    }

    async fn health_check(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_err = e.into_service_error();
                let reason = if service_err.is_not_found() {
                    format!("bucket {} does not exist", self.bucket)
                } else {
                    format!(
                        "bucket {} is not accessible: {}",
                        self.bucket,
                        DisplayErrorContext(service_err)
                    )
                };
                Err(StorageError::HealthCheck {
                    backend: self.id.clone(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> ObjectStoreConfig {
        ObjectStoreConfig {
            id: OBJECT_STORE_ID.to_string(),
            endpoint: Some(endpoint.to_string()),
            region: "us-east-1".to_string(),
            bucket: "blobs".to_string(),
            access_key_id: "test".to_string(),
            secret_access_key: "test".to_string(),
            force_path_style: true,
        }
    }

    fn key() -> StorageKey {
        crate::addressing::ContentAddresser::default()
            .derive_key(1, &crate::blob::ContentHash::parse("0xaa11").unwrap())
    }

    #[tokio::test]
    async fn test_store_returns_bucket_uri() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/blobs/1/aa/11/aa11.bin"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let backend = ObjectStoreBackend::new(&config(&server.uri()));
        let first = backend.store(&key(), Bytes::from_static(b"hello")).await.unwrap();
        let second = backend.store(&key(), Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(first, "s3://blobs/1/aa/11/aa11.bin");
        assert_eq!(first, second);
    }

    fn s3_error(status: u16, code: &str) -> ResponseTemplate {
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <Error><Code>{code}</Code><Message>{code}</Message><RequestId>r1</RequestId></Error>"
        );
        ResponseTemplate::new(status).set_body_raw(body, "application/xml")
    }

    async fn put_failure(status: u16, code: &str) -> WriteCause {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/blobs/1/aa/11/aa11.bin"))
            .respond_with(s3_error(status, code))
            .mount(&server)
            .await;

        let backend = ObjectStoreBackend::new(&config(&server.uri()));
        match backend.store(&key(), Bytes::from_static(b"hello")).await {
            Err(StorageError::Write { backend, cause }) => {
                assert_eq!(backend, OBJECT_STORE_ID);
                cause
            }
            other => panic!("expected a write error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_store_missing_bucket() {
        let cause = put_failure(404, "NoSuchBucket").await;
        assert!(matches!(cause, WriteCause::BucketMissing(_)), "{cause:?}");
    }

    #[tokio::test]
    async fn test_store_access_denied() {
        let cause = put_failure(403, "AccessDenied").await;
        assert!(matches!(cause, WriteCause::Unauthorized(_)), "{cause:?}");
    }

    #[tokio::test]
    async fn test_store_server_error_is_transient() {
        let cause = put_failure(500, "InternalError").await;
        assert!(matches!(cause, WriteCause::Transient(_)), "{cause:?}");
    }

    #[tokio::test]
    async fn test_retrieve_missing_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/blobs/1/aa/11/aa11.bin"))
            .respond_with(s3_error(404, "NoSuchKey"))
            .mount(&server)
            .await;

        let backend = ObjectStoreBackend::new(&config(&server.uri()));
        let err = backend
            .retrieve("s3://blobs/1/aa/11/aa11.bin")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_health_check_heads_bucket() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/blobs/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let backend = ObjectStoreBackend::new(&config(&server.uri()));
        backend.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn test_health_check_missing_bucket() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/blobs/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let backend = ObjectStoreBackend::new(&config(&server.uri()));
        match backend.health_check().await.unwrap_err() {
            StorageError::HealthCheck { backend, reason } => {
                assert_eq!(backend, OBJECT_STORE_ID);
                assert!(reason.contains("does not exist"), "{reason}");
            }
            other => panic!("expected a health check error, got {other:?}"),
        }
    }

    #[test]
    fn test_key_from_uri_rejects_foreign_bucket() {
        let backend = ObjectStoreBackend::new(&config("http://127.0.0.1:9"));
        assert_eq!(
            backend.key_from_uri("s3://blobs/1/aa/11/aa11.bin").unwrap(),
            "1/aa/11/aa11.bin"
        );
        assert!(backend.key_from_uri("s3://other/1/aa/11/aa11.bin").is_err());
        assert!(backend.key_from_uri("file:///blobs/x").is_err());
        assert!(backend.key_from_uri("s3://blobs/").is_err());
    }
}
