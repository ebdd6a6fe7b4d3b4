/// Read-only queries against the indexer's `blob` table.
///
/// Runtime-checked queries, so no live database is needed to build.
use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use super::Database;
use crate::blob::ContentHash;
use crate::dedup::KnownBlobLookup;
use crate::error::{Result, StorageError};

fn db_err(e: sqlx::Error) -> StorageError {
    StorageError::Lookup(e.to_string())
}

/// Which of `hashes` already have a row in `blob`.
pub async fn known_versioned_hashes(
    pool: &PgPool,
    hashes: &[ContentHash],
) -> Result<HashSet<ContentHash>> {
    if hashes.is_empty() {
        return Ok(HashSet::new());
    }

    let params: Vec<String> = hashes.iter().map(|h| h.as_str().to_string()).collect();
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT versioned_hash FROM blob WHERE versioned_hash = ANY($1)",
    )
    .bind(params)
    .fetch_all(pool)
    .await
    .map_err(db_err)?;

    Ok(rows
        .into_iter()
        .filter_map(|raw| match ContentHash::parse(&raw) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(hash = %raw, error = %e, "Ignoring malformed hash in blob table");
                None
            }
        })
        .collect())
}

#[async_trait]
impl KnownBlobLookup for Database {
    async fn bulk_contains(&self, hashes: &[ContentHash]) -> Result<HashSet<ContentHash>> {
        known_versioned_hashes(self.pool(), hashes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_lookup_does_not_touch_database() {
        // Nothing listens on port 1; any query would fail.
        let db = Database::connect_lazy("postgres://indexer@127.0.0.1:1/blobscan").unwrap();
        let known = db.bulk_contains(&[]).await.unwrap();
        assert!(known.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let err = Database::connect_lazy("not a url").err().unwrap();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
