/// Database access for dedup lookups.
///
/// The indexer's Postgres database is the authority on which blobs are
/// already persisted. This crate only ever reads from it; the schema is
/// owned by the persistence layer.
pub mod repository;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{Result, StorageError};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Lookup(format!("database connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Build a pool that connects on first use.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| StorageError::Config(format!("invalid database url: {e}")))?;

        Ok(Self { pool })
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
