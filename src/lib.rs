pub mod addressing;
pub mod blob;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod state;
pub mod storage;

pub use addressing::{ContentAddresser, StorageKey};
pub use blob::{BlobCandidate, BlobContent, BlobStorageRecord, ContentHash, StorageLocation};
pub use config::StorageConfig;
pub use dedup::KnownBlobLookup;
pub use error::{Result, StorageError};
pub use manager::BlobStorageManager;
pub use storage::{BackendHealth, StorageBackend};
