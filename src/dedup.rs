/// Splits candidate blobs into those that still need writing and those
/// the persistence layer already knows about.
use std::collections::HashSet;

use async_trait::async_trait;

use crate::blob::ContentHash;
use crate::error::Result;

/// Read-only view of which blob hashes are already persisted.
#[async_trait]
pub trait KnownBlobLookup: Send + Sync {
    async fn contains(&self, hash: &ContentHash) -> Result<bool> {
        let known = self.bulk_contains(std::slice::from_ref(hash)).await?;
        Ok(known.contains(hash))
    }

    /// The subset of `hashes` that is already known, in one round trip.
    async fn bulk_contains(&self, hashes: &[ContentHash]) -> Result<HashSet<ContentHash>>;
}

#[async_trait]
impl KnownBlobLookup for HashSet<ContentHash> {
    async fn bulk_contains(&self, hashes: &[ContentHash]) -> Result<HashSet<ContentHash>> {
        Ok(hashes.iter().filter(|h| self.contains(*h)).cloned().collect())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Partition {
    /// Hashes that must be written, in input order.
    pub new: Vec<ContentHash>,
    /// Hashes already persisted, in input order.
    pub existing: Vec<ContentHash>,
}

/// Partition `candidates` with a single bulk lookup.
///
/// Repeated hashes are collapsed to their first occurrence. An empty
/// input never touches the lookup.
pub async fn partition<L>(candidates: &[ContentHash], lookup: &L) -> Result<Partition>
where
    L: KnownBlobLookup + ?Sized,
{
    let mut seen = HashSet::with_capacity(candidates.len());
    let unique: Vec<ContentHash> = candidates
        .iter()
        .filter(|h| seen.insert(*h))
        .cloned()
        .collect();

    if unique.is_empty() {
        return Ok(Partition::default());
    }

    let known = lookup.bulk_contains(&unique).await?;
    let (existing, new) = unique.into_iter().partition(|h| known.contains(h));

    Ok(Partition { new, existing })
}
