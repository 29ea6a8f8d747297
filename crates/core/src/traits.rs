use crate::error::StoreError;
use crate::store::{CandidateRecord, CollectionRecord};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// A client over named vector indexes, one collection per source document.
#[async_trait]
pub trait CollectionStore: Send + Sync {
    async fn list_collections(&self) -> Result<BTreeSet<String>, StoreError>;

    async fn upsert(
        &self,
        collection: &str,
        records: &[CollectionRecord],
    ) -> Result<(), StoreError>;

    /// Nearest records in one collection, ascending by distance. An unknown
    /// collection yields no candidates.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<CandidateRecord>, StoreError>;
}
