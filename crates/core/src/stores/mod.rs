pub mod chroma;
pub mod local;

pub use chroma::ChromaStore;
pub use local::FileCollectionStore;

use crate::store::{CandidateRecord, CollectionRecord};
use crate::traits::CollectionStore;
use crate::StoreError;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// The store selected by configuration at startup.
pub enum StoreBackend {
    Local(FileCollectionStore),
    Chroma(ChromaStore),
}

impl StoreBackend {
    pub fn describe(&self) -> String {
        match self {
            Self::Local(store) => format!("local:{}", store.root().display()),
            Self::Chroma(_) => "chroma".to_string(),
        }
    }
}

#[async_trait]
impl CollectionStore for StoreBackend {
    async fn list_collections(&self) -> Result<BTreeSet<String>, StoreError> {
        match self {
            Self::Local(store) => store.list_collections().await,
            Self::Chroma(store) => store.list_collections().await,
        }
    }

    async fn upsert(
        &self,
        collection: &str,
        records: &[CollectionRecord],
    ) -> Result<(), StoreError> {
        match self {
            Self::Local(store) => store.upsert(collection, records).await,
            Self::Chroma(store) => store.upsert(collection, records).await,
        }
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        match self {
            Self::Local(store) => store.query(collection, vector, k).await,
            Self::Chroma(store) => store.query(collection, vector, k).await,
        }
    }
}
