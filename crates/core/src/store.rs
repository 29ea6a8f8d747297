use crate::models::PageSpan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 50;

pub const METADATA_SOURCE: &str = "source";
pub const METADATA_PAGE_SPAN: &str = "page_num";
pub const METADATA_CHUNK_ID: &str = "chunk_id";
pub const METADATA_INGESTED_AT: &str = "ingested_at";

/// Bounds the per-collection result depth before any store is queried.
pub fn clamp_top_k(k: usize) -> usize {
    k.clamp(MIN_TOP_K, MAX_TOP_K)
}

/// One row written to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: BTreeMap<String, String>,
    pub document: String,
}

/// One hit returned by a single collection query. Lower distance is more similar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub collection_name: String,
    pub id: String,
    pub document: String,
    pub metadata: BTreeMap<String, String>,
    pub distance: f64,
}

impl CandidateRecord {
    pub fn page_span(&self) -> Option<PageSpan> {
        self.metadata
            .get(METADATA_PAGE_SPAN)
            .and_then(|value| PageSpan::parse(value))
    }

    pub fn source(&self) -> &str {
        self.metadata
            .get(METADATA_SOURCE)
            .map_or(self.collection_name.as_str(), String::as_str)
    }
}

/// A candidate after the global re-rank.
pub type RankedResult = CandidateRecord;
