//! Cross-collection retrieval.
//!
//! Every selected collection is an isolated index, so a query runs in two
//! phases: a local top-k inside each collection, then one stable global sort
//! by distance over the union, truncated to k. A record that ranks below the
//! local cutoff of its own collection can never reach the global list; raise
//! `local_k` above k to trade latency for recall.

use crate::embeddings::QueryEmbedding;
use crate::store::{clamp_top_k, CandidateRecord, RankedResult};
use crate::traits::CollectionStore;
use crate::StoreError;
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    /// Per-collection depth; never below the requested k. Defaults to k.
    pub local_k: Option<usize>,
    /// A collection that does not answer within this limit contributes nothing.
    pub collection_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalReport {
    pub results: Vec<RankedResult>,
    /// Candidates seen across all collections before truncation.
    pub candidate_count: usize,
    pub collections_with_candidates: Vec<String>,
    pub failed_collections: Vec<String>,
}

pub struct RetrievalAggregator<S> {
    store: Arc<S>,
    options: RetrievalOptions,
}

impl<S: CollectionStore> RetrievalAggregator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_options(store, RetrievalOptions::default())
    }

    pub fn with_options(store: Arc<S>, options: RetrievalOptions) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn retrieve(
        &self,
        query: &QueryEmbedding,
        k: usize,
        collections: &[String],
    ) -> RetrievalReport {
        let Some(vector) = query.as_vector() else {
            return RetrievalReport::default();
        };

        let local_k = clamp_top_k(self.options.local_k.map_or(k, |local| local.max(k)));
        let names = unique_in_order(collections);
        let lookups = names
            .iter()
            .map(|name| self.query_collection(name, vector, local_k));
        let outcomes = join_all(lookups).await;

        let mut report = RetrievalReport::default();
        let mut candidates = Vec::new();
        for (name, outcome) in names.iter().zip(outcomes) {
            match outcome {
                Ok(hits) if hits.is_empty() => {}
                Ok(hits) => {
                    report.collections_with_candidates.push(name.to_string());
                    candidates.extend(hits.into_iter().map(|mut hit| {
                        hit.collection_name = name.to_string();
                        hit
                    }));
                }
                Err(error) => {
                    warn!(collection = %name, %error, "collection query failed, skipping");
                    report.failed_collections.push(name.to_string());
                }
            }
        }

        report.candidate_count = candidates.len();
        report.results = rank_globally(candidates, k);
        debug!(
            collections = names.len(),
            local_k,
            candidates = report.candidate_count,
            returned = report.results.len(),
            "global re-rank complete"
        );
        report
    }

    async fn query_collection(
        &self,
        name: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        let lookup = self.store.query(name, vector, k);
        match self.options.collection_timeout {
            Some(limit) => tokio::time::timeout(limit, lookup)
                .await
                .map_err(|_| StoreError::Timeout(name.to_string()))?,
            None => lookup.await,
        }
    }
}

/// Stable ascending sort by distance, then truncation to `k`.
pub fn rank_globally(mut candidates: Vec<CandidateRecord>, k: usize) -> Vec<RankedResult> {
    candidates.sort_by(|left, right| left.distance.total_cmp(&right.distance));
    candidates.truncate(k);
    candidates
}

fn unique_in_order(collections: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    collections
        .iter()
        .map(String::as_str)
        .filter(|name| seen.insert(*name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::NoVectorReason;
    use crate::store::CollectionRecord;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, BTreeSet, HashMap};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeStore {
        distances: HashMap<String, Vec<f64>>,
        failing: HashSet<String>,
        slow: HashSet<String>,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl FakeStore {
        fn with(mut self, collection: &str, distances: &[f64]) -> Self {
            self.distances
                .insert(collection.to_string(), distances.to_vec());
            self
        }

        fn failing(mut self, collection: &str) -> Self {
            self.failing.insert(collection.to_string());
            self
        }

        fn slow(mut self, collection: &str) -> Self {
            self.slow.insert(collection.to_string());
            self
        }

        fn calls(&self) -> Vec<(String, usize)> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CollectionStore for FakeStore {
        async fn list_collections(&self) -> Result<BTreeSet<String>, StoreError> {
            Ok(self.distances.keys().cloned().collect())
        }

        async fn upsert(
            &self,
            _collection: &str,
            _records: &[CollectionRecord],
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn query(
            &self,
            collection: &str,
            _vector: &[f32],
            k: usize,
        ) -> Result<Vec<CandidateRecord>, StoreError> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((collection.to_string(), k));
            }
            if self.slow.contains(collection) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            if self.failing.contains(collection) {
                return Err(StoreError::Request("connection refused".to_string()));
            }

            Ok(self
                .distances
                .get(collection)
                .map(|distances| {
                    distances
                        .iter()
                        .take(k)
                        .enumerate()
                        .map(|(index, distance)| CandidateRecord {
                            collection_name: String::new(),
                            id: format!("{collection}_{index}"),
                            document: format!("chunk {index} of {collection}"),
                            metadata: BTreeMap::new(),
                            distance: *distance,
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
    }

    fn names(collections: &[&str]) -> Vec<String> {
        collections.iter().map(|name| name.to_string()).collect()
    }

    fn vector() -> QueryEmbedding {
        QueryEmbedding::Vector(vec![1.0, 0.0])
    }

    #[tokio::test]
    async fn merges_collections_into_one_global_ranking() {
        let store = FakeStore::default()
            .with("paperA", &[0.10, 0.30])
            .with("paperB", &[0.05, 0.40]);
        let aggregator = RetrievalAggregator::new(Arc::new(store));

        let report = aggregator
            .retrieve(&vector(), 3, &names(&["paperA", "paperB"]))
            .await;

        let distances: Vec<_> = report.results.iter().map(|hit| hit.distance).collect();
        let sources: Vec<_> = report
            .results
            .iter()
            .map(|hit| hit.collection_name.as_str())
            .collect();
        assert_eq!(distances, vec![0.05, 0.10, 0.30]);
        assert_eq!(sources, vec!["paperB", "paperA", "paperA"]);
        assert_eq!(report.candidate_count, 4);

        let union: HashSet<_> = ["paperA_0", "paperA_1", "paperB_0", "paperB_1"].into();
        assert!(report.results.iter().all(|hit| union.contains(hit.id.as_str())));
    }

    #[tokio::test]
    async fn ties_keep_collection_enumeration_order() {
        let store = Arc::new(FakeStore::default().with("a", &[0.2]).with("b", &[0.2]));

        let forward = RetrievalAggregator::new(Arc::clone(&store))
            .retrieve(&vector(), 5, &names(&["a", "b"]))
            .await;
        let reverse = RetrievalAggregator::new(store)
            .retrieve(&vector(), 5, &names(&["b", "a"]))
            .await;

        let order = |report: &RetrievalReport| {
            report
                .results
                .iter()
                .map(|hit| hit.collection_name.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(order(&forward), vec!["a", "b"]);
        assert_eq!(order(&reverse), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn no_vector_short_circuits_without_querying() {
        let store = Arc::new(FakeStore::default().with("paperA", &[0.1]));
        let aggregator = RetrievalAggregator::new(Arc::clone(&store));

        let report = aggregator
            .retrieve(
                &QueryEmbedding::NoVector(NoVectorReason::BlankInput),
                5,
                &names(&["paperA"]),
            )
            .await;

        assert_eq!(report, RetrievalReport::default());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn failing_and_empty_collections_are_skipped() {
        let store = FakeStore::default()
            .with("paperA", &[0.3])
            .with("empty", &[])
            .failing("broken");
        let aggregator = RetrievalAggregator::new(Arc::new(store));

        let report = aggregator
            .retrieve(&vector(), 5, &names(&["broken", "empty", "paperA"]))
            .await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.collections_with_candidates, vec!["paperA"]);
        assert_eq!(report.failed_collections, vec!["broken"]);
    }

    #[tokio::test]
    async fn local_depth_is_clamped_and_shared_with_global_cutoff() {
        let store = Arc::new(FakeStore::default().with("paperA", &[0.1; 60]));
        let aggregator = RetrievalAggregator::new(Arc::clone(&store));

        let report = aggregator
            .retrieve(&vector(), 80, &names(&["paperA", "paperA"]))
            .await;

        assert_eq!(store.calls(), vec![("paperA".to_string(), 50)]);
        assert_eq!(report.results.len(), 50);
    }

    #[tokio::test]
    async fn wider_local_depth_feeds_the_global_cutoff() {
        let store = Arc::new(
            FakeStore::default()
                .with("paperA", &[0.1, 0.2, 0.3])
                .with("paperB", &[0.4]),
        );
        let options = RetrievalOptions {
            local_k: Some(3),
            collection_timeout: None,
        };
        let aggregator = RetrievalAggregator::with_options(Arc::clone(&store), options);

        let report = aggregator
            .retrieve(&vector(), 2, &names(&["paperA", "paperB"]))
            .await;

        assert!(store.calls().iter().all(|(_, k)| *k == 3));
        assert_eq!(report.candidate_count, 4);
        assert_eq!(report.results.len(), 2);
    }

    #[tokio::test]
    async fn slow_collection_times_out_as_empty() {
        let store = FakeStore::default()
            .with("fast", &[0.2])
            .with("slow", &[0.1])
            .slow("slow");
        let options = RetrievalOptions {
            local_k: None,
            collection_timeout: Some(Duration::from_millis(20)),
        };
        let aggregator = RetrievalAggregator::with_options(Arc::new(store), options);

        let report = aggregator
            .retrieve(&vector(), 5, &names(&["slow", "fast"]))
            .await;

        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].collection_name, "fast");
        assert_eq!(report.failed_collections, vec!["slow"]);
    }

    #[test]
    fn rank_globally_is_monotonic() {
        let candidates = [0.9, 0.1, 0.5, 0.1, 0.3]
            .iter()
            .enumerate()
            .map(|(index, distance)| CandidateRecord {
                collection_name: "c".to_string(),
                id: index.to_string(),
                document: String::new(),
                metadata: BTreeMap::new(),
                distance: *distance,
            })
            .collect();

        let ranked = rank_globally(candidates, 4);

        assert_eq!(ranked.len(), 4);
        assert!(ranked.windows(2).all(|pair| pair[0].distance <= pair[1].distance));
        assert_eq!(ranked[0].id, "1");
        assert_eq!(ranked[1].id, "3");
    }
}
