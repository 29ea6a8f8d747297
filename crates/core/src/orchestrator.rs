use crate::embeddings::{Embedder, EmbeddingGateway, QueryEmbedding};
use crate::retrieval::{RetrievalAggregator, RetrievalOptions};
use crate::store::RankedResult;
use crate::traits::CollectionStore;
use crate::StoreError;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

pub const SELECT_SOURCE_WARNING: &str = "Please select at least one source to search.";
pub const ENTER_QUERY_WARNING: &str = "Please enter a query.";
pub const INVALID_COUNT_WARNING: &str = "Please enter a valid positive number for matches.";
pub const EMBEDDING_FAILED_ERROR: &str =
    "Could not embed your query. Please try a different query or reload the app.";
pub const NO_RESULTS_WARNING: &str = "No results returned from the selected sources.";
pub const NO_MATCHES_INFO: &str = "No matches found.";

/// Everything a search can end in. Faults never escape as errors.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Warning(String),
    Error(String),
    Info(String),
    Results(Vec<RankedResult>),
}

impl Outcome {
    fn warning(message: &str) -> Self {
        Self::Warning(message.to_string())
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Warning(message) | Self::Error(message) | Self::Info(message) => {
                Some(message.as_str())
            }
            Self::Results(_) => None,
        }
    }
}

pub struct SearchOrchestrator<E, S> {
    gateway: EmbeddingGateway<E>,
    aggregator: RetrievalAggregator<S>,
}

impl<E, S> SearchOrchestrator<E, S>
where
    E: Embedder,
    S: CollectionStore,
{
    pub fn new(gateway: EmbeddingGateway<E>, store: Arc<S>) -> Self {
        Self::with_options(gateway, store, RetrievalOptions::default())
    }

    pub fn with_options(
        gateway: EmbeddingGateway<E>,
        store: Arc<S>,
        options: RetrievalOptions,
    ) -> Self {
        Self {
            gateway,
            aggregator: RetrievalAggregator::with_options(store, options),
        }
    }

    pub async fn available_sources(&self) -> Result<BTreeSet<String>, StoreError> {
        self.aggregator.store().list_collections().await
    }

    /// Validates inputs in order (first failure wins), embeds the query and
    /// ranks matches across the selected collections.
    pub async fn search(&self, query: &str, k: &str, selected: &[String]) -> Outcome {
        if selected.is_empty() {
            return Outcome::warning(SELECT_SOURCE_WARNING);
        }

        if query.trim().is_empty() {
            return Outcome::warning(ENTER_QUERY_WARNING);
        }

        let Some(top_k) = parse_top_k(k) else {
            debug!(raw = k, "rejected match count");
            return Outcome::warning(INVALID_COUNT_WARNING);
        };

        let embedding = self.gateway.embed(query).await;
        if let QueryEmbedding::NoVector(reason) = &embedding {
            debug!(?reason, "query produced no vector");
            return Outcome::Error(EMBEDDING_FAILED_ERROR.to_string());
        }

        let report = self.aggregator.retrieve(&embedding, top_k, selected).await;
        if report.candidate_count == 0 {
            return Outcome::warning(NO_RESULTS_WARNING);
        }
        if report.results.is_empty() {
            return Outcome::Info(NO_MATCHES_INFO.to_string());
        }

        Outcome::Results(report.results)
    }
}

/// A strictly positive integer, surrounding whitespace and a leading `+`
/// allowed. Counts too large for `usize` saturate.
pub fn parse_top_k(raw: &str) -> Option<usize> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    match digits.parse::<usize>() {
        Ok(k) => Some(k).filter(|k| *k > 0),
        Err(_) => Some(usize::MAX),
    }
}
