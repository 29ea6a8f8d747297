use crate::error::EmbeddingError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let requested = 1;
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        match vectors.pop() {
            Some(vector) if vectors.is_empty() => Ok(vector),
            _ => Err(EmbeddingError::CountMismatch {
                requested,
                returned: vectors.len() + 1,
            }),
        }
    }
}

/// Why a query could not be turned into a vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoVectorReason {
    BlankInput,
    ModelFailure(String),
}

/// Result of embedding a query. `NoVector` means "cannot search", never a zero vector.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEmbedding {
    Vector(Vec<f32>),
    NoVector(NoVectorReason),
}

impl QueryEmbedding {
    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Self::Vector(vector) => Some(vector),
            Self::NoVector(_) => None,
        }
    }
}

pub struct EmbeddingGateway<E> {
    embedder: Arc<E>,
}

impl<E> Clone for EmbeddingGateway<E> {
    fn clone(&self) -> Self {
        Self {
            embedder: Arc::clone(&self.embedder),
        }
    }
}

impl<E: Embedder> EmbeddingGateway<E> {
    pub fn new(embedder: E) -> Self {
        Self {
            embedder: Arc::new(embedder),
        }
    }

    pub fn embedder(&self) -> &E {
        &self.embedder
    }

    /// Embeds a query. Blank input never reaches the model.
    pub async fn embed(&self, text: &str) -> QueryEmbedding {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return QueryEmbedding::NoVector(NoVectorReason::BlankInput);
        }

        match self.embedder.embed(trimmed).await {
            Ok(vector) if !vector.is_empty() => QueryEmbedding::Vector(vector),
            Ok(_) => {
                warn!(model = self.embedder.model_name(), "embedder returned an empty vector");
                QueryEmbedding::NoVector(NoVectorReason::ModelFailure(
                    "empty vector".to_string(),
                ))
            }
            Err(error) => {
                warn!(model = self.embedder.model_name(), %error, "query embedding failed");
                QueryEmbedding::NoVector(NoVectorReason::ModelFailure(error.to_string()))
            }
        }
    }

    /// Embeds every text or fails as a whole.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|text| text.trim().is_empty()) {
            return Err(EmbeddingError::BlankInput);
        }

        let vectors = self.embedder.embed_batch(texts).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                requested: texts.len(),
                returned: vectors.len(),
            });
        }
        Ok(vectors)
    }
}

/// Hashed character trigram embedder. Deterministic and offline.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return vector;
        }

        let grams: Vec<&[char]> = if chars.len() < 3 {
            vec![&chars[..]]
        } else {
            chars.windows(3).collect()
        };

        for gram in grams {
            let token = gram.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    fn model_name(&self) -> &str {
        "char-trigram"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    device: &'a str,
    input: &'a [String],
}

/// Client for an HTTP embedding service hosting a sentence embedding model.
pub struct HttpEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    device: String,
    api_key: Option<String>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            device: device.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut request = self.client.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            device: &self.device,
            input: texts,
        });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EmbeddingError::Model(format!(
                "embedding request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: Value = response.json().await?;
        parse_embedding_response(&payload)
    }
}

/// The embedder selected by configuration at startup.
pub enum EmbedderBackend {
    Ngram(CharacterNgramEmbedder),
    Http(HttpEmbedder),
}

#[async_trait]
impl Embedder for EmbedderBackend {
    fn model_name(&self) -> &str {
        match self {
            Self::Ngram(embedder) => embedder.model_name(),
            Self::Http(embedder) => embedder.model_name(),
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        match self {
            Self::Ngram(embedder) => embedder.embed_batch(texts).await,
            Self::Http(embedder) => embedder.embed_batch(texts).await,
        }
    }
}

/// Accepts `{"embeddings": [[..]]}` or OpenAI-style `{"data": [{"index", "embedding"}]}`.
fn parse_embedding_response(payload: &Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if let Some(rows) = payload.get("embeddings").and_then(Value::as_array) {
        return rows.iter().map(parse_vector).collect();
    }

    if let Some(items) = payload.get("data").and_then(Value::as_array) {
        let mut indexed = items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let index = item
                    .get("index")
                    .and_then(Value::as_u64)
                    .map_or(position, |index| index as usize);
                let vector = item
                    .get("embedding")
                    .ok_or_else(|| EmbeddingError::Model("data item without embedding".to_string()))
                    .and_then(parse_vector)?;
                Ok((index, vector))
            })
            .collect::<Result<Vec<_>, EmbeddingError>>()?;
        indexed.sort_by_key(|(index, _)| *index);
        return Ok(indexed.into_iter().map(|(_, vector)| vector).collect());
    }

    Err(EmbeddingError::Model(
        "response has neither `embeddings` nor `data`".to_string(),
    ))
}

fn parse_vector(row: &Value) -> Result<Vec<f32>, EmbeddingError> {
    row.as_array()
        .ok_or_else(|| EmbeddingError::Model("embedding is not an array".to_string()))?
        .iter()
        .map(|value| {
            value
                .as_f64()
                .map(|number| number as f32)
                .ok_or_else(|| EmbeddingError::Model("embedding value is not a number".to_string()))
        })
        .collect()
}
