use crate::store::{CandidateRecord, CollectionRecord};
use crate::traits::CollectionStore;
use crate::StoreError;
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

const BACKEND: &str = "chroma";

/// Chroma server client speaking the v1 REST API.
pub struct ChromaStore {
    client: Client,
    base_url: Url,
}

impl ChromaStore {
    pub fn new(endpoint: &str) -> Result<Self, StoreError> {
        let mut base_url = Url::parse(endpoint)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url, StoreError> {
        Ok(self.base_url.join(path)?)
    }

    async fn collection_id(&self, collection: &str) -> Result<String, StoreError> {
        let response = self
            .client
            .post(self.url("api/v1/collections")?)
            .json(&json!({ "name": collection, "get_or_create": true }))
            .send()
            .await?;

        let parsed: Value = checked(response).await?.json().await?;
        parsed
            .pointer("/id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("collection {collection} has no id"),
            })
    }

    /// Looks a collection up without creating it.
    async fn existing_collection_id(&self, collection: &str) -> Result<Option<String>, StoreError> {
        let mut url = self.url("api/v1/collections/")?;
        url.path_segments_mut()
            .map_err(|_| StoreError::Request(format!("cannot address {collection}")))?
            .pop_if_empty()
            .push(collection);

        let response = self.client.get(url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let parsed: Value = checked(response).await?.json().await?;
        Ok(parsed.pointer("/id").and_then(Value::as_str).map(str::to_string))
    }
}

async fn checked(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(StoreError::BackendResponse {
        backend: BACKEND.to_string(),
        details: format!("{status}: {body}"),
    })
}

#[async_trait]
impl CollectionStore for ChromaStore {
    async fn list_collections(&self) -> Result<BTreeSet<String>, StoreError> {
        let response = self
            .client
            .get(self.url("api/v1/collections")?)
            .send()
            .await?;

        let parsed: Value = checked(response).await?.json().await?;
        let names = parsed
            .as_array()
            .map(|collections| {
                collections
                    .iter()
                    .filter_map(|collection| collection.pointer("/name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(names)
    }

    async fn upsert(
        &self,
        collection: &str,
        records: &[CollectionRecord],
    ) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let id = self.collection_id(collection).await?;
        let body = json!({
            "ids": records.iter().map(|record| &record.id).collect::<Vec<_>>(),
            "embeddings": records.iter().map(|record| &record.vector).collect::<Vec<_>>(),
            "metadatas": records.iter().map(|record| &record.metadata).collect::<Vec<_>>(),
            "documents": records.iter().map(|record| &record.document).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .post(self.url(&format!("api/v1/collections/{id}/upsert"))?)
            .json(&body)
            .send()
            .await?;

        checked(response).await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        let Some(id) = self.existing_collection_id(collection).await? else {
            return Ok(Vec::new());
        };
        let response = self
            .client
            .post(self.url(&format!("api/v1/collections/{id}/query"))?)
            .json(&json!({
                "query_embeddings": [vector],
                "n_results": k,
                "include": ["documents", "metadatas", "distances"],
            }))
            .send()
            .await?;

        let parsed: Value = checked(response).await?.json().await?;
        parse_query_response(collection, &parsed)
    }
}

/// Flattens Chroma's per-query nested arrays (`ids[0][i]`, `distances[0][i]`, ...)
/// into candidates for the first query embedding.
fn parse_query_response(collection: &str, payload: &Value) -> Result<Vec<CandidateRecord>, StoreError> {
    let first_row = |key: &str| {
        payload
            .get(key)
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
    };

    let ids = first_row("ids");
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let documents = first_row("documents");
    let metadatas = first_row("metadatas");
    let distances = first_row("distances");

    if distances.len() != ids.len() {
        return Err(StoreError::BackendResponse {
            backend: BACKEND.to_string(),
            details: format!("{} ids but {} distances", ids.len(), distances.len()),
        });
    }

    let mut candidates = Vec::with_capacity(ids.len());
    for (position, id) in ids.iter().enumerate() {
        let id = id.as_str().map(str::to_string).unwrap_or_default();
        let distance = distances[position]
            .as_f64()
            .ok_or_else(|| StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("distance for {id} is not a number"),
            })?;
        let document = documents
            .get(position)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let metadata = metadatas
            .get(position)
            .and_then(Value::as_object)
            .map(|object| {
                object
                    .iter()
                    .filter_map(|(key, value)| metadata_string(value).map(|text| (key.clone(), text)))
                    .collect::<BTreeMap<_, _>>()
            })
            .unwrap_or_default();

        candidates.push(CandidateRecord {
            collection_name: collection.to_string(),
            id,
            document,
            metadata,
            distance,
        });
    }

    Ok(candidates)
}

fn metadata_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}
