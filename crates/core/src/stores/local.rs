use crate::store::{CandidateRecord, CollectionRecord};
use crate::traits::CollectionStore;
use crate::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const COLLECTION_EXTENSION: &str = "json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCollection {
    name: String,
    dimension: Option<usize>,
    records: Vec<CollectionRecord>,
}

/// Collections persisted as one JSON file each under a root directory,
/// searched exhaustively by cosine distance.
#[derive(Debug, Clone)]
pub struct FileCollectionStore {
    root: PathBuf,
}

impl FileCollectionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, collection: &str) -> Result<PathBuf, StoreError> {
        let valid = !collection.trim().is_empty()
            && !collection.starts_with('.')
            && !collection.contains(&['/', '\\'][..]);
        if !valid {
            return Err(StoreError::Request(format!(
                "invalid collection name: {collection:?}"
            )));
        }
        Ok(self
            .root
            .join(format!("{collection}.{COLLECTION_EXTENSION}")))
    }

    async fn load(&self, path: &Path) -> Result<Option<StoredCollection>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
}

#[async_trait]
impl CollectionStore for FileCollectionStore {
    async fn list_collections(&self) -> Result<BTreeSet<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(error) => return Err(error.into()),
        };

        let mut names = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_collection = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == COLLECTION_EXTENSION);
            if !is_collection || !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                names.insert(stem.to_string());
            }
        }

        Ok(names)
    }

    async fn upsert(
        &self,
        collection: &str,
        records: &[CollectionRecord],
    ) -> Result<(), StoreError> {
        let path = self.collection_path(collection)?;
        if records.is_empty() {
            return Ok(());
        }

        let mut stored = self.load(&path).await?.unwrap_or_else(|| StoredCollection {
            name: collection.to_string(),
            ..StoredCollection::default()
        });

        let expected = stored.dimension.unwrap_or(records[0].vector.len());
        if let Some(record) = records.iter().find(|record| record.vector.len() != expected) {
            return Err(StoreError::DimensionMismatch {
                expected,
                actual: record.vector.len(),
            });
        }
        stored.dimension = Some(expected);

        let mut positions: HashMap<String, usize> = stored
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id.clone(), position))
            .collect();

        for record in records {
            match positions.get(&record.id) {
                Some(position) => stored.records[*position] = record.clone(),
                None => {
                    positions.insert(record.id.clone(), stored.records.len());
                    stored.records.push(record.clone());
                }
            }
        }

        fs::create_dir_all(&self.root).await?;
        let staging = path.with_extension(format!("{COLLECTION_EXTENSION}.tmp"));
        fs::write(&staging, serde_json::to_vec(&stored)?).await?;
        fs::rename(&staging, &path).await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<CandidateRecord>, StoreError> {
        let path = self.collection_path(collection)?;
        let Some(stored) = self.load(&path).await? else {
            return Ok(Vec::new());
        };

        if let Some(expected) = stored.dimension {
            if expected != vector.len() {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut scored: Vec<(f64, CollectionRecord)> = stored
            .records
            .into_iter()
            .map(|record| (cosine_distance(vector, &record.vector), record))
            .collect();
        scored.sort_by(|left, right| left.0.total_cmp(&right.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, record)| CandidateRecord {
                collection_name: collection.to_string(),
                id: record.id,
                document: record.document,
                metadata: record.metadata,
                distance,
            })
            .collect())
    }
}

/// `1 - cos(a, b)`; a zero vector is treated as orthogonal to everything.
fn cosine_distance(left: &[f32], right: &[f32]) -> f64 {
    let mut dot = 0f64;
    let mut left_norm = 0f64;
    let mut right_norm = 0f64;
    for (a, b) in left.iter().zip(right) {
        let (a, b) = (f64::from(*a), f64::from(*b));
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }

    if left_norm == 0.0 || right_norm == 0.0 {
        return 1.0;
    }
    1.0 - dot / (left_norm.sqrt() * right_norm.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn record(id: &str, vector: Vec<f32>) -> CollectionRecord {
        CollectionRecord {
            id: id.to_string(),
            vector,
            metadata: BTreeMap::from([("chunk_id".to_string(), id.to_string())]),
            document: format!("text of {id}"),
        }
    }

    #[tokio::test]
    async fn query_ranks_by_cosine_distance() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = FileCollectionStore::new(dir.path().join("db"));

        store
            .upsert(
                "paperA",
                &[
                    record("far", vec![0.0, 1.0]),
                    record("near", vec![1.0, 0.1]),
                    record("exact", vec![2.0, 0.0]),
                ],
            )
            .await?;

        let hits = store.query("paperA", &[1.0, 0.0], 2).await?;
        let ids: Vec<_> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near"]);
        assert!(hits[0].distance.abs() < 1e-9);
        assert!(hits[0].distance <= hits[1].distance);
        assert_eq!(hits[0].collection_name, "paperA");
        assert_eq!(hits[0].document, "text of exact");
        Ok(())
    }

    #[tokio::test]
    async fn upsert_replaces_existing_ids_and_lists_collections(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = FileCollectionStore::new(dir.path());

        store.upsert("paperA", &[record("a", vec![1.0, 0.0])]).await?;
        store.upsert("paperA", &[record("a", vec![0.0, 1.0])]).await?;
        store.upsert("paperB", &[record("b", vec![1.0, 0.0])]).await?;

        let hits = store.query("paperA", &[0.0, 1.0], 10).await?;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].distance.abs() < 1e-9);

        let names: Vec<_> = store.list_collections().await?.into_iter().collect();
        assert_eq!(names, vec!["paperA".to_string(), "paperB".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_collection_has_no_candidates() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = FileCollectionStore::new(dir.path().join("missing"));

        assert!(store.query("nothing", &[1.0], 5).await?.is_empty());
        assert!(store.list_collections().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = FileCollectionStore::new(dir.path());

        let mixed = [record("a", vec![1.0, 0.0]), record("b", vec![1.0])];
        assert!(matches!(
            store.upsert("paperA", &mixed).await,
            Err(StoreError::DimensionMismatch { expected: 2, actual: 1 })
        ));
        assert!(store.list_collections().await?.is_empty());

        store.upsert("paperA", &[record("a", vec![1.0, 0.0])]).await?;
        assert!(matches!(
            store.query("paperA", &[1.0, 0.0, 0.0], 1).await,
            Err(StoreError::DimensionMismatch { expected: 2, actual: 3 })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn path_like_collection_names_are_rejected() {
        let store = FileCollectionStore::new("unused");
        assert!(matches!(
            store.query("../escape", &[1.0], 1).await,
            Err(StoreError::Request(_))
        ));
    }
}
