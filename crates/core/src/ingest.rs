use crate::chunking::{PageChunker, TextCleaner};
use crate::embeddings::{Embedder, EmbeddingGateway};
use crate::error::EmbeddingError;
use crate::extractor::{extract_page_texts, RawPage};
use crate::models::{Chunk, IngestionOptions, PageText};
use crate::store::{
    CollectionRecord, METADATA_CHUNK_ID, METADATA_INGESTED_AT, METADATA_PAGE_SPAN,
    METADATA_SOURCE,
};
use crate::traits::CollectionStore;
use crate::IngestError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

/// The collection a document is stored in: its file name without extension.
pub fn source_id_for(path: &Path) -> Result<String, IngestError> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
        .filter(|stem| !stem.trim().is_empty())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })
}

pub fn records_from_chunks(
    chunks: &[Chunk],
    vectors: Vec<Vec<f32>>,
    ingested_at: DateTime<Utc>,
) -> Result<Vec<CollectionRecord>, IngestError> {
    if chunks.len() != vectors.len() {
        return Err(EmbeddingError::CountMismatch {
            requested: chunks.len(),
            returned: vectors.len(),
        }
        .into());
    }

    let ingested_at = ingested_at.to_rfc3339();
    Ok(chunks
        .iter()
        .zip(vectors)
        .map(|(chunk, vector)| CollectionRecord {
            id: chunk.chunk_id.clone(),
            vector,
            metadata: BTreeMap::from([
                (METADATA_SOURCE.to_string(), chunk.source_id.clone()),
                (
                    METADATA_PAGE_SPAN.to_string(),
                    chunk.page_span.to_metadata_value(),
                ),
                (METADATA_CHUNK_ID.to_string(), chunk.chunk_id.clone()),
                (METADATA_INGESTED_AT.to_string(), ingested_at.clone()),
            ]),
            document: chunk.text.clone(),
        })
        .collect())
}

pub struct IngestedDocument {
    pub path: PathBuf,
    pub source_id: String,
    pub chunk_count: usize,
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

pub struct IngestionReport {
    pub documents: Vec<IngestedDocument>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl IngestionReport {
    pub fn total_chunks(&self) -> usize {
        self.documents.iter().map(|document| document.chunk_count).sum()
    }
}

/// Clean, chunk, embed and store one document per collection.
///
/// A document is written with a single upsert, so either all of its chunks
/// land in the collection or none do. Callers must not ingest into the same
/// collection concurrently.
pub struct DocumentIngestor<E, S> {
    cleaner: TextCleaner,
    chunker: PageChunker,
    gateway: EmbeddingGateway<E>,
    store: Arc<S>,
}

impl<E, S> DocumentIngestor<E, S>
where
    E: Embedder,
    S: CollectionStore,
{
    pub fn new(
        options: IngestionOptions,
        gateway: EmbeddingGateway<E>,
        store: Arc<S>,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            cleaner: TextCleaner::new()?,
            chunker: PageChunker::from_options(options)?,
            gateway,
            store,
        })
    }

    pub fn clean_pages(&self, source_id: &str, raw_pages: &[RawPage]) -> Vec<PageText> {
        raw_pages
            .iter()
            .map(|page| PageText::new(source_id, page.number, self.cleaner.clean(&page.text)))
            .filter(|page| !page.text.is_empty())
            .collect()
    }

    pub fn build_chunks(&self, source_id: &str, raw_pages: &[RawPage]) -> Vec<Chunk> {
        self.chunker.chunk(&self.clean_pages(source_id, raw_pages))
    }

    pub async fn try_ingest_pages(
        &self,
        source_id: &str,
        raw_pages: &[RawPage],
    ) -> Result<usize, IngestError> {
        if source_id.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "source id must not be blank".to_string(),
            ));
        }

        let chunks = self.build_chunks(source_id, raw_pages);
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self.gateway.embed_batch(&texts).await?;
        let records = records_from_chunks(&chunks, vectors, Utc::now())?;
        self.store.upsert(source_id, &records).await?;

        Ok(records.len())
    }

    /// Number of chunks stored, or 0 when any step fails.
    pub async fn ingest_pages(&self, source_id: &str, raw_pages: &[RawPage]) -> usize {
        match self.try_ingest_pages(source_id, raw_pages).await {
            Ok(count) => {
                info!(source = source_id, chunk_count = count, "document ingested");
                count
            }
            Err(error) => {
                error!(source = source_id, %error, "document ingestion failed");
                0
            }
        }
    }

    pub async fn try_ingest_pdf(&self, path: &Path) -> Result<IngestedDocument, IngestError> {
        let source_id = source_id_for(path)?;
        let owned = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || extract_page_texts(&owned)).await??;
        let chunk_count = self.try_ingest_pages(&source_id, &pages).await?;

        Ok(IngestedDocument {
            path: path.to_path_buf(),
            source_id,
            chunk_count,
        })
    }

    pub async fn ingest_pdf(&self, path: &Path) -> usize {
        match self.try_ingest_pdf(path).await {
            Ok(document) => {
                info!(
                    path = %path.display(),
                    source = %document.source_id,
                    chunk_count = document.chunk_count,
                    "pdf ingested"
                );
                document.chunk_count
            }
            Err(error) => {
                error!(path = %path.display(), %error, "pdf ingestion failed");
                0
            }
        }
    }

    pub async fn ingest_files(&self, paths: &[PathBuf]) -> IngestionReport {
        let mut documents = Vec::new();
        let mut skipped_files = Vec::new();

        for path in paths {
            match self.try_ingest_pdf(path).await {
                Ok(document) => documents.push(document),
                Err(error) => skipped_files.push(SkippedPdf {
                    path: path.clone(),
                    reason: error.to_string(),
                }),
            }
        }

        IngestionReport {
            documents,
            skipped_files,
        }
    }

    pub async fn ingest_folder(&self, folder: &Path) -> Result<IngestionReport, IngestError> {
        let files = discover_pdf_files(folder);

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                folder.display()
            )));
        }

        Ok(self.ingest_files(&files).await)
    }
}
