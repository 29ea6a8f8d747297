pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod store;
pub mod stores;
pub mod traits;

pub use chunking::{make_chunk_id, normalize_whitespace, ChunkingConfig, PageChunker, TextCleaner};
pub use config::AppConfig;
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, EmbedderBackend, EmbeddingGateway, HttpEmbedder,
    NoVectorReason, QueryEmbedding, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{EmbeddingError, IngestError, StoreError};
pub use extractor::{extract_page_texts, LopdfExtractor, PdfExtractor, RawPage};
pub use ingest::{
    discover_pdf_files, records_from_chunks, source_id_for, DocumentIngestor, IngestedDocument,
    IngestionReport, SkippedPdf,
};
pub use models::{Chunk, IngestionOptions, PageSpan, PageText};
pub use orchestrator::{parse_top_k, Outcome, SearchOrchestrator};
pub use retrieval::{rank_globally, RetrievalAggregator, RetrievalOptions, RetrievalReport};
pub use store::{clamp_top_k, CandidateRecord, CollectionRecord, RankedResult};
pub use stores::{ChromaStore, FileCollectionStore, StoreBackend};
pub use traits::CollectionStore;
