//! Process-level settings for the external collaborators.
//!
//! Values come from the process environment, then from a `.env` file in the
//! working directory, then from the defaults below. None of them
//! change chunking or ranking behaviour; they only pick and configure the
//! embedding model and the vector store.

use crate::embeddings::{CharacterNgramEmbedder, EmbedderBackend, HttpEmbedder};
use crate::retrieval::RetrievalOptions;
use crate::stores::{ChromaStore, FileCollectionStore, StoreBackend};
use crate::StoreError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const VECTOR_DB_PATH_VAR: &str = "VECTOR_DB_PATH";
pub const EMBEDDING_MODEL_VAR: &str = "EMBEDDING_MODEL";
pub const EMBEDDING_DEVICE_VAR: &str = "EMBEDDING_DEVICE";
pub const EMBEDDING_ENDPOINT_VAR: &str = "EMBEDDING_ENDPOINT";
pub const EMBEDDING_API_KEY_VAR: &str = "EMBEDDING_API_KEY";
pub const CHROMA_URL_VAR: &str = "CHROMA_URL";
pub const COLLECTION_TIMEOUT_MS_VAR: &str = "COLLECTION_TIMEOUT_MS";

pub const DEFAULT_ENV_FILE: &str = ".env";

pub const DEFAULT_VECTOR_DB_PATH: &str = "./chroma_db";
pub const DEFAULT_EMBEDDING_MODEL: &str = "all-mpnet-base-v2";
pub const DEFAULT_EMBEDDING_DEVICE: &str = "cpu";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub vector_db_path: PathBuf,
    pub embedding_model: String,
    pub embedding_device: String,
    pub embedding_endpoint: Option<String>,
    pub embedding_api_key: Option<String>,
    pub chroma_url: Option<String>,
    pub collection_timeout: Option<Duration>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vector_db_path: PathBuf::from(DEFAULT_VECTOR_DB_PATH),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_device: DEFAULT_EMBEDDING_DEVICE.to_string(),
            embedding_endpoint: None,
            embedding_api_key: None,
            chroma_url: None,
            collection_timeout: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_env_file(Path::new(DEFAULT_ENV_FILE))
    }

    /// Process variables win over `KEY=value` lines from `path`. A missing
    /// file is the same as an empty one.
    pub fn from_env_file(path: &Path) -> Self {
        Self::layered(path, |key| std::env::var(key).ok())
    }

    fn layered<F>(path: &Path, process: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let file_values = read_env_file(path);
        Self::from_lookup(|key| process(key).or_else(|| file_values.get(key).cloned()))
    }

    /// Builds the config from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let defaults = Self::default();

        let collection_timeout = value(COLLECTION_TIMEOUT_MS_VAR).and_then(|raw| {
            match raw.parse::<u64>() {
                Ok(millis) if millis > 0 => Some(Duration::from_millis(millis)),
                _ => {
                    warn!(value = %raw, "ignoring invalid {COLLECTION_TIMEOUT_MS_VAR}");
                    None
                }
            }
        });

        Self {
            vector_db_path: value(VECTOR_DB_PATH_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.vector_db_path),
            embedding_model: value(EMBEDDING_MODEL_VAR).unwrap_or(defaults.embedding_model),
            embedding_device: value(EMBEDDING_DEVICE_VAR).unwrap_or(defaults.embedding_device),
            embedding_endpoint: value(EMBEDDING_ENDPOINT_VAR),
            embedding_api_key: value(EMBEDDING_API_KEY_VAR),
            chroma_url: value(CHROMA_URL_VAR),
            collection_timeout,
        }
    }

    /// The HTTP model when an endpoint is configured, otherwise the offline
    /// trigram embedder.
    pub fn embedder(&self) -> EmbedderBackend {
        match &self.embedding_endpoint {
            Some(endpoint) => EmbedderBackend::Http(
                HttpEmbedder::new(endpoint, &self.embedding_model, &self.embedding_device)
                    .with_api_key(self.embedding_api_key.clone()),
            ),
            None => {
                warn!(
                    model = %self.embedding_model,
                    "no {EMBEDDING_ENDPOINT_VAR} set, using the offline trigram embedder"
                );
                EmbedderBackend::Ngram(CharacterNgramEmbedder::default())
            }
        }
    }

    pub fn store(&self) -> Result<StoreBackend, StoreError> {
        match &self.chroma_url {
            Some(url) => Ok(StoreBackend::Chroma(ChromaStore::new(url)?)),
            None => Ok(StoreBackend::Local(FileCollectionStore::new(
                &self.vector_db_path,
            ))),
        }
    }

    pub fn retrieval_options(&self) -> RetrievalOptions {
        RetrievalOptions {
            local_k: None,
            collection_timeout: self.collection_timeout,
        }
    }
}

fn read_env_file(path: &Path) -> HashMap<String, String> {
    let entries = match dotenvy::from_path_iter(path) {
        Ok(entries) => entries,
        Err(error) if error.not_found() => return HashMap::new(),
        Err(error) => {
            warn!(path = %path.display(), %error, "ignoring unreadable env file");
            return HashMap::new();
        }
    };

    let mut values = HashMap::new();
    for entry in entries {
        match entry {
            Ok((key, value)) => {
                values.insert(key, value);
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping malformed env file line");
            }
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::Embedder;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key: &str| values.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset_or_blank() {
        let config = AppConfig::from_lookup(lookup(&[(EMBEDDING_MODEL_VAR, "  ")]));
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.vector_db_path, PathBuf::from("./chroma_db"));
        assert_eq!(config.embedding_model, "all-mpnet-base-v2");
        assert_eq!(config.embedding_device, "cpu");
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = AppConfig::from_lookup(lookup(&[
            (VECTOR_DB_PATH_VAR, "/var/lib/citewise"),
            (EMBEDDING_MODEL_VAR, "bge-small-en"),
            (EMBEDDING_DEVICE_VAR, "cuda"),
            (EMBEDDING_ENDPOINT_VAR, "http://localhost:8080/embed"),
            (COLLECTION_TIMEOUT_MS_VAR, "250"),
        ]));

        assert_eq!(config.vector_db_path, PathBuf::from("/var/lib/citewise"));
        assert_eq!(config.embedding_device, "cuda");
        assert_eq!(config.collection_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.embedder().model_name(), "bge-small-en");
        assert!(matches!(config.store(), Ok(StoreBackend::Local(_))));
    }

    #[test]
    fn env_file_fills_gaps_left_by_the_process() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# local settings\nEMBEDDING_MODEL=bge-small-en\nCOLLECTION_TIMEOUT_MS=750\n",
        )?;

        let config = AppConfig::layered(&path, lookup(&[(EMBEDDING_MODEL_VAR, "e5-large")]));

        assert_eq!(config.embedding_model, "e5-large");
        assert_eq!(config.collection_timeout, Some(Duration::from_millis(750)));
        assert_eq!(config.embedding_device, DEFAULT_EMBEDDING_DEVICE);
        Ok(())
    }

    #[test]
    fn missing_env_file_falls_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = AppConfig::layered(&dir.path().join("absent.env"), lookup(&[]));
        assert_eq!(config, AppConfig::default());
        Ok(())
    }

    #[test]
    fn invalid_timeout_is_ignored() {
        let config = AppConfig::from_lookup(lookup(&[(COLLECTION_TIMEOUT_MS_VAR, "soon")]));
        assert_eq!(config.collection_timeout, None);
    }

    #[test]
    fn backends_follow_configuration() {
        let config = AppConfig::default();
        assert!(matches!(config.embedder(), EmbedderBackend::Ngram(_)));

        let remote = AppConfig {
            chroma_url: Some("http://localhost:8000".to_string()),
            ..AppConfig::default()
        };
        assert!(matches!(remote.store(), Ok(StoreBackend::Chroma(_))));

        let broken = AppConfig {
            chroma_url: Some("::not a url::".to_string()),
            ..AppConfig::default()
        };
        assert!(broken.store().is_err());
    }
}
