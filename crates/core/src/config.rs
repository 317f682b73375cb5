use crate::error::ConfigError;
use crate::models::MIME_PDF;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/";
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TOP_K: usize = 4;
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Top-level configuration. Every field may be omitted from the TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RagConfig {
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub upload: UploadPolicy,
    pub corpus: CorpusConfig,
    pub extraction: ExtractionConfig,
}

impl RagConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate()?;
        if self.retrieval.top_k == 0 {
            return Err(ConfigError::Invalid("retrieval.top_k must be > 0".to_string()));
        }
        if self.embedding.dimensions == 0 {
            return Err(ConfigError::Invalid(
                "embedding.dimensions must be > 0".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding.batch_size must be > 0".to_string(),
            ));
        }
        Url::parse(&self.embedding.base_url)?;
        Url::parse(&self.generation.base_url)?;
        if let Some(endpoint) = &self.extraction.ocr_endpoint {
            Url::parse(endpoint)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Gemini,
    /// Offline hashed character trigrams.
    Ngram,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub base_url: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    /// Expected vector length; also the ngram embedder's bucket count.
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::Gemini,
            model: "embedding-001".to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            batch_size: 100,
            max_retries: 2,
            dimensions: 768,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-pro-latest".to_string(),
            base_url: GEMINI_BASE_URL.to_string(),
            temperature: 0.7,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunking.chunk_size must be > 0".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunking.chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadPolicy {
    pub max_file_bytes: u64,
    pub accepted_mime_types: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
            accepted_mime_types: vec![MIME_PDF.to_string()],
        }
    }
}

impl UploadPolicy {
    pub fn accepts(&self, mime_type: &str) -> bool {
        self.accepted_mime_types
            .iter()
            .any(|accepted| accepted.eq_ignore_ascii_case(mime_type))
    }
}

/// What a successful ingestion does with the corpus already loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReingestPolicy {
    #[default]
    Replace,
    Accumulate,
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorpusConfig {
    pub reingest: ReingestPolicy,
    /// Upper bound for embedding a whole ingestion batch.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ingest_embedding_timeout: Duration,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            reingest: ReingestPolicy::Replace,
            ingest_embedding_timeout: Duration::from_secs(300),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractionConfig {
    pub ocr_endpoint: Option<String>,
    /// Never read from the file; set by the caller from the environment.
    #[serde(skip)]
    pub ocr_api_key: Option<String>,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub ocr_timeout: Duration,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            ocr_endpoint: None,
            ocr_api_key: None,
            ocr_timeout: Duration::from_secs(120),
        }
    }
}
