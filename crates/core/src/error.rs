use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Stable, caller-facing error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NoFilesProvided,
    UnsupportedFileType,
    FileTooLarge,
    ExtractionDegraded,
    EmptyChunkSet,
    EmbeddingServiceError,
    GenerationError,
    NoCorpusLoaded,
    EmptyQuery,
    InvalidConfig,
    Internal,
}

/// Pipeline stage an ingestion failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Validate,
    Extract,
    Chunk,
    Embed,
    Index,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Validate => "validate",
            Self::Extract => "extract",
            Self::Chunk => "chunk",
            Self::Embed => "embed",
            Self::Index => "index",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),
}

/// Failure of a single extraction strategy. The chain absorbs these.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("pdf had no readable text")]
    NoText,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),
}

#[derive(Debug, Error)]
pub enum ChunkingError {
    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("embedding count {received} doesn't match input count {expected}")]
    CountMismatch { expected: usize, received: usize },
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("cannot build an index without entries")]
    Empty,

    #[error("embedding dimension {found} != {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("generation response had no text: {0}")]
    EmptyResponse(String),

    #[error("generation request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no files provided")]
    NoFilesProvided,

    #[error("no supported files in batch (rejected: {})", .rejected.join(", "))]
    UnsupportedFileType { rejected: Vec<String> },

    #[error("documents produced no chunks")]
    EmptyChunkSet,

    #[error("embedding service error: {0}")]
    EmbeddingService(#[from] EmbeddingError),

    #[error("index build failed: {0}")]
    Index(#[from] IndexError),

    #[error("extraction worker failed: {0}")]
    Worker(String),
}

impl IngestError {
    pub fn stage(&self) -> IngestStage {
        match self {
            Self::NoFilesProvided | Self::UnsupportedFileType { .. } => IngestStage::Validate,
            Self::Worker(_) => IngestStage::Extract,
            Self::EmptyChunkSet => IngestStage::Chunk,
            Self::EmbeddingService(_) => IngestStage::Embed,
            Self::Index(_) => IngestStage::Index,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoFilesProvided => ErrorKind::NoFilesProvided,
            Self::UnsupportedFileType { .. } => ErrorKind::UnsupportedFileType,
            Self::EmptyChunkSet => ErrorKind::EmptyChunkSet,
            Self::EmbeddingService(_) => ErrorKind::EmbeddingServiceError,
            Self::Index(_) | Self::Worker(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query is empty")]
    EmptyQuery,

    #[error("no documents have been uploaded yet; upload documents first")]
    NoCorpusLoaded,

    #[error("embedding service error: {0}")]
    EmbeddingService(#[from] EmbeddingError),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("index query failed: {0}")]
    Index(#[from] IndexError),
}

impl QueryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyQuery => ErrorKind::EmptyQuery,
            Self::NoCorpusLoaded => ErrorKind::NoCorpusLoaded,
            Self::EmbeddingService(_) => ErrorKind::EmbeddingServiceError,
            Self::Generation(_) => ErrorKind::GenerationError,
            Self::Index(_) => ErrorKind::Internal,
        }
    }
}

/// Rejection of a single upload by [`crate::validate_upload`].
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("unsupported file type {mime_type} for {file}")]
    UnsupportedFileType { file: String, mime_type: String },

    #[error("{file} is {size} bytes, limit is {limit}")]
    FileTooLarge { file: String, size: u64, limit: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFileType { .. } => ErrorKind::UnsupportedFileType,
            Self::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            Self::Io(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_errors_report_their_stage() {
        assert_eq!(IngestError::NoFilesProvided.stage(), IngestStage::Validate);
        assert_eq!(IngestError::EmptyChunkSet.stage(), IngestStage::Chunk);
        let embed = IngestError::from(EmbeddingError::Timeout(Duration::from_secs(3)));
        assert_eq!(embed.stage(), IngestStage::Embed);
        assert_eq!(embed.kind(), ErrorKind::EmbeddingServiceError);
        assert_eq!(IngestStage::Embed.to_string(), "embed");
    }

    #[test]
    fn query_before_ingest_has_a_distinct_kind() {
        assert_eq!(QueryError::NoCorpusLoaded.kind(), ErrorKind::NoCorpusLoaded);
        assert_ne!(QueryError::EmptyQuery.kind(), QueryError::NoCorpusLoaded.kind());
    }

    #[test]
    fn unsupported_batch_lists_rejected_files() {
        let error = IngestError::UnsupportedFileType {
            rejected: vec!["notes.txt".to_string(), "photo.png".to_string()],
        };
        assert!(error.to_string().contains("notes.txt, photo.png"));
    }
}
