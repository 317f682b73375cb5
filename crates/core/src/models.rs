use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";

/// MIME type guessed from the file extension alone.
pub fn mime_type_for_path(path: &Path) -> &'static str {
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        MIME_PDF
    } else {
        MIME_OCTET_STREAM
    }
}

/// A file handed to the core by its caller. The caller owns the file on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub original_name: String,
    pub mime_type: String,
}

impl UploadedFile {
    /// Upload whose MIME type follows its extension.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mime_type = mime_type_for_path(&path);
        Self::with_mime_type(path, mime_type)
    }

    /// Upload declared as a PDF whatever its extension.
    pub fn pdf(path: impl Into<PathBuf>) -> Self {
        Self::with_mime_type(path.into(), MIME_PDF)
    }

    fn with_mime_type(path: PathBuf, mime_type: &str) -> Self {
        let original_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Self {
            path,
            original_name,
            mime_type: mime_type.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Pdf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub filename: String,
    pub source_type: SourceType,
    pub uploaded_at: DateTime<Utc>,
    pub extraction_failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub raw_text: String,
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMetadata {
    #[serde(flatten)]
    pub document: DocumentMetadata,
    pub chunk_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub chunk_index: usize,
    /// Char offsets of this chunk inside the parent document's raw text.
    pub start_char: usize,
    pub end_char: usize,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// A file that ingestion degraded to placeholder text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedFile {
    pub filename: String,
    /// Always [`ErrorKind::ExtractionDegraded`].
    pub kind: ErrorKind,
    pub reasons: Vec<String>,
}

/// A file that ingestion left out of the batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedFile {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub document_count: usize,
    pub chunk_count: usize,
    pub generation: u64,
    pub degraded: Vec<DegradedFile>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnippet {
    pub snippet: String,
    pub metadata: ChunkMetadata,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryAnswer {
    pub answer_text: String,
    pub sources: Vec<SourceSnippet>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorpusStatus {
    pub has_documents: bool,
    pub document_count: usize,
    pub chunk_count: usize,
    pub generation: u64,
    pub last_update_timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ClearAck {
    pub success: bool,
}
