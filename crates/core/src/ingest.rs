use crate::config::UploadPolicy;
use crate::error::{ErrorKind, IngestError, UploadError};
use crate::extractor::{ExtractionChain, ExtractionOutcome};
use crate::models::{DegradedFile, Document, DocumentMetadata, SkippedFile, SourceType, UploadedFile};
use chrono::Utc;
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
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

/// Size and type checks a caller runs before handing a file to ingestion.
pub fn validate_upload(file: &UploadedFile, policy: &UploadPolicy) -> Result<(), UploadError> {
    if !policy.accepts(&file.mime_type) {
        return Err(UploadError::UnsupportedFileType {
            file: file.original_name.clone(),
            mime_type: file.mime_type.clone(),
        });
    }

    let size = std::fs::metadata(&file.path)?.len();
    if size > policy.max_file_bytes {
        return Err(UploadError::FileTooLarge {
            file: file.original_name.clone(),
            size,
            limit: policy.max_file_bytes,
        });
    }

    Ok(())
}

/// Documents extracted from one batch, in upload order.
#[derive(Debug, Default)]
pub struct ExtractedBatch {
    pub documents: Vec<Document>,
    pub degraded: Vec<DegradedFile>,
    pub skipped: Vec<SkippedFile>,
}

/// Extracts every accepted file on the blocking pool, all files at once.
///
/// Unreadable or unparseable files become placeholder documents flagged
/// `extraction_failed`. Files of an unaccepted type are skipped; a batch with
/// nothing accepted is rejected.
pub async fn extract_documents(
    files: &[UploadedFile],
    chain: Arc<ExtractionChain>,
    policy: &UploadPolicy,
    generation: u64,
) -> Result<ExtractedBatch, IngestError> {
    if files.is_empty() {
        return Err(IngestError::NoFilesProvided);
    }

    let mut batch = ExtractedBatch::default();
    let mut accepted = Vec::new();
    for file in files {
        if policy.accepts(&file.mime_type) {
            accepted.push(file.clone());
        } else {
            warn!(file = %file.original_name, mime_type = %file.mime_type, "skipping unsupported file");
            batch.skipped.push(SkippedFile {
                filename: file.original_name.clone(),
                reason: format!("unsupported file type {}", file.mime_type),
            });
        }
    }

    if accepted.is_empty() {
        return Err(IngestError::UnsupportedFileType {
            rejected: batch.skipped.into_iter().map(|skipped| skipped.filename).collect(),
        });
    }

    let handles = accepted.into_iter().map(|file| {
        let chain = Arc::clone(&chain);
        tokio::task::spawn_blocking(move || {
            let outcome = chain.extract_file(&file);
            (file, outcome)
        })
    });

    let extracted = try_join_all(handles)
        .await
        .map_err(|error| IngestError::Worker(error.to_string()))?;

    for (position, (file, outcome)) in extracted.into_iter().enumerate() {
        let extraction_failed = outcome.is_degraded();
        if let ExtractionOutcome::Degraded { failures, .. } = &outcome {
            batch.degraded.push(DegradedFile {
                filename: file.original_name.clone(),
                kind: ErrorKind::ExtractionDegraded,
                reasons: failures.iter().map(ToString::to_string).collect(),
            });
        } else {
            info!(file = %file.original_name, "processed pdf");
        }

        batch.documents.push(Document {
            id: generate_document_id(generation, position, &file.original_name),
            raw_text: outcome.into_text(),
            metadata: DocumentMetadata {
                filename: file.original_name,
                source_type: SourceType::Pdf,
                uploaded_at: Utc::now(),
                extraction_failed,
            },
        });
    }

    Ok(batch)
}

fn generate_document_id(generation: u64, position: usize, filename: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(generation.to_le_bytes());
    hasher.update((position as u64).to_le_bytes());
    hasher.update(filename.as_bytes());
    format!("{:x}", hasher.finalize())
}
