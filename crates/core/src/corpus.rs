//! Process-scoped corpus state and the four caller-facing operations.
//!
//! Each successful ingestion builds a complete [`CorpusState`] off to the
//! side and publishes it with one pointer swap. Readers clone the current
//! `Arc` and never see a half-built generation. Writers (`ingest`, `clear`)
//! are serialized by a separate mutex so the read lock is only ever held for
//! the swap itself.

use crate::chunking::TextChunker;
use crate::config::{RagConfig, ReingestPolicy, UploadPolicy};
use crate::error::{ConfigError, EmbeddingError, GenerationError, IngestError, QueryError};
use crate::extractor::ExtractionChain;
use crate::index::{FlatIndex, VectorEntry};
use crate::ingest::extract_documents;
use crate::models::{
    Chunk, ClearAck, CorpusStatus, Document, IngestSummary, QueryAnswer, SkippedFile, UploadedFile,
};
use crate::providers::{build_embedder, build_generator};
use crate::synthesizer::AnswerSynthesizer;
use crate::traits::{AnswerGenerator, Embedder, VectorIndex};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// One immutable generation of the corpus.
#[derive(Debug, Clone)]
pub struct CorpusState {
    generation: u64,
    documents: Vec<Document>,
    chunks: Vec<Chunk>,
    index: Option<FlatIndex>,
    built_at: Option<DateTime<Utc>>,
}

impl CorpusState {
    pub fn empty(generation: u64) -> Self {
        Self {
            generation,
            documents: Vec::new(),
            chunks: Vec::new(),
            index: None,
            built_at: None,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn index(&self) -> Option<&FlatIndex> {
        self.index.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.index.is_some()
    }

    pub fn status(&self) -> CorpusStatus {
        CorpusStatus {
            has_documents: self.is_ready(),
            document_count: self.documents.len(),
            chunk_count: self.chunks.len(),
            generation: self.generation,
            last_update_timestamp: self.built_at.map(|at| at.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone)]
struct Settings {
    top_k: usize,
    reingest: ReingestPolicy,
    upload: UploadPolicy,
    query_embedding_timeout: Duration,
    ingest_embedding_timeout: Duration,
    generation_timeout: Duration,
}

struct Inner {
    current: RwLock<Arc<CorpusState>>,
    writer: Mutex<()>,
    chain: Arc<ExtractionChain>,
    chunker: TextChunker,
    embedder: Arc<dyn Embedder>,
    synthesizer: AnswerSynthesizer,
    settings: Settings,
}

/// Cheap to clone; every clone shares the same corpus.
#[derive(Clone)]
pub struct CorpusManager {
    inner: Arc<Inner>,
}

impl CorpusManager {
    pub fn new(
        config: &RagConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Result<Self, ConfigError> {
        Self::with_extraction_chain(
            config,
            ExtractionChain::from_config(&config.extraction),
            embedder,
            generator,
        )
    }

    /// Builds the Gemini (or offline ngram) providers named in `config`.
    pub fn from_config(config: &RagConfig, api_key: Option<&str>) -> Result<Self, ConfigError> {
        let embedder = build_embedder(&config.embedding, api_key)?;
        let generator = build_generator(&config.generation, api_key)?;
        Self::new(config, embedder, generator)
    }

    pub fn with_extraction_chain(
        config: &RagConfig,
        chain: ExtractionChain,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let chunker = TextChunker::new(config.chunking)
            .map_err(|error| ConfigError::Invalid(error.to_string()))?;

        info!(
            embedding_model = embedder.model_name(),
            generation_model = generator.model_name(),
            strategies = ?chain.strategy_names(),
            chunk_size = config.chunking.chunk_size,
            chunk_overlap = config.chunking.chunk_overlap,
            top_k = config.retrieval.top_k,
            "corpus manager ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                current: RwLock::new(Arc::new(CorpusState::empty(0))),
                writer: Mutex::new(()),
                chain: Arc::new(chain),
                chunker,
                embedder,
                synthesizer: AnswerSynthesizer::new(generator),
                settings: Settings {
                    top_k: config.retrieval.top_k,
                    reingest: config.corpus.reingest,
                    upload: config.upload.clone(),
                    query_embedding_timeout: config.embedding.timeout,
                    ingest_embedding_timeout: config.corpus.ingest_embedding_timeout,
                    generation_timeout: config.generation.timeout,
                },
            }),
        })
    }

    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.inner.settings.upload
    }

    /// The generation readers currently see.
    pub async fn snapshot(&self) -> Arc<CorpusState> {
        Arc::clone(&*self.inner.current.read().await)
    }

    pub async fn ingest(&self, files: &[UploadedFile]) -> Result<IngestSummary, IngestError> {
        let _writer = self.inner.writer.lock().await;
        let previous = self.snapshot().await;
        let generation = previous.generation + 1;
        let started = Instant::now();

        info!(files = files.len(), generation, "ingesting batch");
        let (state, summary) = match self.build_generation(files, &previous, generation).await {
            Ok(built) => built,
            Err(error) => {
                warn!(stage = %error.stage(), %error, "ingestion failed; corpus left unchanged");
                return Err(error);
            }
        };

        *self.inner.current.write().await = Arc::new(state);

        info!(
            generation,
            document_count = summary.document_count,
            chunk_count = summary.chunk_count,
            degraded = summary.degraded.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "published corpus generation"
        );
        Ok(summary)
    }

    async fn build_generation(
        &self,
        files: &[UploadedFile],
        previous: &CorpusState,
        generation: u64,
    ) -> Result<(CorpusState, IngestSummary), IngestError> {
        let settings = &self.inner.settings;
        let batch = extract_documents(
            files,
            Arc::clone(&self.inner.chain),
            &settings.upload,
            generation,
        )
        .await?;

        let mut skipped = batch.skipped;
        let mut documents = Vec::with_capacity(batch.documents.len());
        let mut chunks = Vec::new();
        for document in batch.documents {
            let document_chunks = self.inner.chunker.split_document(&document);
            if document_chunks.is_empty() {
                warn!(file = %document.metadata.filename, "document produced no chunks");
                skipped.push(SkippedFile {
                    filename: document.metadata.filename.clone(),
                    reason: "document produced no chunks".to_string(),
                });
                continue;
            }
            debug!(file = %document.metadata.filename, chunks = document_chunks.len(), "chunked document");
            chunks.extend(document_chunks);
            documents.push(document);
        }

        if chunks.is_empty() {
            return Err(IngestError::EmptyChunkSet);
        }

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let limit = settings.ingest_embedding_timeout;
        let embeddings = timeout(limit, self.inner.embedder.embed_batch(&texts))
            .await
            .map_err(|_| EmbeddingError::Timeout(limit))??;

        if embeddings.len() != chunks.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: chunks.len(),
                received: embeddings.len(),
            }
            .into());
        }

        let summary = IngestSummary {
            document_count: documents.len(),
            chunk_count: chunks.len(),
            generation,
            degraded: batch.degraded,
            skipped,
        };

        let mut entries = chunks
            .iter()
            .cloned()
            .zip(embeddings)
            .map(|(chunk, embedding)| VectorEntry { chunk, embedding })
            .collect::<Vec<_>>();

        if settings.reingest == ReingestPolicy::Accumulate {
            if let Some(index) = previous.index() {
                let mut merged = index.entries().to_vec();
                merged.append(&mut entries);
                entries = merged;

                let mut all_documents = previous.documents.clone();
                all_documents.append(&mut documents);
                documents = all_documents;

                let mut all_chunks = previous.chunks.clone();
                all_chunks.append(&mut chunks);
                chunks = all_chunks;
            }
        }

        let index = FlatIndex::build(entries)?;
        let state = CorpusState {
            generation,
            documents,
            chunks,
            index: Some(index),
            built_at: Some(Utc::now()),
        };

        Ok((state, summary))
    }

    pub async fn query(&self, text: &str) -> Result<QueryAnswer, QueryError> {
        let state = self.snapshot().await;
        let index = state.index().ok_or(QueryError::NoCorpusLoaded)?;

        let question = text.trim();
        if question.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let settings = &self.inner.settings;
        let embed_limit = settings.query_embedding_timeout;
        let query_vector = timeout(embed_limit, self.inner.embedder.embed(question))
            .await
            .map_err(|_| EmbeddingError::Timeout(embed_limit))??;

        let hits = index.search(&query_vector, settings.top_k)?;
        debug!(
            generation = state.generation,
            hits = hits.len(),
            top_score = hits.first().map(|hit| hit.score),
            "retrieved context"
        );

        let generation_limit = settings.generation_timeout;
        let answer = timeout(
            generation_limit,
            self.inner.synthesizer.answer(question, &hits),
        )
        .await
        .map_err(|_| GenerationError::Timeout(generation_limit))?
        .map_err(|error| {
            warn!(%error, "answer generation failed");
            error
        })?;

        Ok(answer)
    }

    pub async fn status(&self) -> CorpusStatus {
        self.snapshot().await.status()
    }

    pub async fn clear(&self) -> ClearAck {
        let _writer = self.inner.writer.lock().await;
        let mut current = self.inner.current.write().await;
        let generation = current.generation + 1;
        *current = Arc::new(CorpusState::empty(generation));
        info!(generation, "cleared corpus");
        ClearAck { success: true }
    }
}
