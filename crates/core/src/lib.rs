pub mod chunking;
pub mod config;
pub mod corpus;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod models;
pub mod providers;
pub mod synthesizer;
pub mod traits;

pub use chunking::{ChunkSpan, TextChunker};
pub use config::{
    ChunkingConfig, CorpusConfig, EmbeddingConfig, EmbeddingProvider, ExtractionConfig,
    GenerationConfig, RagConfig, ReingestPolicy, RetrievalConfig, UploadPolicy,
};
pub use corpus::{CorpusManager, CorpusState};
pub use embeddings::{cosine_similarity, CharacterNgramEmbedder};
pub use error::{
    ChunkingError, ConfigError, EmbeddingError, ErrorKind, ExtractionError, GenerationError,
    IndexError, IngestError, IngestStage, QueryError, UploadError,
};
pub use extractor::{
    placeholder_text, ExtractionChain, ExtractionOutcome, ExtractionStrategy, LopdfStrategy,
    PdfExtractStrategy, RemoteOcrStrategy, StrategyFailure,
};
pub use index::{FlatIndex, VectorEntry};
pub use ingest::{discover_pdf_files, validate_upload};
pub use models::{
    Chunk, ChunkMetadata, ClearAck, CorpusStatus, DegradedFile, Document, DocumentMetadata,
    IngestSummary, QueryAnswer, ScoredChunk, SkippedFile, SourceSnippet, SourceType,
    UploadedFile, mime_type_for_path, MIME_OCTET_STREAM, MIME_PDF,
};
pub use providers::{build_embedder, build_generator, GeminiEmbedder, GeminiGenerator};
pub use synthesizer::{AnswerSynthesizer, NO_INFORMATION_ANSWER};
pub use traits::{AnswerGenerator, Embedder, VectorIndex};
