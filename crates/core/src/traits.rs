use crate::error::{EmbeddingError, GenerationError, IndexError};
use crate::models::ScoredChunk;
use async_trait::async_trait;

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embeds every text; the output keeps input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self.embed_batch(&[text.to_string()]).await?;
        let received = vectors.len();
        if received != 1 {
            return Err(EmbeddingError::CountMismatch {
                expected: 1,
                received,
            });
        }
        vectors
            .into_iter()
            .next()
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                received,
            })
    }
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> usize;

    /// At most `k` hits, best first.
    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError>;
}
