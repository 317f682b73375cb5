pub mod gemini;

pub use gemini::{GeminiEmbedder, GeminiGenerator};

use crate::config::{EmbeddingConfig, EmbeddingProvider, GenerationConfig};
use crate::embeddings::CharacterNgramEmbedder;
use crate::error::ConfigError;
use crate::traits::{AnswerGenerator, Embedder};
use std::sync::Arc;

pub fn build_embedder(
    config: &EmbeddingConfig,
    api_key: Option<&str>,
) -> Result<Arc<dyn Embedder>, ConfigError> {
    match config.provider {
        EmbeddingProvider::Gemini => {
            let api_key = api_key.ok_or_else(|| {
                ConfigError::MissingCredential("GEMINI_API_KEY for gemini embeddings".to_string())
            })?;
            Ok(Arc::new(GeminiEmbedder::new(config, api_key)?))
        }
        EmbeddingProvider::Ngram => Ok(Arc::new(CharacterNgramEmbedder {
            dimensions: config.dimensions,
        })),
    }
}

pub fn build_generator(
    config: &GenerationConfig,
    api_key: Option<&str>,
) -> Result<Arc<dyn AnswerGenerator>, ConfigError> {
    let api_key = api_key.ok_or_else(|| {
        ConfigError::MissingCredential("GEMINI_API_KEY for answer generation".to_string())
    })?;
    Ok(Arc::new(GeminiGenerator::new(config, api_key)?))
}
