use crate::embeddings::cosine_similarity;
use crate::error::IndexError;
use crate::models::{Chunk, ScoredChunk};
use crate::traits::VectorIndex;

#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Brute-force cosine index. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    entries: Vec<VectorEntry>,
    dimensions: usize,
}

impl FlatIndex {
    pub fn build(entries: Vec<VectorEntry>) -> Result<Self, IndexError> {
        let dimensions = entries
            .first()
            .map(|entry| entry.embedding.len())
            .ok_or(IndexError::Empty)?;

        if dimensions == 0 {
            return Err(IndexError::DimensionMismatch {
                expected: 1,
                found: 0,
            });
        }

        if let Some(entry) = entries
            .iter()
            .find(|entry| entry.embedding.len() != dimensions)
        {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                found: entry.embedding.len(),
            });
        }

        Ok(Self {
            entries,
            dimensions,
        })
    }

    pub fn entries(&self) -> &[VectorEntry] {
        &self.entries
    }
}

/// Cosine similarity with NaN ranked below every real score.
fn score(query_vector: &[f32], embedding: &[f32]) -> f32 {
    let similarity = cosine_similarity(query_vector, embedding);
    if similarity.is_nan() {
        f32::NEG_INFINITY
    } else {
        similarity
    }
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, IndexError> {
        if query_vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                found: query_vector.len(),
            });
        }

        let mut scored = self
            .entries
            .iter()
            .map(|entry| (score(query_vector, &entry.embedding), entry))
            .collect::<Vec<_>>();

        scored.sort_by(|(left_score, left), (right_score, right)| {
            right_score
                .total_cmp(left_score)
                .then_with(|| left.chunk.id.cmp(&right.chunk.id))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| ScoredChunk {
                chunk: entry.chunk.clone(),
                score,
            })
            .collect())
    }
}
