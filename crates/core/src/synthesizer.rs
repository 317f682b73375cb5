//! Grounded prompt assembly and answer synthesis.
//!
//! The model is told to answer from the supplied context only and to reply
//! with [`NO_INFORMATION_ANSWER`] when the context does not hold the answer.
//! Nothing here inspects or filters the model's reply afterwards.

use crate::error::GenerationError;
use crate::models::{QueryAnswer, ScoredChunk, SourceSnippet};
use crate::traits::AnswerGenerator;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

pub const NO_INFORMATION_ANSWER: &str =
    "I don't have information about that in the uploaded documents.";

pub const SNIPPET_CHARS: usize = 200;

const CHUNK_DELIMITER: &str = "---";

pub fn build_prompt(question: &str, retrieved: &[ScoredChunk]) -> String {
    let mut prompt = String::new();
    prompt.push_str("Answer the question based on the provided context only.\n");
    prompt.push_str("Please provide the most accurate response based on the question.\n");
    let _ = writeln!(
        prompt,
        "If the answer is not in the context, reply with exactly this sentence and nothing else: \"{NO_INFORMATION_ANSWER}\""
    );
    prompt.push_str("Do not use any knowledge that is not in the context.\n\n");
    prompt.push_str("Context:\n");
    prompt.push_str(&build_context(retrieved));
    let _ = write!(prompt, "\nQuestion: {}\n\nAnswer:", question.trim());
    prompt
}

/// Retrieved chunks in retrieval order, each in its own delimited block.
pub fn build_context(retrieved: &[ScoredChunk]) -> String {
    let mut context = String::new();
    for (position, hit) in retrieved.iter().enumerate() {
        let _ = writeln!(
            context,
            "[Source {}: {}]",
            position + 1,
            hit.chunk.metadata.document.filename
        );
        context.push_str(hit.chunk.text.trim());
        context.push('\n');
        context.push_str(CHUNK_DELIMITER);
        context.push('\n');
    }
    context
}

pub fn snippet(text: &str) -> String {
    let mut snippet = text.chars().take(SNIPPET_CHARS).collect::<String>();
    snippet.push_str("...");
    snippet
}

pub fn sources(retrieved: &[ScoredChunk]) -> Vec<SourceSnippet> {
    retrieved
        .iter()
        .map(|hit| SourceSnippet {
            snippet: snippet(&hit.chunk.text),
            metadata: hit.chunk.metadata.clone(),
            score: hit.score,
        })
        .collect()
}

#[derive(Clone)]
pub struct AnswerSynthesizer {
    generator: Arc<dyn AnswerGenerator>,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn AnswerGenerator>) -> Self {
        Self { generator }
    }

    pub async fn answer(
        &self,
        question: &str,
        retrieved: &[ScoredChunk],
    ) -> Result<QueryAnswer, GenerationError> {
        let prompt = build_prompt(question, retrieved);
        debug!(
            model = self.generator.model_name(),
            context_chunks = retrieved.len(),
            prompt_chars = prompt.len(),
            "generating answer"
        );

        let answer_text = self.generator.generate(&prompt).await?;

        Ok(QueryAnswer {
            answer_text,
            sources: sources(retrieved),
        })
    }
}
