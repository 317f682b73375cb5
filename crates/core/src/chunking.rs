use crate::config::ChunkingConfig;
use crate::error::ChunkingError;
use crate::models::{Chunk, ChunkMetadata, Document};
use regex::Regex;
use sha2::{Digest, Sha256};

/// Char range `[start, end)` of one chunk inside the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

/// Splits text into overlapping windows of at most `chunk_size` chars.
///
/// A window ends on the last paragraph break that fits, else the last
/// sentence end, else the last whitespace, else it is cut hard at
/// `chunk_size`. The next window always starts `chunk_overlap` chars before
/// the previous end, so dropping the first `chunk_overlap` chars of every
/// chunk after the first and concatenating yields the input again.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkingConfig,
    boundaries: [Regex; 3],
}

impl TextChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkingError> {
        config
            .validate()
            .map_err(|error| ChunkingError::InvalidChunkConfig(error.to_string()))?;

        Ok(Self {
            config,
            boundaries: [
                Regex::new(r"\n[ \t\r]*\n\s*")?,
                Regex::new(r#"[.!?]["')\]]*\s+|\n"#)?,
                Regex::new(r"\s+")?,
            ],
        })
    }

    pub fn spans(&self, text: &str) -> Vec<ChunkSpan> {
        let offsets = char_offsets(text);
        let total = offsets.len() - 1;
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;

        let mut spans = Vec::new();
        if total == 0 {
            return spans;
        }

        let mut start = 0;
        loop {
            if total - start <= size {
                spans.push(ChunkSpan { start, end: total });
                break;
            }

            let end = self
                .find_break(text, &offsets, start)
                .unwrap_or(start + size);
            spans.push(ChunkSpan { start, end });
            start = end - overlap;
        }

        spans
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let offsets = char_offsets(text);
        self.spans(text)
            .into_iter()
            .map(|span| text[offsets[span.start]..offsets[span.end]].to_string())
            .collect()
    }

    pub fn split_document(&self, document: &Document) -> Vec<Chunk> {
        let offsets = char_offsets(&document.raw_text);

        self.spans(&document.raw_text)
            .into_iter()
            .enumerate()
            .map(|(chunk_index, span)| {
                let text = document.raw_text[offsets[span.start]..offsets[span.end]].to_string();
                Chunk {
                    id: make_chunk_id(&document.id, chunk_index, &text),
                    document_id: document.id.clone(),
                    text,
                    chunk_index,
                    start_char: span.start,
                    end_char: span.end,
                    metadata: ChunkMetadata {
                        document: document.metadata.clone(),
                        chunk_index,
                    },
                }
            })
            .collect()
    }

    /// Latest boundary in `(start + overlap, start + chunk_size]`, by priority.
    fn find_break(&self, text: &str, offsets: &[usize], start: usize) -> Option<usize> {
        let window_start = offsets[start];
        let window_end = offsets[start + self.config.chunk_size];
        let window = &text[window_start..window_end];
        let min_end = start + self.config.chunk_overlap;

        self.boundaries.iter().find_map(|boundary| {
            boundary
                .find_iter(window)
                .filter_map(|found| char_index(offsets, window_start + found.end()))
                .filter(|end| *end > min_end)
                .last()
        })
    }
}

/// Byte offset of every char, plus the text length as a final sentinel.
fn char_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect()
}

fn char_index(offsets: &[usize], byte_offset: usize) -> Option<usize> {
    offsets.binary_search(&byte_offset).ok()
}

fn make_chunk_id(document_id: &str, index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentMetadata, SourceType};

    fn chunker(chunk_size: usize, chunk_overlap: usize) -> TextChunker {
        TextChunker::new(ChunkingConfig {
            chunk_size,
            chunk_overlap,
        })
        .expect("valid chunking config")
    }

    fn reassemble(chunks: &[String], overlap: usize) -> String {
        let mut text = String::new();
        for (index, chunk) in chunks.iter().enumerate() {
            if index == 0 {
                text.push_str(chunk);
            } else {
                text.extend(chunk.chars().skip(overlap));
            }
        }
        text
    }

    fn document(text: &str) -> Document {
        Document {
            id: "doc-1".to_string(),
            raw_text: text.to_string(),
            metadata: DocumentMetadata {
                filename: "manual.pdf".to_string(),
                source_type: SourceType::Pdf,
                uploaded_at: chrono::Utc::now(),
                extraction_failed: false,
            },
        }
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        let result = TextChunker::new(ChunkingConfig {
            chunk_size: 10,
            chunk_overlap: 10,
        });
        assert!(matches!(result, Err(ChunkingError::InvalidChunkConfig(_))));
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(chunker(10, 2).split_text("").is_empty());
    }

    #[test]
    fn short_text_is_a_single_chunk() {
        assert_eq!(chunker(1000, 200).split_text("Short note."), vec!["Short note."]);
    }

    #[test]
    fn hard_cut_chunk_count_follows_the_stride_formula() {
        for (length, size, overlap) in [(2_500, 1_000, 200), (1_001, 1_000, 200), (97, 10, 3), (50, 7, 0)] {
            let text = "x".repeat(length);
            let chunks = chunker(size, overlap).split_text(&text);
            let expected = (length - overlap).div_ceil(size - overlap);

            assert_eq!(chunks.len(), expected, "L={length} C={size} O={overlap}");
            assert!(chunks.iter().all(|chunk| chunk.chars().count() <= size));
            assert_eq!(reassemble(&chunks, overlap), text);
        }
    }

    #[test]
    fn prefers_paragraph_breaks_over_sentences() {
        let text = "First paragraph talks. About pumps.\n\nSecond paragraph is about valves and seals.";
        let chunks = chunker(50, 5).split_text(text);

        assert!(chunks[0].ends_with("\n\n"));
        assert!(chunks[0].starts_with("First paragraph"));
        assert_eq!(reassemble(&chunks, 5), text);
    }

    #[test]
    fn falls_back_to_sentence_then_word_boundaries() {
        let sentences = "One two three. Four five six seven eight nine ten eleven";
        let chunks = chunker(30, 4).split_text(sentences);
        assert_eq!(chunks[0], "One two three. ");

        let words = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = chunker(20, 3).split_text(words);
        assert_eq!(chunks[0], "alpha beta gamma ");
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 20));
        assert_eq!(reassemble(&chunks, 3), words);
    }

    #[test]
    fn boundaries_inside_the_overlap_are_ignored() {
        // The only space sits within the first `overlap` chars, so the cut is hard.
        let text = format!("ab {}", "c".repeat(40));
        let chunks = chunker(10, 5).split_text(&text);
        assert_eq!(chunks[0].chars().count(), 10);
        assert_eq!(reassemble(&chunks, 5), text);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "Größe und Maße ändern sich über Jahre, café ☕ ".repeat(20);
        let chunks = chunker(64, 16).split_text(&text);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 64 && !chunk.is_empty()));
        assert_eq!(reassemble(&chunks, 16), text);
    }

    #[test]
    fn consecutive_chunks_share_exactly_the_overlap() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(30);
        let overlap = 12;
        let chunks = chunker(100, overlap).split_text(&text);

        for pair in chunks.windows(2) {
            let tail: String = pair[0]
                .chars()
                .skip(pair[0].chars().count() - overlap)
                .collect();
            let head: String = pair[1].chars().take(overlap).collect();
            assert_eq!(tail, head);
        }
    }

    #[test]
    fn document_chunks_inherit_metadata_and_positions() {
        let doc = document(&"Hydraulic pressure must stay below 200 bar. ".repeat(10));
        let chunks = chunker(120, 20).split_document(&doc);

        assert!(chunks.len() > 1);
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, position);
            assert_eq!(chunk.metadata.chunk_index, position);
            assert_eq!(chunk.metadata.document, doc.metadata);
            assert_eq!(chunk.document_id, "doc-1");
            assert_eq!(chunk.end_char - chunk.start_char, chunk.text.chars().count());
        }
        assert_eq!(chunks.last().map(|chunk| chunk.end_char), Some(doc.raw_text.chars().count()));

        let again = chunker(120, 20).split_document(&doc);
        assert_eq!(chunks[0].id, again[0].id);
        assert_ne!(chunks[0].id, chunks[1].id);
    }
}
