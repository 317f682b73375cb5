use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use pdf_rag_core::{
    CharacterNgramEmbedder, CorpusManager, ErrorKind, ExtractionChain, ExtractionError,
    ExtractionStrategy, GenerationError, RagConfig, ReingestPolicy, UploadedFile, AnswerGenerator,
    LopdfStrategy, PdfExtractStrategy, NO_INFORMATION_ANSWER,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Answers with the context sentence sharing the most words with the
/// question, or the fixed refusal when nothing overlaps.
struct ExtractiveGenerator;

const STOP_WORDS: &[&str] = &["what", "which", "does", "about", "with", "from", "there"];

fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|word| word.chars().count() > 3 && !STOP_WORDS.contains(&word.as_str()))
        .collect()
}

#[async_trait]
impl AnswerGenerator for ExtractiveGenerator {
    fn model_name(&self) -> &str {
        "extractive"
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let context = prompt
            .split_once("Context:\n")
            .and_then(|(_, rest)| rest.rsplit_once("\nQuestion: "))
            .map(|(context, _)| context)
            .unwrap_or_default();
        let question = prompt
            .rsplit_once("Question: ")
            .and_then(|(_, rest)| rest.lines().next())
            .unwrap_or_default();
        let wanted = content_words(question);

        let best = context
            .lines()
            .filter(|line| !line.starts_with("[Source ") && *line != "---")
            .flat_map(|line| line.split_inclusive(['.', '!', '?']))
            .map(|sentence| (content_words(sentence).intersection(&wanted).count(), sentence.trim()))
            .filter(|(overlap, _)| *overlap > 0)
            .max_by_key(|(overlap, _)| *overlap);

        Ok(best
            .map(|(_, sentence)| sentence.to_string())
            .unwrap_or_else(|| NO_INFORMATION_ANSWER.to_string()))
    }
}

/// Treats fixture bytes as already-extracted text.
struct PlainTextStrategy;

impl ExtractionStrategy for PlainTextStrategy {
    fn name(&self) -> &'static str {
        "plain-text"
    }

    fn extract(&self, bytes: &[u8], _filename: &str) -> Result<String, ExtractionError> {
        String::from_utf8(bytes.to_vec()).map_err(|error| ExtractionError::PdfParse(error.to_string()))
    }
}

fn manager(config: &RagConfig) -> CorpusManager {
    CorpusManager::with_extraction_chain(
        config,
        ExtractionChain::new(vec![Box::new(PlainTextStrategy)]),
        Arc::new(CharacterNgramEmbedder::default()),
        Arc::new(ExtractiveGenerator),
    )
    .expect("test config is valid")
}

fn upload(dir: &Path, name: &str, bytes: &[u8]) -> UploadedFile {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("fixture written");
    UploadedFile::pdf(path)
}

/// A one-page PDF with a single line of Courier text.
fn single_line_pdf(line: &str) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(line)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("content encodes"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf serializes");
    bytes
}

#[tokio::test]
async fn answers_from_uploaded_documents_with_sources() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let manager = manager(&RagConfig::default());

    let summary = manager
        .ingest(&[
            upload(dir.path(), "geography.pdf", b"The capital of France is Paris. It sits on the Seine."),
            upload(dir.path(), "cooking.pdf", b"Risotto needs arborio rice and patient stirring."),
        ])
        .await?;
    assert_eq!(summary.document_count, 2);

    let answer = manager.query("What is the capital of France?").await?;
    assert!(answer.answer_text.contains("Paris"), "{}", answer.answer_text);
    assert!(!answer.sources.is_empty());
    assert!(answer
        .sources
        .iter()
        .any(|source| source.metadata.document.filename == "geography.pdf"));
    assert!(answer.sources.iter().all(|source| source.snippet.ends_with("...")));
    Ok(())
}

#[tokio::test]
async fn unrelated_questions_get_the_fixed_refusal() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let manager = manager(&RagConfig::default());
    manager
        .ingest(&[upload(dir.path(), "geography.pdf", b"The capital of France is Paris.")])
        .await?;

    let answer = manager.query("How do I calibrate a torque wrench?").await?;
    assert_eq!(answer.answer_text, NO_INFORMATION_ANSWER);
    assert!(!answer.sources.is_empty());
    Ok(())
}

#[tokio::test]
async fn querying_before_any_upload_is_distinct_from_empty_query() {
    let manager = manager(&RagConfig::default());
    let error = manager.query("What is the capital of France?").await.expect_err("nothing loaded");
    assert_eq!(error.kind(), ErrorKind::NoCorpusLoaded);
    assert!(!manager.status().await.has_documents);
}

#[tokio::test]
async fn second_upload_replaces_the_first_by_default() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let manager = manager(&RagConfig::default());
    manager
        .ingest(&[upload(dir.path(), "geography.pdf", b"The capital of France is Paris.")])
        .await?;
    manager
        .ingest(&[upload(dir.path(), "cooking.pdf", b"Risotto needs arborio rice.")])
        .await?;

    let answer = manager.query("What is the capital of France?").await?;
    assert_eq!(answer.answer_text, NO_INFORMATION_ANSWER);
    assert!(answer
        .sources
        .iter()
        .all(|source| source.metadata.document.filename == "cooking.pdf"));
    Ok(())
}

#[tokio::test]
async fn accumulating_keeps_earlier_uploads_searchable() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let mut config = RagConfig::default();
    config.corpus.reingest = ReingestPolicy::Accumulate;
    let manager = manager(&config);

    manager
        .ingest(&[upload(dir.path(), "geography.pdf", b"The capital of France is Paris.")])
        .await?;
    manager
        .ingest(&[upload(dir.path(), "cooking.pdf", b"Risotto needs arborio rice.")])
        .await?;

    assert_eq!(manager.status().await.document_count, 2);
    let answer = manager.query("What is the capital of France?").await?;
    assert!(answer.answer_text.contains("Paris"));
    Ok(())
}

#[tokio::test]
async fn clear_then_query_reports_no_corpus() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let manager = manager(&RagConfig::default());
    manager
        .ingest(&[upload(dir.path(), "geography.pdf", b"The capital of France is Paris.")])
        .await?;

    assert!(manager.clear().await.success);
    let status = manager.status().await;
    assert!(!status.has_documents);
    assert_eq!(status.chunk_count, 0);

    let error = manager.query("What is the capital of France?").await.expect_err("cleared");
    assert_eq!(error.kind(), ErrorKind::NoCorpusLoaded);
    Ok(())
}

#[tokio::test]
async fn unparseable_file_is_kept_as_a_flagged_placeholder() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let manager = manager(&RagConfig::default());
    let summary = manager
        .ingest(&[
            upload(dir.path(), "geography.pdf", b"The capital of France is Paris."),
            upload(dir.path(), "scan.pdf", &[0xde, 0xad, 0xbe, 0xef, 0xff]),
            upload(dir.path(), "cooking.pdf", b"Risotto needs arborio rice."),
        ])
        .await?;

    assert_eq!(summary.document_count, 3);
    assert_eq!(summary.degraded.len(), 1);
    assert_eq!(summary.degraded[0].filename, "scan.pdf");

    let answer = manager.query("What is the capital of France?").await?;
    assert!(answer.answer_text.contains("Paris"));
    Ok(())
}

#[tokio::test]
async fn real_pdf_text_flows_through_the_default_parsers() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    let config = RagConfig::default();
    let manager = CorpusManager::with_extraction_chain(
        &config,
        ExtractionChain::new(vec![Box::new(LopdfStrategy), Box::new(PdfExtractStrategy)]),
        Arc::new(CharacterNgramEmbedder::default()),
        Arc::new(ExtractiveGenerator),
    )?;

    let summary = manager
        .ingest(&[upload(
            dir.path(),
            "geography.pdf",
            &single_line_pdf("The capital of France is Paris."),
        )])
        .await?;
    assert!(summary.degraded.is_empty());

    let snapshot = manager.snapshot().await;
    let document = &snapshot.documents()[0];
    assert!(!document.metadata.extraction_failed);
    assert!(document.raw_text.contains("Paris"), "{:?}", document.raw_text);

    let answer = manager.query("What is the capital of France?").await?;
    assert!(answer.answer_text.contains("Paris"));
    Ok(())
}
