use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_rag_core::{
    discover_pdf_files, validate_upload, CorpusManager, IngestSummary, QueryAnswer, RagConfig,
    UploadPolicy, UploadedFile,
};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file; built-in defaults when omitted.
    #[arg(long, env = "PDF_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Gemini API key used for embeddings and generation.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Multimodal OCR endpoint tried after local extraction fails.
    #[arg(long, env = "LLM_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    /// Bearer token for the OCR endpoint.
    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest PDFs, answer one question, and exit.
    Ask {
        /// PDF file to upload. Repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        /// Folder searched recursively for PDFs.
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Question to answer from the uploaded documents.
        #[arg(long)]
        question: String,
    },
    /// Interactive session. Lines starting with ':' are commands
    /// (:status, :clear, :ingest <paths>, :quit); anything else is a question.
    Repl {
        /// PDF file to upload at start. Repeatable.
        #[arg(long = "file")]
        files: Vec<PathBuf>,
        /// Folder searched recursively for PDFs at start.
        #[arg(long)]
        folder: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RagConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => RagConfig::default(),
    };
    if cli.ocr_endpoint.is_some() {
        config.extraction.ocr_endpoint = cli.ocr_endpoint.clone();
    }
    config.extraction.ocr_api_key = cli.ocr_api_key.clone();

    let manager = CorpusManager::from_config(&config, cli.gemini_api_key.as_deref())
        .context("building corpus manager")?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-rag boot"
    );

    match cli.command {
        Command::Ask {
            files,
            folder,
            question,
        } => {
            let uploads = collect_uploads(manager.upload_policy(), &files, folder.as_ref());
            let summary = manager
                .ingest(&uploads)
                .await
                .map_err(|error| anyhow::anyhow!("[{:?}] {error}", error.kind()))?;
            print_summary(&summary);

            let answer = manager
                .query(&question)
                .await
                .map_err(|error| anyhow::anyhow!("[{:?}] {error}", error.kind()))?;
            print_answer(&answer);
        }
        Command::Repl { files, folder } => {
            if !files.is_empty() || folder.is_some() {
                ingest_paths(&manager, &files, folder.as_ref()).await;
            }
            run_repl(&manager).await?;
        }
    }

    Ok(())
}

async fn run_repl(manager: &CorpusManager) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("Ask a question, or :status, :clear, :ingest <paths>, :quit");

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line.split_once(char::is_whitespace).unwrap_or((line, "")) {
            (":quit" | ":q", _) => break,
            (":status", _) => {
                let status = manager.status().await;
                println!(
                    "documents={} chunks={} generation={} last_update={}",
                    status.document_count,
                    status.chunk_count,
                    status.generation,
                    status.last_update_timestamp.as_deref().unwrap_or("never")
                );
            }
            (":clear", _) => {
                let ack = manager.clear().await;
                println!("cleared: {}", ack.success);
            }
            (":ingest", rest) => {
                let mut files = Vec::new();
                let mut folders = Vec::new();
                for path in rest.split_whitespace().map(PathBuf::from) {
                    if path.is_dir() {
                        folders.push(path);
                    } else {
                        files.push(path);
                    }
                }
                for folder in &folders {
                    files.extend(discover_pdf_files(folder));
                }
                ingest_paths(manager, &files, None).await;
            }
            ("", _) => {}
            _ => match manager.query(line).await {
                Ok(answer) => print_answer(&answer),
                Err(error) => println!("error [{:?}]: {error}", error.kind()),
            },
        }
    }

    Ok(())
}

async fn ingest_paths(manager: &CorpusManager, files: &[PathBuf], folder: Option<&PathBuf>) {
    let uploads = collect_uploads(manager.upload_policy(), files, folder);
    match manager.ingest(&uploads).await {
        Ok(summary) => print_summary(&summary),
        Err(error) => println!("ingest failed [{:?}] at {}: {error}", error.kind(), error.stage()),
    }
}

/// Explicit files first, then the folder's PDFs. The MIME type comes from the
/// extension; uploads failing the size or type policy are reported and left out.
fn collect_uploads(
    policy: &UploadPolicy,
    files: &[PathBuf],
    folder: Option<&PathBuf>,
) -> Vec<UploadedFile> {
    let mut paths = files.to_vec();
    if let Some(folder) = folder {
        paths.extend(discover_pdf_files(folder));
    }

    paths
        .into_iter()
        .map(UploadedFile::from_path)
        .filter(|upload| match validate_upload(upload, policy) {
            Ok(()) => true,
            Err(error) => {
                warn!(file = %upload.original_name, kind = ?error.kind(), %error, "rejected upload");
                false
            }
        })
        .collect()
}

fn print_summary(summary: &IngestSummary) {
    println!(
        "{} document(s), {} chunk(s) ingested (generation {})",
        summary.document_count, summary.chunk_count, summary.generation
    );
    for degraded in &summary.degraded {
        println!("  degraded: {} ({})", degraded.filename, degraded.reasons.join("; "));
    }
    for skipped in &summary.skipped {
        println!("  skipped: {} ({})", skipped.filename, skipped.reason);
    }
}

fn print_answer(answer: &QueryAnswer) {
    println!("{}", answer.answer_text);
    for (position, source) in answer.sources.iter().enumerate() {
        println!(
            "[{}] {} chunk={} score={:.4}",
            position + 1,
            source.metadata.document.filename,
            source.metadata.chunk_index,
            source.score
        );
        println!("  {}", source.snippet);
    }
}
