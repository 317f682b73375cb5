use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::models::UploadedFile;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{debug, warn};

/// One way of turning raw PDF bytes into plain text.
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractionError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyFailure {
    pub strategy: &'static str,
    pub reason: String,
}

impl std::fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.strategy, self.reason)
    }
}

/// Result of running the chain. Downstream code only ever reads `text()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionOutcome {
    Extracted {
        text: String,
        strategy: &'static str,
    },
    Degraded {
        placeholder: String,
        failures: Vec<StrategyFailure>,
    },
}

impl ExtractionOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Extracted { text, .. } => text,
            Self::Degraded { placeholder, .. } => placeholder,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Self::Extracted { text, .. } => text,
            Self::Degraded { placeholder, .. } => placeholder,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

pub fn placeholder_text(filename: &str) -> String {
    format!(
        "PDF file processed but text extraction failed. Filename: {filename}. Please try re-uploading the document."
    )
}

/// Ordered strategies, tried until one yields non-blank text.
pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl ExtractionChain {
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        let mut strategies: Vec<Box<dyn ExtractionStrategy>> =
            vec![Box::new(LopdfStrategy), Box::new(PdfExtractStrategy)];

        if let Some(endpoint) = &config.ocr_endpoint {
            strategies.push(Box::new(RemoteOcrStrategy {
                endpoint: endpoint.clone(),
                api_key: config.ocr_api_key.clone(),
                timeout: config.ocr_timeout,
            }));
        }

        Self::new(strategies)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|strategy| strategy.name()).collect()
    }

    pub fn extract_file(&self, file: &UploadedFile) -> ExtractionOutcome {
        match std::fs::read(&file.path) {
            Ok(bytes) => self.extract_bytes(&file.original_name, &bytes),
            Err(error) => {
                warn!(file = %file.original_name, %error, "could not read upload");
                ExtractionOutcome::Degraded {
                    placeholder: placeholder_text(&file.original_name),
                    failures: vec![StrategyFailure {
                        strategy: "read",
                        reason: error.to_string(),
                    }],
                }
            }
        }
    }

    pub fn extract_bytes(&self, filename: &str, bytes: &[u8]) -> ExtractionOutcome {
        let mut failures = Vec::new();

        for strategy in &self.strategies {
            let attempt = panic::catch_unwind(AssertUnwindSafe(|| strategy.extract(bytes, filename)));
            let reason = match attempt {
                Ok(Ok(text)) if !text.trim().is_empty() => {
                    debug!(file = filename, strategy = strategy.name(), chars = text.chars().count(), "extracted text");
                    return ExtractionOutcome::Extracted {
                        text,
                        strategy: strategy.name(),
                    };
                }
                Ok(Ok(_)) => ExtractionError::NoText.to_string(),
                Ok(Err(error)) => error.to_string(),
                Err(_) => "strategy panicked".to_string(),
            };

            debug!(file = filename, strategy = strategy.name(), %reason, "extraction strategy failed");
            failures.push(StrategyFailure {
                strategy: strategy.name(),
                reason,
            });
        }

        warn!(file = filename, attempts = failures.len(), "all extraction strategies failed");
        ExtractionOutcome::Degraded {
            placeholder: placeholder_text(filename),
            failures,
        }
    }
}

/// Page-by-page extraction through lopdf's content stream decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfStrategy;

impl ExtractionStrategy for LopdfStrategy {
    fn name(&self) -> &'static str {
        "lopdf"
    }

    fn extract(&self, bytes: &[u8], _filename: &str) -> Result<String, ExtractionError> {
        let document =
            Document::load_mem(bytes).map_err(|error| ExtractionError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| ExtractionError::PdfParse(error.to_string()))?;
            pages.push(join_text_runs(&text));
        }

        let text = pages.join("\n");
        if text.trim().is_empty() {
            return Err(ExtractionError::NoText);
        }
        Ok(text)
    }
}

/// Joins the text runs of one page with single spaces.
fn join_text_runs(page_text: &str) -> String {
    page_text
        .split(['\n', '\r'])
        .map(str::trim)
        .filter(|run| !run.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Independent parser; keeps its own layout heuristics.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfExtractStrategy;

impl ExtractionStrategy for PdfExtractStrategy {
    fn name(&self) -> &'static str {
        "pdf-extract"
    }

    fn extract(&self, bytes: &[u8], _filename: &str) -> Result<String, ExtractionError> {
        pdf_extract::extract_text_from_mem(bytes)
            .map_err(|error| ExtractionError::PdfParse(error.to_string()))
    }
}

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Posts the PDF to a multimodal OCR endpoint. Only used when configured.
#[derive(Debug, Clone)]
pub struct RemoteOcrStrategy {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl ExtractionStrategy for RemoteOcrStrategy {
    fn name(&self) -> &'static str {
        "remote-ocr"
    }

    fn extract(&self, bytes: &[u8], filename: &str) -> Result<String, ExtractionError> {
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(bytes),
            source_path: filename.to_string(),
        };

        let client = Client::builder().timeout(self.timeout).build()?;
        let mut request = client
            .post(&self.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(ExtractionError::OcrFailed(format!(
                "multimodal OCR request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json()?;
        payload_to_text(&payload, filename)
    }
}

fn payload_to_text(payload: &LlmOcrResponse, filename: &str) -> Result<String, ExtractionError> {
    if let Some(listed) = &payload.pages {
        let mut pages = listed
            .iter()
            .filter_map(|page| {
                let text = page.text.as_deref().map(str::trim).unwrap_or_default();
                if text.is_empty() {
                    None
                } else {
                    Some((page.page.unwrap_or(1), text))
                }
            })
            .collect::<Vec<_>>();
        pages.sort_by_key(|(number, _)| *number);

        if !pages.is_empty() {
            return Ok(pages
                .into_iter()
                .map(|(_, text)| text)
                .collect::<Vec<_>>()
                .join("\n"));
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .map(str::trim)
            .filter(|page| !page.is_empty())
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages.join("\n"));
        }
    }

    Err(ExtractionError::OcrFailed(format!(
        "multimodal OCR response was empty for {filename}"
    )))
}
