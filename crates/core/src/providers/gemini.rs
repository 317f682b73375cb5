use crate::config::{EmbeddingConfig, GenerationConfig};
use crate::error::{ConfigError, EmbeddingError, GenerationError};
use crate::traits::{AnswerGenerator, Embedder};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

const BACKEND: &str = "gemini";

/// `batchEmbedContents` requests allowed in flight at once.
const MAX_CONCURRENT_BATCHES: usize = 4;

/// Runs `run` over `batches` with at most `limit` in flight, keeping input order.
async fn run_bounded<'a, T, R, E, F, Fut>(
    batches: impl IntoIterator<Item = &'a [T]>,
    limit: usize,
    run: F,
) -> Result<Vec<R>, E>
where
    T: 'a,
    F: FnMut(&'a [T]) -> Fut,
    Fut: Future<Output = Result<Vec<R>, E>>,
{
    let nested = stream::iter(batches.into_iter().map(run))
        .buffered(limit.max(1))
        .try_collect::<Vec<_>>()
        .await?;
    Ok(nested.into_iter().flatten().collect())
}

fn model_endpoint(base_url: &str, model: &str, method: &str) -> Result<Url, ConfigError> {
    let mut base = base_url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    let model = model.trim_start_matches("models/");
    if model.is_empty() {
        return Err(ConfigError::Invalid("model name is empty".to_string()));
    }
    Ok(Url::parse(&base)?.join(&format!("v1beta/models/{model}:{method}"))?)
}

fn checked_api_key(api_key: &str) -> Result<String, ConfigError> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(ConfigError::MissingCredential("GEMINI_API_KEY is empty".to_string()));
    }
    Ok(api_key.to_string())
}

#[derive(Debug, Clone, Copy)]
enum TaskType {
    Document,
    Query,
}

impl TaskType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Document => "RETRIEVAL_DOCUMENT",
            Self::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// Embeddings through the `batchEmbedContents` endpoint.
pub struct GeminiEmbedder {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: String,
    dimensions: usize,
    batch_size: usize,
    max_retries: u32,
    timeout: Duration,
}

impl GeminiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: &str) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ConfigError::Invalid(format!("http client: {error}")))?;

        Ok(Self {
            client,
            endpoint: model_endpoint(&config.base_url, &config.model, "batchEmbedContents")?,
            model: config.model.trim_start_matches("models/").to_string(),
            api_key: checked_api_key(api_key)?,
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
            timeout: config.timeout,
        })
    }

    async fn embed_with_task(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        run_bounded(
            texts.chunks(self.batch_size),
            MAX_CONCURRENT_BATCHES,
            |batch| self.embed_one_batch(batch, task),
        )
        .await
    }

    async fn embed_one_batch(
        &self,
        texts: &[String],
        task: TaskType,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let model_path = format!("models/{}", self.model);
        let requests = texts
            .iter()
            .map(|text| {
                json!({
                    "model": model_path,
                    "content": { "parts": [{ "text": text }] },
                    "taskType": task.as_str(),
                })
            })
            .collect::<Vec<_>>();
        let body = json!({ "requests": requests });

        let mut last_error = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(attempt, delay_secs = delay.as_secs(), "retrying embedding batch");
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(self.endpoint.clone())
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(error) if error.is_timeout() => return Err(EmbeddingError::Timeout(self.timeout)),
                Err(error) => {
                    last_error = Some(EmbeddingError::Http(error));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let parsed: Value = response.json().await?;
                return parse_embeddings(&parsed, texts.len(), self.dimensions);
            }

            let details = format!("{status}: {}", response.text().await.unwrap_or_default());
            let error = EmbeddingError::BackendResponse {
                backend: BACKEND.to_string(),
                details,
            };
            if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                warn!(%status, attempt, "embedding request failed, will retry");
                last_error = Some(error);
                continue;
            }
            return Err(error);
        }

        Err(last_error.unwrap_or_else(|| EmbeddingError::BackendResponse {
            backend: BACKEND.to_string(),
            details: "embedding failed after retries".to_string(),
        }))
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embed_with_task(texts, TaskType::Document).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let vectors = self
            .embed_with_task(&[text.to_string()], TaskType::Query)
            .await?;
        let received = vectors.len();
        vectors
            .into_iter()
            .next()
            .filter(|_| received == 1)
            .ok_or(EmbeddingError::CountMismatch {
                expected: 1,
                received,
            })
    }
}

fn parse_embeddings(
    parsed: &Value,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let items = parsed
        .pointer("/embeddings")
        .and_then(Value::as_array)
        .ok_or_else(|| EmbeddingError::MalformedResponse("missing embeddings array".to_string()))?;

    if items.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            received: items.len(),
        });
    }

    items
        .iter()
        .map(|item| {
            let values = item
                .pointer("/values")
                .and_then(Value::as_array)
                .ok_or_else(|| EmbeddingError::MalformedResponse("missing values".to_string()))?;

            let vector = values
                .iter()
                .map(|value| {
                    value.as_f64().map(|number| number as f32).ok_or_else(|| {
                        EmbeddingError::MalformedResponse(format!("non-numeric value {value}"))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            if vector.len() != dimensions {
                return Err(EmbeddingError::MalformedResponse(format!(
                    "embedding dimension {} != {}",
                    vector.len(),
                    dimensions
                )));
            }
            Ok(vector)
        })
        .collect()
}

/// Single-turn text generation through `generateContent`.
pub struct GeminiGenerator {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: String,
    temperature: f32,
    timeout: Duration,
}

impl GeminiGenerator {
    pub fn new(config: &GenerationConfig, api_key: &str) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| ConfigError::Invalid(format!("http client: {error}")))?;

        Ok(Self {
            client,
            endpoint: model_endpoint(&config.base_url, &config.model, "generateContent")?,
            model: config.model.trim_start_matches("models/").to_string(),
            api_key: checked_api_key(api_key)?,
            temperature: config.temperature,
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": self.temperature },
        });

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    GenerationError::Timeout(self.timeout)
                } else {
                    GenerationError::Http(error)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {}", response.text().await.unwrap_or_default()),
            });
        }

        let parsed: Value = response.json().await?;
        parse_generation(&parsed)
    }
}

fn parse_generation(parsed: &Value) -> Result<String, GenerationError> {
    let text = parsed
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.pointer("/text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = parsed
            .pointer("/promptFeedback/blockReason")
            .or_else(|| parsed.pointer("/candidates/0/finishReason"))
            .and_then(Value::as_str)
            .unwrap_or("no candidates");
        return Err(GenerationError::EmptyResponse(reason.to_string()));
    }

    Ok(text.trim().to_string())
}
