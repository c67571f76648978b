//! Gemini embedding and text-generation providers over the Generative
//! Language REST API.
//!
//! This module is only available when the `gemini` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::llm::{GenerationRequest, LlmProvider};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-004";
const DEFAULT_EMBEDDING_DIMENSIONS: usize = 768;
const DEFAULT_GENERATION_MODEL: &str = "gemini-1.5-pro";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest batch accepted by `batchEmbedContents`.
const MAX_BATCH: usize = 100;

fn api_key_from_env() -> Result<String> {
    std::env::var("GEMINI_API_KEY")
        .or_else(|_| std::env::var("GOOGLE_API_KEY"))
        .map_err(|_| {
            RagError::ConfigError("GEMINI_API_KEY or GOOGLE_API_KEY must be set".into())
        })
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| RagError::ConfigError(format!("failed to build HTTP client: {e}")))
}

async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorResponse>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body);
    format!("API returned {status}: {detail}")
}

/// Embedding task hint sent with every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    /// Text that will be searched over.
    RetrievalDocument,
    /// A search query.
    RetrievalQuery,
}

// ── Gemini API request/response types ──────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: TaskType,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// An [`EmbeddingProvider`] backed by the Gemini embedding API.
///
/// # Configuration
///
/// - documents are embedded with [`TaskType::RetrievalDocument`], queries
///   with [`TaskType::RetrievalQuery`].
/// - `output_dimensionality` – optional truncation of the output vector.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::gemini::GeminiEmbeddingProvider;
///
/// let provider = GeminiEmbeddingProvider::from_env()?;
/// let embedding = provider.embed("hello world").await?;
/// ```
pub struct GeminiEmbeddingProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    output_dimensionality: Option<usize>,
    dimensions: usize,
}

impl GeminiEmbeddingProvider {
    /// Create a new provider using the given API key and `text-embedding-004`.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("Gemini API key must not be empty".into()));
        }
        Ok(Self {
            client: http_client()?,
            api_key,
            base_url: GEMINI_API_BASE.into(),
            model: DEFAULT_EMBEDDING_MODEL.into(),
            output_dimensionality: None,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        })
    }

    /// Create a new provider from `GEMINI_API_KEY` (or `GOOGLE_API_KEY`).
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    /// Set the embedding model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensionality (truncates the embedding vector).
    pub fn with_output_dimensionality(mut self, dims: usize) -> Self {
        self.output_dimensionality = Some(dims);
        self.dimensions = dims;
        self
    }

    async fn embed_with_task(&self, texts: &[&str], task_type: TaskType) -> Result<Vec<Vec<f32>>> {
        let model = format!("models/{}", self.model);
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_BATCH) {
            debug!(provider = "gemini", batch_size = batch.len(), ?task_type, "embedding batch");
            let body = BatchEmbedRequest {
                requests: batch
                    .iter()
                    .map(|text| EmbedContentRequest {
                        model: model.clone(),
                        content: Content { parts: vec![Part { text }] },
                        task_type,
                        output_dimensionality: self.output_dimensionality,
                    })
                    .collect(),
            };

            let response = self
                .client
                .post(format!("{}/{model}:batchEmbedContents", self.base_url))
                .header("x-goog-api-key", &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    error!(provider = "gemini", error = %e, "embedding request failed");
                    RagError::EmbeddingError {
                        provider: "gemini".into(),
                        message: format!("request failed: {e}"),
                    }
                })?;

            if !response.status().is_success() {
                let message = error_detail(response).await;
                error!(provider = "gemini", %message, "API error");
                return Err(RagError::EmbeddingError { provider: "gemini".into(), message });
            }

            let parsed: BatchEmbedResponse =
                response.json().await.map_err(|e| RagError::EmbeddingError {
                    provider: "gemini".into(),
                    message: format!("failed to parse response: {e}"),
                })?;
            out.extend(parsed.embeddings.into_iter().map(|e| e.values));
        }

        Ok(out)
    }
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbeddingProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(&[text], TaskType::RetrievalDocument).await?.into_iter().next().ok_or_else(
            || RagError::EmbeddingError {
                provider: "gemini".into(),
                message: "API returned no embedding".into(),
            },
        )
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(&[text], TaskType::RetrievalQuery).await?.into_iter().next().ok_or_else(
            || RagError::EmbeddingError {
                provider: "gemini".into(),
                message: "API returned no embedding".into(),
            },
        )
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.embed_with_task(texts, TaskType::RetrievalDocument).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// An [`LlmProvider`] backed by Gemini `generateContent`.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::gemini::GeminiLlmProvider;
///
/// let llm = GeminiLlmProvider::from_env()?.with_model("gemini-1.5-flash");
/// ```
pub struct GeminiLlmProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiLlmProvider {
    /// Create a new provider using the given API key and `gemini-1.5-pro`.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::ConfigError("Gemini API key must not be empty".into()));
        }
        Ok(Self {
            client: http_client()?,
            api_key,
            base_url: GEMINI_API_BASE.into(),
            model: DEFAULT_GENERATION_MODEL.into(),
        })
    }

    /// Create a new provider from `GEMINI_API_KEY` (or `GOOGLE_API_KEY`).
    pub fn from_env() -> Result<Self> {
        Self::new(api_key_from_env()?)
    }

    /// Set the generation model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl LlmProvider for GeminiLlmProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        debug!(provider = "gemini", model = %self.model, prompt_len = request.prompt.len(), "generate content");

        let body = GenerateRequest {
            contents: vec![Content { parts: vec![Part { text: &request.prompt }] }],
            system_instruction: request
                .system_instruction
                .as_deref()
                .map(|text| Content { parts: vec![Part { text }] }),
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::LlmError {
                provider: "gemini".into(),
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = error_detail(response).await;
            error!(provider = "gemini", %message, "API error");
            return Err(RagError::llm_http("gemini", status.as_u16(), message));
        }

        let parsed: GenerateResponse = response.json().await.map_err(|e| RagError::LlmError {
            provider: "gemini".into(),
            message: format!("failed to parse response: {e}"),
        })?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        Ok(text.trim().to_string())
    }
}
