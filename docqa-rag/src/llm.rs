//! LLM provider trait and retry policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// One text-generation call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    /// The user prompt.
    pub prompt: String,
    /// Optional system instruction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Optional cap on generated tokens.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a request with temperature 0.7 and no system instruction.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(), system_instruction: None, temperature: 0.7, max_tokens: None }
    }

    /// Set the system instruction.
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the output token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A backend that turns a prompt into generated text.
///
/// Implementations should put a timeout on their network client; the
/// pipeline never cancels an in-flight call.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Generate a completion for the request.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

/// Wraps an [`LlmProvider`] and retries transient failures.
///
/// Attempt `n` that fails transiently is followed by a sleep of
/// `n² × backoff_unit` before attempt `n + 1`. After `max_attempts`
/// attempts the last error is returned.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::RetryingLlm;
///
/// let llm = RetryingLlm::new(Arc::new(provider)).with_max_attempts(2);
/// let text = llm.generate(&GenerationRequest::new("Hello")).await?;
/// ```
pub struct RetryingLlm {
    inner: Arc<dyn LlmProvider>,
    max_attempts: u32,
    backoff_unit: Duration,
}

impl RetryingLlm {
    /// Wrap a provider with 2 attempts and a one-second backoff unit.
    pub fn new(inner: Arc<dyn LlmProvider>) -> Self {
        Self { inner, max_attempts: 2, backoff_unit: Duration::from_secs(1) }
    }

    /// Set the total number of attempts (at least one).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the unit multiplied by `attempt²` between attempts.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }
}

#[async_trait]
impl LlmProvider for RetryingLlm {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut attempt = 1;
        loop {
            match self.inner.generate(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.backoff_unit * attempt * attempt;
                    warn!(
                        provider = self.inner.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "LLM call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
