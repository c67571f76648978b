//! LLM summarization of long passages.

use std::sync::Arc;

use tracing::debug;

use crate::document::DetailLevel;
use crate::error::Result;
use crate::llm::{GenerationRequest, LlmProvider};

/// Temperature used for summaries.
pub const SUMMARY_TEMPERATURE: f32 = 0.3;

/// Condenses text to the length implied by a [`DetailLevel`].
#[derive(Clone)]
pub struct Summarizer {
    llm: Arc<dyn LlmProvider>,
    threshold: usize,
    max_tokens: Option<u32>,
}

impl Summarizer {
    /// Create a summarizer that considers text longer than 1000 characters long.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm, threshold: 1000, max_tokens: None }
    }

    /// Set the length in characters above which text needs a summary.
    pub fn with_threshold(mut self, chars: usize) -> Self {
        self.threshold = chars;
        self
    }

    /// Cap the tokens of every generated summary.
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    /// Whether `text` is longer than the threshold.
    pub fn needs_summary(&self, text: &str) -> bool {
        text.chars().count() > self.threshold
    }

    /// The system instruction for a detail level.
    pub fn instruction(level: DetailLevel) -> &'static str {
        match level {
            DetailLevel::Short => {
                "Create a concise, bullet-point summary of the following text. \
                 Focus only on the most important points. Keep it under 100 words."
            }
            DetailLevel::Medium => {
                "Create a clear summary of the following text. \
                 Include key points and maintain important technical details. \
                 Use 200-300 words."
            }
            DetailLevel::Detailed => {
                "Create a comprehensive summary of the following text. \
                 Include all important points, technical details, and context. \
                 Use a structured format with sections."
            }
        }
    }

    /// Summarize `text` for the given detail level.
    pub async fn summarize(&self, text: &str, level: DetailLevel) -> Result<String> {
        debug!(provider = self.llm.name(), detail_level = %level, text_len = text.len(), "summarizing");

        let mut request =
            GenerationRequest::new(format!("Please summarize the following text:\n\n{text}"))
                .with_system_instruction(Self::instruction(level))
                .with_temperature(SUMMARY_TEMPERATURE);
        if let Some(tokens) = self.max_tokens {
            request = request.with_max_tokens(tokens);
        }
        self.llm.generate(&request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct Recording {
        requests: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl LlmProvider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.requests.lock().unwrap().push(request.clone());
            Ok("summary".into())
        }
    }

    #[test]
    fn threshold_is_exclusive() {
        let summarizer = Summarizer::new(Arc::new(Recording::default())).with_threshold(5);
        assert!(!summarizer.needs_summary("12345"));
        assert!(summarizer.needs_summary("123456"));
        // Counted in characters, not bytes.
        assert!(!summarizer.needs_summary("ééééé"));
    }

    #[tokio::test]
    async fn prompt_follows_detail_level() {
        let llm = Arc::new(Recording::default());
        let summarizer = Summarizer::new(llm.clone()).with_max_tokens(200);

        let out = summarizer.summarize("long text", DetailLevel::Short).await.unwrap();
        assert_eq!(out, "summary");

        let requests = llm.requests.lock().unwrap();
        let request = &requests[0];
        assert!(request.prompt.ends_with("long text"));
        assert!(request.system_instruction.as_deref().unwrap().contains("under 100 words"));
        assert_eq!(request.temperature, SUMMARY_TEMPERATURE);
        assert_eq!(request.max_tokens, Some(200));
    }
}
