//! Error types for the `docqa-rag` crate.

use thiserror::Error;

/// Errors that can occur while ingesting documents or answering queries.
#[derive(Debug, Error)]
pub enum RagError {
    /// The caller supplied input that can never succeed (empty query,
    /// unsupported file type, unknown detail level).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An embedding vector did not have the dimension the index was built with.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension fixed at index construction.
        expected: usize,
        /// The length of the offending vector.
        actual: usize,
    },

    /// An error occurred during embedding generation.
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred while generating text with an LLM provider.
    #[error("LLM error ({provider}): {message}")]
    LlmError {
        /// The LLM provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// An LLM provider refused the request with a status that retrying
    /// cannot change (bad request, authentication, unknown model).
    #[error("LLM request rejected ({provider}): {message}")]
    LlmRejected {
        /// The LLM provider that rejected the request.
        provider: String,
        /// The HTTP status returned.
        status: u16,
        /// A description of the failure.
        message: String,
    },

    /// An error occurred in the vector index backend.
    #[error("Vector store error ({backend}): {message}")]
    VectorStoreError {
        /// The vector index backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// Persisted index state could not be read back.
    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    /// The response cache store failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// A document could not be parsed into pages.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The object store could not read or write a file.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// A referenced document or embedding does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An error in the ingestion or query orchestration.
    #[error("Pipeline error: {0}")]
    PipelineError(String),
}

impl RagError {
    /// Whether retrying the same provider call may succeed.
    ///
    /// Network and provider-side failures are transient; everything the
    /// caller caused, or that is deterministic, is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::EmbeddingError { .. } | RagError::LlmError { .. })
    }

    /// Classify an unsuccessful HTTP response from an LLM provider.
    ///
    /// Rate limiting and server errors become [`RagError::LlmError`];
    /// any other status becomes [`RagError::LlmRejected`].
    pub fn llm_http(provider: &str, status: u16, message: String) -> Self {
        if status == 429 || (500..=599).contains(&status) {
            RagError::LlmError { provider: provider.to_string(), message }
        } else {
            RagError::LlmRejected { provider: provider.to_string(), status, message }
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
