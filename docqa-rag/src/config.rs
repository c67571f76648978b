//! Configuration for ingestion, retrieval and response composition.

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};

/// Configuration parameters for the question-answering pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    ///
    /// The chunker clamps the effective overlap to `chunk_size / 4`.
    pub chunk_overlap: usize,
    /// Number of nearest neighbours requested from the vector index.
    pub top_k: usize,
    /// Minimum similarity score for results (results below this are filtered out).
    pub similarity_threshold: f32,
    /// Number of top results merged into the LLM context.
    pub max_passages: usize,
    /// Token budget for the merged context (approximated as 4 characters per token).
    pub context_max_tokens: usize,
    /// Characters of context kept on each side of a query-term match.
    pub snippet_context: usize,
    /// Direct responses longer than this many characters are summarized.
    pub summary_threshold: usize,
    /// Output token cap passed to the LLM provider.
    pub llm_max_tokens: u32,
    /// Total attempts per LLM call, including the first one.
    pub llm_max_attempts: u32,
    /// Whether responses are cached at all.
    pub cache_enabled: bool,
    /// Lifetime of a cached response.
    pub cache_ttl_secs: u64,
    /// Number of background tasks persisting cache writes.
    pub cache_workers: usize,
    /// Capacity of the background cache-write queue.
    pub cache_queue_capacity: usize,
    /// Dimension of every embedding stored in the index.
    pub embedding_dimension: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            top_k: 5,
            similarity_threshold: 0.7,
            max_passages: 3,
            context_max_tokens: 4000,
            snippet_context: 100,
            summary_threshold: 1000,
            llm_max_tokens: 500,
            llm_max_attempts: 2,
            cache_enabled: true,
            cache_ttl_secs: 36_000,
            cache_workers: 2,
            cache_queue_capacity: 256,
            embedding_dimension: 768,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that the parameters are consistent with each other.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::ConfigError(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(RagError::ConfigError(format!(
                "similarity_threshold ({}) must be within [0, 1]",
                self.similarity_threshold
            )));
        }
        if self.context_max_tokens == 0 {
            return Err(RagError::ConfigError(
                "context_max_tokens must be greater than zero".to_string(),
            ));
        }
        if self.max_passages == 0 {
            return Err(RagError::ConfigError("max_passages must be greater than zero".to_string()));
        }
        if self.llm_max_attempts == 0 {
            return Err(RagError::ConfigError(
                "llm_max_attempts must be greater than zero".to_string(),
            ));
        }
        if self.cache_enabled && (self.cache_workers == 0 || self.cache_queue_capacity == 0) {
            return Err(RagError::ConfigError(
                "cache_workers and cache_queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.embedding_dimension == 0 {
            return Err(RagError::ConfigError(
                "embedding_dimension must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the number of nearest neighbours requested per query.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Set the minimum similarity threshold for filtering results.
    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    /// Set how many top results are merged into the LLM context.
    pub fn max_passages(mut self, passages: usize) -> Self {
        self.config.max_passages = passages;
        self
    }

    /// Set the token budget of the merged context.
    pub fn context_max_tokens(mut self, tokens: usize) -> Self {
        self.config.context_max_tokens = tokens;
        self
    }

    /// Set the snippet window on each side of a query-term match.
    pub fn snippet_context(mut self, chars: usize) -> Self {
        self.config.snippet_context = chars;
        self
    }

    /// Set the length above which direct responses are summarized.
    pub fn summary_threshold(mut self, chars: usize) -> Self {
        self.config.summary_threshold = chars;
        self
    }

    /// Set the output token cap passed to the LLM.
    pub fn llm_max_tokens(mut self, tokens: u32) -> Self {
        self.config.llm_max_tokens = tokens;
        self
    }

    /// Set the number of attempts per LLM call.
    pub fn llm_max_attempts(mut self, attempts: u32) -> Self {
        self.config.llm_max_attempts = attempts;
        self
    }

    /// Enable or disable response caching.
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    /// Set the lifetime of cached responses in seconds.
    pub fn cache_ttl_secs(mut self, ttl: u64) -> Self {
        self.config.cache_ttl_secs = ttl;
        self
    }

    /// Set the number of background cache-write workers.
    pub fn cache_workers(mut self, workers: usize) -> Self {
        self.config.cache_workers = workers;
        self
    }

    /// Set the capacity of the background cache-write queue.
    pub fn cache_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_queue_capacity = capacity;
        self
    }

    /// Set the embedding dimension of the vector index.
    pub fn embedding_dimension(mut self, dimension: usize) -> Self {
        self.config.embedding_dimension = dimension;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k == 0` or `max_passages == 0`
    /// - `similarity_threshold` lies outside `[0, 1]`
    /// - `llm_max_attempts == 0`
    /// - caching is enabled with no workers or a zero-capacity queue
    /// - `embedding_dimension == 0`
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
