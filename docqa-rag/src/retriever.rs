//! Query-time retrieval and the LLM-need heuristic.

use std::sync::Arc;

use tracing::debug;

use crate::document::SearchResult;
use crate::embedding::EmbeddingChain;
use crate::error::{RagError, Result};
use crate::vectorstore::VectorIndex;

/// Top score above which a single match is answered directly.
pub const HIGH_CONFIDENCE_SCORE: f32 = 0.9;

/// Score gap between the two best matches below which the ranking is ambiguous.
pub const AMBIGUOUS_GAP: f32 = 0.05;

/// Results of one retrieval together with the provider that embedded the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrieval {
    /// Matches at or above the threshold, best first.
    pub results: Vec<SearchResult>,
    /// Name of the embedding provider that embedded the query.
    pub provider: String,
}

/// Embeds a query and searches the vector index.
///
/// Embedding failures are not retried here; the provider chain is the only
/// recovery path.
#[derive(Clone)]
pub struct Retriever {
    embeddings: Arc<EmbeddingChain>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    /// Create a retriever over the given chain and index.
    pub fn new(embeddings: Arc<EmbeddingChain>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embeddings, index }
    }

    /// Return up to `top_k` matches whose score is at least `threshold`.
    pub async fn retrieve(&self, query: &str, top_k: usize, threshold: f32) -> Result<Retrieval> {
        if query.trim().is_empty() {
            return Err(RagError::InvalidInput("query must not be empty".into()));
        }

        let embedded = self.embeddings.embed_query(query).await?;
        let mut results = self.index.search(&embedded.value, top_k).await?;
        let found = results.len();
        results.retain(|r| r.score >= threshold);

        debug!(
            provider = %embedded.provider,
            found,
            kept = results.len(),
            threshold,
            "retrieval complete"
        );

        Ok(Retrieval { results, provider: embedded.provider })
    }
}

/// Decide whether an LLM has to be involved in answering.
///
/// Only a top score above [`HIGH_CONFIDENCE_SCORE`] yields `false`. Every
/// other case, including a clear winner below that score, yields `true`;
/// this conservative default is intentional and sends most queries through
/// LLM synthesis.
pub fn needs_llm(results: &[SearchResult]) -> bool {
    match results {
        [] => true,
        [top, ..] if top.score > HIGH_CONFIDENCE_SCORE => false,
        [top, second, ..] if top.score - second.score < AMBIGUOUS_GAP => true,
        _ => true,
    }
}
