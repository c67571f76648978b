//! Embedding providers and the ordered provider chain.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends (Gemini, OpenAI, local
/// hashing) behind a unified async interface. The default
/// [`embed_batch`](EmbeddingProvider::embed_batch) implementation calls
/// [`embed`](EmbeddingProvider::embed) sequentially; backends that support
/// native batching should override it.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("hello world").await?;
/// assert_eq!(embedding.len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Short provider name used in logs, errors and query results.
    fn name(&self) -> &str;

    /// Generate an embedding vector for a single document text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate an embedding vector for a search query.
    ///
    /// Backends that distinguish query and document embeddings override this;
    /// the default is [`embed`](EmbeddingProvider::embed).
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text).await
    }

    /// Generate embedding vectors for a batch of document texts.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;
}

/// Vectors produced by an [`EmbeddingChain`], tagged with their producer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutput<T> {
    /// The embedding(s).
    pub value: T,
    /// Name of the provider that produced them.
    pub provider: String,
}

/// An ordered list of interchangeable embedding providers.
///
/// Each call tries the providers in order and returns the first successful
/// answer together with the name of the provider that gave it. A provider
/// that errors, or returns the wrong number of vectors or a vector of the
/// wrong dimension, is skipped with a warning. The chain holds no state
/// between calls: the first provider is always tried first.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{EmbeddingChain, HashingEmbeddingProvider};
///
/// let chain = EmbeddingChain::new(vec![
///     Arc::new(GeminiEmbeddingProvider::from_env()?),
///     Arc::new(HashingEmbeddingProvider::new(768)),
/// ])?;
/// let out = chain.embed_query("what is overlap?").await?;
/// println!("embedded by {}", out.provider);
/// ```
#[derive(Clone)]
pub struct EmbeddingChain {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    dimensions: usize,
}

impl std::fmt::Debug for EmbeddingChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingChain")
            .field("providers", &self.provider_names())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl EmbeddingChain {
    /// Build a chain from providers in priority order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the list is empty or the providers
    /// disagree on their dimension.
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>) -> Result<Self> {
        let first = providers
            .first()
            .ok_or_else(|| RagError::ConfigError("at least one embedding provider is required".into()))?;
        let dimensions = first.dimensions();
        if let Some(other) = providers.iter().find(|p| p.dimensions() != dimensions) {
            return Err(RagError::ConfigError(format!(
                "embedding provider '{}' has dimension {} but '{}' has {dimensions}",
                other.name(),
                other.dimensions(),
                first.name(),
            )));
        }
        Ok(Self { providers, dimensions })
    }

    /// A chain with a single provider.
    pub fn single(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dimensions = provider.dimensions();
        Self { providers: vec![provider], dimensions }
    }

    /// Names of the providers, in the order they are tried.
    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Dimension shared by every provider of the chain.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embed a search query with the first provider that succeeds.
    ///
    /// # Errors
    ///
    /// Returns the last provider's error when every provider fails.
    pub async fn embed_query(&self, text: &str) -> Result<ChainOutput<Vec<f32>>> {
        let mut last_error = None;
        for provider in &self.providers {
            let outcome = provider.embed_query(text).await.and_then(|vector| {
                self.check_dimension(provider.as_ref(), &vector)?;
                Ok(vector)
            });
            match outcome {
                Ok(value) => {
                    debug!(provider = provider.name(), "query embedded");
                    return Ok(ChainOutput { value, provider: provider.name().to_string() });
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "embedding provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(self.exhausted(last_error))
    }

    /// Embed a batch of document texts with the first provider that succeeds.
    ///
    /// # Errors
    ///
    /// Returns the last provider's error when every provider fails.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<ChainOutput<Vec<Vec<f32>>>> {
        let mut last_error = None;
        for provider in &self.providers {
            let outcome = provider.embed_batch(texts).await.and_then(|vectors| {
                if vectors.len() != texts.len() {
                    return Err(RagError::EmbeddingError {
                        provider: provider.name().to_string(),
                        message: format!(
                            "returned {} embeddings for {} inputs",
                            vectors.len(),
                            texts.len()
                        ),
                    });
                }
                for vector in &vectors {
                    self.check_dimension(provider.as_ref(), vector)?;
                }
                Ok(vectors)
            });
            match outcome {
                Ok(value) => {
                    debug!(provider = provider.name(), batch_size = texts.len(), "batch embedded");
                    return Ok(ChainOutput { value, provider: provider.name().to_string() });
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "embedding provider failed, trying next");
                    last_error = Some(e);
                }
            }
        }
        Err(self.exhausted(last_error))
    }

    fn check_dimension(&self, provider: &dyn EmbeddingProvider, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(RagError::EmbeddingError {
                provider: provider.name().to_string(),
                message: format!(
                    "returned a {}-dimensional embedding, expected {}",
                    vector.len(),
                    self.dimensions
                ),
            });
        }
        Ok(())
    }

    fn exhausted(&self, last_error: Option<RagError>) -> RagError {
        last_error.unwrap_or_else(|| RagError::EmbeddingError {
            provider: "chain".into(),
            message: "no embedding provider configured".into(),
        })
    }
}

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid word regex"));

/// An offline [`EmbeddingProvider`] based on feature hashing.
///
/// Each lower-cased word is hashed (FNV-1a) into one of `dimensions`
/// buckets with a hash-derived sign, and the result is L2-normalized. Texts
/// sharing vocabulary get a high cosine similarity, which makes the provider
/// a usable last resort when no remote provider is reachable, and a
/// deterministic stand-in in tests.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
}

impl HashingEmbeddingProvider {
    /// Create a provider producing vectors of the given dimension.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions: dimensions.max(1) }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in WORD.find_iter(&text.to_lowercase()) {
            let hash = fnv1a(token.as_str().as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, b| {
        (hash ^ u64::from(*b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
