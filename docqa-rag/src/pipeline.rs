//! Question-answering pipeline facade.
//!
//! The [`RagPipeline`] wires the chunker, embedding chain, vector index, LLM,
//! response cache, document registry, object store and page extractor
//! together and exposes the operations an outer layer needs: ingest and
//! delete documents, answer queries, list documents and report statistics.
//!
//! # Example
//!
//! ```rust,ignore
//! use docqa_rag::{RagPipeline, RagConfig, FlatVectorIndex, HashingEmbeddingProvider};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::new(768)))
//!     .vector_index(Arc::new(FlatVectorIndex::open("data/index", 768).await))
//!     .llm(Arc::new(my_llm))
//!     .build()?;
//!
//! let document = pipeline.ingest_upload("guide.pdf", &bytes).await?;
//! let answer = pipeline.answer(QueryRequest::new("How do I install it?")).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cache::{CacheStore, InMemoryCacheStore, ResponseCache};
use crate::cache_writer::CacheWriter;
use crate::chunking::{BoundaryChunker, Chunker};
use crate::combiner::PassageCombiner;
use crate::composer::{ComposerSettings, ResponseComposer};
use crate::config::RagConfig;
use crate::document::{DetailLevel, Document, QueryRequest, QueryResult};
use crate::embedding::{EmbeddingChain, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::ingest::{Ingestor, is_pdf};
use crate::llm::{LlmProvider, RetryingLlm};
use crate::parser::PageExtractor;
use crate::registry::{DocumentRepository, InMemoryDocumentRepository};
use crate::retriever::Retriever;
use crate::storage::{LocalObjectStore, ObjectStore, sanitize_filename};
use crate::summarize::Summarizer;
use crate::vectorstore::VectorIndex;

/// Directory used for uploads when no object store is configured.
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";

/// Usage figures of a pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineStats {
    /// Registered documents.
    pub documents_count: usize,
    /// Vectors held by the index.
    pub indexed_vectors: usize,
    /// Queries answered from the cache.
    pub cache_hits: u64,
    /// Cache lookups that missed.
    pub cache_misses: u64,
}

/// The question-answering pipeline.
///
/// Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    ingestor: Ingestor,
    composer: ResponseComposer,
    index: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentRepository>,
    objects: Arc<dyn ObjectStore>,
    cache: Arc<ResponseCache>,
    writer: CacheWriter,
    embeddings: Arc<EmbeddingChain>,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// The pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Names of the embedding providers, in fallback order.
    pub fn embedding_providers(&self) -> Vec<String> {
        self.embeddings.provider_names()
    }

    /// Store an uploaded file and return its path.
    ///
    /// Names that are not PDFs, before or after sanitizing, are rejected
    /// before anything is written.
    pub async fn store_upload(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let stored_as_pdf =
            sanitize_filename(file_name).is_none_or(|name| is_pdf(Path::new(&name)));
        if !is_pdf(Path::new(file_name)) || !stored_as_pdf {
            return Err(RagError::InvalidInput("Only PDF files are allowed".into()));
        }
        self.objects.write(file_name, bytes).await
    }

    /// Store and ingest an uploaded file.
    ///
    /// The stored file is removed again if ingestion fails.
    pub async fn ingest_upload(&self, file_name: &str, bytes: &[u8]) -> Result<Document> {
        let path = self.store_upload(file_name, bytes).await?;
        match self.ingest_file(&path).await {
            Ok(document) => Ok(document),
            Err(e) => {
                if let Err(cleanup) = self.objects.remove(&path).await {
                    warn!(path = %path.display(), error = %cleanup, "failed to remove stored upload");
                }
                Err(e)
            }
        }
    }

    /// Ingest a file already held by the object store.
    pub async fn ingest_file(&self, path: &Path) -> Result<Document> {
        self.ingestor.ingest_file(path).await
    }

    /// Delete a document and its embeddings.
    pub async fn delete_document(&self, id: u64) -> Result<Document> {
        self.ingestor.delete_document(id).await
    }

    /// Answer a query.
    ///
    /// The query is trimmed and must not be empty. A computed answer is
    /// queued for caching without waiting for the write.
    pub async fn answer(&self, request: QueryRequest) -> Result<QueryResult> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RagError::InvalidInput("Query is required".into()));
        }
        let detail_level = match request.detail_level.as_deref() {
            Some(level) => level.parse::<DetailLevel>()?,
            None => DetailLevel::default(),
        };

        let composed = match self.composer.compose(query, detail_level, &request.extra).await {
            Ok(composed) => composed,
            Err(e) => {
                error!(query, error = %e, "query failed");
                return Err(e);
            }
        };

        if !composed.from_cache() && self.cache.is_enabled() {
            self.writer.submit(composed.cache_key, composed.result.clone(), composed.generation);
        }
        Ok(composed.result)
    }

    /// All documents in id order.
    pub async fn documents(&self) -> Result<Vec<Document>> {
        self.documents.list().await
    }

    /// One document, or [`RagError::NotFound`].
    pub async fn document(&self, id: u64) -> Result<Document> {
        self.documents.get(id).await?.ok_or_else(|| RagError::NotFound(format!("document {id}")))
    }

    /// Current usage figures.
    pub async fn stats(&self) -> Result<PipelineStats> {
        let cache = self.cache.stats();
        Ok(PipelineStats {
            documents_count: self.documents.count().await?,
            indexed_vectors: self.index.len().await,
            cache_hits: cache.hits,
            cache_misses: cache.misses,
        })
    }

    /// Remove expired cache entries and return how many were removed.
    pub async fn purge_expired_cache(&self) -> usize {
        self.cache.purge_expired().await
    }

    /// Finish queued cache writes. Further answers are not cached.
    pub async fn shutdown(&self) {
        self.writer.shutdown().await;
        info!("pipeline shut down");
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// Embedding providers (or a ready chain), a vector index and an LLM are
/// required. Everything else has a default: the chunker follows the config,
/// documents are kept in memory, uploads go to [`DEFAULT_UPLOAD_DIR`],
/// answers are cached in memory and PDFs are read with `PdfExtractor`
/// (feature `pdf`).
///
/// [`build()`](RagPipelineBuilder::build) starts the cache writer tasks and
/// must be called from within a Tokio runtime.
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    chain: Option<EmbeddingChain>,
    index: Option<Arc<dyn VectorIndex>>,
    llm: Option<Arc<dyn LlmProvider>>,
    retry_backoff: Option<Duration>,
    chunker: Option<Arc<dyn Chunker>>,
    documents: Option<Arc<dyn DocumentRepository>>,
    objects: Option<Arc<dyn ObjectStore>>,
    extractor: Option<Arc<dyn PageExtractor>>,
    cache_store: Option<Arc<dyn CacheStore>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Append an embedding provider to the fallback chain.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Use a ready embedding chain instead of individual providers.
    pub fn embedding_chain(mut self, chain: EmbeddingChain) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Set the vector index.
    pub fn vector_index(mut self, index: Arc<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Set the LLM provider. It is wrapped in a [`RetryingLlm`].
    pub fn llm(mut self, llm: Arc<dyn LlmProvider>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Set the unit of the LLM retry backoff (default one second).
    pub fn retry_backoff(mut self, unit: Duration) -> Self {
        self.retry_backoff = Some(unit);
        self
    }

    /// Set the chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the document repository.
    pub fn document_repository(mut self, documents: Arc<dyn DocumentRepository>) -> Self {
        self.documents = Some(documents);
        self
    }

    /// Set the object store for uploads.
    pub fn object_store(mut self, objects: Arc<dyn ObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    /// Set the page extractor.
    pub fn page_extractor(mut self, extractor: Arc<dyn PageExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Set the cache store.
    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Build the [`RagPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if a required collaborator is
    /// missing, the config is invalid, or the embedding dimension differs
    /// from the index dimension.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let chain = match self.chain {
            Some(chain) => chain,
            None => EmbeddingChain::new(self.providers)?,
        };
        let index =
            self.index.ok_or_else(|| RagError::ConfigError("vector_index is required".into()))?;
        let llm = self.llm.ok_or_else(|| RagError::ConfigError("llm is required".into()))?;

        if chain.dimensions() != index.dimension() {
            return Err(RagError::ConfigError(format!(
                "embedding dimension {} does not match index dimension {}",
                chain.dimensions(),
                index.dimension()
            )));
        }

        let extractor = match self.extractor {
            Some(extractor) => extractor,
            None => default_extractor()?,
        };

        let mut retrying = RetryingLlm::new(llm).with_max_attempts(config.llm_max_attempts);
        if let Some(unit) = self.retry_backoff {
            retrying = retrying.with_backoff_unit(unit);
        }
        let llm: Arc<dyn LlmProvider> = Arc::new(retrying);

        let chunker = self.chunker.unwrap_or_else(|| {
            Arc::new(BoundaryChunker::new(config.chunk_size, config.chunk_overlap))
        });
        let documents =
            self.documents.unwrap_or_else(|| Arc::new(InMemoryDocumentRepository::new()));
        let objects =
            self.objects.unwrap_or_else(|| Arc::new(LocalObjectStore::new(DEFAULT_UPLOAD_DIR)));
        let cache_store = self.cache_store.unwrap_or_else(|| Arc::new(InMemoryCacheStore::new()));

        let cache = Arc::new(
            ResponseCache::new(cache_store, config.cache_ttl_secs)
                .with_enabled(config.cache_enabled),
        );
        let writer =
            CacheWriter::spawn(Arc::clone(&cache), config.cache_workers, config.cache_queue_capacity);
        let embeddings = Arc::new(chain);

        let ingestor = Ingestor::new(
            chunker,
            Arc::clone(&embeddings),
            Arc::clone(&index),
            Arc::clone(&documents),
            Arc::clone(&objects),
            extractor,
            Arc::clone(&cache),
        );

        let summarizer = Summarizer::new(Arc::clone(&llm))
            .with_threshold(config.summary_threshold)
            .with_max_tokens(config.llm_max_tokens);
        let combiner = PassageCombiner::new(config.max_passages, config.context_max_tokens)
            .with_snippet_context(config.snippet_context);
        let composer = ResponseComposer::new(
            Retriever::new(Arc::clone(&embeddings), Arc::clone(&index)),
            llm,
            summarizer,
            combiner,
            Arc::clone(&cache),
            ComposerSettings {
                top_k: config.top_k,
                similarity_threshold: config.similarity_threshold,
                max_tokens: Some(config.llm_max_tokens),
            },
        );

        info!(
            providers = ?embeddings.provider_names(),
            dimension = embeddings.dimensions(),
            cache_enabled = config.cache_enabled,
            "pipeline ready"
        );

        Ok(RagPipeline {
            config,
            ingestor,
            composer,
            index,
            documents,
            objects,
            cache,
            writer,
            embeddings,
        })
    }
}

#[cfg(feature = "pdf")]
fn default_extractor() -> Result<Arc<dyn PageExtractor>> {
    Ok(Arc::new(crate::parser::PdfExtractor::new()))
}

#[cfg(not(feature = "pdf"))]
fn default_extractor() -> Result<Arc<dyn PageExtractor>> {
    Err(RagError::ConfigError("page_extractor is required without the `pdf` feature".into()))
}
