use std::sync::Arc;

use anyhow::Context;
use docqa_rag::{
    CacheStore, EmbeddingProvider, FlatVectorIndex, GeminiEmbeddingProvider, GeminiLlmProvider,
    HashingEmbeddingProvider, InMemoryCacheStore, LlmProvider, LocalObjectStore,
    OpenAIChatProvider, OpenAIEmbeddingProvider, RagPipeline, SqliteCacheStore,
};
use tracing::info;

use crate::settings::{EmbeddingBackend, LlmBackend, Settings};

/// Gemini's native embedding size.
const GEMINI_NATIVE_DIMENSION: usize = 768;

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RagPipeline>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(pipeline: Arc<RagPipeline>) -> Self {
        Self { pipeline }
    }

    /// Build the pipeline described by `settings`.
    ///
    /// Must run inside a Tokio runtime.
    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let dimension = settings.rag.embedding_dimension;

        let mut builder = RagPipeline::builder().config(settings.rag.clone());
        for backend in &settings.embedding_providers {
            builder = builder.embedding_provider(embedding_provider(*backend, settings)?);
        }

        let index_dir = settings.data_dir.join("index");
        let index = FlatVectorIndex::open(&index_dir, dimension).await;
        info!(dir = %index_dir.display(), dimension, "vector index opened");

        let cache_store: Arc<dyn CacheStore> = match &settings.cache_database_url {
            Some(url) => Arc::new(
                SqliteCacheStore::connect(url)
                    .await
                    .with_context(|| format!("failed to open cache database {url}"))?,
            ),
            None => Arc::new(InMemoryCacheStore::new()),
        };

        let pipeline = builder
            .vector_index(Arc::new(index))
            .llm(llm_provider(settings)?)
            .object_store(Arc::new(LocalObjectStore::new(settings.data_dir.join("uploads"))))
            .cache_store(cache_store)
            .build()
            .context("failed to build the question-answering pipeline")?;

        Ok(Self::new(Arc::new(pipeline)))
    }
}

fn embedding_provider(
    backend: EmbeddingBackend,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    let dimension = settings.rag.embedding_dimension;
    let require_key = |key: &Option<String>, name: &str| {
        key.clone().with_context(|| format!("{name} embeddings need an API key"))
    };
    let provider: Arc<dyn EmbeddingProvider> = match backend {
        EmbeddingBackend::Gemini => {
            let key = require_key(&settings.gemini_api_key, "gemini")?;
            let mut provider = GeminiEmbeddingProvider::new(key)?;
            if dimension != GEMINI_NATIVE_DIMENSION {
                provider = provider.with_output_dimensionality(dimension);
            }
            Arc::new(provider)
        }
        EmbeddingBackend::OpenAi => Arc::new(
            OpenAIEmbeddingProvider::new(require_key(&settings.openai_api_key, "openai")?)?
                .with_dimensions(dimension),
        ),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbeddingProvider::new(dimension)),
    };
    Ok(provider)
}

fn llm_provider(settings: &Settings) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match settings.llm_provider {
        LlmBackend::Gemini => {
            let key = settings.gemini_api_key.clone().context("the gemini LLM needs an API key")?;
            let mut provider = GeminiLlmProvider::new(key)?;
            if let Some(model) = &settings.llm_model {
                provider = provider.with_model(model);
            }
            Arc::new(provider)
        }
        LlmBackend::OpenAi => {
            let key = settings.openai_api_key.clone().context("the openai LLM needs an API key")?;
            let mut provider = OpenAIChatProvider::new(key)?;
            if let Some(model) = &settings.llm_model {
                provider = provider.with_model(model);
            }
            Arc::new(provider)
        }
    };
    Ok(provider)
}
