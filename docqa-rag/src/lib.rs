//! # docqa-rag
//!
//! Retrieval-augmented question answering over uploaded PDF documents.
//!
//! ## Overview
//!
//! Documents are split into page chunks, embedded, and stored in a vector
//! index. A query is embedded, matched against the index, and answered in one
//! of four ways:
//!
//! - **direct** – a single high-confidence chunk is returned as is
//! - **summarized** – that chunk is long and is condensed by the LLM
//! - **enhanced** – the best passages are merged and the LLM answers from them
//! - **fallback** – nothing relevant was found and the LLM gives general guidance
//!
//! Answers are cached by query and parameters; the cache is cleared whenever
//! the corpus changes.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docqa_rag::{FlatVectorIndex, HashingEmbeddingProvider, QueryRequest, RagConfig, RagPipeline};
//!
//! let config = RagConfig::default();
//! let pipeline = RagPipeline::builder()
//!     .embedding_provider(Arc::new(HashingEmbeddingProvider::new(config.embedding_dimension)))
//!     .vector_index(Arc::new(FlatVectorIndex::open("data/index", config.embedding_dimension).await))
//!     .llm(llm)
//!     .config(config)
//!     .build()?;
//!
//! pipeline.ingest_upload("manual.pdf", &bytes).await?;
//! let answer = pipeline.answer(QueryRequest::new("How do I reset the device?")).await?;
//! println!("{} ({:?})", answer.response, answer.response_type);
//! ```
//!
//! ## Features
//!
//! | feature | enables |
//! |---------|---------|
//! | `pdf` (default) | [`PdfExtractor`] |
//! | `gemini` | Gemini embedding and generation providers |
//! | `openai` | OpenAI embedding and chat providers |
//! | `sqlite` | a persistent SQLite cache store |

pub mod cache;
pub mod cache_writer;
pub mod chunking;
pub mod combiner;
pub mod composer;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod flat;
pub mod ingest;
pub mod llm;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod rephrase;
pub mod retriever;
pub mod storage;
pub mod summarize;
pub mod vectorstore;

#[cfg(feature = "gemini")]
pub mod gemini;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cache::{CacheEntry, CacheStats, CacheStore, InMemoryCacheStore, ResponseCache, cache_key};
pub use cache_writer::CacheWriter;
pub use chunking::{BoundaryChunker, Chunker};
pub use combiner::{PassageCombiner, extract_snippets, truncate_for_llm};
pub use composer::{Composed, ComposerSettings, ResponseComposer};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{
    Chunk, ChunkMetadata, ChunkRecord, DetailLevel, Document, IndexedVector, QueryRequest,
    QueryResult, ResponseType, SearchResult,
};
pub use embedding::{ChainOutput, EmbeddingChain, EmbeddingProvider, HashingEmbeddingProvider};
pub use error::{RagError, Result};
pub use flat::FlatVectorIndex;
pub use ingest::Ingestor;
pub use llm::{GenerationRequest, LlmProvider, RetryingLlm};
#[cfg(feature = "pdf")]
pub use parser::PdfExtractor;
pub use parser::{PageExtractor, PageText, ParsedPdf};
pub use pipeline::{PipelineStats, RagPipeline, RagPipelineBuilder};
pub use registry::{DocumentRepository, InMemoryDocumentRepository, NewDocument};
pub use rephrase::Rephraser;
pub use retriever::{Retrieval, Retriever, needs_llm};
pub use storage::{LocalObjectStore, ObjectStore};
pub use summarize::Summarizer;
pub use vectorstore::VectorIndex;

#[cfg(feature = "gemini")]
pub use gemini::{GeminiEmbeddingProvider, GeminiLlmProvider};

#[cfg(feature = "openai")]
pub use openai::{OpenAIChatProvider, OpenAIEmbeddingProvider};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCacheStore;
