//! End-to-end tests of the pipeline with deterministic collaborators.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docqa_rag::cache::{CacheStore, InMemoryCacheStore};
use docqa_rag::parser::{PageExtractor, ParsedPdf, number_pages, title_from_file_name};
use docqa_rag::{
    DetailLevel, FlatVectorIndex, GenerationRequest, HashingEmbeddingProvider, LlmProvider,
    LocalObjectStore, QueryRequest, RagConfig, RagError, RagPipeline, ResponseType, Result,
};
use serde_json::json;

const DIM: usize = 512;

const RETRIEVAL_PAGE: &str =
    "Retrieval systems split documents into chunks before embedding them for search.";
const BAKING_PAGE: &str =
    "Sourdough bread needs a lively starter, patience, and a very hot oven to bake well.";

/// Reads "PDF" bytes as UTF-8 text with pages separated by form feeds.
struct TextPages;

#[async_trait]
impl PageExtractor for TextPages {
    async fn extract(&self, bytes: Vec<u8>, file_name: &str) -> Result<ParsedPdf> {
        let text = String::from_utf8(bytes).map_err(|e| RagError::ParseError(e.to_string()))?;
        let pages = number_pages(text.split('\x0c').map(str::to_string).collect());
        Ok(ParsedPdf { title: title_from_file_name(file_name), page_count: pages.len(), pages })
    }
}

/// Answers every request with a fixed text and records what it was asked.
#[derive(Default)]
struct ScriptedLlm {
    requests: Mutex<Vec<GenerationRequest>>,
    failure: Option<&'static str>,
}

impl ScriptedLlm {
    fn failing(message: &'static str) -> Self {
        Self { requests: Mutex::new(Vec::new()), failure: Some(message) }
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match self.failure {
            Some(message) => {
                Err(RagError::LlmError { provider: "scripted".into(), message: message.into() })
            }
            None => Ok("generated answer".into()),
        }
    }
}

struct BrokenCache;

#[async_trait]
impl CacheStore for BrokenCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Err(RagError::CacheError("unreachable".into()))
    }
    async fn put(&self, _key: &str, _value: &str, _ttl: u64) -> Result<()> {
        Err(RagError::CacheError("unreachable".into()))
    }
    async fn invalidate_all(&self) -> Result<usize> {
        Err(RagError::CacheError("unreachable".into()))
    }
    async fn purge_expired(&self) -> Result<usize> {
        Err(RagError::CacheError("unreachable".into()))
    }
}

/// Stores entries like [`InMemoryCacheStore`] but takes a while to write them.
#[derive(Default)]
struct SlowCache {
    inner: InMemoryCacheStore,
}

#[async_trait]
impl CacheStore for SlowCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(key).await
    }
    async fn put(&self, key: &str, value: &str, ttl: u64) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(200)).await;
        self.inner.put(key, value, ttl).await
    }
    async fn invalidate_all(&self) -> Result<usize> {
        self.inner.invalidate_all().await
    }
    async fn purge_expired(&self) -> Result<usize> {
        self.inner.purge_expired().await
    }
}

struct Harness {
    pipeline: RagPipeline,
    llm: Arc<ScriptedLlm>,
    dir: tempfile::TempDir,
}

fn config() -> RagConfig {
    RagConfig::builder()
        .embedding_dimension(DIM)
        .similarity_threshold(0.55)
        .summary_threshold(1000)
        .build()
        .unwrap()
}

fn harness_with(config: RagConfig, llm: ScriptedLlm, cache: Option<Arc<dyn CacheStore>>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let llm = Arc::new(llm);
    let mut builder = RagPipeline::builder()
        .config(config)
        .embedding_provider(Arc::new(HashingEmbeddingProvider::new(DIM)))
        .vector_index(Arc::new(FlatVectorIndex::in_memory(DIM)))
        .llm(llm.clone())
        .retry_backoff(Duration::from_millis(1))
        .object_store(Arc::new(LocalObjectStore::new(dir.path().join("uploads"))))
        .page_extractor(Arc::new(TextPages));
    if let Some(store) = cache {
        builder = builder.cache_store(store);
    }
    Harness { pipeline: builder.build().unwrap(), llm, dir }
}

fn harness() -> Harness {
    harness_with(config(), ScriptedLlm::default(), None)
}

#[tokio::test]
async fn empty_corpus_falls_back_to_llm() {
    let h = harness();
    let result = h.pipeline.answer(QueryRequest::new("What is a vector index?")).await.unwrap();

    assert_eq!(result.response_type, ResponseType::Fallback);
    assert!(result.used_llm);
    assert!(result.results.is_empty());
    assert_eq!(result.response, "generated answer");
    assert_eq!(result.embedding_provider.as_deref(), Some("hashing"));

    let requests = h.llm.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].temperature, 0.7);
    assert_eq!(requests[0].prompt, "I need information about: What is a vector index?");
    assert!(requests[0].system_instruction.as_deref().unwrap().contains("couldn't find"));
}

#[tokio::test]
async fn exact_match_is_answered_directly() {
    let h = harness();
    h.pipeline.ingest_upload("retrieval.pdf", RETRIEVAL_PAGE.as_bytes()).await.unwrap();
    h.pipeline.ingest_upload("baking.pdf", BAKING_PAGE.as_bytes()).await.unwrap();

    let result = h.pipeline.answer(QueryRequest::new(RETRIEVAL_PAGE)).await.unwrap();

    assert_eq!(result.response_type, ResponseType::Direct);
    assert!(!result.used_llm);
    assert_eq!(result.response, RETRIEVAL_PAGE);
    assert!(result.results[0].score > 0.9);
    assert_eq!(result.results[0].metadata.document_title, "retrieval");
    assert!(h.llm.requests().is_empty());
}

#[tokio::test]
async fn long_direct_match_is_summarized_unless_detailed() {
    let config = RagConfig::builder()
        .embedding_dimension(DIM)
        .similarity_threshold(0.55)
        .summary_threshold(60)
        .build()
        .unwrap();
    let h = harness_with(config, ScriptedLlm::default(), None);
    h.pipeline.ingest_upload("retrieval.pdf", RETRIEVAL_PAGE.as_bytes()).await.unwrap();

    let short = h
        .pipeline
        .answer(QueryRequest::new(RETRIEVAL_PAGE).with_detail_level(DetailLevel::Short))
        .await
        .unwrap();
    assert_eq!(short.response_type, ResponseType::Summarized);
    // A confident match counts as answered from the documents, summarized or not.
    assert!(!short.used_llm);
    assert_eq!(short.detail_level, DetailLevel::Short);
    let requests = h.llm.requests();
    assert!(requests[0].system_instruction.as_deref().unwrap().contains("under 100 words"));
    assert_eq!(requests[0].temperature, 0.3);

    let detailed = h
        .pipeline
        .answer(QueryRequest::new(RETRIEVAL_PAGE).with_detail_level(DetailLevel::Detailed))
        .await
        .unwrap();
    assert_eq!(detailed.response_type, ResponseType::Direct);
    assert!(!detailed.used_llm);
    assert_eq!(detailed.response, RETRIEVAL_PAGE);
}

#[tokio::test]
async fn partial_match_is_enhanced_with_tagged_context() {
    let h = harness();
    h.pipeline.ingest_upload("retrieval.pdf", RETRIEVAL_PAGE.as_bytes()).await.unwrap();
    h.pipeline.ingest_upload("baking.pdf", BAKING_PAGE.as_bytes()).await.unwrap();

    let result = h
        .pipeline
        .answer(QueryRequest::new("How do retrieval systems split documents?"))
        .await
        .unwrap();

    assert_eq!(result.response_type, ResponseType::Enhanced);
    assert!(result.used_llm);
    assert_eq!(result.results[0].metadata.document_title, "retrieval");
    assert!(result.results[0].score <= 0.9);

    let requests = h.llm.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.temperature, 0.3);
    assert_eq!(request.max_tokens, Some(500));
    assert!(request.prompt.starts_with("Query: How do retrieval systems split documents?"));
    assert!(request.prompt.contains("[Source: retrieval, Page: 1] "));
    assert!(request.system_instruction.as_deref().unwrap().contains("detail level: medium"));
}

#[tokio::test]
async fn cached_answer_is_identical_and_tagged() {
    let h = harness();
    let request = QueryRequest::new("What is sourdough?").with_param("source", json!("web"));
    let first = h.pipeline.answer(request.clone()).await.unwrap();
    assert_eq!(first.response_type, ResponseType::Fallback);

    // Drain the background cache writes.
    h.pipeline.shutdown().await;

    let second = h.pipeline.answer(request.clone()).await.unwrap();
    assert_eq!(second.response_type, ResponseType::Cache);
    assert_eq!(second.response, first.response);
    assert_eq!(h.llm.requests().len(), 1);

    // Different params are a different key.
    let other = h.pipeline.answer(QueryRequest::new("What is sourdough?")).await.unwrap();
    assert_eq!(other.response_type, ResponseType::Fallback);

    let stats = h.pipeline.stats().await.unwrap();
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.cache_misses, 2);
}

#[tokio::test]
async fn ingestion_invalidates_cached_answers() {
    let h = harness();
    let first = h.pipeline.answer(QueryRequest::new("anything")).await.unwrap();
    assert_eq!(first.response_type, ResponseType::Fallback);
    h.pipeline.shutdown().await;

    let cached = h.pipeline.answer(QueryRequest::new("anything")).await.unwrap();
    assert_eq!(cached.response_type, ResponseType::Cache);

    h.pipeline.ingest_upload("baking.pdf", BAKING_PAGE.as_bytes()).await.unwrap();
    let after = h.pipeline.answer(QueryRequest::new("anything")).await.unwrap();
    assert_ne!(after.response_type, ResponseType::Cache);
}

#[tokio::test]
async fn pending_cache_write_does_not_survive_ingestion() {
    let h = harness_with(config(), ScriptedLlm::default(), Some(Arc::new(SlowCache::default())));
    let before = h.pipeline.answer(QueryRequest::new("anything")).await.unwrap();
    assert_eq!(before.response_type, ResponseType::Fallback);

    // The write of `before` is still queued or sleeping in the store.
    h.pipeline.ingest_upload("baking.pdf", BAKING_PAGE.as_bytes()).await.unwrap();
    h.pipeline.shutdown().await;

    let after = h.pipeline.answer(QueryRequest::new("anything")).await.unwrap();
    assert_ne!(after.response_type, ResponseType::Cache);
}

#[tokio::test]
async fn documents_are_registered_and_deleted() {
    let h = harness();
    let pages = format!("{RETRIEVAL_PAGE}\x0cshort\x0c{BAKING_PAGE}");
    let document = h.pipeline.ingest_upload("mixed notes.pdf", pages.as_bytes()).await.unwrap();

    assert_eq!(document.id, 1);
    assert_eq!(document.filename, "mixed_notes.pdf");
    assert_eq!(document.title, "mixed_notes");
    assert_eq!(document.page_count, 3);
    assert!(document.indexed);
    let pages: Vec<u32> = document.chunks.iter().map(|c| c.page_number).collect();
    // Each page yields its full sentence plus the overlapping tail window.
    assert_eq!(pages, vec![1, 1, 3, 3]);
    assert_eq!(document.chunks[1].embedding_id, "1");
    assert_eq!(document.chunks[2].embedding_id, "2");

    let stats = h.pipeline.stats().await.unwrap();
    assert_eq!((stats.documents_count, stats.indexed_vectors), (1, 4));
    assert_eq!(h.pipeline.documents().await.unwrap().len(), 1);
    assert_eq!(h.pipeline.document(1).await.unwrap().title, "mixed_notes");

    h.pipeline.delete_document(1).await.unwrap();
    let stats = h.pipeline.stats().await.unwrap();
    assert_eq!((stats.documents_count, stats.indexed_vectors), (0, 0));
    assert!(!Path::new(&document.path).exists());

    assert!(matches!(h.pipeline.document(1).await, Err(RagError::NotFound(_))));
    assert!(matches!(h.pipeline.delete_document(1).await, Err(RagError::NotFound(_))));
}

#[tokio::test]
async fn document_without_usable_text_is_still_indexed() {
    let h = harness();
    let document = h.pipeline.ingest_upload("scan.pdf", b"tiny").await.unwrap();
    assert!(document.indexed);
    assert!(document.chunks.is_empty());
    assert_eq!(h.pipeline.stats().await.unwrap().indexed_vectors, 0);
}

#[tokio::test]
async fn invalid_input_is_rejected_without_side_effects() {
    let h = harness();

    let err = h.pipeline.ingest_upload("notes.txt", b"plain").await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
    let err = h.pipeline.ingest_file(Path::new("/tmp/notes.docx")).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));

    let err = h.pipeline.answer(QueryRequest::new("   ")).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));

    let mut bad_level = QueryRequest::new("question");
    bad_level.detail_level = Some("verbose".into());
    let err = h.pipeline.answer(bad_level).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));

    assert_eq!(h.pipeline.stats().await.unwrap().documents_count, 0);
    assert!(h.llm.requests().is_empty());
}

#[tokio::test]
async fn failed_uploads_leave_no_stored_file() {
    let h = harness();
    let uploads = h.dir.path().join("uploads");

    let err = h.pipeline.ingest_upload("..pdf", RETRIEVAL_PAGE.as_bytes()).await.unwrap_err();
    assert!(matches!(err, RagError::InvalidInput(_)));
    assert!(!uploads.join("pdf").exists());

    // Not UTF-8, so page extraction fails after the file was stored.
    let err = h.pipeline.ingest_upload("broken.pdf", &[0xff, 0xfe, 0xfd]).await.unwrap_err();
    assert!(matches!(err, RagError::ParseError(_)));
    assert!(!uploads.join("broken.pdf").exists());

    let stats = h.pipeline.stats().await.unwrap();
    assert_eq!((stats.documents_count, stats.indexed_vectors), (0, 0));
}

#[tokio::test]
async fn llm_failures_are_retried_then_surfaced() {
    let failing = ScriptedLlm::failing("503 Service Unavailable");
    let h = harness_with(config(), failing, None);

    let err = h.pipeline.answer(QueryRequest::new("anything")).await.unwrap_err();
    assert!(matches!(err, RagError::LlmError { .. }));
    assert_eq!(h.llm.requests().len(), 2);
}

#[tokio::test]
async fn cache_failures_never_fail_a_query() {
    let h = harness_with(config(), ScriptedLlm::default(), Some(Arc::new(BrokenCache)));
    h.pipeline.ingest_upload("retrieval.pdf", RETRIEVAL_PAGE.as_bytes()).await.unwrap();

    let result = h.pipeline.answer(QueryRequest::new(RETRIEVAL_PAGE)).await.unwrap();
    assert_eq!(result.response_type, ResponseType::Direct);
    h.pipeline.shutdown().await;
}

#[tokio::test]
async fn ingestion_and_queries_are_logged_with_fields() {
    use tracing_subscriber::layer::SubscriberExt;

    let log = docqa_telemetry::EventLog::new();
    let subscriber =
        tracing_subscriber::registry().with(docqa_telemetry::CaptureLayer::new(log.clone()));
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = harness();
    h.pipeline.ingest_upload("retrieval.pdf", RETRIEVAL_PAGE.as_bytes()).await.unwrap();
    h.pipeline.answer(QueryRequest::new(RETRIEVAL_PAGE)).await.unwrap();

    let indexed = log.find("document indexed").unwrap();
    assert_eq!(indexed.level, "INFO");
    assert_eq!(indexed.field("document.id").as_deref(), Some("1"));
    assert_eq!(indexed.field("chunk_count").as_deref(), Some("2"));

    let answered = log.find("query answered").unwrap();
    assert_eq!(answered.field("response_type").as_deref(), Some("Direct"));
    assert_eq!(answered.field("provider").as_deref(), Some("hashing"));
    assert_eq!(answered.field("used_llm").as_deref(), Some("false"));
}
