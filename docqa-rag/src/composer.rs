//! Turning one query into one answer.
//!
//! [`ResponseComposer::compose`] walks a fixed sequence: cache check,
//! retrieval, decision, then exactly one of the direct, summarized, enhanced
//! or fallback responders.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::cache::{ResponseCache, cache_key};
use crate::combiner::PassageCombiner;
use crate::document::{DetailLevel, QueryResult, ResponseType, SearchResult};
use crate::error::Result;
use crate::llm::{GenerationRequest, LlmProvider};
use crate::rephrase::Rephraser;
use crate::retriever::{Retriever, needs_llm};
use crate::summarize::Summarizer;

/// Temperature for answers grounded in retrieved context.
pub const ENHANCED_TEMPERATURE: f32 = 0.3;

/// Temperature for answers without context.
pub const FALLBACK_TEMPERATURE: f32 = 0.7;

const ENHANCED_INSTRUCTION: &str = "You are a helpful assistant that provides accurate answers based on the given context. \
     Answer the query using only the information provided in the context. \
     If the context doesn't contain relevant information, admit that you don't know.";

const FACTUAL_INSTRUCTION: &str =
    "Keep your answer factual and avoid adding information not present in the context.";

const CONDENSE_GUIDANCE: &str =
    "The context is long, so condense it to the points that answer the query.";

const PLAIN_LANGUAGE_GUIDANCE: &str =
    "The context is hard to read, so restate it in plain language.";

const FALLBACK_INSTRUCTION: &str = "You are a helpful assistant. The user has asked a question about a document, \
     but we couldn't find any relevant information in our database. \
     Politely explain that you don't have specific information about their query, \
     but offer general advice or suggestions about their topic if possible.";

/// Retrieval and generation settings of a [`ResponseComposer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComposerSettings {
    /// Neighbours requested from the index.
    pub top_k: usize,
    /// Minimum score a retrieved chunk must reach.
    pub similarity_threshold: f32,
    /// Token cap passed to every LLM call.
    pub max_tokens: Option<u32>,
}

impl Default for ComposerSettings {
    fn default() -> Self {
        Self { top_k: 5, similarity_threshold: 0.7, max_tokens: Some(500) }
    }
}

/// The answer to a query together with the cache key it belongs under.
#[derive(Debug, Clone, PartialEq)]
pub struct Composed {
    /// The answer.
    pub result: QueryResult,
    /// Cache key of the query.
    pub cache_key: String,
    /// Cache generation observed before retrieval.
    pub generation: u64,
}

impl Composed {
    /// Whether the answer was served from the cache.
    pub fn from_cache(&self) -> bool {
        self.result.response_type == ResponseType::Cache
    }
}

/// Drop a leading sentence fragment from a chunk that starts mid-sentence.
///
/// If `content` starts with a lowercase letter and its first `.`, `?` or `!`
/// lies within the first quarter of its characters, everything up to and
/// including that terminator is removed and the rest is trimmed.
pub fn trim_leading_fragment(content: &str) -> String {
    let starts_lower = content.chars().next().is_some_and(char::is_lowercase);
    if !starts_lower {
        return content.to_string();
    }
    let quarter = content.chars().count() / 4;
    match content.char_indices().enumerate().find(|(_, (_, c))| matches!(c, '.' | '?' | '!')) {
        Some((char_pos, (byte_pos, c))) if char_pos < quarter => {
            content[byte_pos + c.len_utf8()..].trim().to_string()
        }
        _ => content.to_string(),
    }
}

/// The system instruction for a context-grounded answer.
pub fn enhanced_instruction(level: DetailLevel, condense: bool, plain_language: bool) -> String {
    let mut instruction = format!(
        "{ENHANCED_INSTRUCTION} Format your answer according to the detail level: {level} \
         (short: concise bullet points, medium: balanced answer, detailed: comprehensive explanation)."
    );
    if condense {
        instruction.push(' ');
        instruction.push_str(CONDENSE_GUIDANCE);
    }
    if plain_language {
        instruction.push(' ');
        instruction.push_str(PLAIN_LANGUAGE_GUIDANCE);
    }
    instruction.push(' ');
    instruction.push_str(FACTUAL_INSTRUCTION);
    instruction
}

/// Answers queries from the index, the LLM and the response cache.
#[derive(Clone)]
pub struct ResponseComposer {
    retriever: Retriever,
    llm: Arc<dyn LlmProvider>,
    summarizer: Summarizer,
    combiner: PassageCombiner,
    cache: Arc<ResponseCache>,
    settings: ComposerSettings,
}

impl ResponseComposer {
    /// Create a composer.
    ///
    /// `llm` should already carry its retry policy.
    pub fn new(
        retriever: Retriever,
        llm: Arc<dyn LlmProvider>,
        summarizer: Summarizer,
        combiner: PassageCombiner,
        cache: Arc<ResponseCache>,
        settings: ComposerSettings,
    ) -> Self {
        Self { retriever, llm, summarizer, combiner, cache, settings }
    }

    /// Answer `query`.
    ///
    /// Cache hits return immediately. Retrieval and LLM failures are
    /// returned as errors; cache failures never are. The caller decides
    /// whether to store the answer.
    pub async fn compose(
        &self,
        query: &str,
        detail_level: DetailLevel,
        extra: &Map<String, Value>,
    ) -> Result<Composed> {
        let key = cache_key(query, detail_level, extra);
        let generation = self.cache.generation();
        if let Some(result) = self.cache.get(&key).await {
            debug!(query, "answered from cache");
            return Ok(Composed { result, cache_key: key, generation });
        }

        let retrieval = self
            .retriever
            .retrieve(query, self.settings.top_k, self.settings.similarity_threshold)
            .await?;
        let results = retrieval.results;

        // The retrieval verdict, also for summarized direct answers.
        let used_llm = needs_llm(&results);
        let (response, response_type) = if results.is_empty() {
            (self.fallback(query).await?, ResponseType::Fallback)
        } else if !used_llm {
            self.direct(&results[0], detail_level).await?
        } else {
            (self.enhanced(&results, query, detail_level).await?, ResponseType::Enhanced)
        };

        info!(
            response_type = ?response_type,
            result_count = results.len(),
            used_llm,
            provider = %retrieval.provider,
            "query answered"
        );

        Ok(Composed {
            result: QueryResult {
                query: query.to_string(),
                results,
                used_llm,
                detail_level,
                response,
                response_type,
                embedding_provider: Some(retrieval.provider),
            },
            cache_key: key,
            generation,
        })
    }

    async fn direct(
        &self,
        best: &SearchResult,
        detail_level: DetailLevel,
    ) -> Result<(String, ResponseType)> {
        let content = &best.metadata.content;
        if self.summarizer.needs_summary(content) && detail_level != DetailLevel::Detailed {
            let summary = self.summarizer.summarize(content, detail_level).await?;
            return Ok((summary, ResponseType::Summarized));
        }
        Ok((trim_leading_fragment(content), ResponseType::Direct))
    }

    async fn enhanced(
        &self,
        results: &[SearchResult],
        query: &str,
        detail_level: DetailLevel,
    ) -> Result<String> {
        let context = self.combiner.combine(results, query);
        let condense = self.summarizer.needs_summary(&context);
        let plain_language = Rephraser::needs_rephrasing(&context);
        debug!(context_len = context.len(), condense, plain_language, "generating enhanced answer");

        let request = GenerationRequest::new(format!("Query: {query}\n\nContext:\n{context}"))
            .with_system_instruction(enhanced_instruction(detail_level, condense, plain_language))
            .with_temperature(ENHANCED_TEMPERATURE);
        self.generate(request).await
    }

    async fn fallback(&self, query: &str) -> Result<String> {
        let request = GenerationRequest::new(format!("I need information about: {query}"))
            .with_system_instruction(FALLBACK_INSTRUCTION)
            .with_temperature(FALLBACK_TEMPERATURE);
        self.generate(request).await
    }

    async fn generate(&self, mut request: GenerationRequest) -> Result<String> {
        request.max_tokens = self.settings.max_tokens;
        self.llm.generate(&request).await
    }
}
