//! Data types for documents, chunks, search results and query results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RagError;

/// A bounded slice of one page's text, the atomic unit of indexing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the chunk within its page, starting at 0.
    pub chunk_index: usize,
    /// 1-based page the chunk was cut from.
    pub page_number: u32,
    /// Trimmed chunk text.
    pub content: String,
}

/// A [`Chunk`] as recorded on its [`Document`] once it has been embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkRecord {
    /// Position of the chunk within its page.
    pub chunk_index: usize,
    /// 1-based page the chunk was cut from.
    pub page_number: u32,
    /// Trimmed chunk text.
    pub content: String,
    /// Id of the chunk's vector in the index.
    pub embedding_id: String,
}

/// An uploaded document and the chunks extracted from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Registry-assigned identifier.
    pub id: u64,
    /// Sanitized file name of the upload.
    pub filename: String,
    /// Location of the stored file.
    pub path: String,
    /// Document title.
    pub title: String,
    /// Number of pages in the source file.
    pub page_count: usize,
    /// Embedded chunks, in page order.
    pub chunks: Vec<ChunkRecord>,
    /// True once every chunk has been embedded and stored.
    pub indexed: bool,
}

/// Metadata stored alongside every indexed vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    /// The [`Document`] the chunk belongs to.
    pub document_id: u64,
    /// Title of that document.
    pub document_title: String,
    /// Chunk text.
    pub content: String,
    /// 1-based page the chunk was cut from.
    pub page_number: u32,
    /// Position of the chunk within its page.
    pub chunk_index: usize,
}

/// A vector stored in the index together with its metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedVector {
    /// Unique, never reused identifier.
    pub embedding_id: String,
    /// The embedding.
    pub vector: Vec<f32>,
    /// What the embedding represents.
    pub metadata: ChunkMetadata,
}

/// One nearest neighbour returned for a query vector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    /// Id of the matched vector.
    pub embedding_id: String,
    /// Raw similarity in `[-1, 1]`.
    pub distance: f32,
    /// Normalized similarity `(1 + distance) / 2`, in `[0, 1]`.
    pub score: f32,
    /// Metadata of the matched vector.
    pub metadata: ChunkMetadata,
}

/// Caller-specified verbosity of the answer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    /// Concise bullet points.
    Short,
    /// Balanced answer.
    #[default]
    Medium,
    /// Comprehensive, structured answer.
    Detailed,
}

impl DetailLevel {
    /// The wire name of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Short => "short",
            DetailLevel::Medium => "medium",
            DetailLevel::Detailed => "detailed",
        }
    }
}

impl fmt::Display for DetailLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DetailLevel {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Ok(DetailLevel::Short),
            "medium" => Ok(DetailLevel::Medium),
            "detailed" => Ok(DetailLevel::Detailed),
            other => Err(RagError::InvalidInput(format!(
                "unknown detail_level '{other}' (expected short, medium or detailed)"
            ))),
        }
    }
}

/// How the response text of a [`QueryResult`] was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Top retrieved chunk returned as-is (modulo the leading-fragment trim).
    Direct,
    /// Top retrieved chunk condensed by the LLM.
    Summarized,
    /// LLM answer grounded in the merged top passages.
    Enhanced,
    /// LLM answer without any retrieved context.
    Fallback,
    /// Served from the response cache.
    Cache,
}

/// A query as received from the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryRequest {
    /// The natural-language question.
    #[serde(default)]
    pub query: String,
    /// Requested verbosity; defaults to `medium`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_level: Option<String>,
    /// Any further parameters; they take part in the cache key.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl QueryRequest {
    /// Create a request with the default detail level.
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), ..Default::default() }
    }

    /// Set the detail level.
    pub fn with_detail_level(mut self, level: DetailLevel) -> Self {
        self.detail_level = Some(level.as_str().to_string());
        self
    }

    /// Add an extra parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// The answer to one query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    /// The query as asked.
    pub query: String,
    /// Retrieved passages above the similarity threshold, best first.
    pub results: Vec<SearchResult>,
    /// Whether an LLM produced (part of) the response.
    pub used_llm: bool,
    /// Verbosity the response was shaped for.
    pub detail_level: DetailLevel,
    /// The answer text.
    pub response: String,
    /// How the answer was produced.
    pub response_type: ResponseType,
    /// Embedding provider that embedded the query, when retrieval ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn detail_level_parses_case_insensitively() {
        assert_eq!("Short".parse::<DetailLevel>().unwrap(), DetailLevel::Short);
        assert_eq!(" detailed ".parse::<DetailLevel>().unwrap(), DetailLevel::Detailed);
        assert!("verbose".parse::<DetailLevel>().is_err());
    }

    #[test]
    fn query_request_keeps_unknown_fields_as_extra() {
        let request: QueryRequest = serde_json::from_value(json!({
            "query": "what is a chunk?",
            "detail_level": "short",
            "lang": "en"
        }))
        .unwrap();
        assert_eq!(request.detail_level.as_deref(), Some("short"));
        assert_eq!(request.extra.get("lang"), Some(&json!("en")));
        assert!(!request.extra.contains_key("query"));
    }

    #[test]
    fn response_type_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ResponseType::Summarized).unwrap(), json!("summarized"));
        assert_eq!(serde_json::to_value(DetailLevel::Medium).unwrap(), json!("medium"));
    }
}
