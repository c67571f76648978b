//! Exact (flat) vector index persisted to disk.
//!
//! This module provides [`FlatVectorIndex`], a brute-force cosine-similarity
//! index whose state is protected by a `tokio::sync::RwLock`. Searches share
//! the read lock; inserts and deletes take the write lock, so a search never
//! observes a half-applied mutation or an in-flight rebuild.
//!
//! Two artifacts are written after every mutation, each through a temporary
//! file and a rename:
//!
//! - `document_index.json`: dimension, id counter, ids and vectors
//! - `metadata.json`: embedding id → [`ChunkMetadata`]
//!
//! Either file may be missing or unreadable at startup; the index then starts
//! from whatever could be recovered and logs a warning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::document::{ChunkMetadata, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorIndex;

const BACKEND: &str = "flat";

/// File name of the persisted vectors.
pub const INDEX_FILE: &str = "document_index.json";
/// File name of the persisted metadata map.
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone)]
struct Row {
    id: u64,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Default)]
struct IndexState {
    /// Ascending by id.
    rows: Vec<Row>,
    metadata: BTreeMap<u64, ChunkMetadata>,
    next_id: u64,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    dimension: usize,
    next_id: u64,
    ids: Vec<u64>,
    vectors: Vec<Vec<f32>>,
}

/// A brute-force vector index using cosine similarity for search.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{FlatVectorIndex, VectorIndex};
///
/// let index = FlatVectorIndex::open("./index", 768).await;
/// let ids = index.insert(vec![embedding], vec![metadata]).await?;
/// ```
#[derive(Debug)]
pub struct FlatVectorIndex {
    dimension: usize,
    dir: Option<PathBuf>,
    state: RwLock<IndexState>,
}

impl FlatVectorIndex {
    /// Create an empty index that is never written to disk.
    pub fn in_memory(dimension: usize) -> Self {
        Self { dimension, dir: None, state: RwLock::new(IndexState::default()) }
    }

    /// Load the index persisted under `dir`, or start empty.
    ///
    /// Unreadable or inconsistent files are not fatal: the affected artifact
    /// is treated as empty and the condition is logged.
    pub async fn open(dir: impl Into<PathBuf>, dimension: usize) -> Self {
        let dir = dir.into();
        let index = load_index(&dir.join(INDEX_FILE), dimension).await;
        let metadata = load_metadata(&dir.join(METADATA_FILE)).await;
        let state = reconcile(index, metadata);
        info!(
            path = %dir.display(),
            vectors = state.rows.len(),
            next_id = state.next_id,
            "vector index loaded"
        );
        Self { dimension, dir: Some(dir), state: RwLock::new(state) }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    async fn persist(&self, state: &IndexState) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        tokio::fs::create_dir_all(dir).await.map_err(store_error)?;

        let index = PersistedIndex {
            dimension: self.dimension,
            next_id: state.next_id,
            ids: state.rows.iter().map(|r| r.id).collect(),
            vectors: state.rows.iter().map(|r| r.vector.clone()).collect(),
        };
        let index_bytes = serde_json::to_vec(&index).map_err(store_error)?;
        let metadata_bytes = serde_json::to_vec(&state.metadata).map_err(store_error)?;

        write_atomic(&dir.join(INDEX_FILE), &index_bytes).await?;
        write_atomic(&dir.join(METADATA_FILE), &metadata_bytes).await?;
        debug!(vectors = state.rows.len(), "vector index persisted");
        Ok(())
    }
}

fn store_error(e: impl std::fmt::Display) -> RagError {
    RagError::VectorStoreError { backend: BACKEND.to_string(), message: e.to_string() }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(store_error)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        tokio::fs::remove_file(&tmp).await.ok();
        return Err(store_error(e));
    }
    Ok(())
}

async fn load_index(path: &Path, dimension: usize) -> Option<PersistedIndex> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read vector index, starting empty");
            return None;
        }
    };
    let parsed = serde_json::from_slice::<PersistedIndex>(&bytes)
        .map_err(|e| RagError::IndexCorruption(e.to_string()))
        .and_then(|index| {
            if index.dimension != dimension {
                return Err(RagError::IndexCorruption(format!(
                    "persisted dimension {} differs from configured {dimension}",
                    index.dimension
                )));
            }
            if index.ids.len() != index.vectors.len()
                || index.vectors.iter().any(|v| v.len() != dimension)
            {
                return Err(RagError::IndexCorruption("ids and vectors disagree".into()));
            }
            Ok(index)
        });
    match parsed {
        Ok(index) => Some(index),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discarding unreadable vector index");
            None
        }
    }
}

async fn load_metadata(path: &Path) -> BTreeMap<u64, ChunkMetadata> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot read index metadata, starting empty");
            return BTreeMap::new();
        }
    };
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "discarding unreadable index metadata");
        BTreeMap::new()
    })
}

/// Keep only ids present in both artifacts and restore the id counter.
fn reconcile(
    index: Option<PersistedIndex>,
    metadata: BTreeMap<u64, ChunkMetadata>,
) -> IndexState {
    let (persisted_next, pairs): (u64, Vec<(u64, Vec<f32>)>) = match index {
        Some(index) => (index.next_id, index.ids.into_iter().zip(index.vectors).collect()),
        None => (0, Vec::new()),
    };

    let highest_seen = pairs
        .iter()
        .map(|(id, _)| *id)
        .chain(metadata.keys().copied())
        .max()
        .map_or(0, |id| id + 1);

    let vector_count = pairs.len();
    let metadata_count = metadata.len();

    let mut rows: Vec<Row> = pairs
        .into_iter()
        .filter(|(id, _)| metadata.contains_key(id))
        .map(|(id, vector)| Row { id, vector })
        .collect();
    rows.sort_by_key(|r| r.id);
    rows.dedup_by_key(|r| r.id);

    let kept: BTreeMap<u64, ChunkMetadata> = metadata
        .into_iter()
        .filter(|(id, _)| rows.binary_search_by_key(id, |r| r.id).is_ok())
        .collect();

    if kept.len() != vector_count || kept.len() != metadata_count {
        warn!(
            vectors = vector_count,
            metadata = metadata_count,
            kept = kept.len(),
            "vector index and metadata disagree, dropping unmatched entries"
        );
    }

    IndexState { rows, metadata: kept, next_id: persisted_next.max(highest_seen) }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

fn parse_id(embedding_id: &str) -> Option<u64> {
    embedding_id.parse().ok()
}

#[async_trait]
impl VectorIndex for FlatVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    async fn insert(
        &self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
    ) -> Result<Vec<String>> {
        if vectors.len() != metadata.len() {
            return Err(RagError::InvalidInput(format!(
                "{} vectors but {} metadata records",
                vectors.len(),
                metadata.len()
            )));
        }
        if vectors.is_empty() {
            return Ok(Vec::new());
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }

        let mut state = self.state.write().await;
        let mut next = state.clone();
        let mut ids = Vec::with_capacity(vectors.len());
        for (vector, meta) in vectors.into_iter().zip(metadata) {
            let id = next.next_id;
            next.next_id += 1;
            next.rows.push(Row { id, vector });
            next.metadata.insert(id, meta);
            ids.push(id.to_string());
        }

        self.persist(&next).await?;
        *state = next;
        debug!(inserted = ids.len(), total = state.rows.len(), "vectors inserted");
        Ok(ids)
    }

    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>> {
        let state = self.state.read().await;
        if state.rows.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(vector)?;

        let mut scored: Vec<(u64, f32)> =
            state.rows.iter().map(|row| (row.id, cosine_similarity(&row.vector, vector))).collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .filter_map(|(id, distance)| {
                state.metadata.get(&id).map(|metadata| SearchResult {
                    embedding_id: id.to_string(),
                    distance,
                    score: ((1.0 + distance) / 2.0).clamp(0.0, 1.0),
                    metadata: metadata.clone(),
                })
            })
            .collect())
    }

    async fn delete(&self, embedding_id: &str) -> Result<bool> {
        let removed = self.delete_many(&[embedding_id.to_string()]).await?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, embedding_ids: &[String]) -> Result<usize> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        let removed = embedding_ids
            .iter()
            .filter_map(|id| parse_id(id))
            .filter(|id| next.metadata.remove(id).is_some())
            .count();
        if removed == 0 {
            return Ok(0);
        }

        // Rebuild from the surviving metadata; rows stay in ascending id order.
        let metadata = &next.metadata;
        next.rows = state.rows.iter().filter(|row| metadata.contains_key(&row.id)).cloned().collect();

        self.persist(&next).await?;
        *state = next;
        info!(removed, remaining = state.rows.len(), "vector index rebuilt after delete");
        Ok(removed)
    }

    async fn get(&self, embedding_id: &str) -> Result<Option<ChunkMetadata>> {
        let Some(id) = parse_id(embedding_id) else {
            return Ok(None);
        };
        Ok(self.state.read().await.metadata.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(content: &str) -> ChunkMetadata {
        ChunkMetadata {
            document_id: 1,
            document_title: "Manual".into(),
            content: content.into(),
            page_number: 1,
            chunk_index: 0,
        }
    }

    #[test]
    fn cosine_of_identical_and_opposite_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[tokio::test]
    async fn ids_are_sequential_and_never_reused() {
        let index = FlatVectorIndex::in_memory(2);
        let ids = index
            .insert(vec![vec![1.0, 0.0], vec![0.0, 1.0]], vec![meta("a"), meta("b")])
            .await
            .unwrap();
        assert_eq!(ids, vec!["0", "1"]);

        assert!(index.delete("1").await.unwrap());
        let ids = index.insert(vec![vec![1.0, 1.0]], vec![meta("c")]).await.unwrap();
        assert_eq!(ids, vec!["2"]);
    }

    #[tokio::test]
    async fn ties_are_broken_by_lower_id() {
        let index = FlatVectorIndex::in_memory(2);
        index
            .insert(
                vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]],
                vec![meta("other"), meta("first"), meta("second")],
            )
            .await
            .unwrap();
        let results = index.search(&[1.0, 0.0], 3).await.unwrap();
        assert_eq!(results[0].embedding_id, "1");
        assert_eq!(results[1].embedding_id, "2");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[2].score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn mismatched_dimension_inserts_nothing() {
        let index = FlatVectorIndex::in_memory(3);
        let err = index
            .insert(vec![vec![1.0, 0.0, 0.0], vec![1.0, 0.0]], vec![meta("a"), meta("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 2 }));
        assert_eq!(index.len().await, 0);
    }

    #[tokio::test]
    async fn search_on_empty_index_is_empty() {
        let index = FlatVectorIndex::in_memory(2);
        assert!(index.search(&[1.0, 0.0], 5).await.unwrap().is_empty());
        assert!(index.search(&[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_with_wrong_dimension_fails_once_populated() {
        let index = FlatVectorIndex::in_memory(2);
        index.insert(vec![vec![1.0, 0.0]], vec![meta("a")]).await.unwrap();
        let err = index.search(&[1.0, 0.0, 0.0], 5).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[tokio::test]
    async fn deleting_unknown_id_returns_false() {
        let index = FlatVectorIndex::in_memory(2);
        assert!(!index.delete("42").await.unwrap());
        assert!(!index.delete("not-a-number").await.unwrap());
    }
}
