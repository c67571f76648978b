//! Vector index trait for storing and searching chunk embeddings.

use async_trait::async_trait;

use crate::document::{ChunkMetadata, SearchResult};
use crate::error::Result;

/// A storage backend for chunk embeddings with similarity search.
///
/// The dimension is fixed for the lifetime of an index. Ids are assigned by
/// the index, are unique, and are never reused after deletion.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::{FlatVectorIndex, VectorIndex};
///
/// let index = FlatVectorIndex::open("./index", 768).await;
/// let ids = index.insert(vectors, metadata).await?;
/// let results = index.search(&query_embedding, 5).await?;
/// ```
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimension every stored vector must have.
    fn dimension(&self) -> usize;

    /// Number of stored vectors.
    async fn len(&self) -> usize;

    /// Whether the index holds no vectors.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Store vectors with their metadata and return the assigned ids, in input order.
    ///
    /// Either every vector is stored or none is.
    async fn insert(
        &self,
        vectors: Vec<Vec<f32>>,
        metadata: Vec<ChunkMetadata>,
    ) -> Result<Vec<String>>;

    /// Return up to `k` nearest neighbours ordered by descending score.
    async fn search(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    /// Remove one vector. Returns `false` if the id is unknown.
    async fn delete(&self, embedding_id: &str) -> Result<bool>;

    /// Remove several vectors with a single rebuild. Returns how many existed.
    async fn delete_many(&self, embedding_ids: &[String]) -> Result<usize> {
        let mut removed = 0;
        for id in embedding_ids {
            if self.delete(id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Look up the metadata of a stored vector.
    async fn get(&self, embedding_id: &str) -> Result<Option<ChunkMetadata>>;
}
