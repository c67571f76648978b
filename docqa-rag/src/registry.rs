//! Document registry.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::document::{ChunkRecord, Document};
use crate::error::{RagError, Result};

/// Fields of a document at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    /// Stored file name.
    pub filename: String,
    /// Stored file path.
    pub path: String,
    /// Display title.
    pub title: String,
    /// Number of pages.
    pub page_count: usize,
}

/// Owns every registered [`Document`].
///
/// Ids are assigned on [`create`](Self::create), start at 1 and are never reused.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Register a document with no chunks, not yet indexed.
    async fn create(&self, document: NewDocument) -> Result<Document>;

    /// Look up a document.
    async fn get(&self, id: u64) -> Result<Option<Document>>;

    /// All documents in id order.
    async fn list(&self) -> Result<Vec<Document>>;

    /// Attach chunk records and mark the document indexed.
    async fn mark_indexed(&self, id: u64, chunks: Vec<ChunkRecord>) -> Result<Document>;

    /// Remove a document, returning it if it existed.
    async fn delete(&self, id: u64) -> Result<Option<Document>>;

    /// Number of registered documents.
    async fn count(&self) -> Result<usize>;
}

#[derive(Debug)]
struct Registry {
    documents: BTreeMap<u64, Document>,
    next_id: u64,
}

/// A process-local [`DocumentRepository`].
#[derive(Debug)]
pub struct InMemoryDocumentRepository {
    inner: RwLock<Registry>,
}

impl InMemoryDocumentRepository {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { inner: RwLock::new(Registry { documents: BTreeMap::new(), next_id: 1 }) }
    }
}

impl Default for InMemoryDocumentRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocumentRepository {
    async fn create(&self, document: NewDocument) -> Result<Document> {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        let created = Document {
            id,
            filename: document.filename,
            path: document.path,
            title: document.title,
            page_count: document.page_count,
            chunks: Vec::new(),
            indexed: false,
        };
        inner.documents.insert(id, created.clone());
        Ok(created)
    }

    async fn get(&self, id: u64) -> Result<Option<Document>> {
        Ok(self.inner.read().await.documents.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Document>> {
        Ok(self.inner.read().await.documents.values().cloned().collect())
    }

    async fn mark_indexed(&self, id: u64, chunks: Vec<ChunkRecord>) -> Result<Document> {
        let mut inner = self.inner.write().await;
        let document = inner
            .documents
            .get_mut(&id)
            .ok_or_else(|| RagError::NotFound(format!("document {id}")))?;
        document.chunks = chunks;
        document.indexed = true;
        Ok(document.clone())
    }

    async fn delete(&self, id: u64) -> Result<Option<Document>> {
        Ok(self.inner.write().await.documents.remove(&id))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().await.documents.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_doc(name: &str) -> NewDocument {
        NewDocument {
            filename: name.into(),
            path: format!("/tmp/{name}"),
            title: name.trim_end_matches(".pdf").into(),
            page_count: 2,
        }
    }

    #[tokio::test]
    async fn ids_increase_and_are_not_reused() {
        let repo = InMemoryDocumentRepository::new();
        let a = repo.create(new_doc("a.pdf")).await.unwrap();
        let b = repo.create(new_doc("b.pdf")).await.unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert!(!a.indexed);

        repo.delete(b.id).await.unwrap();
        let c = repo.create(new_doc("c.pdf")).await.unwrap();
        assert_eq!(c.id, 3);
        assert_eq!(repo.count().await.unwrap(), 2);
        let ids: Vec<u64> = repo.list().await.unwrap().iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn mark_indexed_attaches_chunks() {
        let repo = InMemoryDocumentRepository::new();
        let doc = repo.create(new_doc("a.pdf")).await.unwrap();
        let chunks = vec![ChunkRecord {
            chunk_index: 0,
            page_number: 1,
            content: "hello".into(),
            embedding_id: "0".into(),
        }];

        let updated = repo.mark_indexed(doc.id, chunks.clone()).await.unwrap();
        assert!(updated.indexed);
        assert_eq!(repo.get(doc.id).await.unwrap().unwrap().chunks, chunks);

        let err = repo.mark_indexed(99, Vec::new()).await.unwrap_err();
        assert!(matches!(err, RagError::NotFound(_)));
    }
}
