//! Document ingestion: extract, chunk, embed, index.

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::cache::ResponseCache;
use crate::chunking::Chunker;
use crate::document::{Chunk, ChunkMetadata, ChunkRecord, Document};
use crate::embedding::EmbeddingChain;
use crate::error::{RagError, Result};
use crate::parser::PageExtractor;
use crate::registry::{DocumentRepository, NewDocument};
use crate::storage::ObjectStore;
use crate::vectorstore::VectorIndex;

/// Number of chunk texts embedded per provider call.
pub const EMBED_BATCH_SIZE: usize = 100;

/// Whether `path` names a PDF file (case-insensitive extension).
pub fn is_pdf(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Turns stored files into indexed documents and removes them again.
#[derive(Clone)]
pub struct Ingestor {
    chunker: Arc<dyn Chunker>,
    embeddings: Arc<EmbeddingChain>,
    index: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentRepository>,
    objects: Arc<dyn ObjectStore>,
    extractor: Arc<dyn PageExtractor>,
    cache: Arc<ResponseCache>,
}

impl Ingestor {
    /// Create an ingestor over the given collaborators.
    pub fn new(
        chunker: Arc<dyn Chunker>,
        embeddings: Arc<EmbeddingChain>,
        index: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentRepository>,
        objects: Arc<dyn ObjectStore>,
        extractor: Arc<dyn PageExtractor>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self { chunker, embeddings, index, documents, objects, extractor, cache }
    }

    /// Ingest a stored PDF file and return the indexed document.
    ///
    /// Nothing is inserted into the index unless every chunk was embedded
    /// with the index dimension. If embedding or indexing fails after the
    /// document was registered, the registration is rolled back.
    pub async fn ingest_file(&self, path: &Path) -> Result<Document> {
        if !is_pdf(path) {
            return Err(RagError::InvalidInput(format!(
                "only PDF files are supported: {}",
                path.display()
            )));
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RagError::InvalidInput("path has no file name".into()))?;

        let bytes = self.objects.read(path).await?;
        let parsed = self.extractor.extract(bytes, &filename).await?;

        let chunks: Vec<Chunk> = parsed
            .pages
            .iter()
            .flat_map(|page| self.chunker.chunk(&page.text, page.page_number))
            .collect();

        let document = self
            .documents
            .create(NewDocument {
                filename: filename.clone(),
                path: path.to_string_lossy().into_owned(),
                title: parsed.title.clone(),
                page_count: parsed.page_count,
            })
            .await?;

        if chunks.is_empty() {
            warn!(
                document.id = document.id,
                %filename,
                "no chunk reached the minimum length; document has no searchable text"
            );
        }

        let records = match self.index_chunks(&document, &chunks).await {
            Ok(records) => records,
            Err(e) => {
                error!(document.id = document.id, %filename, error = %e, "ingestion failed");
                if let Err(rollback) = self.documents.delete(document.id).await {
                    warn!(document.id = document.id, error = %rollback, "failed to roll back registration");
                }
                return Err(e);
            }
        };

        let indexed = self.documents.mark_indexed(document.id, records).await?;
        self.cache.invalidate_all().await;

        info!(
            document.id = indexed.id,
            %filename,
            page_count = indexed.page_count,
            chunk_count = indexed.chunks.len(),
            "document indexed"
        );
        Ok(indexed)
    }

    async fn index_chunks(&self, document: &Document, chunks: &[Chunk]) -> Result<Vec<ChunkRecord>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            let embedded = self.embeddings.embed_batch(batch).await?;
            vectors.extend(embedded.value);
        }

        let dimension = self.index.dimension();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
            return Err(RagError::DimensionMismatch { expected: dimension, actual: bad.len() });
        }

        let metadata = chunks
            .iter()
            .map(|chunk| ChunkMetadata {
                document_id: document.id,
                document_title: document.title.clone(),
                content: chunk.content.clone(),
                page_number: chunk.page_number,
                chunk_index: chunk.chunk_index,
            })
            .collect();
        let ids = self.index.insert(vectors, metadata).await?;

        Ok(chunks
            .iter()
            .zip(ids)
            .map(|(chunk, embedding_id)| ChunkRecord {
                chunk_index: chunk.chunk_index,
                page_number: chunk.page_number,
                content: chunk.content.clone(),
                embedding_id,
            })
            .collect())
    }

    /// Remove a document, its embeddings and its stored file.
    pub async fn delete_document(&self, id: u64) -> Result<Document> {
        let document = self
            .documents
            .get(id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("document {id}")))?;

        let ids: Vec<String> = document.chunks.iter().map(|c| c.embedding_id.clone()).collect();
        let removed = self.index.delete_many(&ids).await?;
        self.documents.delete(id).await?;

        if let Err(e) = self.objects.remove(Path::new(&document.path)).await {
            warn!(document.id = id, error = %e, "failed to remove stored file");
        }
        self.cache.invalidate_all().await;

        info!(document.id = id, embeddings_removed = removed, "document deleted");
        Ok(document)
    }
}
