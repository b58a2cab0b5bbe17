use std::collections::HashSet;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt, stream};
use quarry_llm::{EmbeddingGateway, LlmError, LlmProvider, RetryPolicy};
use quarry_memory::document::{Chunk, Document, SOURCE_ID_KEY, TextSplitter};
use quarry_memory::vector_store::rank_hits;
use quarry_memory::{CollectionStats, IndexEntry, VectorFilter, VectorStore};
use tokio_util::sync::CancellationToken;

use crate::error::RagError;

/// A retrieved chunk with its similarity score and 0-based position in the ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
    pub rank: usize,
}

/// Moves documents into the vector index and finds the chunks closest to a query.
pub struct Retriever<P> {
    splitter: TextSplitter,
    gateway: EmbeddingGateway<P>,
    store: Arc<dyn VectorStore>,
    collection: String,
    retry: RetryPolicy,
    embed_concurrency: usize,
    score_threshold: Option<f32>,
    cancel: CancellationToken,
}

impl<P> std::fmt::Debug for Retriever<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("collection", &self.collection)
            .field("splitter", &self.splitter)
            .field("retry", &self.retry)
            .field("embed_concurrency", &self.embed_concurrency)
            .field("score_threshold", &self.score_threshold)
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> Retriever<P> {
    #[must_use]
    pub fn new(
        splitter: TextSplitter,
        gateway: EmbeddingGateway<P>,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            splitter,
            gateway,
            store,
            collection: collection.into(),
            retry: RetryPolicy::default(),
            embed_concurrency: 1,
            score_threshold: None,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Number of embedding batches of one document in flight at once.
    #[must_use]
    pub fn with_embed_concurrency(mut self, concurrency: usize) -> Self {
        self.embed_concurrency = concurrency.max(1);
        self
    }

    /// Drop results scoring below `threshold`.
    #[must_use]
    pub fn with_score_threshold(mut self, threshold: Option<f32>) -> Self {
        self.score_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let gateway = &self.gateway;
        let cancel = &self.cancel;
        self.retry
            .run("embed", cancel, move || gateway.embed_cancellable(texts, cancel))
            .await
    }

    /// Chunk, embed and index one document, replacing any chunks it had before.
    ///
    /// Nothing is written to the index until every chunk has been embedded, and the old chunks
    /// are swapped for the new ones in a single [`VectorStore::replace_source`] call, so a
    /// failed write keeps the previous version.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Validation`] for a malformed document, provider errors from
    /// embedding, and [`RagError::DimensionMismatch`] or [`RagError::Index`] from the index.
    pub async fn ingest_document(&self, document: &Document) -> Result<Vec<String>, RagError> {
        document.validate()?;
        let source_id = document.resolved_id();
        let chunks = self.splitter.split(document);

        if chunks.is_empty() {
            let stale = VectorFilter::default().must_eq(SOURCE_ID_KEY, source_id.as_str());
            let removed = self.store.delete_matching(&self.collection, stale).await?;
            tracing::info!(document.id = %source_id, removed, "document has no text, nothing indexed");
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(self.gateway.max_batch_size()))
            .map(|batch| self.embed_with_retry(batch))
            .buffered(self.embed_concurrency)
            .try_collect()
            .await?;
        let vectors: Vec<Vec<f32>> = batches.into_iter().flatten().collect();

        let dims = vectors.first().map_or(0, Vec::len);
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(RagError::DimensionMismatch {
                expected: u64::try_from(dims).unwrap_or(u64::MAX),
                actual: u64::try_from(bad.len()).unwrap_or(u64::MAX),
            });
        }
        self.store
            .ensure_collection(&self.collection, u64::try_from(dims).unwrap_or(u64::MAX))
            .await?;

        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let entries = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                id: chunk.id,
                vector,
                text: chunk.text,
                metadata: chunk.metadata,
            })
            .collect();
        let removed = self
            .store
            .replace_source(&self.collection, &source_id, entries)
            .await?;

        tracing::info!(
            document.id = %source_id,
            chunk_count = ids.len(),
            replaced = removed,
            collection = %self.collection,
            "document indexed"
        );
        Ok(ids)
    }

    /// Ingest documents one after another, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// See [`Retriever::ingest_document`].
    pub async fn ingest(&self, documents: &[Document]) -> Result<Vec<String>, RagError> {
        let mut ids = Vec::new();
        for doc in documents {
            ids.extend(self.ingest_document(doc).await?);
        }
        Ok(ids)
    }

    /// The `k` chunks most similar to `query`.
    ///
    /// # Errors
    ///
    /// See [`Retriever::retrieve_filtered`].
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>, RagError> {
        self.retrieve_filtered(query, k, None).await
    }

    /// The `k` chunks most similar to `query` whose metadata matches `filter`.
    ///
    /// An empty or missing collection yields no results without calling the provider.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Validation`] for a blank query or `k == 0`, provider errors from
    /// embedding the query, and index errors from the search.
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        if query.trim().is_empty() {
            return Err(RagError::Validation("query must not be empty".into()));
        }
        if k == 0 {
            return Err(RagError::Validation("k must be greater than zero".into()));
        }

        if self.store.stats(&self.collection).await?.count == 0 {
            tracing::debug!(collection = %self.collection, "index is empty, skipping search");
            return Ok(Vec::new());
        }

        let vector = self
            .embed_with_retry(&[query.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                RagError::FatalProvider(LlmError::EmptyResponse {
                    provider: "embedding".into(),
                })
            })?;

        let mut hits = self
            .store
            .search(
                &self.collection,
                vector,
                u64::try_from(k).unwrap_or(u64::MAX),
                filter,
            )
            .await?;

        let mut seen = HashSet::new();
        hits.retain(|h| seen.insert(h.id.clone()));
        if let Some(threshold) = self.score_threshold {
            hits.retain(|h| h.score >= threshold);
        }
        rank_hits(&mut hits);
        hits.truncate(k);

        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .enumerate()
            .map(|(rank, hit)| RetrievalResult {
                chunk: Chunk::from_entry(hit.id, hit.text, hit.metadata),
                score: hit.score,
                rank,
            })
            .collect();
        tracing::debug!(k, returned = results.len(), "retrieved chunks");
        Ok(results)
    }

    /// Remove every chunk of a document, returning how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Index`] if the deletion fails.
    pub async fn remove_document(&self, document_id: &str) -> Result<u64, RagError> {
        let filter = VectorFilter::default().must_eq(SOURCE_ID_KEY, document_id);
        Ok(self.store.delete_matching(&self.collection, filter).await?)
    }

    /// # Errors
    ///
    /// Returns [`RagError::Index`] if the index cannot be queried.
    pub async fn stats(&self) -> Result<CollectionStats, RagError> {
        Ok(self.store.stats(&self.collection).await?)
    }

    /// Drop the whole collection. The next ingest recreates it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Index`] if the collection cannot be deleted.
    pub async fn reset(&self) -> Result<(), RagError> {
        self.store.delete_collection(&self.collection).await?;
        tracing::info!(collection = %self.collection, "collection reset");
        Ok(())
    }
}
