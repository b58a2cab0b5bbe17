use std::collections::HashMap;
use std::sync::Arc;

use futures::{StreamExt, stream};
use quarry_llm::{EmbeddingGateway, LlmProvider, TokenUsage};
use quarry_memory::document::{Document, SplitterConfig, TextSplitter};
use quarry_memory::{
    InMemoryVectorStore, QdrantOps, SqliteVectorStore, VectorFilter, VectorStore, VectorStoreError,
};
use tokio_util::sync::CancellationToken;

use crate::assembler::{AssembledContext, ContextAssembler};
use crate::config::{Config, IndexBackend, IndexConfig};
use crate::error::RagError;
use crate::generator::Generator;
use crate::retriever::{RetrievalResult, Retriever};

/// Outcome of [`RagPipeline::add_documents`]. Every document appears exactly once, either in
/// `documents_ingested` or in `errors`.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub chunks_written: usize,
    pub documents_ingested: usize,
    pub errors: Vec<(String, RagError)>,
}

impl IngestReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerResult {
    pub answer: String,
    /// Source document ids cited in the context, in rank order.
    pub sources: Vec<String>,
    pub context_used: AssembledContext,
    pub raw_query: String,
    pub has_context: bool,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub collection: String,
    pub count: u64,
    pub dimensionality: Option<u64>,
}

/// Open the vector index selected by `config.backend`.
///
/// # Errors
///
/// Returns [`RagError::Index`] if the backend cannot be opened or reached.
pub async fn open_store(config: &IndexConfig) -> Result<Arc<dyn VectorStore>, RagError> {
    let store: Arc<dyn VectorStore> = match config.backend {
        IndexBackend::Sqlite => Arc::new(
            SqliteVectorStore::open(&config.path)
                .await
                .map_err(|e| RagError::Index(VectorStoreError::Connection(e.to_string())))?,
        ),
        IndexBackend::Qdrant => Arc::new(
            QdrantOps::new(&config.qdrant_url)
                .map_err(|e| RagError::Index(VectorStoreError::Connection(e.to_string())))?,
        ),
        IndexBackend::Memory => Arc::new(InMemoryVectorStore::new()),
    };
    tracing::debug!(backend = ?config.backend, "vector index opened");
    Ok(store)
}

/// Retrieval-augmented question answering over an indexed document collection.
pub struct RagPipeline<P> {
    retriever: Retriever<P>,
    generator: Generator<P>,
    default_k: usize,
    context_budget: usize,
    ingest_batch_size: usize,
    ingest_concurrency: usize,
    cancel: CancellationToken,
}

impl<P> std::fmt::Debug for RagPipeline<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagPipeline")
            .field("retriever", &self.retriever)
            .field("generator", &self.generator)
            .field("default_k", &self.default_k)
            .field("context_budget", &self.context_budget)
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> RagPipeline<P> {
    /// Assemble a pipeline from explicit parts.
    #[must_use]
    pub fn new(retriever: Retriever<P>, generator: Generator<P>) -> Self {
        Self {
            retriever,
            generator,
            default_k: 3,
            context_budget: 4000,
            ingest_batch_size: 32,
            ingest_concurrency: 4,
            cancel: CancellationToken::new(),
        }
    }

    /// Build every component from a validated [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if the configuration is invalid.
    pub fn from_config(
        config: &Config,
        provider: Arc<P>,
        store: Arc<dyn VectorStore>,
    ) -> Result<Self, RagError> {
        config.validate()?;

        let splitter = TextSplitter::new(SplitterConfig {
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
        })?;
        let gateway = EmbeddingGateway::new(Arc::clone(&provider))
            .with_timeout(config.llm.timeout())
            .with_cache_capacity(config.llm.embed_cache_capacity)
            .with_max_batch_size(config.llm.embed_batch_size)
            .with_namespace(config.llm.embedding_model.clone());
        let retry = config.retry.policy();

        let retriever = Retriever::new(splitter, gateway, store, config.index.collection.clone())
            .with_retry(retry.clone())
            .with_embed_concurrency(config.llm.embed_concurrency)
            .with_score_threshold(config.retrieval.score_threshold);
        let generator = Generator::new(provider)
            .with_retry(retry)
            .with_timeout(config.llm.timeout());

        Ok(Self {
            retriever,
            generator,
            default_k: config.retrieval.default_k,
            context_budget: config.retrieval.context_budget,
            ingest_batch_size: config.ingest.batch_size.max(1),
            ingest_concurrency: config.ingest.concurrency.max(1),
            cancel: CancellationToken::new(),
        })
    }

    /// Route cancellation of `cancel` to every provider call the pipeline makes.
    #[must_use]
    pub fn with_cancellation(self, cancel: CancellationToken) -> Self {
        Self {
            retriever: self.retriever.with_cancellation(cancel.clone()),
            generator: self.generator.with_cancellation(cancel.clone()),
            cancel,
            ..self
        }
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn retriever(&self) -> &Retriever<P> {
        &self.retriever
    }

    #[must_use]
    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Chunk, embed and index `documents`.
    ///
    /// Failures are collected per document and never abort the remaining work. Documents
    /// sharing an id are ingested one after another in input order, so the last one wins.
    pub async fn add_documents(&self, documents: Vec<Document>) -> IngestReport {
        let mut report = IngestReport::default();
        let total = documents.len();

        for batch in documents.chunks(self.ingest_batch_size) {
            let outcomes: Vec<Vec<(String, Result<Vec<String>, RagError>)>> =
                stream::iter(group_by_id(batch))
                    .map(|(id, docs)| async move {
                        let mut outcomes = Vec::with_capacity(docs.len());
                        for doc in docs {
                            let outcome = self.retriever.ingest_document(doc).await;
                            outcomes.push((id.clone(), outcome));
                        }
                        outcomes
                    })
                    .buffer_unordered(self.ingest_concurrency)
                    .collect()
                    .await;

            for (id, outcome) in outcomes.into_iter().flatten() {
                match outcome {
                    Ok(chunk_ids) => {
                        report.documents_ingested += 1;
                        report.chunks_written += chunk_ids.len();
                    }
                    Err(e) => {
                        tracing::warn!(document.id = %id, kind = e.kind(), error = %e, "document ingest failed");
                        report.errors.push((id, e));
                    }
                }
            }
        }

        tracing::info!(
            documents = total,
            ingested = report.documents_ingested,
            failed = report.errors.len(),
            chunks = report.chunks_written,
            "ingest finished"
        );
        report
    }

    /// Answer `question` from the `default_k` most relevant chunks.
    ///
    /// # Errors
    ///
    /// See [`RagPipeline::query_k`].
    pub async fn query(&self, question: &str) -> Result<AnswerResult, RagError> {
        self.query_k(question, self.default_k).await
    }

    /// Answer `question` from the `k` most relevant chunks.
    ///
    /// An empty index still produces an answer, with `has_context` unset.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Validation`] for a blank question or `k == 0`, and provider or
    /// index errors from retrieval and generation. Transient provider errors are retried first.
    pub async fn query_k(&self, question: &str, k: usize) -> Result<AnswerResult, RagError> {
        self.query_filtered(question, k, None).await
    }

    /// Like [`RagPipeline::query_k`], restricted to chunks whose metadata matches `filter`.
    ///
    /// # Errors
    ///
    /// See [`RagPipeline::query_k`].
    pub async fn query_filtered(
        &self,
        question: &str,
        k: usize,
        filter: Option<VectorFilter>,
    ) -> Result<AnswerResult, RagError> {
        let results = self.retriever.retrieve_filtered(question, k, filter).await?;
        let context = ContextAssembler::assemble(&results, self.context_budget)?;
        let answer = self.generator.generate(question, &context).await?;

        tracing::info!(
            k,
            retrieved = results.len(),
            used = context.entries.len(),
            sources = context.sources.len(),
            "query answered"
        );
        Ok(AnswerResult {
            answer: answer.text,
            has_context: !context.is_empty(),
            sources: context.sources.clone(),
            context_used: context,
            raw_query: question.to_owned(),
            usage: answer.usage,
        })
    }

    /// Ranked chunks for `question` without generating an answer.
    ///
    /// # Errors
    ///
    /// See [`Retriever::retrieve`].
    pub async fn retrieve(
        &self,
        question: &str,
        k: usize,
    ) -> Result<Vec<RetrievalResult>, RagError> {
        self.retriever.retrieve(question, k).await
    }

    /// # Errors
    ///
    /// Returns [`RagError::Index`] if the index cannot be queried.
    pub async fn get_collection_info(&self) -> Result<CollectionInfo, RagError> {
        let stats = self.retriever.stats().await?;
        Ok(CollectionInfo {
            collection: self.retriever.collection().to_owned(),
            count: stats.count,
            dimensionality: stats.dimensionality,
        })
    }

    /// Remove all chunks of a document, returning how many were deleted.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Index`] if the deletion fails.
    pub async fn remove_document(&self, document_id: &str) -> Result<u64, RagError> {
        let removed = self.retriever.remove_document(document_id).await?;
        tracing::info!(document.id = %document_id, removed, "document removed");
        Ok(removed)
    }

    /// Drop the collection and everything in it.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Index`] if the collection cannot be deleted.
    pub async fn reset(&self) -> Result<(), RagError> {
        self.retriever.reset().await
    }
}

/// Split a batch into per-id groups, keeping input order inside each group.
fn group_by_id(batch: &[Document]) -> Vec<(String, Vec<&Document>)> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<&Document>)> = Vec::new();
    for doc in batch {
        let id = doc.resolved_id();
        let slot = *slots.entry(id.clone()).or_insert_with(|| {
            groups.push((id, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(doc);
    }
    groups
}
