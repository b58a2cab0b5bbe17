//! Embedding gateway: validated, cached, time-bounded access to a provider's embeddings.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::LlmError;
use crate::provider::LlmProvider;

pub const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Bounded FIFO cache of embeddings keyed by a blake3 digest of `(namespace, text)`.
#[derive(Debug)]
struct EmbeddingCache {
    capacity: usize,
    entries: HashMap<blake3::Hash, Vec<f32>>,
    order: VecDeque<blake3::Hash>,
}

impl EmbeddingCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &blake3::Hash) -> Option<Vec<f32>> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: blake3::Hash, vector: Vec<f32>) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key, vector).is_none() {
            self.order.push_back(key);
        }
        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }
}

/// Converts text batches into embeddings through an [`LlmProvider`].
///
/// Inputs are validated before any network call, responses are checked for count and
/// dimensionality, and previously seen texts are served from an in-process cache.
pub struct EmbeddingGateway<P> {
    provider: Arc<P>,
    namespace: String,
    max_batch_size: usize,
    timeout: Duration,
    cache: Mutex<EmbeddingCache>,
}

impl<P> std::fmt::Debug for EmbeddingGateway<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("namespace", &self.namespace)
            .field("max_batch_size", &self.max_batch_size)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> EmbeddingGateway<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        let max_batch_size = provider.max_batch_size().max(1);
        let namespace = provider.name().to_owned();
        Self {
            provider,
            namespace,
            max_batch_size,
            timeout: DEFAULT_EMBED_TIMEOUT,
            cache: Mutex::new(EmbeddingCache::new(DEFAULT_CACHE_CAPACITY)),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the cache capacity in entries. Zero disables caching.
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = Mutex::new(EmbeddingCache::new(capacity));
        self
    }

    /// Lower the batch limit below the provider's own. Larger values are ignored.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.clamp(1, self.provider.max_batch_size().max(1));
        self
    }

    /// Separate cache entries of different embedding models served by the same provider.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    #[must_use]
    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    fn cache_key(&self, text: &str) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update(&[0]);
        hasher.update(text.as_bytes());
        hasher.finalize()
    }

    /// Embed `texts`, preserving order.
    ///
    /// # Errors
    ///
    /// See [`EmbeddingGateway::embed_cancellable`].
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.embed_cancellable(texts, &CancellationToken::new())
            .await
    }

    /// Embed `texts`, preserving order, abandoning the provider call if `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`LlmError::InvalidInput`] if any text is empty (no provider call is made)
    /// - [`LlmError::BatchTooLarge`] if the batch exceeds the provider limit
    /// - [`LlmError::Timeout`] / [`LlmError::Cancelled`] when the call is abandoned
    /// - [`LlmError::CountMismatch`] / [`LlmError::DimensionMismatch`] for inconsistent responses
    /// - any provider error, classified as transient or fatal
    pub async fn embed_cancellable(
        &self,
        texts: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>, LlmError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(pos) = texts.iter().position(String::is_empty) {
            return Err(LlmError::InvalidInput(format!(
                "text at position {pos} is empty"
            )));
        }
        if texts.len() > self.max_batch_size {
            return Err(LlmError::BatchTooLarge {
                size: texts.len(),
                max: self.max_batch_size,
            });
        }
        if !self.provider.supports_embeddings() {
            return Err(LlmError::EmbedUnsupported {
                provider: self.provider.name().to_owned(),
            });
        }

        let keys: Vec<blake3::Hash> = texts.iter().map(|t| self.cache_key(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = match self.cache.lock() {
            Ok(cache) => keys.iter().map(|k| cache.get(k)).collect(),
            Err(_) => vec![None; texts.len()],
        };

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        tracing::debug!(
            batch = texts.len(),
            cached = texts.len() - missing.len(),
            "embedding batch"
        );

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let call = tokio::time::timeout(self.timeout, self.provider.embed_batch(&batch));
            let vectors = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(LlmError::Cancelled),
                res = call => res.map_err(|_| LlmError::Timeout(self.timeout))??,
            };

            if vectors.len() != batch.len() {
                return Err(LlmError::CountMismatch {
                    expected: batch.len(),
                    actual: vectors.len(),
                });
            }

            if let Ok(mut cache) = self.cache.lock() {
                for (&i, v) in missing.iter().zip(&vectors) {
                    cache.insert(keys[i], v.clone());
                }
            }
            for (i, v) in missing.into_iter().zip(vectors) {
                out[i] = Some(v);
            }
        }

        let vectors: Vec<Vec<f32>> = out.into_iter().flatten().collect();
        if vectors.len() != texts.len() {
            return Err(LlmError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        let expected = vectors[0].len();
        if expected == 0 {
            return Err(LlmError::EmptyResponse {
                provider: self.provider.name().to_owned(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(LlmError::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}
