//! Test-only mock provider.
//!
//! Embeddings are deterministic hashed bag-of-words vectors, so texts sharing words
//! score higher than unrelated texts. Failures can be scripted per call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{Completion, LlmProvider, Message};

#[derive(Debug, Clone)]
pub struct MockProvider {
    pub(crate) responses: Arc<Mutex<Vec<String>>>,
    pub default_response: String,
    pub dimensions: usize,
    pub supports_embeddings: bool,
    pub max_batch_size: usize,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
    pub(crate) embed_failures: Arc<Mutex<VecDeque<LlmError>>>,
    pub(crate) chat_failures: Arc<Mutex<VecDeque<LlmError>>>,
    pub(crate) embed_calls: Arc<AtomicUsize>,
    pub(crate) chat_calls: Arc<AtomicUsize>,
    pub(crate) prompts: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            default_response: "mock response".into(),
            dimensions: 64,
            supports_embeddings: true,
            max_batch_size: 16,
            delay_ms: 0,
            embed_failures: Arc::new(Mutex::new(VecDeque::new())),
            chat_failures: Arc::new(Mutex::new(VecDeque::new())),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            chat_calls: Arc::new(AtomicUsize::new(0)),
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    #[must_use]
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Queue an error returned by the next `embed_batch` call that has no earlier failure queued.
    pub fn fail_next_embed(&self, error: LlmError) {
        self.embed_failures.lock().unwrap().push_back(error);
    }

    /// Queue an error returned by the next `chat` call that has no earlier failure queued.
    pub fn fail_next_chat(&self, error: LlmError) {
        self.chat_failures.lock().unwrap().push_back(error);
    }

    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Every message list passed to `chat`, in call order.
    #[must_use]
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        self.prompts.lock().unwrap().clone()
    }

    /// Hashed bag-of-words embedding, L2-normalised. Text without words maps to the zero vector.
    #[must_use]
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions.max(1)];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let word = word.to_lowercase();
            let bucket = fnv1a(word.as_bytes()) % vector.len() as u64;
            let idx = usize::try_from(bucket).unwrap_or(0);
            vector[idx] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<Completion, LlmError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        self.pause().await;
        if let Some(err) = self.chat_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        let mut responses = self.responses.lock().unwrap();
        let text = if responses.is_empty() {
            self.default_response.clone()
        } else {
            responses.remove(0)
        };
        Ok(Completion::text(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if !self.supports_embeddings {
            return Err(LlmError::EmbedUnsupported {
                provider: "mock".into(),
            });
        }
        if let Some(err) = self.embed_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn supports_embeddings(&self) -> bool {
        self.supports_embeddings
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
