//! Embedding and completion provider abstraction with OpenAI and Ollama backends.

pub mod any;
pub mod embedding;
pub mod error;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;

pub use embedding::EmbeddingGateway;
pub use error::{ErrorClass, LlmError};
pub use provider::{Completion, LlmProvider, Message, Role, TokenUsage};
pub use retry::RetryPolicy;
