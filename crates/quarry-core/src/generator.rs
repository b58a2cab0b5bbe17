use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use quarry_llm::{LlmError, LlmProvider, Message, RetryPolicy, TokenUsage};
use tokio_util::sync::CancellationToken;

use crate::assembler::AssembledContext;
use crate::error::RagError;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions using only \
the provided context. Cite the sources you use by their id in square brackets, for example \
[doc-1]. If the context does not contain enough information to answer, say so explicitly \
instead of guessing.";

pub const NO_CONTEXT_NOTICE: &str = "No relevant information was found in the knowledge base \
for this question. Tell the user that you could not find relevant information to answer it.";

/// Generated answer text and the provider's token accounting, if reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

pub struct Generator<P> {
    provider: Arc<P>,
    retry: RetryPolicy,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<P> std::fmt::Debug for Generator<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<P: LlmProvider> Generator<P> {
    #[must_use]
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(60),
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the system and user messages for `question` grounded in `context`.
    #[must_use]
    pub fn build_messages(question: &str, context: &AssembledContext) -> Vec<Message> {
        let mut user = String::new();
        if context.is_empty() {
            user.push_str(NO_CONTEXT_NOTICE);
            user.push_str("\n\n");
        } else {
            user.push_str("<context>\n");
            for entry in &context.entries {
                let _ = writeln!(
                    user,
                    "<source id=\"{}\" rank=\"{}\" score=\"{:.4}\">\n{}\n</source>",
                    entry.chunk.source_id, entry.rank, entry.score, entry.chunk.text
                );
            }
            user.push_str("</context>\n\n");
        }
        let _ = write!(user, "Question: {question}");
        vec![Message::system(SYSTEM_PROMPT), Message::user(user)]
    }

    async fn chat_once(&self, messages: &[Message]) -> Result<quarry_llm::Completion, LlmError> {
        let call = tokio::time::timeout(self.timeout, self.provider.chat(messages));
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(LlmError::Cancelled),
            res = call => res.map_err(|_| LlmError::Timeout(self.timeout))?,
        }
    }

    /// Ask the provider to answer `question` from `context`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::TransientProvider`] once retries are exhausted,
    /// [`RagError::FatalProvider`] without retrying, or [`RagError::Cancelled`].
    pub async fn generate(
        &self,
        question: &str,
        context: &AssembledContext,
    ) -> Result<Answer, RagError> {
        let messages = Self::build_messages(question, context);
        let messages = messages.as_slice();
        let completion = self
            .retry
            .run("chat", &self.cancel, move || self.chat_once(messages))
            .await?;

        if completion.text.trim().is_empty() {
            return Err(RagError::FatalProvider(LlmError::EmptyResponse {
                provider: self.provider.name().to_owned(),
            }));
        }
        if let Some(usage) = completion.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "generation usage"
            );
        }
        Ok(Answer {
            text: completion.text,
            usage: completion.usage,
        })
    }
}
