use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

use crate::error::LlmError;
use crate::provider::{Completion, LlmProvider, Message, Role};

const OLLAMA_MAX_EMBED_BATCH: usize = 512;

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    #[must_use]
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Self {
        let (host, port) = parse_host_port(base_url);
        Self {
            client: Ollama::new(host, port),
            model,
            embedding_model,
        }
    }

    /// Check if Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection to Ollama fails.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.client.list_local_models().await.map_err(|e| {
            LlmError::Unavailable(format!("failed to connect to Ollama, is it running? {e}"))
        })?;
        Ok(())
    }
}

// ollama-rs does not expose HTTP status codes, so request failures are treated as
// transient and left to the caller's bounded retry policy.
impl LlmProvider for OllamaProvider {
    async fn chat(&self, messages: &[Message]) -> Result<Completion, LlmError> {
        let ollama_messages: Vec<ChatMessage> = messages.iter().map(convert_message).collect();
        let request = ChatMessageRequest::new(self.model.clone(), ollama_messages);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| LlmError::Unavailable(format!("Ollama chat request failed: {e}")))?;

        if response.message.content.is_empty() {
            return Err(LlmError::EmptyResponse {
                provider: self.name().to_owned(),
            });
        }
        Ok(Completion::text(response.message.content))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Unavailable(format!("Ollama embedding request failed: {e}")))?;

        if response.embeddings.len() != texts.len() {
            return Err(LlmError::CountMismatch {
                expected: texts.len(),
                actual: response.embeddings.len(),
            });
        }
        Ok(response.embeddings)
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn max_batch_size(&self) -> usize {
        OLLAMA_MAX_EMBED_BATCH
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }
}

fn convert_message(msg: &Message) -> ChatMessage {
    let text = msg.content.clone();
    match msg.role {
        Role::System => ChatMessage::system(text),
        Role::Assistant => ChatMessage::assistant(text),
        Role::User => ChatMessage::user(text),
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            let host = url[..colon_pos].to_string();
            return (host, port);
        }
    }
    (url.to_string(), 11434)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("http://localhost:11434");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_without_port_uses_default() {
        let (host, port) = parse_host_port("http://ollama.internal/");
        assert_eq!(host, "http://ollama.internal");
        assert_eq!(port, 11434);
    }

    #[test]
    fn capabilities() {
        let provider =
            OllamaProvider::new("http://localhost:11434", "llama3".into(), "nomic-embed".into());
        assert!(provider.supports_embeddings());
        assert_eq!(provider.max_batch_size(), OLLAMA_MAX_EMBED_BATCH);
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn convert_message_keeps_role() {
        let msg = convert_message(&Message::system("rules"));
        assert_eq!(msg.content, "rules");
    }

    #[tokio::test]
    async fn chat_with_unreachable_endpoint_is_transient() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", "test-model".into(), "embed".into());
        let err = provider.chat(&[Message::user("hello")]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn embed_with_unreachable_endpoint_is_transient() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", "test-model".into(), "embed".into());
        let err = provider.embed_batch(&["text".into()]).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn health_check_unreachable() {
        let provider = OllamaProvider::new("http://127.0.0.1:1", "test-model".into(), "embed".into());
        assert!(provider.health_check().await.is_err());
    }
}
