use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::http::check_status;
use crate::provider::{Completion, LlmProvider, Message, TokenUsage};

/// Upper bound on inputs per `/embeddings` request accepted by the OpenAI API.
pub const OPENAI_MAX_EMBED_BATCH: usize = 2048;

#[derive(Clone)]
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    embedding_model: Option<String>,
    max_batch_size: usize,
}

impl fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("client", &"<reqwest::Client>")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("embedding_model", &self.embedding_model)
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(
        api_key: String,
        mut base_url: String,
        model: String,
        max_tokens: u32,
        embedding_model: Option<String>,
    ) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
            max_tokens,
            temperature: 0.7,
            embedding_model,
            max_batch_size: OPENAI_MAX_EMBED_BATCH,
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Lower the per-request embedding batch limit. Values above the API limit are clamped.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.clamp(1, OPENAI_MAX_EMBED_BATCH);
        self
    }

    fn post(&self, endpoint: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/{endpoint}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
    }
}

impl LlmProvider for OpenAiProvider {
    async fn chat(&self, messages: &[Message]) -> Result<Completion, LlmError> {
        let api_messages: Vec<ApiMessage<'_>> = messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect();
        let body = ChatRequest {
            model: &self.model,
            messages: &api_messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self.post("chat/completions").json(&body).send().await?;
        let response = check_status(self.name(), response).await?;
        let text = response.text().await?;
        let resp: ChatResponse = serde_json::from_str(&text)?;

        let usage = resp.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });
        if let Some(u) = usage {
            tracing::debug!(
                prompt_tokens = u.prompt_tokens,
                completion_tokens = u.completion_tokens,
                "OpenAI API usage"
            );
        }

        let content = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::EmptyResponse {
                provider: self.name().to_owned(),
            })?;

        Ok(Completion {
            text: content,
            usage,
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let model = self
            .embedding_model
            .as_deref()
            .ok_or_else(|| LlmError::EmbedUnsupported {
                provider: self.name().to_owned(),
            })?;

        let body = EmbeddingRequest { input: texts, model };
        let response = self.post("embeddings").json(&body).send().await?;
        let response = check_status(self.name(), response).await?;
        let text = response.text().await?;
        let resp: EmbeddingResponse = serde_json::from_str(&text)?;

        let mut data = resp.data;
        if data.len() != texts.len() {
            return Err(LlmError::CountMismatch {
                expected: texts.len(),
                actual: data.len(),
            });
        }
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }

    fn supports_embeddings(&self) -> bool {
        self.embedding_model.is_some()
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage<'a>],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider_for(server: &MockServer) -> OpenAiProvider {
        OpenAiProvider::new(
            "sk-test-key".into(),
            format!("{}/v1/", server.uri()),
            "gpt-4o-mini".into(),
            500,
            Some("text-embedding-3-small".into()),
        )
    }

    #[test]
    fn new_trims_trailing_slashes() {
        let p = OpenAiProvider::new(
            "k".into(),
            "https://api.openai.com/v1//".into(),
            "gpt-4o-mini".into(),
            500,
            None,
        );
        assert_eq!(p.base_url, "https://api.openai.com/v1");
        assert!(!p.supports_embeddings());
    }

    #[test]
    fn debug_redacts_api_key() {
        let p = OpenAiProvider::new(
            "sk-secret".into(),
            "https://api.openai.com/v1".into(),
            "gpt-4o-mini".into(),
            500,
            None,
        );
        let dbg = format!("{p:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn max_batch_size_is_clamped() {
        let p = OpenAiProvider::new("k".into(), "http://x".into(), "m".into(), 1, None)
            .with_max_batch_size(1_000_000);
        assert_eq!(p.max_batch_size(), OPENAI_MAX_EMBED_BATCH);
        let p = p.with_max_batch_size(0);
        assert_eq!(p.max_batch_size(), 1);
    }

    #[tokio::test]
    async fn chat_parses_content_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": "Paris."}}],
                "usage": {"prompt_tokens": 42, "completion_tokens": 3, "total_tokens": 45}
            })))
            .mount(&server)
            .await;

        let completion = provider_for(&server)
            .chat(&[Message::user("capital of France?")])
            .await
            .unwrap();
        assert_eq!(completion.text, "Paris.");
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                prompt_tokens: 42,
                completion_tokens: 3
            })
        );
    }

    #[tokio::test]
    async fn chat_without_choices_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .chat(&[Message::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse { .. }));
    }

    #[tokio::test]
    async fn embed_batch_restores_input_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"index": 1, "embedding": [0.0, 1.0]},
                    {"index": 0, "embedding": [1.0, 0.0]}
                ]
            })))
            .mount(&server)
            .await;

        let vectors = provider_for(&server)
            .embed_batch(&["first".into(), "second".into()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn embed_batch_count_mismatch_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [1.0]}]
            })))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .embed_batch(&["a".into(), "b".into()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LlmError::CountMismatch {
                expected: 2,
                actual: 1
            }
        ));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn rate_limit_is_transient_with_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .embed_batch(&["a".into()])
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after: Some(d)
            } if d == Duration::from_secs(2)
        ));
    }

    #[tokio::test]
    async fn unauthorized_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .chat(&[Message::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unauthorized { status: 401, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .chat(&[Message::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn bad_request_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("input too long"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .embed_batch(&["a".into()])
            .await
            .unwrap_err();
        match err {
            LlmError::Rejected {
                status, message, ..
            } => {
                assert_eq!(status, 400);
                assert_eq!(message, "input too long");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_body_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = provider_for(&server)
            .chat(&[Message::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Json(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn embed_without_model_is_unsupported() {
        let p = OpenAiProvider::new("k".into(), "http://127.0.0.1:1".into(), "m".into(), 1, None);
        let err = p.embed_batch(&["a".into()]).await.unwrap_err();
        assert!(matches!(err, LlmError::EmbedUnsupported { .. }));
    }
}
