use super::{Config, IndexBackend, ProviderKind, Secret};

fn parse_enum<T: serde::de::DeserializeOwned>(var: &str, value: &str) -> Option<T> {
    let parsed = serde_json::from_value(serde_json::Value::String(value.to_lowercase())).ok();
    if parsed.is_none() {
        tracing::warn!("ignoring invalid {var} value: {value}");
    }
    parsed
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_llm();
        self.apply_env_overrides_pipeline();
        self.apply_env_secrets();
    }

    fn apply_env_overrides_llm(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_LLM_PROVIDER")
            && let Some(kind) = parse_enum::<ProviderKind>("QUARRY_LLM_PROVIDER", &v)
        {
            self.llm.provider = kind;
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_CHAT_MODEL") {
            self.llm.chat_model = v;
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_MAX_TOKENS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.llm.max_tokens = n;
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_TEMPERATURE")
            && let Ok(t) = v.parse::<f32>()
        {
            self.llm.temperature = t;
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_TIMEOUT_SECS")
            && let Ok(secs) = v.parse::<u64>()
        {
            self.llm.timeout_secs = secs;
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_EMBED_CONCURRENCY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.llm.embed_concurrency = n;
        }
    }

    fn apply_env_overrides_pipeline(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_CHUNK_SIZE")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.chunk_size = n;
        }
        if let Ok(v) = std::env::var("QUARRY_CHUNK_OVERLAP")
            && let Ok(n) = v.parse::<usize>()
        {
            self.chunking.chunk_overlap = n;
        }
        if let Ok(v) = std::env::var("QUARRY_RETRIEVAL_DEFAULT_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.retrieval.default_k = k;
        }
        if let Ok(v) = std::env::var("QUARRY_RETRIEVAL_CONTEXT_BUDGET")
            && let Ok(n) = v.parse::<usize>()
        {
            self.retrieval.context_budget = n;
        }
        if let Ok(v) = std::env::var("QUARRY_RETRIEVAL_SCORE_THRESHOLD")
            && let Ok(t) = v.parse::<f32>()
        {
            self.retrieval.score_threshold = Some(t);
        }
        if let Ok(v) = std::env::var("QUARRY_INDEX_BACKEND")
            && let Some(backend) = parse_enum::<IndexBackend>("QUARRY_INDEX_BACKEND", &v)
        {
            self.index.backend = backend;
        }
        if let Ok(v) = std::env::var("QUARRY_INDEX_PATH") {
            self.index.path = v;
        }
        if let Ok(v) = std::env::var("QUARRY_QDRANT_URL") {
            self.index.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("QUARRY_COLLECTION") {
            self.index.collection = v;
        }
        if let Ok(v) = std::env::var("QUARRY_RETRY_MAX_ATTEMPTS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.retry.max_attempts = n;
        }
        if let Ok(v) = std::env::var("QUARRY_INGEST_CONCURRENCY")
            && let Ok(n) = v.parse::<usize>()
        {
            self.ingest.concurrency = n;
        }
    }

    fn apply_env_secrets(&mut self) {
        let key = std::env::var("QUARRY_OPENAI_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Some(key) = key {
            self.secrets.openai_api_key = Some(Secret::new(key));
        }
    }
}
