use std::io::Write;

use serial_test::serial;

use super::*;

const ENV_KEYS: [&str; 22] = [
    "QUARRY_LLM_PROVIDER",
    "QUARRY_LLM_BASE_URL",
    "QUARRY_LLM_CHAT_MODEL",
    "QUARRY_LLM_EMBEDDING_MODEL",
    "QUARRY_LLM_MAX_TOKENS",
    "QUARRY_LLM_TEMPERATURE",
    "QUARRY_LLM_TIMEOUT_SECS",
    "QUARRY_LLM_EMBED_CONCURRENCY",
    "QUARRY_CHUNK_SIZE",
    "QUARRY_CHUNK_OVERLAP",
    "QUARRY_RETRIEVAL_DEFAULT_K",
    "QUARRY_RETRIEVAL_CONTEXT_BUDGET",
    "QUARRY_RETRIEVAL_SCORE_THRESHOLD",
    "QUARRY_INDEX_BACKEND",
    "QUARRY_INDEX_PATH",
    "QUARRY_QDRANT_URL",
    "QUARRY_COLLECTION",
    "QUARRY_RETRY_MAX_ATTEMPTS",
    "QUARRY_INGEST_CONCURRENCY",
    "QUARRY_OPENAI_API_KEY",
    "OPENAI_API_KEY",
    "QUARRY_CONFIG",
];

fn clear_env() {
    for key in ENV_KEYS {
        unsafe { std::env::remove_var(key) };
    }
}

fn write_config(body: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let mut f = std::fs::File::create(&path).unwrap();
    write!(f, "{body}").unwrap();
    (dir, path)
}

#[test]
fn defaults_match_documented_values() {
    let config = Config::default();
    assert_eq!(config.llm.provider, ProviderKind::OpenAi);
    assert_eq!(config.llm.base_url(), "https://api.openai.com/v1");
    assert_eq!(config.llm.chat_model, "gpt-4o-mini");
    assert_eq!(config.llm.embedding_model, "text-embedding-3-small");
    assert_eq!(config.llm.max_tokens, 500);
    assert!((config.llm.temperature - 0.7).abs() < f32::EPSILON);
    assert_eq!(config.chunking.chunk_size, 1000);
    assert_eq!(config.chunking.chunk_overlap, 200);
    assert_eq!(config.retrieval.default_k, 3);
    assert_eq!(config.retrieval.context_budget, 4000);
    assert!(config.retrieval.score_threshold.is_none());
    assert_eq!(config.index.backend, IndexBackend::Sqlite);
    assert_eq!(config.index.collection, "rag_documents");
    assert_eq!(config.retry.max_attempts, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn ollama_default_base_url() {
    let mut config = Config::default();
    config.llm.provider = ProviderKind::Ollama;
    assert_eq!(config.llm.base_url(), "http://localhost:11434");
    config.llm.base_url = Some("http://gpu-box:11434".into());
    assert_eq!(config.llm.base_url(), "http://gpu-box:11434");
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    clear_env();
    let config = Config::load(std::path::Path::new("/nonexistent/quarry.toml")).unwrap();
    assert_eq!(config.index.collection, "rag_documents");
}

#[test]
#[serial]
fn parse_valid_toml() {
    let (_dir, path) = write_config(
        r#"
[llm]
provider = "ollama"
chat_model = "llama3.2"
embedding_model = "nomic-embed-text"

[chunking]
chunk_size = 500
chunk_overlap = 50

[retrieval]
default_k = 5
score_threshold = 0.2

[index]
backend = "memory"
collection = "notes"

[retry]
max_attempts = 5
"#,
    );
    clear_env();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.llm.provider, ProviderKind::Ollama);
    assert_eq!(config.llm.chat_model, "llama3.2");
    assert_eq!(config.chunking.chunk_size, 500);
    assert_eq!(config.retrieval.default_k, 5);
    assert_eq!(config.retrieval.score_threshold, Some(0.2));
    assert_eq!(config.index.backend, IndexBackend::Memory);
    assert_eq!(config.index.collection, "notes");
    assert_eq!(config.retry.policy().max_attempts, 5);
    assert_eq!(config.ingest.batch_size, 32);
}

#[test]
#[serial]
fn malformed_toml_is_config_error() {
    let (_dir, path) = write_config("[chunking\nchunk_size = ");
    clear_env();
    assert!(matches!(Config::load(&path), Err(RagError::Config(_))));
}

#[test]
#[serial]
fn overlap_not_below_size_rejected_on_load() {
    let (_dir, path) = write_config("[chunking]\nchunk_size = 100\nchunk_overlap = 100\n");
    clear_env();
    let err = Config::load(&path).unwrap_err();
    assert!(matches!(err, RagError::Config(msg) if msg.contains("chunk_overlap")));
}

#[test]
#[serial]
fn env_overrides() {
    let (_dir, path) = write_config("[llm]\nchat_model = \"from-file\"\n");
    clear_env();
    unsafe {
        std::env::set_var("QUARRY_LLM_PROVIDER", "Ollama");
        std::env::set_var("QUARRY_LLM_CHAT_MODEL", "from-env");
        std::env::set_var("QUARRY_CHUNK_SIZE", "300");
        std::env::set_var("QUARRY_CHUNK_OVERLAP", "30");
        std::env::set_var("QUARRY_RETRIEVAL_DEFAULT_K", "7");
        std::env::set_var("QUARRY_INDEX_BACKEND", "qdrant");
        std::env::set_var("QUARRY_COLLECTION", "env_docs");
    }

    let config = Config::load(&path).unwrap();
    clear_env();

    assert_eq!(config.llm.provider, ProviderKind::Ollama);
    assert_eq!(config.llm.chat_model, "from-env");
    assert_eq!(config.chunking.chunk_size, 300);
    assert_eq!(config.chunking.chunk_overlap, 30);
    assert_eq!(config.retrieval.default_k, 7);
    assert_eq!(config.index.backend, IndexBackend::Qdrant);
    assert_eq!(config.index.collection, "env_docs");
}

#[test]
#[serial]
fn invalid_env_values_are_ignored() {
    clear_env();
    unsafe {
        std::env::set_var("QUARRY_LLM_PROVIDER", "gemini");
        std::env::set_var("QUARRY_RETRIEVAL_DEFAULT_K", "many");
    }
    let config = Config::load(std::path::Path::new("/nonexistent/quarry.toml")).unwrap();
    clear_env();

    assert_eq!(config.llm.provider, ProviderKind::OpenAi);
    assert_eq!(config.retrieval.default_k, 3);
}

#[test]
#[serial]
fn api_key_prefers_quarry_variable() {
    clear_env();
    unsafe {
        std::env::set_var("OPENAI_API_KEY", "sk-generic");
        std::env::set_var("QUARRY_OPENAI_API_KEY", "sk-quarry");
    }
    let config = Config::load(std::path::Path::new("/nonexistent/quarry.toml")).unwrap();
    clear_env();

    let key = config.secrets.openai_api_key.as_ref().unwrap();
    assert_eq!(key.expose(), "sk-quarry");
}

#[test]
#[serial]
fn api_key_falls_back_to_openai_variable() {
    clear_env();
    unsafe { std::env::set_var("OPENAI_API_KEY", "sk-generic") };
    let config = Config::load(std::path::Path::new("/nonexistent/quarry.toml")).unwrap();
    clear_env();

    assert_eq!(
        config.secrets.openai_api_key.as_ref().map(Secret::expose),
        Some("sk-generic")
    );
}

#[test]
fn secret_never_printed() {
    let mut config = Config::default();
    config.secrets.openai_api_key = Some(Secret::new("sk-very-secret"));
    let dbg = format!("{config:?}");
    assert!(!dbg.contains("sk-very-secret"));
    assert!(dbg.contains("[REDACTED]"));
    assert_eq!(format!("{}", Secret::new("x")), "[REDACTED]");

    let toml = toml::to_string(&config).unwrap();
    assert!(!toml.contains("sk-very-secret"));
}

#[test]
fn validate_rejects_bad_values() {
    let cases: Vec<fn(&mut Config)> = vec![
        |c| c.chunking.chunk_size = 0,
        |c| c.retrieval.default_k = 0,
        |c| c.retrieval.context_budget = 0,
        |c| c.retrieval.score_threshold = Some(1.5),
        |c| c.llm.temperature = 3.0,
        |c| c.llm.embed_concurrency = 0,
        |c| c.ingest.batch_size = 0,
        |c| c.retry.max_attempts = 0,
        |c| c.index.collection = "  ".into(),
    ];
    for mutate in cases {
        let mut config = Config::default();
        mutate(&mut config);
        assert!(matches!(config.validate(), Err(RagError::Config(_))));
    }
}
