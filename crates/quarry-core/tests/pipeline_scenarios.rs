use std::sync::Arc;

use quarry_core::config::{Config, IndexBackend};
use quarry_core::{ContextAssembler, RagError, RagPipeline, open_store};
use quarry_llm::LlmError;
use quarry_llm::mock::MockProvider;
use quarry_memory::document::Document;
use quarry_memory::{InMemoryVectorStore, VectorStore};

fn test_config() -> Config {
    let mut config = Config::default();
    config.index.backend = IndexBackend::Memory;
    config.chunking.chunk_size = 300;
    config.chunking.chunk_overlap = 50;
    config.retry.max_attempts = 3;
    config.retry.base_delay_ms = 0;
    config.retry.max_delay_ms = 0;
    config
}

fn pipeline_with_store(
    provider: &MockProvider,
    config: &Config,
    store: Arc<dyn VectorStore>,
) -> RagPipeline<MockProvider> {
    RagPipeline::from_config(config, Arc::new(provider.clone()), store).unwrap()
}

fn pipeline(provider: &MockProvider) -> RagPipeline<MockProvider> {
    pipeline_with_store(provider, &test_config(), Arc::new(InMemoryVectorStore::new()))
}

fn geography() -> Vec<Document> {
    vec![
        Document::new("Paris is the capital of France.").with_id("d1"),
        Document::new("The Great Wall of China stretches thousands of kilometres.")
            .with_id("d2"),
        Document::new("Photosynthesis converts sunlight into chemical energy.").with_id("d3"),
    ]
}

#[tokio::test]
async fn paris_answer_cites_its_source() {
    let provider =
        MockProvider::with_responses(vec!["The capital of France is Paris [d1].".into()]);
    let p = pipeline(&provider);
    let report = p.add_documents(geography()).await;
    assert!(report.is_success());
    assert_eq!(report.documents_ingested, 3);

    let result = p
        .query_k("What is the capital of France?", 1)
        .await
        .unwrap();
    assert!(result.answer.contains("Paris"));
    assert_eq!(result.sources, vec!["d1"]);
    assert!(result.has_context);

    let prompt = &provider.prompts()[0][1].content;
    assert!(prompt.contains("<context>"));
    assert!(prompt.contains("Paris is the capital of France."));
    assert!(prompt.contains("What is the capital of France?"));
}

#[tokio::test]
async fn identical_texts_retrieved_twice_assembled_once() {
    let provider = MockProvider::default();
    let p = pipeline(&provider);
    p.add_documents(vec![
        Document::new("The Eiffel Tower is in Paris.").with_id("a"),
        Document::new("The Eiffel Tower is in Paris.").with_id("b"),
    ])
    .await;

    let results = p.retrieve("Eiffel Tower", 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.id, "a:0");
    assert_eq!(results[1].chunk.id, "b:0");

    let ctx = ContextAssembler::assemble(&results, 1000).unwrap();
    assert_eq!(ctx.entries.len(), 1);
    assert_eq!(ctx.sources, vec!["a"]);
    assert_eq!(ctx.duplicates_dropped, 1);
}

#[tokio::test]
async fn overlap_not_below_size_is_config_error() {
    let mut config = test_config();
    config.chunking.chunk_size = 100;
    config.chunking.chunk_overlap = 100;
    let err = RagPipeline::from_config(
        &config,
        Arc::new(MockProvider::default()),
        Arc::new(InMemoryVectorStore::new()),
    )
    .unwrap_err();
    assert!(matches!(err, RagError::Config(_)));
}

#[tokio::test]
async fn transient_embedding_failures_are_retried() {
    let provider = MockProvider::default();
    let p = pipeline(&provider);
    p.add_documents(geography()).await;
    let calls_after_ingest = provider.embed_calls();

    provider.fail_next_embed(LlmError::Unavailable("503 Service Unavailable".into()));
    provider.fail_next_embed(LlmError::RateLimited { retry_after: None });

    let result = p.query("capital of France").await.unwrap();
    assert!(result.has_context);
    assert_eq!(provider.embed_calls(), calls_after_ingest + 3);
}

#[tokio::test]
async fn retries_exhausted_surface_transient_error() {
    let provider = MockProvider::default();
    let p = pipeline(&provider);
    p.add_documents(geography()).await;

    for _ in 0..3 {
        provider.fail_next_embed(LlmError::Unavailable("down".into()));
    }
    let err = p.query("capital of France").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(provider.chat_calls(), 0);
}

#[tokio::test]
async fn fatal_errors_are_not_retried() {
    let provider = MockProvider::default();
    let p = pipeline(&provider);
    p.add_documents(geography()).await;
    let calls_after_ingest = provider.embed_calls();

    provider.fail_next_embed(LlmError::Unauthorized {
        provider: "mock".into(),
        status: 401,
    });
    let err = p.query("capital of France").await.unwrap_err();
    assert!(matches!(err, RagError::FatalProvider(_)));
    assert_eq!(provider.embed_calls(), calls_after_ingest + 1);
}

#[tokio::test]
async fn empty_index_answers_without_context() {
    let provider = MockProvider::with_responses(vec!["I could not find that.".into()]);
    let p = pipeline(&provider);

    assert!(p.retrieve("anything", 3).await.unwrap().is_empty());

    let result = p.query("What is the capital of France?").await.unwrap();
    assert!(!result.has_context);
    assert!(result.sources.is_empty());
    assert!(result.context_used.is_empty());
    assert_eq!(provider.embed_calls(), 0);
    assert_eq!(provider.chat_calls(), 1);

    let prompt = &provider.prompts()[0][1].content;
    assert!(prompt.contains("No relevant information was found"));
}

#[tokio::test]
async fn reingest_is_idempotent() {
    let provider = MockProvider::default();
    let p = pipeline(&provider);

    p.add_documents(geography()).await;
    let first_info = p.get_collection_info().await.unwrap();
    let first = p.retrieve("capital of France", 3).await.unwrap();

    let report = p.add_documents(geography()).await;
    assert_eq!(report.documents_ingested, 3);
    let second_info = p.get_collection_info().await.unwrap();
    let second = p.retrieve("capital of France", 3).await.unwrap();

    assert_eq!(first_info, second_info);
    assert_eq!(first, second);
}

#[tokio::test]
async fn retrieval_bounded_ranked_and_unique() {
    let provider = MockProvider::default();
    let p = pipeline(&provider);
    p.add_documents(geography()).await;

    for k in 1..=5 {
        let results = p.retrieve("capital energy wall", k).await.unwrap();
        assert!(results.len() <= k);
        for pair in results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
        let mut ids: Vec<_> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), results.len());
    }
}

#[tokio::test]
async fn dimension_change_is_rejected() {
    let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let config = test_config();

    let p64 = pipeline_with_store(&MockProvider::default(), &config, Arc::clone(&store));
    p64.add_documents(geography()).await;

    let p32 = pipeline_with_store(
        &MockProvider::default().with_dimensions(32),
        &config,
        Arc::clone(&store),
    );
    let report = p32
        .add_documents(vec![Document::new("new text").with_id("n")])
        .await;
    assert!(matches!(
        report.errors[0].1,
        RagError::DimensionMismatch {
            expected: 64,
            actual: 32
        }
    ));

    let err = p32.query("capital").await.unwrap_err();
    assert!(matches!(err, RagError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn sqlite_index_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.index.backend = IndexBackend::Sqlite;
    config.index.path = dir
        .path()
        .join("index")
        .join("quarry.db")
        .to_string_lossy()
        .into_owned();

    let provider = MockProvider::default();
    {
        let store = open_store(&config.index).await.unwrap();
        let p = pipeline_with_store(&provider, &config, store);
        let report = p.add_documents(geography()).await;
        assert!(report.is_success());
    }

    let store = open_store(&config.index).await.unwrap();
    let p = pipeline_with_store(&provider, &config, store);
    let info = p.get_collection_info().await.unwrap();
    assert_eq!(info.count, 3);
    assert_eq!(info.dimensionality, Some(64));

    let results = p.retrieve("capital of France", 1).await.unwrap();
    assert_eq!(results[0].chunk.source_id, "d1");
}

#[tokio::test]
async fn long_document_chunks_reassemble_in_context() {
    let provider = MockProvider::default();
    let mut config = test_config();
    config.chunking.chunk_size = 60;
    config.chunking.chunk_overlap = 10;
    let p = pipeline_with_store(&provider, &config, Arc::new(InMemoryVectorStore::new()));

    let text = "Rust has ownership. Borrowing is checked at compile time. \
                Lifetimes describe how long references live. Cargo builds crates. \
                Traits describe shared behaviour.";
    let report = p
        .add_documents(vec![Document::new(text).with_id("rust")])
        .await;
    assert!(report.chunks_written > 2);

    let results = p.retrieve("ownership borrowing", 10).await.unwrap();
    assert_eq!(results.len(), report.chunks_written);
    assert!(results.iter().all(|r| r.chunk.source_id == "rust"));
    assert!(results.iter().all(|r| r.chunk.text.chars().count() <= 60));
}

#[tokio::test]
async fn same_id_twice_in_one_batch_keeps_last_version_whole() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.index.backend = IndexBackend::Sqlite;
    config.index.path = dir.path().join("quarry.db").to_string_lossy().into_owned();
    config.chunking.chunk_size = 20;
    config.chunking.chunk_overlap = 0;

    let provider = MockProvider::default();
    let store = open_store(&config.index).await.unwrap();
    let p = pipeline_with_store(&provider, &config, store);

    let long = "alpha beta gamma. delta epsilon zeta. eta theta iota. \
                kappa lambda mu. nu xi omicron.";
    let report = p
        .add_documents(vec![
            Document::new(long).with_id("d1"),
            Document::new("Paris is the capital of France.").with_id("d2"),
            Document::new("short text here.").with_id("d1"),
        ])
        .await;
    assert!(report.is_success());
    assert_eq!(report.documents_ingested, 3);

    let results = p
        .retrieve("alpha delta eta kappa nu short text", 10)
        .await
        .unwrap();
    let d1: Vec<&str> = results
        .iter()
        .filter(|r| r.chunk.source_id == "d1")
        .map(|r| r.chunk.text.as_str())
        .collect();
    assert_eq!(d1, vec!["short text here."]);
    assert!(results.iter().any(|r| r.chunk.source_id == "d2"));
}
