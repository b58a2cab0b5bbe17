use crate::vector_store::VectorStoreError;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Qdrant error: {0}")]
    Qdrant(#[from] Box<qdrant_client::QdrantError>),

    #[error("vector store error: {0}")]
    VectorStore(#[from] VectorStoreError),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("integer conversion: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl MemoryError {
    /// Fold a backend failure into the [`VectorStoreError`] variant chosen by `wrap`.
    /// Dimension mismatches pass through unchanged.
    pub(crate) fn into_vector_store(self, wrap: fn(String) -> VectorStoreError) -> VectorStoreError {
        match self {
            Self::VectorStore(e) => e,
            other => wrap(other.to_string()),
        }
    }
}
