use quarry_llm::LlmError;
use quarry_memory::VectorStoreError;
use quarry_memory::document::DocumentError;

/// Failure taxonomy of the pipeline. Lower-level errors are classified on conversion.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("transient provider error: {0}")]
    TransientProvider(#[source] LlmError),

    #[error("provider error: {0}")]
    FatalProvider(#[source] LlmError),

    #[error("embedding dimensionality mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: u64, actual: u64 },

    #[error("batch of {size} exceeds provider limit of {max}")]
    BatchTooLarge { size: usize, max: usize },

    #[error("vector index error: {0}")]
    Index(#[source] VectorStoreError),

    #[error("operation cancelled")]
    Cancelled,
}

impl RagError {
    /// Whether repeating the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider(_))
    }

    /// Short stable label for reports and logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Config(_) => "config",
            Self::TransientProvider(_) => "transient_provider",
            Self::FatalProvider(_) => "fatal_provider",
            Self::DimensionMismatch { .. } => "dimension_mismatch",
            Self::BatchTooLarge { .. } => "batch_too_large",
            Self::Index(_) => "index",
            Self::Cancelled => "cancelled",
        }
    }
}

fn widen(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

impl From<LlmError> for RagError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::InvalidInput(msg) => Self::Validation(msg),
            LlmError::BatchTooLarge { size, max } => Self::BatchTooLarge { size, max },
            LlmError::DimensionMismatch { expected, actual } => Self::DimensionMismatch {
                expected: widen(expected),
                actual: widen(actual),
            },
            LlmError::Cancelled => Self::Cancelled,
            e if e.is_transient() => Self::TransientProvider(e),
            e => Self::FatalProvider(e),
        }
    }
}

impl From<VectorStoreError> for RagError {
    fn from(e: VectorStoreError) -> Self {
        match e {
            VectorStoreError::DimensionMismatch {
                expected, actual, ..
            } => Self::DimensionMismatch { expected, actual },
            e => Self::Index(e),
        }
    }
}

impl From<DocumentError> for RagError {
    fn from(e: DocumentError) -> Self {
        match e {
            DocumentError::InvalidConfig(msg) => Self::Config(msg),
            DocumentError::Invalid(msg) => Self::Validation(msg),
            e => Self::Validation(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn provider_errors_are_classified() {
        let transient: RagError = LlmError::RateLimited {
            retry_after: Some(Duration::from_secs(1)),
        }
        .into();
        assert!(matches!(transient, RagError::TransientProvider(_)));
        assert!(transient.is_retryable());

        let fatal: RagError = LlmError::Unauthorized {
            provider: "openai".into(),
            status: 401,
        }
        .into();
        assert!(matches!(fatal, RagError::FatalProvider(_)));
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn gateway_validation_maps_to_taxonomy() {
        assert!(matches!(
            RagError::from(LlmError::InvalidInput("empty".into())),
            RagError::Validation(_)
        ));
        assert!(matches!(
            RagError::from(LlmError::BatchTooLarge { size: 10, max: 4 }),
            RagError::BatchTooLarge { size: 10, max: 4 }
        ));
        assert!(matches!(
            RagError::from(LlmError::Cancelled),
            RagError::Cancelled
        ));
    }

    #[test]
    fn index_dimension_mismatch_surfaces_directly() {
        let err: RagError = VectorStoreError::DimensionMismatch {
            collection: "docs".into(),
            expected: 3,
            actual: 4,
        }
        .into();
        assert!(matches!(
            err,
            RagError::DimensionMismatch {
                expected: 3,
                actual: 4
            }
        ));
        assert_eq!(err.kind(), "dimension_mismatch");

        let other: RagError = VectorStoreError::Search("boom".into()).into();
        assert!(matches!(other, RagError::Index(_)));
    }

    #[test]
    fn splitter_config_error_is_config() {
        let err: RagError = DocumentError::InvalidConfig("overlap".into()).into();
        assert!(matches!(err, RagError::Config(_)));
    }
}
