mod env;
mod types;

#[cfg(test)]
mod tests;

pub use types::*;

use std::path::Path;

use crate::error::RagError;

impl Config {
    /// Load configuration from a TOML file with env var overrides, then validate it.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if the file exists but cannot be read or parsed, or if
    /// the resulting configuration is invalid.
    pub fn load(path: &Path) -> Result<Self, RagError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                RagError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            toml::from_str::<Self>(&content).map_err(|e| {
                RagError::Config(format!("failed to parse {}: {e}", path.display()))
            })?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] naming the first offending setting.
    pub fn validate(&self) -> Result<(), RagError> {
        let fail = |msg: String| Err(RagError::Config(msg));

        if self.chunking.chunk_size == 0 {
            return fail("chunking.chunk_size must be greater than zero".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return fail(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap, self.chunking.chunk_size
            ));
        }
        if self.retrieval.default_k == 0 {
            return fail("retrieval.default_k must be greater than zero".into());
        }
        if self.retrieval.context_budget == 0 {
            return fail("retrieval.context_budget must be greater than zero".into());
        }
        if let Some(t) = self.retrieval.score_threshold
            && !(-1.0..=1.0).contains(&t)
        {
            return fail(format!(
                "retrieval.score_threshold ({t}) must lie in [-1, 1]"
            ));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return fail(format!(
                "llm.temperature ({}) must lie in [0, 2]",
                self.llm.temperature
            ));
        }
        if self.llm.max_tokens == 0 {
            return fail("llm.max_tokens must be greater than zero".into());
        }
        if self.llm.timeout_secs == 0 {
            return fail("llm.timeout_secs must be greater than zero".into());
        }
        if self.llm.embed_batch_size == 0 || self.llm.embed_concurrency == 0 {
            return fail("llm.embed_batch_size and llm.embed_concurrency must be greater than zero".into());
        }
        if self.ingest.batch_size == 0 || self.ingest.concurrency == 0 {
            return fail("ingest.batch_size and ingest.concurrency must be greater than zero".into());
        }
        if self.retry.max_attempts == 0 {
            return fail("retry.max_attempts must be at least 1".into());
        }
        if self.index.collection.trim().is_empty() {
            return fail("index.collection must not be empty".into());
        }
        Ok(())
    }
}
