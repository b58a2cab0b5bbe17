use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::DocumentError;

/// Metadata keys the splitter writes onto every chunk.
pub const CHUNK_INDEX_KEY: &str = "chunk_index";
pub const CHUNK_COUNT_KEY: &str = "chunk_count";
pub const CHUNK_OVERLAP_KEY: &str = "chunk_overlap";
pub const SOURCE_ID_KEY: &str = "source_id";

pub const RESERVED_KEYS: [&str; 4] = [
    CHUNK_INDEX_KEY,
    CHUNK_COUNT_KEY,
    CHUNK_OVERLAP_KEY,
    SOURCE_ID_KEY,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<bool> for MetadataValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for MetadataValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

/// Scalar metadata, ordered by key so serialized forms are stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A unit of ingestion. Without an explicit `id`, one is derived from the text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: None,
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The explicit id, or `doc-` followed by 16 hex chars of the blake3 digest of the text.
    #[must_use]
    pub fn resolved_id(&self) -> String {
        self.id.clone().unwrap_or_else(|| content_id(&self.text))
    }

    /// Check the document is well-formed before any chunking or embedding work.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Invalid`] for a blank explicit id or metadata that uses a
    /// key the splitter reserves for provenance.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if let Some(id) = &self.id
            && id.trim().is_empty()
        {
            return Err(DocumentError::Invalid("document id must not be blank".into()));
        }
        if let Some(key) = RESERVED_KEYS.iter().find(|k| self.metadata.contains_key(**k)) {
            return Err(DocumentError::Invalid(format!(
                "metadata key `{key}` is reserved"
            )));
        }
        Ok(())
    }
}

#[must_use]
pub fn content_id(text: &str) -> String {
    let hash = blake3::hash(text.as_bytes()).to_hex();
    format!("doc-{}", &hash[..16])
}

#[must_use]
pub fn chunk_id(source_id: &str, chunk_index: usize) -> String {
    format!("{source_id}:{chunk_index}")
}

/// A retrievable text segment with provenance back to its document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub source_id: String,
    pub chunk_index: usize,
    /// Leading characters shared with the previous chunk of the same document.
    pub overlap: usize,
}

impl Chunk {
    /// Rebuild a chunk from an index entry, reading provenance from its metadata.
    #[must_use]
    pub fn from_entry(id: String, text: String, metadata: Metadata) -> Self {
        let source_id = metadata
            .get(SOURCE_ID_KEY)
            .and_then(MetadataValue::as_str)
            .map_or_else(|| id.clone(), str::to_owned);
        let int_field = |key: &str| {
            metadata
                .get(key)
                .and_then(MetadataValue::as_i64)
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(0)
        };
        let chunk_index = int_field(CHUNK_INDEX_KEY);
        let overlap = int_field(CHUNK_OVERLAP_KEY);
        Self {
            id,
            text,
            metadata,
            source_id,
            chunk_index,
            overlap,
        }
    }
}
