use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;

use crate::document::{Metadata, MetadataValue};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("collection {collection} holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: u64,
        actual: u64,
    },
}

/// A stored chunk: its id, embedding, text and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionStats {
    pub count: u64,
    /// `None` when the collection does not exist.
    pub dimensionality: Option<u64>,
}

/// Exact-match conditions on entry metadata. All `must` conditions hold and no `must_not` does.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorFilter {
    pub must: Vec<FieldCondition>,
    pub must_not: Vec<FieldCondition>,
}

impl VectorFilter {
    #[must_use]
    pub fn must_eq(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.must.push(FieldCondition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn must_not_eq(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.must_not.push(FieldCondition {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Build a `must` filter from metadata pairs. Float values cannot be matched exactly
    /// and are skipped.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        metadata
            .iter()
            .filter_map(|(k, v)| FieldValue::try_from(v).ok().map(|fv| (k, fv)))
            .fold(Self::default(), |f, (k, v)| f.must_eq(k.clone(), v))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Integer(i64),
    Text(String),
    Bool(bool),
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl TryFrom<&MetadataValue> for FieldValue {
    type Error = ();

    fn try_from(value: &MetadataValue) -> Result<Self, Self::Error> {
        match value {
            MetadataValue::Integer(i) => Ok(Self::Integer(*i)),
            MetadataValue::Text(s) => Ok(Self::Text(s.clone())),
            MetadataValue::Bool(b) => Ok(Self::Bool(*b)),
            MetadataValue::Float(_) => Err(()),
        }
    }
}

pub(crate) fn field_matches(val: &MetadataValue, expected: &FieldValue) -> bool {
    match (val, expected) {
        (MetadataValue::Integer(a), FieldValue::Integer(b)) => a == b,
        (MetadataValue::Text(a), FieldValue::Text(b)) => a == b,
        (MetadataValue::Bool(a), FieldValue::Bool(b)) => a == b,
        _ => false,
    }
}

pub(crate) fn matches_filter(metadata: &Metadata, filter: &VectorFilter) -> bool {
    let holds = |cond: &FieldCondition| {
        metadata
            .get(&cond.field)
            .is_some_and(|v| field_matches(v, &cond.value))
    };
    filter.must.iter().all(holds) && !filter.must_not.iter().any(holds)
}

/// Cosine similarity in `[-1, 1]`; zero when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Order hits by descending score, breaking ties by ascending id.
pub fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn vector_len(vector: &[f32]) -> u64 {
    u64::try_from(vector.len()).unwrap_or(u64::MAX)
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Persistent similarity index over chunk embeddings, partitioned into named collections.
///
/// A collection's dimensionality is fixed by `ensure_collection`; entries and queries of any
/// other length fail with [`VectorStoreError::DimensionMismatch`].
pub trait VectorStore: Send + Sync {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Insert or replace entries by id. The collection must exist.
    fn upsert(
        &self,
        collection: &str,
        entries: Vec<IndexEntry>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Swap every entry whose `source_id` metadata equals `source_id` for `entries`, returning
    /// how many entries the source held before. The collection must exist.
    ///
    /// On failure the source keeps its previous entries. Backends without transactions write
    /// the new entries before removing the old ones.
    fn replace_source(
        &self,
        collection: &str,
        source_id: &str,
        entries: Vec<IndexEntry>,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>>;

    /// Top `limit` entries by cosine similarity, ranked as by [`rank_hits`].
    /// A missing collection yields no hits.
    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, VectorStoreError>>;

    fn delete(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Delete every entry matching `filter`, returning how many were removed.
    fn delete_matching(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>>;

    /// Entry count and dimensionality. A missing collection reports zero entries.
    fn stats(&self, collection: &str) -> BoxFuture<'_, Result<CollectionStats, VectorStoreError>>;
}
