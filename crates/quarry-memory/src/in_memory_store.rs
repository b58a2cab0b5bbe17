use std::collections::HashMap;
use std::sync::RwLock;

use crate::document::{Metadata, SOURCE_ID_KEY};
use crate::vector_store::{
    BoxFuture, CollectionStats, IndexEntry, SearchHit, VectorFilter, VectorStore,
    VectorStoreError, cosine_similarity, matches_filter, rank_hits, vector_len,
};

struct StoredEntry {
    vector: Vec<f32>,
    text: String,
    metadata: Metadata,
}

struct InMemoryCollection {
    dimensions: u64,
    entries: HashMap<String, StoredEntry>,
}

impl InMemoryCollection {
    fn check_dims(&self, name: &str, actual: u64) -> Result<(), VectorStoreError> {
        if actual == self.dimensions {
            Ok(())
        } else {
            Err(VectorStoreError::DimensionMismatch {
                collection: name.to_owned(),
                expected: self.dimensions,
                actual,
            })
        }
    }
}

/// Non-persistent index for tests and throwaway sessions.
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, InMemoryCollection>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore").finish_non_exhaustive()
    }
}

impl VectorStore for InMemoryVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            let col = cols
                .entry(collection.clone())
                .or_insert_with(|| InMemoryCollection {
                    dimensions: vector_size,
                    entries: HashMap::new(),
                });
            col.check_dims(&collection, vector_size)
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols.contains_key(&collection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            cols.remove(&collection);
            Ok(())
        })
    }

    fn upsert(
        &self,
        collection: &str,
        entries: Vec<IndexEntry>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Upsert(format!("collection {collection} not found"))
            })?;
            for e in &entries {
                col.check_dims(&collection, vector_len(&e.vector))?;
            }
            for e in entries {
                col.entries.insert(
                    e.id,
                    StoredEntry {
                        vector: e.vector,
                        text: e.text,
                        metadata: e.metadata,
                    },
                );
            }
            Ok(())
        })
    }

    fn replace_source(
        &self,
        collection: &str,
        source_id: &str,
        entries: Vec<IndexEntry>,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        let source = VectorFilter::default().must_eq(SOURCE_ID_KEY, source_id);
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let col = cols.get_mut(&collection).ok_or_else(|| {
                VectorStoreError::Upsert(format!("collection {collection} not found"))
            })?;
            for e in &entries {
                col.check_dims(&collection, vector_len(&e.vector))?;
            }

            let before = col.entries.len();
            col.entries.retain(|_, e| !matches_filter(&e.metadata, &source));
            let removed = u64::try_from(before - col.entries.len()).unwrap_or(u64::MAX);
            for e in entries {
                col.entries.insert(
                    e.id,
                    StoredEntry {
                        vector: e.vector,
                        text: e.text,
                        metadata: e.metadata,
                    },
                );
            }
            Ok(removed)
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
        filter: Option<VectorFilter>,
    ) -> BoxFuture<'_, Result<Vec<SearchHit>, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let Some(col) = cols.get(&collection) else {
                return Ok(Vec::new());
            };
            col.check_dims(&collection, vector_len(&vector))?;

            let filter = filter.unwrap_or_default();
            let mut hits: Vec<SearchHit> = col
                .entries
                .iter()
                .filter(|(_, e)| matches_filter(&e.metadata, &filter))
                .map(|(id, e)| SearchHit {
                    id: id.clone(),
                    score: cosine_similarity(&vector, &e.vector),
                    text: e.text.clone(),
                    metadata: e.metadata.clone(),
                })
                .collect();

            rank_hits(&mut hits);
            hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
            Ok(hits)
        })
    }

    fn delete(
        &self,
        collection: &str,
        ids: Vec<String>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            if let Some(col) = cols.get_mut(&collection) {
                for id in &ids {
                    col.entries.remove(id);
                }
            }
            Ok(())
        })
    }

    fn delete_matching(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let mut cols = self
                .collections
                .write()
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            let Some(col) = cols.get_mut(&collection) else {
                return Ok(0);
            };
            let before = col.entries.len();
            col.entries.retain(|_, e| !matches_filter(&e.metadata, &filter));
            Ok(u64::try_from(before - col.entries.len()).unwrap_or(u64::MAX))
        })
    }

    fn stats(&self, collection: &str) -> BoxFuture<'_, Result<CollectionStats, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let cols = self
                .collections
                .read()
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(cols
                .get(&collection)
                .map_or_else(CollectionStats::default, |col| CollectionStats {
                    count: u64::try_from(col.entries.len()).unwrap_or(u64::MAX),
                    dimensionality: Some(col.dimensions),
                }))
        })
    }
}
