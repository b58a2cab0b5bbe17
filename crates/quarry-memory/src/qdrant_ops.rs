//! Qdrant-backed vector index.

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointId, PointStruct, PointsIdsList, ScoredPoint, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder, value::Kind, vectors_config,
};
use uuid::Uuid;

use crate::document::{Metadata, MetadataValue, SOURCE_ID_KEY};
use crate::vector_store::{
    BoxFuture, CollectionStats, FieldCondition, FieldValue, IndexEntry, SearchHit, VectorFilter,
    VectorStore, VectorStoreError, rank_hits, vector_len,
};

type QdrantResult<T> = Result<T, Box<qdrant_client::QdrantError>>;

const CHUNK_ID_FIELD: &str = "chunk_id";
const TEXT_FIELD: &str = "text";
const METADATA_FIELD: &str = "metadata";

/// Thin wrapper over the [`Qdrant`] client storing chunks as points with cosine distance.
///
/// Point ids are UUIDv5 digests of chunk ids; the chunk id itself travels in the payload.
#[derive(Clone)]
pub struct QdrantOps {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantOps").finish_non_exhaustive()
    }
}

impl QdrantOps {
    /// Create a new `QdrantOps` connected to the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(url: &str) -> QdrantResult<Self> {
        let client = Qdrant::from_url(url).build().map_err(Box::new)?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn client(&self) -> &Qdrant {
        &self.client
    }

    /// Vector size of an existing collection, `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if Qdrant cannot be reached.
    pub async fn dimensions(&self, collection: &str) -> QdrantResult<Option<u64>> {
        if !self
            .client
            .collection_exists(collection)
            .await
            .map_err(Box::new)?
        {
            return Ok(None);
        }
        let info = self
            .client
            .collection_info(collection)
            .await
            .map_err(Box::new)?;
        let size = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|c| match c {
                vectors_config::Config::Params(params) => Some(params.size),
                vectors_config::Config::ParamsMap(_) => None,
            });
        Ok(size)
    }

    async fn count(&self, collection: &str, filter: Option<Filter>) -> QdrantResult<u64> {
        let mut builder = CountPointsBuilder::new(collection).exact(true);
        if let Some(f) = filter {
            builder = builder.filter(f);
        }
        let response = self.client.count(builder).await.map_err(Box::new)?;
        Ok(response.result.map_or(0, |r| r.count))
    }

    async fn checked_dims(&self, collection: &str, actual: u64) -> Result<bool, VectorStoreError> {
        let Some(expected) = self
            .dimensions(collection)
            .await
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?
        else {
            return Ok(false);
        };
        if expected != actual {
            return Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_owned(),
                expected,
                actual,
            });
        }
        Ok(true)
    }
}

/// Deterministic point id for a chunk id.
#[must_use]
pub fn point_id(chunk_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
}

fn entry_to_point(entry: IndexEntry) -> Result<PointStruct, VectorStoreError> {
    let payload = serde_json::json!({
        CHUNK_ID_FIELD: entry.id,
        TEXT_FIELD: entry.text,
        METADATA_FIELD: entry.metadata,
    });
    let payload: HashMap<String, qdrant_client::qdrant::Value> = serde_json::from_value(payload)
        .map_err(|e| VectorStoreError::Serialization(e.to_string()))?;
    Ok(PointStruct::new(point_id(&entry.id), entry.vector, payload))
}

fn metadata_value(kind: Kind) -> Option<MetadataValue> {
    match kind {
        Kind::StringValue(s) => Some(MetadataValue::Text(s)),
        Kind::IntegerValue(i) => Some(MetadataValue::Integer(i)),
        Kind::DoubleValue(d) => Some(MetadataValue::Float(d)),
        Kind::BoolValue(b) => Some(MetadataValue::Bool(b)),
        _ => None,
    }
}

fn scored_point_to_hit(point: ScoredPoint) -> SearchHit {
    let mut payload = point.payload;
    let mut take_string = |field: &str| match payload.remove(field).and_then(|v| v.kind) {
        Some(Kind::StringValue(s)) => s,
        _ => String::new(),
    };
    let id = take_string(CHUNK_ID_FIELD);
    let text = take_string(TEXT_FIELD);

    let metadata: Metadata = match payload.remove(METADATA_FIELD).and_then(|v| v.kind) {
        Some(Kind::StructValue(s)) => s
            .fields
            .into_iter()
            .filter_map(|(k, v)| Some((k, metadata_value(v.kind?)?)))
            .collect(),
        _ => Metadata::new(),
    };

    SearchHit {
        id,
        score: point.score,
        text,
        metadata,
    }
}

fn field_condition_to_qdrant(cond: FieldCondition) -> Condition {
    let key = format!("{METADATA_FIELD}.{}", cond.field);
    match cond.value {
        FieldValue::Integer(v) => Condition::matches(key, v),
        FieldValue::Text(v) => Condition::matches(key, v),
        FieldValue::Bool(v) => Condition::matches(key, v),
    }
}

fn vector_filter_to_qdrant(filter: VectorFilter) -> Filter {
    Filter {
        must: filter
            .must
            .into_iter()
            .map(field_condition_to_qdrant)
            .collect(),
        must_not: filter
            .must_not
            .into_iter()
            .map(field_condition_to_qdrant)
            .collect(),
        ..Default::default()
    }
}

impl VectorStore for QdrantOps {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if self.checked_dims(&collection, vector_size).await? {
                return Ok(());
            }
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&collection)
                        .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
                )
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            tracing::info!(collection, vector_size, "created Qdrant collection");
            Ok(())
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            if !self
                .client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?
            {
                return Ok(());
            }
            self.client
                .delete_collection(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
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
            if entries.is_empty() {
                return Ok(());
            }
            let actual = vector_len(&entries[0].vector);
            if !self.checked_dims(&collection, actual).await? {
                return Err(VectorStoreError::Upsert(format!(
                    "collection {collection} not found"
                )));
            }
            if let Some(bad) = entries.iter().find(|e| vector_len(&e.vector) != actual) {
                return Err(VectorStoreError::DimensionMismatch {
                    collection,
                    expected: actual,
                    actual: vector_len(&bad.vector),
                });
            }

            let points = entries
                .into_iter()
                .map(entry_to_point)
                .collect::<Result<Vec<_>, _>>()?;
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, points).wait(true))
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
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
        let source = vector_filter_to_qdrant(
            VectorFilter::default().must_eq(SOURCE_ID_KEY, source_id),
        );
        Box::pin(async move {
            let previous = self
                .count(&collection, Some(source.clone()))
                .await
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;
            let kept: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();

            // Upsert before pruning: a failed write leaves the previous version in place.
            self.upsert(&collection, entries).await?;
            let mut stale = source;
            if !kept.is_empty() {
                stale.must_not.push(Condition::matches(CHUNK_ID_FIELD, kept));
            }
            self.client
                .delete_points(DeletePointsBuilder::new(&collection).points(stale).wait(true))
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(previous)
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
            if !self.checked_dims(&collection, vector_len(&vector)).await? {
                return Ok(Vec::new());
            }
            let mut builder =
                SearchPointsBuilder::new(&collection, vector, limit).with_payload(true);
            if let Some(f) = filter.filter(|f| !f.is_empty()) {
                builder = builder.filter(vector_filter_to_qdrant(f));
            }
            let response = self
                .client
                .search_points(builder)
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            let mut hits: Vec<SearchHit> =
                response.result.into_iter().map(scored_point_to_hit).collect();
            rank_hits(&mut hits);
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
            let ids: Vec<PointId> = ids.iter().map(|id| PointId::from(point_id(id))).collect();
            self.client
                .delete_points(
                    DeletePointsBuilder::new(&collection)
                        .points(PointsIdsList { ids })
                        .wait(true),
                )
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
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
            if !self
                .client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?
            {
                return Ok(0);
            }
            let filter = vector_filter_to_qdrant(filter);
            let matching = self
                .count(&collection, Some(filter.clone()))
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            if matching == 0 {
                return Ok(0);
            }
            self.client
                .delete_points(DeletePointsBuilder::new(&collection).points(filter).wait(true))
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            Ok(matching)
        })
    }

    fn stats(&self, collection: &str) -> BoxFuture<'_, Result<CollectionStats, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            let Some(dims) = self
                .dimensions(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?
            else {
                return Ok(CollectionStats::default());
            };
            let count = self
                .count(&collection, None)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
            Ok(CollectionStats {
                count,
                dimensionality: Some(dims),
            })
        })
    }
}
