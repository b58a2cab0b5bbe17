use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::document::{Metadata, SOURCE_ID_KEY};
use crate::error::MemoryError;
use crate::vector_store::{
    BoxFuture, CollectionStats, IndexEntry, SearchHit, VectorFilter, VectorStore,
    VectorStoreError, cosine_similarity, matches_filter, rank_hits, vector_len,
};

/// Durable single-file index. Vectors live in `SQLite` as little-endian `f32` blobs and
/// search is an exact scan over the collection.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (or create) the index database and run migrations.
    ///
    /// Writes are committed with `synchronous = FULL` so an acknowledged upsert survives a
    /// crash. `":memory:"` opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the database cannot be
    /// opened, or migrations fail.
    pub async fn open(path: &str) -> Result<Self, MemoryError> {
        let opts = if path == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };
        let opts = opts
            .synchronous(SqliteSynchronous::Full)
            .foreign_keys(true);

        // An in-memory database exists per connection, so it must not be pooled wider.
        let max_connections = if path == ":memory:" { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!(path, "opened vector index");
        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn dimensions(&self, collection: &str) -> Result<Option<u64>, MemoryError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT dimensions FROM collections WHERE name = ?")
                .bind(collection)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(d,)| u64::try_from(d)).transpose().map_err(Into::into)
    }

    async fn ensure_collection_impl(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> Result<(), MemoryError> {
        if let Some(existing) = self.dimensions(collection).await? {
            return check_dims(collection, existing, vector_size);
        }
        sqlx::query("INSERT INTO collections (name, dimensions) VALUES (?, ?) ON CONFLICT(name) DO NOTHING")
            .bind(collection)
            .bind(i64::try_from(vector_size)?)
            .execute(&self.pool)
            .await?;
        let stored = self.dimensions(collection).await?.unwrap_or(vector_size);
        check_dims(collection, stored, vector_size)
    }

    async fn upsert_impl(
        &self,
        collection: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), MemoryError> {
        let dims = self.dimensions(collection).await?.ok_or_else(|| {
            VectorStoreError::Upsert(format!("collection {collection} not found"))
        })?;
        for e in &entries {
            check_dims(collection, dims, vector_len(&e.vector))?;
        }

        let mut tx = self.pool.begin().await?;
        for e in &entries {
            insert_entry(&mut *tx, collection, e).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_source_impl(
        &self,
        collection: &str,
        source_id: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<u64, MemoryError> {
        let dims = self.dimensions(collection).await?.ok_or_else(|| {
            VectorStoreError::Upsert(format!("collection {collection} not found"))
        })?;

        // Dropping `tx` on any error rolls the delete back.
        let mut tx = self.pool.begin().await?;
        let removed = sqlx::query(
            "DELETE FROM entries WHERE collection = ? AND json_extract(metadata, ?) = ?",
        )
        .bind(collection)
        .bind(format!("$.{SOURCE_ID_KEY}"))
        .bind(source_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        for e in &entries {
            check_dims(collection, dims, vector_len(&e.vector))?;
            insert_entry(&mut *tx, collection, e).await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn search_impl(
        &self,
        collection: &str,
        vector: &[f32],
        limit: u64,
        filter: Option<&VectorFilter>,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        let Some(dims) = self.dimensions(collection).await? else {
            return Ok(Vec::new());
        };
        check_dims(collection, dims, vector_len(vector))?;

        let rows = sqlx::query("SELECT id, vector, text, metadata FROM entries WHERE collection = ?")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata: Metadata = serde_json::from_str(row.try_get::<&str, _>("metadata")?)?;
            if filter.is_some_and(|f| !matches_filter(&metadata, f)) {
                continue;
            }
            let stored = blob_to_vector(row.try_get::<&[u8], _>("vector")?)?;
            hits.push(SearchHit {
                id: row.try_get("id")?,
                score: cosine_similarity(vector, &stored),
                text: row.try_get("text")?,
                metadata,
            });
        }

        rank_hits(&mut hits);
        hits.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(hits)
    }

    async fn delete_impl(&self, collection: &str, ids: &[String]) -> Result<u64, MemoryError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for id in ids {
            removed += sqlx::query("DELETE FROM entries WHERE collection = ? AND id = ?")
                .bind(collection)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn delete_matching_impl(
        &self,
        collection: &str,
        filter: &VectorFilter,
    ) -> Result<u64, MemoryError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, metadata FROM entries WHERE collection = ?")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;

        let mut ids = Vec::new();
        for (id, metadata) in rows {
            let metadata: Metadata = serde_json::from_str(&metadata)?;
            if matches_filter(&metadata, filter) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            return Ok(0);
        }
        self.delete_impl(collection, &ids).await
    }

    async fn stats_impl(&self, collection: &str) -> Result<CollectionStats, MemoryError> {
        let Some(dims) = self.dimensions(collection).await? else {
            return Ok(CollectionStats::default());
        };
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(CollectionStats {
            count: u64::try_from(count)?,
            dimensionality: Some(dims),
        })
    }
}

async fn insert_entry(
    conn: &mut SqliteConnection,
    collection: &str,
    e: &IndexEntry,
) -> Result<(), MemoryError> {
    sqlx::query(
        "INSERT INTO entries (collection, id, vector, text, metadata) VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(collection, id) DO UPDATE SET \
         vector = excluded.vector, text = excluded.text, metadata = excluded.metadata, \
         updated_at = datetime('now')",
    )
    .bind(collection)
    .bind(&e.id)
    .bind(vector_to_blob(&e.vector))
    .bind(&e.text)
    .bind(serde_json::to_string(&e.metadata)?)
    .execute(conn)
    .await?;
    Ok(())
}

fn check_dims(collection: &str, expected: u64, actual: u64) -> Result<(), MemoryError> {
    if expected == actual {
        Ok(())
    } else {
        Err(VectorStoreError::DimensionMismatch {
            collection: collection.to_owned(),
            expected,
            actual,
        }
        .into())
    }
}

fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_vector(blob: &[u8]) -> Result<Vec<f32>, MemoryError> {
    if blob.len() % 4 != 0 {
        return Err(VectorStoreError::Serialization(format!(
            "vector blob length {} is not a multiple of 4",
            blob.len()
        ))
        .into());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

impl VectorStore for SqliteVectorStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.ensure_collection_impl(&collection, vector_size)
                .await
                .map_err(|e| e.into_vector_store(VectorStoreError::Collection))
        })
    }

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.dimensions(&collection)
                .await
                .map(|d| d.is_some())
                .map_err(|e| e.into_vector_store(VectorStoreError::Collection))
        })
    }

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            sqlx::query("DELETE FROM collections WHERE name = ?")
                .bind(&collection)
                .execute(&self.pool)
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
            self.upsert_impl(&collection, entries)
                .await
                .map_err(|e| e.into_vector_store(VectorStoreError::Upsert))
        })
    }

    fn replace_source(
        &self,
        collection: &str,
        source_id: &str,
        entries: Vec<IndexEntry>,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        let source_id = source_id.to_owned();
        Box::pin(async move {
            self.replace_source_impl(&collection, &source_id, entries)
                .await
                .map_err(|e| e.into_vector_store(VectorStoreError::Upsert))
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
            self.search_impl(&collection, &vector, limit, filter.as_ref())
                .await
                .map_err(|e| e.into_vector_store(VectorStoreError::Search))
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
            self.delete_impl(&collection, &ids)
                .await
                .map(|_| ())
                .map_err(|e| e.into_vector_store(VectorStoreError::Delete))
        })
    }

    fn delete_matching(
        &self,
        collection: &str,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<u64, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.delete_matching_impl(&collection, &filter)
                .await
                .map_err(|e| e.into_vector_store(VectorStoreError::Delete))
        })
    }

    fn stats(&self, collection: &str) -> BoxFuture<'_, Result<CollectionStats, VectorStoreError>> {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.stats_impl(&collection)
                .await
                .map_err(|e| e.into_vector_store(VectorStoreError::Collection))
        })
    }
}
