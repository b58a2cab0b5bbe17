//! Documents, chunking, and persistent vector indexes for retrieval-augmented generation.

pub mod document;
pub mod error;
pub mod in_memory_store;
pub mod qdrant_ops;
pub mod sqlite_store;
pub mod vector_store;

pub use error::MemoryError;
pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use sqlite_store::SqliteVectorStore;
pub use vector_store::{
    CollectionStats, FieldCondition, FieldValue, IndexEntry, SearchHit, VectorFilter, VectorStore,
    VectorStoreError,
};
