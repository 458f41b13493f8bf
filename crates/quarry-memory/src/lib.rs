//! SQLite-backed chunk and snapshot persistence with pluggable vector search.

pub mod cache;
pub mod chunks;
pub mod error;
pub mod in_memory_store;
pub mod qdrant_ops;
pub mod snapshots;
pub mod sqlite;
pub mod types;
pub mod vector_store;

pub use cache::{CacheStats, EmbeddingCache};
pub use chunks::{ChunkRecord, ChunkStore};
pub use error::MemoryError;
pub use in_memory_store::InMemoryVectorStore;
pub use qdrant_ops::QdrantOps;
pub use snapshots::{IndexStatus, SnapshotRow, SnapshotStore};
pub use sqlite::SqliteStore;
pub use types::SnapshotId;
pub use vector_store::{
    FieldCondition, FieldValue, ScoredVectorPoint, ScrollPage, ScrollPoint, VectorFilter,
    VectorPoint, VectorStore, VectorStoreError,
};
