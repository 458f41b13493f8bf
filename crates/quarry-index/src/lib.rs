//! Repository indexing and retrieval pipeline.
//!
//! Source files are parsed into structurally bounded chunks (with a
//! line-based fallback), embedded through a cache-fronted provider, and
//! stored in a vector collection plus a persisted chunk table. Queries run
//! through semantic search, optional keyword fusion, and an optional
//! LLM reranking pass.

pub mod chunker;
pub mod error;
pub mod hybrid;
pub mod indexer;
pub mod languages;
pub mod reranker;
pub mod retriever;

pub use error::{IndexError, Result};
