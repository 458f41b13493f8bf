//! Error types for quarry-index.

/// Errors that can occur during indexing and retrieval operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage-layer error (`SQLite`-backed stores).
    #[error("storage error: {0}")]
    Memory(#[from] quarry_memory::MemoryError),

    /// Vector store error.
    #[error("vector store error: {0}")]
    VectorStore(#[from] quarry_memory::VectorStoreError),

    /// LLM provider error (embedding or chat).
    #[error("LLM error: {0}")]
    Llm(#[from] quarry_llm::LlmError),

    /// No completed index exists for the project; retrieval cannot proceed.
    #[error("no completed index for project {project_id}")]
    NoCompletedIndex { project_id: String },

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IndexError`.
pub type Result<T> = std::result::Result<T, IndexError>;
