use crate::snapshots::IndexStatus;

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("snapshot {id} not found")]
    SnapshotNotFound { id: i64 },

    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition { from: IndexStatus, to: IndexStatus },

    #[error("{0}")]
    Other(String),
}
