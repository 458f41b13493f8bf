//! Index-snapshot registry: one row per indexing run over a project ref.

use sqlx::SqlitePool;

use crate::error::MemoryError;
use crate::types::SnapshotId;

/// Lifecycle of an indexing run. Transitions are forward-only except to
/// `Failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Pending,
    Indexing,
    Updating,
    Completed,
    Failed,
}

impl IndexStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexing => "indexing",
            Self::Updating => "updating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "indexing" => Some(Self::Indexing),
            "updating" => Some(Self::Updating),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        match (self, to) {
            (Self::Failed, _) => false,
            (_, Self::Failed) => true,
            (Self::Pending, Self::Indexing)
            | (Self::Indexing | Self::Updating, Self::Completed)
            | (Self::Completed, Self::Updating) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub id: SnapshotId,
    pub project_id: String,
    pub git_ref: String,
    pub status: IndexStatus,
    pub total_files: i64,
    pub total_chunks: i64,
    pub total_tokens: i64,
    pub cost_cents: f64,
    pub created_at: String,
    pub completed_at: Option<String>,
    pub last_used_at: Option<String>,
}

type SnapshotTuple = (
    i64,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    f64,
    String,
    Option<String>,
    Option<String>,
);

fn row_to_snapshot(row: SnapshotTuple) -> Result<SnapshotRow, MemoryError> {
    let status = IndexStatus::parse(&row.3)
        .ok_or_else(|| MemoryError::Other(format!("unknown snapshot status: {}", row.3)))?;
    Ok(SnapshotRow {
        id: SnapshotId(row.0),
        project_id: row.1,
        git_ref: row.2,
        status,
        total_files: row.4,
        total_chunks: row.5,
        total_tokens: row.6,
        cost_cents: row.7,
        created_at: row.8,
        completed_at: row.9,
        last_used_at: row.10,
    })
}

const SELECT_COLUMNS: &str = "id, project_id, git_ref, status, total_files, total_chunks, \
                              total_tokens, cost_cents, created_at, completed_at, last_used_at";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new snapshot row in `Pending` status.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create(&self, project_id: &str, git_ref: &str) -> Result<SnapshotId, MemoryError> {
        let result = sqlx::query(
            "INSERT INTO index_snapshots (project_id, git_ref, status) VALUES (?, ?, 'pending')",
        )
        .bind(project_id)
        .bind(git_ref)
        .execute(&self.pool)
        .await?;
        Ok(SnapshotId(result.last_insert_rowid()))
    }

    /// Fetch a snapshot by id.
    ///
    /// # Errors
    ///
    /// Returns `SnapshotNotFound` if no such row exists.
    pub async fn get(&self, id: SnapshotId) -> Result<SnapshotRow, MemoryError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM index_snapshots WHERE id = ?");
        let row: Option<SnapshotTuple> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map_or(Err(MemoryError::SnapshotNotFound { id: id.0 }), row_to_snapshot)
    }

    /// Advance a snapshot's status, enforcing the transition matrix.
    /// `Completed` and `Failed` also stamp `completed_at`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` when the move is not allowed.
    pub async fn set_status(&self, id: SnapshotId, to: IndexStatus) -> Result<(), MemoryError> {
        let current = self.get(id).await?.status;
        if !current.can_transition(to) {
            return Err(MemoryError::InvalidTransition { from: current, to });
        }

        if matches!(to, IndexStatus::Completed | IndexStatus::Failed) {
            sqlx::query(
                "UPDATE index_snapshots SET status = ?, completed_at = datetime('now') WHERE id = ?",
            )
            .bind(to.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("UPDATE index_snapshots SET status = ? WHERE id = ?")
                .bind(to.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    /// Apply running-total deltas after a processed batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn add_progress(
        &self,
        id: SnapshotId,
        files: i64,
        chunks: i64,
        tokens: i64,
        cost_cents: f64,
    ) -> Result<(), MemoryError> {
        sqlx::query(
            "UPDATE index_snapshots SET \
             total_files = total_files + ?, \
             total_chunks = total_chunks + ?, \
             total_tokens = total_tokens + ?, \
             cost_cents = cost_cents + ? \
             WHERE id = ?",
        )
        .bind(files)
        .bind(chunks)
        .bind(tokens)
        .bind(cost_cents)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Advance the snapshot's VCS reference (incremental updates).
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn set_git_ref(&self, id: SnapshotId, git_ref: &str) -> Result<(), MemoryError> {
        sqlx::query("UPDATE index_snapshots SET git_ref = ? WHERE id = ?")
            .bind(git_ref)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Most recently completed snapshot for the project, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn latest_completed(
        &self,
        project_id: &str,
    ) -> Result<Option<SnapshotRow>, MemoryError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM index_snapshots \
             WHERE project_id = ? AND status = 'completed' \
             ORDER BY id DESC LIMIT 1"
        );
        let row: Option<SnapshotTuple> = sqlx::query_as(&sql)
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_snapshot).transpose()
    }

    /// Stamp the snapshot as used by a retrieval.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn touch_last_used(&self, id: SnapshotId) -> Result<(), MemoryError> {
        sqlx::query("UPDATE index_snapshots SET last_used_at = datetime('now') WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
