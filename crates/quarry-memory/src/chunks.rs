//! Persisted chunk records backing keyword search and incremental updates.

use sqlx::SqlitePool;

use crate::error::MemoryError;
use crate::types::SnapshotId;

/// One persisted chunk row. Shares its `id` with the vector-store point
/// created for the same chunk.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub snapshot_id: SnapshotId,
    pub file_path: String,
    pub content: String,
    pub start_line: i64,
    pub end_line: i64,
    pub kind: String,
    pub language: String,
    pub name: Option<String>,
}

type ChunkRow = (
    String,
    i64,
    String,
    String,
    i64,
    i64,
    String,
    String,
    Option<String>,
);

fn row_to_record(row: ChunkRow) -> ChunkRecord {
    ChunkRecord {
        id: row.0,
        snapshot_id: SnapshotId(row.1),
        file_path: row.2,
        content: row.3,
        start_line: row.4,
        end_line: row.5,
        kind: row.6,
        language: row.7,
        name: row.8,
    }
}

const SELECT_COLUMNS: &str = "id, snapshot_id, file_path, content, start_line, end_line, \
                              kind, language, name";

#[derive(Debug, Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a batch of chunk records.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert fails.
    pub async fn insert_many(&self, records: &[ChunkRecord]) -> Result<(), MemoryError> {
        for record in records {
            sqlx::query(
                "INSERT OR REPLACE INTO chunk_records \
                 (id, snapshot_id, file_path, content, start_line, end_line, kind, language, name) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.id)
            .bind(record.snapshot_id)
            .bind(&record.file_path)
            .bind(&record.content)
            .bind(record.start_line)
            .bind(record.end_line)
            .bind(&record.kind)
            .bind(&record.language)
            .bind(&record.name)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Delete all chunks of the snapshot belonging to any of `paths`.
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn delete_by_paths(
        &self,
        snapshot_id: SnapshotId,
        paths: &[String],
    ) -> Result<u64, MemoryError> {
        if paths.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; paths.len()].join(", ");
        let sql = format!(
            "DELETE FROM chunk_records WHERE snapshot_id = ? AND file_path IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql).bind(snapshot_id);
        for path in paths {
            query = query.bind(path);
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Point ids of all chunks of the snapshot belonging to any of `paths`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn ids_for_paths(
        &self,
        snapshot_id: SnapshotId,
        paths: &[String],
    ) -> Result<Vec<String>, MemoryError> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; paths.len()].join(", ");
        let sql = format!(
            "SELECT id FROM chunk_records WHERE snapshot_id = ? AND file_path IN ({placeholders})"
        );

        let mut query = sqlx::query_as::<_, (String,)>(&sql).bind(snapshot_id);
        for path in paths {
            query = query.bind(path);
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Fetch a chunk by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, id: &str) -> Result<Option<ChunkRecord>, MemoryError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM chunk_records WHERE id = ?");
        let row: Option<ChunkRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(row_to_record))
    }

    /// Chunks of the snapshot whose content contains any of `needles`,
    /// case-insensitively. An optional `paths` restriction scopes the scan
    /// to specific files. Empty `needles` matches nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn find_matching(
        &self,
        snapshot_id: SnapshotId,
        needles: &[String],
        paths: Option<&[String]>,
    ) -> Result<Vec<ChunkRecord>, MemoryError> {
        if needles.is_empty() {
            return Ok(Vec::new());
        }

        let like_clauses = vec!["instr(lower(content), ?) > 0"; needles.len()].join(" OR ");
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM chunk_records \
             WHERE snapshot_id = ? AND ({like_clauses})"
        );

        if let Some(paths) = paths {
            if !paths.is_empty() {
                let placeholders = vec!["?"; paths.len()].join(", ");
                sql.push_str(&format!(" AND file_path IN ({placeholders})"));
            }
        }

        let mut query = sqlx::query_as::<_, ChunkRow>(&sql).bind(snapshot_id);
        for needle in needles {
            query = query.bind(needle.to_lowercase());
        }
        if let Some(paths) = paths {
            for path in paths {
                query = query.bind(path);
            }
        }

        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(row_to_record).collect())
    }

    /// Number of chunk rows for the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_for_snapshot(&self, snapshot_id: SnapshotId) -> Result<i64, MemoryError> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM chunk_records WHERE snapshot_id = ?")
                .bind(snapshot_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }
}
