//! Repository indexing orchestrator: enumerate → chunk → embed → store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use quarry_llm::pricing::{embedding_cost_cents, estimate_tokens};
use quarry_llm::provider::LlmProvider;
use quarry_memory::{
    ChunkRecord, ChunkStore, EmbeddingCache, FieldValue, IndexStatus, SnapshotId, SnapshotStore,
    VectorFilter, VectorPoint, VectorStore,
};

use crate::chunker::{Chunk, ChunkerConfig, chunk_file};
use crate::error::{IndexError, Result};
use crate::languages::{detect_language, is_source_file};

/// Abstracts the snapshot content provider (local checkout, VCS API, ...).
pub trait FileSource: Send + Sync {
    /// Relative paths of every file in the snapshot.
    fn list_files(&self) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Read one file's content by its relative path.
    fn read(&self, path: &str) -> impl Future<Output = Result<String>> + Send;
}

/// [`FileSource`] over a local directory, honoring `.gitignore`.
pub struct WorkspaceFiles {
    root: PathBuf,
}

impl WorkspaceFiles {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileSource for WorkspaceFiles {
    async fn list_files(&self) -> Result<Vec<String>> {
        let root = self.root.clone();
        let files = tokio::task::spawn_blocking(move || {
            ignore::WalkBuilder::new(&root)
                .hidden(true)
                .git_ignore(true)
                .build()
                .flatten()
                .filter(|e| e.file_type().is_some_and(|ft| ft.is_file()))
                .map(|e| {
                    e.path()
                        .strip_prefix(&root)
                        .unwrap_or(e.path())
                        .to_string_lossy()
                        .to_string()
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| IndexError::Other(format!("file walk failed: {e}")))?;
        Ok(files)
    }

    async fn read(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(self.root.join(path)).await?)
    }
}

/// File paths changed between two snapshot references.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub removed: Vec<String>,
}

/// Indexer configuration.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub chunker: ChunkerConfig,
    /// Files processed concurrently per batch.
    pub batch_size: usize,
    /// Directory components excluded from indexing.
    pub excluded_dirs: Vec<String>,
    /// Vector collection shared by all snapshots.
    pub collection: String,
    /// Embedding model id, used for cost accounting.
    pub embedding_model: String,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            batch_size: 10,
            excluded_dirs: [
                "node_modules",
                "target",
                "dist",
                "build",
                ".git",
                "vendor",
                "__pycache__",
            ]
            .iter()
            .map(|s| (*s).to_string())
            .collect(),
            collection: "quarry_chunks".into(),
            embedding_model: "text-embedding-3-small".into(),
        }
    }
}

/// Summary of an indexing run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_indexed: usize,
    pub chunks_created: usize,
    pub chunks_removed: u64,
    pub tokens_embedded: usize,
    pub cost_cents: f64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

struct FileOutcome {
    chunks: usize,
    tokens: usize,
}

/// Drives full and incremental indexing runs over a repository snapshot.
pub struct RepoIndexer<P: LlmProvider> {
    vectors: Arc<dyn VectorStore>,
    chunks: ChunkStore,
    snapshots: SnapshotStore,
    cache: Arc<EmbeddingCache>,
    provider: Arc<P>,
    config: IndexerConfig,
}

impl<P: LlmProvider> RepoIndexer<P> {
    #[must_use]
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        chunks: ChunkStore,
        snapshots: SnapshotStore,
        cache: Arc<EmbeddingCache>,
        provider: Arc<P>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            vectors,
            chunks,
            snapshots,
            cache,
            provider,
            config,
        }
    }

    /// Index a full repository snapshot into a new index.
    ///
    /// Per-file failures are logged and skipped; fatal setup or storage
    /// failures mark the snapshot `Failed` and abort without rolling back
    /// partial writes.
    ///
    /// # Errors
    ///
    /// Returns an error when the run is aborted fatally.
    pub async fn index_project<S: FileSource>(
        &self,
        project_id: &str,
        git_ref: &str,
        source: &S,
    ) -> Result<(SnapshotId, IndexReport)> {
        let start = Instant::now();
        let snapshot_id = self.snapshots.create(project_id, git_ref).await?;

        match self.run_full(snapshot_id, source, start).await {
            Ok(report) => Ok((snapshot_id, report)),
            Err(e) => {
                self.mark_failed(snapshot_id).await;
                Err(e)
            }
        }
    }

    async fn run_full<S: FileSource>(
        &self,
        snapshot_id: SnapshotId,
        source: &S,
        start: Instant,
    ) -> Result<IndexReport> {
        let probe = self.provider.embed("probe").await?;
        let vector_size =
            u64::try_from(probe.len()).map_err(|e| IndexError::Other(e.to_string()))?;
        self.vectors
            .ensure_collection(&self.config.collection, vector_size)
            .await?;

        self.snapshots
            .set_status(snapshot_id, IndexStatus::Indexing)
            .await?;

        let files = source.list_files().await?;
        let indexable: Vec<String> = files
            .into_iter()
            .filter(|p| self.should_index(p))
            .collect();

        let total = indexable.len();
        tracing::info!(snapshot = %snapshot_id, total, "indexing started");

        let mut report = IndexReport::default();
        self.index_paths(snapshot_id, &indexable, source, true, &mut report)
            .await?;
        report.files_scanned = total;

        self.snapshots
            .set_status(snapshot_id, IndexStatus::Completed)
            .await?;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            snapshot = %snapshot_id,
            files = report.files_indexed,
            chunks = report.chunks_created,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    /// Apply an incremental update to a completed snapshot.
    ///
    /// Chunks of removed and modified files are deleted, then modified and
    /// added files are re-chunked and re-embedded. Counters move by delta;
    /// nothing is recounted.
    ///
    /// # Errors
    ///
    /// Returns an error when the update is aborted fatally (the snapshot is
    /// then marked `Failed`).
    pub async fn update<S: FileSource>(
        &self,
        snapshot_id: SnapshotId,
        git_ref: &str,
        changes: &ChangeSet,
        source: &S,
    ) -> Result<IndexReport> {
        let start = Instant::now();
        self.snapshots
            .set_status(snapshot_id, IndexStatus::Updating)
            .await?;

        match self.run_update(snapshot_id, git_ref, changes, source, start).await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.mark_failed(snapshot_id).await;
                Err(e)
            }
        }
    }

    async fn run_update<S: FileSource>(
        &self,
        snapshot_id: SnapshotId,
        git_ref: &str,
        changes: &ChangeSet,
        source: &S,
        start: Instant,
    ) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        // Changed files are deleted then recreated, never edited in place.
        let mut stale: Vec<String> = Vec::new();
        stale.extend(changes.removed.iter().cloned());
        stale.extend(changes.modified.iter().cloned());

        if !stale.is_empty() {
            let removed = self.chunks.delete_by_paths(snapshot_id, &stale).await?;
            report.chunks_removed = removed;

            let mut filter = VectorFilter::default()
                .with_must("snapshot_id", FieldValue::Integer(snapshot_id.0));
            for path in &stale {
                filter = filter.with_any_of("file_path", FieldValue::Text(path.clone()));
            }
            self.vectors
                .delete_by_filter(&self.config.collection, filter)
                .await?;
        }

        let mut fresh: Vec<String> = Vec::new();
        fresh.extend(changes.added.iter().cloned());
        fresh.extend(changes.modified.iter().cloned());
        let fresh: Vec<String> = fresh.into_iter().filter(|p| self.should_index(p)).collect();

        // Chunk/token/cost deltas for re-indexed files accrue per batch below;
        // the file-count delta and the removed-chunk delta are applied once.
        self.index_paths(snapshot_id, &fresh, source, false, &mut report)
            .await?;
        report.files_scanned = fresh.len();

        let files_delta = i64::try_from(changes.added.len()).unwrap_or(i64::MAX)
            - i64::try_from(changes.removed.len()).unwrap_or(0);
        let removed_delta = -i64::try_from(report.chunks_removed).unwrap_or(0);
        self.snapshots
            .add_progress(snapshot_id, files_delta, removed_delta, 0, 0.0)
            .await?;

        self.snapshots.set_git_ref(snapshot_id, git_ref).await?;
        self.snapshots
            .set_status(snapshot_id, IndexStatus::Completed)
            .await?;

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            snapshot = %snapshot_id,
            added = changes.added.len(),
            modified = changes.modified.len(),
            removed = changes.removed.len(),
            chunks_created = report.chunks_created,
            chunks_removed = report.chunks_removed,
            "incremental update finished"
        );
        Ok(report)
    }

    /// Process `paths` in concurrent batches, tallying into `report` and
    /// pushing running totals onto the snapshot after each batch. Incremental
    /// updates pass `count_files = false`: a modified file is re-indexed
    /// without changing the file count.
    async fn index_paths<S: FileSource>(
        &self,
        snapshot_id: SnapshotId,
        paths: &[String],
        source: &S,
        count_files: bool,
        report: &mut IndexReport,
    ) -> Result<()> {
        for batch in paths.chunks(self.config.batch_size.max(1)) {
            let outcomes = futures::future::join_all(
                batch
                    .iter()
                    .map(|path| self.index_file(snapshot_id, path, source)),
            )
            .await;

            let mut batch_files = 0i64;
            let mut batch_chunks = 0usize;
            let mut batch_tokens = 0usize;

            for (path, outcome) in batch.iter().zip(outcomes) {
                match outcome {
                    Ok(FileOutcome { chunks, tokens }) => {
                        batch_files += 1;
                        batch_chunks += chunks;
                        batch_tokens += tokens;
                        report.files_indexed += 1;
                        tracing::debug!(file = %path, chunks, "file indexed");
                    }
                    Err(e) => {
                        tracing::warn!(file = %path, "indexing failed, skipping: {e:#}");
                        report.errors.push(format!("{path}: {e}"));
                    }
                }
            }

            let batch_cost = embedding_cost_cents(&self.config.embedding_model, batch_tokens);
            report.chunks_created += batch_chunks;
            report.tokens_embedded += batch_tokens;
            report.cost_cents += batch_cost;

            self.snapshots
                .add_progress(
                    snapshot_id,
                    if count_files { batch_files } else { 0 },
                    i64::try_from(batch_chunks).unwrap_or(i64::MAX),
                    i64::try_from(batch_tokens).unwrap_or(i64::MAX),
                    batch_cost,
                )
                .await?;
        }
        Ok(())
    }

    async fn index_file<S: FileSource>(
        &self,
        snapshot_id: SnapshotId,
        path: &str,
        source: &S,
    ) -> Result<FileOutcome> {
        let text = source.read(path).await?;
        let lang = detect_language(Path::new(path));
        let chunks = chunk_file(&text, path, lang, &self.config.chunker);

        let mut records = Vec::with_capacity(chunks.len());
        let mut points = Vec::with_capacity(chunks.len());
        let mut tokens = 0usize;

        for chunk in &chunks {
            let vector = match self.cache.get(&chunk.content).await {
                Some(v) => v,
                None => {
                    let v = self.provider.embed(&chunk.content).await?;
                    tokens += estimate_tokens(&chunk.content);
                    self.cache.set(&chunk.content, &v).await;
                    v
                }
            };

            // The vector point and the chunk record share one generated id.
            let id = uuid::Uuid::new_v4().to_string();
            points.push(VectorPoint {
                id: id.clone(),
                vector,
                payload: chunk_payload(snapshot_id, chunk),
            });
            records.push(chunk_to_record(id, snapshot_id, chunk));
        }

        if !points.is_empty() {
            self.vectors
                .upsert(&self.config.collection, points)
                .await?;
            self.chunks.insert_many(&records).await?;
        }

        Ok(FileOutcome {
            chunks: chunks.len(),
            tokens,
        })
    }

    fn should_index(&self, path: &str) -> bool {
        let p = Path::new(path);
        if !is_source_file(p) {
            return false;
        }
        !p.components().any(|c| {
            let c = c.as_os_str().to_string_lossy();
            self.config.excluded_dirs.iter().any(|d| d == c.as_ref())
        })
    }

    async fn mark_failed(&self, snapshot_id: SnapshotId) {
        if let Err(e) = self
            .snapshots
            .set_status(snapshot_id, IndexStatus::Failed)
            .await
        {
            tracing::error!(snapshot = %snapshot_id, "failed to mark snapshot failed: {e:#}");
        }
    }
}

fn chunk_payload(
    snapshot_id: SnapshotId,
    chunk: &Chunk,
) -> std::collections::HashMap<String, serde_json::Value> {
    let mut payload = std::collections::HashMap::from([
        ("snapshot_id".to_owned(), serde_json::json!(snapshot_id.0)),
        ("file_path".to_owned(), serde_json::json!(chunk.file_path)),
        ("content".to_owned(), serde_json::json!(chunk.content)),
        ("start_line".to_owned(), serde_json::json!(chunk.start_line)),
        ("end_line".to_owned(), serde_json::json!(chunk.end_line)),
        ("kind".to_owned(), serde_json::json!(chunk.kind.as_str())),
        ("language".to_owned(), serde_json::json!(chunk.language.id())),
    ]);
    if let Some(name) = &chunk.name {
        payload.insert("name".to_owned(), serde_json::json!(name));
    }
    payload
}

fn chunk_to_record(id: String, snapshot_id: SnapshotId, chunk: &Chunk) -> ChunkRecord {
    ChunkRecord {
        id,
        snapshot_id,
        file_path: chunk.file_path.clone(),
        content: chunk.content.clone(),
        start_line: i64::try_from(chunk.start_line).unwrap_or(i64::MAX),
        end_line: i64::try_from(chunk.end_line).unwrap_or(i64::MAX),
        kind: chunk.kind.as_str().to_owned(),
        language: chunk.language.id().to_owned(),
        name: chunk.name.clone(),
    }
}
