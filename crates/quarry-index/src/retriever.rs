//! Semantic retrieval over a completed index snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use quarry_llm::provider::LlmProvider;
use quarry_memory::{
    EmbeddingCache, FieldValue, ScoredVectorPoint, SnapshotRow, SnapshotStore, VectorFilter,
    VectorStore,
};

use crate::error::{IndexError, Result};

/// Which retrieval path produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    Semantic,
    Keyword,
    Fused,
}

impl Provenance {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Keyword => "keyword",
            Self::Fused => "fused",
        }
    }
}

/// One ranked code fragment answering a query.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub chunk_id: String,
    pub file_path: String,
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
    pub language: String,
    pub kind: String,
    pub name: Option<String>,
    pub score: f32,
    pub provenance: Provenance,
}

/// Retrieval configuration.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Vector collection shared by all snapshots.
    pub collection: String,
    /// Minimum cosine similarity to accept (default: 0.25).
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            collection: "quarry_chunks".into(),
            score_threshold: 0.25,
        }
    }
}

/// Single-query vector search using cache + provider + store.
pub struct SemanticRetriever<P: LlmProvider> {
    vectors: Arc<dyn VectorStore>,
    snapshots: SnapshotStore,
    cache: Arc<EmbeddingCache>,
    provider: Arc<P>,
    config: RetrievalConfig,
}

impl<P: LlmProvider> SemanticRetriever<P> {
    #[must_use]
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        snapshots: SnapshotStore,
        cache: Arc<EmbeddingCache>,
        provider: Arc<P>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            vectors,
            snapshots,
            cache,
            provider,
            config,
        }
    }

    /// Most recently completed snapshot for the project.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::NoCompletedIndex`] when the project has no
    /// completed index — a precondition failure, never an empty success.
    pub async fn resolve_snapshot(&self, project_id: &str) -> Result<SnapshotRow> {
        self.snapshots
            .latest_completed(project_id)
            .await?
            .ok_or_else(|| IndexError::NoCompletedIndex {
                project_id: project_id.to_owned(),
            })
    }

    /// Retrieve the `top_k` most relevant chunks for a query.
    ///
    /// `extra_filter` conditions are merged (AND) with the snapshot scope.
    /// A `score_threshold` of `None` applies the configured default.
    ///
    /// # Errors
    ///
    /// Returns an error if no completed index exists, or embedding or the
    /// vector search fails.
    pub async fn retrieve(
        &self,
        query: &str,
        project_id: &str,
        top_k: usize,
        extra_filter: Option<VectorFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RetrievalResult>> {
        let snapshot = self.resolve_snapshot(project_id).await?;
        self.retrieve_in(&snapshot, query, top_k, extra_filter, score_threshold)
            .await
    }

    /// Retrieve against an already-resolved snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if embedding or the vector search fails.
    pub async fn retrieve_in(
        &self,
        snapshot: &SnapshotRow,
        query: &str,
        top_k: usize,
        extra_filter: Option<VectorFilter>,
        score_threshold: Option<f32>,
    ) -> Result<Vec<RetrievalResult>> {
        let start = Instant::now();

        let query_vector = self.embed_query(query).await?;

        // Every search is scoped to one snapshot; caller filters are ANDed in.
        let mut filter = extra_filter.unwrap_or_default();
        filter = filter.with_must("snapshot_id", FieldValue::Integer(snapshot.id.0));

        let threshold = score_threshold.unwrap_or(self.config.score_threshold);

        let hits = self
            .vectors
            .search(
                &self.config.collection,
                query_vector,
                u64::try_from(top_k).unwrap_or(u64::MAX),
                Some(filter),
                Some(threshold),
            )
            .await?;

        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter_map(|p| result_from_point(p, Provenance::Semantic))
            .collect();

        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let scored: Vec<String> = results
            .iter()
            .map(|r| format!("{}:{:.3}", r.chunk_id, r.score))
            .collect();
        tracing::info!(
            query,
            snapshot = %snapshot.id,
            count = results.len(),
            latency_ms,
            results = ?scored,
            "retrieval"
        );

        if let Err(e) = self.snapshots.touch_last_used(snapshot.id).await {
            tracing::warn!("failed to touch snapshot last_used: {e:#}");
        }

        Ok(results)
    }

    /// Union of independent per-query retrievals, deduplicated by chunk id
    /// (keeping the higher score) and sorted by score descending. Queries
    /// are scored independently, never jointly.
    ///
    /// # Errors
    ///
    /// Returns an error if any individual retrieval fails.
    pub async fn retrieve_multiple(
        &self,
        queries: &[String],
        project_id: &str,
        k_per_query: usize,
    ) -> Result<Vec<RetrievalResult>> {
        let snapshot = self.resolve_snapshot(project_id).await?;

        let mut best: HashMap<String, RetrievalResult> = HashMap::new();
        for query in queries {
            let results = self
                .retrieve_in(&snapshot, query, k_per_query, None, None)
                .await?;
            for result in results {
                match best.get(&result.chunk_id) {
                    Some(existing) if existing.score >= result.score => {}
                    _ => {
                        best.insert(result.chunk_id.clone(), result);
                    }
                }
            }
        }

        let mut merged: Vec<RetrievalResult> = best.into_values().collect();
        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(merged)
    }

    /// Query embedding via cache-then-provider.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.cache.get(query).await {
            return Ok(vector);
        }
        let vector = self.provider.embed(query).await?;
        self.cache.set(query, &vector).await;
        Ok(vector)
    }
}

fn result_from_point(point: ScoredVectorPoint, provenance: Provenance) -> Option<RetrievalResult> {
    let p = &point.payload;
    let get_str = |key: &str| p.get(key).and_then(|v| v.as_str()).map(str::to_owned);
    let get_line = |key: &str| {
        p.get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    };

    Some(RetrievalResult {
        chunk_id: point.id.clone(),
        file_path: get_str("file_path")?,
        content: get_str("content")?,
        start_line: get_line("start_line")?,
        end_line: get_line("end_line")?,
        language: get_str("language")?,
        kind: get_str("kind")?,
        name: get_str("name"),
        score: point.score,
        provenance,
    })
}
