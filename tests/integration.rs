//! End-to-end pipeline tests over in-memory backends: index a workspace,
//! query it semantically and hybrid, apply an incremental update.

use std::sync::Arc;

use quarry_index::hybrid::{HybridConfig, HybridRetriever};
use quarry_index::indexer::{ChangeSet, IndexerConfig, RepoIndexer, WorkspaceFiles};
use quarry_index::retriever::{RetrievalConfig, SemanticRetriever};
use quarry_llm::LlmError;
use quarry_llm::provider::{LlmProvider, Message};
use quarry_memory::{
    ChunkStore, EmbeddingCache, InMemoryVectorStore, SnapshotStore, SqliteStore, VectorStore,
};

/// Embeds text as (auth-signal, css-signal) feature counts, so cosine
/// similarity reflects topical relatedness deterministically.
#[derive(Debug, Clone)]
struct TopicProvider;

const AUTH_WORDS: &[&str] = &["auth", "login", "jwt", "token", "user"];
const CSS_WORDS: &[&str] = &["css", "style", "color", "font", "theme"];

fn count_signal(text: &str, words: &[&str]) -> f32 {
    let lower = text.to_lowercase();
    let total: usize = words.iter().map(|w| lower.matches(w).count()).sum();
    u32::try_from(total).map(|t| t as f32).unwrap_or(f32::MAX)
}

impl LlmProvider for TopicProvider {
    async fn chat(&self, _messages: &[Message]) -> Result<String, LlmError> {
        Ok(String::new())
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        Ok(vec![
            count_signal(text, AUTH_WORDS),
            count_signal(text, CSS_WORDS),
            0.1,
        ])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "topic-test"
    }
}

struct Pipeline {
    indexer: RepoIndexer<TopicProvider>,
    semantic: SemanticRetriever<TopicProvider>,
    hybrid: HybridRetriever<TopicProvider>,
}

async fn pipeline() -> Pipeline {
    let store = SqliteStore::new(":memory:").await.unwrap();
    let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let cache = Arc::new(EmbeddingCache::new(store.pool().clone(), "topic-test"));
    let provider = Arc::new(TopicProvider);

    let indexer = RepoIndexer::new(
        Arc::clone(&vectors),
        ChunkStore::new(store.pool().clone()),
        SnapshotStore::new(store.pool().clone()),
        Arc::clone(&cache),
        Arc::clone(&provider),
        IndexerConfig::default(),
    );
    let semantic = SemanticRetriever::new(
        Arc::clone(&vectors),
        SnapshotStore::new(store.pool().clone()),
        Arc::clone(&cache),
        Arc::clone(&provider),
        RetrievalConfig::default(),
    );
    let hybrid = HybridRetriever::new(
        SemanticRetriever::new(
            vectors,
            SnapshotStore::new(store.pool().clone()),
            cache,
            provider,
            RetrievalConfig::default(),
        ),
        ChunkStore::new(store.pool().clone()),
        HybridConfig::default(),
    );

    Pipeline {
        indexer,
        semantic,
        hybrid,
    }
}

fn write_workspace(dir: &std::path::Path) {
    std::fs::create_dir_all(dir.join("src")).unwrap();
    std::fs::write(
        dir.join("src/auth.js"),
        "function loginUser(credentials) {\n  const token = jwt.sign(credentials);\n  return token;\n}\n",
    )
    .unwrap();
    std::fs::write(
        dir.join("src/theme.js"),
        "const theme = { color: 'red', fontSize: 12, fontFamily: 'mono' };\n",
    )
    .unwrap();
}

#[tokio::test]
async fn query_ranks_related_chunk_first_and_thresholds_unrelated() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(dir.path());

    let p = pipeline().await;
    let source = WorkspaceFiles::new(dir.path());
    let (_sid, report) = p
        .indexer
        .index_project("webapp", "main", &source)
        .await
        .unwrap();
    assert_eq!(report.files_indexed, 2);

    let results = p
        .semantic
        .retrieve("user authentication", "webapp", 10, None, Some(0.3))
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].file_path, "src/auth.js");
    assert!(
        results.iter().all(|r| r.file_path != "src/theme.js"),
        "unrelated chunk must fall below the threshold"
    );
}

#[tokio::test]
async fn hybrid_search_finds_keyword_matches_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(dir.path());

    let p = pipeline().await;
    let source = WorkspaceFiles::new(dir.path());
    p.indexer
        .index_project("webapp", "main", &source)
        .await
        .unwrap();

    let results = p
        .hybrid
        .retrieve("jwt token login", "webapp", 10, None)
        .await
        .unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].file_path, "src/auth.js");
    // One result per file at most.
    let mut paths: Vec<&str> = results.iter().map(|r| r.file_path.as_str()).collect();
    paths.sort_unstable();
    paths.dedup();
    assert_eq!(paths.len(), results.len());
}

#[tokio::test]
async fn removed_file_never_appears_after_incremental_update() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(dir.path());

    let p = pipeline().await;
    let source = WorkspaceFiles::new(dir.path());
    let (sid, _report) = p
        .indexer
        .index_project("webapp", "main", &source)
        .await
        .unwrap();

    std::fs::remove_file(dir.path().join("src/auth.js")).unwrap();
    let changes = ChangeSet {
        removed: vec!["src/auth.js".to_owned()],
        ..ChangeSet::default()
    };
    p.indexer.update(sid, "main~1", &changes, &source).await.unwrap();

    for query in ["user authentication", "jwt token", "theme color"] {
        let results = p
            .semantic
            .retrieve(query, "webapp", 10, None, Some(-1.0))
            .await
            .unwrap();
        assert!(
            results.iter().all(|r| r.file_path != "src/auth.js"),
            "removed file leaked back for query {query:?}"
        );

        let fused = p.hybrid.retrieve(query, "webapp", 10, None).await.unwrap();
        assert!(fused.iter().all(|r| r.file_path != "src/auth.js"));
    }
}

#[tokio::test]
async fn reindexing_after_update_keeps_single_result_per_query() {
    let dir = tempfile::tempdir().unwrap();
    write_workspace(dir.path());

    let p = pipeline().await;
    let source = WorkspaceFiles::new(dir.path());
    let (sid, _) = p
        .indexer
        .index_project("webapp", "main", &source)
        .await
        .unwrap();

    // Rewrite the auth module and re-index it in place.
    std::fs::write(
        dir.path().join("src/auth.js"),
        "function verifySession(token) {\n  return jwt.verify(token);\n}\n",
    )
    .unwrap();
    let changes = ChangeSet {
        modified: vec!["src/auth.js".to_owned()],
        ..ChangeSet::default()
    };
    p.indexer.update(sid, "main+1", &changes, &source).await.unwrap();

    let results = p
        .semantic
        .retrieve("jwt token", "webapp", 10, None, Some(0.3))
        .await
        .unwrap();

    let auth_hits: Vec<_> = results
        .iter()
        .filter(|r| r.file_path == "src/auth.js")
        .collect();
    assert_eq!(auth_hits.len(), 1, "stale chunk must not survive the update");
    assert!(auth_hits[0].content.contains("verifySession"));
}
