use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use quarry_index::chunker::ChunkerConfig;
use quarry_index::hybrid::{HybridConfig, HybridRetriever};
use quarry_index::indexer::{ChangeSet, IndexerConfig, RepoIndexer, WorkspaceFiles};
use quarry_index::reranker::{LlmReranker, RerankerConfig};
use quarry_index::retriever::{RetrievalConfig, RetrievalResult, SemanticRetriever};
use quarry_llm::any::AnyProvider;
use quarry_llm::ollama::OllamaProvider;
use quarry_llm::openai::OpenAiProvider;
use quarry_memory::{
    ChunkStore, EmbeddingCache, QdrantOps, SnapshotStore, SqliteStore, VectorStore,
};

mod config;

use config::Config;

#[derive(Debug, Parser)]
#[command(name = "quarry", version, about = "Semantic code search over repository snapshots")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "quarry.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index a repository snapshot from a local directory.
    Index {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long, default_value = "HEAD")]
        git_ref: String,
    },
    /// Apply an incremental update to the latest completed index.
    Update {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[arg(long)]
        project: String,
        #[arg(long)]
        git_ref: String,
        #[arg(long)]
        added: Vec<String>,
        #[arg(long)]
        modified: Vec<String>,
        #[arg(long)]
        removed: Vec<String>,
    },
    /// Query the latest completed index.
    Search {
        query: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        top_k: Option<usize>,
        /// Fuse semantic scores with keyword matches.
        #[arg(long)]
        hybrid: bool,
        /// Reorder candidates with the chat model before returning.
        #[arg(long)]
        rerank: bool,
    },
    /// Show the latest completed index for a project.
    Status {
        #[arg(long)]
        project: String,
    },
}

/// Extra candidates fetched when a rerank pass will narrow them down.
const RERANK_POOL_MULTIPLIER: usize = 3;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    if let Some(parent) = std::path::Path::new(&config.storage.sqlite_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("failed to create storage directory")?;
    }

    let store = SqliteStore::new(&config.storage.sqlite_path).await?;
    let vectors: Arc<dyn VectorStore> = Arc::new(QdrantOps::new(&config.qdrant.url)?);
    let provider = Arc::new(build_provider(&config.llm)?);
    let cache = Arc::new(EmbeddingCache::new(
        store.pool().clone(),
        config.llm.embedding_model.clone(),
    ));
    let snapshots = SnapshotStore::new(store.pool().clone());
    let chunks = ChunkStore::new(store.pool().clone());

    match cli.command {
        Command::Index {
            root,
            project,
            git_ref,
        } => {
            let indexer = RepoIndexer::new(
                Arc::clone(&vectors),
                chunks,
                snapshots,
                cache,
                provider,
                indexer_config(&config),
            );
            let source = WorkspaceFiles::new(root);
            let (snapshot_id, report) = indexer.index_project(&project, &git_ref, &source).await?;
            println!(
                "indexed snapshot {snapshot_id}: {} files, {} chunks, {} tokens, {:.4}¢ in {}ms",
                report.files_indexed,
                report.chunks_created,
                report.tokens_embedded,
                report.cost_cents,
                report.duration_ms
            );
            for error in &report.errors {
                println!("  skipped: {error}");
            }
        }
        Command::Update {
            root,
            project,
            git_ref,
            added,
            modified,
            removed,
        } => {
            let latest = snapshots
                .latest_completed(&project)
                .await?
                .with_context(|| format!("no completed index for project {project}"))?;
            let indexer = RepoIndexer::new(
                Arc::clone(&vectors),
                chunks,
                snapshots,
                cache,
                provider,
                indexer_config(&config),
            );
            let changes = ChangeSet {
                added,
                modified,
                removed,
            };
            let source = WorkspaceFiles::new(root);
            let report = indexer.update(latest.id, &git_ref, &changes, &source).await?;
            println!(
                "updated snapshot {}: +{} chunks, -{} chunks, now at {git_ref}",
                latest.id, report.chunks_created, report.chunks_removed
            );
        }
        Command::Search {
            query,
            project,
            top_k,
            hybrid,
            rerank,
        } => {
            let top_k = top_k.unwrap_or(config.retrieval.top_k);
            let fetch_k = if rerank {
                top_k.saturating_mul(RERANK_POOL_MULTIPLIER)
            } else {
                top_k
            };

            let semantic = SemanticRetriever::new(
                Arc::clone(&vectors),
                snapshots,
                cache,
                Arc::clone(&provider),
                RetrievalConfig {
                    collection: config.qdrant.collection.clone(),
                    score_threshold: config.retrieval.score_threshold,
                },
            );

            let results = if hybrid {
                let retriever = HybridRetriever::new(
                    semantic,
                    chunks,
                    HybridConfig {
                        semantic_weight: config.retrieval.semantic_weight,
                        keyword_weight: config.retrieval.keyword_weight,
                        ..HybridConfig::default()
                    },
                );
                retriever.retrieve(&query, &project, fetch_k, None).await?
            } else {
                semantic
                    .retrieve(&query, &project, fetch_k, None, None)
                    .await?
            };

            let results = if rerank {
                let reranker = LlmReranker::new(provider, RerankerConfig::default());
                reranker.rerank(&query, results, top_k).await
            } else {
                results
            };

            print_results(&results);
        }
        Command::Status { project } => match snapshots.latest_completed(&project).await? {
            Some(row) => {
                println!(
                    "snapshot {} [{}] at {}: {} files, {} chunks, {} tokens, {:.4}¢",
                    row.id,
                    row.status,
                    row.git_ref,
                    row.total_files,
                    row.total_chunks,
                    row.total_tokens,
                    row.cost_cents
                );
                if let Some(used) = row.last_used_at {
                    println!("last used: {used}");
                }
            }
            None => println!("no completed index for project {project}"),
        },
    }

    Ok(())
}

fn build_provider(llm: &config::LlmConfig) -> anyhow::Result<AnyProvider> {
    match llm.provider.as_str() {
        "ollama" => Ok(AnyProvider::Ollama(OllamaProvider::new(
            &llm.base_url,
            llm.model.clone(),
            llm.embedding_model.clone(),
        ))),
        "openai" => {
            let api_key = std::env::var(&llm.api_key_env)
                .with_context(|| format!("API key env var {} not set", llm.api_key_env))?;
            Ok(AnyProvider::OpenAi(OpenAiProvider::new(
                api_key,
                llm.base_url.clone(),
                llm.model.clone(),
                1024,
                Some(llm.embedding_model.clone()),
            )))
        }
        other => bail!("unknown LLM provider: {other}"),
    }
}

fn indexer_config(config: &Config) -> IndexerConfig {
    IndexerConfig {
        chunker: ChunkerConfig {
            target_size: config.indexer.target_chunk_size,
            overlap: config.indexer.overlap,
        },
        batch_size: config.indexer.batch_size,
        excluded_dirs: config.indexer.excluded_dirs.clone(),
        collection: config.qdrant.collection.clone(),
        embedding_model: config.llm.embedding_model.clone(),
    }
}

fn print_results(results: &[RetrievalResult]) {
    if results.is_empty() {
        println!("no results");
        return;
    }
    for (i, result) in results.iter().enumerate() {
        let name = result.name.as_deref().unwrap_or(&result.kind);
        println!(
            "{:>2}. [{:.3}] {} :: {} (lines {}-{}, {})",
            i + 1,
            result.score,
            result.file_path,
            name,
            result.start_line,
            result.end_line,
            result.provenance.as_str()
        );
    }
}
