use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub llm: LlmConfig,
    pub qdrant: QdrantConfig,
    pub storage: StorageConfig,
    pub indexer: IndexerConfig,
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize)]
pub struct LlmConfig {
    /// "ollama" or "openai".
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Deserialize)]
pub struct QdrantConfig {
    pub url: String,
    pub collection: String,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub sqlite_path: String,
}

#[derive(Debug, Deserialize)]
pub struct IndexerConfig {
    pub target_chunk_size: usize,
    pub overlap: usize,
    pub batch_size: usize,
    pub excluded_dirs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub score_threshold: f32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("QUARRY_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("QUARRY_LLM_EMBEDDING_MODEL") {
            self.llm.embedding_model = v;
        }
        if let Ok(v) = std::env::var("QUARRY_QDRANT_URL") {
            self.qdrant.url = v;
        }
        if let Ok(v) = std::env::var("QUARRY_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
    }

    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: "ollama".into(),
                base_url: "http://localhost:11434".into(),
                model: "llama3.1:8b".into(),
                embedding_model: "nomic-embed-text".into(),
                api_key_env: "QUARRY_API_KEY".into(),
            },
            qdrant: QdrantConfig {
                url: "http://localhost:6334".into(),
                collection: "quarry_chunks".into(),
            },
            storage: StorageConfig {
                sqlite_path: "./data/quarry.db".into(),
            },
            indexer: IndexerConfig {
                target_chunk_size: 1500,
                overlap: 200,
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
            },
            retrieval: RetrievalConfig {
                top_k: 8,
                score_threshold: 0.25,
                semantic_weight: 0.7,
                keyword_weight: 0.3,
            },
        }
    }
}
