//! Hybrid retrieval: semantic search fused with keyword search over
//! persisted chunks, with per-file deduplication.

use std::collections::HashMap;

use quarry_llm::provider::LlmProvider;
use quarry_memory::{ChunkRecord, ChunkStore, FieldValue, VectorFilter};

use crate::error::Result;
use crate::retriever::{Provenance, RetrievalResult, SemanticRetriever};

/// Semantic candidates fetched per `top_k` requested, to give fusion and
/// per-file dedup something to work with.
const CANDIDATE_MULTIPLIER: usize = 2;

/// Words carrying no search signal.
const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "are", "was", "were", "what", "how",
    "where", "when", "why", "does", "not", "you", "your", "can", "all", "any", "has", "have",
    "had", "its", "into", "out", "use", "used", "using", "about", "than", "then", "them", "they",
    "there", "here", "which", "will", "would", "should", "could", "been", "being", "but", "did",
    "each", "more", "most", "other", "some", "such", "only", "same", "too", "very", "just",
];

/// Fusion and keyword-scoring knobs. The defaults are heuristic, not tuned
/// invariants; callers may override any of them.
#[derive(Debug, Clone)]
pub struct HybridConfig {
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    /// Score added per keyword occurrence.
    pub per_occurrence: f32,
    /// Extra score when a keyword matches as a whole word.
    pub whole_word_bonus: f32,
    /// Keyword score ceiling.
    pub max_keyword_score: f32,
    /// Keywords shorter than this are dropped.
    pub min_keyword_len: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            per_occurrence: 0.1,
            whole_word_bonus: 0.2,
            max_keyword_score: 1.0,
            min_keyword_len: 3,
        }
    }
}

/// Fuses semantic results with keyword matches over the same snapshot.
pub struct HybridRetriever<P: LlmProvider> {
    semantic: SemanticRetriever<P>,
    chunks: ChunkStore,
    config: HybridConfig,
}

impl<P: LlmProvider> HybridRetriever<P> {
    #[must_use]
    pub fn new(semantic: SemanticRetriever<P>, chunks: ChunkStore, config: HybridConfig) -> Self {
        Self {
            semantic,
            chunks,
            config,
        }
    }

    /// Retrieve the `top_k` best chunks by fused semantic + keyword score.
    ///
    /// A chunk found by both paths sums its weighted contributions; a chunk
    /// found by only one keeps that contribution alone. After fusion, only
    /// the single highest-scoring chunk per file survives, so one hot file
    /// cannot dominate the results.
    ///
    /// # Errors
    ///
    /// Returns an error if no completed index exists, or the underlying
    /// semantic search or chunk scan fails.
    pub async fn retrieve(
        &self,
        query: &str,
        project_id: &str,
        top_k: usize,
        extra_filter: Option<VectorFilter>,
    ) -> Result<Vec<RetrievalResult>> {
        let snapshot = self.semantic.resolve_snapshot(project_id).await?;

        let pool = top_k.saturating_mul(CANDIDATE_MULTIPLIER).max(top_k);
        let semantic_hits = self
            .semantic
            .retrieve_in(&snapshot, query, pool, extra_filter.clone(), None)
            .await?;

        let keywords = extract_keywords(query, &self.config);
        let keyword_rows = if keywords.is_empty() {
            // No usable keywords: the keyword side simply contributes nothing.
            Vec::new()
        } else {
            let paths = filter_paths(extra_filter.as_ref());
            self.chunks
                .find_matching(snapshot.id, &keywords, paths.as_deref())
                .await?
        };

        struct Entry {
            result: RetrievalResult,
            semantic: Option<f32>,
            keyword: Option<f32>,
        }

        let mut entries: HashMap<String, Entry> = HashMap::new();
        for hit in semantic_hits {
            entries.insert(
                hit.chunk_id.clone(),
                Entry {
                    semantic: Some(hit.score),
                    keyword: None,
                    result: hit,
                },
            );
        }

        for row in keyword_rows {
            let score = keyword_score(&row.content, &keywords, &self.config);
            if score <= 0.0 {
                continue;
            }
            entries
                .entry(row.id.clone())
                .and_modify(|e| e.keyword = Some(score))
                .or_insert_with(|| Entry {
                    result: result_from_record(&row),
                    semantic: None,
                    keyword: Some(score),
                });
        }

        let fused = entries
            .into_values()
            .map(|e| {
                let mut result = e.result;
                result.score = e.semantic.unwrap_or(0.0) * self.config.semantic_weight
                    + e.keyword.unwrap_or(0.0) * self.config.keyword_weight;
                result.provenance = match (e.semantic, e.keyword) {
                    (Some(_), Some(_)) => Provenance::Fused,
                    (Some(_), None) => Provenance::Semantic,
                    _ => Provenance::Keyword,
                };
                result
            })
            .collect();

        let mut results = dedup_by_file(fused);
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(top_k);
        Ok(results)
    }
}

/// Lowercase, strip punctuation, drop stop-words and short words,
/// deduplicate preserving order.
fn extract_keywords(query: &str, config: &HybridConfig) -> Vec<String> {
    let cleaned: String = query
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                ' '
            }
        })
        .collect();

    let mut keywords = Vec::new();
    for word in cleaned.split_whitespace() {
        if word.len() < config.min_keyword_len {
            continue;
        }
        if STOP_WORDS.contains(&word) {
            continue;
        }
        if !keywords.iter().any(|k| k == word) {
            keywords.push(word.to_owned());
        }
    }
    keywords
}

/// Occurrence-weighted keyword score with a whole-word bonus, clamped.
fn keyword_score(content: &str, keywords: &[String], config: &HybridConfig) -> f32 {
    let lower = content.to_lowercase();
    let mut score = 0.0f32;

    for keyword in keywords {
        let occurrences = lower.matches(keyword.as_str()).count();
        if occurrences == 0 {
            continue;
        }
        #[allow(clippy::cast_precision_loss)]
        {
            score += occurrences as f32 * config.per_occurrence;
        }
        if has_whole_word(&lower, keyword) {
            score += config.whole_word_bonus;
        }
    }

    score.min(config.max_keyword_score)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn has_whole_word(haystack: &str, needle: &str) -> bool {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let begin = from + pos;
        let end = begin + needle.len();
        let boundary_before = begin == 0 || !is_word_byte(bytes[begin - 1]);
        let boundary_after = end == bytes.len() || !is_word_byte(bytes[end]);
        if boundary_before && boundary_after {
            return true;
        }
        from = end;
    }
    false
}

/// File-path conditions usable to scope the keyword scan.
fn filter_paths(filter: Option<&VectorFilter>) -> Option<Vec<String>> {
    let filter = filter?;
    let paths: Vec<String> = filter
        .must
        .iter()
        .chain(filter.any_of.iter())
        .filter(|c| c.field == "file_path")
        .filter_map(|c| match &c.value {
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(_) => None,
        })
        .collect();
    if paths.is_empty() { None } else { Some(paths) }
}

/// Keep only the single highest-scoring chunk per file path.
fn dedup_by_file(results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
    let mut best: HashMap<String, RetrievalResult> = HashMap::new();
    for result in results {
        match best.get(&result.file_path) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                best.insert(result.file_path.clone(), result);
            }
        }
    }
    best.into_values().collect()
}

fn result_from_record(record: &ChunkRecord) -> RetrievalResult {
    RetrievalResult {
        chunk_id: record.id.clone(),
        file_path: record.file_path.clone(),
        content: record.content.clone(),
        start_line: usize::try_from(record.start_line).unwrap_or(0),
        end_line: usize::try_from(record.end_line).unwrap_or(0),
        language: record.language.clone(),
        kind: record.kind.clone(),
        name: record.name.clone(),
        score: 0.0,
        provenance: Provenance::Keyword,
    }
}
