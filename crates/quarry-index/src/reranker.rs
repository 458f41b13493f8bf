//! LLM-based reordering of a candidate result set.
//!
//! Reranking is strictly optional: any failure — provider error, empty
//! output, unparseable response — falls back to the first `top_k` of the
//! original order and never propagates an error to the caller.

use std::fmt::Write;
use std::sync::Arc;

use quarry_llm::provider::{LlmProvider, Message};

use crate::retriever::RetrievalResult;

/// Reranker configuration.
#[derive(Debug, Clone)]
pub struct RerankerConfig {
    /// Characters of chunk content shown per candidate in the prompt.
    pub preview_chars: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self { preview_chars: 240 }
    }
}

/// Reorders candidates with a generative model as the relevance judge.
pub struct LlmReranker<P: LlmProvider> {
    provider: Arc<P>,
    config: RerankerConfig,
}

impl<P: LlmProvider> LlmReranker<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, config: RerankerConfig) -> Self {
        Self { provider, config }
    }

    /// Rerank `results` down to `top_k`.
    ///
    /// Candidate sets already within `top_k` are returned unchanged without
    /// a model call.
    pub async fn rerank(
        &self,
        query: &str,
        results: Vec<RetrievalResult>,
        top_k: usize,
    ) -> Vec<RetrievalResult> {
        if results.len() <= top_k {
            return results;
        }

        let prompt = build_prompt(query, &results, self.config.preview_chars);

        let response = match self.provider.chat(&[Message::user(prompt)]).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("rerank call failed, keeping original order: {e:#}");
                return truncate(results, top_k);
            }
        };

        let order = parse_ranked_indices(&response, results.len());
        if order.is_empty() {
            tracing::warn!("rerank response had no valid indices, keeping original order");
            return truncate(results, top_k);
        }

        let mut slots: Vec<Option<RetrievalResult>> = results.into_iter().map(Some).collect();
        order
            .into_iter()
            .filter_map(|i| slots[i].take())
            .take(top_k)
            .collect()
    }
}

fn truncate(mut results: Vec<RetrievalResult>, top_k: usize) -> Vec<RetrievalResult> {
    results.truncate(top_k);
    results
}

fn build_prompt(query: &str, results: &[RetrievalResult], preview_chars: usize) -> String {
    let mut prompt = format!(
        "You are ranking code search results by relevance.\n\nQuery: {query}\n\nCandidates:\n"
    );

    for (i, result) in results.iter().enumerate() {
        let preview: String = result.content.chars().take(preview_chars).collect();
        let _ = writeln!(
            prompt,
            "[{i}] {} (lines {}-{})\n{preview}\n",
            result.file_path, result.start_line, result.end_line
        );
    }

    prompt.push_str(
        "Output the candidate indices ranked by relevance to the query, \
         one integer per line, most relevant first. Output nothing else.",
    );
    prompt
}

/// Scan lines for bare integers, accept only in-range values, and drop
/// repeats while preserving first-seen order.
fn parse_ranked_indices(response: &str, candidate_count: usize) -> Vec<usize> {
    let mut seen = Vec::new();
    for line in response.lines() {
        let Ok(index) = line.trim().parse::<usize>() else {
            continue;
        };
        if index < candidate_count && !seen.contains(&index) {
            seen.push(index);
        }
    }
    seen
}
