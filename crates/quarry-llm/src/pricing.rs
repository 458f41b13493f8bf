//! Embedding cost estimation over a static per-model price table.

/// Estimate token count using the chars/4 heuristic.
///
/// Used for cost accounting only, never for correctness.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Price applied when a model is absent from the table.
const DEFAULT_CENTS_PER_MILLION: f64 = 10.0;

/// Cents per one million input tokens.
const PRICE_TABLE: &[(&str, f64)] = &[
    ("text-embedding-3-small", 2.0),
    ("text-embedding-3-large", 13.0),
    ("text-embedding-ada-002", 10.0),
    ("nomic-embed-text", 0.0),
    ("all-minilm", 0.0),
    ("mxbai-embed-large", 0.0),
];

/// Estimated embedding cost in cents for `tokens` input tokens on `model`.
///
/// Unknown models fall back to a default price rather than erroring.
#[must_use]
pub fn embedding_cost_cents(model: &str, tokens: usize) -> f64 {
    let per_million = PRICE_TABLE
        .iter()
        .find(|(m, _)| *m == model)
        .map_or(DEFAULT_CENTS_PER_MILLION, |(_, p)| *p);
    #[allow(clippy::cast_precision_loss)]
    let tokens = tokens as f64;
    per_million * tokens / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_ascii() {
        assert_eq!(estimate_tokens("Hello, world!"), 3);
    }

    #[test]
    fn estimate_tokens_empty() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn estimate_tokens_unicode_counts_chars() {
        assert_eq!(estimate_tokens("Привет мир"), 2);
    }

    #[test]
    fn known_model_priced_from_table() {
        let cost = embedding_cost_cents("text-embedding-3-small", 1_000_000);
        assert!((cost - 2.0).abs() < 1e-9);
    }

    #[test]
    fn local_model_is_free() {
        assert!(embedding_cost_cents("nomic-embed-text", 500_000).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_uses_default_price() {
        let cost = embedding_cost_cents("mystery-embedder-9000", 1_000_000);
        assert!((cost - DEFAULT_CENTS_PER_MILLION).abs() < 1e-9);
    }

    #[test]
    fn zero_tokens_zero_cost() {
        assert!(embedding_cost_cents("text-embedding-3-large", 0).abs() < 1e-9);
    }
}
