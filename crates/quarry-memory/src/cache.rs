//! Content-addressed embedding cache.
//!
//! Keys are the blake3 hash of the exact text, so identical chunk content
//! anywhere in a codebase shares one entry. Caching is strictly a cost and
//! latency optimization: every underlying store failure degrades to a miss
//! (reads) or is dropped (writes), never surfaced to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;

/// Default entry lifetime: seven days.
pub const DEFAULT_TTL_SECS: i64 = 7 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Shared by reference across retrievers and indexers; entries are write-once,
/// so concurrent writers of identical content race harmlessly onto the same row.
pub struct EmbeddingCache {
    pool: SqlitePool,
    model: String,
    ttl_secs: i64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("model", &self.model)
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

fn unix_now() -> i64 {
    i64::try_from(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
    )
    .unwrap_or(i64::MAX)
}

fn text_key(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

impl EmbeddingCache {
    #[must_use]
    pub fn new(pool: SqlitePool, model: impl Into<String>) -> Self {
        Self {
            pool,
            model: model.into(),
            ttl_secs: DEFAULT_TTL_SECS,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Look up the cached vector for `text`. Expired entries and store
    /// failures both read as a miss.
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = text_key(text);
        let now = unix_now();

        let row: Result<Option<(Vec<u8>, i64)>, sqlx::Error> = sqlx::query_as(
            "SELECT vector, expires_at FROM embedding_cache WHERE text_hash = ? AND model = ?",
        )
        .bind(&key)
        .bind(&self.model)
        .fetch_optional(&self.pool)
        .await;

        match row {
            Ok(Some((blob, expires_at))) if expires_at > now => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(decode_vector(&blob))
            }
            Ok(Some(_)) => {
                // Expired: evict lazily, eviction failure is ignorable.
                let _ = sqlx::query(
                    "DELETE FROM embedding_cache WHERE text_hash = ? AND model = ?",
                )
                .bind(&key)
                .bind(&self.model)
                .execute(&self.pool)
                .await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!("embedding cache read failed, treating as miss: {e}");
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a vector for `text`. Entries are write-once: an existing live row
    /// is left untouched. Store failures are dropped with a warning.
    pub async fn set(&self, text: &str, vector: &[f32]) {
        let key = text_key(text);
        let now = unix_now();
        let dimensions = i64::try_from(vector.len()).unwrap_or(i64::MAX);

        let result = sqlx::query(
            "INSERT OR IGNORE INTO embedding_cache \
             (text_hash, model, dimensions, vector, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&key)
        .bind(&self.model)
        .bind(dimensions)
        .bind(encode_vector(vector))
        .bind(now)
        .bind(now + self.ttl_secs)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::warn!("embedding cache write failed, dropping entry: {e}");
        }
    }

    /// Batched lookup: one `Option` per input text, in input order.
    pub async fn get_many(&self, texts: &[String]) -> Vec<Option<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.get(text).await);
        }
        out
    }

    /// Batched store.
    pub async fn set_many(&self, entries: &[(String, Vec<f32>)]) {
        for (text, vector) in entries {
            self.set(text, vector).await;
        }
    }

    /// Explicitly invalidate the entry for `text`.
    pub async fn delete(&self, text: &str) {
        let key = text_key(text);
        let result = sqlx::query("DELETE FROM embedding_cache WHERE text_hash = ? AND model = ?")
            .bind(&key)
            .bind(&self.model)
            .execute(&self.pool)
            .await;
        if let Err(e) = result {
            tracing::warn!("embedding cache delete failed: {e}");
        }
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;

    async fn setup() -> EmbeddingCache {
        let store = SqliteStore::new(":memory:").await.unwrap();
        EmbeddingCache::new(store.pool().clone(), "test-model")
    }

    #[tokio::test]
    async fn set_then_get_returns_vector() {
        let cache = setup().await;
        cache.set("fn main() {}", &[0.1, 0.2, 0.3]).await;
        let got = cache.get("fn main() {}").await.unwrap();
        assert_eq!(got, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn get_unseen_text_is_miss() {
        let cache = setup().await;
        assert!(cache.get("never stored").await.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn identical_text_shares_entry_regardless_of_source() {
        let cache = setup().await;
        cache.set("shared content", &[1.0]).await;
        // A second writer of the same content is a no-op, not a conflict.
        cache.set("shared content", &[9.9]).await;
        assert_eq!(cache.get("shared content").await.unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_miss() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let cache = EmbeddingCache::new(store.pool().clone(), "m").with_ttl(-1);
        cache.set("stale", &[0.5]).await;
        assert!(cache.get("stale").await.is_none());
    }

    #[tokio::test]
    async fn delete_invalidates_entry() {
        let cache = setup().await;
        cache.set("doomed", &[0.5]).await;
        cache.delete("doomed").await;
        assert!(cache.get("doomed").await.is_none());
    }

    #[tokio::test]
    async fn hit_and_miss_counters_accumulate() {
        let cache = setup().await;
        cache.set("a", &[1.0]).await;
        cache.get("a").await;
        cache.get("a").await;
        cache.get("b").await;
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn reset_stats_zeroes_counters() {
        let cache = setup().await;
        cache.get("x").await;
        cache.reset_stats();
        assert_eq!(cache.stats(), CacheStats::default());
    }

    #[tokio::test]
    async fn get_many_preserves_order() {
        let cache = setup().await;
        cache.set("first", &[1.0]).await;
        cache.set("third", &[3.0]).await;
        let texts = vec!["first".to_owned(), "second".to_owned(), "third".to_owned()];
        let got = cache.get_many(&texts).await;
        assert_eq!(got[0], Some(vec![1.0]));
        assert_eq!(got[1], None);
        assert_eq!(got[2], Some(vec![3.0]));
    }

    #[tokio::test]
    async fn set_many_stores_all_entries() {
        let cache = setup().await;
        cache
            .set_many(&[("a".to_owned(), vec![1.0]), ("b".to_owned(), vec![2.0])])
            .await;
        assert_eq!(cache.get("a").await.unwrap(), vec![1.0]);
        assert_eq!(cache.get("b").await.unwrap(), vec![2.0]);
    }

    #[tokio::test]
    async fn closed_pool_reads_as_miss_not_error() {
        let store = SqliteStore::new(":memory:").await.unwrap();
        let cache = EmbeddingCache::new(store.pool().clone(), "m");
        store.pool().close().await;
        assert!(cache.get("anything").await.is_none());
        // Writes are silently dropped too.
        cache.set("anything", &[1.0]).await;
    }

    #[test]
    fn vector_roundtrip() {
        let v = vec![0.25, -1.5, 3.75];
        assert_eq!(decode_vector(&encode_vector(&v)), v);
    }

    #[test]
    fn text_key_is_deterministic() {
        assert_eq!(text_key("same"), text_key("same"));
        assert_ne!(text_key("same"), text_key("different"));
        assert_eq!(text_key("x").len(), 64);
    }
}
