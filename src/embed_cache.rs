//! Content-addressed embedding de-duplication cache.
//!
//! Keyed by `(model, sha256(content))`. [`CachedEmbedder`] wraps any
//! [`Embedder`] and consults the cache before calling the underlying
//! provider, so re-adding an already-embedded segment (document re-enable,
//! re-ingestion of identical content) costs no provider tokens. Lifecycle
//! deletion and reindexing purge entries by content hash so a changed
//! embedding model never serves stale vectors.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use crate::chunk::content_hash;
use crate::provider::{Embedder, EmbeddingBatch};

#[derive(Default)]
pub struct EmbeddingCache {
    entries: RwLock<HashMap<(String, String), Vec<f32>>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, model: &str, hash: &str) -> Option<Vec<f32>> {
        self.entries
            .read()
            .unwrap()
            .get(&(model.to_string(), hash.to_string()))
            .cloned()
    }

    pub fn put(&self, model: &str, hash: &str, vector: Vec<f32>) {
        self.entries
            .write()
            .unwrap()
            .insert((model.to_string(), hash.to_string()), vector);
    }

    /// Drop every entry whose content hash is in `hashes`, across all models.
    pub fn purge_contents(&self, hashes: &[String]) {
        if hashes.is_empty() {
            return;
        }
        let mut entries = self.entries.write().unwrap();
        entries.retain(|(_, hash), _| !hashes.iter().any(|h| h == hash));
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

/// An [`Embedder`] that serves repeated content from the cache.
///
/// Token accounting only charges for texts that actually reach the
/// underlying provider; cache hits are free.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Arc<EmbeddingCache>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, cache: Arc<EmbeddingCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        let model = self.inner.model_name().to_string();
        let hashes: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();

        let mut vectors: Vec<Option<Vec<f32>>> = hashes
            .iter()
            .map(|h| self.cache.get(&model, h))
            .collect();

        let miss_indices: Vec<usize> = vectors
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_none())
            .map(|(i, _)| i)
            .collect();

        let mut tokens = 0;
        if !miss_indices.is_empty() {
            let misses: Vec<String> = miss_indices.iter().map(|&i| texts[i].clone()).collect();
            let batch = self.inner.embed(&misses).await?;
            tokens = batch.tokens;
            for (&index, vector) in miss_indices.iter().zip(batch.vectors.into_iter()) {
                self.cache.put(&model, &hashes[index], vector.clone());
                vectors[index] = Some(vector);
            }
        }

        Ok(EmbeddingBatch {
            vectors: vectors.into_iter().map(|v| v.unwrap_or_default()).collect(),
            tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingEmbedder {
        calls: AtomicU64,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
            self.calls.fetch_add(texts.len() as u64, Ordering::SeqCst);
            Ok(EmbeddingBatch {
                vectors: texts.iter().map(|_| vec![0.5, 0.5]).collect(),
                tokens: texts.len() as u64 * 10,
            })
        }
    }

    #[tokio::test]
    async fn test_repeat_content_served_from_cache() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicU64::new(0),
        });
        let cache = Arc::new(EmbeddingCache::new());
        let embedder = CachedEmbedder::new(inner.clone(), cache.clone());

        let texts = vec!["hello".to_string()];
        let first = embedder.embed(&texts).await.unwrap();
        assert_eq!(first.tokens, 10);

        let second = embedder.embed(&texts).await.unwrap();
        assert_eq!(second.tokens, 0, "cache hit should cost nothing");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.vectors, second.vectors);
    }

    #[tokio::test]
    async fn test_purge_forces_reembedding() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicU64::new(0),
        });
        let cache = Arc::new(EmbeddingCache::new());
        let embedder = CachedEmbedder::new(inner.clone(), cache.clone());

        let texts = vec!["hello".to_string()];
        embedder.embed(&texts).await.unwrap();
        cache.purge_contents(&[content_hash("hello")]);
        embedder.embed(&texts).await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_mixed_hits_and_misses_keep_order() {
        let inner = Arc::new(CountingEmbedder {
            calls: AtomicU64::new(0),
        });
        let cache = Arc::new(EmbeddingCache::new());
        cache.put("counting", &content_hash("cached"), vec![9.0, 9.0]);
        let embedder = CachedEmbedder::new(inner, cache);

        let texts = vec!["fresh".to_string(), "cached".to_string()];
        let batch = embedder.embed(&texts).await.unwrap();
        assert_eq!(batch.vectors[0], vec![0.5, 0.5]);
        assert_eq!(batch.vectors[1], vec![9.0, 9.0]);
        assert_eq!(batch.tokens, 10, "only the miss is charged");
    }
}
