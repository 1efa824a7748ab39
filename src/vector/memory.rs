//! In-memory vector backend.
//!
//! Collections live in a registry shared by every store opened from it, so
//! vectors written through one store instance are visible to the next.
//! Search is brute-force cosine similarity, clamped to `[0, 1]`: negative
//! similarities count as irrelevant rather than being rescaled, so score
//! thresholds keep their intuitive meaning.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::provider::Embedder;

use super::{DeleteOutcome, SegmentPayload, VectorHit, VectorStore};

struct StoredVector {
    index_id: String,
    content: String,
    segment_id: String,
    document_id: String,
    dataset_id: String,
    vector: Vec<f32>,
}

#[derive(Clone)]
pub struct MemoryVectorRegistry {
    collections: Arc<RwLock<HashMap<String, Vec<StoredVector>>>>,
    supports_collection_delete: bool,
}

impl MemoryVectorRegistry {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            supports_collection_delete: true,
        }
    }

    /// A registry whose `delete_collection` reports `NotSupported`, for
    /// exercising the per-id fallback path.
    pub fn without_collection_delete() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            supports_collection_delete: false,
        }
    }

    pub fn open(&self, collection: &str, embedder: Arc<dyn Embedder>) -> Arc<dyn VectorStore> {
        Arc::new(MemoryVectorStore {
            registry: self.clone(),
            collection: collection.to_string(),
            embedder,
            consumed_tokens: AtomicU64::new(0),
        })
    }

    /// Number of vectors currently held in a collection.
    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .unwrap()
            .get(collection)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryVectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MemoryVectorStore {
    registry: MemoryVectorRegistry,
    collection: String,
    embedder: Arc<dyn Embedder>,
    consumed_tokens: AtomicU64,
}

fn cosine_sim(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn add_texts(&self, payloads: &[SegmentPayload]) -> Result<Vec<String>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = payloads.iter().map(|p| p.content.clone()).collect();
        let batch = self.embedder.embed(&texts).await?;
        if batch.vectors.len() != payloads.len() {
            bail!(
                "embedder returned {} vectors for {} texts",
                batch.vectors.len(),
                payloads.len()
            );
        }
        self.consumed_tokens.fetch_add(batch.tokens, Ordering::SeqCst);

        let mut index_ids = Vec::with_capacity(payloads.len());
        let mut collections = self.registry.collections.write().unwrap();
        let stored = collections.entry(self.collection.clone()).or_default();
        for (payload, vector) in payloads.iter().zip(batch.vectors.into_iter()) {
            let index_id = Uuid::new_v4().to_string();
            stored.push(StoredVector {
                index_id: index_id.clone(),
                content: payload.content.clone(),
                segment_id: payload.metadata.segment_id.clone(),
                document_id: payload.metadata.document_id.clone(),
                dataset_id: payload.metadata.dataset_id.clone(),
                vector,
            });
            index_ids.push(index_id);
        }

        Ok(index_ids)
    }

    async fn delete(&self, index_ids: &[String]) -> Result<()> {
        if index_ids.is_empty() {
            return Ok(());
        }
        let mut collections = self.registry.collections.write().unwrap();
        if let Some(stored) = collections.get_mut(&self.collection) {
            stored.retain(|sv| !index_ids.iter().any(|id| id == &sv.index_id));
        }
        Ok(())
    }

    async fn delete_collection(&self) -> Result<DeleteOutcome> {
        if !self.registry.supports_collection_delete {
            return Ok(DeleteOutcome::NotSupported);
        }
        self.registry
            .collections
            .write()
            .unwrap()
            .remove(&self.collection);
        Ok(DeleteOutcome::Deleted)
    }

    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f32,
        document_filter: Option<&[String]>,
    ) -> Result<Vec<VectorHit>> {
        let batch = self.embedder.embed(&[query.to_string()]).await?;
        self.consumed_tokens.fetch_add(batch.tokens, Ordering::SeqCst);
        let query_vec = batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty embedding response for query"))?;

        let collections = self.registry.collections.read().unwrap();
        let stored = match collections.get(&self.collection) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };

        let mut hits: Vec<VectorHit> = stored
            .iter()
            .filter(|sv| match document_filter {
                Some(ids) => ids.iter().any(|id| id == &sv.document_id),
                None => true,
            })
            .map(|sv| VectorHit {
                content: sv.content.clone(),
                metadata: super::SegmentMetadata {
                    segment_id: sv.segment_id.clone(),
                    document_id: sv.document_id.clone(),
                    dataset_id: sv.dataset_id.clone(),
                },
                score: cosine_sim(&query_vec, &sv.vector).clamp(0.0, 1.0),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);

        Ok(hits)
    }

    fn take_consumed_tokens(&self) -> u64 {
        self.consumed_tokens.swap(0, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::EmbeddingBatch;
    use crate::vector::SegmentMetadata;

    /// Deterministic embedder: the first f32 parsed from the text becomes
    /// the cosine similarity against the unit query vector `[1, 0]`.
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
            let vectors = texts
                .iter()
                .map(|t| {
                    let x: f32 = t.split_whitespace().next().unwrap_or("1").parse().unwrap_or(1.0);
                    vec![x, (1.0 - x * x).max(0.0).sqrt()]
                })
                .collect();
            Ok(EmbeddingBatch {
                vectors,
                tokens: texts.len() as u64,
            })
        }
    }

    fn payload(x: &str, segment: &str) -> SegmentPayload {
        SegmentPayload {
            content: x.to_string(),
            metadata: SegmentMetadata {
                segment_id: segment.to_string(),
                document_id: format!("doc-{segment}"),
                dataset_id: "ds".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_threshold_and_top_k() {
        let registry = MemoryVectorRegistry::new();
        let store = registry.open("col", Arc::new(AxisEmbedder));

        let payloads: Vec<SegmentPayload> = ["0.9", "0.8", "0.7", "0.6", "0.4", "0.3"]
            .iter()
            .enumerate()
            .map(|(i, x)| payload(x, &format!("s{i}")))
            .collect();
        store.add_texts(&payloads).await.unwrap();

        let hits = store.similarity_search("1.0", 4, 0.5, None).await.unwrap();
        let scores: Vec<f32> = hits.iter().map(|h| (h.score * 10.0).round() / 10.0).collect();
        assert_eq!(scores, vec![0.9, 0.8, 0.7, 0.6]);
    }

    #[tokio::test]
    async fn test_document_filter() {
        let registry = MemoryVectorRegistry::new();
        let store = registry.open("col", Arc::new(AxisEmbedder));
        store
            .add_texts(&[payload("0.9", "a"), payload("0.8", "b")])
            .await
            .unwrap();

        let filter = vec!["doc-b".to_string()];
        let hits = store
            .similarity_search("1.0", 10, 0.0, Some(&filter))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.segment_id, "b");
    }

    #[tokio::test]
    async fn test_token_counter_get_and_reset() {
        let registry = MemoryVectorRegistry::new();
        let store = registry.open("col", Arc::new(AxisEmbedder));
        store
            .add_texts(&[payload("0.5", "a"), payload("0.6", "b")])
            .await
            .unwrap();

        assert_eq!(store.take_consumed_tokens(), 2);
        assert_eq!(store.take_consumed_tokens(), 0);
    }

    #[tokio::test]
    async fn test_delete_collection_not_supported() {
        let registry = MemoryVectorRegistry::without_collection_delete();
        let store = registry.open("col", Arc::new(AxisEmbedder));
        store.add_texts(&[payload("0.5", "a")]).await.unwrap();

        assert_eq!(
            store.delete_collection().await.unwrap(),
            DeleteOutcome::NotSupported
        );
        assert_eq!(registry.collection_len("col"), 1);
    }

    #[tokio::test]
    async fn test_delete_by_index_id() {
        let registry = MemoryVectorRegistry::new();
        let store = registry.open("col", Arc::new(AxisEmbedder));
        let ids = store
            .add_texts(&[payload("0.5", "a"), payload("0.6", "b")])
            .await
            .unwrap();

        store.delete(&ids[..1]).await.unwrap();
        assert_eq!(registry.collection_len("col"), 1);
    }
}
