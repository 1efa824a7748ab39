//! Qdrant vector backend (feature `qdrant`).
//!
//! Collections are created lazily on first upsert with cosine distance and
//! the embedder's dimensionality. Qdrant supports native whole-collection
//! deletion, so `delete_collection` never reports `NotSupported`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance,
    Filter, PointStruct, PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use crate::provider::Embedder;

use super::{DeleteOutcome, SegmentMetadata, SegmentPayload, VectorHit, VectorStore};

pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    embedder: Arc<dyn Embedder>,
    consumed_tokens: AtomicU64,
}

impl QdrantVectorStore {
    pub async fn open(
        url: &str,
        collection: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<dyn VectorStore>> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| anyhow!("Qdrant client build failed: {}", e))?;

        Ok(Arc::new(Self {
            client,
            collection: collection.to_string(),
            embedder,
            consumed_tokens: AtomicU64::new(0),
        }))
    }

    async fn ensure_collection(&self) -> Result<()> {
        if !self.client.collection_exists(&self.collection).await? {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection).vectors_config(
                        VectorParamsBuilder::new(self.embedder.dims() as u64, Distance::Cosine),
                    ),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn add_texts(&self, payloads: &[SegmentPayload]) -> Result<Vec<String>> {
        if payloads.is_empty() {
            return Ok(Vec::new());
        }
        self.ensure_collection().await?;

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
        let mut points = Vec::with_capacity(payloads.len());
        for (payload, vector) in payloads.iter().zip(batch.vectors.into_iter()) {
            let index_id = Uuid::new_v4().to_string();
            let mut payload_map = JsonMap::new();
            payload_map.insert(
                "content".to_string(),
                JsonValue::String(payload.content.clone()),
            );
            payload_map.insert(
                "segment_id".to_string(),
                JsonValue::String(payload.metadata.segment_id.clone()),
            );
            payload_map.insert(
                "document_id".to_string(),
                JsonValue::String(payload.metadata.document_id.clone()),
            );
            payload_map.insert(
                "dataset_id".to_string(),
                JsonValue::String(payload.metadata.dataset_id.clone()),
            );
            points.push(PointStruct::new(index_id.clone(), vector, payload_map));
            index_ids.push(index_id);
        }

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points))
            .await?;

        Ok(index_ids)
    }

    async fn delete(&self, index_ids: &[String]) -> Result<()> {
        if index_ids.is_empty() {
            return Ok(());
        }

        let point_ids: Vec<qdrant_client::qdrant::PointId> = index_ids
            .iter()
            .map(|id| qdrant_client::qdrant::PointId {
                point_id_options: Some(PointIdOptions::Uuid(id.clone())),
            })
            .collect();

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(PointsIdsList { ids: point_ids }),
            )
            .await?;

        Ok(())
    }

    async fn delete_collection(&self) -> Result<DeleteOutcome> {
        self.client.delete_collection(&self.collection).await?;
        Ok(DeleteOutcome::Deleted)
    }

    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f32,
        document_filter: Option<&[String]>,
    ) -> Result<Vec<VectorHit>> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(Vec::new());
        }

        let batch = self.embedder.embed(&[query.to_string()]).await?;
        self.consumed_tokens.fetch_add(batch.tokens, Ordering::SeqCst);
        let query_vec = batch
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("empty embedding response for query"))?;

        let mut builder = SearchPointsBuilder::new(&self.collection, query_vec, top_k as u64)
            .with_payload(true)
            .score_threshold(score_threshold);
        if let Some(ids) = document_filter {
            builder = builder.filter(Filter::should(
                ids.iter()
                    .map(|id| Condition::matches("document_id", id.clone())),
            ));
        }

        let response = self.client.search_points(builder).await?;

        let mut hits = Vec::with_capacity(response.result.len());
        for point in response.result {
            let get = |key: &str| {
                point
                    .payload
                    .get(key)
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .unwrap_or_default()
            };
            hits.push(VectorHit {
                content: get("content"),
                metadata: SegmentMetadata {
                    segment_id: get("segment_id"),
                    document_id: get("document_id"),
                    dataset_id: get("dataset_id"),
                },
                score: point.score.clamp(0.0, 1.0),
            });
        }

        Ok(hits)
    }

    fn take_consumed_tokens(&self) -> u64 {
        self.consumed_tokens.swap(0, Ordering::SeqCst)
    }
}
