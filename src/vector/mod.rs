//! Vector store adapter.
//!
//! The [`VectorStore`] trait is the only path to the vector backend. A store
//! instance is cheap: it is opened per call from `(collection, embedder)` and
//! owns a per-call embedding-token counter with get-and-reset semantics so
//! callers can attribute cost to the operation that incurred it.
//!
//! Backends are selected by the typed [`VectorBackendConfig`](crate::config::VectorBackendConfig)
//! enum at configuration-load time:
//! - **[`memory::MemoryVectorRegistry`]** — brute-force cosine over
//!   in-process collections; the test and single-node backend.
//! - **`qdrant`** — a Qdrant server (feature `qdrant`).

pub mod memory;

#[cfg(feature = "qdrant")]
pub mod qdrant;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::VectorBackendConfig;
use crate::provider::Embedder;

/// Identifying metadata stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentMetadata {
    pub segment_id: String,
    pub document_id: String,
    pub dataset_id: String,
}

/// One text to upsert, with its provenance.
#[derive(Debug, Clone)]
pub struct SegmentPayload {
    pub content: String,
    pub metadata: SegmentMetadata,
}

/// A scored search hit. `score` is a normalized relevance in `[0, 1]`,
/// 1 = most similar.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub content: String,
    pub metadata: SegmentMetadata,
    pub score: f32,
}

/// Outcome of a whole-collection deletion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The backend cannot drop a collection wholesale; the caller must fall
    /// back to per-id deletion.
    NotSupported,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The collection this store is bound to.
    fn collection(&self) -> &str;

    /// Embed and upsert texts; returns one opaque index id per payload,
    /// in order.
    async fn add_texts(&self, payloads: &[SegmentPayload]) -> Result<Vec<String>>;

    /// Delete vectors by index id. Unknown ids are ignored.
    async fn delete(&self, index_ids: &[String]) -> Result<()>;

    /// Attempt to drop the whole collection.
    async fn delete_collection(&self) -> Result<DeleteOutcome>;

    /// Similarity search with relevance scores. Hits below `score_threshold`
    /// are dropped, the rest capped at `top_k`, ordered most similar first.
    /// `document_filter` restricts hits to the given source documents.
    async fn similarity_search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f32,
        document_filter: Option<&[String]>,
    ) -> Result<Vec<VectorHit>>;

    /// Embedding tokens consumed since the last call to this method.
    /// Reading resets the counter to zero.
    fn take_consumed_tokens(&self) -> u64;
}

/// Configured backend; opens [`VectorStore`] instances bound to a collection.
pub enum VectorBackend {
    Memory(memory::MemoryVectorRegistry),
    #[cfg(feature = "qdrant")]
    Qdrant { url: String },
}

impl VectorBackend {
    pub fn from_config(config: &VectorBackendConfig) -> Self {
        match config {
            VectorBackendConfig::Memory => {
                VectorBackend::Memory(memory::MemoryVectorRegistry::new())
            }
            #[cfg(feature = "qdrant")]
            VectorBackendConfig::Qdrant { url } => VectorBackend::Qdrant { url: url.clone() },
        }
    }

    pub async fn open(
        &self,
        collection: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Arc<dyn VectorStore>> {
        match self {
            VectorBackend::Memory(registry) => Ok(registry.open(collection, embedder)),
            #[cfg(feature = "qdrant")]
            VectorBackend::Qdrant { url } => {
                Ok(qdrant::QdrantVectorStore::open(url, collection, embedder).await?)
            }
        }
    }
}
