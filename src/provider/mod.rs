//! Embedding and reranking provider abstraction.
//!
//! Defines the [`Embedder`] and [`Reranker`] traits that all provider
//! backends implement. Concrete implementations:
//! - **[`remote::RemoteEmbedder`] / [`remote::RemoteReranker`]** — HTTP
//!   providers with batching, retry, and backoff.
//! - **`local::LocalEmbedder`** — runs models locally via fastembed
//!   (feature `local-embeddings`); no network calls after model download.
//!
//! Providers report the token count each call consumed so callers can
//! attribute cost; a provider that cannot count exactly estimates.

pub mod cache;
pub mod remote;

#[cfg(feature = "local-embeddings")]
pub mod local;

use anyhow::Result;
use async_trait::async_trait;

/// One embedding call's output: vectors in input order plus the tokens
/// the call consumed.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub tokens: u64,
}

/// One rerank call's output: a relevance score per input document, in
/// input order, plus the tokens the call consumed.
#[derive(Debug, Clone)]
pub struct RerankBatch {
    pub scores: Vec<f32>,
    pub tokens: u64,
}

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch>;
}

/// Trait for cross-encoder-style rerankers.
#[async_trait]
pub trait Reranker: Send + Sync {
    fn model_name(&self) -> &str;

    /// Score each document against the query. Scores come back aligned
    /// with the input documents; ordering is the caller's concern.
    async fn rerank(&self, query: &str, documents: &[String]) -> Result<RerankBatch>;
}
