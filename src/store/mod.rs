//! Metadata store abstraction.
//!
//! The [`MetadataStore`] trait defines every relational operation the
//! indexing and retrieval pipeline needs — typed CRUD, conditional updates,
//! and soft deletes — enabling pluggable backends (SQLite, in-memory).
//!
//! Deletions are always soft: rows transition to the `deleted` status and
//! stay queryable for audit purposes. The two conditional updates
//! ([`begin_reindex`](MetadataStore::begin_reindex) and
//! [`publish_collection`](MetadataStore::publish_collection)) must be atomic
//! check-and-set operations; they are the lock protocol that keeps ingestion,
//! lifecycle mutation, reindexing, and retrieval mutually exclusive per
//! dataset.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::chunk::ProcessRule;
use crate::config::{EmbeddingConfig, RerankConfig};
use crate::models::{
    Dataset, Document, RetrievalDetail, RetrievalRecord, RetrievalStatus, RowStatus, Segment,
};

#[async_trait]
pub trait MetadataStore: Send + Sync {
    // ── datasets ─────────────────────────────────────────────────────────

    async fn insert_dataset(&self, dataset: &Dataset) -> Result<()>;

    async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>>;

    /// Atomically move a dataset into the reindexing state and record its
    /// new embedding configuration. Returns `false` when the dataset is
    /// absent or already reindexing — the caller lost the race.
    async fn begin_reindex(&self, dataset_id: &str, embedding_config_id: &str) -> Result<bool>;

    /// Atomically replace the reindexing sentinel with a real collection.
    /// Returns `false` when the dataset no longer holds the sentinel.
    async fn publish_collection(&self, dataset_id: &str, collection_ref: &str) -> Result<bool>;

    async fn set_dataset_status(&self, dataset_id: &str, status: RowStatus) -> Result<()>;

    // ── documents ────────────────────────────────────────────────────────

    async fn insert_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: &str) -> Result<Option<Document>>;

    /// Non-deleted documents of a dataset, in creation order.
    async fn documents_by_dataset(&self, dataset_id: &str) -> Result<Vec<Document>>;

    async fn set_document_status(&self, id: &str, status: RowStatus) -> Result<()>;

    async fn set_document_stats(
        &self,
        id: &str,
        word_count: u64,
        token_count: u64,
        indexing_latency_secs: f64,
    ) -> Result<()>;

    // ── segments ─────────────────────────────────────────────────────────

    async fn insert_segment(&self, segment: &Segment) -> Result<()>;

    async fn get_segment(&self, id: &str) -> Result<Option<Segment>>;

    /// Non-deleted segments of a document, ordered by position.
    async fn segments_by_document(&self, document_id: &str) -> Result<Vec<Segment>>;

    /// Non-deleted segments of a dataset, ordered by document then position.
    async fn segments_by_dataset(&self, dataset_id: &str) -> Result<Vec<Segment>>;

    async fn set_segment_status(&self, id: &str, status: RowStatus) -> Result<()>;

    async fn mark_segment_indexing(&self, id: &str) -> Result<()>;

    async fn mark_segment_indexed(
        &self,
        id: &str,
        index_id: &str,
        token_count: u64,
        completed_at: i64,
    ) -> Result<()>;

    async fn mark_segment_failed(&self, id: &str, error: &str) -> Result<()>;

    /// Back to `not_indexed`: clears `index_id` and token count. The row
    /// status is left untouched.
    async fn reset_segment_index(&self, id: &str) -> Result<()>;

    /// Increment-only; never rolled back, even when the retrieval that
    /// caused the hit later fails.
    async fn increment_hit_count(&self, id: &str) -> Result<()>;

    async fn soft_delete_document_segments(&self, document_id: &str) -> Result<()>;

    /// Soft-delete every non-deleted document and segment of a dataset.
    async fn soft_delete_dataset_rows(&self, dataset_id: &str) -> Result<()>;

    // ── retrieval audit ──────────────────────────────────────────────────

    async fn insert_retrieval_record(&self, record: &RetrievalRecord) -> Result<()>;

    async fn close_retrieval_record(
        &self,
        id: &str,
        status: RetrievalStatus,
        error: Option<&str>,
        elapsed_secs: f64,
        embedding_tokens: u64,
        reranking_tokens: u64,
    ) -> Result<()>;

    async fn get_retrieval_record(&self, id: &str) -> Result<Option<RetrievalRecord>>;

    /// Audit records that include the given dataset, oldest first.
    async fn retrieval_records_by_dataset(&self, dataset_id: &str)
        -> Result<Vec<RetrievalRecord>>;

    async fn insert_retrieval_details(&self, details: &[RetrievalDetail]) -> Result<()>;

    async fn retrieval_details_by_record(&self, record_id: &str) -> Result<Vec<RetrievalDetail>>;

    // ── persisted configuration ──────────────────────────────────────────

    async fn insert_embedding_config(&self, config: &EmbeddingConfig) -> Result<()>;

    async fn get_embedding_config(&self, id: &str) -> Result<Option<EmbeddingConfig>>;

    async fn insert_rerank_config(&self, config: &RerankConfig) -> Result<()>;

    async fn get_rerank_config(&self, tenant_id: &str) -> Result<Option<RerankConfig>>;

    async fn insert_process_rule(&self, rule: &ProcessRule) -> Result<()>;

    async fn get_process_rule(&self, id: &str) -> Result<Option<ProcessRule>>;

    /// Bind a tenant's active embedding configuration (used by cost
    /// estimation).
    async fn set_active_embedding_config(&self, tenant_id: &str, config_id: &str) -> Result<()>;

    async fn get_active_embedding_config(&self, tenant_id: &str) -> Result<Option<String>>;
}
