//! Core data models: datasets, documents, segments, and the retrieval
//! audit rows that flow through the indexing and retrieval pipeline.

use serde::{Deserialize, Serialize};

/// Reserved `collection_ref` value marking a dataset as mid-migration.
pub const REINDEXING_SENTINEL: &str = "reindexing";

/// Vector-store collection binding of a dataset.
///
/// `Reindexing` is the advisory lock: while a dataset holds it, every
/// ingestion, lifecycle, reindex, and retrieval request is refused with
/// `Busy`. Only the orchestrator that acquired it may publish a new
/// collection and clear it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionRef {
    Ready(String),
    Reindexing,
}

impl CollectionRef {
    pub fn as_str(&self) -> &str {
        match self {
            CollectionRef::Ready(name) => name,
            CollectionRef::Reindexing => REINDEXING_SENTINEL,
        }
    }

    pub fn parse(raw: &str) -> Self {
        if raw == REINDEXING_SENTINEL {
            CollectionRef::Reindexing
        } else {
            CollectionRef::Ready(raw.to_string())
        }
    }

    pub fn is_reindexing(&self) -> bool {
        matches!(self, CollectionRef::Reindexing)
    }
}

/// Row status shared by documents and segments. Rows are soft-deleted,
/// never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Enabled,
    Disabled,
    Deleted,
}

impl RowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowStatus::Enabled => "enabled",
            RowStatus::Disabled => "disabled",
            RowStatus::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "enabled" => Some(RowStatus::Enabled),
            "disabled" => Some(RowStatus::Disabled),
            "deleted" => Some(RowStatus::Deleted),
            _ => None,
        }
    }
}

/// Indexing state machine of a segment.
///
/// `index_id` on the segment row is valid iff the status is `Indexed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingStatus {
    NotIndexed = 0,
    Indexing = 1,
    Indexed = 2,
    Failed = 3,
}

impl IndexingStatus {
    pub fn as_i64(&self) -> i64 {
        *self as i64
    }

    pub fn parse(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(IndexingStatus::NotIndexed),
            1 => Some(IndexingStatus::Indexing),
            2 => Some(IndexingStatus::Indexed),
            3 => Some(IndexingStatus::Failed),
            _ => None,
        }
    }
}

/// Per-dataset retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieverConfig {
    pub top_k: usize,
    pub score_threshold: f32,
    /// When set, hits are reordered by the tenant's reranker and the
    /// reranking score becomes the primary sort key.
    pub rerank: bool,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            top_k: 4,
            score_threshold: 0.0,
            rerank: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub collection_ref: CollectionRef,
    pub embedding_config_id: String,
    pub retriever: RetrieverConfig,
    pub status: RowStatus,
    pub created_at: i64,
}

/// Where a document's raw content comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentSource {
    UploadFile { upload_file_id: String },
    Inline { text: String, source_tag: String },
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub dataset_id: String,
    pub source: DocumentSource,
    pub status: RowStatus,
    /// Archived documents refuse every enable/disable operation.
    pub archived: bool,
    pub word_count: u64,
    pub token_count: u64,
    pub indexing_latency_secs: f64,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub id: String,
    pub document_id: String,
    pub dataset_id: String,
    pub position: i64,
    pub content: String,
    /// SHA-256 of `content`; keys the embedding de-duplication cache.
    pub content_hash: String,
    pub word_count: u64,
    pub token_count: u64,
    /// Opaque vector-store handle, present iff `indexing_status == Indexed`.
    pub index_id: Option<String>,
    pub indexing_status: IndexingStatus,
    pub status: RowStatus,
    pub hit_count: u64,
    pub error: Option<String>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
}

impl Segment {
    /// Whether this segment currently has queryable vectors behind it.
    pub fn is_indexed(&self) -> bool {
        self.indexing_status == IndexingStatus::Indexed && self.index_id.is_some()
    }
}

/// Origin of a retrieval call, recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalKind {
    App,
    HitTesting,
}

impl RetrievalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalKind::App => "app",
            RetrievalKind::HitTesting => "hit_testing",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "app" => Some(RetrievalKind::App),
            "hit_testing" => Some(RetrievalKind::HitTesting),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStatus {
    Running,
    Success,
    Failed,
}

impl RetrievalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStatus::Running => "running",
            RetrievalStatus::Success => "success",
            RetrievalStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(RetrievalStatus::Running),
            "success" => Some(RetrievalStatus::Success),
            "failed" => Some(RetrievalStatus::Failed),
            _ => None,
        }
    }
}

/// One retrieval call's audit record. Append-only; exactly one record per
/// call, always closed with a terminal status.
#[derive(Debug, Clone)]
pub struct RetrievalRecord {
    pub id: String,
    pub dataset_ids: Vec<String>,
    pub query: String,
    pub kind: RetrievalKind,
    pub status: RetrievalStatus,
    pub elapsed_secs: f64,
    pub embedding_tokens: u64,
    pub reranking_tokens: u64,
    pub error: Option<String>,
    pub created_at: i64,
}

/// Score provenance for one returned segment; child row of a
/// [`RetrievalRecord`].
#[derive(Debug, Clone)]
pub struct RetrievalDetail {
    pub id: String,
    pub record_id: String,
    pub dataset_id: String,
    pub document_id: String,
    pub segment_id: String,
    pub score: f32,
    pub reranking_score: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_ref_sentinel_roundtrip() {
        assert!(CollectionRef::parse("reindexing").is_reindexing());
        assert_eq!(CollectionRef::Reindexing.as_str(), REINDEXING_SENTINEL);

        let ready = CollectionRef::parse("col_abc123");
        assert!(!ready.is_reindexing());
        assert_eq!(ready.as_str(), "col_abc123");
    }

    #[test]
    fn test_indexing_status_roundtrip() {
        for status in [
            IndexingStatus::NotIndexed,
            IndexingStatus::Indexing,
            IndexingStatus::Indexed,
            IndexingStatus::Failed,
        ] {
            assert_eq!(IndexingStatus::parse(status.as_i64()), Some(status));
        }
        assert_eq!(IndexingStatus::parse(7), None);
    }

    #[test]
    fn test_row_status_roundtrip() {
        for status in [RowStatus::Enabled, RowStatus::Disabled, RowStatus::Deleted] {
            assert_eq!(RowStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RowStatus::parse("bogus"), None);
    }
}
