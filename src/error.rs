//! Engine error taxonomy.
//!
//! The engine surface returns typed [`EngineError`]s; the pluggable seams
//! (metadata store, vector store, providers) return `anyhow::Result` and are
//! wrapped into [`EngineError::Backend`] before crossing the engine boundary.

use thiserror::Error;

/// Typed failure returned by every engine operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("segment not found: {0}")]
    SegmentNotFound(String),

    #[error("provider configuration not found: {0}")]
    ProviderConfigNotFound(String),

    /// The dataset holds the reindexing sentinel; ingestion, lifecycle,
    /// reindex, and retrieval are all refused until the migration publishes
    /// a new collection.
    #[error("dataset is locked for reindexing: {0}")]
    Busy(String),

    #[error("document is archived: {0}")]
    Archived(String),

    #[error("invalid request: {0}")]
    Validation(String),

    /// A metadata-store, vector-store, or provider call failed. The affected
    /// segment row, if any, has already been marked `failed`.
    #[error("backend failure: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
