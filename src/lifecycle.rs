//! Segment and document lifecycle.
//!
//! Enable/disable/delete operations drive the indexing state machine and the
//! vector store in lockstep with the metadata store. The rules:
//!
//! - Segment-level enable/disable moves vectors when the parent document is
//!   enabled; when the document is disabled it only flips the row status,
//!   because the document-level disable already removed the vectors and a
//!   document re-enable will bulk re-add them.
//! - Document-level disable removes vectors but preserves segment rows for
//!   re-enable; re-enable re-adds the content, served from the embedding
//!   cache, so no provider tokens are spent.
//! - Deletes are soft and idempotent; deleting an already-disabled document
//!   touches only metadata.
//!
//! Any vector-store failure during a transition leaves the affected row in
//! `failed`/unchanged status and is re-raised; retries belong to the caller.

use crate::engine::{now_ts, Engine};
use crate::error::{EngineError, Result};
use crate::models::{Document, IndexingStatus, RowStatus, Segment};
use crate::vector::{DeleteOutcome, SegmentMetadata, SegmentPayload, VectorStore};

impl Engine {
    pub(crate) async fn require_document(&self, document_id: &str) -> Result<Document> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| EngineError::DocumentNotFound(document_id.to_string()))?;
        if document.status == RowStatus::Deleted {
            return Err(EngineError::DocumentNotFound(document_id.to_string()));
        }
        Ok(document)
    }

    pub(crate) async fn require_segment(&self, segment_id: &str) -> Result<Segment> {
        let segment = self
            .store
            .get_segment(segment_id)
            .await?
            .ok_or_else(|| EngineError::SegmentNotFound(segment_id.to_string()))?;
        if segment.status == RowStatus::Deleted {
            return Err(EngineError::SegmentNotFound(segment_id.to_string()));
        }
        Ok(segment)
    }

    /// Re-activate a disabled segment. Re-embeds and upserts unless the
    /// parent document is disabled, in which case only the row status flips.
    pub async fn enable_segment(&self, segment_id: &str) -> Result<()> {
        let segment = self.require_segment(segment_id).await?;
        let document = self.require_document(&segment.document_id).await?;
        let (dataset, collection) = self.require_ready_dataset(&segment.dataset_id).await?;

        if document.archived {
            return Err(EngineError::Archived(document.id));
        }
        if segment.status == RowStatus::Enabled {
            return Err(EngineError::Validation(format!(
                "segment is already enabled: {}",
                segment_id
            )));
        }

        if document.status == RowStatus::Disabled {
            self.store
                .set_segment_status(segment_id, RowStatus::Enabled)
                .await?;
            return Ok(());
        }

        let vector_store = self
            .open_collection(&collection, &dataset.embedding_config_id)
            .await?;
        self.index_segment(&vector_store, &segment).await?;
        self.store
            .set_segment_status(segment_id, RowStatus::Enabled)
            .await?;
        tracing::debug!(segment_id, "segment enabled");
        Ok(())
    }

    /// Deactivate a segment. Removes its vectors unless the parent document
    /// is disabled, in which case only the row status flips.
    pub async fn disable_segment(&self, segment_id: &str) -> Result<()> {
        let segment = self.require_segment(segment_id).await?;
        let document = self.require_document(&segment.document_id).await?;
        let (dataset, collection) = self.require_ready_dataset(&segment.dataset_id).await?;

        if document.archived {
            return Err(EngineError::Archived(document.id));
        }
        if segment.status == RowStatus::Disabled {
            return Err(EngineError::Validation(format!(
                "segment is already disabled: {}",
                segment_id
            )));
        }

        if document.status == RowStatus::Disabled {
            self.store
                .set_segment_status(segment_id, RowStatus::Disabled)
                .await?;
            return Ok(());
        }

        if let Some(index_id) = &segment.index_id {
            let vector_store = self
                .open_collection(&collection, &dataset.embedding_config_id)
                .await?;
            vector_store
                .delete(std::slice::from_ref(index_id))
                .await
                .map_err(EngineError::Backend)?;
        }
        self.store.reset_segment_index(segment_id).await?;
        self.store
            .set_segment_status(segment_id, RowStatus::Disabled)
            .await?;
        tracing::debug!(segment_id, "segment disabled");
        Ok(())
    }

    /// Re-activate a disabled document and re-add every enabled segment's
    /// vectors. The content is unchanged, so the embedding cache serves the
    /// vectors without new provider calls.
    pub async fn enable_document(&self, document_id: &str) -> Result<()> {
        let document = self.require_document(document_id).await?;
        let (dataset, collection) = self.require_ready_dataset(&document.dataset_id).await?;

        if document.archived {
            return Err(EngineError::Archived(document.id));
        }
        if document.status == RowStatus::Enabled {
            return Err(EngineError::Validation(format!(
                "document is already enabled: {}",
                document_id
            )));
        }

        self.store
            .set_document_status(document_id, RowStatus::Enabled)
            .await?;

        let vector_store = self
            .open_collection(&collection, &dataset.embedding_config_id)
            .await?;
        let segments = self.store.segments_by_document(document_id).await?;
        for segment in segments
            .iter()
            .filter(|s| s.status == RowStatus::Enabled)
            .filter(|s| s.indexing_status == IndexingStatus::NotIndexed)
        {
            self.index_segment(&vector_store, segment).await?;
        }
        tracing::info!(document_id, "document enabled");
        Ok(())
    }

    /// Deactivate a document: remove every enabled segment's vectors while
    /// preserving the segment rows for a later re-enable.
    pub async fn disable_document(&self, document_id: &str) -> Result<()> {
        let document = self.require_document(document_id).await?;
        let (dataset, collection) = self.require_ready_dataset(&document.dataset_id).await?;

        if document.archived {
            return Err(EngineError::Archived(document.id));
        }
        if document.status == RowStatus::Disabled {
            return Err(EngineError::Validation(format!(
                "document is already disabled: {}",
                document_id
            )));
        }

        let vector_store = self
            .open_collection(&collection, &dataset.embedding_config_id)
            .await?;
        let segments = self.store.segments_by_document(document_id).await?;
        for segment in segments
            .iter()
            .filter(|s| s.status == RowStatus::Enabled && s.is_indexed())
        {
            let index_id = segment.index_id.clone().unwrap_or_default();
            vector_store
                .delete(std::slice::from_ref(&index_id))
                .await
                .map_err(EngineError::Backend)?;
            self.store.reset_segment_index(&segment.id).await?;
        }
        self.store
            .set_document_status(document_id, RowStatus::Disabled)
            .await?;
        tracing::info!(document_id, "document disabled");
        Ok(())
    }

    /// Soft-delete a document. Idempotent: an already-deleted document is a
    /// no-op, an already-disabled one only touches metadata; otherwise the
    /// vector-store entries are removed first and the embedding cache is
    /// purged for the document's content.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let document = match self.store.get_document(document_id).await? {
            None => return Err(EngineError::DocumentNotFound(document_id.to_string())),
            Some(d) if d.status == RowStatus::Deleted => return Ok(()),
            Some(d) => d,
        };
        let (dataset, collection) = self.require_ready_dataset(&document.dataset_id).await?;

        let segments = self.store.segments_by_document(document_id).await?;

        if document.status == RowStatus::Enabled {
            let index_ids: Vec<String> = segments
                .iter()
                .filter_map(|s| s.index_id.clone())
                .collect();
            if !index_ids.is_empty() {
                let vector_store = self
                    .open_collection(&collection, &dataset.embedding_config_id)
                    .await?;
                vector_store
                    .delete(&index_ids)
                    .await
                    .map_err(EngineError::Backend)?;
            }
            let hashes: Vec<String> = segments.iter().map(|s| s.content_hash.clone()).collect();
            self.embed_cache.purge_contents(&hashes);
        }

        self.store.soft_delete_document_segments(document_id).await?;
        self.store
            .set_document_status(document_id, RowStatus::Deleted)
            .await?;
        tracing::info!(document_id, "document deleted");
        Ok(())
    }

    /// Soft-delete a dataset and destroy its collection. Falls back to
    /// per-id deletion when the backend cannot drop collections wholesale.
    pub async fn delete_dataset(&self, dataset_id: &str) -> Result<()> {
        let (dataset, collection) = self.require_ready_dataset(dataset_id).await?;

        let vector_store = self
            .open_collection(&collection, &dataset.embedding_config_id)
            .await?;
        let segments = self.store.segments_by_dataset(dataset_id).await?;

        match vector_store
            .delete_collection()
            .await
            .map_err(EngineError::Backend)?
        {
            DeleteOutcome::Deleted => {}
            DeleteOutcome::NotSupported => {
                let index_ids: Vec<String> = segments
                    .iter()
                    .filter(|s| s.status == RowStatus::Enabled)
                    .filter_map(|s| s.index_id.clone())
                    .collect();
                vector_store
                    .delete(&index_ids)
                    .await
                    .map_err(EngineError::Backend)?;
            }
        }

        let hashes: Vec<String> = segments.iter().map(|s| s.content_hash.clone()).collect();
        self.embed_cache.purge_contents(&hashes);

        self.store.soft_delete_dataset_rows(dataset_id).await?;
        self.store
            .set_dataset_status(dataset_id, RowStatus::Deleted)
            .await?;
        tracing::info!(dataset_id, "dataset deleted");
        Ok(())
    }

    /// Run one segment through indexing → indexed, marking `failed` and
    /// re-raising on a vector-store error.
    pub(crate) async fn index_segment(
        &self,
        vector_store: &std::sync::Arc<dyn VectorStore>,
        segment: &Segment,
    ) -> Result<()> {
        self.store.mark_segment_indexing(&segment.id).await?;

        let payload = SegmentPayload {
            content: segment.content.clone(),
            metadata: SegmentMetadata {
                segment_id: segment.id.clone(),
                document_id: segment.document_id.clone(),
                dataset_id: segment.dataset_id.clone(),
            },
        };
        match vector_store.add_texts(std::slice::from_ref(&payload)).await {
            Ok(index_ids) => {
                let consumed = vector_store.take_consumed_tokens();
                // A cache hit consumes nothing; keep the original count so
                // accounting survives disable/enable round-trips.
                let tokens = if consumed > 0 { consumed } else { segment.token_count };
                self.store
                    .mark_segment_indexed(&segment.id, &index_ids[0], tokens, now_ts())
                    .await?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(segment_id = %segment.id, error = %e, "segment indexing failed");
                self.store
                    .mark_segment_failed(&segment.id, &e.to_string())
                    .await?;
                Err(EngineError::Backend(e))
            }
        }
    }
}
