//! Reindex orchestrator.
//!
//! Migrates a dataset to a new embedding configuration: acquires the
//! per-dataset lock by atomically swapping the collection binding for the
//! reindexing sentinel, snapshots the enabled segments, destroys the old
//! collection, purges the embedding cache, re-embeds every snapshotted
//! segment into a fresh collection, and finally publishes it.
//!
//! A failure mid-migration marks the failing segment `failed`, aborts the
//! remaining work, and leaves the dataset holding the sentinel; there is no
//! automatic rollback or resume path.

use crate::engine::{new_collection_ref, now_ts, Engine};
use crate::error::{EngineError, Result};
use crate::models::{CollectionRef, RowStatus};
use crate::vector::{DeleteOutcome, SegmentMetadata, SegmentPayload};

impl Engine {
    pub async fn reindex_dataset(
        &self,
        dataset_id: &str,
        new_embedding_config_id: &str,
    ) -> Result<()> {
        let dataset = self.require_dataset(dataset_id).await?;
        let old_collection = match &dataset.collection_ref {
            CollectionRef::Ready(collection) => collection.clone(),
            CollectionRef::Reindexing => return Err(EngineError::Busy(dataset_id.to_string())),
        };
        let old_config_id = dataset.embedding_config_id.clone();

        // Resolve both providers up front so a bad configuration fails
        // before the dataset is locked.
        self.providers.get_embedder(&old_config_id).await?;
        self.providers.get_embedder(new_embedding_config_id).await?;

        // The conditional update is the lock acquisition; losing it means
        // another orchestrator got there first.
        if !self
            .store
            .begin_reindex(dataset_id, new_embedding_config_id)
            .await?
        {
            return Err(EngineError::Busy(dataset_id.to_string()));
        }
        tracing::info!(dataset_id, old_config = %old_config_id, new_config = new_embedding_config_id, "reindex started");

        // Snapshot before any mutation: these segments, with these index
        // ids, define exactly what migrates.
        let enabled_documents: std::collections::HashSet<String> = self
            .store
            .documents_by_dataset(dataset_id)
            .await?
            .into_iter()
            .filter(|d| d.status == RowStatus::Enabled)
            .map(|d| d.id)
            .collect();
        let all_segments = self.store.segments_by_dataset(dataset_id).await?;
        let snapshot: Vec<_> = all_segments
            .iter()
            .filter(|s| s.status == RowStatus::Enabled && enabled_documents.contains(&s.document_id))
            .cloned()
            .collect();
        let snapshot_index_ids: Vec<String> = snapshot
            .iter()
            .filter_map(|s| s.index_id.clone())
            .collect();

        for segment in &snapshot {
            self.store.reset_segment_index(&segment.id).await?;
        }

        // Destroy the old collection; fall back to the snapshot's id list
        // when the backend cannot drop it wholesale.
        let old_store = self
            .open_collection(&old_collection, &old_config_id)
            .await?;
        match old_store
            .delete_collection()
            .await
            .map_err(EngineError::Backend)?
        {
            DeleteOutcome::Deleted => {}
            DeleteOutcome::NotSupported => {
                old_store
                    .delete(&snapshot_index_ids)
                    .await
                    .map_err(EngineError::Backend)?;
            }
        }

        // Stale vectors under the old model must not survive in the
        // de-duplication cache.
        let hashes: Vec<String> = all_segments.iter().map(|s| s.content_hash.clone()).collect();
        self.embed_cache.purge_contents(&hashes);

        let new_collection = new_collection_ref();
        let new_store = self
            .open_collection(&new_collection, new_embedding_config_id)
            .await?;

        for segment in &snapshot {
            let payload = SegmentPayload {
                content: segment.content.clone(),
                metadata: SegmentMetadata {
                    segment_id: segment.id.clone(),
                    document_id: segment.document_id.clone(),
                    dataset_id: dataset_id.to_string(),
                },
            };
            match new_store.add_texts(std::slice::from_ref(&payload)).await {
                Ok(index_ids) => {
                    let tokens = new_store.take_consumed_tokens();
                    self.store
                        .mark_segment_indexed(&segment.id, &index_ids[0], tokens, now_ts())
                        .await?;
                }
                Err(e) => {
                    // The dataset stays locked; there is no rollback path to
                    // the old collection, which is already gone.
                    tracing::warn!(
                        dataset_id,
                        segment_id = %segment.id,
                        error = %e,
                        "reindex aborted mid-migration, dataset left in reindexing state"
                    );
                    self.store
                        .mark_segment_failed(&segment.id, &e.to_string())
                        .await?;
                    return Err(EngineError::Backend(e));
                }
            }
        }

        if !self
            .store
            .publish_collection(dataset_id, &new_collection)
            .await?
        {
            return Err(EngineError::Backend(anyhow::anyhow!(
                "reindex publish refused: dataset {} no longer holds the sentinel",
                dataset_id
            )));
        }
        tracing::info!(dataset_id, collection = %new_collection, segments = snapshot.len(), "reindex published");
        Ok(())
    }
}
