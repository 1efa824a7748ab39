//! In-memory [`MetadataStore`] implementation for tests.
//!
//! All state lives behind a single `RwLock`, which makes the conditional
//! updates (`begin_reindex`, `publish_collection`) trivially atomic.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::chunk::ProcessRule;
use crate::config::{EmbeddingConfig, RerankConfig};
use crate::models::{
    CollectionRef, Dataset, Document, IndexingStatus, RetrievalDetail, RetrievalRecord,
    RetrievalStatus, RowStatus, Segment,
};

use super::MetadataStore;

#[derive(Default)]
struct State {
    datasets: HashMap<String, Dataset>,
    documents: HashMap<String, Document>,
    segments: HashMap<String, Segment>,
    records: HashMap<String, RetrievalRecord>,
    details: Vec<RetrievalDetail>,
    embedding_configs: HashMap<String, EmbeddingConfig>,
    rerank_configs: HashMap<String, RerankConfig>,
    process_rules: HashMap<String, ProcessRule>,
    active_configs: HashMap<String, String>,
}

#[derive(Default)]
pub struct InMemoryMetadataStore {
    state: RwLock<State>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert_dataset(&self, dataset: &Dataset) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.datasets.insert(dataset.id.clone(), dataset.clone());
        Ok(())
    }

    async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>> {
        Ok(self.state.read().unwrap().datasets.get(id).cloned())
    }

    async fn begin_reindex(&self, dataset_id: &str, embedding_config_id: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.datasets.get_mut(dataset_id) {
            Some(dataset) if !dataset.collection_ref.is_reindexing() => {
                dataset.collection_ref = CollectionRef::Reindexing;
                dataset.embedding_config_id = embedding_config_id.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn publish_collection(&self, dataset_id: &str, collection_ref: &str) -> Result<bool> {
        let mut state = self.state.write().unwrap();
        match state.datasets.get_mut(dataset_id) {
            Some(dataset) if dataset.collection_ref.is_reindexing() => {
                dataset.collection_ref = CollectionRef::Ready(collection_ref.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_dataset_status(&self, dataset_id: &str, status: RowStatus) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(dataset) = state.datasets.get_mut(dataset_id) {
            dataset.status = status;
        }
        Ok(())
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.state.read().unwrap().documents.get(id).cloned())
    }

    async fn documents_by_dataset(&self, dataset_id: &str) -> Result<Vec<Document>> {
        let state = self.state.read().unwrap();
        let mut documents: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.dataset_id == dataset_id && d.status != RowStatus::Deleted)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(documents)
    }

    async fn set_document_status(&self, id: &str, status: RowStatus) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(document) = state.documents.get_mut(id) {
            document.status = status;
        }
        Ok(())
    }

    async fn set_document_stats(
        &self,
        id: &str,
        word_count: u64,
        token_count: u64,
        indexing_latency_secs: f64,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(document) = state.documents.get_mut(id) {
            document.word_count = word_count;
            document.token_count = token_count;
            document.indexing_latency_secs = indexing_latency_secs;
        }
        Ok(())
    }

    async fn insert_segment(&self, segment: &Segment) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.segments.insert(segment.id.clone(), segment.clone());
        Ok(())
    }

    async fn get_segment(&self, id: &str) -> Result<Option<Segment>> {
        Ok(self.state.read().unwrap().segments.get(id).cloned())
    }

    async fn segments_by_document(&self, document_id: &str) -> Result<Vec<Segment>> {
        let state = self.state.read().unwrap();
        let mut segments: Vec<Segment> = state
            .segments
            .values()
            .filter(|s| s.document_id == document_id && s.status != RowStatus::Deleted)
            .cloned()
            .collect();
        segments.sort_by_key(|s| s.position);
        Ok(segments)
    }

    async fn segments_by_dataset(&self, dataset_id: &str) -> Result<Vec<Segment>> {
        let state = self.state.read().unwrap();
        let mut segments: Vec<Segment> = state
            .segments
            .values()
            .filter(|s| s.dataset_id == dataset_id && s.status != RowStatus::Deleted)
            .cloned()
            .collect();
        segments.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then(a.position.cmp(&b.position))
        });
        Ok(segments)
    }

    async fn set_segment_status(&self, id: &str, status: RowStatus) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(segment) = state.segments.get_mut(id) {
            segment.status = status;
        }
        Ok(())
    }

    async fn mark_segment_indexing(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(segment) = state.segments.get_mut(id) {
            segment.indexing_status = IndexingStatus::Indexing;
            segment.error = None;
        }
        Ok(())
    }

    async fn mark_segment_indexed(
        &self,
        id: &str,
        index_id: &str,
        token_count: u64,
        completed_at: i64,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(segment) = state.segments.get_mut(id) {
            segment.indexing_status = IndexingStatus::Indexed;
            segment.index_id = Some(index_id.to_string());
            segment.token_count = token_count;
            segment.completed_at = Some(completed_at);
            segment.error = None;
        }
        Ok(())
    }

    async fn mark_segment_failed(&self, id: &str, error: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(segment) = state.segments.get_mut(id) {
            segment.indexing_status = IndexingStatus::Failed;
            segment.error = Some(error.to_string());
        }
        Ok(())
    }

    async fn reset_segment_index(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(segment) = state.segments.get_mut(id) {
            segment.indexing_status = IndexingStatus::NotIndexed;
            segment.index_id = None;
            segment.token_count = 0;
            segment.completed_at = None;
        }
        Ok(())
    }

    async fn increment_hit_count(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(segment) = state.segments.get_mut(id) {
            segment.hit_count += 1;
        }
        Ok(())
    }

    async fn soft_delete_document_segments(&self, document_id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        for segment in state.segments.values_mut() {
            if segment.document_id == document_id && segment.status != RowStatus::Deleted {
                segment.status = RowStatus::Deleted;
            }
        }
        Ok(())
    }

    async fn soft_delete_dataset_rows(&self, dataset_id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        for document in state.documents.values_mut() {
            if document.dataset_id == dataset_id && document.status != RowStatus::Deleted {
                document.status = RowStatus::Deleted;
            }
        }
        for segment in state.segments.values_mut() {
            if segment.dataset_id == dataset_id && segment.status != RowStatus::Deleted {
                segment.status = RowStatus::Deleted;
            }
        }
        Ok(())
    }

    async fn insert_retrieval_record(&self, record: &RetrievalRecord) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn close_retrieval_record(
        &self,
        id: &str,
        status: RetrievalStatus,
        error: Option<&str>,
        elapsed_secs: f64,
        embedding_tokens: u64,
        reranking_tokens: u64,
    ) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if let Some(record) = state.records.get_mut(id) {
            record.status = status;
            record.error = error.map(|e| e.to_string());
            record.elapsed_secs = elapsed_secs;
            record.embedding_tokens = embedding_tokens;
            record.reranking_tokens = reranking_tokens;
        }
        Ok(())
    }

    async fn get_retrieval_record(&self, id: &str) -> Result<Option<RetrievalRecord>> {
        Ok(self.state.read().unwrap().records.get(id).cloned())
    }

    async fn retrieval_records_by_dataset(
        &self,
        dataset_id: &str,
    ) -> Result<Vec<RetrievalRecord>> {
        let state = self.state.read().unwrap();
        let mut records: Vec<RetrievalRecord> = state
            .records
            .values()
            .filter(|r| r.dataset_ids.iter().any(|id| id == dataset_id))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    async fn insert_retrieval_details(&self, details: &[RetrievalDetail]) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.details.extend_from_slice(details);
        Ok(())
    }

    async fn retrieval_details_by_record(&self, record_id: &str) -> Result<Vec<RetrievalDetail>> {
        let state = self.state.read().unwrap();
        Ok(state
            .details
            .iter()
            .filter(|d| d.record_id == record_id)
            .cloned()
            .collect())
    }

    async fn insert_embedding_config(&self, config: &EmbeddingConfig) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.embedding_configs.insert(config.id.clone(), config.clone());
        Ok(())
    }

    async fn get_embedding_config(&self, id: &str) -> Result<Option<EmbeddingConfig>> {
        Ok(self.state.read().unwrap().embedding_configs.get(id).cloned())
    }

    async fn insert_rerank_config(&self, config: &RerankConfig) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state
            .rerank_configs
            .insert(config.tenant_id.clone(), config.clone());
        Ok(())
    }

    async fn get_rerank_config(&self, tenant_id: &str) -> Result<Option<RerankConfig>> {
        Ok(self.state.read().unwrap().rerank_configs.get(tenant_id).cloned())
    }

    async fn insert_process_rule(&self, rule: &ProcessRule) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state.process_rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    async fn get_process_rule(&self, id: &str) -> Result<Option<ProcessRule>> {
        Ok(self.state.read().unwrap().process_rules.get(id).cloned())
    }

    async fn set_active_embedding_config(&self, tenant_id: &str, config_id: &str) -> Result<()> {
        let mut state = self.state.write().unwrap();
        state
            .active_configs
            .insert(tenant_id.to_string(), config_id.to_string());
        Ok(())
    }

    async fn get_active_embedding_config(&self, tenant_id: &str) -> Result<Option<String>> {
        Ok(self.state.read().unwrap().active_configs.get(tenant_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(id: &str) -> Dataset {
        Dataset {
            id: id.to_string(),
            tenant_id: "tenant".to_string(),
            name: "test".to_string(),
            collection_ref: CollectionRef::Ready("col_1".to_string()),
            embedding_config_id: "cfg".to_string(),
            retriever: Default::default(),
            status: RowStatus::Enabled,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_begin_reindex_is_exclusive() {
        let store = InMemoryMetadataStore::new();
        store.insert_dataset(&dataset("ds")).await.unwrap();

        assert!(store.begin_reindex("ds", "cfg2").await.unwrap());
        // Second acquisition fails while the sentinel is held.
        assert!(!store.begin_reindex("ds", "cfg3").await.unwrap());

        let loaded = store.get_dataset("ds").await.unwrap().unwrap();
        assert!(loaded.collection_ref.is_reindexing());
        assert_eq!(loaded.embedding_config_id, "cfg2");
    }

    #[tokio::test]
    async fn test_publish_requires_sentinel() {
        let store = InMemoryMetadataStore::new();
        store.insert_dataset(&dataset("ds")).await.unwrap();

        assert!(!store.publish_collection("ds", "col_2").await.unwrap());

        store.begin_reindex("ds", "cfg2").await.unwrap();
        assert!(store.publish_collection("ds", "col_2").await.unwrap());

        let loaded = store.get_dataset("ds").await.unwrap().unwrap();
        assert_eq!(loaded.collection_ref, CollectionRef::Ready("col_2".to_string()));
    }

    #[tokio::test]
    async fn test_begin_reindex_missing_dataset() {
        let store = InMemoryMetadataStore::new();
        assert!(!store.begin_reindex("nope", "cfg").await.unwrap());
    }
}
