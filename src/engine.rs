//! Engine wiring.
//!
//! [`Engine`] owns the injected collaborators — metadata store, vector
//! backend, provider cache, embedding cache, splitter — and exposes the
//! operation surface. The operation groups live in their own modules
//! (`ingest`, `lifecycle`, `reindex`, `retrieval`, `accounting`) as
//! additional `impl Engine` blocks.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::embed_cache::{CachedEmbedder, EmbeddingCache};
use crate::error::{EngineError, Result};
use crate::ingest::DocumentSplitter;
use crate::models::{CollectionRef, Dataset, RetrieverConfig, RowStatus};
use crate::provider::cache::ProviderCache;
use crate::store::MetadataStore;
use crate::vector::{VectorBackend, VectorStore};

pub struct Engine {
    pub(crate) store: Arc<dyn MetadataStore>,
    pub(crate) backend: VectorBackend,
    pub(crate) providers: ProviderCache,
    pub(crate) embed_cache: Arc<EmbeddingCache>,
    pub(crate) splitter: Arc<dyn DocumentSplitter>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn MetadataStore>,
        splitter: Arc<dyn DocumentSplitter>,
    ) -> Self {
        let backend = VectorBackend::from_config(&config.vector);
        Self::with_backend(config, store, splitter, backend)
    }

    /// Build an engine around an already-constructed vector backend.
    pub fn with_backend(
        config: EngineConfig,
        store: Arc<dyn MetadataStore>,
        splitter: Arc<dyn DocumentSplitter>,
        backend: VectorBackend,
    ) -> Self {
        let providers = ProviderCache::new(store.clone(), config.http.clone());
        Self {
            store,
            backend,
            providers,
            embed_cache: Arc::new(EmbeddingCache::new()),
            splitter,
        }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn providers(&self) -> &ProviderCache {
        &self.providers
    }

    pub fn embedding_cache(&self) -> &Arc<EmbeddingCache> {
        &self.embed_cache
    }

    /// Create a dataset bound to a fresh collection.
    pub async fn create_dataset(
        &self,
        tenant_id: &str,
        name: &str,
        embedding_config_id: &str,
        retriever: RetrieverConfig,
    ) -> Result<Dataset> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("dataset name must not be empty".into()));
        }
        if retriever.top_k == 0 {
            return Err(EngineError::Validation("retriever top_k must be positive".into()));
        }

        let dataset = Dataset {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            collection_ref: CollectionRef::Ready(new_collection_ref()),
            embedding_config_id: embedding_config_id.to_string(),
            retriever,
            status: RowStatus::Enabled,
            created_at: now_ts(),
        };
        self.store.insert_dataset(&dataset).await?;
        tracing::info!(dataset_id = %dataset.id, collection = %dataset.collection_ref.as_str(), "dataset created");
        Ok(dataset)
    }

    /// Load a dataset or fail with `DatasetNotFound`. Soft-deleted datasets
    /// count as absent.
    pub(crate) async fn require_dataset(&self, dataset_id: &str) -> Result<Dataset> {
        let dataset = self
            .store
            .get_dataset(dataset_id)
            .await?
            .ok_or_else(|| EngineError::DatasetNotFound(dataset_id.to_string()))?;
        if dataset.status == RowStatus::Deleted {
            return Err(EngineError::DatasetNotFound(dataset_id.to_string()));
        }
        Ok(dataset)
    }

    /// Load a dataset and refuse it while the reindexing sentinel is held.
    pub(crate) async fn require_ready_dataset(&self, dataset_id: &str) -> Result<(Dataset, String)> {
        let dataset = self.require_dataset(dataset_id).await?;
        match &dataset.collection_ref {
            CollectionRef::Ready(collection) => {
                let collection = collection.clone();
                Ok((dataset, collection))
            }
            CollectionRef::Reindexing => Err(EngineError::Busy(dataset_id.to_string())),
        }
    }

    /// Open a vector store on a collection, embedding through the dataset's
    /// configured provider and the shared de-duplication cache.
    pub(crate) async fn open_collection(
        &self,
        collection: &str,
        embedding_config_id: &str,
    ) -> Result<Arc<dyn VectorStore>> {
        let embedder = self.providers.get_embedder(embedding_config_id).await?;
        let cached = Arc::new(CachedEmbedder::new(embedder, self.embed_cache.clone()));
        Ok(self.backend.open(collection, cached).await?)
    }
}

pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

pub(crate) fn new_collection_ref() -> String {
    format!("col_{}", Uuid::new_v4().simple())
}
