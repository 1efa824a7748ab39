//! Process-wide provider cache.
//!
//! Resolves persisted provider configuration (supplier-level settings merged
//! with model-level overrides) into live [`Embedder`]/[`Reranker`] handles.
//! Only locally hosted providers are cached — they are resource-heavy and
//! safe to keep warm. Remotely hosted providers are rebuilt per call: their
//! configuration is cheap to reconstruct and may rotate credentials.
//!
//! Construction never happens under the lock. The key is checked under the
//! lock, the provider is built outside it, and the result is inserted with
//! insert-if-absent semantics; a caller racing a concurrent first use may
//! redundantly construct a provider whose instance is then discarded in
//! favor of the one already inserted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{HttpConfig, Hosting, ProviderSettings};
use crate::error::{EngineError, Result};
use crate::store::MetadataStore;

use super::remote::{RemoteEmbedder, RemoteReranker};
use super::{Embedder, Reranker};

pub struct ProviderCache {
    store: Arc<dyn MetadataStore>,
    http: HttpConfig,
    embedders: Mutex<HashMap<String, Arc<dyn Embedder>>>,
    rerankers: Mutex<HashMap<String, Arc<dyn Reranker>>>,
}

impl ProviderCache {
    pub fn new(store: Arc<dyn MetadataStore>, http: HttpConfig) -> Self {
        Self {
            store,
            http,
            embedders: Mutex::new(HashMap::new()),
            rerankers: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the embedding provider for a persisted configuration id.
    pub async fn get_embedder(&self, config_id: &str) -> Result<Arc<dyn Embedder>> {
        if let Some(embedder) = self.embedders.lock().unwrap().get(config_id) {
            return Ok(embedder.clone());
        }

        let config = self
            .store
            .get_embedding_config(config_id)
            .await?
            .ok_or_else(|| EngineError::ProviderConfigNotFound(config_id.to_string()))?;
        let settings = config.resolve();
        let embedder = build_embedder(&settings, &self.http)?;

        if settings.hosting == Hosting::Local {
            let mut cached = self.embedders.lock().unwrap();
            return Ok(cached
                .entry(config_id.to_string())
                .or_insert(embedder)
                .clone());
        }

        Ok(embedder)
    }

    /// Resolve the reranker for a tenant's persisted configuration.
    pub async fn get_reranker(&self, tenant_id: &str) -> Result<Arc<dyn Reranker>> {
        if let Some(reranker) = self.rerankers.lock().unwrap().get(tenant_id) {
            return Ok(reranker.clone());
        }

        let config = self
            .store
            .get_rerank_config(tenant_id)
            .await?
            .ok_or_else(|| EngineError::ProviderConfigNotFound(tenant_id.to_string()))?;
        let settings = config.resolve();
        let reranker = build_reranker(&settings, &self.http)?;

        if settings.hosting == Hosting::Local {
            let mut cached = self.rerankers.lock().unwrap();
            return Ok(cached
                .entry(tenant_id.to_string())
                .or_insert(reranker)
                .clone());
        }

        Ok(reranker)
    }

    /// Install a pre-built embedding provider under a configuration id.
    ///
    /// Registered providers are treated as locally owned: they stay cached
    /// for the cache's lifetime and shadow any persisted configuration.
    pub fn register_embedder(&self, config_id: &str, embedder: Arc<dyn Embedder>) {
        self.embedders
            .lock()
            .unwrap()
            .insert(config_id.to_string(), embedder);
    }

    /// Install a pre-built reranker for a tenant.
    pub fn register_reranker(&self, tenant_id: &str, reranker: Arc<dyn Reranker>) {
        self.rerankers
            .lock()
            .unwrap()
            .insert(tenant_id.to_string(), reranker);
    }
}

fn build_embedder(settings: &ProviderSettings, http: &HttpConfig) -> Result<Arc<dyn Embedder>> {
    match settings.hosting {
        Hosting::Remote => Ok(Arc::new(RemoteEmbedder::new(
            settings.clone(),
            http.clone(),
        )?)),
        #[cfg(feature = "local-embeddings")]
        Hosting::Local => Ok(Arc::new(super::local::LocalEmbedder::new(settings)?)),
        #[cfg(not(feature = "local-embeddings"))]
        Hosting::Local => Err(EngineError::Validation(format!(
            "embedding supplier '{}' is locally hosted; rebuild with the local-embeddings feature or register a custom provider",
            settings.supplier
        ))),
    }
}

fn build_reranker(settings: &ProviderSettings, http: &HttpConfig) -> Result<Arc<dyn Reranker>> {
    match settings.hosting {
        Hosting::Remote => Ok(Arc::new(RemoteReranker::new(
            settings.clone(),
            http.clone(),
        )?)),
        Hosting::Local => Err(EngineError::Validation(format!(
            "rerank supplier '{}' is locally hosted; register a custom reranker",
            settings.supplier
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, ProviderOverrides, TokenizerKind};
    use crate::provider::EmbeddingBatch;
    use crate::store::memory::InMemoryMetadataStore;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn model_name(&self) -> &str {
            "stub"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> AnyResult<EmbeddingBatch> {
            Ok(EmbeddingBatch {
                vectors: texts.iter().map(|_| vec![1.0, 0.0]).collect(),
                tokens: texts.len() as u64,
            })
        }
    }

    fn remote_settings() -> ProviderSettings {
        ProviderSettings {
            supplier: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
            hosting: Hosting::Remote,
            api_base: Some("https://api.openai.com/v1".to_string()),
            api_key: Some("sk-test".to_string()),
            tokenizer: TokenizerKind::Cl100k,
            input_price_per_1k: 0.00002,
            currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn test_registered_embedder_is_cached() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let cache = ProviderCache::new(store, HttpConfig::default());
        cache.register_embedder("cfg-local", Arc::new(StubEmbedder));

        let first = cache.get_embedder("cfg-local").await.unwrap();
        let second = cache.get_embedder("cfg-local").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_remote_embedder_not_cached() {
        let store = Arc::new(InMemoryMetadataStore::new());
        store
            .insert_embedding_config(&EmbeddingConfig {
                id: "cfg-remote".to_string(),
                supplier: remote_settings(),
                overrides: ProviderOverrides::default(),
            })
            .await
            .unwrap();
        let cache = ProviderCache::new(store, HttpConfig::default());

        let first = cache.get_embedder("cfg-remote").await.unwrap();
        let second = cache.get_embedder("cfg-remote").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_unknown_config_is_not_found() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let cache = ProviderCache::new(store, HttpConfig::default());

        let err = cache.get_embedder("missing").await.err().unwrap();
        assert!(matches!(err, EngineError::ProviderConfigNotFound(_)));
    }
}
