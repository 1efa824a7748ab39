//! Local embedding provider via fastembed.
//!
//! Models are downloaded on first use from Hugging Face and cached on disk;
//! after that, embedding runs entirely offline. Initialization is the heavy
//! step (model load into memory), which is why locally hosted providers are
//! the ones the provider cache keeps warm.

use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::accounting::count_tokens;
use crate::config::{ProviderSettings, TokenizerKind};

use super::{Embedder, EmbeddingBatch};

pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    model: Arc<Mutex<fastembed::TextEmbedding>>,
}

impl LocalEmbedder {
    pub fn new(settings: &ProviderSettings) -> Result<Self> {
        let fastembed_model = model_by_name(&settings.model)?;
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(false),
        )
        .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name: settings.model.clone(),
            dims: settings.dims,
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                tokens: 0,
            });
        }

        // fastembed doesn't report usage; estimate with the char heuristic.
        let tokens = texts
            .iter()
            .map(|t| count_tokens(TokenizerKind::CharHeuristic, t))
            .sum();

        let model = self.model.clone();
        let batch: Vec<String> = texts.to_vec();
        let vectors = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(batch, None)
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await??;

        Ok(EmbeddingBatch { vectors, tokens })
    }
}

fn model_by_name(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}
