use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub vector: VectorBackendConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

/// Vector backend selection, decided at configuration-load time.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum VectorBackendConfig {
    Memory,
    #[cfg(feature = "qdrant")]
    Qdrant { url: String },
}

impl Default for VectorBackendConfig {
    fn default() -> Self {
        VectorBackendConfig::Memory
    }
}

/// Client settings shared by the remote embedding/rerank providers.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    5
}

/// Where a provider's model runs.
///
/// Locally hosted providers are resource-heavy and safe to keep warm, so the
/// provider cache holds on to them; remotely hosted ones are cheap to rebuild
/// and may rotate credentials, so they are constructed per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hosting {
    Local,
    Remote,
}

/// Token counting strategy bound to an embedding supplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    /// Exact BPE count via cl100k_base.
    Cl100k,
    /// chars / 4, rounded up.
    CharHeuristic,
    /// Whitespace word count; the generic fallback.
    Whitespace,
}

/// Supplier-level provider settings. Model-level overrides are merged on
/// top, model winning on conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub supplier: String,
    pub model: String,
    pub dims: usize,
    pub hosting: Hosting,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub tokenizer: TokenizerKind,
    /// Input price per 1,000 tokens, in `currency`.
    pub input_price_per_1k: f64,
    pub currency: String,
}

/// Model-level overrides; every field optional, present fields win.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderOverrides {
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub hosting: Option<Hosting>,
    pub api_base: Option<String>,
    pub api_key: Option<String>,
    pub tokenizer: Option<TokenizerKind>,
    pub input_price_per_1k: Option<f64>,
    pub currency: Option<String>,
}

/// Persisted embedding configuration, keyed by id and referenced from
/// dataset rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub id: String,
    pub supplier: ProviderSettings,
    #[serde(default)]
    pub overrides: ProviderOverrides,
}

impl EmbeddingConfig {
    /// Merge supplier-level settings with model-level overrides.
    pub fn resolve(&self) -> ProviderSettings {
        merge(&self.supplier, &self.overrides)
    }
}

/// Persisted reranker configuration, keyed by tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankConfig {
    pub tenant_id: String,
    pub supplier: ProviderSettings,
    #[serde(default)]
    pub overrides: ProviderOverrides,
}

impl RerankConfig {
    pub fn resolve(&self) -> ProviderSettings {
        merge(&self.supplier, &self.overrides)
    }
}

fn merge(supplier: &ProviderSettings, overrides: &ProviderOverrides) -> ProviderSettings {
    ProviderSettings {
        supplier: supplier.supplier.clone(),
        model: overrides.model.clone().unwrap_or_else(|| supplier.model.clone()),
        dims: overrides.dims.unwrap_or(supplier.dims),
        hosting: overrides.hosting.unwrap_or(supplier.hosting),
        api_base: overrides.api_base.clone().or_else(|| supplier.api_base.clone()),
        api_key: overrides.api_key.clone().or_else(|| supplier.api_key.clone()),
        tokenizer: overrides.tokenizer.unwrap_or(supplier.tokenizer),
        input_price_per_1k: overrides
            .input_price_per_1k
            .unwrap_or(supplier.input_price_per_1k),
        currency: overrides.currency.clone().unwrap_or_else(|| supplier.currency.clone()),
    }
}

pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: EngineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplier() -> ProviderSettings {
        ProviderSettings {
            supplier: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
            hosting: Hosting::Remote,
            api_base: Some("https://api.openai.com/v1".to_string()),
            api_key: Some("sk-supplier".to_string()),
            tokenizer: TokenizerKind::Cl100k,
            input_price_per_1k: 0.00002,
            currency: "USD".to_string(),
        }
    }

    #[test]
    fn test_resolve_without_overrides_keeps_supplier() {
        let config = EmbeddingConfig {
            id: "cfg".to_string(),
            supplier: supplier(),
            overrides: ProviderOverrides::default(),
        };
        let resolved = config.resolve();
        assert_eq!(resolved.model, "text-embedding-3-small");
        assert_eq!(resolved.dims, 1536);
        assert_eq!(resolved.hosting, Hosting::Remote);
    }

    #[test]
    fn test_model_level_overrides_win() {
        let config = EmbeddingConfig {
            id: "cfg".to_string(),
            supplier: supplier(),
            overrides: ProviderOverrides {
                model: Some("text-embedding-3-large".to_string()),
                dims: Some(3072),
                api_key: Some("sk-model".to_string()),
                ..Default::default()
            },
        };
        let resolved = config.resolve();
        assert_eq!(resolved.model, "text-embedding-3-large");
        assert_eq!(resolved.dims, 3072);
        assert_eq!(resolved.api_key.as_deref(), Some("sk-model"));
        // Untouched fields fall through to the supplier.
        assert_eq!(resolved.api_base.as_deref(), Some("https://api.openai.com/v1"));
        assert_eq!(resolved.currency, "USD");
    }

    #[test]
    fn test_engine_config_defaults() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert!(matches!(config.vector, VectorBackendConfig::Memory));
        assert_eq!(config.http.timeout_secs, 30);
        assert_eq!(config.http.max_retries, 5);
    }
}
