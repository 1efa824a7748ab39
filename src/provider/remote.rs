//! Remote HTTP providers.
//!
//! Both providers speak the OpenAI-compatible wire shapes (`/embeddings`,
//! `/rerank`) and share the same retry strategy for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::accounting::count_tokens;
use crate::config::{HttpConfig, ProviderSettings, TokenizerKind};

use super::{Embedder, EmbeddingBatch, Reranker, RerankBatch};

/// Embedding provider calling an OpenAI-compatible `/embeddings` endpoint.
pub struct RemoteEmbedder {
    settings: ProviderSettings,
    http: HttpConfig,
}

impl RemoteEmbedder {
    pub fn new(settings: ProviderSettings, http: HttpConfig) -> Result<Self> {
        if settings.api_base.is_none() {
            bail!(
                "api_base required for remote embedding supplier '{}'",
                settings.supplier
            );
        }
        Ok(Self { settings, http })
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    fn dims(&self) -> usize {
        self.settings.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch> {
        if texts.is_empty() {
            return Ok(EmbeddingBatch {
                vectors: Vec::new(),
                tokens: 0,
            });
        }

        let api_base = self.settings.api_base.as_deref().unwrap_or_default();
        let url = format!("{}/embeddings", api_base.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.settings.model,
            "input": texts,
        });

        let json = post_with_backoff(&url, self.settings.api_key.as_deref(), &body, &self.http)
            .await?;
        let vectors = parse_embedding_response(&json, texts.len())?;
        let tokens = parse_usage_tokens(&json)
            .unwrap_or_else(|| texts.iter().map(|t| count_tokens(TokenizerKind::CharHeuristic, t)).sum());

        Ok(EmbeddingBatch { vectors, tokens })
    }
}

/// Reranker calling a `/rerank` endpoint (Cohere/Jina wire shape).
pub struct RemoteReranker {
    settings: ProviderSettings,
    http: HttpConfig,
}

impl RemoteReranker {
    pub fn new(settings: ProviderSettings, http: HttpConfig) -> Result<Self> {
        if settings.api_base.is_none() {
            bail!(
                "api_base required for remote rerank supplier '{}'",
                settings.supplier
            );
        }
        Ok(Self { settings, http })
    }
}

#[async_trait]
impl Reranker for RemoteReranker {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn rerank(&self, query: &str, documents: &[String]) -> Result<RerankBatch> {
        if documents.is_empty() {
            return Ok(RerankBatch {
                scores: Vec::new(),
                tokens: 0,
            });
        }

        let api_base = self.settings.api_base.as_deref().unwrap_or_default();
        let url = format!("{}/rerank", api_base.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.settings.model,
            "query": query,
            "documents": documents,
        });

        let json = post_with_backoff(&url, self.settings.api_key.as_deref(), &body, &self.http)
            .await?;
        let scores = parse_rerank_response(&json, documents.len())?;
        let tokens = parse_usage_tokens(&json).unwrap_or_else(|| {
            documents
                .iter()
                .map(|d| count_tokens(TokenizerKind::CharHeuristic, d))
                .sum::<u64>()
                + count_tokens(TokenizerKind::CharHeuristic, query)
        });

        Ok(RerankBatch { scores, tokens })
    }
}

async fn post_with_backoff(
    url: &str,
    api_key: Option<&str>,
    body: &serde_json::Value,
    http: &HttpConfig,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(http.timeout_secs))
        .build()?;

    let mut last_err = None;

    for attempt in 0..=http.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow!("provider error {}: {}", status, body_text));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("provider error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("provider call failed after retries")))
}

fn parse_embedding_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("invalid embedding response: missing data array"))?;

    if data.len() != expected {
        bail!(
            "invalid embedding response: {} vectors for {} inputs",
            data.len(),
            expected
        );
    }

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid embedding response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        vectors.push(vec);
    }

    Ok(vectors)
}

fn parse_rerank_response(json: &serde_json::Value, expected: usize) -> Result<Vec<f32>> {
    let results = json
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| anyhow!("invalid rerank response: missing results array"))?;

    // Responses come back sorted by relevance; realign to input order.
    let mut scores = vec![0.0f32; expected];
    for item in results {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .ok_or_else(|| anyhow!("invalid rerank response: missing index"))? as usize;
        if index >= expected {
            bail!("invalid rerank response: index {} out of range", index);
        }
        let score = item
            .get("relevance_score")
            .and_then(|s| s.as_f64())
            .ok_or_else(|| anyhow!("invalid rerank response: missing relevance_score"))?;
        scores[index] = score as f32;
    }

    Ok(scores)
}

fn parse_usage_tokens(json: &serde_json::Value) -> Option<u64> {
    json.get("usage")
        .and_then(|u| u.get("total_tokens"))
        .and_then(|t| t.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding_response() {
        let json = serde_json::json!({
            "data": [
                { "embedding": [0.1, 0.2], "index": 0 },
                { "embedding": [0.3, 0.4], "index": 1 },
            ],
            "usage": { "total_tokens": 12 }
        });
        let vectors = parse_embedding_response(&json, 2).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), 2);
        assert_eq!(parse_usage_tokens(&json), Some(12));
    }

    #[test]
    fn test_parse_embedding_response_count_mismatch() {
        let json = serde_json::json!({ "data": [ { "embedding": [0.1] } ] });
        assert!(parse_embedding_response(&json, 2).is_err());
    }

    #[test]
    fn test_parse_rerank_realigns_to_input_order() {
        // Provider returns results sorted by relevance, not input order.
        let json = serde_json::json!({
            "results": [
                { "index": 1, "relevance_score": 0.8 },
                { "index": 0, "relevance_score": 0.2 },
            ]
        });
        let scores = parse_rerank_response(&json, 2).unwrap();
        assert!((scores[0] - 0.2).abs() < 1e-6);
        assert!((scores[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_parse_rerank_rejects_out_of_range_index() {
        let json = serde_json::json!({
            "results": [ { "index": 5, "relevance_score": 0.9 } ]
        });
        assert!(parse_rerank_response(&json, 2).is_err());
    }
}
