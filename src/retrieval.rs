//! Retrieval engine.
//!
//! Executes similarity queries against one or many datasets, optionally
//! reranks, updates hit counters, and writes an audit record with full score
//! provenance and token accounting.
//!
//! Every call opens exactly one [`RetrievalRecord`] and always closes it —
//! success or failure — charging whatever tokens were consumed before a
//! failure. Hit counters and detail rows are append/increment-only and are
//! never rolled back.

use std::time::Instant;

use uuid::Uuid;

use crate::engine::{now_ts, Engine};
use crate::error::{EngineError, Result};
use crate::models::{
    Dataset, RetrievalDetail, RetrievalKind, RetrievalRecord, RetrievalStatus, RowStatus, Segment,
};

/// One returned segment with its score provenance.
#[derive(Debug, Clone)]
pub struct RetrievedSegment {
    pub segment: Segment,
    pub score: f32,
    pub reranking_score: Option<f32>,
}

/// Result of a retrieval call, with the audit record that captured it.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub record_id: String,
    pub segments: Vec<RetrievedSegment>,
    pub embedding_tokens: u64,
    pub reranking_tokens: u64,
}

impl Engine {
    /// Retrieve from a single dataset using its configured retriever.
    pub async fn single_retrieve(
        &self,
        dataset_id: &str,
        query: &str,
        kind: RetrievalKind,
        document_filter: Option<Vec<String>>,
    ) -> Result<RetrievalOutcome> {
        let record_id = self
            .open_record(&[dataset_id.to_string()], query, kind)
            .await?;
        let started = Instant::now();
        let mut embedding_tokens = 0u64;
        let mut reranking_tokens = 0u64;

        let result = self
            .single_retrieve_inner(
                dataset_id,
                query,
                document_filter,
                &mut embedding_tokens,
                &mut reranking_tokens,
            )
            .await;

        self.close_record(
            &record_id,
            &result,
            started.elapsed().as_secs_f64(),
            embedding_tokens,
            reranking_tokens,
        )
        .await;

        result.map(|segments| RetrievalOutcome {
            record_id,
            segments,
            embedding_tokens,
            reranking_tokens,
        })
    }

    /// Retrieve from several datasets at once. Embedding search runs per
    /// dataset with that dataset's retriever config; reranking, when
    /// requested, is applied once across the pooled results.
    pub async fn multiple_retrieve(
        &self,
        dataset_ids: &[String],
        query: &str,
        kind: RetrievalKind,
        rerank: bool,
    ) -> Result<RetrievalOutcome> {
        let record_id = self.open_record(dataset_ids, query, kind).await?;
        let started = Instant::now();
        let mut embedding_tokens = 0u64;
        let mut reranking_tokens = 0u64;

        let result = self
            .multiple_retrieve_inner(
                dataset_ids,
                query,
                rerank,
                &mut embedding_tokens,
                &mut reranking_tokens,
            )
            .await;

        self.close_record(
            &record_id,
            &result,
            started.elapsed().as_secs_f64(),
            embedding_tokens,
            reranking_tokens,
        )
        .await;

        result.map(|segments| RetrievalOutcome {
            record_id,
            segments,
            embedding_tokens,
            reranking_tokens,
        })
    }

    async fn single_retrieve_inner(
        &self,
        dataset_id: &str,
        query: &str,
        document_filter: Option<Vec<String>>,
        embedding_tokens: &mut u64,
        reranking_tokens: &mut u64,
    ) -> Result<Vec<RetrievedSegment>> {
        if query.trim().is_empty() {
            return Err(EngineError::Validation("query must not be empty".into()));
        }

        let (dataset, collection) = self.require_ready_dataset(dataset_id).await?;
        let mut results = self
            .search_dataset(
                &dataset,
                &collection,
                query,
                document_filter.as_deref(),
                embedding_tokens,
            )
            .await?;

        if dataset.retriever.rerank {
            self.rerank_results(&dataset.tenant_id, query, &mut results, reranking_tokens)
                .await?;
        }
        sort_by_relevance(&mut results);

        self.increment_hits(&results).await?;
        Ok(results)
    }

    async fn multiple_retrieve_inner(
        &self,
        dataset_ids: &[String],
        query: &str,
        rerank: bool,
        embedding_tokens: &mut u64,
        reranking_tokens: &mut u64,
    ) -> Result<Vec<RetrievedSegment>> {
        if query.trim().is_empty() {
            return Err(EngineError::Validation("query must not be empty".into()));
        }
        if dataset_ids.is_empty() {
            return Err(EngineError::Validation(
                "at least one dataset is required".into(),
            ));
        }

        let mut pooled = Vec::new();
        let mut tenant_id = None;
        for dataset_id in dataset_ids {
            let (dataset, collection) = self.require_ready_dataset(dataset_id).await?;
            tenant_id.get_or_insert_with(|| dataset.tenant_id.clone());
            let results = self
                .search_dataset(&dataset, &collection, query, None, embedding_tokens)
                .await?;
            pooled.extend(results);
        }

        if rerank {
            if let Some(tenant_id) = &tenant_id {
                self.rerank_results(tenant_id, query, &mut pooled, reranking_tokens)
                    .await?;
            }
        }
        sort_by_relevance(&mut pooled);

        self.increment_hits(&pooled).await?;
        Ok(pooled)
    }

    /// Similarity search against one dataset, resolving hits back to
    /// eligible segment rows. A hit only survives if its segment is still
    /// enabled+indexed and its parent document is enabled.
    async fn search_dataset(
        &self,
        dataset: &Dataset,
        collection: &str,
        query: &str,
        document_filter: Option<&[String]>,
        embedding_tokens: &mut u64,
    ) -> Result<Vec<RetrievedSegment>> {
        let vector_store = self
            .open_collection(collection, &dataset.embedding_config_id)
            .await?;
        let hits = vector_store
            .similarity_search(
                query,
                dataset.retriever.top_k,
                dataset.retriever.score_threshold,
                document_filter,
            )
            .await
            .map_err(EngineError::Backend)?;
        *embedding_tokens += vector_store.take_consumed_tokens();

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let segment = match self.store.get_segment(&hit.metadata.segment_id).await? {
                Some(s) if s.status == RowStatus::Enabled && s.is_indexed() => s,
                _ => continue,
            };
            match self.store.get_document(&segment.document_id).await? {
                Some(d) if d.status == RowStatus::Enabled => {}
                _ => continue,
            }
            results.push(RetrievedSegment {
                segment,
                score: hit.score,
                reranking_score: None,
            });
        }
        Ok(results)
    }

    async fn rerank_results(
        &self,
        tenant_id: &str,
        query: &str,
        results: &mut [RetrievedSegment],
        reranking_tokens: &mut u64,
    ) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }
        let reranker = self.providers.get_reranker(tenant_id).await?;
        let documents: Vec<String> = results.iter().map(|r| r.segment.content.clone()).collect();
        let batch = reranker
            .rerank(query, &documents)
            .await
            .map_err(EngineError::Backend)?;
        *reranking_tokens += batch.tokens;
        for (result, score) in results.iter_mut().zip(batch.scores) {
            result.reranking_score = Some(score);
        }
        Ok(())
    }

    /// Increment-only; committed as it happens and never rolled back, even
    /// when the retrieval later fails.
    async fn increment_hits(&self, results: &[RetrievedSegment]) -> Result<()> {
        for result in results {
            self.store.increment_hit_count(&result.segment.id).await?;
        }
        Ok(())
    }

    async fn open_record(
        &self,
        dataset_ids: &[String],
        query: &str,
        kind: RetrievalKind,
    ) -> Result<String> {
        let record = RetrievalRecord {
            id: Uuid::new_v4().to_string(),
            dataset_ids: dataset_ids.to_vec(),
            query: query.to_string(),
            kind,
            status: RetrievalStatus::Running,
            elapsed_secs: 0.0,
            embedding_tokens: 0,
            reranking_tokens: 0,
            error: None,
            created_at: now_ts(),
        };
        self.store.insert_retrieval_record(&record).await?;
        Ok(record.id)
    }

    async fn close_record(
        &self,
        record_id: &str,
        result: &Result<Vec<RetrievedSegment>>,
        elapsed_secs: f64,
        embedding_tokens: u64,
        reranking_tokens: u64,
    ) {
        let (status, error) = match result {
            Ok(_) => (RetrievalStatus::Success, None),
            Err(e) => (RetrievalStatus::Failed, Some(e.to_string())),
        };
        if let Ok(segments) = result {
            if let Err(e) = self.append_details(record_id, segments).await {
                tracing::error!(record_id, error = %e, "failed to append retrieval details");
            }
        }
        if let Err(e) = self
            .store
            .close_retrieval_record(
                record_id,
                status,
                error.as_deref(),
                elapsed_secs,
                embedding_tokens,
                reranking_tokens,
            )
            .await
        {
            tracing::error!(record_id, error = %e, "failed to close retrieval record");
        }
    }

    async fn append_details(
        &self,
        record_id: &str,
        segments: &[RetrievedSegment],
    ) -> anyhow::Result<()> {
        let details: Vec<RetrievalDetail> = segments
            .iter()
            .map(|r| RetrievalDetail {
                id: Uuid::new_v4().to_string(),
                record_id: record_id.to_string(),
                dataset_id: r.segment.dataset_id.clone(),
                document_id: r.segment.document_id.clone(),
                segment_id: r.segment.id.clone(),
                score: r.score,
                reranking_score: r.reranking_score,
            })
            .collect();
        self.store.insert_retrieval_details(&details).await
    }
}

/// Rerank score dominates the sort; raw similarity is the tiebreak.
fn sort_by_relevance(results: &mut [RetrievedSegment]) {
    results.sort_by(|a, b| {
        let rerank_a = a.reranking_score.unwrap_or(f32::NEG_INFINITY);
        let rerank_b = b.reranking_score.unwrap_or(f32::NEG_INFINITY);
        rerank_b
            .partial_cmp(&rerank_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndexingStatus;

    fn result(id: &str, score: f32, reranking_score: Option<f32>) -> RetrievedSegment {
        RetrievedSegment {
            segment: Segment {
                id: id.to_string(),
                document_id: "doc".to_string(),
                dataset_id: "ds".to_string(),
                position: 0,
                content: String::new(),
                content_hash: String::new(),
                word_count: 0,
                token_count: 0,
                index_id: Some("idx".to_string()),
                indexing_status: IndexingStatus::Indexed,
                status: RowStatus::Enabled,
                hit_count: 0,
                error: None,
                completed_at: None,
                created_at: 0,
            },
            score,
            reranking_score,
        }
    }

    #[test]
    fn test_rerank_score_dominates() {
        let mut results = vec![
            result("a", 0.9, Some(0.2)),
            result("b", 0.5, Some(0.8)),
        ];
        sort_by_relevance(&mut results);
        assert_eq!(results[0].segment.id, "b");
        assert_eq!(results[1].segment.id, "a");
    }

    #[test]
    fn test_similarity_breaks_rerank_ties() {
        let mut results = vec![
            result("low", 0.3, Some(0.7)),
            result("high", 0.9, Some(0.7)),
        ];
        sort_by_relevance(&mut results);
        assert_eq!(results[0].segment.id, "high");
    }

    #[test]
    fn test_without_rerank_sorts_by_similarity() {
        let mut results = vec![
            result("b", 0.5, None),
            result("a", 0.9, None),
            result("c", 0.1, None),
        ];
        sort_by_relevance(&mut results);
        let order: Vec<&str> = results.iter().map(|r| r.segment.id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
