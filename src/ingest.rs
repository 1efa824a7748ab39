//! Ingestion pipeline.
//!
//! Coordinates the full indexing flow for one document: resolve the dataset
//! (refusing mid-reindex datasets), load and split the source through the
//! pluggable splitter, persist each segment, and embed+upsert it into the
//! vector store in order. Each segment commits individually; a failure marks
//! the failing segment and abandons the rest, leaving already-indexed
//! segments standing.

use std::time::Instant;

use anyhow::{bail, Result as AnyResult};
use async_trait::async_trait;
use uuid::Uuid;

use crate::chunk::{content_hash, split_text, SplitRule};
use crate::engine::{now_ts, Engine};
use crate::error::{EngineError, Result};
use crate::models::{Document, DocumentSource, IndexingStatus, RowStatus, Segment};
use crate::vector::{SegmentMetadata, SegmentPayload};

/// Pluggable loader+splitter: turns a document source into an ordered,
/// finite sequence of segment contents. The sequence is not restartable —
/// re-ingestion re-reads the source.
#[async_trait]
pub trait DocumentSplitter: Send + Sync {
    async fn load_and_split(&self, source: &DocumentSource, rule: &SplitRule)
        -> AnyResult<Vec<String>>;
}

/// Built-in splitter for inline text sources. File uploads are resolved by
/// an external loader before they reach the engine, so this splitter
/// rejects them.
pub struct PlainTextSplitter;

#[async_trait]
impl DocumentSplitter for PlainTextSplitter {
    async fn load_and_split(
        &self,
        source: &DocumentSource,
        rule: &SplitRule,
    ) -> AnyResult<Vec<String>> {
        match source {
            DocumentSource::Inline { text, .. } => Ok(split_text(rule, text)),
            DocumentSource::UploadFile { upload_file_id } => {
                bail!("no loader for upload file {}", upload_file_id)
            }
        }
    }
}

/// Totals accumulated over one ingestion run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub word_count: u64,
    pub token_count: u64,
    pub latency_secs: f64,
}

impl Engine {
    /// Ingest one document into a dataset.
    ///
    /// Creates the document row if it does not exist yet, splits the source
    /// per the process rule, and indexes each segment in order. Returns the
    /// accumulated word/token counts and wall-clock latency, which are also
    /// persisted onto the document row.
    pub async fn add_document(
        &self,
        dataset_id: &str,
        document_id: &str,
        process_rule_id: &str,
        source: DocumentSource,
    ) -> Result<IngestReport> {
        let (dataset, collection) = self.require_ready_dataset(dataset_id).await?;

        let rule = self
            .store
            .get_process_rule(process_rule_id)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!("unknown process rule: {}", process_rule_id))
            })?;

        if self.store.get_document(document_id).await?.is_none() {
            self.store
                .insert_document(&Document {
                    id: document_id.to_string(),
                    dataset_id: dataset.id.clone(),
                    source: source.clone(),
                    status: RowStatus::Enabled,
                    archived: false,
                    word_count: 0,
                    token_count: 0,
                    indexing_latency_secs: 0.0,
                    created_at: now_ts(),
                })
                .await?;
        }

        let contents = self
            .splitter
            .load_and_split(&source, &rule.rule)
            .await
            .map_err(EngineError::Backend)?;

        let vector_store = self
            .open_collection(&collection, &dataset.embedding_config_id)
            .await?;

        let started = Instant::now();
        let existing = self.store.segments_by_document(document_id).await?;
        let mut position = existing.iter().map(|s| s.position + 1).max().unwrap_or(0);
        let mut word_count = 0u64;
        let mut token_count = 0u64;

        for content in contents {
            let segment_words = content.chars().count() as u64;
            let segment = Segment {
                id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                dataset_id: dataset.id.clone(),
                position,
                content_hash: content_hash(&content),
                content,
                word_count: segment_words,
                token_count: 0,
                index_id: None,
                indexing_status: IndexingStatus::NotIndexed,
                status: RowStatus::Enabled,
                hit_count: 0,
                error: None,
                completed_at: None,
                created_at: now_ts(),
            };
            self.store.insert_segment(&segment).await?;
            position += 1;

            let payload = SegmentPayload {
                content: segment.content.clone(),
                metadata: SegmentMetadata {
                    segment_id: segment.id.clone(),
                    document_id: document_id.to_string(),
                    dataset_id: dataset.id.clone(),
                },
            };
            match vector_store.add_texts(std::slice::from_ref(&payload)).await {
                Ok(index_ids) => {
                    let segment_tokens = vector_store.take_consumed_tokens();
                    self.store
                        .mark_segment_indexed(&segment.id, &index_ids[0], segment_tokens, now_ts())
                        .await?;
                    word_count += segment_words;
                    token_count += segment_tokens;
                }
                Err(e) => {
                    tracing::warn!(
                        segment_id = %segment.id,
                        document_id,
                        error = %e,
                        "segment indexing failed, abandoning remaining segments"
                    );
                    self.store
                        .mark_segment_failed(&segment.id, &e.to_string())
                        .await?;
                    return Err(EngineError::Backend(e));
                }
            }
        }

        let latency_secs = started.elapsed().as_secs_f64();
        self.store
            .set_document_stats(document_id, word_count, token_count, latency_secs)
            .await?;
        tracing::info!(
            document_id,
            dataset_id,
            word_count,
            token_count,
            "document ingested"
        );

        Ok(IngestReport {
            word_count,
            token_count,
            latency_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_text_splitter_rejects_uploads() {
        let source = DocumentSource::UploadFile {
            upload_file_id: "file-1".to_string(),
        };
        let result = PlainTextSplitter
            .load_and_split(&source, &SplitRule::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_plain_text_splitter_splits_inline() {
        let source = DocumentSource::Inline {
            text: "Alpha.\n\nBeta.".to_string(),
            source_tag: "api".to_string(),
        };
        let rule = SplitRule {
            max_chars: 8,
            ..Default::default()
        };
        let contents = PlainTextSplitter.load_and_split(&source, &rule).await.unwrap();
        assert_eq!(contents, vec!["Alpha.".to_string(), "Beta.".to_string()]);
    }
}
