//! SQLite-backed [`MetadataStore`] (sqlx, WAL journal mode).
//!
//! Schema bootstrap is idempotent (`CREATE TABLE IF NOT EXISTS`); every
//! enum is stored as its string/int form and parsed back on read. The
//! conditional updates rely on `rows_affected` of a guarded `UPDATE`, which
//! SQLite executes atomically.

use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::chunk::ProcessRule;
use crate::config::{EmbeddingConfig, RerankConfig};
use crate::models::{
    CollectionRef, Dataset, Document, IndexingStatus, RetrievalDetail, RetrievalKind,
    RetrievalRecord, RetrievalStatus, RetrieverConfig, RowStatus, Segment, REINDEXING_SENTINEL,
};

use super::MetadataStore;

pub struct SqliteMetadataStore {
    pool: SqlitePool,
}

impl SqliteMetadataStore {
    /// Open (creating if missing) a database file and bootstrap the schema.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS datasets (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                collection_ref TEXT NOT NULL,
                embedding_config_id TEXT NOT NULL,
                retriever_top_k INTEGER NOT NULL,
                retriever_score_threshold REAL NOT NULL,
                retriever_rerank INTEGER NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                dataset_id TEXT NOT NULL,
                source_json TEXT NOT NULL,
                status TEXT NOT NULL,
                archived INTEGER NOT NULL DEFAULT 0,
                word_count INTEGER NOT NULL DEFAULT 0,
                token_count INTEGER NOT NULL DEFAULT 0,
                indexing_latency_secs REAL NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS segments (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                dataset_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                word_count INTEGER NOT NULL DEFAULT 0,
                token_count INTEGER NOT NULL DEFAULT 0,
                index_id TEXT,
                indexing_status INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                hit_count INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                completed_at INTEGER,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS retrieval_records (
                id TEXT PRIMARY KEY,
                dataset_ids TEXT NOT NULL,
                query TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL,
                elapsed_secs REAL NOT NULL DEFAULT 0,
                embedding_tokens INTEGER NOT NULL DEFAULT 0,
                reranking_tokens INTEGER NOT NULL DEFAULT 0,
                error TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS retrieval_details (
                id TEXT PRIMARY KEY,
                record_id TEXT NOT NULL,
                dataset_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                segment_id TEXT NOT NULL,
                score REAL NOT NULL,
                reranking_score REAL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS embedding_configs (
                id TEXT PRIMARY KEY,
                config_json TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS rerank_configs (
                tenant_id TEXT PRIMARY KEY,
                config_json TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS process_rules (
                id TEXT PRIMARY KEY,
                rule_json TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS tenant_defaults (
                tenant_id TEXT PRIMARY KEY,
                embedding_config_id TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_documents_dataset ON documents(dataset_id)",
            "CREATE INDEX IF NOT EXISTS idx_segments_document ON segments(document_id)",
            "CREATE INDEX IF NOT EXISTS idx_segments_dataset ON segments(dataset_id)",
            "CREATE INDEX IF NOT EXISTS idx_details_record ON retrieval_details(record_id)",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn parse_row_status(raw: &str) -> Result<RowStatus> {
    RowStatus::parse(raw).ok_or_else(|| anyhow!("invalid row status: {}", raw))
}

fn row_to_dataset(row: &SqliteRow) -> Result<Dataset> {
    let collection_ref: String = row.get("collection_ref");
    let status: String = row.get("status");
    let top_k: i64 = row.get("retriever_top_k");
    let rerank: i64 = row.get("retriever_rerank");
    Ok(Dataset {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        name: row.get("name"),
        collection_ref: CollectionRef::parse(&collection_ref),
        embedding_config_id: row.get("embedding_config_id"),
        retriever: RetrieverConfig {
            top_k: top_k as usize,
            score_threshold: row.get::<f64, _>("retriever_score_threshold") as f32,
            rerank: rerank != 0,
        },
        status: parse_row_status(&status)?,
        created_at: row.get("created_at"),
    })
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let source_json: String = row.get("source_json");
    let status: String = row.get("status");
    let archived: i64 = row.get("archived");
    Ok(Document {
        id: row.get("id"),
        dataset_id: row.get("dataset_id"),
        source: serde_json::from_str(&source_json)?,
        status: parse_row_status(&status)?,
        archived: archived != 0,
        word_count: row.get::<i64, _>("word_count") as u64,
        token_count: row.get::<i64, _>("token_count") as u64,
        indexing_latency_secs: row.get("indexing_latency_secs"),
        created_at: row.get("created_at"),
    })
}

fn row_to_segment(row: &SqliteRow) -> Result<Segment> {
    let status: String = row.get("status");
    let indexing_status: i64 = row.get("indexing_status");
    Ok(Segment {
        id: row.get("id"),
        document_id: row.get("document_id"),
        dataset_id: row.get("dataset_id"),
        position: row.get("position"),
        content: row.get("content"),
        content_hash: row.get("content_hash"),
        word_count: row.get::<i64, _>("word_count") as u64,
        token_count: row.get::<i64, _>("token_count") as u64,
        index_id: row.get("index_id"),
        indexing_status: IndexingStatus::parse(indexing_status)
            .ok_or_else(|| anyhow!("invalid indexing status: {}", indexing_status))?,
        status: parse_row_status(&status)?,
        hit_count: row.get::<i64, _>("hit_count") as u64,
        error: row.get("error"),
        completed_at: row.get("completed_at"),
        created_at: row.get("created_at"),
    })
}

fn row_to_record(row: &SqliteRow) -> Result<RetrievalRecord> {
    let dataset_ids: String = row.get("dataset_ids");
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    Ok(RetrievalRecord {
        id: row.get("id"),
        dataset_ids: serde_json::from_str(&dataset_ids)?,
        query: row.get("query"),
        kind: RetrievalKind::parse(&kind).ok_or_else(|| anyhow!("invalid retrieval kind: {}", kind))?,
        status: RetrievalStatus::parse(&status)
            .ok_or_else(|| anyhow!("invalid retrieval status: {}", status))?,
        elapsed_secs: row.get("elapsed_secs"),
        embedding_tokens: row.get::<i64, _>("embedding_tokens") as u64,
        reranking_tokens: row.get::<i64, _>("reranking_tokens") as u64,
        error: row.get("error"),
        created_at: row.get("created_at"),
    })
}

fn row_to_detail(row: &SqliteRow) -> Result<RetrievalDetail> {
    Ok(RetrievalDetail {
        id: row.get("id"),
        record_id: row.get("record_id"),
        dataset_id: row.get("dataset_id"),
        document_id: row.get("document_id"),
        segment_id: row.get("segment_id"),
        score: row.get::<f64, _>("score") as f32,
        reranking_score: row
            .get::<Option<f64>, _>("reranking_score")
            .map(|s| s as f32),
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn insert_dataset(&self, dataset: &Dataset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO datasets (id, tenant_id, name, collection_ref, embedding_config_id,
                retriever_top_k, retriever_score_threshold, retriever_rerank, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                collection_ref = excluded.collection_ref,
                embedding_config_id = excluded.embedding_config_id,
                retriever_top_k = excluded.retriever_top_k,
                retriever_score_threshold = excluded.retriever_score_threshold,
                retriever_rerank = excluded.retriever_rerank,
                status = excluded.status
            "#,
        )
        .bind(&dataset.id)
        .bind(&dataset.tenant_id)
        .bind(&dataset.name)
        .bind(dataset.collection_ref.as_str())
        .bind(&dataset.embedding_config_id)
        .bind(dataset.retriever.top_k as i64)
        .bind(dataset.retriever.score_threshold as f64)
        .bind(dataset.retriever.rerank as i64)
        .bind(dataset.status.as_str())
        .bind(dataset.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_dataset(&self, id: &str) -> Result<Option<Dataset>> {
        let row = sqlx::query("SELECT * FROM datasets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_dataset).transpose()
    }

    async fn begin_reindex(&self, dataset_id: &str, embedding_config_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE datasets SET collection_ref = ?, embedding_config_id = ? \
             WHERE id = ? AND collection_ref != ?",
        )
        .bind(REINDEXING_SENTINEL)
        .bind(embedding_config_id)
        .bind(dataset_id)
        .bind(REINDEXING_SENTINEL)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn publish_collection(&self, dataset_id: &str, collection_ref: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE datasets SET collection_ref = ? WHERE id = ? AND collection_ref = ?",
        )
        .bind(collection_ref)
        .bind(dataset_id)
        .bind(REINDEXING_SENTINEL)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_dataset_status(&self, dataset_id: &str, status: RowStatus) -> Result<()> {
        sqlx::query("UPDATE datasets SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(dataset_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, dataset_id, source_json, status, archived,
                word_count, token_count, indexing_latency_secs, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source_json = excluded.source_json,
                status = excluded.status,
                archived = excluded.archived
            "#,
        )
        .bind(&document.id)
        .bind(&document.dataset_id)
        .bind(serde_json::to_string(&document.source)?)
        .bind(document.status.as_str())
        .bind(document.archived as i64)
        .bind(document.word_count as i64)
        .bind(document.token_count as i64)
        .bind(document.indexing_latency_secs)
        .bind(document.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn documents_by_dataset(&self, dataset_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT * FROM documents WHERE dataset_id = ? AND status != 'deleted' \
             ORDER BY created_at, id",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn set_document_status(&self, id: &str, status: RowStatus) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_document_stats(
        &self,
        id: &str,
        word_count: u64,
        token_count: u64,
        indexing_latency_secs: f64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET word_count = ?, token_count = ?, indexing_latency_secs = ? \
             WHERE id = ?",
        )
        .bind(word_count as i64)
        .bind(token_count as i64)
        .bind(indexing_latency_secs)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_segment(&self, segment: &Segment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO segments (id, document_id, dataset_id, position, content, content_hash,
                word_count, token_count, index_id, indexing_status, status, hit_count,
                error, completed_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&segment.id)
        .bind(&segment.document_id)
        .bind(&segment.dataset_id)
        .bind(segment.position)
        .bind(&segment.content)
        .bind(&segment.content_hash)
        .bind(segment.word_count as i64)
        .bind(segment.token_count as i64)
        .bind(&segment.index_id)
        .bind(segment.indexing_status.as_i64())
        .bind(segment.status.as_str())
        .bind(segment.hit_count as i64)
        .bind(&segment.error)
        .bind(segment.completed_at)
        .bind(segment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_segment(&self, id: &str) -> Result<Option<Segment>> {
        let row = sqlx::query("SELECT * FROM segments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_segment).transpose()
    }

    async fn segments_by_document(&self, document_id: &str) -> Result<Vec<Segment>> {
        let rows = sqlx::query(
            "SELECT * FROM segments WHERE document_id = ? AND status != 'deleted' \
             ORDER BY position",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_segment).collect()
    }

    async fn segments_by_dataset(&self, dataset_id: &str) -> Result<Vec<Segment>> {
        let rows = sqlx::query(
            "SELECT * FROM segments WHERE dataset_id = ? AND status != 'deleted' \
             ORDER BY document_id, position",
        )
        .bind(dataset_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_segment).collect()
    }

    async fn set_segment_status(&self, id: &str, status: RowStatus) -> Result<()> {
        sqlx::query("UPDATE segments SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_segment_indexing(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE segments SET indexing_status = ?, error = NULL WHERE id = ?")
            .bind(IndexingStatus::Indexing.as_i64())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_segment_indexed(
        &self,
        id: &str,
        index_id: &str,
        token_count: u64,
        completed_at: i64,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE segments SET indexing_status = ?, index_id = ?, token_count = ?, \
             completed_at = ?, error = NULL WHERE id = ?",
        )
        .bind(IndexingStatus::Indexed.as_i64())
        .bind(index_id)
        .bind(token_count as i64)
        .bind(completed_at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_segment_failed(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query("UPDATE segments SET indexing_status = ?, error = ? WHERE id = ?")
            .bind(IndexingStatus::Failed.as_i64())
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_segment_index(&self, id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE segments SET indexing_status = ?, index_id = NULL, token_count = 0, \
             completed_at = NULL WHERE id = ?",
        )
        .bind(IndexingStatus::NotIndexed.as_i64())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_hit_count(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE segments SET hit_count = hit_count + 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn soft_delete_document_segments(&self, document_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE segments SET status = 'deleted' WHERE document_id = ? AND status != 'deleted'",
        )
        .bind(document_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn soft_delete_dataset_rows(&self, dataset_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE documents SET status = 'deleted' WHERE dataset_id = ? AND status != 'deleted'",
        )
        .bind(dataset_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE segments SET status = 'deleted' WHERE dataset_id = ? AND status != 'deleted'",
        )
        .bind(dataset_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_retrieval_record(&self, record: &RetrievalRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO retrieval_records (id, dataset_ids, query, kind, status,
                elapsed_secs, embedding_tokens, reranking_tokens, error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(serde_json::to_string(&record.dataset_ids)?)
        .bind(&record.query)
        .bind(record.kind.as_str())
        .bind(record.status.as_str())
        .bind(record.elapsed_secs)
        .bind(record.embedding_tokens as i64)
        .bind(record.reranking_tokens as i64)
        .bind(&record.error)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
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
        sqlx::query(
            "UPDATE retrieval_records SET status = ?, error = ?, elapsed_secs = ?, \
             embedding_tokens = ?, reranking_tokens = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(elapsed_secs)
        .bind(embedding_tokens as i64)
        .bind(reranking_tokens as i64)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_retrieval_record(&self, id: &str) -> Result<Option<RetrievalRecord>> {
        let row = sqlx::query("SELECT * FROM retrieval_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn retrieval_records_by_dataset(
        &self,
        dataset_id: &str,
    ) -> Result<Vec<RetrievalRecord>> {
        // dataset_ids is a JSON array of quoted ids.
        let rows = sqlx::query(
            "SELECT * FROM retrieval_records WHERE dataset_ids LIKE ? ORDER BY created_at, id",
        )
        .bind(format!("%\"{}\"%", dataset_id))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn insert_retrieval_details(&self, details: &[RetrievalDetail]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for detail in details {
            sqlx::query(
                r#"
                INSERT INTO retrieval_details (id, record_id, dataset_id, document_id,
                    segment_id, score, reranking_score)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&detail.id)
            .bind(&detail.record_id)
            .bind(&detail.dataset_id)
            .bind(&detail.document_id)
            .bind(&detail.segment_id)
            .bind(detail.score as f64)
            .bind(detail.reranking_score.map(|s| s as f64))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn retrieval_details_by_record(&self, record_id: &str) -> Result<Vec<RetrievalDetail>> {
        let rows = sqlx::query("SELECT * FROM retrieval_details WHERE record_id = ?")
            .bind(record_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_detail).collect()
    }

    async fn insert_embedding_config(&self, config: &EmbeddingConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO embedding_configs (id, config_json) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET config_json = excluded.config_json
            "#,
        )
        .bind(&config.id)
        .bind(serde_json::to_string(config)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_embedding_config(&self, id: &str) -> Result<Option<EmbeddingConfig>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT config_json FROM embedding_configs WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    async fn insert_rerank_config(&self, config: &RerankConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO rerank_configs (tenant_id, config_json) VALUES (?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET config_json = excluded.config_json
            "#,
        )
        .bind(&config.tenant_id)
        .bind(serde_json::to_string(config)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_rerank_config(&self, tenant_id: &str) -> Result<Option<RerankConfig>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT config_json FROM rerank_configs WHERE tenant_id = ?")
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    async fn insert_process_rule(&self, rule: &ProcessRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO process_rules (id, rule_json) VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET rule_json = excluded.rule_json
            "#,
        )
        .bind(&rule.id)
        .bind(serde_json::to_string(rule)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_process_rule(&self, id: &str) -> Result<Option<ProcessRule>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT rule_json FROM process_rules WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        json.map(|j| serde_json::from_str(&j).map_err(Into::into))
            .transpose()
    }

    async fn set_active_embedding_config(&self, tenant_id: &str, config_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tenant_defaults (tenant_id, embedding_config_id) VALUES (?, ?)
            ON CONFLICT(tenant_id) DO UPDATE SET embedding_config_id = excluded.embedding_config_id
            "#,
        )
        .bind(tenant_id)
        .bind(config_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_active_embedding_config(&self, tenant_id: &str) -> Result<Option<String>> {
        let config_id: Option<String> = sqlx::query_scalar(
            "SELECT embedding_config_id FROM tenant_defaults WHERE tenant_id = ?",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(config_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentSource;
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, SqliteMetadataStore) {
        let tmp = TempDir::new().unwrap();
        let store = SqliteMetadataStore::connect(&tmp.path().join("engine.sqlite"))
            .await
            .unwrap();
        (tmp, store)
    }

    fn dataset(id: &str) -> Dataset {
        Dataset {
            id: id.to_string(),
            tenant_id: "tenant".to_string(),
            name: "test".to_string(),
            collection_ref: CollectionRef::Ready("col_1".to_string()),
            embedding_config_id: "cfg".to_string(),
            retriever: RetrieverConfig {
                top_k: 4,
                score_threshold: 0.5,
                rerank: true,
            },
            status: RowStatus::Enabled,
            created_at: 1700000000,
        }
    }

    #[tokio::test]
    async fn test_schema_init_idempotent() {
        let (tmp, store) = open_store().await;
        store.init_schema().await.unwrap();
        drop(store);
        // Reconnecting runs the bootstrap again against the same file.
        SqliteMetadataStore::connect(&tmp.path().join("engine.sqlite"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dataset_roundtrip() {
        let (_tmp, store) = open_store().await;
        store.insert_dataset(&dataset("ds")).await.unwrap();

        let loaded = store.get_dataset("ds").await.unwrap().unwrap();
        assert_eq!(loaded.collection_ref, CollectionRef::Ready("col_1".to_string()));
        assert_eq!(loaded.retriever.top_k, 4);
        assert!((loaded.retriever.score_threshold - 0.5).abs() < 1e-6);
        assert!(loaded.retriever.rerank);
    }

    #[tokio::test]
    async fn test_begin_reindex_conditional_update() {
        let (_tmp, store) = open_store().await;
        store.insert_dataset(&dataset("ds")).await.unwrap();

        assert!(store.begin_reindex("ds", "cfg2").await.unwrap());
        assert!(!store.begin_reindex("ds", "cfg3").await.unwrap());
        assert!(store.publish_collection("ds", "col_2").await.unwrap());
        assert!(!store.publish_collection("ds", "col_3").await.unwrap());

        let loaded = store.get_dataset("ds").await.unwrap().unwrap();
        assert_eq!(loaded.collection_ref, CollectionRef::Ready("col_2".to_string()));
        assert_eq!(loaded.embedding_config_id, "cfg2");
    }

    #[tokio::test]
    async fn test_segment_state_machine_persists() {
        let (_tmp, store) = open_store().await;
        let segment = Segment {
            id: "seg".to_string(),
            document_id: "doc".to_string(),
            dataset_id: "ds".to_string(),
            position: 0,
            content: "hello".to_string(),
            content_hash: "hash".to_string(),
            word_count: 5,
            token_count: 0,
            index_id: None,
            indexing_status: IndexingStatus::NotIndexed,
            status: RowStatus::Enabled,
            hit_count: 0,
            error: None,
            completed_at: None,
            created_at: 0,
        };
        store.insert_segment(&segment).await.unwrap();

        store.mark_segment_indexing("seg").await.unwrap();
        store
            .mark_segment_indexed("seg", "idx-1", 12, 1700000001)
            .await
            .unwrap();
        let loaded = store.get_segment("seg").await.unwrap().unwrap();
        assert_eq!(loaded.indexing_status, IndexingStatus::Indexed);
        assert_eq!(loaded.index_id.as_deref(), Some("idx-1"));
        assert_eq!(loaded.token_count, 12);

        store.reset_segment_index("seg").await.unwrap();
        let loaded = store.get_segment("seg").await.unwrap().unwrap();
        assert_eq!(loaded.indexing_status, IndexingStatus::NotIndexed);
        assert_eq!(loaded.index_id, None);
        assert_eq!(loaded.token_count, 0);
    }

    #[tokio::test]
    async fn test_document_source_json_roundtrip() {
        let (_tmp, store) = open_store().await;
        let document = Document {
            id: "doc".to_string(),
            dataset_id: "ds".to_string(),
            source: DocumentSource::Inline {
                text: "body".to_string(),
                source_tag: "api".to_string(),
            },
            status: RowStatus::Enabled,
            archived: false,
            word_count: 0,
            token_count: 0,
            indexing_latency_secs: 0.0,
            created_at: 0,
        };
        store.insert_document(&document).await.unwrap();

        let loaded = store.get_document("doc").await.unwrap().unwrap();
        match loaded.source {
            DocumentSource::Inline { text, source_tag } => {
                assert_eq!(text, "body");
                assert_eq!(source_tag, "api");
            }
            other => panic!("unexpected source: {:?}", other),
        }
    }
}
