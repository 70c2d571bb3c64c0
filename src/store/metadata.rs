use crate::models::{chunk_id, DocumentRecord, DocumentStatus, MediaType};
use crate::utils::error::ApiError;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use tracing::{info, warn};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    document_id   TEXT PRIMARY KEY,
    title         TEXT NOT NULL,
    category      TEXT,
    description   TEXT,
    metadata      TEXT NOT NULL DEFAULT '{}',
    status        TEXT NOT NULL,
    chunks_count  INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    media_type    TEXT NOT NULL,
    media_url     TEXT,
    content_hash  TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_documents_content_hash
    ON documents(content_hash) WHERE content_hash IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
CREATE INDEX IF NOT EXISTS idx_documents_category ON documents(category);
CREATE INDEX IF NOT EXISTS idx_documents_created_at ON documents(created_at);
CREATE TABLE IF NOT EXISTS migrations (
    name        TEXT PRIMARY KEY,
    applied_at  TEXT NOT NULL
);
"#;

#[derive(sqlx::FromRow)]
struct DocumentRow {
    document_id: String,
    title: String,
    category: Option<String>,
    description: Option<String>,
    metadata: String,
    status: String,
    chunks_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    media_type: String,
    media_url: Option<String>,
    content_hash: Option<String>,
}

impl DocumentRow {
    fn into_record(self) -> Result<DocumentRecord, ApiError> {
        let status = DocumentStatus::parse(&self.status)
            .ok_or_else(|| ApiError::StorageError(format!("unknown status '{}'", self.status)))?;
        let media_type = MediaType::parse(&self.media_type).ok_or_else(|| {
            ApiError::StorageError(format!("unknown media type '{}'", self.media_type))
        })?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| ApiError::StorageError(format!("corrupt metadata json: {}", e)))?;

        Ok(DocumentRecord {
            document_id: self.document_id,
            title: self.title,
            category: self.category,
            description: self.description,
            metadata,
            status,
            chunks_count: self.chunks_count.max(0) as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
            media_type,
            media_url: self.media_url,
            content_hash: self.content_hash,
        })
    }
}

/// Persistent document index: one SQLite file, one writer, many readers.
/// Chunk rows are never persisted; chunk IDs are rebuilt from
/// `chunks_count` on demand.
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    pub async fn open(path: &Path) -> Result<Self, ApiError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ApiError::StorageError(format!("data dir: {}", e)))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| ApiError::StorageError(format!("open database: {}", e)))?;

        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| ApiError::StorageError(format!("apply schema: {}", e)))?;

        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn upsert(&self, doc: &DocumentRecord) -> Result<(), ApiError> {
        let metadata = serde_json::to_string(&doc.metadata)
            .map_err(|e| ApiError::StorageError(format!("serialize metadata: {}", e)))?;

        sqlx::query(
            r#"INSERT OR REPLACE INTO documents
               (document_id, title, category, description, metadata, status,
                chunks_count, created_at, updated_at, media_type, media_url, content_hash)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&doc.document_id)
        .bind(&doc.title)
        .bind(&doc.category)
        .bind(&doc.description)
        .bind(&metadata)
        .bind(doc.status.as_str())
        .bind(doc.chunks_count as i64)
        .bind(doc.created_at)
        .bind(Utc::now())
        .bind(doc.media_type.as_str())
        .bind(&doc.media_url)
        .bind(&doc.content_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| ApiError::StorageError(format!("upsert document: {}", e)))?;

        Ok(())
    }

    pub async fn get(&self, document_id: &str) -> Result<Option<DocumentRecord>, ApiError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::StorageError(format!("get document: {}", e)))?;

        row.map(DocumentRow::into_record).transpose()
    }

    pub async fn exists(&self, document_id: &str) -> Result<bool, ApiError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ApiError::StorageError(format!("exists: {}", e)))?;
        Ok(count > 0)
    }

    pub async fn delete(&self, document_id: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM documents WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ApiError::StorageError(format!("delete document: {}", e)))?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_content_hash(
        &self,
        content_hash: &str,
    ) -> Result<Option<DocumentRecord>, ApiError> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE content_hash = ?",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ApiError::StorageError(format!("find by hash: {}", e)))?;

        row.map(DocumentRow::into_record).transpose()
    }

    pub async fn hash_exists(&self, content_hash: &str) -> Result<bool, ApiError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE content_hash = ?")
                .bind(content_hash)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| ApiError::StorageError(format!("hash exists: {}", e)))?;
        Ok(count > 0)
    }

    pub async fn list(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<DocumentRecord>, u64), ApiError> {
        let rows = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ApiError::StorageError(format!("list documents: {}", e)))?;

        let docs = rows
            .into_iter()
            .map(DocumentRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        let total = self.count().await?;

        Ok((docs, total))
    }

    /// Rebuild the dense `<id>_chunk_<i>` ID list from `chunks_count`.
    pub async fn chunk_ids(&self, document_id: &str) -> Result<Vec<String>, ApiError> {
        let doc = self
            .get(document_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("document '{}'", document_id)))?;

        Ok((0..doc.chunks_count)
            .map(|i| chunk_id(document_id, i))
            .collect())
    }

    pub async fn count(&self) -> Result<u64, ApiError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ApiError::StorageError(format!("count: {}", e)))?;
        Ok(count.max(0) as u64)
    }

    /// Import a flat legacy snapshot (JSON array of document records)
    /// exactly once, in a single transaction, then sideline the file.
    pub async fn import_legacy_snapshot(&self, path: &Path) -> Result<usize, ApiError> {
        const MIGRATION: &str = "legacy_snapshot_import";

        let already: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migrations WHERE name = ?")
            .bind(MIGRATION)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ApiError::StorageError(format!("migration check: {}", e)))?;
        if already > 0 {
            return Ok(0);
        }
        if !path.exists() {
            return Ok(0);
        }

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ApiError::StorageError(format!("read snapshot: {}", e)))?;
        let docs: Vec<DocumentRecord> = serde_json::from_str(&raw)
            .map_err(|e| ApiError::StorageError(format!("parse snapshot: {}", e)))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ApiError::StorageError(format!("begin import: {}", e)))?;

        for doc in &docs {
            let metadata = serde_json::to_string(&doc.metadata)
                .map_err(|e| ApiError::StorageError(format!("serialize metadata: {}", e)))?;
            sqlx::query(
                r#"INSERT OR IGNORE INTO documents
                   (document_id, title, category, description, metadata, status,
                    chunks_count, created_at, updated_at, media_type, media_url, content_hash)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&doc.document_id)
            .bind(&doc.title)
            .bind(&doc.category)
            .bind(&doc.description)
            .bind(&metadata)
            .bind(doc.status.as_str())
            .bind(doc.chunks_count as i64)
            .bind(doc.created_at)
            .bind(doc.updated_at)
            .bind(doc.media_type.as_str())
            .bind(&doc.media_url)
            .bind(&doc.content_hash)
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::StorageError(format!("import row: {}", e)))?;
        }

        sqlx::query("INSERT INTO migrations (name, applied_at) VALUES (?, ?)")
            .bind(MIGRATION)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(|e| ApiError::StorageError(format!("record migration: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| ApiError::StorageError(format!("commit import: {}", e)))?;

        let sidelined = path.with_extension("json.migrated");
        if let Err(e) = tokio::fs::rename(path, &sidelined).await {
            warn!(error = %e, "imported snapshot but could not sideline it");
        }

        info!(documents = docs.len(), "imported legacy snapshot");
        Ok(docs.len())
    }
}
