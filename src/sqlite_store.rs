//! SQLite-backed store implementations.
//!
//! [`SqliteStore`] wraps a [`SqlitePool`] and implements [`DocumentStore`],
//! [`VectorIndex`], [`ReportStore`] and [`SessionStore`] over the schema in
//! [`crate::migrate`]. Timestamps are stored as Unix milliseconds. Vector
//! queries are brute-force cosine similarity over `chunk_vectors`, joined to
//! `documents` so ownership and status filters apply before ranking.
//!
//! SQLite's `lower()` only folds ASCII, so keyword matching runs `instr`
//! over the `search_text` column, which is lowercased in Rust on write.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use finreport_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use finreport_core::models::{
    ChatSession, ChatTurn, DeletionResidue, Document, DocumentFilter, IndexedChunk, ReportJob,
    ReportStatus, ReportUpdate, Role,
};
use finreport_core::store::{
    DocumentStore, ReportStore, SessionStore, VectorFilter, VectorHit, VectorIndex,
};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let residue_blob: Option<bool> = row.try_get("residue_blob")?;
    let residue_vectors: Option<bool> = row.try_get("residue_vectors")?;
    let deletion_residue = match (residue_blob, residue_vectors) {
        (None, None) => None,
        (blob, vectors) => Some(DeletionResidue {
            blob: blob.unwrap_or(false),
            vectors: vectors.unwrap_or(false),
        }),
    };
    let size: i64 = row.try_get("size_bytes")?;
    Ok(Document {
        id: row.try_get("id")?,
        filename: row.try_get("filename")?,
        size_bytes: size.max(0) as u64,
        category: row.try_get::<String, _>("category")?.parse()?,
        mime: row.try_get("mime")?,
        uploaded_at: from_ms(row.try_get("uploaded_at")?),
        blob_ref: row.try_get("blob_ref")?,
        vector_status: row.try_get::<String, _>("vector_status")?.parse()?,
        processed_at: row
            .try_get::<Option<i64>, _>("processed_at")?
            .map(from_ms),
        content_preview: row.try_get("content_preview")?,
        error_message: row.try_get("error_message")?,
        owner: row.try_get("owner")?,
        version: row.try_get("version")?,
        deletion_residue,
    })
}

const DOCUMENT_COLUMNS: &str = "id, filename, size_bytes, category, mime, uploaded_at, blob_ref, \
     vector_status, processed_at, content_preview, error_message, owner, version, \
     residue_blob, residue_vectors";

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO documents ({DOCUMENT_COLUMNS}, search_text) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&doc.id)
        .bind(&doc.filename)
        .bind(doc.size_bytes as i64)
        .bind(doc.category.as_str())
        .bind(&doc.mime)
        .bind(to_ms(doc.uploaded_at))
        .bind(&doc.blob_ref)
        .bind(doc.vector_status.as_str())
        .bind(doc.processed_at.map(to_ms))
        .bind(&doc.content_preview)
        .bind(&doc.error_message)
        .bind(&doc.owner)
        .bind(doc.version)
        .bind(doc.deletion_residue.map(|r| r.blob))
        .bind(doc.deletion_residue.map(|r| r.vectors))
        .bind(doc.search_text())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE 1 = 1"));
        if let Some(ref needle) = filter.search {
            let needle = needle.to_lowercase();
            qb.push(" AND instr(search_text, ")
                .push_bind(needle)
                .push(") > 0");
        }
        if !filter.categories.is_empty() {
            qb.push(" AND category IN (");
            let mut sep = qb.separated(", ");
            for c in &filter.categories {
                sep.push_bind(c.as_str());
            }
            sep.push_unseparated(")");
        }
        if let Some(status) = filter.status {
            qb.push(" AND vector_status = ").push_bind(status.as_str());
        }
        if let Some(ref owner) = filter.owner {
            qb.push(" AND owner = ").push_bind(owner.clone());
        }
        if filter.searchable_only {
            qb.push(" AND vector_status = 'completed'");
            qb.push(" AND residue_blob IS NULL AND residue_vectors IS NULL");
        }
        qb.push(" ORDER BY uploaded_at DESC, id ASC LIMIT ")
            .push_bind(filter.limit as i64)
            .push(" OFFSET ")
            .push_bind(filter.offset as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn get_documents(&self, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id IN ("
        ));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id.clone());
        }
        sep.push_unseparated(")");
        let rows = qb.build().fetch_all(&self.pool).await?;
        let mut docs: Vec<Document> = rows.iter().map(row_to_document).collect::<Result<_>>()?;
        docs.sort_by_key(|d| ids.iter().position(|id| id == &d.id));
        Ok(docs)
    }

    async fn update_document(&self, doc: &Document) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents SET
                filename = ?, size_bytes = ?, category = ?, mime = ?, blob_ref = ?,
                vector_status = ?, processed_at = ?, content_preview = ?,
                error_message = ?, version = ?, residue_blob = ?, residue_vectors = ?,
                search_text = ?
            WHERE id = ?
            "#,
        )
        .bind(&doc.filename)
        .bind(doc.size_bytes as i64)
        .bind(doc.category.as_str())
        .bind(&doc.mime)
        .bind(&doc.blob_ref)
        .bind(doc.vector_status.as_str())
        .bind(doc.processed_at.map(to_ms))
        .bind(&doc.content_preview)
        .bind(&doc.error_message)
        .bind(doc.version)
        .bind(doc.deletion_residue.map(|r| r.blob))
        .bind(doc.deletion_residue.map(|r| r.vectors))
        .bind(doc.search_text())
        .bind(&doc.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn upsert(&self, chunks: &[IndexedChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, filename, chunk_index, text, hash)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    text = excluded.text,
                    hash = excluded.hash,
                    chunk_index = excluded.chunk_index
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.metadata.document_id)
            .bind(&chunk.metadata.filename)
            .bind(chunk.metadata.position)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO chunk_vectors (chunk_id, document_id, dims, embedding)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    dims = excluded.dims,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.metadata.document_id)
            .bind(chunk.vector.len() as i64)
            .bind(vec_to_blob(&chunk.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &VectorFilter,
    ) -> Result<Vec<VectorHit>> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT cv.chunk_id, cv.document_id, cv.embedding, c.text \
             FROM chunk_vectors cv \
             JOIN chunks c ON c.id = cv.chunk_id \
             JOIN documents d ON d.id = cv.document_id \
             WHERE cv.dims = ",
        );
        qb.push_bind(vector.len() as i64);
        if let Some(ref owner) = filter.owner {
            qb.push(" AND d.owner = ").push_bind(owner.clone());
        }
        if !filter.categories.is_empty() {
            qb.push(" AND d.category IN (");
            let mut sep = qb.separated(", ");
            for c in &filter.categories {
                sep.push_bind(c.as_str());
            }
            sep.push_unseparated(")");
        }
        if !filter.document_ids.is_empty() {
            qb.push(" AND d.id IN (");
            let mut sep = qb.separated(", ");
            for id in &filter.document_ids {
                sep.push_bind(id.clone());
            }
            sep.push_unseparated(")");
        }
        if filter.searchable_only {
            qb.push(
                " AND d.vector_status = 'completed' \
                 AND d.residue_blob IS NULL AND d.residue_vectors IS NULL",
            );
        }
        let rows = qb.build().fetch_all(&self.pool).await?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| -> Result<VectorHit> {
                let blob: Vec<u8> = row.try_get("embedding")?;
                Ok(VectorHit {
                    chunk_id: row.try_get("chunk_id")?,
                    document_id: row.try_get("document_id")?,
                    score: cosine_similarity(vector, &blob_to_vec(&blob)) as f64,
                    text: row.try_get("text")?,
                })
            })
            .collect::<Result<_>>()?;
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() as usize)
    }

    async fn count_for_document(&self, document_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

fn row_to_report(row: &SqliteRow) -> Result<ReportJob> {
    let ids_json: String = row.try_get("document_ids_json")?;
    let analysis_json: Option<String> = row.try_get("analysis_json")?;
    Ok(ReportJob {
        id: row.try_get("id")?,
        owner: row.try_get("owner")?,
        document_ids: serde_json::from_str(&ids_json)?,
        template: row.try_get::<String, _>("template")?.parse()?,
        format: row.try_get::<String, _>("format")?.parse()?,
        status: row.try_get::<String, _>("status")?.parse()?,
        download_ref: row.try_get("download_ref")?,
        error_message: row.try_get("error_message")?,
        progress: row
            .try_get::<Option<i64>, _>("progress")?
            .map(|p| p.clamp(0, 100) as u8),
        analysis: analysis_json
            .map(|s| serde_json::from_str(&s))
            .transpose()?,
        created_at: from_ms(row.try_get("created_at")?),
        updated_at: from_ms(row.try_get("updated_at")?),
    })
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn insert_report(&self, job: &ReportJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reports (id, owner, document_ids_json, template, format, status,
                                 download_ref, error_message, progress, analysis_json,
                                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner)
        .bind(serde_json::to_string(&job.document_ids)?)
        .bind(job.template.as_str())
        .bind(job.format.as_str())
        .bind(job.status.as_str())
        .bind(&job.download_ref)
        .bind(&job.error_message)
        .bind(job.progress.map(i64::from))
        .bind(job.analysis.as_ref().map(serde_json::to_string).transpose()?)
        .bind(to_ms(job.created_at))
        .bind(to_ms(job.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_report(&self, id: &str) -> Result<Option<ReportJob>> {
        let row = sqlx::query("SELECT * FROM reports WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_report).transpose()
    }

    async fn list_reports(
        &self,
        owner: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ReportJob>> {
        let rows = sqlx::query(
            "SELECT * FROM reports WHERE owner = ? \
             ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
        )
        .bind(owner)
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_report).collect()
    }

    async fn apply_report_update(&self, id: &str, update: ReportUpdate) -> Result<bool> {
        let now = to_ms(Utc::now());
        let generating = ReportStatus::Generating.as_str();
        let result = match update {
            ReportUpdate::Progress(p) => {
                let p = i64::from(p.min(100));
                sqlx::query(
                    "UPDATE reports SET progress = ?, updated_at = ? \
                     WHERE id = ? AND status = ? AND (progress IS NULL OR progress < ?)",
                )
                .bind(p)
                .bind(now)
                .bind(id)
                .bind(generating)
                .bind(p)
                .execute(&self.pool)
                .await?
            }
            ReportUpdate::Completed {
                download_ref,
                analysis,
            } => {
                sqlx::query(
                    "UPDATE reports SET status = ?, download_ref = ?, analysis_json = ?, \
                     progress = 100, updated_at = ? WHERE id = ? AND status = ?",
                )
                .bind(ReportStatus::Completed.as_str())
                .bind(download_ref)
                .bind(serde_json::to_string(&analysis)?)
                .bind(now)
                .bind(id)
                .bind(generating)
                .execute(&self.pool)
                .await?
            }
            ReportUpdate::Failed { message } => {
                sqlx::query(
                    "UPDATE reports SET status = ?, error_message = ?, updated_at = ? \
                     WHERE id = ? AND status = ?",
                )
                .bind(ReportStatus::Error.as_str())
                .bind(message)
                .bind(now)
                .bind(id)
                .bind(generating)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load_session(&self, id: &str) -> Result<Option<ChatSession>> {
        let Some(row) = sqlx::query("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };
        let selected: String = row.try_get("selected_file_ids_json")?;

        let turn_rows = sqlx::query(
            "SELECT role, content, timestamp, metadata_json FROM chat_turns \
             WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let turns = turn_rows
            .iter()
            .map(|r| -> Result<ChatTurn> {
                let metadata: Option<String> = r.try_get("metadata_json")?;
                Ok(ChatTurn {
                    role: r.try_get::<String, _>("role")?.parse::<Role>()?,
                    content: r.try_get("content")?,
                    timestamp: from_ms(r.try_get("timestamp")?),
                    metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ChatSession {
            id: row.try_get("id")?,
            owner: row.try_get("owner")?,
            turns,
            selected_file_ids: serde_json::from_str(&selected)?,
            created_at: from_ms(row.try_get("created_at")?),
            updated_at: from_ms(row.try_get("updated_at")?),
        }))
    }

    async fn create_session(&self, session: &ChatSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO chat_sessions (id, owner, selected_file_ids_json, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(&session.id)
        .bind(&session.owner)
        .bind(serde_json::to_string(&session.selected_file_ids)?)
        .bind(to_ms(session.created_at))
        .bind(to_ms(session.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_turn(&self, id: &str, turn: &ChatTurn) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let touched = sqlx::query("UPDATE chat_sessions SET updated_at = ? WHERE id = ?")
            .bind(to_ms(turn.timestamp))
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if touched.rows_affected() == 0 {
            bail!("session {id} not found");
        }
        sqlx::query(
            r#"
            INSERT INTO chat_turns (session_id, seq, role, content, timestamp, metadata_json)
            SELECT ?, COALESCE(MAX(seq), -1) + 1, ?, ?, ?, ?
            FROM chat_turns WHERE session_id = ?
            "#,
        )
        .bind(id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(to_ms(turn.timestamp))
        .bind(turn.metadata.as_ref().map(|m| m.to_string()))
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_selected_files(&self, id: &str, ids: &[String]) -> Result<()> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET selected_file_ids_json = ?, updated_at = ? WHERE id = ?",
        )
        .bind(serde_json::to_string(ids)?)
        .bind(to_ms(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("session {id} not found"));
        }
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chat_turns WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
