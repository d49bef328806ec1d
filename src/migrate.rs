//! Idempotent schema creation. Safe to run on every start.
//!
//! Columns added after the first release are created by [`ensure_column`]
//! so older databases pick them up in place.

use anyhow::Result;
use sqlx::SqlitePool;

/// Add `column` to `table` unless it already exists.
async fn ensure_column(pool: &SqlitePool, table: &str, column: &str, ddl: &str) -> Result<bool> {
    let present: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?")
            .bind(table)
            .bind(column)
            .fetch_one(pool)
            .await?;
    if present > 0 {
        return Ok(false);
    }
    sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {column} {ddl}"))
        .execute(pool)
        .await?;
    tracing::info!(table, column, "added column");
    Ok(true)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            category TEXT NOT NULL,
            mime TEXT NOT NULL,
            uploaded_at INTEGER NOT NULL,
            blob_ref TEXT NOT NULL,
            vector_status TEXT NOT NULL DEFAULT 'pending',
            processed_at INTEGER,
            content_preview TEXT NOT NULL DEFAULT '',
            error_message TEXT,
            owner TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            residue_blob INTEGER,
            residue_vectors INTEGER,
            search_text TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            filename TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            document_ids_json TEXT NOT NULL,
            template TEXT NOT NULL,
            format TEXT NOT NULL,
            status TEXT NOT NULL,
            download_ref TEXT,
            error_message TEXT,
            progress INTEGER,
            analysis_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_sessions (
            id TEXT PRIMARY KEY,
            owner TEXT NOT NULL DEFAULT 'local',
            selected_file_ids_json TEXT NOT NULL DEFAULT '[]',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_turns (
            session_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            timestamp INTEGER NOT NULL,
            metadata_json TEXT,
            PRIMARY KEY (session_id, seq),
            FOREIGN KEY (session_id) REFERENCES chat_sessions(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    if ensure_column(pool, "documents", "search_text", "TEXT NOT NULL DEFAULT ''").await? {
        // Close enough for ASCII; rows are re-folded on their next update.
        sqlx::query(
            "UPDATE documents SET search_text = \
             lower(filename) || char(31) || lower(content_preview) WHERE search_text = ''",
        )
        .execute(pool)
        .await?;
    }
    ensure_column(pool, "chat_sessions", "owner", "TEXT NOT NULL DEFAULT 'local'").await?;

    for stmt in [
        "CREATE INDEX IF NOT EXISTS idx_documents_uploaded_at ON documents(uploaded_at DESC, id)",
        "CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner)",
        "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)",
        "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_document_id ON chunk_vectors(document_id)",
        "CREATE INDEX IF NOT EXISTS idx_reports_owner ON reports(owner, created_at DESC)",
    ] {
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}
