//! Database schema migrations.
//!
//! This module contains all database migrations and schema setup.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// This function is called during database initialization to ensure
/// the schema is up to date.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    // Initial schema setup
    conn.execute_batch(
        r#"
        -- Folders table (tree via parent_id)
        CREATE TABLE IF NOT EXISTS folders (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            parent_id TEXT,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (parent_id) REFERENCES folders(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_folders_parent ON folders(parent_id);

        -- Documents table
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            folder_id TEXT,
            name TEXT NOT NULL,
            mime_type TEXT NOT NULL,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'active',
            extracted_text TEXT,
            page_count INTEGER,
            category TEXT,
            category_confidence REAL,
            thumbnail_key TEXT,
            search_version INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (folder_id) REFERENCES folders(id) ON DELETE SET NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_org ON documents(org_id);
        CREATE INDEX IF NOT EXISTS idx_documents_folder ON documents(folder_id);

        -- Document tags (many-to-many)
        CREATE TABLE IF NOT EXISTS document_tags (
            document_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (document_id, tag),
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_document_tags_tag ON document_tags(tag);

        -- Vector embeddings table
        -- Embeddings are stored as BLOBs and scored by brute-force cosine;
        -- can be upgraded to sqlite-vec when available
        CREATE TABLE IF NOT EXISTS document_embeddings (
            document_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            model TEXT NOT NULL,
            dimensions INTEGER NOT NULL,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        -- Processing jobs table
        CREATE TABLE IF NOT EXISTS processing_jobs (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            org_id TEXT NOT NULL,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            priority INTEGER NOT NULL DEFAULT 1,
            input_params TEXT,
            output_data TEXT,
            error_message TEXT,
            error_code TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 3,
            lease_expires_at TEXT,
            next_retry_at TEXT,
            started_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            created_by_id TEXT,
            FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_status ON processing_jobs(status);
        CREATE INDEX IF NOT EXISTS idx_jobs_document ON processing_jobs(document_id, job_type);

        -- At most one live job per (document, job_type) pair
        CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_active_pair
            ON processing_jobs(document_id, job_type)
            WHERE status IN ('pending', 'running', 'retrying');
    "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    run_fts5_migration(conn)?;
    run_vocab_migration(conn)?;
    run_artifacts_migration(conn)?;

    Ok(())
}

/// Migration: Add FTS5 virtual table for full-text search over documents
fn run_fts5_migration(conn: &Connection) -> ServiceResult<()> {
    let has_documents_fts: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='documents_fts'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
        > 0;

    if !has_documents_fts {
        conn.execute_batch(
            r#"
            -- FTS5 virtual table for full-text search on documents.
            -- Column names mirror the content table so FTS5 can read values
            -- back from it.
            CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts USING fts5(
                name,
                extracted_text,
                category,
                org_id UNINDEXED,
                id UNINDEXED,
                content='documents',
                content_rowid='rowid'
            );

            -- Triggers to keep FTS in sync with the documents table
            CREATE TRIGGER IF NOT EXISTS documents_fts_ai AFTER INSERT ON documents BEGIN
                INSERT INTO documents_fts(rowid, name, extracted_text, category, org_id, id)
                VALUES (new.rowid, new.name, new.extracted_text, new.category, new.org_id, new.id);
            END;

            CREATE TRIGGER IF NOT EXISTS documents_fts_ad AFTER DELETE ON documents BEGIN
                INSERT INTO documents_fts(documents_fts, rowid, name, extracted_text, category, org_id, id)
                VALUES ('delete', old.rowid, old.name, old.extracted_text, old.category, old.org_id, old.id);
            END;

            CREATE TRIGGER IF NOT EXISTS documents_fts_au AFTER UPDATE ON documents BEGIN
                INSERT INTO documents_fts(documents_fts, rowid, name, extracted_text, category, org_id, id)
                VALUES ('delete', old.rowid, old.name, old.extracted_text, old.category, old.org_id, old.id);
                INSERT INTO documents_fts(rowid, name, extracted_text, category, org_id, id)
                VALUES (new.rowid, new.name, new.extracted_text, new.category, new.org_id, new.id);
            END;
            "#,
        )
        .map_err(|e| DatabaseError::Migration {
            message: format!("Failed to create FTS5 table: {}", e),
        })?;

        // Populate FTS index from existing documents
        conn.execute(
            "INSERT INTO documents_fts(rowid, name, extracted_text, category, org_id, id) SELECT rowid, name, extracted_text, category, org_id, id FROM documents",
            [],
        )
        .map_err(|e| DatabaseError::Migration {
            message: format!("Failed to populate FTS5 index: {}", e),
        })?;
    }

    Ok(())
}

/// Migration: Vocabulary over the FTS index, used for spelling suggestions.
///
/// The instance variant exposes the content rowid per term occurrence, so
/// suggestion queries can join back to documents and stay org-scoped. Earlier
/// databases carried the row variant, which aggregates across all orgs; those
/// tables are dropped and recreated (fts5vocab tables hold no data of their
/// own, so this is safe on a live database).
fn run_vocab_migration(conn: &Connection) -> ServiceResult<()> {
    let has_row_vocab: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name='documents_fts_vocab' AND sql LIKE '%''row''%'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
        > 0;

    if has_row_vocab {
        conn.execute("DROP TABLE documents_fts_vocab", [])
            .map_err(|e| DatabaseError::Migration {
                message: format!("Failed to drop legacy vocab table: {}", e),
            })?;
    }

    conn.execute(
        "CREATE VIRTUAL TABLE IF NOT EXISTS documents_fts_vocab \
         USING fts5vocab('documents_fts', 'instance')",
        [],
    )
    .map_err(|e| DatabaseError::Migration {
        message: format!("Failed to create vocab table: {}", e),
    })?;

    Ok(())
}

/// Migration: Add artifacts column to documents (migration for existing databases)
/// SQLite doesn't have IF NOT EXISTS for ALTER TABLE, so we check if the column exists
fn run_artifacts_migration(conn: &Connection) -> ServiceResult<()> {
    let has_artifacts: bool = conn
        .query_row(
            "SELECT COUNT(*) FROM pragma_table_info('documents') WHERE name='artifacts'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0)
        > 0;

    if !has_artifacts {
        conn.execute("ALTER TABLE documents ADD COLUMN artifacts TEXT", [])
            .map_err(|e| DatabaseError::Migration {
                message: format!("Failed to add artifacts column: {}", e),
            })?;
    }

    Ok(())
}
