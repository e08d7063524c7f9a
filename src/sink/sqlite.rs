//! Result documents stored as JSON in SQLite.

use super::{DocumentSink, RecordId, WriteError};
use crate::model::{ResultDocument, StoredDocument};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::SecondsFormat;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// Append-only document store backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE documents (
///     id TEXT PRIMARY KEY,        -- UUIDv7
///     collection TEXT NOT NULL,
///     captured_at TEXT NOT NULL,  -- RFC 3339, fixed precision (sorts lexically)
///     body TEXT NOT NULL          -- ResultDocument as JSON
/// );
/// ```
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Creates or opens a document store.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open document database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL,
                captured_at TEXT NOT NULL,
                body TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create documents table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_collection_captured ON documents(collection, captured_at)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("document store lock poisoned"))
    }

    fn query_newest(&self, collection: &str, limit: usize) -> Result<Vec<StoredDocument>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, body FROM documents WHERE collection = ?1 \
             ORDER BY captured_at DESC, id DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![collection, limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (id, body) = row?;
            let document: ResultDocument = serde_json::from_str(&body)
                .with_context(|| format!("Corrupt document body for {}", id))?;
            documents.push(StoredDocument { id, document });
        }
        Ok(documents)
    }
}

#[async_trait]
impl DocumentSink for SqliteDocumentStore {
    async fn append(
        &self,
        collection: &str,
        document: &ResultDocument,
    ) -> Result<RecordId, WriteError> {
        let body =
            serde_json::to_string(document).map_err(|e| WriteError::Encode(e.to_string()))?;
        let id = Uuid::now_v7().to_string();
        let captured_at = document
            .captured_at
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let conn = self
            .lock()
            .map_err(|e| WriteError::Unavailable(e.to_string()))?;
        conn.execute(
            "INSERT INTO documents (id, collection, captured_at, body) VALUES (?1, ?2, ?3, ?4)",
            params![id, collection, captured_at, body],
        )
        .map_err(|e| WriteError::Unavailable(e.to_string()))?;

        Ok(id)
    }

    async fn latest(&self, collection: &str) -> Result<Option<StoredDocument>> {
        Ok(self.query_newest(collection, 1)?.into_iter().next())
    }

    async fn history(&self, collection: &str, limit: usize) -> Result<Vec<StoredDocument>> {
        self.query_newest(collection, limit)
    }

    async fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .optional()
            .context("Document store ping failed")?;
        Ok(())
    }
}
