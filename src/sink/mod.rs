// Document sink

mod sqlite;

pub use sqlite::SqliteDocumentStore;

use crate::model::{ResultDocument, StoredDocument};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

/// Identifier assigned to an appended document.
pub type RecordId = String;

/// Append failures. The document is lost; there is no retry or buffering.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteError {
    /// Store could not be opened or the insert failed
    Unavailable(String),
    /// Document could not be encoded
    Encode(String),
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Unavailable(msg) => write!(f, "document store unavailable: {}", msg),
            WriteError::Encode(msg) => write!(f, "document encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for WriteError {}

/// Append-only document store, one collection per stream.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Inserts one document. No upsert, no dedup.
    async fn append(&self, collection: &str, document: &ResultDocument)
        -> Result<RecordId, WriteError>;

    /// Most recent document by `captured_at`.
    async fn latest(&self, collection: &str) -> Result<Option<StoredDocument>>;

    /// Up to `limit` documents, newest first.
    async fn history(&self, collection: &str, limit: usize) -> Result<Vec<StoredDocument>>;

    /// Cheap connectivity check used by the readiness wait.
    async fn ping(&self) -> Result<()>;
}
