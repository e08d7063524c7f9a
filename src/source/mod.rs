// Time-series source reader

mod crate_db;

pub use crate_db::CrateSource;

use crate::model::Reading;
use crate::stream::StreamKind;
use async_trait::async_trait;
use std::fmt;

/// Source read failures. Both variants mean the store is unavailable for
/// this cycle; the next scheduled cycle tries again.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Store could not be reached (connect error, timeout)
    Unreachable(String),
    /// Store answered but the query failed
    Query(String),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::Unreachable(msg) => write!(f, "source unreachable: {}", msg),
            SourceError::Query(msg) => write!(f, "source query failed: {}", msg),
        }
    }
}

impl std::error::Error for SourceError {}

/// Reads the most recent reading of a stream.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Returns `Ok(None)` when the stream has no rows yet.
    async fn fetch_latest(&self, stream: StreamKind) -> Result<Option<Reading>, SourceError>;

    /// Cheap connectivity check used by the readiness wait.
    async fn ping(&self) -> Result<(), SourceError>;
}
