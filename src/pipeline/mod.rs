//! ETL pipeline - one extract/transform/load cycle for one stream.
//!
//! ```text
//! SourceReader::fetch_latest ──► Transform::apply ──► DocumentSink::append
//!     │ no row → Skipped          │ missing input        │ error → Failed(load)
//!     │ error  → Failed(extract)  │ → Failed(transform)  │ ok    → Succeeded
//! ```

use crate::model::ResultDocument;
use crate::sink::{DocumentSink, RecordId};
use crate::source::SourceReader;
use crate::stream::StreamKind;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};


/// Stage of a cycle that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Transform,
    Load,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Extract => "extract",
            Stage::Transform => "transform",
            Stage::Load => "load",
        };
        f.write_str(s)
    }
}

/// Result of one cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Source had no reading; nothing written
    Skipped { reason: String },
    Failed { stage: Stage, cause: String },
    Succeeded { record_id: RecordId },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// A unit of periodic work the scheduler can drive.
///
/// Implementations never panic on I/O failure; every failure is reported
/// through the returned [`Outcome`].
#[async_trait]
pub trait Cycle: Send + Sync {
    /// Unique name, used as the schedule and status key.
    fn name(&self) -> &str;

    async fn run_once(&self) -> Outcome;
}

/// Source → transform → sink for one stream.
///
/// Runs are serialized: a manual run that arrives while a scheduled run is
/// in progress waits for it to finish.
pub struct EtlPipeline {
    stream: StreamKind,
    source: Arc<dyn SourceReader>,
    sink: Arc<dyn DocumentSink>,
    running: Mutex<()>,
}

impl EtlPipeline {
    pub fn new(
        stream: StreamKind,
        source: Arc<dyn SourceReader>,
        sink: Arc<dyn DocumentSink>,
    ) -> Self {
        Self {
            stream,
            source,
            sink,
            running: Mutex::new(()),
        }
    }

    pub fn stream(&self) -> StreamKind {
        self.stream
    }
}

#[async_trait]
impl Cycle for EtlPipeline {
    fn name(&self) -> &str {
        self.stream.id()
    }

    async fn run_once(&self) -> Outcome {
        let stream = self.stream;
        let _running = self.running.lock().await;
        debug!(stream = %stream, "Starting ETL cycle");

        // Extract
        let reading = match self.source.fetch_latest(stream).await {
            Ok(Some(reading)) => reading,
            Ok(None) => {
                info!(stream = %stream, "No reading available, cycle skipped");
                return Outcome::Skipped {
                    reason: "no_data".to_string(),
                };
            }
            Err(e) => {
                warn!(stream = %stream, stage = %Stage::Extract, error = %e, "ETL cycle failed");
                return Outcome::Failed {
                    stage: Stage::Extract,
                    cause: e.to_string(),
                };
            }
        };
        debug!(stream = %stream, values = ?reading.values, "Extracted latest reading");

        // Transform
        let derived = match stream.transform().apply(&reading) {
            Ok(derived) => derived,
            Err(e) => {
                warn!(stream = %stream, stage = %Stage::Transform, error = %e, "ETL cycle failed");
                return Outcome::Failed {
                    stage: Stage::Transform,
                    cause: e.to_string(),
                };
            }
        };
        if let Some(decision) = &derived.decision {
            debug!(
                stream = %stream,
                action = ?decision.action,
                level = decision.level,
                "Computed decision"
            );
        }

        // Load
        let document = ResultDocument::new(reading, derived.decision, derived.location);
        match self.sink.append(stream.collection(), &document).await {
            Ok(record_id) => {
                info!(
                    stream = %stream,
                    collection = stream.collection(),
                    record_id = %record_id,
                    "ETL cycle stored result"
                );
                Outcome::Succeeded { record_id }
            }
            Err(e) => {
                warn!(stream = %stream, stage = %Stage::Load, error = %e, "ETL cycle failed");
                Outcome::Failed {
                    stage: Stage::Load,
                    cause: e.to_string(),
                }
            }
        }
    }
}
