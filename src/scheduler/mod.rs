//! Cycle scheduler - runs each registered cycle on its own fixed interval.
//!
//! Every cycle gets one background task that alternates between waiting and
//! running:
//!
//! ```text
//! schedule ──► Waiting(interval) ──► Running ──► Waiting(interval) ──► …
//! ```
//!
//! The wait starts when a run finishes, so a run longer than its interval
//! delays the next one instead of overlapping it. Cycles share nothing but
//! the [`StatusRegistry`]; a slow or failing cycle never holds up another.

use crate::pipeline::{Cycle, Outcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};


/// Status information for one cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PipelineStatus {
    /// When the last run finished
    pub last_run: Option<DateTime<Utc>>,
    pub last_outcome: Option<Outcome>,
    /// Total runs, whatever their outcome
    pub run_count: u64,
    /// Runs that ended in `Outcome::Failed`
    pub failure_count: u64,
}

/// Per-cycle status shared between the scheduler, startup and the HTTP API.
#[derive(Clone, Default)]
pub struct StatusRegistry {
    statuses: Arc<DashMap<String, PipelineStatus>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, name: &str, outcome: &Outcome) {
        let mut status = self.statuses.entry(name.to_string()).or_default();
        status.last_run = Some(Utc::now());
        status.last_outcome = Some(outcome.clone());
        status.run_count += 1;
        if outcome.is_failure() {
            status.failure_count += 1;
        }
    }

    pub fn get(&self, name: &str) -> Option<PipelineStatus> {
        self.statuses.get(name).map(|s| s.clone())
    }

    /// All statuses, ordered by cycle name.
    pub fn snapshot(&self) -> BTreeMap<String, PipelineStatus> {
        self.statuses
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

/// Runs `cycle` once and records the outcome.
pub async fn run_and_record(cycle: &dyn Cycle, statuses: &StatusRegistry) -> Outcome {
    let outcome = cycle.run_once().await;
    statuses.record(cycle.name(), &outcome);
    outcome
}

/// Owns one loop task per scheduled cycle, keyed by cycle name.
///
/// Dropping the scheduler aborts every loop.
pub struct CycleScheduler {
    statuses: StatusRegistry,
    handles: HashMap<String, JoinHandle<()>>,
}

impl CycleScheduler {
    pub fn new(statuses: StatusRegistry) -> Self {
        Self {
            statuses,
            handles: HashMap::new(),
        }
    }

    pub fn statuses(&self) -> StatusRegistry {
        self.statuses.clone()
    }

    /// Starts running `cycle` forever, first run one `interval` from now.
    ///
    /// Replaces any loop already scheduled under the same name.
    pub fn schedule(&mut self, cycle: Arc<dyn Cycle>, interval: Duration) {
        let name = cycle.name().to_string();
        let statuses = self.statuses.clone();

        let handle = tokio::spawn({
            let name = name.clone();
            async move {
                info!(
                    cycle = %name,
                    interval_secs = interval.as_secs_f64(),
                    "Starting cycle scheduler"
                );
                loop {
                    tokio::time::sleep(interval).await;
                    debug!(cycle = %name, "Running scheduled cycle");
                    run_and_record(cycle.as_ref(), &statuses).await;
                }
            }
        });

        if let Some(old) = self.handles.insert(name.clone(), handle) {
            old.abort();
            info!(cycle = %name, "Aborted existing schedule before restart");
        }
    }

    /// Stops the loop for `name`. Returns false if nothing was scheduled.
    pub fn stop(&mut self, name: &str) -> bool {
        match self.handles.remove(name) {
            Some(handle) => {
                handle.abort();
                info!(cycle = %name, "Stopped cycle scheduler");
                true
            }
            None => false,
        }
    }

    /// Names of the scheduled cycles, sorted.
    pub fn scheduled(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Aborts every loop.
    pub fn shutdown(&mut self) {
        let count = self.handles.len();
        if count > 0 {
            info!(scheduler_count = count, "Aborting cycle scheduler tasks");
        }
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}

impl Drop for CycleScheduler {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}
