//! Startup sequence.
//!
//! 1. Wait for the source and the sink to answer their ping
//! 2. Reconcile the context broker once
//! 3. Run every pipeline once
//! 4. Hand the pipelines to a [`CycleScheduler`]
//!
//! Steps run one after another. Only an exhausted readiness wait under
//! [`ReadinessPolicy::Abort`] stops startup; everything else is logged and
//! startup continues degraded.

use crate::broker::ReconcileService;
use crate::pipeline::Cycle;
use crate::retry::{wait_until_ready, ReadinessPolicy, RetryPolicy};
use crate::scheduler::{run_and_record, CycleScheduler, StatusRegistry};
use crate::sink::DocumentSink;
use crate::source::SourceReader;
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct Orchestrator {
    source: Arc<dyn SourceReader>,
    sink: Arc<dyn DocumentSink>,
    reconcile: Arc<ReconcileService>,
    statuses: StatusRegistry,
    readiness: RetryPolicy,
    readiness_policy: ReadinessPolicy,
    pipelines: Vec<(Arc<dyn Cycle>, Duration)>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceReader>,
        sink: Arc<dyn DocumentSink>,
        reconcile: Arc<ReconcileService>,
        statuses: StatusRegistry,
        readiness: RetryPolicy,
        readiness_policy: ReadinessPolicy,
    ) -> Self {
        Self {
            source,
            sink,
            reconcile,
            statuses,
            readiness,
            readiness_policy,
            pipelines: Vec::new(),
        }
    }

    /// Registers a pipeline to run at startup and then every `interval`.
    pub fn pipeline(mut self, cycle: Arc<dyn Cycle>, interval: Duration) -> Self {
        self.pipelines.push((cycle, interval));
        self
    }

    /// Runs the startup sequence and returns the running scheduler.
    pub async fn start(self) -> Result<CycleScheduler> {
        self.wait_for_storage().await?;

        match self.reconcile.run().await {
            Ok(report) if report.all_succeeded() => {
                info!(created = report.created(), "Context broker state reconciled");
            }
            Ok(report) => {
                warn!(
                    failed = report.failed(),
                    "Context broker reconciled with failures, continuing"
                );
            }
            Err(e) => {
                warn!(error = %e, "Context broker reconciliation skipped, continuing");
            }
        }

        for (cycle, _) in &self.pipelines {
            let outcome = run_and_record(cycle.as_ref(), &self.statuses).await;
            info!(cycle = %cycle.name(), outcome = ?outcome, "Initial cycle finished");
        }

        let mut scheduler = CycleScheduler::new(self.statuses.clone());
        for (cycle, interval) in self.pipelines {
            scheduler.schedule(cycle, interval);
        }
        info!(cycles = ?scheduler.scheduled(), "Scheduler started");

        Ok(scheduler)
    }

    async fn wait_for_storage(&self) -> Result<()> {
        let source = Arc::clone(&self.source);
        let source_ready = wait_until_ready("time-series source", self.readiness, move || {
            let source = Arc::clone(&source);
            async move {
                source.ping().await?;
                Ok(())
            }
        })
        .await;

        let sink = Arc::clone(&self.sink);
        let sink_ready = wait_until_ready("document store", self.readiness, move || {
            let sink = Arc::clone(&sink);
            async move { sink.ping().await }
        })
        .await;

        if source_ready && sink_ready {
            return Ok(());
        }

        match self.readiness_policy {
            ReadinessPolicy::Abort => bail!(
                "Storage not ready after {} attempts (source ready: {}, sink ready: {})",
                self.readiness.max_attempts,
                source_ready,
                sink_ready
            ),
            ReadinessPolicy::Proceed => {
                warn!(
                    source_ready = source_ready,
                    sink_ready = sink_ready,
                    "Storage not ready, continuing anyway"
                );
                Ok(())
            }
        }
    }
}
