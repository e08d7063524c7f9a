use super::client::ContextBroker;
use super::reconciler::{ReconcileError, ReconcileReport, Reconciler};
use crate::stream::DesiredState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Result of the most recent reconciliation.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReconcileStatus {
    Completed { report: ReconcileReport },
    BrokerUnavailable { at: DateTime<Utc>, attempts: u32 },
}

/// Shared entry point for reconciliation.
///
/// Startup and the management API both reconcile through this service; the
/// gate ensures at most one reconciliation runs at a time.
pub struct ReconcileService {
    reconciler: Reconciler,
    desired: DesiredState,
    gate: Mutex<()>,
    last: RwLock<Option<ReconcileStatus>>,
}

impl ReconcileService {
    pub fn new(reconciler: Reconciler, desired: DesiredState) -> Self {
        Self {
            reconciler,
            desired,
            gate: Mutex::new(()),
            last: RwLock::new(None),
        }
    }

    pub fn desired(&self) -> &DesiredState {
        &self.desired
    }

    pub fn broker(&self) -> Arc<dyn ContextBroker> {
        self.reconciler.broker()
    }

    /// Reconciles every desired subscription and entity.
    pub async fn run(&self) -> Result<ReconcileReport, ReconcileError> {
        let _guard = self.gate.lock().await;
        let result = self
            .reconciler
            .reconcile(&self.desired.subscriptions, &self.desired.entities)
            .await;
        self.record(&result);
        result
    }

    /// Reconciles entities only, leaving subscriptions untouched.
    pub async fn run_entities_only(&self) -> Result<ReconcileReport, ReconcileError> {
        let _guard = self.gate.lock().await;
        let result = self.reconciler.reconcile(&[], &self.desired.entities).await;
        self.record(&result);
        result
    }

    /// Most recent result, `None` until the first reconciliation finishes.
    pub fn last_status(&self) -> Option<ReconcileStatus> {
        self.last.read().ok().and_then(|last| last.clone())
    }

    fn record(&self, result: &Result<ReconcileReport, ReconcileError>) {
        let status = match result {
            Ok(report) => ReconcileStatus::Completed {
                report: report.clone(),
            },
            Err(ReconcileError::RemoteUnavailable { attempts }) => {
                ReconcileStatus::BrokerUnavailable {
                    at: Utc::now(),
                    attempts: *attempts,
                }
            }
        };
        if let Ok(mut last) = self.last.write() {
            *last = Some(status);
        }
    }
}
