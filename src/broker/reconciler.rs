//! Remote state reconciler.
//!
//! Makes the broker hold the desired subscriptions and entities, tolerating
//! partial prior state. Each item is created, or confirmed as already
//! present, independently; one item failing never stops the others.
//!
//! # Subscriptions
//! Create. On the "already exists" status, list subscriptions and look for
//! one with the same description. Found → `AlreadyPresent`; not found →
//! `Failed(AmbiguousConflict)`.
//!
//! # Entities
//! Create. On the "already exists" status, fetch the entity. Found → patch
//! its attributes (best-effort) and report `AlreadyPresent`. Not found →
//! retry the create exactly once.

use super::client::{BrokerError, ContextBroker, CreateResponse, EntityLookup};
use super::model::{EntitySpec, SubscriptionSpec};
use crate::retry::{wait_until_ready, RetryPolicy};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Subscription,
    Entity,
}

/// Why a single item could not be reconciled.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ItemFailure {
    /// Broker said "already exists" but the lookup could not confirm it
    AmbiguousConflict { detail: String },
    /// Broker answered with an unexpected status
    Rejected { status: u16, body: String },
    /// Broker could not be reached or answered garbage
    Transport { message: String },
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemFailure::AmbiguousConflict { detail } => {
                write!(f, "ambiguous conflict: {}", detail)
            }
            ItemFailure::Rejected { status, body } => {
                write!(f, "rejected with status {}: {}", status, body)
            }
            ItemFailure::Transport { message } => write!(f, "{}", message),
        }
    }
}

impl From<BrokerError> for ItemFailure {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::Status { status, body } => ItemFailure::Rejected { status, body },
            other => ItemFailure::Transport {
                message: other.to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Created,
    AlreadyPresent,
    Failed { failure: ItemFailure },
}

impl ItemOutcome {
    fn failed(failure: impl Into<ItemFailure>) -> Self {
        ItemOutcome::Failed {
            failure: failure.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, ItemOutcome::Failed { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ItemReport {
    pub kind: ItemKind,
    /// Subscription description or entity id
    pub key: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Per-item result of one reconciliation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub finished_at: DateTime<Utc>,
    pub items: Vec<ItemReport>,
}

impl ReconcileReport {
    pub fn created(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::Created))
    }

    pub fn already_present(&self) -> usize {
        self.count(|o| matches!(o, ItemOutcome::AlreadyPresent))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| !o.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn outcome_of(&self, kind: ItemKind, key: &str) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|i| i.kind == kind && i.key == key)
            .map(|i| &i.outcome)
    }

    fn count(&self, pred: impl Fn(&ItemOutcome) -> bool) -> usize {
        self.items.iter().filter(|i| pred(&i.outcome)).count()
    }
}

/// Reconciliation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileError {
    /// Liveness probe never succeeded; nothing was attempted
    RemoteUnavailable { attempts: u32 },
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileError::RemoteUnavailable { attempts } => write!(
                f,
                "context broker unavailable after {} liveness attempts",
                attempts
            ),
        }
    }
}

impl std::error::Error for ReconcileError {}

/// Creates-or-confirms subscriptions and entities in the broker.
///
/// Not internally synchronized: callers run at most one reconciliation at a
/// time (see [`super::ReconcileService`]).
pub struct Reconciler {
    broker: Arc<dyn ContextBroker>,
    liveness: RetryPolicy,
}

impl Reconciler {
    pub fn new(broker: Arc<dyn ContextBroker>, liveness: RetryPolicy) -> Self {
        Self { broker, liveness }
    }

    pub fn broker(&self) -> Arc<dyn ContextBroker> {
        Arc::clone(&self.broker)
    }

    pub async fn reconcile(
        &self,
        subscriptions: &[SubscriptionSpec],
        entities: &[EntitySpec],
    ) -> Result<ReconcileReport, ReconcileError> {
        let broker = Arc::clone(&self.broker);
        let alive = wait_until_ready("context broker", self.liveness, move || {
            let broker = Arc::clone(&broker);
            async move {
                broker.version().await?;
                Ok(())
            }
        })
        .await;
        if !alive {
            return Err(ReconcileError::RemoteUnavailable {
                attempts: self.liveness.max_attempts,
            });
        }

        let mut items = Vec::with_capacity(subscriptions.len() + entities.len());

        for spec in subscriptions {
            let outcome = self.reconcile_subscription(spec).await;
            log_item(ItemKind::Subscription, &spec.description, &outcome);
            items.push(ItemReport {
                kind: ItemKind::Subscription,
                key: spec.description.clone(),
                outcome,
            });
        }

        for spec in entities {
            let outcome = self.reconcile_entity(spec).await;
            log_item(ItemKind::Entity, &spec.id, &outcome);
            items.push(ItemReport {
                kind: ItemKind::Entity,
                key: spec.id.clone(),
                outcome,
            });
        }

        let report = ReconcileReport {
            finished_at: Utc::now(),
            items,
        };
        info!(
            created = report.created(),
            already_present = report.already_present(),
            failed = report.failed(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile_subscription(&self, spec: &SubscriptionSpec) -> ItemOutcome {
        match self.broker.create_subscription(spec).await {
            Ok(CreateResponse::Created { .. }) => ItemOutcome::Created,
            Ok(CreateResponse::AlreadyExists) => self.confirm_subscription(spec).await,
            Ok(CreateResponse::Rejected { status, body }) => {
                ItemOutcome::failed(ItemFailure::Rejected { status, body })
            }
            Err(e) => ItemOutcome::failed(e),
        }
    }

    async fn confirm_subscription(&self, spec: &SubscriptionSpec) -> ItemOutcome {
        let existing = match self.broker.list_subscriptions().await {
            Ok(subs) => subs,
            Err(e) => {
                return ItemOutcome::failed(ItemFailure::AmbiguousConflict {
                    detail: format!("could not list subscriptions: {}", e),
                })
            }
        };

        match existing
            .iter()
            .find(|s| s.description.as_deref() == Some(spec.description.as_str()))
        {
            Some(record) => {
                info!(
                    description = %spec.description,
                    subscription_id = %record.id,
                    "Subscription already exists"
                );
                ItemOutcome::AlreadyPresent
            }
            None => ItemOutcome::failed(ItemFailure::AmbiguousConflict {
                detail: "no subscription with this description".to_string(),
            }),
        }
    }

    async fn reconcile_entity(&self, spec: &EntitySpec) -> ItemOutcome {
        match self.broker.create_entity(spec).await {
            Ok(CreateResponse::Created { .. }) => ItemOutcome::Created,
            Ok(CreateResponse::AlreadyExists) => self.confirm_entity(spec).await,
            Ok(CreateResponse::Rejected { status, body }) => {
                ItemOutcome::failed(ItemFailure::Rejected { status, body })
            }
            Err(e) => ItemOutcome::failed(e),
        }
    }

    async fn confirm_entity(&self, spec: &EntitySpec) -> ItemOutcome {
        match self.broker.get_entity(&spec.id).await {
            Ok(EntityLookup::Found(_)) => {
                if let Err(e) = self
                    .broker
                    .patch_entity_attrs(&spec.id, &spec.attributes_payload())
                    .await
                {
                    // Existence is what matters; a failed patch keeps AlreadyPresent
                    warn!(entity_id = %spec.id, error = %e, "Entity attribute update failed");
                }
                ItemOutcome::AlreadyPresent
            }
            Ok(EntityLookup::NotFound) => {
                info!(entity_id = %spec.id, "Entity reported as existing but not found, retrying create");
                match self.broker.create_entity(spec).await {
                    Ok(CreateResponse::Created { .. }) => ItemOutcome::Created,
                    Ok(CreateResponse::AlreadyExists) => {
                        ItemOutcome::failed(ItemFailure::AmbiguousConflict {
                            detail: "entity conflicts on create but cannot be fetched".to_string(),
                        })
                    }
                    Ok(CreateResponse::Rejected { status, body }) => {
                        ItemOutcome::failed(ItemFailure::Rejected { status, body })
                    }
                    Err(e) => ItemOutcome::failed(e),
                }
            }
            Ok(EntityLookup::Rejected { status, body }) => {
                ItemOutcome::failed(ItemFailure::Rejected { status, body })
            }
            Err(e) => ItemOutcome::failed(e),
        }
    }
}

fn log_item(kind: ItemKind, key: &str, outcome: &ItemOutcome) {
    match outcome {
        ItemOutcome::Created => info!(kind = ?kind, key = %key, "Created in context broker"),
        ItemOutcome::AlreadyPresent => {
            info!(kind = ?kind, key = %key, "Already present in context broker")
        }
        ItemOutcome::Failed { failure } => {
            warn!(kind = ?kind, key = %key, error = %failure, "Reconciliation failed for item")
        }
    }
}
