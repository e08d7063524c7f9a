// Context broker: NGSIv2 client and remote state reconciliation

mod client;
mod model;
mod reconciler;
mod service;


pub use client::{
    validate_entity_id, BrokerError, ContextBroker, CreateResponse, EntityLookup, OrionClient,
    ALREADY_EXISTS_STATUS,
};
pub use model::{Attribute, EntitySpec, SubscriptionRecord, SubscriptionSpec};
pub use reconciler::{
    ItemFailure, ItemKind, ItemOutcome, ItemReport, ReconcileError, ReconcileReport, Reconciler,
};
pub use service::{ReconcileService, ReconcileStatus};
