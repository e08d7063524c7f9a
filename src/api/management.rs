//! Context broker management, nested under `/subscriptions`.
//!
//! Reconciliation triggered here goes through the shared
//! [`ReconcileService`](crate::broker::ReconcileService), so it never runs
//! concurrently with another reconciliation.

use super::{AppError, AppState};
use crate::broker::{
    validate_entity_id, BrokerError, EntityLookup, ReconcileError, ReconcileReport,
    ReconcileStatus, SubscriptionRecord,
};
use crate::scheduler::PipelineStatus;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Serialize)]
pub struct SubscriptionsResponse {
    pub status: &'static str,
    pub total: usize,
    pub subscriptions: Vec<SubscriptionRecord>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when the broker answers its liveness probe
    pub status: &'static str,
    pub broker_reachable: bool,
    pub active_subscriptions: usize,
    pub expected_subscriptions: usize,
    /// Desired subscriptions with no matching description in the broker
    pub missing_subscriptions: Vec<String>,
    pub active_entities: usize,
    pub expected_entities: usize,
}

/// One broker listing, or why it could not be fetched.
#[derive(Debug, Serialize)]
pub struct Listing<T> {
    pub count: usize,
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Listing<T> {
    fn from_result(result: Result<Vec<T>, BrokerError>) -> Self {
        match result {
            Ok(items) => Self {
                count: items.len(),
                items,
                error: None,
            },
            Err(e) => Self {
                count: 0,
                items: Vec::new(),
                error: Some(e.to_string()),
            },
        }
    }
}

/// Raw broker view for troubleshooting subscriptions that do not show up.
///
/// Subscriptions are listed twice: under the configured tenant and under
/// the default tenant (no tenant headers). A subscription created without
/// headers only appears in the second listing.
#[derive(Debug, Serialize)]
pub struct DebugResponse {
    pub broker_url: String,
    pub broker_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_version: Option<Value>,
    pub tenant_subscriptions: Listing<SubscriptionRecord>,
    pub default_tenant_subscriptions: Listing<SubscriptionRecord>,
    pub entities: Listing<Value>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub reconcile: Option<ReconcileStatus>,
    pub pipelines: BTreeMap<String, PipelineStatus>,
}

// ---------------------------------------------------------------------------
// Business logic
// ---------------------------------------------------------------------------

/// Broker reachability plus active vs expected counts.
///
/// Counts are zero when the broker is unreachable or a listing fails.
pub async fn handle_health(state: &AppState) -> HealthResponse {
    let broker = state.reconcile.broker();
    let desired = state.reconcile.desired();
    let reachable = broker.version().await.is_ok();

    let (subscriptions, entities) = if reachable {
        (
            broker.list_subscriptions().await.unwrap_or_default(),
            broker.list_entities().await.unwrap_or_default(),
        )
    } else {
        (Vec::new(), Vec::new())
    };

    let missing_subscriptions = desired
        .subscriptions
        .iter()
        .filter(|spec| {
            !subscriptions
                .iter()
                .any(|s| s.description.as_deref() == Some(spec.description.as_str()))
        })
        .map(|spec| spec.description.clone())
        .collect();

    HealthResponse {
        status: if reachable { "healthy" } else { "unhealthy" },
        broker_reachable: reachable,
        active_subscriptions: subscriptions.len(),
        expected_subscriptions: desired.subscriptions.len(),
        missing_subscriptions,
        active_entities: entities.len(),
        expected_entities: desired.entities.len(),
    }
}

/// Every listing is attempted even when the liveness probe fails.
pub async fn handle_debug(state: &AppState) -> DebugResponse {
    let broker = state.reconcile.broker();
    let version = broker.version().await.ok();

    DebugResponse {
        broker_url: broker.endpoint().to_string(),
        broker_connected: version.is_some(),
        broker_version: version,
        tenant_subscriptions: Listing::from_result(broker.list_subscriptions().await),
        default_tenant_subscriptions: Listing::from_result(
            broker.list_default_tenant_subscriptions().await,
        ),
        entities: Listing::from_result(broker.list_entities().await),
    }
}

pub fn handle_status(state: &AppState) -> StatusResponse {
    StatusResponse {
        reconcile: state.reconcile.last_status(),
        pipelines: state.statuses.snapshot(),
    }
}

/// 200 when every item succeeded, 207 when some failed, 503 when the broker
/// never answered its liveness probe.
fn reconcile_response(result: Result<ReconcileReport, ReconcileError>) -> Response {
    match result {
        Ok(report) if report.all_succeeded() => (
            StatusCode::OK,
            Json(json!({"status": "success", "report": report})),
        )
            .into_response(),
        Ok(report) => (
            StatusCode::MULTI_STATUS,
            Json(json!({"status": "partial_success", "report": report})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "message": e.to_string()})),
        )
            .into_response(),
    }
}

fn upstream(e: BrokerError) -> AppError {
    match e {
        BrokerError::InvalidId(_) => AppError::BadRequest(e.to_string()),
        _ => AppError::BadGateway(e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn list_subscriptions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SubscriptionsResponse>, AppError> {
    let subscriptions = state
        .reconcile
        .broker()
        .list_subscriptions()
        .await
        .map_err(upstream)?;
    Ok(Json(SubscriptionsResponse {
        status: "success",
        total: subscriptions.len(),
        subscriptions,
    }))
}

async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(handle_health(&state).await)
}

async fn get_debug(State(state): State<Arc<AppState>>) -> Json<DebugResponse> {
    Json(handle_debug(&state).await)
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(handle_status(&state))
}

async fn post_recreate(State(state): State<Arc<AppState>>) -> Response {
    info!("Reconciliation requested through the API");
    reconcile_response(state.reconcile.run().await)
}

async fn list_entities(State(state): State<Arc<AppState>>) -> Result<Json<Value>, AppError> {
    let entities = state
        .reconcile
        .broker()
        .list_entities()
        .await
        .map_err(upstream)?;
    Ok(Json(json!({
        "status": "success",
        "total_entities": entities.len(),
        "entities": entities,
    })))
}

async fn post_setup_entities(State(state): State<Arc<AppState>>) -> Response {
    info!("Entity setup requested through the API");
    reconcile_response(state.reconcile.run_entities_only().await)
}

async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    validate_entity_id(&entity_id).map_err(upstream)?;
    match state
        .reconcile
        .broker()
        .get_entity(&entity_id)
        .await
        .map_err(upstream)?
    {
        EntityLookup::Found(entity) => Ok(Json(json!({"status": "success", "entity": entity}))),
        EntityLookup::NotFound => Err(AppError::NotFound(format!(
            "Entity {} not found",
            entity_id
        ))),
        EntityLookup::Rejected { status, body } => Err(AppError::BadGateway(format!(
            "broker returned status {}: {}",
            status, body
        ))),
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_management_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(list_subscriptions))
        .route("/health", get(get_health))
        .route("/status", get(get_status))
        .route("/debug", get(get_debug))
        .route("/recreate", post(post_recreate))
        .route("/entities", get(list_entities))
        .route("/entities/setup", post(post_setup_entities))
        .route("/entities/:entity_id", get(get_entity))
        .with_state(state)
}
