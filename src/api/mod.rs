// HTTP API: stored results, broker management and the sensor gateway

pub mod gateway;
pub mod management;
pub mod results;

use crate::broker::ReconcileService;
use crate::pipeline::EtlPipeline;
use crate::scheduler::StatusRegistry;
use crate::sink::DocumentSink;
use crate::stream::StreamKind;
use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    Router,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Shared state for every API handler.
pub struct AppState {
    pub sink: Arc<dyn DocumentSink>,
    /// Pipelines available for manual runs, one per stream
    pub pipelines: HashMap<StreamKind, Arc<EtlPipeline>>,
    pub statuses: StatusRegistry,
    pub reconcile: Arc<ReconcileService>,
    /// Shared secret sensors must send; `None` disables the gateway
    pub gateway_token: Option<String>,
}

impl AppState {
    /// Streams with a registered pipeline, in catalog order.
    pub fn streams(&self) -> Vec<StreamKind> {
        StreamKind::ALL
            .into_iter()
            .filter(|s| self.pipelines.contains_key(s))
            .collect()
    }
}

/// Builds the full API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let mut router = Router::new()
        .merge(results::create_results_router(state.clone()))
        .nest(
            "/subscriptions",
            management::create_management_router(state.clone()),
        );

    if state.gateway_token.is_some() {
        router = router.merge(gateway::create_gateway_router(state));
    }

    router.layer(cors)
}

#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}

#[derive(Debug)]
pub(crate) enum AppError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    /// The context broker failed or could not be reached
    BadGateway(String),
    Internal(String),
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}
