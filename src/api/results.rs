//! Stored results and manual runs.
//!
//! Per stream (`irrigation`, `gps`):
//! - `GET /{stream}` latest document
//! - `GET /{stream}/history?limit=N` newest first
//! - `POST /{stream}/run-etl` one cycle now
//!
//! plus `GET /etl`, an index of every endpoint.

use super::{AppError, AppState};
use crate::model::StoredDocument;
use crate::pipeline::Outcome;
use crate::scheduler::run_and_record;
use crate::stream::StreamKind;
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_HISTORY_LIMIT: usize = 10;
const MAX_HISTORY_LIMIT: usize = 500;

/// Query parameters for history
#[derive(Deserialize)]
pub struct HistoryParams {
    /// Max documents to return (default: 10, max: 500)
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub total: usize,
    pub records: Vec<StoredDocument>,
}

#[derive(Serialize)]
pub struct RunResponse {
    pub stream: &'static str,
    #[serde(flatten)]
    pub outcome: Outcome,
}

// ---------------------------------------------------------------------------
// Business logic
// ---------------------------------------------------------------------------

pub async fn handle_latest(state: &AppState, stream: StreamKind) -> Result<Option<StoredDocument>> {
    state.sink.latest(stream.collection()).await
}

pub async fn handle_history(
    state: &AppState,
    stream: StreamKind,
    limit: Option<usize>,
) -> Result<Vec<StoredDocument>> {
    let limit = limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .min(MAX_HISTORY_LIMIT);
    state.sink.history(stream.collection(), limit).await
}

/// Runs one cycle of `stream` and records it like a scheduled run.
pub async fn handle_run(state: &AppState, stream: StreamKind) -> Option<Outcome> {
    let pipeline = state.pipelines.get(&stream)?;
    Some(run_and_record(pipeline.as_ref(), &state.statuses).await)
}

fn service_index(streams: &[StreamKind]) -> Value {
    let services: serde_json::Map<String, Value> = streams
        .iter()
        .map(|s| {
            let id = s.id();
            (
                id.to_string(),
                json!({
                    "collection": s.collection(),
                    "latest": format!("/{}", id),
                    "history": format!("/{}/history", id),
                    "run_manual_etl": format!("POST /{}/run-etl", id),
                }),
            )
        })
        .collect();

    json!({
        "message": "ETL service is running.",
        "services": services,
        "subscriptions": {
            "list_all": "/subscriptions",
            "health_check": "/subscriptions/health",
            "status": "/subscriptions/status",
            "debug": "/subscriptions/debug",
            "recreate": "POST /subscriptions/recreate",
            "entities": {
                "list_entities": "/subscriptions/entities",
                "setup_entities": "POST /subscriptions/entities/setup",
                "get_entity": "/subscriptions/entities/{entity_id}",
            }
        }
    })
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn get_index(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(service_index(&state.streams()))
}

async fn get_latest(state: Arc<AppState>, stream: StreamKind) -> Result<Json<StoredDocument>, AppError> {
    match handle_latest(&state, stream).await? {
        Some(document) => Ok(Json(document)),
        None => Err(AppError::NotFound(format!(
            "No {} data available yet",
            stream
        ))),
    }
}

async fn get_history(
    state: Arc<AppState>,
    stream: StreamKind,
    params: HistoryParams,
) -> Result<Json<HistoryResponse>, AppError> {
    let records = handle_history(&state, stream, params.limit).await?;
    Ok(Json(HistoryResponse {
        total: records.len(),
        records,
    }))
}

async fn post_run(state: Arc<AppState>, stream: StreamKind) -> Response {
    let Some(outcome) = handle_run(&state, stream).await else {
        return AppError::NotFound(format!("No pipeline for {}", stream)).into_response();
    };
    let status = if outcome.is_failure() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    let body = RunResponse {
        stream: stream.id(),
        outcome,
    };
    (status, Json(body)).into_response()
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// One static route set per stream with a pipeline.
pub fn create_results_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new().route("/etl", get(get_index));

    for stream in state.streams() {
        let id = stream.id();
        router = router
            .route(
                &format!("/{}", id),
                get(move |State(state): State<Arc<AppState>>| get_latest(state, stream)),
            )
            .route(
                &format!("/{}/history", id),
                get(
                    move |State(state): State<Arc<AppState>>, Query(params): Query<HistoryParams>| {
                        get_history(state, stream, params)
                    },
                ),
            )
            .route(
                &format!("/{}/run-etl", id),
                post(move |State(state): State<Arc<AppState>>| post_run(state, stream)),
            );
    }

    router.with_state(state)
}
