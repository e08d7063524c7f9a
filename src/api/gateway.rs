//! Sensor gateway.
//!
//! `POST /gateway/:sensor_id` with a JSON object carrying a `token` field and
//! attribute values. The token is checked and stripped, and the remaining
//! fields are forwarded to the broker as an attribute patch of `sensor_id`.

use super::{AppError, AppState};
use crate::broker::validate_entity_id;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a reading that passed validation.
#[derive(Debug, PartialEq)]
pub enum Forwarded {
    Patched,
    /// Accepted but the broker call failed
    NotForwarded(String),
}

/// Validates a sensor reading and strips the token.
fn validate(body: &[u8], expected_token: &str) -> Result<Map<String, Value>, AppError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid JSON: {}", e)))?;
    let Value::Object(mut attrs) = value else {
        return Err(AppError::BadRequest(
            "Request body is not a JSON object".to_string(),
        ));
    };

    match attrs.remove("token") {
        Some(Value::String(token)) if token == expected_token => Ok(attrs),
        _ => Err(AppError::Unauthorized(
            "Invalid authentication token".to_string(),
        )),
    }
}

pub(crate) async fn handle_reading(
    state: &AppState,
    sensor_id: &str,
    body: &[u8],
) -> Result<Forwarded, AppError> {
    let Some(expected) = state.gateway_token.as_deref() else {
        return Err(AppError::NotFound("Gateway is disabled".to_string()));
    };
    validate_entity_id(sensor_id).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let attrs = match validate(body, expected) {
        Ok(attrs) => attrs,
        Err(e) => {
            warn!(sensor_id = %sensor_id, "Rejected sensor reading");
            return Err(e);
        }
    };

    match state
        .reconcile
        .broker()
        .patch_entity_attrs(sensor_id, &attrs)
        .await
    {
        Ok(()) => {
            info!(sensor_id = %sensor_id, attrs = attrs.len(), "Forwarded sensor reading");
            Ok(Forwarded::Patched)
        }
        Err(e) => {
            warn!(sensor_id = %sensor_id, error = %e, "Failed to forward sensor reading");
            Ok(Forwarded::NotForwarded(e.to_string()))
        }
    }
}

async fn post_reading(
    State(state): State<Arc<AppState>>,
    Path(sensor_id): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    let response = match handle_reading(&state, &sensor_id, &body).await? {
        Forwarded::Patched => (
            StatusCode::OK,
            Json(json!({"message": "Reading received and forwarded"})),
        )
            .into_response(),
        Forwarded::NotForwarded(error) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "message": "Reading received, but forwarding failed",
                "error": error,
            })),
        )
            .into_response(),
    };
    Ok(response)
}

pub fn create_gateway_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/gateway/:sensor_id", post(post_reading))
        .with_state(state)
}
