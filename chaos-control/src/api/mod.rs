//! HTTP API for the chaos control plane
//!
//! Every route under `/api/v1` answers with the `{success, data, message?, error?}`
//! envelope. `/health` is a bare liveness probe.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

pub mod experiments;
pub mod results;
pub mod system;

use crate::error::ControlError;
use crate::middleware::acting_identity;
use crate::AppState;

/// Configure all API routes
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/v1/experiments",
            post(experiments::create_experiment).get(experiments::list_experiments),
        )
        .route(
            "/api/v1/experiments/{id}",
            get(experiments::get_experiment).delete(experiments::delete_experiment),
        )
        .route(
            "/api/v1/experiments/{id}/status",
            get(experiments::get_experiment_status),
        )
        .route("/api/v1/experiments/{id}/stop", post(experiments::stop_experiment))
        .route("/api/v1/experiments/{id}/steps", get(experiments::get_experiment_steps))
        .route(
            "/api/v1/experiments/{id}/monitor",
            get(experiments::monitor_experiment),
        )
        .route("/api/v1/results", get(results::list_results))
        .route("/api/v1/results/{id}", get(results::get_result))
        .route("/api/v1/analytics", get(results::get_analytics))
        .route("/api/v1/system/health", get(system::get_system_health))
        .layer(from_fn(acting_identity))
        .route("/health", get(health_check))
}

/// Liveness probe
pub async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "chaos-control",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

impl From<JsonRejection> for ControlError {
    fn from(rejection: JsonRejection) -> Self {
        ControlError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ControlError {
    fn from(rejection: QueryRejection) -> Self {
        ControlError::Validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}
