use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use shared_types::{ApiResponse, SystemHealth};

use crate::AppState;

/// GET /api/v1/system/health: always 200; an unreachable provider shows up
/// as a critical report
pub async fn get_system_health(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SystemHealth>> {
    Json(ApiResponse::ok(state.orchestrator.system_health().await))
}
