use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::Json;
use shared_types::{Analytics, ApiResponse, ExperimentResult, ResultQueryParams};

use crate::error::ControlError;
use crate::AppState;

/// GET /api/v1/results
pub async fn list_results(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ResultQueryParams>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<ExperimentResult>>>, ControlError> {
    let Query(params) = query?;
    let results = state.orchestrator.list_results(&params).await?;
    Ok(Json(ApiResponse::ok(results)))
}

/// GET /api/v1/results/{id}
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ExperimentResult>>, ControlError> {
    Ok(Json(ApiResponse::ok(state.orchestrator.get_result(&id).await?)))
}

/// GET /api/v1/analytics
pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<Analytics>>, ControlError> {
    Ok(Json(ApiResponse::ok(state.orchestrator.analytics().await?)))
}
