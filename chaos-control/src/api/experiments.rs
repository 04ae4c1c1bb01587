use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use shared_types::{
    ApiResponse, CreateExperimentRequest, Experiment, ExperimentMonitorView,
    ExperimentQueryParams, ExperimentStep, StopExperimentRequest,
};

use crate::error::ControlError;
use crate::middleware::ActingIdentity;
use crate::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, ControlError>;

/// POST /api/v1/experiments
pub async fn create_experiment(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<ActingIdentity>,
    body: Result<Json<CreateExperimentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Experiment>>), ControlError> {
    let Json(request) = body?;
    let experiment = state
        .orchestrator
        .create(request, identity.as_deref())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(experiment).with_message("Experiment started successfully")),
    ))
}

/// GET /api/v1/experiments
pub async fn list_experiments(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ExperimentQueryParams>, QueryRejection>,
) -> ApiResult<Vec<Experiment>> {
    let Query(params) = query?;
    let experiments = state.orchestrator.list(&params).await?;
    Ok(Json(ApiResponse::ok(experiments)))
}

/// GET /api/v1/experiments/{id}
pub async fn get_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Experiment> {
    Ok(Json(ApiResponse::ok(state.orchestrator.get_status(&id).await?)))
}

/// GET /api/v1/experiments/{id}/status, reconciled against the execution
pub async fn get_experiment_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Experiment> {
    Ok(Json(ApiResponse::ok(state.orchestrator.reconcile(&id).await?)))
}

/// POST /api/v1/experiments/{id}/stop: body `{"cause": "..."}` is optional
pub async fn stop_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Experiment> {
    let request: StopExperimentRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StopExperimentRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ControlError::Validation(format!("Invalid request body: {e}")))?
    };
    let experiment = state
        .orchestrator
        .stop(&id, request.cause.as_deref())
        .await?;
    Ok(Json(
        ApiResponse::ok(experiment).with_message("Experiment stop requested"),
    ))
}

/// DELETE /api/v1/experiments/{id}
pub async fn delete_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<()> {
    state.orchestrator.delete(&id).await?;
    Ok(Json(ApiResponse::ok(()).with_message("Experiment deleted")))
}

/// GET /api/v1/experiments/{id}/steps
pub async fn get_experiment_steps(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ExperimentStep>> {
    Ok(Json(ApiResponse::ok(state.orchestrator.steps(&id).await?)))
}

/// GET /api/v1/experiments/{id}/monitor
pub async fn monitor_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ExperimentMonitorView> {
    Ok(Json(ApiResponse::ok(state.orchestrator.monitor(&id).await?)))
}
