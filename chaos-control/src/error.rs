use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use shared_types::ApiResponse;
use tracing::error;

use crate::health::HealthError;
use crate::store::StoreError;
use crate::workflow::WorkflowError;

/// Errors surfaced by control-plane operations.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("Workflow engine error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Health provider error: {0}")]
    Health(#[from] HealthError),
}

impl ControlError {
    pub fn experiment_not_found(experiment_id: &str) -> Self {
        ControlError::NotFound(format!("Experiment not found: {experiment_id}"))
    }

    pub fn result_not_found(result_id: &str) -> Self {
        ControlError::NotFound(format!("Result not found: {result_id}"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ControlError::Validation(_) => StatusCode::BAD_REQUEST,
            ControlError::NotFound(_) => StatusCode::NOT_FOUND,
            ControlError::Store(_) | ControlError::Workflow(_) | ControlError::Health(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status.is_server_error() {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ApiResponse::<()>::failure(message))).into_response()
    }
}
