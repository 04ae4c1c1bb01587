//! Experiment lifecycle.
//!
//! The orchestrator owns an experiment's status. The record store mirrors it
//! durably; the workflow engine runs the failure-injection plan on its own
//! schedule and is only polled, never pushed to us. Status moves
//! PENDING → {RUNNING, FAILED} → {COMPLETED, FAILED} and never leaves a
//! terminal state.

use chrono::Utc;
use serde_json::Value;
use shared_types::{
    dated_id, iso_timestamp, parse_timestamp, Analytics, CreateExperimentRequest, Experiment,
    ExperimentMonitorView, ExperimentQueryParams, ExperimentResult, ExperimentStatus,
    ExperimentStep, MetricsSnapshot, ResultQueryParams, SystemHealth,
};
use tracing::{debug, info, warn};

use crate::analytics;
use crate::error::ControlError;
use crate::health::HealthMonitor;
use crate::query::QueryService;
use crate::steps::floor_seconds;
use crate::store::{ExperimentRepository, ExperimentUpdate, Transition};
use crate::workflow::{ExecutionDescription, ExecutionStatus, WorkflowControl};

/// Identity recorded when the caller is anonymous.
pub const SYSTEM_IDENTITY: &str = "system@chaos-platform.com";
pub const DEFAULT_STOP_CAUSE: &str = "User requested stop";

/// Result id of an experiment: one result per experiment, so the id is derived
/// from the experiment id and writing it twice is harmless.
pub fn result_id_for(experiment_id: &str) -> String {
    format!(
        "res-{}",
        experiment_id.strip_prefix("exp-").unwrap_or(experiment_id)
    )
}

/// Experiment status an execution status settles into, if it is final.
fn settled_status(status: ExecutionStatus) -> Option<ExperimentStatus> {
    match status {
        ExecutionStatus::Running => None,
        ExecutionStatus::Succeeded => Some(ExperimentStatus::Completed),
        ExecutionStatus::Failed | ExecutionStatus::TimedOut | ExecutionStatus::Aborted => {
            Some(ExperimentStatus::Failed)
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct Orchestrator {
    repo: ExperimentRepository,
    workflow: WorkflowControl,
    health: HealthMonitor,
    query: QueryService,
}

impl Orchestrator {
    pub fn new(repo: ExperimentRepository, workflow: WorkflowControl, health: HealthMonitor) -> Self {
        Self {
            query: QueryService::new(repo.clone()),
            repo,
            workflow,
            health,
        }
    }

    /// Record a new experiment and start its execution.
    ///
    /// The record is persisted before anything is started. A failed start
    /// still returns the experiment, as FAILED.
    pub async fn create(
        &self,
        request: CreateExperimentRequest,
        identity: Option<&str>,
    ) -> Result<Experiment, ControlError> {
        let (Some(target_type), Some(target_id), Some(configuration)) = (
            non_blank(request.target_type.as_deref()),
            non_blank(request.target_id.as_deref()),
            request.configuration.as_ref(),
        ) else {
            return Err(ControlError::Validation(
                "Missing required fields: targetType, targetId, configuration".to_string(),
            ));
        };

        let now = Utc::now();
        let mut experiment = Experiment {
            experiment_id: dated_id("exp", now),
            status: ExperimentStatus::Pending,
            target_type: target_type.to_string(),
            target_id: target_id.to_string(),
            configuration: configuration.resolve(),
            start_time: iso_timestamp(now),
            end_time: None,
            duration: None,
            created_by: non_blank(identity).unwrap_or(SYSTEM_IDENTITY).to_string(),
            metadata: request.metadata,
            execution_ref: None,
        };

        self.repo.create_experiment(&experiment).await?;
        info!(
            experiment_id = %experiment.experiment_id,
            target_id = %experiment.target_id,
            created_by = %experiment.created_by,
            "experiment created"
        );

        match self.workflow.start_experiment(&experiment).await {
            Ok(execution_ref) => {
                info!(experiment_id = %experiment.experiment_id, execution_ref = %execution_ref, "execution started");
                experiment.status = ExperimentStatus::Running;
                experiment.execution_ref = Some(execution_ref);
            }
            Err(e) => {
                warn!(experiment_id = %experiment.experiment_id, error = %e, "execution failed to start");
                experiment.status = ExperimentStatus::Failed;
            }
        }

        // A poller may already have settled the record while the start was
        // being acknowledged; the stored status then wins.
        match self
            .repo
            .update_experiment(&experiment.experiment_id, ExperimentUpdate::from_record(&experiment))
            .await
        {
            Ok(Transition::Applied(stored)) => return Ok(stored),
            Ok(Transition::Refused(stored)) => {
                info!(
                    experiment_id = %stored.experiment_id,
                    status = %stored.status,
                    "experiment already advanced, keeping stored status"
                );
                return Ok(stored);
            }
            Ok(Transition::Missing) => warn!(
                experiment_id = %experiment.experiment_id,
                "experiment record gone before its status was saved"
            ),
            Err(e) => warn!(
                experiment_id = %experiment.experiment_id,
                status = %experiment.status,
                error = %e,
                "failed to persist experiment status"
            ),
        }

        Ok(experiment)
    }

    /// The stored record, as is.
    pub async fn get_status(&self, experiment_id: &str) -> Result<Experiment, ControlError> {
        self.repo
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| ControlError::experiment_not_found(experiment_id))
    }

    pub async fn list(&self, params: &ExperimentQueryParams) -> Result<Vec<Experiment>, ControlError> {
        Ok(self.query.list_experiments(params).await?)
    }

    /// Bring the record in line with its execution.
    ///
    /// A finished execution moves the record to its terminal status and
    /// produces the experiment's result. The result is written before the
    /// record: once the record is terminal it is never revisited.
    pub async fn reconcile(&self, experiment_id: &str) -> Result<Experiment, ControlError> {
        let mut experiment = self.get_status(experiment_id).await?;
        if experiment.status.is_terminal() {
            return Ok(experiment);
        }
        let Some(execution_ref) = self.resolve_execution(&experiment).await else {
            return Ok(experiment);
        };

        if experiment.status == ExperimentStatus::Pending || experiment.execution_ref.is_none() {
            experiment.status = ExperimentStatus::Running;
            experiment.execution_ref = Some(execution_ref.clone());
            match self
                .repo
                .update_experiment(experiment_id, ExperimentUpdate::from_record(&experiment))
                .await?
            {
                Transition::Applied(stored) => experiment = stored,
                Transition::Refused(stored) => return Ok(stored),
                Transition::Missing => return Err(ControlError::experiment_not_found(experiment_id)),
            }
        }

        let description = match self.workflow.describe(&execution_ref).await {
            Ok(description) => description,
            Err(e) => {
                warn!(experiment_id, execution_ref = %execution_ref, error = %e, "describe failed, record left unchanged");
                return Ok(experiment);
            }
        };
        let Some(status) = settled_status(description.status) else {
            return Ok(experiment);
        };

        let end = description.stop_date.unwrap_or_else(Utc::now);
        let end_time = iso_timestamp(end);
        let result = build_result(&experiment, &description, &end_time);
        self.repo.put_result(&result).await?;

        experiment.status = status;
        experiment.duration = Some(
            parse_timestamp(&experiment.start_time)
                .map(|start| floor_seconds(start, end))
                .unwrap_or(0),
        );
        experiment.end_time = Some(end_time);
        match self
            .repo
            .update_experiment(experiment_id, ExperimentUpdate::from_record(&experiment))
            .await?
        {
            Transition::Applied(stored) => {
                info!(
                    experiment_id,
                    status = %stored.status,
                    duration = stored.duration.unwrap_or(0),
                    result_id = %result.result_id,
                    "experiment finished"
                );
                Ok(stored)
            }
            Transition::Refused(stored) => {
                debug!(experiment_id, status = %stored.status, "experiment settled by another caller");
                Ok(stored)
            }
            Transition::Missing => Err(ControlError::experiment_not_found(experiment_id)),
        }
    }

    /// Ask the engine to stop the experiment's execution, then reconcile.
    ///
    /// Engine errors are logged and swallowed; the returned record reflects
    /// whatever the engine reports afterwards.
    pub async fn stop(
        &self,
        experiment_id: &str,
        cause: Option<&str>,
    ) -> Result<Experiment, ControlError> {
        let experiment = self.get_status(experiment_id).await?;
        if experiment.status.is_terminal() {
            debug!(experiment_id, status = %experiment.status, "stop ignored, experiment already finished");
            return Ok(experiment);
        }
        self.signal_stop(&experiment, non_blank(cause).unwrap_or(DEFAULT_STOP_CAUSE))
            .await;
        self.reconcile(experiment_id).await
    }

    /// Delete the record, stopping a running execution first. Results are kept.
    pub async fn delete(&self, experiment_id: &str) -> Result<(), ControlError> {
        let experiment = self.get_status(experiment_id).await?;
        if !experiment.status.is_terminal() {
            self.signal_stop(&experiment, "Experiment deleted").await;
        }
        self.repo.delete_experiment(experiment_id).await?;
        info!(experiment_id, "experiment deleted");
        Ok(())
    }

    /// Step timeline of the experiment's execution. Empty when the execution
    /// never started or its history cannot be read.
    pub async fn steps(&self, experiment_id: &str) -> Result<Vec<ExperimentStep>, ControlError> {
        let experiment = self.get_status(experiment_id).await?;
        Ok(self.steps_of(&experiment).await)
    }

    /// Reconciled record, step timeline and live fleet health in one view.
    pub async fn monitor(&self, experiment_id: &str) -> Result<ExperimentMonitorView, ControlError> {
        let experiment = self.reconcile(experiment_id).await?;
        let steps = self.steps_of(&experiment).await;
        let system_health = self.health.check().await;
        Ok(ExperimentMonitorView {
            experiment,
            steps,
            system_health,
        })
    }

    pub async fn system_health(&self) -> SystemHealth {
        self.health.check().await
    }

    pub async fn list_results(
        &self,
        params: &ResultQueryParams,
    ) -> Result<Vec<ExperimentResult>, ControlError> {
        Ok(self.query.list_results(params).await?)
    }

    pub async fn get_result(&self, result_id: &str) -> Result<ExperimentResult, ControlError> {
        self.repo
            .get_result(result_id)
            .await?
            .ok_or_else(|| ControlError::result_not_found(result_id))
    }

    pub async fn analytics(&self) -> Result<Analytics, ControlError> {
        Ok(analytics::load(&self.repo, Utc::now()).await?)
    }

    async fn resolve_execution(&self, experiment: &Experiment) -> Option<String> {
        match self.workflow.resolve(experiment).await {
            Ok(found) => found,
            Err(e) => {
                warn!(experiment_id = %experiment.experiment_id, error = %e, "execution lookup failed");
                None
            }
        }
    }

    async fn signal_stop(&self, experiment: &Experiment, cause: &str) {
        let Some(execution_ref) = self.resolve_execution(experiment).await else {
            warn!(experiment_id = %experiment.experiment_id, "no execution to stop");
            return;
        };
        match self.workflow.stop(&execution_ref, cause).await {
            Ok(()) => info!(experiment_id = %experiment.experiment_id, cause, "stop requested"),
            Err(e) => warn!(
                experiment_id = %experiment.experiment_id,
                execution_ref = %execution_ref,
                error = %e,
                "stop request failed"
            ),
        }
    }

    async fn steps_of(&self, experiment: &Experiment) -> Vec<ExperimentStep> {
        let Some(execution_ref) = self.resolve_execution(experiment).await else {
            return Vec::new();
        };
        match self.workflow.steps(&execution_ref).await {
            Ok(steps) => steps,
            Err(e) => {
                warn!(experiment_id = %experiment.experiment_id, error = %e, "history unavailable");
                Vec::new()
            }
        }
    }
}

/// Result of a finished execution, read from its output where present.
fn build_result(
    experiment: &Experiment,
    description: &ExecutionDescription,
    timestamp: &str,
) -> ExperimentResult {
    let output = description.output.clone().unwrap_or(Value::Null);
    let succeeded = description.status == ExecutionStatus::Succeeded
        && output.get("success").and_then(Value::as_bool) != Some(false);

    let mut logs: Vec<String> = output
        .get("logs")
        .and_then(Value::as_array)
        .map(|lines| {
            lines
                .iter()
                .filter_map(|line| line.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    if !succeeded {
        if let Some(cause) = output.get("cause").and_then(Value::as_str) {
            logs.push(format!("execution ended: {cause}"));
        }
    }

    ExperimentResult {
        result_id: result_id_for(&experiment.experiment_id),
        experiment_id: experiment.experiment_id.clone(),
        timestamp: timestamp.to_string(),
        success: succeeded,
        target_instance: output
            .get("targetInstance")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
        recovery_time: output
            .get("recoveryTime")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
        metrics_snapshot: output
            .get("metricsSnapshot")
            .and_then(|snapshot| serde_json::from_value::<MetricsSnapshot>(snapshot.clone()).ok())
            .unwrap_or_default(),
        logs,
        step_function_output: description.output.clone(),
    }
}
