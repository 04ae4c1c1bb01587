use std::sync::Arc;

use serde::Serialize;
use shared_types::{Experiment, ExperimentMetadata, ExperimentStep};
use tracing::debug;

use super::{ExecutionDescription, WorkflowEngine, WorkflowError};
use crate::config::FleetConfig;
use crate::steps::reconstruct_steps;

/// Upper bound on history events fetched for step reconstruction.
pub const MAX_HISTORY_EVENTS: u32 = 100;

/// How many recent executions are searched when resolving one by name.
const NAME_LOOKUP_LIMIT: u32 = 100;

/// Input handed to every chaos-plan execution.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionInput {
    pub experiment_id: String,
    /// The experiment's target; the plan acts on this group.
    pub auto_scaling_group_name: String,
    /// Capacity group the control plane is configured to watch.
    pub capacity_group_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_arn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_group_arn: Option<String>,
    pub expected_healthy_instances: u32,
    pub dry_run: bool,
    pub failure_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExperimentMetadata>,
}

/// Experiment-level operations over the workflow engine: executions are named
/// after experiment ids and always started from the same definition.
#[derive(Clone)]
pub struct WorkflowControl {
    engine: Arc<dyn WorkflowEngine>,
    definition: String,
    fleet: FleetConfig,
}

impl WorkflowControl {
    pub fn new(engine: Arc<dyn WorkflowEngine>, definition: impl Into<String>, fleet: FleetConfig) -> Self {
        Self {
            engine,
            definition: definition.into(),
            fleet,
        }
    }

    pub fn execution_input(&self, experiment: &Experiment) -> ExecutionInput {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        ExecutionInput {
            experiment_id: experiment.experiment_id.clone(),
            auto_scaling_group_name: experiment.target_id.clone(),
            capacity_group_name: self.fleet.capacity_group_name.clone(),
            load_balancer_arn: non_empty(&self.fleet.load_balancer_arn),
            target_group_arn: non_empty(&self.fleet.target_group_arn),
            expected_healthy_instances: experiment.configuration.expected_healthy_instances,
            dry_run: experiment.configuration.dry_run,
            failure_type: experiment.configuration.failure_type.clone(),
            metadata: experiment.metadata.clone(),
        }
    }

    /// Start the experiment's execution; returns the execution reference.
    pub async fn start_experiment(&self, experiment: &Experiment) -> Result<String, WorkflowError> {
        let input = serde_json::to_value(self.execution_input(experiment))?;
        self.engine
            .start(&self.definition, &experiment.experiment_id, input)
            .await
    }

    /// The experiment's execution reference: the stored one, or for records
    /// written before references were stored, a lookup by execution name.
    ///
    /// Terminal records without a reference never started and are not looked
    /// up, since a same-named execution would belong to someone else.
    pub async fn resolve(&self, experiment: &Experiment) -> Result<Option<String>, WorkflowError> {
        if let Some(execution_ref) = &experiment.execution_ref {
            return Ok(Some(execution_ref.clone()));
        }
        if experiment.status.is_terminal() {
            return Ok(None);
        }
        self.find_by_name(&experiment.experiment_id).await
    }

    pub async fn find_by_name(&self, name: &str) -> Result<Option<String>, WorkflowError> {
        let executions = self.engine.list(&self.definition, NAME_LOOKUP_LIMIT).await?;
        let found = executions
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.execution_ref);
        debug!(name, found = found.is_some(), "execution lookup by name");
        Ok(found)
    }

    pub async fn describe(&self, execution_ref: &str) -> Result<ExecutionDescription, WorkflowError> {
        self.engine.describe(execution_ref).await
    }

    pub async fn stop(&self, execution_ref: &str, cause: &str) -> Result<(), WorkflowError> {
        self.engine.stop(execution_ref, cause).await
    }

    /// Step timeline of an execution, from its first [`MAX_HISTORY_EVENTS`] events.
    pub async fn steps(&self, execution_ref: &str) -> Result<Vec<ExperimentStep>, WorkflowError> {
        let events = self
            .engine
            .get_history(execution_ref, MAX_HISTORY_EVENTS, true)
            .await?;
        Ok(reconstruct_steps(&events))
    }
}
