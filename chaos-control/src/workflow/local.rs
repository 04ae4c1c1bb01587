//! In-process workflow engine.
//!
//! Runs the chaos plan against a [`SimulatedFleet`] on a tokio task per
//! execution and records history in the same vocabulary a managed
//! state-machine service uses, so everything downstream (step reconstruction,
//! reconciliation) sees no difference.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use shared_types::DEFAULT_EXPECTED_HEALTHY_INSTANCES;
use tokio::{sync::Mutex, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

use super::{
    ExecutionDescription, ExecutionStatus, ExecutionSummary, HistoryEvent, HistoryEventType,
    TaskFailedDetails, WorkflowEngine, WorkflowError,
};
use crate::fleet::SimulatedFleet;

/// One state of the chaos plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStep {
    ValidatePreHealth,
    GetTargetInstance,
    InjectFailure,
    WaitForRecovery,
    ValidatePostHealth,
}

impl PlanStep {
    pub fn name(self) -> &'static str {
        match self {
            PlanStep::ValidatePreHealth => "ValidatePreHealth",
            PlanStep::GetTargetInstance => "GetTargetInstance",
            PlanStep::InjectFailure => "InjectFailure",
            PlanStep::WaitForRecovery => "WaitForRecovery",
            PlanStep::ValidatePostHealth => "ValidatePostHealth",
        }
    }
}

/// States executed, in order, for every experiment.
pub const CHAOS_PLAN: [PlanStep; 5] = [
    PlanStep::ValidatePreHealth,
    PlanStep::GetTargetInstance,
    PlanStep::InjectFailure,
    PlanStep::WaitForRecovery,
    PlanStep::ValidatePostHealth,
];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanInput {
    #[serde(default)]
    experiment_id: String,
    #[serde(default)]
    auto_scaling_group_name: String,
    #[serde(default = "default_expected_healthy")]
    expected_healthy_instances: u32,
    #[serde(default)]
    dry_run: bool,
}

fn default_expected_healthy() -> u32 {
    DEFAULT_EXPECTED_HEALTHY_INSTANCES
}

struct Execution {
    definition: String,
    description: ExecutionDescription,
    history: Vec<HistoryEvent>,
    task: Option<JoinHandle<()>>,
}

impl Execution {
    fn next_event(&self, event_type: HistoryEventType) -> HistoryEvent {
        HistoryEvent::new(
            self.history.len() as i64 + 1,
            self.history.last().map(|e| e.id),
            event_type,
            Utc::now(),
        )
    }

    fn finish(
        &mut self,
        status: ExecutionStatus,
        event_type: HistoryEventType,
        output: Option<serde_json::Value>,
    ) {
        let event = self.next_event(event_type);
        self.history.push(event);
        self.description.status = status;
        self.description.stop_date = Some(Utc::now());
        self.description.output = output;
    }
}

type Executions = Arc<Mutex<HashMap<String, Execution>>>;

/// Finished executions kept for describe and history; older ones are dropped
/// as new executions start.
pub const DEFAULT_RETAINED_EXECUTIONS: usize = 500;

/// Drop the oldest finished executions beyond `retain`. Running executions
/// are never dropped.
fn evict_finished(executions: &mut HashMap<String, Execution>, retain: usize) {
    let mut finished: Vec<_> = executions
        .iter()
        .filter(|(_, e)| e.description.status.is_terminal())
        .map(|(execution_ref, e)| (e.description.stop_date, execution_ref.clone()))
        .collect();
    if finished.len() <= retain {
        return;
    }
    finished.sort();
    let excess = finished.len() - retain;
    for (_, execution_ref) in finished.into_iter().take(excess) {
        executions.remove(&execution_ref);
        debug!(execution_ref = %execution_ref, "finished execution evicted");
    }
}

/// Reference of execution `name` of `definition`.
pub fn execution_ref_for(definition: &str, name: &str) -> String {
    if definition.contains(":stateMachine:") {
        format!("{}:{name}", definition.replacen(":stateMachine:", ":execution:", 1))
    } else {
        format!("{definition}:{name}")
    }
}

pub struct LocalWorkflowEngine {
    fleet: Arc<SimulatedFleet>,
    step_interval: Duration,
    retained: usize,
    executions: Executions,
}

impl LocalWorkflowEngine {
    pub fn new(fleet: Arc<SimulatedFleet>, step_interval: Duration) -> Self {
        Self {
            fleet,
            step_interval,
            retained: DEFAULT_RETAINED_EXECUTIONS,
            executions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_retention(mut self, retained: usize) -> Self {
        self.retained = retained;
        self
    }
}

#[async_trait]
impl WorkflowEngine for LocalWorkflowEngine {
    async fn start(
        &self,
        definition: &str,
        name: &str,
        input: serde_json::Value,
    ) -> Result<String, WorkflowError> {
        let plan_input: PlanInput = serde_json::from_value(input.clone())?;
        let execution_ref = execution_ref_for(definition, name);

        let mut executions = self.executions.lock().await;
        if executions.contains_key(&execution_ref) {
            return Err(WorkflowError::ExecutionAlreadyExists(name.to_string()));
        }
        evict_finished(&mut executions, self.retained);

        let mut execution = Execution {
            definition: definition.to_string(),
            description: ExecutionDescription {
                execution_ref: execution_ref.clone(),
                name: name.to_string(),
                status: ExecutionStatus::Running,
                start_date: Utc::now(),
                stop_date: None,
                input,
                output: None,
            },
            history: Vec::new(),
            task: None,
        };
        let started = execution.next_event(HistoryEventType::ExecutionStarted);
        execution.history.push(started);

        let run = PlanRun {
            executions: self.executions.clone(),
            fleet: self.fleet.clone(),
            step_interval: self.step_interval,
            execution_ref: execution_ref.clone(),
            input: plan_input,
            logs: Vec::new(),
            target: None,
            injected_at: None,
            recovery_time: 0.0,
        };
        execution.task = Some(tokio::spawn(run.run()));
        executions.insert(execution_ref.clone(), execution);

        info!(execution_ref = %execution_ref, "local execution started");
        Ok(execution_ref)
    }

    async fn describe(&self, execution: &str) -> Result<ExecutionDescription, WorkflowError> {
        let executions = self.executions.lock().await;
        executions
            .get(execution)
            .map(|e| e.description.clone())
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution.to_string()))
    }

    async fn stop(&self, execution: &str, cause: &str) -> Result<(), WorkflowError> {
        let mut executions = self.executions.lock().await;
        let entry = executions
            .get_mut(execution)
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution.to_string()))?;
        if entry.description.status.is_terminal() {
            return Ok(());
        }
        if let Some(task) = entry.task.take() {
            task.abort();
        }
        entry.finish(
            ExecutionStatus::Aborted,
            HistoryEventType::ExecutionAborted,
            Some(json!({ "success": false, "error": "Aborted", "cause": cause })),
        );
        info!(execution_ref = %execution, cause, "local execution aborted");
        Ok(())
    }

    async fn get_history(
        &self,
        execution: &str,
        max_events: u32,
        ascending: bool,
    ) -> Result<Vec<HistoryEvent>, WorkflowError> {
        let executions = self.executions.lock().await;
        let entry = executions
            .get(execution)
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution.to_string()))?;
        let mut history = entry.history.clone();
        if !ascending {
            history.reverse();
        }
        history.truncate(max_events as usize);
        Ok(history)
    }

    async fn list(
        &self,
        definition: &str,
        max_results: u32,
    ) -> Result<Vec<ExecutionSummary>, WorkflowError> {
        let executions = self.executions.lock().await;
        let mut summaries: Vec<ExecutionSummary> = executions
            .values()
            .filter(|e| e.definition == definition)
            .map(|e| ExecutionSummary {
                execution_ref: e.description.execution_ref.clone(),
                name: e.description.name.clone(),
                status: e.description.status,
                start_date: e.description.start_date,
                stop_date: e.description.stop_date,
            })
            .collect();
        summaries.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        summaries.truncate(max_results as usize);
        Ok(summaries)
    }
}

struct StepFailure {
    error: &'static str,
    cause: String,
}

impl StepFailure {
    fn new(error: &'static str, cause: impl Into<String>) -> Self {
        Self {
            error,
            cause: cause.into(),
        }
    }
}

/// Drives one execution through the plan. Stops quietly as soon as the
/// execution is no longer running.
struct PlanRun {
    executions: Executions,
    fleet: Arc<SimulatedFleet>,
    step_interval: Duration,
    execution_ref: String,
    input: PlanInput,
    logs: Vec<String>,
    target: Option<String>,
    injected_at: Option<Instant>,
    recovery_time: f64,
}

impl PlanRun {
    async fn run(mut self) {
        for step in CHAOS_PLAN {
            let Some(entered_id) = self.enter(step).await else {
                return;
            };
            tokio::time::sleep(self.step_interval).await;
            match self.perform(step).await {
                Ok(output) => {
                    if !self.exit(step, output).await {
                        return;
                    }
                }
                Err(failure) => {
                    self.fail(entered_id, step, failure).await;
                    return;
                }
            }
        }
        self.succeed().await;
    }

    async fn perform(&mut self, step: PlanStep) -> Result<serde_json::Value, StepFailure> {
        match step {
            PlanStep::ValidatePreHealth => {
                if self.input.auto_scaling_group_name != self.fleet.group_name() {
                    return Err(StepFailure::new(
                        "CapacityGroupNotFound",
                        format!("no capacity group named {}", self.input.auto_scaling_group_name),
                    ));
                }
                let healthy = self.fleet.healthy_count().await;
                self.logs.push(format!("pre-check: {healthy} healthy instances"));
                if healthy < self.input.expected_healthy_instances {
                    return Err(StepFailure::new(
                        "InsufficientHealthyInstances",
                        format!(
                            "{healthy} healthy, {} expected",
                            self.input.expected_healthy_instances
                        ),
                    ));
                }
                Ok(json!({ "healthyInstances": healthy }))
            }
            PlanStep::GetTargetInstance => {
                let target = self
                    .fleet
                    .pick_target()
                    .await
                    .ok_or_else(|| StepFailure::new("NoTargetInstance", "no healthy instance to target"))?;
                self.logs.push(format!("selected target {target}"));
                self.target = Some(target.clone());
                Ok(json!({ "instanceId": target }))
            }
            PlanStep::InjectFailure => {
                let target = self.target.clone().unwrap_or_default();
                self.injected_at = Some(Instant::now());
                if self.input.dry_run {
                    self.logs.push(format!("dry run: skipped termination of {target}"));
                    return Ok(json!({ "instanceId": target, "dryRun": true }));
                }
                let replacement = self.fleet.terminate(&target).await.ok_or_else(|| {
                    StepFailure::new("TerminationFailed", format!("{target} is no longer a member"))
                })?;
                self.logs.push(format!("terminated {target}, replacement {replacement}"));
                Ok(json!({ "instanceId": target, "replacement": replacement }))
            }
            PlanStep::WaitForRecovery => {
                let recovered = self.fleet.recover().await;
                self.recovery_time = self
                    .injected_at
                    .map(|at| at.elapsed().as_secs_f64())
                    .unwrap_or_default();
                self.logs.push(format!(
                    "{recovered} instances recovered after {:.1}s",
                    self.recovery_time
                ));
                Ok(json!({ "recoveryTime": self.recovery_time }))
            }
            PlanStep::ValidatePostHealth => {
                let healthy = self.fleet.healthy_count().await;
                self.logs.push(format!("post-check: {healthy} healthy instances"));
                if healthy < self.input.expected_healthy_instances {
                    return Err(StepFailure::new(
                        "RecoveryIncomplete",
                        format!(
                            "{healthy} healthy, {} expected",
                            self.input.expected_healthy_instances
                        ),
                    ));
                }
                Ok(json!({ "healthyInstances": healthy }))
            }
        }
    }

    /// Append `build`'s event while the execution is still running.
    async fn record(&self, build: impl FnOnce(&Execution) -> HistoryEvent) -> Option<i64> {
        let mut executions = self.executions.lock().await;
        let execution = executions.get_mut(&self.execution_ref)?;
        if execution.description.status.is_terminal() {
            return None;
        }
        let event = build(execution);
        let id = event.id;
        execution.history.push(event);
        Some(id)
    }

    async fn enter(&self, step: PlanStep) -> Option<i64> {
        self.record(|execution| {
            let next = execution.next_event(HistoryEventType::TaskStateEntered);
            HistoryEvent::entered(next.id, next.timestamp, step.name())
        })
        .await
    }

    async fn exit(&self, step: PlanStep, output: serde_json::Value) -> bool {
        self.record(|execution| {
            let next = execution.next_event(HistoryEventType::TaskStateExited);
            HistoryEvent::exited(next.id, next.timestamp, step.name(), Some(output.to_string()))
        })
        .await
        .is_some()
    }

    async fn fail(&self, entered_id: i64, step: PlanStep, failure: StepFailure) {
        warn!(
            execution_ref = %self.execution_ref,
            experiment_id = %self.input.experiment_id,
            step = step.name(),
            error = failure.error,
            cause = %failure.cause,
            "chaos plan step failed"
        );
        let mut logs = self.logs.clone();
        logs.push(format!("{} failed: {}", step.name(), failure.cause));
        let output = json!({
            "success": false,
            "error": failure.error,
            "cause": failure.cause,
            "targetInstance": self.target,
            "logs": logs,
        });

        let mut executions = self.executions.lock().await;
        let Some(execution) = executions.get_mut(&self.execution_ref) else {
            return;
        };
        if execution.description.status.is_terminal() {
            return;
        }
        let mut event = execution.next_event(HistoryEventType::TaskFailed);
        event.previous_event_id = Some(entered_id);
        event.task_failed_event_details = Some(TaskFailedDetails {
            error: Some(failure.error.to_string()),
            cause: Some(failure.cause.clone()),
        });
        execution.history.push(event);
        execution.task = None;
        execution.finish(
            ExecutionStatus::Failed,
            HistoryEventType::ExecutionFailed,
            Some(output),
        );
    }

    async fn succeed(&self) {
        let healthy = self.fleet.healthy_count().await;
        let output = json!({
            "success": true,
            "experimentId": self.input.experiment_id,
            "dryRun": self.input.dry_run,
            "targetInstance": self.target,
            "recoveryTime": self.recovery_time,
            "metricsSnapshot": {
                "healthyHostCount": healthy,
                "responseTime": 0.0,
                "errorRate": 0.0,
            },
            "logs": self.logs,
        });

        let mut executions = self.executions.lock().await;
        let Some(execution) = executions.get_mut(&self.execution_ref) else {
            return;
        };
        if execution.description.status.is_terminal() {
            return;
        }
        execution.task = None;
        execution.finish(
            ExecutionStatus::Succeeded,
            HistoryEventType::ExecutionSucceeded,
            Some(output),
        );
        info!(execution_ref = %self.execution_ref, "local execution succeeded");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = "arn:local:states:local:000000000000:stateMachine:chaos-experiment";

    fn engine(fleet_size: u32, step_interval: Duration) -> LocalWorkflowEngine {
        LocalWorkflowEngine::new(SimulatedFleet::new("asg-local", fleet_size), step_interval)
    }

    fn input(dry_run: bool, expected: u32) -> serde_json::Value {
        json!({
            "experimentId": "exp-2026-01-01-abcdef12",
            "autoScalingGroupName": "asg-local",
            "expectedHealthyInstances": expected,
            "dryRun": dry_run,
        })
    }

    async fn wait_terminal(engine: &LocalWorkflowEngine, execution: &str) -> ExecutionDescription {
        for _ in 0..200 {
            let description = engine.describe(execution).await.unwrap();
            if description.status.is_terminal() {
                return description;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("execution {execution} never finished");
    }

    #[test]
    fn test_execution_ref_derivation() {
        assert_eq!(
            execution_ref_for(DEFINITION, "exp-1"),
            "arn:local:states:local:000000000000:execution:chaos-experiment:exp-1"
        );
        assert_eq!(execution_ref_for("plain", "exp-1"), "plain:exp-1");
    }

    #[tokio::test]
    async fn test_plan_succeeds_and_records_history() {
        let engine = engine(3, Duration::ZERO);
        let execution = engine.start(DEFINITION, "exp-1", input(false, 2)).await.unwrap();

        let description = wait_terminal(&engine, &execution).await;
        assert_eq!(description.status, ExecutionStatus::Succeeded);
        let output = description.output.unwrap();
        assert_eq!(output["success"], json!(true));
        assert!(output["targetInstance"].is_string());

        let history = engine.get_history(&execution, 100, true).await.unwrap();
        let entered: Vec<_> = history
            .iter()
            .filter_map(|e| e.state_entered_event_details.as_ref())
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(
            entered,
            CHAOS_PLAN.iter().map(|s| s.name()).collect::<Vec<_>>()
        );
        assert_eq!(history.first().unwrap().event_type, HistoryEventType::ExecutionStarted);
        assert_eq!(history.last().unwrap().event_type, HistoryEventType::ExecutionSucceeded);
    }

    #[tokio::test]
    async fn test_pre_health_failure_links_task_failed_to_state() {
        let engine = engine(1, Duration::ZERO);
        let execution = engine.start(DEFINITION, "exp-2", input(false, 2)).await.unwrap();

        let description = wait_terminal(&engine, &execution).await;
        assert_eq!(description.status, ExecutionStatus::Failed);

        let history = engine.get_history(&execution, 100, true).await.unwrap();
        let failed = history
            .iter()
            .find(|e| e.event_type == HistoryEventType::TaskFailed)
            .unwrap();
        let predecessor = history
            .iter()
            .find(|e| Some(e.id) == failed.previous_event_id)
            .unwrap();
        assert_eq!(
            predecessor.state_entered_event_details.as_ref().unwrap().name,
            "ValidatePreHealth"
        );
    }

    #[tokio::test]
    async fn test_dry_run_leaves_fleet_untouched() {
        let fleet = SimulatedFleet::new("asg-local", 2);
        let engine = LocalWorkflowEngine::new(fleet.clone(), Duration::ZERO);
        let before = fleet.pick_target().await;
        let execution = engine.start(DEFINITION, "exp-3", input(true, 2)).await.unwrap();

        let description = wait_terminal(&engine, &execution).await;
        assert_eq!(description.status, ExecutionStatus::Succeeded);
        assert_eq!(fleet.pick_target().await, before);
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let engine = engine(3, Duration::from_secs(60));
        engine.start(DEFINITION, "exp-4", input(false, 2)).await.unwrap();
        let err = engine
            .start(DEFINITION, "exp-4", input(false, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::ExecutionAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_stop_aborts_and_is_idempotent() {
        let engine = engine(3, Duration::from_secs(60));
        let execution = engine.start(DEFINITION, "exp-5", input(false, 2)).await.unwrap();

        engine.stop(&execution, "User requested stop").await.unwrap();
        let description = engine.describe(&execution).await.unwrap();
        assert_eq!(description.status, ExecutionStatus::Aborted);
        assert!(description.stop_date.is_some());

        engine.stop(&execution, "again").await.unwrap();
        let history = engine.get_history(&execution, 100, false).await.unwrap();
        assert_eq!(history[0].event_type, HistoryEventType::ExecutionAborted);
        assert_eq!(
            history
                .iter()
                .filter(|e| e.event_type == HistoryEventType::ExecutionAborted)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_oldest_finished_executions_are_evicted() {
        let engine = engine(3, Duration::ZERO).with_retention(1);
        let first = engine.start(DEFINITION, "exp-8", input(true, 2)).await.unwrap();
        wait_terminal(&engine, &first).await;
        let second = engine.start(DEFINITION, "exp-9", input(true, 2)).await.unwrap();
        wait_terminal(&engine, &second).await;

        let third = engine.start(DEFINITION, "exp-10", input(true, 2)).await.unwrap();
        assert!(matches!(
            engine.describe(&first).await.unwrap_err(),
            WorkflowError::ExecutionNotFound(_)
        ));
        assert!(engine.describe(&second).await.is_ok());
        assert!(engine.describe(&third).await.is_ok());
    }

    #[tokio::test]
    async fn test_running_executions_are_kept() {
        let engine = engine(3, Duration::from_secs(60)).with_retention(0);
        let first = engine.start(DEFINITION, "exp-11", input(false, 2)).await.unwrap();
        engine.start(DEFINITION, "exp-12", input(false, 2)).await.unwrap();
        assert_eq!(
            engine.describe(&first).await.unwrap().status,
            ExecutionStatus::Running
        );
    }

    #[tokio::test]
    async fn test_unknown_execution_and_listing() {
        let engine = engine(3, Duration::from_secs(60));
        assert!(matches!(
            engine.describe("nope").await.unwrap_err(),
            WorkflowError::ExecutionNotFound(_)
        ));
        engine.start(DEFINITION, "exp-6", input(false, 2)).await.unwrap();
        engine.start("other:stateMachine:x", "exp-7", input(false, 2)).await.unwrap();

        let listed = engine.list(DEFINITION, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "exp-6");
    }
}
