//! Workflow engine contract.
//!
//! An experiment's failure-injection plan runs as one execution of an
//! external state-machine engine. The control plane only starts, describes,
//! stops and reads the history of those executions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod control;
mod http;
mod local;

pub use control::{WorkflowControl, MAX_HISTORY_EVENTS};
pub use http::HttpWorkflowEngine;
pub use local::{execution_ref_for, LocalWorkflowEngine, PlanStep, CHAOS_PLAN};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescription {
    pub execution_ref: String,
    pub name: String,
    pub status: ExecutionStatus,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub stop_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub execution_ref: String,
    pub name: String,
    pub status: ExecutionStatus,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub stop_date: Option<DateTime<Utc>>,
}

/// Event type tags emitted by the engine. Unrecognised tags decode as `Other`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum HistoryEventType {
    ExecutionStarted,
    ExecutionSucceeded,
    ExecutionFailed,
    ExecutionAborted,
    TaskStateEntered,
    TaskStateExited,
    TaskScheduled,
    TaskSucceeded,
    TaskFailed,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateEventDetails {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskFailedDetails {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cause: Option<String>,
}

/// One entry of an execution's append-only history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    pub id: i64,
    #[serde(default)]
    pub previous_event_id: Option<i64>,
    #[serde(rename = "type")]
    pub event_type: HistoryEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_entered_event_details: Option<StateEventDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_exited_event_details: Option<StateEventDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_failed_event_details: Option<TaskFailedDetails>,
}

impl HistoryEvent {
    pub fn new(
        id: i64,
        previous_event_id: Option<i64>,
        event_type: HistoryEventType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            previous_event_id,
            event_type,
            timestamp,
            state_entered_event_details: None,
            state_exited_event_details: None,
            task_failed_event_details: None,
        }
    }

    pub fn entered(id: i64, timestamp: DateTime<Utc>, name: &str) -> Self {
        Self {
            state_entered_event_details: Some(StateEventDetails {
                name: name.to_string(),
                ..StateEventDetails::default()
            }),
            ..Self::new(id, id.checked_sub(1).filter(|p| *p > 0), HistoryEventType::TaskStateEntered, timestamp)
        }
    }

    pub fn exited(id: i64, timestamp: DateTime<Utc>, name: &str, output: Option<String>) -> Self {
        Self {
            state_exited_event_details: Some(StateEventDetails {
                name: name.to_string(),
                input: None,
                output,
            }),
            ..Self::new(id, id.checked_sub(1).filter(|p| *p > 0), HistoryEventType::TaskStateExited, timestamp)
        }
    }

    pub fn task_failed(
        id: i64,
        previous_event_id: i64,
        timestamp: DateTime<Utc>,
        error: &str,
        cause: &str,
    ) -> Self {
        Self {
            task_failed_event_details: Some(TaskFailedDetails {
                error: Some(error.to_string()),
                cause: Some(cause.to_string()),
            }),
            ..Self::new(id, Some(previous_event_id), HistoryEventType::TaskFailed, timestamp)
        }
    }
}

/// Managed state-machine runner.
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Start an execution of `definition` named `name`; returns its reference.
    async fn start(
        &self,
        definition: &str,
        name: &str,
        input: serde_json::Value,
    ) -> Result<String, WorkflowError>;

    async fn describe(&self, execution: &str) -> Result<ExecutionDescription, WorkflowError>;

    async fn stop(&self, execution: &str, cause: &str) -> Result<(), WorkflowError>;

    async fn get_history(
        &self,
        execution: &str,
        max_events: u32,
        ascending: bool,
    ) -> Result<Vec<HistoryEvent>, WorkflowError>;

    async fn list(
        &self,
        definition: &str,
        max_results: u32,
    ) -> Result<Vec<ExecutionSummary>, WorkflowError>;
}

/// Errors raised by workflow engine adapters
#[derive(Debug, thiserror::Error, Clone)]
pub enum WorkflowError {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution already exists: {0}")]
    ExecutionAlreadyExists(String),

    #[error("Workflow engine unavailable: {0}")]
    Transport(String),

    #[error("Invalid workflow engine response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for WorkflowError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            WorkflowError::InvalidResponse(e.to_string())
        } else {
            WorkflowError::Transport(e.to_string())
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(e: serde_json::Error) -> Self {
        WorkflowError::InvalidResponse(e.to_string())
    }
}
