//! Shared types between the control plane and the dashboard
//!
//! These types are used by both:
//! - the chaos control plane (native Rust, axum handlers)
//! - the web dashboard (TypeScript, via ts-rs exports)
//!
//! Serialized with serde as camelCase JSON over HTTP

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Timestamps
// ============================================================================

/// Render a timestamp the way every record on the wire carries it:
/// RFC 3339, millisecond precision, `Z` suffix.
///
/// Fixed precision keeps lexical and chronological order identical, which the
/// query filters rely on.
pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a wire timestamp back into UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Build a `<prefix>-<YYYY-MM-DD>-<8 hex>` identifier.
///
/// The date prefix sorts ids by creation day; the random suffix keeps ids
/// distinct within a day.
pub fn dated_id(prefix: &str, at: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}-{}", at.format("%Y-%m-%d"), &suffix[..8])
}

// ============================================================================
// Experiments
// ============================================================================

/// Lifecycle status of an experiment.
///
/// PENDING → {RUNNING, FAILED} → {COMPLETED, FAILED}. Terminal states never change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub enum ExperimentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExperimentStatus {
    pub const ALL: [ExperimentStatus; 4] = [
        ExperimentStatus::Pending,
        ExperimentStatus::Running,
        ExperimentStatus::Completed,
        ExperimentStatus::Failed,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Completed) | (Running, Failed)
        )
    }

    /// Whether a record stored as `self` may be written as `next`: a lifecycle
    /// move, or a non-terminal status rewritten in place.
    pub fn accepts_write_of(self, next: ExperimentStatus) -> bool {
        self.can_transition_to(next) || (self == next && !self.is_terminal())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExperimentStatus::Pending => "PENDING",
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Completed => "COMPLETED",
            ExperimentStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Default failure type tag applied when the request does not name one.
pub const DEFAULT_FAILURE_TYPE: &str = "INSTANCE_TERMINATION";
/// Default expected-healthy-instance threshold.
pub const DEFAULT_EXPECTED_HEALTHY_INSTANCES: u32 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct ExperimentConfiguration {
    pub dry_run: bool,
    pub expected_healthy_instances: u32,
    pub failure_type: String,
}

impl Default for ExperimentConfiguration {
    fn default() -> Self {
        Self {
            dry_run: false,
            expected_healthy_instances: DEFAULT_EXPECTED_HEALTHY_INSTANCES,
            failure_type: DEFAULT_FAILURE_TYPE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct ExperimentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// A failure-injection experiment as persisted and returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct Experiment {
    pub experiment_id: String,
    pub status: ExperimentStatus,
    pub target_type: String,
    pub target_id: String,
    pub configuration: ExperimentConfiguration,
    pub start_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Whole seconds between start and end, set at the terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ExperimentMetadata>,
    /// Workflow execution reference captured when the execution was started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_ref: Option<String>,
}

/// Configuration as submitted; every field may be omitted and is defaulted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct ConfigurationRequest {
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub expected_healthy_instances: Option<u32>,
    #[serde(default)]
    pub failure_type: Option<String>,
}

impl ConfigurationRequest {
    pub fn resolve(&self) -> ExperimentConfiguration {
        let defaults = ExperimentConfiguration::default();
        ExperimentConfiguration {
            dry_run: self.dry_run.unwrap_or(defaults.dry_run),
            expected_healthy_instances: self
                .expected_healthy_instances
                .unwrap_or(defaults.expected_healthy_instances),
            failure_type: self
                .failure_type
                .clone()
                .unwrap_or(defaults.failure_type),
        }
    }
}

/// Body of `POST /api/v1/experiments`.
///
/// Required fields are optional here so that a missing field surfaces as a
/// validation error with a readable message rather than a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct CreateExperimentRequest {
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub target_id: Option<String>,
    #[serde(default)]
    pub configuration: Option<ConfigurationRequest>,
    #[serde(default)]
    pub metadata: Option<ExperimentMetadata>,
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct MetricsSnapshot {
    pub healthy_host_count: u32,
    pub response_time: f64,
    pub error_rate: f64,
}

/// Outcome of one finished experiment. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct ExperimentResult {
    pub result_id: String,
    pub experiment_id: String,
    pub timestamp: String,
    pub success: bool,
    pub target_instance: String,
    pub recovery_time: f64,
    pub metrics_snapshot: MetricsSnapshot,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub step_function_output: Option<serde_json::Value>,
}

// ============================================================================
// Steps
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One named step of a workflow execution, derived from its event history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct ExperimentStep {
    pub step_name: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub output: Option<serde_json::Value>,
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub target_instance_count: u32,
    pub healthy_instances: u32,
    pub load_balancer_status: String,
    pub last_checked: String,
}

// ============================================================================
// Monitoring
// ============================================================================

/// Everything the monitor page polls for in one round trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct ExperimentMonitorView {
    pub experiment: Experiment,
    pub steps: Vec<ExperimentStep>,
    pub system_health: SystemHealth,
}

// ============================================================================
// Analytics
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct DailyCount {
    pub date: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct WeeklyOutcome {
    pub week: String,
    pub success: u32,
    pub failure: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct TypeCount {
    #[serde(rename = "type")]
    pub failure_type: String,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct Analytics {
    pub total_experiments: u32,
    /// Percentage of results that succeeded, 0–100.
    pub success_rate: f64,
    /// Mean recovery time in seconds across results.
    pub average_recovery_time: f64,
    pub last24h_experiments: u32,
    pub experiments_over_time: Vec<DailyCount>,
    pub success_failure_by_week: Vec<WeeklyOutcome>,
    pub experiment_type_distribution: Vec<TypeCount>,
}

// ============================================================================
// API Types
// ============================================================================

/// Uniform response envelope for every API route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: None,
            error: Some(error.into()),
        }
    }
}

/// Query string of `GET /api/v1/experiments`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct ExperimentQueryParams {
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Query string of `GET /api/v1/results`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct ResultQueryParams {
    pub experiment_id: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Body of `POST /api/v1/experiments/{id}/stop`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, TS)]
#[ts(export, export_to = "../../dashboard/src/types/generated.ts")]
pub struct StopExperimentRequest {
    #[serde(default)]
    pub cause: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
