//! Fleet health aggregation.
//!
//! Two providers report on the same fleet independently: the capacity group
//! (desired size and per-member health) and the load balancer's target group.
//! Their counts may disagree for a while after an instance is replaced.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared_types::{iso_timestamp, HealthStatus, SystemHealth};
use tracing::warn;

use crate::config::FleetConfig;

mod http;

pub use http::HttpHealthProvider;

/// Target-group state string counted as healthy.
pub const TARGET_STATE_HEALTHY: &str = "healthy";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberHealth {
    pub instance_id: String,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapacityGroupHealth {
    pub desired_capacity: u32,
    pub members: Vec<MemberHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TargetHealthDescription {
    pub target_id: String,
    pub state: String,
}

/// Infrastructure health sources.
#[async_trait]
pub trait HealthProvider: Send + Sync {
    /// `None` when no group with that name exists.
    async fn describe_capacity_group(
        &self,
        name: &str,
    ) -> Result<Option<CapacityGroupHealth>, HealthError>;

    async fn describe_target_health(
        &self,
        target_group: &str,
    ) -> Result<Vec<TargetHealthDescription>, HealthError>;

    /// State code of the load balancer, `None` when it does not exist.
    async fn describe_load_balancer(&self, arn: &str) -> Result<Option<String>, HealthError>;
}

#[derive(Debug, thiserror::Error, Clone)]
pub enum HealthError {
    #[error("Health provider unavailable: {0}")]
    Transport(String),

    #[error("Invalid health provider response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for HealthError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            HealthError::InvalidResponse(e.to_string())
        } else {
            HealthError::Transport(e.to_string())
        }
    }
}

/// Raw signals collected from the providers, before aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSignals {
    pub desired_capacity: u32,
    /// Healthy members according to the capacity group
    pub capacity_group_healthy: u32,
    /// Healthy targets according to the target group
    pub target_group_healthy: u32,
    pub load_balancer_state: String,
}

/// Tri-state verdict from the capacity group's own view.
pub fn classify(desired_capacity: u32, healthy: u32) -> HealthStatus {
    if healthy >= desired_capacity {
        HealthStatus::Healthy
    } else if healthy > 0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Critical
    }
}

/// Optimistic merge of the two healthy counts: the larger one wins.
pub fn merge_healthy_counts(capacity_group_healthy: u32, target_group_healthy: u32) -> u32 {
    capacity_group_healthy.max(target_group_healthy)
}

/// Collapse provider signals into the reported health.
///
/// The status is judged on the capacity-group count alone; only the reported
/// count is merged with the target group's.
pub fn aggregate(signals: &HealthSignals, last_checked: String) -> SystemHealth {
    SystemHealth {
        status: classify(signals.desired_capacity, signals.capacity_group_healthy),
        target_instance_count: signals.desired_capacity,
        healthy_instances: merge_healthy_counts(
            signals.capacity_group_healthy,
            signals.target_group_healthy,
        ),
        load_balancer_status: signals.load_balancer_state.clone(),
        last_checked,
    }
}

/// Report used whenever a provider cannot be reached.
pub fn unavailable_report(last_checked: String) -> SystemHealth {
    SystemHealth {
        status: HealthStatus::Critical,
        target_instance_count: 0,
        healthy_instances: 0,
        load_balancer_status: "error".to_string(),
        last_checked,
    }
}

/// Polls the providers for the configured fleet.
#[derive(Clone)]
pub struct HealthMonitor {
    provider: Arc<dyn HealthProvider>,
    fleet: FleetConfig,
}

impl HealthMonitor {
    pub fn new(provider: Arc<dyn HealthProvider>, fleet: FleetConfig) -> Self {
        Self { provider, fleet }
    }

    pub async fn collect_signals(&self) -> Result<HealthSignals, HealthError> {
        let group = self
            .provider
            .describe_capacity_group(&self.fleet.capacity_group_name)
            .await?;
        let (desired_capacity, capacity_group_healthy) = match group {
            Some(group) => (
                group.desired_capacity,
                group.members.iter().filter(|m| m.healthy).count() as u32,
            ),
            None => (0, 0),
        };

        let target_group_healthy = if self.fleet.target_group_arn.is_empty() {
            0
        } else {
            self.provider
                .describe_target_health(&self.fleet.target_group_arn)
                .await?
                .iter()
                .filter(|t| t.state == TARGET_STATE_HEALTHY)
                .count() as u32
        };

        let load_balancer_state = if self.fleet.load_balancer_arn.is_empty() {
            "unknown".to_string()
        } else {
            self.provider
                .describe_load_balancer(&self.fleet.load_balancer_arn)
                .await?
                .unwrap_or_else(|| "unknown".to_string())
        };

        Ok(HealthSignals {
            desired_capacity,
            capacity_group_healthy,
            target_group_healthy,
            load_balancer_state,
        })
    }

    /// Current fleet health. Never fails: provider errors yield a critical
    /// report with zero counts.
    pub async fn check(&self) -> SystemHealth {
        let checked_at = iso_timestamp(Utc::now());
        match self.collect_signals().await {
            Ok(signals) => aggregate(&signals, checked_at),
            Err(e) => {
                warn!(error = %e, group = %self.fleet.capacity_group_name, "health check failed");
                unavailable_report(checked_at)
            }
        }
    }
}
