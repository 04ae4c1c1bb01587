//! In-memory stand-in for a capacity group behind a load balancer.
//!
//! Backs the local workflow engine and doubles as its health provider, so a
//! local deployment can run experiments end to end without cloud access.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use crate::health::{
    CapacityGroupHealth, HealthError, HealthProvider, MemberHealth, TargetHealthDescription,
    TARGET_STATE_HEALTHY,
};

/// Target state reported for a replacement that has not passed checks yet.
const TARGET_STATE_INITIAL: &str = "initial";

#[derive(Debug, Clone)]
struct SimulatedInstance {
    instance_id: String,
    healthy: bool,
}

#[derive(Debug, Default)]
struct FleetState {
    instances: Vec<SimulatedInstance>,
    launched: u32,
}

impl FleetState {
    fn launch(&mut self, healthy: bool) -> String {
        self.launched += 1;
        let instance_id = format!("i-{:017x}", self.launched);
        self.instances.push(SimulatedInstance {
            instance_id: instance_id.clone(),
            healthy,
        });
        instance_id
    }
}

pub struct SimulatedFleet {
    group_name: String,
    desired_capacity: u32,
    state: Mutex<FleetState>,
}

impl SimulatedFleet {
    pub fn new(group_name: impl Into<String>, desired_capacity: u32) -> Arc<Self> {
        let mut state = FleetState::default();
        for _ in 0..desired_capacity {
            state.launch(true);
        }
        Arc::new(Self {
            group_name: group_name.into(),
            desired_capacity,
            state: Mutex::new(state),
        })
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub async fn healthy_count(&self) -> u32 {
        let state = self.state.lock().await;
        state.instances.iter().filter(|i| i.healthy).count() as u32
    }

    /// Oldest healthy instance, the one an experiment terminates.
    pub async fn pick_target(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .instances
            .iter()
            .find(|i| i.healthy)
            .map(|i| i.instance_id.clone())
    }

    /// Remove an instance and launch an unhealthy replacement in its place.
    /// Returns the replacement id, or `None` if the instance is not a member.
    pub async fn terminate(&self, instance_id: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let pos = state
            .instances
            .iter()
            .position(|i| i.instance_id == instance_id)?;
        state.instances.remove(pos);
        let replacement = state.launch(false);
        info!(group = %self.group_name, instance_id, replacement = %replacement, "instance terminated");
        Some(replacement)
    }

    /// Mark every pending replacement healthy. Returns how many recovered.
    pub async fn recover(&self) -> u32 {
        let mut state = self.state.lock().await;
        let mut recovered = 0;
        for instance in state.instances.iter_mut().filter(|i| !i.healthy) {
            instance.healthy = true;
            recovered += 1;
        }
        recovered
    }
}

#[async_trait]
impl HealthProvider for SimulatedFleet {
    async fn describe_capacity_group(
        &self,
        name: &str,
    ) -> Result<Option<CapacityGroupHealth>, HealthError> {
        if name != self.group_name {
            return Ok(None);
        }
        let state = self.state.lock().await;
        Ok(Some(CapacityGroupHealth {
            desired_capacity: self.desired_capacity,
            members: state
                .instances
                .iter()
                .map(|i| MemberHealth {
                    instance_id: i.instance_id.clone(),
                    healthy: i.healthy,
                })
                .collect(),
        }))
    }

    async fn describe_target_health(
        &self,
        _target_group: &str,
    ) -> Result<Vec<TargetHealthDescription>, HealthError> {
        let state = self.state.lock().await;
        Ok(state
            .instances
            .iter()
            .map(|i| TargetHealthDescription {
                target_id: i.instance_id.clone(),
                state: if i.healthy {
                    TARGET_STATE_HEALTHY
                } else {
                    TARGET_STATE_INITIAL
                }
                .to_string(),
            })
            .collect())
    }

    async fn describe_load_balancer(&self, _arn: &str) -> Result<Option<String>, HealthError> {
        Ok(Some("active".to_string()))
    }
}
