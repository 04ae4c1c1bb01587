//! Adapter wiring: turns a [`Config`] into a ready [`Orchestrator`].

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::info;

use crate::config::{Config, WorkflowBackend};
use crate::fleet::SimulatedFleet;
use crate::health::{HealthMonitor, HealthProvider, HttpHealthProvider};
use crate::orchestrator::Orchestrator;
use crate::store::{ExperimentRepository, SqliteRecordStore};
use crate::workflow::{HttpWorkflowEngine, LocalWorkflowEngine, WorkflowControl, WorkflowEngine};

pub fn build_orchestrator(config: &Config, db: SqlitePool) -> anyhow::Result<Orchestrator> {
    let store = SqliteRecordStore::new(
        db,
        ExperimentRepository::schemas(&config.experiments_table, &config.results_table),
    );
    let repo = ExperimentRepository::new(
        Arc::new(store),
        config.experiments_table.clone(),
        config.results_table.clone(),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    // The simulated fleet is shared by the local engine and, when no remote
    // provider is configured, the health monitor.
    let fleet = SimulatedFleet::new(
        config.fleet.capacity_group_name.clone(),
        config.local_fleet_size,
    );

    let engine: Arc<dyn WorkflowEngine> = match config.workflow_backend {
        WorkflowBackend::Local => {
            info!(
                step_interval_ms = config.local_step_interval.as_millis() as u64,
                fleet_size = config.local_fleet_size,
                "using local workflow engine"
            );
            Arc::new(LocalWorkflowEngine::new(fleet.clone(), config.local_step_interval))
        }
        WorkflowBackend::Http => {
            let url = config
                .workflow_engine_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("WORKFLOW_ENGINE_URL is not set"))?;
            info!(url = %url, "using remote workflow engine");
            Arc::new(HttpWorkflowEngine::new(url, client.clone()))
        }
    };

    let provider: Arc<dyn HealthProvider> = match &config.health_provider_url {
        Some(url) => {
            info!(url = %url, "using remote health provider");
            Arc::new(HttpHealthProvider::new(url.clone(), client))
        }
        None => fleet,
    };

    Ok(Orchestrator::new(
        repo,
        WorkflowControl::new(engine, config.state_machine_arn.clone(), config.fleet.clone()),
        HealthMonitor::new(provider, config.fleet.clone()),
    ))
}
