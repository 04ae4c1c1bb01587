use std::time::Duration;

/// Which workflow engine backs experiment executions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowBackend {
    /// In-process engine running against a simulated fleet.
    Local,
    /// Remote engine reached over JSON/HTTP.
    Http,
}

impl WorkflowBackend {
    fn from_env(value: &str) -> anyhow::Result<Self> {
        match value {
            "local" => Ok(Self::Local),
            "http" => Ok(Self::Http),
            other => Err(anyhow::anyhow!(
                "Invalid WORKFLOW_ENGINE '{other}'. Expected 'local' or 'http'"
            )),
        }
    }
}

/// Fleet identifiers handed to every execution and used by health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetConfig {
    /// Capacity group the experiments target by default
    pub capacity_group_name: String,
    /// Target group to consult for load-balancer health; empty disables it
    pub target_group_arn: String,
    /// Load balancer whose state code is reported; empty disables it
    pub load_balancer_arn: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the control plane listens on
    pub port: u16,
    /// Path to the SQLite database backing the record store
    pub database_url: String,
    /// Table holding experiment records
    pub experiments_table: String,
    /// Table holding experiment results
    pub results_table: String,
    /// Workflow definition every experiment execution is started from
    pub state_machine_arn: String,
    pub fleet: FleetConfig,
    /// Engine selection
    pub workflow_backend: WorkflowBackend,
    /// Base URL of the remote workflow engine (http backend only)
    pub workflow_engine_url: Option<String>,
    /// Base URL of the remote health bridge; the local fleet is used when unset
    pub health_provider_url: Option<String>,
    /// How long each step of the local engine takes
    pub local_step_interval: Duration,
    /// Number of instances in the simulated fleet
    pub local_fleet_size: u32,
    /// Allowed CORS origin; `*` allows any
    pub cors_origin: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let workflow_backend = WorkflowBackend::from_env(&env_str("WORKFLOW_ENGINE", "local"))?;
        let workflow_engine_url = env_opt("WORKFLOW_ENGINE_URL");
        if workflow_backend == WorkflowBackend::Http && workflow_engine_url.is_none() {
            return Err(anyhow::anyhow!(
                "WORKFLOW_ENGINE=http requires WORKFLOW_ENGINE_URL"
            ));
        }

        Ok(Self {
            port: env_parse("CHAOS_PORT", 3000)?,
            database_url: env_str("CHAOS_DATABASE_URL", "sqlite:./data/chaos.db"),
            experiments_table: env_str("EXPERIMENTS_TABLE", "chaos-experiments"),
            results_table: env_str("RESULTS_TABLE", "chaos-results"),
            state_machine_arn: env_str(
                "STATE_MACHINE_ARN",
                "arn:local:states:local:000000000000:stateMachine:chaos-experiment",
            ),
            fleet: FleetConfig {
                capacity_group_name: env_str("TARGET_ASG_NAME", "chaos-target-asg"),
                target_group_arn: env_str("TARGET_GROUP_ARN", ""),
                load_balancer_arn: env_str("LOAD_BALANCER_ARN", ""),
            },
            workflow_backend,
            workflow_engine_url,
            health_provider_url: env_opt("HEALTH_PROVIDER_URL"),
            local_step_interval: Duration::from_millis(env_parse("LOCAL_STEP_INTERVAL_MS", 2000)?),
            local_fleet_size: env_parse("LOCAL_FLEET_SIZE", 3)?,
            cors_origin: env_str("CORS_ORIGIN", "*"),
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
