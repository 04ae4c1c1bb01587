use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use super::{CapacityGroupHealth, HealthError, HealthProvider, TargetHealthDescription};

/// Health provider backed by a JSON bridge in front of the cloud APIs.
///
/// Routes:
/// - `GET {base}/capacity-groups/{name}` → [`CapacityGroupHealth`] (404 = absent)
/// - `GET {base}/target-groups/health?arn=…` → `{"targets": [...]}`
/// - `GET {base}/load-balancers/state?arn=…` → `{"state": "active"}` (404 = absent)
#[derive(Clone)]
pub struct HttpHealthProvider {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct TargetHealthResponse {
    targets: Vec<TargetHealthDescription>,
}

#[derive(Deserialize)]
struct LoadBalancerStateResponse {
    state: String,
}

impl HttpHealthProvider {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }
}

#[async_trait]
impl HealthProvider for HttpHealthProvider {
    async fn describe_capacity_group(
        &self,
        name: &str,
    ) -> Result<Option<CapacityGroupHealth>, HealthError> {
        let response = self
            .client
            .get(format!("{}/capacity-groups/{name}", self.base_url))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json().await?))
    }

    async fn describe_target_health(
        &self,
        target_group: &str,
    ) -> Result<Vec<TargetHealthDescription>, HealthError> {
        let body: TargetHealthResponse = self
            .client
            .get(format!("{}/target-groups/health", self.base_url))
            .query(&[("arn", target_group)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body.targets)
    }

    async fn describe_load_balancer(&self, arn: &str) -> Result<Option<String>, HealthError> {
        let response = self
            .client
            .get(format!("{}/load-balancers/state", self.base_url))
            .query(&[("arn", arn)])
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: LoadBalancerStateResponse = response.error_for_status()?.json().await?;
        Ok(Some(body.state))
    }
}
