use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{ExecutionDescription, ExecutionSummary, HistoryEvent, WorkflowEngine, WorkflowError};

/// Workflow engine reached over a JSON/HTTP bridge.
///
/// Execution references are passed as query parameters since they are
/// ARN-like strings full of `:` and `/`.
#[derive(Clone)]
pub struct HttpWorkflowEngine {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionBody<'a> {
    definition: &'a str,
    name: &'a str,
    input: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartExecutionResponse {
    execution_ref: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StopExecutionBody<'a> {
    execution_ref: &'a str,
    cause: &'a str,
}

#[derive(Deserialize)]
struct HistoryResponse {
    events: Vec<HistoryEvent>,
}

#[derive(Deserialize)]
struct ListResponse {
    executions: Vec<ExecutionSummary>,
}

impl HttpWorkflowEngine {
    pub fn new(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Map engine status codes onto workflow errors.
fn check(response: Response, subject: &str) -> Result<Response, WorkflowError> {
    match response.status() {
        StatusCode::NOT_FOUND => Err(WorkflowError::ExecutionNotFound(subject.to_string())),
        StatusCode::CONFLICT => Err(WorkflowError::ExecutionAlreadyExists(subject.to_string())),
        status if !status.is_success() => Err(WorkflowError::Transport(format!(
            "workflow engine returned {status} for {subject}"
        ))),
        _ => Ok(response),
    }
}

#[async_trait]
impl WorkflowEngine for HttpWorkflowEngine {
    async fn start(
        &self,
        definition: &str,
        name: &str,
        input: serde_json::Value,
    ) -> Result<String, WorkflowError> {
        let response = self
            .client
            .post(self.url("/executions"))
            .json(&StartExecutionBody {
                definition,
                name,
                input,
            })
            .send()
            .await?;
        let body: StartExecutionResponse = check(response, name)?.json().await?;
        Ok(body.execution_ref)
    }

    async fn describe(&self, execution: &str) -> Result<ExecutionDescription, WorkflowError> {
        let response = self
            .client
            .get(self.url("/executions/describe"))
            .query(&[("executionRef", execution)])
            .send()
            .await?;
        Ok(check(response, execution)?.json().await?)
    }

    async fn stop(&self, execution: &str, cause: &str) -> Result<(), WorkflowError> {
        let response = self
            .client
            .post(self.url("/executions/stop"))
            .json(&StopExecutionBody {
                execution_ref: execution,
                cause,
            })
            .send()
            .await?;
        check(response, execution)?;
        Ok(())
    }

    async fn get_history(
        &self,
        execution: &str,
        max_events: u32,
        ascending: bool,
    ) -> Result<Vec<HistoryEvent>, WorkflowError> {
        let response = self
            .client
            .get(self.url("/executions/history"))
            .query(&[
                ("executionRef", execution.to_string()),
                ("maxResults", max_events.to_string()),
                ("reverseOrder", (!ascending).to_string()),
            ])
            .send()
            .await?;
        let body: HistoryResponse = check(response, execution)?.json().await?;
        Ok(body.events)
    }

    async fn list(
        &self,
        definition: &str,
        max_results: u32,
    ) -> Result<Vec<ExecutionSummary>, WorkflowError> {
        let response = self
            .client
            .get(self.url("/executions"))
            .query(&[
                ("definition", definition.to_string()),
                ("maxResults", max_results.to_string()),
            ])
            .send()
            .await?;
        let body: ListResponse = check(response, definition)?.json().await?;
        Ok(body.executions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::{
        extract::{Query, State},
        http,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;

    type SeenQueries = Arc<Mutex<Vec<HashMap<String, String>>>>;

    fn response(status: u16) -> Response {
        Response::from(
            http::Response::builder()
                .status(status)
                .body("")
                .unwrap(),
        )
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    /// Bridge that knows no executions and records history queries.
    fn bridge(seen: SeenQueries) -> Router {
        Router::new()
            .route("/executions", post(|| async { (http::StatusCode::CONFLICT, "exists") }))
            .route("/executions/describe", get(|| async { http::StatusCode::NOT_FOUND }))
            .route("/executions/stop", post(|| async { http::StatusCode::BAD_GATEWAY }))
            .route(
                "/executions/history",
                get(
                    |State(seen): State<SeenQueries>,
                     Query(params): Query<HashMap<String, String>>| async move {
                        seen.lock().unwrap().push(params);
                        Json(json!({ "events": [] }))
                    },
                ),
            )
            .with_state(seen)
    }

    #[test]
    fn test_check_maps_status_codes() {
        assert!(matches!(
            check(response(404), "exec-1"),
            Err(WorkflowError::ExecutionNotFound(subject)) if subject == "exec-1"
        ));
        assert!(matches!(
            check(response(409), "exp-1"),
            Err(WorkflowError::ExecutionAlreadyExists(_))
        ));
        assert!(matches!(
            check(response(503), "exp-1"),
            Err(WorkflowError::Transport(_))
        ));
        assert!(check(response(200), "exp-1").is_ok());
    }

    #[tokio::test]
    async fn test_engine_errors_over_http() {
        let seen = SeenQueries::default();
        let engine = HttpWorkflowEngine::new(serve(bridge(seen)).await, reqwest::Client::new());

        assert!(matches!(
            engine.start("def", "exp-1", json!({})).await,
            Err(WorkflowError::ExecutionAlreadyExists(_))
        ));
        assert!(matches!(
            engine.describe("exec-1").await,
            Err(WorkflowError::ExecutionNotFound(_))
        ));
        assert!(matches!(
            engine.stop("exec-1", "User requested stop").await,
            Err(WorkflowError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_history_query_parameters() {
        let seen = SeenQueries::default();
        let engine = HttpWorkflowEngine::new(
            format!("{}/", serve(bridge(seen.clone())).await),
            reqwest::Client::new(),
        );

        let newest_first = engine
            .get_history("arn:execution:chaos:exp-1", 25, false)
            .await
            .unwrap();
        assert!(newest_first.is_empty());
        engine
            .get_history("arn:execution:chaos:exp-1", 100, true)
            .await
            .unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0]["executionRef"], "arn:execution:chaos:exp-1");
        assert_eq!(seen[0]["maxResults"], "25");
        assert_eq!(seen[0]["reverseOrder"], "true");
        assert_eq!(seen[1]["reverseOrder"], "false");
    }
}
