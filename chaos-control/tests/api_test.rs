//! Integration tests for the control-plane HTTP API
//!
//! Drives the full router against a temporary SQLite database, the in-process
//! workflow engine and a simulated fleet.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use chaos_control::api;
use chaos_control::config::{Config, FleetConfig, WorkflowBackend};
use chaos_control::{app, db, AppState};

const TARGET_GROUP: &str = "chaos-target-asg";

fn test_config(database_url: String, step_interval: Duration) -> Config {
    Config {
        port: 0,
        database_url,
        experiments_table: "chaos-experiments".to_string(),
        results_table: "chaos-results".to_string(),
        state_machine_arn: "arn:local:states:local:000000000000:stateMachine:chaos-experiment"
            .to_string(),
        fleet: FleetConfig {
            capacity_group_name: TARGET_GROUP.to_string(),
            target_group_arn: "arn:local:tg/chaos".to_string(),
            load_balancer_arn: "arn:local:lb/chaos".to_string(),
        },
        workflow_backend: WorkflowBackend::Local,
        workflow_engine_url: None,
        health_provider_url: None,
        local_step_interval: step_interval,
        local_fleet_size: 3,
        cors_origin: "*".to_string(),
    }
}

async fn setup_test_app(step_interval: Duration) -> (axum::Router, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let database_url = format!("sqlite:{}", temp_dir.path().join("chaos.db").display());
    let config = test_config(database_url, step_interval);

    let pool = db::connect(&config.database_url)
        .await
        .expect("Failed to open database");
    let orchestrator = app::build_orchestrator(&config, pool).expect("Failed to wire adapters");
    let app = api::router().with_state(Arc::new(AppState { orchestrator }));
    (app, temp_dir)
}

async fn json_response(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("Request failed");
    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read body")
        .to_bytes();
    let value: Value = serde_json::from_slice(&body).unwrap_or_else(|_| {
        json!({ "raw": String::from_utf8_lossy(&body).to_string() })
    });
    (status, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn create_body(target_id: &str) -> Value {
    json!({
        "targetType": "ASG",
        "targetId": target_id,
        "configuration": { "dryRun": false, "expectedHealthyInstances": 2 },
        "metadata": { "name": "terminate one", "hypothesis": "fleet self-heals" }
    })
}

async fn create_experiment(app: &axum::Router, target_id: &str) -> Value {
    let (status, body) = json_response(app, post_json("/api/v1/experiments", create_body(target_id))).await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    body["data"].clone()
}

async fn wait_for_terminal(app: &axum::Router, id: &str) -> Value {
    for _ in 0..200 {
        let (status, body) = json_response(app, get(&format!("/api/v1/experiments/{id}/status"))).await;
        assert_eq!(status, StatusCode::OK);
        let state = body["data"]["status"].as_str().unwrap_or_default().to_string();
        if state == "COMPLETED" || state == "FAILED" {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("experiment {id} never reached a terminal status");
}

#[tokio::test]
async fn test_liveness_probe() {
    let (app, _temp_dir) = setup_test_app(Duration::ZERO).await;
    let (status, body) = json_response(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "chaos-control");
}

#[tokio::test]
async fn test_create_validation_errors() {
    let (app, _temp_dir) = setup_test_app(Duration::ZERO).await;

    let (status, body) = json_response(
        &app,
        post_json("/api/v1/experiments", json!({ "targetType": "ASG", "targetId": "asg-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(
        body["error"],
        "Missing required fields: targetType, targetId, configuration"
    );

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/experiments")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_experiment_runs_to_completion() {
    let (app, _temp_dir) = setup_test_app(Duration::ZERO).await;

    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/experiments")
        .header("content-type", "application/json")
        .header("x-chaos-user-email", "sre@example.com")
        .body(Body::from(create_body(TARGET_GROUP).to_string()))
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Experiment started successfully");
    let created = &body["data"];
    assert_eq!(created["status"], "RUNNING");
    assert_eq!(created["createdBy"], "sre@example.com");
    assert_eq!(created["configuration"]["failureType"], "INSTANCE_TERMINATION");
    let id = created["experimentId"].as_str().unwrap().to_string();
    assert!(id.starts_with("exp-"));

    let finished = wait_for_terminal(&app, &id).await;
    assert_eq!(finished["status"], "COMPLETED");
    assert!(finished["endTime"].is_string());
    assert!(finished["duration"].as_i64().unwrap() >= 0);

    let (status, body) = json_response(&app, get(&format!("/api/v1/experiments/{id}/steps"))).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["stepName"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        names,
        vec![
            "ValidatePreHealth",
            "GetTargetInstance",
            "InjectFailure",
            "WaitForRecovery",
            "ValidatePostHealth"
        ]
    );
    assert!(body["data"]
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["status"] == "completed"));

    let (status, body) = json_response(&app, get(&format!("/api/v1/results?experimentId={id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let results = body["data"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["success"], true);
    let result_id = results[0]["resultId"].as_str().unwrap().to_string();

    let (status, body) = json_response(&app, get(&format!("/api/v1/results/{result_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["experimentId"], id.as_str());

    let (status, body) = json_response(&app, get("/api/v1/analytics")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["totalExperiments"], 1);
    assert_eq!(body["data"]["successRate"], 100.0);
}

#[tokio::test]
async fn test_unknown_capacity_group_fails_experiment() {
    let (app, _temp_dir) = setup_test_app(Duration::ZERO).await;
    let created = create_experiment(&app, "asg-does-not-exist").await;
    let id = created["experimentId"].as_str().unwrap();

    let finished = wait_for_terminal(&app, id).await;
    assert_eq!(finished["status"], "FAILED");

    let (_, body) = json_response(&app, get(&format!("/api/v1/experiments/{id}/steps"))).await;
    assert_eq!(body["data"][0]["stepName"], "ValidatePreHealth");
    assert_eq!(body["data"][0]["status"], "failed");
    assert!(body["data"][0].get("duration").is_none());
}

#[tokio::test]
async fn test_stop_and_monitor() {
    let (app, _temp_dir) = setup_test_app(Duration::from_secs(60)).await;
    let created = create_experiment(&app, TARGET_GROUP).await;
    let id = created["experimentId"].as_str().unwrap();

    let (status, body) = json_response(&app, get(&format!("/api/v1/experiments/{id}/monitor"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["experiment"]["status"], "RUNNING");
    assert_eq!(body["data"]["systemHealth"]["status"], "healthy");
    assert!(body["data"]["steps"].is_array());

    let (status, body) = json_response(
        &app,
        post_json(
            &format!("/api/v1/experiments/{id}/stop"),
            json!({ "cause": "game day over" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "FAILED");

    let req = Request::builder()
        .method("POST")
        .uri(format!("/api/v1/experiments/{id}/stop"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "FAILED");
}

#[tokio::test]
async fn test_list_filters_by_status() {
    let (app, _temp_dir) = setup_test_app(Duration::from_secs(60)).await;
    create_experiment(&app, TARGET_GROUP).await;
    create_experiment(&app, TARGET_GROUP).await;
    let stopped = create_experiment(&app, TARGET_GROUP).await;
    let stopped_id = stopped["experimentId"].as_str().unwrap();
    json_response(
        &app,
        post_json(&format!("/api/v1/experiments/{stopped_id}/stop"), json!({})),
    )
    .await;

    let (status, body) = json_response(&app, get("/api/v1/experiments?status=RUNNING&limit=10")).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|e| e["status"] == "RUNNING"));

    let (_, body) = json_response(&app, get("/api/v1/experiments?status=ALL")).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 3);

    let (status, _) = json_response(&app, get("/api/v1/experiments?limit=lots")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_and_not_found() {
    let (app, _temp_dir) = setup_test_app(Duration::from_secs(60)).await;
    let created = create_experiment(&app, TARGET_GROUP).await;
    let id = created["experimentId"].as_str().unwrap();

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("/api/v1/experiments/{id}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = json_response(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = json_response(&app, get(&format!("/api/v1/experiments/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], format!("Experiment not found: {id}"));

    let (status, _) = json_response(&app, get("/api/v1/results/res-missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_system_health_reports_fleet() {
    let (app, _temp_dir) = setup_test_app(Duration::ZERO).await;
    let (status, body) = json_response(&app, get("/api/v1/system/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["targetInstanceCount"], 3);
    assert_eq!(body["data"]["healthyInstances"], 3);
    assert_eq!(body["data"]["loadBalancerStatus"], "active");
}
