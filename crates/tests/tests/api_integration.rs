use std::fs;
use std::path::{Path, PathBuf};

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use promptgate_api::build_app;
use serde_json::{json, Value};
use tower::ServiceExt;

const API_KEY: &str = "dev-promptgate-key";

fn config_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
}

fn copy_config(target: &Path) {
    for name in [
        promptgate_config::CATALOG_FILE,
        promptgate_config::POLICIES_FILE,
        promptgate_config::TEMPLATES_FILE,
    ] {
        fs::copy(config_root().join(name), target.join(name)).unwrap();
    }
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, parsed)
}

#[tokio::test]
async fn health_is_public() {
    let app = build_app(config_root()).expect("app should build");

    let (status, body) = send(
        &app,
        Request::builder().uri("/health").body(Body::empty()).unwrap(),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["config"]["default_intent"], "generalInfo");
    assert_eq!(body["config"]["has_reject_template"], true);
}

#[tokio::test]
async fn classify_requires_api_key() {
    let app = build_app(config_root()).expect("app should build");

    let request = Request::builder()
        .method("POST")
        .uri("/v1/classify")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "query": "how many rows?" }).to_string()))
        .unwrap();

    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn classify_returns_scores_in_catalog_order() {
    let app = build_app(config_root()).expect("app should build");

    let (status, body) = send(
        &app,
        post(
            "/v1/classify",
            json!({ "query": "What is the standard deviation of accel_mean?" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intentId"], "aggregateStat");
    assert_eq!(body["bestScore"], 2);
    assert_eq!(body["confidence"], 1.0);
    assert_eq!(body["isOutOfScope"], false);

    let ids = body["scores"]
        .as_object()
        .unwrap()
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(ids.len(), 6);
    assert!(ids.contains(&"countQuery".to_string()));
}

#[tokio::test]
async fn route_reports_fallback_for_unanswerable_query() {
    let app = build_app(config_root()).expect("app should build");

    let (status, body) = send(
        &app,
        post("/v1/route", json!({ "query": "Were the cars nearby flying?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["scope"]["isOOS"], true);
    assert_eq!(body["scope"]["reasons"], json!(["oos"]));
    assert_eq!(body["decision"]["policyId"], "reject-out-of-scope");
    assert_eq!(body["decision"]["action"], "reject");
}

#[tokio::test]
async fn route_uses_notes_when_policy_has_no_message() {
    let app = build_app(config_root()).expect("app should build");

    let (status, body) = send(
        &app,
        post(
            "/v1/route",
            json!({
                "query": "how many clusters are there",
                "dataAvailability": { "hasClusterData": false }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"]["isOutOfScope"], false);
    assert_eq!(body["decision"]["policyId"], "request-cluster-context");
    assert_eq!(
        body["decision"]["message"],
        "Cluster context has not been computed for this dataset yet."
    );
}

#[tokio::test]
async fn route_in_scope_has_no_decision() {
    let app = build_app(config_root()).expect("app should build");

    let (_, body) = send(
        &app,
        post(
            "/v1/route",
            json!({ "query": "how many rows", "dataAvailability": { "hasClusterData": true } }),
        ),
    )
    .await;

    assert_eq!(body["scope"]["isOOS"], false);
    assert!(body["decision"].is_null());
}

#[tokio::test]
async fn prompt_falls_back_to_general_info_for_unknown_intent() {
    let app = build_app(config_root()).expect("app should build");

    let (status, body) = send(
        &app,
        post(
            "/v1/prompt",
            json!({
                "query": "what columns exist?",
                "intentId": "notConfigured",
                "variables": { "dataset": "bus_data.csv" }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["templateId"], "general.default");
    assert_eq!(body["variablesUsed"], json!(["dataset"]));
    assert_eq!(body["variant"], "summary");
    assert_eq!(
        body["prompt"],
        "Answer the following question about bus_data.csv using only its columns: what columns exist?"
    );
}

#[tokio::test]
async fn pipeline_renders_prompt_for_in_scope_query() {
    let app = build_app(config_root()).expect("app should build");

    let (status, body) = send(
        &app,
        post(
            "/v1/pipeline",
            json!({
                "query": "Count the data points where accel_stats_z_p99 exceeds 11.0.",
                "variables": { "dataset": "bus_data.csv", "columns": "timestamp, accel_stats_z_p99" }
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"]["intentId"], "countQuery");
    assert_eq!(body["outcome"]["kind"], "prompt");

    let render = &body["outcome"]["render"];
    assert_eq!(render["templateId"], "count.summary");
    let prompt = render["prompt"].as_str().unwrap();
    assert!(prompt.starts_with("You answer questions about bus_data.csv"));
    assert!(prompt.contains("\n\nQuestion: Count the data points"));
    assert_eq!(render["unresolvedPlaceholders"], json!([]));
}

#[tokio::test]
async fn pipeline_short_circuits_out_of_scope_query() {
    let app = build_app(config_root()).expect("app should build");

    let (status, body) = send(
        &app,
        post("/v1/pipeline", json!({ "query": "asdf qwer" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intent"]["intentId"], "generalInfo");
    assert_eq!(body["intent"]["confidence"], 0.0);
    assert_eq!(body["outcome"]["kind"], "fallback");
    assert_eq!(body["outcome"]["decision"]["policyId"], "reject-out-of-scope");
}

#[tokio::test]
async fn reload_swaps_configuration_and_keeps_old_one_on_error() {
    let dir = tempfile::tempdir().unwrap();
    copy_config(dir.path());
    let app = build_app(dir.path()).expect("app should build");

    fs::write(
        dir.path().join(promptgate_config::POLICIES_FILE),
        "policies: []\n",
    )
    .unwrap();
    let (status, body) = send(&app, post("/v1/admin/reload", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["policies"], 0);

    let (_, body) = send(&app, post("/v1/pipeline", json!({ "query": "asdf qwer" }))).await;
    assert_eq!(body["outcome"]["kind"], "unhandled_out_of_scope");
    assert_eq!(body["outcome"]["reasons"], json!(["oos"]));

    fs::write(dir.path().join(promptgate_config::CATALOG_FILE), "{ not json").unwrap();
    let (status, body) = send(&app, post("/v1/admin/reload", json!({}))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "reload_failed");

    let (status, body) = send(
        &app,
        post("/v1/classify", json!({ "query": "how many rows" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["intentId"], "countQuery");
}
