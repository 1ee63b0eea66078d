//! Exercises the HTTP envelope end to end (spec §6): start, poll status,
//! read result, list, and the unknown-action/missing-parameter error paths.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use pipeline_core::{Engine, ExecuteResult, JobContext, JobDefinition, PipelineConfig, Registry, StageSpec};
use pipeline_http::pipeline_router;
use pipeline_storage::InMemoryStorage;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn echo_execute() -> pipeline_core::ExecuteFn {
    Arc::new(|input, _options, _ctx: JobContext| -> futures::future::BoxFuture<'static, ExecuteResult> {
        Box::pin(async move { Ok(input) })
    })
}

fn build_router(debug_enabled: bool) -> axum::Router {
    let registry = Arc::new(Registry::new());
    registry.register(PipelineConfig::new(
        "demo",
        vec![StageSpec::job(JobDefinition::new("echo", echo_execute()))],
    ));
    let storage = Arc::new(InMemoryStorage::new());
    let engine = Engine::new(registry, storage);
    pipeline_router("demo", engine, debug_enabled)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn start_then_poll_status_and_result() {
    let router = build_router(false);

    let start_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "input": { "value": 1 } }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(start_response.status(), StatusCode::OK);
    let start_body = body_json(start_response).await;
    assert_eq!(start_body["success"], json!(true));
    let pipeline_id = start_body["data"]["pipelineId"].as_str().unwrap().to_string();

    let mut status_body = Value::Null;
    for _ in 0..50 {
        let status_response = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!("/?action=status&id={pipeline_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        status_body = body_json(status_response).await;
        if status_body["data"]["status"] == json!("done") {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(status_body["data"]["status"], json!("done"));

    let result_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/?action=result&id={pipeline_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let result_body = body_json(result_response).await;
    assert_eq!(result_body["data"]["artifact"], json!({ "value": 1 }));
}

#[tokio::test]
async fn missing_input_is_bad_request() {
    let router = build_router(false);
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(json!({}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn unknown_pipeline_id_is_not_found() {
    let router = build_router(false);
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/?action=status&id=nonexistent")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_action_is_bad_request() {
    let router = build_router(false);
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/?action=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn debug_endpoints_are_forbidden_unless_enabled() {
    let router = build_router(false);
    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/?action=pipeline&id=whatever")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn debug_pipeline_endpoint_works_when_enabled() {
    let router = build_router(true);

    let start_response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "input": { "value": 1 } }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let start_body = body_json(start_response).await;
    let pipeline_id = start_body["data"]["pipelineId"].as_str().unwrap().to_string();

    let response = router
        .oneshot(
            Request::builder()
                .method("GET")
                .uri(format!("/?action=pipeline&id={pipeline_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["pipelineId"], json!(pipeline_id));
}
