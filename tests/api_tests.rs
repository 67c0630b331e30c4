//! HTTP API tests driven through the router with `oneshot`.

mod test_utils;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use jobstore::server::{AppState, create_app};
use serde_json::{Value, json};
use test_utils::setup_store;
use tower::ServiceExt;

async fn app() -> anyhow::Result<Router> {
    let store = setup_store().await?;
    Ok(create_app(AppState { store }))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> anyhow::Result<(StatusCode, Value)> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => builder.body(Body::empty())?,
    };

    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn register_sample(app: &Router) -> anyhow::Result<()> {
    let (status, body) = send(
        app,
        "POST",
        "/jobs",
        Some(json!({
            "update_id": 10,
            "jobs": [
                {"job_id": "extract", "products": ["raw"], "commands": ["true"]},
                {"job_id": "load", "requisites": ["raw"], "commands": ["true"], "priority": 2}
            ]
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["update_id"], json!(10));
    assert_eq!(body["job_ids"], json!(["extract", "load"]));
    Ok(())
}

#[tokio::test]
async fn root_and_health_respond() -> anyhow::Result<()> {
    let app = app().await?;

    let (status, body) = send(&app, "GET", "/", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "jobstore");

    let (status, body) = send(&app, "GET", "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");
    Ok(())
}

#[tokio::test]
async fn register_then_fetch_job() -> anyhow::Result<()> {
    let app = app().await?;
    register_sample(&app).await?;

    let (status, body) = send(&app, "GET", "/jobs/load", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_id"], "load");
    assert_eq!(body["update_id"], 10);
    assert_eq!(body["state"], "WAIT");
    assert_eq!(body["priority"], 2);
    assert_eq!(body["requisites"], json!(["raw"]));
    assert_eq!(body["commands"], json!(["true"]));
    Ok(())
}

#[tokio::test]
async fn missing_job_is_problem_json_404() -> anyhow::Result<()> {
    let app = app().await?;

    let request = Request::builder()
        .uri("/jobs/nope")
        .header("x-request-id", "req-123")
        .body(Body::empty())?;
    let response = app.oneshot(request).await?;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/problem+json"
    );
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-123");
    let body: Value = serde_json::from_slice(&to_bytes(response.into_body(), usize::MAX).await?)?;
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["trace_id"], "req-123");
    Ok(())
}

#[tokio::test]
async fn invalid_definitions_are_rejected() -> anyhow::Result<()> {
    let app = app().await?;

    let (status, body) = send(
        &app,
        "POST",
        "/jobs",
        Some(json!({"jobs": [{"job_id": "bad", "priority": "high"}]})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let (status, _) = send(&app, "POST", "/jobs", Some(json!({"jobs": []}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "GET", "/jobs/bad", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn list_stats_and_state_override() -> anyhow::Result<()> {
    let app = app().await?;
    register_sample(&app).await?;

    let (status, body) = send(&app, "GET", "/jobs?state=WAIT", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["job_ids"], json!(["load", "extract"]));

    let (_, body) = send(&app, "GET", "/jobs", None).await?;
    assert_eq!(body["job_ids"], json!([]));

    let (status, body) = send(
        &app,
        "PUT",
        "/jobs/extract",
        Some(json!({"state": "FAILED", "update_id": 11})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "FAILED");
    assert_eq!(body["update_id"], 11);

    let (_, body) = send(&app, "GET", "/jobs", None).await?;
    assert_eq!(body["job_ids"], json!(["extract"]));

    let (status, body) = send(&app, "GET", "/jobs/stats", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counts"], json!({"FAILED": 1, "WAIT": 1}));

    let (status, _) = send(&app, "GET", "/jobs?state=SLEEPING", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        "/jobs/ghost",
        Some(json!({"state": "WAIT"})),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn graph_histories_and_delete() -> anyhow::Result<()> {
    let app = app().await?;
    register_sample(&app).await?;

    let (status, body) = send(
        &app,
        "GET",
        "/jobs/load/graph?producer_depth=2&consumer_depth=0",
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["nodes"]["load"]["depth"], 0);
    assert_eq!(body["nodes"]["extract"]["depth"], 1);
    assert_eq!(body["nodes"]["INITIATOR"]["depth"], 2);
    assert_eq!(
        body["edges"],
        json!([["INITIATOR", "extract"], ["extract", "load"]])
    );

    let (status, body) = send(&app, "GET", "/jobs/load/histories?size=3", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = send(&app, "GET", "/jobs/load/histories?size=0", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, "DELETE", "/jobs/load", None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "DELETE", "/jobs/load", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", "/jobs/load/graph", None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn openapi_document_is_served() -> anyhow::Result<()> {
    let app = app().await?;

    let (status, body) = send(&app, "GET", "/openapi.json", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/jobs/{job_id}/graph"].is_object());
    Ok(())
}
