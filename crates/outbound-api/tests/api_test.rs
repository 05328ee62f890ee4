//! Router tests driven through `tower::ServiceExt::oneshot`.

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    Router,
};
use http::{Request, StatusCode};
use outbound_api::{
    create_router,
    handlers::{deliveries::EnqueueResponse, health::HealthResponse, ErrorResponse},
    AppState,
};
use outbound_core::{Clock, DeliveryStatus};
use outbound_testing::{ScriptedDispatcher, TestEnv};
use serde_json::{json, Value};
use tower::ServiceExt;

fn router(env: &TestEnv) -> Router {
    let clock: Arc<dyn Clock> = Arc::new(env.clock.clone());
    create_router(AppState::new(env.engine.clone(), clock), Duration::from_secs(5))
}

async fn send(app: Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, body))
}

fn post_json(uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))?)
}

fn get(uri: &str) -> Result<Request<Body>> {
    Ok(Request::builder().uri(uri).body(Body::empty())?)
}

async fn scripted_env() -> Result<(TestEnv, Arc<ScriptedDispatcher>)> {
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let env = TestEnv::builder().dispatcher(dispatcher.clone()).max_attempts(1).build().await?;
    Ok((env, dispatcher))
}

fn webhook_body(url: &str) -> Value {
    json!({
        "kind": "webhook_event",
        "targets": [{ "url": url }],
        "payload": { "type": "raw", "body": "{\"order\":1}", "event_type": "order.created" },
    })
}

#[tokio::test]
async fn enqueue_then_status_round_trip() -> Result<()> {
    let (env, _) = scripted_env().await?;

    let (status, body) =
        send(router(&env), post_json("/deliveries", &webhook_body("https://a.test/hook"))?).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: EnqueueResponse = serde_json::from_value(body)?;
    assert_eq!(accepted.status, DeliveryStatus::Pending);

    env.run_until_terminal(accepted.delivery_id, 1).await?;

    let (status, body) =
        send(router(&env), get(&format!("/deliveries/{}", accepted.delivery_id))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["attempt_count"], 1);
    assert_eq!(body["targets"][0]["url"], "https://a.test/hook");
    assert_eq!(body["targets"][0]["outcome"], "delivered");
    assert!(body.get("claim_token").is_none());
    Ok(())
}

#[tokio::test]
async fn responses_carry_request_id() -> Result<()> {
    let (env, _) = scripted_env().await?;
    let response = router(&env).oneshot(get("/live")?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    Ok(())
}

#[tokio::test]
async fn invalid_requests_are_unprocessable() -> Result<()> {
    let (env, _) = scripted_env().await?;

    let no_targets = json!({
        "kind": "webhook_event",
        "targets": [],
        "payload": { "type": "raw", "body": "{}" },
    });
    let (status, body) = send(router(&env), post_json("/deliveries", &no_targets)?).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let error: ErrorResponse = serde_json::from_value(body)?;
    assert_eq!(error.error.code, "invalid_request");

    let unknown_client = json!({
        "kind": "single_message",
        "targets": [{ "client_id": "nobody" }],
        "payload": { "type": "template", "template": "hi" },
    });
    let (status, _) = send(router(&env), post_json("/deliveries", &unknown_client)?).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let bad_url = webhook_body("ftp://a.test/hook");
    let (status, _) = send(router(&env), post_json("/deliveries", &bad_url)?).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn unknown_delivery_is_not_found() -> Result<()> {
    let (env, _) = scripted_env().await?;
    let uri = format!("/deliveries/{}", uuid::Uuid::new_v4());

    let (status, body) = send(router(&env), get(&uri)?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = send(router(&env), post_json(&format!("{uri}/retry"), &json!({}))?).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn retry_is_conflict_unless_failed() -> Result<()> {
    let (env, dispatcher) = scripted_env().await?;
    dispatcher.push_status("https://down.test/hook", 503);

    let (_, body) =
        send(router(&env), post_json("/deliveries", &webhook_body("https://down.test/hook"))?)
            .await?;
    let accepted: EnqueueResponse = serde_json::from_value(body)?;
    let retry_uri = format!("/deliveries/{}/retry", accepted.delivery_id);

    let (status, body) = send(router(&env), post_json(&retry_uri, &json!({}))?).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "invalid_transition");

    let record = env.run_until_terminal(accepted.delivery_id, 1).await?;
    assert_eq!(record.status, DeliveryStatus::DeadLettered);

    let (status, body) =
        send(router(&env), get("/deliveries?status=dead_lettered&offset=0&limit=10")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["id"], accepted.delivery_id.to_string());

    let (status, body) = send(router(&env), post_json(&retry_uri, &json!({}))?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");
    assert_eq!(body["attempt_count"], 0);

    let record = env.run_until_terminal(accepted.delivery_id, 1).await?;
    assert_eq!(record.status, DeliveryStatus::Succeeded);
    assert_eq!(dispatcher.calls_to("https://down.test/hook"), 2);
    Ok(())
}

#[tokio::test]
async fn list_pages_through_results() -> Result<()> {
    let (env, _) = scripted_env().await?;
    for index in 0..5 {
        let body = webhook_body(&format!("https://t{index}.test/hook"));
        let (status, _) = send(router(&env), post_json("/deliveries", &body)?).await?;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (status, body) = send(router(&env), get("/deliveries?status=pending&limit=2")?).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 5);
    assert_eq!(body["items"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["next_offset"], 2);

    let (_, body) = send(router(&env), get("/deliveries?status=pending&offset=4&limit=2")?).await?;
    assert_eq!(body["items"].as_array().map(Vec::len), Some(1));
    assert!(body["next_offset"].is_null());
    Ok(())
}

#[tokio::test]
async fn health_reports_store_outage() -> Result<()> {
    let (env, _) = scripted_env().await?;

    let (status, body) = send(router(&env), get("/health")?).await?;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = serde_json::from_value(body)?;
    assert!(!health.engine.running);

    env.store.inject_unavailable(1);
    let (status, body) = send(router(&env), get("/health")?).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["store"]["status"], "down");
    Ok(())
}
