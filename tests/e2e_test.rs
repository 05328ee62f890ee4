//! End-to-end: requests go through a real listener, deliveries through
//! running workers, and the server stops on its shutdown signal.

use std::{sync::Arc, time::Duration};

use anyhow::{bail, Result};
use outbound_api::{serve, AppState};
use outbound_core::{Clock, RealClock, RegistryEntry, StaticRegistry};
use outbound_delivery::{
    retry::RetryPolicy, storage::memory::InMemoryDeliveryStore, DeliveryConfig, DeliveryEngine,
};
use outbound_testing::{MockEndpoint, MockServer};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

struct Service {
    base_url: String,
    engine: Arc<DeliveryEngine>,
    stop: oneshot::Sender<()>,
    server: JoinHandle<std::io::Result<()>>,
}

impl Service {
    async fn start(registry: StaticRegistry) -> Result<Self> {
        outbound_testing::init_test_tracing();
        let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
        let config = DeliveryConfig {
            worker_count: 2,
            poll_interval: Duration::from_millis(25),
            shutdown_timeout: Duration::from_secs(5),
            default_retry_policy: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(100),
                ..RetryPolicy::default()
            }
            .without_jitter(),
            ..DeliveryConfig::default()
        };

        let engine = Arc::new(DeliveryEngine::new(
            Arc::new(InMemoryDeliveryStore::new(clock.clone())),
            Arc::new(registry),
            config,
            clock.clone(),
        )?);
        engine.start().await?;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let (stop, stopped) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            AppState::new(engine.clone(), clock),
            Duration::from_secs(5),
            async move {
                let _ = stopped.await;
            },
        ));

        Ok(Self { base_url, engine, stop, server })
    }

    async fn stop(self) -> Result<()> {
        let _ = self.stop.send(());
        self.server.await??;
        self.engine.shutdown().await?;
        Ok(())
    }
}

async fn wait_for_status(
    client: &reqwest::Client,
    url: &str,
    expected: &str,
) -> Result<Value> {
    for _ in 0..200 {
        let body: Value = client.get(url).send().await?.json().await?;
        if body["status"] == expected {
            return Ok(body);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    bail!("{url} never reached {expected}")
}

#[tokio::test]
async fn message_to_registered_client_is_delivered() -> Result<()> {
    let mock = MockServer::start().await;
    mock.mock_endpoint(MockEndpoint::success("/inbox")).await;
    mock.mock_sequence("/audit").fail_with(500).then_always(200).await;

    let registry =
        StaticRegistry::from_entries([RegistryEntry::new("acme", mock.target_url("/inbox"))])?;
    let service = Service::start(registry).await?;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/deliveries", service.base_url))
        .json(&json!({
            "kind": "single_message",
            "targets": [
                { "client_id": "acme" },
                { "url": mock.target_url("/audit"), "metadata": { "copy": "audit" } },
            ],
            "payload": {
                "type": "template",
                "template": "Order {{ order.id }} shipped",
                "context": { "order": { "id": 1042 } },
            },
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 202);
    assert!(response.headers().contains_key("x-request-id"));
    let accepted: Value = response.json().await?;
    let id = accepted["delivery_id"].as_str().unwrap_or_default().to_string();

    let record =
        wait_for_status(&client, &format!("{}/deliveries/{id}", service.base_url), "succeeded")
            .await?;
    assert_eq!(record["attempt_count"], 2);

    let inbox = mock.requests_for("/inbox").await;
    assert_eq!(inbox.len(), 1, "delivered target must not be dispatched again");
    assert_eq!(inbox[0].json()?["content"], "Order 1042 shipped");
    mock.assert_request_count("/audit", 2).await;

    let health: Value =
        client.get(format!("{}/health", service.base_url)).send().await?.json().await?;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["engine"]["stats"]["succeeded"], 1);

    service.stop().await
}

#[tokio::test]
async fn failed_template_is_visible_and_retryable_over_http() -> Result<()> {
    let mock = MockServer::start().await;
    mock.mock_endpoint(MockEndpoint::success("/inbox")).await;

    let service = Service::start(StaticRegistry::new()).await?;
    let client = reqwest::Client::new();

    let accepted: Value = client
        .post(format!("{}/deliveries", service.base_url))
        .json(&json!({
            "kind": "single_message",
            "targets": [{ "url": mock.target_url("/inbox") }],
            "payload": { "type": "template", "template": "Hello {{ undefined_var }}" },
        }))
        .send()
        .await?
        .json()
        .await?;
    let id = accepted["delivery_id"].as_str().unwrap_or_default().to_string();
    let status_url = format!("{}/deliveries/{id}", service.base_url);

    let record = wait_for_status(&client, &status_url, "failed").await?;
    assert_eq!(record["attempt_count"], 1);
    assert!(record["last_error"].as_str().is_some_and(|e| e.contains("undefined")));
    mock.assert_request_count("/inbox", 0).await;

    let listed: Value = client
        .get(format!("{}/deliveries?status=failed", service.base_url))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(listed["total"], 1);

    let retried = client.post(format!("{status_url}/retry")).send().await?;
    assert_eq!(retried.status(), 200);

    // The template is still broken, so the retry fails the same way.
    let record = wait_for_status(&client, &status_url, "failed").await?;
    assert_eq!(record["attempt_count"], 1);
    mock.assert_request_count("/inbox", 0).await;

    service.stop().await
}

#[tokio::test]
async fn server_stops_on_shutdown_signal() -> Result<()> {
    let service = Service::start(StaticRegistry::new()).await?;
    let base_url = service.base_url.clone();

    let live = reqwest::get(format!("{base_url}/live")).await?;
    assert_eq!(live.status(), 200);

    service.stop().await?;
    assert!(reqwest::get(format!("{base_url}/live")).await.is_err());
    Ok(())
}
