//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::clients::{InMemoryAccountService, InMemoryTransactionService};
use saga::{OrchestrationConfig, StepExecutor};
use saga_store::InMemorySagaRepository;
use serde_json::{Value, json};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    router: Router,
    transactions: InMemoryTransactionService,
    accounts: InMemoryAccountService,
}

fn setup() -> TestApp {
    let transactions = InMemoryTransactionService::new();
    let accounts = InMemoryAccountService::new();
    accounts.open_account("ACC-1", 1_000);
    accounts.open_account("ACC-2", 0);

    let executor = StepExecutor::new(
        Arc::new(transactions.clone()),
        Arc::new(accounts.clone()),
    );
    let (state, worker) = api::create_state(
        InMemorySagaRepository::new(),
        executor,
        OrchestrationConfig::default(),
    );
    worker.spawn();

    TestApp {
        router: api::create_app(state, get_metrics_handle()),
        transactions,
        accounts,
    }
}

impl TestApp {
    async fn send(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn start_transfer(&self, business_key: &str, destination: &str) -> (StatusCode, Value) {
        self.send(
            "POST",
            "/api/v1/sagas",
            Some(json!({
                "businessKey": business_key,
                "sagaType": "TRANSFER",
                "correlationId": format!("corr-{business_key}"),
                "context": {
                    "sourceAccountId": "ACC-1",
                    "destinationAccountId": destination,
                    "amount": "250"
                }
            })),
        )
        .await
    }

    /// Polls the saga until it reaches `status`.
    async fn wait_for_status(&self, saga_id: &str, status: &str) -> Value {
        let uri = format!("/api/v1/sagas/{saga_id}");
        for _ in 0..100 {
            let (_, saga) = self.send("GET", &uri, None).await;
            if saga["status"] == status {
                return saga;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("saga {saga_id} never reached {status}");
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();

    let (status, json) = app.send("GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_start_transfer_runs_to_completion() {
    let app = setup();

    let (status, json) = app.start_transfer("BK-API-1", "ACC-2").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["businessKey"], "BK-API-1");
    assert_eq!(json["sagaType"], "TRANSFER");
    assert_eq!(json["status"], "IN_PROGRESS");
    assert_eq!(json["maxRetryAttempts"], 3);

    let saga_id = json["sagaId"].as_str().unwrap().to_string();
    let saga = app.wait_for_status(&saga_id, "COMPLETED").await;
    assert_eq!(saga["correlationId"], "corr-BK-API-1");
    assert!(saga["completedAt"].is_string());
    assert_eq!(app.accounts.balance("ACC-2"), Some(250));

    let (status, steps) = app
        .send("GET", &format!("/api/v1/sagas/{saga_id}/steps"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = steps
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["create_transaction", "debit_source", "credit_destination"]);
    assert_eq!(steps[0]["status"], "COMPLETED");
    assert_eq!(steps[0]["compensationAction"], "cancel_transaction");

    let (status, by_key) = app
        .send("GET", "/api/v1/sagas/business-key/BK-API-1", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_key["sagaId"], saga_id.as_str());
}

#[tokio::test]
async fn test_failed_transfer_is_compensated() {
    let app = setup();

    let (_, json) = app.start_transfer("BK-API-2", "ACC-404").await;
    let saga_id = json["sagaId"].as_str().unwrap().to_string();

    let saga = app.wait_for_status(&saga_id, "COMPENSATED").await;
    assert_eq!(
        saga["errorMessage"],
        "Step 'credit_destination' failed: Account not found: ACC-404"
    );
    assert_eq!(app.accounts.balance("ACC-1"), Some(1_000));

    // Compensating again is a no-op.
    let (status, outcome) = app
        .send("POST", &format!("/api/v1/sagas/{saga_id}/compensate"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome["fullyCompensated"], true);
    assert_eq!(outcome["compensatedSteps"], json!([]));

    // Terminal sagas cannot be aborted.
    let (status, body) = app
        .send("POST", &format!("/api/v1/sagas/{saga_id}/abort"), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_rejections() {
    let app = setup();

    let (status, _) = app.start_transfer("BK-API-3", "ACC-2").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.start_transfer("BK-API-3", "ACC-2").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        body["error"],
        "Saga with business key 'BK-API-3' already exists"
    );

    let (status, _) = app
        .send(
            "POST",
            "/api/v1/sagas",
            Some(json!({ "businessKey": "BK-X", "sagaType": "REFUND" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(
            "POST",
            "/api/v1/sagas",
            Some(json!({ "businessKey": "", "sagaType": "TRANSFER" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing required field: businessKey");
}

#[tokio::test]
async fn test_lookup_errors() {
    let app = setup();

    let (status, _) = app.send("GET", "/api/v1/sagas/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown = "00000000-0000-4000-8000-000000000000";
    let (status, _) = app
        .send("GET", &format!("/api/v1/sagas/{unknown}"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send("GET", "/api/v1/sagas/business-key/missing", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_first_step_can_be_retried() {
    let app = setup();
    app.transactions.set_fail_on_create(true);

    let (_, json) = app.start_transfer("BK-API-4", "ACC-2").await;
    let saga_id = json["sagaId"].as_str().unwrap().to_string();
    app.wait_for_status(&saga_id, "FAILED").await;

    let (status, needing) = app
        .send("GET", "/api/v1/sagas/compensation-needed", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(needing.as_array().unwrap().len(), 1);

    let (_, health) = app.send("GET", "/api/v1/sagas/health", None).await;
    assert_eq!(health["sagasNeedingCompensation"], 1);

    let (_, steps) = app
        .send("GET", &format!("/api/v1/sagas/{saga_id}/steps"), None)
        .await;
    let step_id = steps[0]["stepId"].as_str().unwrap().to_string();
    assert_eq!(steps[0]["status"], "FAILED");

    app.transactions.set_fail_on_create(false);
    let (status, retried) = app
        .send(
            "POST",
            &format!("/api/v1/sagas/{saga_id}/steps/{step_id}/retry"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retried["retryCount"], 1);

    app.wait_for_status(&saga_id, "COMPLETED").await;
}

#[tokio::test]
async fn test_abort_failed_saga() {
    let app = setup();
    app.transactions.set_fail_on_create(true);

    let (_, json) = app.start_transfer("BK-API-5", "ACC-2").await;
    let saga_id = json["sagaId"].as_str().unwrap().to_string();
    app.wait_for_status(&saga_id, "FAILED").await;

    let (status, aborted) = app
        .send(
            "POST",
            &format!("/api/v1/sagas/{saga_id}/abort?reason=operator%20stop"),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(aborted["status"], "ABORTED");
    assert_eq!(aborted["errorMessage"], "operator stop");

    let (_, needing) = app
        .send("GET", "/api/v1/sagas/compensation-needed", None)
        .await;
    assert!(needing.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; version=0.0.4; charset=utf-8"
    );
}
