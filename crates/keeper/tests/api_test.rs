//! Integration tests for the REST API and server startup

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use keeper::{AppState, Config, KeeperServer, KvStore, RegistryService, router};
use registry::probe::HealthProbe;
use registry::storage::{JsonFileStore, MemoryStore, RegistrationStore};
use registry::types::{HealthCheck, Registration, Status};
use registry::{Registry, RegistryMetrics, TaskContext};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct DownProbe;

#[async_trait::async_trait]
impl HealthProbe for DownProbe {
    async fn probe(&self, _registration: &Registration) -> Status {
        Status::Down
    }

    fn name(&self) -> &str {
        "down"
    }
}

fn app() -> Router {
    let store = Arc::new(MemoryStore::new());
    let metrics = Arc::new(RegistryMetrics::new());
    let registry = Arc::new(Registry::new(
        TaskContext::new(Arc::new(DownProbe), store.clone(), CancellationToken::new())
            .with_metrics(metrics.clone()),
    ));

    router(AppState {
        service: Arc::new(RegistryService::new(store, registry)),
        kv: Arc::new(KvStore::default()),
        metrics: Some(metrics),
    })
}

fn registration_json(id: &str) -> Value {
    json!({
        "serviceId": id,
        "host": "localhost",
        "port": 59880,
        "healthCheck": { "type": "http", "path": "/api/v3/ping", "interval": "10s" }
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

#[tokio::test(start_paused = true)]
async fn test_ping() {
    let app = app();
    let (status, body) = send(&app, "GET", "/api/v3/ping", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["apiVersion"], "v3");
    assert_eq!(body["serviceName"], "core-keeper");
}

#[tokio::test(start_paused = true)]
async fn test_registration_lifecycle() {
    let app = app();

    let (status, body) = send(&app, "POST", "/api/v3/registry", Some(registration_json("core-data"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "UNKNOWN");

    let (status, _) = send(&app, "POST", "/api/v3/registry", Some(registration_json("core-data"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, "GET", "/api/v3/registry/serviceId/core-data", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthCheck"]["interval"], "10s");

    let mut halt = registration_json("core-data");
    halt["status"] = json!("HALT");
    let (status, _) = send(&app, "PUT", "/api/v3/registry", Some(halt)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", "/api/v3/registry/all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (_, body) = send(&app, "GET", "/api/v3/registry/all?deregistered=true", None).await;
    assert_eq!(body.as_array().map(Vec::len), Some(1));
    assert_eq!(body[0]["status"], "HALT");

    let (status, _) = send(&app, "DELETE", "/api/v3/registry/serviceId/core-data", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "GET", "/api/v3/registry/serviceId/core-data", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["statusCode"], 404);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_registration_is_bad_request() {
    let app = app();

    let mut bad = registration_json("core-data");
    bad["healthCheck"]["interval"] = json!("often");
    let (status, body) = send(&app, "POST", "/api/v3/registry", Some(bad)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("interval"));
}

#[tokio::test(start_paused = true)]
async fn test_kv_endpoints() {
    let app = app();

    let (status, body) = send(
        &app,
        "PUT",
        "/api/v3/kvs/key/edgex/core-data?flatten=true",
        Some(json!({ "Writable": { "LogLevel": "INFO" }, "Port": 59880 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().map(Vec::len), Some(2));

    let (_, body) = send(&app, "GET", "/api/v3/kvs/key/edgex/core-data?keyOnly=true", None).await;
    assert_eq!(body, json!(["edgex/core-data/Port", "edgex/core-data/Writable/LogLevel"]));

    let (_, body) = send(&app, "GET", "/api/v3/kvs/key/edgex/core-data?tree=true", None).await;
    assert_eq!(body, json!({ "Writable": { "LogLevel": "INFO" }, "Port": 59880 }));

    let (_, body) = send(&app, "GET", "/api/v3/kvs/key/edgex/core-data/Port", None).await;
    assert_eq!(body, json!([{ "key": "edgex/core-data/Port", "value": 59880 }]));

    let (status, _) = send(&app, "DELETE", "/api/v3/kvs/key/edgex?prefixMatch=true", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "GET", "/api/v3/kvs/key/edgex", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn test_metrics_endpoint() {
    let app = app();
    send(&app, "POST", "/api/v3/registry", Some(registration_json("core-data"))).await;

    let (status, body) = send(&app, "GET", "/metrics", None).await;
    assert_eq!(status, StatusCode::OK);

    let text = body.as_str().unwrap();
    assert!(text.contains("keeper_registry_operations_total{operation=\"register\"} 1"));
    assert!(text.contains("keeper_health_tasks_active 1"));
}

async fn spawn_healthy_service() -> std::net::SocketAddr {
    let app = Router::new().route("/api/v3/ping", axum::routing::get(|| async { "pong" }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn test_server_reconciles_persisted_registrations() {
    let healthy = spawn_healthy_service().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registrations.json");

    {
        let store = JsonFileStore::open(&path).await.unwrap();
        let active = Registration::new(
            "core-data",
            healthy.ip().to_string(),
            healthy.port(),
            HealthCheck {
                scheme: "http".to_string(),
                path: "/api/v3/ping".to_string(),
                interval: "200ms".to_string(),
            },
        );
        let mut retired = active.clone();
        retired.service_id = "retired".to_string();
        retired.status = Status::Halt;
        store.add_registration(active).await.unwrap();
        store.add_registration(retired).await.unwrap();
    }

    let mut config = Config::default();
    config.storage.path = Some(path.clone());
    config.service.request_timeout = Duration::from_secs(1);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let server = tokio::spawn(KeeperServer::new(config).run_with_listener(listener, shutdown.clone()));

    let client = reqwest::Client::new();
    let url = format!("http://{}/api/v3/registry/serviceId/core-data", addr);
    let came_up = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(response) = client.get(&url).send().await
                && let Ok(text) = response.text().await
                && let Ok(body) = serde_json::from_str::<Value>(&text)
                && body["status"] == "UP"
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(came_up.is_ok(), "core-data never reported up");

    let text = client
        .get(format!("http://{}/api/v3/registry/serviceId/retired", addr))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let retired: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(retired["status"], "HALT");

    shutdown.cancel();
    let result = server.await.unwrap();
    tokio_test::assert_ok!(result);
}

#[tokio::test]
async fn test_server_fails_on_unreadable_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registrations.json");
    std::fs::write(&path, "[ truncated").unwrap();

    let mut config = Config::default();
    config.storage.path = Some(path);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let result = KeeperServer::new(config)
        .run_with_listener(listener, CancellationToken::new())
        .await;

    tokio_test::assert_err!(result);
}
