//! REST API for the registry, the key-value store and metrics.

use crate::kv::KvStore;
use crate::service::RegistryService;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use common::{Error, ErrorKind};
use registry::types::now_millis;
use registry::{Registration, RegistryMetrics};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const API_VERSION: &str = "v3";
pub const SERVICE_NAME: &str = "core-keeper";

/// Shared state of all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<RegistryService>,
    pub kv: Arc<KvStore>,
    pub metrics: Option<Arc<RegistryMetrics>>,
}

/// Error response carrying a [`common::Error`]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            ErrorKind::ContractInvalid => StatusCode::BAD_REQUEST,
            ErrorKind::EntityDoesNotExist => StatusCode::NOT_FOUND,
            ErrorKind::DuplicateName => StatusCode::CONFLICT,
            ErrorKind::ServerError => {
                warn!(error = %self.0, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(json!({
                "apiVersion": API_VERSION,
                "statusCode": status.as_u16(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationQuery {
    #[serde(default)]
    pub deregistered: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvReadQuery {
    #[serde(default)]
    pub key_only: bool,
    #[serde(default)]
    pub tree: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvWriteQuery {
    #[serde(default)]
    pub flatten: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KvDeleteQuery {
    #[serde(default)]
    pub prefix_match: bool,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v3/ping", get(ping))
        .route(
            "/api/v3/registry",
            axum::routing::post(add_registration).put(update_registration),
        )
        .route("/api/v3/registry/all", get(all_registrations))
        .route(
            "/api/v3/registry/serviceId/:service_id",
            get(registration_by_service_id).delete(delete_registration),
        )
        .route(
            "/api/v3/kvs/key/*key",
            get(kv_get).put(kv_put).delete(kv_delete),
        )
        .route("/metrics", get(metrics_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

async fn ping() -> Json<Value> {
    Json(json!({
        "apiVersion": API_VERSION,
        "serviceName": SERVICE_NAME,
        "timestamp": now_millis(),
    }))
}

async fn add_registration(
    State(state): State<AppState>,
    Json(registration): Json<Registration>,
) -> ApiResult<(StatusCode, Json<Registration>)> {
    let stored = state.service.add_registration(registration).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_registration(
    State(state): State<AppState>,
    Json(registration): Json<Registration>,
) -> ApiResult<StatusCode> {
    state.service.update_registration(registration).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn all_registrations(
    State(state): State<AppState>,
    Query(query): Query<RegistrationQuery>,
) -> ApiResult<Json<Vec<Registration>>> {
    Ok(Json(state.service.registrations(query.deregistered).await?))
}

async fn registration_by_service_id(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> ApiResult<Json<Registration>> {
    Ok(Json(
        state.service.registration_by_service_id(&service_id).await?,
    ))
}

async fn delete_registration(
    State(state): State<AppState>,
    Path(service_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.delete_registration(&service_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn kv_get(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<KvReadQuery>,
) -> ApiResult<Json<Value>> {
    let body = if query.tree {
        state.kv.get_tree(&key).await?
    } else if query.key_only {
        json!(state.kv.keys(&key).await?)
    } else {
        json!(state.kv.get(&key).await?)
    };
    Ok(Json(body))
}

async fn kv_put(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<KvWriteQuery>,
    Json(value): Json<Value>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.kv.put(&key, value, query.flatten).await?))
}

async fn kv_delete(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<KvDeleteQuery>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.kv.delete(&key, query.prefix_match).await?))
}

/// Handler for /metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let Some(registry) = state.metrics else {
        return (StatusCode::NOT_FOUND, "metrics disabled").into_response();
    };

    match registry.encode() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// HTTP server for the REST API
pub struct ApiServer {
    state: AppState,
}

impl ApiServer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    /// Serve on `listener` until `shutdown` is cancelled
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> common::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(listen_addr = %local_addr, "REST API listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("REST API stopped");
        Ok(())
    }
}
