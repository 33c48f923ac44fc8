//! Axum-based HTTP control API
//!
//! Read endpoints serve the latest published snapshot and never touch the
//! vendor cloud. Settings changes and reconnects go through the [`Bridge`].
//! With the `openapi` feature the routes are also described under `/docs`.

use crate::bridge::Bridge;
use crate::error::BridgeError;
use crate::health::HealthStatus;
use crate::settings::SettingsPatch;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
}

/// Maps bridge errors onto HTTP status codes
pub struct ApiError(pub BridgeError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BridgeError::Validation { .. } | BridgeError::Serialization { .. } => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::Auth { .. }
            | BridgeError::Network { .. }
            | BridgeError::Timeout { .. }
            | BridgeError::Data { .. }
            | BridgeError::Api { .. } => StatusCode::BAD_GATEWAY,
            BridgeError::Interrupted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(e: BridgeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut body = serde_json::json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        if let BridgeError::Validation { field, .. } = &self.0 {
            body["field"] = serde_json::json!(field);
        }
        (status, Json(body)).into_response()
    }
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/health", responses(
    (status = 200, description = "Healthy or degraded"),
    (status = 503, description = "Consecutive failures reached the threshold")
)))]
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.bridge.check_health();
    let code = match report.status {
        HealthStatus::Failed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (code, Json(report))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/status", responses((status = 200))))]
async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.bridge.snapshot().as_ref().clone())
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/metrics", responses((status = 200))))]
async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snap = state.bridge.snapshot();
    Json(serde_json::json!({
        "timestamp": snap.timestamp,
        "realtime": snap.realtime,
        "statistics": snap.statistics,
        "daily": snap.daily,
    }))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/settings", responses(
    (status = 200, description = "Last confirmed settings"),
    (status = 502, description = "No confirmed settings and the vendor read failed")
)))]
async fn get_settings(State(state): State<AppState>) -> Result<Response, ApiError> {
    if let Some(settings) = state.bridge.confirmed_settings() {
        return Ok(Json(settings).into_response());
    }
    let settings = state.bridge.refresh_settings().await?;
    Ok(Json(settings).into_response())
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/settings", responses(
    (status = 200, description = "Outcome of the change"),
    (status = 400, description = "Rejected before contacting the vendor"),
    (status = 502, description = "Vendor or transport failure")
)))]
async fn post_settings(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Response, ApiError> {
    let patch: SettingsPatch = serde_json::from_value(body)
        .map_err(|e| BridgeError::validation("body", e.to_string()))?;
    let outcome = state.bridge.apply_settings(patch).await?;
    Ok(Json(outcome).into_response())
}

#[cfg_attr(feature = "openapi", utoipa::path(post, path = "/api/reconnect", responses((status = 200))))]
async fn reconnect(State(state): State<AppState>) -> impl IntoResponse {
    state.bridge.force_reconnect().await;
    Json(serde_json::json!({"ok": true, "health": state.bridge.check_health()}))
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/config", responses((status = 200))))]
async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.bridge.config().redacted())
}

#[cfg_attr(feature = "openapi", utoipa::path(get, path = "/api/events", responses((status = 200))))]
async fn events(State(state): State<AppState>) -> impl IntoResponse {
    let stream = WatchStream::new(state.bridge.subscribe())
        .map(|snap| Event::default().event("snapshot").json_data(&*snap));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(feature = "openapi")]
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(
        health, status, metrics, get_settings, post_settings,
        reconnect, get_config, events,
    ),
    tags((name = "bytewatt-bridge", description = "Byte-Watt bridge control API"))
)]
pub struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(status))
        .route("/api/metrics", get(metrics))
        .route("/api/settings", get(get_settings).post(post_settings))
        .route("/api/reconnect", post(reconnect))
        .route("/api/config", get(get_config))
        .route("/api/events", get(events));

    #[cfg(feature = "openapi")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()),
        )
    };

    router
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve the control API until the bridge shuts down
pub async fn serve(bridge: Arc<Bridge>, host: &str, port: u16) -> anyhow::Result<()> {
    let state = AppState {
        bridge: bridge.clone(),
    };
    let router = build_router(state);

    let logger = crate::logging::get_logger("web");
    logger.info(&format!(
        "Starting web server; requested host={}, port={}",
        host, port
    ));

    let addr = match host.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, port),
        Err(_) => {
            logger.warn(&format!(
                "Invalid host '{}'; falling back to 127.0.0.1",
                host
            ));
            ([127, 0, 0, 1], port).into()
        }
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    logger.info(&format!(
        "Web server listening at http://{}:{}",
        local_addr.ip(),
        local_addr.port()
    ));

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { bridge.wait_for_shutdown().await })
        .await?;
    logger.info("Web server stopped");
    Ok(())
}
