//! HTTP surface: HLS playback, health, stream listings, logs and stats

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::serving::ServingBridge;
use crate::logging::{LogBuffer, LogEntry};
use crate::registry::StreamRegistry;
use crate::stats::{ResourceMonitor, ServerStats};

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<StreamRegistry>,
    pub serving: ServingBridge,
    pub logs: Arc<LogBuffer>,
    pub monitor: Arc<ResourceMonitor>,
}

impl AppState {
    pub fn new(
        registry: Arc<StreamRegistry>,
        logs: Arc<LogBuffer>,
        monitor: Arc<ResourceMonitor>,
    ) -> Self {
        Self {
            serving: ServingBridge::new(Arc::clone(&registry)),
            registry,
            logs,
            monitor,
        }
    }
}

/// One row of `/api/streams`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub key: String,
    /// Bytes per second
    pub bitrate: u64,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);

    let cross_origin = Router::new()
        .route("/live/:key", get(live).options(preflight))
        .route("/live/:key/*rest", get(live).options(preflight))
        .route("/api/streams", get(list_streams))
        .layer(cors);

    Router::new()
        .route("/health", get(health))
        .route("/streams", get(list_stream_keys))
        .route("/api/logs", get(logs))
        .route("/api/stats", get(stats))
        .merge(cross_origin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn live(
    State(state): State<AppState>,
    Path(params): Path<HashMap<String, String>>,
    request: Request<Body>,
) -> Response {
    let key = params.get("key").map(String::as_str).unwrap_or_default();
    state.serving.handle(key, request).await
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn health() -> &'static str {
    "OK"
}

async fn list_streams(State(state): State<AppState>) -> Json<Vec<StreamSummary>> {
    let streams = state
        .registry
        .all_active()
        .await
        .into_iter()
        .map(|info| StreamSummary {
            key: info.key,
            bitrate: info.bitrate,
        })
        .collect();
    Json(streams)
}

async fn list_stream_keys(State(state): State<AppState>) -> impl IntoResponse {
    let body: String = state
        .registry
        .all_active()
        .await
        .into_iter()
        .map(|info| info.key + "\n")
        .collect();
    ([(header::CONTENT_TYPE, "text/plain")], body)
}

async fn logs(State(state): State<AppState>) -> Json<Vec<LogEntry>> {
    Json(state.logs.entries())
}

async fn stats(State(state): State<AppState>) -> Json<ServerStats> {
    let active = state.registry.count().await;
    Json(state.monitor.snapshot(active))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use tower::ServiceExt;

    use crate::registry::StreamKey;

    fn state() -> AppState {
        AppState::new(
            Arc::new(StreamRegistry::new()),
            Arc::new(LogBuffer::new()),
            Arc::new(ResourceMonitor::new()),
        )
    }

    async fn get_body(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = get_body(router(state()), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_stream_listings() {
        let state = state();
        state.registry.get_or_create(&StreamKey::new("b")).await;
        state.registry.get_or_create(&StreamKey::new("a")).await;

        let (_, body) = get_body(router(state.clone()), "/api/streams").await;
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([{"key": "a", "bitrate": 0}, {"key": "b", "bitrate": 0}])
        );

        let (status, body) = get_body(router(state.clone()), "/streams").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "a\nb\n");

        state.registry.remove(&StreamKey::new("a")).await;
        let (_, body) = get_body(router(state), "/streams").await;
        assert_eq!(body, "b\n");
    }

    #[tokio::test]
    async fn test_empty_listing_is_empty_array() {
        let (_, body) = get_body(router(state()), "/api/streams").await;
        assert_eq!(body, "[]");
    }

    #[tokio::test]
    async fn test_live_unknown_key_not_found() {
        let (status, _) = get_body(router(state()), "/live/nope/index.m3u8").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_live_options_has_cors() {
        let response = router(state())
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/live/cam/index.m3u8")
                    .header(header::ORIGIN, "http://player.example")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response.status().is_success());
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn test_stats_and_logs() {
        let state = state();
        state.logs.push(crate::logging::LogLevel::Info, "hello");
        state.monitor.connection_opened();

        let (_, body) = get_body(router(state.clone()), "/api/stats").await;
        let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(stats["total_connections"], 1);
        assert_eq!(stats["active_streams"], 0);

        let (_, body) = get_body(router(state), "/api/logs").await;
        let logs: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(logs[0]["message"], "hello");
        assert_eq!(logs[0]["level"], "INFO");
    }
}
