//! `HubServer`: axum HTTP and WebSocket host for a hub endpoint.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use switchboard_settings::ServerSettings;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::endpoint::{ConnectionInfo, HubEndpoint};
use crate::health::{self, HealthResponse};
use crate::shutdown::ShutdownCoordinator;
use crate::transport;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The hub served on the WebSocket route.
    pub endpoint: HubEndpoint,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// HTTP host for one hub.
pub struct HubServer {
    settings: ServerSettings,
    endpoint: HubEndpoint,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

impl HubServer {
    /// Create a server. Shutdown is driven by the endpoint's token.
    pub fn new(
        settings: ServerSettings,
        endpoint: HubEndpoint,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::with_token(
            endpoint.shutdown_token().clone(),
        ));
        Self {
            settings,
            endpoint,
            shutdown,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            endpoint: self.endpoint.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route(&self.settings.path, get(ws_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind((self.settings.host.as_str(), self.settings.port)).await
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        let addr = listener.local_addr()?;
        info!(%addr, path = %self.settings.path, "hub server listening");
        let token = self.shutdown.token();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    }

    /// Close every connection and wait for sessions to drain.
    pub async fn shutdown_gracefully(&self) -> bool {
        let timeout = Duration::from_millis(self.settings.shutdown_timeout_ms);
        self.shutdown.graceful_shutdown(Some(timeout)).await
    }

    /// The served hub.
    pub fn endpoint(&self) -> &HubEndpoint {
        &self.endpoint
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.endpoint.registry(),
        state.shutdown.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// GET on the hub path: upgrade and run a session.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server is shutting down").into_response();
    }
    ws.on_upgrade(move |socket| async move {
        let (read, write) = transport::split(socket);
        let info = ConnectionInfo {
            binary: true,
            ..ConnectionInfo::default()
        };
        let endpoint = state.endpoint.clone();
        let session = state
            .shutdown
            .track(async move { endpoint.serve_split(read, write, info).await });
        match session.await {
            Ok(Ok(())) => debug!("websocket session ended"),
            Ok(Err(err)) => info!(error = %err, kind = err.kind(), "websocket session ended with error"),
            Err(err) => warn!(error = %err, "websocket session task failed"),
        }
    })
}
