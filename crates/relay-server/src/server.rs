//! `RelayServer` — Axum HTTP + WebSocket server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use relay_core::ids::ConversationId;
use relay_rpc::{HandlerRouter, HubContext};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::health::{self, HealthResponse};
use crate::metrics as metrics_setup;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::reaper::run_reaper;
use crate::websocket::registry::ConnectionRegistry;
use crate::websocket::session::run_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Connection registry for fan-out and counts.
    pub registry: Arc<ConnectionRegistry>,
    /// Handler router for request dispatch.
    pub router: Arc<HandlerRouter>,
    /// Context handed into every action handler.
    pub ctx: Arc<HubContext>,
    /// Token verifier consulted before each upgrade.
    pub verifier: Arc<dyn TokenVerifier>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus render handle, if this process installed the recorder.
    pub metrics_handle: Option<PrometheusHandle>,
    /// Server configuration.
    pub config: ServerConfig,
}

/// The main Relay server.
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<ConnectionRegistry>,
    handler_router: Arc<HandlerRouter>,
    ctx: Arc<HubContext>,
    verifier: Arc<dyn TokenVerifier>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: Option<PrometheusHandle>,
}

impl RelayServer {
    /// Create a new server.
    ///
    /// The registry is passed in (rather than created here) because the
    /// caller wires its group listeners into the dispatcher before the
    /// context exists.
    pub fn new(
        config: ServerConfig,
        registry: Arc<ConnectionRegistry>,
        handler_router: HandlerRouter,
        ctx: HubContext,
        verifier: impl TokenVerifier + 'static,
    ) -> Self {
        Self {
            config,
            registry,
            handler_router: Arc::new(handler_router),
            ctx: Arc::new(ctx),
            verifier: Arc::new(verifier),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle: metrics_setup::install_recorder(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            router: self.handler_router.clone(),
            ctx: self.ctx.clone(),
            verifier: self.verifier.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
            config: self.config.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind, spawn the reaper, and serve until shutdown.
    ///
    /// Returns the bound address (port 0 in the config auto-assigns one).
    pub async fn listen(&self) -> std::io::Result<SocketAddr> {
        let listener =
            tokio::net::TcpListener::bind((self.config.host.as_str(), self.config.port)).await?;
        let addr = listener.local_addr()?;

        // The reaper shares the shutdown token and stops with the server.
        let _reaper = tokio::spawn(run_reaper(
            self.registry.clone(),
            self.config.heartbeat_interval(),
            self.config.idle_cutoff(),
            self.shutdown.token(),
        ));

        let app = self.router();
        let token = self.shutdown.token();
        let _server = tokio::spawn(async move {
            let serve = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                tracing::error!(error = %e, "server error");
            }
        });

        info!(%addr, "relay server listening");
        Ok(addr)
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

/// Extract a bearer token from the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(ToOwned::to_owned)
}

/// GET /ws — authenticate, then upgrade into the lifecycle loop.
async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    // Best-effort admission: the count is read before the upgrade completes,
    // so concurrent handshakes can briefly overshoot `max_connections`.
    if state.registry.connection_count().await >= state.config.max_connections {
        counter!("ws_upgrades_refused_total", "reason" => "capacity").increment(1);
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let token = params
        .get("token")
        .cloned()
        .or_else(|| bearer_token(&headers));
    let user_id = match token {
        Some(token) => match state.verifier.verify(&token).await {
            Some(user_id) => Some(user_id),
            None => {
                counter!("ws_upgrades_refused_total", "reason" => "invalid_token").increment(1);
                return StatusCode::UNAUTHORIZED.into_response();
            }
        },
        None if state.config.allow_anonymous => None,
        None => {
            counter!("ws_upgrades_refused_total", "reason" => "missing_token").increment(1);
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    let conversation_id = params
        .get("conversation_id")
        .map(|s| ConversationId::from(s.as_str()));
    let receive_timeout = state.config.receive_timeout();

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| {
            run_session(
                socket,
                user_id,
                conversation_id,
                state.registry,
                state.router,
                state.ctx,
                receive_timeout,
            )
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.connection_count().await;
    Json(health::health_check(state.start_time, connections))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics_handle {
        Some(handle) => metrics_setup::render(&handle).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}
