//! `LiveServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use livefolio_core::DomainEvent;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::connection::ConnectionHandle;
use crate::dispatcher::{EventBus, EventDispatcher};
use crate::error::ServerError;
use crate::health::{self, HealthResponse};
use crate::metrics::{EVENTS_PUBLISHED_TOTAL, WS_CONNECTIONS_REJECTED_TOTAL};
use crate::registry::ConnectionRegistry;
use crate::session::{Heartbeat, SessionContext, run_ws_session};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Per-user connection registry.
    pub registry: Arc<ConnectionRegistry>,
    /// Domain event bus fed by `POST /events`.
    pub bus: EventBus,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics_handle: PrometheusHandle,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Open WebSocket sockets, subscribed or not.
    pub active_sockets: Arc<AtomicUsize>,
}

/// The livefolio server.
pub struct LiveServer {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    bus: EventBus,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics_handle: PrometheusHandle,
    active_sockets: Arc<AtomicUsize>,
}

impl LiveServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, metrics_handle: PrometheusHandle) -> Self {
        let bus = EventBus::new(config.event_bus_capacity);
        Self {
            config: Arc::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            bus,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics_handle,
            active_sockets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            registry: self.registry.clone(),
            bus: self.bus.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            metrics_handle: self.metrics_handle.clone(),
            config: self.config.clone(),
            active_sockets: self.active_sockets.clone(),
        };

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/events", post(publish_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// A dispatcher wired to this server's registry.
    pub fn dispatcher(&self) -> EventDispatcher {
        EventDispatcher::new(self.registry.clone())
    }

    /// Bind, start the dispatcher, and serve until shutdown.
    ///
    /// Returns the bound address and a handle that completes once both the
    /// HTTP server and the dispatcher have stopped.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(ServerError::Serve)?;

        let token = self.shutdown.token();
        let dispatcher = self.dispatcher().spawn(&self.bus, token.clone());
        let router = self.router();

        info!(%local_addr, "livefolio server listening");
        let handle = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await;
            if let Err(e) = served {
                error!(error = %e, "server stopped with error");
            }
            let _ = dispatcher.await;
            info!("livefolio server stopped");
        });

        Ok((local_addr, handle))
    }

    /// Per-user connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Domain event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Open WebSocket sockets.
    pub fn active_sockets(&self) -> usize {
        self.active_sockets.load(Ordering::SeqCst)
    }
}

/// Holds one slot of the connection limit until dropped.
struct SocketSlot(Arc<AtomicUsize>);

impl SocketSlot {
    fn try_acquire(counter: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .ok()
            .map(|_| Self(Arc::clone(counter)))
    }
}

impl Drop for SocketSlot {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// GET /ws
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "shutting down").into_response();
    }
    let Some(slot) = SocketSlot::try_acquire(&state.active_sockets, state.config.max_connections)
    else {
        warn!(limit = state.config.max_connections, "rejecting websocket upgrade, at capacity");
        counter!(WS_CONNECTIONS_REJECTED_TOTAL).increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let _slot = slot;
            let (tx, rx) = mpsc::channel(state.config.send_queue_capacity.max(1));
            let handle = Arc::new(ConnectionHandle::new(tx));
            let ctx = SessionContext {
                registry: state.registry,
                heartbeat: Heartbeat {
                    interval: state.config.heartbeat_interval(),
                    timeout: state.config.heartbeat_timeout(),
                },
                shutdown: state.shutdown.token(),
            };
            run_ws_session(socket, handle, rx, ctx).await;
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.registry.connection_count(),
        state.registry.user_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics_handle.render(),
    )
}

/// POST /events
async fn publish_handler(
    State(state): State<AppState>,
    body: Result<Json<DomainEvent>, JsonRejection>,
) -> Response {
    match body {
        Ok(Json(event)) => {
            let user_id = event.target_user_id;
            let receivers = state.bus.publish(event);
            counter!(EVENTS_PUBLISHED_TOTAL).increment(1);
            debug!(%user_id, receivers, "domain event published");
            (StatusCode::ACCEPTED, Json(json!({ "accepted": true }))).into_response()
        }
        Err(rejection) => {
            let message = rejection.body_text();
            debug!(error = %message, "rejecting malformed domain event");
            (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
        }
    }
}
