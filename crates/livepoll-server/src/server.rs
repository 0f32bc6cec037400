use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use livepoll_core::roster::Role;
use livepoll_telemetry::{MetricsRecorder, TelemetryGuard};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::client::{self, ClientRegistry};
use crate::config::ServerConfig;
use crate::fanout::Fanout;
use crate::session::{self, SessionHandle};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub clients: Arc<ClientRegistry>,
    pub metrics: Arc<MetricsRecorder>,
    pub heartbeat: Duration,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState, cors_permissive: bool) -> Router {
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/poll/current", get(current_poll_handler))
        .route("/api/poll/results", get(results_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http());
    if cors_permissive {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Bind, spawn the session and the HTTP server. Returns once listening.
pub async fn start(
    config: ServerConfig,
    telemetry: &TelemetryGuard,
) -> Result<ServerHandle, std::io::Error> {
    let metrics = telemetry.metrics();
    let clients = Arc::new(ClientRegistry::new(
        config.max_send_queue,
        config.client_timeout(),
    ));

    let (session, session_task) = session::spawn(
        Fanout::new(Arc::clone(&clients)),
        Arc::clone(&metrics),
        config.command_buffer,
    );

    let cleanup = client::start_cleanup_task(Arc::clone(&clients), config.heartbeat_interval());

    let state = AppState {
        session: session.clone(),
        clients,
        metrics,
        heartbeat: config.heartbeat_interval(),
    };
    let router = build_router(state, config.cors_permissive);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "livepoll server started");

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
        {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        local_addr,
        session,
        shutdown,
        server,
        session_task,
        cleanup,
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    pub local_addr: SocketAddr,
    session: SessionHandle,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
    session_task: JoinHandle<()>,
    cleanup: JoinHandle<()>,
}

impl ServerHandle {
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    pub fn http_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Stop accepting connections and wait (bounded) for the server to drain.
    pub async fn shutdown(self) {
        tracing::info!("shutting down");
        self.shutdown.cancel();
        self.cleanup.abort();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.server).await.is_err() {
            tracing::warn!("server did not drain within {SHUTDOWN_TIMEOUT:?}");
        }
        // Open sockets still hold session handles.
        self.session_task.abort();
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (conn, rx) = state.clients.register();
    state
        .metrics
        .gauge_set("connections", &[], state.clients.count() as f64);
    tracing::info!(conn = %conn, "websocket client connected");

    client::handle_ws_connection(
        socket,
        conn,
        rx,
        Arc::clone(&state.clients),
        state.heartbeat,
        state.session.clone(),
    )
    .await;

    state
        .metrics
        .gauge_set("connections", &[], state.clients.count() as f64);
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.session.snapshot();
    Json(json!({
        "status": "healthy",
        "connections": state.clients.count(),
        "teachers": state.clients.count_role(Role::Teacher),
        "students": snapshot.students,
        "poll": snapshot.poll.as_ref().map(|p| p.status),
    }))
}

async fn current_poll_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.snapshot().poll)
}

async fn results_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.snapshot().results)
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}
