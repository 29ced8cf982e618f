//! HTTP server implementation using axum.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use pulse_core::RelayMessage;
use pulse_telemetry::Metrics;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::config::DashboardConfig;
use crate::control::{
    ConfigureSources, ControlError, ControlResponse, RelayControl, ResetTagRequest, StatusResponse,
};
use crate::registry::SubscriberId;

/// Connection limiter to cap concurrent subscriber connections.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot, held until the guard drops.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        loop {
            let current = self.current.load(Ordering::Acquire);
            if current >= self.max {
                return None;
            }
            if self
                .current
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Some(ConnectionGuard {
                    limiter: Arc::clone(self),
                });
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    broadcaster: Arc<Broadcaster>,
    control: Arc<dyn RelayControl>,
    connection_limiter: Arc<ConnectionLimiter>,
    config: DashboardConfig,
}

impl AppState {
    pub fn new(
        broadcaster: Arc<Broadcaster>,
        control: Arc<dyn RelayControl>,
        config: DashboardConfig,
    ) -> Self {
        Self {
            broadcaster,
            control,
            connection_limiter: Arc::new(ConnectionLimiter::new(config.max_connections)),
            config,
        }
    }
}

/// Create the axum router.
pub fn create_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/", get(serve_index))
        .route("/ws", get(ws_handler))
        .route("/status", get(get_status))
        .route("/api/snapshot", get(get_snapshot))
        .route("/metrics", get(get_metrics))
        .route("/set_wss_url", post(set_wss_url))
        .route("/disconnect_all", post(disconnect_all))
        .route("/reset_max_values", post(reset_max_values))
        .route("/reset_max_values_tag", post(reset_max_values_tag))
        .nest_service("/static", static_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the index HTML page.
async fn serve_index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

/// Current merged roster. Empty player list before any team has reported.
async fn get_snapshot(State(state): State<AppState>) -> Json<RelayMessage> {
    Json(
        state
            .broadcaster
            .snapshot()
            .unwrap_or_else(|| RelayMessage::snapshot(Vec::new())),
    )
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.control.status().into())
}

async fn get_metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn set_wss_url(
    State(state): State<AppState>,
    Json(request): Json<ConfigureSources>,
) -> Result<Json<ControlResponse>, ControlError> {
    let bindings = request.bindings().map_err(|e| {
        warn!(error = %e, "Rejected source configuration");
        e
    })?;

    let count = state.control.configure_sources(bindings);
    Ok(Json(ControlResponse {
        connected_count: Some(count),
        ..ControlResponse::success(format!("Connected to {count} source(s)"))
    }))
}

async fn disconnect_all(State(state): State<AppState>) -> Json<ControlResponse> {
    state.control.disconnect_all();
    Json(ControlResponse::success("All connections closed"))
}

async fn reset_max_values(State(state): State<AppState>) -> Json<ControlResponse> {
    state.control.reset_all_maxima();
    Json(ControlResponse::success("Max speed and heart rate values cleared"))
}

async fn reset_max_values_tag(
    State(state): State<AppState>,
    Json(request): Json<ResetTagRequest>,
) -> Json<ControlResponse> {
    state.control.reset_maxima_for_tag(request.tag);
    Json(ControlResponse::success(format!(
        "Max values cleared for {}",
        request.tag
    )))
}

/// WebSocket upgrade handler.
async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let guard = match state.connection_limiter.try_acquire() {
        Some(guard) => guard,
        None => {
            warn!(
                current = state.connection_limiter.current_count(),
                max = state.config.max_connections,
                "Subscriber connection limit reached"
            );
            return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_subscriber(socket, state, guard))
}

/// Client request on the subscriber socket.
#[derive(Debug, Deserialize)]
struct ClientRequest {
    #[serde(rename = "type")]
    kind: String,
}

/// Why the incoming half stopped.
#[derive(Debug)]
enum IncomingEnd {
    /// Client sent the literal `disconnect`.
    Requested,
    Closed,
}

/// Handle one subscriber connection.
async fn handle_subscriber(socket: WebSocket, state: AppState, _guard: ConnectionGuard) {
    let registry = Arc::clone(state.broadcaster.registry());
    let (id, mut outbound) = registry.register();
    Metrics::subscribers(registry.len());
    info!(
        subscriber = %id,
        connections = state.connection_limiter.current_count(),
        "Subscriber connected"
    );

    let (mut sender, mut receiver) = socket.split();

    // Initial snapshot goes through the queue like any other message
    state.broadcaster.send_snapshot_to(id);

    let broadcaster = Arc::clone(&state.broadcaster);
    let mut incoming_task =
        tokio::spawn(async move { read_incoming(&mut receiver, &broadcaster, id).await });

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else {
                    debug!(subscriber = %id, "Subscriber dropped by registry");
                    break;
                };
                if sender.send(Message::Text(payload.to_string().into())).await.is_err() {
                    debug!(subscriber = %id, "Failed to send message, client disconnected");
                    break;
                }
            }
            end = &mut incoming_task => {
                if matches!(end, Ok(IncomingEnd::Requested)) {
                    if let Err(e) = sender.send(Message::Close(None)).await {
                        debug!(subscriber = %id, error = %e, "Failed to send Close frame");
                    }
                }
                break;
            }
        }
    }

    incoming_task.abort();
    registry.unregister(id);
    Metrics::subscribers(registry.len());
    info!(subscriber = %id, "Subscriber disconnected");
}

async fn read_incoming(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    broadcaster: &Broadcaster,
    id: SubscriberId,
) -> IncomingEnd {
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                let text = text.as_str();
                if text == "disconnect" {
                    debug!(subscriber = %id, "Client requested disconnect");
                    return IncomingEnd::Requested;
                }
                match serde_json::from_str::<ClientRequest>(text) {
                    Ok(request) if request.kind == "get_initial_data" => {
                        broadcaster.send_snapshot_to(id);
                    }
                    _ => debug!(subscriber = %id, "Ignoring client message"),
                }
            }
            Ok(Message::Close(_)) => {
                debug!(subscriber = %id, "Client sent close frame");
                break;
            }
            Err(e) => {
                debug!(subscriber = %id, error = %e, "WebSocket receive error");
                break;
            }
            _ => {}
        }
    }
    IncomingEnd::Closed
}

/// Bind the listener for the configured address.
pub async fn bind(config: &DashboardConfig) -> std::io::Result<TcpListener> {
    TcpListener::bind(config.listen_addr()).await
}

/// Serve until `shutdown` is cancelled.
pub async fn run_server(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let app = create_router(state);
    info!(addr = ?listener.local_addr().ok(), "Starting relay server");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
