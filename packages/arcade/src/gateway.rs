//! HTTP and WebSocket surface.
//!
//! Viewers connect with `GET /?game={id}` (or `/ws?game={id}`). Frames go
//! out as binary messages and viewer counts as text messages, so a client
//! never has to guess what it received. Anything a viewer sends back is an
//! input token for its session.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State, WebSocketUpgrade,
        rejection::QueryRejection,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use emu_session::SessionError;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::hub::HubHandle;
use crate::links::JoinLinks;
use crate::metrics::{HealthStatus, ServerMetrics, SessionHealth};
use crate::queue::{Outbound, OutboundQueue};
use crate::registry::SessionRegistry;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub metrics: Arc<ServerMetrics>,
    pub links: Arc<JoinLinks>,
    pub queue_capacity: usize,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(join_handler))
        .route("/ws", get(join_handler))
        .route("/api/sessions", get(list_sessions_handler))
        .route("/api/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/health/live", get(health_live_handler))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    game: Option<String>,
}

/// Resolve the requested session, then upgrade to a WebSocket.
pub async fn join_handler(
    State(state): State<AppState>,
    query: Result<Query<JoinQuery>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            warn!("Rejected viewer: malformed query: {}", rejection);
            state.metrics.connection_rejected();
            return (StatusCode::BAD_REQUEST, rejection.body_text()).into_response();
        }
    };

    let Some(game) = query.game.filter(|g| !g.is_empty()) else {
        warn!("Rejected viewer: no game requested");
        state.metrics.connection_rejected();
        return (
            StatusCode::BAD_REQUEST,
            "missing session: connect with ?game={id}",
        )
            .into_response();
    };

    let Some(room) = state.registry.resolve(&game) else {
        warn!(session = %game, "Rejected viewer: unknown session");
        state.metrics.connection_rejected();
        return (StatusCode::NOT_FOUND, format!("unknown session {:?}", game)).into_response();
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let hub = room.hub.clone();
    let metrics = state.metrics.clone();
    let capacity = state.queue_capacity;
    ws.on_upgrade(move |socket| handle_viewer(socket, game, hub, metrics, capacity))
}

async fn handle_viewer(
    socket: WebSocket,
    session_id: String,
    hub: HubHandle,
    metrics: Arc<ServerMetrics>,
    queue_capacity: usize,
) {
    let queue = Arc::new(OutboundQueue::new(queue_capacity));
    let ticket = match hub.attach(queue.clone()).await {
        Ok(ticket) => ticket,
        Err(e) => {
            error!(session = %session_id, "Failed to attach viewer: {}", e);
            return;
        }
    };
    let viewer = ticket.viewer_id;
    metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task to drain the viewer's queue into the socket
    let writer_queue = queue.clone();
    let writer_metrics = metrics.clone();
    let mut writer = tokio::spawn(async move {
        while let Some(msg) = writer_queue.pop().await {
            let (message, is_frame) = match msg {
                Outbound::Frame(frame) => (Message::Binary(frame.data), true),
                Outbound::ViewerCount(count) => (Message::Text(count.to_string().into()), false),
            };
            if ws_sender.send(message).await.is_err() {
                break;
            }
            if is_frame {
                writer_metrics.frames_sent(1);
            }
        }
        let _ = ws_sender.close().await;
    });

    // Inbound messages are input tokens
    let reader = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => relay(&hub, &metrics, viewer, text.as_str()).await,
                Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                    Ok(text) => relay(&hub, &metrics, viewer, text).await,
                    Err(_) => {
                        warn!(session = %session_id, viewer, "Ignoring non UTF-8 input");
                        metrics.input_rejected();
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!(session = %session_id, viewer, "Viewer closed connection");
                    break;
                }
                Err(e) => {
                    debug!(session = %session_id, viewer, "WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer => debug!(session = %session_id, viewer, "Writer ended"),
    }

    if let Err(e) = hub.detach(viewer).await {
        warn!(session = %session_id, viewer, "Failed to detach viewer: {}", e);
    }
    writer.abort();

    metrics.connection_closed();
    let dropped = queue.dropped();
    if dropped > 0 {
        metrics.record_dropped(dropped);
        info!(session = %session_id, viewer, dropped, "Slow viewer lost messages");
    }
}

async fn relay(hub: &HubHandle, metrics: &ServerMetrics, viewer: u64, raw: &str) {
    match hub.relay_input(raw).await {
        Ok(()) => metrics.input_relayed(),
        // Already logged by the session
        Err(SessionError::InvalidInput(_)) => metrics.input_rejected(),
        Err(e) => warn!(session = %hub.session().id(), viewer, "Failed to relay input: {}", e),
    }
}

/// One entry of `GET /api/sessions`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub url: String,
    pub viewers: usize,
    pub running: bool,
    pub frames: u64,
}

/// Lists every session with its join link
pub async fn list_sessions_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut sessions = Vec::with_capacity(state.registry.len());

    for (id, room) in state.registry.rooms() {
        let viewers = room.hub.viewer_count().await.unwrap_or(0);
        let (running, frames) = match room.session.state().await {
            Ok(s) => (s.running, s.frames_produced),
            Err(_) => (false, 0),
        };
        sessions.push(SessionSummary {
            id: id.to_string(),
            url: state.links.url_for(id),
            viewers,
            running,
            frames,
        });
    }

    Json(sessions)
}

/// Health check endpoint - returns server status
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut running = 0;
    for (_, room) in state.registry.rooms() {
        if room.session.state().await.is_ok_and(|s| s.running) {
            running += 1;
        }
    }
    let metrics = state.metrics.snapshot();

    let status = if metrics.snapshots.failed == 0 {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthStatus {
        status: status.to_string(),
        sessions: SessionHealth {
            total: state.registry.len() as u64,
            running,
        },
        viewers: metrics.connections.active,
        uptime_secs: metrics.uptime_secs,
    })
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Room;
    use axum::body::Body;
    use axum::http::Request;
    use emu_session::{PatternLoader, SessionHandle};
    use tower::ServiceExt;

    fn state() -> AppState {
        let rooms = ["mario", "zelda"].map(|id| {
            Room::new(SessionHandle::cold_start(id, &PatternLoader, id.as_bytes()).unwrap())
        });
        AppState {
            registry: Arc::new(SessionRegistry::from_rooms(rooms)),
            metrics: Arc::new(ServerMetrics::new()),
            links: Arc::new(JoinLinks::new("http", "arcade.test").unwrap()),
            queue_capacity: 8,
        }
    }

    async fn fetch(state: AppState, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn missing_game_is_bad_request() {
        let state = state();
        let (status, _) = fetch(state.clone(), "/ws").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.metrics.snapshot().connections.rejected, 1);
    }

    #[tokio::test]
    async fn duplicate_game_is_counted_as_rejection() {
        let state = state();
        let (status, _) = fetch(state.clone(), "/?game=mario&game=zelda").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.metrics.snapshot().connections.rejected, 1);
    }

    #[tokio::test]
    async fn unknown_game_is_not_found() {
        let (status, body) = fetch(state(), "/?game=tetris").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(String::from_utf8(body).unwrap().contains("tetris"));
    }

    #[tokio::test]
    async fn known_game_without_upgrade_is_rejected_by_upgrade() {
        let (status, _) = fetch(state(), "/?game=zelda").await;
        assert!(status.is_client_error());
        assert_ne!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sessions_are_listed_with_links() {
        let (status, body) = fetch(state(), "/api/sessions").await;
        assert_eq!(status, StatusCode::OK);

        let sessions: Vec<SessionSummary> = serde_json::from_slice(&body).unwrap();
        let ids: Vec<_> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["mario", "zelda"]);
        assert_eq!(sessions[1].url, "http://arcade.test/?game=zelda");
        assert_eq!(sessions[1].viewers, 0);
        assert!(!sessions[1].running);
    }

    #[tokio::test]
    async fn health_degrades_after_snapshot_failure() {
        let state = state();
        let (_, body) = fetch(state.clone(), "/health").await;
        let health: HealthStatus = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.sessions.total, 2);

        state.metrics.snapshot_failed();
        let (_, body) = fetch(state, "/health").await;
        let health: HealthStatus = serde_json::from_slice(&body).unwrap();
        assert_eq!(health.status, "degraded");
    }
}
