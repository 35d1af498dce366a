//! WebSocket gateway
//!
//! Thin framing layer: JSON text frames in, `ClientAction`s routed to
//! matchmaking or the registry, `ServerEvent`s drained out. Authentication
//! happens upstream; by the time a socket reaches this handler the user id
//! on the query string has already been verified.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tower_http::trace::TraceLayer;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::matchmaking::{MatchRequest, MatchmakingQueue};
use crate::protocol::{Chips, ClientAction};
use crate::registry::GameRegistry;
use crate::transport::{ConnectionHandle, ServerEvent};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<GameRegistry>,
    pub matchmaking: Arc<MatchmakingQueue>,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    user_id: String,
    #[serde(default)]
    display_name: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve the gateway until the process exits.
pub async fn serve(config: &Config, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        config.server.listen_address, config.server.listen_port
    )
    .parse()
    .map_err(|e| Error::Config(format!("invalid listen address: {}", e)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");
    axum::serve(listener, router(state))
        .await
        .map_err(|e| Error::Transport(format!("server error: {}", e)))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(socket: WebSocket, params: ConnectParams, state: AppState) {
    let user_id = params.user_id;
    let display_name = params.display_name.unwrap_or_else(|| user_id.clone());

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let handle = ConnectionHandle::new(uuid::Uuid::new_v4(), user_id.clone(), tx);
    info!(user = %user_id, connection = %handle.id, "connection open");

    let write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    if sender.send(Message::Text(payload)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(?err, "event serialization failed"),
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientAction>(&text) {
                Ok(action) => route_action(action, &handle, &display_name, &state).await,
                Err(err) => {
                    debug!(user = %user_id, ?err, "invalid inbound frame");
                    handle.send(ServerEvent::error(&Error::InvalidData(
                        "unparseable action".to_string(),
                    )));
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Socket gone: leave any queue, let the owning session pause the game
    state.matchmaking.cancel_all_for_user(&user_id);
    state.registry.handle_disconnect(handle.id);
    write_task.abort();
    info!(user = %user_id, connection = %handle.id, "connection closed");
}

async fn route_action(
    action: ClientAction,
    handle: &ConnectionHandle,
    display_name: &str,
    state: &AppState,
) {
    let result = match &action {
        ClientAction::Enqueue { stake } => {
            let request = MatchRequest::new(&handle.user_id, display_name, handle.clone());
            state
                .matchmaking
                .enqueue(Chips::new(*stake), request)
                .await
        }
        ClientAction::CancelQueue { stake } => {
            state.matchmaking.cancel(Chips::new(*stake), &handle.user_id);
            Ok(())
        }
        ClientAction::Reconnect { game_id } => {
            state
                .registry
                .handle_reconnect(*game_id, &handle.user_id, handle.clone())
        }
        ClientAction::Roll | ClientAction::Move { .. } | ClientAction::Forfeit => {
            state.registry.dispatch(handle.id, &action)
        }
    };

    // Routing errors go back to the requester only; in-session errors are
    // emitted by the session itself.
    if let Err(err) = result {
        handle.send(ServerEvent::error(&err));
    }
}
