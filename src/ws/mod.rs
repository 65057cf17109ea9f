//! WebSocket transport: upgrade, per-socket read loop, writer task.
//!
//! Each socket gets a broadcaster queue drained by its own writer task, so
//! slow clients backpressure only themselves. The read loop parses frames
//! and forwards commands; an unparseable frame gets a protocol ERROR and
//! the connection is closed.

pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use crate::protocol::{ClientFrame, Envelope, ServerEvent};
use crate::state::AppState;
use crate::supervisor::Command;
use crate::types::Role;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub role: Option<String>,
    /// Session code, used by display clients that bootstrap on connect
    pub code: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::debug!("WebSocket connection request: role={:?}", params.role);
    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<AppState>) {
    let socket_id = ulid::Ulid::new().to_string();
    let role = match params.role.as_deref() {
        Some("host") => Role::Host,
        Some("display") => Role::Display,
        _ => Role::Player,
    };
    tracing::info!(socket = %socket_id, "WebSocket connected with role {:?}", role);

    let (mut sender, mut receiver) = socket.split();
    let outbound = state.broadcaster.attach(&socket_id).await;

    // Writer task: drains this socket's queue until detach
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            let json = match serde_json::to_string(&envelope) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("failed to serialize event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    let mut ctx = handlers::ConnContext {
        socket_id: socket_id.clone(),
        role,
        session: None,
    };

    // Display clients bootstrap straight from the query string
    if role == Role::Display {
        if let Some(code) = params.code.clone() {
            if let Some(handle) = state.session(&code).await {
                handle
                    .send(Command::DisplayJoin {
                        socket: socket_id.clone(),
                    })
                    .await;
                ctx.session = Some(handle);
            } else {
                handlers::send_session_not_found(&state, &socket_id, &code).await;
            }
        }
    }

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientFrame>(&text) {
                Ok(frame) => handlers::handle_command(frame.command, &mut ctx, &state).await,
                Err(e) => {
                    // Protocol error: tell the socket why, then drop it
                    tracing::warn!(socket = %socket_id, "unparseable frame: {}", e);
                    state
                        .broadcaster
                        .emit_socket(
                            &socket_id,
                            Envelope::new(
                                ServerEvent::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("invalid frame: {}", e),
                                },
                                None,
                            ),
                        )
                        .await;
                    break;
                }
            },
            Ok(Message::Close(_)) => break,
            // Ping/Pong are answered by the websocket library itself
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(socket = %socket_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    // Teardown: close the outbound queue (the writer drains what's left),
    // then start the player's disconnect grace window.
    state.broadcaster.detach(&socket_id).await;
    if let Some(conn) = state.registry.unregister(&socket_id).await {
        if let Some(player_id) = conn.player_id {
            if let Some(handle) = state.session(&conn.session_code).await {
                handle.send(Command::PlayerDisconnected { player_id }).await;
            }
        }
    }
    let _ = writer.await;
    tracing::info!(socket = %socket_id, "WebSocket closed");
}
