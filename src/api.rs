//! HTTP side-channel.
//!
//! Read-only from the engine's perspective, plus the session-creation seam
//! the out-of-scope management API would call.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::protocol::SessionSnapshot;
use crate::state::AppState;
use crate::supervisor::Command;
use crate::types::{PlayerId, QuizSnapshot, SessionCode, SessionId};

#[derive(Debug, Serialize)]
pub struct SessionCreated {
    pub session_id: SessionId,
    pub code: SessionCode,
}

/// Create a session bound to a quiz snapshot.
///
/// POST /api/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(quiz): Json<QuizSnapshot>,
) -> Json<SessionCreated> {
    let handle = state.create_session(quiz).await;
    Json(SessionCreated {
        session_id: handle.session_id.clone(),
        code: handle.code.clone(),
    })
}

/// Bootstrap snapshot for a session code.
///
/// GET /api/sessions/code/{code}
pub async fn session_by_code(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    let code = code.to_uppercase();
    let Some(handle) = state.session(&code).await else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };
    match handle.snapshot(false).await {
        Some(snapshot) => Json::<SessionSnapshot>(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, "session not found").into_response(),
    }
}

/// Mark a session read-only because its quiz was mutated by the editor.
///
/// POST /api/sessions/code/{code}/archive
pub async fn archive_session(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    let code = code.to_uppercase();
    let Some(handle) = state.session(&code).await else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };
    handle.send(Command::Archive).await;
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Serialize)]
pub struct RejoinTokenInfo {
    pub player_id: PlayerId,
    pub player_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Validate a rejoin token and mark it consumed. Single-use: whichever of
/// this endpoint and the WebSocket PLAYER_REJOIN arrives first wins.
///
/// GET /api/sessions/rejoin-token/{token}
pub async fn redeem_rejoin_token(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Response {
    let Some((code, player_id)) = state.registry.redeem_rejoin_token(&token).await else {
        return (StatusCode::GONE, "token expired or already used").into_response();
    };
    let Some(handle) = state.session(&code).await else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };
    let Some(snapshot) = handle.snapshot(false).await else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };
    let Some(player) = snapshot.players.iter().find(|p| p.id == player_id) else {
        return (StatusCode::NOT_FOUND, "player not found").into_response();
    };
    Json(RejoinTokenInfo {
        player_id: player.id.clone(),
        player_name: player.name.clone(),
        avatar: player.avatar.clone(),
    })
    .into_response()
}
