//! Command dispatch: client frames to session-worker commands.
//!
//! Role checks happen here, before anything reaches a worker. Player
//! identity is resolved through the connection registry, which the worker
//! binds on a successful join.

use crate::error::EngineError;
use crate::protocol::{ClientCommand, Envelope, ServerEvent};
use crate::state::AppState;
use crate::supervisor::{Command, SessionHandle};
use crate::types::{PlayerId, Role, SessionCode, SocketId};
use std::sync::Arc;

/// Per-connection context kept by the read loop.
pub struct ConnContext {
    pub socket_id: SocketId,
    pub role: Role,
    pub session: Option<SessionHandle>,
}

/// Macro to check host authorization and bail with an ERROR event
macro_rules! check_host {
    ($state:expr, $ctx:expr, $action:expr) => {
        if $ctx.role != Role::Host {
            send_error(
                $state,
                &$ctx.socket_id,
                &EngineError::Unauthorized($action),
            )
            .await;
            return;
        }
    };
}

pub async fn handle_command(command: ClientCommand, ctx: &mut ConnContext, state: &Arc<AppState>) {
    match command {
        ClientCommand::JoinSession {
            code,
            name,
            avatar,
            device_fingerprint,
        } => {
            join(ctx, state, &code, move |socket| Command::Join {
                socket,
                name,
                avatar,
                device_fingerprint,
                recognize_device: true,
            })
            .await;
        }

        ClientCommand::JoinAsNew {
            code,
            name,
            avatar,
            device_fingerprint,
        } => {
            join(ctx, state, &code, move |socket| Command::Join {
                socket,
                name,
                avatar,
                device_fingerprint,
                recognize_device: false,
            })
            .await;
        }

        ClientCommand::RejoinAsExisting {
            code,
            player_id,
            device_fingerprint,
        } => {
            join(ctx, state, &code, move |socket| Command::RejoinExisting {
                socket,
                player_id,
                device_fingerprint,
            })
            .await;
        }

        ClientCommand::PlayerRejoin { code, token } => {
            // Single-use redemption; a token for another session is as
            // dead as an expired one
            let redeemed = state.registry.redeem_rejoin_token(&token).await;
            match redeemed {
                Some((token_code, player_id)) if token_code == code => {
                    join(ctx, state, &code, move |socket| Command::RejoinWithToken {
                        socket,
                        player_id,
                    })
                    .await;
                }
                _ => {
                    send_error(state, &ctx.socket_id, &EngineError::RejoinTokenExpired).await;
                }
            }
        }

        ClientCommand::HostJoinSession { code } => {
            check_host!(state, ctx, "join as host");
            join(ctx, state, &code, |socket| Command::HostJoin { socket }).await;
        }

        ClientCommand::SubmitAnswer { answer } => {
            let Some((handle, player_id)) = bound_player(ctx, state).await else {
                send_error(state, &ctx.socket_id, &EngineError::NotAPlayer).await;
                return;
            };
            handle
                .send(Command::SubmitAnswer {
                    socket: ctx.socket_id.clone(),
                    player_id,
                    answer,
                })
                .await;
        }

        ClientCommand::StartItem { item_index } => {
            check_host!(state, ctx, "start items");
            host_send(ctx, state, Command::StartItem {
                socket: ctx.socket_id.clone(),
                item_index,
            })
            .await;
        }

        ClientCommand::LockItem => {
            check_host!(state, ctx, "lock items");
            host_send(ctx, state, Command::LockItem {
                socket: ctx.socket_id.clone(),
            })
            .await;
        }

        ClientCommand::CancelItem => {
            check_host!(state, ctx, "cancel items");
            host_send(ctx, state, Command::CancelItem {
                socket: ctx.socket_id.clone(),
            })
            .await;
        }

        ClientCommand::RevealAnswers => {
            check_host!(state, ctx, "reveal answers");
            host_send(ctx, state, Command::RevealAnswers {
                socket: ctx.socket_id.clone(),
            })
            .await;
        }

        ClientCommand::EndSession => {
            check_host!(state, ctx, "end the session");
            host_send(ctx, state, Command::EndSession {
                socket: ctx.socket_id.clone(),
            })
            .await;
        }

        ClientCommand::ResetSession => {
            check_host!(state, ctx, "reset the session");
            host_send(ctx, state, Command::ResetSession {
                socket: ctx.socket_id.clone(),
            })
            .await;
        }

        ClientCommand::PauseSession => {
            check_host!(state, ctx, "pause the session");
            host_send(ctx, state, Command::PauseSession {
                socket: ctx.socket_id.clone(),
            })
            .await;
        }

        ClientCommand::ResumeSession => {
            check_host!(state, ctx, "resume the session");
            host_send(ctx, state, Command::ResumeSession {
                socket: ctx.socket_id.clone(),
            })
            .await;
        }

        ClientCommand::KickPlayer { player_id } => {
            check_host!(state, ctx, "kick players");
            host_send(ctx, state, Command::KickPlayer {
                socket: ctx.socket_id.clone(),
                player_id,
            })
            .await;
        }

        ClientCommand::GenerateRejoinToken { player_id } => {
            check_host!(state, ctx, "generate rejoin tokens");
            host_send(ctx, state, Command::GenerateRejoinToken {
                socket: ctx.socket_id.clone(),
                player_id,
            })
            .await;
        }

        ClientCommand::AdjustScore {
            player_id,
            item_id,
            score_percentage,
        } => {
            check_host!(state, ctx, "adjust scores");
            host_send(ctx, state, Command::AdjustScore {
                socket: ctx.socket_id.clone(),
                player_id,
                item_id,
                score_percentage,
            })
            .await;
        }

        ClientCommand::StartSwanChase => {
            check_host!(state, ctx, "start the swan chase");
            host_send(ctx, state, Command::StartSwanChase {
                socket: ctx.socket_id.clone(),
            })
            .await;
        }

        ClientCommand::SwanChaseInput { x, y, sprint, dash } => {
            // Dropped silently when unbound; movement is best-effort
            if let Some((handle, player_id)) = bound_player(ctx, state).await {
                handle
                    .send(Command::SwanChaseInput {
                        player_id,
                        x,
                        y,
                        sprint,
                        dash,
                    })
                    .await;
            }
        }

        ClientCommand::Heartbeat => {
            if let Some(change) = state.registry.heartbeat(&ctx.socket_id).await {
                if let Some(handle) = state.session(&change.session_code).await {
                    handle
                        .send(Command::QualityChanged {
                            player_id: change.player_id,
                            quality: change.quality,
                        })
                        .await;
                }
            }
        }
    }
}

/// Resolve the session, remember it on the context, and send the command.
async fn join<F>(ctx: &mut ConnContext, state: &Arc<AppState>, code: &SessionCode, build: F)
where
    F: FnOnce(SocketId) -> Command,
{
    match state.session(code).await {
        Some(handle) => {
            handle.send(build(ctx.socket_id.clone())).await;
            ctx.session = Some(handle);
        }
        None => send_session_not_found(state, &ctx.socket_id, code).await,
    }
}

async fn host_send(ctx: &ConnContext, state: &Arc<AppState>, command: Command) {
    match &ctx.session {
        Some(handle) => handle.send(command).await,
        None => {
            send_error(
                state,
                &ctx.socket_id,
                &EngineError::SessionNotFound("(none joined)".to_string()),
            )
            .await
        }
    }
}

/// The player identity bound to this socket, if any.
async fn bound_player(
    ctx: &ConnContext,
    state: &Arc<AppState>,
) -> Option<(SessionHandle, PlayerId)> {
    let handle = ctx.session.clone()?;
    let conn = state.registry.get(&ctx.socket_id).await?;
    Some((handle, conn.player_id?))
}

pub async fn send_error(state: &Arc<AppState>, socket_id: &SocketId, error: &EngineError) {
    state
        .broadcaster
        .emit_socket(
            socket_id,
            Envelope::new(
                ServerEvent::Error {
                    code: error.code().to_string(),
                    msg: error.to_string(),
                },
                None,
            ),
        )
        .await;
}

pub async fn send_session_not_found(
    state: &Arc<AppState>,
    socket_id: &SocketId,
    code: &SessionCode,
) {
    send_error(
        state,
        socket_id,
        &EngineError::SessionNotFound(code.clone()),
    )
    .await;
}
