//! Session supervisor: one worker task per session.
//!
//! All mutations for a session are serialized through the worker's command
//! channel; timers post timer-fired commands back into the same channel,
//! and the 20 Hz minigame tick runs as a select branch of the same loop.
//! Events leave through the broadcaster, stamped with a fresh state
//! version each, so versions are strictly monotonic per session.

use crate::broadcast::Broadcaster;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::persist::{Checkpoint, CheckpointSink, PersistedSession};
use crate::protocol::{Envelope, ServerEvent, SessionSnapshot};
use crate::registry::ConnectionRegistry;
use crate::session::minigame::TICK_MS;
use crate::session::{JoinOutcome, LockReason, Outgoing, SessionState};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Inbound movement cap per participant: 30 messages per second.
const INPUT_RATE_LIMIT: u32 = 30;

/// Commands consumed by a session worker. Client-driven variants carry the
/// origin socket so errors and acks can be routed back to the sender.
#[derive(Debug)]
pub enum Command {
    Join {
        socket: SocketId,
        name: String,
        avatar: Option<String>,
        device_fingerprint: Option<String>,
        /// false for JOIN_AS_NEW, which skips device recognition
        recognize_device: bool,
    },
    RejoinExisting {
        socket: SocketId,
        player_id: PlayerId,
        device_fingerprint: String,
    },
    /// Token already redeemed against the registry by the transport layer
    RejoinWithToken {
        socket: SocketId,
        player_id: PlayerId,
    },
    HostJoin {
        socket: SocketId,
    },
    DisplayJoin {
        socket: SocketId,
    },
    SubmitAnswer {
        socket: SocketId,
        player_id: PlayerId,
        answer: serde_json::Value,
    },
    StartItem {
        socket: SocketId,
        item_index: usize,
    },
    LockItem {
        socket: SocketId,
    },
    CancelItem {
        socket: SocketId,
    },
    RevealAnswers {
        socket: SocketId,
    },
    EndSession {
        socket: SocketId,
    },
    ResetSession {
        socket: SocketId,
    },
    PauseSession {
        socket: SocketId,
    },
    ResumeSession {
        socket: SocketId,
    },
    KickPlayer {
        socket: SocketId,
        player_id: PlayerId,
    },
    GenerateRejoinToken {
        socket: SocketId,
        player_id: PlayerId,
    },
    AdjustScore {
        socket: SocketId,
        player_id: PlayerId,
        item_id: ItemId,
        score_percentage: u8,
    },
    StartSwanChase {
        socket: SocketId,
    },
    SwanChaseInput {
        player_id: PlayerId,
        x: f64,
        y: f64,
        sprint: bool,
        dash: bool,
    },
    /// Auto-lock timer fired; stale epochs are ignored
    LockTimerElapsed {
        epoch: u64,
    },
    /// A socket bound to this player went away
    PlayerDisconnected {
        player_id: PlayerId,
    },
    /// The 30 s disconnect grace window ran out
    GraceExpired {
        player_id: PlayerId,
    },
    QualityChanged {
        player_id: PlayerId,
        quality: ConnectionQuality,
    },
    /// The underlying quiz was mutated by the editor
    Archive,
    Snapshot {
        for_host: bool,
        reply: oneshot::Sender<SessionSnapshot>,
    },
}

/// Cheap, cloneable address of a session worker.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub code: SessionCode,
    tx: mpsc::Sender<Command>,
}

impl SessionHandle {
    pub async fn send(&self, command: Command) {
        if self.tx.send(command).await.is_err() {
            tracing::warn!(session = %self.code, "session worker is gone");
        }
    }

    pub async fn snapshot(&self, for_host: bool) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot { for_host, reply }).await;
        rx.await.ok()
    }
}

/// Spawn the worker that owns `state`. Returns its handle.
pub fn spawn_session_worker(
    state: SessionState,
    broadcaster: Arc<Broadcaster>,
    registry: Arc<ConnectionRegistry>,
    checkpoints: CheckpointSink,
    config: EngineConfig,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(256);
    let handle = SessionHandle {
        session_id: state.id.clone(),
        code: state.code.clone(),
        tx: tx.clone(),
    };
    let worker = SessionWorker {
        state,
        rx,
        tx,
        broadcaster,
        registry,
        checkpoints,
        config,
        input_windows: HashMap::new(),
    };
    tokio::spawn(worker.run());
    handle
}

struct SessionWorker {
    state: SessionState,
    rx: mpsc::Receiver<Command>,
    /// Loopback sender for timer tasks
    tx: mpsc::Sender<Command>,
    broadcaster: Arc<Broadcaster>,
    registry: Arc<ConnectionRegistry>,
    checkpoints: CheckpointSink,
    config: EngineConfig,
    /// Windowed counters for SWAN_CHASE_INPUT rate limiting
    input_windows: HashMap<PlayerId, (u32, Instant)>,
}

impl SessionWorker {
    async fn run(mut self) {
        let mut tick = tokio::time::interval(Duration::from_millis(TICK_MS));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let minigame_running = self.state.minigame.is_some() && !self.state.quarantined;
            tokio::select! {
                command = self.rx.recv() => {
                    match command {
                        Some(command) => self.handle(command).await,
                        None => break,
                    }
                }
                _ = tick.tick(), if minigame_running => {
                    let events = self.state.tick_swan_chase(TICK_MS);
                    let ended = events
                        .iter()
                        .any(|e| matches!(e, Outgoing::Session(ServerEvent::SwanChaseEnded { .. })));
                    self.emit(events).await;
                    if ended {
                        self.checkpoint("minigame_end");
                        self.verify_invariants().await;
                    }
                }
            }
        }
        tracing::debug!(session = %self.state.code, "session worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Join {
                socket,
                name,
                avatar,
                device_fingerprint,
                recognize_device,
            } => {
                match self.state.join_session(
                    &socket,
                    &name,
                    avatar,
                    device_fingerprint,
                    recognize_device,
                    self.config.max_players,
                ) {
                    Ok(JoinOutcome::Joined { player_id, events }) => {
                        self.registry
                            .register(&socket, Role::Player, &self.state.code)
                            .await;
                        self.registry.bind_player(&socket, &player_id).await;
                        self.broadcaster
                            .join_room(&self.state.code, &socket, Role::Player)
                            .await;
                        self.emit(events).await;
                        self.checkpoint("player_join");
                    }
                    Ok(JoinOutcome::DeviceRecognized { events }) => self.emit(events).await,
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::RejoinExisting {
                socket,
                player_id,
                device_fingerprint,
            } => {
                match self
                    .state
                    .rejoin_existing(&socket, &player_id, &device_fingerprint)
                {
                    Ok(events) => {
                        self.registry
                            .register(&socket, Role::Player, &self.state.code)
                            .await;
                        self.registry.bind_player(&socket, &player_id).await;
                        self.broadcaster
                            .join_room(&self.state.code, &socket, Role::Player)
                            .await;
                        self.emit(events).await;
                        self.checkpoint("player_rejoin");
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::RejoinWithToken { socket, player_id } => {
                match self.state.rejoin_with_token(&socket, &player_id) {
                    Ok(events) => {
                        self.registry
                            .register(&socket, Role::Player, &self.state.code)
                            .await;
                        self.registry.bind_player(&socket, &player_id).await;
                        self.broadcaster
                            .join_room(&self.state.code, &socket, Role::Player)
                            .await;
                        self.emit(events).await;
                        self.checkpoint("player_rejoin");
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::HostJoin { socket } => {
                self.registry
                    .register(&socket, Role::Host, &self.state.code)
                    .await;
                self.broadcaster
                    .join_room(&self.state.code, &socket, Role::Host)
                    .await;
                self.refresh_degraded_flag().await;
                let snapshot = self.state.snapshot(true);
                self.emit(vec![Outgoing::Socket(
                    socket,
                    ServerEvent::SessionState {
                        snapshot,
                        player_id: None,
                    },
                )])
                .await;
            }

            Command::DisplayJoin { socket } => {
                self.registry
                    .register(&socket, Role::Display, &self.state.code)
                    .await;
                self.broadcaster
                    .join_room(&self.state.code, &socket, Role::Display)
                    .await;
                let snapshot = self.state.snapshot(false);
                self.emit(vec![Outgoing::Socket(
                    socket,
                    ServerEvent::SessionState {
                        snapshot,
                        player_id: None,
                    },
                )])
                .await;
            }

            Command::SubmitAnswer {
                socket,
                player_id,
                answer,
            } => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                match self.state.submit_answer(&socket, &player_id, answer, now_ms) {
                    Ok((events, all_answered)) => {
                        self.emit(events).await;
                        if all_answered {
                            self.lock(LockReason::AllAnswered).await;
                        }
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::StartItem { socket, item_index } => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                match self.state.start_item(item_index, now_ms) {
                    Ok(events) => {
                        self.emit(events).await;
                        if let Some(window_ms) = self.state.lock_timer_ms() {
                            self.arm_lock_timer(window_ms);
                        }
                        self.checkpoint("item_start");
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::LockItem { socket } => {
                if let Err(e) = self.try_lock(LockReason::HostCommand).await {
                    self.send_error(&socket, &e).await;
                }
            }

            Command::LockTimerElapsed { epoch } => {
                // A stale timer (cancel, pause, manual lock) is a no-op
                if epoch == self.state.timer_epoch
                    && self.state.item_phase == ItemPhase::Active
                    && self.state.status == SessionStatus::Active
                {
                    self.lock(LockReason::TimerExpired).await;
                }
            }

            Command::CancelItem { socket } => {
                match self.state.cancel_item() {
                    Ok(events) => {
                        self.emit(events).await;
                        self.checkpoint("item_cancel");
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::RevealAnswers { socket } => {
                match self.state.reveal_answers() {
                    Ok(events) => {
                        self.emit(events).await;
                        self.checkpoint("item_reveal");
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::EndSession { socket } => {
                match self.state.end_session() {
                    Ok(events) => {
                        self.emit(events).await;
                        self.checkpoint("session_end");
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::ResetSession { socket } => {
                match self.state.reset_session() {
                    Ok(events) => {
                        self.emit(events).await;
                        self.checkpoint("session_reset");
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::PauseSession { socket } => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                match self.state.pause_session(now_ms) {
                    Ok(events) => self.emit(events).await,
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::ResumeSession { socket } => {
                match self.state.resume_session() {
                    Ok((events, remaining_ms)) => {
                        self.emit(events).await;
                        if let Some(ms) = remaining_ms {
                            self.arm_lock_timer(ms);
                        }
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::KickPlayer { socket, player_id } => {
                let victim_sockets = self
                    .registry
                    .sockets_for_player(&self.state.code, &player_id)
                    .await;
                match self.state.kick_player(&player_id, &victim_sockets) {
                    Ok(events) => {
                        self.emit(events).await;
                        for victim in victim_sockets {
                            self.registry.unregister(&victim).await;
                        }
                        self.checkpoint("player_kick");
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::GenerateRejoinToken { socket, player_id } => {
                // Tokens are for offline players only: rebinding a player
                // who still holds a live socket would leave two
                // connections on one identity
                match self.state.players.get(&player_id) {
                    None => {
                        self.send_error(&socket, &EngineError::PlayerNotFound(player_id))
                            .await;
                        return;
                    }
                    Some(player) if player.online => {
                        self.send_error(&socket, &EngineError::PlayerNotOffline(player_id))
                            .await;
                        return;
                    }
                    Some(_) => {}
                }
                let (token, _) = self
                    .registry
                    .issue_rejoin_token(&self.state.code, &player_id)
                    .await;
                let expires_at = (chrono::Utc::now()
                    + chrono::Duration::from_std(self.config.rejoin_token_ttl)
                        .unwrap_or_else(|_| chrono::Duration::seconds(600)))
                .to_rfc3339();
                self.emit(vec![Outgoing::Socket(
                    socket,
                    ServerEvent::RejoinTokenGenerated {
                        player_id,
                        token,
                        expires_at,
                    },
                )])
                .await;
            }

            Command::AdjustScore {
                socket,
                player_id,
                item_id,
                score_percentage,
            } => {
                match self
                    .state
                    .adjust_score(&player_id, &item_id, score_percentage)
                {
                    Ok(events) => {
                        self.emit(events).await;
                        self.checkpoint("score_adjust");
                        self.verify_invariants().await;
                    }
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::StartSwanChase { socket } => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                match self.state.start_swan_chase(None, now_ms) {
                    Ok(events) => self.emit(events).await,
                    Err(e) => self.send_error(&socket, &e).await,
                }
            }

            Command::SwanChaseInput {
                player_id,
                x,
                y,
                sprint,
                dash,
            } => {
                if !self.input_allowed(&player_id) {
                    return; // excess input is dropped, not errored
                }
                // Inputs overwrite between ticks; failures are silent too,
                // the participant may simply have been tagged already
                let _ = self.state.swan_chase_input(&player_id, x, y, sprint, dash);
            }

            Command::PlayerDisconnected { player_id } => {
                if self
                    .registry
                    .player_connected(&self.state.code, &player_id)
                    .await
                {
                    return; // another socket still holds the player
                }
                if self.state.mark_player_offline(&player_id) {
                    let tx = self.tx.clone();
                    let grace = self.config.disconnect_grace;
                    tokio::spawn(async move {
                        tokio::time::sleep(grace).await;
                        let _ = tx.send(Command::GraceExpired { player_id }).await;
                    });
                }
            }

            Command::GraceExpired { player_id } => {
                if self
                    .registry
                    .player_connected(&self.state.code, &player_id)
                    .await
                {
                    return; // reconnected in time
                }
                let events = self.state.player_left(&player_id);
                if !events.is_empty() {
                    self.emit(events).await;
                    self.checkpoint("player_left");
                }
            }

            Command::QualityChanged { player_id, quality } => {
                let events = self.state.connection_status_changed(&player_id, quality);
                self.emit(events).await;
            }

            Command::Archive => {
                let events = self.state.archive_session();
                self.emit(events).await;
                self.checkpoint("session_archive");
            }

            Command::Snapshot { for_host, reply } => {
                self.refresh_degraded_flag().await;
                let _ = reply.send(self.state.snapshot(for_host));
            }
        }
    }

    /// Lock and surface the error to nobody (timer/all-answered paths).
    async fn lock(&mut self, reason: LockReason) {
        if let Err(e) = self.try_lock(reason).await {
            tracing::debug!(session = %self.state.code, "lock skipped: {}", e);
        }
    }

    async fn try_lock(&mut self, reason: LockReason) -> Result<(), EngineError> {
        let events = self.state.lock_item(reason)?;
        self.emit(events).await;
        self.checkpoint("item_lock");
        self.verify_invariants().await;
        Ok(())
    }

    fn arm_lock_timer(&mut self, window_ms: u64) {
        let epoch = self.state.timer_epoch;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(window_ms)).await;
            let _ = tx.send(Command::LockTimerElapsed { epoch }).await;
        });
    }

    /// Stamp each event with its own fresh version and hand it to the
    /// broadcaster. Fan-out to sockets happens on the writer tasks, never
    /// here.
    async fn emit(&mut self, events: Vec<Outgoing>) {
        for outgoing in events {
            let version = self.state.next_version();
            match outgoing {
                Outgoing::Session(event) => {
                    self.broadcaster
                        .emit_session(&self.state.code, Envelope::new(event, Some(version)))
                        .await
                }
                Outgoing::Host(event) => {
                    self.broadcaster
                        .emit_host(&self.state.code, Envelope::new(event, Some(version)))
                        .await
                }
                Outgoing::Players(event) => {
                    self.broadcaster
                        .emit_players(&self.state.code, Envelope::new(event, Some(version)))
                        .await
                }
                Outgoing::Socket(socket, event) => {
                    self.broadcaster
                        .emit_socket(&socket, Envelope::new(event, Some(version)))
                        .await
                }
            }
        }
    }

    async fn send_error(&self, socket: &SocketId, error: &EngineError) {
        tracing::debug!(session = %self.state.code, "command rejected: {}", error);
        self.broadcaster
            .emit_socket(
                socket,
                Envelope::new(
                    ServerEvent::Error {
                        code: error.code().to_string(),
                        msg: error.to_string(),
                    },
                    Some(self.state.state_version),
                ),
            )
            .await;
    }

    fn checkpoint(&self, reason: &'static str) {
        self.checkpoints.send(Checkpoint {
            snapshot: PersistedSession::from_state(&self.state),
            reason,
        });
    }

    async fn refresh_degraded_flag(&mut self) {
        self.state.persistence_degraded = self.checkpoints.is_degraded(&self.state.code).await;
    }

    /// Post-mutation consistency probe. A violation quarantines the
    /// session: no further mutations, clients told to reconnect.
    async fn verify_invariants(&mut self) {
        if self.state.quarantined || self.state.check_score_invariant() {
            return;
        }
        tracing::error!(
            session = %self.state.code,
            "score-sum invariant violated; quarantining session"
        );
        self.state.quarantined = true;
        let quarantine_error = EngineError::Quarantined;
        self.emit(vec![Outgoing::Session(ServerEvent::Error {
            code: quarantine_error.code().to_string(),
            msg: quarantine_error.to_string(),
        })])
        .await;
    }

    /// Sliding one-second window per participant.
    fn input_allowed(&mut self, player_id: &PlayerId) -> bool {
        let now = Instant::now();
        let (count, window_start) = self
            .input_windows
            .entry(player_id.clone())
            .or_insert((0, now));
        if now.duration_since(*window_start) >= Duration::from_secs(1) {
            *count = 0;
            *window_start = now;
        }
        if *count >= INPUT_RATE_LIMIT {
            return false;
        }
        *count += 1;
        true
    }
}
