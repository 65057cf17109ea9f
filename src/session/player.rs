//! Player lifecycle: joining, device recognition, rejoin, presence, kick,
//! and the session-wide reset/end/archive commands.

use super::{Outgoing, SessionState};
use crate::error::EngineError;
use crate::protocol::{PlayerInfo, ServerEvent};
use crate::session::leaderboard_entries;
use crate::types::*;

/// What a JOIN_SESSION attempt resolved to.
#[derive(Debug)]
pub enum JoinOutcome {
    Joined {
        player_id: PlayerId,
        events: Vec<Outgoing>,
    },
    /// The device fingerprint matched an existing player; nothing was
    /// created. The client picks REJOIN_AS_EXISTING or JOIN_AS_NEW.
    DeviceRecognized { events: Vec<Outgoing> },
}

impl SessionState {
    pub(crate) fn guard_mutable(&self) -> Result<(), EngineError> {
        if self.quarantined {
            return Err(EngineError::Quarantined);
        }
        match self.status {
            SessionStatus::Archived => Err(EngineError::SessionArchived),
            SessionStatus::Ended => Err(EngineError::WrongStatus(self.status)),
            _ => Ok(()),
        }
    }

    /// Handle JOIN_SESSION. When `recognize_device` is set (plain joins,
    /// not JOIN_AS_NEW) a known fingerprint short-circuits into
    /// DEVICE_RECOGNIZED instead of creating a duplicate player.
    pub fn join_session(
        &mut self,
        socket: &SocketId,
        name: &str,
        avatar: Option<String>,
        device_fingerprint: Option<String>,
        recognize_device: bool,
        max_players: usize,
    ) -> Result<JoinOutcome, EngineError> {
        self.guard_mutable()?;

        if recognize_device {
            if let Some(fp) = device_fingerprint.as_deref() {
                if let Some(existing) = self
                    .players
                    .values()
                    .find(|p| p.device_fingerprint.as_deref() == Some(fp))
                {
                    return Ok(JoinOutcome::DeviceRecognized {
                        events: vec![Outgoing::Socket(
                            socket.clone(),
                            ServerEvent::DeviceRecognized {
                                player: PlayerInfo::from(existing),
                            },
                        )],
                    });
                }
            }
        }

        let name = name.trim();
        if name.is_empty() || name.chars().count() > 50 {
            return Err(EngineError::InvalidName);
        }
        if self
            .players
            .values()
            .any(|p| p.name.eq_ignore_ascii_case(name))
        {
            return Err(EngineError::NameTaken);
        }
        if self.players.len() >= max_players {
            return Err(EngineError::MalformedPayload("session is full".into()));
        }

        let player = Player {
            id: ulid::Ulid::new().to_string(),
            name: name.to_string(),
            avatar,
            device_fingerprint,
            score: 0,
            streak: 0,
            online: true,
            joined_at: chrono::Utc::now().to_rfc3339(),
            left_at: None,
        };
        let player_id = player.id.clone();
        let info = PlayerInfo::from(&player);
        self.players.insert(player_id.clone(), player);

        tracing::info!(session = %self.code, player = %player_id, "player joined: {}", name);

        Ok(JoinOutcome::Joined {
            player_id: player_id.clone(),
            events: vec![
                Outgoing::Socket(
                    socket.clone(),
                    ServerEvent::SessionState {
                        snapshot: self.snapshot(false),
                        player_id: Some(player_id),
                    },
                ),
                Outgoing::Session(ServerEvent::PlayerJoined { player: info }),
            ],
        })
    }

    /// REJOIN_AS_EXISTING: reclaim a player after device recognition.
    pub fn rejoin_existing(
        &mut self,
        socket: &SocketId,
        player_id: &PlayerId,
        device_fingerprint: &str,
    ) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        let player = self
            .players
            .get(player_id)
            .ok_or_else(|| EngineError::PlayerNotFound(player_id.clone()))?;
        if player.device_fingerprint.as_deref() != Some(device_fingerprint) {
            return Err(EngineError::PlayerNotFound(player_id.clone()));
        }
        Ok(self.restore_player(socket, player_id))
    }

    /// Rebind after rejoin-token redemption. The registry has already
    /// consumed the token and verified the binding.
    pub fn rejoin_with_token(
        &mut self,
        socket: &SocketId,
        player_id: &PlayerId,
    ) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        if !self.players.contains_key(player_id) {
            return Err(EngineError::PlayerNotFound(player_id.clone()));
        }
        Ok(self.restore_player(socket, player_id))
    }

    fn restore_player(&mut self, socket: &SocketId, player_id: &PlayerId) -> Vec<Outgoing> {
        let player = self.players.get_mut(player_id).expect("checked above");
        player.online = true;
        player.left_at = None;
        let info = PlayerInfo::from(&*player);

        tracing::info!(session = %self.code, player = %player_id, "player rejoined");

        vec![
            Outgoing::Socket(
                socket.clone(),
                ServerEvent::SessionState {
                    snapshot: self.snapshot(false),
                    player_id: Some(player_id.clone()),
                },
            ),
            Outgoing::Session(ServerEvent::PlayerJoined { player: info }),
        ]
    }

    /// Flip a player offline. No events yet: the grace timer decides
    /// whether PLAYER_LEFT goes out. Returns false for unknown players.
    pub fn mark_player_offline(&mut self, player_id: &PlayerId) -> bool {
        match self.players.get_mut(player_id) {
            Some(p) => {
                p.online = false;
                true
            }
            None => false,
        }
    }

    /// Reconnect inside the grace window: restore silently.
    pub fn mark_player_online(&mut self, player_id: &PlayerId) -> bool {
        match self.players.get_mut(player_id) {
            Some(p) => {
                p.online = true;
                p.left_at = None;
                true
            }
            None => false,
        }
    }

    /// Grace expired: the player is gone as far as peers are concerned,
    /// but stays in the roster ("left with answers") for rejoin.
    pub fn player_left(&mut self, player_id: &PlayerId) -> Vec<Outgoing> {
        let Some(player) = self.players.get_mut(player_id) else {
            return Vec::new();
        };
        if player.online {
            // Reconnected before the grace timer fired
            return Vec::new();
        }
        player.left_at = Some(chrono::Utc::now().to_rfc3339());
        vec![Outgoing::Session(ServerEvent::PlayerLeft {
            player_id: player_id.clone(),
        })]
    }

    pub fn connection_status_changed(
        &self,
        player_id: &PlayerId,
        quality: ConnectionQuality,
    ) -> Vec<Outgoing> {
        if !self.players.contains_key(player_id) {
            return Vec::new();
        }
        vec![Outgoing::Session(ServerEvent::ConnectionStatusUpdate {
            player_id: player_id.clone(),
            quality,
        })]
    }

    /// KICK_PLAYER: permanent removal. The victim gets PLAYER_KICKED on
    /// their own sockets, everyone else PLAYER_LEFT.
    pub fn kick_player(
        &mut self,
        player_id: &PlayerId,
        victim_sockets: &[SocketId],
    ) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        if self.players.remove(player_id).is_none() {
            return Err(EngineError::PlayerNotFound(player_id.clone()));
        }
        self.pending_answers.remove(player_id);
        if let Some(game) = &mut self.minigame {
            game.remove_participant(player_id);
        }

        tracing::info!(session = %self.code, player = %player_id, "player kicked");

        let mut events: Vec<Outgoing> = victim_sockets
            .iter()
            .map(|s| {
                Outgoing::Socket(
                    s.clone(),
                    ServerEvent::PlayerKicked {
                        player_id: player_id.clone(),
                    },
                )
            })
            .collect();
        events.push(Outgoing::Session(ServerEvent::PlayerLeft {
            player_id: player_id.clone(),
        }));
        Ok(events)
    }

    /// RESET_SESSION: back to the lobby with a clean slate, players kept.
    pub fn reset_session(&mut self) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        self.status = SessionStatus::Lobby;
        self.item_phase = ItemPhase::Idle;
        self.current_item_index = None;
        self.item_started_at = None;
        self.timer_remaining_ms = None;
        self.timer_epoch += 1;
        self.pending_answers.clear();
        self.committed_answers.clear();
        self.minigame = None;
        for player in self.players.values_mut() {
            player.score = 0;
            player.streak = 0;
        }

        tracing::info!(session = %self.code, "session reset to lobby");

        Ok(vec![
            Outgoing::Session(ServerEvent::SessionReset),
            Outgoing::Session(ServerEvent::LeaderboardUpdate {
                entries: leaderboard_entries(&self.players),
            }),
        ])
    }

    /// END_SESSION: terminal. Cancels whatever is running and publishes
    /// the final scoreboard.
    pub fn end_session(&mut self) -> Result<Vec<Outgoing>, EngineError> {
        if self.quarantined {
            return Err(EngineError::Quarantined);
        }
        if self.status == SessionStatus::Ended {
            return Err(EngineError::WrongStatus(self.status));
        }
        self.status = SessionStatus::Ended;
        self.item_phase = ItemPhase::Idle;
        self.item_started_at = None;
        self.timer_remaining_ms = None;
        self.timer_epoch += 1;
        self.pending_answers.clear();
        self.minigame = None;

        tracing::info!(session = %self.code, "session ended");

        Ok(vec![Outgoing::Session(ServerEvent::SessionEnded {
            leaderboard: leaderboard_entries(&self.players),
        })])
    }

    /// The out-of-scope editor mutated the underlying quiz: the session
    /// becomes read-only.
    pub fn archive_session(&mut self) -> Vec<Outgoing> {
        self.status = SessionStatus::Archived;
        self.timer_epoch += 1;
        self.pending_answers.clear();
        self.minigame = None;
        tracing::info!(session = %self.code, "session archived (quiz mutated)");
        vec![
            Outgoing::Players(ServerEvent::SessionState {
                snapshot: self.snapshot(false),
                player_id: None,
            }),
            Outgoing::Host(ServerEvent::SessionState {
                snapshot: self.snapshot(true),
                player_id: None,
            }),
        ]
    }

    /// ADJUST_SCORE: host override on a committed fuzzy-text answer.
    pub fn adjust_score(
        &mut self,
        player_id: &PlayerId,
        item_id: &ItemId,
        score_percentage: u8,
    ) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        let score_percentage = score_percentage.min(100);

        let item = self
            .quiz
            .items
            .iter()
            .find(|i| &i.id == item_id)
            .ok_or_else(|| EngineError::MalformedPayload(format!("unknown item {}", item_id)))?;
        let adjustable = item
            .question_type
            .map(crate::scoring::is_manually_adjustable)
            .unwrap_or(false);
        if !adjustable {
            return Err(EngineError::ScoreNotAdjustable);
        }
        let base_points = item.settings.base_points;

        let answer = self
            .committed_answers
            .get_mut(item_id)
            .and_then(|per_item| per_item.get_mut(player_id))
            .ok_or_else(|| EngineError::PlayerNotFound(player_id.clone()))?;

        let new_score = (base_points as f64 * score_percentage as f64 / 100.0).round() as i64;
        let delta = new_score - answer.score;
        answer.score = new_score;
        answer.score_percentage = score_percentage;
        answer.is_correct = Some(score_percentage > 0);
        answer.is_manually_adjusted = true;

        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| EngineError::PlayerNotFound(player_id.clone()))?;
        player.score += delta;

        tracing::info!(
            session = %self.code,
            player = %player_id,
            item = %item_id,
            "score adjusted to {}% by host",
            score_percentage
        );

        Ok(vec![
            Outgoing::Session(ServerEvent::ScoreAdjusted {
                player_id: player_id.clone(),
                item_id: item_id.clone(),
                score_percentage,
                score: new_score,
            }),
            Outgoing::Session(ServerEvent::LeaderboardUpdate {
                entries: leaderboard_entries(&self.players),
            }),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::quiz_with_items;
    use super::*;

    fn join(state: &mut SessionState, name: &str) -> PlayerId {
        match state
            .join_session(&"sock".to_string(), name, None, None, true, 500)
            .unwrap()
        {
            JoinOutcome::Joined { player_id, .. } => player_id,
            other => panic!("expected join, got {:?}", other),
        }
    }

    #[test]
    fn test_join_and_name_taken() {
        let mut state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        join(&mut state, "Alice");
        let err = state
            .join_session(&"sock2".to_string(), "alice", None, None, true, 500)
            .unwrap_err();
        assert_eq!(err, EngineError::NameTaken);
    }

    #[test]
    fn test_join_rejects_bad_names() {
        let mut state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        let err = state
            .join_session(&"sock".to_string(), "   ", None, None, true, 500)
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidName);

        let long = "x".repeat(51);
        let err = state
            .join_session(&"sock".to_string(), &long, None, None, true, 500)
            .unwrap_err();
        assert_eq!(err, EngineError::InvalidName);
    }

    #[test]
    fn test_device_recognition_offers_existing_player() {
        let mut state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        let outcome = state
            .join_session(
                &"sock".to_string(),
                "Alice",
                None,
                Some("device-1".into()),
                true,
                500,
            )
            .unwrap();
        let alice = match outcome {
            JoinOutcome::Joined { player_id, .. } => player_id,
            other => panic!("expected join, got {:?}", other),
        };

        // Same fingerprint again: recognized, no new player
        let outcome = state
            .join_session(
                &"sock2".to_string(),
                "Alice2",
                None,
                Some("device-1".into()),
                true,
                500,
            )
            .unwrap();
        match outcome {
            JoinOutcome::DeviceRecognized { events } => {
                assert_eq!(events.len(), 1);
                match &events[0] {
                    Outgoing::Socket(sock, ServerEvent::DeviceRecognized { player }) => {
                        assert_eq!(sock, "sock2");
                        assert_eq!(player.id, alice);
                    }
                    other => panic!("unexpected event {:?}", other),
                }
            }
            other => panic!("expected recognition, got {:?}", other),
        }
        assert_eq!(state.players.len(), 1);

        // JOIN_AS_NEW bypasses recognition
        let outcome = state
            .join_session(
                &"sock2".to_string(),
                "Alice2",
                None,
                Some("device-1".into()),
                false,
                500,
            )
            .unwrap();
        assert!(matches!(outcome, JoinOutcome::Joined { .. }));
        assert_eq!(state.players.len(), 2);
    }

    #[test]
    fn test_offline_then_left_then_silent_reconnect() {
        let mut state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        let alice = join(&mut state, "Alice");

        assert!(state.mark_player_offline(&alice));
        // Reconnected before grace expiry: no PLAYER_LEFT
        assert!(state.mark_player_online(&alice));
        assert!(state.player_left(&alice).is_empty());

        state.mark_player_offline(&alice);
        let events = state.player_left(&alice);
        assert_eq!(events.len(), 1);
        assert!(state.players[&alice].left_at.is_some());
    }

    #[test]
    fn test_kick_removes_player_permanently() {
        let mut state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        let alice = join(&mut state, "Alice");
        let events = state
            .kick_player(&alice, &["sock-a".to_string()])
            .unwrap();
        assert!(!state.players.contains_key(&alice));
        assert!(matches!(
            &events[0],
            Outgoing::Socket(_, ServerEvent::PlayerKicked { .. })
        ));
        assert!(matches!(
            &events[1],
            Outgoing::Session(ServerEvent::PlayerLeft { .. })
        ));

        let err = state.kick_player(&alice, &[]).unwrap_err();
        assert_eq!(err, EngineError::PlayerNotFound(alice));
    }

    #[test]
    fn test_reset_keeps_players_clears_scores() {
        let mut state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        let alice = join(&mut state, "Alice");
        state.players.get_mut(&alice).unwrap().score = 42;
        state.players.get_mut(&alice).unwrap().streak = 3;
        state.status = SessionStatus::Active;

        state.reset_session().unwrap();
        assert_eq!(state.status, SessionStatus::Lobby);
        assert_eq!(state.players[&alice].score, 0);
        assert_eq!(state.players[&alice].streak, 0);
        assert!(state.committed_answers.is_empty());
    }

    #[test]
    fn test_ended_session_rejects_joins() {
        let mut state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        state.end_session().unwrap();
        let err = state
            .join_session(&"sock".to_string(), "Late", None, None, true, 500)
            .unwrap_err();
        assert_eq!(err, EngineError::WrongStatus(SessionStatus::Ended));

        // Ending twice is an error too
        assert!(state.end_session().is_err());
    }
}
