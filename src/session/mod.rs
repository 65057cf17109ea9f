//! Authoritative per-session state.
//!
//! One `SessionState` is owned by its session worker (see `supervisor`);
//! nothing outside the worker mutates it. Mutation methods return routed
//! events which the worker stamps with a state version and hands to the
//! broadcaster.

mod item;
mod leaderboard;
pub mod minigame;
mod player;
mod podium;

pub use item::LockReason;
pub use leaderboard::{leaderboard_entries, rank_of, top_n};
pub use player::JoinOutcome;
pub use podium::compute_speed_podium;

use crate::protocol::{ItemPublic, PlayerInfo, ServerEvent, SessionSnapshot};
use crate::types::*;
use minigame::SwanChase;
use std::collections::HashMap;

/// An event plus its routing target. The supervisor translates these into
/// broadcaster calls.
#[derive(Debug, Clone)]
pub enum Outgoing {
    /// Everyone in the session room
    Session(ServerEvent),
    /// Host sockets only
    Host(ServerEvent),
    /// Player and display sockets (excludes host)
    Players(ServerEvent),
    /// One specific socket
    Socket(SocketId, ServerEvent),
}

#[derive(Debug)]
pub struct SessionState {
    pub id: SessionId,
    pub code: SessionCode,
    pub status: SessionStatus,
    pub quiz: QuizSnapshot,
    pub players: HashMap<PlayerId, Player>,
    pub current_item_index: Option<usize>,
    pub item_phase: ItemPhase,
    /// Server clock at item start, epoch millis
    pub item_started_at: Option<i64>,
    /// Saved answer-window remainder while paused
    pub timer_remaining_ms: Option<u64>,
    /// Bumped whenever a scheduled lock timer becomes stale
    pub timer_epoch: u64,
    /// Live submissions for the active item; committed at lock
    pub pending_answers: HashMap<PlayerId, Answer>,
    /// Committed answers per item id
    pub committed_answers: HashMap<ItemId, HashMap<PlayerId, Answer>>,
    pub minigame: Option<SwanChase>,
    pub state_version: u64,
    pub quarantined: bool,
    pub persistence_degraded: bool,
}

impl SessionState {
    pub fn new(code: SessionCode, quiz: QuizSnapshot) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            code,
            status: SessionStatus::Lobby,
            quiz,
            players: HashMap::new(),
            current_item_index: None,
            item_phase: ItemPhase::Idle,
            item_started_at: None,
            timer_remaining_ms: None,
            timer_epoch: 0,
            pending_answers: HashMap::new(),
            committed_answers: HashMap::new(),
            minigame: None,
            state_version: 0,
            quarantined: false,
            persistence_degraded: false,
        }
    }

    /// Next externally visible version. Called once per emitted event so
    /// versions are strictly monotonic across a session's event stream.
    pub fn next_version(&mut self) -> u64 {
        self.state_version += 1;
        self.state_version
    }

    pub fn current_item(&self) -> Option<&Item> {
        self.current_item_index.and_then(|i| self.quiz.items.get(i))
    }

    /// Players currently connected, the denominator for answer counts.
    pub fn online_player_count(&self) -> usize {
        self.players.values().filter(|p| p.online).count()
    }

    /// Total points a player has accumulated across committed answers.
    /// The score-sum invariant checks `player.score` against this.
    pub fn committed_total(&self, player_id: &PlayerId) -> i64 {
        self.committed_answers
            .values()
            .filter_map(|per_item| per_item.get(player_id))
            .map(|a| a.score)
            .sum()
    }

    /// Deep-copied view for bootstrap and the HTTP side-channel.
    /// `answer_history` (the current item's committed answers) is included
    /// for hosts only.
    pub fn snapshot(&self, for_host: bool) -> SessionSnapshot {
        let mut players: Vec<PlayerInfo> = self.players.values().map(PlayerInfo::from).collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));

        let answered_player_ids = if self.item_phase == ItemPhase::Active {
            let mut ids: Vec<PlayerId> = self.pending_answers.keys().cloned().collect();
            ids.sort();
            ids
        } else {
            Vec::new()
        };

        let answer_history = if for_host {
            let mut history: Vec<Answer> = self
                .current_item()
                .and_then(|item| self.committed_answers.get(&item.id))
                .map(|per_item| per_item.values().cloned().collect())
                .unwrap_or_default();
            history.sort_by(|a, b| a.player_id.cmp(&b.player_id));
            Some(history)
        } else {
            None
        };

        SessionSnapshot {
            session_id: self.id.clone(),
            code: self.code.clone(),
            status: self.status,
            quiz_title: self.quiz.title.clone(),
            theme: self.quiz.theme.clone(),
            item_count: self.quiz.items.len(),
            current_item_index: self.current_item_index,
            item_phase: self.item_phase,
            current_item: self.current_item().map(ItemPublic::from),
            players,
            answered_player_ids,
            answer_history,
            state_version: self.state_version,
            persistence_degraded: self.persistence_degraded,
        }
    }

    /// Quick consistency probe run by the worker after mutations. A false
    /// return quarantines the session.
    pub fn check_score_invariant(&self) -> bool {
        self.players
            .iter()
            .all(|(id, p)| p.score == self.committed_total(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn quiz_with_items(items: Vec<Item>) -> QuizSnapshot {
        QuizSnapshot {
            id: "quiz_1".into(),
            title: "Test Quiz".into(),
            theme: None,
            workspace: None,
            items,
            podium: PodiumConfig::default(),
        }
    }

    pub(crate) fn question_item(id: &str, qt: QuestionType, options: Vec<QuestionOption>) -> Item {
        Item {
            id: id.into(),
            kind: ItemKind::Question,
            question_type: Some(qt),
            prompt: format!("Question {}", id),
            options,
            media: Vec::new(),
            timer_seconds: 10,
            settings: ItemSettings::default(),
        }
    }

    #[test]
    fn test_new_session_starts_in_lobby() {
        let state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        assert_eq!(state.status, SessionStatus::Lobby);
        assert_eq!(state.item_phase, ItemPhase::Idle);
        assert_eq!(state.state_version, 0);
        assert!(state.current_item_index.is_none());
    }

    #[test]
    fn test_versions_strictly_increase() {
        let mut state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        let a = state.next_version();
        let b = state.next_version();
        let c = state.next_version();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_snapshot_hides_answer_history_from_players() {
        let state = SessionState::new("ABC123".into(), quiz_with_items(vec![]));
        assert!(state.snapshot(true).answer_history.is_some());
        assert!(state.snapshot(false).answer_history.is_none());
    }
}
