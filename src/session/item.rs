//! Per-item state machine: IDLE → ACTIVE → LOCKED → REVEALED, with cancel
//! back to IDLE and idempotent re-reveal.
//!
//! All clocks are passed in as epoch milliseconds so the logic is
//! deterministic under test; the supervisor supplies wall time.

use super::{Outgoing, SessionState};
use crate::error::EngineError;
use crate::protocol::{CorrectAnswers, ItemPublic, RevealedAnswer, ServerEvent};
use crate::scoring::{self, AnswerPayload, ScoreRequest};
use crate::session::{compute_speed_podium, leaderboard_entries};
use crate::types::*;

/// Why an item locked. HostCommand and TimerExpired are externally
/// indistinguishable in the event stream; the reason is for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    TimerExpired,
    AllAnswered,
    HostCommand,
}

impl SessionState {
    /// START_ITEM. First start flips a LOBBY session to ACTIVE. A running
    /// minigame is terminated, per the minigame cancellation rule.
    pub fn start_item(
        &mut self,
        item_index: usize,
        now_ms: i64,
    ) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        if self.status == SessionStatus::Paused {
            return Err(EngineError::WrongStatus(self.status));
        }
        if matches!(self.item_phase, ItemPhase::Active | ItemPhase::Locked) {
            // A running question blocks START; a minigame/scoreboard/break
            // is preempted by the next item instead.
            let blocking = self
                .current_item()
                .map(|i| i.kind == ItemKind::Question)
                .unwrap_or(false);
            if blocking {
                return Err(EngineError::InvalidTransition(format!(
                    "cannot start an item while the current one is {:?}",
                    self.item_phase
                )));
            }
        }
        let item = self
            .quiz
            .items
            .get(item_index)
            .ok_or(EngineError::ItemOutOfRange(item_index))?
            .clone();

        if self.status == SessionStatus::Lobby {
            self.status = SessionStatus::Active;
        }
        self.current_item_index = Some(item_index);
        self.item_phase = ItemPhase::Active;
        self.item_started_at = Some(now_ms);
        self.timer_remaining_ms = None;
        self.timer_epoch += 1;
        self.pending_answers.clear();
        // A new item preempts any running minigame
        self.minigame = None;

        tracing::info!(
            session = %self.code,
            item = %item.id,
            "item {} started ({:?})",
            item_index,
            item.kind
        );

        Ok(vec![Outgoing::Session(ServerEvent::ItemStarted {
            item_index,
            item: ItemPublic::from(&item),
            started_at: now_ms,
        })])
    }

    /// Auto-lock window for the active item, if it has one.
    pub fn lock_timer_ms(&self) -> Option<u64> {
        let item = self.current_item()?;
        if item.kind == ItemKind::Question && item.timer_seconds > 0 {
            Some(item.timer_seconds as u64 * 1000)
        } else {
            None
        }
    }

    /// SUBMIT_ANSWER. Accepted only while the item is ACTIVE; resubmission
    /// overwrites. The returned flag is true when every online player has
    /// answered, which triggers the early lock.
    pub fn submit_answer(
        &mut self,
        socket: &SocketId,
        player_id: &PlayerId,
        raw: serde_json::Value,
        now_ms: i64,
    ) -> Result<(Vec<Outgoing>, bool), EngineError> {
        self.guard_mutable()?;
        if self.status == SessionStatus::Paused {
            return Err(EngineError::WrongStatus(self.status));
        }
        match self.item_phase {
            ItemPhase::Active => {}
            ItemPhase::Locked | ItemPhase::Revealed => return Err(EngineError::AnswerAfterLock),
            ItemPhase::Idle => return Err(EngineError::ItemNotActive),
        }
        let item = self.current_item().ok_or(EngineError::ItemNotActive)?.clone();
        if item.kind != ItemKind::Question {
            return Err(EngineError::NotAQuestion);
        }
        let question_type = item.question_type.ok_or(EngineError::NotAQuestion)?;
        let player = self
            .players
            .get(player_id)
            .ok_or_else(|| EngineError::PlayerNotFound(player_id.clone()))?;

        let evaluation = scoring::evaluate(&ScoreRequest {
            question_type,
            submission: &raw,
            options: &item.options,
            settings: &item.settings,
            streak: player.streak,
        });
        let started_at = self.item_started_at.unwrap_or(now_ms);
        let time_spent_ms = (now_ms - started_at).max(0) as u64;

        let answer = Answer {
            item_id: item.id.clone(),
            player_id: player_id.clone(),
            raw,
            normalized: evaluation.normalized_answer,
            is_correct: evaluation.is_correct,
            score_percentage: evaluation.score_percentage,
            score: evaluation.score,
            time_spent_ms,
            is_manually_adjusted: false,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let player_name = player.name.clone();
        // Overwrite of an earlier submission keeps the count stable
        self.pending_answers.insert(player_id.clone(), answer);

        let count = self.pending_answers.len();
        let total = self.online_player_count();
        let all_answered = total > 0
            && self
                .players
                .values()
                .filter(|p| p.online)
                .all(|p| self.pending_answers.contains_key(&p.id));

        tracing::debug!(
            session = %self.code,
            player = %player_id,
            "answer recorded ({}/{})",
            count,
            total
        );

        let events = vec![
            Outgoing::Socket(
                socket.clone(),
                ServerEvent::AnswerReceived {
                    item_id: item.id.clone(),
                },
            ),
            Outgoing::Host(ServerEvent::PlayerAnswered {
                item_id: item.id.clone(),
                player_id: player_id.clone(),
                player_name,
            }),
            Outgoing::Session(ServerEvent::AnswerCountUpdated {
                item_id: item.id,
                count,
                total,
            }),
        ];
        Ok((events, all_answered))
    }

    /// ACTIVE → LOCKED: freeze the answer set, run the speed podium,
    /// commit scores and streaks.
    pub fn lock_item(&mut self, reason: LockReason) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        if self.item_phase != ItemPhase::Active {
            return Err(EngineError::InvalidTransition(format!(
                "cannot lock from {:?}",
                self.item_phase
            )));
        }
        let item = self.current_item().ok_or(EngineError::ItemNotActive)?.clone();

        self.item_phase = ItemPhase::Locked;
        self.timer_epoch += 1;
        self.timer_remaining_ms = None;

        let mut frozen = std::mem::take(&mut self.pending_answers);
        let is_scored_question = item.kind == ItemKind::Question
            && item
                .question_type
                .map(|qt| scoring::scoring_mode(qt) != ScoringMode::NoScore)
                .unwrap_or(false);

        let podium = if is_scored_question {
            compute_speed_podium(
                &frozen,
                &self.players,
                item.settings.base_points,
                &self.quiz.podium,
            )
        } else {
            Vec::new()
        };
        for entry in &podium {
            if let Some(answer) = frozen.get_mut(&entry.player_id) {
                answer.score += entry.bonus_points;
            }
        }

        if item.kind == ItemKind::Question {
            // Re-running a cancelled-after-lock item replaces its previous
            // committed answers; back their points out first so the
            // score-sum invariant survives. Non-question items never
            // commit here (the minigame commits its own results).
            if let Some(previous) =
                self.committed_answers.insert(item.id.clone(), frozen.clone())
            {
                for (player_id, old) in previous {
                    if let Some(player) = self.players.get_mut(&player_id) {
                        player.score -= old.score;
                    }
                }
            }

            for (player_id, answer) in &frozen {
                if let Some(player) = self.players.get_mut(player_id) {
                    player.score += answer.score;
                    if is_scored_question {
                        if answer.score_percentage == 100 {
                            player.streak += 1;
                        } else {
                            player.streak = 0;
                        }
                    }
                }
            }
            if is_scored_question {
                // Not answering a scored question breaks a streak too
                for player in self.players.values_mut() {
                    if !frozen.contains_key(&player.id) {
                        player.streak = 0;
                    }
                }
            }
        }

        let count = frozen.len();
        let total = self.online_player_count();

        tracing::info!(
            session = %self.code,
            item = %item.id,
            "item locked ({:?}), {} answers",
            reason,
            count
        );

        let mut events = vec![
            Outgoing::Session(ServerEvent::AnswerCountUpdated {
                item_id: item.id.clone(),
                count,
                total,
            }),
            Outgoing::Session(ServerEvent::LeaderboardUpdate {
                entries: leaderboard_entries(&self.players),
            }),
        ];
        if !podium.is_empty() {
            events.push(Outgoing::Session(ServerEvent::SpeedPodiumResults {
                item_id: item.id.clone(),
                podium,
            }));
        }
        events.push(Outgoing::Session(ServerEvent::ItemLocked {
            item_index: self.current_item_index.unwrap_or_default(),
            item_id: item.id,
        }));
        Ok(events)
    }

    /// LOCKED → REVEALED, or an idempotent re-emit from REVEALED. The
    /// payload is rebuilt from committed state, so repeats are identical.
    pub fn reveal_answers(&mut self) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        match self.item_phase {
            ItemPhase::Locked => self.item_phase = ItemPhase::Revealed,
            ItemPhase::Revealed => {}
            other => {
                return Err(EngineError::InvalidTransition(format!(
                    "cannot reveal from {:?}",
                    other
                )))
            }
        }
        let item = self.current_item().ok_or(EngineError::ItemNotActive)?.clone();
        let question_type = item.question_type;

        let correct = match question_type
            .map(|qt| scoring::canonical_answer(qt, &item.options, &item.settings))
            .unwrap_or(AnswerPayload::NoAnswer)
        {
            AnswerPayload::OptionId(id) => CorrectAnswers {
                option_ids: vec![id],
                ..Default::default()
            },
            AnswerPayload::OptionIds(ids) => CorrectAnswers {
                option_ids: ids,
                ..Default::default()
            },
            AnswerPayload::Boolean(b) => CorrectAnswers {
                boolean: Some(b),
                ..Default::default()
            },
            AnswerPayload::Text(t) => CorrectAnswers {
                text: Some(t),
                ..Default::default()
            },
            AnswerPayload::Number(n) => CorrectAnswers {
                number: Some(n),
                ..Default::default()
            },
            AnswerPayload::OrderArray(ids) => CorrectAnswers {
                ordering: ids,
                ..Default::default()
            },
            AnswerPayload::NoAnswer => CorrectAnswers::default(),
        };

        let committed = self.committed_answers.get(&item.id);
        let mut answers: Vec<RevealedAnswer> = self
            .players
            .values()
            .map(|player| match committed.and_then(|c| c.get(&player.id)) {
                Some(answer) => RevealedAnswer {
                    player_id: player.id.clone(),
                    player_name: player.name.clone(),
                    answered: true,
                    answer: Some(answer.raw.clone()),
                    is_correct: answer.is_correct,
                    score_percentage: answer.score_percentage,
                    score: answer.score,
                    time_spent_ms: answer.time_spent_ms,
                },
                None => RevealedAnswer {
                    player_id: player.id.clone(),
                    player_name: player.name.clone(),
                    answered: false,
                    answer: None,
                    is_correct: None,
                    score_percentage: 0,
                    score: 0,
                    time_spent_ms: 0,
                },
            })
            .collect();
        answers.sort_by(|a, b| a.player_id.cmp(&b.player_id));

        Ok(vec![Outgoing::Session(ServerEvent::RevealAnswers {
            item_id: item.id,
            correct,
            answers,
        })])
    }

    /// CANCEL_ITEM: any non-IDLE phase back to IDLE. Uncommitted answers
    /// are discarded; committed scores stay untouched. START is re-enabled
    /// on the same item.
    pub fn cancel_item(&mut self) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        if self.item_phase == ItemPhase::Idle {
            return Err(EngineError::InvalidTransition(
                "no item to cancel".to_string(),
            ));
        }
        let item_index = self.current_item_index.unwrap_or_default();
        let item_id = self
            .current_item()
            .map(|i| i.id.clone())
            .unwrap_or_default();

        self.item_phase = ItemPhase::Idle;
        self.item_started_at = None;
        self.timer_remaining_ms = None;
        self.timer_epoch += 1;
        self.pending_answers.clear();

        tracing::info!(session = %self.code, item = %item_id, "item cancelled");

        Ok(vec![Outgoing::Session(ServerEvent::ItemCancelled {
            item_index,
            item_id,
        })])
    }

    /// PAUSE_SESSION: freeze the answer-window timer and stop intake.
    pub fn pause_session(&mut self, now_ms: i64) -> Result<Vec<Outgoing>, EngineError> {
        self.guard_mutable()?;
        if self.status != SessionStatus::Active {
            return Err(EngineError::WrongStatus(self.status));
        }
        self.status = SessionStatus::Paused;
        self.timer_epoch += 1;

        let remaining_ms = if self.item_phase == ItemPhase::Active {
            self.lock_timer_ms().map(|window| {
                let elapsed = self
                    .item_started_at
                    .map(|start| (now_ms - start).max(0) as u64)
                    .unwrap_or(0);
                window.saturating_sub(elapsed)
            })
        } else {
            None
        };
        self.timer_remaining_ms = remaining_ms;

        tracing::info!(session = %self.code, "session paused (remaining {:?} ms)", remaining_ms);

        Ok(vec![Outgoing::Session(ServerEvent::SessionPaused {
            remaining_ms,
        })])
    }

    /// RESUME_SESSION. Returns the saved timer remainder so the supervisor
    /// can rearm the auto-lock.
    pub fn resume_session(&mut self) -> Result<(Vec<Outgoing>, Option<u64>), EngineError> {
        self.guard_mutable()?;
        if self.status != SessionStatus::Paused {
            return Err(EngineError::WrongStatus(self.status));
        }
        self.status = SessionStatus::Active;
        let remaining = self.timer_remaining_ms.take();

        tracing::info!(session = %self.code, "session resumed");

        Ok((vec![Outgoing::Session(ServerEvent::SessionResumed)], remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::super::player::JoinOutcome;
    use super::super::tests::{question_item, quiz_with_items};
    use super::*;
    use serde_json::json;

    fn mc_options() -> Vec<QuestionOption> {
        vec![
            QuestionOption {
                id: "o1".into(),
                text: "Paris".into(),
                is_correct: true,
                order: None,
            },
            QuestionOption {
                id: "o2".into(),
                text: "London".into(),
                is_correct: false,
                order: None,
            },
        ]
    }

    fn state_with_players(names: &[&str]) -> (SessionState, Vec<PlayerId>) {
        let mut item = question_item("item_1", QuestionType::McSingle, mc_options());
        item.settings.streak_bonus = true;
        let mut quiz = quiz_with_items(vec![item]);
        quiz.podium.enabled = false;
        let mut state = SessionState::new("ABC123".into(), quiz);
        let ids = names
            .iter()
            .map(|name| {
                match state
                    .join_session(&format!("sock-{}", name), name, None, None, true, 500)
                    .unwrap()
                {
                    JoinOutcome::Joined { player_id, .. } => player_id,
                    other => panic!("expected join, got {:?}", other),
                }
            })
            .collect();
        (state, ids)
    }

    #[test]
    fn test_happy_path_mc_single() {
        let (mut state, ids) = state_with_players(&["Alice", "Bob"]);
        let (alice, bob) = (&ids[0], &ids[1]);

        state.start_item(0, 1_000_000).unwrap();
        assert_eq!(state.status, SessionStatus::Active);
        assert_eq!(state.item_phase, ItemPhase::Active);

        let (_, all) = state
            .submit_answer(&"sock-Alice".to_string(), alice, json!("o1"), 1_001_000)
            .unwrap();
        assert!(!all);
        let (_, all) = state
            .submit_answer(&"sock-Bob".to_string(), bob, json!("o2"), 1_003_000)
            .unwrap();
        assert!(all);

        state.lock_item(LockReason::TimerExpired).unwrap();

        let alice_p = &state.players[alice];
        let bob_p = &state.players[bob];
        assert_eq!(alice_p.score, 10);
        assert_eq!(alice_p.streak, 1);
        assert_eq!(bob_p.score, 0);
        assert_eq!(bob_p.streak, 0);

        let committed = &state.committed_answers["item_1"];
        assert_eq!(committed[alice].is_correct, Some(true));
        assert_eq!(committed[alice].time_spent_ms, 1000);
        assert_eq!(committed[bob].is_correct, Some(false));
        assert_eq!(committed[bob].time_spent_ms, 3000);

        assert!(state.check_score_invariant());
    }

    #[test]
    fn test_resubmission_overwrites_before_lock() {
        let (mut state, ids) = state_with_players(&["Alice", "Bob"]);
        let alice = &ids[0];

        state.start_item(0, 0).unwrap();
        state
            .submit_answer(&"s".to_string(), alice, json!("o2"), 500)
            .unwrap();
        let (events, _) = state
            .submit_answer(&"s".to_string(), alice, json!("o1"), 900)
            .unwrap();

        // Count stays at one distinct player
        let count_event = events.iter().find_map(|e| match e {
            Outgoing::Session(ServerEvent::AnswerCountUpdated { count, total, .. }) => {
                Some((*count, *total))
            }
            _ => None,
        });
        assert_eq!(count_event, Some((1, 2)));

        state.lock_item(LockReason::HostCommand).unwrap();
        let committed = &state.committed_answers["item_1"];
        assert_eq!(committed[alice].is_correct, Some(true));
        assert_eq!(committed[alice].time_spent_ms, 900);
    }

    #[test]
    fn test_submission_after_lock_rejected() {
        let (mut state, ids) = state_with_players(&["Alice", "Bob"]);
        let alice = &ids[0];

        state.start_item(0, 0).unwrap();
        state.lock_item(LockReason::HostCommand).unwrap();
        let err = state
            .submit_answer(&"s".to_string(), alice, json!("o1"), 2000)
            .unwrap_err();
        assert_eq!(err, EngineError::AnswerAfterLock);
    }

    #[test]
    fn test_submission_without_active_item_rejected() {
        let (mut state, ids) = state_with_players(&["Alice"]);
        let err = state
            .submit_answer(&"s".to_string(), &ids[0], json!("o1"), 0)
            .unwrap_err();
        assert_eq!(err, EngineError::ItemNotActive);
    }

    #[test]
    fn test_uncoercible_answer_still_counts() {
        let (mut state, ids) = state_with_players(&["Alice", "Bob"]);
        let alice = &ids[0];

        state.start_item(0, 0).unwrap();
        let (events, _) = state
            .submit_answer(&"s".to_string(), alice, json!({"bogus": true}), 100)
            .unwrap();
        let counted = events.iter().any(|e| {
            matches!(
                e,
                Outgoing::Session(ServerEvent::AnswerCountUpdated { count: 1, .. })
            )
        });
        assert!(counted);

        state.lock_item(LockReason::HostCommand).unwrap();
        let committed = &state.committed_answers["item_1"];
        assert_eq!(committed[alice].score_percentage, 0);
        assert_eq!(committed[alice].score, 0);
    }

    #[test]
    fn test_cancel_discards_pending_and_reenables_start() {
        let (mut state, ids) = state_with_players(&["Alice", "Bob"]);
        let alice = &ids[0];

        state.start_item(0, 0).unwrap();
        state
            .submit_answer(&"s".to_string(), alice, json!("o1"), 100)
            .unwrap();
        state.cancel_item().unwrap();

        assert_eq!(state.item_phase, ItemPhase::Idle);
        assert!(state.pending_answers.is_empty());
        assert_eq!(state.players[alice].score, 0);

        // Same item can be started again
        state.start_item(0, 5000).unwrap();
        assert_eq!(state.item_phase, ItemPhase::Active);
    }

    #[test]
    fn test_reveal_is_idempotent() {
        let (mut state, ids) = state_with_players(&["Alice", "Bob"]);
        let alice = &ids[0];

        state.start_item(0, 0).unwrap();
        state
            .submit_answer(&"s".to_string(), alice, json!("o1"), 800)
            .unwrap();
        state.lock_item(LockReason::HostCommand).unwrap();

        let first = state.reveal_answers().unwrap();
        let second = state.reveal_answers().unwrap();

        let payload = |events: &[Outgoing]| match &events[0] {
            Outgoing::Session(event) => serde_json::to_value(event).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(payload(&first), payload(&second));

        // Non-answerer Bob appears with answered=false
        if let Outgoing::Session(ServerEvent::RevealAnswers { answers, correct, .. }) = &first[0] {
            assert_eq!(answers.len(), 2);
            assert!(answers.iter().any(|a| !a.answered));
            assert_eq!(correct.option_ids, vec!["o1".to_string()]);
        } else {
            panic!("expected reveal event");
        }
    }

    #[test]
    fn test_cannot_reveal_active_item() {
        let (mut state, _) = state_with_players(&["Alice"]);
        state.start_item(0, 0).unwrap();
        assert!(matches!(
            state.reveal_answers().unwrap_err(),
            EngineError::InvalidTransition(_)
        ));
    }

    #[test]
    fn test_pause_saves_remainder_and_blocks_answers() {
        let (mut state, ids) = state_with_players(&["Alice", "Bob"]);
        let alice = &ids[0];

        // Timer is 10s; pause 4s in
        state.start_item(0, 0).unwrap();
        state.pause_session(4_000).unwrap();
        assert_eq!(state.status, SessionStatus::Paused);
        assert_eq!(state.timer_remaining_ms, Some(6_000));

        let err = state
            .submit_answer(&"s".to_string(), alice, json!("o1"), 5_000)
            .unwrap_err();
        assert_eq!(err, EngineError::WrongStatus(SessionStatus::Paused));

        let (_, remaining) = state.resume_session().unwrap();
        assert_eq!(remaining, Some(6_000));
        assert_eq!(state.status, SessionStatus::Active);

        // Intake works again after resume
        state
            .submit_answer(&"s".to_string(), alice, json!("o1"), 6_000)
            .unwrap();
    }

    #[test]
    fn test_speed_podium_applied_at_lock() {
        let mut item = question_item("item_1", QuestionType::McSingle, mc_options());
        item.settings.base_points = 10;
        let quiz = quiz_with_items(vec![item]);
        let mut state = SessionState::new("ABC123".into(), quiz);

        let mut ids = Vec::new();
        for name in ["Ann", "Ben", "Cy"] {
            match state
                .join_session(&format!("sock-{}", name), name, None, None, true, 500)
                .unwrap()
            {
                JoinOutcome::Joined { player_id, .. } => ids.push(player_id),
                other => panic!("expected join, got {:?}", other),
            }
        }

        state.start_item(0, 0).unwrap();
        state
            .submit_answer(&"s".to_string(), &ids[0], json!("o1"), 800)
            .unwrap();
        state
            .submit_answer(&"s".to_string(), &ids[1], json!("o1"), 1200)
            .unwrap();
        state
            .submit_answer(&"s".to_string(), &ids[2], json!("o1"), 1600)
            .unwrap();

        let events = state.lock_item(LockReason::AllAnswered).unwrap();

        let podium = events.iter().find_map(|e| match e {
            Outgoing::Session(ServerEvent::SpeedPodiumResults { podium, .. }) => Some(podium),
            _ => None,
        });
        let podium = podium.expect("podium event expected");
        assert_eq!(podium.len(), 3);
        assert_eq!(podium[0].bonus_points, 3);
        assert_eq!(podium[1].bonus_points, 2);
        assert_eq!(podium[2].bonus_points, 1);

        // Bonuses are folded into committed scores and player totals
        assert_eq!(state.players[&ids[0]].score, 13);
        assert_eq!(state.players[&ids[1]].score, 12);
        assert_eq!(state.players[&ids[2]].score, 11);
        assert!(state.check_score_invariant());
    }

    #[test]
    fn test_poll_does_not_score_or_touch_streak() {
        let mut poll = question_item("poll_1", QuestionType::Poll, mc_options());
        poll.options.iter_mut().for_each(|o| o.is_correct = false);
        let quiz = quiz_with_items(vec![poll]);
        let mut state = SessionState::new("ABC123".into(), quiz);
        let alice = match state
            .join_session(&"s".to_string(), "Alice", None, None, true, 500)
            .unwrap()
        {
            JoinOutcome::Joined { player_id, .. } => player_id,
            other => panic!("expected join, got {:?}", other),
        };
        state.players.get_mut(&alice).unwrap().streak = 2;

        state.start_item(0, 0).unwrap();
        state
            .submit_answer(&"s".to_string(), &alice, json!("o1"), 100)
            .unwrap();
        state.lock_item(LockReason::HostCommand).unwrap();

        let player = &state.players[&alice];
        assert_eq!(player.score, 0);
        assert_eq!(player.streak, 2, "polls must not touch streaks");
        assert!(state.check_score_invariant());
    }

    #[test]
    fn test_missing_a_scored_question_breaks_streak() {
        let (mut state, ids) = state_with_players(&["Alice", "Bob"]);
        let (alice, bob) = (&ids[0], &ids[1]);
        state.players.get_mut(bob).unwrap().streak = 4;

        state.start_item(0, 0).unwrap();
        state
            .submit_answer(&"s".to_string(), alice, json!("o1"), 100)
            .unwrap();
        state.lock_item(LockReason::TimerExpired).unwrap();

        assert_eq!(state.players[bob].streak, 0);
    }

    #[test]
    fn test_relock_after_cancel_replaces_committed_scores() {
        let (mut state, ids) = state_with_players(&["Alice", "Bob"]);
        let alice = &ids[0];

        state.start_item(0, 0).unwrap();
        state
            .submit_answer(&"s".to_string(), alice, json!("o1"), 100)
            .unwrap();
        state.lock_item(LockReason::HostCommand).unwrap();
        assert_eq!(state.players[alice].score, 10);

        // Host cancels the locked item and re-runs it; Alice gets it wrong
        state.cancel_item().unwrap();
        state.start_item(0, 10_000).unwrap();
        state
            .submit_answer(&"s".to_string(), alice, json!("o2"), 10_500)
            .unwrap();
        state.lock_item(LockReason::HostCommand).unwrap();

        assert_eq!(state.players[alice].score, 0);
        assert!(state.check_score_invariant());
    }

    #[test]
    fn test_start_requires_idle_or_revealed() {
        let (mut state, _) = state_with_players(&["Alice"]);
        state.start_item(0, 0).unwrap();
        assert!(matches!(
            state.start_item(0, 100).unwrap_err(),
            EngineError::InvalidTransition(_)
        ));
        assert!(matches!(
            state.start_item(99, 100).unwrap_err(),
            EngineError::InvalidTransition(_)
        ));
    }
}
