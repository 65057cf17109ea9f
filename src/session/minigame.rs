//! Swan Chase: the cooperative interstitial minigame.
//!
//! Server-authoritative physics on a fixed 50 ms tick. BLUE boats try to
//! reach the safe zone, WHITE swans hunt them. The simulation is plain
//! data plus a `tick` function; the session worker owns the clock and
//! turns tick effects into events.

use super::{Outgoing, SessionState};
use crate::error::EngineError;
use crate::protocol::ServerEvent;
use crate::session::leaderboard_entries;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Tick length: 20 Hz.
pub const TICK_MS: u64 = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Team {
    /// Boats, escaping
    Blue,
    /// Swans, hunting
    White,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    Active,
    Hunting,
    Sprinting,
    Dashing,
    Tagged,
    Safe,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Vec2) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SafeZone {
    pub x: f64,
    pub y: f64,
    pub radius: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SwanChaseConfig {
    pub width: f64,
    pub height: f64,
    pub boat_speed: f64,
    pub swan_speed: f64,
    pub sprint_multiplier: f64,
    pub sprint_duration_ms: u64,
    pub sprint_cooldown_ms: u64,
    pub sprint_charges: u32,
    pub dash_multiplier: f64,
    pub dash_duration_ms: u64,
    pub dash_cooldown_ms: u64,
    pub dash_charges: u32,
    pub tag_radius: f64,
    pub safe_zone: SafeZone,
    pub duration_ms: u64,
}

impl Default for SwanChaseConfig {
    fn default() -> Self {
        Self {
            width: 1600.0,
            height: 900.0,
            boat_speed: 140.0,
            swan_speed: 160.0,
            sprint_multiplier: 1.6,
            sprint_duration_ms: 2_000,
            sprint_cooldown_ms: 5_000,
            sprint_charges: 3,
            dash_multiplier: 2.2,
            dash_duration_ms: 800,
            dash_cooldown_ms: 4_000,
            dash_charges: 3,
            tag_radius: 24.0,
            safe_zone: SafeZone {
                x: 1450.0,
                y: 450.0,
                radius: 120.0,
            },
            duration_ms: 90_000,
        }
    }
}

/// Sprint/dash bookkeeping, in simulation-time millis.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AbilityState {
    pub active_until_ms: u64,
    pub cooldown_until_ms: u64,
    pub charges: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub player_id: PlayerId,
    pub team: Team,
    pub position: Vec2,
    pub velocity: Vec2,
    pub status: ParticipantStatus,
    pub sprint: AbilityState,
    pub dash: AbilityState,
    pub tags_count: u32,
    /// 1-based order of safe-zone arrival, for tie-breaking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_order: Option<u32>,
    /// Current movement intent; persists until overwritten by new input
    #[serde(skip)]
    direction: Vec2,
}

impl Participant {
    fn is_boat(&self) -> bool {
        self.team == Team::Blue
    }

    fn is_movable(&self) -> bool {
        !matches!(
            self.status,
            ParticipantStatus::Tagged | ParticipantStatus::Safe
        )
    }

    /// Boats not yet safe or tagged can be tagged and can reach the zone.
    fn is_exposed_boat(&self) -> bool {
        self.is_boat() && self.is_movable()
    }
}

/// Latest queued input per participant; overwritten, never queued.
#[derive(Debug, Clone, Copy)]
struct PendingInput {
    x: f64,
    y: f64,
    sprint: bool,
    dash: bool,
}

/// What one tick produced. The worker maps these to events.
#[derive(Debug, Default)]
pub struct TickEffects {
    pub tagged: Vec<(PlayerId, PlayerId)>,
    pub safe: Vec<PlayerId>,
    pub ended: Option<SwanChaseResults>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwanChaseResultEntry {
    pub player_id: PlayerId,
    pub team: Team,
    pub points: i64,
    pub tags_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub safe_order: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwanChaseResults {
    pub entries: Vec<SwanChaseResultEntry>,
    pub elapsed_ms: u64,
}

/// Per-tick broadcast payload: the full authoritative picture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwanChaseSnapshot {
    pub participants: Vec<Participant>,
    pub safe_zone: SafeZone,
    pub time_remaining_ms: u64,
}

#[derive(Debug)]
pub struct SwanChase {
    pub config: SwanChaseConfig,
    pub participants: BTreeMap<PlayerId, Participant>,
    pending_inputs: HashMap<PlayerId, PendingInput>,
    pub elapsed_ms: u64,
    pub started_at: i64,
    safe_counter: u32,
    pub finished: bool,
}

impl SwanChase {
    /// Build a game from the roster, alternating teams in id order so the
    /// split is deterministic. Boats spawn along the left edge, swans mid
    /// field.
    pub fn new(config: SwanChaseConfig, mut roster: Vec<PlayerId>, started_at: i64) -> Self {
        roster.sort();
        let mut participants = BTreeMap::new();
        let mut boats = 0usize;
        let mut swans = 0usize;
        for (idx, player_id) in roster.into_iter().enumerate() {
            let team = if idx % 2 == 0 { Team::Blue } else { Team::White };
            let (position, status) = match team {
                Team::Blue => {
                    boats += 1;
                    (
                        Vec2::new(config.width * 0.08, spawn_y(&config, boats)),
                        ParticipantStatus::Active,
                    )
                }
                Team::White => {
                    swans += 1;
                    (
                        Vec2::new(config.width * 0.55, spawn_y(&config, swans)),
                        ParticipantStatus::Hunting,
                    )
                }
            };
            participants.insert(
                player_id.clone(),
                Participant {
                    player_id,
                    team,
                    position,
                    velocity: Vec2::default(),
                    status,
                    sprint: AbilityState {
                        charges: config.sprint_charges,
                        ..Default::default()
                    },
                    dash: AbilityState {
                        charges: config.dash_charges,
                        ..Default::default()
                    },
                    tags_count: 0,
                    safe_order: None,
                    direction: Vec2::default(),
                },
            );
        }
        Self {
            config,
            participants,
            pending_inputs: HashMap::new(),
            elapsed_ms: 0,
            started_at,
            safe_counter: 0,
            finished: false,
        }
    }

    /// Record the latest input for a participant. Inputs between ticks
    /// overwrite, they do not queue.
    pub fn queue_input(&mut self, player_id: &PlayerId, x: f64, y: f64, sprint: bool, dash: bool) {
        if !self.participants.contains_key(player_id) {
            return;
        }
        self.pending_inputs.insert(
            player_id.clone(),
            PendingInput {
                x: x.clamp(-1.0, 1.0),
                y: y.clamp(-1.0, 1.0),
                sprint,
                dash,
            },
        );
    }

    pub fn remove_participant(&mut self, player_id: &PlayerId) {
        self.participants.remove(player_id);
        self.pending_inputs.remove(player_id);
    }

    pub fn time_remaining_ms(&self) -> u64 {
        self.config.duration_ms.saturating_sub(self.elapsed_ms)
    }

    pub fn snapshot(&self) -> SwanChaseSnapshot {
        SwanChaseSnapshot {
            participants: self.participants.values().cloned().collect(),
            safe_zone: self.config.safe_zone,
            time_remaining_ms: self.time_remaining_ms(),
        }
    }

    /// Advance the simulation by `dt_ms`. Order per tick: inputs,
    /// integration, ability expiry, tags, safe-zone, end check.
    pub fn tick(&mut self, dt_ms: u64) -> TickEffects {
        let mut effects = TickEffects::default();
        if self.finished {
            return effects;
        }
        let dt = dt_ms as f64 / 1000.0;
        let now = self.elapsed_ms;

        // 1. Consume the latest input per participant
        let inputs = std::mem::take(&mut self.pending_inputs);
        for (player_id, input) in inputs {
            let Some(p) = self.participants.get_mut(&player_id) else {
                continue;
            };
            if !p.is_movable() {
                continue;
            }
            let mut dir = Vec2::new(input.x, input.y);
            let len = (dir.x * dir.x + dir.y * dir.y).sqrt();
            if len > 1.0 {
                dir.x /= len;
                dir.y /= len;
            }
            p.direction = dir;

            match p.team {
                Team::Blue if input.sprint => {
                    if p.status == ParticipantStatus::Active
                        && p.sprint.charges > 0
                        && now >= p.sprint.cooldown_until_ms
                    {
                        p.status = ParticipantStatus::Sprinting;
                        p.sprint.charges -= 1;
                        p.sprint.active_until_ms = now + self.config.sprint_duration_ms;
                        p.sprint.cooldown_until_ms =
                            now + self.config.sprint_duration_ms + self.config.sprint_cooldown_ms;
                    }
                }
                Team::White if input.dash => {
                    if p.status == ParticipantStatus::Hunting
                        && p.dash.charges > 0
                        && now >= p.dash.cooldown_until_ms
                    {
                        p.status = ParticipantStatus::Dashing;
                        p.dash.charges -= 1;
                        p.dash.active_until_ms = now + self.config.dash_duration_ms;
                        p.dash.cooldown_until_ms =
                            now + self.config.dash_duration_ms + self.config.dash_cooldown_ms;
                    }
                }
                _ => {}
            }
        }

        // 2. Integrate positions. A boost whose duration runs out this
        // tick still moves at the boosted modifier; the drop to base
        // speed takes effect from the next tick on.
        let (width, height) = (self.config.width, self.config.height);
        for p in self.participants.values_mut() {
            if !p.is_movable() {
                p.velocity = Vec2::default();
                continue;
            }
            let base = match p.team {
                Team::Blue => self.config.boat_speed,
                Team::White => self.config.swan_speed,
            };
            let modifier = match p.status {
                ParticipantStatus::Sprinting => self.config.sprint_multiplier,
                ParticipantStatus::Dashing => self.config.dash_multiplier,
                _ => 1.0,
            };
            p.velocity = Vec2::new(
                p.direction.x * base * modifier,
                p.direction.y * base * modifier,
            );
            p.position.x = (p.position.x + p.velocity.x * dt).clamp(0.0, width);
            p.position.y = (p.position.y + p.velocity.y * dt).clamp(0.0, height);
        }

        // 3. Expire active abilities
        for p in self.participants.values_mut() {
            match p.status {
                ParticipantStatus::Sprinting if now >= p.sprint.active_until_ms => {
                    p.status = ParticipantStatus::Active;
                }
                ParticipantStatus::Dashing if now >= p.dash.active_until_ms => {
                    p.status = ParticipantStatus::Hunting;
                }
                _ => {}
            }
        }

        // 4. Resolve tags
        let swan_ids: Vec<PlayerId> = self
            .participants
            .values()
            .filter(|p| p.team == Team::White)
            .map(|p| p.player_id.clone())
            .collect();
        for swan_id in &swan_ids {
            let swan_pos = self.participants[swan_id].position;
            let boat_ids: Vec<PlayerId> = self
                .participants
                .values()
                .filter(|p| {
                    p.is_exposed_boat()
                        && p.position.distance(&swan_pos) <= self.config.tag_radius
                })
                .map(|p| p.player_id.clone())
                .collect();
            for boat_id in boat_ids {
                let boat = self.participants.get_mut(&boat_id).expect("boat exists");
                boat.status = ParticipantStatus::Tagged;
                boat.velocity = Vec2::default();
                let swan = self.participants.get_mut(swan_id).expect("swan exists");
                swan.tags_count += 1;
                effects.tagged.push((boat_id, swan_id.clone()));
            }
        }

        // 5. Resolve safe-zone entries
        let zone = self.config.safe_zone;
        let zone_center = Vec2::new(zone.x, zone.y);
        let entering: Vec<PlayerId> = self
            .participants
            .values()
            .filter(|p| p.is_exposed_boat() && p.position.distance(&zone_center) <= zone.radius)
            .map(|p| p.player_id.clone())
            .collect();
        for boat_id in entering {
            self.safe_counter += 1;
            let boat = self.participants.get_mut(&boat_id).expect("boat exists");
            boat.status = ParticipantStatus::Safe;
            boat.velocity = Vec2::default();
            boat.safe_order = Some(self.safe_counter);
            effects.safe.push(boat_id);
        }

        // 6. Advance the clock and check for the end
        self.elapsed_ms += dt_ms;
        let boats: Vec<&Participant> = self
            .participants
            .values()
            .filter(|p| p.is_boat())
            .collect();
        let all_resolved = !boats.is_empty() && boats.iter().all(|b| !b.is_movable());
        if all_resolved || self.elapsed_ms >= self.config.duration_ms {
            self.finished = true;
            effects.ended = Some(self.results());
        }
        effects
    }

    /// Final scoring: safe boats +2, swans +1 per tag. Ties break by
    /// safe-arrival order, then player id.
    fn results(&self) -> SwanChaseResults {
        let mut entries: Vec<SwanChaseResultEntry> = self
            .participants
            .values()
            .map(|p| {
                let points = match p.team {
                    Team::Blue if p.status == ParticipantStatus::Safe => 2,
                    Team::Blue => 0,
                    Team::White => p.tags_count as i64,
                };
                SwanChaseResultEntry {
                    player_id: p.player_id.clone(),
                    team: p.team,
                    points,
                    tags_count: p.tags_count,
                    safe_order: p.safe_order,
                }
            })
            .collect();
        entries.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then_with(|| {
                    a.safe_order
                        .unwrap_or(u32::MAX)
                        .cmp(&b.safe_order.unwrap_or(u32::MAX))
                })
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        SwanChaseResults {
            entries,
            elapsed_ms: self.elapsed_ms,
        }
    }
}

fn spawn_y(config: &SwanChaseConfig, slot: usize) -> f64 {
    let lanes = 12.0;
    let lane = (slot as f64 - 1.0) % lanes;
    config.height * (0.1 + 0.8 * lane / lanes)
}

impl SessionState {
    /// START_SWAN_CHASE: the current item must be an active MINIGAME item.
    pub fn start_swan_chase(
        &mut self,
        config: Option<SwanChaseConfig>,
        now_ms: i64,
    ) -> Result<Vec<Outgoing>, EngineError> {
        if self.quarantined {
            return Err(EngineError::Quarantined);
        }
        if self.status != SessionStatus::Active {
            return Err(EngineError::WrongStatus(self.status));
        }
        if self.minigame.is_some() {
            return Err(EngineError::MinigameAlreadyRunning);
        }
        let is_minigame_item = self
            .current_item()
            .map(|i| i.kind == ItemKind::Minigame)
            .unwrap_or(false);
        if !is_minigame_item || self.item_phase != ItemPhase::Active {
            return Err(EngineError::InvalidTransition(
                "current item is not an active minigame".to_string(),
            ));
        }
        let roster: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| p.online)
            .map(|p| p.id.clone())
            .collect();
        if roster.len() < 2 {
            return Err(EngineError::MalformedPayload(
                "swan chase needs at least two online players".to_string(),
            ));
        }

        let game = SwanChase::new(config.unwrap_or_default(), roster, now_ms);
        let snapshot = game.snapshot();
        self.minigame = Some(game);

        tracing::info!(session = %self.code, "swan chase started");

        Ok(vec![Outgoing::Session(ServerEvent::SwanChaseState {
            state: snapshot,
        })])
    }

    /// SWAN_CHASE_INPUT: applied at the next tick. Rate limiting happens
    /// upstream in the supervisor.
    pub fn swan_chase_input(
        &mut self,
        player_id: &PlayerId,
        x: f64,
        y: f64,
        sprint: bool,
        dash: bool,
    ) -> Result<(), EngineError> {
        let game = self
            .minigame
            .as_mut()
            .ok_or(EngineError::MinigameNotRunning)?;
        if !game.participants.contains_key(player_id) {
            return Err(EngineError::PlayerNotFound(player_id.clone()));
        }
        game.queue_input(player_id, x, y, sprint, dash);
        Ok(())
    }

    /// One 50 ms step: emit tag/safe events and the state snapshot; on the
    /// final tick, commit minigame points as the item's answers and close
    /// out the item.
    pub fn tick_swan_chase(&mut self, dt_ms: u64) -> Vec<Outgoing> {
        let Some(game) = self.minigame.as_mut() else {
            return Vec::new();
        };
        let effects = game.tick(dt_ms);
        let snapshot = game.snapshot();
        let started_at = game.started_at;

        let mut events = Vec::new();
        for (boat, swan) in effects.tagged {
            events.push(Outgoing::Session(ServerEvent::BoatTagged {
                boat_player_id: boat,
                swan_player_id: swan,
            }));
        }
        for boat in effects.safe {
            events.push(Outgoing::Session(ServerEvent::BoatSafe {
                boat_player_id: boat,
            }));
        }
        events.push(Outgoing::Session(ServerEvent::SwanChaseState {
            state: snapshot,
        }));

        if let Some(results) = effects.ended {
            self.minigame = None;
            self.commit_minigame_results(&results, started_at);
            // Results are out; the item behaves like a revealed one so the
            // host can move on.
            self.item_phase = ItemPhase::Revealed;
            events.push(Outgoing::Session(ServerEvent::SwanChaseEnded {
                results: results.clone(),
            }));
            events.push(Outgoing::Session(ServerEvent::LeaderboardUpdate {
                entries: leaderboard_entries(&self.players),
            }));
            tracing::info!(session = %self.code, "swan chase ended");
        }
        events
    }

    /// Minigame awards are committed as answers on the minigame item, so
    /// the score-sum invariant holds across item kinds and results persist
    /// through the normal checkpoint path.
    fn commit_minigame_results(&mut self, results: &SwanChaseResults, started_at: i64) {
        let Some(item_id) = self.current_item().map(|i| i.id.clone()) else {
            return;
        };
        let mut committed = HashMap::new();
        for entry in &results.entries {
            if !self.players.contains_key(&entry.player_id) {
                continue;
            }
            committed.insert(
                entry.player_id.clone(),
                Answer {
                    item_id: item_id.clone(),
                    player_id: entry.player_id.clone(),
                    raw: serde_json::Value::Null,
                    normalized: String::new(),
                    is_correct: None,
                    score_percentage: 100,
                    score: entry.points,
                    time_spent_ms: (chrono::Utc::now().timestamp_millis() - started_at).max(0)
                        as u64,
                    is_manually_adjusted: false,
                    created_at: chrono::Utc::now().to_rfc3339(),
                },
            );
        }
        if let Some(previous) = self.committed_answers.insert(item_id, committed.clone()) {
            for (player_id, old) in previous {
                if let Some(player) = self.players.get_mut(&player_id) {
                    player.score -= old.score;
                }
            }
        }
        for (player_id, answer) in &committed {
            if let Some(player) = self.players.get_mut(player_id) {
                player.score += answer.score;
            }
        }
    }
}
