//! Wire protocol: client command and server event frames.
//!
//! Every frame is a JSON object `{type, payload, timestamp, stateVersion?}`.
//! Command and event codes are distinct sets; both use SCREAMING_SNAKE_CASE
//! type codes. Raw answer payloads stay `serde_json::Value` until the
//! validator coerces them.

use crate::session::minigame::{SwanChaseResults, SwanChaseSnapshot};
use crate::types::*;
use serde::{Deserialize, Serialize};

/// Client → server commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientCommand {
    JoinSession {
        code: SessionCode,
        name: String,
        #[serde(default)]
        avatar: Option<String>,
        #[serde(default)]
        device_fingerprint: Option<String>,
    },
    /// Redeem a host-issued rejoin token
    PlayerRejoin {
        code: SessionCode,
        token: String,
    },
    /// Claim the player a DEVICE_RECOGNIZED response offered
    RejoinAsExisting {
        code: SessionCode,
        player_id: PlayerId,
        device_fingerprint: String,
    },
    /// Decline device recognition and join as a fresh player
    JoinAsNew {
        code: SessionCode,
        name: String,
        #[serde(default)]
        avatar: Option<String>,
        #[serde(default)]
        device_fingerprint: Option<String>,
    },
    SubmitAnswer {
        answer: serde_json::Value,
    },
    HostJoinSession {
        code: SessionCode,
    },
    StartItem {
        item_index: usize,
    },
    LockItem,
    CancelItem,
    RevealAnswers,
    EndSession,
    ResetSession,
    PauseSession,
    ResumeSession,
    KickPlayer {
        player_id: PlayerId,
    },
    GenerateRejoinToken {
        player_id: PlayerId,
    },
    /// Host override of a fuzzy-text answer's percentage
    AdjustScore {
        player_id: PlayerId,
        item_id: ItemId,
        score_percentage: u8,
    },
    StartSwanChase,
    SwanChaseInput {
        x: f64,
        y: f64,
        #[serde(default)]
        sprint: bool,
        #[serde(default)]
        dash: bool,
    },
    Heartbeat,
}

/// Full inbound frame. The flatten lets the envelope's `timestamp` coexist
/// with the adjacently tagged command.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientFrame {
    #[serde(flatten)]
    pub command: ClientCommand,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Server → client events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerEvent {
    /// Bootstrap snapshot; also the rejoin reconciliation point
    SessionState {
        snapshot: SessionSnapshot,
        /// The receiving client's own player id, when bound
        #[serde(default, skip_serializing_if = "Option::is_none")]
        player_id: Option<PlayerId>,
    },
    PlayerJoined {
        player: PlayerInfo,
    },
    PlayerLeft {
        player_id: PlayerId,
    },
    PlayerKicked {
        player_id: PlayerId,
    },
    ConnectionStatusUpdate {
        player_id: PlayerId,
        quality: ConnectionQuality,
    },
    ItemStarted {
        item_index: usize,
        item: ItemPublic,
        started_at: i64,
    },
    ItemLocked {
        item_index: usize,
        item_id: ItemId,
    },
    ItemCancelled {
        item_index: usize,
        item_id: ItemId,
    },
    RevealAnswers {
        item_id: ItemId,
        correct: CorrectAnswers,
        answers: Vec<RevealedAnswer>,
    },
    /// Ack to the submitting player
    AnswerReceived {
        item_id: ItemId,
    },
    AnswerCountUpdated {
        item_id: ItemId,
        count: usize,
        total: usize,
    },
    /// Host-only: who answered, with the latest submission
    PlayerAnswered {
        item_id: ItemId,
        player_id: PlayerId,
        player_name: String,
    },
    LeaderboardUpdate {
        entries: Vec<LeaderboardEntry>,
    },
    SpeedPodiumResults {
        item_id: ItemId,
        podium: Vec<PodiumEntry>,
    },
    ScoreAdjusted {
        player_id: PlayerId,
        item_id: ItemId,
        score_percentage: u8,
        score: i64,
    },
    SessionPaused {
        /// Remaining answer window of the active item, if one was frozen
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remaining_ms: Option<u64>,
    },
    SessionResumed,
    SessionEnded {
        leaderboard: Vec<LeaderboardEntry>,
    },
    SessionReset,
    SwanChaseState {
        state: SwanChaseSnapshot,
    },
    BoatTagged {
        boat_player_id: PlayerId,
        swan_player_id: PlayerId,
    },
    BoatSafe {
        boat_player_id: PlayerId,
    },
    SwanChaseEnded {
        results: SwanChaseResults,
    },
    /// Sent to a joining socket whose fingerprint matches an existing player
    DeviceRecognized {
        player: PlayerInfo,
    },
    /// Returned once to the requesting host
    RejoinTokenGenerated {
        player_id: PlayerId,
        token: String,
        expires_at: String,
    },
    Error {
        code: String,
        msg: String,
    },
}

/// Outbound frame: event plus envelope metadata. `stateVersion` is the
/// session's version at emission time; absent for events outside any
/// session (protocol errors before identification).
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(flatten)]
    pub event: ServerEvent,
    pub timestamp: i64,
    #[serde(rename = "stateVersion", skip_serializing_if = "Option::is_none")]
    pub state_version: Option<u64>,
}

impl Envelope {
    pub fn new(event: ServerEvent, state_version: Option<u64>) -> Self {
        Self {
            event,
            timestamp: chrono::Utc::now().timestamp_millis(),
            state_version,
        }
    }
}

/// Public player view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub score: i64,
    pub streak: u32,
    pub online: bool,
}

impl From<&Player> for PlayerInfo {
    fn from(p: &Player) -> Self {
        Self {
            id: p.id.clone(),
            name: p.name.clone(),
            avatar: p.avatar.clone(),
            score: p.score,
            streak: p.streak,
            online: p.online,
        }
    }
}

/// Option as shown to clients while answering: no `is_correct`, no `order`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionPublic {
    pub id: OptionId,
    pub text: String,
}

impl From<&QuestionOption> for OptionPublic {
    fn from(o: &QuestionOption) -> Self {
        Self {
            id: o.id.clone(),
            text: o.text.clone(),
        }
    }
}

/// Item as broadcast on ITEM_STARTED. Correctness data is stripped; the
/// reveal payload carries it later.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemPublic {
    pub id: ItemId,
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    pub prompt: String,
    pub options: Vec<OptionPublic>,
    pub media: Vec<MediaRef>,
    pub timer_seconds: u32,
}

impl From<&Item> for ItemPublic {
    fn from(item: &Item) -> Self {
        Self {
            id: item.id.clone(),
            kind: item.kind,
            question_type: item.question_type,
            prompt: item.prompt.clone(),
            options: item.options.iter().map(OptionPublic::from).collect(),
            media: item.media.clone(),
            timer_seconds: item.timer_seconds,
        }
    }
}

/// The canonical correct answer(s) in the reveal payload. Only the fields
/// relevant to the question type are populated.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CorrectAnswers {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub option_ids: Vec<OptionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f64>,
    /// Option ids in the correct order, for ORDER questions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ordering: Vec<OptionId>,
}

/// Per-player entry in the reveal payload. Players who did not answer
/// appear with `answered: false`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevealedAnswer {
    pub player_id: PlayerId,
    pub player_name: String,
    pub answered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    pub score_percentage: u8,
    pub score: i64,
    pub time_spent_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub player_id: PlayerId,
    pub name: String,
    pub score: i64,
    /// Dense rank: tied scores share a rank
    pub rank: usize,
    pub online: bool,
    pub streak: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PodiumEntry {
    pub player_id: PlayerId,
    pub player_name: String,
    /// 1-based podium position
    pub position: usize,
    pub bonus_percentage: u32,
    pub bonus_points: i64,
}

/// Deep-copied session view for bootstrap, rejoin reconciliation, and the
/// HTTP side-channel. `answer_history` is populated for hosts only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub code: SessionCode,
    pub status: SessionStatus,
    pub quiz_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    pub item_count: usize,
    pub current_item_index: Option<usize>,
    pub item_phase: ItemPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item: Option<ItemPublic>,
    pub players: Vec<PlayerInfo>,
    pub answered_player_ids: Vec<PlayerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_history: Option<Vec<Answer>>,
    pub state_version: u64,
    pub persistence_degraded: bool,
}
