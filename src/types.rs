use rand::Rng;
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type SessionId = String;
pub type SessionCode = String;
pub type PlayerId = String;
pub type ItemId = String;
pub type OptionId = String;
pub type SocketId = String;
pub type QuizId = String;

/// Character set for session codes
const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 6;

/// Generate a random 6-character session code. Uniqueness among live
/// sessions is enforced by the caller.
pub fn generate_session_code() -> SessionCode {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Lobby,
    Active,
    Paused,
    Ended,
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    Question,
    Minigame,
    Scoreboard,
    Break,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    McSingle,
    McMultiple,
    TrueFalse,
    OpenText,
    Estimation,
    Order,
    Poll,
    PhotoQuestion,
    AudioQuestion,
    VideoQuestion,
    PhotoOpen,
    AudioOpen,
    VideoOpen,
    MusicGuessTitle,
    MusicGuessArtist,
    MusicGuessYear,
    YoutubeSceneQuestion,
    YoutubeNextLine,
    YoutubeWhoSaidIt,
}

/// The shape a coerced player submission takes. Each question type maps to
/// exactly one format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerFormat {
    OptionId,
    OptionIds,
    Boolean,
    Text,
    Number,
    OrderArray,
    NoAnswer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMode {
    ExactMatch,
    PartialMulti,
    PartialOrder,
    FuzzyText,
    NumericDistance,
    YearDistance,
    NoScore,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionOption {
    pub id: OptionId,
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
    /// Position in the correct ordering, for ORDER questions. Stable and
    /// unique within one item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

/// Media is handed to clients by URL; the engine never streams it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}

/// Per-item settings blob. Fields are meaningful only for the question
/// types that read them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemSettings {
    /// Full-score margin for ESTIMATION, in percent of the correct value
    #[serde(default = "default_margin_percent")]
    pub margin_percent: f64,
    /// Additional accepted spellings for fuzzy-text types
    #[serde(default)]
    pub acceptable_answers: Vec<String>,
    /// Correct answer literal for numeric and text types
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<serde_json::Value>,
    #[serde(default = "default_base_points")]
    pub base_points: u32,
    #[serde(default)]
    pub streak_bonus: bool,
    /// Points added per consecutive 100% answer when streak_bonus is on
    #[serde(default = "default_streak_points")]
    pub streak_points: u32,
}

fn default_margin_percent() -> f64 {
    2.0
}

fn default_base_points() -> u32 {
    10
}

fn default_streak_points() -> u32 {
    2
}

impl Default for ItemSettings {
    fn default() -> Self {
        Self {
            margin_percent: default_margin_percent(),
            acceptable_answers: Vec::new(),
            correct_answer: None,
            base_points: default_base_points(),
            streak_bonus: false,
            streak_points: default_streak_points(),
        }
    }
}

/// One unit in the quiz ordering: a question, a minigame, a scoreboard
/// display, or a break.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    /// Answer window in seconds; 0 disables the auto-lock timer
    #[serde(default)]
    pub timer_seconds: u32,
    #[serde(default)]
    pub settings: ItemSettings,
}

/// Speed-podium configuration, session-wide. Percentages are applied to
/// the item's base points.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PodiumConfig {
    pub enabled: bool,
    pub pct1: u32,
    pub pct2: u32,
    pub pct3: u32,
}

impl Default for PodiumConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pct1: 30,
            pct2: 20,
            pct3: 10,
        }
    }
}

/// The quiz snapshot a session is bound to. Produced by the (out of scope)
/// editor; the engine treats it as immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizSnapshot {
    pub id: QuizId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub items: Vec<Item>,
    #[serde(default)]
    pub podium: PodiumConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    /// Opaque client-supplied string used for device recognition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
    pub score: i64,
    /// Consecutive 100% answers; resets on any score below 100%
    pub streak: u32,
    pub online: bool,
    pub joined_at: String,
    /// Set while the player is disconnected but retained for rejoin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at: Option<String>,
}

/// A committed or pending answer. (item, player) is unique within a
/// session; immutable once the item is revealed, except for host score
/// overrides on fuzzy-text types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub item_id: ItemId,
    pub player_id: PlayerId,
    pub raw: serde_json::Value,
    pub normalized: String,
    /// None for POLL (no notion of correctness)
    pub is_correct: Option<bool>,
    pub score_percentage: u8,
    pub score: i64,
    pub time_spent_ms: u64,
    pub is_manually_adjusted: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemPhase {
    Idle,
    Active,
    Locked,
    Revealed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Host,
    Player,
    Display,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Good,
    Poor,
    Offline,
}
