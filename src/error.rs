use crate::types::{PlayerId, SessionCode, SessionStatus};
use thiserror::Error;

/// Engine-level error taxonomy. Every variant maps to a short machine code
/// carried by the protocol `ERROR` event; the display string is the human
/// half of the payload.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    #[error("session {0} not found")]
    SessionNotFound(SessionCode),

    #[error("player {0} not found in this session")]
    PlayerNotFound(PlayerId),

    #[error("that name is already taken")]
    NameTaken,

    #[error("display name must be 1-50 characters")]
    InvalidName,

    #[error("answers are locked for this item")]
    AnswerAfterLock,

    #[error("no item is currently accepting answers")]
    ItemNotActive,

    #[error("item index {0} is out of range")]
    ItemOutOfRange(usize),

    #[error("invalid item transition: {0}")]
    InvalidTransition(String),

    #[error("command not allowed while session is {0:?}")]
    WrongStatus(SessionStatus),

    #[error("session is archived and read-only")]
    SessionArchived,

    #[error("only the host can {0}")]
    Unauthorized(&'static str),

    #[error("rejoin token expired or already used")]
    RejoinTokenExpired,

    #[error("player {0} is still connected")]
    PlayerNotOffline(PlayerId),

    #[error("connection is not bound to a player in this session")]
    NotAPlayer,

    #[error("item is not a question")]
    NotAQuestion,

    #[error("no minigame is running")]
    MinigameNotRunning,

    #[error("a minigame is already running")]
    MinigameAlreadyRunning,

    #[error("scores can only be adjusted on fuzzy-text questions")]
    ScoreNotAdjustable,

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("session quarantined after an internal error")]
    Quarantined,
}

impl EngineError {
    /// Short machine code exposed on the wire. Clients switch on this;
    /// the display string is presentation-only.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            EngineError::PlayerNotFound(_) => "PLAYER_NOT_FOUND",
            EngineError::NameTaken => "NAME_TAKEN",
            EngineError::InvalidName => "INVALID_NAME",
            EngineError::AnswerAfterLock => "ANSWER_AFTER_LOCK",
            EngineError::ItemNotActive => "ITEM_NOT_ACTIVE",
            EngineError::ItemOutOfRange(_) => "ITEM_OUT_OF_RANGE",
            EngineError::InvalidTransition(_) => "INVALID_TRANSITION",
            EngineError::WrongStatus(_) => "WRONG_SESSION_STATUS",
            EngineError::SessionArchived => "SESSION_ARCHIVED",
            EngineError::Unauthorized(_) => "UNAUTHORIZED",
            EngineError::RejoinTokenExpired => "REJOIN_TOKEN_EXPIRED",
            EngineError::PlayerNotOffline(_) => "PLAYER_NOT_OFFLINE",
            EngineError::NotAPlayer => "NOT_A_PLAYER",
            EngineError::NotAQuestion => "NOT_A_QUESTION",
            EngineError::MinigameNotRunning => "MINIGAME_NOT_RUNNING",
            EngineError::MinigameAlreadyRunning => "MINIGAME_ALREADY_RUNNING",
            EngineError::ScoreNotAdjustable => "SCORE_NOT_ADJUSTABLE",
            EngineError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            EngineError::Quarantined => "SESSION_QUARANTINED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(
            EngineError::SessionNotFound("ABC123".into()).code(),
            "SESSION_NOT_FOUND"
        );
        assert_eq!(EngineError::AnswerAfterLock.code(), "ANSWER_AFTER_LOCK");
        assert_eq!(EngineError::NameTaken.code(), "NAME_TAKEN");
        assert_eq!(
            EngineError::RejoinTokenExpired.code(),
            "REJOIN_TOKEN_EXPIRED"
        );
        assert_eq!(
            EngineError::PlayerNotOffline("p1".into()).code(),
            "PLAYER_NOT_OFFLINE"
        );
    }

    #[test]
    fn test_display_is_human_readable() {
        let err = EngineError::WrongStatus(SessionStatus::Ended);
        assert!(err.to_string().contains("Ended"));
    }
}
