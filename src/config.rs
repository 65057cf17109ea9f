//! Engine configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TCP port the server binds to
    pub port: u16,
    /// Expected client heartbeat interval
    pub heartbeat_interval: Duration,
    /// Grace window after a disconnect before PLAYER_LEFT is emitted
    pub disconnect_grace: Duration,
    /// Rejoin token time-to-live
    pub rejoin_token_ttl: Duration,
    /// Per-socket outbound queue capacity
    pub outbound_queue_capacity: usize,
    /// Directory for checkpoint files (None disables durable checkpoints)
    pub checkpoint_dir: Option<PathBuf>,
    /// Maximum players per session
    pub max_players: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 4600,
            heartbeat_interval: Duration::from_secs(15),
            disconnect_grace: Duration::from_secs(30),
            rejoin_token_ttl: Duration::from_secs(600),
            outbound_queue_capacity: 256,
            checkpoint_dir: Some(PathBuf::from("./sessions")),
            max_players: 500,
        }
    }
}

impl EngineConfig {
    /// Load config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let port = env_parse("QUIZDECK_PORT", defaults.port);
        let heartbeat_interval = Duration::from_secs(env_parse(
            "QUIZDECK_HEARTBEAT_SECS",
            defaults.heartbeat_interval.as_secs(),
        ));
        let disconnect_grace = Duration::from_secs(env_parse(
            "QUIZDECK_DISCONNECT_GRACE_SECS",
            defaults.disconnect_grace.as_secs(),
        ));
        let rejoin_token_ttl = Duration::from_secs(env_parse(
            "QUIZDECK_REJOIN_TOKEN_TTL_SECS",
            defaults.rejoin_token_ttl.as_secs(),
        ));
        let outbound_queue_capacity = env_parse(
            "QUIZDECK_OUTBOUND_QUEUE",
            defaults.outbound_queue_capacity,
        );
        let max_players = env_parse("QUIZDECK_MAX_PLAYERS", defaults.max_players);

        let checkpoint_dir = match std::env::var("QUIZDECK_CHECKPOINT_DIR") {
            Ok(v) if v.is_empty() || v == "off" => {
                tracing::warn!("Durable checkpoints DISABLED via QUIZDECK_CHECKPOINT_DIR");
                None
            }
            Ok(v) => Some(PathBuf::from(v)),
            Err(_) => defaults.checkpoint_dir,
        };

        Self {
            port,
            heartbeat_interval,
            disconnect_grace,
            rejoin_token_ttl,
            outbound_queue_capacity,
            checkpoint_dir,
            max_players,
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value for {}: {:?}, using default", key, v);
            default
        }),
        Err(_) => default,
    }
}
