//! Durable checkpoints: serializable session snapshots, the repository
//! seam, and the background writer that drains the checkpoint channel.
//!
//! Checkpoints are fire-and-forget from the session worker's point of
//! view; the in-memory state stays authoritative. One writer task drains
//! the channel in order, so per-session causal order is preserved.

use crate::session::SessionState;
use crate::types::*;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};

/// Bump when the snapshot layout changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Durable-store write retries before a session is flagged degraded.
const SAVE_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub code: SessionCode,
    pub status: SessionStatus,
    pub quiz_snapshot_id: QuizId,
    pub current_item_index: Option<usize>,
    pub item_phase: ItemPhase,
    pub state_version: u64,
    pub saved_at: String,
}

/// Everything needed to rehydrate a session after a cold start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSession {
    pub schema_version: u32,
    pub session: SessionRecord,
    pub quiz: QuizSnapshot,
    pub players: Vec<Player>,
    pub answers: Vec<Answer>,
}

impl PersistedSession {
    pub fn from_state(state: &SessionState) -> Self {
        let mut players: Vec<Player> = state.players.values().cloned().collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));

        let mut answers: Vec<Answer> = state
            .committed_answers
            .values()
            .flat_map(|per_item| per_item.values().cloned())
            .collect();
        answers.sort_by(|a, b| {
            a.item_id
                .cmp(&b.item_id)
                .then_with(|| a.player_id.cmp(&b.player_id))
        });

        Self {
            schema_version: SCHEMA_VERSION,
            session: SessionRecord {
                id: state.id.clone(),
                code: state.code.clone(),
                status: state.status,
                quiz_snapshot_id: state.quiz.id.clone(),
                current_item_index: state.current_item_index,
                item_phase: state.item_phase,
                state_version: state.state_version,
                saved_at: chrono::Utc::now().to_rfc3339(),
            },
            quiz: state.quiz.clone(),
            players,
            answers,
        }
    }

    /// Rebuild in-memory state. An item that was mid-answer-window comes
    /// back IDLE (its timer and uncommitted answers did not survive);
    /// committed answers restore the host's answer history. The
    /// (item, player) key dedupes answers, so a reordered or replayed
    /// checkpoint can never double-commit.
    pub fn into_state(self) -> Result<SessionState, String> {
        self.validate()?;
        let mut state = SessionState::new(self.session.code, self.quiz);
        state.id = self.session.id;
        state.status = self.session.status;
        state.current_item_index = self.session.current_item_index;
        state.item_phase = match self.session.item_phase {
            ItemPhase::Active => ItemPhase::Idle,
            other => other,
        };
        state.state_version = self.session.state_version;
        state.players = self
            .players
            .into_iter()
            .map(|mut p| {
                // Nobody is connected right after a cold start
                p.online = false;
                (p.id.clone(), p)
            })
            .collect();
        for answer in self.answers {
            state
                .committed_answers
                .entry(answer.item_id.clone())
                .or_default()
                .insert(answer.player_id.clone(), answer);
        }
        Ok(state)
    }

    fn validate(&self) -> Result<(), String> {
        if self.schema_version > SCHEMA_VERSION {
            return Err(format!(
                "snapshot schema {} is newer than supported {}",
                self.schema_version, SCHEMA_VERSION
            ));
        }
        let player_ids: HashSet<&PlayerId> = self.players.iter().map(|p| &p.id).collect();
        for answer in &self.answers {
            if !player_ids.contains(&answer.player_id) {
                return Err(format!(
                    "answer references unknown player {}",
                    answer.player_id
                ));
            }
        }
        if let Some(idx) = self.session.current_item_index {
            if idx >= self.quiz.items.len() {
                return Err(format!("current_item_index {} out of range", idx));
            }
        }
        Ok(())
    }
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn save(&self, snapshot: &PersistedSession) -> Result<(), String>;
    async fn load(&self, code: &SessionCode) -> Result<Option<PersistedSession>, String>;
}

/// In-memory repository for tests and checkpoint-less deployments.
#[derive(Default)]
pub struct MemoryRepository {
    sessions: RwLock<HashMap<SessionCode, PersistedSession>>,
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: make every save fail to exercise the degraded path.
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes
            .store(failing, std::sync::atomic::Ordering::Release);
    }
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn save(&self, snapshot: &PersistedSession) -> Result<(), String> {
        if self.fail_writes.load(std::sync::atomic::Ordering::Acquire) {
            return Err("simulated write failure".to_string());
        }
        self.sessions
            .write()
            .await
            .insert(snapshot.session.code.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, code: &SessionCode) -> Result<Option<PersistedSession>, String> {
        Ok(self.sessions.read().await.get(code).cloned())
    }
}

/// JSON file per session under a checkpoint directory.
pub struct FileRepository {
    dir: PathBuf,
}

impl FileRepository {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn path_for(&self, code: &SessionCode) -> PathBuf {
        self.dir.join(format!("{}.json", code))
    }
}

#[async_trait]
impl SessionRepository for FileRepository {
    async fn save(&self, snapshot: &PersistedSession) -> Result<(), String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| format!("failed to create checkpoint dir: {}", e))?;
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| format!("failed to serialize: {}", e))?;
        tokio::fs::write(self.path_for(&snapshot.session.code), json)
            .await
            .map_err(|e| format!("failed to write: {}", e))
    }

    async fn load(&self, code: &SessionCode) -> Result<Option<PersistedSession>, String> {
        let path = self.path_for(code);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read: {}", e)),
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| format!("failed to parse: {}", e))
    }
}

#[derive(Debug)]
pub struct Checkpoint {
    pub snapshot: PersistedSession,
    /// Why the checkpoint was taken, for logging
    pub reason: &'static str,
}

/// Fire-and-forget producer half of the checkpoint channel. Sessions the
/// writer has given up on are visible through `is_degraded`.
#[derive(Clone)]
pub struct CheckpointSink {
    tx: mpsc::Sender<Checkpoint>,
    degraded: Arc<RwLock<HashSet<SessionCode>>>,
}

impl CheckpointSink {
    /// Discards (with a warning) when the buffer is full: memory stays
    /// authoritative, a lost checkpoint only widens the recovery window.
    pub fn send(&self, checkpoint: Checkpoint) {
        let code = checkpoint.snapshot.session.code.clone();
        if let Err(e) = self.tx.try_send(checkpoint) {
            tracing::warn!(session = %code, "checkpoint dropped: {}", e);
        }
    }

    pub async fn is_degraded(&self, code: &SessionCode) -> bool {
        self.degraded.read().await.contains(code)
    }
}

/// Spawn the single writer draining the checkpoint channel. Saves retry
/// with exponential backoff; a session whose save keeps failing is marked
/// persistence-degraded and keeps serving from memory.
pub fn spawn_checkpoint_writer(
    repo: Arc<dyn SessionRepository>,
    buffer: usize,
) -> CheckpointSink {
    let (tx, mut rx) = mpsc::channel::<Checkpoint>(buffer);
    let degraded: Arc<RwLock<HashSet<SessionCode>>> = Arc::new(RwLock::new(HashSet::new()));
    let degraded_writer = degraded.clone();

    tokio::spawn(async move {
        while let Some(checkpoint) = rx.recv().await {
            let code = checkpoint.snapshot.session.code.clone();
            let mut saved = false;
            for attempt in 0..SAVE_ATTEMPTS {
                match repo.save(&checkpoint.snapshot).await {
                    Ok(()) => {
                        saved = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            session = %code,
                            "checkpoint save failed (attempt {}/{}): {}",
                            attempt + 1,
                            SAVE_ATTEMPTS,
                            e
                        );
                        if attempt + 1 < SAVE_ATTEMPTS {
                            tokio::time::sleep(RETRY_BASE * 4u32.pow(attempt)).await;
                        }
                    }
                }
            }
            let mut degraded = degraded_writer.write().await;
            if saved {
                if degraded.remove(&code) {
                    tracing::info!(session = %code, "persistence recovered");
                }
                tracing::debug!(session = %code, "checkpoint saved ({})", checkpoint.reason);
            } else if degraded.insert(code.clone()) {
                tracing::error!(
                    session = %code,
                    "persistence degraded; serving from memory only"
                );
            }
        }
    });

    CheckpointSink { tx, degraded }
}
