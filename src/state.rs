//! Shared application state: the session map plus the handles every layer
//! needs (registry, broadcaster, repository, checkpoint sink).
//!
//! Session state itself lives inside the per-session workers; this map
//! only stores their handles. Reads are shared, the occasional
//! insert/rehydrate takes the write lock.

use crate::broadcast::Broadcaster;
use crate::config::EngineConfig;
use crate::persist::{
    spawn_checkpoint_writer, CheckpointSink, FileRepository, MemoryRepository, SessionRepository,
};
use crate::registry::ConnectionRegistry;
use crate::session::SessionState;
use crate::supervisor::{spawn_session_worker, Command, SessionHandle};
use crate::types::*;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct AppState {
    sessions: RwLock<HashMap<SessionCode, SessionHandle>>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub repository: Arc<dyn SessionRepository>,
    pub checkpoints: CheckpointSink,
    pub config: EngineConfig,
}

impl AppState {
    /// Build from config: file-backed checkpoints when a directory is
    /// configured, memory-only otherwise.
    pub fn new(config: EngineConfig) -> Self {
        let repository: Arc<dyn SessionRepository> = match &config.checkpoint_dir {
            Some(dir) => Arc::new(FileRepository::new(dir.clone())),
            None => Arc::new(MemoryRepository::new()),
        };
        Self::with_repository(config, repository)
    }

    pub fn with_repository(config: EngineConfig, repository: Arc<dyn SessionRepository>) -> Self {
        let checkpoints = spawn_checkpoint_writer(repository.clone(), 512);
        Self {
            sessions: RwLock::new(HashMap::new()),
            registry: Arc::new(ConnectionRegistry::new(
                config.heartbeat_interval,
                config.rejoin_token_ttl,
            )),
            broadcaster: Arc::new(Broadcaster::new(config.outbound_queue_capacity)),
            repository,
            checkpoints,
            config,
        }
    }

    /// Create a session bound to a quiz snapshot and start its worker.
    /// This is the seam the (out of scope) management API calls.
    pub async fn create_session(&self, quiz: QuizSnapshot) -> SessionHandle {
        let mut sessions = self.sessions.write().await;
        let code = loop {
            let candidate = generate_session_code();
            if !sessions.contains_key(&candidate) {
                break candidate;
            }
            // Collision: try again (36^6 combinations)
        };
        let state = SessionState::new(code.clone(), quiz);
        let handle = spawn_session_worker(
            state,
            self.broadcaster.clone(),
            self.registry.clone(),
            self.checkpoints.clone(),
            self.config.clone(),
        );
        sessions.insert(code.clone(), handle.clone());
        tracing::info!(session = %code, "session created");
        handle
    }

    /// Handle lookup with cold-start rehydration: a session missing from
    /// the map but present in the durable store is loaded and its worker
    /// respawned, committed answers included.
    pub async fn session(&self, code: &SessionCode) -> Option<SessionHandle> {
        if let Some(handle) = self.sessions.read().await.get(code) {
            return Some(handle.clone());
        }

        let persisted = match self.repository.load(code).await {
            Ok(Some(persisted)) => persisted,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(session = %code, "failed to load session: {}", e);
                return None;
            }
        };
        let state = match persisted.into_state() {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(session = %code, "invalid persisted session: {}", e);
                return None;
            }
        };

        let mut sessions = self.sessions.write().await;
        // Another task may have rehydrated while we were loading
        if let Some(handle) = sessions.get(code) {
            return Some(handle.clone());
        }
        tracing::info!(session = %code, "session rehydrated from durable store");
        let handle = spawn_session_worker(
            state,
            self.broadcaster.clone(),
            self.registry.clone(),
            self.checkpoints.clone(),
            self.config.clone(),
        );
        sessions.insert(code.clone(), handle.clone());
        Some(handle)
    }

    /// Background task: heartbeat sweeping, connection-quality routing,
    /// and rejoin-token expiry.
    pub fn spawn_presence_sweeper(self: &Arc<Self>) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(state.config.heartbeat_interval);
            loop {
                interval.tick().await;
                for change in state.registry.sweep().await {
                    if let Some(handle) = state.session(&change.session_code).await {
                        handle
                            .send(Command::QualityChanged {
                                player_id: change.player_id,
                                quality: change.quality,
                            })
                            .await;
                    }
                }
                state.registry.cleanup_tokens().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_quiz() -> QuizSnapshot {
        QuizSnapshot {
            id: "quiz_1".into(),
            title: "Test".into(),
            theme: None,
            workspace: None,
            items: Vec::new(),
            podium: PodiumConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup_session() {
        let state = AppState::with_repository(
            EngineConfig::default(),
            Arc::new(MemoryRepository::new()),
        );
        let handle = state.create_session(empty_quiz()).await;
        assert_eq!(handle.code.len(), 6);

        let found = state.session(&handle.code).await.unwrap();
        assert_eq!(found.session_id, handle.session_id);
        assert!(state.session(&"NOPE00".to_string()).await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_query_roundtrip() {
        let state = AppState::with_repository(
            EngineConfig::default(),
            Arc::new(MemoryRepository::new()),
        );
        let handle = state.create_session(empty_quiz()).await;
        let snapshot = handle.snapshot(false).await.unwrap();
        assert_eq!(snapshot.code, handle.code);
        assert_eq!(snapshot.status, SessionStatus::Lobby);
        assert!(snapshot.answer_history.is_none());
    }

    #[tokio::test]
    async fn test_rehydration_from_repository() {
        let repo = Arc::new(MemoryRepository::new());

        // Persist a session via one AppState...
        let code = {
            let state =
                AppState::with_repository(EngineConfig::default(), repo.clone());
            let handle = state.create_session(empty_quiz()).await;
            handle
                .send(Command::Join {
                    socket: "s1".into(),
                    name: "Alice".into(),
                    avatar: None,
                    device_fingerprint: None,
                    recognize_device: true,
                })
                .await;
            // Wait for the join checkpoint to land
            for _ in 0..50 {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                if repo.load(&handle.code).await.unwrap().is_some() {
                    break;
                }
            }
            handle.code.clone()
        };

        // ...and rehydrate it through a fresh one (cold start)
        let state = AppState::with_repository(EngineConfig::default(), repo);
        let handle = state.session(&code).await.expect("rehydrated");
        let snapshot = handle.snapshot(true).await.unwrap();
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.players[0].name, "Alice");
        assert!(!snapshot.players[0].online);
    }
}
