//! Event fan-out: session rooms and per-socket bounded outbound queues.
//!
//! Each socket gets its own queue drained by its writer task, so a slow
//! client never blocks the session worker. On overflow the oldest
//! non-snapshot event is dropped; idempotent snapshot events
//! (LEADERBOARD_UPDATE, SWAN_CHASE_STATE, SESSION_STATE) replace their
//! previous undelivered instance instead of piling up, so the freshest
//! one always survives. A socket that keeps overflowing is cut loose and
//! treated as offline.

use crate::protocol::{Envelope, ServerEvent};
use crate::types::{Role, SessionCode, SocketId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, RwLock};

/// Consecutive forced drops before a socket is declared dead.
const OVERFLOW_STRIKE_LIMIT: u32 = 64;

fn is_snapshot(event: &ServerEvent) -> bool {
    matches!(
        event,
        ServerEvent::LeaderboardUpdate { .. }
            | ServerEvent::SwanChaseState { .. }
            | ServerEvent::SessionState { .. }
    )
}

fn same_snapshot_kind(a: &ServerEvent, b: &ServerEvent) -> bool {
    matches!(
        (a, b),
        (
            ServerEvent::LeaderboardUpdate { .. },
            ServerEvent::LeaderboardUpdate { .. }
        ) | (
            ServerEvent::SwanChaseState { .. },
            ServerEvent::SwanChaseState { .. }
        ) | (
            ServerEvent::SessionState { .. },
            ServerEvent::SessionState { .. }
        )
    )
}

struct QueueInner {
    queue: Mutex<VecDeque<Envelope>>,
    notify: Notify,
    overflow_strikes: AtomicU32,
    closed: AtomicBool,
}

impl QueueInner {
    fn push(&self, envelope: Envelope, capacity: usize) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut queue = self.queue.lock().expect("queue poisoned");

        // A newer snapshot subsumes the undelivered older one
        if is_snapshot(&envelope.event) {
            queue.retain(|e| !same_snapshot_kind(&e.event, &envelope.event));
        }

        if queue.len() >= capacity {
            // Drop the oldest non-snapshot; only if everything queued is a
            // snapshot does the oldest snapshot go
            let victim = queue
                .iter()
                .position(|e| !is_snapshot(&e.event))
                .unwrap_or(0);
            queue.remove(victim);

            let strikes = self.overflow_strikes.fetch_add(1, Ordering::AcqRel) + 1;
            if strikes >= OVERFLOW_STRIKE_LIMIT {
                drop(queue);
                self.closed.store(true, Ordering::Release);
                self.notify.notify_one();
                return;
            }
        } else {
            self.overflow_strikes.store(0, Ordering::Release);
        }

        queue.push_back(envelope);
        drop(queue);
        self.notify.notify_one();
    }
}

/// Consumer half handed to the socket's writer task.
pub struct SocketReceiver {
    inner: Arc<QueueInner>,
}

impl SocketReceiver {
    /// Next queued envelope, in FIFO order. Returns None once the socket
    /// has been detached (or cut for overflow) and the queue is drained.
    pub async fn recv(&self) -> Option<Envelope> {
        loop {
            {
                let mut queue = self.inner.queue.lock().expect("queue poisoned");
                if let Some(envelope) = queue.pop_front() {
                    return Some(envelope);
                }
                if self.inner.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }
}

#[derive(Default)]
struct Room {
    members: HashMap<SocketId, Role>,
}

pub struct Broadcaster {
    sockets: RwLock<HashMap<SocketId, Arc<QueueInner>>>,
    rooms: RwLock<HashMap<SessionCode, Room>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            sockets: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Create the outbound queue for a socket. The writer task owns the
    /// returned receiver.
    pub async fn attach(&self, socket_id: &SocketId) -> SocketReceiver {
        let inner = Arc::new(QueueInner {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            overflow_strikes: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        });
        self.sockets
            .write()
            .await
            .insert(socket_id.clone(), inner.clone());
        SocketReceiver { inner }
    }

    /// Remove a socket everywhere and wake its writer so it can finish.
    pub async fn detach(&self, socket_id: &SocketId) {
        if let Some(inner) = self.sockets.write().await.remove(socket_id) {
            inner.closed.store(true, Ordering::Release);
            inner.notify.notify_one();
        }
        let mut rooms = self.rooms.write().await;
        for room in rooms.values_mut() {
            room.members.remove(socket_id);
        }
        rooms.retain(|_, room| !room.members.is_empty());
    }

    pub async fn join_room(&self, code: &SessionCode, socket_id: &SocketId, role: Role) {
        self.rooms
            .write()
            .await
            .entry(code.clone())
            .or_default()
            .members
            .insert(socket_id.clone(), role);
    }

    pub async fn emit_socket(&self, socket_id: &SocketId, envelope: Envelope) {
        if let Some(inner) = self.sockets.read().await.get(socket_id) {
            inner.push(envelope, self.capacity);
        }
    }

    pub async fn emit_session(&self, code: &SessionCode, envelope: Envelope) {
        self.emit_filtered(code, envelope, |_| true).await;
    }

    pub async fn emit_host(&self, code: &SessionCode, envelope: Envelope) {
        self.emit_filtered(code, envelope, |role| role == Role::Host)
            .await;
    }

    /// Players and public displays; excludes the host.
    pub async fn emit_players(&self, code: &SessionCode, envelope: Envelope) {
        self.emit_filtered(code, envelope, |role| role != Role::Host)
            .await;
    }

    async fn emit_filtered<F: Fn(Role) -> bool>(
        &self,
        code: &SessionCode,
        envelope: Envelope,
        include: F,
    ) {
        let targets: Vec<SocketId> = {
            let rooms = self.rooms.read().await;
            match rooms.get(code) {
                Some(room) => room
                    .members
                    .iter()
                    .filter(|(_, role)| include(**role))
                    .map(|(socket, _)| socket.clone())
                    .collect(),
                None => return,
            }
        };
        let sockets = self.sockets.read().await;
        for socket_id in targets {
            if let Some(inner) = sockets.get(&socket_id) {
                inner.push(envelope.clone(), self.capacity);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::LeaderboardEntry;

    fn envelope(event: ServerEvent, version: u64) -> Envelope {
        Envelope::new(event, Some(version))
    }

    fn count_event(version: u64) -> Envelope {
        envelope(
            ServerEvent::AnswerCountUpdated {
                item_id: "item_1".into(),
                count: version as usize,
                total: 10,
            },
            version,
        )
    }

    fn leaderboard_event(version: u64) -> Envelope {
        envelope(ServerEvent::LeaderboardUpdate { entries: Vec::new() }, version)
    }

    #[tokio::test]
    async fn test_fifo_per_socket() {
        let bus = Broadcaster::new(16);
        let rx = bus.attach(&"s1".to_string()).await;
        bus.join_room(&"ABC123".to_string(), &"s1".to_string(), Role::Player)
            .await;

        bus.emit_session(&"ABC123".to_string(), count_event(1)).await;
        bus.emit_session(&"ABC123".to_string(), count_event(2)).await;

        assert_eq!(rx.recv().await.unwrap().state_version, Some(1));
        assert_eq!(rx.recv().await.unwrap().state_version, Some(2));
    }

    #[tokio::test]
    async fn test_role_filtered_targets() {
        let bus = Broadcaster::new(16);
        let host_rx = bus.attach(&"host".to_string()).await;
        let player_rx = bus.attach(&"player".to_string()).await;
        let code = "ABC123".to_string();
        bus.join_room(&code, &"host".to_string(), Role::Host).await;
        bus.join_room(&code, &"player".to_string(), Role::Player)
            .await;

        bus.emit_host(&code, count_event(1)).await;
        bus.emit_players(&code, count_event(2)).await;

        assert_eq!(host_rx.recv().await.unwrap().state_version, Some(1));
        // The player never saw version 1
        assert_eq!(player_rx.recv().await.unwrap().state_version, Some(2));
    }

    #[tokio::test]
    async fn test_snapshot_replacement() {
        let bus = Broadcaster::new(16);
        let rx = bus.attach(&"s1".to_string()).await;
        bus.join_room(&"ABC123".to_string(), &"s1".to_string(), Role::Player)
            .await;
        let code = "ABC123".to_string();

        // Two leaderboards queued without being drained: only the newer
        // one survives, still in FIFO position relative to other events
        bus.emit_session(&code, leaderboard_event(1)).await;
        bus.emit_session(&code, count_event(2)).await;
        bus.emit_session(&code, leaderboard_event(3)).await;

        let first = rx.recv().await.unwrap();
        assert!(matches!(
            first.event,
            ServerEvent::AnswerCountUpdated { .. }
        ));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.state_version, Some(3));
    }

    #[tokio::test]
    async fn test_overflow_drops_oldest_non_snapshot_keeps_snapshot() {
        let bus = Broadcaster::new(3);
        let rx = bus.attach(&"s1".to_string()).await;
        let code = "ABC123".to_string();
        bus.join_room(&code, &"s1".to_string(), Role::Player).await;

        bus.emit_session(&code, leaderboard_event(1)).await;
        bus.emit_session(&code, count_event(2)).await;
        bus.emit_session(&code, count_event(3)).await;
        // Queue full: version 2 (oldest non-snapshot) is dropped
        bus.emit_session(&code, count_event(4)).await;

        assert_eq!(rx.recv().await.unwrap().state_version, Some(1));
        assert_eq!(rx.recv().await.unwrap().state_version, Some(3));
        assert_eq!(rx.recv().await.unwrap().state_version, Some(4));
    }

    #[tokio::test]
    async fn test_sustained_overflow_closes_socket() {
        let bus = Broadcaster::new(2);
        let rx = bus.attach(&"s1".to_string()).await;
        let code = "ABC123".to_string();
        bus.join_room(&code, &"s1".to_string(), Role::Player).await;

        for i in 0..(2 + OVERFLOW_STRIKE_LIMIT as u64 + 1) {
            bus.emit_session(&code, count_event(i)).await;
        }

        // Drain whatever survived; the stream must terminate
        let mut drained = 0;
        while rx.recv().await.is_some() {
            drained += 1;
            assert!(drained <= 2, "queue should have stayed bounded");
        }
    }

    #[tokio::test]
    async fn test_detach_ends_stream() {
        let bus = Broadcaster::new(8);
        let rx = bus.attach(&"s1".to_string()).await;
        bus.detach(&"s1".to_string()).await;
        assert!(rx.recv().await.is_none());

        // Emissions to a detached socket are no-ops
        bus.emit_socket(&"s1".to_string(), count_event(1)).await;
    }

    #[test]
    fn test_snapshot_classification() {
        assert!(is_snapshot(&ServerEvent::LeaderboardUpdate {
            entries: vec![LeaderboardEntry {
                player_id: "p".into(),
                name: "P".into(),
                score: 0,
                rank: 1,
                online: true,
                streak: 0,
            }]
        }));
        assert!(!is_snapshot(&ServerEvent::SessionResumed));
    }
}
