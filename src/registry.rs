//! Connection registry: socket ↔ (session, role, player) bindings,
//! heartbeat-based presence, and single-use rejoin tokens.

use crate::types::*;
use rand::RngCore;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct Connection {
    pub socket_id: SocketId,
    pub role: Role,
    pub session_code: SessionCode,
    pub player_id: Option<PlayerId>,
    pub last_heartbeat: Instant,
    pub quality: ConnectionQuality,
}

#[derive(Debug, Clone)]
struct TokenEntry {
    session_code: SessionCode,
    player_id: PlayerId,
    expires_at: Instant,
}

/// A presence label change the sweeper detected. Routed through the
/// session worker so the resulting event carries a state version.
#[derive(Debug, Clone)]
pub struct QualityChange {
    pub session_code: SessionCode,
    pub player_id: PlayerId,
    pub quality: ConnectionQuality,
}

pub struct ConnectionRegistry {
    connections: RwLock<HashMap<SocketId, Connection>>,
    tokens: RwLock<HashMap<String, TokenEntry>>,
    heartbeat_interval: Duration,
    token_ttl: Duration,
}

impl ConnectionRegistry {
    pub fn new(heartbeat_interval: Duration, token_ttl: Duration) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            heartbeat_interval,
            token_ttl,
        }
    }

    pub async fn register(&self, socket_id: &SocketId, role: Role, session_code: &SessionCode) {
        let conn = Connection {
            socket_id: socket_id.clone(),
            role,
            session_code: session_code.clone(),
            player_id: None,
            last_heartbeat: Instant::now(),
            quality: ConnectionQuality::Good,
        };
        self.connections
            .write()
            .await
            .insert(socket_id.clone(), conn);
    }

    /// Bind a player identity to an already registered socket.
    pub async fn bind_player(&self, socket_id: &SocketId, player_id: &PlayerId) {
        if let Some(conn) = self.connections.write().await.get_mut(socket_id) {
            conn.player_id = Some(player_id.clone());
        }
    }

    pub async fn unregister(&self, socket_id: &SocketId) -> Option<Connection> {
        self.connections.write().await.remove(socket_id)
    }

    pub async fn get(&self, socket_id: &SocketId) -> Option<Connection> {
        self.connections.read().await.get(socket_id).cloned()
    }

    /// Record a heartbeat. Returns the quality change, if the label
    /// recovered.
    pub async fn heartbeat(&self, socket_id: &SocketId) -> Option<QualityChange> {
        let mut connections = self.connections.write().await;
        let conn = connections.get_mut(socket_id)?;
        conn.last_heartbeat = Instant::now();
        if conn.quality != ConnectionQuality::Good {
            conn.quality = ConnectionQuality::Good;
            return conn.player_id.clone().map(|player_id| QualityChange {
                session_code: conn.session_code.clone(),
                player_id,
                quality: ConnectionQuality::Good,
            });
        }
        None
    }

    /// Classify all connections by missed heartbeats: two missed is poor,
    /// four missed is offline. Returns only the changes.
    pub async fn sweep(&self) -> Vec<QualityChange> {
        let now = Instant::now();
        let mut changes = Vec::new();
        let mut connections = self.connections.write().await;
        for conn in connections.values_mut() {
            let missed =
                now.duration_since(conn.last_heartbeat).as_millis()
                    / self.heartbeat_interval.as_millis().max(1);
            let quality = if missed >= 4 {
                ConnectionQuality::Offline
            } else if missed >= 2 {
                ConnectionQuality::Poor
            } else {
                ConnectionQuality::Good
            };
            if quality != conn.quality {
                conn.quality = quality;
                if let Some(player_id) = conn.player_id.clone() {
                    changes.push(QualityChange {
                        session_code: conn.session_code.clone(),
                        player_id,
                        quality,
                    });
                }
            }
        }
        changes
    }

    /// All sockets bound to one player (a device may reconnect while the
    /// old socket lingers).
    pub async fn sockets_for_player(
        &self,
        session_code: &SessionCode,
        player_id: &PlayerId,
    ) -> Vec<SocketId> {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| {
                c.session_code == *session_code && c.player_id.as_ref() == Some(player_id)
            })
            .map(|c| c.socket_id.clone())
            .collect()
    }

    /// Whether any live socket is bound to the player.
    pub async fn player_connected(
        &self,
        session_code: &SessionCode,
        player_id: &PlayerId,
    ) -> bool {
        !self
            .sockets_for_player(session_code, player_id)
            .await
            .is_empty()
    }

    /// Issue a single-use rejoin token for an offline player. The raw
    /// token is returned exactly once, to the requesting host.
    pub async fn issue_rejoin_token(
        &self,
        session_code: &SessionCode,
        player_id: &PlayerId,
    ) -> (String, Instant) {
        let mut bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        let expires_at = Instant::now() + self.token_ttl;
        self.tokens.write().await.insert(
            token.clone(),
            TokenEntry {
                session_code: session_code.clone(),
                player_id: player_id.clone(),
                expires_at,
            },
        );
        tracing::info!(session = %session_code, player = %player_id, "rejoin token issued");
        (token, expires_at)
    }

    /// Atomically consume a token. Expired, unknown, and already-used
    /// tokens all look the same to the caller.
    pub async fn redeem_rejoin_token(&self, token: &str) -> Option<(SessionCode, PlayerId)> {
        let mut tokens = self.tokens.write().await;
        let entry = tokens.remove(token)?;
        if entry.expires_at < Instant::now() {
            return None;
        }
        Some((entry.session_code, entry.player_id))
    }

    /// Drop expired tokens; called periodically.
    pub async fn cleanup_tokens(&self) {
        let now = Instant::now();
        self.tokens
            .write()
            .await
            .retain(|_, entry| entry.expires_at >= now);
    }

    #[cfg(test)]
    async fn force_heartbeat_age(&self, socket_id: &SocketId, age: Duration) {
        if let Some(conn) = self.connections.write().await.get_mut(socket_id) {
            conn.last_heartbeat = Instant::now() - age;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(Duration::from_secs(15), Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_register_bind_unregister() {
        let reg = registry();
        reg.register(&"s1".to_string(), Role::Player, &"ABC123".to_string())
            .await;
        reg.bind_player(&"s1".to_string(), &"p1".to_string()).await;

        let conn = reg.get(&"s1".to_string()).await.unwrap();
        assert_eq!(conn.player_id.as_deref(), Some("p1"));
        assert_eq!(conn.quality, ConnectionQuality::Good);

        assert!(reg
            .player_connected(&"ABC123".to_string(), &"p1".to_string())
            .await);
        reg.unregister(&"s1".to_string()).await;
        assert!(!reg
            .player_connected(&"ABC123".to_string(), &"p1".to_string())
            .await);
    }

    #[tokio::test]
    async fn test_sweep_thresholds() {
        let reg = registry();
        reg.register(&"s1".to_string(), Role::Player, &"ABC123".to_string())
            .await;
        reg.bind_player(&"s1".to_string(), &"p1".to_string()).await;

        // Fresh heartbeat: no change
        assert!(reg.sweep().await.is_empty());

        // Two missed heartbeats: poor
        reg.force_heartbeat_age(&"s1".to_string(), Duration::from_secs(31))
            .await;
        let changes = reg.sweep().await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].quality, ConnectionQuality::Poor);

        // Four missed: offline
        reg.force_heartbeat_age(&"s1".to_string(), Duration::from_secs(61))
            .await;
        let changes = reg.sweep().await;
        assert_eq!(changes[0].quality, ConnectionQuality::Offline);

        // Unchanged label is not re-reported
        assert!(reg.sweep().await.is_empty());

        // Heartbeat restores good and reports the recovery
        let change = reg.heartbeat(&"s1".to_string()).await.unwrap();
        assert_eq!(change.quality, ConnectionQuality::Good);
    }

    #[tokio::test]
    async fn test_rejoin_token_single_use() {
        let reg = registry();
        let (token, _) = reg
            .issue_rejoin_token(&"ABC123".to_string(), &"p1".to_string())
            .await;
        assert_eq!(token.len(), 32); // 128 bits hex-encoded

        let (code, player) = reg.redeem_rejoin_token(&token).await.unwrap();
        assert_eq!(code, "ABC123");
        assert_eq!(player, "p1");

        // Second redemption fails
        assert!(reg.redeem_rejoin_token(&token).await.is_none());
    }

    #[tokio::test]
    async fn test_rejoin_token_expiry() {
        let reg = ConnectionRegistry::new(Duration::from_secs(15), Duration::from_millis(0));
        let (token, _) = reg
            .issue_rejoin_token(&"ABC123".to_string(), &"p1".to_string())
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(reg.redeem_rejoin_token(&token).await.is_none());

        let (token2, _) = reg
            .issue_rejoin_token(&"ABC123".to_string(), &"p1".to_string())
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        reg.cleanup_tokens().await;
        assert!(reg.redeem_rejoin_token(&token2).await.is_none());
    }
}
