use crate::sfu::Notifier;
use async_trait::async_trait;
use roomcast_protocol::ServerMessage;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

pub struct ConnectionManager {
    /// Map from connection ID to message sender channel
    senders: RwLock<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
    /// Map from peer ID to the connection that joined with it
    peer_connections: RwLock<HashMap<String, Uuid>>,
    /// Map from connection ID to the peer ID it is bound to
    connection_peers: RwLock<HashMap<Uuid, String>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
            peer_connections: RwLock::new(HashMap::new()),
            connection_peers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn add_connection(&self, connection_id: Uuid, sender: mpsc::UnboundedSender<String>) {
        self.senders.write().await.insert(connection_id, sender);
        tracing::debug!("Connection {} opened", connection_id);
    }

    /// Forget the connection, returning the peer it was bound to
    pub async fn remove_connection(&self, connection_id: Uuid) -> Option<String> {
        let peer_id = self.unbind_peer(connection_id).await;
        self.senders.write().await.remove(&connection_id);

        tracing::debug!(
            "Connection {} closed (peer {})",
            connection_id,
            peer_id.as_deref().unwrap_or("-")
        );

        peer_id
    }

    /// Route messages for `peer_id` to `connection_id`.
    ///
    /// Returns false, changing nothing, when another connection already holds `peer_id`.
    pub async fn bind_peer(&self, connection_id: Uuid, peer_id: &str) -> bool {
        let mut connections = self.connection_peers.write().await;
        let mut peers = self.peer_connections.write().await;

        if peers.get(peer_id).is_some_and(|owner| *owner != connection_id) {
            return false;
        }

        peers.insert(peer_id.to_string(), connection_id);
        connections.insert(connection_id, peer_id.to_string());
        true
    }

    pub async fn unbind_peer(&self, connection_id: Uuid) -> Option<String> {
        let peer_id = self.connection_peers.write().await.remove(&connection_id)?;

        let mut peers = self.peer_connections.write().await;
        if peers.get(&peer_id) == Some(&connection_id) {
            peers.remove(&peer_id);
        }

        Some(peer_id)
    }

    pub async fn peer_for_connection(&self, connection_id: Uuid) -> Option<String> {
        self.connection_peers.read().await.get(&connection_id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.senders.read().await.len()
    }

    pub async fn send_to_connection(&self, connection_id: Uuid, message: &ServerMessage) {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return;
            }
        };

        let senders = self.senders.read().await;

        if let Some(sender) = senders.get(&connection_id) {
            if let Err(e) = sender.send(json) {
                tracing::error!("Failed to send message to {}: {}", connection_id, e);
            }
        }
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ConnectionManager {
    async fn send_to_peer(&self, peer_id: &str, message: &ServerMessage) {
        let connection_id = self.peer_connections.read().await.get(peer_id).copied();

        match connection_id {
            Some(connection_id) => self.send_to_connection(connection_id, message).await,
            None => tracing::debug!("Peer {} has no live connection, dropping message", peer_id),
        }
    }

    async fn broadcast(&self, peer_ids: &[String], message: &ServerMessage) {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return;
            }
        };

        let peers = self.peer_connections.read().await;
        let senders = self.senders.read().await;

        tracing::debug!("Broadcasting to {} peer(s)", peer_ids.len());
        for peer_id in peer_ids {
            if let Some(sender) = peers.get(peer_id).and_then(|conn_id| senders.get(conn_id)) {
                if let Err(e) = sender.send(json.clone()) {
                    tracing::error!("Failed to send message to peer {}: {}", peer_id, e);
                }
            }
        }
    }
}
