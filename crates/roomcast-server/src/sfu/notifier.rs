use async_trait::async_trait;
use roomcast_protocol::ServerMessage;

/// Delivers session notifications to connected peers
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_to_peer(&self, peer_id: &str, message: &ServerMessage);

    async fn broadcast(&self, peer_ids: &[String], message: &ServerMessage) {
        for peer_id in peer_ids {
            self.send_to_peer(peer_id, message).await;
        }
    }
}
