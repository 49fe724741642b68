//! Local mirror of the room, kept current from server messages

use roomcast_protocol::{
    ConsumerData, ProducerInfo, Role, RtpCapabilities, ServerMessage, TransportOptions,
};
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ClientState {
    pub room_id: Option<String>,
    pub peer_id: Option<String>,
    pub role: Role,

    // Negotiated at join
    pub rtp_capabilities: Option<RtpCapabilities>,
    pub send_transport: Option<TransportOptions>,
    pub recv_transport: Option<TransportOptions>,

    // Room membership, in join order
    pub peers: Vec<String>,
    pub viewers: Vec<String>,

    /// Remote producers that can be consumed
    pub producers: Vec<ProducerInfo>,
    /// Producers published by this client
    pub local_producers: Vec<String>,

    /// Consumer id -> consumer
    consumers: HashMap<String, ConsumerData>,
}

impl ClientState {
    pub fn is_joined(&self) -> bool {
        self.room_id.is_some() && self.peer_id.is_some()
    }

    pub fn consumer(&self, consumer_id: &str) -> Option<&ConsumerData> {
        self.consumers.get(consumer_id)
    }

    pub fn consumer_for_producer(&self, producer_id: &str) -> Option<&ConsumerData> {
        self.consumers
            .values()
            .find(|c| c.producer_id == producer_id)
    }

    pub fn consumers(&self) -> impl Iterator<Item = &ConsumerData> {
        self.consumers.values()
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Record who we joined as; the rest of the join arrives as `room-joined`
    pub(crate) fn set_identity(&mut self, room_id: &str, peer_id: &str, role: Role) {
        self.room_id = Some(room_id.to_string());
        self.peer_id = Some(peer_id.to_string());
        self.role = role;
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold one server message into the local view
    pub fn apply(&mut self, message: &ServerMessage) {
        match message {
            ServerMessage::RoomJoined {
                send_transport_options,
                recv_transport_options,
                rtp_capabilities,
                peer_ids,
                existing_producers,
            } => {
                self.send_transport = send_transport_options.clone();
                self.recv_transport = Some(recv_transport_options.clone());
                self.rtp_capabilities = Some(rtp_capabilities.clone());
                self.peers = peer_ids.clone();
                self.producers = existing_producers.clone();
            }
            ServerMessage::NewPeer { peer_id } => {
                if !self.peers.contains(peer_id) {
                    self.peers.push(peer_id.clone());
                }
            }
            ServerMessage::PeerLeft { peer_id } => {
                self.peers.retain(|id| id != peer_id);
                self.viewers.retain(|id| id != peer_id);
                self.producers.retain(|p| &p.peer_id != peer_id);
            }
            ServerMessage::ViewersUpdated { viewers } => {
                self.viewers = viewers.clone();
            }
            ServerMessage::Produced { producer_id } => {
                self.local_producers.push(producer_id.clone());
            }
            ServerMessage::NewProducer {
                producer_id,
                peer_id,
                kind,
            } => {
                if !self.producers.iter().any(|p| &p.producer_id == producer_id) {
                    self.producers.push(ProducerInfo {
                        producer_id: producer_id.clone(),
                        peer_id: peer_id.clone(),
                        kind: *kind,
                    });
                }
            }
            ServerMessage::ProducerClosed { producer_id, .. } => {
                self.producers.retain(|p| &p.producer_id != producer_id);
                self.local_producers.retain(|id| id != producer_id);
                let before = self.consumers.len();
                self.consumers.retain(|_, c| &c.producer_id != producer_id);
                if self.consumers.len() != before {
                    tracing::debug!("Dropped consumer(s) of closed producer {}", producer_id);
                }
            }
            ServerMessage::ConsumeResponse { consumer_data } => {
                self.consumers
                    .insert(consumer_data.id.clone(), consumer_data.clone());
            }
            ServerMessage::Error { .. } | ServerMessage::Pong => {}
        }
    }
}
