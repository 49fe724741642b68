use serde::{Deserialize, Serialize};

use crate::types::{
    ConsumerData, DtlsParameters, ErrorKind, MediaKind, ProducerInfo, Role, RtpCapabilities,
    RtpParameters, TransportOptions,
};

/// Events sent from client to server via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Join (and create if needed) a room
    JoinRoom {
        room_id: String,
        peer_id: String,
        #[serde(default)]
        role: Role,
    },

    /// Finish the DTLS handshake of a transport created during join
    ConnectTransport {
        room_id: String,
        peer_id: String,
        transport_id: String,
        dtls_parameters: DtlsParameters,
    },

    /// Publish a stream on the send transport
    Produce {
        room_id: String,
        peer_id: String,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    },

    /// Subscribe to another peer's producer
    Consume {
        room_id: String,
        peer_id: String,
        producer_id: String,
        rtp_capabilities: RtpCapabilities,
        transport_id: String,
    },

    /// Close every producer of the peer without leaving the room
    StopCamera { room_id: String, peer_id: String },

    /// Leave the room bound to this connection
    LeaveRoom,

    /// Keepalive
    Ping,
}

impl ClientMessage {
    /// Event name as it appears on the wire
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::JoinRoom { .. } => "join-room",
            ClientMessage::ConnectTransport { .. } => "connect-transport",
            ClientMessage::Produce { .. } => "produce",
            ClientMessage::Consume { .. } => "consume",
            ClientMessage::StopCamera { .. } => "stop-camera",
            ClientMessage::LeaveRoom => "leave-room",
            ClientMessage::Ping => "ping",
        }
    }

    /// Peer id carried by the payload, if the event has one
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            ClientMessage::JoinRoom { peer_id, .. }
            | ClientMessage::ConnectTransport { peer_id, .. }
            | ClientMessage::Produce { peer_id, .. }
            | ClientMessage::Consume { peer_id, .. }
            | ClientMessage::StopCamera { peer_id, .. } => Some(peer_id),
            ClientMessage::LeaveRoom | ClientMessage::Ping => None,
        }
    }
}

/// Messages sent from server to client via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Join succeeded
    RoomJoined {
        /// Only hosts get a send transport
        send_transport_options: Option<TransportOptions>,
        recv_transport_options: TransportOptions,
        rtp_capabilities: RtpCapabilities,
        peer_ids: Vec<String>,
        existing_producers: Vec<ProducerInfo>,
    },

    /// Another peer joined the room
    NewPeer { peer_id: String },

    /// A peer left the room or disconnected
    PeerLeft { peer_id: String },

    /// Current non-host members, in join order
    ViewersUpdated { viewers: Vec<String> },

    /// Acknowledgement of a produce request
    Produced { producer_id: String },

    /// Another peer started publishing
    NewProducer {
        producer_id: String,
        peer_id: String,
        kind: MediaKind,
    },

    /// A producer was closed, consumers of it must be torn down
    ProducerClosed { producer_id: String, peer_id: String },

    /// Reply to a consume request
    ConsumeResponse { consumer_data: ConsumerData },

    /// A request from this connection failed
    Error {
        event: Option<String>,
        kind: ErrorKind,
        message: String,
    },

    /// Pong response to ping
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_wire_shape() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "join-room",
            "roomId": "r1",
            "peerId": "alice",
            "role": "host"
        }))
        .unwrap();

        assert_eq!(
            msg,
            ClientMessage::JoinRoom {
                room_id: "r1".to_string(),
                peer_id: "alice".to_string(),
                role: Role::Host,
            }
        );
        assert_eq!(msg.event_name(), "join-room");
        assert_eq!(msg.peer_id(), Some("alice"));
    }

    #[test]
    fn test_join_room_role_is_optional() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "join-room",
            "roomId": "r1",
            "peerId": "bob"
        }))
        .unwrap();

        match msg {
            ClientMessage::JoinRoom { role, .. } => assert_eq!(role, Role::Viewer),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_leave_room_has_no_payload() {
        let msg: ClientMessage = serde_json::from_value(json!({ "type": "leave-room" })).unwrap();
        assert_eq!(msg, ClientMessage::LeaveRoom);
        assert_eq!(msg.peer_id(), None);
    }

    #[test]
    fn test_produce_rejects_unknown_kind() {
        let result = serde_json::from_value::<ClientMessage>(json!({
            "type": "produce",
            "roomId": "r1",
            "peerId": "alice",
            "transportId": "t1",
            "kind": "data",
            "rtpParameters": {}
        }));

        assert!(result.is_err());
    }

    #[test]
    fn test_server_messages_use_camel_case_fields() {
        let msg = ServerMessage::NewProducer {
            producer_id: "p1".to_string(),
            peer_id: "alice".to_string(),
            kind: MediaKind::Video,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            json!({ "type": "new-producer", "producerId": "p1", "peerId": "alice", "kind": "video" })
        );

        let err = ServerMessage::Error {
            event: Some("consume".to_string()),
            kind: ErrorKind::NotFound,
            message: "producer p9 not found".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "not-found");
        assert_eq!(json["event"], "consume");
    }
}
