use crate::error::{SessionError, SessionResult};
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use roomcast_protocol::{ClientMessage, ErrorKind, ServerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let connection_id = Uuid::new_v4();

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.connections.add_connection(connection_id, tx).await;

    tracing::info!("WebSocket connection {} opened", connection_id);

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Events of one connection are handled one at a time, in arrival order
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                handle_text(&state, connection_id, text.as_str()).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error on connection {}: {}", connection_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect
    if let Some(peer_id) = state.connections.remove_connection(connection_id).await {
        if let Some(room_id) = state.sessions.leave(&peer_id).await {
            tracing::info!(
                "Peer {} disconnected, removed from room {}",
                peer_id,
                room_id
            );
        }
    }

    send_task.abort();

    tracing::info!("WebSocket connection {} closed", connection_id);
}

async fn handle_text(state: &AppState, connection_id: Uuid, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Malformed message on connection {}: {}", connection_id, e);
            send_error(
                state,
                connection_id,
                None,
                ErrorKind::InvalidRequest,
                format!("malformed message: {}", e),
            )
            .await;
            return;
        }
    };

    // Keep the event name around so a payload that fails to parse can still be reported
    let event = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .map(String::from);

    let message: ClientMessage = match serde_json::from_value(value) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!("Invalid message on connection {}: {}", connection_id, e);
            send_error(
                state,
                connection_id,
                event,
                ErrorKind::InvalidRequest,
                format!("invalid payload: {}", e),
            )
            .await;
            return;
        }
    };

    let event_name = message.event_name();
    if let Err(err) = handle_client_message(state, connection_id, message).await {
        tracing::warn!(
            "Event {} on connection {} failed: {}",
            event_name,
            connection_id,
            err
        );
        send_error(
            state,
            connection_id,
            Some(event_name.to_string()),
            err.kind(),
            err.to_string(),
        )
        .await;
    }
}

async fn send_error(
    state: &AppState,
    connection_id: Uuid,
    event: Option<String>,
    kind: ErrorKind,
    message: String,
) {
    state
        .connections
        .send_to_connection(
            connection_id,
            &ServerMessage::Error {
                event,
                kind,
                message,
            },
        )
        .await;
}

async fn handle_client_message(
    state: &AppState,
    connection_id: Uuid,
    message: ClientMessage,
) -> SessionResult<()> {
    let bound = state.connections.peer_for_connection(connection_id).await;

    match (bound.as_deref(), message.peer_id()) {
        (Some(bound), Some(claimed)) if bound != claimed => {
            return Err(SessionError::InvalidRequest(format!(
                "connection is bound to peer {}, not {}",
                bound, claimed
            )));
        }
        (None, Some(_)) if !matches!(message, ClientMessage::JoinRoom { .. }) => {
            return Err(SessionError::InvalidRequest(
                "connection has not joined a room".to_string(),
            ));
        }
        _ => {}
    }

    match message {
        ClientMessage::JoinRoom {
            room_id,
            peer_id,
            role,
        } => {
            if let Some(bound) = bound {
                return Err(SessionError::InvalidRequest(format!(
                    "connection already joined as peer {}",
                    bound
                )));
            }

            // Bound first so broadcasts racing the reply still reach this connection
            if !state.connections.bind_peer(connection_id, &peer_id).await {
                return Err(SessionError::InvalidRequest(format!(
                    "peer {} is already connected",
                    peer_id
                )));
            }

            match state.sessions.join(&room_id, &peer_id, role).await {
                Ok(joined) => {
                    let viewers = joined.viewers.clone();
                    state
                        .connections
                        .send_to_connection(connection_id, &joined.into())
                        .await;
                    state
                        .connections
                        .send_to_connection(connection_id, &ServerMessage::ViewersUpdated { viewers })
                        .await;
                }
                Err(err) => {
                    state.connections.unbind_peer(connection_id).await;
                    return Err(err);
                }
            }
        }
        ClientMessage::ConnectTransport {
            room_id,
            peer_id,
            transport_id,
            dtls_parameters,
        } => {
            state
                .sessions
                .connect_transport(&room_id, &peer_id, &transport_id, dtls_parameters)
                .await?;
        }
        ClientMessage::Produce {
            room_id,
            peer_id,
            transport_id,
            kind,
            rtp_parameters,
        } => {
            let producer_id = state
                .sessions
                .produce(&room_id, &peer_id, &transport_id, kind, rtp_parameters)
                .await?;

            state
                .connections
                .send_to_connection(connection_id, &ServerMessage::Produced { producer_id })
                .await;
        }
        ClientMessage::Consume {
            room_id,
            peer_id,
            producer_id,
            rtp_capabilities,
            transport_id,
        } => {
            let consumer_data = state
                .sessions
                .consume(
                    &room_id,
                    &peer_id,
                    &producer_id,
                    rtp_capabilities,
                    &transport_id,
                )
                .await?;

            state
                .connections
                .send_to_connection(
                    connection_id,
                    &ServerMessage::ConsumeResponse { consumer_data },
                )
                .await;
        }
        ClientMessage::StopCamera { room_id, peer_id } => {
            state.sessions.stop_camera(&room_id, &peer_id).await?;
        }
        ClientMessage::LeaveRoom => {
            if let Some(peer_id) = state.connections.unbind_peer(connection_id).await {
                state.sessions.leave(&peer_id).await;
            }
        }
        ClientMessage::Ping => {
            state
                .connections
                .send_to_connection(connection_id, &ServerMessage::Pong)
                .await;
        }
    }

    Ok(())
}
