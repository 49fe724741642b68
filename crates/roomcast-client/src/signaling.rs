use crate::error::{ClientError, Result};
use crate::state::ClientState;
use futures_util::{SinkExt, StreamExt};
use roomcast_protocol::{
    ClientMessage, ConsumerData, DtlsParameters, MediaKind, ProducerInfo, Role, RtpCapabilities,
    RtpParameters, ServerMessage, TransportOptions,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Bound on join, produce and acknowledged requests
    pub request_timeout: Duration,
    pub consume_timeout: Duration,
    /// Keepalive period, `None` disables keepalive pings
    pub ping_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            consume_timeout: Duration::from_secs(10),
            ping_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// What a successful join hands back
#[derive(Debug, Clone)]
pub struct JoinedRoom {
    pub send_transport: Option<TransportOptions>,
    pub recv_transport: TransportOptions,
    pub rtp_capabilities: RtpCapabilities,
    pub peer_ids: Vec<String>,
    pub existing_producers: Vec<ProducerInfo>,
}

/// A request waiting for its reply
struct Waiter {
    event: &'static str,
    reply: oneshot::Sender<ServerMessage>,
    /// Error seen for an acknowledged request, delivered once the trailing pong arrives
    error: Option<ServerMessage>,
}

impl Waiter {
    /// Events the server never answers on success; they are followed by a ping
    fn awaits_pong(&self) -> bool {
        matches!(
            self.event,
            "connect-transport" | "stop-camera" | "leave-room" | "ping"
        )
    }

    fn answered_by(&self, message: &ServerMessage) -> bool {
        match message {
            ServerMessage::Error { event: Some(e), .. } => e == self.event,
            ServerMessage::RoomJoined { .. } => self.event == "join-room",
            ServerMessage::Produced { .. } => self.event == "produce",
            ServerMessage::ConsumeResponse { .. } => self.event == "consume",
            ServerMessage::Pong => self.awaits_pong(),
            _ => false,
        }
    }
}

type WaiterSlot = Arc<Mutex<Option<Waiter>>>;

struct Inner {
    sender: mpsc::Sender<ClientMessage>,
    state: Arc<RwLock<ClientState>>,
    waiter: WaiterSlot,
    events: broadcast::Sender<ServerMessage>,
    /// One request on the wire at a time, so replies correlate by type
    requests: Mutex<()>,
    connected: Arc<AtomicBool>,
    config: ClientConfig,
}

/// Signaling connection to a roomcast server
#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<Inner>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with(url, ClientConfig::default()).await
    }

    pub async fn connect_with(url: &str, config: ClientConfig) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Create channel for sending messages
        let (tx, mut rx) = mpsc::channel::<ClientMessage>(100);

        // Spawn task to handle outgoing messages
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(json.into())).await.is_err() {
                    tracing::error!("Failed to send WebSocket message");
                    break;
                }
            }

            let _ = write.close().await;
        });

        let state = Arc::new(RwLock::new(ClientState::default()));
        let waiter: WaiterSlot = Arc::new(Mutex::new(None));
        let (events, _) = broadcast::channel(256);
        let connected = Arc::new(AtomicBool::new(true));

        // Spawn task to handle incoming messages
        {
            let state = state.clone();
            let waiter = waiter.clone();
            let events = events.clone();
            let connected = connected.clone();

            tokio::spawn(async move {
                while let Some(result) = read.next().await {
                    match result {
                        Ok(Message::Text(text)) => {
                            match serde_json::from_str::<ServerMessage>(text.as_str()) {
                                Ok(msg) => Self::handle_message(&state, &waiter, &events, msg).await,
                                Err(e) => tracing::warn!("Unparseable server message: {}", e),
                            }
                        }
                        Ok(Message::Close(_)) => {
                            tracing::info!("WebSocket closed by server");
                            break;
                        }
                        Err(e) => {
                            tracing::error!("WebSocket error: {}", e);
                            break;
                        }
                        _ => {}
                    }
                }

                // Mark as disconnected; dropping the waiter fails the pending request
                connected.store(false, Ordering::SeqCst);
                waiter.lock().await.take();
            });
        }

        let inner = Arc::new(Inner {
            sender: tx,
            state,
            waiter,
            events,
            requests: Mutex::new(()),
            connected,
            config,
        });

        if let Some(period) = inner.config.ping_interval {
            Self::spawn_keepalive(Arc::downgrade(&inner), period);
        }

        tracing::info!("Connected to signaling server at {}", url);

        Ok(Self { inner })
    }

    fn spawn_keepalive(inner: Weak<Inner>, period: Duration) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                match (SignalingClient { inner }).ping().await {
                    Err(ClientError::Disconnected) => break,
                    Err(e) => tracing::warn!("Keepalive failed: {}", e),
                    Ok(()) => {}
                }
            }
        });
    }

    async fn handle_message(
        state: &RwLock<ClientState>,
        waiter: &Mutex<Option<Waiter>>,
        events: &broadcast::Sender<ServerMessage>,
        message: ServerMessage,
    ) {
        state.write().await.apply(&message);

        {
            let mut slot = waiter.lock().await;
            let answered = slot.as_ref().is_some_and(|w| w.answered_by(&message));

            if answered {
                match slot.as_mut() {
                    Some(w) if w.awaits_pong() && message != ServerMessage::Pong => {
                        w.error = Some(message.clone());
                    }
                    _ => {
                        if let Some(w) = slot.take() {
                            let _ = w.reply.send(w.error.unwrap_or_else(|| message.clone()));
                        }
                    }
                }
            } else if let ServerMessage::Error { event, message, .. } = &message {
                tracing::warn!(
                    "Server error for {}: {}",
                    event.as_deref().unwrap_or("unknown event"),
                    message
                );
            }
        }

        // Nobody listening is fine
        let _ = events.send(message);
    }

    /// Every server message, in arrival order
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.inner.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Snapshot of the local room view
    pub async fn state(&self) -> ClientState {
        self.inner.state.read().await.clone()
    }

    async fn identity(&self) -> Result<(String, String)> {
        let state = self.inner.state.read().await;
        match (&state.room_id, &state.peer_id) {
            (Some(room_id), Some(peer_id)) => Ok((room_id.clone(), peer_id.clone())),
            _ => Err(ClientError::NotJoined),
        }
    }

    async fn send(&self, message: ClientMessage) -> Result<()> {
        self.inner
            .sender
            .send(message)
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    /// Send `message` and wait for its reply. Callers hold the request lock.
    async fn request(&self, message: ClientMessage, timeout: Duration) -> Result<ServerMessage> {
        let event = message.event_name();
        let (tx, rx) = oneshot::channel();
        *self.inner.waiter.lock().await = Some(Waiter {
            event,
            reply: tx,
            error: None,
        });

        let awaits_pong = matches!(event, "connect-transport" | "stop-camera" | "leave-room");
        let sent = match self.send(message).await {
            Ok(()) if awaits_pong => self.send(ClientMessage::Ping).await,
            other => other,
        };
        if let Err(e) = sent {
            self.inner.waiter.lock().await.take();
            return Err(e);
        }

        let reply = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(ClientError::Disconnected),
            Err(_) => {
                self.inner.waiter.lock().await.take();
                tracing::warn!("{} timed out after {:?}", event, timeout);
                return Err(ClientError::Timeout(event));
            }
        };

        match reply {
            ServerMessage::Error { kind, message, .. } => Err(ClientError::Rejected {
                event,
                kind,
                message,
            }),
            reply => Ok(reply),
        }
    }

    async fn acknowledged(&self, message: ClientMessage) -> Result<()> {
        let event = message.event_name();
        let _guard = self.inner.requests.lock().await;
        match self.request(message, self.inner.config.request_timeout).await? {
            ServerMessage::Pong => Ok(()),
            _ => Err(ClientError::UnexpectedReply(event)),
        }
    }

    pub async fn join(&self, room_id: &str, peer_id: &str, role: Role) -> Result<JoinedRoom> {
        let _guard = self.inner.requests.lock().await;

        let reply = self
            .request(
                ClientMessage::JoinRoom {
                    room_id: room_id.to_string(),
                    peer_id: peer_id.to_string(),
                    role,
                },
                self.inner.config.request_timeout,
            )
            .await?;

        match reply {
            ServerMessage::RoomJoined {
                send_transport_options,
                recv_transport_options,
                rtp_capabilities,
                peer_ids,
                existing_producers,
            } => {
                self.inner
                    .state
                    .write()
                    .await
                    .set_identity(room_id, peer_id, role);

                tracing::info!(
                    "Joined room {} as {} ({} producer(s) available)",
                    room_id,
                    peer_id,
                    existing_producers.len()
                );

                Ok(JoinedRoom {
                    send_transport: send_transport_options,
                    recv_transport: recv_transport_options,
                    rtp_capabilities,
                    peer_ids,
                    existing_producers,
                })
            }
            _ => Err(ClientError::UnexpectedReply("join-room")),
        }
    }

    pub async fn connect_transport(
        &self,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> Result<()> {
        let (room_id, peer_id) = self.identity().await?;
        self.acknowledged(ClientMessage::ConnectTransport {
            room_id,
            peer_id,
            transport_id: transport_id.to_string(),
            dtls_parameters,
        })
        .await
    }

    /// Publish a stream, returns the producer id
    pub async fn produce(
        &self,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<String> {
        let (room_id, peer_id) = self.identity().await?;
        let _guard = self.inner.requests.lock().await;

        let reply = self
            .request(
                ClientMessage::Produce {
                    room_id,
                    peer_id,
                    transport_id: transport_id.to_string(),
                    kind,
                    rtp_parameters,
                },
                self.inner.config.request_timeout,
            )
            .await?;

        match reply {
            ServerMessage::Produced { producer_id } => Ok(producer_id),
            _ => Err(ClientError::UnexpectedReply("produce")),
        }
    }

    /// Subscribe to a remote producer, bounded by the consume timeout
    pub async fn consume(
        &self,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
        transport_id: &str,
    ) -> Result<ConsumerData> {
        let (room_id, peer_id) = self.identity().await?;
        let _guard = self.inner.requests.lock().await;

        if self
            .inner
            .state
            .read()
            .await
            .consumer_for_producer(producer_id)
            .is_some()
        {
            return Err(ClientError::AlreadyConsuming(producer_id.to_string()));
        }

        let reply = self
            .request(
                ClientMessage::Consume {
                    room_id,
                    peer_id,
                    producer_id: producer_id.to_string(),
                    rtp_capabilities,
                    transport_id: transport_id.to_string(),
                },
                self.inner.config.consume_timeout,
            )
            .await?;

        match reply {
            ServerMessage::ConsumeResponse { consumer_data } => {
                tracing::debug!(
                    "Consuming producer {} via consumer {}",
                    producer_id,
                    consumer_data.id
                );
                Ok(consumer_data)
            }
            _ => Err(ClientError::UnexpectedReply("consume")),
        }
    }

    pub async fn stop_camera(&self) -> Result<()> {
        let (room_id, peer_id) = self.identity().await?;
        self.acknowledged(ClientMessage::StopCamera { room_id, peer_id })
            .await?;
        self.inner.state.write().await.local_producers.clear();
        Ok(())
    }

    pub async fn leave(&self) -> Result<()> {
        self.acknowledged(ClientMessage::LeaveRoom).await?;
        self.inner.state.write().await.reset();
        tracing::info!("Left room");
        Ok(())
    }

    pub async fn ping(&self) -> Result<()> {
        self.acknowledged(ClientMessage::Ping).await
    }
}
