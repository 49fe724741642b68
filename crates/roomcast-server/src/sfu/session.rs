//! Session lifecycle manager
//!
//! Maps signaling requests onto engine resources: rooms, peers, transports, producers and
//! consumers. Engine calls are made without holding any room lock, so every mutation that
//! follows one re-validates the registry before committing.

use super::{Notifier, Peer, Room, WorkerPool};
use crate::engine::{
    CodecOptions, ConsumeOptions, ListenIp, ProduceOptions, WebRtcTransport,
    WebRtcTransportSettings,
};
use crate::error::{SessionError, SessionResult};
use roomcast_protocol::{
    ConsumerData, DtlsParameters, MediaKind, ProducerInfo, Role, RoomSummary, RtpCapabilities,
    RtpEncodingParameters, RtpParameters, ServerMessage, TransportDirection, TransportOptions,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

/// Simulcast ladder declared by every video producer, lowest layer first
pub const VIDEO_BITRATE_LADDER: [u32; 3] = [100_000, 300_000, 900_000];

/// Start bitrate hint for video codecs, in kbps
pub const VIDEO_START_BITRATE: u32 = 1000;

/// Transport and producer parameters applied to every peer
#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub listen_ips: Vec<ListenIp>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub video_encodings: Vec<RtpEncodingParameters>,
    pub video_start_bitrate: Option<u32>,
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            listen_ips: vec![ListenIp {
                ip: "0.0.0.0".to_string(),
                announced_ip: Some("127.0.0.1".to_string()),
            }],
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            video_encodings: VIDEO_BITRATE_LADDER
                .iter()
                .map(|&max_bitrate| RtpEncodingParameters {
                    max_bitrate: Some(max_bitrate),
                    ..Default::default()
                })
                .collect(),
            video_start_bitrate: Some(VIDEO_START_BITRATE),
        }
    }
}

/// Everything a successful join hands back to the joining client
#[derive(Debug, Clone)]
pub struct JoinedRoom {
    pub send_transport_options: Option<TransportOptions>,
    pub recv_transport_options: TransportOptions,
    pub rtp_capabilities: RtpCapabilities,
    pub peer_ids: Vec<String>,
    pub existing_producers: Vec<ProducerInfo>,
    /// Non-host members after the join, joiner included
    pub viewers: Vec<String>,
}

impl From<JoinedRoom> for ServerMessage {
    fn from(joined: JoinedRoom) -> Self {
        ServerMessage::RoomJoined {
            send_transport_options: joined.send_transport_options,
            recv_transport_options: joined.recv_transport_options,
            rtp_capabilities: joined.rtp_capabilities,
            peer_ids: joined.peer_ids,
            existing_producers: joined.existing_producers,
        }
    }
}

/// Claim of a peer id on a room; the token tells apart successive joins of one id
#[derive(Debug, Clone)]
struct Reservation {
    room_id: String,
    token: u64,
}

enum Admission {
    Admitted,
    RoomClosed,
    Rejected(SessionError),
}

struct PeerTransports {
    send: Option<Arc<dyn WebRtcTransport>>,
    recv: Arc<dyn WebRtcTransport>,
}

impl PeerTransports {
    fn close(&self) {
        if let Some(send) = &self.send {
            send.close();
        }
        self.recv.close();
    }
}

/// A room id's place in the registry; filled once by whichever join gets there first
type RoomSlot = Arc<OnceCell<Arc<Room>>>;

pub struct SessionManager {
    pool: Arc<WorkerPool>,
    notifier: Arc<dyn Notifier>,
    settings: MediaSettings,
    rooms: RwLock<HashMap<String, RoomSlot>>,
    /// Which room each live peer id belongs to
    peer_rooms: RwLock<HashMap<String, Reservation>>,
    next_token: AtomicU64,
}

impl SessionManager {
    pub fn new(pool: Arc<WorkerPool>, notifier: Arc<dyn Notifier>, settings: MediaSettings) -> Self {
        Self {
            pool,
            notifier,
            settings,
            rooms: RwLock::new(HashMap::new()),
            peer_rooms: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Get or create the room for `room_id`.
    ///
    /// Concurrent first joins for one id share a creation slot, so they observe a single
    /// room and a single router. Other room ids are not held up by the router creation.
    pub async fn get_or_create_room(&self, room_id: &str) -> SessionResult<Arc<Room>> {
        let existing = self.rooms.read().await.get(room_id).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => self
                .rooms
                .write()
                .await
                .entry(room_id.to_string())
                .or_default()
                .clone(),
        };

        let result = slot
            .get_or_try_init(|| async move {
                let lease = self.pool.acquire_router(room_id).await?;
                let room = Arc::new(Room::new(room_id, lease));
                tracing::info!(
                    "Created room {} with router {}",
                    room_id,
                    room.router().id()
                );
                Ok::<_, SessionError>(room)
            })
            .await
            .cloned();

        let room = match result {
            Ok(room) => room,
            Err(err) => {
                self.discard_empty_slot(room_id, slot).await;
                return Err(err);
            }
        };

        Ok(room)
    }

    /// Drop a slot whose room could not be created, unless another join is still using it
    async fn discard_empty_slot(&self, room_id: &str, slot: RoomSlot) {
        let mut rooms = self.rooms.write().await;
        let unused = rooms.get(room_id).is_some_and(|current| {
            Arc::ptr_eq(current, &slot) && current.get().is_none() && Arc::strong_count(&slot) == 2
        });
        if unused {
            rooms.remove(room_id);
        }
    }

    pub async fn get_room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms
            .read()
            .await
            .get(room_id)
            .and_then(|slot| slot.get().cloned())
    }

    async fn room(&self, room_id: &str) -> SessionResult<Arc<Room>> {
        self.get_room(room_id)
            .await
            .ok_or_else(|| SessionError::NotFound(format!("room {}", room_id)))
    }

    /// Delete the room and release its router, if it has no members left
    pub async fn remove_room_if_empty(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(room_id).and_then(|slot| slot.get().cloned()) else {
            return false;
        };

        {
            let mut state = room.write().await;
            if !state.is_empty() || state.is_closed() {
                return false;
            }
            state.mark_closed();
        }

        rooms.remove(room_id);
        drop(rooms);

        self.pool.release(room.lease());
        tracing::info!("Room {} removed", room_id);
        true
    }

    pub async fn room_count(&self) -> usize {
        self.rooms
            .read()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Room currently holding `peer_id`
    pub async fn peer_room(&self, peer_id: &str) -> Option<String> {
        self.peer_rooms
            .read()
            .await
            .get(peer_id)
            .map(|r| r.room_id.clone())
    }

    pub async fn room_summary(&self, room_id: &str) -> Option<RoomSummary> {
        let room = self.get_room(room_id).await?;
        Some(room.summary().await)
    }

    pub async fn room_summaries(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .read()
            .await
            .values()
            .filter_map(|slot| slot.get().cloned())
            .collect();

        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            summaries.push(room.summary().await);
        }
        summaries.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        summaries
    }

    async fn reservation_valid(&self, peer_id: &str, token: u64) -> bool {
        self.peer_rooms
            .read()
            .await
            .get(peer_id)
            .is_some_and(|r| r.token == token)
    }

    async fn release_reservation(&self, peer_id: &str, token: u64) {
        let mut index = self.peer_rooms.write().await;
        if index.get(peer_id).is_some_and(|r| r.token == token) {
            index.remove(peer_id);
        }
    }

    /// Join `peer_id` to `room_id`, creating the room on first use.
    ///
    /// Either the peer ends up fully registered with its transports, or nothing of it is
    /// left behind: transports are closed, the peer is evicted and an emptied room removed.
    pub async fn join(&self, room_id: &str, peer_id: &str, role: Role) -> SessionResult<JoinedRoom> {
        if room_id.is_empty() || peer_id.is_empty() {
            return Err(SessionError::InvalidRequest(
                "roomId and peerId must not be empty".to_string(),
            ));
        }

        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        {
            let mut index = self.peer_rooms.write().await;
            if let Some(existing) = index.get(peer_id) {
                return Err(SessionError::InvalidRequest(format!(
                    "peer {} is already in room {}",
                    peer_id, existing.room_id
                )));
            }
            index.insert(
                peer_id.to_string(),
                Reservation {
                    room_id: room_id.to_string(),
                    token,
                },
            );
        }

        match self.join_reserved(room_id, peer_id, role, token).await {
            Ok(joined) => Ok(joined),
            Err(err) => {
                self.release_reservation(peer_id, token).await;
                tracing::warn!("Peer {} failed to join room {}: {}", peer_id, room_id, err);
                Err(err)
            }
        }
    }

    async fn join_reserved(
        &self,
        room_id: &str,
        peer_id: &str,
        role: Role,
        token: u64,
    ) -> SessionResult<JoinedRoom> {
        let room = loop {
            let room = self.get_or_create_room(room_id).await?;
            match self.admit(&room, peer_id, role, token).await {
                Admission::Admitted => break room,
                // Emptied and removed between lookup and admission
                Admission::RoomClosed => continue,
                Admission::Rejected(err) => {
                    self.remove_room_if_empty(room_id).await;
                    return Err(err);
                }
            }
        };

        let transports = match self.create_peer_transports(&room, peer_id, role).await {
            Ok(transports) => transports,
            Err(err) => {
                self.evict(&room, peer_id).await;
                return Err(err);
            }
        };

        let committed = {
            let mut state = room.write().await;
            let still_reserved = self.reservation_valid(peer_id, token).await;

            match state.peer_mut(peer_id) {
                Some(peer) if still_reserved => {
                    if let Some(send) = &transports.send {
                        peer.add_transport(send.clone(), TransportDirection::Send);
                    }
                    peer.add_transport(transports.recv.clone(), TransportDirection::Recv);

                    Some(JoinedRoom {
                        send_transport_options: transports.send.as_ref().map(|t| t.options()),
                        recv_transport_options: transports.recv.options(),
                        rtp_capabilities: room.router().rtp_capabilities(),
                        peer_ids: state.other_peer_ids(peer_id),
                        existing_producers: state.producer_list(),
                        viewers: state.viewer_ids(),
                    })
                }
                _ => None,
            }
        };

        let Some(joined) = committed else {
            transports.close();
            self.evict(&room, peer_id).await;
            return Err(SessionError::NotFound(format!(
                "peer {} left room {} while joining",
                peer_id, room_id
            )));
        };

        self.notifier
            .broadcast(
                &joined.peer_ids,
                &ServerMessage::NewPeer {
                    peer_id: peer_id.to_string(),
                },
            )
            .await;

        // The joiner gets its copy of the viewer list after `room-joined`
        self.notifier
            .broadcast(
                &joined.peer_ids,
                &ServerMessage::ViewersUpdated {
                    viewers: joined.viewers.clone(),
                },
            )
            .await;

        tracing::info!(
            "Peer {} joined room {} as {:?} ({} other peer(s), {} producer(s) to replay)",
            peer_id,
            room_id,
            role,
            joined.peer_ids.len(),
            joined.existing_producers.len()
        );

        Ok(joined)
    }

    async fn admit(&self, room: &Room, peer_id: &str, role: Role, token: u64) -> Admission {
        let mut state = room.write().await;

        if state.is_closed() {
            return Admission::RoomClosed;
        }

        if !self.reservation_valid(peer_id, token).await {
            return Admission::Rejected(SessionError::NotFound(format!(
                "peer {} left before joining room {}",
                peer_id, room.id
            )));
        }

        if state.contains(peer_id) {
            return Admission::Rejected(SessionError::InvalidRequest(format!(
                "peer {} is already in room {}",
                peer_id, room.id
            )));
        }

        if role.is_host() {
            if let Some(host) = state.host_peer_id() {
                return Admission::Rejected(SessionError::InvalidRequest(format!(
                    "room {} already has host {}",
                    room.id, host
                )));
            }
        }

        state.add_peer(Peer::new(peer_id, role), role.is_host());
        Admission::Admitted
    }

    async fn create_peer_transports(
        &self,
        room: &Room,
        peer_id: &str,
        role: Role,
    ) -> SessionResult<PeerTransports> {
        let router = room.router();

        let send = if role.is_host() {
            let transport = router
                .create_webrtc_transport(self.transport_settings(peer_id, TransportDirection::Send))
                .await?;
            Some(transport)
        } else {
            None
        };

        let recv = match router
            .create_webrtc_transport(self.transport_settings(peer_id, TransportDirection::Recv))
            .await
        {
            Ok(recv) => recv,
            Err(err) => {
                if let Some(send) = &send {
                    send.close();
                }
                return Err(err.into());
            }
        };

        Ok(PeerTransports { send, recv })
    }

    fn transport_settings(&self, peer_id: &str, direction: TransportDirection) -> WebRtcTransportSettings {
        WebRtcTransportSettings {
            listen_ips: self.settings.listen_ips.clone(),
            enable_udp: self.settings.enable_udp,
            enable_tcp: self.settings.enable_tcp,
            prefer_udp: self.settings.prefer_udp,
            peer_id: peer_id.to_string(),
            direction,
        }
    }

    /// Roll back a partial join: drop the peer without notifying anyone
    async fn evict(&self, room: &Room, peer_id: &str) {
        {
            let mut state = room.write().await;
            if let Some(mut peer) = state.remove_peer(peer_id) {
                peer.close();
            }
        }
        self.remove_room_if_empty(&room.id).await;
    }

    /// Complete the DTLS handshake of one of the peer's transports
    pub async fn connect_transport(
        &self,
        room_id: &str,
        peer_id: &str,
        transport_id: &str,
        dtls_parameters: DtlsParameters,
    ) -> SessionResult<()> {
        let room = self.room(room_id).await?;

        let transport = {
            let state = room.read().await;
            let peer = state
                .peer(peer_id)
                .ok_or_else(|| SessionError::NotFound(format!("peer {}", peer_id)))?;
            let transport = peer
                .transport(transport_id)
                .ok_or_else(|| SessionError::NotFound(format!("transport {}", transport_id)))?;

            if transport.connected {
                return Err(SessionError::InvalidRequest(format!(
                    "transport {} is already connected",
                    transport_id
                )));
            }
            transport.handle.clone()
        };

        transport.connect(dtls_parameters).await?;

        let mut state = room.write().await;
        if let Some(peer) = state.peer_mut(peer_id) {
            peer.mark_connected(transport_id);
        }

        tracing::debug!("Transport {} of peer {} connected", transport_id, peer_id);
        Ok(())
    }

    /// Publish a stream on the peer's connected send transport, returns the producer id
    pub async fn produce(
        &self,
        room_id: &str,
        peer_id: &str,
        transport_id: &str,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> SessionResult<String> {
        let room = self.room(room_id).await?;

        let transport = {
            let state = room.read().await;
            let peer = state
                .peer(peer_id)
                .ok_or_else(|| SessionError::NotFound(format!("peer {}", peer_id)))?;
            let transport = peer
                .transport(transport_id)
                .ok_or_else(|| SessionError::NotFound(format!("transport {}", transport_id)))?;

            if transport.direction != TransportDirection::Send {
                return Err(SessionError::InvalidRequest(format!(
                    "transport {} is not a send transport",
                    transport_id
                )));
            }
            if !transport.connected {
                return Err(SessionError::InvalidRequest(format!(
                    "transport {} is not connected",
                    transport_id
                )));
            }
            transport.handle.clone()
        };

        let options = match kind {
            MediaKind::Video => ProduceOptions {
                kind,
                rtp_parameters,
                encodings: self.settings.video_encodings.clone(),
                codec_options: CodecOptions {
                    video_google_start_bitrate: self.settings.video_start_bitrate,
                },
            },
            MediaKind::Audio => ProduceOptions {
                kind,
                rtp_parameters,
                encodings: Vec::new(),
                codec_options: CodecOptions::default(),
            },
        };

        let producer = match transport.produce(options).await {
            Ok(producer) => producer,
            // Leaving closes the transport under a pending produce
            Err(_) if !room.read().await.contains(peer_id) => {
                return Err(SessionError::NotFound(format!("peer {}", peer_id)));
            }
            Err(err) => return Err(err.into()),
        };
        let producer_id = producer.id().to_string();

        // The peer may have left while the engine was working
        let recipients = {
            let mut state = room.write().await;
            let transport_alive = state
                .peer(peer_id)
                .and_then(|p| p.transport(transport_id))
                .is_some_and(|t| !t.handle.closed());

            match state.peer_mut(peer_id) {
                Some(peer) if transport_alive => {
                    peer.add_producer(producer.clone());
                    Some(state.other_peer_ids(peer_id))
                }
                _ => None,
            }
        };

        let Some(recipients) = recipients else {
            producer.close();
            return Err(SessionError::NotFound(format!(
                "peer {} left room {} before its producer was registered",
                peer_id, room_id
            )));
        };

        self.notifier
            .broadcast(
                &recipients,
                &ServerMessage::NewProducer {
                    producer_id: producer_id.clone(),
                    peer_id: peer_id.to_string(),
                    kind,
                },
            )
            .await;

        tracing::info!(
            "Peer {} in room {} produced {} {}",
            peer_id,
            room_id,
            kind,
            producer_id
        );

        Ok(producer_id)
    }

    /// Subscribe `peer_id` to `producer_id` over its connected recv transport
    pub async fn consume(
        &self,
        room_id: &str,
        peer_id: &str,
        producer_id: &str,
        rtp_capabilities: RtpCapabilities,
        transport_id: &str,
    ) -> SessionResult<ConsumerData> {
        let room = self.room(room_id).await?;

        let (transport, kind) = {
            let state = room.read().await;

            let (_, producer) = state
                .find_producer(producer_id)
                .filter(|(_, p)| !p.closed())
                .ok_or_else(|| SessionError::NotFound(format!("producer {}", producer_id)))?;
            let kind = producer.kind();

            let peer = state
                .peer(peer_id)
                .ok_or_else(|| SessionError::NotFound(format!("peer {}", peer_id)))?;

            if peer.has_consumer_for(producer_id, kind) {
                return Err(SessionError::InvalidRequest(format!(
                    "peer {} already consumes {} producer {}",
                    peer_id, kind, producer_id
                )));
            }

            if !room.router().can_consume(producer_id, &rtp_capabilities) {
                return Err(SessionError::Incompatible(format!(
                    "capabilities of peer {} cannot receive producer {}",
                    peer_id, producer_id
                )));
            }

            let transport = peer
                .transport(transport_id)
                .filter(|t| t.direction == TransportDirection::Recv && t.connected)
                .ok_or_else(|| {
                    SessionError::NotFound(format!("connected recv transport {}", transport_id))
                })?;

            (transport.handle.clone(), kind)
        };

        let consumer = transport
            .consume(ConsumeOptions {
                producer_id: producer_id.to_string(),
                rtp_capabilities,
                paused: false,
            })
            .await?;

        let registered = {
            let mut state = room.write().await;
            let producer_alive = state
                .find_producer(producer_id)
                .is_some_and(|(_, p)| !p.closed());

            match state.peer_mut(peer_id) {
                None => Err(SessionError::NotFound(format!("peer {}", peer_id))),
                Some(_) if !producer_alive || consumer.closed() => {
                    Err(SessionError::NotFound(format!("producer {}", producer_id)))
                }
                Some(peer) if peer.has_consumer_for(producer_id, kind) => {
                    Err(SessionError::InvalidRequest(format!(
                        "peer {} already consumes {} producer {}",
                        peer_id, kind, producer_id
                    )))
                }
                Some(peer) => {
                    peer.add_consumer(consumer.clone());
                    Ok(())
                }
            }
        };

        if let Err(err) = registered {
            consumer.close();
            return Err(err);
        }

        tracing::debug!(
            "Peer {} consumes producer {} via consumer {}",
            peer_id,
            producer_id,
            consumer.id()
        );

        Ok(ConsumerData {
            id: consumer.id().to_string(),
            producer_id: producer_id.to_string(),
            kind,
            rtp_parameters: consumer.rtp_parameters(),
            consumer_type: consumer.consumer_type(),
            producer_paused: consumer.producer_paused(),
        })
    }

    /// Close every producer of the peer, keeping it in the room. Returns the closed ids.
    pub async fn stop_camera(&self, room_id: &str, peer_id: &str) -> SessionResult<Vec<String>> {
        let room = self.room(room_id).await?;

        let (closed, recipients) = {
            let mut state = room.write().await;
            let peer = state
                .peer_mut(peer_id)
                .ok_or_else(|| SessionError::NotFound(format!("peer {}", peer_id)))?;

            let producers = peer.take_producers();
            let mut closed: Vec<String> = producers.iter().map(|p| p.id().to_string()).collect();
            closed.sort();
            for producer in &producers {
                producer.close();
            }

            state.detach_consumers(&closed);
            (closed, state.other_peer_ids(peer_id))
        };

        for producer_id in &closed {
            self.notifier
                .broadcast(
                    &recipients,
                    &ServerMessage::ProducerClosed {
                        producer_id: producer_id.clone(),
                        peer_id: peer_id.to_string(),
                    },
                )
                .await;
        }

        tracing::info!(
            "Peer {} in room {} stopped {} producer(s)",
            peer_id,
            room_id,
            closed.len()
        );

        Ok(closed)
    }

    /// Remove the peer from whatever room holds it.
    ///
    /// Shared by explicit leave and disconnect. Returns the room the peer left, or `None`
    /// when the peer was not in any room. Concurrent calls for one peer notify the room
    /// exactly once because only the caller that takes the index entry proceeds.
    pub async fn leave(&self, peer_id: &str) -> Option<String> {
        let reservation = self.peer_rooms.write().await.remove(peer_id)?;
        let room_id = reservation.room_id;
        let room = self.get_room(&room_id).await?;

        let (announced, closed_producers, remaining, viewers, empty) = {
            let mut state = room.write().await;
            // A join still waiting for admission finds its reservation gone and backs out
            let mut peer = state.remove_peer(peer_id)?;

            // Transports are attached when the join commits; before that nobody saw `new-peer`
            let announced = peer.transport_count() > 0;

            let mut closed_producers = peer.producer_ids();
            closed_producers.sort();
            peer.close();
            state.detach_consumers(&closed_producers);

            (
                announced,
                closed_producers,
                state.peer_ids(),
                state.viewer_ids(),
                state.is_empty(),
            )
        };

        if !announced {
            tracing::info!("Peer {} left room {} before its join completed", peer_id, room_id);
            if empty {
                self.remove_room_if_empty(&room_id).await;
            }
            return Some(room_id);
        }

        for producer_id in &closed_producers {
            self.notifier
                .broadcast(
                    &remaining,
                    &ServerMessage::ProducerClosed {
                        producer_id: producer_id.clone(),
                        peer_id: peer_id.to_string(),
                    },
                )
                .await;
        }

        self.notifier
            .broadcast(
                &remaining,
                &ServerMessage::PeerLeft {
                    peer_id: peer_id.to_string(),
                },
            )
            .await;
        self.notifier
            .broadcast(&remaining, &ServerMessage::ViewersUpdated { viewers })
            .await;

        tracing::info!("Peer {} left room {}", peer_id, room_id);

        if empty {
            self.remove_room_if_empty(&room_id).await;
        }

        Some(room_id)
    }

    /// Close every room and release every router. The manager is unusable afterwards.
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = self
            .rooms
            .write()
            .await
            .drain()
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect();
        self.peer_rooms.write().await.clear();

        for room in &rooms {
            room.write().await.close_all();
            self.pool.release(room.lease());
        }

        self.pool.close();
        tracing::info!("Session manager shut down, {} room(s) closed", rooms.len());
    }
}
