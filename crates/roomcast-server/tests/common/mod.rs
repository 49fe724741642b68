//! Shared fixtures for the server integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use roomcast_protocol::{
    DtlsFingerprint, DtlsParameters, DtlsRole, MediaKind, Role, RtpCapabilities,
    RtpCodecCapability, RtpCodecParameters, RtpEncodingParameters, RtpParameters, ServerMessage,
    TransportDirection, TransportOptions,
};
use roomcast_server::engine::{
    ConsumeOptions, Consumer, EngineError, EngineResult, InProcessEngine, MediaEngine,
    ProduceOptions, Producer, Router, WebRtcTransport, WebRtcTransportSettings, Worker,
};
use roomcast_server::sfu::{MediaSettings, Notifier, RoundRobin, SessionManager, WorkerPool};
use roomcast_server::state::default_media_codecs;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Notifier that keeps every delivery for later inspection
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, ServerMessage)>>,
}

impl RecordingNotifier {
    pub fn messages_for(&self, peer_id: &str) -> Vec<ServerMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == peer_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_to_peer(&self, peer_id: &str, message: &ServerMessage) {
        self.sent
            .lock()
            .unwrap()
            .push((peer_id.to_string(), message.clone()));
    }
}

/// Switches read by the faulty engine wrappers
#[derive(Default)]
pub struct Faults {
    pub fail_recv_transport: AtomicBool,
    /// Park the next router creation until released
    pub hold_router: AtomicBool,
    pub router_entered: Notify,
    pub router_release: Notify,
    /// Park the next transport creation until released
    pub hold_transport: AtomicBool,
    pub transport_entered: Notify,
    pub transport_release: Notify,
    pub hold_produce: AtomicBool,
    /// Signalled once a held produce has finished its engine work
    pub produce_entered: Notify,
    pub produce_release: Notify,
    pub transports: Mutex<Vec<Arc<dyn WebRtcTransport>>>,
    pub producers: Mutex<Vec<Arc<dyn Producer>>>,
}

/// In-process engine whose routers and transports misbehave on demand
pub struct FaultyEngine {
    inner: InProcessEngine,
    pub faults: Arc<Faults>,
}

impl FaultyEngine {
    pub fn new() -> Self {
        Self {
            inner: InProcessEngine::default(),
            faults: Arc::new(Faults::default()),
        }
    }
}

#[async_trait]
impl MediaEngine for FaultyEngine {
    async fn create_worker(&self, index: usize) -> EngineResult<Arc<dyn Worker>> {
        let inner = self.inner.create_worker(index).await?;
        Ok(Arc::new(FaultyWorker {
            inner,
            faults: self.faults.clone(),
        }))
    }
}

struct FaultyWorker {
    inner: Arc<dyn Worker>,
    faults: Arc<Faults>,
}

#[async_trait]
impl Worker for FaultyWorker {
    fn index(&self) -> usize {
        self.inner.index()
    }

    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> EngineResult<Arc<dyn Router>> {
        let inner = self.inner.create_router(media_codecs).await?;

        if self.faults.hold_router.swap(false, Ordering::SeqCst) {
            self.faults.router_entered.notify_one();
            self.faults.router_release.notified().await;
        }

        Ok(Arc::new(FaultyRouter {
            inner,
            faults: self.faults.clone(),
        }))
    }

    fn close(&self) {
        self.inner.close()
    }

    fn closed(&self) -> bool {
        self.inner.closed()
    }
}

struct FaultyRouter {
    inner: Arc<dyn Router>,
    faults: Arc<Faults>,
}

#[async_trait]
impl Router for FaultyRouter {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.inner.rtp_capabilities()
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        self.inner.can_consume(producer_id, rtp_capabilities)
    }

    async fn create_webrtc_transport(
        &self,
        settings: WebRtcTransportSettings,
    ) -> EngineResult<Arc<dyn WebRtcTransport>> {
        if settings.direction == TransportDirection::Recv
            && self.faults.fail_recv_transport.load(Ordering::SeqCst)
        {
            return Err(EngineError::PortsExhausted);
        }

        let inner = self.inner.create_webrtc_transport(settings).await?;
        let transport: Arc<dyn WebRtcTransport> = Arc::new(GatedTransport {
            inner,
            faults: self.faults.clone(),
        });
        self.faults.transports.lock().unwrap().push(transport.clone());

        if self.faults.hold_transport.swap(false, Ordering::SeqCst) {
            self.faults.transport_entered.notify_one();
            self.faults.transport_release.notified().await;
        }

        Ok(transport)
    }

    fn close(&self) {
        self.inner.close()
    }

    fn closed(&self) -> bool {
        self.inner.closed()
    }
}

struct GatedTransport {
    inner: Arc<dyn WebRtcTransport>,
    faults: Arc<Faults>,
}

#[async_trait]
impl WebRtcTransport for GatedTransport {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn options(&self) -> TransportOptions {
        self.inner.options()
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> EngineResult<()> {
        self.inner.connect(dtls_parameters).await
    }

    async fn produce(&self, options: ProduceOptions) -> EngineResult<Arc<dyn Producer>> {
        let producer = self.inner.produce(options).await?;
        self.faults.producers.lock().unwrap().push(producer.clone());

        if self.faults.hold_produce.load(Ordering::SeqCst) {
            self.faults.produce_entered.notify_one();
            self.faults.produce_release.notified().await;
        }

        Ok(producer)
    }

    async fn consume(&self, options: ConsumeOptions) -> EngineResult<Arc<dyn Consumer>> {
        self.inner.consume(options).await
    }

    fn close(&self) {
        self.inner.close()
    }

    fn closed(&self) -> bool {
        self.inner.closed()
    }
}

pub async fn manager_on(
    engine: &dyn MediaEngine,
    workers: usize,
) -> (Arc<SessionManager>, Arc<RecordingNotifier>) {
    let pool = WorkerPool::new(
        engine,
        workers,
        Box::new(RoundRobin::default()),
        default_media_codecs(),
    )
    .await
    .unwrap();

    let notifier = Arc::new(RecordingNotifier::default());
    let manager = Arc::new(SessionManager::new(
        Arc::new(pool),
        notifier.clone(),
        MediaSettings::default(),
    ));

    (manager, notifier)
}

pub async fn manager() -> (Arc<SessionManager>, Arc<RecordingNotifier>) {
    manager_on(&InProcessEngine::default(), 1).await
}

pub fn dtls() -> DtlsParameters {
    DtlsParameters {
        role: DtlsRole::Client,
        fingerprints: vec![DtlsFingerprint {
            algorithm: "sha-256".to_string(),
            value: "82:5A:68:3D:36:C3:0A:DE:AF:E7:32:43:D2:88:83:57".to_string(),
        }],
    }
}

pub fn codec_parameters(mime_type: &str, payload_type: u8, clock_rate: u32) -> RtpParameters {
    RtpParameters {
        mid: Some("0".to_string()),
        codecs: vec![RtpCodecParameters {
            mime_type: mime_type.to_string(),
            payload_type,
            clock_rate,
            channels: if mime_type.starts_with("audio") { Some(2) } else { None },
            parameters: BTreeMap::new(),
        }],
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(1111),
            ..Default::default()
        }],
    }
}

pub fn vp8_parameters() -> RtpParameters {
    codec_parameters("video/VP8", 96, 90000)
}

pub fn opus_parameters() -> RtpParameters {
    codec_parameters("audio/opus", 111, 48000)
}

/// What a browser supporting every default codec would send
pub fn client_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: default_media_codecs(),
    }
}

pub fn audio_only_capabilities() -> RtpCapabilities {
    RtpCapabilities {
        codecs: default_media_codecs()
            .into_iter()
            .filter(|c| c.kind == MediaKind::Audio)
            .collect(),
    }
}

/// Join as host, connect the send transport and publish one video stream
pub async fn host_with_video(
    manager: &SessionManager,
    room_id: &str,
    host_id: &str,
) -> (TransportOptions, String) {
    let joined = manager
        .join(room_id, host_id, Role::Host)
        .await
        .unwrap();
    let send = joined.send_transport_options.unwrap();

    manager
        .connect_transport(room_id, host_id, &send.id, dtls())
        .await
        .unwrap();
    let producer_id = manager
        .produce(room_id, host_id, &send.id, MediaKind::Video, vp8_parameters())
        .await
        .unwrap();

    (send, producer_id)
}

/// Join as viewer and connect the recv transport, returning its id
pub async fn connected_viewer(manager: &SessionManager, room_id: &str, viewer_id: &str) -> String {
    let joined = manager
        .join(room_id, viewer_id, Role::Viewer)
        .await
        .unwrap();
    let recv = joined.recv_transport_options;

    manager
        .connect_transport(room_id, viewer_id, &recv.id, dtls())
        .await
        .unwrap();

    recv.id
}
