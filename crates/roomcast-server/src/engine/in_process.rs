//! In-process media engine
//!
//! Performs the bookkeeping of a real SFU worker (routers, transports, producers,
//! consumers, capability negotiation, port allocation) without moving any media.
//! Used by the server binary by default and by the test suites.

use super::{
    ConsumeOptions, Consumer, EngineError, EngineResult, MediaEngine, ProduceOptions, Producer,
    Router, WebRtcTransport, WebRtcTransportSettings, Worker,
};
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use roomcast_protocol::{
    ConsumerType, DtlsFingerprint, DtlsParameters, DtlsRole, IceCandidate, IceParameters,
    IceProtocol, MediaKind, RtpCapabilities, RtpCodecCapability, RtpCodecParameters,
    RtpEncodingParameters, RtpParameters, TransportOptions,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use uuid::Uuid;

const FIRST_DYNAMIC_PAYLOAD_TYPE: u8 = 100;
const UDP_PRIORITY: u32 = 1_076_302_079;
const TCP_PRIORITY: u32 = 1_076_276_479;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_fingerprint() -> String {
    let bytes: [u8; 32] = rand::thread_rng().r#gen();
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Hands out transport ports from a fixed range
struct PortAllocator {
    min: u16,
    max: u16,
    state: Mutex<PortState>,
}

struct PortState {
    next: u16,
    in_use: HashSet<u16>,
}

impl PortAllocator {
    fn new(min: u16, max: u16) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            state: Mutex::new(PortState {
                next: min,
                in_use: HashSet::new(),
            }),
        }
    }

    fn allocate(&self) -> EngineResult<u16> {
        let mut state = lock(&self.state);
        let span = u32::from(self.max - self.min) + 1;

        for _ in 0..span {
            let candidate = state.next;
            state.next = if candidate >= self.max {
                self.min
            } else {
                candidate + 1
            };

            if state.in_use.insert(candidate) {
                return Ok(candidate);
            }
        }

        Err(EngineError::PortsExhausted)
    }

    fn release(&self, port: u16) {
        lock(&self.state).in_use.remove(&port);
    }
}

/// Engine whose workers live inside the current process
pub struct InProcessEngine {
    ports: Arc<PortAllocator>,
}

impl InProcessEngine {
    pub fn new(port_range: (u16, u16)) -> Self {
        Self {
            ports: Arc::new(PortAllocator::new(port_range.0, port_range.1)),
        }
    }
}

impl Default for InProcessEngine {
    fn default() -> Self {
        Self::new((40000, 49999))
    }
}

#[async_trait]
impl MediaEngine for InProcessEngine {
    async fn create_worker(&self, index: usize) -> EngineResult<Arc<dyn Worker>> {
        tokio::task::yield_now().await;

        tracing::debug!("Started in-process media worker {}", index);

        Ok(Arc::new(LocalWorker {
            index,
            ports: self.ports.clone(),
            closed: AtomicBool::new(false),
            routers: Mutex::new(Vec::new()),
        }))
    }
}

struct LocalWorker {
    index: usize,
    ports: Arc<PortAllocator>,
    closed: AtomicBool,
    routers: Mutex<Vec<Weak<LocalRouter>>>,
}

#[async_trait]
impl Worker for LocalWorker {
    fn index(&self) -> usize {
        self.index
    }

    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> EngineResult<Arc<dyn Router>> {
        tokio::task::yield_now().await;

        if self.closed() {
            return Err(EngineError::WorkerClosed(self.index));
        }

        if media_codecs.is_empty() {
            return Err(EngineError::InvalidParameters(
                "router needs at least one media codec".to_string(),
            ));
        }

        let mut codecs = Vec::with_capacity(media_codecs.len());
        for (position, codec) in media_codecs.iter().enumerate() {
            if MediaKind::from_mime_type(&codec.mime_type) != Some(codec.kind) {
                return Err(EngineError::UnsupportedCodec(codec.mime_type.clone()));
            }

            let fallback = FIRST_DYNAMIC_PAYLOAD_TYPE.saturating_add(position as u8);
            codecs.push(RtpCodecCapability {
                preferred_payload_type: codec.preferred_payload_type.or(Some(fallback)),
                ..codec.clone()
            });
        }

        let router = Arc::new(LocalRouter {
            shared: Arc::new(RouterShared {
                id: Uuid::new_v4().to_string(),
                capabilities: RtpCapabilities { codecs },
                producers: Mutex::new(HashMap::new()),
            }),
            ports: self.ports.clone(),
            closed: AtomicBool::new(false),
            transports: Mutex::new(Vec::new()),
        });

        let mut routers = lock(&self.routers);
        routers.retain(|r| r.strong_count() > 0);
        routers.push(Arc::downgrade(&router));

        Ok(router)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let routers: Vec<_> = lock(&self.routers).drain(..).collect();
        for router in routers.iter().filter_map(Weak::upgrade) {
            router.close();
        }

        tracing::debug!("Closed in-process media worker {}", self.index);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Router state reachable from its transports
struct RouterShared {
    id: String,
    capabilities: RtpCapabilities,
    producers: Mutex<HashMap<String, Arc<LocalProducer>>>,
}

impl RouterShared {
    fn supports(&self, codec: &RtpCodecParameters) -> bool {
        self.capabilities
            .codecs
            .iter()
            .any(|c| c.matches(&codec.mime_type, codec.clock_rate))
    }
}

struct LocalRouter {
    shared: Arc<RouterShared>,
    ports: Arc<PortAllocator>,
    closed: AtomicBool,
    transports: Mutex<Vec<Arc<LocalTransport>>>,
}

#[async_trait]
impl Router for LocalRouter {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn rtp_capabilities(&self) -> RtpCapabilities {
        self.shared.capabilities.clone()
    }

    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool {
        let producers = lock(&self.shared.producers);
        let Some(producer) = producers.get(producer_id) else {
            return false;
        };

        match producer.rtp_parameters.codecs.first() {
            Some(codec) => rtp_capabilities
                .codecs
                .iter()
                .any(|c| c.matches(&codec.mime_type, codec.clock_rate)),
            None => false,
        }
    }

    async fn create_webrtc_transport(
        &self,
        settings: WebRtcTransportSettings,
    ) -> EngineResult<Arc<dyn WebRtcTransport>> {
        tokio::task::yield_now().await;

        if self.closed() {
            return Err(EngineError::RouterClosed(self.shared.id.clone()));
        }

        if settings.listen_ips.is_empty() || !(settings.enable_udp || settings.enable_tcp) {
            return Err(EngineError::InvalidParameters(
                "transport needs a listen address and at least one protocol".to_string(),
            ));
        }

        let port = self.ports.allocate()?;
        let id = Uuid::new_v4().to_string();

        let mut protocols = Vec::new();
        if settings.enable_udp {
            protocols.push(IceProtocol::Udp);
        }
        if settings.enable_tcp {
            protocols.push(IceProtocol::Tcp);
        }
        if !settings.prefer_udp {
            protocols.reverse();
        }

        let mut ice_candidates = Vec::new();
        for listen_ip in &settings.listen_ips {
            let ip = listen_ip
                .announced_ip
                .clone()
                .unwrap_or_else(|| listen_ip.ip.clone());

            for (rank, protocol) in protocols.iter().enumerate() {
                let (foundation, tcp_type) = match protocol {
                    IceProtocol::Udp => ("udpcandidate", None),
                    IceProtocol::Tcp => ("tcpcandidate", Some("passive".to_string())),
                };
                let priority = if rank == 0 { UDP_PRIORITY } else { TCP_PRIORITY };

                ice_candidates.push(IceCandidate {
                    foundation: foundation.to_string(),
                    priority,
                    ip: ip.clone(),
                    port,
                    protocol: *protocol,
                    candidate_type: "host".to_string(),
                    tcp_type,
                });
            }
        }

        let options = TransportOptions {
            id: id.clone(),
            ice_parameters: IceParameters {
                username_fragment: random_token(16),
                password: random_token(32),
                ice_lite: true,
            },
            ice_candidates,
            dtls_parameters: DtlsParameters {
                role: DtlsRole::Auto,
                fingerprints: vec![DtlsFingerprint {
                    algorithm: "sha-256".to_string(),
                    value: random_fingerprint(),
                }],
            },
        };

        let transport = Arc::new(LocalTransport {
            id,
            router: self.shared.clone(),
            options,
            port,
            ports: self.ports.clone(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
            next_mid: AtomicU32::new(0),
        });

        tracing::debug!(
            "Created {} transport {} for peer {} on port {}",
            settings.direction,
            transport.id,
            settings.peer_id,
            port
        );

        let mut transports = lock(&self.transports);
        transports.retain(|t| !t.closed());
        transports.push(transport.clone());

        Ok(transport)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let transports: Vec<_> = lock(&self.transports).drain(..).collect();
        for transport in transports {
            transport.close();
        }

        lock(&self.shared.producers).clear();
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct LocalTransport {
    id: String,
    router: Arc<RouterShared>,
    options: TransportOptions,
    port: u16,
    ports: Arc<PortAllocator>,
    connected: AtomicBool,
    closed: AtomicBool,
    producers: Mutex<Vec<Arc<LocalProducer>>>,
    consumers: Mutex<Vec<Arc<LocalConsumer>>>,
    next_mid: AtomicU32,
}

impl LocalTransport {
    fn ensure_usable(&self) -> EngineResult<()> {
        if self.closed() {
            return Err(EngineError::TransportClosed(self.id.clone()));
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(EngineError::NotConnected(self.id.clone()));
        }
        Ok(())
    }
}

/// Merge the bitrate ladder into the client's encodings
fn apply_encodings(
    mut rtp_parameters: RtpParameters,
    ladder: &[RtpEncodingParameters],
) -> RtpParameters {
    for (layer, step) in ladder.iter().enumerate() {
        match rtp_parameters.encodings.get_mut(layer) {
            Some(encoding) => {
                if step.max_bitrate.is_some() {
                    encoding.max_bitrate = step.max_bitrate;
                }
            }
            None => rtp_parameters.encodings.push(RtpEncodingParameters {
                rid: step.rid.clone().or_else(|| Some(format!("r{}", layer))),
                ..step.clone()
            }),
        }
    }

    rtp_parameters
}

fn consumer_parameters(
    producer: &RtpParameters,
    capabilities: &RtpCapabilities,
    mid: u32,
) -> Option<RtpParameters> {
    let codecs: Vec<RtpCodecParameters> = producer
        .codecs
        .iter()
        .filter_map(|codec| {
            capabilities
                .codecs
                .iter()
                .find(|c| c.matches(&codec.mime_type, codec.clock_rate))
                .map(|cap| RtpCodecParameters {
                    payload_type: cap.preferred_payload_type.unwrap_or(codec.payload_type),
                    ..codec.clone()
                })
        })
        .collect();

    if codecs.is_empty() {
        return None;
    }

    let max_bitrate = producer.encodings.iter().filter_map(|e| e.max_bitrate).max();

    Some(RtpParameters {
        mid: Some(mid.to_string()),
        codecs,
        encodings: vec![RtpEncodingParameters {
            ssrc: Some(rand::thread_rng().r#gen()),
            rid: None,
            max_bitrate,
        }],
    })
}

#[async_trait]
impl WebRtcTransport for LocalTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn options(&self) -> TransportOptions {
        self.options.clone()
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> EngineResult<()> {
        tokio::task::yield_now().await;

        if self.closed() {
            return Err(EngineError::TransportClosed(self.id.clone()));
        }

        if dtls_parameters.fingerprints.is_empty() {
            return Err(EngineError::InvalidParameters(
                "DTLS parameters carry no fingerprint".to_string(),
            ));
        }

        if self
            .connected
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::AlreadyConnected(self.id.clone()));
        }

        Ok(())
    }

    async fn produce(&self, options: ProduceOptions) -> EngineResult<Arc<dyn Producer>> {
        tokio::task::yield_now().await;
        self.ensure_usable()?;

        let primary = options.rtp_parameters.codecs.first().ok_or_else(|| {
            EngineError::InvalidParameters("RTP parameters carry no codec".to_string())
        })?;

        if MediaKind::from_mime_type(&primary.mime_type) != Some(options.kind) {
            return Err(EngineError::InvalidParameters(format!(
                "codec {} does not carry {}",
                primary.mime_type, options.kind
            )));
        }

        if !self.router.supports(primary) {
            return Err(EngineError::UnsupportedCodec(primary.mime_type.clone()));
        }

        let mut rtp_parameters = apply_encodings(options.rtp_parameters, &options.encodings);
        if let (MediaKind::Video, Some(start_bitrate)) =
            (options.kind, options.codec_options.video_google_start_bitrate)
        {
            if let Some(codec) = rtp_parameters.codecs.first_mut() {
                codec
                    .parameters
                    .insert("x-google-start-bitrate".to_string(), start_bitrate.into());
            }
        }

        let producer = Arc::new(LocalProducer {
            id: Uuid::new_v4().to_string(),
            kind: options.kind,
            rtp_parameters,
            paused: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            router: Arc::downgrade(&self.router),
            consumers: Mutex::new(Vec::new()),
        });

        lock(&self.router.producers).insert(producer.id.clone(), producer.clone());
        lock(&self.producers).push(producer.clone());

        Ok(producer)
    }

    async fn consume(&self, options: ConsumeOptions) -> EngineResult<Arc<dyn Consumer>> {
        tokio::task::yield_now().await;
        self.ensure_usable()?;

        let producer = lock(&self.router.producers)
            .get(&options.producer_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownProducer(options.producer_id.clone()))?;

        let mid = self.next_mid.fetch_add(1, Ordering::SeqCst);
        let rtp_parameters =
            consumer_parameters(&producer.rtp_parameters, &options.rtp_capabilities, mid)
                .ok_or_else(|| EngineError::CannotConsume(options.producer_id.clone()))?;

        let consumer_type = if producer.rtp_parameters.encodings.len() > 1 {
            ConsumerType::Simulcast
        } else {
            ConsumerType::Simple
        };

        let consumer = Arc::new(LocalConsumer {
            id: Uuid::new_v4().to_string(),
            producer: producer.clone(),
            rtp_parameters,
            consumer_type,
            paused: AtomicBool::new(options.paused),
            closed: AtomicBool::new(false),
        });

        lock(&producer.consumers).push(Arc::downgrade(&consumer));
        lock(&self.consumers).push(consumer.clone());

        // The producer may have closed while we were negotiating
        if producer.closed() {
            consumer.close();
            return Err(EngineError::UnknownProducer(options.producer_id));
        }

        Ok(consumer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let producers: Vec<_> = lock(&self.producers).drain(..).collect();
        for producer in producers {
            producer.close();
        }

        let consumers: Vec<_> = lock(&self.consumers).drain(..).collect();
        for consumer in consumers {
            consumer.close();
        }

        self.ports.release(self.port);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct LocalProducer {
    id: String,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    closed: AtomicBool,
    router: Weak<RouterShared>,
    consumers: Mutex<Vec<Weak<LocalConsumer>>>,
}

impl Producer for LocalProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(router) = self.router.upgrade() {
            lock(&router.producers).remove(&self.id);
        }

        let consumers: Vec<_> = lock(&self.consumers).drain(..).collect();
        for consumer in consumers.iter().filter_map(Weak::upgrade) {
            consumer.close();
        }
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct LocalConsumer {
    id: String,
    producer: Arc<LocalProducer>,
    rtp_parameters: RtpParameters,
    consumer_type: ConsumerType,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl Consumer for LocalConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer.id
    }

    fn kind(&self) -> MediaKind {
        self.producer.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn consumer_type(&self) -> ConsumerType {
        self.consumer_type
    }

    fn producer_paused(&self) -> bool {
        self.producer.paused()
    }

    fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CodecOptions, ListenIp};
    use roomcast_protocol::TransportDirection;
    use std::collections::BTreeMap;

    fn codecs() -> Vec<RtpCodecCapability> {
        vec![
            RtpCodecCapability {
                kind: MediaKind::Audio,
                mime_type: "audio/opus".to_string(),
                preferred_payload_type: None,
                clock_rate: 48000,
                channels: Some(2),
                parameters: BTreeMap::new(),
            },
            RtpCodecCapability {
                kind: MediaKind::Video,
                mime_type: "video/VP8".to_string(),
                preferred_payload_type: None,
                clock_rate: 90000,
                channels: None,
                parameters: BTreeMap::new(),
            },
        ]
    }

    fn settings(direction: TransportDirection) -> WebRtcTransportSettings {
        WebRtcTransportSettings {
            listen_ips: vec![ListenIp {
                ip: "0.0.0.0".to_string(),
                announced_ip: Some("127.0.0.1".to_string()),
            }],
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            peer_id: "alice".to_string(),
            direction,
        }
    }

    fn dtls() -> DtlsParameters {
        DtlsParameters {
            role: DtlsRole::Client,
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".to_string(),
                value: "AA:BB".to_string(),
            }],
        }
    }

    fn vp8_parameters() -> RtpParameters {
        RtpParameters {
            mid: Some("0".to_string()),
            codecs: vec![RtpCodecParameters {
                mime_type: "video/VP8".to_string(),
                payload_type: 96,
                clock_rate: 90000,
                channels: None,
                parameters: BTreeMap::new(),
            }],
            encodings: vec![RtpEncodingParameters {
                ssrc: Some(1111),
                ..Default::default()
            }],
        }
    }

    async fn router() -> Arc<dyn Router> {
        let engine = InProcessEngine::new((50000, 50010));
        let worker = engine.create_worker(0).await.unwrap();
        worker.create_router(&codecs()).await.unwrap()
    }

    #[tokio::test]
    async fn test_router_assigns_payload_types() {
        let router = router().await;
        let caps = router.rtp_capabilities();

        assert_eq!(caps.codecs.len(), 2);
        assert_eq!(caps.codecs[0].preferred_payload_type, Some(100));
        assert_eq!(caps.codecs[1].preferred_payload_type, Some(101));
    }

    #[tokio::test]
    async fn test_transport_candidates_prefer_udp() {
        let router = router().await;
        let transport = router
            .create_webrtc_transport(settings(TransportDirection::Send))
            .await
            .unwrap();

        let options = transport.options();
        assert_eq!(options.ice_candidates.len(), 2);
        assert_eq!(options.ice_candidates[0].protocol, IceProtocol::Udp);
        assert_eq!(options.ice_candidates[0].ip, "127.0.0.1");
        assert!(options.ice_candidates[0].priority > options.ice_candidates[1].priority);
        assert_eq!(options.dtls_parameters.fingerprints.len(), 1);
    }

    #[tokio::test]
    async fn test_produce_requires_connected_transport() {
        let router = router().await;
        let transport = router
            .create_webrtc_transport(settings(TransportDirection::Send))
            .await
            .unwrap();

        let options = ProduceOptions {
            kind: MediaKind::Video,
            rtp_parameters: vp8_parameters(),
            encodings: vec![],
            codec_options: CodecOptions::default(),
        };

        let err = transport.produce(options.clone()).await.err().unwrap();
        assert_eq!(err, EngineError::NotConnected(transport.id().to_string()));

        transport.connect(dtls()).await.unwrap();
        assert!(transport.connect(dtls()).await.is_err());
        assert!(transport.produce(options).await.is_ok());
    }

    #[tokio::test]
    async fn test_closing_producer_closes_consumers() {
        let router = router().await;
        let send = router
            .create_webrtc_transport(settings(TransportDirection::Send))
            .await
            .unwrap();
        let recv = router
            .create_webrtc_transport(settings(TransportDirection::Recv))
            .await
            .unwrap();
        send.connect(dtls()).await.unwrap();
        recv.connect(dtls()).await.unwrap();

        let producer = send
            .produce(ProduceOptions {
                kind: MediaKind::Video,
                rtp_parameters: vp8_parameters(),
                encodings: vec![
                    RtpEncodingParameters {
                        max_bitrate: Some(100_000),
                        ..Default::default()
                    },
                    RtpEncodingParameters {
                        max_bitrate: Some(300_000),
                        ..Default::default()
                    },
                ],
                codec_options: CodecOptions::default(),
            })
            .await
            .unwrap();

        let caps = router.rtp_capabilities();
        assert!(router.can_consume(producer.id(), &caps));

        let consumer = recv
            .consume(ConsumeOptions {
                producer_id: producer.id().to_string(),
                rtp_capabilities: caps,
                paused: false,
            })
            .await
            .unwrap();

        assert_eq!(consumer.consumer_type(), ConsumerType::Simulcast);
        assert!(!consumer.paused());
        assert_eq!(consumer.rtp_parameters().codecs[0].payload_type, 101);

        producer.close();
        assert!(consumer.closed());
        assert!(!router.can_consume(producer.id(), &router.rtp_capabilities()));
    }

    #[tokio::test]
    async fn test_can_consume_rejects_missing_codec() {
        let router = router().await;
        let send = router
            .create_webrtc_transport(settings(TransportDirection::Send))
            .await
            .unwrap();
        send.connect(dtls()).await.unwrap();
        let producer = send
            .produce(ProduceOptions {
                kind: MediaKind::Video,
                rtp_parameters: vp8_parameters(),
                encodings: vec![],
                codec_options: CodecOptions::default(),
            })
            .await
            .unwrap();

        let audio_only = RtpCapabilities {
            codecs: vec![codecs()[0].clone()],
        };
        assert!(!router.can_consume(producer.id(), &audio_only));
        assert!(!router.can_consume("missing", &router.rtp_capabilities()));
    }

    #[test]
    fn test_port_allocator_reuses_released_ports() {
        let ports = PortAllocator::new(6000, 6001);
        let a = ports.allocate().unwrap();
        let b = ports.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(ports.allocate(), Err(EngineError::PortsExhausted));

        ports.release(a);
        assert_eq!(ports.allocate(), Ok(a));
    }
}
