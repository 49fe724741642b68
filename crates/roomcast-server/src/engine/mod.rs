//! Media engine collaborator API
//!
//! The session layer never touches ICE, DTLS or RTP itself. It drives an engine through
//! the handles below; every handle is shared as `Arc<dyn ...>` and every call that would
//! reach a media worker is async.

mod in_process;

pub use in_process::InProcessEngine;

use async_trait::async_trait;
use roomcast_protocol::{
    ConsumerType, DtlsParameters, MediaKind, RtpCapabilities, RtpCodecCapability,
    RtpEncodingParameters, RtpParameters, TransportDirection, TransportOptions,
};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("worker {0} is closed")]
    WorkerClosed(usize),

    #[error("router {0} is closed")]
    RouterClosed(String),

    #[error("transport {0} is closed")]
    TransportClosed(String),

    #[error("transport {0} is already connected")]
    AlreadyConnected(String),

    #[error("transport {0} is not connected")]
    NotConnected(String),

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("producer {0} not found on router")]
    UnknownProducer(String),

    #[error("cannot consume producer {0} with the given capabilities")]
    CannotConsume(String),

    #[error("no free port left in the configured range")]
    PortsExhausted,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Address a transport listens on, and the address announced to clients
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ListenIp {
    pub ip: String,
    #[serde(default)]
    pub announced_ip: Option<String>,
}

/// Parameters of `Router::create_webrtc_transport`
#[derive(Debug, Clone)]
pub struct WebRtcTransportSettings {
    pub listen_ips: Vec<ListenIp>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    /// Opaque bookkeeping carried by the transport
    pub peer_id: String,
    pub direction: TransportDirection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecOptions {
    pub video_google_start_bitrate: Option<u32>,
}

/// Parameters of `WebRtcTransport::produce`
#[derive(Debug, Clone)]
pub struct ProduceOptions {
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
    /// Bitrate ladder for adaptive forwarding. Empty keeps the client's encodings.
    pub encodings: Vec<RtpEncodingParameters>,
    pub codec_options: CodecOptions,
}

/// Parameters of `WebRtcTransport::consume`
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    pub producer_id: String,
    pub rtp_capabilities: RtpCapabilities,
    pub paused: bool,
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Spawn one media worker
    async fn create_worker(&self, index: usize) -> EngineResult<Arc<dyn Worker>>;
}

#[async_trait]
pub trait Worker: Send + Sync {
    fn index(&self) -> usize;

    async fn create_router(
        &self,
        media_codecs: &[RtpCodecCapability],
    ) -> EngineResult<Arc<dyn Router>>;

    fn close(&self);

    fn closed(&self) -> bool;
}

#[async_trait]
pub trait Router: Send + Sync {
    fn id(&self) -> &str;

    /// Capability descriptor handed to joining clients
    fn rtp_capabilities(&self) -> RtpCapabilities;

    /// Whether an endpoint with `rtp_capabilities` can receive `producer_id`
    fn can_consume(&self, producer_id: &str, rtp_capabilities: &RtpCapabilities) -> bool;

    async fn create_webrtc_transport(
        &self,
        settings: WebRtcTransportSettings,
    ) -> EngineResult<Arc<dyn WebRtcTransport>>;

    /// Closes the router and everything created on it
    fn close(&self);

    fn closed(&self) -> bool;
}

#[async_trait]
pub trait WebRtcTransport: Send + Sync {
    fn id(&self) -> &str;

    fn options(&self) -> TransportOptions;

    async fn connect(&self, dtls_parameters: DtlsParameters) -> EngineResult<()>;

    async fn produce(&self, options: ProduceOptions) -> EngineResult<Arc<dyn Producer>>;

    async fn consume(&self, options: ConsumeOptions) -> EngineResult<Arc<dyn Consumer>>;

    fn close(&self);

    fn closed(&self) -> bool;
}

pub trait Producer: Send + Sync {
    fn id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    fn paused(&self) -> bool;

    /// Closes the producer and every consumer fed by it
    fn close(&self);

    fn closed(&self) -> bool;
}

pub trait Consumer: Send + Sync {
    fn id(&self) -> &str;

    fn producer_id(&self) -> &str;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    fn consumer_type(&self) -> ConsumerType;

    fn producer_paused(&self) -> bool;

    fn paused(&self) -> bool;

    fn close(&self);

    fn closed(&self) -> bool;
}
