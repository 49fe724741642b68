use crate::engine::{ListenIp, MediaEngine};
use crate::sfu::{
    AssignmentStrategy, LeastLoaded, MediaSettings, Notifier, RoundRobin, SessionManager,
    WorkerPool,
};
use crate::ws::connections::ConnectionManager;
use roomcast_protocol::{MediaKind, RtpCodecCapability};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerStrategy {
    #[default]
    RoundRobin,
    LeastLoaded,
}

impl WorkerStrategy {
    pub fn build(self) -> Box<dyn AssignmentStrategy> {
        match self {
            WorkerStrategy::RoundRobin => Box::new(RoundRobin::default()),
            WorkerStrategy::LeastLoaded => Box::new(LeastLoaded),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub listen_ips: Vec<ListenIp>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
    pub port_range: (u16, u16),
    pub codecs: Vec<RtpCodecCapability>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        let settings = MediaSettings::default();
        Self {
            listen_ips: settings.listen_ips,
            enable_udp: settings.enable_udp,
            enable_tcp: settings.enable_tcp,
            prefer_udp: settings.prefer_udp,
            port_range: (40000, 49999),
            codecs: default_media_codecs(),
        }
    }
}

impl MediaConfig {
    /// Per-peer transport settings; the video ladder is fixed
    pub fn settings(&self) -> MediaSettings {
        MediaSettings {
            listen_ips: self.listen_ips.clone(),
            enable_udp: self.enable_udp,
            enable_tcp: self.enable_tcp,
            prefer_udp: self.prefer_udp,
            ..MediaSettings::default()
        }
    }
}

/// Codecs every router is created with
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
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
            parameters: BTreeMap::from([("x-google-start-bitrate".to_string(), json!(1000))]),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/H264".to_string(),
            preferred_payload_type: None,
            clock_rate: 90000,
            channels: None,
            parameters: BTreeMap::from([
                ("packetization-mode".to_string(), json!(1)),
                ("profile-level-id".to_string(), json!("42e01f")),
                ("level-asymmetry-allowed".to_string(), json!(1)),
            ]),
        },
    ]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_address: String,
    pub cors_origin: Option<String>,
    pub worker_count: usize,
    pub worker_strategy: WorkerStrategy,
    pub media: MediaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4000".to_string(),
            cors_origin: None,
            worker_count: 1,
            worker_strategy: WorkerStrategy::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Config {
    /// Load `roomcast.toml` (optional) overlaid with `ROOMCAST_*` environment variables
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config: Config = config::Config::builder()
            .add_source(config::File::with_name("roomcast").required(false))
            .add_source(
                config::Environment::with_prefix("ROOMCAST")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(port) = std::env::var("PORT") {
            config.bind_address = with_port(&config.bind_address, &port);
        }

        if config.worker_count == 0 {
            tracing::warn!("worker_count = 0, no room can be created");
        }

        Ok(config)
    }
}

fn with_port(bind_address: &str, port: &str) -> String {
    match bind_address.rsplit_once(':') {
        Some((host, _)) => format!("{}:{}", host, port),
        None => format!("{}:{}", bind_address, port),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: Arc<SessionManager>,
    pub connections: Arc<ConnectionManager>,
}

impl AppState {
    /// Spawn the worker pool on `engine` and wire the session manager to the gateway
    pub async fn new(config: Config, engine: &dyn MediaEngine) -> anyhow::Result<Self> {
        let pool = WorkerPool::new(
            engine,
            config.worker_count,
            config.worker_strategy.build(),
            config.media.codecs.clone(),
        )
        .await?;

        let connections = Arc::new(ConnectionManager::new());
        let notifier: Arc<dyn Notifier> = connections.clone();
        let sessions = Arc::new(SessionManager::new(
            Arc::new(pool),
            notifier,
            config.media.settings(),
        ));

        Ok(Self {
            config,
            sessions,
            connections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_override_keeps_host() {
        assert_eq!(with_port("0.0.0.0:4000", "8080"), "0.0.0.0:8080");
        assert_eq!(with_port("[::]:4000", "5000"), "[::]:5000");
        assert_eq!(with_port("localhost", "5000"), "localhost:5000");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_address, "0.0.0.0:4000");
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.worker_strategy, WorkerStrategy::RoundRobin);
        assert_eq!(config.media.port_range, (40000, 49999));
        assert_eq!(config.media.codecs.len(), 3);
        assert_eq!(
            config.media.listen_ips[0].announced_ip.as_deref(),
            Some("127.0.0.1")
        );
    }

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let config: Config = serde_json::from_value(json!({
            "worker_count": 4,
            "worker_strategy": "least-loaded",
            "media": { "enable_tcp": false }
        }))
        .unwrap();

        assert_eq!(config.worker_count, 4);
        assert_eq!(config.worker_strategy, WorkerStrategy::LeastLoaded);
        assert!(!config.media.enable_tcp);
        assert!(config.media.enable_udp);
        assert_eq!(config.worker_strategy.build().name(), "least-loaded");
    }
}
