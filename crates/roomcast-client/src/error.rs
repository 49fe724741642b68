use roomcast_protocol::ErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("Server rejected {event}: {message} ({kind:?})")]
    Rejected {
        event: &'static str,
        kind: ErrorKind,
        message: String,
    },

    #[error("Connection to the server is closed")]
    Disconnected,

    #[error("Not in a room")]
    NotJoined,

    #[error("Producer {0} is already consumed")]
    AlreadyConsuming(String),

    #[error("Unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

impl ClientError {
    /// Error kind as reported by the server, or `Timeout` for local timeouts
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Rejected { kind, .. } => Some(*kind),
            ClientError::Timeout(_) => Some(ErrorKind::Timeout),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
