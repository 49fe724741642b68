use crate::engine::EngineError;
use crate::sfu::PoolError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use roomcast_protocol::ErrorKind;
use serde_json::json;
use thiserror::Error;

/// Failure of a session lifecycle operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("incompatible: {0}")]
    Incompatible(String),

    #[error("media engine failure: {0}")]
    EngineFailure(String),

    #[error("media engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::NotFound(_) => ErrorKind::NotFound,
            SessionError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            SessionError::Incompatible(_) => ErrorKind::Incompatible,
            SessionError::EngineFailure(_) => ErrorKind::EngineFailure,
            SessionError::EngineUnavailable(_) => ErrorKind::EngineUnavailable,
            SessionError::Timeout(_) => ErrorKind::Timeout,
        }
    }
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            // A producer that vanished between lookup and the engine call
            EngineError::UnknownProducer(id) => SessionError::NotFound(format!("producer {}", id)),
            EngineError::CannotConsume(id) => {
                SessionError::Incompatible(format!("cannot consume producer {}", id))
            }
            other => {
                tracing::error!("Media engine rejected a request: {}", other);
                SessionError::EngineFailure(other.to_string())
            }
        }
    }
}

impl From<PoolError> for SessionError {
    fn from(err: PoolError) -> Self {
        tracing::error!("Worker pool error: {}", err);
        SessionError::EngineUnavailable(err.to_string())
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Errors of the HTTP API
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
