//! roomcast signaling client
//!
//! Speaks the roomcast WebSocket protocol and keeps a local mirror of the
//! room: peers, viewers, available producers and active consumers.

pub mod error;
pub mod signaling;
pub mod state;

pub use error::{ClientError, Result};
pub use signaling::{ClientConfig, JoinedRoom, SignalingClient};
pub use state::ClientState;
