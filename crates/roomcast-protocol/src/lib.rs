//! roomcast protocol
//!
//! Wire types shared by the signaling server and its clients. Every message is a
//! JSON object tagged by `"type"` with kebab-case event names and camelCase fields.

pub mod messages;
pub mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use types::*;
