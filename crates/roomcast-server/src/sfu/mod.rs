//! SFU session orchestration
//!
//! Rooms, peers and their media resources live here. The media plane itself is owned by the
//! engine; this module only decides which resources exist, who owns them and who gets told
//! when they change.

mod notifier;
mod peer;
mod room;
mod session;
mod worker_pool;

pub use notifier::Notifier;
pub use peer::{Peer, PeerTransport};
pub use room::{Room, RoomState};
pub use session::{
    JoinedRoom, MediaSettings, SessionManager, VIDEO_BITRATE_LADDER, VIDEO_START_BITRATE,
};
pub use worker_pool::{
    AssignmentStrategy, LeastLoaded, PoolError, RoundRobin, RouterLease, WorkerLoad, WorkerPool,
};
