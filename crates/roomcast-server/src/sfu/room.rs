//! Room membership and host designation

use super::{Peer, RouterLease};
use crate::engine::{Producer, Router};
use chrono::{DateTime, Utc};
use roomcast_protocol::{ProducerInfo, RoomSummary};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One room: a router plus the peers routed through it
pub struct Room {
    pub id: String,
    pub created_at: DateTime<Utc>,
    lease: RouterLease,
    state: RwLock<RoomState>,
}

impl Room {
    pub fn new(id: impl Into<String>, lease: RouterLease) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            lease,
            state: RwLock::new(RoomState::default()),
        }
    }

    pub fn router(&self) -> &Arc<dyn Router> {
        &self.lease.router
    }

    pub fn lease(&self) -> &RouterLease {
        &self.lease
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, RoomState> {
        self.state.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, RoomState> {
        self.state.write().await
    }

    pub async fn summary(&self) -> RoomSummary {
        let state = self.read().await;
        RoomSummary {
            room_id: self.id.clone(),
            host_peer_id: state.host_peer_id().map(String::from),
            peer_ids: state.peer_ids(),
            producer_count: state.peers.values().map(|p| p.producers().count()).sum(),
            created_at: self.created_at,
        }
    }
}

/// Mutable part of a room, guarded by the room lock
#[derive(Default)]
pub struct RoomState {
    peers: HashMap<String, Peer>,
    /// Member ids in join order
    order: Vec<String>,
    host_peer_id: Option<String>,
    closed: bool,
}

impl RoomState {
    /// Register `peer`. A host claim replaces the current host label.
    pub fn add_peer(&mut self, peer: Peer, is_host: bool) {
        let id = peer.id.clone();
        if is_host {
            self.host_peer_id = Some(id.clone());
        }
        if self.peers.insert(id.clone(), peer).is_none() {
            self.order.push(id);
        }
    }

    /// Unregister a peer. Losing the host leaves the room host-less.
    pub fn remove_peer(&mut self, peer_id: &str) -> Option<Peer> {
        let peer = self.peers.remove(peer_id)?;
        self.order.retain(|id| id != peer_id);
        if self.host_peer_id.as_deref() == Some(peer_id) {
            self.host_peer_id = None;
        }
        Some(peer)
    }

    pub fn peer(&self, peer_id: &str) -> Option<&Peer> {
        self.peers.get(peer_id)
    }

    pub fn peer_mut(&mut self, peer_id: &str) -> Option<&mut Peer> {
        self.peers.get_mut(peer_id)
    }

    pub fn contains(&self, peer_id: &str) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn host_peer_id(&self) -> Option<&str> {
        self.host_peer_id.as_deref()
    }

    pub fn peer_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn other_peer_ids(&self, peer_id: &str) -> Vec<String> {
        self.order.iter().filter(|id| *id != peer_id).cloned().collect()
    }

    /// Members that are not the host, in join order
    pub fn viewer_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| Some(id.as_str()) != self.host_peer_id.as_deref())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    /// The host's producers, replayed to late joiners
    pub fn producer_list(&self) -> Vec<ProducerInfo> {
        let Some(host) = self.host_peer_id.as_deref().and_then(|id| self.peers.get(id)) else {
            return Vec::new();
        };

        let mut list: Vec<ProducerInfo> = host
            .producers()
            .filter(|p| !p.closed())
            .map(|p| ProducerInfo {
                producer_id: p.id().to_string(),
                peer_id: host.id.clone(),
                kind: p.kind(),
            })
            .collect();
        list.sort_by(|a, b| a.kind.as_str().cmp(b.kind.as_str()).then(a.producer_id.cmp(&b.producer_id)));
        list
    }

    /// Locate a producer and its owner by scanning the members
    pub fn find_producer(&self, producer_id: &str) -> Option<(&Peer, &Arc<dyn Producer>)> {
        self.order.iter().find_map(|id| {
            let peer = self.peers.get(id)?;
            peer.producer(producer_id).map(|producer| (peer, producer))
        })
    }

    /// Drop every consumer, in any member, fed by one of `producer_ids`
    pub fn detach_consumers(&mut self, producer_ids: &[String]) -> usize {
        let mut detached = 0;
        for peer in self.peers.values_mut() {
            for producer_id in producer_ids {
                detached += peer.remove_consumers_of(producer_id);
            }
        }
        detached
    }

    /// Close every member, used at shutdown
    pub(crate) fn close_all(&mut self) {
        for (_, mut peer) in self.peers.drain() {
            peer.close();
        }
        self.order.clear();
        self.host_peer_id = None;
        self.closed = true;
    }
}
