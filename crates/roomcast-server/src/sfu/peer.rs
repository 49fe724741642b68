//! Per-connection media state

use crate::engine::{Consumer, Producer, WebRtcTransport};
use chrono::{DateTime, Utc};
use roomcast_protocol::{MediaKind, Role, TransportDirection};
use std::collections::HashMap;
use std::sync::Arc;

/// A transport owned by a peer
#[derive(Clone)]
pub struct PeerTransport {
    pub handle: Arc<dyn WebRtcTransport>,
    pub direction: TransportDirection,
    pub connected: bool,
}

/// A room member and every engine resource it owns
pub struct Peer {
    pub id: String,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    transports: HashMap<String, PeerTransport>,
    producers: HashMap<String, Arc<dyn Producer>>,
    consumers: HashMap<String, Arc<dyn Consumer>>,
}

impl Peer {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            joined_at: Utc::now(),
            transports: HashMap::new(),
            producers: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    pub fn add_transport(&mut self, handle: Arc<dyn WebRtcTransport>, direction: TransportDirection) {
        self.transports.insert(
            handle.id().to_string(),
            PeerTransport {
                handle,
                direction,
                connected: false,
            },
        );
    }

    pub fn transport(&self, transport_id: &str) -> Option<&PeerTransport> {
        self.transports.get(transport_id)
    }

    /// Returns false when the transport is unknown
    pub fn mark_connected(&mut self, transport_id: &str) -> bool {
        match self.transports.get_mut(transport_id) {
            Some(transport) => {
                transport.connected = true;
                true
            }
            None => false,
        }
    }

    pub fn transport_count(&self) -> usize {
        self.transports.len()
    }

    pub fn add_producer(&mut self, producer: Arc<dyn Producer>) {
        self.producers.insert(producer.id().to_string(), producer);
    }

    pub fn producer(&self, producer_id: &str) -> Option<&Arc<dyn Producer>> {
        self.producers.get(producer_id)
    }

    pub fn producers(&self) -> impl Iterator<Item = &Arc<dyn Producer>> {
        self.producers.values()
    }

    pub fn producer_ids(&self) -> Vec<String> {
        self.producers.keys().cloned().collect()
    }

    /// Remove every producer from the registry, leaving them open
    pub fn take_producers(&mut self) -> Vec<Arc<dyn Producer>> {
        self.producers.drain().map(|(_, p)| p).collect()
    }

    pub fn add_consumer(&mut self, consumer: Arc<dyn Consumer>) {
        self.consumers.insert(consumer.id().to_string(), consumer);
    }

    pub fn consumer(&self, consumer_id: &str) -> Option<&Arc<dyn Consumer>> {
        self.consumers.get(consumer_id)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    pub fn has_consumer_for(&self, producer_id: &str, kind: MediaKind) -> bool {
        self.consumers
            .values()
            .any(|c| c.producer_id() == producer_id && c.kind() == kind && !c.closed())
    }

    /// Close and forget every consumer fed by `producer_id`
    pub fn remove_consumers_of(&mut self, producer_id: &str) -> usize {
        let ids: Vec<String> = self
            .consumers
            .iter()
            .filter(|(_, c)| c.producer_id() == producer_id)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &ids {
            if let Some(consumer) = self.consumers.remove(id) {
                consumer.close();
            }
        }

        ids.len()
    }

    /// Close every owned consumer, producer and transport
    pub fn close(&mut self) {
        for (_, consumer) in self.consumers.drain() {
            consumer.close();
        }
        for (_, producer) in self.producers.drain() {
            producer.close();
        }
        for (_, transport) in self.transports.drain() {
            transport.handle.close();
        }
    }
}
