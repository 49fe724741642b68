//! Media worker pool
//!
//! Owns the engine workers for the lifetime of the process and hands out one router per
//! room. Which worker backs the next router is decided by a swappable strategy.

use crate::engine::{EngineError, MediaEngine, Router, Worker};
use roomcast_protocol::RtpCodecCapability;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("no media worker is available")]
    NoWorkers,

    #[error("media worker {index} rejected the request: {source}")]
    Worker {
        index: usize,
        #[source]
        source: EngineError,
    },
}

/// Live router count of one worker, as seen by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerLoad {
    pub index: usize,
    pub routers: usize,
}

/// Picks the worker that backs the next router
pub trait AssignmentStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `candidates` only lists live workers, in pool order
    fn select(&self, candidates: &[WorkerLoad]) -> Option<usize>;
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl AssignmentStrategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round-robin"
    }

    fn select(&self, candidates: &[WorkerLoad]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let turn = self.next.fetch_add(1, Ordering::Relaxed);
        candidates.get(turn % candidates.len()).map(|c| c.index)
    }
}

/// Fewest live routers wins, lowest index breaks ties
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl AssignmentStrategy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least-loaded"
    }

    fn select(&self, candidates: &[WorkerLoad]) -> Option<usize> {
        candidates
            .iter()
            .min_by_key(|c| (c.routers, c.index))
            .map(|c| c.index)
    }
}

/// A router bound to one pool worker
#[derive(Clone)]
pub struct RouterLease {
    pub worker_index: usize,
    pub router: Arc<dyn Router>,
}

pub struct WorkerPool {
    workers: Vec<Arc<dyn Worker>>,
    loads: Vec<AtomicUsize>,
    strategy: Box<dyn AssignmentStrategy>,
    media_codecs: Vec<RtpCodecCapability>,
}

impl WorkerPool {
    /// Spawn `size` workers up front. The pool never grows afterwards.
    pub async fn new(
        engine: &dyn MediaEngine,
        size: usize,
        strategy: Box<dyn AssignmentStrategy>,
        media_codecs: Vec<RtpCodecCapability>,
    ) -> Result<Self, PoolError> {
        let mut workers = Vec::with_capacity(size);
        for index in 0..size {
            let worker = engine
                .create_worker(index)
                .await
                .map_err(|source| PoolError::Worker { index, source })?;
            workers.push(worker);
        }

        tracing::info!(
            "Media worker pool ready with {} worker(s), strategy {}",
            workers.len(),
            strategy.name()
        );

        let loads = workers.iter().map(|_| AtomicUsize::new(0)).collect();

        Ok(Self {
            workers,
            loads,
            strategy,
            media_codecs,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Live routers per worker, in pool order
    pub fn loads(&self) -> Vec<usize> {
        self.loads.iter().map(|l| l.load(Ordering::SeqCst)).collect()
    }

    /// Create a router for `room_id` on the worker chosen by the strategy
    pub async fn acquire_router(&self, room_id: &str) -> Result<RouterLease, PoolError> {
        let candidates: Vec<WorkerLoad> = self
            .workers
            .iter()
            .zip(&self.loads)
            .filter(|(worker, _)| !worker.closed())
            .map(|(worker, load)| WorkerLoad {
                index: worker.index(),
                routers: load.load(Ordering::SeqCst),
            })
            .collect();

        let index = self
            .strategy
            .select(&candidates)
            .ok_or(PoolError::NoWorkers)?;
        let worker = self.workers.get(index).ok_or(PoolError::NoWorkers)?;

        let router = worker
            .create_router(&self.media_codecs)
            .await
            .map_err(|source| PoolError::Worker { index, source })?;

        if let Some(load) = self.loads.get(index) {
            load.fetch_add(1, Ordering::SeqCst);
        }

        tracing::debug!(
            "Router {} for room {} assigned to worker {}",
            router.id(),
            room_id,
            index
        );

        Ok(RouterLease {
            worker_index: index,
            router,
        })
    }

    /// Close the leased router and return its slot to the worker
    pub fn release(&self, lease: &RouterLease) {
        lease.router.close();
        if let Some(load) = self.loads.get(lease.worker_index) {
            let _ = load.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        }
    }

    pub fn close(&self) {
        for worker in &self.workers {
            worker.close();
        }
        tracing::info!("Media worker pool closed");
    }
}
