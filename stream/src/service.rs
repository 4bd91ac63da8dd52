//! Composition root for the delivery subsystem.
//!
//! The host node constructs one [`StreamService`] at startup and calls
//! [`StreamService::submit_block`] once per committed block, after data
//! extraction. Every collaborator is an explicitly constructed, passed-in
//! handle owned here — the store chosen from config, the engine map built by
//! the host from parsed specs, the coordinator, the driver, and (when
//! configured) the cache queue worker.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use blockcast_engine::{Coordinator, EngineMap};
use blockcast_store::{LocalFileStore, LockStateStore};
use blockcast_store_redis::RedisLockStore;
use blockcast_types::{BlockPayload, SinkKind};

use crate::cache_queue::{cache_queue, BlockQueue};
use crate::config::StreamConfig;
use crate::metrics::StreamMetrics;
use crate::phase::{DriverConfig, PhaseDriver};
use crate::StreamError;

enum Mode {
    /// Block-end drives delivery directly (queue disabled).
    Direct(Box<PhaseDriver>),
    /// Block-end enqueues; a worker task drives delivery.
    Queued {
        queue: BlockQueue,
        worker: JoinHandle<Result<(), StreamError>>,
    },
}

/// The per-block delivery subsystem, one instance per node process.
pub struct StreamService {
    mode: Mode,
    metrics: Arc<StreamMetrics>,
}

impl StreamService {
    /// Build the service, choosing the store from config: a `redis_url`
    /// selects the shared network store (multi-process cluster), otherwise
    /// state lives under `state_dir` with no cross-process locking.
    pub fn new(config: &StreamConfig, engines: EngineMap) -> Result<Self, StreamError> {
        let store: Arc<dyn LockStateStore> = match &config.redis_url {
            Some(url) => {
                info!(url = %url, "using shared lock/state store");
                Arc::new(RedisLockStore::new(url, config.store_op_timeout())?)
            }
            None => {
                info!(dir = %config.state_dir.display(), "using local delivery state");
                Arc::new(LocalFileStore::open(&config.state_dir)?)
            }
        };
        Self::with_store(config, engines, store)
    }

    /// Build the service over an explicit store handle (tests, embedding).
    pub fn with_store(
        config: &StreamConfig,
        engines: EngineMap,
        store: Arc<dyn LockStateStore>,
    ) -> Result<Self, StreamError> {
        if engines.is_empty() {
            // An empty done-map derives status Fail forever; no height could
            // ever commit as delivered.
            return Err(StreamError::Config(
                "at least one sink engine must be configured".into(),
            ));
        }

        let mut sinks: Vec<SinkKind> = engines.keys().copied().collect();
        sinks.sort();

        let metrics = Arc::new(StreamMetrics::new());
        let coordinator = Coordinator::spawn(engines, config.atom_task_timeout());
        let driver = PhaseDriver::new(
            store,
            coordinator,
            sinks,
            DriverConfig {
                lock_key: config.lock_key.clone(),
                state_key: config.state_key.clone(),
                locker_id: config.locker_id.clone(),
                lock_lease: config.lock_lease(),
                prepare_backoff: config.prepare_backoff(),
                commit_backoff: config.commit_backoff(),
            },
            metrics.clone(),
        );

        let mode = if config.cache_queue_capacity > 0 {
            let (queue, worker) = cache_queue(config.cache_queue_capacity, metrics.clone());
            let worker = tokio::spawn(worker.run(driver));
            info!(
                capacity = config.cache_queue_capacity,
                "delivery cache queue enabled"
            );
            Mode::Queued { queue, worker }
        } else {
            Mode::Direct(Box::new(driver))
        };

        Ok(Self { mode, metrics })
    }

    /// Hand one committed block's extracted payloads to the delivery engine.
    ///
    /// With the cache queue enabled this returns as soon as the block is
    /// buffered (blocking only when the queue is full); without it, it
    /// returns once the height is durably delivered or superseded. A fatal
    /// error means the process must stop.
    pub async fn submit_block(&mut self, block: BlockPayload) -> Result<(), StreamError> {
        match &mut self.mode {
            Mode::Direct(driver) => driver.execute_block(block).await,
            Mode::Queued { queue, .. } => queue.enqueue(block).await,
        }
    }

    /// Metrics registry handle for the host's exposition endpoint.
    pub fn metrics(&self) -> &StreamMetrics {
        &self.metrics
    }

    /// Wait for the queue worker to finish (queued mode only). Surfaces the
    /// worker's fatal error, if any, to the process supervisor.
    pub async fn join(self) -> Result<(), StreamError> {
        match self.mode {
            Mode::Direct(_) => Ok(()),
            Mode::Queued { queue, worker } => {
                drop(queue); // close the channel so the worker drains and exits
                worker.await.map_err(|_| StreamError::WorkerStopped)?
            }
        }
    }
}
