//! Cache queue — bounded buffer between block-end and delivery.
//!
//! Block-end processing enqueues and returns immediately; a single worker
//! drains strictly in arrival order and feeds the phase driver one block at a
//! time. A slow sink therefore delays only the queue, not block commit — up
//! to the point the queue fills, after which enqueue itself blocks. That
//! backpressure is the deliberate trade-off between block-production liveness
//! and unbounded memory growth.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

use blockcast_types::BlockPayload;

use crate::metrics::StreamMetrics;
use crate::phase::PhaseDriver;
use crate::StreamError;

/// Block-end handle: enqueue side of the cache queue.
pub struct BlockQueue {
    tx: mpsc::Sender<BlockPayload>,
    metrics: Arc<StreamMetrics>,
}

/// Worker side: drains the queue into the phase driver.
pub struct BlockQueueWorker {
    rx: mpsc::Receiver<BlockPayload>,
    metrics: Arc<StreamMetrics>,
}

/// Create the paired handles for a queue of the given capacity (≥ 1).
pub fn cache_queue(capacity: usize, metrics: Arc<StreamMetrics>) -> (BlockQueue, BlockQueueWorker) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        BlockQueue {
            tx,
            metrics: metrics.clone(),
        },
        BlockQueueWorker { rx, metrics },
    )
}

impl BlockQueue {
    /// Enqueue one block's payload. Blocks while the queue is full.
    pub async fn enqueue(&self, block: BlockPayload) -> Result<(), StreamError> {
        let height = block.height;
        self.tx
            .send(block)
            .await
            .map_err(|_| StreamError::WorkerStopped)?;
        self.metrics.queue_depth.inc();
        debug!(height, "block queued for delivery");
        Ok(())
    }
}

impl BlockQueueWorker {
    /// Drain blocks into `driver` until the enqueue side closes or the driver
    /// hits a fatal error.
    pub async fn run(mut self, mut driver: PhaseDriver) -> Result<(), StreamError> {
        while let Some(block) = self.rx.recv().await {
            self.metrics.queue_depth.dec();
            if let Err(e) = driver.execute_block(block).await {
                error!(error = %e, "delivery worker stopping on fatal error");
                return Err(e);
            }
        }
        debug!("cache queue closed; delivery worker exiting");
        Ok(())
    }
}
