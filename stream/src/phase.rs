//! The two-phase delivery driver.
//!
//! Invoked once per committed block, after data extraction. Phase 1 acquires
//! the cluster-wide delivery lease and reads persisted progress to decide
//! what this height needs; Phase 2 runs the coordinator fan-out and
//! atomically persists the result while releasing the lease. The driver
//! loops between the phases until the height is durably delivered (or was
//! already handled elsewhere), so a crash at any point replays safely: the
//! state slot only ever holds the last durably committed task, never an
//! in-flight one.
//!
//! Two outcomes end the loop: a jump to the next block, or a fatal error
//! ([`StreamError::is_fatal`]) after which the process must stop — guessing
//! past a height gap risks silent double-delivery.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use blockcast_engine::Coordinator;
use blockcast_store::LockStateStore;
use blockcast_types::{BlockPayload, PayloadMap, SinkKind, Task, TaskStatus, TaskWithData};

use crate::metrics::StreamMetrics;
use crate::StreamError;

/// Driver-side knobs, extracted from the full stream config.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub lock_key: String,
    pub state_key: String,
    pub locker_id: String,
    pub lock_lease: Duration,
    /// Backoff after a failed prepare phase or an incomplete delivery.
    pub prepare_backoff: Duration,
    /// Backoff after a failed or lost commit.
    pub commit_backoff: Duration,
}

/// What Phase 1 decided to do with the current height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase1Action {
    /// This height needs no work from this process; move on.
    JumpNextBlock,
    /// Transient obstacle (lock contention, store error); back off and retry.
    Restart,
    /// Start a fresh task for this height. The lease is held.
    NewTask,
    /// Resume the persisted in-flight task for this height. The lease is held.
    ReturnTask(Task),
}

/// What Phase 2 left behind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase2Outcome {
    /// Fully delivered and durably committed.
    Done,
    /// The atomic persist-and-release failed or lost the race.
    RetryCommit,
    /// Committed, but some sinks are still pending for this height.
    RetryPending,
}

/// The per-block retrying state machine.
pub struct PhaseDriver {
    store: Arc<dyn LockStateStore>,
    coordinator: Coordinator,
    /// Sink kinds a fresh task must cover, in done-map order.
    sinks: Vec<SinkKind>,
    config: DriverConfig,
    metrics: Arc<StreamMetrics>,
    /// The last task this process knows about, committed or in-flight.
    latest: Option<Task>,
}

impl PhaseDriver {
    pub fn new(
        store: Arc<dyn LockStateStore>,
        coordinator: Coordinator,
        sinks: Vec<SinkKind>,
        config: DriverConfig,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        Self {
            store,
            coordinator,
            sinks,
            config,
            metrics,
            latest: None,
        }
    }

    /// Drive one block to a terminal outcome.
    ///
    /// Returns only when the height is durably delivered, superseded, or a
    /// fatal invariant violation was detected (the error is fatal and the
    /// process must stop — see [`StreamError::is_fatal`]).
    pub async fn execute_block(&mut self, block: BlockPayload) -> Result<(), StreamError> {
        let height = block.height;
        let started = std::time::Instant::now();

        loop {
            match self.prepare(height).await? {
                Phase1Action::JumpNextBlock => return Ok(()),
                Phase1Action::Restart => {
                    self.metrics.prepare_retries.inc();
                    sleep(self.config.prepare_backoff).await;
                }
                Phase1Action::NewTask => {
                    let task = Task::new(height, self.sinks.iter().copied());
                    match self.execute(task, &block.data).await? {
                        Phase2Outcome::Done => {
                            self.commit_observed(height, started);
                            return Ok(());
                        }
                        Phase2Outcome::RetryCommit => sleep(self.config.commit_backoff).await,
                        Phase2Outcome::RetryPending => sleep(self.config.prepare_backoff).await,
                    }
                }
                Phase1Action::ReturnTask(task) => {
                    self.metrics.tasks_resumed.inc();
                    match self.execute(task, &block.data).await? {
                        Phase2Outcome::Done => {
                            self.commit_observed(height, started);
                            return Ok(());
                        }
                        Phase2Outcome::RetryCommit => sleep(self.config.commit_backoff).await,
                        Phase2Outcome::RetryPending => sleep(self.config.prepare_backoff).await,
                    }
                }
            }
        }
    }

    fn commit_observed(&self, height: u64, started: std::time::Instant) {
        self.metrics.blocks_committed.inc();
        self.metrics.last_committed_height.set(height as i64);
        self.metrics
            .block_delivery_seconds
            .observe(started.elapsed().as_secs_f64());
        info!(height, "block fully delivered and committed");
    }

    /// Phase 1 — acquire the lease, read persisted progress, decide.
    pub(crate) async fn prepare(&mut self, height: u64) -> Result<Phase1Action, StreamError> {
        // A later task already passed through this process; this block was
        // superseded elsewhere.
        if let Some(latest) = &self.latest {
            if latest.height() > height {
                debug!(
                    height,
                    latest = latest.height(),
                    "height already superseded in memory"
                );
                return Ok(Phase1Action::JumpNextBlock);
            }
        }

        let acquired = match self
            .store
            .fetch_lock(&self.config.lock_key, &self.config.locker_id, self.config.lock_lease)
            .await
        {
            Ok(acquired) => acquired,
            Err(e) => {
                warn!(height, error = %e, "delivery lease acquisition errored");
                false
            }
        };
        if !acquired {
            debug!(height, "delivery lease is held elsewhere");
            return Ok(Phase1Action::Restart);
        }

        let raw = match self.store.get_state(&self.config.state_key).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(height, error = %e, "persisted state read failed");
                self.release_lease(height).await;
                return Ok(Phase1Action::Restart);
            }
        };

        if raw.is_empty() {
            // First block this cluster ever delivers.
            return Ok(Phase1Action::NewTask);
        }

        let persisted = match Task::from_json(&raw) {
            Ok(task) => task,
            Err(e) => {
                self.release_lease(height).await;
                return Err(StreamError::CorruptState(e.to_string()));
            }
        };

        if persisted.height() > height {
            // Another process already moved past this height.
            self.release_lease(height).await;
            return Ok(Phase1Action::JumpNextBlock);
        }

        if persisted.height() == height {
            if persisted.status() == TaskStatus::Success {
                self.release_lease(height).await;
                return Ok(Phase1Action::JumpNextBlock);
            }
            // In-flight task for this very height: resume it, keep the lease.
            return Ok(Phase1Action::ReturnTask(persisted));
        }

        if persisted.height() + 1 == height {
            // Previous height fully delivered; this one starts fresh.
            return Ok(Phase1Action::NewTask);
        }

        // A gap of more than one block between persisted progress and the
        // chain. No answer here is safe.
        self.release_lease(height).await;
        Err(StreamError::HeightInvariant {
            persisted: persisted.height(),
            current: height,
        })
    }

    /// Phase 2 — fan out via the coordinator and atomically commit + release.
    async fn execute(
        &mut self,
        task: Task,
        data: &PayloadMap,
    ) -> Result<Phase2Outcome, StreamError> {
        let height = task.height();
        let pending_before = task.pending().len();

        self.coordinator
            .submit(TaskWithData {
                task,
                data: data.clone(),
            })
            .await?;
        let task = self.coordinator.recv_result().await?;

        let still_pending = task.pending().len();
        if still_pending > 0 {
            self.metrics
                .sink_deliveries_failed
                .inc_by(still_pending as u64);
        }
        debug!(
            height,
            attempted = pending_before,
            pending = still_pending,
            "coordinator pass finished"
        );

        let serialized = task.to_json()?;
        let committed = match self
            .store
            .unlock_with_state(
                &self.config.lock_key,
                &self.config.locker_id,
                &self.config.state_key,
                &serialized,
            )
            .await
        {
            Ok(committed) => committed,
            Err(e) => {
                warn!(height, error = %e, "atomic persist-and-release failed");
                false
            }
        };

        // Keep the in-memory task either way: on a failed commit the next
        // prepare pass re-reads the store and reconciles.
        let status = task.status();
        self.latest = Some(task);

        if !committed {
            self.metrics.commit_failures.inc();
            return Ok(Phase2Outcome::RetryCommit);
        }
        if status != TaskStatus::Success {
            return Ok(Phase2Outcome::RetryPending);
        }
        Ok(Phase2Outcome::Done)
    }

    async fn release_lease(&self, height: u64) {
        match self
            .store
            .release_lock(&self.config.lock_key, &self.config.locker_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(height, "delivery lease was already gone"),
            Err(e) => warn!(height, error = %e, "delivery lease release failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use blockcast_engine::{EngineMap, StreamEngine};
    use blockcast_store::MemoryLockStore;
    use blockcast_types::SinkPayload;

    struct AlwaysOkEngine;

    impl StreamEngine for AlwaysOkEngine {
        fn url(&self) -> &str {
            "test://ok"
        }

        fn write(&self, _payload: &dyn SinkPayload) -> Result<(), blockcast_engine::EngineError> {
            Ok(())
        }
    }

    const SINKS: [SinkKind; 2] = [SinkKind::Relational, SinkKind::Queue];

    fn test_config() -> DriverConfig {
        DriverConfig {
            lock_key: "test.lock".into(),
            state_key: "test.state".into(),
            locker_id: "test-proc:1".into(),
            lock_lease: Duration::from_secs(30),
            prepare_backoff: Duration::from_millis(5),
            commit_backoff: Duration::from_millis(5),
        }
    }

    fn test_driver(store: Arc<MemoryLockStore>) -> PhaseDriver {
        let mut engines: EngineMap = HashMap::new();
        for sink in SINKS {
            engines.insert(sink, Arc::new(AlwaysOkEngine));
        }
        let coordinator = Coordinator::spawn(engines, Duration::from_secs(5));
        PhaseDriver::new(
            store,
            coordinator,
            SINKS.to_vec(),
            test_config(),
            Arc::new(StreamMetrics::new()),
        )
    }

    async fn seed_state(store: &MemoryLockStore, task: &Task) {
        use blockcast_store::LockStateStore as _;
        store
            .set_state("test.state", &task.to_json().unwrap())
            .await
            .unwrap();
    }

    fn task_at(height: u64, entries: &[(SinkKind, bool)]) -> Task {
        Task::from_parts(height, entries.iter().copied().collect(), 1_690_000_000)
    }

    // ── Phase 1 decisions ───────────────────────────────────────────────

    #[tokio::test]
    async fn no_prior_state_starts_fresh() {
        let store = Arc::new(MemoryLockStore::new());
        let mut driver = test_driver(store);
        assert_eq!(driver.prepare(101).await.unwrap(), Phase1Action::NewTask);
    }

    #[tokio::test]
    async fn in_flight_same_height_resumes() {
        let store = Arc::new(MemoryLockStore::new());
        let persisted = task_at(100, &[(SinkKind::Relational, true), (SinkKind::Queue, false)]);
        seed_state(&store, &persisted).await;

        let mut driver = test_driver(store);
        assert_eq!(
            driver.prepare(100).await.unwrap(),
            Phase1Action::ReturnTask(persisted)
        );
    }

    #[tokio::test]
    async fn lower_current_height_jumps() {
        let store = Arc::new(MemoryLockStore::new());
        let persisted = task_at(100, &[(SinkKind::Relational, true), (SinkKind::Queue, false)]);
        seed_state(&store, &persisted).await;

        let mut driver = test_driver(store);
        assert_eq!(
            driver.prepare(99).await.unwrap(),
            Phase1Action::JumpNextBlock
        );
    }

    #[tokio::test]
    async fn completed_same_height_jumps() {
        let store = Arc::new(MemoryLockStore::new());
        let persisted = task_at(100, &[(SinkKind::Relational, true), (SinkKind::Queue, true)]);
        seed_state(&store, &persisted).await;

        let mut driver = test_driver(store);
        assert_eq!(
            driver.prepare(100).await.unwrap(),
            Phase1Action::JumpNextBlock
        );
    }

    #[tokio::test]
    async fn next_height_after_success_starts_fresh() {
        let store = Arc::new(MemoryLockStore::new());
        let persisted = task_at(100, &[(SinkKind::Relational, true), (SinkKind::Queue, true)]);
        seed_state(&store, &persisted).await;

        let mut driver = test_driver(store);
        assert_eq!(driver.prepare(101).await.unwrap(), Phase1Action::NewTask);
    }

    #[tokio::test]
    async fn height_gap_is_fatal() {
        let store = Arc::new(MemoryLockStore::new());
        let persisted = task_at(100, &[(SinkKind::Relational, true), (SinkKind::Queue, true)]);
        seed_state(&store, &persisted).await;

        let mut driver = test_driver(store.clone());
        let err = driver.prepare(103).await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::HeightInvariant {
                persisted: 100,
                current: 103
            }
        ));
        assert!(err.is_fatal());

        // The lease was released on the way out.
        use blockcast_store::LockStateStore as _;
        assert!(store
            .fetch_lock("test.lock", "other", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn corrupt_state_is_fatal() {
        let store = Arc::new(MemoryLockStore::new());
        use blockcast_store::LockStateStore as _;
        store.set_state("test.state", "not a task").await.unwrap();

        let mut driver = test_driver(store);
        let err = driver.prepare(100).await.unwrap_err();
        assert!(matches!(err, StreamError::CorruptState(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn contended_lease_restarts() {
        let store = Arc::new(MemoryLockStore::new());
        use blockcast_store::LockStateStore as _;
        // Another process holds the lease.
        assert!(store
            .fetch_lock("test.lock", "other-proc", Duration::from_secs(30))
            .await
            .unwrap());

        let mut driver = test_driver(store);
        assert_eq!(driver.prepare(100).await.unwrap(), Phase1Action::Restart);
    }

    #[tokio::test]
    async fn superseded_in_memory_jumps_without_touching_the_store() {
        let store = Arc::new(MemoryLockStore::new());
        let mut driver = test_driver(store.clone());
        driver.latest = Some(task_at(200, &[(SinkKind::Relational, true)]));

        assert_eq!(
            driver.prepare(150).await.unwrap(),
            Phase1Action::JumpNextBlock
        );
        // No lease was taken.
        use blockcast_store::LockStateStore as _;
        assert!(store
            .fetch_lock("test.lock", "other", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn resume_keeps_the_lease_held() {
        let store = Arc::new(MemoryLockStore::new());
        let persisted = task_at(100, &[(SinkKind::Relational, false), (SinkKind::Queue, false)]);
        seed_state(&store, &persisted).await;

        let mut driver = test_driver(store.clone());
        let action = driver.prepare(100).await.unwrap();
        assert!(matches!(action, Phase1Action::ReturnTask(_)));

        // The lease stays with the driver going into Phase 2.
        use blockcast_store::LockStateStore as _;
        assert!(!store
            .fetch_lock("test.lock", "other", Duration::from_secs(1))
            .await
            .unwrap());
    }

    // ── Full block execution ────────────────────────────────────────────

    #[tokio::test]
    async fn executes_a_block_to_durable_success() {
        let store = Arc::new(MemoryLockStore::new());
        let mut driver = test_driver(store.clone());

        driver
            .execute_block(BlockPayload {
                height: 1,
                data: HashMap::new(),
            })
            .await
            .unwrap();

        use blockcast_store::LockStateStore as _;
        let raw = store.get_state("test.state").await.unwrap();
        let committed = Task::from_json(&raw).unwrap();
        assert_eq!(committed.height(), 1);
        assert_eq!(committed.status(), TaskStatus::Success);
        // The lease was released by the atomic commit.
        assert!(store
            .fetch_lock("test.lock", "other", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn consecutive_blocks_advance_the_persisted_height() {
        let store = Arc::new(MemoryLockStore::new());
        let mut driver = test_driver(store.clone());

        for height in 1..=3 {
            driver
                .execute_block(BlockPayload {
                    height,
                    data: HashMap::new(),
                })
                .await
                .unwrap();
        }

        use blockcast_store::LockStateStore as _;
        let raw = store.get_state("test.state").await.unwrap();
        assert_eq!(Task::from_json(&raw).unwrap().height(), 3);
    }
}
