//! Per-block delivery coordinator.
//!
//! A single long-lived worker accepts one task at a time, fans delivery out
//! to every sink still pending, and collects the reports under one deadline.
//! The input channel has capacity 1, so back-to-back blocks are processed
//! strictly sequentially — a block's fan-out never interleaves with the
//! next block's.
//!
//! The coordinator itself never fails: sink failures and timeouts shrink to
//! unflipped done-map entries, and the caller decides whether to retry.

use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use blockcast_types::{SinkKind, Task, TaskWithData};

use crate::atom_task::run_atom_task;
use crate::{EngineError, EngineMap};

/// Handle to the coordinator worker.
///
/// Exactly one result comes back per submitted task, in submission order;
/// callers read each result before submitting the next block.
pub struct Coordinator {
    task_tx: mpsc::Sender<TaskWithData>,
    result_rx: mpsc::Receiver<Task>,
}

impl Coordinator {
    /// Spawn the worker over the given engines with the configured per-block
    /// atom-task deadline.
    pub fn spawn(engines: EngineMap, atom_timeout: Duration) -> Self {
        // Capacity 1 on both sides: one block in flight, one result awaiting
        // pickup, nothing else admitted.
        let (task_tx, mut task_rx) = mpsc::channel::<TaskWithData>(1);
        let (result_tx, result_rx) = mpsc::channel::<Task>(1);

        tokio::spawn(async move {
            while let Some(task_with_data) = task_rx.recv().await {
                let task = deliver(&engines, task_with_data, atom_timeout).await;
                if result_tx.send(task).await.is_err() {
                    break;
                }
            }
            debug!("coordinator worker stopped");
        });

        Self { task_tx, result_rx }
    }

    /// Hand the worker one block's task. Blocks while a previous block is
    /// still in flight (input capacity is 1).
    ///
    /// The task must have at least one pending sink; the caller checks.
    pub async fn submit(&self, task: TaskWithData) -> Result<(), EngineError> {
        self.task_tx
            .send(task)
            .await
            .map_err(|_| EngineError::CoordinatorClosed)
    }

    /// Wait for the result of the last submitted task.
    pub async fn recv_result(&mut self) -> Result<Task, EngineError> {
        self.result_rx
            .recv()
            .await
            .ok_or(EngineError::CoordinatorClosed)
    }
}

/// Fan one task out to its pending sinks and collect reports until all have
/// arrived or the deadline fires, whichever comes first.
async fn deliver(engines: &EngineMap, task_with_data: TaskWithData, atom_timeout: Duration) -> Task {
    let TaskWithData { mut task, data } = task_with_data;
    let pending = task.pending();
    if pending.is_empty() {
        // Caller contract violation; nothing to do either way.
        warn!(height = task.height(), "task submitted with no pending sinks");
        return task;
    }

    info!(
        height = task.height(),
        sinks = %pending.len(),
        "delivering block data"
    );

    // Sized to the runner count so no runner ever blocks on an unread report.
    let (report_tx, mut report_rx) = mpsc::channel(pending.len());
    let (cancel_tx, cancel_rx) = watch::channel(false);

    for sink in &pending {
        tokio::spawn(run_atom_task(
            *sink,
            data.get(sink).cloned(),
            engines.get(sink).cloned(),
            cancel_rx.clone(),
            report_tx.clone(),
        ));
    }
    drop(report_tx);

    // One deadline for the whole fan-out, started once.
    let deadline = tokio::time::sleep(atom_timeout);
    tokio::pin!(deadline);

    let mut reported: HashSet<SinkKind> = HashSet::with_capacity(pending.len());
    while reported.len() < pending.len() {
        tokio::select! {
            maybe_report = report_rx.recv() => {
                let Some(report) = maybe_report else { break };
                reported.insert(report.sink);
                if report.success {
                    task.mark_done(report.sink);
                } else {
                    warn!(height = task.height(), sink = %report.sink, "sink delivery failed");
                }
            }
            _ = &mut deadline => {
                // Signal stragglers to stop; their entries stay pending. A
                // timeout is a failure for exactly the sinks that did not
                // report — logged apart from clean rejections because it
                // points at a hung sink, not a rejecting one.
                let _ = cancel_tx.send(true);
                for sink in pending.iter().filter(|s| !reported.contains(*s)) {
                    warn!(
                        height = task.height(),
                        %sink,
                        timeout_ms = atom_timeout.as_millis() as u64,
                        "sink did not report within the atom task deadline"
                    );
                }
                break;
            }
        }
    }

    task.touch();
    task
}
