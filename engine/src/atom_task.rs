//! Atom task runner — one sink delivery, exactly one report.
//!
//! Every failure mode inside a sink (clean `Err`, panic, missing payload,
//! missing engine) converges to a single `AtomTaskResult` on the report
//! channel. Nothing escapes: a panicking sink fails its own delivery and
//! nothing else.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, warn};

use blockcast_types::{AtomTaskResult, SinkKind, SinkPayload};

use crate::StreamEngine;

/// Deliver one block's payload to one sink and report the outcome.
///
/// An absent payload means the extraction step produced nothing for this
/// sink: trivial success, the engine is not invoked. The write itself runs on
/// the blocking pool; `cancel` is the coordinator's deadline signal — a
/// runner that has not started its write when the signal arrives skips it,
/// while a write already executing cannot be interrupted mid-call and
/// finishes detached (its late outcome is discarded, the delivery is already
/// reported failed).
pub async fn run_atom_task(
    sink: SinkKind,
    payload: Option<Arc<dyn SinkPayload>>,
    engine: Option<Arc<dyn StreamEngine>>,
    mut cancel: watch::Receiver<bool>,
    report: mpsc::Sender<AtomTaskResult>,
) {
    let success = match (payload, engine) {
        // Nothing extracted for this sink: nothing to do is not a failure.
        (None, _) => true,
        (Some(_), None) => {
            error!(%sink, "payload produced for a sink with no configured engine");
            false
        }
        (Some(payload), Some(engine)) => {
            if *cancel.borrow() {
                false
            } else {
                let write = tokio::task::spawn_blocking(move || engine.write(payload.as_ref()));
                let cancelled = async {
                    loop {
                        if cancel.changed().await.is_err() {
                            // Coordinator gone without cancelling; keep waiting
                            // on the write itself.
                            std::future::pending::<()>().await;
                        }
                        if *cancel.borrow() {
                            break;
                        }
                    }
                };
                tokio::select! {
                    // A write that completes in the same instant the deadline
                    // fires still counts.
                    biased;
                    joined = write => match joined {
                        Ok(Ok(())) => true,
                        Ok(Err(e)) => {
                            warn!(%sink, error = %e, "sink rejected write");
                            false
                        }
                        Err(join_err) => {
                            if join_err.is_panic() {
                                error!(%sink, "sink write panicked");
                            }
                            false
                        }
                    },
                    _ = cancelled => false,
                }
            }
        }
    };

    // The channel is sized to the number of runners, so this never blocks;
    // after a deadline the coordinator stops reading and the send just lands
    // in a slot nobody drains.
    let _ = report.send(AtomTaskResult { sink, success }).await;
}
