//! Opaque per-sink payloads and the in-flight task/data pairing.
//!
//! The data-extraction collaborator produces one payload per configured sink
//! at block-end. The coordination core never looks inside a payload — each
//! concrete sink downcasts to the type it expects via [`SinkPayload::as_any`].
//! Payloads are never persisted: after a restart they are regenerated from
//! chain state while delivery progress is recovered from the task alone.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::sink::SinkKind;
use crate::task::Task;

/// Opaque derived-data payload destined for one sink.
pub trait SinkPayload: fmt::Debug + Send + Sync {
    /// Downcast hook for the concrete sink implementation.
    fn as_any(&self) -> &dyn Any;
}

/// Per-sink payloads for one block.
pub type PayloadMap = HashMap<SinkKind, Arc<dyn SinkPayload>>;

/// Everything extracted from chain state for one committed block.
#[derive(Clone, Debug)]
pub struct BlockPayload {
    /// The committed block's height.
    pub height: u64,
    /// One payload per sink that has data for this block. A sink with no
    /// entry has nothing to deliver and trivially succeeds.
    pub data: PayloadMap,
}

/// A delivery task paired with the payloads it should deliver.
#[derive(Clone, Debug)]
pub struct TaskWithData {
    pub task: Task,
    pub data: PayloadMap,
}

/// Report from one atom task: the delivery of one block's data to one sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AtomTaskResult {
    pub sink: SinkKind,
    pub success: bool,
}
