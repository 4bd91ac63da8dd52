//! Fundamental types for BLOCKCAST delivery coordination.
//!
//! This crate defines the types shared across every other crate in the
//! workspace: the closed set of sink kinds, the per-block delivery task and
//! its persisted JSON codec, the opaque per-sink payload seam, and timestamp
//! helpers.

pub mod payload;
pub mod sink;
pub mod task;
pub mod time;

pub use payload::{AtomTaskResult, BlockPayload, PayloadMap, SinkPayload, TaskWithData};
pub use sink::{SinkKind, SinkKindParseError};
pub use task::{Task, TaskCodecError, TaskStatus};
pub use time::unix_now_secs;
