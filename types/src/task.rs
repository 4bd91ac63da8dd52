//! The per-block delivery task and its persisted codec.
//!
//! A [`Task`] records, for one block height, which sinks have confirmed
//! delivery of that block's derived data. It is the only piece of state that
//! survives a restart: the task is serialized to a flat JSON document and
//! written to the lock/state store on every commit attempt, and a resuming
//! process reconstructs its progress from that document alone (payloads are
//! regenerated from chain state, never persisted).
//!
//! Within one task's lifetime, done-map entries only ever flip
//! `false → true`; [`Task::mark_done`] is the sole mutator and cannot flip an
//! entry back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::sink::SinkKind;
use crate::time::unix_now_secs;

/// Delivery status derived from a task's done-map. Never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    /// No sink has confirmed delivery (or no sink is configured).
    Fail,
    /// Some, but not all, sinks have confirmed delivery.
    PartialSuccess,
    /// Every configured sink has confirmed delivery.
    Success,
}

/// Error raised by the typed serialize/parse pair for persisted task state.
#[derive(Debug, Error)]
pub enum TaskCodecError {
    #[error("task state does not serialize: {0}")]
    Serialize(serde_json::Error),

    #[error("persisted task state does not parse: {0}")]
    Parse(serde_json::Error),
}

/// Progress record for delivering one block's derived data to all sinks.
///
/// The JSON field names are the wire format of the state store and must not
/// change: `{"height":…,"doneMap":{…},"updatedAt":…}`. A `BTreeMap` keeps the
/// serialized form stable and human-diffable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// The block height this task covers. Immutable once created.
    height: u64,
    /// Per-sink delivery confirmation, `false` until the sink confirms.
    done_map: BTreeMap<SinkKind, bool>,
    /// Unix seconds of the last mutation. Informational only.
    updated_at: u64,
}

impl Task {
    /// Create a fresh task for `height` with every given sink pending.
    pub fn new(height: u64, sinks: impl IntoIterator<Item = SinkKind>) -> Self {
        Self {
            height,
            done_map: sinks.into_iter().map(|k| (k, false)).collect(),
            updated_at: unix_now_secs(),
        }
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn updated_at(&self) -> u64 {
        self.updated_at
    }

    /// Whether `sink` has confirmed delivery. Unconfigured sinks read as done
    /// (there is nothing to deliver to them).
    pub fn is_done(&self, sink: SinkKind) -> bool {
        self.done_map.get(&sink).copied().unwrap_or(true)
    }

    /// The sinks still awaiting confirmation, in stable order.
    pub fn pending(&self) -> Vec<SinkKind> {
        self.done_map
            .iter()
            .filter(|(_, done)| !**done)
            .map(|(k, _)| *k)
            .collect()
    }

    /// Record a confirmed delivery for `sink` and refresh `updated_at`.
    ///
    /// Entries only flip `false → true`; marking an already-done or
    /// unconfigured sink is a no-op. Returns whether an entry flipped.
    pub fn mark_done(&mut self, sink: SinkKind) -> bool {
        match self.done_map.get_mut(&sink) {
            Some(done) if !*done => {
                *done = true;
                self.updated_at = unix_now_secs();
                true
            }
            _ => false,
        }
    }

    /// Refresh `updated_at` without changing delivery state.
    pub fn touch(&mut self) {
        self.updated_at = unix_now_secs();
    }

    /// Derive the task's status from its done-map.
    pub fn status(&self) -> TaskStatus {
        if self.done_map.is_empty() || self.done_map.values().all(|done| !done) {
            TaskStatus::Fail
        } else if self.done_map.values().all(|done| *done) {
            TaskStatus::Success
        } else {
            TaskStatus::PartialSuccess
        }
    }

    /// Serialize to the flat JSON form persisted in the state store.
    pub fn to_json(&self) -> Result<String, TaskCodecError> {
        serde_json::to_string(self).map_err(TaskCodecError::Serialize)
    }

    /// Parse a task back from its persisted JSON form.
    ///
    /// The empty string is the store's "no state yet" sentinel and is a
    /// caller-side check, not a parse success.
    pub fn from_json(s: &str) -> Result<Self, TaskCodecError> {
        serde_json::from_str(s).map_err(TaskCodecError::Parse)
    }

    /// Test-only constructor with explicit fields.
    #[doc(hidden)]
    pub fn from_parts(height: u64, done_map: BTreeMap<SinkKind, bool>, updated_at: u64) -> Self {
        Self {
            height,
            done_map,
            updated_at,
        }
    }
}
