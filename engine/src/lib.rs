//! Sink engines and the per-block delivery coordinator.
//!
//! An "engine" is the write capability of one downstream sink (relational
//! store, pub/sub fan-out, message queue, websocket fan-out). The concrete
//! implementations live with their sinks; this crate owns the trait they
//! implement, the config syntax that names them, and the machinery that
//! drives them: one [`atom task`](atom_task) per sink delivery, fanned out
//! and collected by the [`Coordinator`] under a single deadline.

pub mod atom_task;
pub mod coordinator;
pub mod error;

pub use coordinator::Coordinator;
pub use error::EngineError;

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use blockcast_types::{SinkKind, SinkPayload};

/// The write capability of one downstream sink.
///
/// `write` is synchronous and may block (the coordinator runs it on the
/// blocking pool). A sink is expected to report failure through `Err` rather
/// than panicking; the atom task runner provides a panic boundary anyway so a
/// misbehaving sink can only ever fail its own delivery.
///
/// Every write must be idempotent for a given block height (upsert or
/// overwrite semantics): a crash between delivery and durable commit causes
/// the same height to be re-delivered on resume.
pub trait StreamEngine: Send + Sync {
    /// The connection target this engine writes to, for logging.
    fn url(&self) -> &str;

    /// Deliver one block's payload to the sink.
    fn write(&self, payload: &dyn SinkPayload) -> Result<(), EngineError>;
}

/// The configured sinks, one engine per kind, owned by the composition root.
pub type EngineMap = HashMap<SinkKind, Arc<dyn StreamEngine>>;

/// One parsed `kind|url` item from the engine config string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSpec {
    pub kind: SinkKind,
    pub url: String,
}

/// Parse the engine config string: comma-separated `kind|url` items, e.g.
/// `"relational|mysql://db:3306/orders,websocket|0.0.0.0:6810"`.
pub fn parse_engine_specs(config: &str) -> Result<Vec<EngineSpec>, EngineError> {
    if config.trim().is_empty() {
        return Err(EngineError::InvalidSpec("engine config is empty".into()));
    }

    let mut specs: Vec<EngineSpec> = Vec::new();
    for item in config.split(',') {
        let item = item.trim();
        let (kind, url) = item.split_once('|').ok_or_else(|| {
            EngineError::InvalidSpec(format!(
                "expected \"kind|url\", got {item:?} in list {config:?}"
            ))
        })?;
        let kind = SinkKind::from_str(kind.trim())
            .map_err(|e| EngineError::InvalidSpec(e.to_string()))?;
        let url = url.trim();
        if url.is_empty() {
            return Err(EngineError::InvalidSpec(format!("{kind} has an empty url")));
        }
        if specs.iter().any(|s| s.kind == kind) {
            return Err(EngineError::InvalidSpec(format!("{kind} is listed twice")));
        }
        specs.push(EngineSpec {
            kind,
            url: url.to_string(),
        });
    }
    Ok(specs)
}
