//! The closed set of downstream sink kinds.
//!
//! The set of sinks is fixed per deployment, so sink identity is a compile-time
//! enumeration rather than a free-form string. The lowercase names double as
//! the config syntax and as the keys of the persisted done-map.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A kind of downstream sink that receives per-block derived data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Relational store (order/fill/balance tables).
    Relational,
    /// Pub/sub fan-out for push notifications.
    PubSub,
    /// Message queue for downstream consumers (e.g. candle builders).
    Queue,
    /// WebSocket fan-out for live market data clients.
    WebSocket,
}

impl SinkKind {
    /// All sink kinds, in done-map order.
    pub const ALL: [SinkKind; 4] = [
        SinkKind::Relational,
        SinkKind::PubSub,
        SinkKind::Queue,
        SinkKind::WebSocket,
    ];

    /// The lowercase name used in config strings and the persisted done-map.
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Relational => "relational",
            SinkKind::PubSub => "pubsub",
            SinkKind::Queue => "queue",
            SinkKind::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a config string names an unknown sink kind.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown sink kind: {0}")]
pub struct SinkKindParseError(pub String);

impl FromStr for SinkKind {
    type Err = SinkKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "relational" => Ok(SinkKind::Relational),
            "pubsub" => Ok(SinkKind::PubSub),
            "queue" => Ok(SinkKind::Queue),
            "websocket" => Ok(SinkKind::WebSocket),
            other => Err(SinkKindParseError(other.to_string())),
        }
    }
}
