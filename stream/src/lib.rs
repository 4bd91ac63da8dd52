//! Per-block delivery driver for BLOCKCAST.
//!
//! This crate ties the workspace together into the component a node embeds:
//! - The [`phase`] driver — the prepare → execute → commit retry loop that
//!   owns the cluster-wide delivery lease and the persisted task state.
//! - The [`cache_queue`] — optional bounded buffer decoupling block commit
//!   latency from sink latency.
//! - [`config`], [`metrics`], and [`logging`] — the operational surface.
//! - The [`service`] composition root the host process constructs.

pub mod cache_queue;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod phase;
pub mod service;

pub use cache_queue::{cache_queue, BlockQueue, BlockQueueWorker};
pub use config::StreamConfig;
pub use error::StreamError;
pub use logging::{init_logging, LogFormat};
pub use metrics::StreamMetrics;
pub use phase::{DriverConfig, Phase1Action, PhaseDriver};
pub use service::StreamService;
