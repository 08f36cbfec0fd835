//! Common utilities and types shared across quorate

pub mod config;
pub mod error;
pub mod metrics;
pub mod utils;

pub use config::{Config, HttpSettings, RaftSettings};
pub use error::{Error, Result};
pub use metrics::{Gauge, MetricsRegistry, MetricsSink};
pub use utils::{node_id_for, normalize_raft_node, timestamp_now};
