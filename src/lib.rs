//! # quorate
//!
//! Consensus coordination for a distributed throttling service:
//! - Raft (tikv raft-rs) replicates app throttle directives across nodes
//! - Writes go through the leader and complete on majority commit
//! - Reads and throttle checks are served from each node's local copy
//! - A leadership monitor publishes leader/health gauges
//!
//! ## Architecture

#![allow(clippy::result_large_err)]
//!
//! ```text
//!        operator API (HTTP)            throttle checks
//!               │                             │
//! ┌─────────────▼─────────────────────────────▼───┐
//! │ ConsensusService (RaftStore)                   │
//! │  propose ──> RaftNode driver ──> ThrottleFsm   │──> Throttler (local map)
//! │                  │   ▲                         │
//! │            sled log  │ /raft/messages          │
//! └──────────────────────┼─────────────────────────┘
//!                        ▼
//!                 peer nodes (same binary)
//! ```
//!
//! ## Usage
//!
//! ```bash
//! quorate serve \
//!   --bind node1:10008 \
//!   --nodes node1,node2,node3 \
//!   --data-dir ./raft-data \
//!   --listen 0.0.0.0:8111
//!
//! curl -X POST 'http://node1:8111/throttle-app/svc-a?ttl=30&ratio=0.5'
//! curl 'http://node2:8111/throttled-apps'
//! ```

pub mod common;
pub mod consensus;
pub mod server;
pub mod throttle;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use consensus::{setup_raft, ClusterRole, ConsensusService, LocalCluster, RaftStore};
pub use server::ThrottleServer;
pub use throttle::{AppThrottle, RecentApp, Throttler};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
