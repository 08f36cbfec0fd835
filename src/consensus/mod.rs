//! Consensus coordination for the throttle map.
//!
//! Every node runs a raft replica of the throttle directives. Writes go
//! through the leader and return once a majority has committed them; reads
//! are served from the local copy.
//!
//! - [`ConsensusService`]: the contract the rest of the service uses
//! - [`RaftStore`]: the raft-backed implementation
//! - [`LocalCluster`]: an in-process stand-in for tests
//! - [`setup_raft`]: builds a [`RaftStore`] from [`RaftSettings`](crate::common::RaftSettings)

pub mod command;
pub mod local;
pub mod monitor;
pub mod node;
pub mod setup;
pub mod storage;
pub mod store;
pub mod transport;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use raft::StateRole;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::common::Result;
use crate::throttle::{AppThrottle, RecentApp};

pub use command::{Command, ThrottleFsm};
pub use local::{LocalCluster, LocalConsensus};
pub use monitor::{run_monitor, MONITOR_INTERVAL};
pub use node::{RaftHandle, RaftNode, RaftNodeConfig, RaftStatus, Transport};
pub use setup::{setup_raft, Membership};
pub use storage::RaftStorage;
pub use store::RaftStore;

/// Role of this node in the consensus domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClusterRole {
    Leader,
    Follower,
    Candidate,
    /// Engine not running or state not known
    Unknown,
}

impl ClusterRole {
    /// Leaders and followers are healthy; anything else is not
    pub fn is_healthy(&self) -> bool {
        matches!(self, ClusterRole::Leader | ClusterRole::Follower)
    }
}

impl From<StateRole> for ClusterRole {
    fn from(role: StateRole) -> Self {
        match role {
            StateRole::Leader => ClusterRole::Leader,
            StateRole::Follower => ClusterRole::Follower,
            StateRole::Candidate | StateRole::PreCandidate => ClusterRole::Candidate,
        }
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterRole::Leader => "Leader",
            ClusterRole::Follower => "Follower",
            ClusterRole::Candidate => "Candidate",
            ClusterRole::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Replicated throttle state as seen by one node.
///
/// Writes are only accepted on the leader and complete once committed by a
/// majority. Reads are local and may lag on followers.
#[async_trait]
pub trait ConsensusService: Send + Sync {
    /// Throttle `app_name`.
    ///
    /// Without `expire_at` the throttle lasts `ttl_minutes` (or the default
    /// TTL when that is not positive). Without `ratio` an existing ratio is
    /// kept, new entries get the default.
    async fn throttle_app(
        &self,
        app_name: &str,
        ttl_minutes: i64,
        expire_at: Option<DateTime<Utc>>,
        ratio: Option<f64>,
    ) -> Result<()>;

    /// Remove the throttle on `app_name`; absent apps succeed
    async fn unthrottle_app(&self, app_name: &str) -> Result<()>;

    /// Non-expired throttles in the local copy
    fn throttled_apps_map(&self) -> HashMap<String, AppThrottle>;

    /// Apps recently checked on this node
    fn recent_apps_map(&self) -> HashMap<String, RecentApp>;

    fn role(&self) -> ClusterRole;

    fn is_healthy(&self) -> bool {
        self.role().is_healthy()
    }

    fn is_leader(&self) -> bool {
        self.role() == ClusterRole::Leader
    }

    /// Address of the current leader, empty when unknown
    fn get_leader(&self) -> String;

    fn get_state_description(&self) -> String;

    /// Addresses of every voter in the consensus domain
    fn get_shared_domain_services(&self) -> Result<Vec<String>>;

    /// Record a check by `app_name` and report whether it is throttled
    fn check_app(&self, app_name: &str) -> bool;

    /// Run the leadership monitor until `shutdown` changes.
    ///
    /// Only one monitor may run per instance.
    async fn monitor(&self, shutdown: watch::Receiver<bool>) -> Result<()>;
}

/// Validate a throttle request before it is proposed
pub(crate) fn validate_throttle(app_name: &str, ratio: Option<f64>) -> Result<()> {
    if app_name.trim().is_empty() {
        return Err(crate::common::Error::InvalidArgument(
            "app name must not be empty".into(),
        ));
    }
    if let Some(ratio) = ratio {
        if ratio.is_nan() || !(0.0..=1.0).contains(&ratio) {
            return Err(crate::common::Error::InvalidArgument(format!(
                "throttle ratio must be within [0, 1], got {}",
                ratio
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_mapping() {
        assert_eq!(ClusterRole::from(StateRole::Leader), ClusterRole::Leader);
        assert_eq!(ClusterRole::from(StateRole::PreCandidate), ClusterRole::Candidate);
        assert!(ClusterRole::Follower.is_healthy());
        assert!(!ClusterRole::Candidate.is_healthy());
        assert!(!ClusterRole::Unknown.is_healthy());
        assert_eq!(ClusterRole::Leader.to_string(), "Leader");
    }

    #[test]
    fn test_validate_throttle() {
        assert!(validate_throttle("svc-a", Some(0.5)).is_ok());
        assert!(validate_throttle("svc-a", None).is_ok());
        assert!(validate_throttle("svc-a", Some(0.0)).is_ok());
        assert!(validate_throttle("svc-a", Some(1.0)).is_ok());
        assert!(validate_throttle("", Some(0.5)).is_err());
        assert!(validate_throttle("svc-a", Some(1.5)).is_err());
        assert!(validate_throttle("svc-a", Some(-0.1)).is_err());
        assert!(validate_throttle("svc-a", Some(f64::NAN)).is_err());
    }
}
