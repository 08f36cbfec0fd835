//! Leadership monitor
//!
//! Periodically publishes who leads the consensus domain and whether this
//! node is healthy, so dashboards and load balancers can follow failovers.

use std::time::Duration;

use tokio::sync::watch;

use super::{ClusterRole, ConsensusService};
use crate::common::MetricsSink;

/// Default interval between monitor ticks
pub const MONITOR_INTERVAL: Duration = Duration::from_secs(5);

pub const LEADER_VAR: &str = "raft.leader";
pub const IS_LEADER_GAUGE: &str = "raft.is_leader";
pub const IS_HEALTHY_GAUGE: &str = "raft.is_healthy";

/// Publish one observation of the leadership state
pub fn publish_leadership(sink: &dyn MetricsSink, role: ClusterRole, leader: &str) {
    sink.set_var(LEADER_VAR, leader);
    sink.set_gauge(IS_LEADER_GAUGE, i64::from(role == ClusterRole::Leader));
    sink.set_gauge(IS_HEALTHY_GAUGE, i64::from(role.is_healthy()));

    let this_host = if role == ClusterRole::Leader {
        " (this host)"
    } else {
        ""
    };
    tracing::debug!("raft leader is {}{}; state: {}", leader, this_host, role);
}

/// Publish leadership every `interval` until `shutdown` changes or its
/// sender goes away. The first observation is published immediately.
pub async fn run_monitor(
    service: &dyn ConsensusService,
    sink: &dyn MetricsSink,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                publish_leadership(sink, service.role(), &service.get_leader());
            }
            _ = shutdown.changed() => break,
        }
    }
    tracing::debug!("Leadership monitor stopped");
}
