//! In-process consensus for tests and local development.
//!
//! [`LocalCluster`] keeps one shared command log and a per-node apply cursor,
//! so a test can elect leaders, crash and partition nodes, and watch
//! followers catch up, all deterministically and without sockets. Each node
//! is a [`LocalConsensus`] implementing [`ConsensusService`] with the same
//! leader-only, majority-commit rules as the raft store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::command::{Command, ThrottleFsm};
use super::monitor::{run_monitor, MONITOR_INTERVAL};
use super::{validate_throttle, ClusterRole, ConsensusService};
use crate::common::{timestamp_now, Error, MetricsRegistry, Result};
use crate::throttle::{resolve_expire_at, AppThrottle, RecentApp, Throttler};

struct LocalNode {
    address: String,
    alive: bool,
    partitioned: bool,
    /// Number of log entries applied to `fsm`
    applied: usize,
    fsm: ThrottleFsm,
}

impl LocalNode {
    fn reachable(&self) -> bool {
        self.alive && !self.partitioned
    }
}

struct ClusterState {
    log: Vec<Command>,
    nodes: Vec<LocalNode>,
    leader: Option<usize>,
    term: u64,
}

impl ClusterState {
    fn quorum(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    fn reachable_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.reachable()).count()
    }

    fn catch_up(&mut self, index: usize) {
        let ClusterState { log, nodes, .. } = self;
        let node = &mut nodes[index];
        for command in &log[node.applied..] {
            node.fsm.apply(command);
        }
        node.applied = log.len();
    }

    fn leader_address_seen_by(&self, index: usize) -> String {
        match self.leader {
            Some(leader) if self.nodes[index].reachable() => self.nodes[leader].address.clone(),
            _ => String::new(),
        }
    }

    fn role_of(&self, index: usize) -> ClusterRole {
        let node = &self.nodes[index];
        if !node.alive {
            return ClusterRole::Unknown;
        }
        if node.partitioned {
            return ClusterRole::Candidate;
        }
        match self.leader {
            Some(leader) if leader == index => ClusterRole::Leader,
            Some(_) => ClusterRole::Follower,
            None => ClusterRole::Candidate,
        }
    }
}

/// A simulated consensus domain
pub struct LocalCluster {
    state: Arc<Mutex<ClusterState>>,
    nodes: Vec<Arc<LocalConsensus>>,
}

impl LocalCluster {
    /// A cluster of `size` nodes named `node-<i>:10008`, without a leader
    pub fn new(size: usize) -> Self {
        let addresses: Vec<String> = (0..size).map(|i| format!("node-{}:10008", i)).collect();
        Self::with_addresses(&addresses)
    }

    pub fn with_addresses(addresses: &[String]) -> Self {
        let throttlers: Vec<Arc<Throttler>> =
            addresses.iter().map(|_| Arc::new(Throttler::new())).collect();
        let state = Arc::new(Mutex::new(ClusterState {
            log: Vec::new(),
            nodes: addresses
                .iter()
                .zip(&throttlers)
                .map(|(address, throttler)| LocalNode {
                    address: address.clone(),
                    alive: true,
                    partitioned: false,
                    applied: 0,
                    fsm: ThrottleFsm::new(throttler.clone()),
                })
                .collect(),
            leader: None,
            term: 0,
        }));

        let nodes = throttlers
            .into_iter()
            .enumerate()
            .map(|(index, throttler)| {
                Arc::new(LocalConsensus {
                    index,
                    state: state.clone(),
                    throttler,
                    metrics: Arc::new(MetricsRegistry::new()),
                    monitor_interval: MONITOR_INTERVAL,
                    monitoring: AtomicBool::new(false),
                })
            })
            .collect();

        Self { state, nodes }
    }

    /// Same as [`LocalCluster::new`], with a shorter monitor interval
    pub fn with_monitor_interval(size: usize, interval: Duration) -> Self {
        let mut cluster = Self::new(size);
        for node in &mut cluster.nodes {
            if let Some(node) = Arc::get_mut(node) {
                node.monitor_interval = interval;
            }
        }
        cluster
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, index: usize) -> Arc<LocalConsensus> {
        self.nodes[index].clone()
    }

    pub fn leader(&self) -> Option<usize> {
        self.state.lock().leader
    }

    pub fn term(&self) -> u64 {
        self.state.lock().term
    }

    /// Make `index` the leader of a new term.
    ///
    /// Needs the node to be reachable and a majority of nodes reachable. The
    /// new leader catches up on the whole committed log first.
    pub fn elect(&self, index: usize) -> Result<()> {
        let mut state = self.state.lock();
        if !state.nodes[index].reachable() {
            return Err(Error::InvalidState(format!(
                "{} cannot campaign: unreachable",
                state.nodes[index].address
            )));
        }
        if state.reachable_count() < state.quorum() {
            return Err(Error::ConsensusTimeout);
        }
        state.catch_up(index);
        state.term += 1;
        state.leader = Some(index);
        tracing::debug!("{} elected at term {}", state.nodes[index].address, state.term);
        Ok(())
    }

    /// Stop a node; a crashed leader leaves the cluster leaderless
    pub fn crash(&self, index: usize) {
        let mut state = self.state.lock();
        state.nodes[index].alive = false;
        if state.leader == Some(index) {
            state.leader = None;
        }
    }

    /// Bring a crashed node back and replay what it missed
    pub fn restart(&self, index: usize) {
        let mut state = self.state.lock();
        state.nodes[index].alive = true;
        if !state.nodes[index].partitioned {
            state.catch_up(index);
        }
    }

    /// Cut a node off from the rest; an isolated leader steps down
    pub fn partition(&self, index: usize) {
        let mut state = self.state.lock();
        state.nodes[index].partitioned = true;
        if state.leader == Some(index) {
            state.leader = None;
        }
    }

    /// Reconnect a node and replay what it missed
    pub fn heal(&self, index: usize) {
        let mut state = self.state.lock();
        state.nodes[index].partitioned = false;
        if state.nodes[index].alive {
            state.catch_up(index);
        }
    }

    /// Number of commands committed so far
    pub fn committed(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Number of commands applied on node `index`
    pub fn applied(&self, index: usize) -> usize {
        self.state.lock().nodes[index].applied
    }
}

/// One node of a [`LocalCluster`]
pub struct LocalConsensus {
    index: usize,
    state: Arc<Mutex<ClusterState>>,
    throttler: Arc<Throttler>,
    metrics: Arc<MetricsRegistry>,
    monitor_interval: Duration,
    monitoring: AtomicBool,
}

impl LocalConsensus {
    pub fn address(&self) -> String {
        self.state.lock().nodes[self.index].address.clone()
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Append `command` and apply it on every reachable node
    fn commit(&self, command: Command) -> Result<()> {
        let mut state = self.state.lock();
        if !state.nodes[self.index].alive {
            return Err(Error::InvalidState("node is down".into()));
        }
        if state.leader != Some(self.index) {
            return Err(Error::NotLeader(state.leader_address_seen_by(self.index)));
        }
        if state.reachable_count() < state.quorum() {
            return Err(Error::ConsensusTimeout);
        }

        state.log.push(command);
        for index in 0..state.nodes.len() {
            if state.nodes[index].reachable() {
                state.catch_up(index);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConsensusService for LocalConsensus {
    async fn throttle_app(
        &self,
        app_name: &str,
        ttl_minutes: i64,
        expire_at: Option<DateTime<Utc>>,
        ratio: Option<f64>,
    ) -> Result<()> {
        validate_throttle(app_name, ratio)?;
        self.commit(Command::ThrottleApp {
            app_name: app_name.to_string(),
            ratio,
            expire_at: resolve_expire_at(timestamp_now(), ttl_minutes, expire_at),
            ttl_minutes,
        })
    }

    async fn unthrottle_app(&self, app_name: &str) -> Result<()> {
        validate_throttle(app_name, None)?;
        self.commit(Command::UnthrottleApp {
            app_name: app_name.to_string(),
        })
    }

    fn throttled_apps_map(&self) -> HashMap<String, AppThrottle> {
        self.throttler.throttled_apps_map()
    }

    fn recent_apps_map(&self) -> HashMap<String, RecentApp> {
        self.throttler.recent_apps_map()
    }

    fn role(&self) -> ClusterRole {
        self.state.lock().role_of(self.index)
    }

    fn get_leader(&self) -> String {
        self.state.lock().leader_address_seen_by(self.index)
    }

    fn get_state_description(&self) -> String {
        let state = self.state.lock();
        let leader = state.leader_address_seen_by(self.index);
        format!(
            "{} at {} (term {}, leader {}, commit {}, applied {})",
            state.role_of(self.index),
            state.nodes[self.index].address,
            state.term,
            if leader.is_empty() { "unknown" } else { &leader },
            state.log.len(),
            state.nodes[self.index].applied
        )
    }

    fn get_shared_domain_services(&self) -> Result<Vec<String>> {
        let state = self.state.lock();
        if !state.nodes[self.index].alive {
            return Err(Error::Membership("node is down".into()));
        }
        Ok(state.nodes.iter().map(|n| n.address.clone()).collect())
    }

    fn check_app(&self, app_name: &str) -> bool {
        self.throttler.check_app(app_name)
    }

    async fn monitor(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState("leadership monitor already running".into()));
        }
        run_monitor(self, self.metrics.as_ref(), self.monitor_interval, shutdown).await;
        Ok(())
    }
}
