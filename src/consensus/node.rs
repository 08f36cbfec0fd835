//! Raft node driver.
//!
//! [`RaftNode`] wraps tikv/raft-rs's `RawNode` and is owned by exactly one
//! task, which ticks the engine, feeds it peer messages and proposals from a
//! mailbox, persists and applies ready state, and publishes a [`RaftStatus`]
//! snapshot after every cycle. Everything else talks to it through a
//! cloneable [`RaftHandle`].
//!
//! ```text
//!  RaftHandle::propose ──┐                     ┌──> Transport::send (peers)
//!  transport (peer msgs) ┼─> mailbox ─> RaftNode ──> ThrottleFsm::apply
//!  RaftHandle::campaign ─┘                     └──> RaftStatus (shared)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use raft::eraftpb::{Entry, EntryType, Message};
use raft::{RawNode, StateRole, Storage};
use slog::{o, Logger};
use tokio::sync::{mpsc, oneshot, watch};

use super::command::{Command, ThrottleFsm};
use super::storage::RaftStorage;
use super::ClusterRole;
use crate::common::{Error, Result};

/// Capacity of the driver mailbox; peer messages beyond it are dropped
const MAILBOX_CAPACITY: usize = 4096;

/// Outbound side of the peer transport
pub trait Transport: Send + Sync + 'static {
    /// Hand messages to their recipients. Best effort: raft retransmits.
    fn send(&self, messages: Vec<Message>);
}

/// Configuration for a raft node driver
#[derive(Debug, Clone)]
pub struct RaftNodeConfig {
    /// Raft id of this node
    pub id: u64,
    /// Every voter's id and address, this node included
    pub members: HashMap<u64, String>,
    pub tick_interval: Duration,
    pub election_tick: usize,
    pub heartbeat_tick: usize,
    /// Applied entries between snapshots (0 disables compaction)
    pub snapshot_threshold: u64,
    pub max_size_per_msg: u64,
    pub max_inflight_msgs: usize,
}

impl RaftNodeConfig {
    pub fn new(id: u64, members: HashMap<u64, String>) -> Self {
        Self {
            id,
            members,
            tick_interval: Duration::from_millis(100),
            election_tick: 10,
            heartbeat_tick: 3,
            snapshot_threshold: 10_000,
            max_size_per_msg: 1024 * 1024,
            max_inflight_msgs: 256,
        }
    }

    fn to_raft_config(&self) -> raft::Config {
        raft::Config {
            id: self.id,
            election_tick: self.election_tick,
            heartbeat_tick: self.heartbeat_tick,
            max_size_per_msg: self.max_size_per_msg,
            max_inflight_msgs: self.max_inflight_msgs,
            check_quorum: true,
            pre_vote: true,
            ..Default::default()
        }
    }
}

/// Point-in-time view of the engine, refreshed by the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaftStatus {
    pub id: u64,
    pub role: ClusterRole,
    /// 0 when no leader is known
    pub leader_id: u64,
    pub term: u64,
    pub commit_index: u64,
    pub applied_index: u64,
    pub voters: Vec<u64>,
}

impl RaftStatus {
    fn stopped(id: u64) -> Self {
        Self {
            id,
            role: ClusterRole::Unknown,
            leader_id: 0,
            term: 0,
            commit_index: 0,
            applied_index: 0,
            voters: Vec::new(),
        }
    }
}

enum RaftMsg {
    Propose {
        command: Command,
        tx: oneshot::Sender<Result<()>>,
    },
    Step(Message),
    Campaign,
}

/// Cloneable access to a running [`RaftNode`]
#[derive(Clone)]
pub struct RaftHandle {
    id: u64,
    mailbox: mpsc::Sender<RaftMsg>,
    status: Arc<RwLock<RaftStatus>>,
}

impl RaftHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> RaftStatus {
        self.status.read().clone()
    }

    /// Propose a command and wait until it is committed and applied locally.
    ///
    /// No timeout is applied here; callers bound the wait themselves.
    pub async fn propose(&self, command: Command) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(RaftMsg::Propose { command, tx })
            .await
            .map_err(|_| Error::InvalidState("raft node is not running".into()))?;
        rx.await.map_err(|_| Error::ProposalDropped)?
    }

    /// Deliver a message from a peer. Dropped if the mailbox is full.
    pub fn step(&self, message: Message) {
        if let Err(e) = self.mailbox.try_send(RaftMsg::Step(message)) {
            tracing::debug!("Dropping inbound raft message: {}", e);
        }
    }

    /// Ask the node to start an election right away
    pub async fn campaign(&self) -> Result<()> {
        self.mailbox
            .send(RaftMsg::Campaign)
            .await
            .map_err(|_| Error::InvalidState("raft node is not running".into()))
    }
}

/// The driver that owns the raft-rs `RawNode`
pub struct RaftNode {
    config: RaftNodeConfig,
    raw: RawNode<RaftStorage>,
    fsm: ThrottleFsm,
    transport: Arc<dyn Transport>,
    mailbox: mpsc::Receiver<RaftMsg>,
    status: Arc<RwLock<RaftStatus>>,
    /// Proposals waiting for their entry to be applied, by proposal id,
    /// with the term they were proposed in
    pending: HashMap<u64, (u64, oneshot::Sender<Result<()>>)>,
    next_proposal_id: u64,
    last_snapshot_index: u64,
    voters: Vec<u64>,
}

impl RaftNode {
    /// Build a node over `storage`.
    ///
    /// A fresh data directory gets the configured members as its voter set;
    /// an existing one keeps what it recorded. The state machine is restored
    /// from the latest snapshot, and committed entries after it are replayed
    /// by the engine once the driver runs.
    pub fn new(
        config: RaftNodeConfig,
        storage: RaftStorage,
        fsm: ThrottleFsm,
        transport: Arc<dyn Transport>,
    ) -> Result<(Self, RaftHandle)> {
        let initial = storage.initial_state()?;
        if initial.conf_state.voters.is_empty() {
            let mut voters: Vec<u64> = config.members.keys().copied().collect();
            voters.sort_unstable();
            let mut cs = raft::eraftpb::ConfState::default();
            cs.voters = voters.clone();
            storage.set_conf_state(&cs)?;
            tracing::info!("Bootstrapped raft voter set: {:?}", voters);
        }
        let voters = storage.conf_state()?.voters;

        let snapshot = storage.latest_snapshot()?;
        let last_snapshot_index = snapshot.get_metadata().index;
        if last_snapshot_index > 0 {
            fsm.restore(snapshot.get_data())?;
        }

        let raft_config = config.to_raft_config();
        raft_config.validate()?;

        // raft-rs logs through slog; our own logging goes through tracing
        let logger = Logger::root(slog::Discard, o!());
        let raw = RawNode::new(&raft_config, storage, &logger)?;

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let status = Arc::new(RwLock::new(RaftStatus::stopped(config.id)));
        let handle = RaftHandle {
            id: config.id,
            mailbox: tx,
            status: status.clone(),
        };

        let mut node = Self {
            config,
            raw,
            fsm,
            transport,
            mailbox: rx,
            status,
            pending: HashMap::new(),
            next_proposal_id: 1,
            last_snapshot_index,
            voters,
        };
        node.publish_status();
        Ok((node, handle))
    }

    /// Drive the engine until shutdown is signaled or every handle is gone.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(
            "Raft node {:016x} started (tick={}ms, voters={})",
            self.config.id,
            self.config.tick_interval.as_millis(),
            self.voters.len()
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.raw.tick();
                }
                msg = self.mailbox.recv() => match msg {
                    Some(msg) => self.handle(msg),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }

            while let Ok(msg) = self.mailbox.try_recv() {
                self.handle(msg);
            }

            if let Err(e) = self.on_ready() {
                tracing::error!("Raft ready handling failed: {}", e);
            }
            self.drop_stale_pending();
            self.publish_status();
        }

        self.drop_pending();
        *self.status.write() = RaftStatus::stopped(self.config.id);
        if let Err(e) = self.raw.store().flush() {
            tracing::warn!("Failed to flush raft storage on shutdown: {}", e);
        }
        tracing::info!("Raft node {:016x} stopped", self.config.id);
    }

    fn leader_address(&self) -> String {
        self.config
            .members
            .get(&self.raw.raft.leader_id)
            .cloned()
            .unwrap_or_default()
    }

    fn handle(&mut self, msg: RaftMsg) {
        match msg {
            RaftMsg::Propose { command, tx } => self.propose(command, tx),
            RaftMsg::Step(message) => {
                if let Err(e) = self.raw.step(message) {
                    tracing::debug!("Raft step rejected a message: {}", e);
                }
            }
            RaftMsg::Campaign => {
                if let Err(e) = self.raw.campaign() {
                    tracing::warn!("Campaign failed: {}", e);
                }
            }
        }
    }

    fn propose(&mut self, command: Command, tx: oneshot::Sender<Result<()>>) {
        // Followers would forward the proposal; writes must go to the leader
        if self.raw.raft.state != StateRole::Leader {
            let _ = tx.send(Err(Error::NotLeader(self.leader_address())));
            return;
        }

        let data = match command.encode() {
            Ok(data) => data,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };

        let proposal_id = self.next_proposal_id;
        self.next_proposal_id += 1;
        let term = self.raw.raft.term;
        let context = proposal_context(self.config.id, term, proposal_id);

        match self.raw.propose(context, data) {
            Ok(()) => {
                self.pending.insert(proposal_id, (term, tx));
            }
            Err(e) => {
                let _ = tx.send(Err(e.into()));
            }
        }
    }

    fn on_ready(&mut self) -> Result<()> {
        if !self.raw.has_ready() {
            return Ok(());
        }
        let mut ready = self.raw.ready();

        if !ready.messages().is_empty() {
            self.transport.send(ready.take_messages());
        }

        if !ready.snapshot().is_empty() {
            let snapshot = ready.snapshot().clone();
            let index = snapshot.get_metadata().index;
            self.raw.store().apply_snapshot(&snapshot)?;
            self.fsm.restore(snapshot.get_data())?;
            self.last_snapshot_index = index;
            self.voters = snapshot.get_metadata().get_conf_state().voters.clone();
            tracing::info!("Installed raft snapshot at index {}", index);
        }

        self.apply_committed(ready.take_committed_entries())?;

        if !ready.entries().is_empty() {
            self.raw.store().append(ready.entries())?;
        }
        if let Some(hs) = ready.hs() {
            self.raw.store().set_hard_state(hs)?;
        }
        if ready.must_sync() {
            self.raw.store().flush()?;
        }
        if !ready.persisted_messages().is_empty() {
            self.transport.send(ready.take_persisted_messages());
        }

        let mut light = self.raw.advance(ready);
        if let Some(commit) = light.commit_index() {
            self.raw.store().set_commit(commit)?;
        }
        if !light.messages().is_empty() {
            self.transport.send(light.take_messages());
        }
        self.apply_committed(light.take_committed_entries())?;
        self.raw.advance_apply();

        self.maybe_compact()
    }

    fn apply_committed(&mut self, entries: Vec<Entry>) -> Result<()> {
        for entry in entries {
            match entry.get_entry_type() {
                EntryType::EntryNormal => {
                    // Empty entries are the no-ops a new leader appends
                    if entry.get_data().is_empty() {
                        continue;
                    }
                    let result = Command::decode(entry.get_data()).map(|command| {
                        tracing::trace!(
                            "Applying {:?} at index {}",
                            command,
                            entry.index
                        );
                        self.fsm.apply(&command);
                    });
                    if let Err(e) = &result {
                        tracing::error!("Skipping undecodable entry {}: {}", entry.index, e);
                    }
                    self.resolve(entry.get_context(), result);
                }
                EntryType::EntryConfChange | EntryType::EntryConfChangeV2 => {
                    tracing::warn!(
                        "Ignoring membership change at index {}: voter set is static",
                        entry.index
                    );
                }
            }
        }
        Ok(())
    }

    /// Complete the waiter of a locally proposed entry.
    ///
    /// Proposal ids restart with the process, so an entry only matches a
    /// waiter proposed by this node in the same term.
    fn resolve(&mut self, context: &[u8], result: Result<()>) {
        let Some((node, term, proposal)) = parse_proposal_context(context) else {
            return;
        };
        if node != self.config.id {
            return;
        }
        if self.pending.get(&proposal).map(|(t, _)| *t) == Some(term) {
            if let Some((_, tx)) = self.pending.remove(&proposal) {
                let _ = tx.send(result);
            }
        }
    }

    /// Fail waiters that can no longer be resolved: this node stepped down,
    /// or leads a later term than the one they were proposed in.
    fn drop_stale_pending(&mut self) {
        let leading = self.raw.raft.state == StateRole::Leader;
        let term = self.raw.raft.term;
        let stale: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, (proposed_in, _))| !leading || *proposed_in != term)
            .map(|(id, _)| *id)
            .collect();
        if stale.is_empty() {
            return;
        }

        tracing::warn!(
            "Dropping {} pending proposal(s): {} at term {}",
            stale.len(),
            ClusterRole::from(self.raw.raft.state),
            term
        );
        for id in stale {
            if let Some((_, tx)) = self.pending.remove(&id) {
                let _ = tx.send(Err(Error::ProposalDropped));
            }
        }
    }

    fn drop_pending(&mut self) {
        for (_, (_, tx)) in self.pending.drain() {
            let _ = tx.send(Err(Error::ProposalDropped));
        }
    }

    fn maybe_compact(&mut self) -> Result<()> {
        let threshold = self.config.snapshot_threshold;
        let applied = self.raw.raft.raft_log.applied;
        if threshold == 0 || applied < self.last_snapshot_index + threshold {
            return Ok(());
        }

        let data = self.fsm.snapshot()?;
        let store = self.raw.store();
        store.create_snapshot(applied, data)?;
        store.compact(applied + 1)?;
        self.last_snapshot_index = applied;
        tracing::info!("Compacted raft log through index {}", applied);
        Ok(())
    }

    fn publish_status(&mut self) {
        let raft = &self.raw.raft;
        let status = RaftStatus {
            id: self.config.id,
            role: raft.state.into(),
            leader_id: raft.leader_id,
            term: raft.term,
            commit_index: raft.raft_log.committed,
            applied_index: raft.raft_log.applied,
            voters: self.voters.clone(),
        };
        *self.status.write() = status;
    }
}

/// Entry context: proposing node, term and proposal id, all big-endian
fn proposal_context(node: u64, term: u64, proposal: u64) -> Vec<u8> {
    let mut context = Vec::with_capacity(24);
    context.extend_from_slice(&node.to_be_bytes());
    context.extend_from_slice(&term.to_be_bytes());
    context.extend_from_slice(&proposal.to_be_bytes());
    context
}

fn parse_proposal_context(context: &[u8]) -> Option<(u64, u64, u64)> {
    if context.len() != 24 {
        return None;
    }
    let word = |i: usize| -> Option<u64> {
        Some(u64::from_be_bytes(context[i * 8..(i + 1) * 8].try_into().ok()?))
    };
    Some((word(0)?, word(1)?, word(2)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::throttle::Throttler;
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    /// Routes messages between in-process nodes; `down` nodes lose everything.
    #[derive(Default)]
    struct Router {
        handles: RwLock<HashMap<u64, RaftHandle>>,
        down: RwLock<Vec<u64>>,
    }

    struct RouterLink(Arc<Router>);

    impl Transport for RouterLink {
        fn send(&self, messages: Vec<Message>) {
            let down = self.0.down.read();
            let handles = self.0.handles.read();
            for message in messages {
                if down.contains(&message.from) || down.contains(&message.to) {
                    continue;
                }
                if let Some(handle) = handles.get(&message.to) {
                    handle.step(message);
                }
            }
        }
    }

    struct TestNode {
        handle: RaftHandle,
        throttler: Arc<Throttler>,
        shutdown: watch::Sender<bool>,
        _dir: TempDir,
    }

    fn spawn_cluster(size: u64, snapshot_threshold: u64) -> (Arc<Router>, Vec<TestNode>) {
        let router = Arc::new(Router::default());
        let members: HashMap<u64, String> =
            (1..=size).map(|id| (id, format!("node-{}:10008", id))).collect();

        let mut nodes = Vec::new();
        for id in 1..=size {
            let dir = TempDir::new().unwrap();
            let throttler = Arc::new(Throttler::new());
            let config = RaftNodeConfig {
                tick_interval: Duration::from_millis(10),
                snapshot_threshold,
                ..RaftNodeConfig::new(id, members.clone())
            };
            let (node, handle) = RaftNode::new(
                config,
                RaftStorage::open(dir.path()).unwrap(),
                ThrottleFsm::new(throttler.clone()),
                Arc::new(RouterLink(router.clone())),
            )
            .unwrap();
            assert_eq!(handle.id(), id);
            router.handles.write().insert(id, handle.clone());

            let (shutdown, rx) = watch::channel(false);
            tokio::spawn(node.run(rx));
            nodes.push(TestNode {
                handle,
                throttler,
                shutdown,
                _dir: dir,
            });
        }
        (router, nodes)
    }

    async fn wait_for_leader(nodes: &[TestNode], skip: &[usize]) -> usize {
        for _ in 0..500 {
            let leaders: Vec<usize> = nodes
                .iter()
                .enumerate()
                .filter(|(i, n)| {
                    !skip.contains(i) && n.handle.status().role == ClusterRole::Leader
                })
                .map(|(i, _)| i)
                .collect();
            if leaders.len() == 1 {
                return leaders[0];
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no single leader elected");
    }

    fn throttle(app: &str, ratio: f64) -> Command {
        Command::ThrottleApp {
            app_name: app.into(),
            ratio: Some(ratio),
            expire_at: Utc::now() + ChronoDuration::minutes(5),
            ttl_minutes: 5,
        }
    }

    #[tokio::test]
    async fn test_single_node_elects_itself_and_commits() {
        let (_router, nodes) = spawn_cluster(1, 0);
        wait_for_leader(&nodes, &[]).await;

        nodes[0].handle.propose(throttle("svc-a", 0.5)).await.unwrap();
        let apps = nodes[0].throttler.throttled_apps_map();
        assert_eq!(apps["svc-a"].ratio, 0.5);
        assert!(nodes[0].handle.status().applied_index >= 2);
    }

    #[tokio::test]
    async fn test_follower_rejects_proposal_with_leader_hint() {
        let (_router, nodes) = spawn_cluster(3, 0);
        let leader = wait_for_leader(&nodes, &[]).await;
        let follower = (leader + 1) % 3;

        // Followers learn the leader from its first heartbeat
        for _ in 0..100 {
            if nodes[follower].handle.status().leader_id != 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let err = nodes[follower]
            .handle
            .propose(throttle("svc-a", 1.0))
            .await
            .unwrap_err();
        assert_eq!(
            err.leader_hint(),
            Some(format!("node-{}:10008", leader + 1).as_str())
        );
    }

    #[tokio::test]
    async fn test_replication_and_failover() {
        let (router, nodes) = spawn_cluster(3, 0);
        let leader = wait_for_leader(&nodes, &[]).await;

        nodes[leader].handle.propose(throttle("svc-a", 0.25)).await.unwrap();
        for _ in 0..200 {
            if nodes.iter().all(|n| n.throttler.throttled_apps_map().contains_key("svc-a")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for node in &nodes {
            assert_eq!(node.throttler.throttled_apps_map()["svc-a"].ratio, 0.25);
        }

        // Cut the leader off; the other two elect a new one
        router.down.write().push(leader as u64 + 1);
        nodes[(leader + 1) % 3].handle.campaign().await.unwrap();
        let new_leader = wait_for_leader(&nodes, &[leader]).await;
        assert_ne!(new_leader, leader);

        nodes[new_leader]
            .handle
            .propose(Command::UnthrottleApp {
                app_name: "svc-a".into(),
            })
            .await
            .unwrap();
        assert!(nodes[new_leader].throttler.throttled_apps_map().is_empty());
    }

    #[tokio::test]
    async fn test_isolated_leader_fails_pending_proposal() {
        let (router, nodes) = spawn_cluster(3, 0);
        let leader = wait_for_leader(&nodes, &[]).await;

        // The entry is appended but can never reach a majority
        router.down.write().push(leader as u64 + 1);
        let handle = nodes[leader].handle.clone();
        let waiter = tokio::spawn(async move { handle.propose(throttle("svc-x", 1.0)).await });

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("pending proposal must fail once leadership is lost")
            .unwrap();
        assert!(matches!(outcome, Err(Error::ProposalDropped)), "{:?}", outcome);
        assert_ne!(nodes[leader].handle.status().role, ClusterRole::Leader);

        // Healing does not resurrect the dropped waiter, and the cluster
        // keeps accepting writes
        router.down.write().clear();
        let leader = wait_for_leader(&nodes, &[]).await;
        nodes[leader].handle.propose(throttle("svc-y", 1.0)).await.unwrap();
    }

    #[test]
    fn test_entry_from_earlier_term_leaves_waiter_pending() {
        let dir = TempDir::new().unwrap();
        let members = HashMap::from([(1, "node-1:10008".to_string())]);
        let (mut node, _handle) = RaftNode::new(
            RaftNodeConfig::new(1, members),
            RaftStorage::open(dir.path()).unwrap(),
            ThrottleFsm::new(Arc::new(Throttler::new())),
            Arc::new(RouterLink(Arc::new(Router::default()))),
        )
        .unwrap();

        // Same proposal id, reused after a restart in a later term
        let (tx, mut rx) = oneshot::channel();
        node.pending.insert(1, (3, tx));

        node.resolve(&proposal_context(1, 2, 1), Ok(()));
        assert!(rx.try_recv().is_err());
        assert!(node.pending.contains_key(&1));

        node.resolve(&proposal_context(2, 3, 1), Ok(()));
        assert!(node.pending.contains_key(&1));

        node.resolve(&proposal_context(1, 3, 1), Ok(()));
        assert!(matches!(rx.try_recv(), Ok(Ok(()))));
        assert!(node.pending.is_empty());
    }

    #[test]
    fn test_proposal_context_layout() {
        let context = proposal_context(7, 3, 42);
        assert_eq!(context.len(), 24);
        assert_eq!(parse_proposal_context(&context), Some((7, 3, 42)));
        assert_eq!(parse_proposal_context(&context[..16]), None);
        assert_eq!(parse_proposal_context(&[]), None);
    }

    #[tokio::test]
    async fn test_compaction_and_snapshot_catch_up() {
        let (router, nodes) = spawn_cluster(3, 5);
        let leader = wait_for_leader(&nodes, &[]).await;
        let lagging = (leader + 1) % 3;

        router.down.write().push(lagging as u64 + 1);
        for i in 0..12 {
            nodes[leader]
                .handle
                .propose(throttle(&format!("svc-{}", i), 1.0))
                .await
                .unwrap();
        }
        router.down.write().clear();

        for _ in 0..300 {
            if nodes[lagging].throttler.throttled_apps_map().len() == 12 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(nodes[lagging].throttler.throttled_apps_map().len(), 12);
    }

    #[tokio::test]
    async fn test_shutdown_reports_unknown() {
        let (_router, nodes) = spawn_cluster(1, 0);
        wait_for_leader(&nodes, &[]).await;

        nodes[0].shutdown.send(true).unwrap();
        for _ in 0..100 {
            if nodes[0].handle.status().role == ClusterRole::Unknown {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(nodes[0].handle.status().role, ClusterRole::Unknown);
        assert!(nodes[0].handle.propose(throttle("late", 1.0)).await.is_err());
    }
}
