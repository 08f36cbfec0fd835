//! Raft-backed [`ConsensusService`]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::command::{Command, ThrottleFsm};
use super::monitor::{run_monitor, MONITOR_INTERVAL};
use super::node::{RaftHandle, RaftNode, RaftNodeConfig, RaftStatus};
use super::setup::Membership;
use super::storage::RaftStorage;
use super::transport::{self, HttpTransport};
use super::{validate_throttle, ClusterRole, ConsensusService};
use crate::common::{timestamp_now, Error, MetricsSink, RaftSettings, Result};
use crate::throttle::{resolve_expire_at, AppThrottle, RecentApp, Throttler};

/// A node of the replicated throttle map
pub struct RaftStore {
    handle: RaftHandle,
    membership: Membership,
    throttler: Arc<Throttler>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    monitoring: AtomicBool,
}

impl RaftStore {
    /// Open durable storage, bind the peer listener and start the driver.
    ///
    /// Fails without starting anything if the data directory or the bind
    /// address cannot be used.
    pub async fn open(
        settings: &RaftSettings,
        membership: Membership,
        throttler: Arc<Throttler>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Arc<Self>> {
        let storage = RaftStorage::open(&settings.data_dir)?;
        let listener = TcpListener::bind(membership.bind.as_str())
            .await
            .map_err(|e| {
                Error::InvalidConfig(format!(
                    "cannot bind raft transport on {}: {}",
                    membership.bind, e
                ))
            })?;

        let transport = Arc::new(HttpTransport::new(membership.self_id, &membership.members)?);
        let config = RaftNodeConfig {
            tick_interval: settings.tick_interval(),
            election_tick: settings.election_tick,
            heartbeat_tick: settings.heartbeat_tick,
            snapshot_threshold: settings.snapshot_threshold,
            ..RaftNodeConfig::new(membership.self_id, membership.members.clone())
        };
        let (node, handle) = RaftNode::new(
            config,
            storage,
            ThrottleFsm::new(throttler.clone()),
            transport,
        )?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            tokio::spawn(node.run(shutdown_rx.clone())),
            tokio::spawn(transport::serve(listener, handle.clone(), shutdown_rx)),
        ];

        tracing::info!(
            "Raft store open: node {:016x} on {} ({} voters, data in {})",
            membership.self_id,
            membership.bind,
            membership.members.len(),
            settings.data_dir.display()
        );

        Ok(Arc::new(Self {
            handle,
            membership,
            throttler,
            metrics,
            shutdown,
            tasks: Mutex::new(tasks),
            monitoring: AtomicBool::new(false),
        }))
    }

    pub fn status(&self) -> RaftStatus {
        self.handle.status()
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    /// Start an election on this node right away
    pub async fn campaign(&self) -> Result<()> {
        self.handle.campaign().await
    }

    /// Stop the driver and the peer listener, then wait for both
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Raft task ended abnormally: {}", e);
            }
        }
    }

    fn address_of(&self, id: u64) -> Option<&String> {
        self.membership.members.get(&id)
    }

    async fn propose(&self, command: Command) -> Result<()> {
        // Cheap check first; the driver checks again before proposing
        if !self.is_leader() {
            return Err(Error::NotLeader(self.get_leader()));
        }
        self.handle.propose(command).await
    }
}

impl Drop for RaftStore {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[async_trait]
impl ConsensusService for RaftStore {
    async fn throttle_app(
        &self,
        app_name: &str,
        ttl_minutes: i64,
        expire_at: Option<DateTime<Utc>>,
        ratio: Option<f64>,
    ) -> Result<()> {
        validate_throttle(app_name, ratio)?;
        let expire_at = resolve_expire_at(timestamp_now(), ttl_minutes, expire_at);
        self.propose(Command::ThrottleApp {
            app_name: app_name.to_string(),
            ratio,
            expire_at,
            ttl_minutes,
        })
        .await?;
        tracing::info!("Throttled app {} until {}", app_name, expire_at);
        Ok(())
    }

    async fn unthrottle_app(&self, app_name: &str) -> Result<()> {
        validate_throttle(app_name, None)?;
        self.propose(Command::UnthrottleApp {
            app_name: app_name.to_string(),
        })
        .await?;
        tracing::info!("Unthrottled app {}", app_name);
        Ok(())
    }

    fn throttled_apps_map(&self) -> HashMap<String, AppThrottle> {
        self.throttler.throttled_apps_map()
    }

    fn recent_apps_map(&self) -> HashMap<String, RecentApp> {
        self.throttler.recent_apps_map()
    }

    fn role(&self) -> ClusterRole {
        self.handle.status().role
    }

    fn get_leader(&self) -> String {
        let leader_id = self.handle.status().leader_id;
        self.address_of(leader_id).cloned().unwrap_or_default()
    }

    fn get_state_description(&self) -> String {
        let status = self.handle.status();
        let leader = self
            .address_of(status.leader_id)
            .map(String::as_str)
            .unwrap_or("unknown");
        format!(
            "{} at {} (term {}, leader {}, commit {}, applied {})",
            status.role,
            self.membership.bind,
            status.term,
            leader,
            status.commit_index,
            status.applied_index
        )
    }

    fn get_shared_domain_services(&self) -> Result<Vec<String>> {
        let status = self.handle.status();
        if status.role == ClusterRole::Unknown {
            return Err(Error::Membership("raft engine is not running".into()));
        }
        status
            .voters
            .iter()
            .map(|id| {
                self.address_of(*id).cloned().ok_or_else(|| {
                    Error::Membership(format!("no address known for raft node {:016x}", id))
                })
            })
            .collect()
    }

    fn check_app(&self, app_name: &str) -> bool {
        self.throttler.check_app(app_name)
    }

    async fn monitor(&self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.monitoring.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidState("leadership monitor already running".into()));
        }
        run_monitor(self, self.metrics.as_ref(), MONITOR_INTERVAL, shutdown).await;
        Ok(())
    }
}
